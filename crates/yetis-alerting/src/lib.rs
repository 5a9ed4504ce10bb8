//! Failure/recovery alerting (§4.H "Alerting").
//!
//! Grounded on `server/alerting.go:AlertFail`/`AlertRecovery` for the
//! dedup-by-root-name semantics, and `common/server_config.go:Mail.Send` for
//! the transport, rebuilt on `lettre` since the original shells out to
//! `net/smtp` directly and Rust's ecosystem equivalent is a real crate
//! rather than a hand-rolled SMTP client.

use std::sync::Arc;

use dashmap::DashMap;
use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use serde::Serialize;
use thiserror::Error;
use yetis_common::config::MailConfig;
use yetis_common::{root_name, DeploymentSpec};

#[derive(Debug, Clone, Serialize)]
pub struct AlertInfo {
    pub name: String,
    pub status: String,
    pub pid: u32,
    pub restarts: u32,
    pub age: String,
    pub spec: DeploymentSpec,
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert has already been sent for '{0}'")]
    AlreadySent(String),
    #[error("alert not triggered for '{0}'")]
    NotTriggered(String),
    #[error("failed to serialize alert payload: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("invalid mail address: {0}")]
    InvalidAddress(#[source] lettre::address::AddressError),
    #[error("failed to build alert message: {0}")]
    Build(#[source] lettre::error::Error),
    #[error("failed to send alert mail: {0}")]
    Send(#[source] lettre::transport::smtp::Error),
}

/// Tracks which root-named deployments currently have an un-recovered fail
/// alert outstanding, and sends mail through an optional SMTP transport.
/// Mirrors the package-level `alertStore` + `serverConfig.Alerting` pair.
#[derive(Clone)]
pub struct Alerter {
    sent: Arc<DashMap<String, ()>>,
    mail: Option<(MailConfig, SmtpTransport)>,
}

impl Alerter {
    pub fn new(mail: Option<MailConfig>) -> Self {
        let mail = mail.map(|cfg| {
            let creds = Credentials::new(cfg.username.clone(), cfg.password.clone());
            let transport = SmtpTransport::relay(&cfg.host)
                .map(|b| b.port(cfg.port).credentials(creds).build())
                .unwrap_or_else(|_| SmtpTransport::builder_dangerous(&cfg.host).port(cfg.port).build());
            (cfg, transport)
        });
        Self {
            sent: Arc::new(DashMap::new()),
            mail,
        }
    }

    pub fn disabled() -> Self {
        Self {
            sent: Arc::new(DashMap::new()),
            mail: None,
        }
    }

    /// Sends a failure alert once per root name, returning
    /// `AlreadySent` for any further failure before a recovery clears it.
    pub fn alert_fail(&self, info: AlertInfo) -> Result<(), AlertError> {
        let key = root_name(&info.name).to_string();
        if self.sent.insert(key.clone(), ()).is_some() {
            return Err(AlertError::AlreadySent(key));
        }
        self.send(&format!("Deployment {} Failed", info.name), &info)
    }

    /// Clears the dedup entry and sends a recovery alert; errors if no
    /// fail alert was outstanding, matching `AlertRecovery`.
    pub fn alert_recovery(&self, info: AlertInfo) -> Result<(), AlertError> {
        let key = root_name(&info.name).to_string();
        if self.sent.remove(&key).is_none() {
            return Err(AlertError::NotTriggered(key));
        }
        self.send(&format!("Deployment {} Recovered", info.name), &info)
    }

    fn send(&self, title: &str, info: &AlertInfo) -> Result<(), AlertError> {
        let Some((cfg, transport)) = &self.mail else {
            return Ok(());
        };
        let body = serde_json::to_string_pretty(info).map_err(AlertError::Serialize)?;
        let mut builder = Message::builder().from(cfg.from.parse().map_err(AlertError::InvalidAddress)?);
        for to in &cfg.to {
            builder = builder.to(to.parse().map_err(AlertError::InvalidAddress)?);
        }
        let message = builder
            .subject(title)
            .body(body)
            .map_err(AlertError::Build)?;
        transport.send(&message).map_err(AlertError::Send)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yetis_common::LivenessProbe;

    fn info(name: &str) -> AlertInfo {
        AlertInfo {
            name: name.to_string(),
            status: "Failed".into(),
            pid: 123,
            restarts: 2,
            age: "5m0s".into(),
            spec: DeploymentSpec {
                name: name.to_string(),
                cmd: "true".into(),
                pre_cmd: None,
                workdir: None,
                logdir: None,
                liveness: LivenessProbe::default(),
                env: vec![],
                strategy: Default::default(),
                proxy: None,
            },
        }
    }

    #[test]
    fn dedups_fail_by_root_name() {
        let alerter = Alerter::disabled();
        alerter.alert_fail(info("web-1")).unwrap();
        let err = alerter.alert_fail(info("web-2")).unwrap_err();
        assert!(matches!(err, AlertError::AlreadySent(_)));
    }

    #[test]
    fn recovery_requires_prior_fail() {
        let alerter = Alerter::disabled();
        let err = alerter.alert_recovery(info("web")).unwrap_err();
        assert!(matches!(err, AlertError::NotTriggered(_)));
    }

    #[test]
    fn recovery_clears_dedup_entry() {
        let alerter = Alerter::disabled();
        alerter.alert_fail(info("web")).unwrap();
        alerter.alert_recovery(info("web")).unwrap();
        alerter.alert_fail(info("web")).unwrap();
    }
}
