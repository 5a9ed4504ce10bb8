//! YAML configuration adapters (§6 "Configuration formats", §10.4).
//!
//! Grounded on `common/config.go:ReadConfigs` (multi-document apply files)
//! and `common/server_config.go:ReadServerConfig` (daemon config). These are
//! the "external collaborator" adapters spec.md §1 scopes out of the core —
//! kept here because a complete daemon needs a concrete YAML reader.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::env::substitute_from_process_env;
use crate::spec::{DeploymentSpec, Kind, ServiceSpec, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML document {index} in {path}: {source}")]
    Yaml {
        path: PathBuf,
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("document {index} in {path} is invalid: {source}")]
    Invalid {
        path: PathBuf,
        index: usize,
        #[source]
        source: ValidationError,
    },
}

#[derive(Debug, Clone)]
pub enum ApplyDocument {
    Deployment(DeploymentSpec),
    Service(ServiceSpec),
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    kind: Kind,
    spec: serde_yaml::Value,
}

/// Reads a multi-document YAML apply file, resolving defaults and `$NAME`
/// environment substitution the way `ReadConfigs` does, one document at a
/// time so a single malformed document doesn't hide the rest's errors.
pub fn read_apply_file(path: impl AsRef<Path>) -> Result<Vec<ApplyDocument>, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let default_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    parse_apply_documents(&content, &default_dir, path)
}

fn parse_apply_documents(
    content: &str,
    default_dir: &Path,
    path_for_errors: &Path,
) -> Result<Vec<ApplyDocument>, ConfigError> {
    let mut out = Vec::new();
    for (index, de) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let raw = RawDocument::deserialize(de).map_err(|source| ConfigError::Yaml {
            path: path_for_errors.to_path_buf(),
            index,
            source,
        })?;
        match raw.kind {
            Kind::Deployment => {
                let mut spec: DeploymentSpec =
                    serde_yaml::from_value(raw.spec).map_err(|source| ConfigError::Yaml {
                        path: path_for_errors.to_path_buf(),
                        index,
                        source,
                    })?;
                apply_deployment_defaults(&mut spec, default_dir);
                substitute_from_process_env(&mut spec.env);
                spec.validate().map_err(|source| ConfigError::Invalid {
                    path: path_for_errors.to_path_buf(),
                    index,
                    source,
                })?;
                out.push(ApplyDocument::Deployment(spec));
            }
            Kind::Service => {
                let spec: ServiceSpec =
                    serde_yaml::from_value(raw.spec).map_err(|source| ConfigError::Yaml {
                        path: path_for_errors.to_path_buf(),
                        index,
                        source,
                    })?;
                out.push(ApplyDocument::Service(spec));
            }
        }
    }
    Ok(out)
}

fn apply_deployment_defaults(spec: &mut DeploymentSpec, default_dir: &Path) {
    if spec.workdir.is_none() {
        spec.workdir = Some(default_dir.to_string_lossy().into_owned());
    }
    if spec.logdir.is_none() {
        spec.logdir = Some(default_dir.to_string_lossy().into_owned());
    }
}

/// Daemon-wide configuration: log directory and alerting transport, per
/// `common/server_config.go:YetisConfig`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_logdir")]
    pub logdir: String,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

fn default_logdir() -> String {
    "/tmp".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            logdir: default_logdir(),
            alerting: AlertingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertingConfig {
    #[serde(default)]
    pub mail: Option<MailConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl MailConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.host.trim().is_empty() {
            return Err("mail: host can't be empty");
        }
        if self.from.trim().is_empty() {
            return Err("mail: from field can't be empty");
        }
        if self.to.is_empty() {
            return Err("mail: to field can't be empty");
        }
        Ok(())
    }
}

impl ServerConfig {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: ServerConfig = serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            index: 0,
            source,
        })?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::StrategyType;

    #[test]
    fn parses_multi_doc_deployment_and_service() {
        let yaml = r#"
kind: Deployment
spec:
  name: hello
  cmd: "nc -lk 27000"
  livenessProbe:
    tcpSocket:
      port: 27000
---
kind: Service
spec:
  port: 8080
  selector:
    name: hello
"#;
        let docs = parse_apply_documents(yaml, Path::new("/tmp"), Path::new("cfg.yaml")).unwrap();
        assert_eq!(docs.len(), 2);
        match &docs[0] {
            ApplyDocument::Deployment(d) => {
                assert_eq!(d.name, "hello");
                assert_eq!(d.workdir.as_deref(), Some("/tmp"));
                assert_eq!(d.strategy.r#type, StrategyType::Recreate);
            }
            _ => panic!("expected deployment"),
        }
        match &docs[1] {
            ApplyDocument::Service(s) => {
                assert_eq!(s.port, 8080);
                assert_eq!(s.selector.name, "hello");
            }
            _ => panic!("expected service"),
        }
    }

    #[test]
    fn defaults_kind_to_deployment() {
        let yaml = r#"
spec:
  name: noproxy
  cmd: "true"
  livenessProbe:
    tcpSocket:
      port: 9999
"#;
        let docs = parse_apply_documents(yaml, Path::new("/tmp"), Path::new("cfg.yaml")).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(matches!(docs[0], ApplyDocument::Deployment(_)));
    }

    #[test]
    fn invalid_document_is_rejected() {
        let yaml = r#"
spec:
  name: bad
  cmd: "true"
  strategy:
    type: RollingUpdate
"#;
        let err = parse_apply_documents(yaml, Path::new("/tmp"), Path::new("cfg.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
