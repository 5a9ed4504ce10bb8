//! Environment variable substitution (§6 "Environment substitution").
//!
//! Grounded on `common/config.go:setEnvVars` — applied once at apply time,
//! from the CLI process's own environment. `$YETIS_PORT` is never touched
//! here; it's resolved at launch time by `yetis-restart` once a backend port
//! has been allocated.

use std::collections::HashMap;

use crate::spec::EnvVar;

pub const YETIS_PORT: &str = "YETIS_PORT";

/// Resolves `$NAME` values against the given environment snapshot, leaving
/// the literal in place if the variable is unset. Never touches `$YETIS_PORT`.
pub fn substitute_from_env(env: &mut [EnvVar], lookup: &HashMap<String, String>) {
    for var in env.iter_mut() {
        if var.value == format!("${YETIS_PORT}") {
            continue;
        }
        if let Some(name) = var.value.strip_prefix('$') {
            if name.is_empty() {
                continue;
            }
            if let Some(resolved) = lookup.get(name) {
                var.value = resolved.clone();
            }
        }
    }
}

/// Convenience wrapper over the real process environment.
pub fn substitute_from_process_env(env: &mut [EnvVar]) {
    let lookup: HashMap<String, String> = std::env::vars().collect();
    substitute_from_env(env, &lookup);
}

/// Removes any existing `YETIS_PORT` entry and appends a fresh one, and
/// substitutes any `$YETIS_PORT` literal values with the concrete port
/// (§6, §4.F step 4). This runs at launch time, once a backend port exists.
pub fn inject_yetis_port(env: &[EnvVar], port: u16) -> Vec<EnvVar> {
    let mut out: Vec<EnvVar> = env
        .iter()
        .filter(|v| v.name != YETIS_PORT)
        .map(|v| {
            if v.value == format!("${YETIS_PORT}") {
                EnvVar {
                    name: v.name.clone(),
                    value: port.to_string(),
                }
            } else {
                v.clone()
            }
        })
        .collect();
    out.push(EnvVar {
        name: YETIS_PORT.to_string(),
        value: port.to_string(),
    });
    out
}

/// Reads the port currently stashed in `YETIS_PORT`, if any (used to detect
/// whether the liveness probe port is *the* launch port, per
/// `isYetisPortUsed` in the original).
pub fn current_yetis_port(env: &[EnvVar]) -> Option<u16> {
    env.iter()
        .find(|v| v.name == YETIS_PORT)
        .and_then(|v| v.value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_from_lookup_leaves_unset_literal() {
        let mut env = vec![
            EnvVar { name: "A".into(), value: "$HOME".into() },
            EnvVar { name: "B".into(), value: "$NOPE".into() },
            EnvVar { name: "C".into(), value: "literal".into() },
            EnvVar { name: "D".into(), value: "$YETIS_PORT".into() },
        ];
        let mut lookup = HashMap::new();
        lookup.insert("HOME".to_string(), "/root".to_string());
        substitute_from_env(&mut env, &lookup);
        assert_eq!(env[0].value, "/root");
        assert_eq!(env[1].value, "$NOPE");
        assert_eq!(env[2].value, "literal");
        assert_eq!(env[3].value, "$YETIS_PORT");
    }

    #[test]
    fn inject_yetis_port_replaces_literal_and_appends() {
        let env = vec![
            EnvVar { name: "APP_PORT".into(), value: "$YETIS_PORT".into() },
            EnvVar { name: "YETIS_PORT".into(), value: "1111".into() },
        ];
        let out = inject_yetis_port(&env, 4242);
        assert_eq!(out.iter().find(|v| v.name == "APP_PORT").unwrap().value, "4242");
        assert_eq!(current_yetis_port(&out), Some(4242));
        assert_eq!(out.iter().filter(|v| v.name == "YETIS_PORT").count(), 1);
    }
}
