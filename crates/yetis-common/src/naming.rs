//! Rolling-update name parsing and human-readable age formatting.
//!
//! Grounded on `rootNameForRollingUpdate`/`upgrade` helpers scattered across
//! `examples/original_source/server/*.go` (e.g. `store.go:getDeploymentByRootName`,
//! `alerting.go`), unified here into one place per §10.7.

use std::time::Duration;

use regex::Regex;
use std::sync::LazyLock;

static SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(.*)-(\d+)$").unwrap());

/// Strips a rolling-update `-N` suffix, returning the deployment's root name.
pub fn root_name(name: &str) -> &str {
    match SUFFIX.captures(name) {
        Some(caps) => caps.get(1).unwrap().as_str(),
        None => name,
    }
}

/// Computes the successor name for a RollingUpdate: increments a trailing
/// `-N`, or appends `-1` if there is none.
pub fn upgrade_name(name: &str) -> String {
    match SUFFIX.captures(name) {
        Some(caps) => {
            let root = caps.get(1).unwrap().as_str();
            let n: u64 = caps.get(2).unwrap().as_str().parse().unwrap_or(0);
            format!("{root}-{}", n + 1)
        }
        None => format!("{name}-1"),
    }
}

/// Formats an elapsed duration per §8's boundaries:
/// <60s -> `<n>s`, <60m -> `<m>m<s>s`, <48h -> `<h>h<m>m`, else `<d>d`.
pub fn age_string(age: Duration) -> String {
    let secs = age.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    if secs < 60 * 60 {
        let m = secs / 60;
        let s = secs % 60;
        return format!("{m}m{s}s");
    }
    if secs < 48 * 60 * 60 {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        return format!("{h}h{m}m");
    }
    let d = secs / 86400;
    format!("{d}d")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_name_strips_suffix() {
        assert_eq!(root_name("web-3"), "web");
        assert_eq!(root_name("web"), "web");
        assert_eq!(root_name("web-prod-2"), "web-prod");
    }

    #[test]
    fn upgrade_name_appends_or_increments() {
        assert_eq!(upgrade_name("web"), "web-1");
        assert_eq!(upgrade_name("web-1"), "web-2");
        assert_eq!(upgrade_name("web-9"), "web-10");
    }

    #[test]
    fn upgrade_then_root_is_one_greater() {
        // §8 round-trip property: upgrade ∘ root on an N-suffixed name
        // yields an N-suffixed name one greater, else appends -1.
        assert_eq!(root_name(&upgrade_name("web")), "web");
        assert_eq!(upgrade_name("web-5"), "web-6");
    }

    #[test]
    fn age_boundaries() {
        assert_eq!(age_string(Duration::from_secs(5)), "5s");
        assert_eq!(age_string(Duration::from_secs(59)), "59s");
        assert_eq!(age_string(Duration::from_secs(60)), "1m0s");
        assert_eq!(age_string(Duration::from_secs(125)), "2m5s");
        assert_eq!(age_string(Duration::from_secs(3600)), "1h0m");
        assert_eq!(age_string(Duration::from_secs(3600 * 47 + 60)), "47h1m");
        assert_eq!(age_string(Duration::from_secs(3600 * 48)), "2d");
        assert_eq!(age_string(Duration::from_secs(3600 * 72)), "3d");
    }
}
