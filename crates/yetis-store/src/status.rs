use std::fmt;

/// Mirrors `server/store_deployment.go:ProcessStatus`. The daemon's state
/// machine only ever visits these four states (§5 "Lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Pending,
    Running,
    Failed,
    Terminating,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Pending => "Pending",
            ProcessStatus::Running => "Running",
            ProcessStatus::Failed => "Failed",
            ProcessStatus::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}
