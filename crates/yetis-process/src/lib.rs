//! Process launching and termination (§4.B "Process adapter").
//!
//! Grounded on `server/process.go:launchProcess`/`launchProcessWithOut` for
//! the launch side and `common/unix/commands.go:TerminateProcess`/`KillByPort`
//! for teardown, with the actual signal delivery adapted from
//! `local-deployment/src/command.rs:kill_process_group` so a whole process
//! group (not just the direct child) gets the signal.

mod launch;
mod liveness_check;
mod terminate;

pub use launch::{launch, LaunchOutcome, ProcessError};
pub use liveness_check::is_alive;
pub use terminate::{kill_by_port, terminate_process_group};
