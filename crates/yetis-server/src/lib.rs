//! The control-plane daemon (§4.G "Control API").
//!
//! Grounded on the teacher's `server` crate: a thin binary crate whose
//! library half exposes the pieces `main.rs` assembles (`Supervisor`,
//! `routes::router`, `file_logging`) and whose tests exercise over HTTP.

pub mod error;
pub mod file_logging;
pub mod routes;
pub mod supervisor;

pub use supervisor::{Supervisor, YETIS_SERVER_PORT};
