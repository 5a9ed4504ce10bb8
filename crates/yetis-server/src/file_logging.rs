//! Console + optional daily-rotating file logging, grounded on the teacher's
//! `server/src/file_logging.rs`. `YETIS_FILE_LOGGING` / `YETIS_LOG_DIR` /
//! `YETIS_LOG_MAX_FILES` stand in for the teacher's `VK_*` equivalents.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

pub struct FileLoggingConfig {
    pub enabled: bool,
    pub log_dir: PathBuf,
    pub max_files: usize,
}

impl FileLoggingConfig {
    pub fn from_env() -> Self {
        let enabled = std::env::var("YETIS_FILE_LOGGING")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let log_dir = std::env::var("YETIS_LOG_DIR")
            .unwrap_or_else(|_| "/tmp/yetis-logs".to_string())
            .into();
        let max_files = std::env::var("YETIS_LOG_MAX_FILES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);
        Self {
            enabled,
            log_dir,
            max_files,
        }
    }
}

/// Initializes the global tracing subscriber. Returns the file layer's
/// `WorkerGuard`, which must be held for the process lifetime so buffered
/// log lines are flushed on exit.
pub fn init_logging(log_level: &str) -> Option<WorkerGuard> {
    let config = FileLoggingConfig::from_env();
    let filter_string = format!(
        "yetis_common={level},yetis_netutil={level},yetis_process={level},yetis_store={level},\
         yetis_liveness={level},yetis_forward={level},yetis_alerting={level},yetis_restart={level},\
         yetis_server={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(&filter_string).expect("failed to build tracing filter");

    let console_layer = tracing_subscriber::fmt::layer().with_filter(env_filter.clone());

    if !config.enabled {
        tracing_subscriber::registry().with(console_layer).init();
        return None;
    }

    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("failed to create log directory {:?}: {}", config.log_dir, e);
        tracing_subscriber::registry().with(console_layer).init();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "yetisd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = EnvFilter::try_new(&filter_string).expect("failed to build tracing filter");
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(log_dir = ?config.log_dir, max_files = config.max_files, "file logging enabled");

    let log_dir = config.log_dir.clone();
    let max_files = config.max_files;
    std::thread::spawn(move || cleanup_old_logs(&log_dir, max_files));

    Some(guard)
}

fn cleanup_old_logs(log_dir: &PathBuf, max_files: usize) {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut log_files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("yetisd.log"))
                .unwrap_or(false)
        })
        .filter_map(|e| {
            e.metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(|t| (e.path(), t))
        })
        .collect();

    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.into_iter().skip(max_files) {
        let _ = std::fs::remove_file(path);
    }
}
