use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use command_group::AsyncCommandGroup;
use thiserror::Error;
use tokio::process::Command;
use yetis_common::DeploymentSpec;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("running preCmd for '{name}': {source}")]
    PreCmd {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("preCmd for '{name}' exited with {status}")]
    PreCmdFailed { name: String, status: std::process::ExitStatus },
    #[error("failed to create log file for '{name}': {source}")]
    LogFile {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start '{cmd}': {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("pid of '{name}' is zero")]
    ZeroPid { name: String },
    #[error("'{cmd}' is not an executable file")]
    NotExecutable { cmd: String },
}

pub struct LaunchOutcome {
    pub pid: u32,
    pub log_path: String,
}

/// Launches a deployment's command in its own process group, redirecting
/// stdout/stderr to a rolling `<name>-<n>.log` file (or leaving them attached
/// to the daemon's own stdout when `logdir == "stdout"`), per
/// `launchProcess`/`launchProcessWithOut`.
pub async fn launch(spec: &DeploymentSpec) -> Result<LaunchOutcome, ProcessError> {
    if let Some(pre_cmd) = spec.pre_cmd.as_deref().filter(|c| !c.is_empty()) {
        run_pre_cmd(&spec.name, pre_cmd, spec.workdir.as_deref()).await?;
    }

    check_executable(&spec.cmd, spec.workdir.as_deref())?;

    let logdir = spec.logdir.as_deref().unwrap_or("/tmp");
    if logdir == "stdout" {
        let pid = spawn(spec, None).await?;
        return Ok(LaunchOutcome {
            pid,
            log_path: "stdout".to_string(),
        });
    }

    let counter = log_counter(&spec.name, logdir);
    let log_name = format!("{}-{}.log", spec.name, counter + 1);
    let log_path = format!("{logdir}/{log_name}");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&log_path)
        .map_err(|source| ProcessError::LogFile {
            name: spec.name.clone(),
            source,
        })?;
    let pid = spawn(spec, Some(file)).await?;
    Ok(LaunchOutcome { pid, log_path })
}

/// Verifies the first token of `cmd` resolves to an executable file, either
/// on `PATH` or as a file relative to `workdir`, per the launch contract's
/// step 2.
fn check_executable(cmd: &str, workdir: Option<&str>) -> Result<(), ProcessError> {
    use std::os::unix::fs::PermissionsExt;

    let Some(token) = cmd.split_whitespace().next() else {
        return Err(ProcessError::NotExecutable { cmd: cmd.to_string() });
    };

    let is_executable_file = |path: &Path| -> bool {
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    };

    if token.contains('/') {
        let resolved = match workdir {
            Some(dir) => Path::new(dir).join(token),
            None => PathBuf::from(token),
        };
        if is_executable_file(&resolved) {
            return Ok(());
        }
        return Err(ProcessError::NotExecutable { cmd: token.to_string() });
    }

    let dirs = workdir.map(PathBuf::from).into_iter().chain(
        std::env::var_os("PATH")
            .into_iter()
            .flat_map(|paths| std::env::split_paths(&paths).collect::<Vec<_>>()),
    );
    for dir in dirs {
        if is_executable_file(&dir.join(token)) {
            return Ok(());
        }
    }
    Err(ProcessError::NotExecutable { cmd: token.to_string() })
}

async fn run_pre_cmd(name: &str, pre_cmd: &str, workdir: Option<&str>) -> Result<(), ProcessError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(pre_cmd);
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }
    let status = cmd.status().await.map_err(|source| ProcessError::PreCmd {
        name: name.to_string(),
        source,
    })?;
    if !status.success() {
        return Err(ProcessError::PreCmdFailed {
            name: name.to_string(),
            status,
        });
    }
    Ok(())
}

/// Builds `NAME='value' NAME2='value2' cmd` the way `launchProcessWithOut`
/// does, so the target command can be an arbitrary shell pipeline and still
/// see its env vars, and spawns it detached in its own process group.
async fn spawn(spec: &DeploymentSpec, log_file: Option<std::fs::File>) -> Result<u32, ProcessError> {
    let env_prefix = render_env_prefix(&spec.env);
    let full_cmd = if env_prefix.is_empty() {
        spec.cmd.clone()
    } else {
        format!("{env_prefix} {}", spec.cmd)
    };

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&full_cmd);
    if let Some(dir) = spec.workdir.as_deref() {
        cmd.current_dir(dir);
    }
    match log_file {
        Some(file) => {
            let file2 = file.try_clone().map_err(|source| ProcessError::LogFile {
                name: spec.name.clone(),
                source,
            })?;
            cmd.stdout(Stdio::from(file)).stderr(Stdio::from(file2));
        }
        None => {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }
    }
    cmd.stdin(Stdio::null());

    let mut child = cmd.group_spawn().map_err(|source| ProcessError::Spawn {
        cmd: spec.cmd.clone(),
        source,
    })?;
    let pid = child
        .inner()
        .id()
        .ok_or_else(|| ProcessError::ZeroPid {
            name: spec.name.clone(),
        })?;
    if pid == 0 {
        return Err(ProcessError::ZeroPid {
            name: spec.name.clone(),
        });
    }

    // The supervisor tracks liveness by polling, not by waiting on the
    // child (there is no long-lived handle to it once this fn returns), so
    // reap it in the background to avoid leaving a zombie behind.
    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    Ok(pid)
}

fn render_env_prefix(env: &[yetis_common::EnvVar]) -> String {
    env.iter()
        .map(|v| format!("{}='{}'", v.name, v.value.replace('\'', r#"'\''"#)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_counter(name: &str, logdir: &str) -> i64 {
    let entries = match std::fs::read_dir(Path::new(logdir)) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(logdir, error = %e, "couldn't read logdir");
            return -1;
        }
    };
    let prefix = format!("{name}-");
    let mut highest = -1i64;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(rest) = file_name
            .strip_prefix(prefix.as_str())
            .and_then(|r| r.strip_suffix(".log"))
        {
            if let Ok(n) = rest.parse::<i64>() {
                highest = highest.max(n);
            }
        }
    }
    highest
}

#[cfg(test)]
mod tests {
    use super::*;
    use yetis_common::EnvVar;

    #[test]
    fn render_env_prefix_escapes_single_quotes() {
        let env = vec![EnvVar {
            name: "GREETING".into(),
            value: "it's fine".into(),
        }];
        assert_eq!(render_env_prefix(&env), r#"GREETING='it'\''s fine'"#);
    }

    #[test]
    fn log_counter_finds_highest_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello-1.log"), "").unwrap();
        std::fs::write(dir.path().join("hello-3.log"), "").unwrap();
        std::fs::write(dir.path().join("other-9.log"), "").unwrap();
        assert_eq!(log_counter("hello", dir.path().to_str().unwrap()), 3);
    }

    #[test]
    fn log_counter_is_negative_one_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(log_counter("hello", dir.path().to_str().unwrap()), -1);
    }

    #[tokio::test]
    async fn launch_runs_command_and_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let spec = DeploymentSpec {
            name: "echoer".into(),
            cmd: "echo hi".into(),
            pre_cmd: None,
            workdir: None,
            logdir: Some(dir.path().to_str().unwrap().to_string()),
            liveness: Default::default(),
            env: vec![],
            strategy: Default::default(),
            proxy: None,
        };
        let outcome = launch(&spec).await.unwrap();
        assert!(outcome.pid > 0);
        assert_eq!(outcome.log_path, format!("{}/echoer-1.log", dir.path().to_str().unwrap()));
    }

    #[tokio::test]
    async fn launch_rejects_bogus_command_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let spec = DeploymentSpec {
            name: "bogus".into(),
            cmd: "totally-bogus-binary-xyz arg".into(),
            pre_cmd: None,
            workdir: None,
            logdir: Some(dir.path().to_str().unwrap().to_string()),
            liveness: Default::default(),
            env: vec![],
            strategy: Default::default(),
            proxy: None,
        };
        let err = launch(&spec).await.unwrap_err();
        assert!(matches!(err, ProcessError::NotExecutable { .. }));
    }
}
