//! Command implementations, grounded on `client/commands.go`: `Info`,
//! `GetDeployments`/`WatchGetDeployments`, `DescribeDeployment`, `Apply`,
//! `Logs`, `Restart`, `DeleteDeployment`, `ShutdownServer`, `StartBackground`.

use std::io::{Read, Seek, SeekFrom};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use yetis_common::config::ServerConfig;
use yetis_common::{read_apply_file, ApplyDocument};

use crate::client::{Client, YETIS_SERVER_PORT};
use crate::dto::{DeploymentDetail, DeploymentListItem, InfoResponse, PostResponse, ServiceView};

fn yetisd_path() -> PathBuf {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("yetis"));
    let dir = exe.parent().map(PathBuf::from).unwrap_or_default();
    dir.join("yetisd")
}

/// Execs `yetisd` in place of the current process, the way `server.Start()`
/// runs the daemon in-process in the Go original.
pub fn run(file: Option<String>) -> anyhow::Result<()> {
    let mut cmd = std::process::Command::new(yetisd_path());
    if let Some(path) = &file {
        cmd.env("YETIS_CONFIG", path);
    }
    let err = cmd.exec();
    anyhow::bail!("failed to exec yetisd: {err}")
}

/// Spawns `yetisd` detached from the terminal and polls for its port to
/// open, mirroring `StartBackground`'s nohup + `IsPortOpenRetry` pattern.
pub async fn start(file: Option<String>) -> anyhow::Result<()> {
    if !yetisd_path().exists() {
        println!("yetisd is not installed next to this binary");
        return Ok(());
    }

    let config = match &file {
        Some(path) => ServerConfig::read(path)?,
        None => ServerConfig::default(),
    };
    let log_path = PathBuf::from(&config.logdir).join("yetis.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    let mut cmd = std::process::Command::new(yetisd_path());
    if let Some(path) = &file {
        cmd.env("YETIS_CONFIG", path);
    }
    match log_file {
        Ok(file) => {
            cmd.stdout(Stdio::from(file.try_clone()?));
            cmd.stderr(Stdio::from(file));
        }
        Err(e) => {
            println!("failed to open log file at {}: {e}", log_path.display());
        }
    }
    cmd.spawn()?;

    tokio::time::sleep(Duration::from_millis(15)).await;
    let opened = yetis_netutil::wait_open(
        YETIS_SERVER_PORT,
        Duration::from_millis(200),
        Duration::from_millis(10),
    )
    .await;
    if !opened {
        println!(
            "yetis hasn't started, check the log at {}",
            log_path.display()
        );
        return Ok(());
    }
    println!("yetis started successfully");
    Ok(())
}

/// SIGTERM, then escalate to SIGINT + SIGKILL after `timeout` if the daemon
/// hasn't exited, exactly the sequence `ShutdownServer` uses.
pub async fn shutdown(seconds: Option<u64>) -> anyhow::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = match pid_by_port(YETIS_SERVER_PORT) {
        Ok(pid) => pid,
        Err(e) => {
            println!("couldn't get yetis pid: {e}");
            return Ok(());
        }
    };
    let nix_pid = Pid::from_raw(pid);
    if let Err(e) = kill(nix_pid, Signal::SIGTERM) {
        println!("failed to terminate {pid} server: {e}");
    }

    let timeout = Duration::from_secs(seconds.unwrap_or(5));
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if !yetis_netutil::probe(YETIS_SERVER_PORT, Duration::from_millis(100)).await {
            println!("yetis server stopped.");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    if let Err(e) = kill(nix_pid, Signal::SIGINT) {
        println!("failed to terminate {pid} server rapidly: {e}");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Err(e) = kill(nix_pid, Signal::SIGKILL) {
        println!("failed to kill {pid} server rapidly: {e}");
    }

    if yetis_netutil::wait_open(
        YETIS_SERVER_PORT,
        Duration::from_millis(600),
        Duration::from_millis(30),
    )
    .await
    {
        println!("failed to kill yetis server");
    } else {
        println!("yetis server killed.");
    }
    Ok(())
}

fn pid_by_port(port: u16) -> anyhow::Result<i32> {
    let output = std::process::Command::new("lsof")
        .args(["-i", &format!(":{port}"), "-sTCP:LISTEN", "-t"])
        .output()?;
    if !output.status.success() || output.stdout.is_empty() {
        anyhow::bail!("port {port} is closed");
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| anyhow::anyhow!("port {port} is closed"))
}

pub async fn info(client: &Client) -> anyhow::Result<()> {
    let info: InfoResponse = client.get("/info").await?;
    println!(
        "server: version={}, deployments={}, services={}",
        info.version, info.deployments_count, info.services_count
    );
    Ok(())
}

/// Returns the number of printed lines so a watch loop can move the cursor
/// back up, the way `printDeploymentTable` reports its line count to `watch`.
async fn print_deployment_table(client: &Client) -> anyhow::Result<usize> {
    let items: Vec<DeploymentListItem> = client.get("/deployments").await?;
    println!("NAME\tSTATUS\tPID\tRESTARTS\tAGE\tCOMMAND\tPORT");
    for d in &items {
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            d.name, d.status, d.pid, d.restarts, d.age, d.command, d.port_info
        );
    }
    Ok(items.len() + 1)
}

async fn print_service_table(client: &Client) -> anyhow::Result<usize> {
    let items: Vec<ServiceView> = client.get("/services").await?;
    println!("NAME\tPORT\tSELECTOR\tTARGET\tSTATUS");
    for s in &items {
        let target = s
            .deployment_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}\t{}\t{}\t{}\t{}",
            s.name, s.port, s.selector_name, target, s.status
        );
    }
    Ok(items.len() + 1)
}

const UP_LINE: &str = "\x1b[A";

pub async fn get(client: &Client, watch: bool, kind: Option<String>) -> anyhow::Result<()> {
    let print_once = || async {
        let deployments = kind.as_deref() != Some("service") && kind.as_deref() != Some("services");
        let services = kind.as_deref() == Some("service") || kind.as_deref() == Some("services");
        let mut lines = 0;
        if deployments {
            lines += print_deployment_table(client).await?;
        }
        if services {
            lines += print_service_table(client).await?;
        }
        anyhow::Ok(lines)
    };

    if !watch {
        print_once().await?;
        return Ok(());
    }

    let mut return_to_start = String::new();
    loop {
        print!("{return_to_start}");
        let lines = print_once().await?;
        return_to_start = UP_LINE.repeat(lines) + "\r";
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

pub async fn describe(client: &Client, kind: &str, name: &str) -> anyhow::Result<()> {
    match normalize_kind(kind) {
        "service" => {
            let s: ServiceView = client.get(&format!("/services/{name}")).await?;
            println!("Name: {}", s.name);
            println!("Port: {}", s.port);
            println!("Selector: {}", s.selector_name);
            println!("Status: {}", s.status);
        }
        _ => {
            let d: DeploymentDetail = client.get(&format!("/deployments/{name}")).await?;
            println!("PID: {}", d.pid);
            println!("Restarts: {}", d.restarts);
            println!("Status: {}", d.status);
            println!("Age: {}", d.age);
            println!("Log Path: {}", d.log_path);
            println!("{}", serde_yaml::to_string(&d.spec)?);
        }
    }
    Ok(())
}

pub async fn delete(client: &Client, kind: &str, name: &str) -> anyhow::Result<()> {
    match normalize_kind(kind) {
        "service" => {
            client.delete(&format!("/services/{name}")).await?;
            println!("successfully deleted '{name}' service");
        }
        _ => {
            client.delete(&format!("/deployments/{name}")).await?;
            println!("successfully deleted '{name}' deployment");
        }
    }
    Ok(())
}

fn normalize_kind(kind: &str) -> &'static str {
    match kind.to_ascii_lowercase().trim_end_matches('s') {
        "service" => "service",
        _ => "deployment",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_kind_accepts_singular_plural_and_case() {
        assert_eq!(normalize_kind("deployment"), "deployment");
        assert_eq!(normalize_kind("Deployments"), "deployment");
        assert_eq!(normalize_kind("service"), "service");
        assert_eq!(normalize_kind("SERVICES"), "service");
        assert_eq!(normalize_kind("bogus"), "deployment");
    }
}

pub async fn apply(client: &Client, path: &str) -> anyhow::Result<()> {
    let docs = read_apply_file(path)?;
    for doc in docs {
        match doc {
            ApplyDocument::Deployment(spec) => {
                let name = spec.name.clone();
                match client.post::<_, PostResponse>("/deployments", &spec).await {
                    Ok(_) => println!("successfully applied {name} deployment"),
                    Err(e) => println!("failure applying {name} deployment: {e}"),
                }
            }
            ApplyDocument::Service(spec) => {
                let name = spec.selector.name.clone();
                match client.post::<_, PostResponse>("/services", &spec).await {
                    Ok(_) => println!("successfully applied {name} service"),
                    Err(e) => println!("failure applying {name} service: {e}"),
                }
            }
        }
    }
    Ok(())
}

pub async fn logs(client: &Client, name: &str, follow: bool) -> anyhow::Result<()> {
    let detail: DeploymentDetail = client.get(&format!("/deployments/{name}")).await?;
    cat(&detail.log_path, follow).await
}

/// Prints a file's contents, then (if `follow`) polls for appended bytes
/// every 500ms, grounded on `common/unix/fs.go:Cat`'s tail behavior.
async fn cat(path: &str, follow: bool) -> anyhow::Result<()> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    print!("{buf}");
    if !follow {
        return Ok(());
    }
    let mut offset = buf.len() as u64;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > offset {
            file.seek(SeekFrom::Start(offset))?;
            let mut chunk = String::new();
            file.read_to_string(&mut chunk)?;
            print!("{chunk}");
            offset = metadata.len();
        }
    }
}

pub async fn restart(client: &Client, name: &str) -> anyhow::Result<()> {
    println!("restarting deployment...");
    match client.put(&format!("/deployments/{name}/restart"), &()).await {
        Ok(()) => println!("successfully restarted '{name}' deployment"),
        Err(e) => println!("{e}"),
    }
    Ok(())
}
