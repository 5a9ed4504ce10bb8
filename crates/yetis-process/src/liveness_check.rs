/// Checks whether `pid` is alive via `ps`, the way `IsProcessAlive` does,
/// skipping defunct (zombie) processes so a reaped-but-not-yet-cleared
/// entry doesn't read as "still running".
pub fn is_alive(pid: u32) -> bool {
    let output = match std::process::Command::new("ps")
        .args(["-o", "pid=", "-o", "command=", "-p", &pid.to_string()])
        .output()
    {
        Ok(output) => output,
        Err(_) => return false,
    };
    if !output.status.success() {
        return false;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    !trimmed.ends_with("<defunct>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_not_alive() {
        assert!(!is_alive(0));
    }
}
