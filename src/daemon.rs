//! Process supervision helpers: PID files, signal-driven shutdown and the
//! stop path used by the CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::{info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::sync::watch;

/// PID file location for one supervised target.
#[must_use]
pub fn pid_file_path(dir: &Path, target: &str) -> PathBuf {
    dir.join(format!("{target}.pid"))
}

/// Record our PID. Refuses to clobber a live instance.
pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(existing) = read_pid(path) {
        if kill(Pid::from_raw(existing), None).is_ok() {
            bail!("already running with pid {existing} ({})", path.display());
        }
        warn!("removing stale pid file {}", path.display());
    }
    std::fs::write(path, format!("{}\n", std::process::id()))
        .with_context(|| format!("failed to write pid file {}", path.display()))
}

pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("failed to remove pid file {}: {e}", path.display());
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    std::fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()
}

/// Send SIGTERM to the instance recorded in `path`. The running process
/// removes its own PID file on the way out.
pub fn stop_target(path: &Path) -> Result<()> {
    let Some(pid) = read_pid(path) else {
        bail!("no pid file at {}; nothing to stop", path.display());
    };
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("failed to signal pid {pid}"))?;
    info!("sent SIGTERM to pid {pid}");
    Ok(())
}

/// A cooperative shutdown flag plus the task flipping it on SIGINT or
/// SIGTERM.
pub fn shutdown_flag() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    let trigger = tx.clone();
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(s) => s,
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        let _ = trigger.send(true);
    });
    (tx, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pid_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = pid_file_path(dir.path(), "scheduler");
        write_pid_file(&path).unwrap();

        // Our own PID is alive, so a second write refuses.
        assert!(write_pid_file(&path).is_err());

        remove_pid_file(&path);
        assert!(!path.exists());
    }

    #[test]
    fn stale_pid_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = pid_file_path(dir.path(), "spider");
        // PID values above the kernel default pid_max are never live.
        std::fs::write(&path, "99999999\n").unwrap();
        write_pid_file(&path).unwrap();

        let recorded = std::fs::read_to_string(&path).unwrap();
        assert_eq!(recorded.trim(), std::process::id().to_string());
    }

    #[test]
    fn stop_without_pid_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = pid_file_path(dir.path(), "seeder");
        assert!(stop_target(&path).is_err());
    }
}
