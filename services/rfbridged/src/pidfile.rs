//! PID file handling and sibling-process detection.
//!
//! Startup refuses to run twice: the PID file is probed with a null signal,
//! and the diagnostic tools that own the radio exclusively
//! (`rfbridge-raw`, `rfbridge-learn`, `rfbridge-debug`) must not be live.

use std::io;
use std::path::Path;
use tracing::debug;

/// Tools that take exclusive hold of the radio hardware.
pub const SIBLING_TOOLS: [&str; 3] = ["rfbridge-raw", "rfbridge-learn", "rfbridge-debug"];

/// The daemon pid recorded in `path`, if that process is still alive.
pub fn read_running_pid(path: &Path) -> Option<i32> {
    let text = std::fs::read_to_string(path).ok()?;
    let pid: i32 = text.trim().parse().ok()?;
    if pid <= 0 {
        return None;
    }
    pid_alive(pid).then_some(pid)
}

pub fn write_pid(path: &Path) -> io::Result<()> {
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())
}

pub fn remove_pid(path: &Path) {
    if path.exists() {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed stale pid file"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "could not remove pid file"),
        }
    }
}

/// First live sibling diagnostic tool, by process name.
pub fn find_sibling() -> Option<(String, i32)> {
    let own_pid = std::process::id() as i32;
    let proc_dir = std::fs::read_dir("/proc").ok()?;
    for entry in proc_dir.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<i32>() else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        let comm = comm.trim();
        if SIBLING_TOOLS.contains(&comm) {
            return Some((comm.to_string(), pid));
        }
    }
    None
}

/// Null-signal liveness probe; a permission error still means "alive".
fn pid_alive(pid: i32) -> bool {
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn own_pid_reads_as_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfbridged.pid");
        write_pid(&path).unwrap();
        assert_eq!(read_running_pid(&path), Some(std::process::id() as i32));
        remove_pid(&path);
        assert!(read_running_pid(&path).is_none());
    }

    #[test]
    fn dead_pid_reads_as_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfbridged.pid");
        // PID beyond any default pid_max.
        std::fs::write(&path, "199999999").unwrap();
        assert!(read_running_pid(&path).is_none());
    }

    #[test]
    fn missing_file_reads_as_not_running() {
        assert!(read_running_pid(&PathBuf::from("/nonexistent/rfbridged.pid")).is_none());
    }
}
