//! Process-group liveness checks and signalling.
//!
//! Quantization children are spawned as process-group leaders so that one
//! signal reaches the whole subprocess tree, including the CUDA worker
//! processes native ML frameworks fork. A vanished group is never an error
//! here: signalling something that already exited is a no-op.

use crate::error::{QuantError, Result};
use tracing::{debug, warn};

/// Check if a process with the given PID is alive.
///
/// # Platform Behavior
/// - **Linux/macOS**: `kill(pid, 0)` signal check
/// - **Windows**: `OpenProcess` with `PROCESS_QUERY_LIMITED_INFORMATION`
pub fn is_process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0 delivers nothing, it only checks existence.
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        // SAFETY: OpenProcess/CloseHandle are plain handle-based win32 calls;
        // the handle is closed immediately after the query.
        #[allow(unsafe_code)]
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if !handle.is_null() {
                CloseHandle(handle);
                true
            } else {
                false
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        warn!("Process alive check not implemented for this platform");
        true
    }
}

/// Check if any process in the group led by `pgid` is still alive.
#[cfg(unix)]
pub fn group_alive(pgid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // kill(-pgid, 0) probes the whole group.
    kill(Pid::from_raw(-(pgid as i32)), None).is_ok()
}

#[cfg(not(unix))]
pub fn group_alive(pgid: u32) -> bool {
    // Windows has no unix-style process groups; fall back to the leader.
    is_process_alive(pgid)
}

/// Send the graceful-termination signal to the whole process group.
///
/// A group that no longer exists is swallowed, not an error.
pub fn signal_group_term(pgid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGTERM to process group {}", pgid);
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => {
                debug!("Process group {} already gone", pgid);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to send SIGTERM to group {}: {}", pgid, e);
                Ok(())
            }
        }
    }

    #[cfg(windows)]
    {
        // No graceful group signal on Windows; the forceful path handles the
        // tree via taskkill /T. Nothing to do here.
        let _ = pgid;
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = pgid;
        Err(QuantError::Other(
            "Process termination not implemented for this platform".into(),
        ))
    }
}

/// Send the forceful-kill signal to the whole process group.
///
/// Unlike the graceful path, a delivery failure for a still-alive group is
/// surfaced: it means a user-initiated cancellation could not be honored.
pub fn signal_group_kill(pgid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        debug!("Sending SIGKILL to process group {}", pgid);
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(QuantError::KillFailed {
                pgid,
                message: e.to_string(),
            }),
        }
    }

    #[cfg(windows)]
    {
        use std::process::Command;

        // taskkill /T kills the tree rooted at the leader.
        let output = Command::new("taskkill")
            .args(["/PID", &pgid.to_string(), "/F", "/T"])
            .output()
            .map_err(|e| QuantError::KillFailed {
                pgid,
                message: format!("Failed to run taskkill: {}", e),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // "not found" means the tree already exited.
            if stderr.contains("not found") || stderr.contains("not running") {
                Ok(())
            } else {
                Err(QuantError::KillFailed {
                    pgid,
                    message: stderr.into_owned(),
                })
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(QuantError::KillFailed {
            pgid,
            message: "not implemented for this platform".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_process_alive_self() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!is_process_alive(2_000_000_000));
    }

    #[test]
    fn test_signal_nonexistent_group_is_noop() {
        // Signalling a long-gone group must not error.
        assert!(signal_group_term(2_000_000_000).is_ok());
        assert!(signal_group_kill(2_000_000_000).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_group_alive_nonexistent() {
        assert!(!group_alive(2_000_000_000));
    }
}
