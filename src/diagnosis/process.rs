use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};

/// How long a signalled process group gets before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Start the child as leader of its own process group so the whole tree can be signalled.
#[cfg(unix)]
pub(super) fn isolate_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
pub(super) fn isolate_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    if let Some(pid) = pid {
        // Negative pid addresses the process group led by the child.
        unsafe {
            libc::kill(-(pid as libc::pid_t), signal);
        }
    }
}

/// Stop the child and everything it spawned: SIGTERM to the group, then SIGKILL.
#[cfg(unix)]
pub(super) async fn terminate(child: &mut Child) -> Option<ExitStatus> {
    // Reaping the leader clears `child.id()`, so hold on to the group id.
    let pid = child.id();
    signal_group(pid, libc::SIGTERM);
    if let Ok(status) = tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        // The leader is gone but stragglers in its group may not be.
        signal_group(pid, libc::SIGKILL);
        return status.ok();
    }

    tracing::warn!(pid = ?pid, "Diagnosis script ignored SIGTERM, killing process group");
    signal_group(pid, libc::SIGKILL);
    let _ = child.start_kill();
    tokio::time::timeout(TERMINATE_GRACE, child.wait())
        .await
        .ok()
        .and_then(|status| status.ok())
}

#[cfg(not(unix))]
pub(super) async fn terminate(child: &mut Child) -> Option<ExitStatus> {
    let _ = child.start_kill();
    tokio::time::timeout(TERMINATE_GRACE, child.wait())
        .await
        .ok()
        .and_then(|status| status.ok())
}
