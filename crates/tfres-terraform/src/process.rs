use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::TerraformError;

// ── Process-group supervision ─────────────────────────────────────────────────

static GROUPS: Mutex<BTreeSet<i32>> = Mutex::new(BTreeSet::new());

fn register(pgid: i32) {
    GROUPS.lock().unwrap_or_else(|e| e.into_inner()).insert(pgid);
}

fn unregister(pgid: i32) {
    GROUPS.lock().unwrap_or_else(|e| e.into_inner()).remove(&pgid);
}

/// Kill every registered process group with SIGKILL.
pub fn kill_all_groups() {
    let groups = GROUPS.lock().unwrap_or_else(|e| e.into_inner()).clone();
    for pgid in groups {
        kill_group(pgid);
        warn!(pgid, "killed process group");
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    // SAFETY: killpg only sends a signal; an unknown group yields ESRCH.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}

/// Run `request` until it completes or SIGINT/SIGTERM arrives.
///
/// On a signal every registered child process group is killed, then the
/// request future is dropped so the scratch directories and agents it owns
/// are released. `None` is returned; the caller exits non-zero.
pub async fn supervise<F: Future>(request: F) -> Option<F::Output> {
    cancel_on(request, wait_for_termination(), kill_all_groups).await
}

async fn cancel_on<F: Future>(
    request: F,
    cancel: impl Future<Output = ()>,
    on_cancel: impl FnOnce(),
) -> Option<F::Output> {
    let mut request = Box::pin(request);
    tokio::select! {
        output = &mut request => return Some(output),
        _ = cancel => {}
    }
    warn!("received termination signal, killing child processes");
    on_cancel();
    drop(request);
    None
}

/// Process groups currently registered for killing on termination.
pub fn registered_groups() -> Vec<i32> {
    GROUPS.lock().unwrap_or_else(|e| e.into_inner()).iter().copied().collect()
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut int, mut term) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to install signal handlers");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = int.recv() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Registers a child's process group for the lifetime of the guard. The
/// child must have been spawned with `process_group(0)`.
#[derive(Debug)]
pub struct GroupGuard(Option<i32>);

impl GroupGuard {
    pub fn new(pid: Option<u32>) -> Self {
        let pgid = pid.and_then(|p| i32::try_from(p).ok());
        if let Some(pgid) = pgid {
            register(pgid);
        }
        GroupGuard(pgid)
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.0 {
            unregister(pgid);
        }
    }
}

// ── Execution ─────────────────────────────────────────────────────────────────

/// Whether child output is mirrored into the log as it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    Log,
    Quiet,
}

/// Output of a finished child.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    /// stdout and stderr interleaved in arrival order.
    pub combined: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

enum Line {
    Out(String),
    Err(String),
}

/// Prepare a command in its own process group with a scrubbed environment:
/// only `PATH` and `env` are passed through.
pub fn command(program: &Path, cwd: &Path, env: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(cwd)
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }
    cmd.envs(env);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Run `cmd` to completion, capturing both streams. The exit status is
/// returned as-is; callers decide what a non-zero code means.
pub async fn run(mut cmd: Command, label: &str, echo: Echo) -> Result<Captured, TerraformError> {
    debug!(command = label, "spawning");
    let mut child = cmd.spawn().map_err(|e| TerraformError::Spawn {
        program: label.to_string(),
        source: e,
    })?;
    let _group = GroupGuard::new(child.id());

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Line>();

    let tx1 = tx.clone();
    let stdout_task = tokio::spawn(async move {
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx1.send(Line::Out(line));
            }
        }
    });

    let tx2 = tx.clone();
    let stderr_task = tokio::spawn(async move {
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx2.send(Line::Err(line));
            }
        }
    });

    drop(tx);

    let mut captured = Captured::default();
    while let Some(line) = rx.recv().await {
        let (text, buf) = match line {
            Line::Out(text) => (text, &mut captured.stdout),
            Line::Err(text) => (text, &mut captured.stderr),
        };
        if echo == Echo::Log {
            info!(target: "terraform", "{}", text);
        }
        buf.push_str(&text);
        buf.push('\n');
        captured.combined.push_str(&text);
        captured.combined.push('\n');
    }

    stdout_task.await.ok();
    stderr_task.await.ok();

    let status = child.wait().await.map_err(|e| TerraformError::Spawn {
        program: label.to_string(),
        source: e,
    })?;
    captured.code = status.code().unwrap_or(-1);
    if !captured.success() {
        warn!(command = label, code = captured.code, "command exited non-zero");
    }
    Ok(captured)
}
