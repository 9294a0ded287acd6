use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tfres_terraform::GroupGuard;
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::EngineError;

const SOCKET_NAME: &str = "ssh-agent.sock";
const KEY_NAME: &str = "ssh-agent.key";
const SOCKET_POLLS: u32 = 50;
const SOCKET_POLL_DELAY: Duration = Duration::from_millis(100);

/// An `ssh-agent` holding one private key, listening on a socket inside the
/// request's scratch directory. The agent runs in its own process group,
/// registered for termination, and is killed when this value drops.
#[derive(Debug)]
pub struct SshAgent {
    child: Child,
    socket: PathBuf,
    _group: GroupGuard,
}

impl SshAgent {
    pub async fn start(dir: &Path, private_key: &str) -> Result<SshAgent, EngineError> {
        Self::start_with(&["ssh-agent"], &["ssh-add"], dir, private_key).await
    }

    /// `agent` and `add` are a program followed by its leading arguments.
    pub async fn start_with(
        agent: &[&str],
        add: &[&str],
        dir: &Path,
        private_key: &str,
    ) -> Result<SshAgent, EngineError> {
        let agent_program = agent.first().copied().unwrap_or_default();
        let add_program = add.first().copied().unwrap_or_default();
        let socket = dir.join(SOCKET_NAME);
        let mut cmd = command(agent);
        cmd.arg("-D")
            .arg("-a")
            .arg(&socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        let child = cmd
            .spawn()
            .map_err(|e| EngineError::Agent(format!("failed to start {}: {}", agent_program, e)))?;
        let group = GroupGuard::new(child.id());
        let agent = SshAgent { child, socket, _group: group };
        agent.wait_for_socket().await?;

        let key_file = dir.join(KEY_NAME);
        write_private(&key_file, private_key)?;
        let added = command(add)
            .arg(&key_file)
            .env("SSH_AUTH_SOCK", &agent.socket)
            .stdin(Stdio::null())
            .output()
            .await;
        let _ = std::fs::remove_file(&key_file);

        let added = added.map_err(|e| EngineError::Agent(format!("failed to run {}: {}", add_program, e)))?;
        if !added.status.success() {
            return Err(EngineError::Agent(format!(
                "{} failed: {}",
                add_program,
                String::from_utf8_lossy(&added.stderr).trim()
            )));
        }
        info!(socket = %agent.socket.display(), "ssh agent started");
        Ok(agent)
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    async fn wait_for_socket(&self) -> Result<(), EngineError> {
        for _ in 0..SOCKET_POLLS {
            if self.socket.exists() {
                return Ok(());
            }
            tokio::time::sleep(SOCKET_POLL_DELAY).await;
        }
        Err(EngineError::Agent(format!(
            "socket {} did not appear",
            self.socket.display()
        )))
    }
}

impl Drop for SshAgent {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
        let _ = std::fs::remove_file(&self.socket);
        debug!(socket = %self.socket.display(), "ssh agent stopped");
    }
}

fn command(argv: &[&str]) -> Command {
    let (program, args) = argv.split_first().map_or(("", &[][..]), |(p, a)| (*p, a));
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd
}

/// Owner-only key file with a trailing newline (ssh-add rejects keys without one).
fn write_private(path: &Path, key: &str) -> Result<(), EngineError> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(|e| EngineError::io(path, e))?;
    let mut body = key.trim_end().to_string();
    body.push('\n');
    file.write_all(body.as_bytes()).map_err(|e| EngineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_agent_binary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SshAgent::start_with(&["/nonexistent/ssh-agent"], &["ssh-add"], dir.path(), "key")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start /nonexistent/ssh-agent"), "{}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn agent_group_is_registered_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("agent.sh");
        std::fs::write(&script, "touch \"$3\"\nexec sleep 30\n").unwrap();
        let script = script.to_str().unwrap().to_string();

        let agent = SshAgent::start_with(
            &["/bin/sh", &script],
            &["/bin/sh", "-c", "exit 0", "ssh-add"],
            dir.path(),
            "key",
        )
        .await
        .unwrap();
        let pgid = agent.child.id().unwrap() as i32;
        assert!(tfres_terraform::registered_groups().contains(&pgid));
        assert!(!dir.path().join(KEY_NAME).exists());

        let socket = agent.socket().to_path_buf();
        drop(agent);
        assert!(!tfres_terraform::registered_groups().contains(&pgid));
        assert!(!socket.exists());
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        write_private(&path, "-----BEGIN KEY-----\nabc\n-----END KEY-----").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(std::fs::read_to_string(&path).unwrap().ends_with("-----END KEY-----\n"));
    }
}
