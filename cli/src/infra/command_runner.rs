//! Process execution with an idle-output timeout.
//!
//! The child runs in its own session with stdin on `/dev/null`; stdout and
//! stderr are read line-wise and streamed into the caller's sink. When no
//! output arrives within the budget the child is sent SIGTERM (then killed
//! if it lingers). The outcome carries the conventional wait-status
//! encoding: exit code in the high byte, signal in the low seven bits.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::application::ports::{CommandOutcome, CommandRunner, CommandSpec, UidSpec};
use crate::domain::error::{EngineError, EngineResult};

/// Grace period between SIGTERM and SIGKILL for a timed-out child.
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Production `CommandRunner` using tokio process handling.
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        sink: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> EngineResult<CommandOutcome> {
        let mut cmd = Command::new(&spec.argv[0]);
        cmd.args(&spec.argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(uid) = &spec.uid {
            cmd.uid(resolve_uid(uid)?);
        }
        if spec.new_session {
            // Detach from the controlling terminal.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::local(&spec.argv[0], e))?;

        let mut stdout = child.stdout.take().map(|h| BufReader::new(h).lines());
        let mut stderr = child.stderr.take().map(|h| BufReader::new(h).lines());
        let mut wrote_output = false;
        let mut timed_out = false;

        let idle = tokio::time::sleep(spec.timeout);
        tokio::pin!(idle);

        while stdout.is_some() || stderr.is_some() {
            tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => {
                    match line {
                        Some(text) => {
                            wrote_output = true;
                            sink(&text);
                            idle.as_mut().reset(Instant::now() + spec.timeout);
                        }
                        None => stdout = None,
                    }
                }
                line = next_line(&mut stderr), if stderr.is_some() => {
                    match line {
                        Some(text) => {
                            wrote_output = true;
                            sink(&text);
                            idle.as_mut().reset(Instant::now() + spec.timeout);
                        }
                        None => stderr = None,
                    }
                }
                () = &mut idle => {
                    timed_out = true;
                    send_sigterm(&child);
                    break;
                }
            }
        }

        let status = if timed_out {
            match tokio::time::timeout(TERM_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            }
        } else {
            child.wait().await
        }
        .map_err(|e| EngineError::local(&spec.argv[0], e))?;

        let code = status.code().unwrap_or(0);
        let signal = status.signal().unwrap_or(0);
        Ok(CommandOutcome {
            wait_status: (code << 8) | (signal & 0x7f),
            timed_out,
            wrote_output,
        })
    }
}

async fn next_line<R>(lines: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(reader) => reader.next_line().await.ok().flatten(),
        None => None,
    }
}

fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

fn resolve_uid(uid: &UidSpec) -> EngineResult<u32> {
    match uid {
        UidSpec::Id(id) => Ok(*id),
        UidSpec::Name(name) => {
            let user = nix::unistd::User::from_name(name)
                .map_err(|e| EngineError::Config(format!("cannot look up user {name}: {e}")))?
                .ok_or_else(|| EngineError::Config(format!("unknown user {name}")))?;
            Ok(user.uid.as_raw())
        }
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn spec(argv: &[&str], timeout: Duration) -> CommandSpec {
        CommandSpec {
            argv: argv.iter().map(|s| (*s).to_string()).collect(),
            timeout,
            uid: None,
            new_session: false,
        }
    }

    #[tokio::test]
    async fn test_output_is_streamed_and_status_encoded() {
        let runner = TokioCommandRunner;
        let mut lines = Vec::new();
        let outcome = runner
            .run(
                &spec(&["sh", "-c", "echo out; echo err >&2; exit 3"], Duration::from_secs(10)),
                &mut |line| lines.push(line.to_string()),
            )
            .await
            .expect("run");
        assert!(lines.contains(&"out".to_string()));
        assert!(lines.contains(&"err".to_string()));
        assert!(outcome.wrote_output);
        assert_eq!(outcome.exit_code(), 3);
        assert_eq!(outcome.signal(), 0);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_silent_child_is_killed_after_timeout() {
        let runner = TokioCommandRunner;
        let started = std::time::Instant::now();
        let outcome = runner
            .run(&spec(&["sleep", "30"], Duration::from_millis(200)), &mut |_| {})
            .await
            .expect("run");
        assert!(outcome.timed_out);
        assert!(!outcome.wrote_output);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_local_file_error() {
        let runner = TokioCommandRunner;
        let err = runner
            .run(
                &spec(&["/does/not/exist-rollout"], Duration::from_secs(1)),
                &mut |_| {},
            )
            .await
            .expect_err("spawn failure");
        assert!(matches!(err, EngineError::LocalFile { .. }));
    }
}
