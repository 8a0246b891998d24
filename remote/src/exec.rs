//! External command execution.
//!
//! Git is driven through the [`CommandExecutor`] seam so publication can be
//! tested without spawning processes. The system implementation enforces a
//! per-command timeout and kills commands that exceed it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Abstraction for running external commands.
pub trait CommandExecutor {
    /// Runs `cmd` with `args`, optionally inside `cwd`, and returns the
    /// captured output.
    ///
    /// # Errors
    ///
    /// Returns any I/O error encountered while spawning or waiting for the
    /// command. A command that exceeds its timeout yields an error of kind
    /// [`io::ErrorKind::TimedOut`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use juno_remote::exec::{CommandExecutor, SystemCommandExecutor};
    ///
    /// let executor = SystemCommandExecutor::new(Duration::from_secs(30));
    /// let output = executor.run("git", &["--version"], None)?;
    /// assert!(output.status.success());
    /// # Ok::<(), std::io::Error>(())
    /// ```
    fn run(&self, cmd: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<Output>;
}

/// Executes commands on the host system with a timeout.
#[derive(Debug, Clone)]
pub struct SystemCommandExecutor {
    timeout: Duration,
    envs: Vec<(String, String)>,
}

impl SystemCommandExecutor {
    /// Creates an executor that kills commands running longer than `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            envs: Vec::new(),
        }
    }

    /// Adds an environment variable to every spawned command.
    #[must_use]
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_owned(), value.to_owned()));
        self
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn run(&self, cmd: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<Output> {
        // Output is spooled to unlinked files so a chatty command never
        // blocks on a full pipe while we wait for it.
        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        let mut command = Command::new(cmd);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(stdout.try_clone()?)
            .stderr(stderr.try_clone()?);
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        // Drop the command so its copies of the output handles close.
        drop(command);

        match child.wait_timeout(self.timeout)? {
            Some(status) => Ok(Output {
                status,
                stdout: read_spooled(&mut stdout)?,
                stderr: read_spooled(&mut stderr)?,
            }),
            None => {
                // Best-effort cleanup; the timeout is the error we report.
                if child.kill().is_err() {
                    log::debug!("{cmd} exited before it could be killed");
                }
                if child.wait().is_err() {
                    log::debug!("failed to reap timed-out {cmd}");
                }
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "{cmd} timed out after {} seconds",
                        self.timeout.as_secs()
                    ),
                ))
            }
        }
    }
}

fn read_spooled(file: &mut File) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Returns the combined stdout and stderr of `output`, trimmed.
#[must_use]
pub fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_owned(),
        (out, "") => out.to_owned(),
        (out, err) => format!("{out}\n{err}"),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_utils::{failure_output, success_output};

    #[test]
    fn runs_command_in_working_directory() {
        let temp = tempfile::tempdir().expect("temp dir");
        let executor = SystemCommandExecutor::new(Duration::from_secs(10));
        let output = executor
            .run("pwd", &[], Some(temp.path()))
            .expect("pwd runs");
        assert!(output.status.success());
        let reported = String::from_utf8_lossy(&output.stdout);
        let expected = temp.path().canonicalize().expect("canonical temp dir");
        assert_eq!(
            std::path::PathBuf::from(reported.trim())
                .canonicalize()
                .expect("canonical pwd"),
            expected
        );
    }

    #[test]
    fn passes_configured_environment() {
        let executor =
            SystemCommandExecutor::new(Duration::from_secs(10)).with_env("JUNO_TEST_VALUE", "42");
        let output = executor
            .run("sh", &["-c", "printf %s \"$JUNO_TEST_VALUE\""], None)
            .expect("sh runs");
        assert_eq!(String::from_utf8_lossy(&output.stdout), "42");
    }

    #[test]
    fn captures_output_larger_than_a_pipe_buffer() {
        let executor = SystemCommandExecutor::new(Duration::from_secs(10));
        let output = executor
            .run(
                "sh",
                &["-c", "head -c 200000 /dev/zero | tr '\\0' x; printf done >&2"],
                None,
            )
            .expect("sh runs");
        assert!(output.status.success());
        assert_eq!(output.stdout.len(), 200_000);
        assert!(output.stdout.iter().all(|byte| *byte == b'x'));
        assert_eq!(output.stderr, b"done");
    }

    #[test]
    fn kills_commands_that_exceed_timeout() {
        let executor = SystemCommandExecutor::new(Duration::from_millis(50));
        let err = executor
            .run("sleep", &["5"], None)
            .expect_err("sleep should time out");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn combined_output_joins_streams() {
        let mut output = success_output();
        output.stdout = b"out\n".to_vec();
        output.stderr = b"err\n".to_vec();
        assert_eq!(combined_output(&output), "out\nerr");
        assert_eq!(combined_output(&failure_output("fatal: nope")), "fatal: nope");
    }
}
