//! Bounded subprocess execution for probes.
//!
//! Every process a probe worker launches carries an explicit timeout so a
//! single poll cycle can never block indefinitely; on expiry the child is
//! killed and the call returns an error.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

/// Poll interval for cooperative waits (child exit, worker stop flags).
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr then stdout, trimmed, as the operator log wants it.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stderr, self.stdout).trim().to_string()
    }
}

/// Run `program` with `args`, kill it after `timeout`.
pub fn run_command(program: &str, args: &[String], timeout: Duration) -> Result<CommandOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_reader = std::thread::spawn(move || read_pipe(stdout_pipe));
    let stderr_reader = std::thread::spawn(move || read_pipe(stderr_pipe));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait().context("wait for child")? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    bail!("{program} timed out after {:.1}s", timeout.as_secs_f64());
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    };

    Ok(CommandOutput {
        code: status.code(),
        stdout: stdout_reader.join().unwrap_or_default(),
        stderr: stderr_reader.join().unwrap_or_default(),
    })
}

/// Run a command line through the shell, with a timeout.
pub fn run_shell(command_line: &str, timeout: Duration) -> Result<CommandOutput> {
    run_command("sh", &["-c".to_string(), command_line.to_string()], timeout)
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut out = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_output_and_exit_code() {
        let out = run_shell("echo hello; echo oops >&2; exit 3", Duration::from_secs(5)).unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.combined(), "oops\nhello");
    }

    #[test]
    fn kills_processes_past_the_deadline() {
        let started = Instant::now();
        let err = run_shell("sleep 30", Duration::from_millis(200)).unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_binary_is_an_error() {
        assert!(run_command("definitely-not-a-binary", &[], Duration::from_secs(1)).is_err());
    }
}
