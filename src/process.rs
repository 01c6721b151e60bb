//! Component B — Process Runner.
//!
//! Grounded in the teacher's `util::run!` macro: wrap `std::process::Command`,
//! capture stdout+stderr, and wrap any non-zero exit in an error that carries
//! the full command line and captured output so a caller (or a test) can
//! assert on both. This is the only approved way the rest of the crate spawns
//! external tools (spec §4.B).

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use color_eyre::{eyre::eyre, Result, Section};
use tracing::{debug, trace};

use crate::error::KilnError;

/// Uniform launch + output-capture + error-wrap for external tools.
///
/// `debug` toggles a passthrough tee to the console (spec: "a debug-mode
/// passthrough that tees to the console"), mirroring `--debug`/`KATSU_LOG`
/// style verbosity toggles in the teacher.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner {
	pub debug: bool,
}

impl ProcessRunner {
	#[must_use]
	pub fn new(debug: bool) -> Self {
		Self { debug }
	}

	/// Run `cmd`, returning combined stdout+stderr on success.
	///
	/// # Errors
	/// Returns [`KilnError::ToolNotFound`] if the binary can't be spawned at
	/// all, or [`KilnError::ToolFailure`] if it exits non-zero.
	pub fn run(&self, mut cmd: Command) -> Result<String> {
		let line = display_cmd(&cmd);
		trace!(cmd = %line, "spawning");

		if self.debug {
			cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
			let status = cmd.status().map_err(|e| self.not_found(&line, &e))?;
			return status.success().then(String::new).ok_or_else(|| {
				eyre!(KilnError::ToolFailure {
					cmd: line.clone(),
					output: "(teed to console, see above)".to_owned(),
					exit: status.code(),
				})
			});
		}

		let out = cmd.output().map_err(|e| self.not_found(&line, &e))?;
		self.finish(&line, out)
	}

	/// Run `cmd` and return only stdout, trimmed, on success — used for
	/// one-shot queries like `losetup --find --show` or `findmnt`.
	///
	/// # Errors
	/// Same as [`Self::run`].
	pub fn run_stdout(&self, cmd: Command) -> Result<String> {
		let line = display_cmd(&cmd);
		let mut cmd = cmd;
		let out = cmd.output().map_err(|e| self.not_found(&line, &e))?;
		let stdout = String::from_utf8_lossy(&out.stdout).trim().to_owned();
		self.finish(&line, out)?;
		Ok(stdout)
	}

	fn not_found(&self, line: &str, source: &std::io::Error) -> color_eyre::Report {
		debug!(cmd = line, error = %source, "tool not found / could not spawn");
		let bin = line.split_whitespace().next().unwrap_or(line).to_owned();
		eyre!(KilnError::ToolNotFound(bin))
	}

	fn finish(&self, line: &str, out: Output) -> Result<String> {
		let stdout = String::from_utf8_lossy(&out.stdout);
		let stderr = String::from_utf8_lossy(&out.stderr);
		let combined = format!("{stdout}{stderr}");
		if out.status.success() {
			return Ok(combined);
		}
		Err(eyre!(KilnError::ToolFailure {
			cmd: line.to_owned(),
			output: combined.trim().to_owned(),
			exit: out.status.code(),
		}))
		.with_note(|| format!("stdout: {}", stdout.trim()))
		.with_note(|| format!("stderr: {}", stderr.trim()))
	}
}

fn display_cmd(cmd: &Command) -> String {
	let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
	parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
	parts.join(" ")
}

/// Build a [`Command`], optionally rooted at `cwd`, with the given args.
///
/// Small helper so facade modules in `tools/` read as a flat arg list instead
/// of a chain of `.arg()` calls, in the spirit of the teacher's `cmd!` call
/// sites (`cmd!("parted" "-s" disk "mklabel" "gpt")`).
pub fn command<I, S>(program: &str, args: I) -> Command
where
	I: IntoIterator<Item = S>,
	S: AsRef<OsStr>,
{
	let mut c = Command::new(program);
	c.args(args);
	c
}

pub fn command_in<I, S>(program: &str, cwd: &Path, args: I) -> Command
where
	I: IntoIterator<Item = S>,
	S: AsRef<OsStr>,
{
	let mut c = command(program, args);
	c.current_dir(cwd);
	c
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn captures_success_output() {
		let runner = ProcessRunner::new(false);
		let out = runner.run(command("echo", ["hello"])).expect("echo should succeed");
		assert!(out.contains("hello"));
	}

	#[test]
	fn wraps_failure_with_command_and_output() {
		let runner = ProcessRunner::new(false);
		let err = runner.run(command("false", Vec::<&str>::new())).unwrap_err();
		let msg = format!("{err:?}");
		assert!(msg.contains("false"));
	}

	#[test]
	fn missing_binary_is_tool_not_found() {
		let runner = ProcessRunner::new(false);
		let err = runner.run(command("kiln-definitely-not-a-real-binary", Vec::<&str>::new()));
		assert!(err.is_err());
	}
}
