//! Structured error kinds for the image assembly pipeline (spec §7).
//!
//! Everything bubbles up through `color_eyre::Report` at the CLI boundary, but
//! internally we keep a `thiserror` enum so callers (and tests) can match on
//! the kind of failure instead of grepping error strings.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KilnError {
	#[error("--{a} and --{b} may not be used together")]
	FlagConflict { a: &'static str, b: &'static str },

	#[error("--resume requires --workdir")]
	ResumeNeedsWorkdir,

	#[error("failed to parse image definition: {0}")]
	SchemaError(String),

	#[error("{field}: {reason}")]
	DomainRule { field: String, reason: String },

	#[error("workspace I/O error at {path}: {source}")]
	WorkspaceIo { path: PathBuf, #[source] source: std::io::Error },

	#[error("required tool `{0}` was not found on PATH")]
	ToolNotFound(String),

	#[error("command failed (exit {exit:?}): {cmd}\n--- output ---\n{output}")]
	ToolFailure { cmd: String, output: String, exit: Option<i32> },

	#[error("expected content missing: {0}")]
	ContentMissing(String),

	#[error("geometry violation in structure `{structure}`: {reason}")]
	GeometryViolation { structure: String, reason: String },

	#[error("exhausted randomness generating a unique disk ID after {attempts} attempts")]
	RandomnessExhausted { attempts: u32 },

	#[error("cleanup failed after a prior error: {0}")]
	PartialFailure(String),

	#[error("unknown step name: {0}")]
	UnknownStep(String),
}

pub type Result<T> = color_eyre::Result<T>;
