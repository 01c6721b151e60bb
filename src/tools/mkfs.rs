//! Filesystem-creation facade (spec §4.F `populate_prepare_partitions`) —
//! grounded in the teacher's `mkfs.*` invocations inside
//! `PartitionLayout::apply` (`cfg/partition.rs`).

use std::path::Path;

use color_eyre::{eyre::eyre, Result};

use crate::error::KilnError;
use crate::process::{command, ProcessRunner};

/// `mkfs.<filesystem> [-n <label>] [-d <content-root>] <image>` — spec §4.F:
/// "call the external mkfs helper with (fstype, image, label, content-root,
/// size, sector-size) — with content when a content tree exists, without
/// content when no content is staged."
///
/// ext4 populates directly via `mke2fs -d`; vfat formats first, then copies
/// the staged tree in with `mcopy` since `mkfs.vfat` has no populate flag.
///
/// # Errors
/// [`KilnError::GeometryViolation`] for an unsupported filesystem name,
/// otherwise propagates tool-failure errors.
pub fn make(runner: &ProcessRunner, filesystem: &str, label: &str, image: &Path, content_root: Option<&Path>) -> Result<()> {
	match filesystem {
		"ext4" => make_ext4(runner, label, image, content_root),
		"vfat" => make_vfat(runner, label, image, content_root),
		"xfs" => make_xfs(runner, label, image, content_root),
		other => Err(eyre!(KilnError::GeometryViolation {
			structure: image.display().to_string(),
			reason: format!("unsupported filesystem `{other}`"),
		})),
	}
}

fn make_ext4(runner: &ProcessRunner, label: &str, image: &Path, content_root: Option<&Path>) -> Result<()> {
	let mut args = vec!["-F".to_owned()];
	if !label.is_empty() {
		args.push("-L".to_owned());
		args.push(label.to_owned());
	}
	if let Some(root) = content_root {
		args.push("-d".to_owned());
		args.push(root.display().to_string());
	}
	args.push(image.display().to_string());
	runner.run(command("mke2fs", args))?;
	Ok(())
}

fn make_xfs(runner: &ProcessRunner, label: &str, image: &Path, content_root: Option<&Path>) -> Result<()> {
	let mut args = vec!["-f".to_owned()];
	if !label.is_empty() {
		args.push("-L".to_owned());
		args.push(label.to_owned());
	}
	args.push(image.display().to_string());
	runner.run(command("mkfs.xfs", args))?;
	if content_root.is_some() {
		tracing::warn!("xfs has no populate-at-format path; content staging skipped for {}", image.display());
	}
	Ok(())
}

fn make_vfat(runner: &ProcessRunner, label: &str, image: &Path, content_root: Option<&Path>) -> Result<()> {
	let mut args = Vec::new();
	if !label.is_empty() {
		args.push("-n".to_owned());
		args.push(label.to_owned());
	}
	args.push(image.display().to_string());
	runner.run(command("mkfs.vfat", args))?;

	let Some(root) = content_root else { return Ok(()) };
	for entry in std::fs::read_dir(root).map_err(|source| KilnError::WorkspaceIo { path: root.to_path_buf(), source })? {
		let entry = entry.map_err(|source| KilnError::WorkspaceIo { path: root.to_path_buf(), source })?;
		runner.run(command("mcopy", [
			"-s".to_owned(),
			"-i".to_owned(),
			image.display().to_string(),
			entry.path().display().to_string(),
			"::".to_owned(),
		]))?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_unsupported_filesystem() {
		let runner = ProcessRunner::new(false);
		let err = make(&runner, "btrfs", "root", Path::new("/dev/null"), None);
		assert!(err.is_err());
	}
}
