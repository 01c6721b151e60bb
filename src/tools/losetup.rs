//! `losetup` facade — attach/detach loop devices for the disk image (spec §5
//! LIFO release discipline). Grounded in the teacher's `loopdev-fyra`
//! dependency, here used via the CLI instead of the crate's own bindings so
//! `ProcessRunner` remains the single spawn point (spec §4.B).

use std::path::Path;

use color_eyre::{eyre::eyre, Result};

use crate::error::KilnError;
use crate::process::{command, ProcessRunner};

/// `losetup --find --show --partscan --sector-size <sector_size> <image>`,
/// returning the attached device path (e.g. `/dev/loop7`).
///
/// # Errors
/// [`KilnError::ToolFailure`] on a non-zero exit, or
/// [`KilnError::ContentMissing`] if losetup printed nothing.
pub fn attach(runner: &ProcessRunner, image: &Path, sector_size: u64) -> Result<String> {
	let out = runner.run_stdout(command("losetup", [
		"--find".to_owned(),
		"--show".to_owned(),
		"--partscan".to_owned(),
		"--sector-size".to_owned(),
		sector_size.to_string(),
		image.display().to_string(),
	]))?;
	let dev = out.lines().next().unwrap_or_default().trim().to_owned();
	if dev.is_empty() {
		return Err(eyre!(KilnError::ContentMissing("losetup produced no device path".to_owned())));
	}
	Ok(dev)
}

/// `losetup --detach <device>`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn detach(runner: &ProcessRunner, device: &str) -> Result<()> {
	runner.run(command("losetup", ["--detach".to_owned(), device.to_owned()]))?;
	Ok(())
}
