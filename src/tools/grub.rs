//! `update-grub`/`grub-install` facade (spec §4.F `update_grub`), grounded
//! in the teacher's `Bootloader` dispatch (`cfg/boot.rs` names the variants;
//! the richer dead `backends/bootloader` generation's `install` dispatch is
//! the model generalized here for the live `Bootloader::Grub` case).

use std::path::Path;

use color_eyre::Result;

use crate::process::{command, ProcessRunner};

/// `chroot <root> grub-install --target=<target> <device>`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn install(runner: &ProcessRunner, root: &Path, device: &Path, target: &str) -> Result<()> {
	runner.run(command(
		"chroot",
		[root.display().to_string(), "grub-install".into(), format!("--target={target}"), device.display().to_string()],
	))?;
	Ok(())
}

/// `chroot <root> update-grub`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn update_config(runner: &ProcessRunner, root: &Path) -> Result<()> {
	runner.run(command("chroot", [root.display().to_string(), "update-grub".into()]))?;
	Ok(())
}
