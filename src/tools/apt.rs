//! `apt-get`/`chroot` facade for package installation inside a staged rootfs
//! (spec §4.E steps 3 and 7, `install_packages`/`install_extra_packages`).

use std::path::Path;

use color_eyre::Result;

use crate::process::{command, ProcessRunner};

/// `chroot <root> apt-get update`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn update(runner: &ProcessRunner, root: &Path) -> Result<()> {
	runner.run(command("chroot", [root.display().to_string(), "apt-get".into(), "update".into()]))?;
	Ok(())
}

/// `chroot <root> apt-get install -y <packages...>`, noop on an empty list.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn install(runner: &ProcessRunner, root: &Path, packages: &[String]) -> Result<()> {
	if packages.is_empty() {
		return Ok(());
	}
	let mut args = vec![root.display().to_string(), "apt-get".into(), "install".into(), "-y".into()];
	args.extend(packages.iter().cloned());
	runner.run(command("chroot", args))?;
	Ok(())
}
