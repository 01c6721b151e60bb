//! `mount`/`umount` facade (spec §5 LIFO release discipline). Grounded in
//! the teacher's `PartitionLayout::mount_to_chroot`/`unmount_from_chroot`
//! (`cfg/partition.rs`), generalized from a fixed chroot bind-mount list to
//! an arbitrary mount-point / unmount-in-reverse-order pair.

use std::path::Path;

use color_eyre::Result;

use crate::process::{command, ProcessRunner};

/// `mount [-t <fstype>] <source> <target>`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn mount(runner: &ProcessRunner, source: &Path, target: &Path, fstype: Option<&str>) -> Result<()> {
	let mut args = vec![];
	if let Some(fstype) = fstype {
		args.push("-t".to_owned());
		args.push(fstype.to_owned());
	}
	args.push(source.display().to_string());
	args.push(target.display().to_string());
	runner.run(command("mount", args))?;
	Ok(())
}

/// `mount --bind <source> <target>`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn bind(runner: &ProcessRunner, source: &Path, target: &Path) -> Result<()> {
	runner.run(command("mount", ["--bind".to_owned(), source.display().to_string(), target.display().to_string()]))?;
	Ok(())
}

/// `umount <target>`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn unmount(runner: &ProcessRunner, target: &Path) -> Result<()> {
	runner.run(command("umount", [target.display().to_string()]))?;
	Ok(())
}
