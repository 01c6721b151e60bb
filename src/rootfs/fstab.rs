//! `customize_fstab` — spec §4.E step, grounded in the teacher's
//! `PartitionLayout::fstab` (`cfg/partition.rs`), which renders
//! `LABEL=<x> <mount> <fstype> <options> <dump> <fsck>` lines. Here the
//! entries come from the manifest's `customization.fstab` list instead of
//! being derived from the partition table.

use color_eyre::Result;
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;
use crate::model::FstabEntry;

fn render(entry: &FstabEntry) -> String {
	format!(
		"LABEL={}\t{}\t{}\t{}\t{}\t{}\n",
		entry.label,
		entry.mount,
		entry.fstype,
		entry.options,
		u8::from(entry.dump),
		entry.fsck_order
	)
}

/// # Errors
/// [`KilnError::WorkspaceIo`] if `/etc/fstab` can't be appended to.
pub fn customize_fstab(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let Some(customization) = &ctx.image.customization else { return Ok(()) };
	if customization.fstab.is_empty() {
		return Ok(());
	}

	let path = chroot.join("etc/fstab");
	let mut existing = std::fs::read_to_string(&path).unwrap_or_default();
	for entry in &customization.fstab {
		existing.push_str(&render(entry));
	}
	std::fs::write(&path, existing).map_err(|source| KilnError::WorkspaceIo { path, source })?;
	info!(count = customization.fstab.len(), "fstab entries written");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_canonical_fstab_line() {
		let entry = FstabEntry {
			label: "writable".to_owned(),
			mount: "/".to_owned(),
			fstype: "ext4".to_owned(),
			options: "defaults".to_owned(),
			dump: false,
			fsck_order: 1,
		};
		assert_eq!(render(&entry), "LABEL=writable\t/\text4\tdefaults\t0\t1\n");
	}
}
