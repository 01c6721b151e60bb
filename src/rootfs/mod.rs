//! Component E — Rootfs Builder.
//!
//! Each step is a free function of shape `fn(&mut Context) -> Result<()>` so
//! [`crate::engine::calculate_states`] can reference them as plain function
//! pointers. Grounded throughout in the teacher's `DnfRootBuilder`/
//! `RootBuilder` trait methods (`builder.rs`), generalized from "one Dnf
//! backend" into the spec's three alternative rootfs sources plus the
//! customization pipeline.

pub mod chroot;
pub mod cloud_init;
pub mod fstab;
pub mod germinate;
pub mod manual;
pub mod packages;
pub mod ppa;
pub mod snaps;

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use crate::engine::Context;
use crate::error::KilnError;
use crate::model::gadget::GadgetInfo;
use crate::process::command;

/// `git clone --branch <branch> <url> <dest>` into the gadget-tree scratch
/// directory (spec §4.D: gadget source `git` clones a tree).
///
/// # Errors
/// Propagates tool-failure errors.
pub fn build_gadget_tree(ctx: &mut Context) -> Result<()> {
	let gadget = ctx.image.gadget.as_ref().expect("calculate_states only schedules this step when gadget is set");
	let dest = ctx.workspace.sub_dir("scratch")?.join("gadget");
	let mut args = vec!["clone".to_owned()];
	if let Some(branch) = &gadget.branch {
		args.push("--branch".to_owned());
		args.push(branch.clone());
	}
	args.push(gadget.url.clone());
	args.push(dest.display().to_string());
	ctx.runner.run(command("git", args))?;
	Ok(())
}

/// Copy a local gadget tree into the scratch directory (spec §4.D: gadget
/// source `directory` is used as-is).
///
/// # Errors
/// [`KilnError::WorkspaceIo`] if the copy fails.
pub fn prepare_gadget_tree(ctx: &mut Context) -> Result<()> {
	let gadget = ctx.image.gadget.as_ref().expect("calculate_states only schedules this step when gadget is set");
	let dest = ctx.workspace.sub_dir("scratch")?.join("gadget");
	copy_dir_recursive(Path::new(&gadget.url), &dest)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
	std::fs::create_dir_all(dst).map_err(|source| KilnError::WorkspaceIo { path: dst.to_path_buf(), source })?;
	for entry in std::fs::read_dir(src).map_err(|source| KilnError::WorkspaceIo { path: src.to_path_buf(), source })? {
		let entry = entry.map_err(|source| KilnError::WorkspaceIo { path: src.to_path_buf(), source })?;
		let to = dst.join(entry.file_name());
		if entry.path().is_dir() {
			copy_dir_recursive(&entry.path(), &to)?;
		} else {
			std::fs::copy(entry.path(), &to).map_err(|source| KilnError::WorkspaceIo { path: to, source })?;
		}
	}
	Ok(())
}

/// Parse `gadget.yaml` out of the cloned/copied gadget tree (spec §4.D:
/// "then always `load_gadget_yaml`").
///
/// # Errors
/// [`KilnError::ContentMissing`] if the tree has no `meta/gadget.yaml`, or
/// [`KilnError::SchemaError`] if it doesn't parse.
pub fn load_gadget_yaml(ctx: &mut Context) -> Result<()> {
	let path = ctx.workspace.sub_dir("scratch")?.join("gadget").join("meta").join("gadget.yaml");
	let text = std::fs::read_to_string(&path)
		.map_err(|_| eyre!(KilnError::ContentMissing(path.display().to_string())))?;
	let info = GadgetInfo::parse(&text)?;
	ctx.is_seeded = info.volumes.values().any(|v| v.structure.iter().any(|s| s.is_seeded_system_partition()));
	ctx.gadget = Some(info);
	Ok(())
}

/// Copy the finished chroot into the `rootfs/` staging directory, skipping
/// the kernel/boot assets that `populate_bootfs_contents` owns (spec §4.F
/// step boundary between rootfs and bootfs population).
///
/// # Errors
/// Propagates filesystem I/O errors.
pub fn populate_rootfs_contents(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let rootfs = ctx.workspace.sub_dir("rootfs")?;
	if !chroot.exists() {
		warn!("chroot directory missing; nothing to populate into rootfs/");
		return Ok(());
	}
	for entry in std::fs::read_dir(&chroot).map_err(|source| KilnError::WorkspaceIo { path: chroot.clone(), source })? {
		let entry = entry.map_err(|source| KilnError::WorkspaceIo { path: chroot.clone(), source })?;
		if entry.file_name() == "boot" {
			continue;
		}
		let to = rootfs.join(entry.file_name());
		if entry.path().is_dir() {
			copy_dir_recursive(&entry.path(), &to)?;
		} else {
			std::fs::copy(entry.path(), &to).map_err(|source| KilnError::WorkspaceIo { path: to, source })?;
		}
	}
	rewrite_fstab_label_for_system_data(&rootfs)?;
	info!(rootfs = %rootfs.display(), "rootfs contents populated");
	Ok(())
}

/// Rewrite whichever `rootfs/etc/fstab` entry mounts `/` so its `LABEL=…`
/// reads `LABEL=writable` (spec §4.E: "rewrites rootfs/etc/fstab entries
/// whose existing LABEL=… must become LABEL=writable for the system-data
/// filesystem") — `writable` is the label `make_disk` assigns the
/// `system-data` GPT partition.
fn rewrite_fstab_label_for_system_data(rootfs: &Path) -> Result<()> {
	let path = rootfs.join("etc/fstab");
	let Ok(text) = std::fs::read_to_string(&path) else { return Ok(()) };

	let rewritten: String = text
		.lines()
		.map(|line| {
			let mut fields = line.split_whitespace();
			let (Some(label_field), Some(mount_field)) = (fields.next(), fields.next()) else { return format!("{line}\n") };
			if mount_field == "/" && label_field.starts_with("LABEL=") {
				line.replacen(label_field, "LABEL=writable", 1) + "\n"
			} else {
				format!("{line}\n")
			}
		})
		.collect();

	std::fs::write(&path, rewritten).map_err(|source| KilnError::WorkspaceIo { path, source })
}
