//! `perform_manual_customization` — spec §4.E step 9, executed strictly in
//! copy, touch, execute, group, user order (the order [`ManualCustomization`]
//! lists its fields in). `add-user`/`add-group` are grounded in the
//! teacher's `Auth::add_user`/`add_to_chroot` (`cfg/auth.rs`), simplified to
//! the subset of fields the spec's model exposes.

use color_eyre::Result;
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;
use crate::model::resolve_in_chroot;
use crate::process::command;

fn chroot_cmd(root: &std::path::Path, args: impl IntoIterator<Item = String>) -> std::process::Command {
	let mut full = vec![root.display().to_string()];
	full.extend(args);
	command("chroot", full)
}

/// # Errors
/// Propagates filesystem-I/O and tool-failure errors. Every destination path
/// was already validated absolute-and-dotdot-free by
/// [`crate::model::ImageDefinition::validate`]; this step re-resolves it
/// under `chroot` as defense in depth.
pub fn perform_manual_customization(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let Some(customization) = &ctx.image.customization else { return Ok(()) };
	let Some(manual) = &customization.manual else { return Ok(()) };

	for copy in &manual.copy_file {
		let dest = resolve_in_chroot(&chroot, &copy.dest)?;
		if let Some(parent) = dest.parent() {
			std::fs::create_dir_all(parent).map_err(|source| KilnError::WorkspaceIo { path: parent.to_path_buf(), source })?;
		}
		std::fs::copy(&copy.source, &dest).map_err(|source| KilnError::WorkspaceIo { path: dest.clone(), source })?;
		info!(source = %copy.source, dest = %dest.display(), "copy-file");
	}

	for touch in &manual.touch_file {
		let dest = resolve_in_chroot(&chroot, &touch.path)?;
		if let Some(parent) = dest.parent() {
			std::fs::create_dir_all(parent).map_err(|source| KilnError::WorkspaceIo { path: parent.to_path_buf(), source })?;
		}
		std::fs::write(&dest, b"").map_err(|source| KilnError::WorkspaceIo { path: dest.clone(), source })?;
		info!(path = %dest.display(), "touch-file");
	}

	for exec in &manual.execute {
		resolve_in_chroot(&chroot, &exec.path)?;
		ctx.runner.run(chroot_cmd(&chroot, [exec.path.clone()]))?;
		info!(path = %exec.path, "execute");
	}

	for group in &manual.add_group {
		let mut args = vec!["groupadd".to_owned()];
		if let Some(gid) = group.gid {
			args.push("-g".to_owned());
			args.push(gid.to_string());
		}
		args.push(group.groupname.clone());
		ctx.runner.run(chroot_cmd(&chroot, args))?;
	}

	for user in &manual.add_user {
		let mut args = vec!["useradd".to_owned(), "-m".to_owned()];
		if let Some(uid) = user.uid {
			args.push("-u".to_owned());
			args.push(uid.to_string());
		}
		args.push(user.username.clone());
		ctx.runner.run(chroot_cmd(&chroot, args))?;
	}

	Ok(())
}
