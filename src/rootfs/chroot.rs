//! Alternative rootfs-materialization steps: debootstrap a fresh chroot, or
//! unpack a prebuilt tarball directly (spec §4.D rootfs-source branching).

use color_eyre::Result;
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;
use crate::process::command;
use crate::tools::debootstrap;

/// `create_chroot` — debootstrap the series into `chroot/` (used for the
/// `seed` and `archive-tasks` rootfs sources), then rewrite `sources.list`
/// with the pockets the series actually needs (spec §4.E step 3).
///
/// # Errors
/// Propagates [`crate::error::KilnError::ToolFailure`].
pub fn create_chroot(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let has_ppas = ctx.image.customization.as_ref().is_some_and(|c| !c.extra_ppas.is_empty());
	debootstrap::bootstrap(
		&ctx.runner,
		&ctx.image.architecture,
		&ctx.image.series,
		&ctx.image.rootfs.mirror,
		&ctx.image.rootfs.components,
		has_ppas,
		&chroot,
	)?;
	write_sources_list(&chroot, &ctx.image.series, &ctx.image.rootfs.mirror, &ctx.image.rootfs.components, &ctx.image.rootfs.pocket)?;
	info!(chroot = %chroot.display(), "chroot created");
	Ok(())
}

/// Add `-updates` and `-security` pocket entries, plus `-proposed` when
/// `pocket` is `proposed` or `release` (spec §4.E step 3).
fn write_sources_list(chroot: &std::path::Path, series: &str, mirror: &str, components: &[String], pocket: &str) -> Result<()> {
	let components = if components.is_empty() { "main".to_owned() } else { components.join(" ") };
	let mut pockets = vec![series.to_owned(), format!("{series}-updates"), format!("{series}-security")];
	if matches!(pocket, "proposed" | "release") {
		pockets.push(format!("{series}-proposed"));
	}

	let mut text = String::new();
	for suite in &pockets {
		text.push_str(&format!("deb {mirror} {suite} {components}\n"));
	}

	let path = chroot.join("etc/apt/sources.list");
	std::fs::write(&path, text).map_err(|source| KilnError::WorkspaceIo { path, source })
}

/// `extract_rootfs_tar` — unpack the tarball source directly into `chroot/`
/// (spec §4.E: "for a tarball source there is no debootstrap step").
///
/// # Errors
/// Propagates tool-failure errors.
pub fn extract_rootfs_tar(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let tarball = ctx
		.image
		.rootfs
		.tarball
		.as_ref()
		.ok_or_else(|| color_eyre::eyre::eyre!(KilnError::ContentMissing("rootfs.tarball".to_owned())))?;

	let local = ctx.workspace.sub_dir("scratch")?.join("rootfs.tar");
	ctx.runner.run(command(
		"curl",
		["-fsSL".to_owned(), "-o".to_owned(), local.display().to_string(), tarball.url.clone()],
	))?;
	if let Some(sha256) = &tarball.sha256 {
		let sum = ctx.runner.run_stdout(command("sha256sum", [local.display().to_string()]))?;
		let actual = sum.split_whitespace().next().unwrap_or_default();
		if actual != sha256 {
			return Err(color_eyre::eyre::eyre!(KilnError::DomainRule {
				field: "rootfs.tarball.sha256".to_owned(),
				reason: format!("checksum mismatch: expected {sha256}, got {actual}"),
			}));
		}
	}
	ctx.runner.run(command(
		"tar",
		["-xpf".to_owned(), local.display().to_string(), "-C".to_owned(), chroot.display().to_string()],
	))?;
	info!(chroot = %chroot.display(), "rootfs tarball extracted");
	Ok(())
}
