//! Package installation into the staged chroot (spec §4.E steps 3 and 7).

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;
use crate::tools::{apt, distro_info};

/// `install_packages` — install the base `Packages[]` resolved by either
/// `germinate` or `build_rootfs_from_tasks`, plus the manifest's `kernel`.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn install_packages(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	apt::update(&ctx.runner, &chroot)?;
	let mut packages = ctx.packages.clone();
	packages.push(ctx.image.kernel.clone());
	info!(count = packages.len(), "installing base packages");
	apt::install(&ctx.runner, &chroot, &packages)
}

/// `install_extra_packages` — `customization.extra-packages`, installed
/// after any `add_extra_ppas` step has run so the new repository is already
/// trusted and enabled. Each package is confirmed published for the target
/// series via `rmadison` first, since (unlike the germinate-resolved base
/// set) nothing else has checked these names against the archive yet.
///
/// # Errors
/// Propagates tool-failure errors, or [`KilnError::ContentMissing`] if
/// `rmadison` reports no publication for a requested package.
pub fn install_extra_packages(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let Some(customization) = &ctx.image.customization else { return Ok(()) };
	if customization.extra_packages.is_empty() {
		return Ok(());
	}
	for package in &customization.extra_packages {
		let listing = distro_info::madison(&ctx.runner, &ctx.image.series, package)?;
		if listing.trim().is_empty() {
			return Err(eyre!(KilnError::ContentMissing(format!(
				"package `{package}` not published for series `{}`",
				ctx.image.series
			))));
		}
	}
	info!(count = customization.extra_packages.len(), "installing extra packages");
	apt::install(&ctx.runner, &chroot, &customization.extra_packages)
}
