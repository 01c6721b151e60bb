//! `customize_cloud_init` — spec §4.E step: drop `user-data`/`meta-data`
//! into `/var/lib/cloud/seed/nocloud` inside the chroot so first boot
//! applies them via the NoCloud datasource.

use color_eyre::Result;
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;

/// # Errors
/// [`KilnError::WorkspaceIo`] if the seed files can't be written.
pub fn customize_cloud_init(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let Some(customization) = &ctx.image.customization else { return Ok(()) };
	let Some(cloud_init) = &customization.cloud_init else { return Ok(()) };

	let seed_dir = chroot.join("var/lib/cloud/seed/nocloud");
	std::fs::create_dir_all(&seed_dir).map_err(|source| KilnError::WorkspaceIo { path: seed_dir.clone(), source })?;

	if let Some(user_data) = &cloud_init.user_data {
		let path = seed_dir.join("user-data");
		std::fs::write(&path, user_data).map_err(|source| KilnError::WorkspaceIo { path, source })?;
	}
	if let Some(meta_data) = &cloud_init.meta_data {
		let path = seed_dir.join("meta-data");
		std::fs::write(&path, meta_data).map_err(|source| KilnError::WorkspaceIo { path, source })?;
	} else {
		let path = seed_dir.join("meta-data");
		std::fs::write(&path, "").map_err(|source| KilnError::WorkspaceIo { path, source })?;
	}
	info!(seed_dir = %seed_dir.display(), "cloud-init NoCloud seed written");
	Ok(())
}
