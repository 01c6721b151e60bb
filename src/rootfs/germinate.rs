//! Package-list resolution: seed-based (`germinate`) or plain archive-task
//! lists (spec §4.D/§4.E step 1, the two non-tarball rootfs sources).

use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;
use crate::tools::{distro_info, germinate as germinate_tool};

/// `germinate` — resolve `rootfs.seed` into a flat package list stored on
/// [`Context::packages`].
///
/// # Errors
/// Propagates [`crate::error::KilnError::ToolFailure`]/`ContentMissing`.
pub fn germinate(ctx: &mut Context) -> Result<()> {
	distro_info::validate_series(&ctx.runner, &ctx.image.series)?;
	let seed = ctx
		.image
		.rootfs
		.seed
		.clone()
		.ok_or_else(|| eyre!(KilnError::ContentMissing("rootfs.seed".to_owned())))?;
	let scratch = ctx.workspace.sub_dir("scratch")?;
	let packages = germinate_tool::resolve(
		&ctx.runner,
		&scratch,
		&ctx.image.architecture,
		&ctx.image.series,
		&ctx.image.rootfs.mirror,
		&ctx.image.rootfs.components,
		ctx.image.rootfs.flavor.as_deref(),
		&seed,
	)?;
	info!(count = packages.len(), "germinate resolved package list");
	ctx.packages = packages;
	Ok(())
}

/// `build_rootfs_from_tasks` — the `archive-tasks` alternative to
/// `germinate`: the task list in the manifest *is* the package list, modulo
/// an expansion through `tasksel`-style task metapackages.
///
/// # Errors
/// [`KilnError::ContentMissing`] if `rootfs.archive-tasks` is unset.
pub fn build_rootfs_from_tasks(ctx: &mut Context) -> Result<()> {
	distro_info::validate_series(&ctx.runner, &ctx.image.series)?;
	let tasks = ctx
		.image
		.rootfs
		.archive_tasks
		.clone()
		.ok_or_else(|| eyre!(KilnError::ContentMissing("rootfs.archive-tasks".to_owned())))?;
	let mut packages: Vec<String> = tasks.iter().map(|t| format!("task-{t}")).collect();
	packages.sort();
	packages.dedup();
	info!(count = packages.len(), "archive-tasks expanded to package list");
	ctx.packages = packages;
	Ok(())
}
