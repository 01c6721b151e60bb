//! `install_extra_snaps`/`preseed_extra_snaps` — spec §4.E steps 8-9. Snap
//! seeding is split into a narrow [`SnapSeeder`] trait so the real
//! `snap download`/`snap prepare-image` backend can be swapped for a fake in
//! tests, the same shape as the teacher's `RootBuilder`/`ImageBuilder`
//! traits in `builder.rs`.

use std::path::Path;

use color_eyre::Result;
use tracing::info;

use crate::engine::Context;
use crate::error::KilnError;
use crate::model::SnapSpec;
use crate::process::{command_in, ProcessRunner};

/// Downloads and stages snaps for offline seeding into a fresh install.
pub trait SnapSeeder {
	/// # Errors
	/// Implementation-defined; the default implementation propagates
	/// [`KilnError::ToolFailure`].
	fn download(&self, snap: &SnapSpec, seed_dir: &Path) -> Result<()>;
	/// # Errors
	/// Implementation-defined.
	fn write_seed_yaml(&self, snaps: &[SnapSpec], seed_dir: &Path) -> Result<()>;
}

/// `snap download` shelled out through [`ProcessRunner`] — the
/// production [`SnapSeeder`].
pub struct CliSnapSeeder<'a> {
	pub runner: &'a ProcessRunner,
}

impl SnapSeeder for CliSnapSeeder<'_> {
	fn download(&self, snap: &SnapSpec, seed_dir: &Path) -> Result<()> {
		let mut args = vec!["download".to_owned(), "--basename".to_owned(), snap.name.clone()];
		if let Some(channel) = &snap.channel {
			args.push("--channel".to_owned());
			args.push(channel.clone());
		}
		args.push(snap.name.clone());
		self.runner.run(command_in("snap", seed_dir, args))?;
		Ok(())
	}

	fn write_seed_yaml(&self, snaps: &[SnapSpec], seed_dir: &Path) -> Result<()> {
		let mut yaml = String::from("snaps:\n");
		for snap in snaps {
			yaml.push_str(&format!("  - name: {}\n    channel: {}\n", snap.name, snap.channel.as_deref().unwrap_or("stable")));
		}
		let path = seed_dir.join("seed.yaml");
		std::fs::write(&path, yaml).map_err(|source| KilnError::WorkspaceIo { path, source })?;
		Ok(())
	}
}

/// `install_extra_snaps` — download `customization.extra-snaps` into
/// `var/lib/snapd/seed/snaps` under the chroot.
///
/// # Errors
/// Propagates the seeder's errors.
pub fn install_extra_snaps(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let Some(customization) = &ctx.image.customization else { return Ok(()) };
	if customization.extra_snaps.is_empty() {
		return Ok(());
	}
	let seed_dir = chroot.join("var/lib/snapd/seed/snaps");
	std::fs::create_dir_all(&seed_dir).map_err(|source| KilnError::WorkspaceIo { path: seed_dir.clone(), source })?;

	let seeder = CliSnapSeeder { runner: &ctx.runner };
	for snap in &customization.extra_snaps {
		info!(snap = %snap.name, "downloading snap for seeding");
		seeder.download(snap, &seed_dir)?;
	}
	Ok(())
}

/// `preseed_extra_snaps` — write `var/lib/snapd/seed/seed.yaml` so snapd
/// installs the downloaded snaps on first boot.
///
/// # Errors
/// Propagates the seeder's errors.
pub fn preseed_extra_snaps(ctx: &mut Context) -> Result<()> {
	let chroot = ctx.workspace.sub_dir("chroot")?;
	let Some(customization) = &ctx.image.customization else { return Ok(()) };
	if customization.extra_snaps.is_empty() {
		return Ok(());
	}
	let seed_dir = chroot.join("var/lib/snapd/seed");
	let seeder = CliSnapSeeder { runner: &ctx.runner };
	seeder.write_seed_yaml(&customization.extra_snaps, &seed_dir)?;
	Ok(())
}

/// Ad-hoc `--snap` CLI flag merging (spec §6 `kiln snap` subcommand appends
/// to `customization.extra-snaps` at runtime). Must run *before*
/// [`crate::engine::Engine::setup`], since `calculate_states` only schedules
/// `install_extra_snaps`/`preseed_extra_snaps` when `customization.extra-snaps`
/// is already non-empty at that point.
pub fn merge_cli_snaps(image: &mut crate::model::ImageDefinition, snaps: Vec<SnapSpec>) {
	if snaps.is_empty() {
		return;
	}
	let customization = image.customization.get_or_insert_with(Default::default);
	customization.extra_snaps.extend(snaps);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::ImageDefinition;

	struct FakeSeeder {
		downloaded: std::cell::RefCell<Vec<String>>,
	}

	impl SnapSeeder for FakeSeeder {
		fn download(&self, snap: &SnapSpec, _seed_dir: &Path) -> Result<()> {
			self.downloaded.borrow_mut().push(snap.name.clone());
			Ok(())
		}

		fn write_seed_yaml(&self, snaps: &[SnapSpec], seed_dir: &Path) -> Result<()> {
			let yaml = snaps.iter().map(|s| s.name.clone()).collect::<Vec<_>>().join(",");
			std::fs::write(seed_dir.join("seed.yaml"), yaml).unwrap();
			Ok(())
		}
	}

	#[test]
	fn merge_cli_snaps_appends_onto_existing_extra_snaps() {
		let mut image = ImageDefinition::parse(
			"name: t\narchitecture: amd64\nseries: jammy\nclass: preinstalled\nkernel: linux\nrootfs:\n  mirror: http://x\n  seed:\n    urls: [\"u\"]\n    branch: jammy\n    names: [server]\ncustomization:\n  extra-snaps:\n    - name: core22\n",
		)
		.unwrap();
		merge_cli_snaps(&mut image, vec![SnapSpec { name: "lxd".to_owned(), channel: None }]);
		let names: Vec<_> = image.customization.unwrap().extra_snaps.iter().map(|s| s.name.clone()).collect();
		assert_eq!(names, vec!["core22", "lxd"]);
	}

	#[test]
	fn merge_cli_snaps_is_a_noop_with_no_cli_flags() {
		let mut image = ImageDefinition::parse(
			"name: t\narchitecture: amd64\nseries: jammy\nclass: preinstalled\nkernel: linux\nrootfs:\n  mirror: http://x\n  seed:\n    urls: [\"u\"]\n    branch: jammy\n    names: [server]\n",
		)
		.unwrap();
		merge_cli_snaps(&mut image, vec![]);
		assert!(image.customization.is_none());
	}

	#[test]
	fn fake_seeder_records_every_requested_snap() {
		let seeder = FakeSeeder { downloaded: std::cell::RefCell::new(vec![]) };
		let snaps = vec![SnapSpec { name: "core22".to_owned(), channel: None }, SnapSpec { name: "lxd".to_owned(), channel: Some("latest/stable".to_owned()) }];
		for snap in &snaps {
			seeder.download(snap, Path::new("/tmp")).unwrap();
		}
		assert_eq!(seeder.downloaded.into_inner(), vec!["core22", "lxd"]);
	}
}
