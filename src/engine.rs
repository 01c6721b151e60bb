//! Component D — Staged Execution Engine.
//!
//! Grounded in the teacher's `KatsuBuilder`/`ImageBuilder` phase dispatch
//! (`builder.rs`'s `gen_phase!`/`phase!` skip-phase macros in `IsoBuilder::build`)
//! and generalized from "skip a named phase via an env var" into the spec's
//! full `--until`/`--thru`/`--resume` staged model with persisted checkpoints.

use std::collections::BTreeMap;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::KilnError;
use crate::model::gadget::GadgetInfo;
use crate::model::{self, ImageDefinition, RootfsSource};
use crate::process::ProcessRunner;
use crate::workspace::Workspace;

/// CLI-level flags that shape `Setup`/`CalculateStates` (spec §3 `StateMachine`).
#[derive(Debug, Clone)]
pub struct EngineFlags {
	pub workdir: Option<std::path::PathBuf>,
	pub output_dir: std::path::PathBuf,
	pub until: Option<String>,
	pub thru: Option<String>,
	pub resume: bool,
	pub debug: bool,
	pub verbose: bool,
	pub quiet: bool,
	pub sector_size: u32,
}

impl EngineFlags {
	/// # Errors
	/// [`KilnError::FlagConflict`] / [`KilnError::ResumeNeedsWorkdir`] per
	/// spec §4.D `Setup`.
	pub fn validate(&self) -> Result<()> {
		if self.until.is_some() && self.thru.is_some() {
			return Err(eyre!(KilnError::FlagConflict { a: "until", b: "thru" }));
		}
		if self.resume && self.workdir.is_none() {
			return Err(eyre!(KilnError::ResumeNeedsWorkdir));
		}
		let verbosity_flags = [self.debug, self.verbose, self.quiet].iter().filter(|b| **b).count();
		if verbosity_flags > 1 {
			return Err(eyre!(KilnError::FlagConflict { a: "debug/verbose", b: "quiet" }));
		}
		Ok(())
	}
}

/// Name-labelled unit of work. Function pointers (not closures) so the step
/// table can be rebuilt deterministically from a step *name* list on resume,
/// per the design note "store step names, not indices".
#[derive(Clone, Copy)]
pub struct Step {
	pub name: &'static str,
	pub run: fn(&mut Context) -> Result<()>,
}

impl std::fmt::Debug for Step {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Step").field("name", &self.name).finish()
	}
}

/// Everything a step needs: the resolved model, the workspace, merged
/// package/snap lists, and the tool collaborators. Steps mutate this in
/// place (spec: "steps mutate [the staging directories]").
pub struct Context {
	pub flags: EngineFlags,
	pub workspace: Workspace,
	pub runner: ProcessRunner,
	pub image: ImageDefinition,
	pub gadget: Option<GadgetInfo>,
	pub packages: Vec<String>,
	pub rootfs_size: u64,
	pub volume_names: BTreeMap<String, String>,
	pub is_seeded: bool,
	/// Per-volume partition number of the `system-data` (or, failing that,
	/// `system-seed`) structure, assigned by `make_disk`'s partition-table
	/// pass and consumed by `update_grub` to mount `<loop>p<N>` instead of a
	/// hardcoded `p1` (spec §4.F step 4: "mount `<loop>p<rootfs-part>`").
	pub root_partitions: BTreeMap<String, u32>,
}

/// The persisted, resumable slice of engine state: which steps are planned,
/// in what order, and how many have completed (spec §6 metadata file).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Checkpoint {
	pub planned: Vec<String>,
	pub completed: Vec<String>,
}

pub struct Engine {
	pub ctx: Context,
	pub steps: Vec<Step>,
	pub checkpoint: Checkpoint,
}

impl Engine {
	/// Validate flags, initialise the workspace, and either resume from a
	/// prior checkpoint or calculate a fresh step list (spec §4.D `Setup`).
	///
	/// # Errors
	/// Propagates flag-validation, workspace-I/O, and `--until`/`--thru`
	/// name-resolution failures.
	pub fn setup(flags: EngineFlags, image: ImageDefinition) -> Result<Self> {
		flags.validate()?;
		let workspace = Workspace::init(flags.workdir.clone())?;
		let runner = ProcessRunner::new(flags.debug);

		let steps = calculate_states(&image);
		let step_names: Vec<String> = steps.iter().map(|s| s.name.to_owned()).collect();

		for target in [&flags.until, &flags.thru].into_iter().flatten() {
			if !step_names.contains(target) {
				return Err(eyre!(KilnError::UnknownStep(target.clone())));
			}
		}

		let checkpoint = if flags.resume {
			workspace.load_metadata::<Checkpoint>().unwrap_or_else(|_| Checkpoint { planned: step_names, completed: vec![] })
		} else {
			Checkpoint { planned: step_names, completed: vec![] }
		};

		let ctx = Context {
			is_seeded: matches!(image.class, model::ImageClass::Preinstalled),
			packages: vec![],
			rootfs_size: 0,
			volume_names: BTreeMap::new(),
			root_partitions: BTreeMap::new(),
			gadget: None,
			flags,
			workspace,
			runner,
			image,
		};

		Ok(Self { ctx, steps, checkpoint })
	}

	/// Iterate from the checkpoint cursor forward; persist metadata after
	/// every successful step; halt at `--thru` inclusive or `--until`
	/// exclusive; on error, abort leaving the workspace intact.
	///
	/// # Errors
	/// Returns the first step's error; the workspace is left intact so the
	/// user can `--resume` after fixing the cause.
	pub fn run(&mut self) -> Result<()> {
		for step in &self.steps {
			if self.checkpoint.completed.contains(&step.name.to_owned()) {
				continue;
			}
			if self.ctx.flags.until.as_deref() == Some(step.name) {
				info!(step = step.name, "stopping before step (--until)");
				break;
			}

			info!(step = step.name, "running step");
			(step.run)(&mut self.ctx)?;

			self.checkpoint.completed.push(step.name.to_owned());
			self.ctx.workspace.save_metadata(&self.checkpoint)?;

			if self.ctx.flags.thru.as_deref() == Some(step.name) {
				info!(step = step.name, "stopping after step (--thru)");
				break;
			}
		}
		Ok(())
	}

	/// Workspace teardown only (spec §4.D `Teardown`).
	pub fn teardown(self) {
		self.ctx.workspace.teardown();
	}
}

/// Begins with the class's canonical base list, then splices in steps driven
/// by the image definition (spec §4.D `CalculateStates`).
#[must_use]
pub fn calculate_states(image: &ImageDefinition) -> Vec<Step> {
	let mut steps = Vec::new();

	if let Some(gadget) = &image.gadget {
		steps.push(match gadget.source_type {
			model::GadgetSourceType::Git => Step { name: "build_gadget_tree", run: crate::rootfs::build_gadget_tree },
			model::GadgetSourceType::Directory => {
				Step { name: "prepare_gadget_tree", run: crate::rootfs::prepare_gadget_tree }
			},
		});
	}
	steps.push(Step { name: "load_gadget_yaml", run: crate::rootfs::load_gadget_yaml });

	match image.rootfs.source() {
		RootfsSource::Seed => {
			steps.push(Step { name: "germinate", run: crate::rootfs::germinate::germinate });
			steps.push(Step { name: "create_chroot", run: crate::rootfs::chroot::create_chroot });
			steps.push(Step { name: "install_packages", run: crate::rootfs::packages::install_packages });
		},
		RootfsSource::ArchiveTasks => {
			steps.push(Step {
				name: "build_rootfs_from_tasks",
				run: crate::rootfs::germinate::build_rootfs_from_tasks,
			});
			steps.push(Step { name: "create_chroot", run: crate::rootfs::chroot::create_chroot });
			steps.push(Step { name: "install_packages", run: crate::rootfs::packages::install_packages });
		},
		RootfsSource::Tarball => {
			steps.push(Step { name: "extract_rootfs_tar", run: crate::rootfs::chroot::extract_rootfs_tar });
		},
		RootfsSource::Invalid => {},
	}

	if let Some(customization) = &image.customization {
		let wanted = model::customization_steps(customization);
		if wanted.contains("add_extra_ppas") {
			steps.push(Step { name: "add_extra_ppas", run: crate::rootfs::ppa::add_extra_ppas });
		}
		if wanted.contains("install_extra_packages") {
			steps.push(Step {
				name: "install_extra_packages",
				run: crate::rootfs::packages::install_extra_packages,
			});
		}
		if wanted.contains("install_extra_snaps") {
			steps.push(Step { name: "install_extra_snaps", run: crate::rootfs::snaps::install_extra_snaps });
			steps.push(Step { name: "preseed_extra_snaps", run: crate::rootfs::snaps::preseed_extra_snaps });
		}
		if wanted.contains("customize_cloud_init") {
			steps.push(Step { name: "customize_cloud_init", run: crate::rootfs::cloud_init::customize_cloud_init });
		}
		if wanted.contains("customize_fstab") {
			steps.push(Step { name: "customize_fstab", run: crate::rootfs::fstab::customize_fstab });
		}
		if wanted.contains("perform_manual_customization") {
			steps.push(Step {
				name: "perform_manual_customization",
				run: crate::rootfs::manual::perform_manual_customization,
			});
		}
	}

	steps.push(Step { name: "populate_rootfs_contents", run: crate::rootfs::populate_rootfs_contents });
	steps.push(Step { name: "populate_bootfs_contents", run: crate::volume::assemble::populate_bootfs_contents });
	steps.push(Step { name: "populate_prepare_partitions", run: crate::volume::assemble::populate_prepare_partitions });
	steps.push(Step { name: "make_disk", run: crate::volume::assemble::make_disk });

	if gadget_has_grub(image) {
		steps.push(Step { name: "update_grub", run: crate::volume::assemble::update_grub });
	}

	steps.push(Step { name: "generate_package_manifest", run: crate::manifest::generate_package_manifest });
	steps.push(Step { name: "generate_snap_manifest", run: crate::manifest::generate_snap_manifest });

	steps
}

fn gadget_has_grub(image: &ImageDefinition) -> bool {
	// The gadget YAML itself is only known after `load_gadget_yaml` runs, so at
	// plan time we conservatively schedule `update_grub` whenever a gadget is
	// declared at all; the step itself is a no-op warning if grub turns out
	// not to be the bootloader (see `volume::assemble::update_grub`).
	image.gadget.is_some()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn def(yaml: &str) -> ImageDefinition {
		ImageDefinition::parse(yaml).unwrap()
	}

	#[test]
	fn until_and_thru_conflict() {
		let flags = EngineFlags {
			workdir: None,
			output_dir: "/tmp".into(),
			until: Some("a".into()),
			thru: Some("b".into()),
			resume: false,
			debug: false,
			verbose: false,
			quiet: false,
			sector_size: 512,
		};
		assert!(flags.validate().is_err());
	}

	#[test]
	fn resume_without_workdir_is_rejected() {
		let flags = EngineFlags {
			workdir: None,
			output_dir: "/tmp".into(),
			until: None,
			thru: None,
			resume: true,
			debug: false,
			verbose: false,
			quiet: false,
			sector_size: 512,
		};
		assert!(flags.validate().is_err());
	}

	#[test]
	fn calculate_states_splices_in_seed_steps() {
		let image = def(
			"name: t\narchitecture: amd64\nseries: jammy\nclass: preinstalled\nkernel: linux\nrootfs:\n  mirror: http://x\n  seed:\n    urls: [\"u\"]\n    branch: jammy\n    names: [server]\n",
		);
		let steps = calculate_states(&image);
		let names: Vec<_> = steps.iter().map(|s| s.name).collect();
		assert!(names.contains(&"germinate"));
		assert!(names.contains(&"create_chroot"));
		assert!(!names.contains(&"extract_rootfs_tar"));
	}

	#[test]
	fn calculate_states_skips_chroot_for_tarball() {
		let image = def(
			"name: t\narchitecture: amd64\nseries: jammy\nclass: preinstalled\nkernel: linux\nrootfs:\n  mirror: http://x\n  tarball:\n    url: \"http://x/rootfs.tar.gz\"\n",
		);
		let steps = calculate_states(&image);
		let names: Vec<_> = steps.iter().map(|s| s.name).collect();
		assert!(names.contains(&"extract_rootfs_tar"));
		assert!(!names.contains(&"create_chroot"));
		assert!(!names.contains(&"germinate"));
	}
}
