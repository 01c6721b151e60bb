//! Volume assembly steps: bootfs population, per-partition preparation, disk
//! image materialization, and grub regeneration against the final image
//! (spec §4.F). Grounded in the teacher's `DeviceInstaller`/`FsBuilder`
//! (`builder.rs`) and `PartitionLayout::apply` (`cfg/partition.rs`), expanded
//! from "one fixed MBR+ESP+root layout" into the spec's gadget-driven,
//! variable-structure volumes.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use rand::thread_rng;
use tracing::{info, warn};

use crate::engine::Context;
use crate::error::KilnError;
use crate::model::gadget::{PartitionTypeTag, StructureRole, Volume, VolumeStructure};
use crate::process::command;
use crate::tools::{grub, losetup, mkfs, mount};
use crate::volume::disk_id;
use crate::volume::release::ReleaseStack;
use crate::volume::table;

/// `populate_bootfs_contents` — the kernel/boot assets `populate_rootfs_contents`
/// deliberately skipped land here instead, under `rootfs/boot`, so they can be
/// copied verbatim into whichever structure's `content` names them.
///
/// # Errors
/// Propagates filesystem-I/O errors.
pub fn populate_bootfs_contents(ctx: &mut Context) -> Result<()> {
	let chroot_boot = ctx.workspace.sub_dir("chroot")?.join("boot");
	let rootfs_boot = ctx.workspace.sub_dir("rootfs")?.join("boot");
	if !chroot_boot.exists() {
		warn!("no /boot in chroot; nothing to populate into bootfs");
		return Ok(());
	}
	copy_dir(&chroot_boot, &rootfs_boot)?;
	info!(dest = %rootfs_boot.display(), "bootfs contents populated");
	Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
	std::fs::create_dir_all(dst).map_err(|source| KilnError::WorkspaceIo { path: dst.to_path_buf(), source })?;
	for entry in std::fs::read_dir(src).map_err(|source| KilnError::WorkspaceIo { path: src.to_path_buf(), source })? {
		let entry = entry.map_err(|source| KilnError::WorkspaceIo { path: src.to_path_buf(), source })?;
		let to = dst.join(entry.file_name());
		if entry.path().is_dir() {
			copy_dir(&entry.path(), &to)?;
		} else {
			std::fs::copy(entry.path(), &to).map_err(|source| KilnError::WorkspaceIo { path: to, source })?;
		}
	}
	Ok(())
}

/// Create a sparse file of exactly `size` bytes without writing any zero
/// bytes out (spec §9 open question: `bs=Size count=0 seek=1` creates a
/// sparse hole rather than materializing zeros; downstream `dd` writes into
/// that hole expect it to already read back as zero).
fn create_sparse(ctx: &Context, path: &Path, size: u64) -> Result<()> {
	ctx.runner.run(command("dd", [
		"if=/dev/zero".to_owned(),
		format!("of={}", path.display()),
		format!("bs={size}"),
		"count=0".to_owned(),
		"seek=1".to_owned(),
	]))?;
	Ok(())
}

/// `populate_prepare_partitions` — for every structure, produce
/// `volumes/<vol>/part<N>.img` (spec §4.F): a sparse raw blob with its
/// `content.image` entries dd'd into place, or a freshly `mkfs`'d filesystem
/// image populated from whatever was staged into `volumes/<vol>/<structure>`
/// by the content-copy pass below. Seeded system partitions
/// ([`VolumeStructure::is_seeded_system_partition`]) are skipped entirely on
/// a seeded image — they're populated by the installer on first boot, not by
/// us (spec invariant).
///
/// # Errors
/// Propagates filesystem-I/O and tool-failure errors.
pub fn populate_prepare_partitions(ctx: &mut Context) -> Result<()> {
	let Some(mut gadget) = ctx.gadget.clone() else {
		return Err(eyre!(KilnError::ContentMissing("gadget info (run load_gadget_yaml first)".to_owned())));
	};
	let rootfs = ctx.workspace.sub_dir("rootfs")?;
	let volumes_dir = ctx.workspace.sub_dir("volumes")?;
	let rootfs_size = ctx.rootfs_size;
	let quiet = ctx.flags.quiet;

	for (vol_name, volume) in &mut gadget.volumes {
		let vol_dir = volumes_dir.join(vol_name.as_str());
		std::fs::create_dir_all(&vol_dir).map_err(|source| KilnError::WorkspaceIo { path: vol_dir.clone(), source })?;

		let mut indices: Vec<usize> = (0..volume.structure.len()).collect();
		indices.sort_by_key(|&i| volume.structure[i].offset.unwrap_or(0));

		for idx in indices {
			if ctx.is_seeded && volume.structure[idx].is_seeded_system_partition() {
				continue;
			}
			let content_dir = vol_dir.join(&volume.structure[idx].name);
			if !volume.structure[idx].content.is_empty() && volume.structure[idx].content.iter().any(|c| c.source.is_some()) {
				std::fs::create_dir_all(&content_dir)
					.map_err(|source| KilnError::WorkspaceIo { path: content_dir.clone(), source })?;
				stage_content(&rootfs, &content_dir, &volume.structure[idx])?;
			}

			let part_img = vol_dir.join(part_image_name(&volume.structure[idx]));
			if volume.structure[idx].is_raw() {
				prepare_raw_part(ctx, &part_img, &volume.structure[idx])?;
			} else {
				prepare_fs_part(ctx, &part_img, &content_dir, &mut volume.structure[idx], rootfs_size, quiet)?;
			}
		}
	}

	ctx.volume_names = gadget.volumes.keys().map(|n| (n.clone(), format!("{n}.img"))).collect();
	info!(volumes = gadget.volumes.len(), "partition contents staged");
	ctx.gadget = Some(gadget);
	Ok(())
}

fn stage_content(rootfs: &Path, content_dir: &Path, structure: &VolumeStructure) -> Result<()> {
	for content in &structure.content {
		let (Some(source), Some(target)) = (&content.source, &content.target) else { continue };
		let from = rootfs.join(source.trim_start_matches('/'));
		let to = content_dir.join(target.trim_start_matches('/'));
		if let Some(parent) = to.parent() {
			std::fs::create_dir_all(parent).map_err(|source| KilnError::WorkspaceIo { path: parent.to_path_buf(), source })?;
		}
		if from.is_dir() {
			copy_dir(&from, &to)?;
		} else {
			std::fs::copy(&from, &to).map_err(|source| KilnError::WorkspaceIo { path: to, source })?;
		}
	}
	Ok(())
}

fn prepare_raw_part(ctx: &Context, part_img: &Path, structure: &VolumeStructure) -> Result<()> {
	create_sparse(ctx, part_img, structure.size.as_u64())?;
	let mut cursor = 0u64;
	for content in &structure.content {
		let Some(image) = &content.image else { continue };
		let offset = content.offset.unwrap_or(cursor);
		ctx.runner.run(command("dd", [
			format!("if={image}"),
			format!("of={}", part_img.display()),
			"bs=1".to_owned(),
			format!("seek={offset}"),
			"conv=notrunc,sparse".to_owned(),
		]))?;
		cursor = offset + content.size.map_or(0, |s| s.as_u64());
	}
	Ok(())
}

fn prepare_fs_part(
	ctx: &Context,
	part_img: &Path,
	content_dir: &Path,
	structure: &mut VolumeStructure,
	rootfs_size: u64,
	quiet: bool,
) -> Result<()> {
	let grows_with_rootfs = matches!(structure.role, StructureRole::SystemData | StructureRole::SystemSeed);
	if grows_with_rootfs && structure.size.as_u64() < rootfs_size {
		if !quiet {
			warn!(structure = %structure.name, declared = structure.size.as_u64(), rootfs_size, "growing structure to fit rootfs");
		}
		structure.size = bytesize::ByteSize::b(rootfs_size);
	}

	create_sparse(ctx, part_img, structure.size.as_u64())?;

	let content_root = content_dir.exists().then_some(content_dir);
	mkfs::make(&ctx.runner, &structure.filesystem, &structure.label, part_img, content_root)
}

/// `make_disk` — for every gadget volume, compute its size, pick a disk ID
/// by rejection sampling, reject overlapping table entries, then materialize
/// an image file with `parted`/`sgdisk`, dd the staged `part<N>.img` files
/// into place, and resolve `offset-write` pointers against the partition
/// start map.
///
/// # Errors
/// [`KilnError::GeometryViolation`] on overlap or schema-incompatible type,
/// [`KilnError::RandomnessExhausted`] if disk-ID sampling is exhausted,
/// otherwise propagates tool-failure/I/O errors.
pub fn make_disk(ctx: &mut Context) -> Result<()> {
	let Some(gadget) = ctx.gadget.clone() else {
		return Err(eyre!(KilnError::ContentMissing("gadget info (run load_gadget_yaml first)".to_owned())));
	};
	let volumes_dir = ctx.workspace.sub_dir("volumes")?;
	let mut used_disk_ids = HashSet::new();
	let mut rng = thread_rng();

	for (vol_name, volume) in &gadget.volumes {
		let ordered = volume.ordered_structures();
		table::check_no_overlaps(&ordered)?;
		if volume.schema == crate::model::gadget::Schema::Gpt {
			table::check_gpt_reserved_region(&ordered, u64::from(ctx.flags.sector_size))?;
		}

		let size = volume.calculate_image_size();
		let image_path = volumes_dir.join(format!("{vol_name}.img"));
		create_sparse(ctx, &image_path, size)?;

		let disk_id = disk_id::generate(&mut rng, &used_disk_ids)?;
		used_disk_ids.insert(disk_id);

		let table_kind = if volume.schema == crate::model::gadget::Schema::Gpt { "gpt" } else { "msdos" };
		ctx.runner.run(command(
			"parted",
			["-s".to_owned(), image_path.display().to_string(), "mklabel".to_owned(), table_kind.to_owned()],
		))?;

		let (starts, root_part_num) = write_partition_table(ctx, vol_name, volume, &ordered, &image_path)?;
		resolve_offset_writes(ctx, &ordered, &image_path, &starts)?;
		ctx.root_partitions.insert(vol_name.clone(), root_part_num.unwrap_or(1));

		info!(volume = %vol_name, disk_id = format!("{disk_id:08x}"), size, "disk image assembled");
	}
	Ok(())
}

fn skip_from_table(is_seeded: bool, structure: &VolumeStructure) -> bool {
	structure.excluded_from_table() || (is_seeded && structure.is_seeded_system_partition())
}

/// Stable per-structure staged-image filename, keyed by structure name (not
/// position) so `populate_prepare_partitions` and `make_disk` agree on it
/// regardless of which order either iterates structures in.
fn part_image_name(structure: &VolumeStructure) -> String {
	format!("part-{}.img", structure.name.replace(['/', ' '], "-"))
}

/// Build the partition table and dd each non-skipped structure's staged
/// `part<N>.img` into place; returns every structure's start offset (so
/// `offset-write` entries, skipped or not, can resolve against it) plus the
/// partition number assigned to the `system-data`/`system-seed` structure,
/// if any, for `update_grub` to mount.
fn write_partition_table(
	ctx: &Context,
	vol_name: &str,
	volume: &Volume,
	ordered: &[&VolumeStructure],
	image_path: &Path,
) -> Result<(BTreeMap<String, u64>, Option<u32>)> {
	let volumes_dir = ctx.workspace.sub_dir("volumes")?;
	let mut starts = BTreeMap::new();
	let mut part_num: u32 = 0;
	let mut root_part_num = None;

	for &structure in ordered {
		let offset = structure.offset.unwrap_or(0);
		starts.insert(structure.name.clone(), offset);
		if skip_from_table(ctx.is_seeded, structure) {
			continue;
		}

		part_num += 1;
		if matches!(structure.role, StructureRole::SystemData | StructureRole::SystemSeed) {
			root_part_num = Some(part_num);
		}
		let end = offset + structure.size.as_u64();
		ctx.runner.run(command("parted", [
			"-s".to_owned(),
			image_path.display().to_string(),
			"mkpart".to_owned(),
			structure.name.clone(),
			format!("{offset}B"),
			format!("{}B", end - 1),
		]))?;
		if let PartitionTypeTag::Guid(guid) = structure.structure_type.for_schema(&volume.schema)? {
			ctx.runner.run(command("sgdisk", [
				"--typecode".to_owned(),
				format!("{part_num}:{guid}"),
				image_path.display().to_string(),
			]))?;
		}
		if volume.schema == crate::model::gadget::Schema::Gpt {
			let part_guid = uuid::Uuid::new_v4();
			ctx.runner.run(command("sgdisk", [
				"--partition-guid".to_owned(),
				format!("{part_num}:{part_guid}"),
				image_path.display().to_string(),
			]))?;
		}

		let part_img = volumes_dir.join(vol_name).join(part_image_name(structure));
		if part_img.exists() {
			ctx.runner.run(command("dd", [
				format!("if={}", part_img.display()),
				format!("of={}", image_path.display()),
				"bs=1".to_owned(),
				format!("seek={offset}"),
				"conv=notrunc,sparse".to_owned(),
			]))?;
		}
	}
	Ok((starts, root_part_num))
}

/// Write every structure's `offset-write` pointer as a little-endian `u32`
/// (spec §4.F: value = `structure.Offset / sector_size`).
fn resolve_offset_writes(
	ctx: &Context,
	ordered: &[&VolumeStructure],
	image_path: &Path,
	starts: &BTreeMap<String, u64>,
) -> Result<()> {
	let volumes_dir = ctx.workspace.sub_dir("volumes")?;
	let sector_size = u64::from(ctx.flags.sector_size);
	let img_size = std::fs::metadata(image_path).map_err(|source| KilnError::WorkspaceIo { path: image_path.to_path_buf(), source })?.len();

	for structure in ordered {
		let Some(ow) = &structure.offset_write else { continue };
		let absolute = table::resolve_offset_write(ow, starts)?;
		let value = structure.offset.unwrap_or(0) / sector_size;
		let value = u32::try_from(value).map_err(|_| {
			eyre!(KilnError::GeometryViolation { structure: structure.name.clone(), reason: "offset-write value overflows u32".to_owned() })
		})?;
		if img_size < 4 || img_size - 4 < absolute {
			return Err(eyre!(KilnError::GeometryViolation {
				structure: structure.name.clone(),
				reason: format!("offset-write at {absolute} does not fit in a {img_size}-byte image"),
			}));
		}

		let bytes_path = volumes_dir.join(format!("offset-write-{}", structure.name));
		std::fs::write(&bytes_path, value.to_le_bytes()).map_err(|source| KilnError::WorkspaceIo { path: bytes_path.clone(), source })?;
		ctx.runner.run(command("dd", [
			format!("if={}", bytes_path.display()),
			format!("of={}", image_path.display()),
			"bs=1".to_owned(),
			format!("seek={absolute}"),
			"conv=notrunc".to_owned(),
		]))?;
	}
	Ok(())
}

/// `update_grub` — mount the assembled root volume, chroot into it, and
/// regenerate the grub configuration so it reflects the final partition
/// layout. No-op if the gadget's bootloader isn't grub (spec: "update_grub
/// only applies to grub-bootloader gadgets").
///
/// # Errors
/// Propagates mount/chroot tool-failure errors; the release stack guarantees
/// the loop device and mount are torn down even if grub itself fails.
pub fn update_grub(ctx: &mut Context) -> Result<()> {
	let Some(gadget) = ctx.gadget.clone() else { return Ok(()) };
	let Some((vol_name, volume)) = gadget.volumes.iter().next() else { return Ok(()) };
	if volume.bootloader != crate::model::gadget::Bootloader::Grub {
		info!(bootloader = ?volume.bootloader, "skipping update_grub for non-grub bootloader");
		return Ok(());
	}

	let image_path = ctx.workspace.sub_dir("volumes")?.join(format!("{vol_name}.img"));
	if !image_path.exists() {
		warn!("volume image missing; skipping update_grub");
		return Ok(());
	}

	let root_part = ctx.root_partitions.get(vol_name).copied().unwrap_or(1);
	let runner = ctx.runner;
	let loop_dev = losetup::attach(&runner, &image_path, u64::from(ctx.flags.sector_size))?;
	let mount_point = ctx.workspace.sub_dir("scratch")?.join("grub-mount");
	std::fs::create_dir_all(&mount_point).map_err(|source| KilnError::WorkspaceIo { path: mount_point.clone(), source })?;

	let mut release = ReleaseStack::new();
	{
		let dev = loop_dev.clone();
		release.push("detach loop", move || losetup::detach(&runner, &dev));
	}
	mount::mount(&runner, Path::new(&format!("{loop_dev}p{root_part}")), &mount_point, None)?;
	{
		let target = mount_point.clone();
		release.push("unmount grub scratch", move || mount::unmount(&runner, &target));
	}

	for pseudo in ["dev", "proc", "sys"] {
		let source = Path::new("/").join(pseudo);
		let target = mount_point.join(pseudo);
		std::fs::create_dir_all(&target).map_err(|source| KilnError::WorkspaceIo { path: target.clone(), source })?;
		mount::bind(&runner, &source, &target)?;
		release.push("unmount chroot pseudo-filesystem", move || mount::unmount(&runner, &target));
	}

	let result = (|| -> Result<()> {
		grub::update_config(&runner, &mount_point)?;
		Ok(())
	})();

	release.release_all()?;
	result
}

#[cfg(test)]
mod tests {
	use super::*;

	fn structure(name: &str, offset: u64, size: u64) -> VolumeStructure {
		VolumeStructure {
			name: name.to_owned(),
			role: StructureRole::None,
			structure_type: crate::model::gadget::StructureType::Bare,
			offset: Some(offset),
			offset_write: None,
			size: bytesize::ByteSize::b(size),
			filesystem: String::new(),
			label: String::new(),
			content: vec![],
		}
	}

	#[test]
	fn seeded_system_data_is_skipped_from_table() {
		let mut s = structure("writable", 0, 1024);
		s.role = StructureRole::SystemData;
		assert!(s.is_seeded_system_partition());
	}

	#[test]
	fn skip_from_table_exempts_seeded_system_partitions_only_when_seeded() {
		let mut s = structure("writable", 0, 1024);
		s.role = StructureRole::SystemData;
		assert!(!skip_from_table(false, &s));
		assert!(skip_from_table(true, &s));
	}

	#[test]
	fn skip_from_table_always_excludes_bare_and_mbr_role() {
		let mut bare = structure("mbr", 0, 440);
		bare.role = StructureRole::Mbr;
		assert!(skip_from_table(false, &bare));
		assert!(skip_from_table(true, &bare));
	}
}
