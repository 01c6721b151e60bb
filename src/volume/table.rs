//! Partition-table geometry checks (spec §4.F `make_disk`): reserved-region
//! overlap rejection and `offset-write` pointer resolution. Grounded in the
//! teacher's `PartitionLayout::sort_partitions`/`apply` (`cfg/partition.rs`),
//! generalized from "MBR+GPT always in that fixed layout" to the spec's
//! arbitrary offset/size structure list.

use std::collections::BTreeMap;

use color_eyre::{eyre::eyre, Result};

use crate::error::KilnError;
use crate::model::gadget::{OffsetWrite, VolumeStructure};

/// Reject any two table-visible structures (i.e. not `bare`/`mbr`-role,
/// see [`VolumeStructure::excluded_from_table`]) whose `[offset, offset+size)`
/// ranges overlap.
///
/// # Errors
/// [`KilnError::GeometryViolation`] naming both overlapping structures.
pub fn check_no_overlaps(structures: &[&VolumeStructure]) -> Result<()> {
	let mut table_entries: Vec<&VolumeStructure> = structures.iter().copied().filter(|s| !s.excluded_from_table()).collect();
	table_entries.sort_by_key(|s| s.offset.unwrap_or(0));

	for pair in table_entries.windows(2) {
		let [a, b] = pair else { unreachable!() };
		let a_end = a.offset.unwrap_or(0) + a.size.as_u64();
		let b_start = b.offset.unwrap_or(0);
		if b_start < a_end {
			return Err(eyre!(KilnError::GeometryViolation {
				structure: b.name.clone(),
				reason: format!("overlaps `{}` (ends at {a_end}, `{}` starts at {b_start})", a.name, b.name),
			}));
		}
	}
	Ok(())
}

/// Reject any GPT structure (other than a `role=mbr` structure, which is
/// expected to sit in the protective MBR at offset 0) overlapping the GPT
/// header/partition-entry reserved region: the first 34 LBAs for a 512-byte
/// sector size, or the first 6 LBAs for a 4096-byte sector size.
///
/// # Errors
/// [`KilnError::GeometryViolation`] naming the offending structure.
pub fn check_gpt_reserved_region(structures: &[&VolumeStructure], sector_size: u64) -> Result<()> {
	let reserved_end = if sector_size >= 4096 { sector_size * 6 } else { sector_size * 34 };
	for s in structures {
		if s.role == crate::model::gadget::StructureRole::Mbr {
			continue;
		}
		let start = s.offset.unwrap_or(0);
		let end = start + s.size.as_u64();
		if start < reserved_end && end > sector_size {
			return Err(eyre!(KilnError::GeometryViolation {
				structure: s.name.clone(),
				reason: format!("overlaps the GPT reserved region (0..{reserved_end})"),
			}));
		}
	}
	Ok(())
}

/// Resolve an `offset-write` pointer to an absolute byte offset on disk:
/// relative to another named structure's start, or to the start of the disk
/// if `relative-to` is unset.
///
/// # Errors
/// [`KilnError::ContentMissing`] if `relative-to` names a structure that
/// doesn't exist in `starts`.
pub fn resolve_offset_write(ow: &OffsetWrite, starts: &BTreeMap<String, u64>) -> Result<u64> {
	let base = match &ow.relative_to {
		Some(name) => *starts
			.get(name)
			.ok_or_else(|| eyre!(KilnError::ContentMissing(format!("offset-write relative-to `{name}`"))))?,
		None => 0,
	};
	Ok(base + ow.offset)
}

#[cfg(test)]
mod tests {
	use bytesize::ByteSize;

	use super::*;
	use crate::model::gadget::{StructureRole, StructureType};

	fn structure(name: &str, offset: u64, size: u64) -> VolumeStructure {
		VolumeStructure {
			name: name.to_owned(),
			role: StructureRole::None,
			structure_type: StructureType::Bare,
			offset: Some(offset),
			offset_write: None,
			size: ByteSize::b(size),
			filesystem: String::new(),
			label: String::new(),
			content: vec![],
		}
	}

	fn with_type(mut s: VolumeStructure, ty: StructureType) -> VolumeStructure {
		s.structure_type = ty;
		s
	}

	#[test]
	fn rejects_overlapping_table_entries() {
		let a = with_type(structure("a", 0, 1024), StructureType::Guid("A".into()));
		let b = with_type(structure("b", 512, 1024), StructureType::Guid("B".into()));
		assert!(check_no_overlaps(&[&a, &b]).is_err());
	}

	#[test]
	fn allows_bare_regions_to_overlap_table_entries() {
		let mbr = structure("mbr", 0, 440);
		let efi = with_type(structure("efi", 1024, 1024), StructureType::Guid("E".into()));
		assert!(check_no_overlaps(&[&mbr, &efi]).is_ok());
	}

	#[test]
	fn rejects_structure_overlapping_gpt_reserved_region() {
		let efi = with_type(structure("efi", 4096, 1024 * 1024), StructureType::Guid("E".into()));
		assert!(check_gpt_reserved_region(&[&efi], 512).is_err());
	}

	#[test]
	fn allows_mbr_role_structure_in_gpt_reserved_region() {
		let mut mbr = structure("mbr", 0, 440);
		mbr.role = StructureRole::Mbr;
		assert!(check_gpt_reserved_region(&[&mbr], 512).is_ok());
	}

	#[test]
	fn allows_structure_starting_after_reserved_region() {
		let efi = with_type(structure("efi", 512 * 34, 1024 * 1024), StructureType::Guid("E".into()));
		assert!(check_gpt_reserved_region(&[&efi], 512).is_ok());
	}

	#[test]
	fn resolves_offset_write_relative_to_named_structure() {
		let mut starts = BTreeMap::new();
		starts.insert("mbr".to_owned(), 0u64);
		let ow = OffsetWrite { relative_to: Some("mbr".to_owned()), offset: 92 };
		assert_eq!(resolve_offset_write(&ow, &starts).unwrap(), 92);
	}

	#[test]
	fn resolves_offset_write_relative_to_disk_start_when_unset() {
		let ow = OffsetWrite { relative_to: None, offset: 440 };
		assert_eq!(resolve_offset_write(&ow, &BTreeMap::new()).unwrap(), 440);
	}
}
