//! Gadget metadata: volumes keyed by name, each with an ordered list of
//! structures (spec §3, `GadgetInfo`/`Volume`/`VolumeStructure`).
//!
//! `PartitionType`/`PartitionFlag` in the teacher's `cfg::partition` are the
//! direct ancestor of [`StructureType`] here, generalized from "always a GPT
//! discoverable-partition GUID" to the spec's MBR-hex/GPT-GUID/bare/hybrid
//! union.

use std::fmt;

use bytesize::ByteSize;
use color_eyre::{eyre::eyre, Result};
use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::error::KilnError;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Schema {
	Gpt,
	Mbr,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Bootloader {
	Grub,
	#[serde(rename = "u-boot")]
	UBoot,
	Piboot,
	Lk,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub enum StructureRole {
	#[default]
	None,
	Mbr,
	SystemBoot,
	SystemData,
	SystemSeed,
	SystemSave,
}

impl<'de> Deserialize<'de> for StructureRole {
	fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
		let s = String::deserialize(d)?;
		Ok(match s.as_str() {
			"" => Self::None,
			"mbr" => Self::Mbr,
			"system-boot" => Self::SystemBoot,
			"system-data" => Self::SystemData,
			"system-seed" => Self::SystemSeed,
			"system-save" => Self::SystemSave,
			other => return Err(de::Error::custom(format!("unknown structure role `{other}`"))),
		})
	}
}

impl Serialize for StructureRole {
	fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
		s.serialize_str(match self {
			Self::None => "",
			Self::Mbr => "mbr",
			Self::SystemBoot => "system-boot",
			Self::SystemData => "system-data",
			Self::SystemSeed => "system-seed",
			Self::SystemSave => "system-save",
		})
	}
}

/// A structure's partition-type designator: an MBR hex byte, a GPT GUID, the
/// literal `bare` (no partition-table entry at all), or a hybrid `"a,b"` pair
/// (`a` used on MBR, `b` used on GPT).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureType {
	Bare,
	MbrHex(u8),
	Guid(String),
	Hybrid { mbr: u8, gpt: String },
}

impl StructureType {
	/// # Errors
	/// Fails if `schema` requires a representation this structure type
	/// doesn't carry (e.g. an MBR-only hex byte inside a GPT volume).
	pub fn for_schema(&self, schema: &Schema) -> Result<PartitionTypeTag> {
		match (self, schema) {
			(Self::Bare, _) => Ok(PartitionTypeTag::None),
			(Self::MbrHex(b), Schema::Mbr) => Ok(PartitionTypeTag::MbrHex(*b)),
			(Self::Guid(g), Schema::Gpt) => Ok(PartitionTypeTag::Guid(g.clone())),
			(Self::Hybrid { mbr, .. }, Schema::Mbr) => Ok(PartitionTypeTag::MbrHex(*mbr)),
			(Self::Hybrid { gpt, .. }, Schema::Gpt) => Ok(PartitionTypeTag::Guid(gpt.clone())),
			(Self::MbrHex(_), Schema::Gpt) | (Self::Guid(_), Schema::Mbr) => {
				Err(eyre!(KilnError::GeometryViolation {
					structure: "<structure>".to_owned(),
					reason: format!("type {self:?} is not valid for schema {schema:?}"),
				}))
			},
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionTypeTag {
	None,
	MbrHex(u8),
	Guid(String),
}

fn parse_hex_byte(s: &str) -> Option<u8> {
	u8::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

impl<'de> Deserialize<'de> for StructureType {
	fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
		let s = String::deserialize(d)?;
		if s == "bare" {
			return Ok(Self::Bare);
		}
		if let Some((a, b)) = s.split_once(',') {
			let mbr = parse_hex_byte(a)
				.ok_or_else(|| de::Error::custom(format!("invalid MBR hex type `{a}` in hybrid `{s}`")))?;
			return Ok(Self::Hybrid { mbr, gpt: b.to_owned() });
		}
		// Two hex digits with no GUID dashes => MBR byte; otherwise treat as a GUID.
		if s.len() == 2 && !s.contains('-') {
			if let Some(b) = parse_hex_byte(&s) {
				return Ok(Self::MbrHex(b));
			}
		}
		Ok(Self::Guid(s))
	}
}

impl Serialize for StructureType {
	fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
		let rendered = match self {
			Self::Bare => "bare".to_owned(),
			Self::MbrHex(b) => format!("{b:02X}"),
			Self::Guid(g) => g.clone(),
			Self::Hybrid { mbr, gpt } => format!("{mbr:02X},{gpt}"),
		};
		s.serialize_str(&rendered)
	}
}

impl fmt::Display for StructureType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bare => write!(f, "bare"),
			Self::MbrHex(b) => write!(f, "{b:02X}"),
			Self::Guid(g) => write!(f, "{g}"),
			Self::Hybrid { mbr, gpt } => write!(f, "{mbr:02X},{gpt}"),
		}
	}
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct OffsetWrite {
	#[serde(default)]
	pub relative_to: Option<String>,
	pub offset: u64,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct Content {
	/// Raw-content form: a whole image file dropped at `offset`.
	#[serde(default)]
	pub image: Option<String>,
	/// Filesystem-content form: a source tree entry copied to `target`.
	#[serde(default)]
	pub source: Option<String>,
	#[serde(default)]
	pub target: Option<String>,
	#[serde(default)]
	pub offset: Option<u64>,
	#[serde(default)]
	pub size: Option<ByteSize>,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct VolumeStructure {
	pub name: String,
	#[serde(default)]
	pub role: StructureRole,
	#[serde(rename = "type")]
	pub structure_type: StructureType,
	#[serde(default)]
	pub offset: Option<u64>,
	#[serde(default)]
	pub offset_write: Option<OffsetWrite>,
	pub size: ByteSize,
	#[serde(default)]
	pub filesystem: String,
	#[serde(default)]
	pub label: String,
	#[serde(default)]
	pub content: Vec<Content>,
}

impl VolumeStructure {
	#[must_use]
	pub fn is_raw(&self) -> bool {
		self.filesystem.is_empty()
	}

	#[must_use]
	pub fn is_seeded_system_partition(&self) -> bool {
		matches!(
			self.role,
			StructureRole::SystemBoot
				| StructureRole::SystemData
				| StructureRole::SystemSave
				| StructureRole::SystemSeed
		) || self.label == "system-boot"
	}

	#[must_use]
	pub fn excluded_from_table(&self) -> bool {
		matches!(self.role, StructureRole::Mbr) || matches!(self.structure_type, StructureType::Bare)
	}
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct Volume {
	pub schema: Schema,
	pub bootloader: Bootloader,
	#[serde(default)]
	pub structure: Vec<VolumeStructure>,
}

impl Volume {
	/// Structures in ascending-offset order (spec invariant: "structures are
	/// ordered by offset").
	#[must_use]
	pub fn ordered_structures(&self) -> Vec<&VolumeStructure> {
		let mut v: Vec<&VolumeStructure> = self.structure.iter().collect();
		v.sort_by_key(|s| s.offset.unwrap_or(0));
		v
	}

	/// Sum of every structure's declared size — the precondition for
	/// `make_disk` (spec §4.F "calculateImageSize").
	#[must_use]
	pub fn calculate_image_size(&self) -> u64 {
		self.structure.iter().map(|s| s.size.as_u64()).sum()
	}
}

/// Volumes in declaration order, matching the teacher's `IndexMap`-based
/// priority+needs script DAG (`builder.rs`): gadget.yaml's first volume is
/// the one `update_grub` and friends treat as primary, so insertion order
/// (not lexical order) has to survive parsing.
#[derive(Deserialize, Debug, Clone, Serialize, Default)]
pub struct GadgetInfo {
	#[serde(flatten)]
	pub volumes: IndexMap<String, Volume>,
}

impl GadgetInfo {
	/// # Errors
	/// [`KilnError::SchemaError`] on malformed YAML.
	pub fn parse(yaml: &str) -> Result<Self> {
		serde_yaml::from_str(yaml).map_err(|e| eyre!(KilnError::SchemaError(e.to_string())))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = r"
pc:
  schema: gpt
  bootloader: grub
  structure:
    - name: mbr
      role: mbr
      type: mbr
      size: 440
      offset: 0
    - name: bios-boot
      type: '21686148-6449-6E6F-744E-656564454649'
      size: 1048576
      offset: 1048576
    - name: efi
      role: system-boot
      type: 'C12A7328-F81F-11D2-BA4B-00A0C93EC93B'
      filesystem: vfat
      label: system-boot
      size: 536870912
      offset: 2097152
";

	#[test]
	fn parses_and_orders_by_offset() {
		let gi = GadgetInfo::parse(SAMPLE).unwrap();
		let pc = &gi.volumes["pc"];
		let ordered = pc.ordered_structures();
		assert_eq!(ordered[0].name, "mbr");
		assert_eq!(ordered[1].name, "bios-boot");
		assert_eq!(ordered[2].name, "efi");
	}

	#[test]
	fn mbr_role_is_excluded_from_table() {
		let gi = GadgetInfo::parse(SAMPLE).unwrap();
		let mbr = &gi.volumes["pc"].structure[0];
		assert!(mbr.excluded_from_table());
	}

	#[test]
	fn hybrid_type_splits_by_schema() {
		let hybrid = StructureType::Hybrid { mbr: 0x83, gpt: "0FC63DAF-8483-4772-8E79-3D69D8477DE4".to_owned() };
		assert_eq!(hybrid.for_schema(&Schema::Mbr).unwrap(), PartitionTypeTag::MbrHex(0x83));
		assert_eq!(
			hybrid.for_schema(&Schema::Gpt).unwrap(),
			PartitionTypeTag::Guid("0FC63DAF-8483-4772-8E79-3D69D8477DE4".to_owned())
		);
	}

	#[test]
	fn hybrid_parses_from_combined_string() {
		let ty: StructureType = serde_yaml::from_str("\"83,0FC63DAF-8483-4772-8E79-3D69D8477DE4\"").unwrap();
		assert_eq!(ty, StructureType::Hybrid { mbr: 0x83, gpt: "0FC63DAF-8483-4772-8E79-3D69D8477DE4".to_owned() });
	}

	#[test]
	fn calculate_image_size_sums_structures() {
		let gi = GadgetInfo::parse(SAMPLE).unwrap();
		assert_eq!(gi.volumes["pc"].calculate_image_size(), 440 + 1_048_576 + 536_870_912);
	}
}
