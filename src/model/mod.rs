//! Component C — Image-Definition Model & Defaulter.
//!
//! The serde derive style (kebab-case enums, `#[serde(default = "...")]`,
//! `Option<T>` for optional fields) is lifted straight from the teacher's
//! `cfg::manifest`, `cfg::auth` and `cfg::script` modules.

pub mod gadget;

use std::collections::BTreeSet;
use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

use crate::error::KilnError;

fn default_archive() -> String {
	"ubuntu".to_owned()
}

fn default_pocket() -> String {
	"release".to_owned()
}

fn default_components() -> Vec<String> {
	["main", "restricted", "universe", "multiverse"].map(String::from).to_vec()
}

fn default_mount_options() -> String {
	"defaults".to_owned()
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ImageClass {
	Preinstalled,
	Cloud,
	Installer,
}

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum GadgetSourceType {
	Git,
	Directory,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct GadgetSource {
	pub url: String,
	#[serde(rename = "type")]
	pub source_type: GadgetSourceType,
	#[serde(default)]
	pub branch: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Serialize, Default)]
pub struct SeedSpec {
	pub urls: Vec<String>,
	pub branch: String,
	pub names: Vec<String>,
	#[serde(default)]
	pub vcs: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct TarballSpec {
	pub url: String,
	#[serde(default)]
	pub sha256: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Serialize, Default)]
pub struct RootfsSpec {
	#[serde(default)]
	pub flavor: Option<String>,
	pub mirror: String,
	#[serde(default = "default_pocket")]
	pub pocket: String,
	#[serde(default = "default_components")]
	pub components: Vec<String>,
	#[serde(default = "default_archive")]
	pub archive: String,
	#[serde(default)]
	pub seed: Option<SeedSpec>,
	#[serde(default)]
	pub archive_tasks: Option<Vec<String>>,
	#[serde(default)]
	pub tarball: Option<TarballSpec>,
}

impl RootfsSpec {
	/// Which of the three mutually-exclusive rootfs sources is populated.
	#[must_use]
	pub fn source(&self) -> RootfsSource {
		match (&self.seed, &self.archive_tasks, &self.tarball) {
			(Some(_), None, None) => RootfsSource::Seed,
			(None, Some(_), None) => RootfsSource::ArchiveTasks,
			(None, None, Some(_)) => RootfsSource::Tarball,
			_ => RootfsSource::Invalid,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootfsSource {
	Seed,
	ArchiveTasks,
	Tarball,
	Invalid,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct PpaSpec {
	/// `user/ppa`
	pub name: String,
	#[serde(default)]
	pub auth: Option<String>,
	#[serde(default)]
	pub fingerprint: Option<String>,
}

impl PpaSpec {
	#[must_use]
	pub fn user_and_ppa(&self) -> Option<(&str, &str)> {
		self.name.split_once('/')
	}
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct SnapSpec {
	pub name: String,
	#[serde(default)]
	pub channel: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct CopyFile {
	pub source: String,
	pub dest: String,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct TouchFile {
	pub path: String,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct Execute {
	pub path: String,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct AddUser {
	pub username: String,
	#[serde(default)]
	pub uid: Option<u32>,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct AddGroup {
	pub groupname: String,
	#[serde(default)]
	pub gid: Option<u32>,
}

/// Manual customization operations, executed strictly in the order each list
/// appears (spec §4.E step 9): copy, then touch, then execute, then groups,
/// then users.
#[derive(Deserialize, Debug, Clone, Serialize, Default)]
pub struct ManualCustomization {
	#[serde(default, rename = "copy-file")]
	pub copy_file: Vec<CopyFile>,
	#[serde(default, rename = "touch-file")]
	pub touch_file: Vec<TouchFile>,
	#[serde(default)]
	pub execute: Vec<Execute>,
	#[serde(default, rename = "add-group")]
	pub add_group: Vec<AddGroup>,
	#[serde(default, rename = "add-user")]
	pub add_user: Vec<AddUser>,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct FstabEntry {
	pub label: String,
	pub mount: String,
	pub fstype: String,
	#[serde(default = "default_mount_options")]
	pub options: String,
	#[serde(default)]
	pub dump: bool,
	pub fsck_order: u8,
}

#[derive(Deserialize, Debug, Clone, Serialize, Default)]
pub struct CloudInitSpec {
	#[serde(default)]
	pub user_data: Option<String>,
	#[serde(default)]
	pub meta_data: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Serialize, Default)]
pub struct Customization {
	#[serde(default, rename = "extra-ppas")]
	pub extra_ppas: Vec<PpaSpec>,
	#[serde(default, rename = "extra-packages")]
	pub extra_packages: Vec<String>,
	#[serde(default, rename = "extra-snaps")]
	pub extra_snaps: Vec<SnapSpec>,
	#[serde(default)]
	pub manual: Option<ManualCustomization>,
	#[serde(default)]
	pub fstab: Vec<FstabEntry>,
	#[serde(default, rename = "cloud-init")]
	pub cloud_init: Option<CloudInitSpec>,
}

#[derive(Deserialize, Debug, Clone, Serialize)]
pub struct ImageDefinition {
	pub name: String,
	pub architecture: String,
	pub series: String,
	pub class: ImageClass,
	pub kernel: String,
	#[serde(default)]
	pub gadget: Option<GadgetSource>,
	pub rootfs: RootfsSpec,
	#[serde(default)]
	pub customization: Option<Customization>,
}

impl ImageDefinition {
	/// Parse + default + validate an image definition from a YAML document.
	///
	/// # Errors
	/// [`KilnError::SchemaError`] on malformed YAML, [`KilnError::DomainRule`]
	/// on a failed invariant (spec §4.C).
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path)
			.map_err(|e| eyre!(KilnError::SchemaError(format!("reading {}: {e}", path.display()))))?;
		Self::parse(&text)
	}

	pub fn parse(yaml: &str) -> Result<Self> {
		let def: Self = serde_yaml::from_str(yaml)
			.map_err(|e| eyre!(KilnError::SchemaError(e.to_string())))?;
		def.validate()?;
		Ok(def)
	}

	/// Walk the parsed definition and enforce the invariants spec §3/§4.C
	/// call out as required-or-domain rules. This stands in for the generic
	/// JSON-schema "required" walk: since our schema *is* the Rust type, any
	/// field that's `Option<T>` is optional by construction and everything
	/// else is already required by serde at parse time. What's left to check
	/// here are cross-field domain rules serde can't express.
	pub fn validate(&self) -> Result<()> {
		match self.rootfs.source() {
			RootfsSource::Invalid => {
				return Err(eyre!(KilnError::DomainRule {
					field: "rootfs".to_owned(),
					reason: "exactly one of seed, archive-tasks, or tarball must be set".to_owned(),
				}))
			},
			_ => {},
		}

		if let Some(customization) = &self.customization {
			for ppa in &customization.extra_ppas {
				if ppa.user_and_ppa().is_none() {
					return Err(eyre!(KilnError::DomainRule {
						field: format!("customization.extra-ppas[{}]", ppa.name),
						reason: "PPA name must match the pattern `user/ppa`".to_owned(),
					}));
				}
				if ppa.auth.is_some() && ppa.fingerprint.is_none() {
					return Err(eyre!(KilnError::DomainRule {
						field: format!("customization.extra-ppas[{}]", ppa.name),
						reason: "Fingerprint required for private PPAs".to_owned(),
					}));
				}
			}

			if let Some(manual) = &customization.manual {
				for path in manual
					.copy_file
					.iter()
					.map(|c| c.dest.as_str())
					.chain(manual.touch_file.iter().map(|t| t.path.as_str()))
					.chain(manual.execute.iter().map(|e| e.path.as_str()))
				{
					validate_sandboxed_absolute_path(path)?;
				}
			}
		}

		Ok(())
	}
}

/// Enforces "all `Manual.*` paths must be absolute and free of `..` segments"
/// (spec §3 invariant).
fn validate_sandboxed_absolute_path(path: &str) -> Result<()> {
	if !path.starts_with('/') {
		return Err(eyre!(KilnError::DomainRule {
			field: path.to_owned(),
			reason: "needs to be an absolute path".to_owned(),
		}));
	}
	if Path::new(path).components().any(|c| matches!(c, std::path::Component::ParentDir)) {
		return Err(eyre!(KilnError::DomainRule {
			field: path.to_owned(),
			reason: "path must not contain `..` segments".to_owned(),
		}));
	}
	Ok(())
}

/// Resolve a manual-customization destination path under `chroot`, rejecting
/// any attempt to escape it (defense in depth on top of [`validate`]).
pub fn resolve_in_chroot(chroot: &Path, absolute: &str) -> Result<std::path::PathBuf> {
	validate_sandboxed_absolute_path(absolute)?;
	Ok(chroot.join(absolute.trim_start_matches('/')))
}

/// Distinct steps a `Customization` can splice into the engine (spec §4.D:
/// "the mapping from a customization field to its step(s) is tag-driven on
/// the customization model so the table is authoritative").
#[must_use]
pub fn customization_steps(c: &Customization) -> BTreeSet<&'static str> {
	let mut steps = BTreeSet::new();
	if !c.extra_ppas.is_empty() {
		steps.insert("add_extra_ppas");
	}
	if !c.extra_packages.is_empty() {
		steps.insert("install_extra_packages");
	}
	if !c.extra_snaps.is_empty() {
		steps.insert("install_extra_snaps");
		steps.insert("preseed_extra_snaps");
	}
	if c.cloud_init.is_some() {
		steps.insert("customize_cloud_init");
	}
	if !c.fstab.is_empty() {
		steps.insert("customize_fstab");
	}
	if c.manual.is_some() {
		steps.insert("perform_manual_customization");
	}
	steps
}

#[cfg(test)]
mod tests {
	use super::*;

	fn minimal_yaml(source: &str) -> String {
		format!(
			r"
name: test-image
architecture: amd64
series: jammy
class: preinstalled
kernel: linux-generic
rootfs:
  mirror: http://archive.ubuntu.com/ubuntu
{source}
"
		)
	}

	#[test]
	fn defaults_archive_and_pocket() {
		let yaml = minimal_yaml("  seed:\n    urls: [\"https://example\"]\n    branch: jammy\n    names: [server]\n");
		let def = ImageDefinition::parse(&yaml).unwrap();
		assert_eq!(def.rootfs.archive, "ubuntu");
		assert_eq!(def.rootfs.pocket, "release");
		assert_eq!(def.rootfs.components, default_components());
	}

	#[test]
	fn parse_then_default_is_idempotent() {
		let yaml = minimal_yaml("  seed:\n    urls: [\"https://example\"]\n    branch: jammy\n    names: [server]\n");
		let once = ImageDefinition::parse(&yaml).unwrap();
		let reserialized = serde_yaml::to_string(&once).unwrap();
		let twice = ImageDefinition::parse(&reserialized).unwrap();
		assert_eq!(once.rootfs.archive, twice.rootfs.archive);
		assert_eq!(once.rootfs.pocket, twice.rootfs.pocket);
		assert_eq!(once.rootfs.components, twice.rootfs.components);
	}

	#[test]
	fn rejects_multiple_rootfs_sources() {
		let yaml = minimal_yaml(
			"  seed:\n    urls: [\"https://example\"]\n    branch: jammy\n    names: [server]\n  archive-tasks: [minimal]\n",
		);
		assert!(ImageDefinition::parse(&yaml).is_err());
	}

	#[test]
	fn rejects_no_rootfs_source() {
		let yaml = minimal_yaml("");
		assert!(ImageDefinition::parse(&yaml).is_err());
	}

	#[test]
	fn private_ppa_without_fingerprint_is_rejected_before_any_network_call() {
		let mut yaml = minimal_yaml("  seed:\n    urls: [\"https://example\"]\n    branch: jammy\n    names: [server]\n");
		yaml.push_str(
			"customization:\n  extra-ppas:\n    - name: someuser/someppa\n      auth: \"user:pass\"\n",
		);
		let err = ImageDefinition::parse(&yaml).unwrap_err();
		assert!(format!("{err}").contains("Fingerprint"));
	}

	#[test]
	fn manual_paths_must_be_absolute() {
		let mut yaml = minimal_yaml("  seed:\n    urls: [\"https://example\"]\n    branch: jammy\n    names: [server]\n");
		yaml.push_str("customization:\n  manual:\n    touch-file:\n      - path: \"relative/path\"\n");
		let err = ImageDefinition::parse(&yaml).unwrap_err();
		assert!(format!("{err}").contains("absolute path"));
	}

	#[test]
	fn manual_paths_reject_dotdot_segments() {
		let mut yaml = minimal_yaml("  seed:\n    urls: [\"https://example\"]\n    branch: jammy\n    names: [server]\n");
		yaml.push_str("customization:\n  manual:\n    touch-file:\n      - path: \"/etc/../root/.ssh\"\n");
		assert!(ImageDefinition::parse(&yaml).is_err());
	}

	#[test]
	fn customization_steps_are_tag_driven() {
		let c = Customization {
			extra_packages: vec!["vim".to_owned()],
			fstab: vec![],
			..Default::default()
		};
		let steps = customization_steps(&c);
		assert!(steps.contains("install_extra_packages"));
		assert!(!steps.contains("customize_fstab"));
	}
}
