//! Component A — Workspace & Staging Store.
//!
//! Grounded in `KatsuBuilder::build` (teacher `builder.rs`), which creates
//! `katsu-work/{chroot,image}` and threads them through the build. Here that
//! idea is generalized into a reusable type that owns every staging
//! subdirectory the engine needs (`unpack`, `chroot`, `scratch`, `rootfs`,
//! `volumes`) plus the resumable metadata file.

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use crate::error::KilnError;

const SUBDIRS: &[&str] = &["unpack", "chroot", "scratch", "rootfs", "volumes"];
const METADATA_FILE: &str = "kiln-state.json";

/// Owns the working directory, its per-stage subdirectories, the metadata
/// file, and the teardown policy.
#[derive(Debug)]
pub struct Workspace {
	root: PathBuf,
	/// `None` when the user passed `--workdir`: we never delete their directory.
	owned_tempdir: Option<tempfile::TempDir>,
}

impl Workspace {
	/// Initialise the workspace. If `workdir` is `None`, create a temporary
	/// one flagged for removal on teardown.
	///
	/// # Errors
	/// Returns [`KilnError::WorkspaceIo`] if the directory can't be created.
	pub fn init(workdir: Option<PathBuf>) -> Result<Self> {
		let (root, owned_tempdir) = match workdir {
			Some(dir) => {
				fs::create_dir_all(&dir)
					.map_err(|source| KilnError::WorkspaceIo { path: dir.clone(), source })?;
				(dir.canonicalize().unwrap_or(dir), None)
			},
			None => {
				let tmp = tempfile::Builder::new()
					.prefix("kiln-")
					.tempdir()
					.map_err(|source| KilnError::WorkspaceIo { path: PathBuf::from("<tmp>"), source })?;
				let root = tmp.path().to_path_buf();
				(root, Some(tmp))
			},
		};
		debug!(?root, user_supplied = owned_tempdir.is_none(), "workspace initialised");
		for name in SUBDIRS {
			fs::create_dir_all(root.join(name))
				.map_err(|source| KilnError::WorkspaceIo { path: root.join(name), source })?;
		}
		Ok(Self { root, owned_tempdir })
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Lazily create and return a named subdirectory.
	///
	/// Concurrent/repeat creation is tolerated: an already-existing directory
	/// is not an error (spec invariant).
	///
	/// # Errors
	/// Returns [`KilnError::WorkspaceIo`] if the directory cannot be created.
	pub fn sub_dir(&self, name: &str) -> Result<PathBuf> {
		let dir = self.root.join(name);
		fs::create_dir_all(&dir).map_err(|source| KilnError::WorkspaceIo { path: dir.clone(), source })?;
		Ok(dir)
	}

	#[must_use]
	pub fn metadata_path(&self) -> PathBuf {
		self.root.join(METADATA_FILE)
	}

	/// Atomically persist `state` (write-then-rename, spec §5).
	///
	/// # Errors
	/// Propagates serialization or I/O failures.
	pub fn save_metadata<T: Serialize>(&self, state: &T) -> Result<()> {
		let path = self.metadata_path();
		let tmp = path.with_extension("json.tmp");
		let json = serde_json::to_vec_pretty(state)?;
		fs::write(&tmp, json).map_err(|source| KilnError::WorkspaceIo { path: tmp.clone(), source })?;
		fs::rename(&tmp, &path).map_err(|source| KilnError::WorkspaceIo { path, source })?;
		trace!("metadata checkpoint written");
		Ok(())
	}

	/// Load a previously persisted state.
	///
	/// # Errors
	/// Returns an error if the metadata file doesn't exist or fails to parse.
	pub fn load_metadata<T: DeserializeOwned>(&self) -> Result<T> {
		let path = self.metadata_path();
		let data = fs::read(&path).map_err(|source| KilnError::WorkspaceIo { path: path.clone(), source })?;
		serde_json::from_slice(&data)
			.map_err(|e| eyre!(KilnError::SchemaError(format!("corrupt metadata at {}: {e}", path.display()))))
	}

	/// Remove the workspace, honouring the removal flag: a user-supplied
	/// `--workdir` is left intact (so `--resume` or forensic inspection still
	/// works), a temp dir created by us is deleted.
	pub fn teardown(self) {
		if let Some(tmp) = self.owned_tempdir {
			debug!(root = ?self.root, "tearing down owned workspace");
			let _ = tmp.close();
		} else {
			debug!(root = ?self.root, "leaving user-supplied workspace intact");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn creates_fixed_subdirectories() {
		let ws = Workspace::init(None).unwrap();
		for name in SUBDIRS {
			assert!(ws.root().join(name).is_dir());
		}
	}

	#[test]
	fn metadata_roundtrips() {
		let ws = Workspace::init(None).unwrap();
		ws.save_metadata(&vec!["populate_rootfs_contents".to_owned()]).unwrap();
		let loaded: Vec<String> = ws.load_metadata().unwrap();
		assert_eq!(loaded, vec!["populate_rootfs_contents".to_owned()]);
	}

	#[test]
	fn existing_subdir_is_not_an_error() {
		let ws = Workspace::init(None).unwrap();
		assert!(ws.sub_dir("chroot").is_ok());
		assert!(ws.sub_dir("chroot").is_ok());
	}

	#[test]
	fn user_supplied_workdir_survives_teardown() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().to_path_buf();
		let ws = Workspace::init(Some(path.clone())).unwrap();
		ws.teardown();
		assert!(path.exists());
	}
}
