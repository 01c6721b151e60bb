//! `gpg` facade for trusting a PPA's signing key before apt touches it
//! (spec §4.E step 4): fetch the key into a scratch homedir, export it into
//! the PPA's own trusted-keyring file, then drop the homedir.

use std::path::Path;

use color_eyre::Result;
use tracing::info;

use crate::error::KilnError;
use crate::process::{command, ProcessRunner};

/// Import `fingerprint` from the Ubuntu keyserver and export it to
/// `chroot/etc/apt/trusted.gpg.d/<user>-ubuntu-<ppa>.gpg` — one keyring file
/// per PPA, so a second PPA's key doesn't clobber the first's.
///
/// # Errors
/// Propagates tool-failure/I/O errors.
pub fn trust_key(runner: &ProcessRunner, chroot: &Path, user: &str, ppa: &str, fingerprint: &str) -> Result<()> {
	let homedir = tempfile::tempdir().map_err(|source| KilnError::WorkspaceIo { path: std::env::temp_dir(), source })?;
	let homedir = homedir.path().display().to_string();

	runner.run(command("gpg", [
		"--homedir".to_owned(),
		homedir.clone(),
		"--keyserver".to_owned(),
		"hkp://keyserver.ubuntu.com:80".to_owned(),
		"--recv-keys".to_owned(),
		fingerprint.to_owned(),
	]))?;

	let keyring_dir = chroot.join("etc/apt/trusted.gpg.d");
	std::fs::create_dir_all(&keyring_dir).map_err(|source| KilnError::WorkspaceIo { path: keyring_dir.clone(), source })?;
	let keyring_path = keyring_dir.join(format!("{user}-ubuntu-{ppa}.gpg"));

	runner.run(command("gpg", [
		"--homedir".to_owned(),
		homedir,
		"--export".to_owned(),
		fingerprint.to_owned(),
		"--output".to_owned(),
		keyring_path.display().to_string(),
	]))?;

	info!(user, ppa, keyring = %keyring_path.display(), "PPA signing key trusted");
	Ok(())
}
