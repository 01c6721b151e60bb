//! Network-fetch facade for signing-key lookups — a narrow [`HttpGetter`]
//! trait so `add_extra_ppas` can be exercised against a fake in tests instead
//! of hitting the Launchpad API, the same seam the teacher uses for
//! [`crate::rootfs::snaps::SnapSeeder`].

use color_eyre::Result;

use crate::process::{command, ProcessRunner};

/// Fetches a URL and returns its body as text.
pub trait HttpGetter {
	/// # Errors
	/// Implementation-defined; the production implementation propagates
	/// [`crate::error::KilnError::ToolFailure`].
	fn get(&self, url: &str) -> Result<String>;
}

/// `curl -fsSL <url>` shelled out through [`ProcessRunner`] — no HTTP client
/// crate is added to the dependency stack for this, matching the way
/// `rootfs::chroot::extract_rootfs_tar` already shells out to `curl`.
pub struct CliHttpGetter<'a> {
	pub runner: &'a ProcessRunner,
}

impl HttpGetter for CliHttpGetter<'_> {
	fn get(&self, url: &str) -> Result<String> {
		self.runner.run_stdout(command("curl", ["-fsSL".to_owned(), url.to_owned()]))
	}
}
