//! `debootstrap` facade — the one tool allowed to materialize a bare chroot
//! from an archive mirror (spec §4.E step 2 `create_chroot`).

use std::path::Path;

use color_eyre::Result;

use crate::process::{command, ProcessRunner};

/// Bootstrap `series` from `mirror` into `target`, restricted to `components`,
/// always as a `minbase` variant. `include_ca_certificates` pulls in
/// `ca-certificates` up front, needed whenever a PPA's archive is reached
/// over HTTPS (spec §4.E step 3).
///
/// # Errors
/// Propagates [`crate::error::KilnError::ToolFailure`] on a non-zero exit.
pub fn bootstrap(
	runner: &ProcessRunner,
	arch: &str,
	series: &str,
	mirror: &str,
	components: &[String],
	include_ca_certificates: bool,
	target: &Path,
) -> Result<()> {
	let mut args = vec![format!("--arch={arch}"), "--variant=minbase".to_owned()];
	if include_ca_certificates {
		args.push("--include=ca-certificates".to_owned());
	}
	if !components.is_empty() {
		args.push(format!("--components={}", components.join(",")));
	}
	args.push(series.to_owned());
	args.push(target.display().to_string());
	args.push(mirror.to_owned());
	runner.run(command("debootstrap", args))?;
	Ok(())
}
