//! `ubuntu-distro-info`/`rmadison`/`dpkg` facade — series validation and
//! installed-package enumeration for the package manifest (spec §4.G
//! `generate_package_manifest`).

use std::path::Path;

use color_eyre::Result;

use crate::process::{command, ProcessRunner};

/// `ubuntu-distro-info --series <series> --codename`; succeeds only for a
/// series `ubuntu-distro-info` recognizes.
///
/// # Errors
/// [`crate::error::KilnError::ToolFailure`] if the series is unknown.
pub fn validate_series(runner: &ProcessRunner, series: &str) -> Result<()> {
	runner.run(command("ubuntu-distro-info", ["--series", series, "--codename"]))?;
	Ok(())
}

/// `rmadison -s <series> <package>`, used to confirm a package is actually
/// published for the target series before germinate resolves it.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn madison(runner: &ProcessRunner, series: &str, package: &str) -> Result<String> {
	runner.run_stdout(command("rmadison", ["-s", series, package]))
}

/// `dpkg --root=<root> -l`, parsed into `(name, version)` pairs for the
/// package manifest.
///
/// # Errors
/// Propagates tool-failure errors.
pub fn installed_packages(runner: &ProcessRunner, root: &Path) -> Result<Vec<(String, String)>> {
	let out = runner.run(command("dpkg", [format!("--root={}", root.display()), "-l".to_owned()]))?;
	Ok(out
		.lines()
		.filter(|l| l.starts_with("ii"))
		.filter_map(|l| {
			let mut fields = l.split_whitespace();
			fields.next()?;
			let name = fields.next()?.to_owned();
			let version = fields.next()?.to_owned();
			Some((name, version))
		})
		.collect())
}
