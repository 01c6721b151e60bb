//! `germinate` facade — resolves a seed list to a flat package list (spec
//! §4.E step 1, `germinate`). Grounded in the teacher's `dnf` root builder
//! shelling out to a package-resolution tool and parsing its plain-text
//! output (`cfg/manifest.rs`'s `DnfRootBuilder`).

use std::path::Path;

use color_eyre::{eyre::eyre, Result};

use crate::error::KilnError;
use crate::model::SeedSpec;
use crate::process::{command_in, ProcessRunner};

/// Run germinate against `seed` in `scratch/germinate` and return the
/// deduplicated package list it resolved, read back from its
/// `<seed-name>.seed.depends`-style output.
///
/// # Errors
/// [`KilnError::ToolFailure`] on a non-zero germinate exit, or
/// [`KilnError::ContentMissing`] if the expected output file is absent.
pub fn resolve(
	runner: &ProcessRunner,
	scratch: &Path,
	arch: &str,
	series: &str,
	mirror: &str,
	components: &[String],
	flavor: Option<&str>,
	seed: &SeedSpec,
) -> Result<Vec<String>> {
	let germinate_dir = scratch.join("germinate");
	std::fs::create_dir_all(&germinate_dir).map_err(|source| KilnError::WorkspaceIo { path: germinate_dir.clone(), source })?;

	let mut args = vec![
		format!("--mirror={mirror}"),
		format!("--arch={arch}"),
		format!("--dist={series}"),
		format!("--seed-source={}", seed.urls.join(",")),
		format!("--seed-dist={}", seed_dist(flavor, &seed.branch)),
		"--no-rdepends".to_owned(),
	];
	if let Some(vcs) = &seed.vcs {
		args.push(format!("--vcs={vcs}"));
	}
	if !components.is_empty() {
		args.push(format!("--components={}", components.join(",")));
	}
	args.extend(seed.names.iter().cloned());
	runner.run(command_in("germinate", &germinate_dir, args))?;

	let mut packages = Vec::new();
	for name in &seed.names {
		let path = germinate_dir.join(format!("{name}.seed"));
		let text = std::fs::read_to_string(&path)
			.map_err(|_| eyre!(KilnError::ContentMissing(path.display().to_string())))?;
		packages.extend(
			text.lines()
				.filter(|l| !l.starts_with('#') && !l.trim().is_empty())
				.map(|l| l.split_whitespace().next().unwrap_or(l).to_owned()),
		);
	}
	packages.sort();
	packages.dedup();
	Ok(packages)
}

/// `--seed-dist F[.Branch]` — dot the flavor onto the branch when the
/// manifest names one, otherwise fall back to the bare branch.
fn seed_dist(flavor: Option<&str>, branch: &str) -> String {
	flavor.map_or_else(|| branch.to_owned(), |flavor| format!("{flavor}.{branch}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seed_dist_dots_flavor_onto_branch() {
		assert_eq!(seed_dist(Some("ubuntu"), "jammy"), "ubuntu.jammy");
	}

	#[test]
	fn seed_dist_falls_back_to_bare_branch_without_a_flavor() {
		assert_eq!(seed_dist(None, "jammy"), "jammy");
	}
}
