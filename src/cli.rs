//! Component CLI — spec §6. Grounded in the teacher's `KatsuCli` derive
//! struct (`main.rs`), split into the two image classes the spec's
//! `Classic`/`Snap` builder distinction names explicitly, each sharing the
//! staged-execution flags (`--until`/`--thru`/`--resume`/`--workdir`).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// A staged, resumable bootable-image assembly pipeline.
#[derive(Debug, Parser)]
#[command(name = "kiln", version, about)]
pub struct KilnCli {
	#[command(subcommand)]
	pub command: KilnCommand,
}

#[derive(Debug, Subcommand)]
pub enum KilnCommand {
	/// Build a classic (debootstrap-based) image from a manifest.
	Classic(ClassicArgs),
	/// Build a snap/preinstalled image, optionally seeding extra snaps.
	Snap(SnapArgs),
}

/// Flags shared by every build invocation (spec §4.D `Setup`).
#[derive(Debug, Args, Clone)]
pub struct CommonArgs {
	/// Reuse (or create) this directory for staging instead of a temp dir.
	#[arg(long, env = "KILN_WORKDIR")]
	pub workdir: Option<PathBuf>,

	/// Directory the finished image and manifests are written to.
	#[arg(long, default_value = ".")]
	pub output_dir: PathBuf,

	/// Stop before running the named step.
	#[arg(long, conflicts_with = "thru")]
	pub until: Option<String>,

	/// Stop after running the named step, inclusive.
	#[arg(long, conflicts_with = "until")]
	pub thru: Option<String>,

	/// Resume a previous build from its checkpoint. Requires `--workdir`.
	#[arg(long)]
	pub resume: bool,

	#[arg(long, conflicts_with_all = ["verbose", "quiet"])]
	pub debug: bool,

	#[arg(short, long, conflicts_with_all = ["debug", "quiet"])]
	pub verbose: bool,

	#[arg(short, long, conflicts_with_all = ["debug", "verbose"])]
	pub quiet: bool,

	#[arg(long, default_value_t = 512)]
	pub sector_size: u32,
}

#[derive(Debug, Args)]
pub struct ClassicArgs {
	#[command(flatten)]
	pub common: CommonArgs,

	/// Path to the image-definition manifest (spec §3 `ImageDefinition`).
	pub manifest: PathBuf,
}

#[derive(Debug, Args)]
pub struct SnapArgs {
	#[command(flatten)]
	pub common: CommonArgs,

	/// Path to the image-definition manifest (spec §3 `ImageDefinition`).
	pub manifest: PathBuf,

	/// Extra snap to seed, `name` or `name=channel`. Repeatable; merged into
	/// `customization.extra-snaps` at runtime.
	#[arg(long = "snap")]
	pub snaps: Vec<String>,
}

/// Parse a `--snap name=channel` flag into a [`crate::model::SnapSpec`].
#[must_use]
pub fn parse_snap_flag(raw: &str) -> crate::model::SnapSpec {
	match raw.split_once('=') {
		Some((name, channel)) => crate::model::SnapSpec { name: name.to_owned(), channel: Some(channel.to_owned()) },
		None => crate::model::SnapSpec { name: raw.to_owned(), channel: None },
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn snap_flag_without_channel_defaults_to_none() {
		let spec = parse_snap_flag("lxd");
		assert_eq!(spec.name, "lxd");
		assert_eq!(spec.channel, None);
	}

	#[test]
	fn snap_flag_with_channel_splits_on_equals() {
		let spec = parse_snap_flag("core22=latest/edge");
		assert_eq!(spec.name, "core22");
		assert_eq!(spec.channel.as_deref(), Some("latest/edge"));
	}
}
