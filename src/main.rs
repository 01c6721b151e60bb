//! Entry point — wiring mirrors the teacher's `main.rs`: `dotenvy` for local
//! `.env` overrides, a `tracing-subscriber` `EnvFilter` driven by an
//! app-specific env var (`KATSU_LOG` there, `KILN_LOG` here), a `sudo`
//! escalation check before any privileged chroot/loop-device work, then
//! `clap`-driven dispatch into the staged engine.

mod cli;
mod engine;
mod error;
mod manifest;
mod model;
mod process;
mod rootfs;
mod tools;
mod volume;
mod workspace;

use clap::Parser;
use cli::{ClassicArgs, CommonArgs, KilnCli, KilnCommand, SnapArgs};
use color_eyre::Result;
use model::ImageDefinition;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
	color_eyre::install()?;
	dotenvy::dotenv().ok();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	sudo::escalate_if_needed().map_err(|e| color_eyre::eyre::eyre!(e.to_string()))?;

	let cli = KilnCli::parse();
	match cli.command {
		KilnCommand::Classic(args) => run_classic(args),
		KilnCommand::Snap(args) => run_snap(args),
	}
}

fn run_classic(args: ClassicArgs) -> Result<()> {
	let image = ImageDefinition::load(&args.manifest)?;
	let flags = engine_flags(&args.common);
	run(flags, image)
}

fn run_snap(args: SnapArgs) -> Result<()> {
	let mut image = ImageDefinition::load(&args.manifest)?;
	let snaps = args.snaps.iter().map(|s| cli::parse_snap_flag(s)).collect();
	rootfs::snaps::merge_cli_snaps(&mut image, snaps);
	let flags = engine_flags(&args.common);
	run(flags, image)
}

fn engine_flags(common: &CommonArgs) -> engine::EngineFlags {
	engine::EngineFlags {
		workdir: common.workdir.clone(),
		output_dir: common.output_dir.clone(),
		until: common.until.clone(),
		thru: common.thru.clone(),
		resume: common.resume,
		debug: common.debug,
		verbose: common.verbose,
		quiet: common.quiet,
		sector_size: common.sector_size,
	}
}

fn run(flags: engine::EngineFlags, image: ImageDefinition) -> Result<()> {
	let mut eng = engine::Engine::setup(flags, image)?;
	let outcome = eng.run();
	match outcome {
		Ok(()) => {
			eng.teardown();
			Ok(())
		},
		Err(e) => {
			tracing::warn!(workspace = %eng.ctx.workspace.root().display(), "build failed; workspace left intact for --resume");
			Err(e)
		},
	}
}
