//! Patches Scala 3.0–3.7 lazy vals to the `VarHandle` scheme, in place, in
//! directories of class files or in JARs.

use std::path::PathBuf;
use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use log::error;
use relazy_core::PatchOptions;

mod dir;
mod jar;
mod resources;

#[derive(Debug, Parser)]
#[command(name = "relazy", about = "Rewrites Scala 3 lazy vals away from sun.misc.Unsafe")]
struct Cli {
	/// Be verbose.
	#[arg(short = 'v', long = "verbose")]
	verbose: bool,

	/// How many instructions the scan may walk backwards from a
	/// `putstatic OFFSET$*` to the start of its population sequence.
	#[arg(long = "offset-scan-limit", default_value_t = PatchOptions::default().offset_scan_limit)]
	offset_scan_limit: usize,

	/// Directories of class files, or JAR files, patched in place.
	#[arg(required = true)]
	paths: Vec<PathBuf>,
}

/// Per-run counters, printed at the end.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct Summary {
	pub(crate) patched: usize,
	pub(crate) skipped: usize,
	pub(crate) failed: usize,
}

impl Summary {
	pub(crate) fn absorb(&mut self, other: Summary) {
		self.patched += other.patched;
		self.skipped += other.skipped;
		self.failed += other.failed;
	}
}

fn setup_logger(verbose: bool) -> Result<()> {
	let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Info };
	fern::Dispatch::new()
		.format(|out, message, record| {
			out.finish(format_args!("[{:<5}] {}", record.level(), message))
		})
		.level(level)
		.chain(std::io::stderr())
		.apply()
		.context("failed to set up logging")
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	setup_logger(cli.verbose)?;

	let options = PatchOptions {
		offset_scan_limit: cli.offset_scan_limit,
		..PatchOptions::default()
	};

	let mut summary = Summary::default();
	for path in &cli.paths {
		let result = if path.is_dir() {
			dir::patch_directory(path, &options)
		} else if path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("jar")) {
			jar::patch_jar(path, &options)
		} else {
			Err(anyhow!("{path:?} is neither a directory nor a .jar file"))
		};

		match result {
			Ok(part) => summary.absorb(part),
			Err(error) => {
				error!("failed to process {path:?}: {error:#}");
				summary.failed += 1;
			},
		}
	}

	log::info!("patched {}, skipped {}, failed {}", summary.patched, summary.skipped, summary.failed);
	if summary.failed > 0 {
		bail!("{} classes or archives failed", summary.failed);
	}
	Ok(())
}
