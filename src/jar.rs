//! Patching a JAR in place: patched archive written next to the original,
//! then renamed over it. Non-class entries are copied through untouched.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use log::{debug, error};
use relazy_core::api::{group_classes, patch, PatchOutcome};
use relazy_core::PatchOptions;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};
use crate::resources::MapResources;
use crate::Summary;

fn entry_is_class(name: &str) -> bool {
	name.ends_with(".class") && !name.ends_with("module-info.class")
}

fn dotted_name(entry_name: &str) -> String {
	entry_name.strip_suffix(".class").unwrap_or(entry_name).replace('/', ".")
}

pub(crate) fn patch_jar(path: &Path, options: &PatchOptions) -> Result<Summary> {
	let file = File::open(path).with_context(|| anyhow!("failed to open {path:?}"))?;
	let mut archive = ZipArchive::new(BufReader::new(file))
		.with_context(|| anyhow!("failed to read {path:?} as a zip archive"))?;

	// first pass: pull every class entry into memory for grouping and for
	// supertype resource lookups
	let mut classes: IndexMap<String, Vec<u8>> = IndexMap::new();
	for index in 0..archive.len() {
		let mut entry = archive.by_index(index)?;
		if !entry.is_file() || !entry_is_class(entry.name()) {
			continue;
		}
		let mut bytes = Vec::with_capacity(entry.size() as usize);
		entry.read_to_end(&mut bytes)
			.with_context(|| anyhow!("failed to read entry {:?} of {path:?}", entry.name()))?;
		classes.insert(dotted_name(entry.name()), bytes);
	}

	let loader = MapResources {
		classes: classes.iter()
			.map(|(name, bytes)| (name.replace('.', "/"), bytes.clone()))
			.collect(),
	};

	let mut summary = Summary::default();
	let mut patched: HashMap<String, Vec<u8>> = HashMap::new();

	for group in group_classes(classes) {
		match patch(&group, options, &loader) {
			PatchOutcome::PatchedSingle { name, bytes } => {
				patched.insert(name, bytes);
				summary.patched += 1;
			},
			PatchOutcome::PatchedPair { object_name, class_name, object_bytes, class_bytes } => {
				patched.insert(object_name, object_bytes);
				patched.insert(class_name, class_bytes);
				summary.patched += 2;
			},
			PatchOutcome::NotApplicable(reason) => {
				debug!("skipping {:?}: {reason:?}", group.names());
				summary.skipped += group.names().len();
			},
			PatchOutcome::Failed(diagnostic) => {
				error!("{diagnostic}");
				summary.failed += 1;
			},
		}
	}

	if patched.is_empty() {
		return Ok(summary);
	}

	// second pass: rebuild the archive, swapping in the patched classes
	let temp_path = path.with_extension("jar.patching");
	{
		let temp = File::create(&temp_path)
			.with_context(|| anyhow!("failed to create {temp_path:?}"))?;
		let mut writer = ZipWriter::new(BufWriter::new(temp));

		for index in 0..archive.len() {
			let entry = archive.by_index(index)?;
			let replacement = entry.is_file()
				.then(|| entry_is_class(entry.name()).then(|| patched.get(&dotted_name(entry.name()))))
				.flatten()
				.flatten();

			match replacement {
				Some(bytes) => {
					let entry_options = SimpleFileOptions::default()
						.compression_method(entry.compression());
					writer.start_file(entry.name(), entry_options)?;
					writer.write_all(bytes)?;
				},
				None => {
					writer.raw_copy_file(entry)?;
				},
			}
		}

		writer.finish()?.into_inner()
			.map_err(|error| anyhow!("failed to flush {temp_path:?}: {error:?}"))?;
	}

	std::fs::rename(&temp_path, path)
		.with_context(|| anyhow!("failed to move the patched archive over {path:?}"))?;

	Ok(summary)
}
