//! Patching a directory of class files in place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use log::{debug, error};
use relazy_core::api::{group_classes, patch, PatchOutcome};
use relazy_core::PatchOptions;
use walkdir::WalkDir;
use crate::resources::DirResources;
use crate::Summary;

/// The dotted binary name for a class file path relative to the root, e.g.
/// `com/example/Foo$.class` becomes `com.example.Foo$`.
fn dotted_name(relative: &Path) -> Option<String> {
	let mut parts = Vec::new();
	for component in relative.components() {
		parts.push(component.as_os_str().to_str()?);
	}
	let last = parts.pop()?.strip_suffix(".class")?;
	parts.push(last);
	Some(parts.join("."))
}

pub(crate) fn patch_directory(root: &Path, options: &PatchOptions) -> Result<Summary> {
	let mut classes: IndexMap<String, Vec<u8>> = IndexMap::new();
	let mut paths: HashMap<String, PathBuf> = HashMap::new();

	for entry in WalkDir::new(root).sort_by_file_name() {
		let entry = entry.with_context(|| anyhow!("failed to walk {root:?}"))?;
		if !entry.file_type().is_file() || entry.path().extension().is_none_or(|e| e != "class") {
			continue;
		}
		let relative = entry.path().strip_prefix(root)
			.with_context(|| anyhow!("walked outside of {root:?}"))?;
		let Some(name) = dotted_name(relative) else {
			debug!("skipping {:?}, not a class file path", entry.path());
			continue;
		};
		let bytes = std::fs::read(entry.path())
			.with_context(|| anyhow!("failed to read {:?}", entry.path()))?;
		paths.insert(name.clone(), entry.path().to_owned());
		classes.insert(name, bytes);
	}

	let loader = DirResources { root: root.to_owned() };
	let mut summary = Summary::default();

	let mut write_back = |name: &str, bytes: &[u8]| -> Result<()> {
		let path = paths.get(name)
			.with_context(|| anyhow!("no file path recorded for patched class {name}"))?;
		std::fs::write(path, bytes)
			.with_context(|| anyhow!("failed to write patched class to {path:?}"))
	};

	for group in group_classes(classes) {
		match patch(&group, options, &loader) {
			PatchOutcome::PatchedSingle { name, bytes } => {
				write_back(&name, &bytes)?;
				summary.patched += 1;
			},
			PatchOutcome::PatchedPair { object_name, class_name, object_bytes, class_bytes } => {
				write_back(&object_name, &object_bytes)?;
				write_back(&class_name, &class_bytes)?;
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

	Ok(summary)
}
