//! [`ResourceLoader`] implementations over the tree being patched. Supertype
//! resolution reads class *bytes* only; nothing here defines a class.

use std::collections::HashMap;
use std::path::PathBuf;
use relazy_core::supertypes::ResourceLoader;

/// Resolves `.class` resources relative to a class file directory root.
pub(crate) struct DirResources {
	pub(crate) root: PathBuf,
}

impl ResourceLoader for DirResources {
	fn read_class_resource(&self, internal_name: &str) -> Option<Vec<u8>> {
		// internal names are `/`-separated and never absolute; keep it that way
		if internal_name.contains("..") || internal_name.starts_with('/') {
			return None;
		}
		let mut path = self.root.clone();
		for part in internal_name.split('/') {
			path.push(part);
		}
		path.set_extension("class");
		std::fs::read(path).ok()
	}
}

/// Resolves `.class` resources out of an in-memory map of a JAR's class
/// entries, keyed by internal name.
pub(crate) struct MapResources {
	pub(crate) classes: HashMap<String, Vec<u8>>,
}

impl ResourceLoader for MapResources {
	fn read_class_resource(&self, internal_name: &str) -> Option<Vec<u8>> {
		self.classes.get(internal_name).cloned()
	}
}
