//! Grouping of class files into the units the rewriter works on.
//!
//! A lazy val of an `object X` is split across two class files: storage and
//! init live in `X$`, the `OFFSET$*` fields and their `<clinit>` in `X`. The
//! two have to be rewritten together or not at all, so the patch API takes a
//! whole [`ClassfileGroup`].

use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum ClassfileGroup {
	Singleton {
		/// Dotted binary name, e.g. `com.example.SimpleLazyVal$`.
		name: String,
		bytes: Vec<u8>,
	},
	CompanionPair {
		/// Dotted name of the module class, always `class_name + "$"`.
		object_name: String,
		class_name: String,
		object_bytes: Vec<u8>,
		class_bytes: Vec<u8>,
	},
}

impl ClassfileGroup {
	/// The names of the classes in this group.
	pub fn names(&self) -> Vec<&str> {
		match self {
			ClassfileGroup::Singleton { name, .. } => vec![name],
			ClassfileGroup::CompanionPair { object_name, class_name, .. } => vec![object_name, class_name],
		}
	}
}

/// Forms groups from a set of classes keyed by dotted name: `X` and `X$`
/// present together become one [`ClassfileGroup::CompanionPair`], everything
/// else a [`ClassfileGroup::Singleton`]. Input order is kept.
pub fn group_classes(mut classes: IndexMap<String, Vec<u8>>) -> Vec<ClassfileGroup> {
	let mut groups = Vec::with_capacity(classes.len());

	let names: Vec<String> = classes.keys().cloned().collect();
	for name in names {
		let Some(bytes) = classes.shift_remove(&name) else {
			// already taken as the companion of an earlier class
			continue;
		};

		if let Some(class_name) = name.strip_suffix('$') {
			let class_name = class_name.to_owned();
			if let Some(class_bytes) = classes.shift_remove(&class_name) {
				groups.push(ClassfileGroup::CompanionPair {
					object_name: name,
					class_name,
					object_bytes: bytes,
					class_bytes,
				});
				continue;
			}
		}

		let object_name = format!("{name}$");
		if let Some(object_bytes) = classes.shift_remove(&object_name) {
			groups.push(ClassfileGroup::CompanionPair {
				object_name,
				class_name: name,
				object_bytes,
				class_bytes: bytes,
			});
			continue;
		}

		groups.push(ClassfileGroup::Singleton { name, bytes });
	}

	groups
}

#[cfg(test)]
mod testing {
	use indexmap::IndexMap;
	use pretty_assertions::assert_eq;
	use super::{group_classes, ClassfileGroup};

	fn classes(names: &[&str]) -> IndexMap<String, Vec<u8>> {
		names.iter().enumerate()
			.map(|(index, name)| (name.to_string(), vec![index as u8]))
			.collect()
	}

	#[test]
	fn pairs_and_singletons() {
		let groups = group_classes(classes(&["a.Foo", "a.Bar$", "a.Foo$", "a.Baz"]));
		assert_eq!(groups, vec![
			ClassfileGroup::CompanionPair {
				object_name: "a.Foo$".to_owned(),
				class_name: "a.Foo".to_owned(),
				object_bytes: vec![2],
				class_bytes: vec![0],
			},
			ClassfileGroup::Singleton { name: "a.Bar$".to_owned(), bytes: vec![1] },
			ClassfileGroup::Singleton { name: "a.Baz".to_owned(), bytes: vec![3] },
		]);
	}

	#[test]
	fn dollar_names_do_not_pair_transitively() {
		// `X$$` pairs with `X$`, not with `X`
		let groups = group_classes(classes(&["X", "X$", "X$$"]));
		assert_eq!(groups.len(), 2);
		assert_eq!(groups[0], ClassfileGroup::CompanionPair {
			object_name: "X$".to_owned(),
			class_name: "X".to_owned(),
			object_bytes: vec![1],
			class_bytes: vec![0],
		});
		assert_eq!(groups[1], ClassfileGroup::Singleton { name: "X$$".to_owned(), bytes: vec![2] });
	}
}
