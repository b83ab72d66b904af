//! Supertype resolution without class loading.
//!
//! Frame recomputation needs superclass chains for the classes a method
//! mentions. Loading classes to answer that is off the table: inside a
//! load-time transformer it recurses into the transformer itself and defines
//! classes before they were patched. Resolution order instead:
//!
//! 1. the classes of the group being patched (already parsed),
//! 2. `.class` resources read through the caller's [`ResourceLoader`]
//!    (header-only parse),
//! 3. a built-in table for the platform classes and the Scala runtime
//!    helpers rewritten bytecode refers to.
//!
//! Anything else fails the patch; a guessed frame type is a verify error at
//! the worst possible time.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use anyhow::{anyhow, Result};
use log::debug;
use mocha::supers::{JdkSuperClassProvider, SuperClassInfo, SuperClassProvider};
use mocha::tree::class::{ClassFile, ClassName};
use crate::runtime_names;

/// Reads `.class` bytes for an internal name from ambient resources (a
/// classpath directory, an open JAR, a classloader's resource lookup). Must
/// not trigger class loading or initialization.
pub trait ResourceLoader {
	fn read_class_resource(&self, internal_name: &str) -> Option<Vec<u8>>;
}

/// A [`ResourceLoader`] with nothing on the classpath. Enough whenever the
/// group's own classes plus the built-in tables cover every merge.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoResources;

impl ResourceLoader for NoResources {
	fn read_class_resource(&self, _internal_name: &str) -> Option<Vec<u8>> {
		None
	}
}

/// Interface and superclass knowledge for one resolved class; what
/// [`GroupSuperClassProvider::is_assignable_from`] walks.
#[derive(Debug, Clone, PartialEq)]
struct Resolved {
	super_class: Option<ClassName>,
	interfaces: Vec<ClassName>,
	is_interface: bool,
}

pub struct GroupSuperClassProvider<'a> {
	group: Vec<(ClassName, Resolved)>,
	loader: &'a dyn ResourceLoader,
	cache: RefCell<HashMap<ClassName, Option<Resolved>>>,
}

impl<'a> GroupSuperClassProvider<'a> {
	pub fn new(classes: &[&ClassFile], loader: &'a dyn ResourceLoader) -> GroupSuperClassProvider<'a> {
		let group = classes.iter()
			.map(|class| (class.name.clone(), Resolved {
				super_class: class.super_class.clone(),
				interfaces: class.interfaces.clone(),
				is_interface: class.access.is_interface,
			}))
			.collect();
		GroupSuperClassProvider {
			group,
			loader,
			cache: RefCell::new(HashMap::new()),
		}
	}

	/// The Scala runtime helper classes rewritten bytecode refers to. Their
	/// shape is fixed by the runtime's public contract, so resolution works
	/// even when the Scala standard library isn't on the ambient classpath.
	fn runtime_table(class: &ClassName) -> Option<Resolved> {
		let object = || Some(ClassName::from(ClassName::JAVA_LANG_OBJECT));
		if *class == runtime_names::lazy_vals_module()
			|| *class == runtime_names::boxes_run_time()
		{
			return Some(Resolved { super_class: object(), interfaces: vec![], is_interface: false });
		}
		if *class == runtime_names::lazy_val_control_state() {
			return Some(Resolved { super_class: object(), interfaces: vec![], is_interface: true });
		}
		if *class == runtime_names::evaluating()
			|| *class == runtime_names::null_value()
			|| *class == runtime_names::waiting()
		{
			return Some(Resolved {
				super_class: object(),
				interfaces: vec![runtime_names::lazy_val_control_state()],
				is_interface: false,
			});
		}
		None
	}

	fn resolve(&self, class: &ClassName) -> Result<Resolved> {
		if *class == ClassName::JAVA_LANG_OBJECT {
			return Ok(Resolved { super_class: None, interfaces: vec![], is_interface: false });
		}

		if let Some((_, resolved)) = self.group.iter().find(|(name, _)| name == class) {
			return Ok(resolved.clone());
		}

		if let Some(cached) = self.cache.borrow().get(class) {
			return cached.clone()
				.ok_or_else(|| anyhow!("no superclass information for {class:?}"));
		}

		let resolved = self.resolve_uncached(class);
		self.cache.borrow_mut().insert(class.clone(), resolved.clone());
		resolved.ok_or_else(|| anyhow!(
			"no superclass information for {class:?}: not in the group, not a readable resource, not a known platform class"
		))
	}

	fn resolve_uncached(&self, class: &ClassName) -> Option<Resolved> {
		if let Some(bytes) = self.loader.read_class_resource(class.as_str()) {
			match mocha::read_header(&bytes) {
				Ok(header) if header.name == *class => {
					return Some(Resolved {
						super_class: header.super_class,
						interfaces: header.interfaces,
						is_interface: header.access.is_interface,
					});
				},
				Ok(header) => {
					debug!("resource for {class} declares itself as {}, ignoring it", header.name);
				},
				Err(error) => {
					debug!("unreadable class resource for {class}: {error:#}");
				},
			}
		}

		if let Some(resolved) = Self::runtime_table(class) {
			return Some(resolved);
		}

		if let Ok(info) = JdkSuperClassProvider.get_super_class_info(class) {
			return Some(Resolved {
				super_class: info.super_class,
				interfaces: vec![],
				is_interface: info.is_interface,
			});
		}

		None
	}

	/// Whether a value of class `source` can stand where `target` is
	/// expected: breadth-first over superclass and interface edges.
	pub fn is_assignable_from(&self, target: &ClassName, source: &ClassName) -> Result<bool> {
		if target == source || *target == ClassName::JAVA_LANG_OBJECT {
			return Ok(true);
		}

		let mut queue = VecDeque::from([source.clone()]);
		let mut seen = vec![source.clone()];
		while let Some(current) = queue.pop_front() {
			let resolved = self.resolve(&current)?;
			for next in resolved.super_class.into_iter().chain(resolved.interfaces) {
				if next == *target {
					return Ok(true);
				}
				if !seen.contains(&next) {
					seen.push(next.clone());
					queue.push_back(next);
				}
			}
		}
		Ok(false)
	}
}

impl SuperClassProvider for GroupSuperClassProvider<'_> {
	fn get_super_class_info(&self, class: &ClassName) -> Result<SuperClassInfo> {
		let resolved = self.resolve(class)?;
		Ok(SuperClassInfo {
			super_class: resolved.super_class,
			is_interface: resolved.is_interface,
		})
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use mocha::tree::class::{ClassAccess, ClassFile, ClassName};
	use mocha::tree::version::Version;
	use super::{GroupSuperClassProvider, NoResources, ResourceLoader};

	fn class(name: &str, super_class: &str, interfaces: &[&str]) -> ClassFile {
		ClassFile::new(
			Version::V17,
			ClassAccess { is_public: true, is_super: true, ..ClassAccess::default() },
			ClassName::from(name),
			Some(ClassName::from(super_class)),
			interfaces.iter().copied().map(ClassName::from).collect(),
		)
	}

	#[test]
	fn assignability_over_the_group() -> Result<()> {
		let base = class("a/Base", "java/lang/Object", &["java/lang/Runnable"]);
		let derived = class("a/Derived", "a/Base", &[]);
		let provider = GroupSuperClassProvider::new(&[&base, &derived], &NoResources);

		assert!(provider.is_assignable_from(&ClassName::from("a/Base"), &ClassName::from("a/Derived"))?);
		assert!(provider.is_assignable_from(&ClassName::from("java/lang/Runnable"), &ClassName::from("a/Derived"))?);
		assert!(provider.is_assignable_from(&ClassName::from("java/lang/Object"), &ClassName::from("a/Derived"))?);
		assert!(!provider.is_assignable_from(&ClassName::from("a/Derived"), &ClassName::from("a/Base"))?);
		Ok(())
	}

	#[test]
	fn unresolvable_application_class_is_an_error() {
		let provider = GroupSuperClassProvider::new(&[], &NoResources);
		assert!(provider.is_assignable_from(&ClassName::from("a/Missing"), &ClassName::from("b/AlsoMissing")).is_err());
	}

	#[test]
	fn resources_resolve_through_the_loader() -> Result<()> {
		struct OneClass(Vec<u8>);
		impl ResourceLoader for OneClass {
			fn read_class_resource(&self, internal_name: &str) -> Option<Vec<u8>> {
				(internal_name == "a/FromResource").then(|| self.0.clone())
			}
		}

		let on_disk = class("a/FromResource", "a/Parent", &[]);
		let bytes = mocha::write(&on_disk, &mocha::supers::JdkSuperClassProvider)?;

		let loader = OneClass(bytes);
		let provider = GroupSuperClassProvider::new(&[], &loader);
		assert!(provider.is_assignable_from(
			&ClassName::from("a/Parent"),
			&ClassName::from("a/FromResource"),
		)?);
		Ok(())
	}
}
