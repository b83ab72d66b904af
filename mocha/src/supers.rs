//! Superclass knowledge for stack map frame computation.
//!
//! Merging two different reference types at a branch join needs the common
//! superclass of the two. The writer gets that through the
//! [`SuperClassProvider`] trait; implementations must answer from static data
//! (class file headers, tables), never by loading a class — a provider that
//! triggers class loading inside a load-time transformer would recurse into
//! the transformer itself.

use anyhow::{anyhow, bail, Result};
use crate::tree::class::ClassName;

/// What the frame computation needs to know about a class.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperClassInfo {
	/// `None` for `java/lang/Object`.
	pub super_class: Option<ClassName>,
	pub is_interface: bool,
}

pub trait SuperClassProvider {
	fn get_super_class_info(&self, class: &ClassName) -> Result<SuperClassInfo>;
}

/// Computes the common superclass of two classes, the way the verifier merges
/// reference types:
/// - interfaces merge to `java/lang/Object`,
/// - arrays merge to themselves when equal, otherwise to `java/lang/Object`,
/// - everything else walks the superclass chains for the first shared class.
pub fn common_super_class(provider: &dyn SuperClassProvider, a: &ClassName, b: &ClassName) -> Result<ClassName> {
	if a == b {
		return Ok(a.clone());
	}
	if a.is_array() || b.is_array() {
		return Ok(ClassName::from(ClassName::JAVA_LANG_OBJECT));
	}

	let object = ClassName::from(ClassName::JAVA_LANG_OBJECT);
	if *a == ClassName::JAVA_LANG_OBJECT || *b == ClassName::JAVA_LANG_OBJECT {
		return Ok(object);
	}

	let info_a = provider.get_super_class_info(a)?;
	let info_b = provider.get_super_class_info(b)?;
	if info_a.is_interface || info_b.is_interface {
		return Ok(object);
	}

	let chain_a = super_chain(provider, a.clone(), info_a)?;

	let mut current = b.clone();
	let mut info = info_b;
	loop {
		if chain_a.contains(&current) {
			return Ok(current);
		}
		let Some(super_class) = info.super_class else {
			return Ok(object);
		};
		info = if super_class == ClassName::JAVA_LANG_OBJECT {
			SuperClassInfo { super_class: None, is_interface: false }
		} else {
			provider.get_super_class_info(&super_class)?
		};
		current = super_class;
	}
}

fn super_chain(provider: &dyn SuperClassProvider, class: ClassName, info: SuperClassInfo) -> Result<Vec<ClassName>> {
	let mut chain = vec![class];
	let mut info = info;
	// a chain longer than this means a superclass cycle
	for _ in 0..1000 {
		let Some(super_class) = info.super_class else {
			chain.push(ClassName::from(ClassName::JAVA_LANG_OBJECT));
			return Ok(chain);
		};
		if super_class == ClassName::JAVA_LANG_OBJECT {
			chain.push(super_class);
			return Ok(chain);
		}
		info = provider.get_super_class_info(&super_class)?;
		chain.push(super_class);
	}
	bail!("superclass chain of {:?} doesn't terminate", chain.first());
}

/// Superclass data for the platform classes rewritten bytecode and typical
/// compiler output refer to. Everything else under a platform package prefix
/// is answered as a direct subclass of `Object`, which can only make merges
/// more general, never wrong for code that verified before.
#[derive(Debug, Default, Clone, Copy)]
pub struct JdkSuperClassProvider;

impl JdkSuperClassProvider {
	const PREFIXES: [&'static str; 5] = ["java/", "javax/", "jdk/", "sun/", "com/sun/"];

	pub fn covers(class: &ClassName) -> bool {
		Self::PREFIXES.iter().any(|prefix| class.as_str().starts_with(prefix))
	}

	fn lookup(class: &str) -> Option<(Option<&'static str>, bool)> {
		// (super class, is interface)
		Some(match class {
			"java/lang/Object" => (None, false),

			"java/lang/Number" => (Some("java/lang/Object"), false),
			"java/lang/Boolean" |
			"java/lang/Character" |
			"java/lang/String" |
			"java/lang/Class" |
			"java/lang/StringBuilder" |
			"java/lang/Thread" |
			"java/lang/invoke/VarHandle" |
			"java/lang/invoke/MethodHandles" |
			"java/lang/invoke/MethodHandles$Lookup" |
			"java/lang/invoke/MethodHandle" |
			"java/lang/invoke/MethodType" => (Some("java/lang/Object"), false),

			"java/lang/Byte" |
			"java/lang/Short" |
			"java/lang/Integer" |
			"java/lang/Long" |
			"java/lang/Float" |
			"java/lang/Double" => (Some("java/lang/Number"), false),

			"java/lang/Throwable" => (Some("java/lang/Object"), false),
			"java/lang/Exception" => (Some("java/lang/Throwable"), false),
			"java/lang/Error" => (Some("java/lang/Throwable"), false),
			"java/lang/RuntimeException" => (Some("java/lang/Exception"), false),
			"java/lang/ReflectiveOperationException" => (Some("java/lang/Exception"), false),
			"java/lang/InterruptedException" => (Some("java/lang/Exception"), false),
			"java/lang/IllegalArgumentException" |
			"java/lang/IllegalStateException" |
			"java/lang/UnsupportedOperationException" |
			"java/lang/NullPointerException" |
			"java/lang/ArithmeticException" |
			"java/lang/IndexOutOfBoundsException" |
			"java/lang/ClassCastException" => (Some("java/lang/RuntimeException"), false),
			"java/lang/NoSuchFieldException" |
			"java/lang/NoSuchMethodException" |
			"java/lang/IllegalAccessException" => (Some("java/lang/ReflectiveOperationException"), false),
			"java/lang/LinkageError" => (Some("java/lang/Error"), false),
			"java/lang/IncompatibleClassChangeError" => (Some("java/lang/LinkageError"), false),
			"java/lang/NoSuchFieldError" => (Some("java/lang/IncompatibleClassChangeError"), false),

			"java/lang/CharSequence" |
			"java/lang/Comparable" |
			"java/lang/Cloneable" |
			"java/lang/Runnable" |
			"java/lang/Iterable" |
			"java/io/Serializable" |
			"java/util/function/Function" |
			"java/util/function/Supplier" => (Some("java/lang/Object"), true),

			"java/lang/reflect/AccessibleObject" => (Some("java/lang/Object"), false),
			"java/lang/reflect/Field" |
			"java/lang/reflect/Method" => (Some("java/lang/reflect/AccessibleObject"), false),

			_ => return None,
		})
	}
}

impl SuperClassProvider for JdkSuperClassProvider {
	fn get_super_class_info(&self, class: &ClassName) -> Result<SuperClassInfo> {
		if let Some((super_class, is_interface)) = Self::lookup(class.as_str()) {
			return Ok(SuperClassInfo {
				super_class: super_class.map(ClassName::from),
				is_interface,
			});
		}
		if Self::covers(class) {
			log::debug!("treating platform class {class} as a direct subclass of Object");
			return Ok(SuperClassInfo {
				super_class: Some(ClassName::from(ClassName::JAVA_LANG_OBJECT)),
				is_interface: false,
			});
		}
		Err(anyhow!("no superclass information for {class:?}"))
	}
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::tree::class::ClassName;
	use super::{common_super_class, JdkSuperClassProvider};

	#[test]
	fn wrapper_classes_merge_to_number() -> Result<()> {
		let provider = JdkSuperClassProvider;
		let merged = common_super_class(
			&provider,
			&ClassName::from("java/lang/Integer"),
			&ClassName::from("java/lang/Long"),
		)?;
		assert_eq!(merged, ClassName::from("java/lang/Number"));
		Ok(())
	}

	#[test]
	fn exceptions_merge_along_the_throwable_chain() -> Result<()> {
		let provider = JdkSuperClassProvider;
		let merged = common_super_class(
			&provider,
			&ClassName::from("java/lang/NullPointerException"),
			&ClassName::from("java/lang/IllegalStateException"),
		)?;
		assert_eq!(merged, ClassName::from("java/lang/RuntimeException"));

		let merged = common_super_class(
			&provider,
			&ClassName::from("java/lang/NullPointerException"),
			&ClassName::from("java/lang/Error"),
		)?;
		assert_eq!(merged, ClassName::from("java/lang/Throwable"));
		Ok(())
	}

	#[test]
	fn interfaces_merge_to_object() -> Result<()> {
		let provider = JdkSuperClassProvider;
		let merged = common_super_class(
			&provider,
			&ClassName::from("java/lang/CharSequence"),
			&ClassName::from("java/lang/String"),
		)?;
		assert_eq!(merged, ClassName::from("java/lang/Object"));
		Ok(())
	}

	#[test]
	fn arrays_merge_to_object() -> Result<()> {
		let provider = JdkSuperClassProvider;
		let merged = common_super_class(
			&provider,
			&ClassName::from("[I"),
			&ClassName::from("java/lang/String"),
		)?;
		assert_eq!(merged, ClassName::from("java/lang/Object"));
		Ok(())
	}
}
