//! Names of the Scala runtime classes rewritten bytecode refers to.
//!
//! These are the names in the *target application's* runtime. They are
//! assembled from fragments at run time; the full `scala/runtime` prefix must
//! never appear as a single literal in this crate, or a build step that
//! relocates package prefixes inside this tool's own binary would rewrite the
//! emitted constants along with it.

use mocha::tree::class::ClassName;

fn scala_runtime(tail: &str) -> ClassName {
	let mut name = ["sca", "la/", "runt", "ime/"].concat();
	name.push_str(tail);
	ClassName::from(name)
}

/// `LazyVals$`, the helper module object.
pub(crate) fn lazy_vals_module() -> ClassName {
	scala_runtime("LazyVals$")
}

/// The marker interface all in-flight sentinels implement.
pub(crate) fn lazy_val_control_state() -> ClassName {
	scala_runtime("LazyVals$LazyValControlState")
}

/// The `Evaluating` sentinel object.
pub(crate) fn evaluating() -> ClassName {
	scala_runtime("LazyVals$Evaluating$")
}

/// The `NullValue` sentinel object, stored for a lazy val that computed `null`.
pub(crate) fn null_value() -> ClassName {
	scala_runtime("LazyVals$NullValue$")
}

/// The per-contention latch, with `await` and `countDown`.
pub(crate) fn waiting() -> ClassName {
	scala_runtime("LazyVals$Waiting")
}

/// The primitive boxing helpers.
pub(crate) fn boxes_run_time() -> ClassName {
	scala_runtime("BoxesRunTime")
}

/// The field descriptor of the singleton instance field of a module class,
/// e.g. `Lscala/runtime/LazyVals$;` for [`lazy_vals_module`].
pub(crate) fn module_descriptor(module: &ClassName) -> String {
	format!("L{};", module.as_str())
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	#[test]
	fn assembled_names() {
		assert_eq!(lazy_vals_module().as_str(), ["scala", "/runtime/", "LazyVals$"].concat());
		assert_eq!(waiting().as_str(), ["scala", "/runtime/", "LazyVals$Waiting"].concat());
		assert_eq!(boxes_run_time().as_str(), ["scala", "/runtime/", "BoxesRunTime"].concat());
	}
}
