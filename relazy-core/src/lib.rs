//! Rewrites the `lazy val` implementation of class files produced by Scala
//! 3.0 through 3.7 to the `VarHandle` scheme of 3.8, removing every
//! dependency on `sun.misc.Unsafe`.
//!
//! The entry points are [`api::group_classes`] to form [`group::ClassfileGroup`]s
//! from a set of class files, and [`api::patch`] to rewrite one group. Results
//! are data ([`api::PatchOutcome`]), never panics or errors-as-exceptions:
//! callers decide whether a failed class is fatal.
//!
//! A companion object's lazy vals span two class files (storage and init in
//! `Foo$`, field offsets in `Foo`), which is why the unit of work is a group
//! and not a class.

pub mod api;
pub mod group;
pub mod info;
pub mod diagnostic;
pub mod supertypes;

mod detect;
mod extract;
mod rewrite;
mod runtime_names;

/// Tunables of the rewrite.
///
/// The defaults match the bytecode shapes the supported compilers emit; both
/// knobs exist so a future compiler revision can be accommodated without a
/// code change.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOptions {
	/// How many instructions the backward walk from a `putstatic OFFSET$*` to
	/// its `getstatic LazyVals$.MODULE$` may cross before the rewrite of the
	/// class is aborted.
	pub offset_scan_limit: usize,
	/// The local variable slot the old initializer stores the computed value
	/// into; the store is the end marker for initializer extraction.
	pub value_slot: u16,
}

impl Default for PatchOptions {
	fn default() -> PatchOptions {
		PatchOptions {
			offset_scan_limit: 10,
			value_slot: 5,
		}
	}
}
