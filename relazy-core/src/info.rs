//! The per-lazy-val facts the detector gathers and the rewriter consumes.

use std::fmt::{Display, Formatter};
use mocha::tree::descriptor::Type;
use mocha::tree::field::FieldName;
use mocha::tree::method::MethodName;

/// The implementation scheme a lazy val was compiled to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Family {
	/// Scala 3.0–3.2: inlined accessor, a shared bit-flag field tracking
	/// initialization state, synchronization through CAS on the flag field.
	Bitmap,
	/// Scala 3.3–3.7: an `Object`-typed storage field driven through
	/// `sun.misc.Unsafe` CAS on a memoized field offset, with an out-of-line
	/// `$lzyINIT` method.
	ObjectUnsafe,
	/// Scala 3.8: the same protocol through a `VarHandle`. Nothing to do.
	HandleBased,
}

impl Display for Family {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			Family::Bitmap => f.write_str("bitmap"),
			Family::ObjectUnsafe => f.write_str("object-unsafe"),
			Family::HandleBased => f.write_str("handle-based"),
		}
	}
}

/// Where the static `OFFSET$*` field backing a lazy val lives.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OffsetFieldLocation {
	/// In the class holding the lazy val itself.
	Same,
	/// In the companion class (lazy vals of an `object X` store in `X$` but
	/// keep their offsets in `X`).
	Companion,
	/// There is none (handle-based lazy vals).
	None,
}

/// Everything known about one detected lazy val. Lives only for the duration
/// of one patch call.
#[derive(Debug, Clone, PartialEq)]
pub struct LazyValInfo {
	/// The user-visible name, e.g. `simpleLazy`.
	pub name: String,
	/// The storage field, e.g. `simpleLazy$lzy1`.
	pub storage_field: FieldName,
	pub family: Family,
	pub offset_field_location: OffsetFieldLocation,
	/// `OFFSET$_m_<k>` or `OFFSET$<k>`, when the family uses one.
	pub offset_field: Option<FieldName>,
	/// The bit-flag field of the bitmap family; possibly shared between
	/// several lazy vals of the class.
	pub bitmap_field: Option<FieldName>,
	/// The accessor method, e.g. `simpleLazy()`.
	pub accessor: MethodName,
	/// The `$lzyINIT` method, where the family has one out of line.
	pub init_method: Option<MethodName>,
	/// The declared result type of the lazy val, from the accessor descriptor.
	pub value_type: Type,
}

/// Splits a storage field name of the shape `<name>$lzy<n>` into `(name, n)`.
///
/// Returns `None` for names that merely contain `$lzy` somewhere else, e.g.
/// the `$lzyHandle` fields or an unrelated `foo$lzyCache`.
pub(crate) fn parse_storage_field_name(field_name: &str) -> Option<(&str, u32)> {
	let (base, suffix) = field_name.rsplit_once("$lzy")?;
	if base.is_empty() || suffix.is_empty() {
		return None;
	}
	let n = suffix.parse().ok()?;
	Some((base, n))
}

/// `true` for `OFFSET$_m_<k>` and `OFFSET$<k>` names.
pub(crate) fn is_offset_field_name(field_name: &str) -> bool {
	let Some(suffix) = field_name.strip_prefix("OFFSET$") else { return false };
	let digits = suffix.strip_prefix("_m_").unwrap_or(suffix);
	!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// `true` for the `<m>bitmap$<p>` flag field names of the bitmap family.
pub(crate) fn is_bitmap_field_name(field_name: &str) -> bool {
	let Some((prefix, suffix)) = field_name.rsplit_once("bitmap$") else { return false };
	prefix.bytes().all(|b| b.is_ascii_digit())
		&& !suffix.is_empty()
		&& suffix.bytes().all(|b| b.is_ascii_digit())
}

/// The name of the `VarHandle` field of the 3.8 scheme for a given storage
/// field, e.g. `simpleLazy$lzy1$lzyHandle`.
pub(crate) fn handle_field_name(storage_field_name: &str) -> String {
	format!("{storage_field_name}$lzyHandle")
}

/// The `$lzyINIT` method name matching a storage field, e.g.
/// `simpleLazy$lzyINIT1` for `simpleLazy$lzy1`.
pub(crate) fn init_method_name(base: &str, n: u32) -> String {
	format!("{base}$lzyINIT{n}")
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::*;

	#[test]
	fn storage_field_names() {
		assert_eq!(parse_storage_field_name("simpleLazy$lzy1"), Some(("simpleLazy", 1)));
		assert_eq!(parse_storage_field_name("a$b$lzy17"), Some(("a$b", 17)));

		assert_eq!(parse_storage_field_name("simpleLazy$lzy1$lzyHandle"), None);
		assert_eq!(parse_storage_field_name("foo$lzyCache"), None);
		assert_eq!(parse_storage_field_name("$lzy1"), None);
		assert_eq!(parse_storage_field_name("foo"), None);
	}

	#[test]
	fn offset_field_names() {
		assert!(is_offset_field_name("OFFSET$_m_0"));
		assert!(is_offset_field_name("OFFSET$_m_12"));
		assert!(is_offset_field_name("OFFSET$0"));
		assert!(is_offset_field_name("OFFSET$3"));

		assert!(!is_offset_field_name("OFFSET$"));
		assert!(!is_offset_field_name("OFFSET$_m_"));
		assert!(!is_offset_field_name("OFFSET$x"));
		assert!(!is_offset_field_name("offset$0"));
	}

	#[test]
	fn bitmap_field_names() {
		assert!(is_bitmap_field_name("0bitmap$1"));
		assert!(is_bitmap_field_name("bitmap$0"));
		assert!(is_bitmap_field_name("12bitmap$3"));

		assert!(!is_bitmap_field_name("bitmap"));
		assert!(!is_bitmap_field_name("bitmap$"));
		assert!(!is_bitmap_field_name("xbitmap$1"));
	}

	#[test]
	fn derived_names() {
		assert_eq!(handle_field_name("simpleLazy$lzy1"), "simpleLazy$lzy1$lzyHandle");
		assert_eq!(init_method_name("simpleLazy", 1), "simpleLazy$lzyINIT1");
	}
}
