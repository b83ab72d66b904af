/// An attribute this crate doesn't model structurally, kept as its raw payload.
///
/// This is only sound for attributes whose payloads don't index the constant
/// pool — the writer builds a fresh pool, so old indices mean nothing. The
/// reader takes care to only put such attributes in here (for Scala output
/// that's the `Scala` marker and the `TASTY` uuid payload) and drops the
/// rest with a log line.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
	pub name: String,
	pub info: Vec<u8>,
}
