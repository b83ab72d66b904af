//! Failure reports. Errors cross the public API as data, and a caller (say, a
//! load-time transformer) routes on [`DiagnosticKind`]: an `Unknown`
//! classification must surface — defining the class anyway would hand the JVM
//! bytecode that is known to stop verifying — while everything else may be
//! treated as "leave the class unchanged".

use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
	/// Lazy-val markers are present, but no known implementation family fits.
	Unknown,
	/// The boundaries of the user initializer couldn't be found.
	ExtractionFailure,
	/// The replacement scaffold couldn't be assembled.
	RewriteFailure,
}

impl Display for DiagnosticKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		match self {
			DiagnosticKind::Unknown => f.write_str("unknown lazy val implementation"),
			DiagnosticKind::ExtractionFailure => f.write_str("initializer extraction failure"),
			DiagnosticKind::RewriteFailure => f.write_str("rewrite failure"),
		}
	}
}

/// What went wrong with one class, with enough context to debug a compiler
/// shape we haven't seen: every field, every method, and the per-lazy-val
/// classification results.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
	pub kind: DiagnosticKind,
	/// Internal name of the class the rewrite gave up on.
	pub class_name: String,
	pub message: String,
	/// `name : descriptor` per field of the class.
	pub fields: Vec<String>,
	/// `name + descriptor` per method of the class.
	pub methods: Vec<String>,
	/// One classification line per lazy-val candidate.
	pub lazy_vals: Vec<String>,
}

impl Diagnostic {
	pub(crate) fn new(kind: DiagnosticKind, class: &mocha::tree::class::ClassFile, message: String) -> Diagnostic {
		Diagnostic {
			kind,
			class_name: class.name.as_str().to_owned(),
			message,
			fields: class.fields.iter()
				.map(|field| format!("{} : {}", field.name, field.descriptor))
				.collect(),
			methods: class.methods.iter()
				.map(|method| format!("{}{}", method.name, method.descriptor))
				.collect(),
			lazy_vals: Vec::new(),
		}
	}
}

impl Display for Diagnostic {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		writeln!(f, "{} in class {}: {}", self.kind, self.class_name, self.message)?;
		writeln!(f, "  fields:")?;
		for field in &self.fields {
			writeln!(f, "    {field}")?;
		}
		writeln!(f, "  methods:")?;
		for method in &self.methods {
			writeln!(f, "    {method}")?;
		}
		if !self.lazy_vals.is_empty() {
			writeln!(f, "  lazy vals:")?;
			for lazy_val in &self.lazy_vals {
				writeln!(f, "    {lazy_val}")?;
			}
		}
		Ok(())
	}
}
