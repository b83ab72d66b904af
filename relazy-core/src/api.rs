//! The public patching surface.
//!
//! [`patch`] takes a whole [`ClassfileGroup`] and returns a [`PatchOutcome`];
//! it never panics on hostile input and never partially rewrites — either
//! every lazy val of the group comes out handle-based, or the caller is told
//! to keep the original bytes.
//!
//! [`CompanionBuffer`] supports callers that see one class at a time (a
//! load-time transformer): patch the group when its first half shows up,
//! hand back that half, park the other half here until it is asked for.

use std::collections::HashMap;
use std::sync::Mutex;
use anyhow::Error;
use log::{debug, info, warn};
use mocha::tree::class::ClassFile;
use crate::detect::{detect, describe_candidates, Detection};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::group::ClassfileGroup;
use crate::info::Family;
use crate::rewrite::rewrite_group;
use crate::supertypes::{GroupSuperClassProvider, ResourceLoader};
use crate::PatchOptions;

pub use crate::group::group_classes;

/// Why a group was left untouched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NotApplicableReason {
	/// The bytes don't parse as a class file we understand.
	Malformed,
	/// No lazy vals in any class of the group.
	NoLazyVals,
	/// Every lazy val already uses the `VarHandle` scheme.
	AlreadyHandleBased,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOutcome {
	PatchedSingle {
		/// Dotted name, as in the input group.
		name: String,
		bytes: Vec<u8>,
	},
	PatchedPair {
		object_name: String,
		class_name: String,
		object_bytes: Vec<u8>,
		class_bytes: Vec<u8>,
	},
	/// Keep the original bytes.
	NotApplicable(NotApplicableReason),
	/// Keep the original bytes, but something is wrong; see
	/// [`DiagnosticKind`] for which failures a load-time caller must
	/// re-raise instead of swallowing.
	Failed(Box<Diagnostic>),
}

fn parse(name: &str, bytes: &[u8]) -> Option<ClassFile> {
	match mocha::read(bytes) {
		Ok(class) => Some(class),
		Err(error) => {
			warn!("class {name} doesn't parse, leaving it alone: {error:#}");
			None
		},
	}
}

fn failed(kind: DiagnosticKind, class: &ClassFile, error: &Error) -> PatchOutcome {
	let mut diagnostic = Diagnostic::new(kind, class, format!("{error:#}"));
	diagnostic.lazy_vals = describe_candidates(class);
	debug!("full disassembly of the failing class:\n{}", mocha::disasm::class(class));
	PatchOutcome::Failed(Box::new(diagnostic))
}

/// The kind recorded along the error chain wins over the fallback, so an
/// extraction failure inside the rewrite phase reports as one.
fn failed_with_chain_kind(fallback: DiagnosticKind, class: &ClassFile, error: &Error) -> PatchOutcome {
	let kind = error.downcast_ref::<DiagnosticKind>().copied().unwrap_or(fallback);
	failed(kind, class, error)
}

fn any_rewritable(detections: &[&Detection]) -> bool {
	detections.iter()
		.flat_map(|detection| &detection.lazy_vals)
		.any(|info| info.family != Family::HandleBased)
}

fn any_lazy_vals(detections: &[&Detection]) -> bool {
	detections.iter().any(|detection| !detection.lazy_vals.is_empty())
}

/// Patches one group. See the crate docs for the overall contract; in short:
///
/// - a group without lazy vals, or already fully handle-based, is
///   [`PatchOutcome::NotApplicable`] and must be kept byte-for-byte;
/// - any classification, extraction, or assembly problem fails the whole
///   group — no partial rewrites;
/// - on success every lazy val of the group detects as handle-based, making
///   the patch idempotent.
///
/// The `loader` feeds supertype resolution for frame recomputation (see
/// [`crate::supertypes`]); it is never asked to load or initialize a class.
pub fn patch(group: &ClassfileGroup, options: &PatchOptions, loader: &dyn ResourceLoader) -> PatchOutcome {
	match group {
		ClassfileGroup::Singleton { name, bytes } => {
			let Some(mut class) = parse(name, bytes) else {
				return PatchOutcome::NotApplicable(NotApplicableReason::Malformed);
			};

			let detection = match detect(&class, None, options) {
				Ok(detection) => detection,
				Err(error) => return failed(DiagnosticKind::Unknown, &class, &error),
			};
			if !any_lazy_vals(&[&detection]) {
				return PatchOutcome::NotApplicable(NotApplicableReason::NoLazyVals);
			}
			if !any_rewritable(&[&detection]) {
				debug!("{name} is already handle-based");
				return PatchOutcome::NotApplicable(NotApplicableReason::AlreadyHandleBased);
			}

			if let Err(error) = rewrite_group(&mut class, None, &detection, options) {
				return failed_with_chain_kind(DiagnosticKind::RewriteFailure, &class, &error);
			}

			let provider = GroupSuperClassProvider::new(&[&class], loader);
			match mocha::write(&class, &provider) {
				Ok(patched) => {
					info!("patched {name} ({} lazy vals)", detection.lazy_vals.len());
					PatchOutcome::PatchedSingle { name: name.clone(), bytes: patched }
				},
				Err(error) => failed(DiagnosticKind::RewriteFailure, &class, &error),
			}
		},

		ClassfileGroup::CompanionPair { object_name, class_name, object_bytes, class_bytes } => {
			let Some(mut object) = parse(object_name, object_bytes) else {
				return PatchOutcome::NotApplicable(NotApplicableReason::Malformed);
			};
			let Some(mut class) = parse(class_name, class_bytes) else {
				return PatchOutcome::NotApplicable(NotApplicableReason::Malformed);
			};

			// both halves can hold lazy vals; classification happens on the
			// pristine trees
			let object_detection = match detect(&object, Some(&class), options) {
				Ok(detection) => detection,
				Err(error) => return failed(DiagnosticKind::Unknown, &object, &error),
			};
			let class_detection = match detect(&class, Some(&object), options) {
				Ok(detection) => detection,
				Err(error) => return failed(DiagnosticKind::Unknown, &class, &error),
			};

			if !any_lazy_vals(&[&object_detection, &class_detection]) {
				return PatchOutcome::NotApplicable(NotApplicableReason::NoLazyVals);
			}
			if !any_rewritable(&[&object_detection, &class_detection]) {
				debug!("{object_name} / {class_name} are already handle-based");
				return PatchOutcome::NotApplicable(NotApplicableReason::AlreadyHandleBased);
			}

			if object_detection.lazy_vals.iter().any(|info| info.family != Family::HandleBased) {
				if let Err(error) = rewrite_group(&mut object, Some(&mut class), &object_detection, options) {
					return failed_with_chain_kind(DiagnosticKind::RewriteFailure, &object, &error);
				}
			}

			if class_detection.lazy_vals.iter().any(|info| info.family != Family::HandleBased) {
				// the object-side rewrite may have edited the class's
				// <clinit>, so the class side is re-detected for fresh
				// instruction indices
				let class_detection = match detect(&class, Some(&object), options) {
					Ok(detection) => detection,
					Err(error) => return failed(DiagnosticKind::Unknown, &class, &error),
				};
				if let Err(error) = rewrite_group(&mut class, Some(&mut object), &class_detection, options) {
					return failed_with_chain_kind(DiagnosticKind::RewriteFailure, &class, &error);
				}
			}

			let provider = GroupSuperClassProvider::new(&[&object, &class], loader);
			let patched_object = match mocha::write(&object, &provider) {
				Ok(bytes) => bytes,
				Err(error) => return failed(DiagnosticKind::RewriteFailure, &object, &error),
			};
			let patched_class = match mocha::write(&class, &provider) {
				Ok(bytes) => bytes,
				Err(error) => return failed(DiagnosticKind::RewriteFailure, &class, &error),
			};

			info!("patched companion pair {object_name} / {class_name}");
			PatchOutcome::PatchedPair {
				object_name: object_name.clone(),
				class_name: class_name.clone(),
				object_bytes: patched_object,
				class_bytes: patched_class,
			}
		},
	}
}

/// Parking space for the second half of a patched companion pair, for callers
/// that receive classes one at a time.
///
/// Thread-safe; the take side is atomic, so two concurrent definers of the
/// same class get the bytes exactly once. An entry whose class never arrives
/// stays for the life of the process, which is bounded by the number of
/// companion pairs ever patched.
#[derive(Debug, Default)]
pub struct CompanionBuffer {
	inner: Mutex<HashMap<String, Vec<u8>>>,
}

impl CompanionBuffer {
	pub fn new() -> CompanionBuffer {
		CompanionBuffer::default()
	}

	/// Parks patched bytes under a dotted class name.
	pub fn put(&self, name: String, bytes: Vec<u8>) {
		// a poisoned lock means a panic while holding it; nothing here panics
		if let Ok(mut inner) = self.inner.lock() {
			inner.insert(name, bytes);
		}
	}

	/// Removes and returns the parked bytes for a dotted class name.
	pub fn take(&self, name: &str) -> Option<Vec<u8>> {
		self.inner.lock().ok()?.remove(name)
	}
}

#[cfg(test)]
mod testing {
	use pretty_assertions::assert_eq;
	use super::CompanionBuffer;

	#[test]
	fn take_is_remove() {
		let buffer = CompanionBuffer::new();
		buffer.put("a.Foo".to_owned(), vec![1, 2, 3]);

		assert_eq!(buffer.take("a.Bar"), None);
		assert_eq!(buffer.take("a.Foo"), Some(vec![1, 2, 3]));
		assert_eq!(buffer.take("a.Foo"), None);
	}
}
