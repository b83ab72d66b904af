//! Extraction of the user-written initializer expression out of an old
//! accessor or `$lzyINIT` method.
//!
//! Both old schemes publish the computed value right after winning the claim
//! CAS: the CAS helper call is followed by a conditional branch that loops on
//! failure and falls through on success, and the fall-through path computes
//! the value and stores it into a fixed local slot. Everything between the
//! fall-through and that store — exclusive — is the user expression, and it
//! leaves the computed value (in its source type) on the operand stack.
//!
//! A computation that always throws never stores; there the bounded region is
//! the protected range of the try/catch whose handler undoes the claim, and
//! the copy ends in its terminal `athrow`.

use std::collections::{HashMap, HashSet};
use anyhow::{anyhow, bail, Context, Result};
use mocha::tree::method::code::{Code, Instruction, InstructionListEntry, Label};
use mocha::tree::method::Method;
use crate::info::{Family, LazyValInfo};
use crate::runtime_names;
use crate::PatchOptions;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ExtractedInitializer {
	/// The copied instructions, with labels remapped into the target [`Code`].
	pub(crate) instructions: Vec<InstructionListEntry>,
	/// `false` when the computation ends in a throw and control never reaches
	/// a publish step.
	pub(crate) falls_through: bool,
}

/// The name of the claim-CAS helper of the family, and of the helper its
/// failure handler calls to undo the claim.
fn helper_names(family: Family) -> Result<(&'static str, &'static str)> {
	match family {
		Family::ObjectUnsafe => Ok(("objCAS", "objCAS")),
		Family::Bitmap => Ok(("CAS", "setFlag")),
		Family::HandleBased => bail!("nothing to extract from a handle-based lazy val"),
	}
}

/// Extracts the user initializer of `lazy_val` from `source` (the `$lzyINIT`
/// method for the object-unsafe family, the accessor for the bitmap family).
/// Fresh labels are allocated from `target`, the code the result will be
/// spliced into.
pub(crate) fn extract_initializer(
	source: &Method,
	lazy_val: &LazyValInfo,
	options: &PatchOptions,
	target: &mut Code,
) -> Result<ExtractedInitializer> {
	let code = source.code.as_ref()
		.with_context(|| anyhow!("method {:?} has no code", source.name))?;
	let (claim_helper, restore_helper) = helper_names(lazy_val.family)?;
	let lazy_vals_module = runtime_names::lazy_vals_module();

	// the claim CAS: first call of the helper, followed by a branch that
	// loops on failure (so the success path is the fall-through)
	let cas_index = code.instructions.iter()
		.position(|entry| matches!(
			&entry.instruction,
			Instruction::InvokeVirtual(method) if method.class == lazy_vals_module && method.name == *claim_helper
		))
		.with_context(|| anyhow!("no call of the {claim_helper:?} runtime helper in {:?}", source.name))?;
	match code.instructions.get(cas_index + 1).map(|entry| &entry.instruction) {
		Some(Instruction::IfEq(_)) => {},
		other => bail!("the claim CAS in {:?} is not followed by an `ifeq` retry branch but by {other:?}", source.name),
	}
	let start = cas_index + 2;

	// walk forward to the end marker: the typed store of the computed value
	// into the designated slot, or the end of the protecting try range
	let mut end = None;
	for (index, entry) in code.instructions.iter().enumerate().skip(start) {
		let stored_slot = match &entry.instruction {
			Instruction::IStore(lv) | Instruction::LStore(lv) | Instruction::FStore(lv) |
			Instruction::DStore(lv) | Instruction::AStore(lv) => Some(lv.index),
			_ => None,
		};
		if stored_slot == Some(options.value_slot) {
			end = Some((index, true));
			break;
		}
	}

	let (end, falls_through) = match end {
		Some(found) => found,
		None => {
			// no store: the computation must always throw, bounded by the
			// try range whose handler undoes the claim
			let guarding = code.exception_table.iter()
				.filter(|exception| {
					let Ok(range_start) = code.position_of(exception.start) else { return false };
					let Ok(range_end) = code.position_of(exception.end) else { return false };
					range_start <= start && start < range_end
				})
				.find(|exception| {
					handler_calls_helper(code, exception.handler, restore_helper)
				})
				.with_context(|| anyhow!(
					"no store into slot {} after the claim CAS in {:?}, and no try/catch undoing the claim bounds the computation",
					options.value_slot, source.name,
				))?;
			let range_end = code.position_of(guarding.end)?;
			(range_end, false)
		},
	};

	if end <= start {
		bail!("empty initializer range in {:?}", source.name);
	}
	let range = &code.instructions[start..end];

	if !falls_through {
		match range.last().map(|entry| &entry.instruction) {
			Some(instruction) if instruction.ends_flow() => {},
			other => bail!("the always-throwing initializer in {:?} ends in {other:?} instead of leaving the method", source.name),
		}
	}

	// fresh labels for the copy, so the splice can't collide with anything
	// already in the target
	let mut mapping: HashMap<Label, Label> = HashMap::new();
	let inside: HashSet<Label> = range.iter().filter_map(|entry| entry.label).collect();
	for entry in range {
		if let Some(label) = entry.label {
			mapping.entry(label).or_insert_with(|| target.fresh_label());
		}
		for jump_target in entry.instruction.jump_targets() {
			if !inside.contains(&jump_target) {
				bail!("the initializer in {:?} branches out of its own range", source.name);
			}
			mapping.entry(jump_target).or_insert_with(|| target.fresh_label());
		}
	}

	let instructions = range.iter()
		.map(|entry| Ok(InstructionListEntry {
			label: entry.label.map(|label| mapping[&label]),
			instruction: entry.instruction.clone_with_labels(&mapping)?,
		}))
		.collect::<Result<Vec<_>>>()?;

	Ok(ExtractedInitializer { instructions, falls_through })
}

fn handler_calls_helper(code: &Code, handler: Label, helper: &str) -> bool {
	let lazy_vals_module = runtime_names::lazy_vals_module();
	let Ok(handler_index) = code.position_of(handler) else { return false };

	// the handler body is short and straight-line in both old schemes; a
	// small window is plenty
	code.instructions.iter()
		.skip(handler_index)
		.take(16)
		.any(|entry| matches!(
			&entry.instruction,
			Instruction::InvokeVirtual(method) if method.class == lazy_vals_module && method.name == *helper
		))
}
