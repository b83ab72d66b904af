use std::collections::HashMap;
use anyhow::{anyhow, Context, Result};
use crate::tree::method::code::Label;

/// A helper struct for writing [`Label`]s as bytecode offsets.
pub(crate) struct Labels {
	/// From an instruction index (so index into the instruction list) to the
	/// bytecode offset.
	index_to_offset: HashMap<usize, u16>,
	/// [`Label`] to bytecode offsets mapping.
	labels: HashMap<Label, u16>,
}

impl Labels {
	pub(crate) fn new() -> Labels {
		Labels {
			index_to_offset: HashMap::new(),
			labels: HashMap::new(),
		}
	}

	pub(crate) fn add_instruction(&mut self, instruction_index: usize, opcode_pos: u16) {
		self.index_to_offset.insert(instruction_index, opcode_pos);
	}

	/// Adds a known [`Label`] to opcode position mapping.
	pub(crate) fn add_opcode_pos_label(&mut self, label: Label, opcode_pos: u16) {
		self.labels.insert(label, opcode_pos);
	}

	pub(crate) fn get(&self, target: &Label) -> Option<u16> {
		self.labels.get(target).copied()
	}

	pub(crate) fn try_get(&self, target: &Label) -> Result<u16> {
		self.get(target).with_context(|| anyhow!("no bytecode offset for label {target:?}"))
	}

	pub(crate) fn try_get_index(&self, instruction_index: usize) -> Result<u16> {
		self.index_to_offset.get(&instruction_index).copied()
			.with_context(|| anyhow!("no bytecode offset for instruction index {instruction_index}"))
	}
}
