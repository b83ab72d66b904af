use std::collections::HashMap;
use anyhow::{bail, Result};
use crate::tree::method::code::Label;

/// A helper struct for reading bytecode offsets into [`Label`]s.
pub(crate) struct Labels {
	code_length: u32,
	labels: HashMap<u32, Label>,
	max_id: u16,
}

impl Labels {
	pub(crate) fn new(code_length: u32) -> Labels {
		Labels {
			code_length,
			labels: HashMap::with_capacity(code_length as usize / 8),
			max_id: 0,
		}
	}

	fn get_or_add_unchecked(&mut self, pc: u32) -> Label {
		let max_id = &mut self.max_id;
		*self.labels.entry(pc).or_insert_with(|| {
			let label = Label { id: *max_id };
			*max_id += 1;
			label
		})
	}

	/// A label for the bytecode offset of an opcode.
	pub(crate) fn get_or_create(&mut self, pc: u32) -> Result<Label> {
		if pc >= self.code_length {
			bail!("label for bytecode offset {pc:?} out of bounds for code length {:?}", self.code_length);
		}
		Ok(self.get_or_add_unchecked(pc))
	}

	/// Like [`Labels::get_or_create`], but also accepting the one-past-the-end
	/// offset used by exclusive range ends.
	pub(crate) fn get_or_create_end_exclusive(&mut self, pc: u32) -> Result<Label> {
		if pc > self.code_length {
			bail!("label for bytecode offset {pc:?} out of bounds for code length {:?}", self.code_length);
		}
		Ok(self.get_or_add_unchecked(pc))
	}

	pub(crate) fn get(&self, pc: u32) -> Option<Label> {
		self.labels.get(&pc).copied()
	}

	/// The highest label id handed out, if any.
	pub(crate) fn max_id(&self) -> u16 {
		self.max_id
	}

	/// All `(offset, label)` pairs.
	pub(crate) fn iter(&self) -> impl Iterator<Item=(u32, Label)> + '_ {
		self.labels.iter().map(|(&pc, &label)| (pc, label))
	}
}
