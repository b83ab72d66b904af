//! Recomputation of stack map frames.
//!
//! A forward dataflow over a method's instruction list, tracking verification
//! types per local variable slot and operand stack entry. The results are the
//! frames at every branch target and exception handler, plus `max_stack` and
//! `max_locals` — everything the `Code` attribute needs that the tree doesn't
//! carry.
//!
//! Local variable slots are tracked physically: a `long`/`double` occupies its
//! slot plus a `Top` in the following one. The written `StackMapTable` form
//! collapses that pair back into one entry.

use std::collections::HashMap;
use anyhow::{anyhow, bail, Context, Result};
use crate::supers::{common_super_class, SuperClassProvider};
use crate::tree::class::ClassName;
use crate::tree::descriptor::{parse_field_descriptor, parse_method_descriptor, BaseType, Type};
use crate::tree::method::code::{Code, Instruction, InstructionListEntry, Label, Loadable};
use crate::tree::method::{Method, MethodName};

/// A verification type, as in the `StackMapTable` attribute.
///
/// `Uninitialized` carries the instruction list index of its `new`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum VType {
	Top,
	Integer,
	Float,
	Long,
	Double,
	Null,
	UninitializedThis,
	Uninitialized(usize),
	Object(ClassName),
}

impl VType {
	fn is_category_2(&self) -> bool {
		matches!(self, VType::Long | VType::Double)
	}

	fn weight(&self) -> u32 {
		if self.is_category_2() { 2 } else { 1 }
	}

	fn of_type(parsed: &Type) -> VType {
		match parsed {
			Type::Base(BaseType::B | BaseType::C | BaseType::I | BaseType::S | BaseType::Z) => VType::Integer,
			Type::Base(BaseType::F) => VType::Float,
			Type::Base(BaseType::J) => VType::Long,
			Type::Base(BaseType::D) => VType::Double,
			Type::Object(name) => VType::Object(name.clone()),
			Type::Array(..) => VType::Object(ClassName::from(parsed.to_descriptor_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
	pub(crate) locals: Vec<VType>,
	pub(crate) stack: Vec<VType>,
}

impl Frame {
	fn stack_weight(&self) -> u32 {
		self.stack.iter().map(VType::weight).sum()
	}

	fn push(&mut self, v: VType) {
		self.stack.push(v);
	}

	fn pop(&mut self) -> Result<VType> {
		self.stack.pop().context("operand stack underflow")
	}

	fn pop_category_1(&mut self) -> Result<VType> {
		let v = self.pop()?;
		if v.is_category_2() {
			bail!("expected a category 1 value on the operand stack, got {v:?}");
		}
		Ok(v)
	}

	/// Pops either one category 2 value or two category 1 values, bottom first.
	fn pop_block(&mut self) -> Result<Vec<VType>> {
		let top = self.pop()?;
		if top.is_category_2() {
			Ok(vec![top])
		} else {
			let below = self.pop_category_1()?;
			Ok(vec![below, top])
		}
	}

	fn push_block(&mut self, block: &[VType]) {
		for v in block {
			self.push(v.clone());
		}
	}

	fn local(&self, index: u16) -> Result<VType> {
		self.locals.get(index as usize).cloned()
			.with_context(|| anyhow!("local variable slot {index} out of range"))
	}

	fn set_local(&mut self, index: u16, v: VType) {
		let index = index as usize;
		let wide = v.is_category_2();
		let needed = index + if wide { 2 } else { 1 };
		if self.locals.len() < needed {
			self.locals.resize(needed, VType::Top);
		}
		// storing over the second half of a long/double kills the pair
		if index > 0 && self.locals[index - 1].is_category_2() {
			self.locals[index - 1] = VType::Top;
		}
		if self.locals[index].is_category_2() && self.locals.len() > index + 1 {
			self.locals[index + 1] = VType::Top;
		}
		self.locals[index] = v;
		if wide {
			self.locals[index + 1] = VType::Top;
		}
	}

	/// Replaces every occurrence of `from` in locals and stack with `to`.
	fn replace(&mut self, from: &VType, to: &VType) {
		for v in self.locals.iter_mut().chain(self.stack.iter_mut()) {
			if v == from {
				*v = to.clone();
			}
		}
	}
}

pub(crate) struct MethodAnalysis {
	pub(crate) max_stack: u16,
	pub(crate) max_locals: u16,
	/// Frames at branch targets and handler entries, by instruction index, ascending.
	pub(crate) frames: Vec<(usize, Frame)>,
}

fn merge_vtype(provider: &dyn SuperClassProvider, a: &VType, b: &VType) -> Result<VType> {
	Ok(match (a, b) {
		(a, b) if a == b => a.clone(),
		(VType::Null, VType::Object(t)) | (VType::Object(t), VType::Null) => VType::Object(t.clone()),
		(VType::Object(x), VType::Object(y)) => VType::Object(common_super_class(provider, x, y)?),
		_ => VType::Top,
	})
}

fn merge_into(provider: &dyn SuperClassProvider, target: &mut Option<Frame>, incoming: &Frame) -> Result<bool> {
	let Some(existing) = target else {
		*target = Some(incoming.clone());
		return Ok(true);
	};

	if existing.stack.len() != incoming.stack.len() {
		bail!("operand stack size mismatch at branch join: {} vs {}", existing.stack.len(), incoming.stack.len());
	}

	let mut changed = false;

	let locals_len = existing.locals.len().max(incoming.locals.len());
	for i in 0..locals_len {
		let a = existing.locals.get(i).cloned().unwrap_or(VType::Top);
		let b = incoming.locals.get(i).cloned().unwrap_or(VType::Top);
		let merged = merge_vtype(provider, &a, &b)?;
		if existing.locals.get(i) != Some(&merged) {
			if existing.locals.len() <= i {
				existing.locals.resize(i + 1, VType::Top);
			}
			existing.locals[i] = merged;
			changed = true;
		}
	}

	for i in 0..existing.stack.len() {
		let merged = merge_vtype(provider, &existing.stack[i], &incoming.stack[i])?;
		if merged == VType::Top && !(existing.stack[i] == VType::Top && incoming.stack[i] == VType::Top) {
			bail!("incompatible operand stack types at branch join: {:?} vs {:?}", existing.stack[i], incoming.stack[i]);
		}
		if existing.stack[i] != merged {
			existing.stack[i] = merged;
			changed = true;
		}
	}

	Ok(changed)
}

fn initial_frame(class_name: &ClassName, method: &Method) -> Result<Frame> {
	let mut frame = Frame { locals: Vec::new(), stack: Vec::new() };

	let mut slot = 0u16;
	if !method.access.is_static {
		let this = if method.name == MethodName::INIT {
			VType::UninitializedThis
		} else {
			VType::Object(class_name.clone())
		};
		frame.set_local(slot, this);
		slot += 1;
	}

	let descriptor = parse_method_descriptor(&method.descriptor)?;
	for parameter in &descriptor.parameters {
		let v = VType::of_type(parameter);
		let wide = v.is_category_2();
		frame.set_local(slot, v);
		slot += if wide { 2 } else { 1 };
	}

	Ok(frame)
}

pub(crate) fn analyze(
	class_name: &ClassName,
	method: &Method,
	code: &Code,
	provider: &dyn SuperClassProvider,
) -> Result<MethodAnalysis> {
	let instructions = &code.instructions;
	let n = instructions.len();
	if n == 0 {
		bail!("method {:?} has an empty instruction list", method.name);
	}

	let mut label_to_index: HashMap<Label, usize> = HashMap::new();
	for (index, entry) in instructions.iter().enumerate() {
		if let Some(label) = entry.label {
			if label_to_index.insert(label, index).is_some() {
				bail!("label {label:?} appears twice in method {:?}", method.name);
			}
		}
	}
	if let Some(last_label) = code.last_label {
		label_to_index.insert(last_label, n);
	}
	let index_of = |label: &Label| -> Result<usize> {
		label_to_index.get(label).copied()
			.with_context(|| anyhow!("label {label:?} is not attached to any instruction of method {:?}", method.name))
	};

	// exception ranges as index ranges
	struct Handler {
		start: usize,
		end: usize,
		handler: usize,
		catch: VType,
	}
	let mut handlers = Vec::with_capacity(code.exception_table.len());
	for exception in &code.exception_table {
		let handler = index_of(&exception.handler)?;
		if handler >= n {
			bail!("exception handler past the end of method {:?}", method.name);
		}
		handlers.push(Handler {
			start: index_of(&exception.start)?,
			end: index_of(&exception.end)?,
			handler,
			catch: VType::Object(exception.catch.clone()
				.unwrap_or_else(|| ClassName::from("java/lang/Throwable"))),
		});
	}

	let mut states: Vec<Option<Frame>> = vec![None; n];
	states[0] = Some(initial_frame(class_name, method)?);

	let mut worklist = vec![0usize];
	let mut max_stack = states[0].as_ref().map(Frame::stack_weight).unwrap_or(0);
	let mut max_locals = states[0].as_ref().map(|frame| frame.locals.len()).unwrap_or(0);

	// every branch target and handler entry needs a frame in the table
	let mut needs_frame = vec![false; n + 1];
	for handler in &handlers {
		needs_frame[handler.handler] = true;
	}
	for entry in instructions {
		for target in entry.instruction.jump_targets() {
			needs_frame[index_of(&target)?] = true;
		}
	}

	while let Some(index) = worklist.pop() {
		let frame = states[index].clone()
			.with_context(|| anyhow!("worklist entry {index} has no state"))?;

		// the entry state counts too: an exception handler's deepest stack is
		// its entry, with nothing downstream ever that deep again
		max_stack = max_stack.max(frame.stack_weight());
		max_locals = max_locals.max(frame.locals.len());

		// anything in a protected range can transfer control to the handler
		for handler in &handlers {
			if handler.start <= index && index < handler.end {
				let incoming = Frame {
					locals: frame.locals.clone(),
					stack: vec![handler.catch.clone()],
				};
				if merge_into(provider, &mut states[handler.handler], &incoming)? {
					worklist.push(handler.handler);
				}
			}
		}

		let instruction = &instructions[index].instruction;
		let mut out = frame;
		step(&mut out, instruction, index, instructions, class_name)
			.with_context(|| anyhow!("in method {:?} at instruction {index} ({instruction:?})", method.name))?;

		max_stack = max_stack.max(out.stack_weight());
		max_locals = max_locals.max(out.locals.len());

		let mut successors = Vec::new();
		if !instruction.ends_flow() {
			let next = index + 1;
			if next >= n {
				bail!("control flow falls off the end of method {:?}", method.name);
			}
			successors.push(next);
		}
		for target in instruction.jump_targets() {
			successors.push(index_of(&target)?);
		}

		for successor in successors {
			if successor >= n {
				bail!("branch target past the end of method {:?}", method.name);
			}
			if merge_into(provider, &mut states[successor], &out)? {
				worklist.push(successor);
			}
		}
	}

	// dead code can't get a valid frame; refuse to write it
	for (index, state) in states.iter().enumerate() {
		if state.is_none() {
			bail!("unreachable instruction {index} ({:?}) in method {:?}",
				instructions[index].instruction, method.name);
		}
	}

	let mut frames = Vec::new();
	for (index, needed) in needs_frame.iter().enumerate().take(n) {
		if *needed {
			let frame = states[index].clone()
				.with_context(|| anyhow!("no frame for branch target {index}"))?;
			frames.push((index, frame));
		}
	}

	Ok(MethodAnalysis {
		max_stack: u16::try_from(max_stack).context("operand stack too deep")?,
		max_locals: u16::try_from(max_locals).context("too many local variables")?,
		frames,
	})
}

/// Applies one instruction to the frame.
fn step(
	frame: &mut Frame,
	instruction: &Instruction,
	index: usize,
	instructions: &[InstructionListEntry],
	class_name: &ClassName,
) -> Result<()> {
	use Instruction as I;

	// pops the arguments of a call, right to left
	fn pop_arguments(frame: &mut Frame, parameters: &[Type]) -> Result<()> {
		for _ in parameters {
			frame.pop()?;
		}
		Ok(())
	}

	fn push_return(frame: &mut Frame, return_type: &Option<Type>) {
		if let Some(parsed) = return_type {
			frame.push(VType::of_type(parsed));
		}
	}

	match instruction {
		I::Nop => {},
		I::AConstNull => frame.push(VType::Null),
		I::IConstM1 | I::IConst0 | I::IConst1 | I::IConst2 | I::IConst3 | I::IConst4 | I::IConst5 |
		I::BiPush(_) | I::SiPush(_) => frame.push(VType::Integer),
		I::LConst0 | I::LConst1 => frame.push(VType::Long),
		I::FConst0 | I::FConst1 | I::FConst2 => frame.push(VType::Float),
		I::DConst0 | I::DConst1 => frame.push(VType::Double),
		I::Ldc(loadable) => frame.push(match loadable {
			Loadable::Integer(_) => VType::Integer,
			Loadable::Float(_) => VType::Float,
			Loadable::Long(_) => VType::Long,
			Loadable::Double(_) => VType::Double,
			Loadable::Class(_) => VType::Object(ClassName::from("java/lang/Class")),
			Loadable::String(_) => VType::Object(ClassName::from("java/lang/String")),
			Loadable::MethodHandle(_) => VType::Object(ClassName::from("java/lang/invoke/MethodHandle")),
			Loadable::MethodType(_) => VType::Object(ClassName::from("java/lang/invoke/MethodType")),
			Loadable::Dynamic(dynamic) => VType::of_type(&parse_field_descriptor(&dynamic.descriptor)?),
		}),

		I::ILoad(_) => frame.push(VType::Integer),
		I::LLoad(_) => frame.push(VType::Long),
		I::FLoad(_) => frame.push(VType::Float),
		I::DLoad(_) => frame.push(VType::Double),
		I::ALoad(lv) => {
			let v = frame.local(lv.index)?;
			match v {
				VType::Null | VType::Object(_) | VType::Uninitialized(_) | VType::UninitializedThis => frame.push(v),
				other => bail!("aload of a non-reference local: {other:?}"),
			}
		},

		I::IALoad | I::BALoad | I::CALoad | I::SALoad => { frame.pop()?; frame.pop()?; frame.push(VType::Integer); },
		I::LALoad => { frame.pop()?; frame.pop()?; frame.push(VType::Long); },
		I::FALoad => { frame.pop()?; frame.pop()?; frame.push(VType::Float); },
		I::DALoad => { frame.pop()?; frame.pop()?; frame.push(VType::Double); },
		I::AALoad => {
			frame.pop()?;
			let array = frame.pop()?;
			match array {
				VType::Null => frame.push(VType::Null),
				VType::Object(name) if name.is_array() => {
					let element = name.as_str().strip_prefix('[')
						.with_context(|| anyhow!("array class name {name:?} has no `[`"))?;
					let element = match element.strip_prefix('L').and_then(|e| e.strip_suffix(';')) {
						Some(object) => ClassName::from(object),
						None => ClassName::from(element),
					};
					frame.push(VType::Object(element));
				},
				other => bail!("aaload on non-array {other:?}"),
			}
		},

		I::IStore(lv) => { frame.pop()?; frame.set_local(lv.index, VType::Integer); },
		I::LStore(lv) => { frame.pop()?; frame.set_local(lv.index, VType::Long); },
		I::FStore(lv) => { frame.pop()?; frame.set_local(lv.index, VType::Float); },
		I::DStore(lv) => { frame.pop()?; frame.set_local(lv.index, VType::Double); },
		I::AStore(lv) => {
			let v = frame.pop()?;
			frame.set_local(lv.index, v);
		},

		I::IAStore | I::LAStore | I::FAStore | I::DAStore | I::AAStore |
		I::BAStore | I::CAStore | I::SAStore => { frame.pop()?; frame.pop()?; frame.pop()?; },

		I::Pop => { frame.pop_category_1()?; },
		I::Pop2 => { frame.pop_block()?; },
		I::Dup => {
			let v = frame.pop_category_1()?;
			frame.push(v.clone());
			frame.push(v);
		},
		I::DupX1 => {
			let v1 = frame.pop_category_1()?;
			let v2 = frame.pop_category_1()?;
			frame.push(v1.clone());
			frame.push(v2);
			frame.push(v1);
		},
		I::DupX2 => {
			let v1 = frame.pop_category_1()?;
			let block = frame.pop_block()?;
			frame.push(v1.clone());
			frame.push_block(&block);
			frame.push(v1);
		},
		I::Dup2 => {
			let block = frame.pop_block()?;
			frame.push_block(&block);
			frame.push_block(&block);
		},
		I::Dup2X1 => {
			let block = frame.pop_block()?;
			let v = frame.pop_category_1()?;
			frame.push_block(&block);
			frame.push(v);
			frame.push_block(&block);
		},
		I::Dup2X2 => {
			let block1 = frame.pop_block()?;
			let block2 = frame.pop_block()?;
			frame.push_block(&block1);
			frame.push_block(&block2);
			frame.push_block(&block1);
		},
		I::Swap => {
			let v1 = frame.pop_category_1()?;
			let v2 = frame.pop_category_1()?;
			frame.push(v1);
			frame.push(v2);
		},

		I::IAdd | I::ISub | I::IMul | I::IDiv | I::IRem |
		I::IShl | I::IShr | I::IUShr | I::IAnd | I::IOr | I::IXor => {
			frame.pop()?; frame.pop()?; frame.push(VType::Integer);
		},
		I::LAdd | I::LSub | I::LMul | I::LDiv | I::LRem |
		I::LAnd | I::LOr | I::LXor => {
			frame.pop()?; frame.pop()?; frame.push(VType::Long);
		},
		// the shift amount of a long shift is an int
		I::LShl | I::LShr | I::LUShr => {
			frame.pop()?; frame.pop()?; frame.push(VType::Long);
		},
		I::FAdd | I::FSub | I::FMul | I::FDiv | I::FRem => {
			frame.pop()?; frame.pop()?; frame.push(VType::Float);
		},
		I::DAdd | I::DSub | I::DMul | I::DDiv | I::DRem => {
			frame.pop()?; frame.pop()?; frame.push(VType::Double);
		},
		I::INeg => { frame.pop()?; frame.push(VType::Integer); },
		I::LNeg => { frame.pop()?; frame.push(VType::Long); },
		I::FNeg => { frame.pop()?; frame.push(VType::Float); },
		I::DNeg => { frame.pop()?; frame.push(VType::Double); },
		I::IInc(..) => {},

		I::I2L | I::F2L | I::D2L => { frame.pop()?; frame.push(VType::Long); },
		I::I2F | I::L2F | I::D2F => { frame.pop()?; frame.push(VType::Float); },
		I::I2D | I::L2D | I::F2D => { frame.pop()?; frame.push(VType::Double); },
		I::L2I | I::F2I | I::D2I | I::I2B | I::I2C | I::I2S => { frame.pop()?; frame.push(VType::Integer); },

		I::LCmp | I::FCmpL | I::FCmpG | I::DCmpL | I::DCmpG => {
			frame.pop()?; frame.pop()?; frame.push(VType::Integer);
		},

		I::IfEq(_) | I::IfNe(_) | I::IfLt(_) | I::IfGe(_) | I::IfGt(_) | I::IfLe(_) |
		I::IfNull(_) | I::IfNonNull(_) => { frame.pop()?; },
		I::IfICmpEq(_) | I::IfICmpNe(_) | I::IfICmpLt(_) | I::IfICmpGe(_) |
		I::IfICmpGt(_) | I::IfICmpLe(_) | I::IfACmpEq(_) | I::IfACmpNe(_) => {
			frame.pop()?; frame.pop()?;
		},
		I::Goto(_) => {},
		I::Jsr(_) | I::Ret(_) => bail!("jsr/ret are not supported"),
		I::TableSwitch { .. } | I::LookupSwitch { .. } => { frame.pop()?; },

		I::IReturn | I::LReturn | I::FReturn | I::DReturn | I::AReturn => { frame.pop()?; },
		I::Return => {},

		I::GetStatic(field) => frame.push(VType::of_type(&parse_field_descriptor(&field.desc)?)),
		I::PutStatic(_) => { frame.pop()?; },
		I::GetField(field) => {
			frame.pop()?;
			frame.push(VType::of_type(&parse_field_descriptor(&field.desc)?));
		},
		I::PutField(_) => { frame.pop()?; frame.pop()?; },

		I::InvokeVirtual(method) | I::InvokeInterface(method) => {
			let descriptor = parse_method_descriptor(&method.desc)?;
			pop_arguments(frame, &descriptor.parameters)?;
			frame.pop()?;
			push_return(frame, &descriptor.return_type);
		},
		I::InvokeSpecial(method, _) => {
			let descriptor = parse_method_descriptor(&method.desc)?;
			pop_arguments(frame, &descriptor.parameters)?;
			let receiver = frame.pop()?;
			if method.name == "<init>" {
				match receiver {
					VType::Uninitialized(new_index) => {
						let new_class = match instructions.get(new_index).map(|e| &e.instruction) {
							Some(I::New(new_class)) => new_class.clone(),
							other => bail!("uninitialized value doesn't come from a `new`: {other:?}"),
						};
						frame.replace(&VType::Uninitialized(new_index), &VType::Object(new_class));
					},
					VType::UninitializedThis => {
						frame.replace(&VType::UninitializedThis, &VType::Object(class_name.clone()));
					},
					// a constructor can also be invoked on an initialized value via super.<init> forms
					// that the verifier already rejected; anything else here is normal
					_ => {},
				}
			}
			push_return(frame, &descriptor.return_type);
		},
		I::InvokeStatic(method, _) => {
			let descriptor = parse_method_descriptor(&method.desc)?;
			pop_arguments(frame, &descriptor.parameters)?;
			push_return(frame, &descriptor.return_type);
		},
		I::InvokeDynamic(dynamic) => {
			let descriptor = parse_method_descriptor(&dynamic.descriptor)?;
			pop_arguments(frame, &descriptor.parameters)?;
			push_return(frame, &descriptor.return_type);
		},

		I::New(_) => frame.push(VType::Uninitialized(index)),
		I::NewArray(array_type) => {
			frame.pop()?;
			frame.push(VType::Object(ClassName::from(array_type.array_descriptor())));
		},
		I::ANewArray(class) => {
			frame.pop()?;
			frame.push(VType::Object(ClassName::from(format!("[{}", class.to_descriptor()))));
		},
		I::MultiANewArray(class, dimensions) => {
			for _ in 0..*dimensions {
				frame.pop()?;
			}
			frame.push(VType::Object(class.clone()));
		},
		I::ArrayLength => { frame.pop()?; frame.push(VType::Integer); },

		I::AThrow => { frame.pop()?; },
		I::CheckCast(class) => {
			frame.pop()?;
			frame.push(VType::Object(class.clone()));
		},
		I::InstanceOf(_) => { frame.pop()?; frame.push(VType::Integer); },
		I::MonitorEnter | I::MonitorExit => { frame.pop()?; },
	}

	Ok(())
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::supers::JdkSuperClassProvider;
	use crate::tree::class::ClassName;
	use crate::tree::field::FieldRef;
	use crate::tree::method::code::{Code, Instruction, LvIndex};
	use crate::tree::method::{Method, MethodAccess, MethodName};
	use super::{analyze, VType};

	fn static_method(descriptor: &str) -> Method {
		let access = MethodAccess { is_static: true, ..MethodAccess::default() };
		Method::new(access, MethodName::from("run"), descriptor.into())
	}

	#[test]
	fn straight_line_max_stack() -> Result<()> {
		let mut code = Code::new();
		code.push(Instruction::IConst1);
		code.push(Instruction::IConst2);
		code.push(Instruction::IAdd);
		code.push(Instruction::IReturn);

		let method = static_method("()I");
		let analysis = analyze(&ClassName::from("Example"), &method, &code, &JdkSuperClassProvider)?;
		assert_eq!(analysis.max_stack, 2);
		assert_eq!(analysis.max_locals, 0);
		assert!(analysis.frames.is_empty());
		Ok(())
	}

	#[test]
	fn branch_gets_a_frame() -> Result<()> {
		let mut code = Code::new();
		let target = code.fresh_label();
		code.push(Instruction::ILoad(LvIndex { index: 0 }));
		code.push(Instruction::IfEq(target));
		code.push(Instruction::IConst1);
		code.push(Instruction::IReturn);
		code.push_labeled(target, Instruction::IConst0);
		code.push(Instruction::IReturn);

		let method = static_method("(I)I");
		let analysis = analyze(&ClassName::from("Example"), &method, &code, &JdkSuperClassProvider)?;
		assert_eq!(analysis.frames.len(), 1);
		let (index, frame) = &analysis.frames[0];
		assert_eq!(*index, 4);
		assert_eq!(frame.locals, vec![VType::Integer]);
		assert_eq!(frame.stack, vec![]);
		Ok(())
	}

	#[test]
	fn reference_merge_uses_common_super_class() -> Result<()> {
		// static Number f(boolean b) { return b ? Integer.valueOf(0) : Long.valueOf(0L); }
		let mut code = Code::new();
		let otherwise = code.fresh_label();
		let done = code.fresh_label();
		code.push(Instruction::ILoad(LvIndex { index: 0 }));
		code.push(Instruction::IfEq(otherwise));
		code.push(Instruction::GetStatic(FieldRef {
			class: ClassName::from("Example"),
			name: "someInteger".into(),
			desc: "Ljava/lang/Integer;".into(),
		}));
		code.push(Instruction::Goto(done));
		code.push_labeled(otherwise, Instruction::GetStatic(FieldRef {
			class: ClassName::from("Example"),
			name: "someLong".into(),
			desc: "Ljava/lang/Long;".into(),
		}));
		code.push_labeled(done, Instruction::AReturn);

		let method = static_method("(I)Ljava/lang/Number;");
		let analysis = analyze(&ClassName::from("Example"), &method, &code, &JdkSuperClassProvider)?;
		let (_, done_frame) = analysis.frames.iter().find(|(index, _)| *index == 5)
			.map(|(index, frame)| (index, frame.clone()))
			.ok_or_else(|| anyhow::anyhow!("no frame at the join"))?;
		assert_eq!(done_frame.stack, vec![VType::Object(ClassName::from("java/lang/Number"))]);
		Ok(())
	}

	#[test]
	fn unreachable_code_is_an_error() {
		let mut code = Code::new();
		code.push(Instruction::Return);
		code.push(Instruction::Nop);

		let method = static_method("()V");
		assert!(analyze(&ClassName::from("Example"), &method, &code, &JdkSuperClassProvider).is_err());
	}

	#[test]
	fn handler_receives_throwable() -> Result<()> {
		let mut code = Code::new();
		let start = code.fresh_label();
		let end = code.fresh_label();
		let handler = code.fresh_label();
		code.push_labeled(start, Instruction::InvokeStatic(crate::tree::method::MethodRef {
			class: ClassName::from("Example"),
			name: "mayThrow".into(),
			desc: "()V".into(),
		}, false));
		code.push_labeled(end, Instruction::Return);
		code.push_labeled(handler, Instruction::AThrow);
		code.exception_table.push(crate::tree::method::code::Exception {
			start, end, handler,
			catch: None,
		});

		let method = static_method("()V");
		let analysis = analyze(&ClassName::from("Example"), &method, &code, &JdkSuperClassProvider)?;
		let handler_frame = analysis.frames.iter().find(|(index, _)| *index == 2)
			.map(|(_, frame)| frame.clone())
			.ok_or_else(|| anyhow::anyhow!("no frame at the handler"))?;
		assert_eq!(handler_frame.stack, vec![VType::Object(ClassName::from("java/lang/Throwable"))]);
		Ok(())
	}
}
