use std::collections::HashMap;
use anyhow::{anyhow, bail, Context, Result};
use crate::class_constants::atype;
use crate::tree::class::ClassName;
use crate::tree::field::{FieldDescriptor, FieldName, FieldRef, FieldSignature};
use crate::tree::method::{MethodDescriptor, MethodName, MethodRef};

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionListEntry {
	pub label: Option<Label>,
	pub instruction: Instruction,
}

/// Represents the code of a method.
///
/// `max_stack` and `max_locals` are optional: the writer recomputes them
/// (together with the stack map frames) for any class file version that
/// carries frames, so code built by hand doesn't need to fill them in.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Code {
	pub max_stack: Option<u16>,
	pub max_locals: Option<u16>,

	pub instructions: Vec<InstructionListEntry>,
	pub exception_table: Vec<Exception>,
	pub last_label: Option<Label>,

	pub line_numbers: Option<Vec<(Label, u16)>>,
	pub local_variables: Option<Vec<Lv>>,

	pub(crate) next_label_id: u16,
}

impl Code {
	pub fn new() -> Code {
		Code::default()
	}

	/// A fresh label, distinct from every label handed out for this code so far.
	///
	/// Labels coming out of the class reader are also accounted for, as long as
	/// they were registered through [`Code::note_label`].
	pub fn fresh_label(&mut self) -> Label {
		let label = Label { id: self.next_label_id };
		self.next_label_id += 1;
		label
	}

	/// Makes sure [`Code::fresh_label`] never hands out `label` again.
	pub fn note_label(&mut self, label: Label) {
		self.next_label_id = self.next_label_id.max(label.id + 1);
	}

	pub fn push(&mut self, instruction: Instruction) {
		self.instructions.push(InstructionListEntry { label: None, instruction });
	}

	pub fn push_labeled(&mut self, label: Label, instruction: Instruction) {
		self.note_label(label);
		self.instructions.push(InstructionListEntry { label: Some(label), instruction });
	}

	/// The position of the instruction carrying the given label.
	pub fn position_of(&self, label: Label) -> Result<usize> {
		self.instructions.iter()
			.position(|entry| entry.label == Some(label))
			.with_context(|| anyhow!("no instruction carries label {label:?}"))
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
	pub start: Label,
	pub end: Label,
	pub handler: Label,
	pub catch: Option<ClassName>,
}

/// Represents an index of a local variable.
///
/// If the local variable is of type `double` or `long`, it also occupies
/// the [`LvIndex`] with `index = index + 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LvIndex {
	pub index: u16,
}

impl From<u16> for LvIndex {
	fn from(index: u16) -> LvIndex {
		LvIndex { index }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lv {
	pub start: Label,
	pub end: Label,
	pub name: String,
	pub descriptor: Option<FieldDescriptor>,
	pub signature: Option<FieldSignature>,
	pub index: LvIndex,
}

/// Represents a bytecode offset of an opcode using a method-local id.
///
/// The id stored in the `id` field does **not** correspond to the bytecode
/// offset in any direct way; it only identifies one position in the
/// instruction list. Offsets are assigned at write time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
	pub id: u16,
}

/// Represents an instruction of the JVM.
///
/// Each instruction can either:
/// - hold no additional data, like [`Instruction::Nop`],
/// - hold some immediate value, like [`Instruction::BiPush`],
/// - hold a [local variable index][LvIndex], like [`Instruction::ILoad`] (note that this also represents the `iload_0` instruction for example),
/// - hold a [`Label`] for jumps, like [`Instruction::IfEq`],
/// - or hold other data the instruction needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
	Nop,
	AConstNull,
	IConstM1, IConst0, IConst1, IConst2, IConst3, IConst4, IConst5,
	LConst0, LConst1,
	FConst0, FConst1, FConst2,
	DConst0, DConst1,
	BiPush(i8),
	SiPush(i16),
	Ldc(Loadable),
	ILoad(LvIndex), LLoad(LvIndex), FLoad(LvIndex), DLoad(LvIndex), ALoad(LvIndex),
	IALoad, LALoad, FALoad, DALoad, AALoad, BALoad, CALoad, SALoad,
	IStore(LvIndex), LStore(LvIndex), FStore(LvIndex), DStore(LvIndex), AStore(LvIndex),
	IAStore, LAStore, FAStore, DAStore, AAStore, BAStore, CAStore, SAStore,
	Pop, Pop2,
	Dup, DupX1, DupX2,
	Dup2, Dup2X1, Dup2X2,
	Swap,
	IAdd, LAdd, FAdd, DAdd,
	ISub, LSub, FSub, DSub,
	IMul, LMul, FMul, DMul,
	IDiv, LDiv, FDiv, DDiv,
	IRem, LRem, FRem, DRem,
	INeg, LNeg, FNeg, DNeg,
	IShl, LShl,
	IShr, LShr,
	IUShr, LUShr,
	IAnd, LAnd,
	IOr, LOr,
	IXor, LXor,
	IInc(LvIndex, i16),
	I2L, I2F, I2D,
	L2I, L2F, L2D,
	F2I, F2L, F2D,
	D2I, D2L, D2F,
	I2B, I2C, I2S,
	LCmp,
	FCmpL, FCmpG,
	DCmpL, DCmpG,
	IfEq(Label), IfNe(Label), IfLt(Label), IfGe(Label), IfGt(Label), IfLe(Label),
	IfICmpEq(Label), IfICmpNe(Label), IfICmpLt(Label), IfICmpGe(Label), IfICmpGt(Label), IfICmpLe(Label),
	IfACmpEq(Label), IfACmpNe(Label),
	Goto(Label),
	Jsr(Label),
	Ret(LvIndex),
	TableSwitch {
		default: Label,
		low: i32,
		high: i32,
		table: Vec<Label>,
	},
	LookupSwitch {
		default: Label,
		/// Note that these must be ordered.
		pairs: Vec<(i32, Label)>
	},
	IReturn, LReturn, FReturn, DReturn, AReturn,
	Return,
	GetStatic(FieldRef),
	PutStatic(FieldRef),
	GetField(FieldRef),
	PutField(FieldRef),
	InvokeVirtual(MethodRef),
	/// The bool is `true` iff it's on an interface, so if it referenced an `InterfaceMethodRef` constant pool entry.
	InvokeSpecial(MethodRef, bool),
	/// The bool is `true` iff it's on an interface, so if it referenced an `InterfaceMethodRef` constant pool entry.
	InvokeStatic(MethodRef, bool),
	/// `invokeinterface` always uses an `InterfaceMethodRef` constant pool entry.
	InvokeInterface(MethodRef),
	InvokeDynamic(InvokeDynamic),
	New(ClassName),
	NewArray(ArrayType),
	ANewArray(ClassName),
	ArrayLength,
	AThrow,
	CheckCast(ClassName),
	InstanceOf(ClassName),
	MonitorEnter, MonitorExit,
	MultiANewArray(ClassName, u8),
	IfNull(Label), IfNonNull(Label),
}

impl Instruction {
	/// The branch target(s) of this instruction, if any.
	pub fn jump_targets(&self) -> Vec<Label> {
		match self {
			Instruction::IfEq(label) | Instruction::IfNe(label) |
			Instruction::IfLt(label) | Instruction::IfGe(label) |
			Instruction::IfGt(label) | Instruction::IfLe(label) |
			Instruction::IfICmpEq(label) | Instruction::IfICmpNe(label) |
			Instruction::IfICmpLt(label) | Instruction::IfICmpGe(label) |
			Instruction::IfICmpGt(label) | Instruction::IfICmpLe(label) |
			Instruction::IfACmpEq(label) | Instruction::IfACmpNe(label) |
			Instruction::IfNull(label) | Instruction::IfNonNull(label) |
			Instruction::Goto(label) | Instruction::Jsr(label) => vec![*label],
			Instruction::TableSwitch { default, table, .. } => {
				let mut targets = vec![*default];
				targets.extend_from_slice(table);
				targets
			},
			Instruction::LookupSwitch { default, pairs } => {
				let mut targets = vec![*default];
				targets.extend(pairs.iter().map(|&(_, label)| label));
				targets
			},
			_ => Vec::new(),
		}
	}

	/// `true` if control never continues at the following instruction.
	pub fn ends_flow(&self) -> bool {
		matches!(self,
			Instruction::Goto(_) |
			Instruction::TableSwitch { .. } | Instruction::LookupSwitch { .. } |
			Instruction::IReturn | Instruction::LReturn | Instruction::FReturn |
			Instruction::DReturn | Instruction::AReturn | Instruction::Return |
			Instruction::AThrow |
			Instruction::Ret(_)
		)
	}

	/// Clones the instruction, sending every held [`Label`] through `map`.
	pub fn clone_with_labels(&self, map: &HashMap<Label, Label>) -> Result<Instruction> {
		fn get(map: &HashMap<Label, Label>, label: &Label) -> Result<Label> {
			map.get(label).copied()
				.with_context(|| anyhow!("no mapping for label {label:?}"))
		}

		Ok(match self {
			Instruction::IfEq(l) => Instruction::IfEq(get(map, l)?),
			Instruction::IfNe(l) => Instruction::IfNe(get(map, l)?),
			Instruction::IfLt(l) => Instruction::IfLt(get(map, l)?),
			Instruction::IfGe(l) => Instruction::IfGe(get(map, l)?),
			Instruction::IfGt(l) => Instruction::IfGt(get(map, l)?),
			Instruction::IfLe(l) => Instruction::IfLe(get(map, l)?),
			Instruction::IfICmpEq(l) => Instruction::IfICmpEq(get(map, l)?),
			Instruction::IfICmpNe(l) => Instruction::IfICmpNe(get(map, l)?),
			Instruction::IfICmpLt(l) => Instruction::IfICmpLt(get(map, l)?),
			Instruction::IfICmpGe(l) => Instruction::IfICmpGe(get(map, l)?),
			Instruction::IfICmpGt(l) => Instruction::IfICmpGt(get(map, l)?),
			Instruction::IfICmpLe(l) => Instruction::IfICmpLe(get(map, l)?),
			Instruction::IfACmpEq(l) => Instruction::IfACmpEq(get(map, l)?),
			Instruction::IfACmpNe(l) => Instruction::IfACmpNe(get(map, l)?),
			Instruction::IfNull(l) => Instruction::IfNull(get(map, l)?),
			Instruction::IfNonNull(l) => Instruction::IfNonNull(get(map, l)?),
			Instruction::Goto(l) => Instruction::Goto(get(map, l)?),
			Instruction::Jsr(l) => Instruction::Jsr(get(map, l)?),
			Instruction::TableSwitch { default, low, high, table } => Instruction::TableSwitch {
				default: get(map, default)?,
				low: *low,
				high: *high,
				table: table.iter().map(|l| get(map, l)).collect::<Result<_>>()?,
			},
			Instruction::LookupSwitch { default, pairs } => Instruction::LookupSwitch {
				default: get(map, default)?,
				pairs: pairs.iter().map(|&(key, l)| Ok((key, get(map, &l)?))).collect::<Result<_>>()?,
			},
			other => other.clone(),
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum Loadable {
	Integer(i32),
	Float(f32),
	Long(i64),
	Double(f64),
	Class(ClassName),
	String(String),
	MethodHandle(Handle),
	MethodType(MethodDescriptor),
	Dynamic(ConstantDynamic),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Handle {
	GetField(FieldRef),
	GetStatic(FieldRef),
	PutField(FieldRef),
	PutStatic(FieldRef),
	InvokeVirtual(MethodRef),
	InvokeStatic(MethodRef, bool),
	InvokeSpecial(MethodRef, bool),
	NewInvokeSpecial(MethodRef),
	InvokeInterface(MethodRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDynamic {
	pub name: FieldName,
	pub descriptor: FieldDescriptor,
	pub handle: Handle,
	pub arguments: Vec<Loadable>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvokeDynamic {
	pub name: MethodName,
	pub descriptor: MethodDescriptor,
	pub handle: Handle,
	pub arguments: Vec<Loadable>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ArrayType {
	Boolean,
	Char,
	Float,
	Double,
	Byte,
	Short,
	Int,
	Long,
}

impl ArrayType {
	pub(crate) fn from_atype(value: u8) -> Result<ArrayType> {
		match value {
			atype::T_BOOLEAN => Ok(ArrayType::Boolean),
			atype::T_CHAR    => Ok(ArrayType::Char),
			atype::T_FLOAT   => Ok(ArrayType::Float),
			atype::T_DOUBLE  => Ok(ArrayType::Double),
			atype::T_BYTE    => Ok(ArrayType::Byte),
			atype::T_SHORT   => Ok(ArrayType::Short),
			atype::T_INT     => Ok(ArrayType::Int),
			atype::T_LONG    => Ok(ArrayType::Long),
			_ => bail!("unknown array type {value:x}"),
		}
	}

	pub(crate) fn to_atype(self) -> u8 {
		match self {
			ArrayType::Boolean => atype::T_BOOLEAN,
			ArrayType::Char    => atype::T_CHAR,
			ArrayType::Float   => atype::T_FLOAT,
			ArrayType::Double  => atype::T_DOUBLE,
			ArrayType::Byte    => atype::T_BYTE,
			ArrayType::Short   => atype::T_SHORT,
			ArrayType::Int     => atype::T_INT,
			ArrayType::Long    => atype::T_LONG,
		}
	}

	/// The field descriptor of an array of this element type, e.g. `[I`.
	pub(crate) fn array_descriptor(self) -> &'static str {
		match self {
			ArrayType::Boolean => "[Z",
			ArrayType::Char    => "[C",
			ArrayType::Float   => "[F",
			ArrayType::Double  => "[D",
			ArrayType::Byte    => "[B",
			ArrayType::Short   => "[S",
			ArrayType::Int     => "[I",
			ArrayType::Long    => "[J",
		}
	}
}
