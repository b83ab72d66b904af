use std::collections::HashSet;
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use crate::class_constants::{attribute, opcode};
use crate::class_reader::labels::Labels;
use crate::class_reader::pool::{BootstrapMethodRead, PoolRead};
use crate::{class_constants, ClassRead};
use crate::tree::annotation::{Annotation, ElementValue, ElementValuePair};
use crate::tree::attribute::Attribute;
use crate::tree::class::{ClassFile, EnclosingMethod, InnerClass};
use crate::tree::field::Field;
use crate::tree::method::code::{ArrayType, Code, Exception, Instruction, InstructionListEntry, Label, Lv};
use crate::tree::method::{Method, MethodNameAndDesc, MethodParameter};
use crate::tree::version::Version;

pub(crate) mod pool;
mod labels;

/// Attributes whose payloads contain constant pool indices we don't model.
/// Passing them through raw would leave dangling indices into a pool the
/// writer no longer builds, so they get dropped instead.
const DROPPED_ATTRIBUTES: &[&str] = &[
	attribute::RECORD,
	attribute::RUNTIME_VISIBLE_TYPE_ANNOTATIONS,
	attribute::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS,
	attribute::RUNTIME_VISIBLE_PARAMETER_ANNOTATIONS,
	attribute::RUNTIME_INVISIBLE_PARAMETER_ANNOTATIONS,
	attribute::ANNOTATION_DEFAULT,
	"Module", "ModulePackages", "ModuleMainClass",
];

/// Skips the `attributes_count` and `attributes` items of the structs.
///
/// This is needed whenever we skip reading something, like a field or method.
fn skip_attributes(reader: &mut impl ClassRead) -> Result<()> {
	let attributes_count = reader.read_u16()?;

	for _ in 0..attributes_count {
		let _attribute_name_index = reader.read_u16()?;
		let attribute_length = reader.read_u32()?;

		reader.skip(attribute_length as i64)?;
	}

	Ok(())
}

fn read_up_to_interfaces(reader: &mut impl ClassRead) -> Result<(crate::ClassHeader, PoolRead)> {
	let magic = reader.read_u32()?;
	if magic != class_constants::MAGIC {
		bail!("wrong magic: got {magic:#x}, expected 0xCAFEBABE");
	}

	let minor = reader.read_u16()?;
	let major = reader.read_u16()?;
	let version = Version::new(major, minor);

	if version > Version::V25 {
		bail!("unsupported class file version: {version:?}");
	}
	if major < 45 {
		bail!("invalid class file version: {version:?}");
	}

	let pool = PoolRead::read(reader)?;

	let access = reader.read_u16()?.into();
	let this_class = pool.get_class(reader.read_u16()?)?;
	let super_class = pool.get_optional(reader.read_u16()?, PoolRead::get_class)?;
	let interfaces = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| pool.get_class(r.read_u16()?)
	)?;

	Ok((crate::ClassHeader { version, access, name: this_class, super_class, interfaces }, pool))
}

pub(crate) fn read_header(reader: &mut impl ClassRead) -> Result<crate::ClassHeader> {
	let (header, _) = read_up_to_interfaces(reader)?;
	Ok(header)
}

pub(crate) fn read(reader: &mut (impl ClassRead)) -> Result<ClassFile> {
	let (header, pool_) = read_up_to_interfaces(reader)?;
	let pool = &pool_;

	let mut class = ClassFile::new(header.version, header.access, header.name, header.super_class, header.interfaces);

	// The BootstrapMethods attribute of the class must be available before any
	// ldc of a Dynamic entry or any invokedynamic can be resolved; both sit in
	// method bodies, which come *before* the class attributes in the file. So:
	// remember where the fields begin, skip ahead to the class attributes, and
	// only then come back for fields and methods.
	let fields_start = reader.marker()?;

	// Per field we skip 2 bytes for the access flags, another 2 for the name, and another 2 for the descriptor.
	for _ in 0..reader.read_u16()? {
		reader.skip(2 + 2 + 2)?;
		skip_attributes(reader)?;
	}
	// Methods have the same structure as fields.
	for _ in 0..reader.read_u16()? {
		reader.skip(2 + 2 + 2)?;
		skip_attributes(reader)?;
	}

	let mut bootstrap_methods: Vec<BootstrapMethodRead> = Vec::new();

	let attributes_count = reader.read_u16()?;
	for _ in 0..attributes_count {
		let attribute_name = pool.get_utf8(reader.read_u16()?)?;
		let length = reader.read_u32()?;

		match attribute_name.as_str() {
			attribute::DEPRECATED => class.has_deprecated_attribute = true,
			attribute::SYNTHETIC => class.has_synthetic_attribute = true,
			attribute::SOURCE_FILE => {
				class.source_file = Some(pool.get_utf8(reader.read_u16()?)?);
			},
			attribute::SIGNATURE => {
				class.signature = Some(pool.get_utf8(reader.read_u16()?)?.into());
			},
			attribute::INNER_CLASSES => {
				class.inner_classes = Some(reader.read_vec(
					|r| r.read_u16_as_usize(),
					|r| {
						Ok(InnerClass {
							inner_class: pool.get_class(r.read_u16()?)?,
							outer_class: pool.get_optional(r.read_u16()?, PoolRead::get_class)?,
							inner_name: pool.get_optional(r.read_u16()?, PoolRead::get_utf8)?,
							flags: r.read_u16()?.into(),
						})
					}
				)?);
			},
			attribute::ENCLOSING_METHOD => {
				let enclosing_class = pool.get_class(reader.read_u16()?)?;
				let method = pool.get_optional(reader.read_u16()?, PoolRead::get_name_and_type)?
					.map(|(name, desc)| MethodNameAndDesc { name: name.into(), desc: desc.into() });
				class.enclosing_method = Some(EnclosingMethod { class: enclosing_class, method });
			},
			attribute::NEST_HOST => {
				class.nest_host_class = Some(pool.get_class(reader.read_u16()?)?);
			},
			attribute::NEST_MEMBERS => {
				class.nest_members = Some(reader.read_vec(
					|r| r.read_u16_as_usize(),
					|r| pool.get_class(r.read_u16()?)
				)?);
			},
			attribute::PERMITTED_SUBCLASSES => {
				class.permitted_subclasses = Some(reader.read_vec(
					|r| r.read_u16_as_usize(),
					|r| pool.get_class(r.read_u16()?)
				)?);
			},
			attribute::RUNTIME_VISIBLE_ANNOTATIONS => {
				class.runtime_visible_annotations = read_annotations_attribute(reader, pool)?;
			},
			attribute::RUNTIME_INVISIBLE_ANNOTATIONS => {
				class.runtime_invisible_annotations = read_annotations_attribute(reader, pool)?;
			},
			attribute::BOOTSTRAP_METHODS => {
				bootstrap_methods = reader.read_vec(
					|r| r.read_u16_as_usize(),
					|r| {
						Ok(BootstrapMethodRead {
							handle_index: r.read_u16()?,
							arguments: r.read_vec(
								|r| r.read_u16_as_usize(),
								|r| r.read_u16()
							)?,
						})
					}
				)?;
			},
			name if DROPPED_ATTRIBUTES.contains(&name) => {
				debug!("dropping class attribute {name:?} of {:?}", class.name);
				reader.skip(length as i64)?;
			},
			_ => {
				class.attributes.push(Attribute {
					name: attribute_name,
					info: reader.read_u8_vec(length as usize)?,
				});
			},
		}
	}

	let class_attributes_end = reader.marker()?;
	reader.goto(fields_start)?;

	class.fields = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| read_field(r, pool)
			.with_context(|| anyhow!("failed to read field of class {:?}", class.name))
	)?;

	class.methods = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| read_method(r, pool, &bootstrap_methods)
			.with_context(|| anyhow!("failed to read method of class {:?}", class.name))
	)?;

	reader.goto(class_attributes_end)?;

	Ok(class)
}

fn read_field(reader: &mut impl ClassRead, pool: &PoolRead) -> Result<Field> {
	let access = reader.read_u16()?.into();
	let name = pool.get_utf8(reader.read_u16()?)?;
	let descriptor = pool.get_utf8(reader.read_u16()?)?;

	let mut field = Field::new(access, name.into(), descriptor.into());

	let attributes_count = reader.read_u16()?;
	for _ in 0..attributes_count {
		let attribute_name = pool.get_utf8(reader.read_u16()?)?;
		let length = reader.read_u32()?;

		match attribute_name.as_str() {
			attribute::DEPRECATED => field.has_deprecated_attribute = true,
			attribute::SYNTHETIC => field.has_synthetic_attribute = true,
			attribute::CONSTANT_VALUE => {
				field.constant_value = Some(pool.get_constant_value(reader.read_u16()?)?);
			},
			attribute::SIGNATURE => {
				field.signature = Some(pool.get_utf8(reader.read_u16()?)?.into());
			},
			attribute::RUNTIME_VISIBLE_ANNOTATIONS => {
				field.runtime_visible_annotations = read_annotations_attribute(reader, pool)?;
			},
			attribute::RUNTIME_INVISIBLE_ANNOTATIONS => {
				field.runtime_invisible_annotations = read_annotations_attribute(reader, pool)?;
			},
			name if DROPPED_ATTRIBUTES.contains(&name) => {
				debug!("dropping field attribute {name:?} of {:?}", field.name);
				reader.skip(length as i64)?;
			},
			_ => {
				field.attributes.push(Attribute {
					name: attribute_name,
					info: reader.read_u8_vec(length as usize)?,
				});
			},
		}
	}

	Ok(field)
}

fn read_method(reader: &mut impl ClassRead, pool: &PoolRead, bootstrap_methods: &[BootstrapMethodRead]) -> Result<Method> {
	let access = reader.read_u16()?.into();
	let name = pool.get_utf8(reader.read_u16()?)?;
	let descriptor = pool.get_utf8(reader.read_u16()?)?;

	let mut method = Method::new(access, name.into(), descriptor.into());

	let attributes_count = reader.read_u16()?;
	for _ in 0..attributes_count {
		let attribute_name = pool.get_utf8(reader.read_u16()?)?;
		let length = reader.read_u32()?;

		match attribute_name.as_str() {
			attribute::DEPRECATED => method.has_deprecated_attribute = true,
			attribute::SYNTHETIC => method.has_synthetic_attribute = true,
			attribute::CODE => {
				let code = read_code(reader, pool, bootstrap_methods)
					.with_context(|| anyhow!("failed to read code of method {:?}", method.name))?;
				method.code = Some(code);
			},
			attribute::EXCEPTIONS => {
				method.exceptions = Some(reader.read_vec(
					|r| r.read_u16_as_usize(),
					|r| pool.get_class(r.read_u16()?)
				)?);
			},
			attribute::SIGNATURE => {
				method.signature = Some(pool.get_utf8(reader.read_u16()?)?.into());
			},
			attribute::METHOD_PARAMETERS => {
				method.method_parameters = Some(reader.read_vec(
					|r| Ok(r.read_u8()? as usize),
					|r| {
						Ok(MethodParameter {
							name: pool.get_optional(r.read_u16()?, PoolRead::get_utf8)?,
							flags: r.read_u16()?.into(),
						})
					}
				)?);
			},
			attribute::RUNTIME_VISIBLE_ANNOTATIONS => {
				method.runtime_visible_annotations = read_annotations_attribute(reader, pool)?;
			},
			attribute::RUNTIME_INVISIBLE_ANNOTATIONS => {
				method.runtime_invisible_annotations = read_annotations_attribute(reader, pool)?;
			},
			name if DROPPED_ATTRIBUTES.contains(&name) => {
				debug!("dropping method attribute {name:?} of {:?}", method.name);
				reader.skip(length as i64)?;
			},
			_ => {
				method.attributes.push(Attribute {
					name: attribute_name,
					info: reader.read_u8_vec(length as usize)?,
				});
			},
		}
	}

	Ok(method)
}

fn read_annotations_attribute(reader: &mut impl ClassRead, pool: &PoolRead) -> Result<Vec<Annotation>> {
	reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| read_annotation(r, pool, 0)
	)
}

fn read_annotation(reader: &mut impl ClassRead, pool: &PoolRead, depth: u8) -> Result<Annotation> {
	if depth > 8 {
		bail!("annotations nest too deeply");
	}
	let type_descriptor = pool.get_utf8(reader.read_u16()?)?;
	let element_value_pairs = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| {
			Ok(ElementValuePair {
				name: pool.get_utf8(r.read_u16()?)?,
				value: read_element_value(r, pool, depth + 1)?,
			})
		}
	)?;
	Ok(Annotation { type_descriptor: type_descriptor.into(), element_value_pairs })
}

fn read_element_value(reader: &mut impl ClassRead, pool: &PoolRead, depth: u8) -> Result<ElementValue> {
	if depth > 16 {
		bail!("annotation element values nest too deeply");
	}
	let tag = reader.read_u8()?;
	Ok(match tag {
		b'B' | b'C' | b'I' | b'S' | b'Z' => {
			let index = reader.read_u16()?;
			match pool.get_constant_value(index)? {
				crate::tree::field::ConstantValue::Integer(value) => ElementValue::Integer(tag, value),
				other => bail!("element value with tag {tag:?} isn't an Integer: {other:?}"),
			}
		},
		b'D' => {
			match pool.get_constant_value(reader.read_u16()?)? {
				crate::tree::field::ConstantValue::Double(value) => ElementValue::Double(value),
				other => bail!("element value with tag 'D' isn't a Double: {other:?}"),
			}
		},
		b'F' => {
			match pool.get_constant_value(reader.read_u16()?)? {
				crate::tree::field::ConstantValue::Float(value) => ElementValue::Float(value),
				other => bail!("element value with tag 'F' isn't a Float: {other:?}"),
			}
		},
		b'J' => {
			match pool.get_constant_value(reader.read_u16()?)? {
				crate::tree::field::ConstantValue::Long(value) => ElementValue::Long(value),
				other => bail!("element value with tag 'J' isn't a Long: {other:?}"),
			}
		},
		b's' => ElementValue::String(pool.get_utf8(reader.read_u16()?)?),
		b'e' => ElementValue::Enum {
			type_descriptor: pool.get_utf8(reader.read_u16()?)?.into(),
			const_name: pool.get_utf8(reader.read_u16()?)?,
		},
		b'c' => ElementValue::Class(pool.get_utf8(reader.read_u16()?)?),
		b'@' => ElementValue::AnnotationInterface(read_annotation(reader, pool, depth)?),
		b'[' => ElementValue::ArrayType(reader.read_vec(
			|r| r.read_u16_as_usize(),
			|r| read_element_value(r, pool, depth + 1)
		)?),
		tag => bail!("unknown element value tag {tag:#x}"),
	})
}

fn read_code(reader: &mut impl ClassRead, pool: &PoolRead, bootstrap_methods: &[BootstrapMethodRead]) -> Result<Code> {
	let max_stack = reader.read_u16()?;
	let max_locals = reader.read_u16()?;

	let code_length = reader.read_u32()?;
	if code_length == 0 || code_length > 0xffff {
		bail!("code length {code_length} out of range");
	}

	let mut labels = Labels::new(code_length);

	let code_start = reader.marker()?;
	let code_end = code_start + code_length as u64;

	// (bytecode offset, instruction); labels attach afterwards
	let mut decoded: Vec<(u32, Instruction)> = Vec::new();

	while reader.marker()? < code_end {
		let opcode_pos = (reader.marker()? - code_start) as u32;

		let instruction = read_instruction(reader, pool, bootstrap_methods, &mut labels, code_start, opcode_pos)
			.with_context(|| anyhow!("at bytecode offset {opcode_pos}"))?;

		decoded.push((opcode_pos, instruction));
	}
	if reader.marker()? != code_end {
		bail!("an instruction runs past the end of the code array");
	}

	let exception_table = reader.read_vec(
		|r| r.read_u16_as_usize(),
		|r| Ok(Exception {
			start: labels.get_or_create(r.read_u16()? as u32)?,
			end: labels.get_or_create_end_exclusive(r.read_u16()? as u32)?,
			handler: labels.get_or_create(r.read_u16()? as u32)?,
			catch: pool.get_optional(r.read_u16()?, PoolRead::get_class)?,
		})
	)?;

	let mut line_numbers: Option<Vec<_>> = None;
	let mut local_variables: Option<Vec<Lv>> = None;

	let attributes_count = reader.read_u16()?;
	for _ in 0..attributes_count {
		let attribute_name = pool.get_utf8(reader.read_u16()?)?;
		let length = reader.read_u32()?;

		match attribute_name.as_str() {
			// recomputed on write, see the frames module
			attribute::STACK_MAP_TABLE | attribute::STACK_MAP => reader.skip(length as i64)?,
			attribute::LINE_NUMBER_TABLE => {
				let table = reader.read_vec(
					|r| r.read_u16_as_usize(),
					|r| {
						let start = labels.get_or_create(r.read_u16()? as u32)?;
						let line = r.read_u16()?;
						Ok((start, line))
					}
				)?;
				line_numbers.get_or_insert_with(Vec::new).extend(table);
			},
			attribute::LOCAL_VARIABLE_TABLE => {
				let table = reader.read_vec(
					|r| r.read_u16_as_usize(),
					|r| {
						let start_pc = r.read_u16()? as u32;
						let length = r.read_u16()? as u32;
						Ok(Lv {
							start: labels.get_or_create(start_pc)?,
							end: labels.get_or_create_end_exclusive(start_pc + length)?,
							name: pool.get_utf8(r.read_u16()?)?,
							descriptor: Some(pool.get_utf8(r.read_u16()?)?.into()),
							signature: None,
							index: r.read_u16()?.into(),
						})
					}
				)?;
				local_variables.get_or_insert_with(Vec::new).extend(table);
			},
			attribute::LOCAL_VARIABLE_TYPE_TABLE => {
				// merge the signatures into the entries read from LocalVariableTable
				let count = reader.read_u16_as_usize()?;
				for _ in 0..count {
					let start_pc = reader.read_u16()? as u32;
					let length = reader.read_u16()? as u32;
					let name = pool.get_utf8(reader.read_u16()?)?;
					let signature = pool.get_utf8(reader.read_u16()?)?;
					let index = reader.read_u16()?;

					let start = labels.get_or_create(start_pc)?;
					let end = labels.get_or_create_end_exclusive(start_pc + length)?;

					let vars = local_variables.get_or_insert_with(Vec::new);
					match vars.iter_mut().find(|lv| lv.start == start && lv.end == end && lv.name == name && lv.index.index == index) {
						Some(lv) => lv.signature = Some(signature.into()),
						None => vars.push(Lv {
							start, end, name,
							descriptor: None,
							signature: Some(signature.into()),
							index: index.into(),
						}),
					}
				}
			},
			name => {
				debug!("dropping code attribute {name:?}");
				reader.skip(length as i64)?;
			},
		}
	}

	// attach labels to the instructions that carry them
	let starts: HashSet<u32> = decoded.iter().map(|&(offset, _)| offset).collect();
	let mut last_label = None;
	for (pc, label) in labels.iter() {
		if pc == code_length {
			last_label = Some(label);
		} else if !starts.contains(&pc) {
			bail!("bytecode offset {pc} has a label but is not an instruction boundary");
		}
	}

	let instructions = decoded.into_iter()
		.map(|(offset, instruction)| InstructionListEntry {
			label: labels.get(offset),
			instruction,
		})
		.collect();

	Ok(Code {
		max_stack: Some(max_stack),
		max_locals: Some(max_locals),
		instructions,
		exception_table,
		last_label,
		line_numbers,
		local_variables,
		next_label_id: labels.max_id(),
	})
}

fn read_instruction(
	reader: &mut impl ClassRead,
	pool: &PoolRead,
	bootstrap_methods: &[BootstrapMethodRead],
	labels: &mut Labels,
	code_start: u64,
	opcode_pos: u32,
) -> Result<Instruction> {
	fn branch_target(labels: &mut Labels, opcode_pos: u32, offset: i32) -> Result<Label> {
		labels.get_or_create(opcode_pos.checked_add_signed(offset)
			.context("branch target overflows")?)
	}

	let opcode_byte = reader.read_u8()?;
	Ok(match opcode_byte {
		opcode::NOP => Instruction::Nop,
		opcode::ACONST_NULL => Instruction::AConstNull,
		opcode::ICONST_M1 => Instruction::IConstM1,
		opcode::ICONST_0 => Instruction::IConst0,
		opcode::ICONST_1 => Instruction::IConst1,
		opcode::ICONST_2 => Instruction::IConst2,
		opcode::ICONST_3 => Instruction::IConst3,
		opcode::ICONST_4 => Instruction::IConst4,
		opcode::ICONST_5 => Instruction::IConst5,
		opcode::LCONST_0 => Instruction::LConst0,
		opcode::LCONST_1 => Instruction::LConst1,
		opcode::FCONST_0 => Instruction::FConst0,
		opcode::FCONST_1 => Instruction::FConst1,
		opcode::FCONST_2 => Instruction::FConst2,
		opcode::DCONST_0 => Instruction::DConst0,
		opcode::DCONST_1 => Instruction::DConst1,
		opcode::BIPUSH => Instruction::BiPush(reader.read_i8()?),
		opcode::SIPUSH => Instruction::SiPush(reader.read_i16()?),
		opcode::LDC => Instruction::Ldc(pool.get_loadable(reader.read_u8()? as u16, bootstrap_methods)?),
		opcode::LDC_W | opcode::LDC2_W => Instruction::Ldc(pool.get_loadable(reader.read_u16()?, bootstrap_methods)?),

		opcode::ILOAD => Instruction::ILoad((reader.read_u8()? as u16).into()),
		opcode::LLOAD => Instruction::LLoad((reader.read_u8()? as u16).into()),
		opcode::FLOAD => Instruction::FLoad((reader.read_u8()? as u16).into()),
		opcode::DLOAD => Instruction::DLoad((reader.read_u8()? as u16).into()),
		opcode::ALOAD => Instruction::ALoad((reader.read_u8()? as u16).into()),
		x @ 0x1a..=0x1d => Instruction::ILoad(((x - opcode::ILOAD_0) as u16).into()),
		x @ 0x1e..=0x21 => Instruction::LLoad(((x - opcode::LLOAD_0) as u16).into()),
		x @ 0x22..=0x25 => Instruction::FLoad(((x - opcode::FLOAD_0) as u16).into()),
		x @ 0x26..=0x29 => Instruction::DLoad(((x - opcode::DLOAD_0) as u16).into()),
		x @ 0x2a..=0x2d => Instruction::ALoad(((x - opcode::ALOAD_0) as u16).into()),

		opcode::IALOAD => Instruction::IALoad,
		opcode::LALOAD => Instruction::LALoad,
		opcode::FALOAD => Instruction::FALoad,
		opcode::DALOAD => Instruction::DALoad,
		opcode::AALOAD => Instruction::AALoad,
		opcode::BALOAD => Instruction::BALoad,
		opcode::CALOAD => Instruction::CALoad,
		opcode::SALOAD => Instruction::SALoad,

		opcode::ISTORE => Instruction::IStore((reader.read_u8()? as u16).into()),
		opcode::LSTORE => Instruction::LStore((reader.read_u8()? as u16).into()),
		opcode::FSTORE => Instruction::FStore((reader.read_u8()? as u16).into()),
		opcode::DSTORE => Instruction::DStore((reader.read_u8()? as u16).into()),
		opcode::ASTORE => Instruction::AStore((reader.read_u8()? as u16).into()),
		x @ 0x3b..=0x3e => Instruction::IStore(((x - opcode::ISTORE_0) as u16).into()),
		x @ 0x3f..=0x42 => Instruction::LStore(((x - opcode::LSTORE_0) as u16).into()),
		x @ 0x43..=0x46 => Instruction::FStore(((x - opcode::FSTORE_0) as u16).into()),
		x @ 0x47..=0x4a => Instruction::DStore(((x - opcode::DSTORE_0) as u16).into()),
		x @ 0x4b..=0x4e => Instruction::AStore(((x - opcode::ASTORE_0) as u16).into()),

		opcode::IASTORE => Instruction::IAStore,
		opcode::LASTORE => Instruction::LAStore,
		opcode::FASTORE => Instruction::FAStore,
		opcode::DASTORE => Instruction::DAStore,
		opcode::AASTORE => Instruction::AAStore,
		opcode::BASTORE => Instruction::BAStore,
		opcode::CASTORE => Instruction::CAStore,
		opcode::SASTORE => Instruction::SAStore,

		opcode::POP => Instruction::Pop,
		opcode::POP2 => Instruction::Pop2,
		opcode::DUP => Instruction::Dup,
		opcode::DUP_X1 => Instruction::DupX1,
		opcode::DUP_X2 => Instruction::DupX2,
		opcode::DUP2 => Instruction::Dup2,
		opcode::DUP2_X1 => Instruction::Dup2X1,
		opcode::DUP2_X2 => Instruction::Dup2X2,
		opcode::SWAP => Instruction::Swap,

		opcode::IADD => Instruction::IAdd,
		opcode::LADD => Instruction::LAdd,
		opcode::FADD => Instruction::FAdd,
		opcode::DADD => Instruction::DAdd,
		opcode::ISUB => Instruction::ISub,
		opcode::LSUB => Instruction::LSub,
		opcode::FSUB => Instruction::FSub,
		opcode::DSUB => Instruction::DSub,
		opcode::IMUL => Instruction::IMul,
		opcode::LMUL => Instruction::LMul,
		opcode::FMUL => Instruction::FMul,
		opcode::DMUL => Instruction::DMul,
		opcode::IDIV => Instruction::IDiv,
		opcode::LDIV => Instruction::LDiv,
		opcode::FDIV => Instruction::FDiv,
		opcode::DDIV => Instruction::DDiv,
		opcode::IREM => Instruction::IRem,
		opcode::LREM => Instruction::LRem,
		opcode::FREM => Instruction::FRem,
		opcode::DREM => Instruction::DRem,
		opcode::INEG => Instruction::INeg,
		opcode::LNEG => Instruction::LNeg,
		opcode::FNEG => Instruction::FNeg,
		opcode::DNEG => Instruction::DNeg,
		opcode::ISHL => Instruction::IShl,
		opcode::LSHL => Instruction::LShl,
		opcode::ISHR => Instruction::IShr,
		opcode::LSHR => Instruction::LShr,
		opcode::IUSHR => Instruction::IUShr,
		opcode::LUSHR => Instruction::LUShr,
		opcode::IAND => Instruction::IAnd,
		opcode::LAND => Instruction::LAnd,
		opcode::IOR => Instruction::IOr,
		opcode::LOR => Instruction::LOr,
		opcode::IXOR => Instruction::IXor,
		opcode::LXOR => Instruction::LXor,
		opcode::IINC => Instruction::IInc((reader.read_u8()? as u16).into(), reader.read_i8()? as i16),

		opcode::I2L => Instruction::I2L,
		opcode::I2F => Instruction::I2F,
		opcode::I2D => Instruction::I2D,
		opcode::L2I => Instruction::L2I,
		opcode::L2F => Instruction::L2F,
		opcode::L2D => Instruction::L2D,
		opcode::F2I => Instruction::F2I,
		opcode::F2L => Instruction::F2L,
		opcode::F2D => Instruction::F2D,
		opcode::D2I => Instruction::D2I,
		opcode::D2L => Instruction::D2L,
		opcode::D2F => Instruction::D2F,
		opcode::I2B => Instruction::I2B,
		opcode::I2C => Instruction::I2C,
		opcode::I2S => Instruction::I2S,

		opcode::LCMP => Instruction::LCmp,
		opcode::FCMPL => Instruction::FCmpL,
		opcode::FCMPG => Instruction::FCmpG,
		opcode::DCMPL => Instruction::DCmpL,
		opcode::DCMPG => Instruction::DCmpG,

		opcode::IFEQ => Instruction::IfEq(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IFNE => Instruction::IfNe(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IFLT => Instruction::IfLt(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IFGE => Instruction::IfGe(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IFGT => Instruction::IfGt(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IFLE => Instruction::IfLe(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ICMPEQ => Instruction::IfICmpEq(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ICMPNE => Instruction::IfICmpNe(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ICMPLT => Instruction::IfICmpLt(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ICMPGE => Instruction::IfICmpGe(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ICMPGT => Instruction::IfICmpGt(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ICMPLE => Instruction::IfICmpLe(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ACMPEQ => Instruction::IfACmpEq(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IF_ACMPNE => Instruction::IfACmpNe(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::GOTO => Instruction::Goto(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::JSR => Instruction::Jsr(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::RET => Instruction::Ret((reader.read_u8()? as u16).into()),
		opcode::IFNULL => Instruction::IfNull(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::IFNONNULL => Instruction::IfNonNull(branch_target(labels, opcode_pos, reader.read_i16()? as i32)?),
		opcode::GOTO_W => {
			let offset = reader.read_i32()?;
			Instruction::Goto(labels.get_or_create(opcode_pos.checked_add_signed(offset)
				.context("branch target overflows")?)?)
		},
		opcode::JSR_W => {
			let offset = reader.read_i32()?;
			Instruction::Jsr(labels.get_or_create(opcode_pos.checked_add_signed(offset)
				.context("branch target overflows")?)?)
		},

		opcode::TABLESWITCH => {
			align_to_4_byte_boundary(reader, code_start)?;
			let default = labels.get_or_create(opcode_pos.checked_add_signed(reader.read_i32()?)
				.context("branch target overflows")?)?;
			let low = reader.read_i32()?;
			let high = reader.read_i32()?;
			if low > high {
				bail!("in tableswitch `low` must be lower or equal to `high`, it's low={low:?} and high={high:?}");
			}
			let n = (high as i64 - low as i64 + 1) as u32;
			if n > 0xffff {
				bail!("tableswitch with {n} entries can't fit in the code array");
			}
			let mut table = Vec::with_capacity(n as usize);
			for _ in 0..n {
				table.push(labels.get_or_create(opcode_pos.checked_add_signed(reader.read_i32()?)
					.context("branch target overflows")?)?);
			}
			Instruction::TableSwitch { default, low, high, table }
		},
		opcode::LOOKUPSWITCH => {
			align_to_4_byte_boundary(reader, code_start)?;
			let default = labels.get_or_create(opcode_pos.checked_add_signed(reader.read_i32()?)
				.context("branch target overflows")?)?;
			let n = reader.read_i32()?;
			if n < 0 {
				bail!("in lookupswitch the `npairs` must be positive, it's npairs={n:?}");
			}
			if n > 0xffff {
				bail!("lookupswitch with {n} pairs can't fit in the code array");
			}
			let mut pairs = Vec::with_capacity(n as usize);
			for _ in 0..n {
				let key = reader.read_i32()?;
				let target = labels.get_or_create(opcode_pos.checked_add_signed(reader.read_i32()?)
					.context("branch target overflows")?)?;
				pairs.push((key, target));
			}
			Instruction::LookupSwitch { default, pairs }
		},

		opcode::IRETURN => Instruction::IReturn,
		opcode::LRETURN => Instruction::LReturn,
		opcode::FRETURN => Instruction::FReturn,
		opcode::DRETURN => Instruction::DReturn,
		opcode::ARETURN => Instruction::AReturn,
		opcode::RETURN => Instruction::Return,

		opcode::GETSTATIC => Instruction::GetStatic(pool.get_field_ref(reader.read_u16()?)?),
		opcode::PUTSTATIC => Instruction::PutStatic(pool.get_field_ref(reader.read_u16()?)?),
		opcode::GETFIELD => Instruction::GetField(pool.get_field_ref(reader.read_u16()?)?),
		opcode::PUTFIELD => Instruction::PutField(pool.get_field_ref(reader.read_u16()?)?),

		opcode::INVOKEVIRTUAL => {
			let (method, _) = pool.get_method_ref(reader.read_u16()?)?;
			Instruction::InvokeVirtual(method)
		},
		opcode::INVOKESPECIAL => {
			let (method, is_interface) = pool.get_method_ref(reader.read_u16()?)?;
			Instruction::InvokeSpecial(method, is_interface)
		},
		opcode::INVOKESTATIC => {
			let (method, is_interface) = pool.get_method_ref(reader.read_u16()?)?;
			Instruction::InvokeStatic(method, is_interface)
		},
		opcode::INVOKEINTERFACE => {
			let (method, _) = pool.get_method_ref(reader.read_u16()?)?;
			let _count = reader.read_u8()?;
			let zero = reader.read_u8()?;
			if zero != 0 {
				bail!("the fourth operand byte of invokeinterface must be zero");
			}
			Instruction::InvokeInterface(method)
		},
		opcode::INVOKEDYNAMIC => {
			let invoke_dynamic = pool.get_invoke_dynamic(reader.read_u16()?, bootstrap_methods)?;
			let zero = (reader.read_u8()?, reader.read_u8()?);
			if zero != (0, 0) {
				bail!("the third and fourth operand bytes of invokedynamic must be zero");
			}
			Instruction::InvokeDynamic(invoke_dynamic)
		},

		opcode::NEW => Instruction::New(pool.get_class(reader.read_u16()?)?),
		opcode::NEWARRAY => Instruction::NewArray(ArrayType::from_atype(reader.read_u8()?)?),
		opcode::ANEWARRAY => Instruction::ANewArray(pool.get_class(reader.read_u16()?)?),
		opcode::ARRAYLENGTH => Instruction::ArrayLength,
		opcode::ATHROW => Instruction::AThrow,
		opcode::CHECKCAST => Instruction::CheckCast(pool.get_class(reader.read_u16()?)?),
		opcode::INSTANCEOF => Instruction::InstanceOf(pool.get_class(reader.read_u16()?)?),
		opcode::MONITORENTER => Instruction::MonitorEnter,
		opcode::MONITOREXIT => Instruction::MonitorExit,
		opcode::MULTIANEWARRAY => {
			let class = pool.get_class(reader.read_u16()?)?;
			let dimensions = reader.read_u8()?;
			Instruction::MultiANewArray(class, dimensions)
		},

		opcode::WIDE => {
			match reader.read_u8()? {
				opcode::ILOAD => Instruction::ILoad(reader.read_u16()?.into()),
				opcode::LLOAD => Instruction::LLoad(reader.read_u16()?.into()),
				opcode::FLOAD => Instruction::FLoad(reader.read_u16()?.into()),
				opcode::DLOAD => Instruction::DLoad(reader.read_u16()?.into()),
				opcode::ALOAD => Instruction::ALoad(reader.read_u16()?.into()),
				opcode::ISTORE => Instruction::IStore(reader.read_u16()?.into()),
				opcode::LSTORE => Instruction::LStore(reader.read_u16()?.into()),
				opcode::FSTORE => Instruction::FStore(reader.read_u16()?.into()),
				opcode::DSTORE => Instruction::DStore(reader.read_u16()?.into()),
				opcode::ASTORE => Instruction::AStore(reader.read_u16()?.into()),
				opcode::RET => Instruction::Ret(reader.read_u16()?.into()),
				opcode::IINC => Instruction::IInc(reader.read_u16()?.into(), reader.read_i16()?),
				wide_opcode => bail!("unknown wide opcode {wide_opcode:x?}"),
			}
		},

		opcode::BREAKPOINT => bail!("unknown opcode breakpoint"),
		opcode::IMPDEP1 => bail!("unknown opcode impdep1"),
		opcode::IMPDEP2 => bail!("unknown opcode impdep2"),
		other => bail!("unknown opcode {other:x?}"),
	})
}

fn align_to_4_byte_boundary(reader: &mut impl ClassRead, code_start: u64) -> Result<()> {
	while (reader.marker()? - code_start) % 4 != 0 {
		let padding = reader.read_u8()?;
		if padding != 0 {
			bail!("switch padding byte isn't zero: {padding:#x}");
		}
	}
	Ok(())
}
