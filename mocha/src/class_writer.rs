use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use crate::{class_constants, ClassWrite};
use crate::class_constants::{attribute, opcode, verification_type};
use crate::class_writer::labels::Labels;
use crate::class_writer::pool::PoolWrite;
use crate::frames::{MethodAnalysis, VType};
use crate::supers::SuperClassProvider;
use crate::tree::annotation::{Annotation, ElementValue};
use crate::tree::class::ClassFile;
use crate::tree::descriptor::parse_method_descriptor;
use crate::tree::field::Field;
use crate::tree::method::code::{Code, Instruction};
use crate::tree::method::Method;

mod pool;
mod labels;

fn write_attribute<F>(writer: &mut impl ClassWrite, pool: &mut PoolWrite, name: &str, f: F) -> Result<()>
where
	F: FnOnce(&mut Vec<u8>, &mut PoolWrite) -> Result<()>,
{
	let mut buffer = Vec::new();
	f(&mut buffer, pool)?;
	writer.write_u16(pool.put_utf8(name)?)?;
	writer.write_usize_as_u32(buffer.len()).with_context(|| anyhow!("attribute {name:?} is too large"))?;
	writer.write_u8_slice(&buffer)
}

fn write_attribute_fix_length(writer: &mut impl ClassWrite, pool: &mut PoolWrite, name: &str, length: usize) -> Result<()> {
	writer.write_u16(pool.put_utf8(name)?)?;
	writer.write_usize_as_u32(length).with_context(|| anyhow!("attribute {name:?} is too large"))
}

pub(crate) fn write(class_writer: &mut impl ClassWrite, class: &ClassFile, provider: &dyn SuperClassProvider) -> Result<()> {
	// The constant pool. Any constant pool item is added to it.
	let mut pool_: PoolWrite = PoolWrite::new();
	let pool = &mut pool_;
	// The buffer for the rest of the class file.
	let mut writer = Vec::new();

	writer.write_u16(class.access.into())?;
	writer.write_u16(pool.put_class(&class.name)?)?;
	writer.write_u16(pool.put_optional(class.super_class.as_ref(), PoolWrite::put_class)?)?;
	writer.write_slice(
		&class.interfaces,
		|w, size| w.write_usize_as_u16(size).with_context(|| anyhow!("failed to write the number of interfaces of class {:?}", class.name)),
		|w, interface| w.write_u16(pool.put_class(interface)?)
	)?;

	// The BootstrapMethods attribute can only be written once every loadable
	// is in the pool, so fields and methods come first and the class
	// attributes are buffered.

	writer.write_slice(
		&class.fields,
		|w, size| w.write_usize_as_u16(size).with_context(|| anyhow!("failed to write the number of fields of class {:?}", class.name)),
		|w, field| write_field(w, field, pool)
			.with_context(|| anyhow!("failed to write field of class {:?}", class.name))
	)?;

	writer.write_slice(
		&class.methods,
		|w, size| w.write_usize_as_u16(size).with_context(|| anyhow!("failed to write the number of methods of class {:?}", class.name)),
		|w, method| write_method(w, method, class, pool, provider)
			.with_context(|| anyhow!("failed to write method {:?} of class {:?}", method.name, class.name))
	)?;

	// We write the attributes into a buffer and count them.
	let mut attribute_count = 0;
	let mut buffer = Vec::new();

	if class.has_deprecated_attribute {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::DEPRECATED, 0)?;
	}
	if class.has_synthetic_attribute {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::SYNTHETIC, 0)?;
	}

	if let Some(source_file) = &class.source_file {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::SOURCE_FILE, 2)?;
		buffer.write_u16(pool.put_utf8(source_file)?)?;
	}
	if let Some(signature) = &class.signature {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::SIGNATURE, 2)?;
		buffer.write_u16(pool.put_utf8(signature.as_str())?)?;
	}

	if let Some(inner_classes) = &class.inner_classes {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::INNER_CLASSES, |w, pool| {
			w.write_usize_as_u16(inner_classes.len()).context("too many inner classes")?;
			for inner_class in inner_classes {
				w.write_u16(pool.put_class(&inner_class.inner_class)?)?;
				w.write_u16(pool.put_optional(inner_class.outer_class.as_ref(), PoolWrite::put_class)?)?;
				w.write_u16(pool.put_optional(inner_class.inner_name.as_deref(), |pool, name| pool.put_utf8(name))?)?;
				w.write_u16(inner_class.flags.into())?;
			}
			Ok(())
		})?;
	}
	if let Some(enclosing_method) = &class.enclosing_method {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::ENCLOSING_METHOD, 4)?;
		buffer.write_u16(pool.put_class(&enclosing_method.class)?)?;
		buffer.write_u16(pool.put_optional(enclosing_method.method.as_ref(), |pool, x| pool.put_name_and_type(x.name.as_str(), x.desc.as_str()))?)?;
	}

	if !class.runtime_visible_annotations.is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::RUNTIME_VISIBLE_ANNOTATIONS, |w, pool| {
			write_annotations_attribute(w, pool, &class.runtime_visible_annotations)
		})?;
	}
	if !class.runtime_invisible_annotations.is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::RUNTIME_INVISIBLE_ANNOTATIONS, |w, pool| {
			write_annotations_attribute(w, pool, &class.runtime_invisible_annotations)
		})?;
	}

	if let Some(nest_host_class) = &class.nest_host_class {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::NEST_HOST, 2)?;
		buffer.write_u16(pool.put_class(nest_host_class)?)?;
	}
	if let Some(nest_members) = &class.nest_members {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::NEST_MEMBERS, |w, pool| {
			w.write_usize_as_u16(nest_members.len()).context("too many nest members")?;
			for member in nest_members {
				w.write_u16(pool.put_class(member)?)?;
			}
			Ok(())
		})?;
	}
	if let Some(permitted_subclasses) = &class.permitted_subclasses {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::PERMITTED_SUBCLASSES, |w, pool| {
			w.write_usize_as_u16(permitted_subclasses.len()).context("too many permitted subclasses")?;
			for subclass in permitted_subclasses {
				w.write_u16(pool.put_class(subclass)?)?;
			}
			Ok(())
		})?;
	}

	for raw in &class.attributes {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, &raw.name, raw.info.len())?;
		buffer.write_u8_slice(&raw.info)?;
	}

	// last, now that every loadable is interned
	if pool.has_bootstrap_methods() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::BOOTSTRAP_METHODS, |w, pool| {
			pool.write_bootstrap_methods(w)
		})?;
	}

	writer.write_usize_as_u16(attribute_count)?;
	writer.write_u8_slice(&buffer)?;

	// assemble: header, pool, body
	class_writer.write_u32(class_constants::MAGIC)?;
	class_writer.write_u16(class.version.minor)?;
	class_writer.write_u16(class.version.major)?;
	pool.write(class_writer)?;
	class_writer.write_u8_slice(&writer)?;

	Ok(())
}

fn write_field(writer: &mut impl ClassWrite, field: &Field, pool: &mut PoolWrite) -> Result<()> {
	writer.write_u16(field.access.into())?;
	writer.write_u16(pool.put_utf8(field.name.as_str())?)?;
	writer.write_u16(pool.put_utf8(field.descriptor.as_str())?)?;

	let mut attribute_count = 0;
	let mut buffer = Vec::new();

	if field.has_deprecated_attribute {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::DEPRECATED, 0)?;
	}
	if field.has_synthetic_attribute {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::SYNTHETIC, 0)?;
	}
	if let Some(constant_value) = &field.constant_value {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::CONSTANT_VALUE, 2)?;
		buffer.write_u16(pool.put_constant_value(constant_value)?)?;
	}
	if let Some(signature) = &field.signature {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::SIGNATURE, 2)?;
		buffer.write_u16(pool.put_utf8(signature.as_str())?)?;
	}
	if !field.runtime_visible_annotations.is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::RUNTIME_VISIBLE_ANNOTATIONS, |w, pool| {
			write_annotations_attribute(w, pool, &field.runtime_visible_annotations)
		})?;
	}
	if !field.runtime_invisible_annotations.is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::RUNTIME_INVISIBLE_ANNOTATIONS, |w, pool| {
			write_annotations_attribute(w, pool, &field.runtime_invisible_annotations)
		})?;
	}
	for raw in &field.attributes {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, &raw.name, raw.info.len())?;
		buffer.write_u8_slice(&raw.info)?;
	}

	writer.write_usize_as_u16(attribute_count)?;
	writer.write_u8_slice(&buffer)
}

fn write_method(writer: &mut impl ClassWrite, method: &Method, class: &ClassFile, pool: &mut PoolWrite, provider: &dyn SuperClassProvider) -> Result<()> {
	writer.write_u16(method.access.into())?;
	writer.write_u16(pool.put_utf8(method.name.as_str())?)?;
	writer.write_u16(pool.put_utf8(method.descriptor.as_str())?)?;

	let mut attribute_count = 0;
	let mut buffer = Vec::new();

	if method.has_deprecated_attribute {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::DEPRECATED, 0)?;
	}
	if method.has_synthetic_attribute {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::SYNTHETIC, 0)?;
	}

	if let Some(code) = &method.code {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::CODE, |w, pool| {
			write_code(w, code, method, class, pool, provider)
		})?;
	}

	if let Some(exceptions) = &method.exceptions {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::EXCEPTIONS, |w, pool| {
			w.write_usize_as_u16(exceptions.len()).context("too many exceptions")?;
			for exception in exceptions {
				w.write_u16(pool.put_class(exception)?)?;
			}
			Ok(())
		})?;
	}
	if let Some(signature) = &method.signature {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, attribute::SIGNATURE, 2)?;
		buffer.write_u16(pool.put_utf8(signature.as_str())?)?;
	}
	if let Some(method_parameters) = &method.method_parameters {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::METHOD_PARAMETERS, |w, pool| {
			let count = u8::try_from(method_parameters.len()).context("too many method parameters")?;
			w.write_u8(count)?;
			for parameter in method_parameters {
				w.write_u16(pool.put_optional(parameter.name.as_deref(), |pool, name| pool.put_utf8(name))?)?;
				w.write_u16(parameter.flags.into())?;
			}
			Ok(())
		})?;
	}
	if !method.runtime_visible_annotations.is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::RUNTIME_VISIBLE_ANNOTATIONS, |w, pool| {
			write_annotations_attribute(w, pool, &method.runtime_visible_annotations)
		})?;
	}
	if !method.runtime_invisible_annotations.is_empty() {
		attribute_count += 1;
		write_attribute(&mut buffer, pool, attribute::RUNTIME_INVISIBLE_ANNOTATIONS, |w, pool| {
			write_annotations_attribute(w, pool, &method.runtime_invisible_annotations)
		})?;
	}
	for raw in &method.attributes {
		attribute_count += 1;
		write_attribute_fix_length(&mut buffer, pool, &raw.name, raw.info.len())?;
		buffer.write_u8_slice(&raw.info)?;
	}

	writer.write_usize_as_u16(attribute_count)?;
	writer.write_u8_slice(&buffer)
}

fn write_annotations_attribute(writer: &mut impl ClassWrite, pool: &mut PoolWrite, annotations: &[Annotation]) -> Result<()> {
	writer.write_usize_as_u16(annotations.len()).context("too many annotations")?;
	for annotation in annotations {
		write_annotation(writer, pool, annotation)?;
	}
	Ok(())
}

fn write_annotation(writer: &mut impl ClassWrite, pool: &mut PoolWrite, annotation: &Annotation) -> Result<()> {
	writer.write_u16(pool.put_utf8(annotation.type_descriptor.as_str())?)?;
	writer.write_usize_as_u16(annotation.element_value_pairs.len()).context("too many element value pairs")?;
	for pair in &annotation.element_value_pairs {
		writer.write_u16(pool.put_utf8(&pair.name)?)?;
		write_element_value(writer, pool, &pair.value)?;
	}
	Ok(())
}

fn write_element_value(writer: &mut impl ClassWrite, pool: &mut PoolWrite, value: &ElementValue) -> Result<()> {
	match value {
		ElementValue::Integer(tag, value) => {
			writer.write_u8(*tag)?;
			writer.write_u16(pool.put_integer(*value)?)?;
		},
		ElementValue::Double(value) => {
			writer.write_u8(b'D')?;
			writer.write_u16(pool.put_constant_value(&crate::tree::field::ConstantValue::Double(*value))?)?;
		},
		ElementValue::Float(value) => {
			writer.write_u8(b'F')?;
			writer.write_u16(pool.put_constant_value(&crate::tree::field::ConstantValue::Float(*value))?)?;
		},
		ElementValue::Long(value) => {
			writer.write_u8(b'J')?;
			writer.write_u16(pool.put_constant_value(&crate::tree::field::ConstantValue::Long(*value))?)?;
		},
		ElementValue::String(value) => {
			writer.write_u8(b's')?;
			writer.write_u16(pool.put_utf8(value)?)?;
		},
		ElementValue::Enum { type_descriptor, const_name } => {
			writer.write_u8(b'e')?;
			writer.write_u16(pool.put_utf8(type_descriptor.as_str())?)?;
			writer.write_u16(pool.put_utf8(const_name)?)?;
		},
		ElementValue::Class(descriptor) => {
			writer.write_u8(b'c')?;
			writer.write_u16(pool.put_utf8(descriptor)?)?;
		},
		ElementValue::AnnotationInterface(annotation) => {
			writer.write_u8(b'@')?;
			write_annotation(writer, pool, annotation)?;
		},
		ElementValue::ArrayType(values) => {
			writer.write_u8(b'[')?;
			writer.write_usize_as_u16(values.len()).context("too many element values")?;
			for value in values {
				write_element_value(writer, pool, value)?;
			}
		},
	}
	Ok(())
}

/// The number of argument slots an invokeinterface call pops, including the receiver.
fn invoke_interface_count(method: &crate::tree::method::MethodRef) -> Result<u8> {
	let descriptor = parse_method_descriptor(&method.desc)?;
	let mut count = 1u32;
	for parameter in &descriptor.parameters {
		count += if parameter.is_category_2() { 2 } else { 1 };
	}
	u8::try_from(count).context("too many invokeinterface arguments")
}

fn write_code(writer: &mut impl ClassWrite, code: &Code, method: &Method, class: &ClassFile, pool: &mut PoolWrite, provider: &dyn SuperClassProvider) -> Result<()> {
	// stack map frames want a dataflow pass; it also yields max_stack/max_locals
	let analysis: Option<MethodAnalysis> = if class.version.requires_stack_map_frames() {
		Some(crate::frames::analyze(&class.name, method, code, provider)?)
	} else {
		None
	};

	let (max_stack, max_locals) = match &analysis {
		Some(analysis) => (analysis.max_stack, analysis.max_locals),
		None => (
			code.max_stack.context("max_stack not set and frames not computed")?,
			code.max_locals.context("max_locals not set and frames not computed")?,
		),
	};

	// layout pass: assign bytecode offsets
	let mut labels = Labels::new();
	let mut offset: u32 = 0;
	for (index, entry) in code.instructions.iter().enumerate() {
		let opcode_pos = u16::try_from(offset).context("method code larger than 65535 bytes")?;
		labels.add_instruction(index, opcode_pos);
		if let Some(label) = entry.label {
			labels.add_opcode_pos_label(label, opcode_pos);
		}
		offset += instruction_size(&entry.instruction, offset, pool)?;
	}
	let code_length = offset;
	if code_length > 0xffff {
		bail!("method code larger than 65535 bytes");
	}
	if let Some(last_label) = code.last_label {
		labels.add_opcode_pos_label(last_label, code_length as u16);
	}

	writer.write_u16(max_stack)?;
	writer.write_u16(max_locals)?;
	writer.write_u32(code_length)?;

	// serialize pass
	let mut code_bytes: Vec<u8> = Vec::with_capacity(code_length as usize);
	for entry in &code.instructions {
		write_instruction(&mut code_bytes, &entry.instruction, &labels, pool)?;
	}
	if code_bytes.len() as u32 != code_length {
		bail!("layout and serialization disagree about the code length: {} vs {code_length}", code_bytes.len());
	}
	writer.write_u8_slice(&code_bytes)?;

	writer.write_slice(
		&code.exception_table,
		|w, size| w.write_usize_as_u16(size).context("too many exception table entries"),
		|w, exception| {
			w.write_u16(labels.try_get(&exception.start)?)?;
			w.write_u16(labels.try_get(&exception.end)?)?;
			w.write_u16(labels.try_get(&exception.handler)?)?;
			w.write_u16(pool.put_optional(exception.catch.as_ref(), PoolWrite::put_class)?)?;
			Ok(())
		}
	)?;

	let mut attribute_count = 0;
	let mut buffer = Vec::new();

	if let Some(analysis) = &analysis {
		if !analysis.frames.is_empty() {
			attribute_count += 1;
			write_attribute(&mut buffer, pool, attribute::STACK_MAP_TABLE, |w, pool| {
				write_stack_map_table(w, pool, analysis, &labels)
			})?;
		}
	}

	if let Some(line_numbers) = &code.line_numbers {
		// entries whose label vanished in an edit are dropped, not an error
		let live: Vec<_> = line_numbers.iter()
			.filter_map(|(label, line)| labels.get(label).map(|pc| (pc, *line)))
			.collect();
		if live.len() != line_numbers.len() {
			debug!("dropping {} line number entries with no instruction", line_numbers.len() - live.len());
		}
		if !live.is_empty() {
			attribute_count += 1;
			write_attribute(&mut buffer, pool, attribute::LINE_NUMBER_TABLE, |w, _| {
				w.write_usize_as_u16(live.len()).context("too many line numbers")?;
				for (pc, line) in &live {
					w.write_u16(*pc)?;
					w.write_u16(*line)?;
				}
				Ok(())
			})?;
		}
	}

	if let Some(local_variables) = &code.local_variables {
		let live: Vec<_> = local_variables.iter()
			.filter(|lv| labels.get(&lv.start).is_some() && labels.get(&lv.end).is_some())
			.collect();
		if live.len() != local_variables.len() {
			debug!("dropping {} local variable entries with no instruction", local_variables.len() - live.len());
		}

		let with_descriptor: Vec<_> = live.iter().filter(|lv| lv.descriptor.is_some()).collect();
		if !with_descriptor.is_empty() {
			attribute_count += 1;
			write_attribute(&mut buffer, pool, attribute::LOCAL_VARIABLE_TABLE, |w, pool| {
				w.write_usize_as_u16(with_descriptor.len()).context("too many local variables")?;
				for lv in &with_descriptor {
					let start = labels.try_get(&lv.start)?;
					let end = labels.try_get(&lv.end)?;
					w.write_u16(start)?;
					w.write_u16(end - start)?;
					w.write_u16(pool.put_utf8(&lv.name)?)?;
					w.write_u16(pool.put_utf8(lv.descriptor.as_ref().map(|d| d.as_str()).unwrap_or_default())?)?;
					w.write_u16(lv.index.index)?;
				}
				Ok(())
			})?;
		}

		let with_signature: Vec<_> = live.iter().filter(|lv| lv.signature.is_some()).collect();
		if !with_signature.is_empty() {
			attribute_count += 1;
			write_attribute(&mut buffer, pool, attribute::LOCAL_VARIABLE_TYPE_TABLE, |w, pool| {
				w.write_usize_as_u16(with_signature.len()).context("too many local variables")?;
				for lv in &with_signature {
					let start = labels.try_get(&lv.start)?;
					let end = labels.try_get(&lv.end)?;
					w.write_u16(start)?;
					w.write_u16(end - start)?;
					w.write_u16(pool.put_utf8(&lv.name)?)?;
					w.write_u16(pool.put_utf8(lv.signature.as_ref().map(|s| s.as_str()).unwrap_or_default())?)?;
					w.write_u16(lv.index.index)?;
				}
				Ok(())
			})?;
		}
	}

	writer.write_usize_as_u16(attribute_count)?;
	writer.write_u8_slice(&buffer)
}

fn write_stack_map_table(writer: &mut impl ClassWrite, pool: &mut PoolWrite, analysis: &MethodAnalysis, labels: &Labels) -> Result<()> {
	writer.write_usize_as_u16(analysis.frames.len()).context("too many stack map frames")?;

	let mut previous_offset: Option<u16> = None;
	for (index, frame) in &analysis.frames {
		let offset = labels.try_get_index(*index)?;
		let offset_delta = match previous_offset {
			None => offset,
			Some(previous) => offset.checked_sub(previous + 1)
				.context("stack map frames out of order")?,
		};
		previous_offset = Some(offset);

		// always a full frame; the compressed forms are just a size optimization
		writer.write_u8(255)?;
		writer.write_u16(offset_delta)?;

		let collapsed = collapse_locals(&frame.locals);
		writer.write_usize_as_u16(collapsed.len()).context("too many locals in frame")?;
		for v in &collapsed {
			write_verification_type(writer, pool, v, labels)?;
		}
		writer.write_usize_as_u16(frame.stack.len()).context("too many stack entries in frame")?;
		for v in &frame.stack {
			write_verification_type(writer, pool, v, labels)?;
		}
	}
	Ok(())
}

/// Drops the phantom `Top` following each `Long`/`Double` local slot; the
/// written form counts a category 2 value as one entry.
fn collapse_locals(locals: &[VType]) -> Vec<&VType> {
	let mut collapsed = Vec::with_capacity(locals.len());
	let mut skip_next = false;
	for v in locals {
		if skip_next {
			skip_next = false;
			continue;
		}
		if matches!(v, VType::Long | VType::Double) {
			skip_next = true;
		}
		collapsed.push(v);
	}
	collapsed
}

fn write_verification_type(writer: &mut impl ClassWrite, pool: &mut PoolWrite, v: &VType, labels: &Labels) -> Result<()> {
	match v {
		VType::Top => writer.write_u8(verification_type::TOP),
		VType::Integer => writer.write_u8(verification_type::INTEGER),
		VType::Float => writer.write_u8(verification_type::FLOAT),
		VType::Double => writer.write_u8(verification_type::DOUBLE),
		VType::Long => writer.write_u8(verification_type::LONG),
		VType::Null => writer.write_u8(verification_type::NULL),
		VType::UninitializedThis => writer.write_u8(verification_type::UNINITIALIZED_THIS),
		VType::Object(class) => {
			writer.write_u8(verification_type::OBJECT)?;
			writer.write_u16(pool.put_class(class)?)
		},
		VType::Uninitialized(index) => {
			writer.write_u8(verification_type::UNINITIALIZED)?;
			writer.write_u16(labels.try_get_index(*index)?)
		},
	}
}

/// The encoded size of the instruction when its opcode sits at `offset`.
///
/// Any constant the instruction loads is interned here already, so that the
/// `ldc`/`ldc_w` choice comes out the same in the serialize pass.
fn instruction_size(instruction: &Instruction, offset: u32, pool: &mut PoolWrite) -> Result<u32> {
	use Instruction as I;
	Ok(match instruction {
		I::BiPush(_) => 2,
		I::SiPush(_) => 3,
		I::Ldc(loadable) => {
			if PoolWrite::loadable_is_wide(loadable) {
				pool.put_loadable(loadable)?;
				3
			} else {
				let index = pool.put_loadable(loadable)?;
				if index <= 0xff { 2 } else { 3 }
			}
		},
		I::ILoad(lv) | I::LLoad(lv) | I::FLoad(lv) | I::DLoad(lv) | I::ALoad(lv) |
		I::IStore(lv) | I::LStore(lv) | I::FStore(lv) | I::DStore(lv) | I::AStore(lv) => {
			if lv.index <= 3 { 1 } else if lv.index <= 0xff { 2 } else { 4 }
		},
		I::Ret(lv) => if lv.index <= 0xff { 2 } else { 4 },
		I::IInc(lv, amount) => {
			if lv.index <= 0xff && i8::try_from(*amount).is_ok() { 3 } else { 6 }
		},
		I::IfEq(_) | I::IfNe(_) | I::IfLt(_) | I::IfGe(_) | I::IfGt(_) | I::IfLe(_) |
		I::IfICmpEq(_) | I::IfICmpNe(_) | I::IfICmpLt(_) | I::IfICmpGe(_) |
		I::IfICmpGt(_) | I::IfICmpLe(_) | I::IfACmpEq(_) | I::IfACmpNe(_) |
		I::IfNull(_) | I::IfNonNull(_) | I::Goto(_) | I::Jsr(_) => 3,
		I::TableSwitch { table, .. } => {
			let padding = (4 - ((offset + 1) % 4)) % 4;
			1 + padding + 12 + 4 * table.len() as u32
		},
		I::LookupSwitch { pairs, .. } => {
			let padding = (4 - ((offset + 1) % 4)) % 4;
			1 + padding + 8 + 8 * pairs.len() as u32
		},
		I::GetStatic(field) | I::PutStatic(field) | I::GetField(field) | I::PutField(field) => {
			pool.put_field_ref(field)?;
			3
		},
		I::InvokeVirtual(method) => { pool.put_method_ref(method, false)?; 3 },
		I::InvokeSpecial(method, is_interface) | I::InvokeStatic(method, is_interface) => {
			pool.put_method_ref(method, *is_interface)?;
			3
		},
		I::InvokeInterface(method) => { pool.put_method_ref(method, true)?; 5 },
		I::InvokeDynamic(invoke_dynamic) => { pool.put_invoke_dynamic(invoke_dynamic)?; 5 },
		I::New(class) | I::ANewArray(class) | I::CheckCast(class) | I::InstanceOf(class) => {
			pool.put_class(class)?;
			3
		},
		I::NewArray(_) => 2,
		I::MultiANewArray(class, _) => { pool.put_class(class)?; 4 },
		_ => 1,
	})
}

fn write_instruction(writer: &mut Vec<u8>, instruction: &Instruction, labels: &Labels, pool: &mut PoolWrite) -> Result<()> {
	use Instruction as I;

	let opcode_pos = u16::try_from(writer.len()).context("method code larger than 65535 bytes")?;

	fn branch(writer: &mut Vec<u8>, opcode_byte: u8, opcode_pos: u16, labels: &Labels, target: &crate::tree::method::code::Label) -> Result<()> {
		let target_pc = labels.try_get(target)?;
		let delta = target_pc as i32 - opcode_pos as i32;
		let delta = i16::try_from(delta)
			.with_context(|| anyhow!("branch offset {delta} doesn't fit into an i16"))?;
		writer.write_u8(opcode_byte)?;
		writer.write_i16(delta)
	}

	fn wide_branch_offset(opcode_pos: u16, labels: &Labels, target: &crate::tree::method::code::Label) -> Result<i32> {
		Ok(labels.try_get(target)? as i32 - opcode_pos as i32)
	}

	fn load_store(writer: &mut Vec<u8>, base: u8, base_0: u8, index: u16) -> Result<()> {
		if index <= 3 {
			writer.write_u8(base_0 + index as u8)
		} else if index <= 0xff {
			writer.write_u8(base)?;
			writer.write_u8(index as u8)
		} else {
			writer.write_u8(opcode::WIDE)?;
			writer.write_u8(base)?;
			writer.write_u16(index)
		}
	}

	match instruction {
		I::Nop => writer.write_u8(opcode::NOP)?,
		I::AConstNull => writer.write_u8(opcode::ACONST_NULL)?,
		I::IConstM1 => writer.write_u8(opcode::ICONST_M1)?,
		I::IConst0 => writer.write_u8(opcode::ICONST_0)?,
		I::IConst1 => writer.write_u8(opcode::ICONST_1)?,
		I::IConst2 => writer.write_u8(opcode::ICONST_2)?,
		I::IConst3 => writer.write_u8(opcode::ICONST_3)?,
		I::IConst4 => writer.write_u8(opcode::ICONST_4)?,
		I::IConst5 => writer.write_u8(opcode::ICONST_5)?,
		I::LConst0 => writer.write_u8(opcode::LCONST_0)?,
		I::LConst1 => writer.write_u8(opcode::LCONST_1)?,
		I::FConst0 => writer.write_u8(opcode::FCONST_0)?,
		I::FConst1 => writer.write_u8(opcode::FCONST_1)?,
		I::FConst2 => writer.write_u8(opcode::FCONST_2)?,
		I::DConst0 => writer.write_u8(opcode::DCONST_0)?,
		I::DConst1 => writer.write_u8(opcode::DCONST_1)?,
		I::BiPush(value) => {
			writer.write_u8(opcode::BIPUSH)?;
			writer.write_i8(*value)?;
		},
		I::SiPush(value) => {
			writer.write_u8(opcode::SIPUSH)?;
			writer.write_i16(*value)?;
		},
		I::Ldc(loadable) => {
			let index = pool.put_loadable(loadable)?;
			if PoolWrite::loadable_is_wide(loadable) {
				writer.write_u8(opcode::LDC2_W)?;
				writer.write_u16(index)?;
			} else if index <= 0xff {
				writer.write_u8(opcode::LDC)?;
				writer.write_u8(index as u8)?;
			} else {
				writer.write_u8(opcode::LDC_W)?;
				writer.write_u16(index)?;
			}
		},

		I::ILoad(lv) => load_store(writer, opcode::ILOAD, opcode::ILOAD_0, lv.index)?,
		I::LLoad(lv) => load_store(writer, opcode::LLOAD, opcode::LLOAD_0, lv.index)?,
		I::FLoad(lv) => load_store(writer, opcode::FLOAD, opcode::FLOAD_0, lv.index)?,
		I::DLoad(lv) => load_store(writer, opcode::DLOAD, opcode::DLOAD_0, lv.index)?,
		I::ALoad(lv) => load_store(writer, opcode::ALOAD, opcode::ALOAD_0, lv.index)?,
		I::IStore(lv) => load_store(writer, opcode::ISTORE, opcode::ISTORE_0, lv.index)?,
		I::LStore(lv) => load_store(writer, opcode::LSTORE, opcode::LSTORE_0, lv.index)?,
		I::FStore(lv) => load_store(writer, opcode::FSTORE, opcode::FSTORE_0, lv.index)?,
		I::DStore(lv) => load_store(writer, opcode::DSTORE, opcode::DSTORE_0, lv.index)?,
		I::AStore(lv) => load_store(writer, opcode::ASTORE, opcode::ASTORE_0, lv.index)?,

		I::IALoad => writer.write_u8(opcode::IALOAD)?,
		I::LALoad => writer.write_u8(opcode::LALOAD)?,
		I::FALoad => writer.write_u8(opcode::FALOAD)?,
		I::DALoad => writer.write_u8(opcode::DALOAD)?,
		I::AALoad => writer.write_u8(opcode::AALOAD)?,
		I::BALoad => writer.write_u8(opcode::BALOAD)?,
		I::CALoad => writer.write_u8(opcode::CALOAD)?,
		I::SALoad => writer.write_u8(opcode::SALOAD)?,
		I::IAStore => writer.write_u8(opcode::IASTORE)?,
		I::LAStore => writer.write_u8(opcode::LASTORE)?,
		I::FAStore => writer.write_u8(opcode::FASTORE)?,
		I::DAStore => writer.write_u8(opcode::DASTORE)?,
		I::AAStore => writer.write_u8(opcode::AASTORE)?,
		I::BAStore => writer.write_u8(opcode::BASTORE)?,
		I::CAStore => writer.write_u8(opcode::CASTORE)?,
		I::SAStore => writer.write_u8(opcode::SASTORE)?,

		I::Pop => writer.write_u8(opcode::POP)?,
		I::Pop2 => writer.write_u8(opcode::POP2)?,
		I::Dup => writer.write_u8(opcode::DUP)?,
		I::DupX1 => writer.write_u8(opcode::DUP_X1)?,
		I::DupX2 => writer.write_u8(opcode::DUP_X2)?,
		I::Dup2 => writer.write_u8(opcode::DUP2)?,
		I::Dup2X1 => writer.write_u8(opcode::DUP2_X1)?,
		I::Dup2X2 => writer.write_u8(opcode::DUP2_X2)?,
		I::Swap => writer.write_u8(opcode::SWAP)?,

		I::IAdd => writer.write_u8(opcode::IADD)?,
		I::LAdd => writer.write_u8(opcode::LADD)?,
		I::FAdd => writer.write_u8(opcode::FADD)?,
		I::DAdd => writer.write_u8(opcode::DADD)?,
		I::ISub => writer.write_u8(opcode::ISUB)?,
		I::LSub => writer.write_u8(opcode::LSUB)?,
		I::FSub => writer.write_u8(opcode::FSUB)?,
		I::DSub => writer.write_u8(opcode::DSUB)?,
		I::IMul => writer.write_u8(opcode::IMUL)?,
		I::LMul => writer.write_u8(opcode::LMUL)?,
		I::FMul => writer.write_u8(opcode::FMUL)?,
		I::DMul => writer.write_u8(opcode::DMUL)?,
		I::IDiv => writer.write_u8(opcode::IDIV)?,
		I::LDiv => writer.write_u8(opcode::LDIV)?,
		I::FDiv => writer.write_u8(opcode::FDIV)?,
		I::DDiv => writer.write_u8(opcode::DDIV)?,
		I::IRem => writer.write_u8(opcode::IREM)?,
		I::LRem => writer.write_u8(opcode::LREM)?,
		I::FRem => writer.write_u8(opcode::FREM)?,
		I::DRem => writer.write_u8(opcode::DREM)?,
		I::INeg => writer.write_u8(opcode::INEG)?,
		I::LNeg => writer.write_u8(opcode::LNEG)?,
		I::FNeg => writer.write_u8(opcode::FNEG)?,
		I::DNeg => writer.write_u8(opcode::DNEG)?,
		I::IShl => writer.write_u8(opcode::ISHL)?,
		I::LShl => writer.write_u8(opcode::LSHL)?,
		I::IShr => writer.write_u8(opcode::ISHR)?,
		I::LShr => writer.write_u8(opcode::LSHR)?,
		I::IUShr => writer.write_u8(opcode::IUSHR)?,
		I::LUShr => writer.write_u8(opcode::LUSHR)?,
		I::IAnd => writer.write_u8(opcode::IAND)?,
		I::LAnd => writer.write_u8(opcode::LAND)?,
		I::IOr => writer.write_u8(opcode::IOR)?,
		I::LOr => writer.write_u8(opcode::LOR)?,
		I::IXor => writer.write_u8(opcode::IXOR)?,
		I::LXor => writer.write_u8(opcode::LXOR)?,
		I::IInc(lv, amount) => {
			if lv.index <= 0xff && i8::try_from(*amount).is_ok() {
				writer.write_u8(opcode::IINC)?;
				writer.write_u8(lv.index as u8)?;
				writer.write_i8(*amount as i8)?;
			} else {
				writer.write_u8(opcode::WIDE)?;
				writer.write_u8(opcode::IINC)?;
				writer.write_u16(lv.index)?;
				writer.write_i16(*amount)?;
			}
		},

		I::I2L => writer.write_u8(opcode::I2L)?,
		I::I2F => writer.write_u8(opcode::I2F)?,
		I::I2D => writer.write_u8(opcode::I2D)?,
		I::L2I => writer.write_u8(opcode::L2I)?,
		I::L2F => writer.write_u8(opcode::L2F)?,
		I::L2D => writer.write_u8(opcode::L2D)?,
		I::F2I => writer.write_u8(opcode::F2I)?,
		I::F2L => writer.write_u8(opcode::F2L)?,
		I::F2D => writer.write_u8(opcode::F2D)?,
		I::D2I => writer.write_u8(opcode::D2I)?,
		I::D2L => writer.write_u8(opcode::D2L)?,
		I::D2F => writer.write_u8(opcode::D2F)?,
		I::I2B => writer.write_u8(opcode::I2B)?,
		I::I2C => writer.write_u8(opcode::I2C)?,
		I::I2S => writer.write_u8(opcode::I2S)?,

		I::LCmp => writer.write_u8(opcode::LCMP)?,
		I::FCmpL => writer.write_u8(opcode::FCMPL)?,
		I::FCmpG => writer.write_u8(opcode::FCMPG)?,
		I::DCmpL => writer.write_u8(opcode::DCMPL)?,
		I::DCmpG => writer.write_u8(opcode::DCMPG)?,

		I::IfEq(target) => branch(writer, opcode::IFEQ, opcode_pos, labels, target)?,
		I::IfNe(target) => branch(writer, opcode::IFNE, opcode_pos, labels, target)?,
		I::IfLt(target) => branch(writer, opcode::IFLT, opcode_pos, labels, target)?,
		I::IfGe(target) => branch(writer, opcode::IFGE, opcode_pos, labels, target)?,
		I::IfGt(target) => branch(writer, opcode::IFGT, opcode_pos, labels, target)?,
		I::IfLe(target) => branch(writer, opcode::IFLE, opcode_pos, labels, target)?,
		I::IfICmpEq(target) => branch(writer, opcode::IF_ICMPEQ, opcode_pos, labels, target)?,
		I::IfICmpNe(target) => branch(writer, opcode::IF_ICMPNE, opcode_pos, labels, target)?,
		I::IfICmpLt(target) => branch(writer, opcode::IF_ICMPLT, opcode_pos, labels, target)?,
		I::IfICmpGe(target) => branch(writer, opcode::IF_ICMPGE, opcode_pos, labels, target)?,
		I::IfICmpGt(target) => branch(writer, opcode::IF_ICMPGT, opcode_pos, labels, target)?,
		I::IfICmpLe(target) => branch(writer, opcode::IF_ICMPLE, opcode_pos, labels, target)?,
		I::IfACmpEq(target) => branch(writer, opcode::IF_ACMPEQ, opcode_pos, labels, target)?,
		I::IfACmpNe(target) => branch(writer, opcode::IF_ACMPNE, opcode_pos, labels, target)?,
		I::Goto(target) => branch(writer, opcode::GOTO, opcode_pos, labels, target)?,
		I::Jsr(target) => branch(writer, opcode::JSR, opcode_pos, labels, target)?,
		I::Ret(lv) => {
			if lv.index <= 0xff {
				writer.write_u8(opcode::RET)?;
				writer.write_u8(lv.index as u8)?;
			} else {
				writer.write_u8(opcode::WIDE)?;
				writer.write_u8(opcode::RET)?;
				writer.write_u16(lv.index)?;
			}
		},
		I::IfNull(target) => branch(writer, opcode::IFNULL, opcode_pos, labels, target)?,
		I::IfNonNull(target) => branch(writer, opcode::IFNONNULL, opcode_pos, labels, target)?,

		I::TableSwitch { default, low, high, table } => {
			writer.write_u8(opcode::TABLESWITCH)?;
			while writer.len() % 4 != 0 {
				writer.write_u8(0)?;
			}
			writer.write_i32(wide_branch_offset(opcode_pos, labels, default)?)?;
			writer.write_i32(*low)?;
			writer.write_i32(*high)?;
			for target in table {
				writer.write_i32(wide_branch_offset(opcode_pos, labels, target)?)?;
			}
		},
		I::LookupSwitch { default, pairs } => {
			writer.write_u8(opcode::LOOKUPSWITCH)?;
			while writer.len() % 4 != 0 {
				writer.write_u8(0)?;
			}
			writer.write_i32(wide_branch_offset(opcode_pos, labels, default)?)?;
			writer.write_usize_as_u32(pairs.len())?;
			for (key, target) in pairs {
				writer.write_i32(*key)?;
				writer.write_i32(wide_branch_offset(opcode_pos, labels, target)?)?;
			}
		},

		I::IReturn => writer.write_u8(opcode::IRETURN)?,
		I::LReturn => writer.write_u8(opcode::LRETURN)?,
		I::FReturn => writer.write_u8(opcode::FRETURN)?,
		I::DReturn => writer.write_u8(opcode::DRETURN)?,
		I::AReturn => writer.write_u8(opcode::ARETURN)?,
		I::Return => writer.write_u8(opcode::RETURN)?,

		I::GetStatic(field) => {
			writer.write_u8(opcode::GETSTATIC)?;
			writer.write_u16(pool.put_field_ref(field)?)?;
		},
		I::PutStatic(field) => {
			writer.write_u8(opcode::PUTSTATIC)?;
			writer.write_u16(pool.put_field_ref(field)?)?;
		},
		I::GetField(field) => {
			writer.write_u8(opcode::GETFIELD)?;
			writer.write_u16(pool.put_field_ref(field)?)?;
		},
		I::PutField(field) => {
			writer.write_u8(opcode::PUTFIELD)?;
			writer.write_u16(pool.put_field_ref(field)?)?;
		},

		I::InvokeVirtual(method) => {
			writer.write_u8(opcode::INVOKEVIRTUAL)?;
			writer.write_u16(pool.put_method_ref(method, false)?)?;
		},
		I::InvokeSpecial(method, is_interface) => {
			writer.write_u8(opcode::INVOKESPECIAL)?;
			writer.write_u16(pool.put_method_ref(method, *is_interface)?)?;
		},
		I::InvokeStatic(method, is_interface) => {
			writer.write_u8(opcode::INVOKESTATIC)?;
			writer.write_u16(pool.put_method_ref(method, *is_interface)?)?;
		},
		I::InvokeInterface(method) => {
			writer.write_u8(opcode::INVOKEINTERFACE)?;
			writer.write_u16(pool.put_method_ref(method, true)?)?;
			writer.write_u8(invoke_interface_count(method)?)?;
			writer.write_u8(0)?;
		},
		I::InvokeDynamic(invoke_dynamic) => {
			writer.write_u8(opcode::INVOKEDYNAMIC)?;
			writer.write_u16(pool.put_invoke_dynamic(invoke_dynamic)?)?;
			writer.write_u8(0)?;
			writer.write_u8(0)?;
		},

		I::New(class) => {
			writer.write_u8(opcode::NEW)?;
			writer.write_u16(pool.put_class(class)?)?;
		},
		I::NewArray(array_type) => {
			writer.write_u8(opcode::NEWARRAY)?;
			writer.write_u8(array_type.to_atype())?;
		},
		I::ANewArray(class) => {
			writer.write_u8(opcode::ANEWARRAY)?;
			writer.write_u16(pool.put_class(class)?)?;
		},
		I::ArrayLength => writer.write_u8(opcode::ARRAYLENGTH)?,
		I::AThrow => writer.write_u8(opcode::ATHROW)?,
		I::CheckCast(class) => {
			writer.write_u8(opcode::CHECKCAST)?;
			writer.write_u16(pool.put_class(class)?)?;
		},
		I::InstanceOf(class) => {
			writer.write_u8(opcode::INSTANCEOF)?;
			writer.write_u16(pool.put_class(class)?)?;
		},
		I::MonitorEnter => writer.write_u8(opcode::MONITORENTER)?,
		I::MonitorExit => writer.write_u8(opcode::MONITOREXIT)?,
		I::MultiANewArray(class, dimensions) => {
			writer.write_u8(opcode::MULTIANEWARRAY)?;
			writer.write_u16(pool.put_class(class)?)?;
			writer.write_u8(*dimensions)?;
		},
	}

	Ok(())
}
