use std::collections::HashMap;
use anyhow::{bail, Context, Result};
use crate::class_constants::pool;
use crate::class_constants::pool::method_handle_reference;
use crate::{jstring, ClassWrite};
use crate::tree::class::ClassName;
use crate::tree::field::{ConstantValue, FieldRef};
use crate::tree::method::code::{Handle, InvokeDynamic, Loadable};
use crate::tree::method::MethodRef;

/// A bootstrap method for the `BootstrapMethods` attribute: the handle and
/// the arguments, both already as pool indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BootstrapMethodWrite {
	handle_index: u16,
	arguments: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PoolEntry {
	Utf8(String),
	Integer(i32),
	/// Bits, so the entry can be hashed.
	Float(u32),
	Long(i64),
	/// Bits, so the entry can be hashed.
	Double(u64),
	Class { name_index: u16 },
	String { string_index: u16 },
	FieldRef { class_index: u16, name_and_type_index: u16 },
	MethodRef { class_index: u16, name_and_type_index: u16 },
	InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
	NameAndType { name_index: u16, descriptor_index: u16 },
	MethodHandle { kind: u8, reference_index: u16 },
	MethodType { descriptor_index: u16 },
	Dynamic { bootstrap_index: u16, name_and_type_index: u16 },
	InvokeDynamic { bootstrap_index: u16, name_and_type_index: u16 },
}

impl PoolEntry {
	fn takes_two_slots(&self) -> bool {
		matches!(self, PoolEntry::Long(_) | PoolEntry::Double(_))
	}
}

/// A deduplicating constant pool under construction. Also collects the
/// bootstrap methods, since their attribute can only be written once every
/// loadable has been interned.
pub(crate) struct PoolWrite {
	/// `None` is the phantom slot following a `Long`/`Double`.
	entries: Vec<Option<PoolEntry>>,
	indices: HashMap<PoolEntry, u16>,
	bootstrap_methods: Vec<BootstrapMethodWrite>,
}

impl PoolWrite {
	pub(crate) fn new() -> PoolWrite {
		PoolWrite {
			entries: Vec::new(),
			indices: HashMap::new(),
			bootstrap_methods: Vec::new(),
		}
	}

	fn put(&mut self, entry: PoolEntry) -> Result<u16> {
		if let Some(&index) = self.indices.get(&entry) {
			return Ok(index);
		}
		// slot zero is implicit, so the next index is len + 1
		let index = u16::try_from(self.entries.len() + 1)
			.ok().filter(|&index| index != u16::MAX)
			.context("constant pool overflow")?;
		let two_slots = entry.takes_two_slots();
		self.indices.insert(entry.clone(), index);
		self.entries.push(Some(entry));
		if two_slots {
			self.entries.push(None);
		}
		Ok(index)
	}

	pub(crate) fn put_utf8(&mut self, string: &str) -> Result<u16> {
		self.put(PoolEntry::Utf8(string.to_owned()))
	}

	pub(crate) fn put_class(&mut self, class: &ClassName) -> Result<u16> {
		let name_index = self.put_utf8(class.as_str())?;
		self.put(PoolEntry::Class { name_index })
	}

	pub(crate) fn put_string(&mut self, string: &str) -> Result<u16> {
		let string_index = self.put_utf8(string)?;
		self.put(PoolEntry::String { string_index })
	}

	pub(crate) fn put_optional<T: ?Sized>(&mut self, value: Option<&T>, f: impl FnOnce(&mut Self, &T) -> Result<u16>) -> Result<u16> {
		match value {
			Some(value) => f(self, value),
			None => Ok(0),
		}
	}

	pub(crate) fn put_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
		let name_index = self.put_utf8(name)?;
		let descriptor_index = self.put_utf8(descriptor)?;
		self.put(PoolEntry::NameAndType { name_index, descriptor_index })
	}

	pub(crate) fn put_field_ref(&mut self, field: &FieldRef) -> Result<u16> {
		let class_index = self.put_class(&field.class)?;
		let name_and_type_index = self.put_name_and_type(field.name.as_str(), field.desc.as_str())?;
		self.put(PoolEntry::FieldRef { class_index, name_and_type_index })
	}

	pub(crate) fn put_method_ref(&mut self, method: &MethodRef, is_interface: bool) -> Result<u16> {
		let class_index = self.put_class(&method.class)?;
		let name_and_type_index = self.put_name_and_type(method.name.as_str(), method.desc.as_str())?;
		if is_interface {
			self.put(PoolEntry::InterfaceMethodRef { class_index, name_and_type_index })
		} else {
			self.put(PoolEntry::MethodRef { class_index, name_and_type_index })
		}
	}

	pub(crate) fn put_integer(&mut self, value: i32) -> Result<u16> {
		self.put(PoolEntry::Integer(value))
	}

	pub(crate) fn put_constant_value(&mut self, value: &ConstantValue) -> Result<u16> {
		match value {
			ConstantValue::Integer(value) => self.put(PoolEntry::Integer(*value)),
			ConstantValue::Float(value) => self.put(PoolEntry::Float(value.to_bits())),
			ConstantValue::Long(value) => self.put(PoolEntry::Long(*value)),
			ConstantValue::Double(value) => self.put(PoolEntry::Double(value.to_bits())),
			ConstantValue::String(value) => self.put_string(value),
		}
	}

	pub(crate) fn put_handle(&mut self, handle: &Handle) -> Result<u16> {
		let (kind, reference_index) = match handle {
			Handle::GetField(field) => (method_handle_reference::GET_FIELD, self.put_field_ref(field)?),
			Handle::GetStatic(field) => (method_handle_reference::GET_STATIC, self.put_field_ref(field)?),
			Handle::PutField(field) => (method_handle_reference::PUT_FIELD, self.put_field_ref(field)?),
			Handle::PutStatic(field) => (method_handle_reference::PUT_STATIC, self.put_field_ref(field)?),
			Handle::InvokeVirtual(method) => (method_handle_reference::INVOKE_VIRTUAL, self.put_method_ref(method, false)?),
			Handle::InvokeStatic(method, is_interface) => (method_handle_reference::INVOKE_STATIC, self.put_method_ref(method, *is_interface)?),
			Handle::InvokeSpecial(method, is_interface) => (method_handle_reference::INVOKE_SPECIAL, self.put_method_ref(method, *is_interface)?),
			Handle::NewInvokeSpecial(method) => (method_handle_reference::NEW_INVOKE_SPECIAL, self.put_method_ref(method, false)?),
			Handle::InvokeInterface(method) => (method_handle_reference::INVOKE_INTERFACE, self.put_method_ref(method, true)?),
		};
		self.put(PoolEntry::MethodHandle { kind, reference_index })
	}

	fn put_bootstrap_method(&mut self, handle: &Handle, arguments: &[Loadable]) -> Result<u16> {
		let handle_index = self.put_handle(handle)?;
		let arguments = arguments.iter()
			.map(|argument| self.put_loadable(argument))
			.collect::<Result<Vec<u16>>>()?;
		let bootstrap = BootstrapMethodWrite { handle_index, arguments };

		if let Some(position) = self.bootstrap_methods.iter().position(|existing| *existing == bootstrap) {
			return u16::try_from(position).context("too many bootstrap methods");
		}
		let index = u16::try_from(self.bootstrap_methods.len())
			.context("too many bootstrap methods")?;
		self.bootstrap_methods.push(bootstrap);
		Ok(index)
	}

	pub(crate) fn put_loadable(&mut self, loadable: &Loadable) -> Result<u16> {
		match loadable {
			Loadable::Integer(value) => self.put(PoolEntry::Integer(*value)),
			Loadable::Float(value) => self.put(PoolEntry::Float(value.to_bits())),
			Loadable::Long(value) => self.put(PoolEntry::Long(*value)),
			Loadable::Double(value) => self.put(PoolEntry::Double(value.to_bits())),
			Loadable::Class(class) => self.put_class(class),
			Loadable::String(string) => self.put_string(string),
			Loadable::MethodHandle(handle) => self.put_handle(handle),
			Loadable::MethodType(descriptor) => {
				let descriptor_index = self.put_utf8(descriptor.as_str())?;
				self.put(PoolEntry::MethodType { descriptor_index })
			},
			Loadable::Dynamic(dynamic) => {
				let bootstrap_index = self.put_bootstrap_method(&dynamic.handle, &dynamic.arguments)?;
				let name_and_type_index = self.put_name_and_type(dynamic.name.as_str(), dynamic.descriptor.as_str())?;
				self.put(PoolEntry::Dynamic { bootstrap_index, name_and_type_index })
			},
		}
	}

	/// `true` iff the loadable needs `ldc2_w`.
	pub(crate) fn loadable_is_wide(loadable: &Loadable) -> bool {
		matches!(loadable, Loadable::Long(_) | Loadable::Double(_))
	}

	pub(crate) fn put_invoke_dynamic(&mut self, invoke_dynamic: &InvokeDynamic) -> Result<u16> {
		let bootstrap_index = self.put_bootstrap_method(&invoke_dynamic.handle, &invoke_dynamic.arguments)?;
		let name_and_type_index = self.put_name_and_type(invoke_dynamic.name.as_str(), invoke_dynamic.descriptor.as_str())?;
		self.put(PoolEntry::InvokeDynamic { bootstrap_index, name_and_type_index })
	}

	pub(crate) fn has_bootstrap_methods(&self) -> bool {
		!self.bootstrap_methods.is_empty()
	}

	/// Writes the `BootstrapMethods` attribute payload.
	pub(crate) fn write_bootstrap_methods(&self, writer: &mut impl ClassWrite) -> Result<()> {
		writer.write_usize_as_u16(self.bootstrap_methods.len())?;
		for bootstrap in &self.bootstrap_methods {
			writer.write_u16(bootstrap.handle_index)?;
			writer.write_usize_as_u16(bootstrap.arguments.len())?;
			for &argument in &bootstrap.arguments {
				writer.write_u16(argument)?;
			}
		}
		Ok(())
	}

	/// Writes the `constant_pool_count` and `constant_pool` items.
	pub(crate) fn write(&self, writer: &mut impl ClassWrite) -> Result<()> {
		writer.write_usize_as_u16(self.entries.len() + 1)?;
		for entry in &self.entries {
			let Some(entry) = entry else { continue };
			match entry {
				PoolEntry::Utf8(string) => {
					writer.write_u8(pool::UTF8)?;
					let vec = jstring::from_string_to_vec(string);
					if vec.len() > 0xffff {
						bail!("Utf8 constant too long: {} bytes", vec.len());
					}
					writer.write_usize_as_u16(vec.len())?;
					writer.write_u8_slice(&vec)?;
				},
				PoolEntry::Integer(value) => {
					writer.write_u8(pool::INTEGER)?;
					writer.write_i32(*value)?;
				},
				PoolEntry::Float(bits) => {
					writer.write_u8(pool::FLOAT)?;
					writer.write_u32(*bits)?;
				},
				PoolEntry::Long(value) => {
					writer.write_u8(pool::LONG)?;
					writer.write_u32((*value as u64 >> 32) as u32)?;
					writer.write_u32(*value as u64 as u32)?;
				},
				PoolEntry::Double(bits) => {
					writer.write_u8(pool::DOUBLE)?;
					writer.write_u32((bits >> 32) as u32)?;
					writer.write_u32(*bits as u32)?;
				},
				PoolEntry::Class { name_index } => {
					writer.write_u8(pool::CLASS)?;
					writer.write_u16(*name_index)?;
				},
				PoolEntry::String { string_index } => {
					writer.write_u8(pool::STRING)?;
					writer.write_u16(*string_index)?;
				},
				PoolEntry::FieldRef { class_index, name_and_type_index } => {
					writer.write_u8(pool::FIELD_REF)?;
					writer.write_u16(*class_index)?;
					writer.write_u16(*name_and_type_index)?;
				},
				PoolEntry::MethodRef { class_index, name_and_type_index } => {
					writer.write_u8(pool::METHOD_REF)?;
					writer.write_u16(*class_index)?;
					writer.write_u16(*name_and_type_index)?;
				},
				PoolEntry::InterfaceMethodRef { class_index, name_and_type_index } => {
					writer.write_u8(pool::INTERFACE_METHOD_REF)?;
					writer.write_u16(*class_index)?;
					writer.write_u16(*name_and_type_index)?;
				},
				PoolEntry::NameAndType { name_index, descriptor_index } => {
					writer.write_u8(pool::NAME_AND_TYPE)?;
					writer.write_u16(*name_index)?;
					writer.write_u16(*descriptor_index)?;
				},
				PoolEntry::MethodHandle { kind, reference_index } => {
					writer.write_u8(pool::METHOD_HANDLE)?;
					writer.write_u8(*kind)?;
					writer.write_u16(*reference_index)?;
				},
				PoolEntry::MethodType { descriptor_index } => {
					writer.write_u8(pool::METHOD_TYPE)?;
					writer.write_u16(*descriptor_index)?;
				},
				PoolEntry::Dynamic { bootstrap_index, name_and_type_index } => {
					writer.write_u8(pool::DYNAMIC)?;
					writer.write_u16(*bootstrap_index)?;
					writer.write_u16(*name_and_type_index)?;
				},
				PoolEntry::InvokeDynamic { bootstrap_index, name_and_type_index } => {
					writer.write_u8(pool::INVOKE_DYNAMIC)?;
					writer.write_u16(*bootstrap_index)?;
					writer.write_u16(*name_and_type_index)?;
				},
			}
		}
		Ok(())
	}
}
