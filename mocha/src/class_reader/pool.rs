use anyhow::{anyhow, bail, Context, Result};
use crate::class_constants::pool;
use crate::class_constants::pool::method_handle_reference;
use crate::{jstring, ClassRead};
use crate::tree::class::ClassName;
use crate::tree::field::{ConstantValue, FieldRef};
use crate::tree::method::code::{ConstantDynamic, Handle, Loadable};
use crate::tree::method::MethodRef;

/// A bootstrap method of the `BootstrapMethods` attribute, with unresolved
/// argument indices. Arguments resolve lazily since they can themselves be
/// `Dynamic` entries.
#[derive(Debug, Clone)]
pub(crate) struct BootstrapMethodRead {
	pub(crate) handle_index: u16,
	pub(crate) arguments: Vec<u16>,
}

#[derive(Debug, Clone)]
enum PoolEntry {
	Utf8(String),
	Integer(i32),
	Float(f32),
	Long(i64),
	Double(f64),
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
	Module { name_index: u16 },
	Package { name_index: u16 },
	/// Index zero, and the phantom second slot of `Long`/`Double` entries.
	Unusable,
}

pub(crate) struct PoolRead {
	entries: Vec<PoolEntry>,
}

impl PoolRead {
	pub(crate) fn read(reader: &mut impl ClassRead) -> Result<PoolRead> {
		let count = reader.read_u16_as_usize()?;
		let mut entries = Vec::with_capacity(count);
		entries.push(PoolEntry::Unusable);

		while entries.len() < count {
			let tag = reader.read_u8()?;
			let entry = match tag {
				pool::UTF8 => {
					let length = reader.read_u16_as_usize()?;
					let vec = reader.read_u8_vec(length)?;
					PoolEntry::Utf8(jstring::from_vec_to_string(vec)
						.with_context(|| anyhow!("in constant pool entry {}", entries.len()))?)
				},
				pool::INTEGER => PoolEntry::Integer(reader.read_i32()?),
				pool::FLOAT => PoolEntry::Float(f32::from_bits(reader.read_u32()?)),
				pool::LONG => PoolEntry::Long({
					let high = reader.read_u32()? as u64;
					let low = reader.read_u32()? as u64;
					((high << 32) | low) as i64
				}),
				pool::DOUBLE => PoolEntry::Double({
					let high = reader.read_u32()? as u64;
					let low = reader.read_u32()? as u64;
					f64::from_bits((high << 32) | low)
				}),
				pool::CLASS => PoolEntry::Class { name_index: reader.read_u16()? },
				pool::STRING => PoolEntry::String { string_index: reader.read_u16()? },
				pool::FIELD_REF => PoolEntry::FieldRef {
					class_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::METHOD_REF => PoolEntry::MethodRef {
					class_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::INTERFACE_METHOD_REF => PoolEntry::InterfaceMethodRef {
					class_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::NAME_AND_TYPE => PoolEntry::NameAndType {
					name_index: reader.read_u16()?,
					descriptor_index: reader.read_u16()?,
				},
				pool::METHOD_HANDLE => PoolEntry::MethodHandle {
					kind: reader.read_u8()?,
					reference_index: reader.read_u16()?,
				},
				pool::METHOD_TYPE => PoolEntry::MethodType { descriptor_index: reader.read_u16()? },
				pool::DYNAMIC => PoolEntry::Dynamic {
					bootstrap_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::INVOKE_DYNAMIC => PoolEntry::InvokeDynamic {
					bootstrap_index: reader.read_u16()?,
					name_and_type_index: reader.read_u16()?,
				},
				pool::MODULE => PoolEntry::Module { name_index: reader.read_u16()? },
				pool::PACKAGE => PoolEntry::Package { name_index: reader.read_u16()? },
				tag => bail!("unknown constant pool tag {tag} for entry {}", entries.len()),
			};

			let takes_two_slots = matches!(entry, PoolEntry::Long(_) | PoolEntry::Double(_));
			entries.push(entry);
			if takes_two_slots {
				entries.push(PoolEntry::Unusable);
			}
		}

		Ok(PoolRead { entries })
	}

	fn get(&self, index: u16) -> Result<&PoolEntry> {
		match self.entries.get(index as usize) {
			None => bail!("constant pool index {index} out of range"),
			Some(PoolEntry::Unusable) => bail!("constant pool index {index} is unusable"),
			Some(entry) => Ok(entry),
		}
	}

	/// Calls `f` for a non-zero index, `0` meaning "not present".
	pub(crate) fn get_optional<T>(&self, index: u16, f: impl FnOnce(&Self, u16) -> Result<T>) -> Result<Option<T>> {
		if index == 0 {
			Ok(None)
		} else {
			f(self, index).map(Some)
		}
	}

	pub(crate) fn get_utf8(&self, index: u16) -> Result<String> {
		match self.get(index)? {
			PoolEntry::Utf8(string) => Ok(string.clone()),
			entry => bail!("constant pool index {index} is not Utf8: {entry:?}"),
		}
	}

	pub(crate) fn get_utf8_ref(&self, index: u16) -> Result<&str> {
		match self.get(index)? {
			PoolEntry::Utf8(string) => Ok(string),
			entry => bail!("constant pool index {index} is not Utf8: {entry:?}"),
		}
	}

	pub(crate) fn get_class(&self, index: u16) -> Result<ClassName> {
		match self.get(index)? {
			PoolEntry::Class { name_index } => Ok(ClassName::from(self.get_utf8(*name_index)?)),
			entry => bail!("constant pool index {index} is not a Class: {entry:?}"),
		}
	}

	pub(crate) fn get_name_and_type(&self, index: u16) -> Result<(String, String)> {
		match self.get(index)? {
			PoolEntry::NameAndType { name_index, descriptor_index } => {
				Ok((self.get_utf8(*name_index)?, self.get_utf8(*descriptor_index)?))
			},
			entry => bail!("constant pool index {index} is not a NameAndType: {entry:?}"),
		}
	}

	pub(crate) fn get_field_ref(&self, index: u16) -> Result<FieldRef> {
		match self.get(index)? {
			PoolEntry::FieldRef { class_index, name_and_type_index } => {
				let class = self.get_class(*class_index)?;
				let (name, desc) = self.get_name_and_type(*name_and_type_index)?;
				Ok(FieldRef { class, name: name.into(), desc: desc.into() })
			},
			entry => bail!("constant pool index {index} is not a FieldRef: {entry:?}"),
		}
	}

	/// The `bool` is `true` iff the entry is an `InterfaceMethodRef`.
	pub(crate) fn get_method_ref(&self, index: u16) -> Result<(MethodRef, bool)> {
		match self.get(index)? {
			PoolEntry::MethodRef { class_index, name_and_type_index } => {
				let class = self.get_class(*class_index)?;
				let (name, desc) = self.get_name_and_type(*name_and_type_index)?;
				Ok((MethodRef { class, name: name.into(), desc: desc.into() }, false))
			},
			PoolEntry::InterfaceMethodRef { class_index, name_and_type_index } => {
				let class = self.get_class(*class_index)?;
				let (name, desc) = self.get_name_and_type(*name_and_type_index)?;
				Ok((MethodRef { class, name: name.into(), desc: desc.into() }, true))
			},
			entry => bail!("constant pool index {index} is not a MethodRef: {entry:?}"),
		}
	}

	pub(crate) fn get_constant_value(&self, index: u16) -> Result<ConstantValue> {
		Ok(match self.get(index)? {
			PoolEntry::Integer(value) => ConstantValue::Integer(*value),
			PoolEntry::Float(value) => ConstantValue::Float(*value),
			PoolEntry::Long(value) => ConstantValue::Long(*value),
			PoolEntry::Double(value) => ConstantValue::Double(*value),
			PoolEntry::String { string_index } => ConstantValue::String(self.get_utf8(*string_index)?),
			entry => bail!("constant pool index {index} is not loadable as a ConstantValue: {entry:?}"),
		})
	}

	pub(crate) fn get_handle(&self, index: u16) -> Result<Handle> {
		match self.get(index)? {
			PoolEntry::MethodHandle { kind, reference_index } => {
				Ok(match *kind {
					method_handle_reference::GET_FIELD => Handle::GetField(self.get_field_ref(*reference_index)?),
					method_handle_reference::GET_STATIC => Handle::GetStatic(self.get_field_ref(*reference_index)?),
					method_handle_reference::PUT_FIELD => Handle::PutField(self.get_field_ref(*reference_index)?),
					method_handle_reference::PUT_STATIC => Handle::PutStatic(self.get_field_ref(*reference_index)?),
					method_handle_reference::INVOKE_VIRTUAL => {
						let (method, _) = self.get_method_ref(*reference_index)?;
						Handle::InvokeVirtual(method)
					},
					method_handle_reference::INVOKE_STATIC => {
						let (method, is_interface) = self.get_method_ref(*reference_index)?;
						Handle::InvokeStatic(method, is_interface)
					},
					method_handle_reference::INVOKE_SPECIAL => {
						let (method, is_interface) = self.get_method_ref(*reference_index)?;
						Handle::InvokeSpecial(method, is_interface)
					},
					method_handle_reference::NEW_INVOKE_SPECIAL => {
						let (method, _) = self.get_method_ref(*reference_index)?;
						Handle::NewInvokeSpecial(method)
					},
					method_handle_reference::INVOKE_INTERFACE => {
						let (method, _) = self.get_method_ref(*reference_index)?;
						Handle::InvokeInterface(method)
					},
					kind => bail!("unknown method handle reference kind {kind}"),
				})
			},
			entry => bail!("constant pool index {index} is not a MethodHandle: {entry:?}"),
		}
	}

	pub(crate) fn get_loadable(&self, index: u16, bootstrap_methods: &[BootstrapMethodRead]) -> Result<Loadable> {
		self.get_loadable_bounded(index, bootstrap_methods, 0)
	}

	fn get_loadable_bounded(&self, index: u16, bootstrap_methods: &[BootstrapMethodRead], depth: u8) -> Result<Loadable> {
		// Dynamic entries can reference each other through bootstrap arguments
		if depth > 8 {
			bail!("constant pool Dynamic entries nest too deeply at index {index}");
		}
		Ok(match self.get(index)? {
			PoolEntry::Integer(value) => Loadable::Integer(*value),
			PoolEntry::Float(value) => Loadable::Float(*value),
			PoolEntry::Long(value) => Loadable::Long(*value),
			PoolEntry::Double(value) => Loadable::Double(*value),
			PoolEntry::Class { name_index } => Loadable::Class(ClassName::from(self.get_utf8(*name_index)?)),
			PoolEntry::String { string_index } => Loadable::String(self.get_utf8(*string_index)?),
			PoolEntry::MethodHandle { .. } => Loadable::MethodHandle(self.get_handle(index)?),
			PoolEntry::MethodType { descriptor_index } => {
				Loadable::MethodType(self.get_utf8(*descriptor_index)?.into())
			},
			PoolEntry::Dynamic { bootstrap_index, name_and_type_index } => {
				let bootstrap = bootstrap_methods.get(*bootstrap_index as usize)
					.with_context(|| anyhow!("bootstrap method index {bootstrap_index} out of range"))?;
				let (name, descriptor) = self.get_name_and_type(*name_and_type_index)?;
				Loadable::Dynamic(ConstantDynamic {
					name: name.into(),
					descriptor: descriptor.into(),
					handle: self.get_handle(bootstrap.handle_index)?,
					arguments: bootstrap.arguments.iter()
						.map(|&argument| self.get_loadable_bounded(argument, bootstrap_methods, depth + 1))
						.collect::<Result<_>>()?,
				})
			},
			entry => bail!("constant pool index {index} is not loadable: {entry:?}"),
		})
	}

	/// Resolves an `invokedynamic` call site.
	pub(crate) fn get_invoke_dynamic(&self, index: u16, bootstrap_methods: &[BootstrapMethodRead]) -> Result<crate::tree::method::code::InvokeDynamic> {
		match self.get(index)? {
			PoolEntry::InvokeDynamic { bootstrap_index, name_and_type_index } => {
				let bootstrap = bootstrap_methods.get(*bootstrap_index as usize)
					.with_context(|| anyhow!("bootstrap method index {bootstrap_index} out of range"))?;
				let (name, descriptor) = self.get_name_and_type(*name_and_type_index)?;
				Ok(crate::tree::method::code::InvokeDynamic {
					name: name.into(),
					descriptor: descriptor.into(),
					handle: self.get_handle(bootstrap.handle_index)?,
					arguments: bootstrap.arguments.iter()
						.map(|&argument| self.get_loadable(argument, bootstrap_methods))
						.collect::<Result<_>>()?,
				})
			},
			entry => bail!("constant pool index {index} is not an InvokeDynamic: {entry:?}"),
		}
	}
}
