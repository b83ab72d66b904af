use std::fmt::{Debug, Formatter};
use crate::macros::{display_impl_for_name, from_impl_for_string_and_str, partial_eq_impl_for_str};
use crate::tree::annotation::Annotation;
use crate::tree::attribute::Attribute;
use crate::tree::class::ClassName;

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
	pub access: FieldAccess,
	pub name: FieldName,
	pub descriptor: FieldDescriptor,

	pub has_deprecated_attribute: bool,
	pub has_synthetic_attribute: bool,

	pub constant_value: Option<ConstantValue>,
	pub signature: Option<FieldSignature>,

	pub runtime_visible_annotations: Vec<Annotation>,
	pub runtime_invisible_annotations: Vec<Annotation>,

	pub attributes: Vec<Attribute>,
}

impl Field {
	pub fn new(access: FieldAccess, name: FieldName, descriptor: FieldDescriptor) -> Field {
		Field {
			access,
			name,
			descriptor,

			has_deprecated_attribute: false,
			has_synthetic_attribute: false,

			constant_value: None,
			signature: None,

			runtime_visible_annotations: Vec::new(),
			runtime_invisible_annotations: Vec::new(),

			attributes: Vec::new(),
		}
	}

	/// Clones `self.name` and `self.descriptor` into a new [`FieldRef`] on the given class.
	pub fn as_ref_on(&self, class: ClassName) -> FieldRef {
		FieldRef {
			class,
			name: self.name.clone(),
			desc: self.descriptor.clone(),
		}
	}
}

#[derive(Copy, Clone, Default, PartialEq)]
pub struct FieldAccess {
	pub is_public: bool,
	pub is_private: bool,
	pub is_protected: bool,
	pub is_static: bool,
	pub is_final: bool,
	pub is_volatile: bool,
	pub is_transient: bool,
	pub is_synthetic: bool,
	pub is_enum: bool,
}

impl Debug for FieldAccess {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str("FieldAccess { ")?;
		if self.is_public     { f.write_str("public ")?; }
		if self.is_private    { f.write_str("private ")?; }
		if self.is_protected  { f.write_str("protected ")?; }
		if self.is_static     { f.write_str("static ")?; }
		if self.is_final      { f.write_str("final ")?; }
		if self.is_volatile   { f.write_str("volatile ")?; }
		if self.is_transient  { f.write_str("transient ")?; }
		if self.is_synthetic  { f.write_str("synthetic ")?; }
		if self.is_enum       { f.write_str("enum ")?; }
		f.write_str("}")
	}
}

impl From<u16> for FieldAccess {
	fn from(value: u16) -> Self {
		FieldAccess {
			is_public:    value & 0x0001 != 0,
			is_private:   value & 0x0002 != 0,
			is_protected: value & 0x0004 != 0,
			is_static:    value & 0x0008 != 0,
			is_final:     value & 0x0010 != 0,
			is_volatile:  value & 0x0040 != 0,
			is_transient: value & 0x0080 != 0,
			is_synthetic: value & 0x1000 != 0,
			is_enum:      value & 0x4000 != 0,
		}
	}
}

impl From<FieldAccess> for u16 {
	fn from(value: FieldAccess) -> Self {
		(if value.is_public    { 0x0001 } else { 0 }) |
		(if value.is_private   { 0x0002 } else { 0 }) |
		(if value.is_protected { 0x0004 } else { 0 }) |
		(if value.is_static    { 0x0008 } else { 0 }) |
		(if value.is_final     { 0x0010 } else { 0 }) |
		(if value.is_volatile  { 0x0040 } else { 0 }) |
		(if value.is_transient { 0x0080 } else { 0 }) |
		(if value.is_synthetic { 0x1000 } else { 0 }) |
		(if value.is_enum      { 0x4000 } else { 0 })
	}
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldRef {
	pub class: ClassName,
	pub name: FieldName,
	pub desc: FieldDescriptor,
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldName(String);

from_impl_for_string_and_str!(FieldName);
partial_eq_impl_for_str!(FieldName);
display_impl_for_name!(FieldName);

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldDescriptor(String);

from_impl_for_string_and_str!(FieldDescriptor);
partial_eq_impl_for_str!(FieldDescriptor);
display_impl_for_name!(FieldDescriptor);

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldSignature(String);

from_impl_for_string_and_str!(FieldSignature);

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
	/// Also represents the value for a field of type `byte`, `char`, `short`, `boolean`.
	Integer(i32),
	Float(f32),
	Long(i64),
	Double(f64),
	String(String),
}
