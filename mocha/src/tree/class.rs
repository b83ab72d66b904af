use std::fmt::{Debug, Display, Formatter};
use crate::macros::{display_impl_for_name, from_impl_for_string_and_str, partial_eq_impl_for_str};
use crate::tree::annotation::Annotation;
use crate::tree::attribute::Attribute;
use crate::tree::field::Field;
use crate::tree::method::{Method, MethodNameAndDesc};
use crate::tree::version::Version;

/// A mutable representation of one class file.
///
/// Attributes this crate doesn't model structurally are kept in `attributes`
/// as raw payloads; see [`Attribute`] for what may and may not go in there.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
	pub version: Version,
	pub access: ClassAccess,
	pub name: ClassName,
	pub super_class: Option<ClassName>,
	pub interfaces: Vec<ClassName>,

	pub fields: Vec<Field>,
	pub methods: Vec<Method>,

	pub has_deprecated_attribute: bool,
	pub has_synthetic_attribute: bool,

	pub inner_classes: Option<Vec<InnerClass>>,
	pub enclosing_method: Option<EnclosingMethod>,
	pub signature: Option<ClassSignature>,
	pub source_file: Option<String>,

	pub runtime_visible_annotations: Vec<Annotation>,
	pub runtime_invisible_annotations: Vec<Annotation>,

	pub nest_host_class: Option<ClassName>,
	pub nest_members: Option<Vec<ClassName>>,
	pub permitted_subclasses: Option<Vec<ClassName>>,

	pub attributes: Vec<Attribute>,
}

impl ClassFile {
	pub fn new(version: Version, access: ClassAccess, name: ClassName, super_class: Option<ClassName>, interfaces: Vec<ClassName>) -> ClassFile {
		ClassFile {
			version,
			access,
			name,
			super_class,
			interfaces,

			fields: Vec::new(),
			methods: Vec::new(),

			has_deprecated_attribute: false,
			has_synthetic_attribute: false,

			inner_classes: None,
			enclosing_method: None,
			signature: None,
			source_file: None,

			runtime_visible_annotations: Vec::new(),
			runtime_invisible_annotations: Vec::new(),

			nest_host_class: None,
			nest_members: None,
			permitted_subclasses: None,

			attributes: Vec::new(),
		}
	}

	pub fn field(&self, name: &str) -> Option<&Field> {
		self.fields.iter().find(|field| field.name == *name)
	}

	pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
		self.fields.iter_mut().find(|field| field.name == *name)
	}

	/// Finds a method by name alone. Compiler-generated members this crate's
	/// users deal with are never overloaded.
	pub fn method(&self, name: &str) -> Option<&Method> {
		self.methods.iter().find(|method| method.name == *name)
	}

	pub fn method_mut(&mut self, name: &str) -> Option<&mut Method> {
		self.methods.iter_mut().find(|method| method.name == *name)
	}

	pub fn remove_field(&mut self, name: &str) -> Option<Field> {
		let index = self.fields.iter().position(|field| field.name == *name)?;
		Some(self.fields.remove(index))
	}

	pub fn remove_method(&mut self, name: &str) -> Option<Method> {
		let index = self.methods.iter().position(|method| method.name == *name)?;
		Some(self.methods.remove(index))
	}
}

/// Represents the access flags a class can have.
///
/// Take a look at the [Java Virtual Machine Specification](https://docs.oracle.com/javase/specs/jvms/se22/html/jvms-4.html#jvms-4.1-200-E.1), for
/// the meanings of these fields, and what combinations are legal and which not.
#[derive(Copy, Clone, Default, PartialEq)]
pub struct ClassAccess {
	pub is_public: bool,
	pub is_final: bool,
	pub is_super: bool,
	pub is_interface: bool,
	pub is_abstract: bool,
	pub is_synthetic: bool,
	pub is_annotation: bool,
	pub is_enum: bool,
	pub is_module: bool,
}

impl Debug for ClassAccess {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str("ClassAccess { ")?;
		if self.is_public     { f.write_str("public ")?; }
		if self.is_final      { f.write_str("final ")?; }
		if self.is_super      { f.write_str("super ")?; }
		if self.is_interface  { f.write_str("interface ")?; }
		if self.is_abstract   { f.write_str("abstract ")?; }
		if self.is_synthetic  { f.write_str("synthetic ")?; }
		if self.is_annotation { f.write_str("annotation ")?; }
		if self.is_enum       { f.write_str("enum ")?; }
		if self.is_module     { f.write_str("module ")?; }
		f.write_str("}")
	}
}

/// Interprets an `u16` as the `access_flags` item of the `ClassFile` structure of the Java Virtual Machine Specification.
impl From<u16> for ClassAccess {
	fn from(value: u16) -> Self {
		ClassAccess {
			is_public:     value & 0x0001 != 0,
			is_final:      value & 0x0010 != 0,
			is_super:      value & 0x0020 != 0,
			is_interface:  value & 0x0200 != 0,
			is_abstract:   value & 0x0400 != 0,
			is_synthetic:  value & 0x1000 != 0,
			is_annotation: value & 0x2000 != 0,
			is_enum:       value & 0x4000 != 0,
			is_module:     value & 0x8000 != 0,
		}
	}
}

/// Creates an `u16` according to the `access_flags` item of the `ClassFile` structure of the Java Virtual Machine Specification.
impl From<ClassAccess> for u16 {
	fn from(value: ClassAccess) -> Self {
		(if value.is_public     { 0x0001 } else { 0 }) |
		(if value.is_final      { 0x0010 } else { 0 }) |
		(if value.is_super      { 0x0020 } else { 0 }) |
		(if value.is_interface  { 0x0200 } else { 0 }) |
		(if value.is_abstract   { 0x0400 } else { 0 }) |
		(if value.is_synthetic  { 0x1000 } else { 0 }) |
		(if value.is_annotation { 0x2000 } else { 0 }) |
		(if value.is_enum       { 0x4000 } else { 0 }) |
		(if value.is_module     { 0x8000 } else { 0 })
	}
}

/// Represents a class name. The class name uses [internal binary names](https://docs.oracle.com/javase/specs/jvms/se22/html/jvms-4.html#jvms-4.2.1),
/// i.e. with complete path written out and using slashes. Array classes use
/// their field descriptor form (`[Ljava/lang/String;`).
///
/// # Examples
/// The java class `java.lang.Thread` would get:
/// ```
/// use mocha::tree::class::ClassName;
/// let java_lang_thread = ClassName::from("java/lang/Thread");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClassName(String);

from_impl_for_string_and_str!(ClassName);
partial_eq_impl_for_str!(ClassName);
display_impl_for_name!(ClassName);

impl ClassName {
	pub const JAVA_LANG_OBJECT: &'static str = "java/lang/Object";

	pub fn is_array(&self) -> bool {
		self.0.starts_with('[')
	}

	pub fn get_simple_name(&self) -> &str {
		let s = self.as_str();
		s.rsplit_once('/')
			.map_or(s, |(_, simple)| simple)
	}

	/// The dotted form, as `Class.getName` would print it.
	pub fn to_dotted(&self) -> String {
		self.0.replace('/', ".")
	}

	/// Parses a dotted name back into the internal form.
	pub fn from_dotted(dotted: &str) -> ClassName {
		ClassName(dotted.replace('.', "/"))
	}

	/// The field descriptor of a value of this class, e.g. `Ljava/lang/String;`.
	/// Array class names already are descriptors.
	pub fn to_descriptor(&self) -> String {
		if self.is_array() {
			self.0.clone()
		} else {
			format!("L{};", self.0)
		}
	}
}

/// Represents a class signature, from a generic such as `Foo<T extends Bar>`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ClassSignature(String);

from_impl_for_string_and_str!(ClassSignature);

#[derive(Debug, Clone, PartialEq)]
pub struct InnerClass {
	pub inner_class: ClassName,
	pub outer_class: Option<ClassName>,
	pub inner_name: Option<String>,
	pub flags: InnerClassFlags,
}

#[derive(Copy, Clone, PartialEq)]
pub struct InnerClassFlags {
	pub is_public: bool,
	pub is_private: bool,
	pub is_protected: bool,
	pub is_static: bool,
	pub is_final: bool,
	pub is_interface: bool,
	pub is_abstract: bool,
	pub is_synthetic: bool,
	pub is_annotation: bool,
	pub is_enum: bool,
}

impl Debug for InnerClassFlags {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str("InnerClassFlags { ")?;
		if self.is_public     { f.write_str("public ")?; }
		if self.is_private    { f.write_str("private ")?; }
		if self.is_protected  { f.write_str("protected ")?; }
		if self.is_static     { f.write_str("static ")?; }
		if self.is_final      { f.write_str("final ")?; }
		if self.is_interface  { f.write_str("interface ")?; }
		if self.is_abstract   { f.write_str("abstract ")?; }
		if self.is_synthetic  { f.write_str("synthetic ")?; }
		if self.is_annotation { f.write_str("annotation ")?; }
		if self.is_enum       { f.write_str("enum ")?; }
		f.write_str("}")
	}
}

impl From<u16> for InnerClassFlags {
	fn from(value: u16) -> Self {
		InnerClassFlags {
			is_public:     value & 0x0001 != 0,
			is_private:    value & 0x0002 != 0,
			is_protected:  value & 0x0004 != 0,
			is_static:     value & 0x0008 != 0,
			is_final:      value & 0x0010 != 0,
			is_interface:  value & 0x0200 != 0,
			is_abstract:   value & 0x0400 != 0,
			is_synthetic:  value & 0x1000 != 0,
			is_annotation: value & 0x2000 != 0,
			is_enum:       value & 0x4000 != 0,
		}
	}
}

impl From<InnerClassFlags> for u16 {
	fn from(value: InnerClassFlags) -> Self {
		(if value.is_public     { 0x0001 } else { 0 }) |
		(if value.is_private    { 0x0002 } else { 0 }) |
		(if value.is_protected  { 0x0004 } else { 0 }) |
		(if value.is_static     { 0x0008 } else { 0 }) |
		(if value.is_final      { 0x0010 } else { 0 }) |
		(if value.is_interface  { 0x0200 } else { 0 }) |
		(if value.is_abstract   { 0x0400 } else { 0 }) |
		(if value.is_synthetic  { 0x1000 } else { 0 }) |
		(if value.is_annotation { 0x2000 } else { 0 }) |
		(if value.is_enum       { 0x4000 } else { 0 })
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnclosingMethod {
	pub class: ClassName,
	pub method: Option<MethodNameAndDesc>,
}
