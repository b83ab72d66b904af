//! Parsing of field and method descriptors into typed values.

use anyhow::{anyhow, bail, Context, Result};
use crate::tree::class::ClassName;
use crate::tree::field::FieldDescriptor;
use crate::tree::method::MethodDescriptor;

/// One of the eight primitive types of the JVM.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BaseType {
	B, C, D, F, I, J, S, Z,
}

impl BaseType {
	pub fn from_char(ch: char) -> Option<BaseType> {
		match ch {
			'B' => Some(BaseType::B),
			'C' => Some(BaseType::C),
			'D' => Some(BaseType::D),
			'F' => Some(BaseType::F),
			'I' => Some(BaseType::I),
			'J' => Some(BaseType::J),
			'S' => Some(BaseType::S),
			'Z' => Some(BaseType::Z),
			_ => None,
		}
	}

	pub fn as_char(self) -> char {
		match self {
			BaseType::B => 'B',
			BaseType::C => 'C',
			BaseType::D => 'D',
			BaseType::F => 'F',
			BaseType::I => 'I',
			BaseType::J => 'J',
			BaseType::S => 'S',
			BaseType::Z => 'Z',
		}
	}

	/// `true` for `long` and `double`, which take two local variable slots
	/// and two operand stack entries.
	pub fn is_category_2(self) -> bool {
		matches!(self, BaseType::D | BaseType::J)
	}
}

/// A parsed field descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
	Base(BaseType),
	Object(ClassName),
	/// Dimension count and the innermost element type.
	Array(u8, Box<Type>),
}

impl Type {
	pub fn is_category_2(&self) -> bool {
		matches!(self, Type::Base(base) if base.is_category_2())
	}

	pub fn is_reference(&self) -> bool {
		matches!(self, Type::Object(_) | Type::Array(..))
	}

	/// The [`ClassName`] a value of this type has in a stack map frame.
	/// Array types use their descriptor form.
	pub fn as_frame_class_name(&self) -> Option<ClassName> {
		match self {
			Type::Base(_) => None,
			Type::Object(name) => Some(name.clone()),
			Type::Array(..) => Some(ClassName::from(self.to_descriptor_string())),
		}
	}

	pub fn to_descriptor_string(&self) -> String {
		match self {
			Type::Base(base) => base.as_char().to_string(),
			Type::Object(name) => format!("L{};", name.as_str()),
			Type::Array(dimensions, inner) => {
				let mut s = String::new();
				for _ in 0..*dimensions {
					s.push('[');
				}
				s.push_str(&inner.to_descriptor_string());
				s
			},
		}
	}

	fn read(chars: &mut std::str::Chars<'_>) -> Result<Type> {
		let ch = chars.next().context("unexpected end of descriptor")?;
		if let Some(base) = BaseType::from_char(ch) {
			return Ok(Type::Base(base));
		}
		match ch {
			'L' => {
				let mut name = String::new();
				loop {
					match chars.next() {
						Some(';') => break,
						Some(ch) => name.push(ch),
						None => bail!("unterminated object descriptor"),
					}
				}
				Ok(Type::Object(ClassName::from(name)))
			},
			'[' => {
				let mut dimensions = 1u8;
				let inner = loop {
					match Type::read(chars)? {
						Type::Array(more, inner) => {
							dimensions = dimensions.checked_add(more)
								.context("too many array dimensions")?;
							break inner;
						},
						other => break Box::new(other),
					}
				};
				Ok(Type::Array(dimensions, inner))
			},
			ch => bail!("unexpected character {ch:?} in descriptor"),
		}
	}
}

/// A parsed method return descriptor; `None` is `void`.
pub type ReturnType = Option<Type>;

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMethodDescriptor {
	pub parameters: Vec<Type>,
	pub return_type: ReturnType,
}

pub fn parse_field_descriptor(descriptor: &FieldDescriptor) -> Result<Type> {
	let mut chars = descriptor.as_str().chars();
	let parsed = Type::read(&mut chars)
		.with_context(|| anyhow!("invalid field descriptor {descriptor:?}"))?;
	if chars.next().is_some() {
		bail!("trailing characters in field descriptor {descriptor:?}");
	}
	Ok(parsed)
}

pub fn parse_method_descriptor(descriptor: &MethodDescriptor) -> Result<ParsedMethodDescriptor> {
	let s = descriptor.as_str();
	let mut chars = s.chars();
	if chars.next() != Some('(') {
		bail!("method descriptor {descriptor:?} doesn't start with `(`");
	}

	let mut parameters = Vec::new();
	loop {
		// peek for the closing paren
		let rest = chars.as_str();
		if let Some(stripped) = rest.strip_prefix(')') {
			chars = stripped.chars();
			break;
		}
		parameters.push(Type::read(&mut chars)
			.with_context(|| anyhow!("invalid parameter in method descriptor {descriptor:?}"))?);
	}

	let return_type = if chars.as_str() == "V" {
		None
	} else {
		let parsed = Type::read(&mut chars)
			.with_context(|| anyhow!("invalid return type in method descriptor {descriptor:?}"))?;
		if chars.next().is_some() {
			bail!("trailing characters in method descriptor {descriptor:?}");
		}
		Some(parsed)
	};

	Ok(ParsedMethodDescriptor { parameters, return_type })
}

#[cfg(test)]
mod testing {
	use anyhow::Result;
	use pretty_assertions::assert_eq;
	use crate::tree::class::ClassName;
	use crate::tree::field::FieldDescriptor;
	use crate::tree::method::MethodDescriptor;
	use super::{parse_field_descriptor, parse_method_descriptor, BaseType, Type};

	#[test]
	fn field_descriptors() -> Result<()> {
		assert_eq!(parse_field_descriptor(&"I".into())?, Type::Base(BaseType::I));
		assert_eq!(
			parse_field_descriptor(&"Ljava/lang/String;".into())?,
			Type::Object(ClassName::from("java/lang/String"))
		);
		assert_eq!(
			parse_field_descriptor(&"[[D".into())?,
			Type::Array(2, Box::new(Type::Base(BaseType::D)))
		);
		assert_eq!(
			parse_field_descriptor(&"[Ljava/lang/Object;".into())?,
			Type::Array(1, Box::new(Type::Object(ClassName::from("java/lang/Object"))))
		);

		assert!(parse_field_descriptor(&FieldDescriptor::from("II")).is_err());
		assert!(parse_field_descriptor(&FieldDescriptor::from("Ljava/lang/String")).is_err());
		assert!(parse_field_descriptor(&FieldDescriptor::from("X")).is_err());
		Ok(())
	}

	#[test]
	fn method_descriptors() -> Result<()> {
		let parsed = parse_method_descriptor(&"(IJLjava/lang/String;)V".into())?;
		assert_eq!(parsed.parameters, vec![
			Type::Base(BaseType::I),
			Type::Base(BaseType::J),
			Type::Object(ClassName::from("java/lang/String")),
		]);
		assert_eq!(parsed.return_type, None);

		let parsed = parse_method_descriptor(&"()Ljava/lang/Object;".into())?;
		assert!(parsed.parameters.is_empty());
		assert_eq!(parsed.return_type, Some(Type::Object(ClassName::from("java/lang/Object"))));

		assert!(parse_method_descriptor(&MethodDescriptor::from("()")).is_err());
		assert!(parse_method_descriptor(&MethodDescriptor::from("I")).is_err());
		Ok(())
	}

	#[test]
	fn round_trip() -> Result<()> {
		for descriptor in ["I", "[[J", "Ljava/lang/String;", "[Lfoo/Bar;"] {
			let parsed = parse_field_descriptor(&descriptor.into())?;
			assert_eq!(parsed.to_descriptor_string(), descriptor);
		}
		Ok(())
	}
}
