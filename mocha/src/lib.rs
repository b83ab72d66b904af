//! A reader and writer for Java class files, operating on a mutable tree
//! ([`tree::class::ClassFile`]).
//!
//! Reading goes through [`read`], writing through [`write`]. The writer
//! rebuilds the constant pool and recomputes the `StackMapTable` of every
//! method it serializes, so the tree can be freely edited in between without
//! keeping frames consistent by hand. Computing frames at branch joins needs
//! to know the superclass of arbitrary classes; the caller supplies that
//! knowledge via [`supers::SuperClassProvider`].

use std::io::{Cursor, Seek, SeekFrom};
use anyhow::{anyhow, bail, Context, Result};
use crate::supers::SuperClassProvider;
use crate::tree::class::ClassFile;

pub mod tree;
pub mod supers;
pub mod disasm;

mod macros;
mod jstring;
mod class_constants;
mod class_reader;
mod class_writer;
mod frames;

/// Reads a class file into a [`ClassFile`] tree.
///
/// Any `StackMapTable` (or pre-Java-6 `StackMap`) attribute is dropped here;
/// [`write`] recomputes frames from scratch.
pub fn read(bytes: &[u8]) -> Result<ClassFile> {
	let mut cursor = Cursor::new(bytes);
	class_reader::read(&mut cursor)
		.context("failed to read class file")
}

/// The part of a class file before the fields: enough for supertype walks,
/// without touching method bodies or attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassHeader {
	pub version: tree::version::Version,
	pub access: tree::class::ClassAccess,
	pub name: tree::class::ClassName,
	pub super_class: Option<tree::class::ClassName>,
	pub interfaces: Vec<tree::class::ClassName>,
}

/// Reads only the [`ClassHeader`] of a class file. This still parses the
/// constant pool (names live there), but stops before the fields.
pub fn read_header(bytes: &[u8]) -> Result<ClassHeader> {
	let mut cursor = Cursor::new(bytes);
	class_reader::read_header(&mut cursor)
		.context("failed to read class file header")
}

/// Writes a [`ClassFile`] tree back out to bytes.
///
/// For class file version 51 and above, every method body gets a freshly
/// computed `StackMapTable`, `max_stack` and `max_locals`; reference merges
/// at branch joins are resolved through the given [`SuperClassProvider`].
pub fn write(class: &ClassFile, provider: &dyn SuperClassProvider) -> Result<Vec<u8>> {
	let mut bytes = Vec::new();
	class_writer::write(&mut bytes, class, provider)
		.with_context(|| anyhow!("failed to write class file for {:?}", class.name))?;
	Ok(bytes)
}

/// Big-endian primitive reads on a byte source, plus position bookkeeping for
/// the skip-ahead the reader does to get at the `BootstrapMethods` attribute
/// before parsing fields and methods.
pub(crate) trait ClassRead {
	fn read_u8(&mut self) -> Result<u8>;
	fn read_u8_vec(&mut self, length: usize) -> Result<Vec<u8>>;
	fn skip(&mut self, n: i64) -> Result<()>;
	fn marker(&mut self) -> Result<u64>;
	fn goto(&mut self, marker: u64) -> Result<()>;

	fn read_u16(&mut self) -> Result<u16> {
		let buf = self.read_u8_vec(2)?;
		Ok(u16::from_be_bytes([buf[0], buf[1]]))
	}
	fn read_u32(&mut self) -> Result<u32> {
		let buf = self.read_u8_vec(4)?;
		Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
	}
	fn read_i8(&mut self) -> Result<i8> {
		Ok(self.read_u8()? as i8)
	}
	fn read_i16(&mut self) -> Result<i16> {
		Ok(self.read_u16()? as i16)
	}
	fn read_i32(&mut self) -> Result<i32> {
		Ok(self.read_u32()? as i32)
	}
	fn read_u16_as_usize(&mut self) -> Result<usize> {
		Ok(self.read_u16()? as usize)
	}

	fn read_vec<T, S, E>(&mut self, size: S, mut element: E) -> Result<Vec<T>>
	where
		S: FnOnce(&mut Self) -> Result<usize>,
		E: FnMut(&mut Self) -> Result<T>,
	{
		let size = size(self)?;
		let mut vec = Vec::with_capacity(size);
		for _ in 0..size {
			vec.push(element(self)?);
		}
		Ok(vec)
	}
}

impl<T: AsRef<[u8]>> ClassRead for Cursor<T> {
	fn read_u8(&mut self) -> Result<u8> {
		let pos = self.position() as usize;
		let slice = self.get_ref().as_ref();
		let byte = *slice.get(pos)
			.with_context(|| anyhow!("unexpected end of class file at offset {pos}"))?;
		self.set_position(pos as u64 + 1);
		Ok(byte)
	}

	fn read_u8_vec(&mut self, length: usize) -> Result<Vec<u8>> {
		let pos = self.position() as usize;
		let slice = self.get_ref().as_ref();
		let end = pos.checked_add(length)
			.with_context(|| anyhow!("length overflow at offset {pos}"))?;
		let vec = slice.get(pos..end)
			.with_context(|| anyhow!("unexpected end of class file at offset {pos}, wanted {length} more bytes"))?
			.to_vec();
		self.set_position(end as u64);
		Ok(vec)
	}

	fn skip(&mut self, n: i64) -> Result<()> {
		self.seek(SeekFrom::Current(n))?;
		if self.position() > self.get_ref().as_ref().len() as u64 {
			bail!("skipped past the end of the class file");
		}
		Ok(())
	}

	fn marker(&mut self) -> Result<u64> {
		Ok(self.position())
	}

	fn goto(&mut self, marker: u64) -> Result<()> {
		self.set_position(marker);
		Ok(())
	}
}

/// Big-endian primitive writes on a byte sink.
pub(crate) trait ClassWrite {
	fn write_u8(&mut self, value: u8) -> Result<()>;
	fn write_u8_slice(&mut self, slice: &[u8]) -> Result<()>;

	fn write_u16(&mut self, value: u16) -> Result<()> {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_u32(&mut self, value: u32) -> Result<()> {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_i8(&mut self, value: i8) -> Result<()> {
		self.write_u8(value as u8)
	}
	fn write_i16(&mut self, value: i16) -> Result<()> {
		self.write_u16(value as u16)
	}
	fn write_i32(&mut self, value: i32) -> Result<()> {
		self.write_u32(value as u32)
	}
	fn write_usize_as_u16(&mut self, value: usize) -> Result<()> {
		let value = u16::try_from(value)
			.with_context(|| anyhow!("value {value} doesn't fit into an u16"))?;
		self.write_u16(value)
	}
	fn write_usize_as_u32(&mut self, value: usize) -> Result<()> {
		let value = u32::try_from(value)
			.with_context(|| anyhow!("value {value} doesn't fit into an u32"))?;
		self.write_u32(value)
	}

	fn write_slice<T, S, E>(&mut self, slice: &[T], size: S, mut element: E) -> Result<()>
	where
		S: FnOnce(&mut Self, usize) -> Result<()>,
		E: FnMut(&mut Self, &T) -> Result<()>,
	{
		size(self, slice.len())?;
		for item in slice {
			element(self, item)?;
		}
		Ok(())
	}
}

impl ClassWrite for Vec<u8> {
	fn write_u8(&mut self, value: u8) -> Result<()> {
		self.push(value);
		Ok(())
	}

	fn write_u8_slice(&mut self, slice: &[u8]) -> Result<()> {
		self.extend_from_slice(slice);
		Ok(())
	}
}
