use anyhow::Result;
use pretty_assertions::assert_eq;
use mocha::supers::JdkSuperClassProvider;
use mocha::tree::class::{ClassAccess, ClassFile, ClassName};
use mocha::tree::field::{Field, FieldAccess, FieldRef};
use mocha::tree::method::code::{Code, Exception, Instruction, LvIndex};
use mocha::tree::method::{Method, MethodAccess, MethodRef};
use mocha::tree::version::Version;

fn class_access() -> ClassAccess {
	ClassAccess { is_public: true, is_super: true, ..ClassAccess::default() }
}

fn object_init() -> MethodRef {
	MethodRef {
		class: ClassName::from("java/lang/Object"),
		name: "<init>".into(),
		desc: "()V".into(),
	}
}

/// A small class with a constructor, a branchy method and a try/catch, enough
/// to exercise label resolution, frame computation and the constant pool.
fn build_example() -> ClassFile {
	let mut class = ClassFile::new(
		Version::V17,
		class_access(),
		ClassName::from("example/Example"),
		Some(ClassName::from("java/lang/Object")),
		vec![],
	);

	class.fields.push(Field::new(
		FieldAccess { is_private: true, ..FieldAccess::default() },
		"count".into(),
		"I".into(),
	));

	{
		let mut code = Code::new();
		code.push(Instruction::ALoad(LvIndex { index: 0 }));
		code.push(Instruction::InvokeSpecial(object_init(), false));
		code.push(Instruction::ALoad(LvIndex { index: 0 }));
		code.push(Instruction::IConst0);
		code.push(Instruction::PutField(FieldRef {
			class: ClassName::from("example/Example"),
			name: "count".into(),
			desc: "I".into(),
		}));
		code.push(Instruction::Return);

		let mut init = Method::new(
			MethodAccess { is_public: true, ..MethodAccess::default() },
			"<init>".into(),
			"()V".into(),
		);
		init.code = Some(code);
		class.methods.push(init);
	}

	{
		// static int clamp(int x) { try { return x < 0 ? 0 : x; } catch (Throwable t) { return -1; } }
		let mut code = Code::new();
		let start = code.fresh_label();
		let end = code.fresh_label();
		let handler = code.fresh_label();
		let non_negative = code.fresh_label();

		code.push_labeled(start, Instruction::ILoad(LvIndex { index: 0 }));
		code.push(Instruction::IfGe(non_negative));
		code.push(Instruction::IConst0);
		code.push(Instruction::IReturn);
		code.push_labeled(non_negative, Instruction::ILoad(LvIndex { index: 0 }));
		code.push_labeled(end, Instruction::IReturn);
		code.push_labeled(handler, Instruction::AStore(LvIndex { index: 1 }));
		code.push(Instruction::IConstM1);
		code.push(Instruction::IReturn);
		code.exception_table.push(Exception {
			start, end, handler,
			catch: Some(ClassName::from("java/lang/Throwable")),
		});

		let mut clamp = Method::new(
			MethodAccess { is_static: true, ..MethodAccess::default() },
			"clamp".into(),
			"(I)I".into(),
		);
		clamp.code = Some(code);
		class.methods.push(clamp);
	}

	class
}

#[test]
fn write_then_read_preserves_structure() -> Result<()> {
	let class = build_example();
	let bytes = mocha::write(&class, &JdkSuperClassProvider)?;

	let reread = mocha::read(&bytes)?;
	assert_eq!(reread.name, class.name);
	assert_eq!(reread.super_class, class.super_class);
	assert_eq!(reread.fields.len(), 1);
	assert_eq!(reread.fields[0].name, "count");
	assert_eq!(reread.methods.len(), 2);

	let clamp = reread.method("clamp").ok_or_else(|| anyhow::anyhow!("clamp method lost"))?;
	let code = clamp.code.as_ref().ok_or_else(|| anyhow::anyhow!("clamp code lost"))?;
	assert_eq!(code.exception_table.len(), 1);
	assert_eq!(code.instructions.len(), 9);

	// max values come from the frame computation
	assert_eq!(code.max_stack, Some(1));
	assert_eq!(code.max_locals, Some(2));

	Ok(())
}

#[test]
fn writing_is_deterministic() -> Result<()> {
	let class = build_example();
	let bytes = mocha::write(&class, &JdkSuperClassProvider)?;

	let reread = mocha::read(&bytes)?;
	let rewritten = mocha::write(&reread, &JdkSuperClassProvider)?;
	let reread_again = mocha::read(&rewritten)?;
	let rewritten_again = mocha::write(&reread_again, &JdkSuperClassProvider)?;

	assert_eq!(rewritten, rewritten_again);
	Ok(())
}

#[test]
fn malformed_bytes_are_rejected() {
	assert!(mocha::read(&[]).is_err());
	assert!(mocha::read(&[0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 52]).is_err());

	// truncated in the middle of the constant pool
	let truncated = [0xca, 0xfe, 0xba, 0xbe, 0x00, 0x00, 0x00, 0x34, 0x00, 0x05, 0x01];
	assert!(mocha::read(&truncated).is_err());
}
