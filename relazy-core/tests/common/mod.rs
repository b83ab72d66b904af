//! Builders for class files shaped like the old compilers' lazy val output.
//!
//! The trees built here follow the 3.0–3.2 ("bitmap") and 3.3–3.7
//! ("object-unsafe") schemes closely enough for detection, extraction and
//! rewriting to see exactly what they'd see on real compiler output, and they
//! are valid bytecode in their own right — everything round-trips through the
//! class writer, frames included.

use anyhow::Result;
use mocha::tree::class::{ClassAccess, ClassFile, ClassName};
use mocha::tree::field::{Field, FieldAccess, FieldName, FieldRef};
use mocha::tree::method::code::{Code, Exception, Instruction, Loadable, LvIndex};
use mocha::tree::method::{Method, MethodAccess, MethodName, MethodRef};
use mocha::tree::version::Version;
use relazy_core::supertypes::{GroupSuperClassProvider, NoResources};

pub const LAZY_VALS: &str = "scala/runtime/LazyVals$";
pub const LAZY_VALS_DESC: &str = "Lscala/runtime/LazyVals$;";
pub const EVALUATING: &str = "scala/runtime/LazyVals$Evaluating$";
pub const BOXES: &str = "scala/runtime/BoxesRunTime";

/// What a fixture lazy val computes.
#[derive(Debug, Clone, Copy)]
pub enum Value {
	Int(i8),
	Str(&'static str),
	/// `throw new RuntimeException("oops")`
	Throwing,
}

impl Value {
	fn descriptor(self) -> &'static str {
		match self {
			Value::Int(_) | Value::Throwing => "I",
			Value::Str(_) => "Ljava/lang/String;",
		}
	}

	fn wrapper(self) -> &'static str {
		match self {
			Value::Int(_) | Value::Throwing => "java/lang/Integer",
			Value::Str(_) => "java/lang/String",
		}
	}
}

/// One lazy val of a fixture class: storage field `<base>$lzy<n>`, offset
/// field `OFFSET$_m_<k>`.
#[derive(Debug, Clone, Copy)]
pub struct UnsafeLazyVal {
	pub base: &'static str,
	pub n: u32,
	pub k: u32,
	pub value: Value,
}

impl UnsafeLazyVal {
	pub fn storage_name(&self) -> String {
		format!("{}$lzy{}", self.base, self.n)
	}

	pub fn offset_name(&self) -> String {
		format!("OFFSET$_m_{}", self.k)
	}

	fn init_name(&self) -> String {
		format!("{}$lzyINIT{}", self.base, self.n)
	}
}

pub fn write_class(class: &ClassFile) -> Result<Vec<u8>> {
	let provider = GroupSuperClassProvider::new(&[class], &NoResources);
	mocha::write(class, &provider)
}

pub fn parse(bytes: &[u8]) -> ClassFile {
	mocha::read(bytes).expect("patched or fixture bytes must parse")
}

fn public_class(name: &str) -> ClassFile {
	ClassFile::new(
		Version::V17,
		ClassAccess { is_public: true, is_super: true, is_final: true, ..ClassAccess::default() },
		ClassName::from(name),
		Some(ClassName::from("java/lang/Object")),
		vec![],
	)
}

fn field_ref(class: &str, name: &str, desc: &str) -> FieldRef {
	FieldRef { class: ClassName::from(class), name: name.into(), desc: desc.into() }
}

fn virtual_call(class: &str, name: &str, desc: &str) -> Instruction {
	Instruction::InvokeVirtual(MethodRef {
		class: ClassName::from(class),
		name: name.into(),
		desc: desc.into(),
	})
}

fn static_call(class: &str, name: &str, desc: &str) -> Instruction {
	Instruction::InvokeStatic(MethodRef {
		class: ClassName::from(class),
		name: name.into(),
		desc: desc.into(),
	}, false)
}

fn lazy_vals_module() -> Instruction {
	Instruction::GetStatic(field_ref(LAZY_VALS, "MODULE$", LAZY_VALS_DESC))
}

fn evaluating_module() -> Instruction {
	Instruction::GetStatic(field_ref(EVALUATING, "MODULE$", &format!("L{EVALUATING};")))
}

pub fn default_constructor(owner: &str) -> Method {
	let mut code = Code::new();
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::InvokeSpecial(MethodRef {
		class: ClassName::from("java/lang/Object"),
		name: "<init>".into(),
		desc: "()V".into(),
	}, false));
	code.push(Instruction::Return);

	let mut init = Method::new(
		MethodAccess { is_private: owner.ends_with('$'), is_public: !owner.ends_with('$'), ..MethodAccess::default() },
		MethodName::from(MethodName::INIT),
		"()V".into(),
	);
	init.code = Some(code);
	init
}

/// The `<clinit>` population of one `OFFSET$*` field, as the 3.3 line emits
/// it: `OFFSET$_m_<k> = LazyVals$.MODULE$.getOffsetStatic(classOf[O].getDeclaredField("<storage>"))`.
pub fn offset_install(storage_owner: &str, offset_owner: &str, storage_name: &str, offset_name: &str) -> Vec<Instruction> {
	vec![
		lazy_vals_module(),
		Instruction::Ldc(Loadable::Class(ClassName::from(storage_owner))),
		Instruction::Ldc(Loadable::String(storage_name.to_owned())),
		virtual_call("java/lang/Class", "getDeclaredField", "(Ljava/lang/String;)Ljava/lang/reflect/Field;"),
		virtual_call(LAZY_VALS, "getOffsetStatic", "(Ljava/lang/reflect/Field;)J"),
		Instruction::PutStatic(field_ref(offset_owner, offset_name, "J")),
	]
}

fn clinit_from(instructions: Vec<Instruction>) -> Method {
	let mut code = Code::new();
	for instruction in instructions {
		code.push(instruction);
	}
	code.push(Instruction::Return);

	let mut clinit = Method::new(
		MethodAccess { is_static: true, ..MethodAccess::default() },
		MethodName::from(MethodName::CLINIT),
		"()V".into(),
	);
	clinit.code = Some(code);
	clinit
}

/// The 3.3-line accessor: fast instanceof check on the storage, slow path
/// through the `$lzyINIT` method.
fn unsafe_accessor(owner: &str, lazy_val: &UnsafeLazyVal) -> Method {
	let mut code = Code::new();
	let slow = code.fresh_label();

	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetField(field_ref(owner, &lazy_val.storage_name(), "Ljava/lang/Object;")));
	code.push(Instruction::AStore(LvIndex { index: 1 }));
	code.push(Instruction::ALoad(LvIndex { index: 1 }));
	code.push(Instruction::InstanceOf(ClassName::from(lazy_val.value.wrapper())));
	code.push(Instruction::IfEq(slow));
	code.push(Instruction::ALoad(LvIndex { index: 1 }));
	match lazy_val.value {
		Value::Int(_) | Value::Throwing => {
			code.push(static_call(BOXES, "unboxToInt", "(Ljava/lang/Object;)I"));
			code.push(Instruction::IReturn);
		},
		Value::Str(_) => {
			code.push(Instruction::CheckCast(ClassName::from("java/lang/String")));
			code.push(Instruction::AReturn);
		},
	}
	code.push_labeled(slow, Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::InvokeSpecial(MethodRef {
		class: ClassName::from(owner),
		name: lazy_val.init_name().into(),
		desc: format!("(){}", lazy_val.value.descriptor()).into(),
	}, false));
	match lazy_val.value {
		Value::Int(_) | Value::Throwing => code.push(Instruction::IReturn),
		Value::Str(_) => code.push(Instruction::AReturn),
	}

	let mut accessor = Method::new(
		MethodAccess { is_public: true, ..MethodAccess::default() },
		lazy_val.base.into(),
		format!("(){}", lazy_val.value.descriptor()).into(),
	);
	accessor.code = Some(code);
	accessor
}

/// The 3.3-line `$lzyINIT` method: claim via `objCAS(this, OFFSET, null,
/// Evaluating)`, compute into slot 5, publish via a second `objCAS`, with a
/// catch-all restoring the empty state.
fn unsafe_init_method(owner: &str, offset_owner: &str, lazy_val: &UnsafeLazyVal) -> Method {
	const OBJ_CAS_DESC: &str = "(Ljava/lang/Object;JLjava/lang/Object;Ljava/lang/Object;)Z";
	let storage = field_ref(owner, &lazy_val.storage_name(), "Ljava/lang/Object;");
	let offset = field_ref(offset_owner, &lazy_val.offset_name(), "J");

	let mut code = Code::new();
	let loop_label = code.fresh_label();
	let state = code.fresh_label();
	let try_start = code.fresh_label();
	let catch = code.fresh_label();

	code.push_labeled(loop_label, Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetField(storage.clone()));
	code.push(Instruction::AStore(LvIndex { index: 1 }));
	code.push(Instruction::ALoad(LvIndex { index: 1 }));
	code.push(Instruction::IfNonNull(state));

	// claim
	code.push(lazy_vals_module());
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetStatic(offset.clone()));
	code.push(Instruction::AConstNull);
	code.push(evaluating_module());
	code.push(virtual_call(LAZY_VALS, "objCAS", OBJ_CAS_DESC));
	code.push(Instruction::IfEq(loop_label));

	match lazy_val.value {
		Value::Int(value) => {
			code.push_labeled(try_start, Instruction::BiPush(value));
			code.push(Instruction::IStore(LvIndex { index: 5 }));
			// publish boxed
			code.push(lazy_vals_module());
			code.push(Instruction::ALoad(LvIndex { index: 0 }));
			code.push(Instruction::GetStatic(offset.clone()));
			code.push(evaluating_module());
			code.push(Instruction::ILoad(LvIndex { index: 5 }));
			code.push(static_call(BOXES, "boxToInteger", "(I)Ljava/lang/Integer;"));
			code.push(virtual_call(LAZY_VALS, "objCAS", OBJ_CAS_DESC));
			code.push(Instruction::Pop);
			code.push(Instruction::ILoad(LvIndex { index: 5 }));
			code.push(Instruction::IReturn);
		},
		Value::Str(value) => {
			code.push_labeled(try_start, Instruction::Ldc(Loadable::String(value.to_owned())));
			code.push(Instruction::AStore(LvIndex { index: 5 }));
			code.push(lazy_vals_module());
			code.push(Instruction::ALoad(LvIndex { index: 0 }));
			code.push(Instruction::GetStatic(offset.clone()));
			code.push(evaluating_module());
			code.push(Instruction::ALoad(LvIndex { index: 5 }));
			code.push(virtual_call(LAZY_VALS, "objCAS", OBJ_CAS_DESC));
			code.push(Instruction::Pop);
			code.push(Instruction::ALoad(LvIndex { index: 5 }));
			code.push(Instruction::AReturn);
		},
		Value::Throwing => {
			code.push_labeled(try_start, Instruction::New(ClassName::from("java/lang/RuntimeException")));
			code.push(Instruction::Dup);
			code.push(Instruction::Ldc(Loadable::String("oops".to_owned())));
			code.push(Instruction::InvokeSpecial(MethodRef {
				class: ClassName::from("java/lang/RuntimeException"),
				name: "<init>".into(),
				desc: "(Ljava/lang/String;)V".into(),
			}, false));
			code.push(Instruction::AThrow);
		},
	}

	// failure: restore the empty state, rethrow
	code.push_labeled(catch, Instruction::AStore(LvIndex { index: 6 }));
	code.push(lazy_vals_module());
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetStatic(offset));
	code.push(evaluating_module());
	code.push(Instruction::AConstNull);
	code.push(virtual_call(LAZY_VALS, "objCAS", OBJ_CAS_DESC));
	code.push(Instruction::Pop);
	code.push(Instruction::ALoad(LvIndex { index: 6 }));
	code.push(Instruction::AThrow);

	// something non-null in the storage: a value or somebody else's sentinel
	code.push_labeled(state, Instruction::ALoad(LvIndex { index: 1 }));
	code.push(Instruction::InstanceOf(ClassName::from(lazy_val.value.wrapper())));
	code.push(Instruction::IfEq(loop_label));
	code.push(Instruction::ALoad(LvIndex { index: 1 }));
	match lazy_val.value {
		Value::Int(_) | Value::Throwing => {
			code.push(static_call(BOXES, "unboxToInt", "(Ljava/lang/Object;)I"));
			code.push(Instruction::IReturn);
		},
		Value::Str(_) => {
			code.push(Instruction::CheckCast(ClassName::from("java/lang/String")));
			code.push(Instruction::AReturn);
		},
	}

	code.exception_table.push(Exception {
		start: try_start,
		end: catch,
		handler: catch,
		catch: Some(ClassName::from("java/lang/Throwable")),
	});

	let mut init = Method::new(
		MethodAccess { is_private: true, ..MethodAccess::default() },
		lazy_val.init_name().into(),
		format!("(){}", lazy_val.value.descriptor()).into(),
	);
	init.code = Some(code);
	init
}

/// A 3.3-line module class holding the given lazy vals. `offset_owner` is
/// where the `OFFSET$*` fields and their `<clinit>` population live: the
/// class itself, or its companion class.
pub fn unsafe_module_class(owner: &str, offset_owner: Option<&str>, lazy_vals: &[UnsafeLazyVal]) -> ClassFile {
	let mut class = public_class(owner);
	let offsets_here = offset_owner.is_none();
	let offset_owner = offset_owner.unwrap_or(owner);

	class.fields.push(Field::new(
		FieldAccess { is_public: true, is_static: true, is_final: true, ..FieldAccess::default() },
		"MODULE$".into(),
		format!("L{owner};").into(),
	));

	let mut clinit_instructions = vec![
		Instruction::New(ClassName::from(owner)),
		Instruction::Dup,
		Instruction::InvokeSpecial(MethodRef {
			class: ClassName::from(owner),
			name: "<init>".into(),
			desc: "()V".into(),
		}, false),
		Instruction::PutStatic(field_ref(owner, "MODULE$", &format!("L{owner};"))),
	];

	for lazy_val in lazy_vals {
		class.fields.push(Field::new(
			FieldAccess { is_private: true, ..FieldAccess::default() },
			FieldName::from(lazy_val.storage_name()),
			"Ljava/lang/Object;".into(),
		));
		if offsets_here {
			class.fields.push(Field::new(
				FieldAccess { is_private: true, is_static: true, is_final: true, ..FieldAccess::default() },
				FieldName::from(lazy_val.offset_name()),
				"J".into(),
			));
			clinit_instructions.extend(offset_install(owner, offset_owner, &lazy_val.storage_name(), &lazy_val.offset_name()));
		}
		class.methods.push(unsafe_accessor(owner, lazy_val));
		class.methods.push(unsafe_init_method(owner, offset_owner, lazy_val));
	}

	class.methods.push(default_constructor(owner));
	class.methods.push(clinit_from(clinit_instructions));
	class
}

/// The companion class side of a pair: carries the `OFFSET$*` fields and
/// their `<clinit>` population for the module's lazy vals.
pub fn companion_class(class_name: &str, object_name: &str, lazy_vals: &[UnsafeLazyVal]) -> ClassFile {
	let mut class = public_class(class_name);

	let mut clinit_instructions = Vec::new();
	for lazy_val in lazy_vals {
		class.fields.push(Field::new(
			FieldAccess { is_public: true, is_static: true, is_final: true, ..FieldAccess::default() },
			FieldName::from(lazy_val.offset_name()),
			"J".into(),
		));
		clinit_instructions.extend(offset_install(object_name, class_name, &lazy_val.storage_name(), &lazy_val.offset_name()));
	}

	class.methods.push(default_constructor(class_name));
	class.methods.push(clinit_from(clinit_instructions));
	class
}

/// A 3.0–3.2-line class: a typed storage field, a flag field, an `OFFSET$0`
/// of the flag field, and a fully inlined accessor.
pub fn bitmap_class(owner: &str) -> ClassFile {
	const CAS_DESC: &str = "(Ljava/lang/Object;JJII)Z";
	const SET_FLAG_DESC: &str = "(Ljava/lang/Object;JII)V";
	const GET_DESC: &str = "(Ljava/lang/Object;J)J";
	const STATE_DESC: &str = "(JI)J";
	const WAIT_DESC: &str = "(Ljava/lang/Object;JJI)V";

	let mut class = public_class(owner);
	class.fields.push(Field::new(
		FieldAccess { is_private: true, ..FieldAccess::default() },
		"count$lzy1".into(),
		"I".into(),
	));
	class.fields.push(Field::new(
		FieldAccess { is_private: true, is_volatile: true, ..FieldAccess::default() },
		"0bitmap$1".into(),
		"J".into(),
	));
	class.fields.push(Field::new(
		FieldAccess { is_private: true, is_static: true, is_final: true, ..FieldAccess::default() },
		"OFFSET$0".into(),
		"J".into(),
	));

	let storage = field_ref(owner, "count$lzy1", "I");
	let offset = field_ref(owner, "OFFSET$0", "J");

	let mut code = Code::new();
	let loop_label = code.fresh_label();
	let uninitialized = code.fresh_label();
	let try_start = code.fresh_label();
	let catch = code.fresh_label();
	let wait = code.fresh_label();

	code.push_labeled(loop_label, lazy_vals_module());
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetStatic(offset.clone()));
	code.push(virtual_call(LAZY_VALS, "get", GET_DESC));
	code.push(Instruction::LStore(LvIndex { index: 1 }));
	code.push(lazy_vals_module());
	code.push(Instruction::LLoad(LvIndex { index: 1 }));
	code.push(Instruction::IConst0);
	code.push(virtual_call(LAZY_VALS, "STATE", STATE_DESC));
	code.push(Instruction::Ldc(Loadable::Long(3)));
	code.push(Instruction::LCmp);
	code.push(Instruction::IfNe(uninitialized));
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetField(storage.clone()));
	code.push(Instruction::IReturn);

	code.push_labeled(uninitialized, lazy_vals_module());
	code.push(Instruction::LLoad(LvIndex { index: 1 }));
	code.push(Instruction::IConst0);
	code.push(virtual_call(LAZY_VALS, "STATE", STATE_DESC));
	code.push(Instruction::LConst0);
	code.push(Instruction::LCmp);
	code.push(Instruction::IfNe(wait));
	code.push(lazy_vals_module());
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetStatic(offset.clone()));
	code.push(Instruction::LLoad(LvIndex { index: 1 }));
	code.push(Instruction::IConst1);
	code.push(Instruction::IConst0);
	code.push(virtual_call(LAZY_VALS, "CAS", CAS_DESC));
	code.push(Instruction::IfEq(loop_label));

	code.push_labeled(try_start, Instruction::BiPush(42));
	code.push(Instruction::IStore(LvIndex { index: 5 }));
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::ILoad(LvIndex { index: 5 }));
	code.push(Instruction::PutField(storage));
	code.push(lazy_vals_module());
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetStatic(offset.clone()));
	code.push(Instruction::IConst3);
	code.push(Instruction::IConst0);
	code.push(virtual_call(LAZY_VALS, "setFlag", SET_FLAG_DESC));
	code.push(Instruction::ILoad(LvIndex { index: 5 }));
	code.push(Instruction::IReturn);

	code.push_labeled(catch, Instruction::AStore(LvIndex { index: 6 }));
	code.push(lazy_vals_module());
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetStatic(offset.clone()));
	code.push(Instruction::IConst0);
	code.push(Instruction::IConst0);
	code.push(virtual_call(LAZY_VALS, "setFlag", SET_FLAG_DESC));
	code.push(Instruction::ALoad(LvIndex { index: 6 }));
	code.push(Instruction::AThrow);

	code.push_labeled(wait, lazy_vals_module());
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetStatic(offset));
	code.push(Instruction::LLoad(LvIndex { index: 1 }));
	code.push(Instruction::IConst0);
	code.push(virtual_call(LAZY_VALS, "wait4Notification", WAIT_DESC));
	code.push(Instruction::Goto(loop_label));

	code.exception_table.push(Exception {
		start: try_start,
		end: catch,
		handler: catch,
		catch: Some(ClassName::from("java/lang/Throwable")),
	});

	let mut accessor = Method::new(
		MethodAccess { is_public: true, ..MethodAccess::default() },
		"count".into(),
		"()I".into(),
	);
	accessor.code = Some(code);
	class.methods.push(accessor);

	class.methods.push(default_constructor(owner));
	class.methods.push(clinit_from(offset_install(owner, owner, "0bitmap$1", "OFFSET$0")));
	class
}

/// A class with a `$lzy`-named field that was never a lazy val: no offsets,
/// no flags, no handle, no init method, not volatile.
pub fn eager_holder_class(owner: &str) -> ClassFile {
	let mut class = public_class(owner);
	class.fields.push(Field::new(
		FieldAccess { is_private: true, is_final: true, ..FieldAccess::default() },
		"data$lzy1".into(),
		"Ljava/lang/String;".into(),
	));

	let mut code = Code::new();
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::GetField(field_ref(owner, "data$lzy1", "Ljava/lang/String;")));
	code.push(Instruction::AReturn);
	let mut accessor = Method::new(
		MethodAccess { is_public: true, ..MethodAccess::default() },
		"data".into(),
		"()Ljava/lang/String;".into(),
	);
	accessor.code = Some(code);
	class.methods.push(accessor);

	class.methods.push(default_constructor(owner));
	class
}
