mod common;

use anyhow::Result;
use pretty_assertions::assert_eq;
use mocha::tree::class::ClassFile;
use mocha::tree::method::code::Instruction;
use relazy_core::api::{patch, PatchOutcome, NotApplicableReason};
use relazy_core::diagnostic::DiagnosticKind;
use relazy_core::group::ClassfileGroup;
use relazy_core::supertypes::NoResources;
use relazy_core::PatchOptions;
use common::{
	bitmap_class, companion_class, eager_holder_class, parse, unsafe_module_class,
	write_class, UnsafeLazyVal, Value, LAZY_VALS,
};

fn patch_default(group: &ClassfileGroup) -> PatchOutcome {
	patch(group, &PatchOptions::default(), &NoResources)
}

fn singleton(name: &str, class: &ClassFile) -> Result<ClassfileGroup> {
	Ok(ClassfileGroup::Singleton {
		name: name.to_owned(),
		bytes: write_class(class)?,
	})
}

fn instructions(class: &ClassFile) -> impl Iterator<Item=&Instruction> {
	class.methods.iter()
		.filter_map(|method| method.code.as_ref())
		.flat_map(|code| code.instructions.iter())
		.map(|entry| &entry.instruction)
}

/// `true` if anything still calls into the offset/CAS surface of the old
/// runtime helper — the calls that bottom out in `sun.misc.Unsafe`.
fn references_unsafe_helpers(class: &ClassFile) -> bool {
	instructions(class).any(|instruction| matches!(
		instruction,
		Instruction::InvokeVirtual(method) if method.class == LAZY_VALS && matches!(
			method.name.as_str(),
			"objCAS" | "getOffsetStatic" | "getOffset" | "CAS" | "setFlag" | "get" | "STATE" | "wait4Notification"
		)
	))
}

fn references_var_handle(class: &ClassFile) -> bool {
	let handle_field = class.fields.iter()
		.any(|field| field.descriptor == "Ljava/lang/invoke/VarHandle;");
	let handle_call = instructions(class).any(|instruction| matches!(
		instruction,
		Instruction::InvokeVirtual(method) if method.class == "java/lang/invoke/VarHandle"
	));
	handle_field && handle_call
}

fn offset_fields(class: &ClassFile) -> Vec<String> {
	class.fields.iter()
		.filter(|field| field.name.as_str().starts_with("OFFSET$"))
		.map(|field| field.name.as_str().to_owned())
		.collect()
}

#[test]
fn patches_a_simple_unsafe_singleton() -> Result<()> {
	let lazy_vals = [UnsafeLazyVal { base: "simpleLazy", n: 1, k: 0, value: Value::Int(42) }];
	let class = unsafe_module_class("SimpleLazyVal$", None, &lazy_vals);
	let group = singleton("SimpleLazyVal$", &class)?;

	let PatchOutcome::PatchedSingle { name, bytes } = patch_default(&group) else {
		panic!("expected a patched singleton, got {:?}", patch_default(&group));
	};
	assert_eq!(name, "SimpleLazyVal$");

	let patched = parse(&bytes);
	assert!(!references_unsafe_helpers(&patched));
	assert!(references_var_handle(&patched));
	assert_eq!(offset_fields(&patched), Vec::<String>::new());

	let storage = patched.field("simpleLazy$lzy1").expect("storage field kept");
	assert_eq!(storage.descriptor, "Ljava/lang/Object;");
	assert!(patched.field("simpleLazy$lzy1$lzyHandle").is_some());

	let accessor = patched.method("simpleLazy").expect("accessor kept");
	assert_eq!(accessor.descriptor, "()I");
	let init = patched.method("simpleLazy$lzyINIT1").expect("init method kept");
	assert_eq!(init.descriptor, "()Ljava/lang/Object;");

	Ok(())
}

#[test]
fn patching_is_idempotent() -> Result<()> {
	let lazy_vals = [UnsafeLazyVal { base: "simpleLazy", n: 1, k: 0, value: Value::Int(42) }];
	let class = unsafe_module_class("SimpleLazyVal$", None, &lazy_vals);
	let group = singleton("SimpleLazyVal$", &class)?;

	let PatchOutcome::PatchedSingle { name, bytes } = patch_default(&group) else {
		panic!("first patch failed");
	};

	let again = ClassfileGroup::Singleton { name, bytes };
	assert_eq!(
		patch_default(&again),
		PatchOutcome::NotApplicable(NotApplicableReason::AlreadyHandleBased),
	);
	Ok(())
}

#[test]
fn patches_a_companion_pair() -> Result<()> {
	let lazy_vals = [UnsafeLazyVal { base: "objectVal", n: 1, k: 0, value: Value::Str("object") }];
	let object = unsafe_module_class("Foo$", Some("Foo"), &lazy_vals);
	let class = companion_class("Foo", "Foo$", &lazy_vals);

	let group = ClassfileGroup::CompanionPair {
		object_name: "Foo$".to_owned(),
		class_name: "Foo".to_owned(),
		object_bytes: write_class(&object)?,
		class_bytes: write_class(&class)?,
	};

	let PatchOutcome::PatchedPair { object_name, class_name, object_bytes, class_bytes } = patch_default(&group) else {
		panic!("expected a patched pair, got {:?}", patch_default(&group));
	};
	assert_eq!((object_name.as_str(), class_name.as_str()), ("Foo$", "Foo"));

	let patched_object = parse(&object_bytes);
	assert!(!references_unsafe_helpers(&patched_object));
	assert!(references_var_handle(&patched_object));
	assert!(patched_object.field("objectVal$lzy1$lzyHandle").is_some());

	let patched_class = parse(&class_bytes);
	assert_eq!(offset_fields(&patched_class), Vec::<String>::new());
	assert!(!references_unsafe_helpers(&patched_class));
	// nothing was left for the class initializer to do
	assert!(patched_class.method("<clinit>").is_none());

	Ok(())
}

#[test]
fn offsets_map_by_clinit_order_not_by_storage_suffix() -> Result<()> {
	// the numeric suffixes of the storage fields are shuffled relative to the
	// OFFSET$_m_<k> numbering; the <clinit> population order is what counts
	let lazy_vals = [
		UnsafeLazyVal { base: "first", n: 7, k: 0, value: Value::Int(1) },
		UnsafeLazyVal { base: "second", n: 2, k: 1, value: Value::Str("two") },
	];
	let object = unsafe_module_class("Shuffled$", Some("Shuffled"), &lazy_vals);
	let class = companion_class("Shuffled", "Shuffled$", &lazy_vals);

	let group = ClassfileGroup::CompanionPair {
		object_name: "Shuffled$".to_owned(),
		class_name: "Shuffled".to_owned(),
		object_bytes: write_class(&object)?,
		class_bytes: write_class(&class)?,
	};

	let PatchOutcome::PatchedPair { object_bytes, class_bytes, .. } = patch_default(&group) else {
		panic!("expected a patched pair");
	};

	let patched_object = parse(&object_bytes);
	assert!(patched_object.field("first$lzy7$lzyHandle").is_some());
	assert!(patched_object.field("second$lzy2$lzyHandle").is_some());
	assert!(!references_unsafe_helpers(&patched_object));

	let patched_class = parse(&class_bytes);
	assert_eq!(offset_fields(&patched_class), Vec::<String>::new());

	Ok(())
}

#[test]
fn always_throwing_initializer_keeps_throwing() -> Result<()> {
	let lazy_vals = [
		UnsafeLazyVal { base: "failing", n: 1, k: 0, value: Value::Throwing },
		UnsafeLazyVal { base: "safe", n: 2, k: 1, value: Value::Str("safe") },
	];
	let class = unsafe_module_class("Failing$", None, &lazy_vals);
	let group = singleton("Failing$", &class)?;

	let PatchOutcome::PatchedSingle { bytes, .. } = patch_default(&group) else {
		panic!("expected a patched singleton, got {:?}", patch_default(&group));
	};

	let patched = parse(&bytes);
	assert!(!references_unsafe_helpers(&patched));

	// the failing one: computation spliced in, protected by a catch-all that
	// resets the storage and rethrows, with no publish path
	let failing = patched.method("failing$lzyINIT1").expect("init method kept");
	let code = failing.code.as_ref().expect("init method has code");
	assert_eq!(code.exception_table.len(), 1);
	assert_eq!(
		code.exception_table[0].catch.as_ref().map(|catch| catch.as_str()),
		Some("java/lang/Throwable"),
	);
	assert!(code.instructions.iter().any(|entry| matches!(entry.instruction, Instruction::AThrow)));

	// the safe sibling publishes through the handle
	let safe = patched.method("safe$lzyINIT2").expect("init method kept");
	let safe_code = safe.code.as_ref().expect("init method has code");
	assert!(safe_code.instructions.iter().any(|entry| matches!(
		&entry.instruction,
		Instruction::InvokeVirtual(method)
			if method.class == "java/lang/invoke/VarHandle" && method.name == "compareAndSet"
	)));

	Ok(())
}

#[test]
fn patches_a_bitmap_class() -> Result<()> {
	let class = bitmap_class("WithBitmap");
	let group = singleton("WithBitmap", &class)?;

	let PatchOutcome::PatchedSingle { bytes, .. } = patch_default(&group) else {
		panic!("expected a patched singleton, got {:?}", patch_default(&group));
	};

	let patched = parse(&bytes);
	assert!(!references_unsafe_helpers(&patched));
	assert!(references_var_handle(&patched));

	// flag field and offset gone, storage retyped, init method synthesized
	assert!(patched.field("0bitmap$1").is_none());
	assert_eq!(offset_fields(&patched), Vec::<String>::new());
	let storage = patched.field("count$lzy1").expect("storage field kept");
	assert_eq!(storage.descriptor, "Ljava/lang/Object;");
	assert!(patched.field("count$lzy1$lzyHandle").is_some());
	assert!(patched.method("count$lzyINIT1").is_some());

	Ok(())
}

#[test]
fn bitmap_patch_is_idempotent() -> Result<()> {
	let class = bitmap_class("WithBitmap");
	let group = singleton("WithBitmap", &class)?;

	let PatchOutcome::PatchedSingle { name, bytes } = patch_default(&group) else {
		panic!("first patch failed");
	};
	let again = ClassfileGroup::Singleton { name, bytes };
	assert_eq!(
		patch_default(&again),
		PatchOutcome::NotApplicable(NotApplicableReason::AlreadyHandleBased),
	);
	Ok(())
}

#[test]
fn eager_lzy_named_field_is_not_a_lazy_val() -> Result<()> {
	let class = eager_holder_class("EagerHolder");
	let group = singleton("EagerHolder", &class)?;

	assert_eq!(
		patch_default(&group),
		PatchOutcome::NotApplicable(NotApplicableReason::NoLazyVals),
	);
	Ok(())
}

#[test]
fn volatile_lzy_field_without_scaffolding_is_unknown() -> Result<()> {
	let mut class = eager_holder_class("Strange");
	class.field_mut("data$lzy1").expect("fixture field").access.is_volatile = true;
	let group = singleton("Strange", &class)?;

	let PatchOutcome::Failed(diagnostic) = patch_default(&group) else {
		panic!("expected a failure, got {:?}", patch_default(&group));
	};
	assert_eq!(diagnostic.kind, DiagnosticKind::Unknown);
	assert_eq!(diagnostic.class_name, "Strange");
	assert!(!diagnostic.fields.is_empty());
	assert!(!diagnostic.methods.is_empty());
	assert!(!diagnostic.lazy_vals.is_empty());
	Ok(())
}

#[test]
fn classes_without_lzy_markers_are_left_alone() -> Result<()> {
	let class = {
		let mut class = eager_holder_class("Plain");
		class.remove_field("data$lzy1");
		class.remove_method("data");
		class
	};
	let group = singleton("Plain", &class)?;

	assert_eq!(
		patch_default(&group),
		PatchOutcome::NotApplicable(NotApplicableReason::NoLazyVals),
	);
	Ok(())
}

#[test]
fn garbage_bytes_are_not_applicable() {
	let group = ClassfileGroup::Singleton {
		name: "Broken".to_owned(),
		bytes: vec![0xca, 0xfe, 0xba, 0xbe, 0, 0],
	};
	assert_eq!(
		patch_default(&group),
		PatchOutcome::NotApplicable(NotApplicableReason::Malformed),
	);
}
