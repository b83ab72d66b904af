//! Synthesis of the `VarHandle`-based lazy val scheme, replacing the detected
//! old scaffolding.
//!
//! For every non-handle-based lazy val the rewriter
//! - retypes the storage field to `Object`,
//! - adds a `static final VarHandle <storage>$lzyHandle` field,
//! - replaces the accessor with the fast-path shape (handle `get`, value
//!   `instanceof` check, slow path through the init method),
//! - emits a `<name>$lzyINIT<n>()Ljava/lang/Object;` state machine around the
//!   extracted user initializer,
//! - strips the `OFFSET$*` fields and their `<clinit>` population sequences
//!   (and the flag fields of the bitmap family), and
//! - installs the handle in `<clinit>` through
//!   `MethodHandles.privateLookupIn(owner, MethodHandles.lookup())`.
//!
//! All edits for a class happen or none do; the caller only serializes a tree
//! this module returned `Ok` for.

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexSet;
use log::debug;
use mocha::tree::class::{ClassFile, ClassName};
use mocha::tree::descriptor::{BaseType, Type};
use mocha::tree::field::{Field, FieldAccess, FieldName, FieldRef};
use mocha::tree::method::code::{Code, Instruction, InstructionListEntry, Exception, Loadable, LvIndex};
use mocha::tree::method::{Method, MethodAccess, MethodName, MethodRef};
use crate::detect::{Detection, OffsetInstall};
use crate::diagnostic::DiagnosticKind;
use crate::extract::{extract_initializer, ExtractedInitializer};
use crate::info::{handle_field_name, init_method_name, Family, LazyValInfo, OffsetFieldLocation};
use crate::runtime_names;
use crate::PatchOptions;

const VAR_HANDLE: &str = "java/lang/invoke/VarHandle";
const VAR_HANDLE_DESC: &str = "Ljava/lang/invoke/VarHandle;";
const METHOD_HANDLES: &str = "java/lang/invoke/MethodHandles";
const LOOKUP: &str = "java/lang/invoke/MethodHandles$Lookup";
const LOOKUP_DESC: &str = "Ljava/lang/invoke/MethodHandles$Lookup;";
const OBJECT_DESC: &str = "Ljava/lang/Object;";

/// The boxing contract of one primitive type, per `scala/runtime/BoxesRunTime`.
/// Unboxing `null` yields the zero value, which is what makes the `NullValue`
/// sentinel work uniformly for primitive lazy vals.
struct Boxing {
	wrapper: &'static str,
	box_method: &'static str,
	box_descriptor: String,
	unbox_method: &'static str,
	unbox_descriptor: String,
	return_instruction: Instruction,
}

fn boxing(base: BaseType) -> Boxing {
	let (wrapper, box_method, unbox_method, return_instruction) = match base {
		BaseType::Z => ("java/lang/Boolean", "boxToBoolean", "unboxToBoolean", Instruction::IReturn),
		BaseType::B => ("java/lang/Byte", "boxToByte", "unboxToByte", Instruction::IReturn),
		BaseType::S => ("java/lang/Short", "boxToShort", "unboxToShort", Instruction::IReturn),
		BaseType::C => ("java/lang/Character", "boxToCharacter", "unboxToCharacter", Instruction::IReturn),
		BaseType::I => ("java/lang/Integer", "boxToInteger", "unboxToInt", Instruction::IReturn),
		BaseType::J => ("java/lang/Long", "boxToLong", "unboxToLong", Instruction::LReturn),
		BaseType::F => ("java/lang/Float", "boxToFloat", "unboxToFloat", Instruction::FReturn),
		BaseType::D => ("java/lang/Double", "boxToDouble", "unboxToDouble", Instruction::DReturn),
	};
	Boxing {
		wrapper,
		box_method,
		box_descriptor: format!("({})L{};", base.as_char(), wrapper),
		unbox_method,
		unbox_descriptor: format!("(Ljava/lang/Object;){}", base.as_char()),
		return_instruction,
	}
}

fn handle_field_ref(owner: &ClassName, storage_name: &str) -> FieldRef {
	FieldRef {
		class: owner.clone(),
		name: FieldName::from(handle_field_name(storage_name)),
		desc: VAR_HANDLE_DESC.into(),
	}
}

fn handle_get(owner: &ClassName) -> MethodRef {
	MethodRef {
		class: ClassName::from(VAR_HANDLE),
		name: "get".into(),
		desc: format!("(L{};)Ljava/lang/Object;", owner.as_str()).into(),
	}
}

fn handle_compare_and_set(owner: &ClassName) -> MethodRef {
	MethodRef {
		class: ClassName::from(VAR_HANDLE),
		name: "compareAndSet".into(),
		desc: format!("(L{};Ljava/lang/Object;Ljava/lang/Object;)Z", owner.as_str()).into(),
	}
}

fn handle_set(owner: &ClassName) -> MethodRef {
	MethodRef {
		class: ClassName::from(VAR_HANDLE),
		name: "set".into(),
		desc: format!("(L{};Ljava/lang/Object;)V", owner.as_str()).into(),
	}
}

/// `getstatic` of the singleton instance of a runtime module class.
fn module_instance(module: ClassName) -> Instruction {
	let desc = runtime_names::module_descriptor(&module);
	Instruction::GetStatic(FieldRef {
		class: module,
		name: "MODULE$".into(),
		desc: desc.into(),
	})
}

fn waiting_method(name: &str) -> MethodRef {
	MethodRef {
		class: runtime_names::waiting(),
		name: name.into(),
		desc: "()V".into(),
	}
}

/// The synthesized members replacing one lazy val's old scaffolding.
struct Scaffold {
	init: Method,
	accessor: Method,
}

/// Local variable layout of the synthesized init method. User code spliced in
/// keeps its own slots, which start above these in both old schemes.
mod slot {
	pub(super) const THIS: u16 = 0;
	pub(super) const CURRENT: u16 = 1;
	pub(super) const RESULT: u16 = 2;
	pub(super) const THROWN: u16 = 3;
	pub(super) const WITNESS: u16 = 4;
}

fn synthesize_init_method(
	owner: &ClassName,
	lazy_val: &LazyValInfo,
	extracted: ExtractedInitializer,
	mut code: Code,
	n: u32,
) -> Result<Method> {
	let storage = FieldRef {
		class: owner.clone(),
		name: lazy_val.storage_field.clone(),
		desc: OBJECT_DESC.into(),
	};
	let handle = handle_field_ref(owner, storage.name.as_str());
	let is_reference = lazy_val.value_type.is_reference();

	let loop_label = code.fresh_label();
	let state = code.fresh_label();
	let check_waiting = code.fresh_label();
	let null_state = code.fresh_label();
	let ret_current = code.fresh_label();
	let catch = code.fresh_label();
	let rethrow = code.fresh_label();

	// loop: re-read the storage and dispatch on what's in it
	code.push_labeled(loop_label, Instruction::GetStatic(handle.clone()));
	code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
	code.push(Instruction::InvokeVirtual(handle_get(owner)));
	code.push(Instruction::AStore(LvIndex { index: slot::CURRENT }));
	code.push(Instruction::ALoad(LvIndex { index: slot::CURRENT }));
	code.push(Instruction::IfNonNull(state));

	// empty: try to claim with the Evaluating sentinel
	code.push(Instruction::GetStatic(handle.clone()));
	code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
	code.push(Instruction::AConstNull);
	code.push(module_instance(runtime_names::evaluating()));
	code.push(Instruction::InvokeVirtual(handle_compare_and_set(owner)));
	code.push(Instruction::IfEq(loop_label));

	// claimed: run the user initializer under a catch-all
	let mut spliced = extracted.instructions;
	let try_start = match spliced.first_mut() {
		Some(first) => *first.label.get_or_insert_with(|| code.fresh_label()),
		None => bail!("empty extracted initializer for {:?}", lazy_val.name),
	};
	code.instructions.append(&mut spliced);

	let try_end;
	if extracted.falls_through {
		let computed = code.fresh_label();
		// the value sits on the stack in its source type
		match &lazy_val.value_type {
			Type::Base(base) => {
				let b = boxing(*base);
				try_end = code.fresh_label();
				code.push_labeled(try_end, Instruction::InvokeStatic(MethodRef {
					class: runtime_names::boxes_run_time(),
					name: b.box_method.into(),
					desc: b.box_descriptor.as_str().into(),
				}, false));
				code.push(Instruction::AStore(LvIndex { index: slot::RESULT }));
			},
			_ => {
				try_end = code.fresh_label();
				code.push_labeled(try_end, Instruction::AStore(LvIndex { index: slot::RESULT }));
			},
		}
		code.push(Instruction::Goto(computed));

		emit_failure_handler(&mut code, owner, &handle, catch, rethrow);

		// computed: wrap a null result, then publish over the sentinel
		let publish = code.fresh_label();
		if is_reference {
			code.push_labeled(computed, Instruction::ALoad(LvIndex { index: slot::RESULT }));
			code.push(Instruction::IfNonNull(publish));
			code.push(module_instance(runtime_names::null_value()));
			code.push(Instruction::AStore(LvIndex { index: slot::RESULT }));
			code.push_labeled(publish, Instruction::GetStatic(handle.clone()));
		} else {
			code.push_labeled(computed, Instruction::GetStatic(handle.clone()));
		}
		code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
		code.push(module_instance(runtime_names::evaluating()));
		code.push(Instruction::ALoad(LvIndex { index: slot::RESULT }));
		code.push(Instruction::InvokeVirtual(handle_compare_and_set(owner)));
		let done = code.fresh_label();
		code.push(Instruction::IfNe(done));

		// a Waiting latch got installed while we computed: overwrite it and
		// release the waiters
		code.push(Instruction::GetStatic(handle.clone()));
		code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
		code.push(Instruction::InvokeVirtual(handle_get(owner)));
		code.push(Instruction::AStore(LvIndex { index: slot::WITNESS }));
		code.push(Instruction::GetStatic(handle.clone()));
		code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
		code.push(Instruction::ALoad(LvIndex { index: slot::RESULT }));
		code.push(Instruction::InvokeVirtual(handle_set(owner)));
		code.push(Instruction::ALoad(LvIndex { index: slot::WITNESS }));
		code.push(Instruction::InstanceOf(runtime_names::waiting()));
		code.push(Instruction::IfEq(done));
		code.push(Instruction::ALoad(LvIndex { index: slot::WITNESS }));
		code.push(Instruction::CheckCast(runtime_names::waiting()));
		code.push(Instruction::InvokeVirtual(waiting_method("countDown")));

		// done: hand the published value back, unwrapping the null sentinel
		if is_reference {
			let return_null = code.fresh_label();
			code.push_labeled(done, Instruction::ALoad(LvIndex { index: slot::RESULT }));
			code.push(module_instance(runtime_names::null_value()));
			code.push(Instruction::IfACmpEq(return_null));
			code.push(Instruction::ALoad(LvIndex { index: slot::RESULT }));
			code.push(Instruction::AReturn);
			code.push_labeled(return_null, Instruction::AConstNull);
			code.push(Instruction::AReturn);
		} else {
			code.push_labeled(done, Instruction::ALoad(LvIndex { index: slot::RESULT }));
			code.push(Instruction::AReturn);
		}
	} else {
		// the computation always throws; the handler is the next instruction,
		// so the exclusive range end is the handler label itself
		try_end = catch;
		emit_failure_handler(&mut code, owner, &handle, catch, rethrow);
	}

	// state: something non-null is in the storage
	code.push_labeled(state, Instruction::ALoad(LvIndex { index: slot::CURRENT }));
	code.push(Instruction::InstanceOf(runtime_names::lazy_val_control_state()));
	code.push(Instruction::IfEq(ret_current));
	code.push(Instruction::ALoad(LvIndex { index: slot::CURRENT }));
	code.push(module_instance(runtime_names::evaluating()));
	code.push(Instruction::IfACmpNe(check_waiting));
	// Evaluating: offer a Waiting latch and go around
	code.push(Instruction::GetStatic(handle.clone()));
	code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
	code.push(Instruction::ALoad(LvIndex { index: slot::CURRENT }));
	code.push(Instruction::New(runtime_names::waiting()));
	code.push(Instruction::Dup);
	code.push(Instruction::InvokeSpecial(MethodRef {
		class: runtime_names::waiting(),
		name: MethodName::INIT.into(),
		desc: "()V".into(),
	}, false));
	code.push(Instruction::InvokeVirtual(handle_compare_and_set(owner)));
	code.push(Instruction::Pop);
	code.push(Instruction::Goto(loop_label));
	// Waiting: block until the winner publishes, then go around
	code.push_labeled(check_waiting, Instruction::ALoad(LvIndex { index: slot::CURRENT }));
	code.push(Instruction::InstanceOf(runtime_names::waiting()));
	code.push(Instruction::IfEq(null_state));
	code.push(Instruction::ALoad(LvIndex { index: slot::CURRENT }));
	code.push(Instruction::CheckCast(runtime_names::waiting()));
	code.push(Instruction::InvokeVirtual(waiting_method("await")));
	code.push(Instruction::Goto(loop_label));
	// NullValue: the lazy val computed null
	code.push_labeled(null_state, Instruction::AConstNull);
	code.push(Instruction::AReturn);
	// a published value
	code.push_labeled(ret_current, Instruction::ALoad(LvIndex { index: slot::CURRENT }));
	code.push(Instruction::AReturn);

	code.exception_table.push(Exception {
		start: try_start,
		end: try_end,
		handler: catch,
		catch: Some(ClassName::from("java/lang/Throwable")),
	});

	let mut init = Method::new(
		MethodAccess { is_private: true, ..MethodAccess::default() },
		MethodName::from(init_method_name(&lazy_val.name, n)),
		"()Ljava/lang/Object;".into(),
	);
	init.code = Some(code);
	Ok(init)
}

/// The catch-all around the user initializer: put the storage back to empty,
/// release any latch that appeared while we were computing, rethrow.
fn emit_failure_handler(code: &mut Code, owner: &ClassName, handle: &FieldRef, catch: mocha::tree::method::code::Label, rethrow: mocha::tree::method::code::Label) {
	code.push_labeled(catch, Instruction::AStore(LvIndex { index: slot::THROWN }));
	code.push(Instruction::GetStatic(handle.clone()));
	code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
	code.push(Instruction::InvokeVirtual(handle_get(owner)));
	code.push(Instruction::AStore(LvIndex { index: slot::WITNESS }));
	code.push(Instruction::GetStatic(handle.clone()));
	code.push(Instruction::ALoad(LvIndex { index: slot::THIS }));
	code.push(Instruction::AConstNull);
	code.push(Instruction::InvokeVirtual(handle_set(owner)));
	code.push(Instruction::ALoad(LvIndex { index: slot::WITNESS }));
	code.push(Instruction::InstanceOf(runtime_names::waiting()));
	code.push(Instruction::IfEq(rethrow));
	code.push(Instruction::ALoad(LvIndex { index: slot::WITNESS }));
	code.push(Instruction::CheckCast(runtime_names::waiting()));
	code.push(Instruction::InvokeVirtual(waiting_method("countDown")));
	code.push_labeled(rethrow, Instruction::ALoad(LvIndex { index: slot::THROWN }));
	code.push(Instruction::AThrow);
}

fn synthesize_accessor(owner: &ClassName, lazy_val: &LazyValInfo, old_accessor: &Method, n: u32) -> Result<Method> {
	let handle = handle_field_ref(owner, lazy_val.storage_field.as_str());
	let init_ref = MethodRef {
		class: owner.clone(),
		name: init_method_name(&lazy_val.name, n).into(),
		desc: "()Ljava/lang/Object;".into(),
	};

	let mut code = Code::new();
	let slow = code.fresh_label();

	code.push(Instruction::GetStatic(handle));
	code.push(Instruction::ALoad(LvIndex { index: 0 }));
	code.push(Instruction::InvokeVirtual(handle_get(owner)));
	code.push(Instruction::AStore(LvIndex { index: 1 }));
	code.push(Instruction::ALoad(LvIndex { index: 1 }));

	match &lazy_val.value_type {
		Type::Base(base) => {
			let b = boxing(*base);
			let unbox = Instruction::InvokeStatic(MethodRef {
				class: runtime_names::boxes_run_time(),
				name: b.unbox_method.into(),
				desc: b.unbox_descriptor.as_str().into(),
			}, false);
			code.push(Instruction::InstanceOf(ClassName::from(b.wrapper)));
			code.push(Instruction::IfEq(slow));
			code.push(Instruction::ALoad(LvIndex { index: 1 }));
			code.push(unbox.clone());
			code.push(b.return_instruction.clone());
			code.push_labeled(slow, Instruction::ALoad(LvIndex { index: 0 }));
			code.push(Instruction::InvokeSpecial(init_ref, false));
			code.push(unbox);
			code.push(b.return_instruction);
		},
		value_type => {
			let type_check = value_type.as_frame_class_name()
				.context("a reference lazy val needs a class-typed result")?;
			if type_check == ClassName::JAVA_LANG_OBJECT {
				// `instanceof Object` would also accept the sentinels, so an
				// Object-typed lazy val checks for them directly
				code.push(Instruction::IfNull(slow));
				code.push(Instruction::ALoad(LvIndex { index: 1 }));
				code.push(Instruction::InstanceOf(runtime_names::lazy_val_control_state()));
				code.push(Instruction::IfNe(slow));
				code.push(Instruction::ALoad(LvIndex { index: 1 }));
				code.push(Instruction::AReturn);
				code.push_labeled(slow, Instruction::ALoad(LvIndex { index: 0 }));
				code.push(Instruction::InvokeSpecial(init_ref, false));
				code.push(Instruction::AReturn);
			} else {
				code.push(Instruction::InstanceOf(type_check.clone()));
				code.push(Instruction::IfEq(slow));
				code.push(Instruction::ALoad(LvIndex { index: 1 }));
				code.push(Instruction::CheckCast(type_check.clone()));
				code.push(Instruction::AReturn);
				code.push_labeled(slow, Instruction::ALoad(LvIndex { index: 0 }));
				code.push(Instruction::InvokeSpecial(init_ref, false));
				code.push(Instruction::CheckCast(type_check));
				code.push(Instruction::AReturn);
			}
		},
	}

	let mut accessor = Method::new(old_accessor.access, old_accessor.name.clone(), old_accessor.descriptor.clone());
	accessor.signature = old_accessor.signature.clone();
	accessor.code = Some(code);
	Ok(accessor)
}

/// The `<clinit>` sequence publishing one lazy val's handle:
/// `h = privateLookupIn(Owner.class, lookup()).findVarHandle(Owner.class, "<storage>", Object.class)`.
fn handle_install_instructions(owner: &ClassName, storage_name: &str) -> Vec<Instruction> {
	vec![
		Instruction::Ldc(Loadable::Class(owner.clone())),
		Instruction::InvokeStatic(MethodRef {
			class: ClassName::from(METHOD_HANDLES),
			name: "lookup".into(),
			desc: format!("(){LOOKUP_DESC}").into(),
		}, false),
		Instruction::InvokeStatic(MethodRef {
			class: ClassName::from(METHOD_HANDLES),
			name: "privateLookupIn".into(),
			desc: format!("(Ljava/lang/Class;{LOOKUP_DESC}){LOOKUP_DESC}").into(),
		}, false),
		Instruction::Ldc(Loadable::Class(owner.clone())),
		Instruction::Ldc(Loadable::String(storage_name.to_owned())),
		Instruction::Ldc(Loadable::Class(ClassName::from("java/lang/Object"))),
		Instruction::InvokeVirtual(MethodRef {
			class: ClassName::from(LOOKUP),
			name: "findVarHandle".into(),
			desc: format!("(Ljava/lang/Class;Ljava/lang/String;Ljava/lang/Class;){VAR_HANDLE_DESC}").into(),
		}),
		Instruction::PutStatic(handle_field_ref(owner, storage_name)),
	]
}

fn clinit_position(class: &ClassFile) -> Option<usize> {
	class.methods.iter().position(|method| method.name == MethodName::CLINIT)
}

/// Strips the given population sequences out of a `<clinit>`. The sequences
/// are straight-line; a label inside one would mean something branches into
/// it, and then it isn't the sequence we think it is.
fn remove_install_ranges(code: &mut Code, installs: &[&OffsetInstall]) -> Result<()> {
	let mut ranges: Vec<(usize, usize)> = installs.iter().map(|install| (install.start, install.end)).collect();
	ranges.sort();
	ranges.dedup();

	// overlapping ranges would mean the scan matched garbage
	for window in ranges.windows(2) {
		if window[1].0 <= window[0].1 {
			bail!("overlapping OFFSET$* population sequences at {:?} and {:?}", window[0], window[1]);
		}
	}

	for &(start, end) in ranges.iter().rev() {
		if end >= code.instructions.len() {
			bail!("population sequence {start}..={end} out of bounds");
		}
		for entry in &code.instructions[start..=end] {
			if let Some(label) = entry.label {
				bail!("population sequence {start}..={end} carries label {label:?}, something branches into it");
			}
		}
		code.instructions.drain(start..=end);
	}
	Ok(())
}

/// `true` when the code does nothing but return.
fn clinit_is_trivial(code: &Code) -> bool {
	code.exception_table.is_empty()
		&& code.instructions.iter().all(|entry| matches!(entry.instruction, Instruction::Return))
}

pub(crate) fn rewrite_group(
	class: &mut ClassFile,
	mut companion: Option<&mut ClassFile>,
	detection: &Detection,
	options: &PatchOptions,
) -> Result<()> {
	let owner = class.name.clone();
	let targets: Vec<&LazyValInfo> = detection.lazy_vals.iter()
		.filter(|info| info.family != Family::HandleBased)
		.collect();
	if targets.is_empty() {
		bail!("nothing to rewrite");
	}

	// first pass, read-only: extract every initializer and synthesize the
	// replacement members, so a failure half-way can't leave a half-edited tree
	let mut scaffolds: Vec<Scaffold> = Vec::with_capacity(targets.len());
	for info in &targets {
		let (base, n) = crate::info::parse_storage_field_name(info.storage_field.as_str())
			.with_context(|| anyhow!("storage field {:?} lost its $lzy shape", info.storage_field))?;
		debug_assert_eq!(base, info.name);

		let source_name: &MethodName = match info.family {
			Family::ObjectUnsafe => info.init_method.as_ref()
				.context("object-unsafe lazy val without an init method")?,
			Family::Bitmap => &info.accessor,
			Family::HandleBased => unreachable!("filtered above"),
		};
		let source = class.method(source_name.as_str())
			.with_context(|| anyhow!("method {source_name:?} vanished between detection and rewrite"))?;

		let mut init_code = Code::new();
		let extracted = extract_initializer(source, info, options, &mut init_code)
			.context(DiagnosticKind::ExtractionFailure)
			.with_context(|| anyhow!("extracting the initializer of lazy val {:?}", info.name))?;

		let init = synthesize_init_method(&owner, info, extracted, init_code, n)
			.with_context(|| anyhow!("synthesizing the init method of lazy val {:?}", info.name))?;
		let old_accessor = class.methods.iter()
			.find(|method| method.name == info.accessor && method.descriptor.as_str().starts_with("()"))
			.with_context(|| anyhow!("accessor {:?} vanished between detection and rewrite", info.accessor))?;
		let accessor = synthesize_accessor(&owner, info, old_accessor, n)
			.with_context(|| anyhow!("synthesizing the accessor of lazy val {:?}", info.name))?;

		scaffolds.push(Scaffold { init, accessor });
	}

	// second pass: apply
	let mut bitmap_fields: IndexSet<FieldName> = IndexSet::new();
	let mut removed_offsets_own: IndexSet<FieldName> = IndexSet::new();
	let mut removed_offsets_companion: IndexSet<FieldName> = IndexSet::new();

	for (info, scaffold) in targets.iter().zip(scaffolds) {
		// the storage becomes a plain Object slot driven through the handle
		let storage_position = class.fields.iter()
			.position(|field| field.name == info.storage_field)
			.with_context(|| anyhow!("storage field {:?} vanished", info.storage_field))?;
		{
			let storage = &mut class.fields[storage_position];
			storage.descriptor = OBJECT_DESC.into();
			storage.access.is_volatile = false;
			storage.signature = None;
			storage.constant_value = None;
		}

		let handle_field = Field::new(
			FieldAccess { is_private: true, is_static: true, is_final: true, ..FieldAccess::default() },
			FieldName::from(handle_field_name(info.storage_field.as_str())),
			VAR_HANDLE_DESC.into(),
		);
		class.fields.insert(storage_position + 1, handle_field);

		// the accessor is replaced in place; the init method replaces the old
		// one (object-unsafe) or goes right after the accessor (bitmap)
		let accessor_position = class.methods.iter()
			.position(|method| method.name == info.accessor && method.descriptor.as_str().starts_with("()"))
			.with_context(|| anyhow!("accessor {:?} vanished", info.accessor))?;
		class.methods[accessor_position] = scaffold.accessor;

		match info.family {
			Family::ObjectUnsafe => {
				let init_name = info.init_method.as_ref().map(|name| name.as_str().to_owned())
					.context("object-unsafe lazy val without an init method")?;
				let init_position = class.methods.iter()
					.position(|method| method.name == *init_name.as_str())
					.with_context(|| anyhow!("init method {init_name:?} vanished"))?;
				class.methods[init_position] = scaffold.init;
			},
			Family::Bitmap => {
				class.methods.insert(accessor_position + 1, scaffold.init);
				if let Some(bitmap) = &info.bitmap_field {
					bitmap_fields.insert(bitmap.clone());
				}
			},
			Family::HandleBased => unreachable!("filtered above"),
		}

		if let Some(offset_field) = &info.offset_field {
			match info.offset_field_location {
				OffsetFieldLocation::Same => { removed_offsets_own.insert(offset_field.clone()); },
				OffsetFieldLocation::Companion => { removed_offsets_companion.insert(offset_field.clone()); },
				OffsetFieldLocation::None => {},
			}
		}
	}

	for bitmap in &bitmap_fields {
		class.remove_field(bitmap.as_str())
			.with_context(|| anyhow!("flag field {bitmap:?} vanished"))?;
	}
	for offset in &removed_offsets_own {
		class.remove_field(offset.as_str())
			.with_context(|| anyhow!("offset field {offset:?} vanished"))?;
	}

	// strip the population sequences out of the <clinit>s
	let own_installs: Vec<&OffsetInstall> = detection.own_installs.iter()
		.filter(|install| removed_offsets_own.contains(&install.offset_field))
		.collect();
	if !own_installs.is_empty() {
		let clinit = clinit_position(class).context("offset populations recorded but the class has no <clinit>")?;
		let code = class.methods[clinit].code.as_mut().context("<clinit> without code")?;
		remove_install_ranges(code, &own_installs)
			.with_context(|| anyhow!("stripping offset populations from <clinit> of {owner:?}"))?;
	}

	if let Some(companion) = companion.as_deref_mut() {
		for offset in &removed_offsets_companion {
			companion.remove_field(offset.as_str())
				.with_context(|| anyhow!("offset field {offset:?} vanished from the companion"))?;
		}
		let companion_installs: Vec<&OffsetInstall> = detection.companion_installs.iter()
			.filter(|install| removed_offsets_companion.contains(&install.offset_field))
			.collect();
		if !companion_installs.is_empty() {
			let clinit = clinit_position(companion).context("companion offset populations recorded but no <clinit>")?;
			{
				let code = companion.methods[clinit].code.as_mut().context("<clinit> without code")?;
				remove_install_ranges(code, &companion_installs)
					.with_context(|| anyhow!("stripping offset populations from <clinit> of {:?}", companion.name))?;
			}
			if companion.methods[clinit].code.as_ref().is_some_and(clinit_is_trivial) {
				debug!("removing the emptied <clinit> of {:?}", companion.name);
				companion.methods.remove(clinit);
			}
		}
	} else if !removed_offsets_companion.is_empty() {
		bail!("lazy vals reference offsets in a companion class that wasn't part of the group");
	}

	// publish the handles at the front of <clinit>, in declaration order
	let installs: Vec<InstructionListEntry> = targets.iter()
		.flat_map(|info| handle_install_instructions(&owner, info.storage_field.as_str()))
		.map(|instruction| InstructionListEntry { label: None, instruction })
		.collect();
	match clinit_position(class) {
		Some(position) => {
			let code = class.methods[position].code.as_mut().context("<clinit> without code")?;
			code.instructions.splice(0..0, installs);
		},
		None => {
			let mut code = Code::new();
			code.instructions = installs;
			code.push(Instruction::Return);
			let mut clinit = Method::new(
				MethodAccess { is_static: true, ..MethodAccess::default() },
				MethodName::from(MethodName::CLINIT),
				"()V".into(),
			);
			clinit.code = Some(code);
			class.methods.push(clinit);
		},
	}

	Ok(())
}
