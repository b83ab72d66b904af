//! Flat textual disassembly of classes and methods.
//!
//! The output is javap-flavoured, one instruction per line, with `L<id>:`
//! marking labels. It exists for two consumers: containment scans over a
//! method's instructions, and human-readable diagnostics when a class can't
//! be handled.

use std::fmt::Write;
use crate::tree::class::ClassFile;
use crate::tree::method::code::{Instruction, Label, Loadable};
use crate::tree::method::Method;

pub fn class(class: &ClassFile) -> String {
	let mut out = String::new();
	let _ = writeln!(out, "class {} extends {}",
		class.name,
		class.super_class.as_ref().map(|s| s.as_str()).unwrap_or("<nothing>"));
	for field in &class.fields {
		let _ = writeln!(out, "  field {} : {} {:?}", field.name, field.descriptor, field.access);
	}
	for method in &class.methods {
		out.push_str(&self::method(method));
	}
	out
}

pub fn method(method: &Method) -> String {
	let mut out = String::new();
	let _ = writeln!(out, "  method {}{} {:?}", method.name, method.descriptor, method.access);
	if let Some(code) = &method.code {
		for entry in &code.instructions {
			if let Some(label) = entry.label {
				let _ = writeln!(out, "    {}:", label_name(label));
			}
			let _ = writeln!(out, "      {}", instruction(&entry.instruction));
		}
		for exception in &code.exception_table {
			let _ = writeln!(out, "    try {} .. {} catch {} -> {}",
				label_name(exception.start),
				label_name(exception.end),
				exception.catch.as_ref().map(|c| c.as_str()).unwrap_or("<any>"),
				label_name(exception.handler));
		}
	}
	out
}

fn label_name(label: Label) -> String {
	format!("L{}", label.id)
}

pub fn instruction(instruction: &Instruction) -> String {
	use Instruction as I;
	match instruction {
		I::Ldc(loadable) => format!("ldc {}", self::loadable(loadable)),
		I::ILoad(lv) => format!("iload {}", lv.index),
		I::LLoad(lv) => format!("lload {}", lv.index),
		I::FLoad(lv) => format!("fload {}", lv.index),
		I::DLoad(lv) => format!("dload {}", lv.index),
		I::ALoad(lv) => format!("aload {}", lv.index),
		I::IStore(lv) => format!("istore {}", lv.index),
		I::LStore(lv) => format!("lstore {}", lv.index),
		I::FStore(lv) => format!("fstore {}", lv.index),
		I::DStore(lv) => format!("dstore {}", lv.index),
		I::AStore(lv) => format!("astore {}", lv.index),
		I::BiPush(value) => format!("bipush {value}"),
		I::SiPush(value) => format!("sipush {value}"),
		I::IInc(lv, amount) => format!("iinc {} {}", lv.index, amount),
		I::IfEq(l) => format!("ifeq {}", label_name(*l)),
		I::IfNe(l) => format!("ifne {}", label_name(*l)),
		I::IfLt(l) => format!("iflt {}", label_name(*l)),
		I::IfGe(l) => format!("ifge {}", label_name(*l)),
		I::IfGt(l) => format!("ifgt {}", label_name(*l)),
		I::IfLe(l) => format!("ifle {}", label_name(*l)),
		I::IfICmpEq(l) => format!("if_icmpeq {}", label_name(*l)),
		I::IfICmpNe(l) => format!("if_icmpne {}", label_name(*l)),
		I::IfICmpLt(l) => format!("if_icmplt {}", label_name(*l)),
		I::IfICmpGe(l) => format!("if_icmpge {}", label_name(*l)),
		I::IfICmpGt(l) => format!("if_icmpgt {}", label_name(*l)),
		I::IfICmpLe(l) => format!("if_icmple {}", label_name(*l)),
		I::IfACmpEq(l) => format!("if_acmpeq {}", label_name(*l)),
		I::IfACmpNe(l) => format!("if_acmpne {}", label_name(*l)),
		I::IfNull(l) => format!("ifnull {}", label_name(*l)),
		I::IfNonNull(l) => format!("ifnonnull {}", label_name(*l)),
		I::Goto(l) => format!("goto {}", label_name(*l)),
		I::Jsr(l) => format!("jsr {}", label_name(*l)),
		I::Ret(lv) => format!("ret {}", lv.index),
		I::TableSwitch { default, low, high, .. } =>
			format!("tableswitch {low}..{high} default {}", label_name(*default)),
		I::LookupSwitch { default, pairs } =>
			format!("lookupswitch ({} pairs) default {}", pairs.len(), label_name(*default)),
		I::GetStatic(field) => format!("getstatic {}.{} : {}", field.class, field.name, field.desc),
		I::PutStatic(field) => format!("putstatic {}.{} : {}", field.class, field.name, field.desc),
		I::GetField(field) => format!("getfield {}.{} : {}", field.class, field.name, field.desc),
		I::PutField(field) => format!("putfield {}.{} : {}", field.class, field.name, field.desc),
		I::InvokeVirtual(method) => format!("invokevirtual {}.{}{}", method.class, method.name, method.desc),
		I::InvokeSpecial(method, _) => format!("invokespecial {}.{}{}", method.class, method.name, method.desc),
		I::InvokeStatic(method, _) => format!("invokestatic {}.{}{}", method.class, method.name, method.desc),
		I::InvokeInterface(method) => format!("invokeinterface {}.{}{}", method.class, method.name, method.desc),
		I::InvokeDynamic(invoke_dynamic) => format!("invokedynamic {}{}", invoke_dynamic.name, invoke_dynamic.descriptor),
		I::New(class) => format!("new {class}"),
		I::NewArray(array_type) => format!("newarray {array_type:?}"),
		I::ANewArray(class) => format!("anewarray {class}"),
		I::CheckCast(class) => format!("checkcast {class}"),
		I::InstanceOf(class) => format!("instanceof {class}"),
		I::MultiANewArray(class, dimensions) => format!("multianewarray {class} {dimensions}"),
		other => format!("{other:?}").to_lowercase(),
	}
}

fn loadable(loadable: &Loadable) -> String {
	match loadable {
		Loadable::Integer(value) => format!("{value}"),
		Loadable::Float(value) => format!("{value}f"),
		Loadable::Long(value) => format!("{value}L"),
		Loadable::Double(value) => format!("{value}d"),
		Loadable::Class(class) => format!("class {class}"),
		Loadable::String(string) => format!("{string:?}"),
		Loadable::MethodHandle(_) => "<method handle>".to_owned(),
		Loadable::MethodType(descriptor) => format!("method type {descriptor}"),
		Loadable::Dynamic(dynamic) => format!("dynamic {}", dynamic.name),
	}
}
