//! Detection and classification of lazy vals in a class (plus companion).
//!
//! Works in two passes: the `<clinit>` methods of the class and its companion
//! are scanned for the `OFFSET$*` population sequences (the authoritative
//! storage-to-offset mapping), then every `$lzy` storage field candidate is
//! classified against the fields, methods and that mapping. Any candidate
//! that can't be classified fails the whole class; the only silent skip is
//! the eager `$lzy`-named holder that never was a lazy val.

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use mocha::tree::class::ClassFile;
use mocha::tree::descriptor::parse_method_descriptor;
use mocha::tree::field::{Field, FieldName};
use mocha::tree::method::code::{Code, Instruction, Loadable};
use mocha::tree::method::{Method, MethodName};
use crate::info::{
	handle_field_name, init_method_name, is_bitmap_field_name, is_offset_field_name,
	parse_storage_field_name, Family, LazyValInfo, OffsetFieldLocation,
};
use crate::runtime_names;
use crate::PatchOptions;

/// One `OFFSET$*` population sequence found in a `<clinit>`:
///
/// ```txt,ignore
/// getstatic     scala/runtime/LazyVals$.MODULE$
/// ldc           <owner class>
/// ldc           "<field name>"
/// invokevirtual java/lang/Class.getDeclaredField
/// invokevirtual scala/runtime/LazyVals$.getOffsetStatic
/// putstatic     OFFSET$_m_<k>
/// ```
///
/// `start`/`end` are the inclusive index range of the sequence in the
/// `<clinit>` instruction list, so the rewriter can strip it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OffsetInstall {
	/// The field name the sequence loads as a string constant: the storage
	/// field for the object-unsafe family, the flag field for the bitmap one.
	pub(crate) ldc_field_name: String,
	pub(crate) offset_field: FieldName,
	pub(crate) start: usize,
	pub(crate) end: usize,
}

/// The result of detection on one class (with optional companion).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Detection {
	/// In field declaration order.
	pub(crate) lazy_vals: Vec<LazyValInfo>,
	/// Offset population sequences in the class's own `<clinit>`.
	pub(crate) own_installs: Vec<OffsetInstall>,
	/// Offset population sequences in the companion's `<clinit>`.
	pub(crate) companion_installs: Vec<OffsetInstall>,
}

/// Finds the zero-argument method of the given name.
fn find_accessor<'a>(class: &'a ClassFile, name: &str) -> Option<&'a Method> {
	class.methods.iter()
		.find(|method| method.name == *name && method.descriptor.as_str().starts_with("()"))
}

fn clinit(class: &ClassFile) -> Option<&Code> {
	class.methods.iter()
		.find(|method| method.name == MethodName::CLINIT)
		.and_then(|method| method.code.as_ref())
}

/// Scans a `<clinit>` for [`OffsetInstall`] sequences, walking backwards from
/// each `putstatic OFFSET$*` to the `getstatic LazyVals$.MODULE$` that opens
/// the sequence. The walk is bounded; a sequence longer than
/// [`PatchOptions::offset_scan_limit`] fails the scan rather than guessing.
pub(crate) fn scan_offset_installs(code: &Code, options: &PatchOptions) -> Result<Vec<OffsetInstall>> {
	let lazy_vals_module = runtime_names::lazy_vals_module();
	let mut installs = Vec::new();

	for (index, entry) in code.instructions.iter().enumerate() {
		let Instruction::PutStatic(target) = &entry.instruction else { continue };
		if !is_offset_field_name(target.name.as_str()) {
			continue;
		}

		let mut start = None;
		let mut ldc_field_name = None;
		for back in (index.saturating_sub(options.offset_scan_limit)..index).rev() {
			match &code.instructions[back].instruction {
				Instruction::GetStatic(field)
					if field.class == lazy_vals_module && field.name == "MODULE$" =>
				{
					start = Some(back);
					break;
				},
				Instruction::Ldc(Loadable::String(name)) if ldc_field_name.is_none() => {
					ldc_field_name = Some(name.clone());
				},
				_ => {},
			}
		}

		let start = start.with_context(|| anyhow!(
			"no `getstatic LazyVals$.MODULE$` within {} instructions before the `putstatic {}`",
			options.offset_scan_limit, target.name,
		))?;
		let ldc_field_name = ldc_field_name.with_context(|| anyhow!(
			"no field name constant between `getstatic LazyVals$.MODULE$` and `putstatic {}`",
			target.name,
		))?;

		installs.push(OffsetInstall {
			ldc_field_name,
			offset_field: target.name.clone(),
			start,
			end: index,
		});
	}

	Ok(installs)
}

fn method_calls_module_helper(code: &Code, helper: &str) -> bool {
	let lazy_vals_module = runtime_names::lazy_vals_module();
	code.instructions.iter().any(|entry| matches!(
		&entry.instruction,
		Instruction::InvokeVirtual(method) if method.class == lazy_vals_module && method.name == *helper
	))
}

fn accessor_offset_field(code: &Code) -> Option<FieldName> {
	code.instructions.iter().find_map(|entry| match &entry.instruction {
		Instruction::GetStatic(field) if is_offset_field_name(field.name.as_str()) => Some(field.name.clone()),
		_ => None,
	})
}

pub(crate) fn detect(class: &ClassFile, companion: Option<&ClassFile>, options: &PatchOptions) -> Result<Detection> {
	let own_installs = match clinit(class) {
		Some(code) => scan_offset_installs(code, options)
			.with_context(|| anyhow!("in <clinit> of {:?}", class.name))?,
		None => Vec::new(),
	};
	let companion_installs = match companion.and_then(clinit) {
		Some(code) => scan_offset_installs(code, options)
			.with_context(|| anyhow!("in <clinit> of the companion of {:?}", class.name))?,
		None => Vec::new(),
	};

	let find_install = |ldc_field_name: &str| -> Option<(&OffsetInstall, OffsetFieldLocation)> {
		own_installs.iter()
			.find(|install| install.ldc_field_name == ldc_field_name)
			.map(|install| (install, OffsetFieldLocation::Same))
			.or_else(|| companion_installs.iter()
				.find(|install| install.ldc_field_name == ldc_field_name)
				.map(|install| (install, OffsetFieldLocation::Companion)))
	};
	let find_install_by_offset = |offset_field: &FieldName| -> Option<(&OffsetInstall, OffsetFieldLocation)> {
		own_installs.iter()
			.find(|install| install.offset_field == *offset_field)
			.map(|install| (install, OffsetFieldLocation::Same))
			.or_else(|| companion_installs.iter()
				.find(|install| install.offset_field == *offset_field)
				.map(|install| (install, OffsetFieldLocation::Companion)))
	};

	let mut lazy_vals = Vec::new();

	for field in &class.fields {
		let Some((base, n)) = parse_storage_field_name(field.name.as_str()) else { continue };

		classify(class, field, base, n, &find_install, &find_install_by_offset, options)
			.with_context(|| anyhow!("storage field {:?} of class {:?}", field.name, class.name))?
			.map_or_else(
				|| debug!("field {} of {} has a $lzy name but no lazy val scaffolding, leaving it alone", field.name, class.name),
				|info| lazy_vals.push(info),
			);
	}

	Ok(Detection { lazy_vals, own_installs, companion_installs })
}

/// Classifies one storage field candidate. `Ok(None)` is the eager-holder
/// exemption; everything else either classifies or errors.
fn classify<'a>(
	class: &ClassFile,
	field: &Field,
	base: &str,
	n: u32,
	find_install: &dyn Fn(&str) -> Option<(&'a OffsetInstall, OffsetFieldLocation)>,
	find_install_by_offset: &dyn Fn(&FieldName) -> Option<(&'a OffsetInstall, OffsetFieldLocation)>,
	_options: &PatchOptions,
) -> Result<Option<LazyValInfo>> {
	let storage_name = field.name.as_str();

	let accessor = find_accessor(class, base);
	let value_type_of = |accessor: &Method| -> Result<mocha::tree::descriptor::Type> {
		parse_method_descriptor(&accessor.descriptor)?
			.return_type
			.context("the accessor returns void")
	};

	// family C: a VarHandle next to the storage field
	if class.field(&handle_field_name(storage_name)).is_some() {
		let accessor = accessor.context("handle-based lazy val without an accessor")?;
		return Ok(Some(LazyValInfo {
			name: base.to_owned(),
			storage_field: field.name.clone(),
			family: Family::HandleBased,
			offset_field_location: OffsetFieldLocation::None,
			offset_field: None,
			bitmap_field: None,
			accessor: accessor.name.clone(),
			init_method: None,
			value_type: value_type_of(accessor)?,
		}));
	}

	// family B: out-of-line $lzyINIT driven by a memoized unsafe offset
	let init_name = init_method_name(base, n);
	if let Some(init) = class.method(&init_name) {
		if field.descriptor != "Ljava/lang/Object;" {
			bail!("found init method {init_name:?} but the storage field is typed {:?} instead of Object", field.descriptor);
		}
		// every supported scheme stores lazy vals as instance fields (module
		// lazy vals live on the singleton instance)
		if field.access.is_static {
			bail!("the storage field is static, which no known scheme produces");
		}
		let accessor = accessor.context("lazy val with an init method but no accessor")?;
		let init_code = init.code.as_ref().context("the init method has no code")?;
		if !method_calls_module_helper(init_code, "objCAS") {
			bail!("the init method {init_name:?} never calls the runtime CAS helper");
		}
		let (install, location) = find_install(storage_name)
			.with_context(|| anyhow!("no OFFSET$* population for storage field {storage_name:?} in any reachable <clinit>"))?;
		return Ok(Some(LazyValInfo {
			name: base.to_owned(),
			storage_field: field.name.clone(),
			family: Family::ObjectUnsafe,
			offset_field_location: location,
			offset_field: Some(install.offset_field.clone()),
			bitmap_field: None,
			accessor: accessor.name.clone(),
			init_method: Some(init.name.clone()),
			value_type: value_type_of(accessor)?,
		}));
	}

	// family A: inlined accessor spinning on a bit-flag field
	if let Some(accessor) = accessor {
		if let Some(code) = accessor.code.as_ref() {
			let uses_cas = method_calls_module_helper(code, "CAS");
			let uses_set_flag = method_calls_module_helper(code, "setFlag");
			if uses_cas || uses_set_flag {
				if !(uses_cas && uses_set_flag) {
					bail!("the accessor calls only one of the CAS/setFlag runtime helpers");
				}
				let offset_field = accessor_offset_field(code)
					.context("the accessor synchronizes through the runtime helpers but reads no OFFSET$* field")?;
				let (install, location) = find_install_by_offset(&offset_field)
					.with_context(|| anyhow!("no population sequence for {offset_field:?} in any reachable <clinit>"))?;
				if !is_bitmap_field_name(&install.ldc_field_name) {
					bail!("the offset {offset_field:?} is taken of field {:?}, which is not a flag field", install.ldc_field_name);
				}
				if class.field(&install.ldc_field_name).is_none() {
					bail!("the flag field {:?} does not exist in the class", install.ldc_field_name);
				}
				if field.access.is_static {
					bail!("the storage field is static, which no known scheme produces");
				}
				return Ok(Some(LazyValInfo {
					name: base.to_owned(),
					storage_field: field.name.clone(),
					family: Family::Bitmap,
					offset_field_location: location,
					offset_field: Some(install.offset_field.clone()),
					bitmap_field: Some(FieldName::from(install.ldc_field_name.as_str())),
					accessor: accessor.name.clone(),
					init_method: None,
					value_type: value_type_of(accessor)?,
				}));
			}
		}
	}

	// an OFFSET$* population naming this field, without any further
	// scaffolding, is half of a scheme we don't know
	if find_install(storage_name).is_some() {
		bail!("an OFFSET$* field is populated for {storage_name:?}, but there's neither an init method nor a synchronizing accessor");
	}

	if field.access.is_volatile {
		bail!("the storage field is volatile but carries no recognizable lazy val scaffolding");
	}

	// not a lazy val at all, just a field with a $lzy name
	Ok(None)
}

pub(crate) fn describe_candidates(class: &ClassFile) -> Vec<String> {
	class.fields.iter()
		.filter_map(|field| {
			let (base, n) = parse_storage_field_name(field.name.as_str())?;
			let handle = class.field(&handle_field_name(field.name.as_str())).is_some();
			let init = class.method(&init_method_name(base, n)).is_some();
			let accessor = find_accessor(class, base).is_some();
			Some(format!(
				"{} : {} (accessor: {accessor}, init method: {init}, handle field: {handle}, volatile: {})",
				field.name, field.descriptor, field.access.is_volatile,
			))
		})
		.collect()
}
