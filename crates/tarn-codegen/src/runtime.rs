//! Runtime function declarations for compiled tarn programs.
//!
//! Declares the external runtime entry points the emitter calls into:
//! heap allocation, reference counting for boxes, the trap handler, and
//! the value-witness operations used for runtime-sized (archetype)
//! values. Also provides the `llvm.lifetime` intrinsic helpers that
//! `allocate_stack` / `deallocate_stack` pair structurally.

use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::values::{FunctionValue, IntValue, PointerValue};
use inkwell::AddressSpace;

use crate::error::EmitError;
use crate::typeinfo::EmitCtx;

/// Fetches a declaration, adding it on first use.
fn get_or_declare<'ctx>(
    module: &Module<'ctx>,
    name: &str,
    fn_type: inkwell::types::FunctionType<'ctx>,
) -> FunctionValue<'ctx> {
    match module.get_function(name) {
        Some(f) => f,
        None => module.add_function(name, fn_type, Some(Linkage::External)),
    }
}

/// Declares every runtime entry point up front so emission can assume
/// they exist.
pub fn declare_runtime_functions<'ctx>(context: &'ctx Context, module: &Module<'ctx>) {
    let ptr = context.ptr_type(AddressSpace::default());
    let i64_ty = context.i64_type();
    let void = context.void_type();

    // Heap boxes: allocate returns the payload address; the refcount
    // header is the runtime's business.
    get_or_declare(module, "tarn_alloc", ptr.fn_type(&[i64_ty.into()], false));
    get_or_declare(module, "tarn_dealloc", void.fn_type(&[ptr.into()], false));
    get_or_declare(module, "tarn_retain", void.fn_type(&[ptr.into()], false));
    get_or_declare(module, "tarn_release", void.fn_type(&[ptr.into()], false));

    // Fatal runtime condition.
    get_or_declare(module, "tarn_trap", void.fn_type(&[], false));

    // Value witnesses for runtime-sized values: (metadata, value...).
    get_or_declare(module, "tarn_vw_copy", ptr.fn_type(&[ptr.into(), ptr.into()], false));
    get_or_declare(module, "tarn_vw_destroy", void.fn_type(&[ptr.into(), ptr.into()], false));
    get_or_declare(
        module,
        "tarn_vw_assign",
        void.fn_type(&[ptr.into(), ptr.into(), ptr.into()], false),
    );
    get_or_declare(module, "tarn_vw_alloc", ptr.fn_type(&[ptr.into()], false));
    get_or_declare(module, "tarn_vw_dealloc", void.fn_type(&[ptr.into(), ptr.into()], false));
}

/// Emits a call to a declared runtime function.
pub fn call_runtime<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    name: &str,
    args: &[inkwell::values::BasicMetadataValueEnum<'ctx>],
) -> Result<Option<inkwell::values::BasicValueEnum<'ctx>>, EmitError> {
    let function = cg
        .module
        .get_function(name)
        .ok_or_else(|| EmitError::Internal(format!("runtime function '{}' not declared", name)))?;
    let call = cg
        .builder
        .build_call(function, args, name)
        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
    Ok(call.try_as_basic_value().basic())
}

/// Emits `llvm.lifetime.start` for a stack slot of `size` bytes.
pub fn emit_lifetime_start<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    size: u64,
    slot: PointerValue<'ctx>,
) -> Result<(), EmitError> {
    emit_lifetime(cg, "llvm.lifetime.start.p0", size, slot)
}

/// Emits the matching `llvm.lifetime.end`.
pub fn emit_lifetime_end<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    size: u64,
    slot: PointerValue<'ctx>,
) -> Result<(), EmitError> {
    emit_lifetime(cg, "llvm.lifetime.end.p0", size, slot)
}

fn emit_lifetime<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    intrinsic: &str,
    size: u64,
    slot: PointerValue<'ctx>,
) -> Result<(), EmitError> {
    let i64_ty = cg.context.i64_type();
    let ptr = cg.context.ptr_type(AddressSpace::default());
    let fn_type = cg.context.void_type().fn_type(&[i64_ty.into(), ptr.into()], false);
    let intrinsic_fn = get_or_declare(cg.module, intrinsic, fn_type);
    let size_value: IntValue<'ctx> = i64_ty.const_int(size, false);
    cg.builder
        .build_call(intrinsic_fn, &[size_value.into(), slot.into()], "")
        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_are_idempotent() {
        let context = Context::create();
        let module = context.create_module("runtime_test");
        declare_runtime_functions(&context, &module);
        declare_runtime_functions(&context, &module);
        assert!(module.get_function("tarn_alloc").is_some());
        assert!(module.get_function("tarn_retain").is_some());
        assert!(module.get_function("tarn_vw_destroy").is_some());
        // Exactly one declaration each.
        assert_eq!(
            module.get_functions().filter(|f| f.get_name().to_str() == Ok("tarn_alloc")).count(),
            1
        );
    }
}
