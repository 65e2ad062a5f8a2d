//! The newtype representation.
//!
//! Data types with at most one constructor need no discriminator: storage
//! is the sole payload's storage (or nothing at all), injection and
//! projection are the identity, and switching is an unconditional branch.

use inkwell::basic_block::BasicBlock;
use inkwell::context::Context;
use inkwell::types::BasicTypeEnum;
use inkwell::values::BasicValueEnum;

use crate::error::EmitError;
use crate::strategy::DataStrategy;
use crate::typeinfo::{AnyTypeInfo, EmitCtx};

pub struct Newtype<'ctx> {
    constructor: Option<String>,
    storage: BasicTypeEnum<'ctx>,
    size: u64,
    align: u32,
    has_payload: bool,
}

impl<'ctx> Newtype<'ctx> {
    pub fn new(
        context: &'ctx Context,
        constructor: Option<String>,
        payload: Option<AnyTypeInfo<'ctx>>,
    ) -> Result<Self, EmitError> {
        let (storage, size, align, has_payload) = match &payload {
            Some(info) => {
                let size = info.info().fixed_size().ok_or_else(|| {
                    EmitError::TypeMapping("newtype payload is runtime-sized".into())
                })?;
                (info.llvm_type(), size, info.info().alignment(), true)
            }
            None => (context.struct_type(&[], false).into(), 0, 1, false),
        };
        Ok(Newtype { constructor, storage, size, align, has_payload })
    }

    fn check_constructor(&self, constructor: &str) -> Result<(), EmitError> {
        match &self.constructor {
            Some(name) if name == constructor => Ok(()),
            _ => Err(EmitError::Internal(format!("unknown constructor '{}'", constructor))),
        }
    }
}

impl<'ctx> DataStrategy<'ctx> for Newtype<'ctx> {
    fn name(&self) -> &'static str {
        "newtype"
    }

    fn storage_type(&self) -> BasicTypeEnum<'ctx> {
        self.storage
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn alignment(&self) -> u32 {
        self.align
    }

    fn inject(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        constructor: &str,
        payload: Option<BasicValueEnum<'ctx>>,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        self.check_constructor(constructor)?;
        match (self.has_payload, payload) {
            (true, Some(value)) => Ok(value),
            (false, None) => Ok(self.storage.into_struct_type().const_zero().into()),
            _ => Err(EmitError::Internal("newtype payload arity mismatch".into())),
        }
    }

    fn project(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        value: BasicValueEnum<'ctx>,
        constructor: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        self.check_constructor(constructor)?;
        if !self.has_payload {
            return Err(EmitError::Internal("newtype has no payload to project".into()));
        }
        Ok(value)
    }

    fn emit_switch(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        _scrutinee: BasicValueEnum<'ctx>,
        cases: &[(String, BasicBlock<'ctx>)],
        default: Option<BasicBlock<'ctx>>,
    ) -> Result<(), EmitError> {
        // One inhabitant of the tag space: the branch is unconditional.
        let dest = cases
            .first()
            .map(|(_, block)| *block)
            .or(default)
            .ok_or_else(|| EmitError::Internal("switch with no destinations".into()))?;
        cg.builder
            .build_unconditional_branch(dest)
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(())
    }
}
