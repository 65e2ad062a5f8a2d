//! The single-bit representation.
//!
//! Exactly two bare constructors fit in an `i1`: the first declared
//! constructor is `false`, the second `true`. Switching is a conditional
//! branch.

use inkwell::basic_block::BasicBlock;
use inkwell::context::Context;
use inkwell::types::{BasicTypeEnum, IntType};
use inkwell::values::BasicValueEnum;

use crate::error::EmitError;
use crate::strategy::DataStrategy;
use crate::typeinfo::EmitCtx;

pub struct SingleBit<'ctx> {
    bit: IntType<'ctx>,
    first: String,
    second: String,
}

impl<'ctx> SingleBit<'ctx> {
    pub fn new(context: &'ctx Context, first: String, second: String) -> Self {
        SingleBit { bit: context.bool_type(), first, second }
    }
}

impl<'ctx> DataStrategy<'ctx> for SingleBit<'ctx> {
    fn name(&self) -> &'static str {
        "single_bit"
    }

    fn storage_type(&self) -> BasicTypeEnum<'ctx> {
        self.bit.into()
    }

    fn size(&self) -> u64 {
        1
    }

    fn alignment(&self) -> u32 {
        1
    }

    fn inject(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        constructor: &str,
        payload: Option<BasicValueEnum<'ctx>>,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        if payload.is_some() {
            return Err(EmitError::Internal("bare constructor given a payload".into()));
        }
        if constructor == self.first {
            Ok(self.bit.const_zero().into())
        } else if constructor == self.second {
            Ok(self.bit.const_int(1, false).into())
        } else {
            Err(EmitError::Internal(format!("unknown constructor '{}'", constructor)))
        }
    }

    fn project(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        _value: BasicValueEnum<'ctx>,
        constructor: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        Err(EmitError::Internal(format!(
            "constructor '{}' has no payload to project",
            constructor
        )))
    }

    fn emit_switch(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        scrutinee: BasicValueEnum<'ctx>,
        cases: &[(String, BasicBlock<'ctx>)],
        default: Option<BasicBlock<'ctx>>,
    ) -> Result<(), EmitError> {
        let first = cases.iter().find(|(name, _)| *name == self.first).map(|(_, b)| *b);
        let second = cases.iter().find(|(name, _)| *name == self.second).map(|(_, b)| *b);
        let else_block = default.or(first).or(second);

        let on_false = first
            .or(else_block)
            .ok_or_else(|| EmitError::Internal("switch with no destinations".into()))?;
        let on_true = second
            .or(else_block)
            .ok_or_else(|| EmitError::Internal("switch with no destinations".into()))?;

        cg.builder
            .build_conditional_branch(scrutinee.into_int_value(), on_true, on_false)
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(())
    }
}
