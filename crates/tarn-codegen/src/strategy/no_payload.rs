//! The bare-constructor discriminant representation.
//!
//! Three or more payload-less constructors are numbered by declaration
//! order and stored in the smallest power-of-two-byte integer wide enough
//! for the discriminant. Switching is an integer `switch`.

use inkwell::basic_block::BasicBlock;
use inkwell::context::Context;
use inkwell::types::{BasicTypeEnum, IntType};
use inkwell::values::BasicValueEnum;

use crate::error::EmitError;
use crate::strategy::{ceil_log2, int_type_for_bits, DataStrategy};
use crate::typeinfo::EmitCtx;

pub struct NoPayload<'ctx> {
    int: IntType<'ctx>,
    constructors: Vec<String>,
}

impl<'ctx> NoPayload<'ctx> {
    pub fn new(context: &'ctx Context, constructors: Vec<String>) -> Self {
        let bits = ceil_log2(constructors.len() as u64 - 1) + 1;
        NoPayload { int: int_type_for_bits(context, bits), constructors }
    }

    fn tag_of(&self, constructor: &str) -> Result<u64, EmitError> {
        self.constructors
            .iter()
            .position(|name| name == constructor)
            .map(|i| i as u64)
            .ok_or_else(|| EmitError::Internal(format!("unknown constructor '{}'", constructor)))
    }
}

impl<'ctx> DataStrategy<'ctx> for NoPayload<'ctx> {
    fn name(&self) -> &'static str {
        "no_payload"
    }

    fn storage_type(&self) -> BasicTypeEnum<'ctx> {
        self.int.into()
    }

    fn size(&self) -> u64 {
        (self.int.get_bit_width() / 8) as u64
    }

    fn alignment(&self) -> u32 {
        self.int.get_bit_width() / 8
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
        Ok(self.int.const_int(self.tag_of(constructor)?, false).into())
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
        let else_block = default
            .or_else(|| cases.last().map(|(_, b)| *b))
            .ok_or_else(|| EmitError::Internal("switch with no destinations".into()))?;
        // With no explicit default, the final case serves as the else
        // destination and needs no compare of its own.
        let explicit: &[(String, BasicBlock<'ctx>)] = if default.is_some() {
            cases
        } else {
            &cases[..cases.len() - 1]
        };
        let jump_cases: Vec<(inkwell::values::IntValue<'ctx>, BasicBlock<'ctx>)> = explicit
            .iter()
            .map(|(name, block)| Ok((self.int.const_int(self.tag_of(name)?, false), *block)))
            .collect::<Result<_, EmitError>>()?;
        cg.builder
            .build_switch(scrutinee.into_int_value(), else_block, &jump_cases)
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(())
    }
}
