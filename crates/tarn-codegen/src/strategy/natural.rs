//! The natural-number representation.
//!
//! A data type shaped `zero | succ Self` is a pointer-sized integer: the
//! bare constructor is 0 and `k` applications of the successor are `k`.
//! Injection is `add 1`, projection is `sub 1`, and switching compares
//! against zero.

use inkwell::basic_block::BasicBlock;
use inkwell::context::Context;
use inkwell::types::{BasicTypeEnum, IntType};
use inkwell::values::BasicValueEnum;
use inkwell::IntPredicate;

use crate::error::EmitError;
use crate::strategy::DataStrategy;
use crate::typeinfo::EmitCtx;

pub struct Natural<'ctx> {
    int: IntType<'ctx>,
    zero: String,
    succ: String,
}

impl<'ctx> Natural<'ctx> {
    pub fn new(context: &'ctx Context, zero: String, succ: String) -> Self {
        Natural { int: context.i64_type(), zero, succ }
    }
}

impl<'ctx> DataStrategy<'ctx> for Natural<'ctx> {
    fn name(&self) -> &'static str {
        "natural"
    }

    fn storage_type(&self) -> BasicTypeEnum<'ctx> {
        self.int.into()
    }

    fn size(&self) -> u64 {
        8
    }

    fn alignment(&self) -> u32 {
        8
    }

    fn inject(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        constructor: &str,
        payload: Option<BasicValueEnum<'ctx>>,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        if constructor == self.zero {
            return Ok(self.int.const_zero().into());
        }
        if constructor == self.succ {
            let prev = payload
                .ok_or_else(|| EmitError::Internal("successor injection without payload".into()))?
                .into_int_value();
            let next = cg
                .builder
                .build_int_add(prev, self.int.const_int(1, false), "succ")
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            return Ok(next.into());
        }
        Err(EmitError::Internal(format!("unknown constructor '{}'", constructor)))
    }

    fn project(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        value: BasicValueEnum<'ctx>,
        constructor: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        if constructor != self.succ {
            return Err(EmitError::Internal(format!(
                "constructor '{}' has no payload to project",
                constructor
            )));
        }
        let prev = cg
            .builder
            .build_int_sub(value.into_int_value(), self.int.const_int(1, false), "pred")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(prev.into())
    }

    fn emit_switch(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        scrutinee: BasicValueEnum<'ctx>,
        cases: &[(String, BasicBlock<'ctx>)],
        default: Option<BasicBlock<'ctx>>,
    ) -> Result<(), EmitError> {
        let value = scrutinee.into_int_value();
        let zero_block = cases.iter().find(|(name, _)| *name == self.zero).map(|(_, b)| *b);
        let succ_block = cases.iter().find(|(name, _)| *name == self.succ).map(|(_, b)| *b);

        match (cases.len(), default) {
            // One destination and nothing else to go: jump.
            (1, None) => {
                let (_, block) = &cases[0];
                cg.builder
                    .build_unconditional_branch(*block)
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            }
            // Both cases covered: a zero-compare picks the side.
            (2, None) => {
                let is_zero = cg
                    .builder
                    .build_int_compare(IntPredicate::EQ, value, self.int.const_zero(), "is_zero")
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?;
                cg.builder
                    .build_conditional_branch(
                        is_zero,
                        zero_block.ok_or_else(|| missing(&self.zero))?,
                        succ_block.ok_or_else(|| missing(&self.succ))?,
                    )
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            }
            // Partial coverage with a default: a switch on zero.
            _ => {
                let else_block = default
                    .or(succ_block)
                    .or(zero_block)
                    .ok_or_else(|| EmitError::Internal("switch with no destinations".into()))?;
                let mut jump_cases = Vec::new();
                if let Some(block) = zero_block {
                    jump_cases.push((self.int.const_zero(), block));
                }
                cg.builder
                    .build_switch(value, else_block, &jump_cases)
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn missing(name: &str) -> EmitError {
    EmitError::Internal(format!("switch is missing the '{}' destination", name))
}
