//! The single-payload representation.
//!
//! One payload-carrying constructor and `Q` bare ones: storage is
//! `{ [payload bytes x i8], [tag bytes x i8] }` where the tag is
//! `⌈log₂(Q+1)⌉` bits rounded up to whole bytes, kept as packed `i8`
//! arrays so no odd-width integers leak into the layout. The payload
//! constructor takes tag 0 and owns the payload region; bare constructors
//! write an all-zero payload with their discriminator in the tag bytes.
//! Switching compares the tag bytes.

use inkwell::basic_block::BasicBlock;
use inkwell::context::Context;
use inkwell::types::{BasicTypeEnum, IntType, StructType};
use inkwell::values::{BasicValueEnum, PointerValue};
use inkwell::IntPredicate;

use crate::error::EmitError;
use crate::strategy::{ceil_log2, DataStrategy};
use crate::typeinfo::{AnyTypeInfo, EmitCtx};

pub struct SinglePayload<'ctx> {
    storage: StructType<'ctx>,
    payload_ctor: String,
    payload_ty: BasicTypeEnum<'ctx>,
    payload_bytes: u64,
    tag_bytes: u64,
    /// Tag integer used for stores and compares: the tag byte count is
    /// always a power of two byte width here (1, 2, 4, 8).
    tag_int: IntType<'ctx>,
    /// Bare constructors in declaration order; constructor `i` carries
    /// tag `i + 1`.
    bare: Vec<String>,
}

impl<'ctx> SinglePayload<'ctx> {
    pub fn new(
        context: &'ctx Context,
        payload_ctor: String,
        payload: AnyTypeInfo<'ctx>,
        bare: Vec<String>,
    ) -> Result<Self, EmitError> {
        let payload_bytes = payload.info().fixed_size().ok_or_else(|| {
            EmitError::TypeMapping("single-payload constructor is runtime-sized".into())
        })?;
        let tag_bits = ceil_log2(bare.len() as u64 + 1).max(1);
        let tag_bytes = (tag_bits as u64).div_ceil(8);

        let i8_ty = context.i8_type();
        let storage = context.struct_type(
            &[
                i8_ty.array_type(payload_bytes as u32).into(),
                i8_ty.array_type(tag_bytes as u32).into(),
            ],
            true,
        );
        let tag_int = match tag_bytes {
            1 => context.i8_type(),
            2 => context.i16_type(),
            4 => context.i32_type(),
            _ => context.i64_type(),
        };
        Ok(SinglePayload {
            storage,
            payload_ctor,
            payload_ty: payload.llvm_type(),
            payload_bytes,
            tag_bytes,
            tag_int,
            bare,
        })
    }

    fn tag_of(&self, constructor: &str) -> Result<u64, EmitError> {
        if constructor == self.payload_ctor {
            return Ok(0);
        }
        self.bare
            .iter()
            .position(|name| name == constructor)
            .map(|i| i as u64 + 1)
            .ok_or_else(|| EmitError::Internal(format!("unknown constructor '{}'", constructor)))
    }

    /// Stack slot holding `value`, for byte-region access.
    fn spill(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        value: BasicValueEnum<'ctx>,
    ) -> Result<PointerValue<'ctx>, EmitError> {
        let slot = cg
            .builder
            .build_alloca(self.storage, "payload_spill")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        cg.builder
            .build_store(slot, value)
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(slot)
    }

    fn payload_region(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        slot: PointerValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, EmitError> {
        cg.builder
            .build_struct_gep(self.storage, slot, 0, "payload_region")
            .map_err(|e| EmitError::LlvmError(e.to_string()))
    }

    fn tag_region(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        slot: PointerValue<'ctx>,
    ) -> Result<PointerValue<'ctx>, EmitError> {
        cg.builder
            .build_struct_gep(self.storage, slot, 1, "tag_region")
            .map_err(|e| EmitError::LlvmError(e.to_string()))
    }

    fn load_tag(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        value: BasicValueEnum<'ctx>,
    ) -> Result<inkwell::values::IntValue<'ctx>, EmitError> {
        let slot = self.spill(cg, value)?;
        let tag_ptr = self.tag_region(cg, slot)?;
        let tag = cg
            .builder
            .build_load(self.tag_int, tag_ptr, "tag")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(tag.into_int_value())
    }
}

impl<'ctx> DataStrategy<'ctx> for SinglePayload<'ctx> {
    fn name(&self) -> &'static str {
        "single_payload"
    }

    fn storage_type(&self) -> BasicTypeEnum<'ctx> {
        self.storage.into()
    }

    fn size(&self) -> u64 {
        self.payload_bytes + self.tag_bytes
    }

    fn alignment(&self) -> u32 {
        1
    }

    fn inject(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        constructor: &str,
        payload: Option<BasicValueEnum<'ctx>>,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        let tag = self.tag_of(constructor)?;
        let slot = cg
            .builder
            .build_alloca(self.storage, "inject")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        // Zero payload and tag, then overwrite what the constructor owns.
        cg.builder
            .build_store(slot, self.storage.const_zero())
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;

        if constructor == self.payload_ctor {
            let value = payload.ok_or_else(|| {
                EmitError::Internal("payload constructor injected without payload".into())
            })?;
            let region = self.payload_region(cg, slot)?;
            cg.builder
                .build_store(region, value)
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        } else {
            if payload.is_some() {
                return Err(EmitError::Internal("bare constructor given a payload".into()));
            }
            let region = self.tag_region(cg, slot)?;
            cg.builder
                .build_store(region, self.tag_int.const_int(tag, false))
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        }

        cg.builder
            .build_load(self.storage, slot, "injected")
            .map_err(|e| EmitError::LlvmError(e.to_string()))
    }

    fn project(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        value: BasicValueEnum<'ctx>,
        constructor: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        if constructor != self.payload_ctor {
            return Err(EmitError::Internal(format!(
                "constructor '{}' has no payload to project",
                constructor
            )));
        }
        let slot = self.spill(cg, value)?;
        let region = self.payload_region(cg, slot)?;
        cg.builder
            .build_load(self.payload_ty, region, "projected")
            .map_err(|e| EmitError::LlvmError(e.to_string()))
    }

    fn emit_switch(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        scrutinee: BasicValueEnum<'ctx>,
        cases: &[(String, BasicBlock<'ctx>)],
        default: Option<BasicBlock<'ctx>>,
    ) -> Result<(), EmitError> {
        let tag = self.load_tag(cg, scrutinee)?;
        let current = cg
            .builder
            .get_insert_block()
            .ok_or_else(|| EmitError::Internal("builder is not positioned".into()))?;
        let function = current
            .get_parent()
            .ok_or_else(|| EmitError::Internal("switch outside of a function".into()))?;

        // Compare the tag against each case in turn; the last destination
        // (or the default) absorbs the remainder.
        let fallback = default
            .or_else(|| cases.last().map(|(_, b)| *b))
            .ok_or_else(|| EmitError::Internal("switch with no destinations".into()))?;
        let explicit: &[(String, BasicBlock<'ctx>)] = if default.is_some() {
            cases
        } else {
            &cases[..cases.len() - 1]
        };

        for (index, (name, block)) in explicit.iter().enumerate() {
            let expected = self.tag_int.const_int(self.tag_of(name)?, false);
            let matches = cg
                .builder
                .build_int_compare(IntPredicate::EQ, tag, expected, "tag_eq")
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            let next = if index + 1 == explicit.len() {
                fallback
            } else {
                cg.context.append_basic_block(function, "tag_next")
            };
            cg.builder
                .build_conditional_branch(matches, *block, next)
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            if next != fallback {
                cg.builder.position_at_end(next);
            }
        }
        if explicit.is_empty() {
            cg.builder
                .build_unconditional_branch(fallback)
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        }
        Ok(())
    }
}
