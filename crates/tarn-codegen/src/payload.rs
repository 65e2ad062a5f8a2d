//! Bit-packed payloads for single-payload data types.
//!
//! A [`Payload`] is a heterogeneous list of slots, each either a concrete
//! integer value or a placeholder of a given integer type (meaning
//! all-zero bits). `insert_value` reinterprets a scalar as bits, shifts it
//! into position, and ORs it into the covering slot; `extract_value` does
//! the inverse: shift right, truncate, reinterpret. Reinterpretation
//! between non-integer scalars and bits goes through a stack slot
//! (store-as-one-type, load-as-another), the same pattern the rest of the
//! emitter uses.

use inkwell::types::{BasicTypeEnum, IntType};
use inkwell::values::{BasicValueEnum, IntValue};

use crate::error::EmitError;
use crate::typeinfo::EmitCtx;

/// One slot of a payload.
#[derive(Debug, Clone, Copy)]
pub enum PayloadSlot<'ctx> {
    Value(IntValue<'ctx>),
    Placeholder(IntType<'ctx>),
}

impl<'ctx> PayloadSlot<'ctx> {
    fn ty(&self) -> IntType<'ctx> {
        match self {
            PayloadSlot::Value(v) => v.get_type(),
            PayloadSlot::Placeholder(ty) => *ty,
        }
    }

    fn value(&self) -> IntValue<'ctx> {
        match self {
            PayloadSlot::Value(v) => *v,
            PayloadSlot::Placeholder(ty) => ty.const_zero(),
        }
    }
}

/// A bit-packed carrier under construction.
#[derive(Debug, Clone)]
pub struct Payload<'ctx> {
    slots: Vec<PayloadSlot<'ctx>>,
}

impl<'ctx> Payload<'ctx> {
    /// An all-placeholder payload with the given slot types.
    pub fn zeroed(slot_types: &[IntType<'ctx>]) -> Self {
        Payload { slots: slot_types.iter().map(|ty| PayloadSlot::Placeholder(*ty)).collect() }
    }

    /// Wraps already-materialized slot values.
    pub fn of_values(values: Vec<IntValue<'ctx>>) -> Self {
        Payload { slots: values.into_iter().map(PayloadSlot::Value).collect() }
    }

    pub fn slots(&self) -> &[PayloadSlot<'ctx>] {
        &self.slots
    }

    /// The slot values, placeholders materialized as zeros.
    pub fn slot_values(&self) -> Vec<IntValue<'ctx>> {
        self.slots.iter().map(|s| s.value()).collect()
    }

    /// Locates the slot covering `offset_bits`; returns the slot index and
    /// the bit offset within it.
    fn locate(&self, offset_bits: u64) -> Result<(usize, u64), EmitError> {
        let mut base = 0u64;
        for (index, slot) in self.slots.iter().enumerate() {
            let width = slot.ty().get_bit_width() as u64;
            if offset_bits < base + width {
                return Ok((index, offset_bits - base));
            }
            base += width;
        }
        Err(EmitError::Internal(format!("payload has no slot at bit {}", offset_bits)))
    }

    /// Shifts `value` into position and ORs it into the covering slot.
    pub fn insert_value(
        &mut self,
        cg: &EmitCtx<'_, 'ctx>,
        value: BasicValueEnum<'ctx>,
        offset_bits: u64,
    ) -> Result<(), EmitError> {
        let bits = as_bits(cg, value)?;
        let (index, shift) = self.locate(offset_bits)?;
        let slot_ty = self.slots[index].ty();
        if (bits.get_type().get_bit_width() as u64) + shift > slot_ty.get_bit_width() as u64 {
            return Err(EmitError::Internal("payload insertion crosses a slot boundary".into()));
        }

        let widened = cg
            .builder
            .build_int_z_extend_or_bit_cast(bits, slot_ty, "payload_bits")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        let positioned = if shift == 0 {
            widened
        } else {
            cg.builder
                .build_left_shift(widened, slot_ty.const_int(shift, false), "payload_shl")
                .map_err(|e| EmitError::LlvmError(e.to_string()))?
        };
        let merged = cg
            .builder
            .build_or(self.slots[index].value(), positioned, "payload_or")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        self.slots[index] = PayloadSlot::Value(merged);
        Ok(())
    }

    /// Extracts a value of `ty` from `offset_bits`: shift right, truncate,
    /// reinterpret.
    pub fn extract_value(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        ty: BasicTypeEnum<'ctx>,
        offset_bits: u64,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        let (index, shift) = self.locate(offset_bits)?;
        let slot_ty = self.slots[index].ty();
        let slot_value = self.slots[index].value();

        let shifted = if shift == 0 {
            slot_value
        } else {
            cg.builder
                .build_right_shift(slot_value, slot_ty.const_int(shift, false), false, "payload_lshr")
                .map_err(|e| EmitError::LlvmError(e.to_string()))?
        };
        let want_bits = bit_width(cg, ty)?;
        let narrow_ty = cg.context.custom_width_int_type(want_bits);
        let narrowed = cg
            .builder
            .build_int_truncate_or_bit_cast(shifted, narrow_ty, "payload_trunc")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        from_bits(cg, narrowed, ty)
    }
}

/// Reinterpret any scalar as an integer of the same bit width.
fn as_bits<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    value: BasicValueEnum<'ctx>,
) -> Result<IntValue<'ctx>, EmitError> {
    if let BasicValueEnum::IntValue(v) = value {
        return Ok(v);
    }
    let width = bit_width(cg, value.get_type())?;
    let int_ty = cg.context.custom_width_int_type(width);
    // Reinterpret through a stack slot: store as the source type, load as
    // the integer type.
    let slot = cg
        .builder
        .build_alloca(value.get_type(), "bits_tmp")
        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
    cg.builder
        .build_store(slot, value)
        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
    let loaded = cg
        .builder
        .build_load(int_ty, slot, "bits")
        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
    Ok(loaded.into_int_value())
}

/// Reinterpret an integer as a scalar of `ty`.
fn from_bits<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    bits: IntValue<'ctx>,
    ty: BasicTypeEnum<'ctx>,
) -> Result<BasicValueEnum<'ctx>, EmitError> {
    if ty.is_int_type() {
        return Ok(bits.into());
    }
    let slot = cg
        .builder
        .build_alloca(bits.get_type(), "unbits_tmp")
        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
    cg.builder
        .build_store(slot, bits)
        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
    cg.builder
        .build_load(ty, slot, "unbits")
        .map_err(|e| EmitError::LlvmError(e.to_string()))
}

/// Bit width of a scalar type for packing purposes.
fn bit_width<'ctx>(cg: &EmitCtx<'_, 'ctx>, ty: BasicTypeEnum<'ctx>) -> Result<u32, EmitError> {
    match ty {
        BasicTypeEnum::IntType(t) => Ok(t.get_bit_width()),
        BasicTypeEnum::FloatType(t) => {
            if t == cg.context.f32_type() {
                Ok(32)
            } else {
                Ok(64)
            }
        }
        BasicTypeEnum::PointerType(_) => Ok(64),
        other => Err(EmitError::TypeMapping(format!(
            "type {:?} cannot be bit-packed",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;

    /// Positions a builder inside a throwaway function so constant
    /// folding gives checkable results.
    macro_rules! payload_cg {
        ($context:ident, $module:ident, $builder:ident, $cg:ident) => {
            let $context = Context::create();
            let $module = $context.create_module("payload_test");
            let $builder = $context.create_builder();
            let fn_type = $context.void_type().fn_type(&[], false);
            let function = $module.add_function("scratch", fn_type, None);
            let entry = $context.append_basic_block(function, "entry");
            $builder.position_at_end(entry);
            let $cg = EmitCtx { context: &$context, module: &$module, builder: &$builder };
        };
    }

    #[test]
    fn insert_then_extract_returns_the_value() {
        payload_cg!(context, module, builder, cg);
        let mut payload = Payload::zeroed(&[context.i64_type()]);
        let value = context.i16_type().const_int(0xBEEF, false);
        payload.insert_value(&cg, value.into(), 8).unwrap();
        let out = payload.extract_value(&cg, context.i16_type().into(), 8).unwrap();
        assert_eq!(out.into_int_value().get_zero_extended_constant(), Some(0xBEEF));
    }

    #[test]
    fn values_at_different_offsets_do_not_clobber() {
        payload_cg!(context, module, builder, cg);
        let mut payload = Payload::zeroed(&[context.i64_type()]);
        let low = context.i8_type().const_int(0xAA, false);
        let high = context.i8_type().const_int(0x55, false);
        payload.insert_value(&cg, low.into(), 0).unwrap();
        payload.insert_value(&cg, high.into(), 32).unwrap();
        let low_out = payload.extract_value(&cg, context.i8_type().into(), 0).unwrap();
        let high_out = payload.extract_value(&cg, context.i8_type().into(), 32).unwrap();
        assert_eq!(low_out.into_int_value().get_zero_extended_constant(), Some(0xAA));
        assert_eq!(high_out.into_int_value().get_zero_extended_constant(), Some(0x55));
    }

    #[test]
    fn insertion_across_a_slot_boundary_is_rejected() {
        payload_cg!(context, module, builder, cg);
        let mut payload = Payload::zeroed(&[context.i8_type(), context.i8_type()]);
        let wide = context.i8_type().const_int(0xFF, false);
        let err = payload.insert_value(&cg, wide.into(), 4).unwrap_err();
        assert!(matches!(err, EmitError::Internal(_)));
    }

    #[test]
    fn placeholder_slots_read_as_zero() {
        payload_cg!(context, module, builder, cg);
        let payload = Payload::zeroed(&[context.i64_type()]);
        let out = payload.extract_value(&cg, context.i32_type().into(), 0).unwrap();
        assert_eq!(out.into_int_value().get_zero_extended_constant(), Some(0));
    }
}
