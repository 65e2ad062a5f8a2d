//! Explosions: ordered, claim-once queues of scalar LLVM values.
//!
//! One high-level GIR value lowers to a sequence of LLVM scalars. An
//! [`Explosion`] hands them out in order exactly once; in debug builds an
//! explosion dropped with unclaimed values trips an assertion, catching
//! lowering paths that silently leak scalars. [`Schema`] describes the
//! shape without the values: each element is a direct scalar or an
//! aggregate passed by value with an alignment.

use inkwell::types::BasicTypeEnum;
use inkwell::values::BasicValueEnum;

use crate::error::EmitError;

/// A claim-once queue of scalars representing one value.
#[derive(Debug)]
pub struct Explosion<'ctx> {
    values: Vec<BasicValueEnum<'ctx>>,
    claimed: usize,
}

impl<'ctx> Explosion<'ctx> {
    pub fn new() -> Self {
        Explosion { values: Vec::new(), claimed: 0 }
    }

    pub fn of(values: Vec<BasicValueEnum<'ctx>>) -> Self {
        Explosion { values, claimed: 0 }
    }

    /// Appends a scalar. Only valid before claiming begins.
    pub fn add(&mut self, value: BasicValueEnum<'ctx>) {
        debug_assert_eq!(self.claimed, 0, "adding to a partially claimed explosion");
        self.values.push(value);
    }

    /// Number of scalars not yet claimed.
    pub fn remaining(&self) -> usize {
        self.values.len() - self.claimed
    }

    /// Claims the next scalar.
    pub fn claim_next(&mut self) -> Result<BasicValueEnum<'ctx>, EmitError> {
        let value = self
            .values
            .get(self.claimed)
            .copied()
            .ok_or_else(|| EmitError::Internal("explosion exhausted".into()))?;
        self.claimed += 1;
        Ok(value)
    }

    /// Claims the next `n` scalars.
    pub fn claim(&mut self, n: usize) -> Result<Vec<BasicValueEnum<'ctx>>, EmitError> {
        (0..n).map(|_| self.claim_next()).collect()
    }

    /// Declares the rest claimed; the take-then-mark pattern for callers
    /// that consumed the storage wholesale.
    pub fn mark_claimed(&mut self) {
        self.claimed = self.values.len();
    }
}

impl<'ctx> Default for Explosion<'ctx> {
    fn default() -> Self {
        Explosion::new()
    }
}

impl<'ctx> Drop for Explosion<'ctx> {
    fn drop(&mut self) {
        // Skip the check while unwinding from an emission error.
        if !std::thread::panicking() {
            debug_assert_eq!(
                self.remaining(),
                0,
                "explosion dropped with {} unclaimed value(s)",
                self.remaining()
            );
        }
    }
}

/// One element of an explosion's shape.
#[derive(Debug, Clone, Copy)]
pub enum SchemaElement<'ctx> {
    /// A directly passed scalar.
    Scalar(BasicTypeEnum<'ctx>),
    /// An aggregate passed by value with a known alignment.
    Aggregate { ty: BasicTypeEnum<'ctx>, align: u32 },
}

/// The shape of a type's explosion.
#[derive(Debug, Clone, Default)]
pub struct Schema<'ctx> {
    elements: Vec<SchemaElement<'ctx>>,
}

impl<'ctx> Schema<'ctx> {
    pub fn new(elements: Vec<SchemaElement<'ctx>>) -> Self {
        Schema { elements }
    }

    pub fn elements(&self) -> &[SchemaElement<'ctx>] {
        &self.elements
    }

    /// Number of LLVM-level values a full explosion carries.
    pub fn size(&self) -> usize {
        self.elements.len()
    }

    /// The LLVM type of each element, in order.
    pub fn element_types(&self) -> Vec<BasicTypeEnum<'ctx>> {
        self.elements
            .iter()
            .map(|e| match e {
                SchemaElement::Scalar(ty) => *ty,
                SchemaElement::Aggregate { ty, .. } => *ty,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;

    #[test]
    fn claims_in_order_exactly_once() {
        let context = Context::create();
        let a = context.i32_type().const_int(1, false).into();
        let b = context.i32_type().const_int(2, false).into();
        let mut explosion = Explosion::of(vec![a, b]);
        assert_eq!(explosion.remaining(), 2);
        assert_eq!(explosion.claim_next().unwrap(), a);
        assert_eq!(explosion.claim_next().unwrap(), b);
        assert!(explosion.claim_next().is_err());
    }

    #[test]
    fn mark_claimed_quiets_the_drop_check() {
        let context = Context::create();
        let mut explosion =
            Explosion::of(vec![context.bool_type().const_zero().into()]);
        explosion.mark_claimed();
        drop(explosion);
    }

    #[test]
    fn schema_reports_shape() {
        let context = Context::create();
        let schema = Schema::new(vec![
            SchemaElement::Scalar(context.i64_type().into()),
            SchemaElement::Aggregate { ty: context.struct_type(&[], false).into(), align: 1 },
        ]);
        assert_eq!(schema.size(), 2);
        assert_eq!(schema.element_types().len(), 2);
    }
}
