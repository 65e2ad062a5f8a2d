//! Data-type layout strategies.
//!
//! Every data type gets one strategy deciding its physical representation
//! and supplying injection (`data_init`), projection (`data_extract`), and
//! `switch_constr` lowering. Selection, for a type with `N` constructors
//! of which `P` carry payloads and `Q` do not:
//!
//! 1. two constructors, one of them recursive in the type itself ->
//!    [`natural::Natural`] (pointer-sized integer, `succ` is `add 1`);
//! 2. at most one constructor -> [`newtype::Newtype`] (the payload's own
//!    storage, or nothing);
//! 3. `P > 1` -> unsupported (multi-payload is deferred);
//! 4. `P == 1` -> [`single_payload::SinglePayload`]
//!    (`[payload bytes][tag bytes]` as packed `i8` arrays);
//! 5. `Q == 2` -> [`single_bit::SingleBit`] (`i1`);
//! 6. otherwise -> [`no_payload::NoPayload`] (smallest power-of-two-byte
//!    discriminant integer).

pub mod natural;
pub mod newtype;
pub mod no_payload;
pub mod single_bit;
pub mod single_payload;

use std::rc::Rc;

use inkwell::basic_block::BasicBlock;
use inkwell::types::{BasicTypeEnum, IntType};
use inkwell::values::BasicValueEnum;

use tarn_gir::ValueId;

use crate::error::EmitError;
use crate::explosion::{Schema, SchemaElement};
use crate::typeinfo::{type_info, EmitCtx, LoadableTypeInfo, TypeInfo, TypeInfoCache};

/// The operations a layout strategy provides for its data type.
pub trait DataStrategy<'ctx> {
    /// Strategy name, for diagnostics and logging.
    fn name(&self) -> &'static str;

    /// The LLVM storage type of a value of this data type.
    fn storage_type(&self) -> BasicTypeEnum<'ctx>;

    /// Storage size in bytes.
    fn size(&self) -> u64;

    /// Storage alignment in bytes.
    fn alignment(&self) -> u32;

    /// Lowers `data_init`: builds a value of this type from a constructor
    /// name and its payload, if any.
    fn inject(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        constructor: &str,
        payload: Option<BasicValueEnum<'ctx>>,
    ) -> Result<BasicValueEnum<'ctx>, EmitError>;

    /// Lowers `data_extract`: recovers a known constructor's payload.
    fn project(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        value: BasicValueEnum<'ctx>,
        constructor: &str,
    ) -> Result<BasicValueEnum<'ctx>, EmitError>;

    /// Lowers `switch_constr`: transfers control to the block matching
    /// the scrutinee's constructor.
    fn emit_switch(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        scrutinee: BasicValueEnum<'ctx>,
        cases: &[(String, BasicBlock<'ctx>)],
        default: Option<BasicBlock<'ctx>>,
    ) -> Result<(), EmitError>;
}

/// Chooses the representation for a data type.
pub fn select_strategy<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    gir: &tarn_gir::Module,
    cache: &TypeInfoCache<'ctx>,
    ty: ValueId,
) -> Result<Rc<dyn DataStrategy<'ctx> + 'ctx>, EmitError> {
    let def = gir
        .data_def(ty)
        .ok_or_else(|| EmitError::TypeMapping(format!("'{}' is not a data type", gir.value(ty).name)))?
        .clone();

    let n = def.constructors.len();
    let p = def.payload_count();
    let q = def.bare_count();

    // Recursive zero/successor shape.
    if n == 2 {
        let recursive: Vec<(&String, bool)> = def
            .constructors
            .iter()
            .map(|(name, ctor)| (name, ctor.payload == Some(ty)))
            .collect();
        if recursive.iter().filter(|(_, r)| *r).count() == 1 {
            let succ = recursive.iter().find(|(_, r)| *r).unwrap().0.clone();
            let zero = recursive.iter().find(|(_, r)| !*r).unwrap().0.clone();
            // The non-recursive side must be bare for the counting
            // representation to work.
            if def.constructors[&zero].payload.is_none() {
                return Ok(Rc::new(natural::Natural::new(cg.context, zero, succ)));
            }
        }
    }

    if n <= 1 {
        let ctor = def.constructors.iter().next();
        let payload = match ctor.and_then(|(_, c)| c.payload) {
            Some(payload_ty) => Some(type_info(cg, gir, cache, payload_ty)?),
            None => None,
        };
        let name = ctor.map(|(name, _)| name.clone());
        return Ok(Rc::new(newtype::Newtype::new(cg.context, name, payload)?));
    }

    if p > 1 {
        return Err(EmitError::UnsupportedLayout { data_type: def.name.clone() });
    }

    if p == 1 {
        let (payload_name, payload_ty) = def
            .constructors
            .iter()
            .find_map(|(name, c)| c.payload.map(|ty| (name.clone(), ty)))
            .expect("payload count said one exists");
        let payload = type_info(cg, gir, cache, payload_ty)?;
        let bare: Vec<String> = def
            .constructors
            .iter()
            .filter(|(_, c)| c.payload.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        return Ok(Rc::new(single_payload::SinglePayload::new(
            cg.context,
            payload_name,
            payload,
            bare,
        )?));
    }

    if q == 2 {
        let mut names = def.constructors.keys().cloned();
        let first = names.next().unwrap();
        let second = names.next().unwrap();
        return Ok(Rc::new(single_bit::SingleBit::new(cg.context, first, second)));
    }

    let names: Vec<String> = def.constructors.keys().cloned().collect();
    Ok(Rc::new(no_payload::NoPayload::new(cg.context, names)))
}

/// Ceiling log2 with `ceil_log2(x) == 0` for `x <= 1`.
pub(crate) fn ceil_log2(x: u64) -> u32 {
    if x <= 1 {
        0
    } else {
        u64::BITS - (x - 1).leading_zeros()
    }
}

/// The smallest power-of-two-byte integer holding `bits`.
pub(crate) fn int_type_for_bits(context: &inkwell::context::Context, bits: u32) -> IntType<'_> {
    let bytes = bits.div_ceil(8).next_power_of_two();
    match bytes {
        0 | 1 => context.i8_type(),
        2 => context.i16_type(),
        4 => context.i32_type(),
        _ => context.i64_type(),
    }
}

/// The loadable type info of a data type: a thin wrapper delegating the
/// storage questions to the selected strategy.
pub struct DataTypeInfo<'ctx> {
    strategy: Rc<dyn DataStrategy<'ctx> + 'ctx>,
}

impl<'ctx> DataTypeInfo<'ctx> {
    pub fn new(strategy: Rc<dyn DataStrategy<'ctx> + 'ctx>) -> Self {
        DataTypeInfo { strategy }
    }

    pub fn strategy(&self) -> Rc<dyn DataStrategy<'ctx> + 'ctx> {
        self.strategy.clone()
    }
}

impl<'ctx> TypeInfo<'ctx> for DataTypeInfo<'ctx> {
    fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.strategy.storage_type()
    }
    fn alignment(&self) -> u32 {
        self.strategy.alignment()
    }
    fn fixed_size(&self) -> Option<u64> {
        Some(self.strategy.size())
    }
    fn schema(&self) -> Schema<'ctx> {
        let ty = self.strategy.storage_type();
        if ty.is_struct_type() {
            Schema::new(vec![SchemaElement::Aggregate { ty, align: self.strategy.alignment() }])
        } else {
            Schema::new(vec![SchemaElement::Scalar(ty)])
        }
    }
}

impl<'ctx> LoadableTypeInfo<'ctx> for DataTypeInfo<'ctx> {}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;
    use tarn_gir::Module;

    fn ctx_parts(context: &Context) -> (inkwell::module::Module<'_>, inkwell::builder::Builder<'_>) {
        (context.create_module("strategy_test"), context.create_builder())
    }

    #[test]
    fn nat_selects_the_natural_strategy() {
        let mut gir = Module::new("m");
        let nat = gir.declare_data("Nat");
        gir.define_data("Nat", vec![("zero".into(), None), ("succ".into(), Some(nat))])
            .unwrap();

        let context = Context::create();
        let (module, builder) = ctx_parts(&context);
        let cg = EmitCtx { context: &context, module: &module, builder: &builder };
        let cache = TypeInfoCache::new();
        let strategy = select_strategy(&cg, &gir, &cache, nat).unwrap();
        assert_eq!(strategy.name(), "natural");
        assert_eq!(strategy.storage_type().into_int_type().get_bit_width(), 64);
    }

    #[test]
    fn two_bare_constructors_select_single_bit() {
        let mut gir = Module::new("m");
        let bit = gir
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();

        let context = Context::create();
        let (module, builder) = ctx_parts(&context);
        let cg = EmitCtx { context: &context, module: &module, builder: &builder };
        let cache = TypeInfoCache::new();
        let strategy = select_strategy(&cg, &gir, &cache, bit).unwrap();
        assert_eq!(strategy.name(), "single_bit");
        assert_eq!(strategy.storage_type().into_int_type().get_bit_width(), 1);
    }

    #[test]
    fn many_bare_constructors_select_no_payload() {
        let mut gir = Module::new("m");
        let color = gir
            .define_data(
                "Color",
                vec![("red".into(), None), ("green".into(), None), ("blue".into(), None)],
            )
            .unwrap();

        let context = Context::create();
        let (module, builder) = ctx_parts(&context);
        let cg = EmitCtx { context: &context, module: &module, builder: &builder };
        let cache = TypeInfoCache::new();
        let strategy = select_strategy(&cg, &gir, &cache, color).unwrap();
        assert_eq!(strategy.name(), "no_payload");
        assert_eq!(strategy.storage_type().into_int_type().get_bit_width(), 8);
    }

    #[test]
    fn one_payload_constructor_selects_single_payload() {
        let mut gir = Module::new("m");
        let bit = gir
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();
        let boxed = gir.box_type(bit);
        let maybe = gir
            .define_data("MaybeBox", vec![("nothing".into(), None), ("just".into(), Some(boxed))])
            .unwrap();

        let context = Context::create();
        let (module, builder) = ctx_parts(&context);
        let cg = EmitCtx { context: &context, module: &module, builder: &builder };
        let cache = TypeInfoCache::new();
        let strategy = select_strategy(&cg, &gir, &cache, maybe).unwrap();
        assert_eq!(strategy.name(), "single_payload");

        // Payload bytes then tag bytes, grouped as i8 arrays.
        let storage = strategy.storage_type().into_struct_type();
        assert_eq!(storage.count_fields(), 2);
        let payload_region = storage.get_field_type_at_index(0).unwrap().into_array_type();
        assert_eq!(payload_region.len(), 8);
        let tag_region = storage.get_field_type_at_index(1).unwrap().into_array_type();
        assert_eq!(tag_region.len(), 1);
    }

    #[test]
    fn single_constructor_selects_newtype() {
        let mut gir = Module::new("m");
        let bit = gir
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();
        let wrapper = gir
            .define_data("Wrapper", vec![("wrap".into(), Some(bit))])
            .unwrap();

        let context = Context::create();
        let (module, builder) = ctx_parts(&context);
        let cg = EmitCtx { context: &context, module: &module, builder: &builder };
        let cache = TypeInfoCache::new();
        let strategy = select_strategy(&cg, &gir, &cache, wrapper).unwrap();
        assert_eq!(strategy.name(), "newtype");
        // Storage equals the payload's storage.
        assert_eq!(strategy.storage_type().into_int_type().get_bit_width(), 1);
    }

    #[test]
    fn multi_payload_is_deferred() {
        let mut gir = Module::new("m");
        let bit = gir
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();
        let either = gir
            .define_data(
                "Either",
                vec![("left".into(), Some(bit)), ("right".into(), Some(bit))],
            )
            .unwrap();

        let context = Context::create();
        let (module, builder) = ctx_parts(&context);
        let cg = EmitCtx { context: &context, module: &module, builder: &builder };
        let cache = TypeInfoCache::new();
        let err = select_strategy(&cg, &gir, &cache, either).unwrap_err();
        assert!(matches!(err, EmitError::UnsupportedLayout { .. }));
    }

    #[test]
    fn tag_width_formula() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(4), 2);
        assert_eq!(ceil_log2(5), 3);
    }
}
