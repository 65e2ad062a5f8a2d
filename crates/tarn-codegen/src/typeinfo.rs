//! The type-info protocol: how each GIR type is physically manipulated.
//!
//! Every type maps to a [`TypeInfo`]: the LLVM storage type, alignment,
//! explosion [`Schema`], stack allocation with structurally paired
//! `llvm.lifetime` markers, and address-level destroy/assign. Loadable
//! types refine this with [`LoadableTypeInfo`]: direct loads and stores,
//! explosion transfer, payload bit-packing, and aggregate lowering.
//!
//! Call sites that must distinguish loadable from indirect values do so
//! through the [`AnyTypeInfo`] tagged enum rather than downcasting.
//!
//! Concrete infos:
//! - [`EmptyTypeInfo`] -- zero-sized types (`⊥`, the empty tuple);
//! - [`ScalarTypeInfo`] -- single-scalar types (metadata pointers,
//!   addresses);
//! - [`ThickFunctionTypeInfo`] -- the `(function, env)` pair;
//! - [`BoxTypeInfo`] -- a single reference-counted pointer with
//!   retain/release;
//! - [`AggregateTypeInfo`] -- tuples and records of loadable fields;
//! - [`WitnessSizedTypeInfo`] -- runtime-sized values (archetypes and
//!   dependent positions), manipulated through the value-witness runtime;
//! - the per-data-type strategy infos in [`crate::strategy`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::BasicTypeEnum;
use inkwell::values::{BasicValueEnum, PointerValue};
use inkwell::AddressSpace;

use tarn_gir::{TypeNode, ValueId};

use crate::aggregate::ProposedRange;
use crate::error::EmitError;
use crate::explosion::{Explosion, Schema, SchemaElement};
use crate::payload::Payload;
use crate::runtime;

/// Everything an emission helper needs to build instructions.
pub struct EmitCtx<'a, 'ctx> {
    pub context: &'ctx Context,
    pub module: &'a Module<'ctx>,
    pub builder: &'a Builder<'ctx>,
}

// ---------------------------------------------------------------------------
// The protocol
// ---------------------------------------------------------------------------

/// Physical-type capabilities common to every type.
pub trait TypeInfo<'ctx> {
    /// The LLVM storage type.
    fn llvm_type(&self) -> BasicTypeEnum<'ctx>;

    /// Storage alignment in bytes.
    fn alignment(&self) -> u32;

    /// Storage size in bytes; `None` for runtime-sized types.
    fn fixed_size(&self) -> Option<u64>;

    /// The explosion shape.
    fn schema(&self) -> Schema<'ctx>;

    /// Allocates a stack slot and opens its lifetime. Every exit path
    /// must pass the slot to [`TypeInfo::deallocate_stack`].
    fn allocate_stack(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, EmitError> {
        let size = self.fixed_size().ok_or_else(|| {
            EmitError::Internal("runtime-sized stack slots go through the value-witness runtime".into())
        })?;
        let slot = cg
            .builder
            .build_alloca(self.llvm_type(), name)
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        runtime::emit_lifetime_start(cg, size, slot)?;
        Ok(slot)
    }

    /// Closes the lifetime opened by [`TypeInfo::allocate_stack`].
    fn deallocate_stack(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        slot: PointerValue<'ctx>,
    ) -> Result<(), EmitError> {
        let size = self.fixed_size().ok_or_else(|| {
            EmitError::Internal("runtime-sized stack slots go through the value-witness runtime".into())
        })?;
        runtime::emit_lifetime_end(cg, size, slot)
    }

    /// Destroys the value at `addr` in place. Trivial types do nothing.
    fn destroy_address(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        _addr: PointerValue<'ctx>,
    ) -> Result<(), EmitError> {
        Ok(())
    }

    /// Overwrites the value at `dst` with a copy of the one at `src`.
    fn assign_with_copy(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        dst: PointerValue<'ctx>,
        src: PointerValue<'ctx>,
    ) -> Result<(), EmitError> {
        self.destroy_address(cg, dst)?;
        let value = cg
            .builder
            .build_load(self.llvm_type(), src, "copy_src")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        cg.builder
            .build_store(dst, value)
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(())
    }
}

/// Types manipulated directly in registers.
pub trait LoadableTypeInfo<'ctx>: TypeInfo<'ctx> {
    /// Number of scalars in a full explosion.
    fn explosion_size(&self) -> usize {
        self.schema().size()
    }

    /// Takes the value out of `addr` into `out`, leaving the storage
    /// uninitialized.
    fn load_as_take(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        addr: PointerValue<'ctx>,
        out: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        let value = cg
            .builder
            .build_load(self.llvm_type(), addr, "take")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        out.add(value);
        Ok(())
    }

    /// Loads a copy out of `addr`, retaining what needs retaining.
    fn load_as_copy(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        addr: PointerValue<'ctx>,
        out: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        let mut taken = Explosion::new();
        self.load_as_take(cg, addr, &mut taken)?;
        self.copy(cg, &mut taken, out)
    }

    /// Stores an exploded value into uninitialized storage at `addr`.
    fn initialize(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        addr: PointerValue<'ctx>,
        ex: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        for _ in 0..self.explosion_size() {
            let value = ex.claim_next()?;
            cg.builder
                .build_store(addr, value)
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        }
        Ok(())
    }

    /// Stores into initialized storage: destroy the old value first.
    fn assign(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        addr: PointerValue<'ctx>,
        ex: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        self.destroy_address(cg, addr)?;
        self.initialize(cg, addr, ex)
    }

    /// Copies an exploded value, retaining reference-counted scalars.
    /// Trivial types just move the scalars across.
    fn copy(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        src: &mut Explosion<'ctx>,
        dst: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        for _ in 0..self.explosion_size() {
            dst.add(src.claim_next()?);
        }
        Ok(())
    }

    /// Consumes an exploded value, releasing what needs releasing.
    fn consume(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        ex: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        for _ in 0..self.explosion_size() {
            ex.claim_next()?;
        }
        Ok(())
    }

    /// Moves this value's scalars from one explosion to another.
    fn reexplode(
        &self,
        src: &mut Explosion<'ctx>,
        dst: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        for _ in 0..self.explosion_size() {
            dst.add(src.claim_next()?);
        }
        Ok(())
    }

    /// Bit-packs this value into an enum payload at `offset_bits`.
    fn pack_into_payload(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        payload: &mut Payload<'ctx>,
        ex: &mut Explosion<'ctx>,
        offset_bits: u64,
    ) -> Result<(), EmitError> {
        let mut offset = offset_bits;
        for element in self.schema().elements() {
            let value = ex.claim_next()?;
            payload.insert_value(cg, value, offset)?;
            offset += scalar_bits(cg, element)? as u64;
        }
        Ok(())
    }

    /// Inverse of [`LoadableTypeInfo::pack_into_payload`].
    fn unpack_from_payload(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        payload: &Payload<'ctx>,
        out: &mut Explosion<'ctx>,
        offset_bits: u64,
    ) -> Result<(), EmitError> {
        let mut offset = offset_bits;
        for element in self.schema().elements() {
            let ty = match element {
                SchemaElement::Scalar(ty) => *ty,
                SchemaElement::Aggregate { ty, .. } => *ty,
            };
            out.add(payload.extract_value(cg, ty, offset)?);
            offset += scalar_bits(cg, element)? as u64;
        }
        Ok(())
    }

    /// Contributes this type's byte ranges to an aggregate lowering.
    fn build_aggregate_lowering(
        &self,
        ranges: &mut Vec<ProposedRange<'ctx>>,
        offset: u64,
    ) {
        let size = self.fixed_size().unwrap_or(0);
        ranges.push(ProposedRange::Concrete {
            ty: self.llvm_type(),
            begin: offset,
            end: offset + size,
        });
    }
}

fn scalar_bits<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    element: &SchemaElement<'ctx>,
) -> Result<u32, EmitError> {
    let ty = match element {
        SchemaElement::Scalar(ty) => *ty,
        SchemaElement::Aggregate { ty, .. } => *ty,
    };
    match ty {
        BasicTypeEnum::IntType(t) => Ok(t.get_bit_width()),
        BasicTypeEnum::FloatType(t) => Ok(if t == cg.context.f32_type() { 32 } else { 64 }),
        BasicTypeEnum::PointerType(_) => Ok(64),
        other => Err(EmitError::TypeMapping(format!("no scalar width for {:?}", other))),
    }
}

// ---------------------------------------------------------------------------
// The downcast surface
// ---------------------------------------------------------------------------

/// A type info with its loadability decided.
#[derive(Clone)]
pub enum AnyTypeInfo<'ctx> {
    Loadable(Rc<dyn LoadableTypeInfo<'ctx> + 'ctx>),
    Indirect(Rc<dyn TypeInfo<'ctx> + 'ctx>),
}

impl<'ctx> AnyTypeInfo<'ctx> {
    /// The common capability surface.
    pub fn info(&self) -> &dyn TypeInfo<'ctx> {
        match self {
            AnyTypeInfo::Loadable(rc) => rc.as_ref(),
            AnyTypeInfo::Indirect(rc) => rc.as_ref(),
        }
    }

    /// The loadable refinement, when this type has one.
    pub fn as_loadable(&self) -> Option<Rc<dyn LoadableTypeInfo<'ctx> + 'ctx>> {
        match self {
            AnyTypeInfo::Loadable(rc) => Some(rc.clone()),
            AnyTypeInfo::Indirect(_) => None,
        }
    }

    pub fn is_loadable(&self) -> bool {
        matches!(self, AnyTypeInfo::Loadable(_))
    }

    pub fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.info().llvm_type()
    }

    /// Scalars a value of this type occupies in an explosion: the schema
    /// size for loadable types, one pointer for indirect ones.
    pub fn scalar_count(&self) -> usize {
        match self {
            AnyTypeInfo::Loadable(rc) => rc.explosion_size(),
            AnyTypeInfo::Indirect(_) => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Concrete infos
// ---------------------------------------------------------------------------

/// Zero-sized types: `⊥` and the empty tuple.
pub struct EmptyTypeInfo<'ctx> {
    ty: BasicTypeEnum<'ctx>,
}

impl<'ctx> EmptyTypeInfo<'ctx> {
    pub fn new(context: &'ctx Context) -> Self {
        EmptyTypeInfo { ty: context.struct_type(&[], false).into() }
    }
}

impl<'ctx> TypeInfo<'ctx> for EmptyTypeInfo<'ctx> {
    fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.ty
    }
    fn alignment(&self) -> u32 {
        1
    }
    fn fixed_size(&self) -> Option<u64> {
        Some(0)
    }
    fn schema(&self) -> Schema<'ctx> {
        Schema::new(Vec::new())
    }
}

impl<'ctx> LoadableTypeInfo<'ctx> for EmptyTypeInfo<'ctx> {
    fn load_as_take(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        _addr: PointerValue<'ctx>,
        _out: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        Ok(())
    }
    fn initialize(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        _addr: PointerValue<'ctx>,
        _ex: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        Ok(())
    }
}

/// Single-scalar trivial types.
pub struct ScalarTypeInfo<'ctx> {
    ty: BasicTypeEnum<'ctx>,
    size: u64,
    align: u32,
}

impl<'ctx> ScalarTypeInfo<'ctx> {
    pub fn new(ty: BasicTypeEnum<'ctx>, size: u64, align: u32) -> Self {
        ScalarTypeInfo { ty, size, align }
    }

    /// An opaque-pointer scalar (metadata, addresses, references).
    pub fn pointer(context: &'ctx Context) -> Self {
        ScalarTypeInfo::new(context.ptr_type(AddressSpace::default()).into(), 8, 8)
    }
}

impl<'ctx> TypeInfo<'ctx> for ScalarTypeInfo<'ctx> {
    fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.ty
    }
    fn alignment(&self) -> u32 {
        self.align
    }
    fn fixed_size(&self) -> Option<u64> {
        Some(self.size)
    }
    fn schema(&self) -> Schema<'ctx> {
        Schema::new(vec![SchemaElement::Scalar(self.ty)])
    }
}

impl<'ctx> LoadableTypeInfo<'ctx> for ScalarTypeInfo<'ctx> {}

/// The thick `(function, environment)` pair.
pub struct ThickFunctionTypeInfo<'ctx> {
    pair: BasicTypeEnum<'ctx>,
    ptr: BasicTypeEnum<'ctx>,
}

impl<'ctx> ThickFunctionTypeInfo<'ctx> {
    pub fn new(context: &'ctx Context) -> Self {
        let ptr = context.ptr_type(AddressSpace::default());
        ThickFunctionTypeInfo {
            pair: context.struct_type(&[ptr.into(), ptr.into()], false).into(),
            ptr: ptr.into(),
        }
    }
}

impl<'ctx> TypeInfo<'ctx> for ThickFunctionTypeInfo<'ctx> {
    fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.pair
    }
    fn alignment(&self) -> u32 {
        8
    }
    fn fixed_size(&self) -> Option<u64> {
        Some(16)
    }
    fn schema(&self) -> Schema<'ctx> {
        Schema::new(vec![SchemaElement::Scalar(self.ptr), SchemaElement::Scalar(self.ptr)])
    }
}

impl<'ctx> LoadableTypeInfo<'ctx> for ThickFunctionTypeInfo<'ctx> {
    fn load_as_take(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        addr: PointerValue<'ctx>,
        out: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        let pair = cg
            .builder
            .build_load(self.pair, addr, "thick")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?
            .into_struct_value();
        for i in 0..2 {
            let part = cg
                .builder
                .build_extract_value(pair, i, "thick_part")
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            out.add(part);
        }
        Ok(())
    }

    fn initialize(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        addr: PointerValue<'ctx>,
        ex: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        let mut pair = self.pair.into_struct_type().get_undef();
        for i in 0..2 {
            pair = cg
                .builder
                .build_insert_value(pair, ex.claim_next()?, i, "thick_build")
                .map_err(|e| EmitError::LlvmError(e.to_string()))?
                .into_struct_value();
        }
        cg.builder
            .build_store(addr, pair)
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(())
    }
}

/// A reference-counted heap box: one pointer scalar with retain/release.
pub struct BoxTypeInfo<'ctx> {
    ptr: BasicTypeEnum<'ctx>,
}

impl<'ctx> BoxTypeInfo<'ctx> {
    pub fn new(context: &'ctx Context) -> Self {
        BoxTypeInfo { ptr: context.ptr_type(AddressSpace::default()).into() }
    }
}

impl<'ctx> TypeInfo<'ctx> for BoxTypeInfo<'ctx> {
    fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.ptr
    }
    fn alignment(&self) -> u32 {
        8
    }
    fn fixed_size(&self) -> Option<u64> {
        Some(8)
    }
    fn schema(&self) -> Schema<'ctx> {
        Schema::new(vec![SchemaElement::Scalar(self.ptr)])
    }

    fn destroy_address(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        addr: PointerValue<'ctx>,
    ) -> Result<(), EmitError> {
        let boxed = cg
            .builder
            .build_load(self.ptr, addr, "box")
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        runtime::call_runtime(cg, "tarn_release", &[boxed.into()])?;
        Ok(())
    }
}

impl<'ctx> LoadableTypeInfo<'ctx> for BoxTypeInfo<'ctx> {
    fn copy(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        src: &mut Explosion<'ctx>,
        dst: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        let boxed = src.claim_next()?;
        runtime::call_runtime(cg, "tarn_retain", &[boxed.into()])?;
        dst.add(boxed);
        Ok(())
    }

    fn consume(
        &self,
        cg: &EmitCtx<'_, 'ctx>,
        ex: &mut Explosion<'ctx>,
    ) -> Result<(), EmitError> {
        let boxed = ex.claim_next()?;
        runtime::call_runtime(cg, "tarn_release", &[boxed.into()])?;
        Ok(())
    }
}

/// Tuples and records whose fields are all loadable: one LLVM struct
/// value.
pub struct AggregateTypeInfo<'ctx> {
    struct_ty: BasicTypeEnum<'ctx>,
    fields: Vec<AnyTypeInfo<'ctx>>,
    size: u64,
    align: u32,
}

impl<'ctx> AggregateTypeInfo<'ctx> {
    pub fn new(
        context: &'ctx Context,
        fields: Vec<AnyTypeInfo<'ctx>>,
    ) -> Result<Self, EmitError> {
        let mut size = 0u64;
        let mut align = 1u32;
        let mut field_types = Vec::with_capacity(fields.len());
        for field in &fields {
            let info = field.info();
            size += info.fixed_size().ok_or_else(|| {
                EmitError::TypeMapping("aggregate field is runtime-sized".into())
            })?;
            align = align.max(info.alignment());
            field_types.push(info.llvm_type());
        }
        Ok(AggregateTypeInfo {
            struct_ty: context.struct_type(&field_types, false).into(),
            fields,
            size,
            align,
        })
    }

    pub fn field_infos(&self) -> &[AnyTypeInfo<'ctx>] {
        &self.fields
    }
}

impl<'ctx> TypeInfo<'ctx> for AggregateTypeInfo<'ctx> {
    fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.struct_ty
    }
    fn alignment(&self) -> u32 {
        self.align
    }
    fn fixed_size(&self) -> Option<u64> {
        Some(self.size)
    }
    fn schema(&self) -> Schema<'ctx> {
        Schema::new(vec![SchemaElement::Aggregate { ty: self.struct_ty, align: self.align }])
    }
}

impl<'ctx> LoadableTypeInfo<'ctx> for AggregateTypeInfo<'ctx> {
    fn build_aggregate_lowering(
        &self,
        ranges: &mut Vec<ProposedRange<'ctx>>,
        offset: u64,
    ) {
        let mut field_offset = offset;
        for field in &self.fields {
            if let AnyTypeInfo::Loadable(info) = field {
                info.build_aggregate_lowering(ranges, field_offset);
                field_offset += info.fixed_size().unwrap_or(0);
            }
        }
    }
}

/// Runtime-sized values: archetypes and dependent type positions. All
/// operations go through the value-witness runtime with the type's
/// metadata in hand, so the emitter drives them directly.
pub struct WitnessSizedTypeInfo<'ctx> {
    ptr: BasicTypeEnum<'ctx>,
}

impl<'ctx> WitnessSizedTypeInfo<'ctx> {
    pub fn new(context: &'ctx Context) -> Self {
        WitnessSizedTypeInfo { ptr: context.ptr_type(AddressSpace::default()).into() }
    }
}

impl<'ctx> TypeInfo<'ctx> for WitnessSizedTypeInfo<'ctx> {
    fn llvm_type(&self) -> BasicTypeEnum<'ctx> {
        self.ptr
    }
    fn alignment(&self) -> u32 {
        8
    }
    fn fixed_size(&self) -> Option<u64> {
        None
    }
    fn schema(&self) -> Schema<'ctx> {
        Schema::new(vec![SchemaElement::Scalar(self.ptr)])
    }

    fn destroy_address(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        _addr: PointerValue<'ctx>,
    ) -> Result<(), EmitError> {
        Err(EmitError::Internal(
            "value-witness destroy requires runtime metadata; handled by the emitter".into(),
        ))
    }

    fn assign_with_copy(
        &self,
        _cg: &EmitCtx<'_, 'ctx>,
        _dst: PointerValue<'ctx>,
        _src: PointerValue<'ctx>,
    ) -> Result<(), EmitError> {
        Err(EmitError::Internal(
            "value-witness assign requires runtime metadata; handled by the emitter".into(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Mapping GIR types to infos
// ---------------------------------------------------------------------------

/// Memoized GIR-type-to-info mapping with cycle detection.
#[derive(Default)]
pub struct TypeInfoCache<'ctx> {
    map: RefCell<HashMap<ValueId, AnyTypeInfo<'ctx>>>,
    in_progress: RefCell<HashSet<ValueId>>,
}

impl<'ctx> TypeInfoCache<'ctx> {
    pub fn new() -> Self {
        TypeInfoCache::default()
    }
}

/// The physical representation of a GIR type.
pub fn type_info<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    gir: &tarn_gir::Module,
    cache: &TypeInfoCache<'ctx>,
    ty: ValueId,
) -> Result<AnyTypeInfo<'ctx>, EmitError> {
    if let Some(info) = cache.map.borrow().get(&ty) {
        return Ok(info.clone());
    }
    if !cache.in_progress.borrow_mut().insert(ty) {
        return Err(EmitError::TypeMapping(format!(
            "type '{}' is directly recursive and has no fixed layout",
            gir.value(ty).name
        )));
    }
    let result = build_info(cg, gir, cache, ty);
    cache.in_progress.borrow_mut().remove(&ty);
    let info = result?;
    cache.map.borrow_mut().insert(ty, info.clone());
    Ok(info)
}

fn build_info<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    gir: &tarn_gir::Module,
    cache: &TypeInfoCache<'ctx>,
    ty: ValueId,
) -> Result<AnyTypeInfo<'ctx>, EmitError> {
    let node = match gir.type_node(ty) {
        // A value standing in type position: runtime-sized.
        None => return Ok(AnyTypeInfo::Indirect(Rc::new(WitnessSizedTypeInfo::new(cg.context)))),
        Some(node) => node.clone(),
    };

    Ok(match node {
        TypeNode::Bottom => AnyTypeInfo::Loadable(Rc::new(EmptyTypeInfo::new(cg.context))),
        TypeNode::Type | TypeNode::TypeMetadata => {
            AnyTypeInfo::Loadable(Rc::new(ScalarTypeInfo::pointer(cg.context)))
        }
        TypeNode::Archetype { .. } => {
            AnyTypeInfo::Indirect(Rc::new(WitnessSizedTypeInfo::new(cg.context)))
        }
        TypeNode::Address { .. } => {
            AnyTypeInfo::Loadable(Rc::new(ScalarTypeInfo::pointer(cg.context)))
        }
        TypeNode::Box { .. } => AnyTypeInfo::Loadable(Rc::new(BoxTypeInfo::new(cg.context))),
        TypeNode::Function { .. } => {
            AnyTypeInfo::Loadable(Rc::new(ThickFunctionTypeInfo::new(cg.context)))
        }
        TypeNode::Tuple { elements } => aggregate_info(cg, gir, cache, &elements)?,
        TypeNode::Record(def) => {
            let fields: Vec<ValueId> = def.fields.values().copied().collect();
            aggregate_info(cg, gir, cache, &fields)?
        }
        TypeNode::Data(_) => {
            let strategy = crate::strategy::select_strategy(cg, gir, cache, ty)?;
            AnyTypeInfo::Loadable(Rc::new(crate::strategy::DataTypeInfo::new(strategy)))
        }
        TypeNode::Substituted { base, .. } => type_info(cg, gir, cache, base)?,
    })
}

fn aggregate_info<'ctx>(
    cg: &EmitCtx<'_, 'ctx>,
    gir: &tarn_gir::Module,
    cache: &TypeInfoCache<'ctx>,
    fields: &[ValueId],
) -> Result<AnyTypeInfo<'ctx>, EmitError> {
    let mut infos = Vec::with_capacity(fields.len());
    let mut all_loadable = true;
    for &field in fields {
        let info = type_info(cg, gir, cache, field)?;
        all_loadable &= info.is_loadable() && info.info().fixed_size().is_some();
        infos.push(info);
    }
    if !all_loadable {
        return Ok(AnyTypeInfo::Indirect(Rc::new(WitnessSizedTypeInfo::new(cg.context))));
    }
    Ok(AnyTypeInfo::Loadable(Rc::new(AggregateTypeInfo::new(cg.context, infos)?)))
}
