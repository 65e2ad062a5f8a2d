//! The LLVM emission driver.
//!
//! Emits one LLVM function per top-level scope. The scope is scheduled,
//! every continuation becomes a basic block (in RPO), inner continuation
//! parameters become phi nodes, and the scheduled primops are visited in
//! order. Data-type operations defer to the per-type layout strategy.
//!
//! Calling convention: a function's final GIR parameter is its return
//! continuation and does not appear in the LLVM signature; the LLVM
//! return type is the return continuation's first argument type.
//! `apply` therefore lowers as:
//!
//! - to the entry's return continuation -- `ret`;
//! - to a `function_ref` of an in-scope continuation -- a branch with phi
//!   wiring;
//! - to a `function_ref` of a top-level continuation -- a `call`, then
//!   `ret` or a branch depending on the continuation argument;
//! - to a function value -- an indirect call through the thick pair's
//!   function pointer.
//!
//! Verification failure aborts emission before any LLVM is produced.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use inkwell::basic_block::BasicBlock;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum};
use inkwell::values::{BasicValueEnum, FunctionValue, PhiValue};
use inkwell::AddressSpace;
use tracing::debug;

use tarn_gir::mangle::{mangle, mangle_metadata, GlobalKind};
use tarn_gir::{
    GirError, LoadOwnership, Opcode, Schedule, ScheduleTag, Scope, TypeNode, ValueId,
};

use crate::error::EmitError;
use crate::explosion::Explosion;
use crate::runtime;
use crate::strategy::{select_strategy, DataStrategy};
use crate::typeinfo::{type_info, AnyTypeInfo, EmitCtx, TypeInfo, TypeInfoCache};

/// Emits a verified module to LLVM IR text.
///
/// The LLVM context lives and dies inside this function; nothing LLVM
/// escapes except the printed IR.
pub fn emit_to_ir(gir: &tarn_gir::Module) -> Result<String, EmitError> {
    match tarn_gir::verify(gir) {
        Ok(()) => {}
        Err(GirError::VerificationFailed(failures)) => {
            return Err(EmitError::VerificationFailed(failures))
        }
        Err(other) => return Err(EmitError::Internal(other.to_string())),
    }

    let context = Context::create();
    let llmod = context.create_module(&gir.name);
    let builder = context.create_builder();
    runtime::declare_runtime_functions(&context, &llmod);

    let emitter = Emitter {
        gir,
        context: &context,
        llmod: &llmod,
        builder: &builder,
        infos: TypeInfoCache::new(),
        strategies: std::cell::RefCell::new(HashMap::new()),
    };

    // Type-metadata globals for every defined data and record type.
    for value in gir.values() {
        match value.as_type() {
            Some(TypeNode::Data(def)) if !def.constructors.is_empty() => {
                emitter.declare_metadata_global(GlobalKind::Data, &def.name);
            }
            Some(TypeNode::Record(def)) if !def.fields.is_empty() => {
                emitter.declare_metadata_global(GlobalKind::Record, &def.name);
            }
            _ => {}
        }
    }

    // Declare every function first so cross-references resolve.
    for &cont in gir.top_level() {
        emitter.declare_function(cont)?;
    }
    for &cont in gir.top_level() {
        emitter.emit_function(cont)?;
    }

    llmod
        .verify()
        .map_err(|e| EmitError::LlvmError(format!("module verification failed: {}", e)))?;
    Ok(llmod.print_to_string().to_string())
}

struct Emitter<'a, 'g, 'ctx> {
    gir: &'g tarn_gir::Module,
    context: &'ctx Context,
    llmod: &'a Module<'ctx>,
    builder: &'a inkwell::builder::Builder<'ctx>,
    infos: TypeInfoCache<'ctx>,
    strategies: std::cell::RefCell<HashMap<ValueId, Rc<dyn DataStrategy<'ctx> + 'ctx>>>,
}

/// Per-function emission state.
struct FunctionState<'ctx> {
    blocks: HashMap<ValueId, BasicBlock<'ctx>>,
    env: HashMap<ValueId, Vec<BasicValueEnum<'ctx>>>,
    phis: HashMap<ValueId, Vec<PhiValue<'ctx>>>,
    /// The entry's return continuation parameter, when the function has
    /// one.
    ret_param: Option<ValueId>,
    emitted: HashSet<ValueId>,
}

impl<'a, 'g, 'ctx> Emitter<'a, 'g, 'ctx> {
    fn cg(&self) -> EmitCtx<'a, 'ctx> {
        EmitCtx { context: self.context, module: self.llmod, builder: self.builder }
    }

    fn info(&self, ty: ValueId) -> Result<AnyTypeInfo<'ctx>, EmitError> {
        type_info(&self.cg(), self.gir, &self.infos, ty)
    }

    fn strategy(&self, ty: ValueId) -> Result<Rc<dyn DataStrategy<'ctx> + 'ctx>, EmitError> {
        if let Some(strategy) = self.strategies.borrow().get(&ty) {
            return Ok(strategy.clone());
        }
        let strategy = select_strategy(&self.cg(), self.gir, &self.infos, ty)?;
        self.strategies.borrow_mut().insert(ty, strategy.clone());
        Ok(strategy)
    }

    fn declare_metadata_global(&self, kind: GlobalKind, name: &str) {
        let symbol = mangle_metadata(kind, name);
        if self.llmod.get_global(&symbol).is_none() {
            let global = self.llmod.add_global(self.context.i8_type(), None, &symbol);
            global.set_initializer(&self.context.i8_type().const_zero());
        }
    }

    // -- Signatures ----------------------------------------------------------

    /// The entry's parameters split into data parameters and the return
    /// continuation (the final parameter, when it is of function type).
    fn split_params(&self, cont: ValueId) -> (Vec<ValueId>, Option<ValueId>) {
        let params = self.gir.continuation(cont).params.clone();
        match params.last() {
            Some(&last)
                if matches!(
                    self.gir.type_node(self.gir.ty_of(last)),
                    Some(TypeNode::Function { .. })
                ) =>
            {
                (params[..params.len() - 1].to_vec(), Some(last))
            }
            _ => (params, None),
        }
    }

    /// The LLVM return type implied by a return continuation's function
    /// type; `None` means void.
    fn return_abi(&self, ret_param: ValueId) -> Result<Option<BasicTypeEnum<'ctx>>, EmitError> {
        let arguments = match self.gir.type_node(self.gir.ty_of(ret_param)) {
            Some(TypeNode::Function { arguments }) => arguments.clone(),
            _ => return Ok(None),
        };
        let Some(&first) = arguments.first() else { return Ok(None) };
        let info = self.info(first)?;
        Ok(match info {
            AnyTypeInfo::Loadable(ref loadable) => match loadable.explosion_size() {
                0 => None,
                1 => Some(loadable.schema().element_types()[0]),
                _ => Some(info.llvm_type()),
            },
            AnyTypeInfo::Indirect(_) => {
                Some(self.context.ptr_type(AddressSpace::default()).into())
            }
        })
    }

    /// One LLVM parameter type per explosion scalar of each data
    /// parameter; indirect values pass as pointers.
    fn param_abi(&self, params: &[ValueId]) -> Result<Vec<BasicMetadataTypeEnum<'ctx>>, EmitError> {
        let mut out = Vec::new();
        for &param in params {
            let info = self.info(self.gir.ty_of(param))?;
            match info {
                AnyTypeInfo::Loadable(loadable) => {
                    for ty in loadable.schema().element_types() {
                        out.push(ty.into());
                    }
                }
                AnyTypeInfo::Indirect(_) => {
                    out.push(self.context.ptr_type(AddressSpace::default()).into());
                }
            }
        }
        Ok(out)
    }

    fn declare_function(&self, cont: ValueId) -> Result<FunctionValue<'ctx>, EmitError> {
        let name = mangle(GlobalKind::Continuation, &self.gir.value(cont).name);
        if let Some(existing) = self.llmod.get_function(&name) {
            return Ok(existing);
        }
        let (data_params, ret_param) = self.split_params(cont);
        let abi_params = self.param_abi(&data_params)?;
        let ret_ty = match ret_param {
            Some(ret) => self.return_abi(ret)?,
            None => None,
        };
        let fn_type = match ret_ty {
            Some(ty) => ty.fn_type(&abi_params, false),
            None => self.context.void_type().fn_type(&abi_params, false),
        };
        Ok(self.llmod.add_function(&name, fn_type, None))
    }

    // -- Function bodies -----------------------------------------------------

    fn emit_function(&self, entry: ValueId) -> Result<(), EmitError> {
        let scope = Scope::new(self.gir, entry);
        let schedule = Schedule::compute(self.gir, &scope, ScheduleTag::Early)
            .map_err(|e| EmitError::Internal(e.to_string()))?;
        let function = self.declare_function(entry)?;
        debug!(function = %self.gir.value(entry).name, blocks = schedule.blocks().len(), "emitting function");

        let (data_params, ret_param) = self.split_params(entry);
        let mut state = FunctionState {
            blocks: HashMap::new(),
            env: HashMap::new(),
            phis: HashMap::new(),
            ret_param,
            emitted: HashSet::new(),
        };

        // Blocks in RPO; the entry block keeps the conventional name.
        for (index, block) in schedule.blocks().iter().enumerate() {
            let label = if index == 0 {
                "entry".to_string()
            } else {
                self.gir.value(block.continuation).name.clone()
            };
            state
                .blocks
                .insert(block.continuation, self.context.append_basic_block(function, &label));
        }

        // Bind the entry parameters to the flattened LLVM parameters.
        let llvm_params = function.get_params();
        let mut cursor = 0usize;
        for &param in &data_params {
            let count = self.info(self.gir.ty_of(param))?.scalar_count();
            let scalars = llvm_params[cursor..cursor + count].to_vec();
            cursor += count;
            state.env.insert(param, scalars);
        }

        // Phi nodes for inner continuation parameters.
        for block in schedule.blocks().iter().skip(1) {
            let bb = state.blocks[&block.continuation];
            self.builder.position_at_end(bb);
            let params = self.gir.continuation(block.continuation).params.clone();
            for param in params {
                let info = self.info(self.gir.ty_of(param))?;
                let scalar_types: Vec<BasicTypeEnum<'ctx>> = match &info {
                    AnyTypeInfo::Loadable(loadable) => loadable.schema().element_types(),
                    AnyTypeInfo::Indirect(_) => {
                        vec![self.context.ptr_type(AddressSpace::default()).into()]
                    }
                };
                let mut phis = Vec::with_capacity(scalar_types.len());
                let mut values = Vec::with_capacity(scalar_types.len());
                for ty in scalar_types {
                    let phi = self
                        .builder
                        .build_phi(ty, &self.gir.value(param).name)
                        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
                    values.push(phi.as_basic_value());
                    phis.push(phi);
                }
                state.env.insert(param, values);
                state.phis.insert(param, phis);
            }
        }

        // Emit every scheduled primop.
        for block in schedule.blocks() {
            self.builder.position_at_end(state.blocks[&block.continuation]);
            for &primop in &block.primops {
                self.emit_primop(&mut state, primop)?;
            }
        }
        Ok(())
    }

    // -- Values --------------------------------------------------------------

    /// The scalars of a value, emitting the defining primop on demand.
    fn scalars(
        &self,
        state: &mut FunctionState<'ctx>,
        v: ValueId,
    ) -> Result<Vec<BasicValueEnum<'ctx>>, EmitError> {
        if let Some(values) = state.env.get(&v) {
            return Ok(values.clone());
        }
        if self.gir.value(v).as_primop().is_some() {
            self.emit_primop(state, v)?;
            return state
                .env
                .get(&v)
                .cloned()
                .ok_or_else(|| EmitError::Internal("primop produced no value".into()));
        }
        Err(EmitError::Internal(format!(
            "no materialization for value '{}'",
            self.gir.value(v).name
        )))
    }

    fn single(
        &self,
        state: &mut FunctionState<'ctx>,
        v: ValueId,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        let scalars = self.scalars(state, v)?;
        if scalars.len() != 1 {
            return Err(EmitError::Internal(format!(
                "expected a single scalar, found {}",
                scalars.len()
            )));
        }
        Ok(scalars[0])
    }

    /// The runtime type metadata for a type position: a `Type`-typed
    /// parameter's own value, or the metadata global of a nominal type.
    fn metadata_for(
        &self,
        state: &mut FunctionState<'ctx>,
        ty: ValueId,
    ) -> Result<BasicValueEnum<'ctx>, EmitError> {
        if state.env.contains_key(&ty) {
            return self.single(state, ty);
        }
        let kind = match self.gir.type_node(ty) {
            Some(TypeNode::Data(_)) => Some((GlobalKind::Data, self.gir.value(ty).name.clone())),
            Some(TypeNode::Record(_)) => {
                Some((GlobalKind::Record, self.gir.value(ty).name.clone()))
            }
            _ => None,
        };
        match kind {
            Some((kind, name)) => {
                let symbol = mangle_metadata(kind, &name);
                let global = self
                    .llmod
                    .get_global(&symbol)
                    .ok_or_else(|| EmitError::Internal(format!("no metadata global {}", symbol)))?;
                Ok(global.as_pointer_value().into())
            }
            None => Err(EmitError::Internal(format!(
                "no runtime metadata for type '{}'",
                self.gir.value(ty).name
            ))),
        }
    }

    /// Whether a type position has a compile-time layout or needs the
    /// value-witness runtime.
    fn is_witness_sized(&self, ty: ValueId) -> bool {
        matches!(
            self.gir.type_node(ty),
            None | Some(TypeNode::Archetype { .. })
        )
    }

    // -- Primops -------------------------------------------------------------

    fn emit_primop(&self, state: &mut FunctionState<'ctx>, v: ValueId) -> Result<(), EmitError> {
        if !state.emitted.insert(v) {
            return Ok(());
        }
        let opcode = self.gir.primop(v).opcode.clone();
        let ops = self.gir.operand_values(v);
        let cg = self.cg();

        match opcode {
            Opcode::FunctionRef => {
                let dest = self.gir.function_ref_dest(v).expect("function_ref has a destination");
                if self.gir.continuation(dest).top_level {
                    let function = self.declare_function(dest)?;
                    state
                        .env
                        .insert(v, vec![function.as_global_value().as_pointer_value().into()]);
                } else {
                    // Only meaningful as a branch target; no scalars.
                    state.env.insert(v, Vec::new());
                }
            }

            Opcode::DataInit { constructor } => {
                let strategy = self.strategy(ops[0])?;
                let payload = match ops.get(1) {
                    Some(&p) => Some(self.single(state, p)?),
                    None => None,
                };
                let value = strategy.inject(&cg, &constructor, payload)?;
                state.env.insert(v, vec![value]);
            }

            Opcode::DataExtract { constructor } => {
                let scrutinee_ty = self.gir.ty_of(ops[0]);
                let strategy = self.strategy(scrutinee_ty)?;
                let scrutinee = self.single(state, ops[0])?;
                let value = strategy.project(&cg, scrutinee, &constructor)?;
                state.env.insert(v, vec![value]);
            }

            Opcode::Tuple => {
                let info = self.info(self.gir.ty_of(v))?;
                let struct_ty = info.llvm_type().into_struct_type();
                let mut aggregate = struct_ty.get_undef();
                for (index, &element) in ops.iter().enumerate() {
                    let value = self.single(state, element)?;
                    aggregate = self
                        .builder
                        .build_insert_value(aggregate, value, index as u32, "tuple")
                        .map_err(|e| EmitError::LlvmError(e.to_string()))?
                        .into_struct_value();
                }
                state.env.insert(v, vec![aggregate.into()]);
            }

            Opcode::TupleElementAddress { index } => {
                let addr = self.single(state, ops[0])?.into_pointer_value();
                let pointee = match self.gir.type_node(self.gir.ty_of(ops[0])) {
                    Some(TypeNode::Address { pointee }) => *pointee,
                    _ => return Err(EmitError::Internal("element address of a non-address".into())),
                };
                let struct_ty = self.info(pointee)?.llvm_type().into_struct_type();
                let element = self
                    .builder
                    .build_struct_gep(struct_ty, addr, index, "element")
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?;
                state.env.insert(v, vec![element.into()]);
            }

            Opcode::CopyValue => {
                let ty = self.gir.ty_of(ops[0]);
                if self.is_witness_sized(ty) {
                    let metadata = self.metadata_for(state, ty)?;
                    let source = self.single(state, ops[0])?;
                    let copy = runtime::call_runtime(
                        &cg,
                        "tarn_vw_copy",
                        &[metadata.into(), source.into()],
                    )?
                    .ok_or_else(|| EmitError::Internal("tarn_vw_copy returned void".into()))?;
                    state.env.insert(v, vec![copy]);
                } else {
                    let info = self.info(ty)?.as_loadable().ok_or_else(|| {
                        EmitError::Internal("copy_value of a non-loadable value".into())
                    })?;
                    let mut src = Explosion::of(self.scalars(state, ops[0])?);
                    let mut dst = Explosion::new();
                    info.copy(&cg, &mut src, &mut dst)?;
                    let values = dst.claim(info.explosion_size())?;
                    state.env.insert(v, values);
                }
            }

            Opcode::DestroyValue => {
                let ty = self.gir.ty_of(ops[0]);
                if self.is_witness_sized(ty) {
                    let metadata = self.metadata_for(state, ty)?;
                    let value = self.single(state, ops[0])?;
                    runtime::call_runtime(
                        &cg,
                        "tarn_vw_destroy",
                        &[metadata.into(), value.into()],
                    )?;
                } else {
                    let info = self.info(ty)?.as_loadable().ok_or_else(|| {
                        EmitError::Internal("destroy_value of a non-loadable value".into())
                    })?;
                    let mut ex = Explosion::of(self.scalars(state, ops[0])?);
                    info.consume(&cg, &mut ex)?;
                }
            }

            Opcode::Load { ownership } => {
                let addr = self.single(state, ops[0])?.into_pointer_value();
                let pointee = self.pointee_of(ops[0])?;
                let info = self.info(pointee)?.as_loadable().ok_or_else(|| {
                    EmitError::Internal("load of a runtime-sized value".into())
                })?;
                let mut out = Explosion::new();
                match ownership {
                    LoadOwnership::Copy => info.load_as_copy(&cg, addr, &mut out)?,
                    LoadOwnership::Take => info.load_as_take(&cg, addr, &mut out)?,
                }
                let values = out.claim(info.explosion_size())?;
                state.env.insert(v, values);
            }

            Opcode::Store => {
                let addr = self.single(state, ops[1])?.into_pointer_value();
                let pointee = self.pointee_of(ops[1])?;
                let info = self.info(pointee)?.as_loadable().ok_or_else(|| {
                    EmitError::Internal("store of a runtime-sized value".into())
                })?;
                let mut ex = Explosion::of(self.scalars(state, ops[0])?);
                info.initialize(&cg, addr, &mut ex)?;
                state.env.insert(v, vec![addr.into()]);
            }

            Opcode::Alloca { .. } => {
                let ty = ops[0];
                if self.is_witness_sized(ty) {
                    let metadata = self.metadata_for(state, ty)?;
                    let slot = runtime::call_runtime(&cg, "tarn_vw_alloc", &[metadata.into()])?
                        .ok_or_else(|| EmitError::Internal("tarn_vw_alloc returned void".into()))?;
                    state.env.insert(v, vec![slot]);
                } else {
                    let info = self.info(ty)?;
                    let slot = info.info().allocate_stack(&cg, &self.gir.value(v).name)?;
                    state.env.insert(v, vec![slot.into()]);
                }
            }

            Opcode::Dealloca => {
                let addr = self.single(state, ops[0])?.into_pointer_value();
                let pointee = self.pointee_of(ops[0])?;
                if self.is_witness_sized(pointee) {
                    let metadata = self.metadata_for(state, pointee)?;
                    runtime::call_runtime(
                        &cg,
                        "tarn_vw_dealloc",
                        &[metadata.into(), addr.into()],
                    )?;
                } else {
                    self.info(pointee)?.info().deallocate_stack(&cg, addr)?;
                }
            }

            Opcode::AllocBox => {
                let inner = ops[0];
                let boxed = if self.is_witness_sized(inner) {
                    let metadata = self.metadata_for(state, inner)?;
                    runtime::call_runtime(&cg, "tarn_vw_alloc", &[metadata.into()])?
                } else {
                    let size = self
                        .info(inner)?
                        .info()
                        .fixed_size()
                        .unwrap_or(0);
                    let size = self.context.i64_type().const_int(size, false);
                    runtime::call_runtime(&cg, "tarn_alloc", &[size.into()])?
                }
                .ok_or_else(|| EmitError::Internal("allocation returned void".into()))?;
                state.env.insert(v, vec![boxed]);
            }

            Opcode::ProjectBox => {
                // The runtime hands out the payload address; the refcount
                // header lives behind it.
                let boxed = self.single(state, ops[0])?;
                state.env.insert(v, vec![boxed]);
            }

            Opcode::DeallocBox => {
                let boxed = self.single(state, ops[0])?;
                runtime::call_runtime(&cg, "tarn_dealloc", &[boxed.into()])?;
            }

            Opcode::CopyAddress => {
                let src = self.single(state, ops[0])?.into_pointer_value();
                let dst = self.single(state, ops[1])?.into_pointer_value();
                let pointee = self.pointee_of(ops[1])?;
                if self.is_witness_sized(pointee) {
                    let metadata = self.metadata_for(state, pointee)?;
                    runtime::call_runtime(
                        &cg,
                        "tarn_vw_assign",
                        &[metadata.into(), dst.into(), src.into()],
                    )?;
                } else {
                    self.info(pointee)?.info().assign_with_copy(&cg, dst, src)?;
                }
                state.env.insert(v, vec![dst.into()]);
            }

            Opcode::DestroyAddress => {
                let addr = self.single(state, ops[0])?.into_pointer_value();
                let pointee = self.pointee_of(ops[0])?;
                if self.is_witness_sized(pointee) {
                    let metadata = self.metadata_for(state, pointee)?;
                    runtime::call_runtime(
                        &cg,
                        "tarn_vw_destroy",
                        &[metadata.into(), addr.into()],
                    )?;
                } else {
                    self.info(pointee)?.info().destroy_address(&cg, addr)?;
                }
            }

            Opcode::Thicken => {
                // The two-scalar (function, env) explosion of the thick
                // type info; thickening an already-thick value passes it
                // through.
                let scalars = self.scalars(state, ops[0])?;
                let pair = match scalars.as_slice() {
                    [function, env] => vec![*function, *env],
                    [function] => {
                        let null = self
                            .context
                            .ptr_type(AddressSpace::default())
                            .const_null();
                        vec![*function, null.into()]
                    }
                    _ => {
                        return Err(EmitError::Internal(
                            "thicken expects a function value".into(),
                        ))
                    }
                };
                state.env.insert(v, pair);
            }

            Opcode::ForceEffects => {
                let values = self.scalars(state, ops[0])?;
                state.env.insert(v, values);
            }

            Opcode::Apply => self.emit_apply(state, v, &ops)?,
            Opcode::SwitchConstr { cases, has_default } => {
                self.emit_switch_constr(state, &ops, &cases, has_default)?
            }
            Opcode::Unreachable => {
                self.builder
                    .build_unreachable()
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn pointee_of(&self, address: ValueId) -> Result<ValueId, EmitError> {
        match self.gir.type_node(self.gir.ty_of(address)) {
            Some(TypeNode::Address { pointee }) => Ok(*pointee),
            _ => Err(EmitError::Internal("expected an address-typed value".into())),
        }
    }

    // -- Control transfer ----------------------------------------------------

    /// Wires `args` into `dest`'s parameter phis from the current block
    /// and branches.
    fn branch_with_args(
        &self,
        state: &mut FunctionState<'ctx>,
        dest: ValueId,
        args: &[Vec<BasicValueEnum<'ctx>>],
    ) -> Result<(), EmitError> {
        let params = self.gir.continuation(dest).params.clone();
        if params.len() != args.len() {
            return Err(EmitError::Internal("branch argument count mismatch".into()));
        }
        let from = self
            .builder
            .get_insert_block()
            .ok_or_else(|| EmitError::Internal("builder is not positioned".into()))?;
        for (param, scalars) in params.iter().zip(args.iter()) {
            let phis = state
                .phis
                .get(param)
                .ok_or_else(|| EmitError::Internal("destination parameter has no phis".into()))?
                .clone();
            if phis.len() != scalars.len() {
                return Err(EmitError::Internal("phi arity mismatch".into()));
            }
            for (phi, value) in phis.iter().zip(scalars.iter()) {
                phi.add_incoming(&[(value, from)]);
            }
        }
        self.builder
            .build_unconditional_branch(state.blocks[&dest])
            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
        Ok(())
    }

    /// Emits the `ret` for a value flowing to the return continuation.
    /// Multi-scalar values are packed into the aggregate `return_abi`
    /// declared, the inverse of [`Emitter::unpack_result`].
    fn emit_return(
        &self,
        state: &mut FunctionState<'ctx>,
        args: &[ValueId],
    ) -> Result<(), EmitError> {
        match args {
            [] => {
                self.builder
                    .build_return(None)
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            }
            [result] => {
                let scalars = self.scalars(state, *result)?;
                match scalars.len() {
                    0 => {
                        self.builder
                            .build_return(None)
                            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
                    }
                    1 => {
                        self.builder
                            .build_return(Some(&scalars[0]))
                            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
                    }
                    _ => {
                        let struct_ty = self
                            .info(self.gir.ty_of(*result))?
                            .llvm_type()
                            .into_struct_type();
                        let mut packed = struct_ty.get_undef();
                        for (index, scalar) in scalars.iter().enumerate() {
                            packed = self
                                .builder
                                .build_insert_value(packed, *scalar, index as u32, "ret_pack")
                                .map_err(|e| EmitError::LlvmError(e.to_string()))?
                                .into_struct_value();
                        }
                        self.builder
                            .build_return(Some(&packed))
                            .map_err(|e| EmitError::LlvmError(e.to_string()))?;
                    }
                }
            }
            _ => {
                return Err(EmitError::Internal(
                    "return continuations take at most one value".into(),
                ))
            }
        }
        Ok(())
    }

    fn emit_apply(
        &self,
        state: &mut FunctionState<'ctx>,
        _apply: ValueId,
        ops: &[ValueId],
    ) -> Result<(), EmitError> {
        let callee = ops[0];
        let args = &ops[1..];

        // Return to the caller.
        if state.ret_param == Some(callee) {
            return self.emit_return(state, args);
        }

        // Known destination.
        if let Some(dest) = self.gir.function_ref_dest(callee) {
            if state.blocks.contains_key(&dest) {
                let arg_scalars: Vec<Vec<BasicValueEnum<'ctx>>> = args
                    .iter()
                    .map(|&a| self.scalars(state, a))
                    .collect::<Result<_, _>>()?;
                return self.branch_with_args(state, dest, &arg_scalars);
            }
            // A call to another function.
            let function = self.declare_function(dest)?;
            let (callee_data, callee_ret) = self.split_params(dest);
            return self.emit_call(state, args, callee_data.len(), callee_ret.is_some(), |cg, call_args| {
                cg.builder
                    .build_call(function, call_args, "call")
                    .map_err(|e| EmitError::LlvmError(e.to_string()))
                    .map(|c| c.try_as_basic_value().basic())
            });
        }

        // A first-class function value: indirect call through the thick
        // pair's function pointer.
        let callee_ty = self.gir.ty_of(callee);
        let arguments = match self.gir.type_node(callee_ty) {
            Some(TypeNode::Function { arguments }) => arguments.clone(),
            _ => return Err(EmitError::Internal("apply callee is not a function".into())),
        };
        let takes_ret = matches!(
            arguments.last().and_then(|&a| self.gir.type_node(a)),
            Some(TypeNode::Function { .. })
        );
        let data_count = if takes_ret { arguments.len() - 1 } else { arguments.len() };

        let mut abi_params: Vec<BasicMetadataTypeEnum<'ctx>> = Vec::new();
        for &arg_ty in &arguments[..data_count] {
            let info = self.info(arg_ty)?;
            match info {
                AnyTypeInfo::Loadable(loadable) => {
                    for ty in loadable.schema().element_types() {
                        abi_params.push(ty.into());
                    }
                }
                AnyTypeInfo::Indirect(_) => {
                    abi_params.push(self.context.ptr_type(AddressSpace::default()).into())
                }
            }
        }
        let ret_ty = if takes_ret {
            let ret_args = match self.gir.type_node(*arguments.last().unwrap()) {
                Some(TypeNode::Function { arguments }) => arguments.clone(),
                _ => Vec::new(),
            };
            match ret_args.first() {
                Some(&first) => {
                    let info = self.info(first)?;
                    match &info {
                        AnyTypeInfo::Loadable(loadable) if loadable.explosion_size() == 0 => None,
                        AnyTypeInfo::Loadable(loadable) if loadable.explosion_size() == 1 => {
                            Some(loadable.schema().element_types()[0])
                        }
                        AnyTypeInfo::Loadable(_) => Some(info.llvm_type()),
                        AnyTypeInfo::Indirect(_) => {
                            Some(self.context.ptr_type(AddressSpace::default()).into())
                        }
                    }
                }
                None => None,
            }
        } else {
            None
        };
        let fn_type = match ret_ty {
            Some(ty) => ty.fn_type(&abi_params, false),
            None => self.context.void_type().fn_type(&abi_params, false),
        };

        let callee_scalars = self.scalars(state, callee)?;
        let fn_ptr = match callee_scalars.as_slice() {
            [pair] if pair.is_struct_value() => self
                .builder
                .build_extract_value(pair.into_struct_value(), 0, "thick_fn")
                .map_err(|e| EmitError::LlvmError(e.to_string()))?
                .into_pointer_value(),
            [fn_ptr, _env] => fn_ptr.into_pointer_value(),
            [fn_ptr] => fn_ptr.into_pointer_value(),
            _ => return Err(EmitError::Internal("malformed function value".into())),
        };

        self.emit_call(state, args, data_count, takes_ret, |cg, call_args| {
            cg.builder
                .build_indirect_call(fn_type, fn_ptr, call_args, "icall")
                .map_err(|e| EmitError::LlvmError(e.to_string()))
                .map(|c| c.try_as_basic_value().basic())
        })
    }

    /// Shared tail of direct and indirect calls: flatten the data
    /// arguments, issue the call, then return or branch along the
    /// continuation argument.
    fn emit_call(
        &self,
        state: &mut FunctionState<'ctx>,
        args: &[ValueId],
        data_count: usize,
        takes_ret: bool,
        build: impl FnOnce(
            &EmitCtx<'a, 'ctx>,
            &[inkwell::values::BasicMetadataValueEnum<'ctx>],
        ) -> Result<Option<BasicValueEnum<'ctx>>, EmitError>,
    ) -> Result<(), EmitError> {
        if args.len() != data_count + usize::from(takes_ret) {
            return Err(EmitError::Internal("call arity mismatch".into()));
        }
        let mut call_args: Vec<inkwell::values::BasicMetadataValueEnum<'ctx>> = Vec::new();
        for &arg in &args[..data_count] {
            for scalar in self.scalars(state, arg)? {
                call_args.push(scalar.into());
            }
        }
        let cg = self.cg();
        let result = build(&cg, &call_args)?;

        if !takes_ret {
            // The callee never returns.
            self.builder
                .build_unreachable()
                .map_err(|e| EmitError::LlvmError(e.to_string()))?;
            return Ok(());
        }

        let continuation = args[data_count];
        // Tail position: our own return continuation.
        if state.ret_param == Some(continuation) {
            match result {
                Some(value) => self
                    .builder
                    .build_return(Some(&value))
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?,
                None => self
                    .builder
                    .build_return(None)
                    .map_err(|e| EmitError::LlvmError(e.to_string()))?,
            };
            return Ok(());
        }
        // The result flows into a local continuation: re-explode the
        // ABI-packed result into the per-scalar form its parameter phis
        // expect.
        if let Some(dest) = self.gir.function_ref_dest(continuation) {
            if state.blocks.contains_key(&dest) {
                let params = self.gir.continuation(dest).params.clone();
                let arg_scalars = match params.first() {
                    None => Vec::new(),
                    Some(&param) => {
                        vec![self.unpack_result(result, self.gir.ty_of(param))?]
                    }
                };
                return self.branch_with_args(state, dest, &arg_scalars);
            }
        }
        Err(EmitError::Internal("unsupported continuation argument".into()))
    }

    /// The inverse of the `return_abi` packing: a call result of a
    /// multi-scalar loadable type travels as one aggregate and is taken
    /// apart field by field; single scalars and indirect pointers pass
    /// through; zero-scalar types carry no value at all.
    fn unpack_result(
        &self,
        result: Option<BasicValueEnum<'ctx>>,
        ty: ValueId,
    ) -> Result<Vec<BasicValueEnum<'ctx>>, EmitError> {
        let info = self.info(ty)?;
        let count = match &info {
            AnyTypeInfo::Loadable(loadable) => loadable.explosion_size(),
            AnyTypeInfo::Indirect(_) => 1,
        };
        match (count, result) {
            (0, _) => Ok(Vec::new()),
            (1, Some(value)) => Ok(vec![value]),
            (_, Some(value)) => {
                let packed = value.into_struct_value();
                let mut scalars = Vec::with_capacity(count);
                for index in 0..count {
                    let part = self
                        .builder
                        .build_extract_value(packed, index as u32, "result_part")
                        .map_err(|e| EmitError::LlvmError(e.to_string()))?;
                    scalars.push(part);
                }
                Ok(scalars)
            }
            (_, None) => Err(EmitError::Internal("call produced no result to pass on".into())),
        }
    }

    fn emit_switch_constr(
        &self,
        state: &mut FunctionState<'ctx>,
        ops: &[ValueId],
        cases: &[String],
        has_default: bool,
    ) -> Result<(), EmitError> {
        let scrutinee_ty = self.gir.ty_of(ops[0]);
        let strategy = self.strategy(scrutinee_ty)?;
        let scrutinee = self.single(state, ops[0])?;

        let block_of = |fr: ValueId| -> Result<BasicBlock<'ctx>, EmitError> {
            let dest = self
                .gir
                .function_ref_dest(fr)
                .ok_or_else(|| EmitError::Internal("switch destination is not a function_ref".into()))?;
            state
                .blocks
                .get(&dest)
                .copied()
                .ok_or_else(|| EmitError::Internal("switch destination is out of scope".into()))
        };

        let mut case_blocks = Vec::with_capacity(cases.len());
        for (name, &fr) in cases.iter().zip(ops[1..1 + cases.len()].iter()) {
            case_blocks.push((name.clone(), block_of(fr)?));
        }
        let default = if has_default {
            Some(block_of(*ops.last().unwrap())?)
        } else {
            None
        };

        strategy.emit_switch(&self.cg(), scrutinee, &case_blocks, default)
    }
}
