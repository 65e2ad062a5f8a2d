//! Construction API for the GraphIR.
//!
//! The [`Builder`] is the invariant-maintaining front door for creating
//! continuations and primops. Every constructor checks its typing contract
//! and returns [`GirError::IllTypedConstruction`] on violation, so a module
//! built exclusively through the builder verifies by construction.
//!
//! Terminal constructors (`apply`, `switch_constr`, `unreachable`) set the
//! continuation's terminal and thread successor records for every
//! `function_ref` operand. Cleanup primops go through
//! [`Builder::insert_cleanup`] so they are marked for the scheduler and
//! skipped by analyses that only care about regular uses.

use crate::error::GirError;
use crate::id::ValueId;
use crate::module::Module;
use crate::primop::{AllocKind, LoadOwnership, Opcode};
use crate::types::{TypeCategory, TypeNode};
use crate::value::Ownership;

/// IR builder borrowing the module it mutates.
pub struct Builder<'m> {
    module: &'m mut Module,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Builder { module }
    }

    /// The module under construction.
    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    fn ill_typed(reason: impl Into<String>) -> GirError {
        GirError::IllTypedConstruction { reason: reason.into() }
    }

    /// `true` when `expected` is a concrete type that must match exactly.
    /// Dependent positions (a parameter or archetype standing in type
    /// position) accept any argument; deciding them would require
    /// substitution, which is the frontend's job.
    fn requires_exact(&self, expected: ValueId) -> bool {
        !matches!(
            self.module.type_node(expected),
            None | Some(TypeNode::Archetype { .. })
        )
    }

    // -----------------------------------------------------------------------
    // Continuations and parameters
    // -----------------------------------------------------------------------

    /// Creates a top-level continuation (a function of the module).
    pub fn continuation(&mut self, name: &str) -> ValueId {
        self.module.new_continuation(name, true)
    }

    /// Creates an inner continuation (a basic block of some scope).
    pub fn inner_continuation(&mut self, name: &str) -> ValueId {
        self.module.new_continuation(name, false)
    }

    /// Appends a parameter to a continuation.
    pub fn parameter(
        &mut self,
        cont: ValueId,
        name: &str,
        ty: ValueId,
        ownership: Ownership,
    ) -> Result<ValueId, GirError> {
        if self.module.try_value(cont).and_then(|v| v.as_continuation()).is_none() {
            return Err(Self::ill_typed("parameter target is not a continuation"));
        }
        if self.module.continuation(cont).terminal.is_some() {
            return Err(Self::ill_typed("cannot add parameters after the terminal is set"));
        }
        Ok(self.module.add_param(cont, name, ty, ownership))
    }

    // -----------------------------------------------------------------------
    // Terminals
    // -----------------------------------------------------------------------

    fn check_no_terminal(&self, cont: ValueId) -> Result<(), GirError> {
        match self.module.try_value(cont).and_then(|v| v.as_continuation()) {
            None => Err(Self::ill_typed("terminal target is not a continuation")),
            Some(c) if c.terminal.is_some() => {
                Err(Self::ill_typed("continuation already has a terminal"))
            }
            Some(_) => Ok(()),
        }
    }

    /// Transfers control to `callee` with `args`, ending `cont`.
    pub fn apply(
        &mut self,
        cont: ValueId,
        callee: ValueId,
        args: &[ValueId],
    ) -> Result<ValueId, GirError> {
        self.check_no_terminal(cont)?;
        let callee_ty = self.module.ty_of(callee);
        let expected: Vec<ValueId> = match self.module.type_node(callee_ty) {
            Some(TypeNode::Function { arguments }) => arguments.clone(),
            _ => return Err(Self::ill_typed("apply callee is not of function type")),
        };
        if expected.len() != args.len() {
            return Err(Self::ill_typed(format!(
                "apply arity mismatch: callee takes {}, got {}",
                expected.len(),
                args.len()
            )));
        }
        for (i, (&arg, &want)) in args.iter().zip(expected.iter()).enumerate() {
            let got = self.module.ty_of(arg);
            if self.requires_exact(want) && got != want {
                return Err(Self::ill_typed(format!(
                    "apply argument {} type mismatch",
                    i
                )));
            }
        }

        let mut operands = Vec::with_capacity(args.len() + 1);
        operands.push(callee);
        operands.extend_from_slice(args);
        let bottom = self.module.bottom_type();
        let primop = self.module.new_primop("apply", bottom, Opcode::Apply, &operands);
        self.module.set_terminal(cont, primop);
        Ok(primop)
    }

    /// Ends `cont` by dispatching on the scrutinee's constructor tag.
    ///
    /// `cases` pairs constructor names with `function_ref` destination
    /// values; `default`, when present, is appended as the final operand.
    pub fn switch_constr(
        &mut self,
        cont: ValueId,
        scrutinee: ValueId,
        cases: &[(String, ValueId)],
        default: Option<ValueId>,
    ) -> Result<ValueId, GirError> {
        self.check_no_terminal(cont)?;
        let scrutinee_ty = self.module.ty_of(scrutinee);
        let known: Vec<String> = match self.module.data_def(scrutinee_ty) {
            Some(def) => def.constructors.keys().cloned().collect(),
            None => return Err(Self::ill_typed("switch_constr scrutinee is not of data type")),
        };
        for (name, dest) in cases {
            if !known.iter().any(|k| k == name) {
                return Err(Self::ill_typed(format!(
                    "switch_constr names unknown constructor '{}'",
                    name
                )));
            }
            let dest_ty = self.module.ty_of(*dest);
            if !matches!(self.module.type_node(dest_ty), Some(TypeNode::Function { .. })) {
                return Err(Self::ill_typed("switch_constr destination is not of function type"));
            }
        }

        let mut operands = Vec::with_capacity(cases.len() + 2);
        operands.push(scrutinee);
        operands.extend(cases.iter().map(|(_, d)| *d));
        if let Some(d) = default {
            operands.push(d);
        }
        let opcode = Opcode::SwitchConstr {
            cases: cases.iter().map(|(n, _)| n.clone()).collect(),
            has_default: default.is_some(),
        };
        let bottom = self.module.bottom_type();
        let primop = self.module.new_primop("switch", bottom, opcode, &operands);
        self.module.set_terminal(cont, primop);
        Ok(primop)
    }

    /// Ends `cont` with an unreachable terminal.
    pub fn unreachable(&mut self, cont: ValueId) -> Result<ValueId, GirError> {
        self.check_no_terminal(cont)?;
        let bottom = self.module.bottom_type();
        let primop = self.module.new_primop("unreachable", bottom, Opcode::Unreachable, &[]);
        self.module.set_terminal(cont, primop);
        Ok(primop)
    }

    // -----------------------------------------------------------------------
    // Function values
    // -----------------------------------------------------------------------

    /// References a continuation as a first-class function value.
    pub fn function_ref(&mut self, dest: ValueId) -> Result<ValueId, GirError> {
        if self.module.try_value(dest).and_then(|v| v.as_continuation()).is_none() {
            return Err(Self::ill_typed("function_ref target is not a continuation"));
        }
        let ty = self.module.ty_of(dest);
        Ok(self.module.new_primop("fr", ty, Opcode::FunctionRef, &[dest]))
    }

    /// Pairs a function value with an empty environment.
    pub fn thicken(&mut self, function: ValueId) -> Result<ValueId, GirError> {
        let ty = self.module.ty_of(function);
        if !matches!(self.module.type_node(ty), Some(TypeNode::Function { .. })) {
            return Err(Self::ill_typed("thicken operand is not of function type"));
        }
        Ok(self.module.new_primop("thick", ty, Opcode::Thicken, &[function]))
    }

    /// Pass-through effect barrier.
    pub fn force_effects(&mut self, value: ValueId) -> Result<ValueId, GirError> {
        let ty = self.module.ty_of(value);
        Ok(self.module.new_primop("force", ty, Opcode::ForceEffects, &[value]))
    }

    // -----------------------------------------------------------------------
    // Data types and tuples
    // -----------------------------------------------------------------------

    /// Constructs a data-type value with a named constructor.
    pub fn data_init(
        &mut self,
        ty: ValueId,
        constructor: &str,
        payload: Option<ValueId>,
    ) -> Result<ValueId, GirError> {
        let ctor = match self.module.data_def(ty).and_then(|d| d.constructors.get(constructor)) {
            Some(c) => c.clone(),
            None => {
                return Err(Self::ill_typed(format!(
                    "data_init names unknown constructor '{}'",
                    constructor
                )))
            }
        };
        match (ctor.payload, payload) {
            (Some(want), Some(arg)) => {
                let got = self.module.ty_of(arg);
                if self.requires_exact(want) && got != want {
                    return Err(Self::ill_typed("data_init payload type mismatch"));
                }
            }
            (None, Some(_)) => {
                return Err(Self::ill_typed(format!(
                    "constructor '{}' takes no payload",
                    constructor
                )))
            }
            (Some(_), None) => {
                return Err(Self::ill_typed(format!(
                    "constructor '{}' requires a payload",
                    constructor
                )))
            }
            (None, None) => {}
        }

        let mut operands = vec![ty];
        operands.extend(payload);
        let opcode = Opcode::DataInit { constructor: constructor.to_string() };
        Ok(self.module.new_primop("init", ty, opcode, &operands))
    }

    /// Extracts a known constructor's payload. Only meaningful where the
    /// tag is known (under the matching `switch_constr` arm).
    pub fn data_extract(
        &mut self,
        value: ValueId,
        constructor: &str,
        payload_ty: ValueId,
    ) -> Result<ValueId, GirError> {
        let scrutinee_ty = self.module.ty_of(value);
        let ctor = match self
            .module
            .data_def(scrutinee_ty)
            .and_then(|d| d.constructors.get(constructor))
        {
            Some(c) => c.clone(),
            None => {
                return Err(Self::ill_typed(format!(
                    "data_extract names unknown constructor '{}'",
                    constructor
                )))
            }
        };
        match ctor.payload {
            Some(want) if self.requires_exact(want) && want != payload_ty => {
                return Err(Self::ill_typed("data_extract payload type mismatch"))
            }
            None => {
                return Err(Self::ill_typed(format!(
                    "constructor '{}' has no payload to extract",
                    constructor
                )))
            }
            _ => {}
        }
        let opcode = Opcode::DataExtract { constructor: constructor.to_string() };
        Ok(self.module.new_primop("extract", payload_ty, opcode, &[value]))
    }

    /// Builds a tuple from element values.
    pub fn tuple(&mut self, elements: &[ValueId]) -> Result<ValueId, GirError> {
        let tys: Vec<ValueId> = elements.iter().map(|&e| self.module.ty_of(e)).collect();
        let ty = self.module.tuple_type(tys);
        Ok(self.module.new_primop("tuple", ty, Opcode::Tuple, elements))
    }

    /// Address of one element of an in-memory tuple.
    pub fn tuple_element_address(
        &mut self,
        address: ValueId,
        index: u32,
    ) -> Result<ValueId, GirError> {
        let addr_ty = self.module.ty_of(address);
        let elements = match self.module.type_node(addr_ty) {
            Some(TypeNode::Address { pointee }) => match self.module.type_node(*pointee) {
                Some(TypeNode::Tuple { elements }) => elements.clone(),
                _ => return Err(Self::ill_typed("tuple_element_address pointee is not a tuple")),
            },
            _ => return Err(Self::ill_typed("tuple_element_address operand is not an address")),
        };
        let element = *elements
            .get(index as usize)
            .ok_or_else(|| Self::ill_typed("tuple_element_address index out of range"))?;
        let ty = self.module.address_type(element);
        let opcode = Opcode::TupleElementAddress { index };
        Ok(self.module.new_primop("elem", ty, opcode, &[address]))
    }

    // -----------------------------------------------------------------------
    // Ownership
    // -----------------------------------------------------------------------

    /// Copies a value, retaining reference-counted payloads.
    pub fn copy_value(&mut self, value: ValueId) -> Result<ValueId, GirError> {
        let ty = self.module.ty_of(value);
        if self.module.category(ty) == TypeCategory::Address {
            return Err(Self::ill_typed("copy_value operand must be object category"));
        }
        Ok(self.module.new_primop("copy", ty, Opcode::CopyValue, &[value]))
    }

    /// Consumes a value.
    pub fn destroy_value(&mut self, value: ValueId) -> Result<ValueId, GirError> {
        let bottom = self.module.bottom_type();
        Ok(self.module.new_primop("destroy", bottom, Opcode::DestroyValue, &[value]))
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    fn pointee_of(&self, address: ValueId) -> Result<ValueId, GirError> {
        let addr_ty = self.module.ty_of(address);
        match self.module.type_node(addr_ty) {
            Some(TypeNode::Address { pointee }) => Ok(*pointee),
            _ => Err(Self::ill_typed("operand must be address category")),
        }
    }

    /// Reads an object value out of an address.
    pub fn load(&mut self, address: ValueId, ownership: LoadOwnership) -> Result<ValueId, GirError> {
        let pointee = self.pointee_of(address)?;
        Ok(self.module.new_primop("load", pointee, Opcode::Load { ownership }, &[address]))
    }

    /// Writes an object value to an address. The result is the written-to
    /// address; loads that must observe the store take it as their operand.
    pub fn store(&mut self, value: ValueId, address: ValueId) -> Result<ValueId, GirError> {
        let pointee = self.pointee_of(address)?;
        let got = self.module.ty_of(value);
        if self.requires_exact(pointee) && got != pointee {
            return Err(Self::ill_typed("store value type does not match the address"));
        }
        let addr_ty = self.module.ty_of(address);
        Ok(self.module.new_primop("store", addr_ty, Opcode::Store, &[value, address]))
    }

    /// Allocates a slot for a type, yielding its address.
    pub fn alloca(&mut self, ty: ValueId, kind: AllocKind) -> Result<ValueId, GirError> {
        let result = self.module.address_type(ty);
        Ok(self.module.new_primop("slot", result, Opcode::Alloca { kind }, &[ty]))
    }

    /// Releases an `alloca` slot.
    pub fn dealloca(&mut self, address: ValueId) -> Result<ValueId, GirError> {
        self.pointee_of(address)?;
        let bottom = self.module.bottom_type();
        Ok(self.module.new_primop("free", bottom, Opcode::Dealloca, &[address]))
    }

    // -----------------------------------------------------------------------
    // Boxes
    // -----------------------------------------------------------------------

    /// Allocates a reference-counted box for a type.
    pub fn alloc_box(&mut self, ty: ValueId) -> Result<ValueId, GirError> {
        let result = self.module.box_type(ty);
        Ok(self.module.new_primop("box", result, Opcode::AllocBox, &[ty]))
    }

    /// Address of a box's payload.
    pub fn project_box(&mut self, boxed: ValueId) -> Result<ValueId, GirError> {
        let box_ty = self.module.ty_of(boxed);
        let inner = match self.module.type_node(box_ty) {
            Some(TypeNode::Box { inner }) => *inner,
            _ => return Err(Self::ill_typed("project_box operand is not a box")),
        };
        let result = self.module.address_type(inner);
        Ok(self.module.new_primop("proj", result, Opcode::ProjectBox, &[boxed]))
    }

    /// Frees a box without destroying its payload.
    pub fn dealloc_box(&mut self, boxed: ValueId) -> Result<ValueId, GirError> {
        let box_ty = self.module.ty_of(boxed);
        if !matches!(self.module.type_node(box_ty), Some(TypeNode::Box { .. })) {
            return Err(Self::ill_typed("dealloc_box operand is not a box"));
        }
        let bottom = self.module.bottom_type();
        Ok(self.module.new_primop("unbox", bottom, Opcode::DeallocBox, &[boxed]))
    }

    // -----------------------------------------------------------------------
    // Address-level value operations
    // -----------------------------------------------------------------------

    /// Initializes `dst` with a copy of the value at `src`. The result is
    /// the initialized `dst` address, threading memory state like `store`.
    pub fn copy_address(&mut self, src: ValueId, dst: ValueId) -> Result<ValueId, GirError> {
        let src_pointee = self.pointee_of(src)?;
        let dst_pointee = self.pointee_of(dst)?;
        if self.requires_exact(src_pointee) && src_pointee != dst_pointee {
            return Err(Self::ill_typed("copy_address pointee types differ"));
        }
        let dst_ty = self.module.ty_of(dst);
        Ok(self.module.new_primop("copyaddr", dst_ty, Opcode::CopyAddress, &[src, dst]))
    }

    /// Destroys the value at an address in place.
    pub fn destroy_address(&mut self, address: ValueId) -> Result<ValueId, GirError> {
        self.pointee_of(address)?;
        let bottom = self.module.bottom_type();
        Ok(self.module.new_primop("destroyaddr", bottom, Opcode::DestroyAddress, &[address]))
    }

    // -----------------------------------------------------------------------
    // Cleanups
    // -----------------------------------------------------------------------

    /// Creates a destroy/deallocate primop routed through `cont`'s cleanup
    /// list: skipped as a regular user by most analyses, emitted
    /// immediately before the terminal by the scheduler.
    pub fn insert_cleanup(
        &mut self,
        cont: ValueId,
        opcode: Opcode,
        operand: ValueId,
    ) -> Result<ValueId, GirError> {
        if !opcode.is_cleanup_kind() {
            return Err(Self::ill_typed(format!(
                "'{}' is not a cleanup opcode",
                opcode.mnemonic()
            )));
        }
        if self.module.try_value(cont).and_then(|v| v.as_continuation()).is_none() {
            return Err(Self::ill_typed("cleanup target is not a continuation"));
        }
        let bottom = self.module.bottom_type();
        let primop = self.module.new_primop("cleanup", bottom, opcode, &[operand]);
        self.module.add_cleanup(cont, primop);
        Ok(primop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `(x : T) -> ret : (T) -> Bottom`, the smallest well-typed function.
    fn tiny_function(module: &mut Module) -> (ValueId, ValueId, ValueId) {
        let mut b = Builder::new(module);
        let t = b.module().archetype("t");
        let entry = b.continuation("f");
        let x = b.parameter(entry, "x", t, Ownership::Owned).unwrap();
        let ret_ty = b.module().function_type(vec![t]);
        let ret = b.parameter(entry, "ret", ret_ty, Ownership::Owned).unwrap();
        (entry, x, ret)
    }

    #[test]
    fn apply_checks_arity() {
        let mut module = Module::new("m");
        let (entry, x, ret) = tiny_function(&mut module);
        let mut b = Builder::new(&mut module);
        let err = b.apply(entry, ret, &[x, x]).unwrap_err();
        assert!(matches!(err, GirError::IllTypedConstruction { .. }));
        // The right arity goes through and becomes the terminal.
        b.apply(entry, ret, &[x]).unwrap();
        assert!(module.continuation(entry).terminal.is_some());
    }

    #[test]
    fn apply_rejects_non_function_callee() {
        let mut module = Module::new("m");
        let (entry, x, _) = tiny_function(&mut module);
        let mut b = Builder::new(&mut module);
        let err = b.apply(entry, x, &[]).unwrap_err();
        assert!(matches!(err, GirError::IllTypedConstruction { .. }));
    }

    #[test]
    fn second_terminal_is_rejected() {
        let mut module = Module::new("m");
        let (entry, x, ret) = tiny_function(&mut module);
        let mut b = Builder::new(&mut module);
        b.apply(entry, ret, &[x]).unwrap();
        let err = b.unreachable(entry).unwrap_err();
        assert!(matches!(err, GirError::IllTypedConstruction { .. }));
    }

    #[test]
    fn data_init_checks_constructor_and_payload() {
        let mut module = Module::new("m");
        let nat = module.declare_data("Nat");
        module
            .define_data("Nat", vec![("zero".into(), None), ("succ".into(), Some(nat))])
            .unwrap();
        let mut b = Builder::new(&mut module);

        let zero = b.data_init(nat, "zero", None).unwrap();
        assert!(b.data_init(nat, "three", None).is_err());
        assert!(b.data_init(nat, "zero", Some(zero)).is_err());
        assert!(b.data_init(nat, "succ", None).is_err());
        let one = b.data_init(nat, "succ", Some(zero)).unwrap();
        assert_eq!(module.ty_of(one), nat);
    }

    #[test]
    fn switch_constr_threads_successors() {
        let mut module = Module::new("m");
        let bit = module
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();
        let mut b = Builder::new(&mut module);
        let entry = b.continuation("f");
        let s = b.parameter(entry, "s", bit, Ownership::Owned).unwrap();
        let lo = b.inner_continuation("lo");
        let hi = b.inner_continuation("hi");
        let lo_ref = b.function_ref(lo).unwrap();
        let hi_ref = b.function_ref(hi).unwrap();
        b.switch_constr(entry, s, &[("lo".into(), lo_ref), ("hi".into(), hi_ref)], None)
            .unwrap();

        assert_eq!(module.pred_conts(lo), vec![entry]);
        assert_eq!(module.pred_conts(hi), vec![entry]);
        assert_eq!(module.succ_conts(entry), vec![lo, hi]);
    }

    #[test]
    fn memory_ops_respect_address_category() {
        let mut module = Module::new("m");
        let nat = module
            .define_data("Nat", vec![("zero".into(), None)])
            .unwrap();
        let mut b = Builder::new(&mut module);
        let slot = b.alloca(nat, AllocKind::Stack).unwrap();
        let zero = b.data_init(nat, "zero", None).unwrap();
        b.store(zero, slot).unwrap();
        let loaded = b.load(slot, LoadOwnership::Copy).unwrap();
        assert_eq!(module.ty_of(loaded), nat);

        // A non-address operand is rejected.
        let mut b = Builder::new(&mut module);
        assert!(b.load(zero, LoadOwnership::Copy).is_err());
        assert!(b.dealloca(zero).is_err());
    }

    #[test]
    fn cleanup_must_be_destroy_kind() {
        let mut module = Module::new("m");
        let (entry, x, _ret) = tiny_function(&mut module);
        let mut b = Builder::new(&mut module);
        assert!(b.insert_cleanup(entry, Opcode::CopyValue, x).is_err());
        let cleanup = b.insert_cleanup(entry, Opcode::DestroyValue, x).unwrap();
        assert!(module.primop(cleanup).cleanup);
        assert_eq!(module.continuation(entry).cleanups, vec![cleanup]);
        // Cleanup uses are invisible to regular-user iteration.
        assert_eq!(module.regular_users(x).count(), 0);
        assert_eq!(module.users(x).count(), 1);
    }

    #[test]
    fn tuple_element_address_types() {
        let mut module = Module::new("m");
        let a = module.define_data("A", vec![("a".into(), None)]).unwrap();
        let b_ty = module.define_data("B", vec![("b".into(), None)]).unwrap();
        let pair = module.tuple_type(vec![a, b_ty]);
        let mut b = Builder::new(&mut module);
        let slot = b.alloca(pair, AllocKind::Stack).unwrap();
        let second = b.tuple_element_address(slot, 1).unwrap();
        let expected = module.address_type(b_ty);
        assert_eq!(module.ty_of(second), expected);
        let mut b = Builder::new(&mut module);
        assert!(b.tuple_element_address(slot, 2).is_err());
    }
}
