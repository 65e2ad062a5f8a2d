//! The module: arena owner and single mutation entry point of the GraphIR.
//!
//! A [`Module`] owns three arenas (values, operands, successor records),
//! the list of top-level continuations, and the uniqued type table. All
//! structural mutation -- use-chain updates, successor threading, removal --
//! goes through `&mut Module` so the intrusive lists stay consistent.
//!
//! Arena slots are tombstoned on removal and IDs are never reused, so a
//! [`ValueId`] is a stable identity for the lifetime of the module.
//!
//! Type values are interned with `getOrInsert` semantics over a structural
//! key: after interning, `ValueId` equality *is* type equality. The
//! `bottom_type` and `type_type` singletons are created at module
//! construction and live as ordinary fields, not global state.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::error::GirError;
use crate::id::{OperandId, SuccessorId, ValueId};
use crate::primop::{Opcode, Primop};
use crate::types::{Constructor, DataDef, RecordDef, TypeCategory, TypeKey, TypeNode};
use crate::value::{Continuation, Operand, Ownership, Parameter, Successor, Value, ValueKind};

/// The GraphIR module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Module name, used by the textual writer and the mangler.
    pub name: String,
    values: Vec<Option<Value>>,
    operands: Vec<Option<Operand>>,
    successors: Vec<Option<Successor>>,
    /// Top-level continuations in definition order.
    top_level: Vec<ValueId>,
    /// Uniqued type table.
    type_table: IndexMap<TypeKey, ValueId>,
    bottom_type: ValueId,
    type_type: ValueId,
    type_metadata_type: ValueId,
    /// Name uniquification state.
    used_names: HashSet<String>,
    name_counters: HashMap<String, u32>,
}

impl Module {
    /// Creates an empty module with the three type singletons interned.
    pub fn new(name: &str) -> Self {
        let mut module = Module {
            name: name.to_string(),
            values: Vec::new(),
            operands: Vec::new(),
            successors: Vec::new(),
            top_level: Vec::new(),
            type_table: IndexMap::new(),
            bottom_type: ValueId(0),
            type_type: ValueId(0),
            type_metadata_type: ValueId(0),
            used_names: HashSet::new(),
            name_counters: HashMap::new(),
        };

        // `Type` is its own type, so it must be allocated first and then
        // patched to reference itself.
        let type_type = module.alloc_value("Type", ValueId(0), ValueKind::Type(TypeNode::Type));
        module.value_mut(type_type).ty = type_type;
        module.type_type = type_type;
        module.type_table.insert(TypeKey::Type, type_type);

        module.bottom_type = module.intern(TypeKey::Bottom, TypeNode::Bottom, "Bottom");
        module.type_metadata_type =
            module.intern(TypeKey::TypeMetadata, TypeNode::TypeMetadata, "TypeMetadata");
        module
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    /// Resolves a value ID. Panics on a dangling ID; handing one in is a
    /// caller bug, not a recoverable condition.
    pub fn value(&self, id: ValueId) -> &Value {
        self.values[id.0 as usize].as_ref().expect("dangling value id")
    }

    /// Resolves a value ID, returning `None` for dead or out-of-range IDs.
    pub fn try_value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    pub(crate) fn value_mut(&mut self, id: ValueId) -> &mut Value {
        self.values[id.0 as usize].as_mut().expect("dangling value id")
    }

    /// Resolves an operand ID.
    pub fn operand(&self, id: OperandId) -> &Operand {
        self.operands[id.0 as usize].as_ref().expect("dangling operand id")
    }

    fn operand_mut(&mut self, id: OperandId) -> &mut Operand {
        self.operands[id.0 as usize].as_mut().expect("dangling operand id")
    }

    /// Resolves a successor-record ID.
    pub fn successor(&self, id: SuccessorId) -> &Successor {
        self.successors[id.0 as usize].as_ref().expect("dangling successor id")
    }

    pub(crate) fn successor_mut(&mut self, id: SuccessorId) -> &mut Successor {
        self.successors[id.0 as usize].as_mut().expect("dangling successor id")
    }

    /// Top-level continuations in definition order.
    pub fn top_level(&self) -> &[ValueId] {
        &self.top_level
    }

    /// Iterates every live value in the module.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().filter_map(|slot| slot.as_ref())
    }

    /// The type of a value.
    pub fn ty_of(&self, v: ValueId) -> ValueId {
        self.value(v).ty
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    /// Returns `base` if unused, otherwise `base.N` with a per-base
    /// monotonic counter.
    pub fn fresh_name(&mut self, base: &str) -> String {
        if self.used_names.insert(base.to_string()) {
            return base.to_string();
        }
        let counter = self.name_counters.entry(base.to_string()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}.{}", base, counter);
            if self.used_names.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Value allocation
    // -----------------------------------------------------------------------

    fn alloc_value(&mut self, name: &str, ty: ValueId, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        let name = self.fresh_name(name);
        self.values.push(Some(Value {
            id,
            name,
            ty,
            kind,
            first_use: None,
        }));
        id
    }

    /// Creates a continuation value. Its function type starts empty and is
    /// refreshed as parameters are added.
    pub fn new_continuation(&mut self, name: &str, top_level: bool) -> ValueId {
        let ty = self.function_type(Vec::new());
        let id = self.alloc_value(name, ty, ValueKind::Continuation(Continuation::new(top_level)));
        if top_level {
            self.top_level.push(id);
        }
        id
    }

    /// Appends a parameter to a continuation and refreshes the
    /// continuation's function type.
    pub fn add_param(
        &mut self,
        cont: ValueId,
        name: &str,
        ty: ValueId,
        ownership: Ownership,
    ) -> ValueId {
        let index = self.continuation(cont).params.len() as u32;
        let param = self.alloc_value(
            name,
            ty,
            ValueKind::Parameter(Parameter { continuation: cont, index, ownership }),
        );
        self.continuation_mut(cont).params.push(param);

        let param_tys: Vec<ValueId> =
            self.continuation(cont).params.iter().map(|&p| self.value(p).ty).collect();
        let fn_ty = self.function_type(param_tys);
        self.value_mut(cont).ty = fn_ty;
        param
    }

    /// Creates a primop value and wires its operands into the use-chains of
    /// the referenced values. Typing contracts are the builder's job.
    pub(crate) fn new_primop(
        &mut self,
        name: &str,
        ty: ValueId,
        opcode: Opcode,
        operand_values: &[ValueId],
    ) -> ValueId {
        let id = self.alloc_value(name, ty, ValueKind::Primop(Primop::new(opcode)));
        for &v in operand_values {
            let op = self.add_use(v, id);
            match &mut self.value_mut(id).kind {
                ValueKind::Primop(p) => p.operands.push(op),
                _ => unreachable!(),
            }
        }
        id
    }

    // -----------------------------------------------------------------------
    // Continuation helpers
    // -----------------------------------------------------------------------

    /// The continuation payload of a value. Panics if the value is not a
    /// continuation.
    pub fn continuation(&self, id: ValueId) -> &Continuation {
        self.value(id).as_continuation().expect("value is not a continuation")
    }

    pub(crate) fn continuation_mut(&mut self, id: ValueId) -> &mut Continuation {
        match &mut self.value_mut(id).kind {
            ValueKind::Continuation(c) => c,
            _ => panic!("value is not a continuation"),
        }
    }

    /// The primop payload of a value. Panics if the value is not a primop.
    pub fn primop(&self, id: ValueId) -> &Primop {
        self.value(id).as_primop().expect("value is not a primop")
    }

    pub(crate) fn primop_mut(&mut self, id: ValueId) -> &mut Primop {
        match &mut self.value_mut(id).kind {
            ValueKind::Primop(p) => p,
            _ => panic!("value is not a primop"),
        }
    }

    /// The values referenced by a primop's operands, in operand order.
    pub fn operand_values(&self, primop: ValueId) -> Vec<ValueId> {
        self.primop(primop)
            .operands
            .iter()
            .map(|&op| self.operand(op).value)
            .collect()
    }

    /// The destination continuation of a `function_ref` primop, if `v` is
    /// one.
    pub fn function_ref_dest(&self, v: ValueId) -> Option<ValueId> {
        let primop = self.try_value(v)?.as_primop()?;
        if !matches!(primop.opcode, Opcode::FunctionRef) {
            return None;
        }
        let op = *primop.operands.first()?;
        Some(self.operand(op).value)
    }

    /// Installs a terminal: sets `cont.terminal` and threads a successor
    /// record for every `function_ref` operand destination.
    pub(crate) fn set_terminal(&mut self, cont: ValueId, terminal: ValueId) {
        self.continuation_mut(cont).terminal = Some(terminal);
        let dests: Vec<ValueId> = self
            .operand_values(terminal)
            .into_iter()
            .filter_map(|v| self.function_ref_dest(v))
            .collect();
        for dest in dests {
            self.install_successor(terminal, cont, dest);
        }
    }

    /// Routes a destroy/deallocate primop through the cleanup list of a
    /// continuation.
    pub(crate) fn add_cleanup(&mut self, cont: ValueId, primop: ValueId) {
        self.primop_mut(primop).cleanup = true;
        self.continuation_mut(cont).cleanups.push(primop);
    }

    // -----------------------------------------------------------------------
    // Use-chain maintenance
    // -----------------------------------------------------------------------

    /// Links a fresh operand at the head of `value`'s use-chain.
    pub(crate) fn add_use(&mut self, value: ValueId, owner: ValueId) -> OperandId {
        let id = OperandId(self.operands.len() as u32);
        let old_head = self.value(value).first_use;
        self.operands.push(Some(Operand {
            value,
            owner,
            prev: None,
            next: old_head,
        }));
        if let Some(old) = old_head {
            self.operand_mut(old).prev = Some(id);
        }
        self.value_mut(value).first_use = Some(id);
        id
    }

    /// Unlinks an operand from its value's use-chain and tombstones it.
    ///
    /// Does not touch the owning primop's operand list; callers removing a
    /// whole primop go through [`Module::remove_primop`].
    pub fn drop_use(&mut self, id: OperandId) {
        let (value, prev, next) = {
            let op = self.operand(id);
            (op.value, op.prev, op.next)
        };
        match prev {
            Some(p) => self.operand_mut(p).next = next,
            None => self.value_mut(value).first_use = next,
        }
        if let Some(n) = next {
            self.operand_mut(n).prev = prev;
        }
        self.operands[id.0 as usize] = None;
    }

    /// Unlinks an operand from both its value's use-chain and its owning
    /// primop's operand list.
    pub fn drop_operand(&mut self, id: OperandId) {
        let owner = self.operand(id).owner;
        self.drop_use(id);
        self.primop_mut(owner).operands.retain(|o| *o != id);
    }

    /// Iterates the operands that reference `v`, head first.
    pub fn users(&self, v: ValueId) -> Users<'_> {
        Users { module: self, cursor: self.value(v).first_use }
    }

    /// Iterates the non-cleanup operands that reference `v`. Most analyses
    /// look through cleanup uses.
    pub fn regular_users(&self, v: ValueId) -> impl Iterator<Item = OperandId> + '_ {
        self.users(v)
            .filter(move |&op| !self.primop(self.operand(op).owner).cleanup)
    }

    /// Redirects every use of `old` to `new` in O(users). Afterwards
    /// `old`'s use-chain is empty and every former user references `new`.
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        let mut cursor = self.value_mut(old).first_use.take();
        while let Some(id) = cursor {
            let next = self.operand(id).next;
            let new_head = self.value(new).first_use;
            {
                let op = self.operand_mut(id);
                op.value = new;
                op.prev = None;
                op.next = new_head;
            }
            if let Some(h) = new_head {
                self.operand_mut(h).prev = Some(id);
            }
            self.value_mut(new).first_use = Some(id);
            cursor = next;
        }
    }

    // -----------------------------------------------------------------------
    // Successor / predecessor threading
    // -----------------------------------------------------------------------

    /// Creates a successor record on `terminal` for the edge
    /// `from -> dest`, linked at the head of `dest`'s predecessor list.
    pub(crate) fn install_successor(
        &mut self,
        terminal: ValueId,
        from: ValueId,
        dest: ValueId,
    ) -> SuccessorId {
        let id = SuccessorId(self.successors.len() as u32);
        let old_head = self.continuation(dest).first_pred;
        self.successors.push(Some(Successor {
            terminal,
            from,
            dest,
            prev: None,
            next: old_head,
        }));
        if let Some(old) = old_head {
            self.successor_mut(old).prev = Some(id);
        }
        self.continuation_mut(dest).first_pred = Some(id);
        self.primop_mut(terminal).successors.push(id);
        id
    }

    /// Unlinks a successor record from its destination's predecessor list
    /// and from its terminal, then tombstones it.
    pub(crate) fn drop_successor(&mut self, id: SuccessorId) {
        let (terminal, dest, prev, next) = {
            let s = self.successor(id);
            (s.terminal, s.dest, s.prev, s.next)
        };
        match prev {
            Some(p) => self.successor_mut(p).next = next,
            None => self.continuation_mut(dest).first_pred = next,
        }
        if let Some(n) = next {
            self.successor_mut(n).prev = prev;
        }
        self.primop_mut(terminal).successors.retain(|s| *s != id);
        self.successors[id.0 as usize] = None;
    }

    /// Iterates the predecessor records of a continuation.
    pub fn preds(&self, cont: ValueId) -> Preds<'_> {
        Preds { module: self, cursor: self.continuation(cont).first_pred }
    }

    /// The predecessor continuations of `cont`, in list order.
    pub fn pred_conts(&self, cont: ValueId) -> Vec<ValueId> {
        self.preds(cont).map(|s| self.successor(s).from).collect()
    }

    /// The successor continuations of `cont`'s terminal, in record order.
    pub fn succ_conts(&self, cont: ValueId) -> Vec<ValueId> {
        match self.continuation(cont).terminal {
            Some(t) => self
                .primop(t)
                .successors
                .iter()
                .map(|&s| self.successor(s).dest)
                .collect(),
            None => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes a primop: drops its operands from their use-chains, drops
    /// its successor records, and tombstones the value. The primop's own
    /// users must already be gone.
    pub fn remove_primop(&mut self, primop: ValueId) {
        debug_assert!(self.users(primop).next().is_none(), "removing a primop that still has users");
        let (operands, successors): (Vec<OperandId>, Vec<SuccessorId>) = {
            let p = self.primop(primop);
            (p.operands.to_vec(), p.successors.to_vec())
        };
        for op in operands {
            self.drop_use(op);
        }
        for s in successors {
            self.drop_successor(s);
        }
        self.values[primop.0 as usize] = None;
    }

    /// Removes a continuation, its terminal, its cleanups, and its
    /// parameters. Callers must drop every use of the parameters first.
    pub fn remove_continuation(&mut self, cont: ValueId) {
        let (terminal, cleanups, params) = {
            let c = self.continuation(cont);
            (c.terminal, c.cleanups.clone(), c.params.clone())
        };
        if let Some(t) = terminal {
            self.remove_primop(t);
        }
        for cleanup in cleanups {
            self.remove_primop(cleanup);
        }
        for param in params {
            debug_assert!(
                self.users(param).next().is_none(),
                "removing a continuation whose parameters still have users"
            );
            self.values[param.0 as usize] = None;
        }
        self.top_level.retain(|&c| c != cont);
        self.values[cont.0 as usize] = None;
    }

    // -----------------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------------

    fn intern(&mut self, key: TypeKey, node: TypeNode, name: &str) -> ValueId {
        if let Some(&existing) = self.type_table.get(&key) {
            return existing;
        }
        let ty = self.type_type;
        let id = self.alloc_value(name, ty, ValueKind::Type(node));
        self.type_table.insert(key, id);
        id
    }

    /// The `Bottom` singleton.
    pub fn bottom_type(&self) -> ValueId {
        self.bottom_type
    }

    /// The `Type` singleton.
    pub fn type_type(&self) -> ValueId {
        self.type_type
    }

    /// The `TypeMetadata` singleton.
    pub fn type_metadata_type(&self) -> ValueId {
        self.type_metadata_type
    }

    /// Interns a CPS function type.
    pub fn function_type(&mut self, arguments: Vec<ValueId>) -> ValueId {
        self.intern(
            TypeKey::Function(arguments.clone()),
            TypeNode::Function { arguments },
            "fn",
        )
    }

    /// Interns a tuple type.
    pub fn tuple_type(&mut self, elements: Vec<ValueId>) -> ValueId {
        self.intern(TypeKey::Tuple(elements.clone()), TypeNode::Tuple { elements }, "tuple")
    }

    /// Interns a box type.
    pub fn box_type(&mut self, inner: ValueId) -> ValueId {
        self.intern(TypeKey::Box(inner), TypeNode::Box { inner }, "box")
    }

    /// Interns an archetype by name.
    pub fn archetype(&mut self, name: &str) -> ValueId {
        self.intern(
            TypeKey::Archetype(name.to_string()),
            TypeNode::Archetype { name: name.to_string() },
            name,
        )
    }

    /// Interns an application of a nominal type to arguments.
    pub fn substituted(&mut self, base: ValueId, arguments: Vec<ValueId>) -> ValueId {
        self.intern(
            TypeKey::Substituted(base, arguments.clone()),
            TypeNode::Substituted { base, arguments },
            "subst",
        )
    }

    /// Interns the address type of `pointee`.
    pub fn address_type(&mut self, pointee: ValueId) -> ValueId {
        self.intern(TypeKey::Address(pointee), TypeNode::Address { pointee }, "addr")
    }

    /// Declares (or finds) a data type by name, initially with no
    /// constructors.
    pub fn declare_data(&mut self, name: &str) -> ValueId {
        self.intern(
            TypeKey::Data(name.to_string()),
            TypeNode::Data(DataDef { name: name.to_string(), constructors: IndexMap::new() }),
            name,
        )
    }

    /// Defines a data type's constructors. A second definition of an
    /// already-defined data type is a redefinition error.
    pub fn define_data(
        &mut self,
        name: &str,
        constructors: Vec<(String, Option<ValueId>)>,
    ) -> Result<ValueId, GirError> {
        let id = self.declare_data(name);
        let already_defined = match self.value(id).as_type() {
            Some(TypeNode::Data(def)) => !def.constructors.is_empty(),
            _ => false,
        };
        if already_defined {
            return Err(GirError::RedefinitionError { name: name.to_string() });
        }
        let table: IndexMap<String, Constructor> = constructors
            .into_iter()
            .enumerate()
            .map(|(i, (ctor, payload))| (ctor, Constructor { index: i as u32, payload }))
            .collect();
        match &mut self.value_mut(id).kind {
            ValueKind::Type(TypeNode::Data(def)) => def.constructors = table,
            _ => unreachable!(),
        }
        Ok(id)
    }

    /// Declares (or finds) a record type by name, initially with no fields.
    pub fn declare_record(&mut self, name: &str) -> ValueId {
        self.intern(
            TypeKey::Record(name.to_string()),
            TypeNode::Record(RecordDef { name: name.to_string(), fields: IndexMap::new() }),
            name,
        )
    }

    /// Defines a record type's fields, rejecting a second definition.
    pub fn define_record(
        &mut self,
        name: &str,
        fields: Vec<(String, ValueId)>,
    ) -> Result<ValueId, GirError> {
        let id = self.declare_record(name);
        let already_defined = match self.value(id).as_type() {
            Some(TypeNode::Record(def)) => !def.fields.is_empty(),
            _ => false,
        };
        if already_defined {
            return Err(GirError::RedefinitionError { name: name.to_string() });
        }
        match &mut self.value_mut(id).kind {
            ValueKind::Type(TypeNode::Record(def)) => def.fields = fields.into_iter().collect(),
            _ => unreachable!(),
        }
        Ok(id)
    }

    /// The type node of a type value, or `None` when the value in type
    /// position is not itself a type (a `Type`-typed parameter, say).
    pub fn type_node(&self, ty: ValueId) -> Option<&TypeNode> {
        self.try_value(ty)?.as_type()
    }

    /// Looks up an already-interned nominal type by name: data first, then
    /// record, then archetype.
    pub fn named_type(&self, name: &str) -> Option<ValueId> {
        self.type_table
            .get(&TypeKey::Data(name.to_string()))
            .or_else(|| self.type_table.get(&TypeKey::Record(name.to_string())))
            .or_else(|| self.type_table.get(&TypeKey::Archetype(name.to_string())))
            .copied()
    }

    /// The data definition behind a type, looking through `Substituted`.
    pub fn data_def(&self, ty: ValueId) -> Option<&DataDef> {
        match self.type_node(ty)? {
            TypeNode::Data(def) => Some(def),
            TypeNode::Substituted { base, .. } => self.data_def(*base),
            _ => None,
        }
    }

    /// Physical category of a type position. Values used as types
    /// (dependent positions) are object category.
    pub fn category(&self, ty: ValueId) -> TypeCategory {
        match self.type_node(ty) {
            Some(node) => node.category(),
            None => TypeCategory::Object,
        }
    }

    // -----------------------------------------------------------------------
    // Consistency
    // -----------------------------------------------------------------------

    /// Debug-build structural audit of the intrusive lists.
    #[cfg(debug_assertions)]
    pub fn assert_consistency(&self) {
        for value in self.values() {
            let mut cursor = value.first_use;
            let mut prev = None;
            while let Some(id) = cursor {
                let op = self.operand(id);
                assert_eq!(op.value, value.id, "operand on the wrong use-chain");
                assert_eq!(op.prev, prev, "use-chain back-link mismatch");
                prev = Some(id);
                cursor = op.next;
            }
        }
    }
}

/// Iterator over the use-chain of a value.
pub struct Users<'m> {
    module: &'m Module,
    cursor: Option<OperandId>,
}

impl<'m> Iterator for Users<'m> {
    type Item = OperandId;

    fn next(&mut self) -> Option<OperandId> {
        let id = self.cursor?;
        self.cursor = self.module.operand(id).next;
        Some(id)
    }
}

/// Iterator over the predecessor records of a continuation.
pub struct Preds<'m> {
    module: &'m Module,
    cursor: Option<SuccessorId>,
}

impl<'m> Iterator for Preds<'m> {
    type Item = SuccessorId;

    fn next(&mut self) -> Option<SuccessorId> {
        let id = self.cursor?;
        self.cursor = self.module.successor(id).next;
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singletons_are_interned_once() {
        let mut module = Module::new("m");
        assert_eq!(module.value(module.type_type()).ty, module.type_type());
        assert_eq!(module.value(module.bottom_type()).ty, module.type_type());
        let bottom_again = module.intern(TypeKey::Bottom, TypeNode::Bottom, "Bottom");
        assert_eq!(bottom_again, module.bottom_type());
    }

    #[test]
    fn function_types_unique_structurally() {
        let mut module = Module::new("m");
        let t = module.type_type();
        let a = module.function_type(vec![t]);
        let b = module.function_type(vec![t]);
        let c = module.function_type(vec![t, t]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fresh_name_suffixes_collisions() {
        let mut module = Module::new("m");
        assert_eq!(module.fresh_name("x"), "x");
        assert_eq!(module.fresh_name("x"), "x.1");
        assert_eq!(module.fresh_name("x"), "x.2");
        assert_eq!(module.fresh_name("y"), "y");
    }

    #[test]
    fn use_chain_links_and_unlinks() {
        let mut module = Module::new("m");
        let bottom = module.bottom_type();
        let entry = module.new_continuation("f", true);
        let x = module.add_param(entry, "x", bottom, Ownership::Owned);

        let p1 = module.new_primop("a", x, Opcode::CopyValue, &[x]);
        let p2 = module.new_primop("b", bottom, Opcode::DestroyValue, &[x]);

        let users: Vec<ValueId> =
            module.users(x).map(|op| module.operand(op).owner).collect();
        assert_eq!(users, vec![p2, p1]);

        // Dropping the destroy's operand leaves only the copy.
        let destroy_op = module.primop(p2).operands[0];
        module.drop_use(destroy_op);
        let users: Vec<ValueId> =
            module.users(x).map(|op| module.operand(op).owner).collect();
        assert_eq!(users, vec![p1]);

        module.assert_consistency();
    }

    #[test]
    fn rauw_moves_every_use() {
        let mut module = Module::new("m");
        let bottom = module.bottom_type();
        let entry = module.new_continuation("f", true);
        let x = module.add_param(entry, "x", bottom, Ownership::Owned);
        let y = module.add_param(entry, "y", bottom, Ownership::Owned);

        module.new_primop("a", x, Opcode::CopyValue, &[x]);
        module.new_primop("b", x, Opcode::ForceEffects, &[x]);

        module.replace_all_uses_with(x, y);
        assert!(module.users(x).next().is_none());
        assert_eq!(module.users(y).count(), 2);
        for op in module.users(y) {
            assert_eq!(module.operand(op).value, y);
        }
        module.assert_consistency();
    }

    #[test]
    fn successor_threading_tracks_predecessors() {
        let mut module = Module::new("m");
        let entry = module.new_continuation("f", true);
        let inner = module.new_continuation("k", false);
        let inner_ty = module.value(inner).ty;

        let fr = module.new_primop("fr", inner_ty, Opcode::FunctionRef, &[inner]);
        let apply = module.new_primop("t", module.bottom_type(), Opcode::Apply, &[fr]);
        module.set_terminal(entry, apply);

        assert_eq!(module.pred_conts(inner), vec![entry]);
        assert_eq!(module.succ_conts(entry), vec![inner]);

        // Dropping the edge empties the predecessor list.
        let record = module.preds(inner).next().unwrap();
        module.drop_successor(record);
        assert!(module.pred_conts(inner).is_empty());
        assert!(module.primop(apply).successors.is_empty());
    }

    #[test]
    fn define_data_rejects_second_definition() {
        let mut module = Module::new("m");
        module
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();
        let again = module.define_data("Bit", vec![("lo".into(), None)]);
        assert!(matches!(again, Err(GirError::RedefinitionError { .. })));
    }

    #[test]
    fn data_def_resolves_through_substitution() {
        let mut module = Module::new("m");
        let elem = module.archetype("a");
        let list = module
            .define_data("List", vec![("nil".into(), None), ("cons".into(), Some(elem))])
            .unwrap();
        let applied = module.substituted(list, vec![elem]);
        assert_eq!(module.data_def(applied).unwrap().name, "List");
    }
}
