//! The value model: the root entity of the GraphIR.
//!
//! Every IR entity is a [`Value`]: continuations, their parameters, primops,
//! and types. A value carries a stable identity, a name, a type (itself a
//! value), and the head of its use-chain.
//!
//! The use-chain is an intrusive doubly-linked list of [`Operand`]s threaded
//! through the module arenas: each operand records the value it references,
//! the primop that owns it, and forward/backward links. Enumerating a
//! value's users is O(users), and `replace_all_uses_with` relinks in
//! O(users) without a module-wide walk. All mutation of the chain goes
//! through `&mut Module`.

use serde::{Deserialize, Serialize};

use crate::id::{OperandId, SuccessorId, ValueId};
use crate::primop::Primop;
use crate::types::TypeNode;

/// Ownership tag on a continuation parameter.
///
/// Preserved verbatim from the frontend; it drives whether callers insert
/// `copy_value`/`destroy_value`. The IR core does not police borrow
/// discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ownership {
    Owned,
    Borrowed,
}

/// A continuation parameter: position, owning continuation, ownership tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// The continuation this parameter belongs to.
    pub continuation: ValueId,
    /// Position in the continuation's parameter list.
    pub index: u32,
    /// Ownership convention for the incoming value.
    pub ownership: Ownership,
}

/// A CPS function or basic block.
///
/// Owns an ordered parameter list, a single terminal primop, a list of
/// cleanup primops scheduled just before the terminal, and the head of its
/// predecessor list (threaded through [`Successor`] records owned by the
/// terminals that target it). By convention the last parameter is the
/// return continuation; its first argument type is the function's return
/// type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    /// Ordered parameters.
    pub params: Vec<ValueId>,
    /// The terminal primop, once set. Scheduling and emission require it.
    pub terminal: Option<ValueId>,
    /// Destroy/deallocate primops emitted immediately before the terminal.
    pub cleanups: Vec<ValueId>,
    /// Head of the predecessor list.
    pub first_pred: Option<SuccessorId>,
    /// `true` for module-level functions; scope flooding does not enter
    /// top-level continuations other than the scope entry.
    pub top_level: bool,
}

impl Continuation {
    /// Creates an empty continuation with no parameters or terminal.
    pub fn new(top_level: bool) -> Self {
        Continuation {
            params: Vec::new(),
            terminal: None,
            cleanups: Vec::new(),
            first_pred: None,
            top_level,
        }
    }

    /// The return continuation parameter, by convention the last one.
    pub fn return_param(&self) -> Option<ValueId> {
        self.params.last().copied()
    }
}

/// The kind payload of a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ValueKind {
    Continuation(Continuation),
    Parameter(Parameter),
    Primop(Primop),
    Type(TypeNode),
}

/// The root IR entity.
///
/// `ty` is a [`ValueId`] because types are values; for type values it is
/// the module's `Type` singleton (which is its own type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    /// Stable identity.
    pub id: ValueId,
    /// Unique name within the module (see `Module::fresh_name`).
    pub name: String,
    /// The value's type.
    pub ty: ValueId,
    /// What this value is.
    pub kind: ValueKind,
    /// Head of the use-chain: `None` iff no operand references this value.
    pub first_use: Option<OperandId>,
}

impl Value {
    /// The continuation payload, if this value is one.
    pub fn as_continuation(&self) -> Option<&Continuation> {
        match &self.kind {
            ValueKind::Continuation(c) => Some(c),
            _ => None,
        }
    }

    /// The parameter payload, if this value is one.
    pub fn as_parameter(&self) -> Option<&Parameter> {
        match &self.kind {
            ValueKind::Parameter(p) => Some(p),
            _ => None,
        }
    }

    /// The primop payload, if this value is one.
    pub fn as_primop(&self) -> Option<&Primop> {
        match &self.kind {
            ValueKind::Primop(p) => Some(p),
            _ => None,
        }
    }

    /// The type-node payload, if this value is a type.
    pub fn as_type(&self) -> Option<&TypeNode> {
        match &self.kind {
            ValueKind::Type(t) => Some(t),
            _ => None,
        }
    }
}

/// One use of a value by a primop.
///
/// Lives in the module operand arena for exactly as long as its owning
/// primop; dropping an operand unlinks it from its value's use-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operand {
    /// The value being referenced.
    pub value: ValueId,
    /// The primop that owns this operand.
    pub owner: ValueId,
    /// Previous operand in the value's use-chain.
    pub prev: Option<OperandId>,
    /// Next operand in the value's use-chain.
    pub next: Option<OperandId>,
}

/// A control-flow edge record, owned by a terminal primop.
///
/// Successor records double as the links of the destination continuation's
/// predecessor list: the destination's `first_pred` chains through
/// `prev`/`next` here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Successor {
    /// The terminal primop holding this record.
    pub terminal: ValueId,
    /// The continuation the edge comes from.
    pub from: ValueId,
    /// The destination continuation.
    pub dest: ValueId,
    /// Previous record in the destination's predecessor list.
    pub prev: Option<SuccessorId>,
    /// Next record in the destination's predecessor list.
    pub next: Option<SuccessorId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_param_is_last() {
        let mut cont = Continuation::new(true);
        assert!(cont.return_param().is_none());
        cont.params = vec![ValueId(1), ValueId(2), ValueId(3)];
        assert_eq!(cont.return_param(), Some(ValueId(3)));
    }

    #[test]
    fn kind_accessors() {
        let v = Value {
            id: ValueId(0),
            name: "x".into(),
            ty: ValueId(1),
            kind: ValueKind::Parameter(Parameter {
                continuation: ValueId(2),
                index: 0,
                ownership: Ownership::Owned,
            }),
            first_use: None,
        };
        assert!(v.as_parameter().is_some());
        assert!(v.as_continuation().is_none());
        assert!(v.as_primop().is_none());
        assert!(v.as_type().is_none());
    }

    #[test]
    fn serde_roundtrip_ownership() {
        for tag in [Ownership::Owned, Ownership::Borrowed] {
            let json = serde_json::to_string(&tag).unwrap();
            let back: Ownership = serde_json::from_str(&json).unwrap();
            assert_eq!(tag, back);
        }
    }
}
