//! The primop catalog for the GraphIR.
//!
//! Defines the complete operation vocabulary of the continuation-passing
//! sea-of-nodes graph: control transfer (`apply`, `switch_constr`,
//! `unreachable`), data-type manipulation (`data_init`, `data_extract`),
//! tuples, ownership operations (`copy_value`, `destroy_value`), memory
//! (`load`/`store`/`alloca`/`dealloca`), boxes, address-level copies, and
//! the function-value operations (`function_ref`, `thicken`,
//! `force_effects`).
//!
//! Primops do not carry explicit result-type annotations beyond what cannot
//! be inferred from their operands -- the result type lives on the primop's
//! value. Operations that name a constructor or an element index carry that
//! payload inline on the opcode, following the same rule as the rest of the
//! IR: store only what the operands cannot express.
//!
//! # LLVM Lowering
//!
//! Every opcode has a documented lowering path; the data-type opcodes defer
//! to the per-type layout strategy selected at emission time.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{OperandId, SuccessorId};

/// Ownership mode of a `load`.
///
/// `Copy` leaves the source initialized (and retains loaded references);
/// `Take` moves the value out, leaving the source uninitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadOwnership {
    Copy,
    Take,
}

/// Where an `alloca` address lives.
///
/// Stack slots are the common case. Heap and box slots exist for frames
/// that must outlive their activation (suspendable functions); they are a
/// sum type rather than a nullable side-channel so every consumer must say
/// what it does with each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocKind {
    Stack,
    Heap,
    Box,
}

/// The opcode of a primop, with inline payload for what operands cannot
/// express (constructor names, element indices, ownership modes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    // -- Control --
    /// Transfer control to a function value.
    /// Operands: `[callee, arg0, ..]`. Terminal.
    /// Lowers to: `ret`, `br`, or `call` depending on the callee.
    Apply,
    /// Reference a continuation as a first-class function value.
    /// Operands: `[continuation]`.
    FunctionRef,
    /// Select a destination by constructor tag.
    /// Operands: `[scrutinee, case_dest0, .., default_dest?]`; the case
    /// names align with the destination operands. Terminal.
    /// Lowers to: `switch`, `br`, or nothing, per the layout strategy.
    SwitchConstr { cases: Vec<String>, has_default: bool },
    /// Terminal for continuations that are never reached.
    /// Lowers to: `unreachable`.
    Unreachable,

    // -- Data types --
    /// Construct a data-type value.
    /// Operands: `[type, payload?]`.
    DataInit { constructor: String },
    /// Extract the payload of a known constructor. Only valid where the
    /// scrutinee's tag is known (under a `switch_constr` arm).
    /// Operands: `[value]`; the primop's type is the payload type.
    DataExtract { constructor: String },

    // -- Tuples --
    /// Build a tuple from element values.
    /// Operands: the elements. Lowers to: chained `insertvalue`.
    Tuple,
    /// Address of one tuple element.
    /// Operands: `[tuple_address]`. Lowers to: `getelementptr`.
    TupleElementAddress { index: u32 },

    // -- Ownership --
    /// Copy a value (retains reference-counted payloads).
    /// Operands: `[value]`.
    CopyValue,
    /// Consume a value (releases reference-counted payloads).
    /// Operands: `[value]`. No result.
    DestroyValue,

    // -- Memory --
    /// Read an object value out of an address.
    /// Operands: `[address]`. Lowers to: `load` (+ retain for `Copy`).
    Load { ownership: LoadOwnership },
    /// Write an object value to an address.
    /// Operands: `[value, address]`. The result is the written-to address,
    /// which threads the memory state through the operand graph so later
    /// loads schedule after the store. Lowers to: `store`.
    Store,
    /// Allocate a slot for a type.
    /// Operands: `[type]`. Lowers to: `alloca` + `llvm.lifetime.start`.
    Alloca { kind: AllocKind },
    /// Release an `alloca` slot.
    /// Operands: `[address]`. No result. Lowers to: `llvm.lifetime.end`.
    Dealloca,

    // -- Boxes --
    /// Allocate a reference-counted heap box for a type.
    /// Operands: `[type]`.
    AllocBox,
    /// Address of a box's payload.
    /// Operands: `[box]`.
    ProjectBox,
    /// Free a box without destroying its payload.
    /// Operands: `[box]`. No result.
    DeallocBox,

    // -- Address-level value operations --
    /// Initialize `dst` with a copy of the value at `src`.
    /// Operands: `[src, dst]`. The result is the initialized `dst`
    /// address, threading memory state like `store`.
    CopyAddress,
    /// Destroy the value at an address in place.
    /// Operands: `[address]`. No result.
    DestroyAddress,

    // -- Function values --
    /// Pair a thin function with an empty environment, producing a thick
    /// (function, env) value callable through a uniform convention.
    /// Operands: `[function]`.
    Thicken,
    /// Ordering barrier: passes its operand through and pins preceding
    /// effects. Operands: `[value]`.
    ForceEffects,
}

impl Opcode {
    /// The textual mnemonic, as printed and parsed by the GIR text format.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Opcode::Apply => "apply",
            Opcode::FunctionRef => "function_ref",
            Opcode::SwitchConstr { .. } => "switch_constr",
            Opcode::Unreachable => "unreachable",
            Opcode::DataInit { .. } => "data_init",
            Opcode::DataExtract { .. } => "data_extract",
            Opcode::Tuple => "tuple",
            Opcode::TupleElementAddress { .. } => "tuple_element_address",
            Opcode::CopyValue => "copy_value",
            Opcode::DestroyValue => "destroy_value",
            Opcode::Load { .. } => "load",
            Opcode::Store => "store",
            Opcode::Alloca { .. } => "alloca",
            Opcode::Dealloca => "dealloca",
            Opcode::AllocBox => "alloc_box",
            Opcode::ProjectBox => "project_box",
            Opcode::DeallocBox => "dealloc_box",
            Opcode::CopyAddress => "copy_address",
            Opcode::DestroyAddress => "destroy_address",
            Opcode::Thicken => "thicken",
            Opcode::ForceEffects => "force_effects",
        }
    }

    /// Returns `true` if this opcode ends a continuation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Opcode::Apply | Opcode::SwitchConstr { .. } | Opcode::Unreachable
        )
    }

    /// Returns `true` if this opcode may be inserted as a cleanup.
    ///
    /// Cleanups run immediately before a continuation's terminal and are
    /// restricted to the destroy/deallocate family.
    pub fn is_cleanup_kind(&self) -> bool {
        matches!(
            self,
            Opcode::DestroyValue
                | Opcode::DestroyAddress
                | Opcode::Dealloca
                | Opcode::DeallocBox
        )
    }

    /// Returns `true` if the primop produces a result value.
    ///
    /// When a result exists it is the primop value itself.
    pub fn has_result(&self) -> bool {
        matches!(
            self,
            Opcode::FunctionRef
                | Opcode::DataInit { .. }
                | Opcode::DataExtract { .. }
                | Opcode::Tuple
                | Opcode::TupleElementAddress { .. }
                | Opcode::CopyValue
                | Opcode::Load { .. }
                | Opcode::Store
                | Opcode::Alloca { .. }
                | Opcode::AllocBox
                | Opcode::ProjectBox
                | Opcode::CopyAddress
                | Opcode::Thicken
                | Opcode::ForceEffects
        )
    }
}

/// A primitive operation node in the sea-of-nodes graph.
///
/// Operands are [`OperandId`]s into the module arena; each operand is owned
/// by exactly this primop. Terminal primops additionally carry the
/// [`SuccessorId`]s that thread the predecessor lists of their destination
/// continuations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Primop {
    /// What this primop does.
    pub opcode: Opcode,
    /// Ordered operand list.
    pub operands: SmallVec<[OperandId; 4]>,
    /// Successor records, terminals only. One per `function_ref` operand
    /// destination, in operand order.
    pub successors: SmallVec<[SuccessorId; 2]>,
    /// Set when this primop was inserted through the cleanup API. Cleanup
    /// uses are skipped by most analyses but still emitted before the
    /// terminal.
    pub cleanup: bool,
}

impl Primop {
    /// Creates a primop with no operands wired yet.
    pub fn new(opcode: Opcode) -> Self {
        Primop {
            opcode,
            operands: SmallVec::new(),
            successors: SmallVec::new(),
            cleanup: false,
        }
    }

    /// Returns `true` if this primop ends a continuation.
    pub fn is_terminal(&self) -> bool {
        self.opcode.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        assert!(Opcode::Apply.is_terminal());
        assert!(Opcode::Unreachable.is_terminal());
        assert!(Opcode::SwitchConstr { cases: vec![], has_default: false }.is_terminal());
        assert!(!Opcode::CopyValue.is_terminal());
        assert!(!Opcode::FunctionRef.is_terminal());
    }

    #[test]
    fn cleanup_kinds_are_destroy_family() {
        assert!(Opcode::DestroyValue.is_cleanup_kind());
        assert!(Opcode::DestroyAddress.is_cleanup_kind());
        assert!(Opcode::Dealloca.is_cleanup_kind());
        assert!(Opcode::DeallocBox.is_cleanup_kind());
        assert!(!Opcode::CopyValue.is_cleanup_kind());
        assert!(!Opcode::Apply.is_cleanup_kind());
    }

    #[test]
    fn results_follow_opcode() {
        assert!(Opcode::CopyValue.has_result());
        assert!(Opcode::Load { ownership: LoadOwnership::Take }.has_result());
        assert!(Opcode::Store.has_result());
        assert!(!Opcode::DestroyValue.has_result());
        assert!(!Opcode::Dealloca.has_result());
        assert!(!Opcode::Apply.has_result());
    }

    #[test]
    fn mnemonics_are_snake_case() {
        assert_eq!(Opcode::TupleElementAddress { index: 0 }.mnemonic(), "tuple_element_address");
        assert_eq!(
            Opcode::SwitchConstr { cases: vec!["zero".into()], has_default: true }.mnemonic(),
            "switch_constr"
        );
    }

    #[test]
    fn serde_roundtrip_opcode() {
        let op = Opcode::DataInit { constructor: "just".into() };
        let json = serde_json::to_string(&op).unwrap();
        let back: Opcode = serde_json::from_str(&json).unwrap();
        assert_eq!(op, back);
    }
}
