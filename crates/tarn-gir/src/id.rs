//! Stable ID newtypes for GraphIR entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `ValueId` cannot be accidentally used where an `OperandId` is
//! expected. IDs index into the arenas owned by [`crate::module::Module`]
//! and are never reused, so they double as stable identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable value identifier. Indexes the module's value arena.
///
/// Every IR entity -- continuations, parameters, primops, and types -- is a
/// value, so `ValueId` is the universal handle of the IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u32);

/// Stable operand identifier. Indexes the module's operand arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperandId(pub u32);

/// Stable successor-record identifier. Indexes the module's successor arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SuccessorId(pub u32);

// Display implementations -- just print the inner value.

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OperandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SuccessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_id_display() {
        assert_eq!(format!("{}", ValueId(7)), "7");
    }

    #[test]
    fn id_types_are_distinct() {
        // Compile-time guarantee; just verify the values are independent.
        let value = ValueId(1);
        let operand = OperandId(1);
        let successor = SuccessorId(1);
        assert_eq!(value.0, operand.0);
        assert_eq!(operand.0, successor.0);
    }

    #[test]
    fn serde_roundtrip() {
        let id = ValueId(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: ValueId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
