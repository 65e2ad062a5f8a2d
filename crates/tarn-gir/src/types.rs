//! Type nodes of the GraphIR.
//!
//! Types are values: a [`TypeNode`] is the kind payload of a value whose
//! type is the module's `Type` singleton. Because type positions are plain
//! [`ValueId`]s, a type may reference any value -- including a `Type`-typed
//! parameter -- which is how dependent signatures are represented without a
//! separate binder machinery.
//!
//! Types are uniqued per module with `getOrInsert` semantics: structural
//! equality is decided once at interning time, after which `ValueId`
//! equality is type equality. Nominal types (data, record) are keyed by
//! name and use [`IndexMap`] for insertion-ordered constructors/fields.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::id::ValueId;

/// Physical manipulation category of a type.
///
/// Object-category values move through registers (exploded into scalars at
/// emission); address-category values are manipulated only through their
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeCategory {
    Object,
    Address,
}

/// A type node. Each variant is a distinct kind of type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeNode {
    /// The uninhabited type. CPS functions "return" it.
    Bottom,
    /// The type of types.
    Type,
    /// Runtime type metadata (value witnesses) for a type.
    TypeMetadata,
    /// Named data type with ordered constructors.
    Data(DataDef),
    /// Named record type with ordered fields.
    Record(RecordDef),
    /// Reference-counted heap box around a payload type.
    Box { inner: ValueId },
    /// An opaque generic parameter type, sized only at runtime.
    Archetype { name: String },
    /// A nominal type applied to arguments.
    Substituted { base: ValueId, arguments: Vec<ValueId> },
    /// CPS function type: argument list only. By convention the last
    /// argument is the return continuation.
    Function { arguments: Vec<ValueId> },
    /// Structural tuple.
    Tuple { elements: Vec<ValueId> },
    /// The address of a value of the pointee type. The only
    /// address-category node; everything else is object category.
    Address { pointee: ValueId },
}

impl TypeNode {
    /// Physical manipulation category of this node.
    pub fn category(&self) -> TypeCategory {
        match self {
            TypeNode::Address { .. } => TypeCategory::Address,
            _ => TypeCategory::Object,
        }
    }
}

/// Named data type definition with insertion-ordered constructors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDef {
    pub name: String,
    pub constructors: IndexMap<String, Constructor>,
}

/// A single constructor within a data definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constructor {
    /// Declaration index of this constructor.
    pub index: u32,
    /// Payload type, if any (`None` = bare constructor).
    pub payload: Option<ValueId>,
}

impl DataDef {
    /// Number of payload-carrying constructors.
    pub fn payload_count(&self) -> usize {
        self.constructors.values().filter(|c| c.payload.is_some()).count()
    }

    /// Number of payload-less constructors.
    pub fn bare_count(&self) -> usize {
        self.constructors.len() - self.payload_count()
    }
}

/// Named record type definition with insertion-ordered fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDef {
    pub name: String,
    pub fields: IndexMap<String, ValueId>,
}

/// Structural interning key for the module type table.
///
/// Nominal types (data, record, archetype) key by name; structural types
/// key by their component IDs, which is sound because components are
/// already interned when the composite is requested.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TypeKey {
    Bottom,
    Type,
    TypeMetadata,
    Data(String),
    Record(String),
    Box(ValueId),
    Archetype(String),
    Substituted(ValueId, Vec<ValueId>),
    Function(Vec<ValueId>),
    Tuple(Vec<ValueId>),
    Address(ValueId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_is_the_only_address_category() {
        assert_eq!(TypeNode::Address { pointee: ValueId(0) }.category(), TypeCategory::Address);
        assert_eq!(TypeNode::Bottom.category(), TypeCategory::Object);
        assert_eq!(TypeNode::Type.category(), TypeCategory::Object);
        assert_eq!(
            TypeNode::Function { arguments: vec![] }.category(),
            TypeCategory::Object
        );
    }

    #[test]
    fn data_def_constructor_counts() {
        let def = DataDef {
            name: "Maybe".into(),
            constructors: IndexMap::from([
                ("nothing".into(), Constructor { index: 0, payload: None }),
                ("just".into(), Constructor { index: 1, payload: Some(ValueId(9)) }),
            ]),
        };
        assert_eq!(def.payload_count(), 1);
        assert_eq!(def.bare_count(), 1);
    }

    #[test]
    fn serde_roundtrip_type_node() {
        let node = TypeNode::Data(DataDef {
            name: "Nat".into(),
            constructors: IndexMap::from([
                ("zero".into(), Constructor { index: 0, payload: None }),
                ("succ".into(), Constructor { index: 1, payload: Some(ValueId(3)) }),
            ]),
        });
        let json = serde_json::to_string(&node).unwrap();
        let back: TypeNode = serde_json::from_str(&json).unwrap();
        assert_eq!(node, back);
    }
}
