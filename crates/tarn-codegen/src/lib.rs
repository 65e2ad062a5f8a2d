//! LLVM code generation for tarn GraphIR modules.
//!
//! This crate lowers a verified GraphIR module to LLVM IR via inkwell:
//!
//! - [`typeinfo`] -- the type-info protocol deciding how each type is
//!   physically manipulated
//! - [`strategy`] -- per-data-type layout strategies (natural, newtype,
//!   single-payload, single-bit, bare discriminant)
//! - [`explosion`] -- exploded scalar passing
//! - [`payload`] -- bit-level payload packing
//! - [`aggregate`] -- byte-range legalization into storage chunks
//! - [`runtime`] -- external runtime declarations
//! - [`emit`] -- the scope-at-a-time emission driver
//! - [`error`] -- error types for all emission failure modes

pub mod aggregate;
pub mod emit;
pub mod error;
pub mod explosion;
pub mod payload;
pub mod runtime;
pub mod strategy;
pub mod typeinfo;

pub use emit::emit_to_ir;
pub use error::EmitError;
pub use explosion::{Explosion, Schema, SchemaElement};
pub use typeinfo::{type_info, AnyTypeInfo, EmitCtx, LoadableTypeInfo, TypeInfo, TypeInfoCache};
