//! GraphIR: the continuation-passing sea-of-nodes IR of the tarn compiler.
//!
//! The crate provides the value model with its intrusive use-chain
//! ([`value`], [`module`]), the primop catalog ([`primop`]), the uniqued
//! type system ([`types`]), the invariant-maintaining [`builder`], the
//! derived analyses ([`scope`], [`schedule`]), the [`verify`] contract
//! checker, the bit-exact textual format ([`print`], [`parse`]), the LLVM
//! symbol [`mangle`]r, and the stage-ordered [`pass`] pipeliner with the
//! [`simplify_cfg`] pass.

pub mod builder;
pub mod error;
pub mod id;
pub mod mangle;
pub mod module;
pub mod parse;
pub mod pass;
pub mod primop;
pub mod print;
pub mod schedule;
pub mod scope;
pub mod simplify_cfg;
pub mod types;
pub mod value;
pub mod verify;

// Re-export commonly used types
pub use builder::Builder;
pub use error::{GirError, VerificationFailure};
pub use id::{OperandId, SuccessorId, ValueId};
pub use module::Module;
pub use parse::parse_module;
pub use pass::{pass_by_name, ModulePass, PassFactory, Pipeline, ScopePass};
pub use primop::{AllocKind, LoadOwnership, Opcode, Primop};
pub use print::print_module;
pub use schedule::{Block, Schedule, ScheduleTag};
pub use scope::{DomTree, Scope};
pub use simplify_cfg::SimplifyCfg;
pub use types::{Constructor, DataDef, RecordDef, TypeCategory, TypeNode};
pub use value::{Continuation, Operand, Ownership, Parameter, Successor, Value, ValueKind};
pub use verify::verify;
