//! The scheduler: orders the unordered primop graph for emission.
//!
//! A [`Schedule`] is an ephemeral, per-pass artifact. For each scope it
//! holds one [`Block`] per continuation in reverse post-order; within a
//! block, the primop order is produced by a worklist DFS from the terminal
//! through operands, reversed, followed by the continuation's cleanups,
//! followed by the terminal. Primops with no transitive use by the terminal
//! are not scheduled.
//!
//! Only the `Early` placement is implemented; `Late` is reserved.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::GirError;
use crate::id::ValueId;
use crate::module::Module;
use crate::scope::Scope;

/// Placement policy for primops within their blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleTag {
    /// Place primops as early as the operand DFS discovers them.
    Early,
    /// Reserved; requesting it is an internal invariant violation.
    Late,
}

/// One continuation with its ordered primop list.
#[derive(Debug, Clone)]
pub struct Block {
    pub continuation: ValueId,
    pub primops: Vec<ValueId>,
}

/// An ordered rendering of a scope, ready for emission or printing.
#[derive(Debug, Clone)]
pub struct Schedule {
    blocks: Vec<Block>,
}

impl Schedule {
    /// Schedules every continuation of `scope` in RPO.
    pub fn compute(module: &Module, scope: &Scope, tag: ScheduleTag) -> Result<Self, GirError> {
        if tag == ScheduleTag::Late {
            return Err(GirError::InternalInvariantViolation {
                reason: "late scheduling is reserved and not implemented".into(),
            });
        }
        let blocks = scope
            .rpo(module)
            .into_iter()
            .map(|cont| Block { continuation: cont, primops: schedule_block(module, cont) })
            .collect();
        Ok(Schedule { blocks })
    }

    /// Blocks in RPO.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// The block of a specific continuation.
    pub fn block(&self, cont: ValueId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.continuation == cont)
    }
}

/// Orders one continuation: worklist DFS from the terminal through primop
/// operands, stack reversed, cleanups appended, terminal last.
fn schedule_block(module: &Module, cont: ValueId) -> Vec<ValueId> {
    let c = module.continuation(cont);
    let terminal = c.terminal.expect("scheduling a continuation without a terminal");

    let mut worklist = vec![terminal];
    let mut visited: HashSet<ValueId> = HashSet::new();
    let mut stack: Vec<ValueId> = Vec::new();

    while let Some(v) = worklist.pop() {
        if !visited.insert(v) {
            continue;
        }
        stack.push(v);
        for operand in module.operand_values(v) {
            if module.value(operand).as_primop().is_some() {
                worklist.push(operand);
            }
        }
    }

    stack.reverse();
    stack.pop(); // the terminal went in first, so it reversed to the back
    stack.extend(c.cleanups.iter().copied());
    stack.push(terminal);
    trace!(cont = %module.value(cont).name, primops = stack.len(), "scheduled block");
    stack
}
