//! Control-flow simplification.
//!
//! Worklist-driven cleanup of a scope:
//!
//! - a continuation with no predecessors (other than the entry) is removed
//!   after its parameters' uses are dropped;
//! - a continuation ending in `apply` of a `function_ref` whose destination
//!   has exactly one predecessor absorbs the destination: the destination's
//!   parameter uses are replaced with the supplied arguments, its terminal
//!   and cleanups move up, and the destination is deleted.
//!
//! Removing an edge can orphan further continuations, so destinations of
//! removed terminals go back on the worklist.

use tracing::debug;

use crate::error::GirError;
use crate::id::ValueId;
use crate::module::Module;
use crate::pass::ScopePass;
use crate::primop::Opcode;
use crate::scope::Scope;

/// The `SimplifyCFG` scope pass.
#[derive(Default)]
pub struct SimplifyCfg {
    removed: usize,
    merged: usize,
}

impl SimplifyCfg {
    pub fn new() -> Self {
        SimplifyCfg::default()
    }
}

impl ScopePass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "SimplifyCFG"
    }

    fn run(&mut self, module: &mut Module, scope: &Scope) -> Result<bool, GirError> {
        let entry = scope.entry();
        let mut worklist: Vec<ValueId> = scope.continuations().to_vec();

        while let Some(cont) = worklist.pop() {
            // May already be gone from an earlier step.
            if module.try_value(cont).and_then(|v| v.as_continuation()).is_none() {
                continue;
            }
            if cont != entry
                && !module.continuation(cont).top_level
                && module.pred_conts(cont).is_empty()
                && module.users(cont).next().is_none()
            {
                self.remove_unreachable(module, cont, &mut worklist);
                continue;
            }
            if self.try_merge(module, entry, cont, &mut worklist) {
                worklist.push(cont);
            }
        }

        debug!(removed = self.removed, merged = self.merged, "simplified scope");
        Ok(self.removed > 0 || self.merged > 0)
    }
}

impl SimplifyCfg {
    /// Deletes a predecessor-less continuation and requeues the
    /// destinations its terminal used to reach.
    fn remove_unreachable(&mut self, module: &mut Module, cont: ValueId, worklist: &mut Vec<ValueId>) {
        let terminal_operands = match module.continuation(cont).terminal {
            Some(t) => module.operand_values(t),
            None => Vec::new(),
        };
        let dests = module.succ_conts(cont);

        // Drop every use of this continuation's parameters; the users are
        // its own dead primops.
        let params = module.continuation(cont).params.clone();
        for param in params {
            while let Some(user) = module.value(param).first_use {
                module.drop_operand(user);
            }
        }
        module.remove_continuation(cont);

        // Orphaned function_refs that fed the removed terminal.
        for v in terminal_operands {
            if module.try_value(v).map(|val| val.as_primop().is_some()).unwrap_or(false)
                && module.users(v).next().is_none()
            {
                module.remove_primop(v);
            }
        }

        self.removed += 1;
        worklist.extend(dests);
    }

    /// Merges `apply function_ref(D)(args...)` when `D` has exactly one
    /// predecessor. Returns `true` on change.
    fn try_merge(
        &mut self,
        module: &mut Module,
        entry: ValueId,
        cont: ValueId,
        worklist: &mut Vec<ValueId>,
    ) -> bool {
        let Some(apply) = module.continuation(cont).terminal else { return false };
        if !matches!(module.primop(apply).opcode, Opcode::Apply) {
            return false;
        }
        let operands = module.operand_values(apply);
        let callee = operands[0];
        let Some(dest) = module.function_ref_dest(callee) else { return false };
        if dest == cont || dest == entry || module.continuation(dest).top_level {
            return false;
        }
        if module.preds(dest).count() != 1 {
            return false;
        }
        // The function_ref must feed only this apply, or the destination
        // stays referenced after the merge.
        if module.users(callee).count() != 1 {
            return false;
        }
        let args: Vec<ValueId> = operands[1..].to_vec();
        let params = module.continuation(dest).params.clone();
        if params.len() != args.len() {
            return false;
        }

        // Rewire the destination's parameter uses to the supplied
        // arguments.
        for (param, arg) in params.iter().zip(args.iter()) {
            module.replace_all_uses_with(*param, *arg);
        }

        // Take the destination's terminal and cleanups.
        let dest_terminal = module
            .continuation_mut(dest)
            .terminal
            .take()
            .expect("merge destination has a terminal");
        let dest_cleanups = std::mem::take(&mut module.continuation_mut(dest).cleanups);

        // Retire the apply and its function_ref.
        module.continuation_mut(cont).terminal = None;
        module.remove_primop(apply);
        module.remove_primop(callee);

        // Install the absorbed terminal; its successor edges now originate
        // here.
        module.continuation_mut(cont).cleanups.extend(dest_cleanups);
        module.continuation_mut(cont).terminal = Some(dest_terminal);
        let successors = module.primop(dest_terminal).successors.to_vec();
        for s in successors {
            module.successor_mut(s).from = cont;
        }

        module.remove_continuation(dest);
        self.merged += 1;
        worklist.extend(module.succ_conts(cont));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::value::Ownership;

    fn run_pass(module: &mut Module, entry: ValueId) -> bool {
        let scope = Scope::new(module, entry);
        SimplifyCfg::new().run(module, &scope).unwrap()
    }

    #[test]
    fn single_predecessor_apply_is_merged() {
        // bb0: apply function_ref(bb1)(); bb1: unreachable.
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        let bb0 = b.continuation("f");
        let bb1 = b.inner_continuation("k");
        b.unreachable(bb1).unwrap();
        let fr = b.function_ref(bb1).unwrap();
        b.apply(bb0, fr, &[]).unwrap();

        assert!(run_pass(&mut module, bb0));

        // bb0 absorbed bb1's unreachable terminal; bb1 is gone.
        let terminal = module.continuation(bb0).terminal.unwrap();
        assert!(matches!(module.primop(terminal).opcode, Opcode::Unreachable));
        assert!(module.try_value(bb1).is_none());
        let scope = Scope::new(&module, bb0);
        assert_eq!(scope.continuations(), &[bb0]);
        crate::verify::verify(&module).unwrap();
    }

    #[test]
    fn merge_substitutes_arguments_for_parameters() {
        // bb0(x, ret): apply function_ref(bb1)(x); bb1(y): apply ret(y).
        let mut module = Module::new("m");
        let nat = module.define_data("Nat", vec![("zero".into(), None)]).unwrap();
        let mut b = Builder::new(&mut module);
        let bb0 = b.continuation("f");
        let x = b.parameter(bb0, "x", nat, Ownership::Owned).unwrap();
        let ret_ty = b.module().function_type(vec![nat]);
        let ret = b.parameter(bb0, "ret", ret_ty, Ownership::Owned).unwrap();

        let bb1 = b.inner_continuation("k");
        let y = b.parameter(bb1, "y", nat, Ownership::Owned).unwrap();
        b.apply(bb1, ret, &[y]).unwrap();

        let fr = b.function_ref(bb1).unwrap();
        b.apply(bb0, fr, &[x]).unwrap();

        assert!(run_pass(&mut module, bb0));

        // bb0 now applies ret directly to x.
        let terminal = module.continuation(bb0).terminal.unwrap();
        let operands = module.operand_values(terminal);
        assert_eq!(operands, vec![ret, x]);
        assert!(module.try_value(bb1).is_none());
        crate::verify::verify(&module).unwrap();
    }

    #[test]
    fn continuation_without_predecessors_is_removed() {
        // bb0 switches to bb1 and bb2; the scope is taken, then the edge
        // to bb2 is severed. Rerunning the pass over the stale scope must
        // delete bb2.
        let mut module = Module::new("m");
        let bit = module
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();
        let mut b = Builder::new(&mut module);
        let bb0 = b.continuation("f");
        let s = b.parameter(bb0, "s", bit, Ownership::Owned).unwrap();
        let bb1 = b.inner_continuation("lo");
        b.unreachable(bb1).unwrap();
        let bb2 = b.inner_continuation("hi");
        b.unreachable(bb2).unwrap();
        let fr1 = b.function_ref(bb1).unwrap();
        let fr2 = b.function_ref(bb2).unwrap();
        b.switch_constr(bb0, s, &[("lo".into(), fr1), ("hi".into(), fr2)], None)
            .unwrap();

        let scope = Scope::new(&module, bb0);

        // Sever the hi edge: drop the switch's use of fr2, the successor
        // record, and the now-orphaned function_ref.
        let switch = module.continuation(bb0).terminal.unwrap();
        let fr2_use = module
            .users(fr2)
            .next()
            .expect("the switch uses fr2");
        module.drop_operand(fr2_use);
        let record = module.preds(bb2).next().unwrap();
        module.drop_successor(record);
        module.remove_primop(fr2);
        assert!(module.pred_conts(bb2).is_empty());
        assert_eq!(module.operand_values(switch).len(), 2);

        assert!(SimplifyCfg::new().run(&mut module, &scope).unwrap());
        assert!(module.try_value(bb2).is_none());
        assert!(module.try_value(bb1).is_some());
    }

    #[test]
    fn chain_of_merges_collapses_to_one_block() {
        // bb0 -> bb1 -> bb2, each a single-predecessor apply chain.
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        let bb0 = b.continuation("f");
        let bb1 = b.inner_continuation("a");
        let bb2 = b.inner_continuation("b");
        b.unreachable(bb2).unwrap();
        let fr2 = b.function_ref(bb2).unwrap();
        b.apply(bb1, fr2, &[]).unwrap();
        let fr1 = b.function_ref(bb1).unwrap();
        b.apply(bb0, fr1, &[]).unwrap();

        assert!(run_pass(&mut module, bb0));

        let scope = Scope::new(&module, bb0);
        assert_eq!(scope.continuations(), &[bb0]);
        let terminal = module.continuation(bb0).terminal.unwrap();
        assert!(matches!(module.primop(terminal).opcode, Opcode::Unreachable));
        assert!(module.try_value(bb1).is_none());
        assert!(module.try_value(bb2).is_none());
    }
}
