//! Scope discovery, reverse post-order, and dominator trees.
//!
//! A [`Scope`] is derived on demand from an entry continuation: the
//! transitive closure of continuations reachable by following terminal
//! successor records and the destinations of `function_ref` primops
//! discovered in each reached continuation's operand graph, bounded by an
//! optional blacklist of non-entered continuations. Top-level continuations
//! other than the entry are function boundaries and are never entered.
//!
//! Both RPO and the dominator tree are pure analyses over a snapshot of the
//! module; recompute them after any structural change. The dominator tree
//! uses `petgraph`'s `simple_fast`, the iterative Cooper-Harvey-Kennedy
//! algorithm: repeatedly intersect the predecessors' immediate dominators
//! in RPO numbering until a fixed point.

use std::collections::HashSet;

use petgraph::algo::dominators::{simple_fast, Dominators};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::id::ValueId;
use crate::module::Module;
use crate::primop::Opcode;

/// The set of continuations reachable from an entry.
#[derive(Debug, Clone)]
pub struct Scope {
    entry: ValueId,
    /// Members in discovery order.
    continuations: Vec<ValueId>,
    members: HashSet<ValueId>,
    blacklist: HashSet<ValueId>,
}

impl Scope {
    /// Floods from `entry` with an empty blacklist.
    pub fn new(module: &Module, entry: ValueId) -> Self {
        Self::with_blacklist(module, entry, &[])
    }

    /// Floods from `entry`, refusing to enter the blacklisted
    /// continuations.
    pub fn with_blacklist(module: &Module, entry: ValueId, blacklist: &[ValueId]) -> Self {
        let blacklist: HashSet<ValueId> = blacklist.iter().copied().collect();
        let mut members = HashSet::new();
        let mut continuations = Vec::new();
        let mut worklist = vec![entry];
        members.insert(entry);

        while let Some(cont) = worklist.pop() {
            continuations.push(cont);
            for dest in referenced_continuations(module, cont) {
                if blacklist.contains(&dest) || members.contains(&dest) {
                    continue;
                }
                if module.continuation(dest).top_level {
                    continue;
                }
                members.insert(dest);
                worklist.push(dest);
            }
        }

        debug!(entry = %module.value(entry).name, count = continuations.len(), "scope flooded");
        Scope { entry, continuations, members, blacklist }
    }

    /// The entry continuation.
    pub fn entry(&self) -> ValueId {
        self.entry
    }

    /// Members in discovery order.
    pub fn continuations(&self) -> &[ValueId] {
        &self.continuations
    }

    /// Membership test.
    pub fn contains(&self, cont: ValueId) -> bool {
        self.members.contains(&cont)
    }

    /// The non-entered boundary.
    pub fn blacklisted(&self, cont: ValueId) -> bool {
        self.blacklist.contains(&cont)
    }

    /// Terminal successors of `cont` restricted to this scope, in record
    /// order.
    pub fn succs(&self, module: &Module, cont: ValueId) -> Vec<ValueId> {
        module
            .succ_conts(cont)
            .into_iter()
            .filter(|d| self.contains(*d))
            .collect()
    }

    /// Reverse post-order over the scope CFG: iterative post-order DFS in
    /// successor-record order, then reversed. Deterministic for identical
    /// modules.
    pub fn rpo(&self, module: &Module) -> Vec<ValueId> {
        let mut postorder = Vec::with_capacity(self.continuations.len());
        let mut visited = HashSet::new();
        // Stack entries: (continuation, successors already pushed).
        let mut stack: Vec<(ValueId, bool)> = vec![(self.entry, false)];
        visited.insert(self.entry);

        while let Some((cont, expanded)) = stack.pop() {
            if expanded {
                postorder.push(cont);
                continue;
            }
            stack.push((cont, true));
            // Reverse push order so the first successor is visited first.
            for succ in self.succs(module, cont).into_iter().rev() {
                if visited.insert(succ) {
                    stack.push((succ, false));
                }
            }
        }

        postorder.reverse();
        postorder
    }
}

/// Continuations referenced by `cont`: terminal successor-record
/// destinations plus the destinations of every `function_ref` discovered by
/// walking the operand graph from the terminal and cleanups.
fn referenced_continuations(module: &Module, cont: ValueId) -> Vec<ValueId> {
    let mut out = Vec::new();
    let c = module.continuation(cont);

    out.extend(module.succ_conts(cont));

    let mut stack: Vec<ValueId> = Vec::new();
    stack.extend(c.terminal);
    stack.extend(c.cleanups.iter().copied());
    let mut seen = HashSet::new();
    while let Some(v) = stack.pop() {
        if !seen.insert(v) {
            continue;
        }
        let Some(primop) = module.value(v).as_primop() else { continue };
        if matches!(primop.opcode, Opcode::FunctionRef) {
            if let Some(dest) = module.function_ref_dest(v) {
                out.push(dest);
            }
            continue;
        }
        for v in module.operand_values(v) {
            if module.value(v).as_primop().is_some() {
                stack.push(v);
            }
        }
    }
    out
}

/// Immediate-dominator tree of a scope.
pub struct DomTree {
    doms: Dominators<ValueId>,
}

impl DomTree {
    /// Builds the tree for `scope` with `simple_fast` over the scope CFG.
    pub fn compute(module: &Module, scope: &Scope) -> Self {
        let mut graph = DiGraphMap::<ValueId, ()>::new();
        for &cont in scope.continuations() {
            graph.add_node(cont);
        }
        for &cont in scope.continuations() {
            for succ in scope.succs(module, cont) {
                graph.add_edge(cont, succ, ());
            }
        }
        DomTree { doms: simple_fast(&graph, scope.entry()) }
    }

    /// The immediate dominator of `cont`; `None` for the entry and for
    /// continuations unreachable from it.
    pub fn idom(&self, cont: ValueId) -> Option<ValueId> {
        self.doms.immediate_dominator(cont)
    }

    /// Whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: ValueId, b: ValueId) -> bool {
        match self.doms.dominators(b) {
            Some(mut chain) => chain.any(|d| d == a),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::value::Ownership;

    /// Diamond CFG: entry -> (left | right) -> join.
    fn diamond(module: &mut Module) -> (ValueId, ValueId, ValueId, ValueId) {
        let bit = module
            .define_data("Bit", vec![("lo".into(), None), ("hi".into(), None)])
            .unwrap();
        let mut b = Builder::new(module);
        let entry = b.continuation("f");
        let s = b.parameter(entry, "s", bit, Ownership::Owned).unwrap();
        let left = b.inner_continuation("left");
        let right = b.inner_continuation("right");
        let join = b.inner_continuation("join");

        let join_ref_l = b.function_ref(join).unwrap();
        b.apply(left, join_ref_l, &[]).unwrap();
        let join_ref_r = b.function_ref(join).unwrap();
        b.apply(right, join_ref_r, &[]).unwrap();
        b.unreachable(join).unwrap();

        let left_ref = b.function_ref(left).unwrap();
        let right_ref = b.function_ref(right).unwrap();
        b.switch_constr(entry, s, &[("lo".into(), left_ref), ("hi".into(), right_ref)], None)
            .unwrap();
        (entry, left, right, join)
    }

    #[test]
    fn scope_closure_over_successors() {
        let mut module = Module::new("m");
        let (entry, left, right, join) = diamond(&mut module);
        let scope = Scope::new(&module, entry);
        for cont in [entry, left, right, join] {
            assert!(scope.contains(cont));
        }
        // Every successor of a member is a member.
        for &cont in scope.continuations() {
            for succ in module.succ_conts(cont) {
                assert!(scope.contains(succ) || scope.blacklisted(succ));
            }
        }
    }

    #[test]
    fn blacklist_bounds_the_flood() {
        let mut module = Module::new("m");
        let (entry, left, _right, join) = diamond(&mut module);
        let scope = Scope::with_blacklist(&module, entry, &[join]);
        assert!(scope.contains(left));
        assert!(!scope.contains(join));
    }

    #[test]
    fn top_level_continuations_are_not_entered() {
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        let main = b.continuation("main");
        let helper = b.continuation("helper");
        b.unreachable(helper).unwrap();
        let helper_ref = b.function_ref(helper).unwrap();
        b.apply(main, helper_ref, &[]).unwrap();

        let scope = Scope::new(&module, main);
        assert!(scope.contains(main));
        assert!(!scope.contains(helper));
    }

    #[test]
    fn rpo_starts_at_entry_and_is_deterministic() {
        let mut module = Module::new("m");
        let (entry, left, right, join) = diamond(&mut module);
        let scope = Scope::new(&module, entry);
        let rpo = scope.rpo(&module);
        assert_eq!(rpo[0], entry);
        assert_eq!(rpo.len(), 4);
        // Post-order visits the left arm first, so the reversal lists the
        // right arm before it; the join comes last.
        assert_eq!(rpo, vec![entry, right, left, join]);
        // Same module, same order.
        assert_eq!(rpo, Scope::new(&module, entry).rpo(&module));
    }

    #[test]
    fn dominators_of_a_diamond() {
        let mut module = Module::new("m");
        let (entry, left, right, join) = diamond(&mut module);
        let scope = Scope::new(&module, entry);
        let dom = DomTree::compute(&module, &scope);

        assert_eq!(dom.idom(entry), None);
        assert_eq!(dom.idom(left), Some(entry));
        assert_eq!(dom.idom(right), Some(entry));
        // Neither branch dominates the join; the entry does.
        assert_eq!(dom.idom(join), Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(left, join));
        assert!(dom.dominates(join, join));

        // idom(n) dominates every predecessor of n.
        for &cont in scope.continuations() {
            if let Some(idom) = dom.idom(cont) {
                for pred in module.pred_conts(cont) {
                    assert!(dom.dominates(idom, pred));
                }
            }
        }
    }
}
