//! Module verification.
//!
//! Walks every continuation and checks the structural contracts the rest of
//! the pipeline relies on: a terminal exists, every operand's type is known
//! to the module, `apply` arity and argument types agree with the callee's
//! function type, and `switch_constr` names real constructors of its
//! scrutinee's data type.
//!
//! Policy: stop at the first failure per continuation, continue with the
//! next continuation, and report everything found. The emitter treats any
//! failure as fatal.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{GirError, VerificationFailure};
use crate::id::ValueId;
use crate::module::Module;
use crate::primop::Opcode;
use crate::types::TypeNode;

/// Verifies the whole module, accumulating one failure per offending
/// continuation.
pub fn verify(module: &Module) -> Result<(), GirError> {
    let mut failures = Vec::new();
    let continuations: Vec<ValueId> = module
        .values()
        .filter(|v| v.as_continuation().is_some())
        .map(|v| v.id)
        .collect();

    for cont in continuations {
        if let Err(failure) = verify_continuation(module, cont) {
            failures.push(failure);
        }
    }

    if failures.is_empty() {
        debug!(module = %module.name, "verification passed");
        Ok(())
    } else {
        Err(GirError::VerificationFailed(failures))
    }
}

fn fail(module: &Module, cont: ValueId, reason: impl Into<String>) -> VerificationFailure {
    VerificationFailure {
        continuation: module.value(cont).name.clone(),
        reason: reason.into(),
    }
}

fn verify_continuation(module: &Module, cont: ValueId) -> Result<(), VerificationFailure> {
    let c = module.continuation(cont);
    let Some(terminal) = c.terminal else {
        return Err(fail(module, cont, "continuation has no terminal"));
    };

    for cleanup in &c.cleanups {
        if !module.primop(*cleanup).opcode.is_cleanup_kind() {
            return Err(fail(module, cont, "cleanup list holds a non-cleanup primop"));
        }
    }

    // Walk every primop reachable from the terminal and cleanups.
    let mut stack: Vec<ValueId> = vec![terminal];
    stack.extend(c.cleanups.iter().copied());
    let mut seen = HashSet::new();
    while let Some(v) = stack.pop() {
        if !seen.insert(v) {
            continue;
        }
        verify_primop(module, cont, v)?;
        for operand in module.operand_values(v) {
            if module.value(operand).as_primop().is_some() {
                stack.push(operand);
            }
        }
    }
    Ok(())
}

fn verify_primop(module: &Module, cont: ValueId, primop: ValueId) -> Result<(), VerificationFailure> {
    let p = module.primop(primop);
    let operands = module.operand_values(primop);

    // Every operand's owner is this primop and its type resolves.
    for &op_id in &p.operands {
        let operand = module.operand(op_id);
        if operand.owner != primop {
            return Err(fail(module, cont, "operand owner does not match its primop"));
        }
        let value = match module.try_value(operand.value) {
            Some(v) => v,
            None => return Err(fail(module, cont, "operand references a dead value")),
        };
        if module.try_value(value.ty).is_none() {
            return Err(fail(module, cont, format!("unknown type on operand of {}", p.opcode.mnemonic())));
        }
    }

    match &p.opcode {
        Opcode::Apply => {
            let callee = operands[0];
            let callee_ty = module.ty_of(callee);
            let arguments = match module.type_node(callee_ty) {
                Some(TypeNode::Function { arguments }) => arguments.clone(),
                _ => return Err(fail(module, cont, "apply callee is not of function type")),
            };
            let args = &operands[1..];
            if arguments.len() != args.len() {
                return Err(fail(
                    module,
                    cont,
                    format!(
                        "apply arity mismatch: callee takes {}, got {}",
                        arguments.len(),
                        args.len()
                    ),
                ));
            }
            for (i, (&arg, &want)) in args.iter().zip(arguments.iter()).enumerate() {
                let got = module.ty_of(arg);
                // Dependent positions (a non-type value or archetype in
                // type position) cannot be decided without substitution.
                let concrete = !matches!(
                    module.type_node(want),
                    None | Some(TypeNode::Archetype { .. })
                );
                if concrete && got != want {
                    return Err(fail(module, cont, format!("apply argument {} type mismatch", i)));
                }
            }
        }
        Opcode::SwitchConstr { cases, has_default } => {
            let scrutinee_ty = module.ty_of(operands[0]);
            let def = match module.data_def(scrutinee_ty) {
                Some(def) => def,
                None => return Err(fail(module, cont, "switch_constr scrutinee is not of data type")),
            };
            for case in cases {
                if !def.constructors.contains_key(case) {
                    return Err(fail(
                        module,
                        cont,
                        format!("switch_constr names unknown constructor '{}'", case),
                    ));
                }
            }
            let expected = cases.len() + 1 + usize::from(*has_default);
            if operands.len() != expected {
                return Err(fail(module, cont, "switch_constr destination count mismatch"));
            }
        }
        Opcode::DataInit { constructor } | Opcode::DataExtract { constructor } => {
            let data_ty = match &p.opcode {
                Opcode::DataInit { .. } => operands[0],
                _ => module.ty_of(operands[0]),
            };
            if module
                .data_def(data_ty)
                .map(|d| !d.constructors.contains_key(constructor))
                .unwrap_or(true)
            {
                return Err(fail(
                    module,
                    cont,
                    format!("unknown constructor '{}'", constructor),
                ));
            }
        }
        _ => {}
    }

    // Terminal bookkeeping: successor records must match function_ref
    // destinations.
    if p.opcode.is_terminal() {
        let dests: Vec<ValueId> = operands
            .iter()
            .filter_map(|&v| module.function_ref_dest(v))
            .collect();
        let recorded: Vec<ValueId> = p
            .successors
            .iter()
            .map(|&s| module.successor(s).dest)
            .collect();
        if dests != recorded {
            return Err(fail(module, cont, "successor records do not match function_ref destinations"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::value::Ownership;

    #[test]
    fn well_formed_module_passes() {
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        let t = b.module().type_type();
        let entry = b.continuation("id");
        let ty = b.parameter(entry, "T", t, Ownership::Owned).unwrap();
        let x = b.parameter(entry, "x", ty, Ownership::Owned).unwrap();
        let ret_ty = b.module().function_type(vec![ty]);
        let ret = b.parameter(entry, "ret", ret_ty, Ownership::Owned).unwrap();
        let copy = b.copy_value(x).unwrap();
        b.insert_cleanup(entry, Opcode::DestroyValue, x).unwrap();
        b.apply(entry, ret, &[copy]).unwrap();

        assert!(verify(&module).is_ok());
    }

    #[test]
    fn missing_terminal_is_reported() {
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        b.continuation("f");
        let err = verify(&module).unwrap_err();
        match err {
            GirError::VerificationFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].reason.contains("no terminal"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn verifier_continues_past_a_failing_continuation() {
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        b.continuation("bad_one");
        b.continuation("bad_two");
        let ok = b.continuation("good");
        b.unreachable(ok).unwrap();

        let err = verify(&module).unwrap_err();
        match err {
            GirError::VerificationFailed(failures) => {
                let names: Vec<&str> =
                    failures.iter().map(|f| f.continuation.as_str()).collect();
                assert_eq!(names, vec!["bad_one", "bad_two"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
