//! The textual GIR writer.
//!
//! Renders a module in the bit-exact interchange format the reader in
//! [`crate::parse`] accepts:
//!
//! ```text
//! module m where
//!
//! data Nat { zero; succ Nat }
//!
//! @f : (Nat, (Nat) -> ⊥) -> ⊥ {
//! bb0(%0 : Nat; %1 : (Nat) -> ⊥):
//!   %2 = data_init Nat.zero
//!   apply %1(%2)
//! }
//! ```
//!
//! Blocks are numbered `bbN` in reverse post-order; SSA ids `%k` are
//! assigned per function, parameters first, then scheduled results in
//! block order. Types print `*` prefixed when address category; a value
//! standing in type position prints as its SSA id. User comments begin
//! `--` and are ignored by the reader.

use std::collections::HashMap;
use std::fmt::Write;

use crate::error::GirError;
use crate::id::ValueId;
use crate::module::Module;
use crate::primop::{AllocKind, LoadOwnership, Opcode};
use crate::schedule::{Schedule, ScheduleTag};
use crate::scope::Scope;
use crate::types::TypeNode;

/// Per-function naming environment: SSA numbering plus block numbering.
pub(crate) struct Names {
    ssa: HashMap<ValueId, usize>,
    blocks: HashMap<ValueId, usize>,
}

/// Prints a whole module. Fails if any continuation lacks a terminal,
/// since blocks cannot be scheduled without one.
pub fn print_module(module: &Module) -> Result<String, GirError> {
    let mut out = String::new();
    writeln!(out, "module {} where", module.name).unwrap();

    // Nominal type declarations, in interning order.
    for value in module.values() {
        match value.as_type() {
            Some(TypeNode::Data(def)) if !def.constructors.is_empty() => {
                out.push('\n');
                write!(out, "data {} {{ ", def.name).unwrap();
                let ctors: Vec<String> = def
                    .constructors
                    .iter()
                    .map(|(name, ctor)| match ctor.payload {
                        Some(payload) => {
                            format!("{} {}", name, print_type(module, payload, None))
                        }
                        None => name.clone(),
                    })
                    .collect();
                write!(out, "{}", ctors.join("; ")).unwrap();
                writeln!(out, " }}").unwrap();
            }
            Some(TypeNode::Record(def)) if !def.fields.is_empty() => {
                out.push('\n');
                write!(out, "record {} {{ ", def.name).unwrap();
                let fields: Vec<String> = def
                    .fields
                    .iter()
                    .map(|(name, ty)| format!("{} : {}", name, print_type(module, *ty, None)))
                    .collect();
                write!(out, "{}", fields.join("; ")).unwrap();
                writeln!(out, " }}").unwrap();
            }
            _ => {}
        }
    }

    for &cont in module.top_level() {
        out.push('\n');
        print_function(module, cont, &mut out)?;
    }
    Ok(out)
}

fn print_function(module: &Module, entry: ValueId, out: &mut String) -> Result<(), GirError> {
    let scope = Scope::new(module, entry);
    for &cont in scope.continuations() {
        if module.continuation(cont).terminal.is_none() {
            return Err(GirError::VerificationFailed(vec![crate::error::VerificationFailure {
                continuation: module.value(cont).name.clone(),
                reason: "cannot print a continuation without a terminal".into(),
            }]));
        }
    }
    let schedule = Schedule::compute(module, &scope, ScheduleTag::Early)?;

    // Assign block and SSA numbers in schedule order.
    let mut names = Names { ssa: HashMap::new(), blocks: HashMap::new() };
    let mut next_ssa = 0usize;
    for (i, block) in schedule.blocks().iter().enumerate() {
        names.blocks.insert(block.continuation, i);
        for &param in &module.continuation(block.continuation).params {
            names.ssa.insert(param, next_ssa);
            next_ssa += 1;
        }
        for &primop in &block.primops {
            if module.primop(primop).opcode.has_result() {
                names.ssa.insert(primop, next_ssa);
                next_ssa += 1;
            }
        }
    }

    let entry_name = &module.value(entry).name;
    let entry_ty = module.ty_of(entry);
    writeln!(out, "@{} : {} {{", entry_name, print_type(module, entry_ty, Some(&names))).unwrap();

    for block in schedule.blocks() {
        let params: Vec<String> = module
            .continuation(block.continuation)
            .params
            .iter()
            .map(|&p| {
                format!(
                    "%{} : {}",
                    names.ssa[&p],
                    print_type(module, module.ty_of(p), Some(&names))
                )
            })
            .collect();
        writeln!(out, "bb{}({}):", names.blocks[&block.continuation], params.join("; ")).unwrap();
        for &primop in &block.primops {
            writeln!(out, "  {}", print_primop(module, primop, &names)).unwrap();
        }
    }
    writeln!(out, "}}").unwrap();
    Ok(())
}

/// Prints a type. `names` carries the enclosing function's numbering; a
/// value in type position (dependent signature) prints as its SSA id.
pub(crate) fn print_type(module: &Module, ty: ValueId, names: Option<&Names>) -> String {
    match module.type_node(ty) {
        None => match names.and_then(|n| n.ssa.get(&ty)) {
            Some(k) => format!("%{}", k),
            None => format!("%{}", module.value(ty).name),
        },
        Some(TypeNode::Bottom) => "⊥".into(),
        Some(TypeNode::Type) => "Type".into(),
        Some(TypeNode::TypeMetadata) => "TypeMetadata".into(),
        Some(TypeNode::Data(def)) => def.name.clone(),
        Some(TypeNode::Record(def)) => def.name.clone(),
        Some(TypeNode::Archetype { name }) => name.clone(),
        Some(TypeNode::Box { inner }) => format!("(box {})", print_type(module, *inner, names)),
        Some(TypeNode::Substituted { base, arguments }) => {
            let args: Vec<String> =
                arguments.iter().map(|&a| print_type(module, a, names)).collect();
            format!("{}({})", print_type(module, *base, names), args.join(", "))
        }
        Some(TypeNode::Function { arguments }) => {
            let args: Vec<String> =
                arguments.iter().map(|&a| print_type(module, a, names)).collect();
            format!("({}) -> ⊥", args.join(", "))
        }
        Some(TypeNode::Tuple { elements }) => {
            let elems: Vec<String> =
                elements.iter().map(|&e| print_type(module, e, names)).collect();
            format!("({})", elems.join(", "))
        }
        Some(TypeNode::Address { pointee }) => format!("*{}", print_type(module, *pointee, names)),
    }
}

fn operand(module: &Module, v: ValueId, names: &Names) -> String {
    if let Some(cont) = module.value(v).as_continuation() {
        return if cont.top_level {
            format!("@{}", module.value(v).name)
        } else {
            format!("bb{}", names.blocks[&v])
        };
    }
    match names.ssa.get(&v) {
        Some(k) => format!("%{}", k),
        None => print_type(module, v, Some(names)),
    }
}

fn print_primop(module: &Module, primop: ValueId, names: &Names) -> String {
    let p = module.primop(primop);
    let ops = module.operand_values(primop);
    let result = if p.opcode.has_result() {
        format!("%{} = ", names.ssa[&primop])
    } else {
        String::new()
    };

    let body = match &p.opcode {
        Opcode::Apply => {
            let args: Vec<String> = ops[1..].iter().map(|&v| operand(module, v, names)).collect();
            format!("apply {}({})", operand(module, ops[0], names), args.join(", "))
        }
        Opcode::FunctionRef => format!("function_ref {}", operand(module, ops[0], names)),
        Opcode::SwitchConstr { cases, has_default } => {
            let arms: Vec<String> = cases
                .iter()
                .zip(ops[1..].iter())
                .map(|(name, &dest)| format!("{}: {}", name, operand(module, dest, names)))
                .collect();
            let mut s = format!(
                "switch_constr {} [{}]",
                operand(module, ops[0], names),
                arms.join(", ")
            );
            if *has_default {
                write!(s, " default {}", operand(module, *ops.last().unwrap(), names)).unwrap();
            }
            s
        }
        Opcode::Unreachable => "unreachable".into(),
        Opcode::DataInit { constructor } => {
            let ty = print_type(module, ops[0], Some(names));
            match ops.get(1) {
                Some(&payload) => format!(
                    "data_init {}.{}({})",
                    ty,
                    constructor,
                    operand(module, payload, names)
                ),
                None => format!("data_init {}.{}", ty, constructor),
            }
        }
        Opcode::DataExtract { constructor } => format!(
            "data_extract {} {} : {}",
            operand(module, ops[0], names),
            constructor,
            print_type(module, module.ty_of(primop), Some(names))
        ),
        Opcode::Tuple => {
            let elems: Vec<String> = ops.iter().map(|&v| operand(module, v, names)).collect();
            format!("tuple({})", elems.join(", "))
        }
        Opcode::TupleElementAddress { index } => {
            format!("tuple_element_address {}, {}", operand(module, ops[0], names), index)
        }
        Opcode::CopyValue => format!("copy_value {}", operand(module, ops[0], names)),
        Opcode::DestroyValue => format!("destroy_value {}", operand(module, ops[0], names)),
        Opcode::Load { ownership } => {
            let mode = match ownership {
                LoadOwnership::Copy => "copy",
                LoadOwnership::Take => "take",
            };
            format!("load {} {}", mode, operand(module, ops[0], names))
        }
        Opcode::Store => format!(
            "store {} to {}",
            operand(module, ops[0], names),
            operand(module, ops[1], names)
        ),
        Opcode::Alloca { kind } => {
            let kind = match kind {
                AllocKind::Stack => "",
                AllocKind::Heap => "[heap] ",
                AllocKind::Box => "[box] ",
            };
            format!("alloca {}{}", kind, print_type(module, ops[0], Some(names)))
        }
        Opcode::Dealloca => format!("dealloca {}", operand(module, ops[0], names)),
        Opcode::AllocBox => format!("alloc_box {}", print_type(module, ops[0], Some(names))),
        Opcode::ProjectBox => format!("project_box {}", operand(module, ops[0], names)),
        Opcode::DeallocBox => format!("dealloc_box {}", operand(module, ops[0], names)),
        Opcode::CopyAddress => format!(
            "copy_address {} to {}",
            operand(module, ops[0], names),
            operand(module, ops[1], names)
        ),
        Opcode::DestroyAddress => format!("destroy_address {}", operand(module, ops[0], names)),
        Opcode::Thicken => format!("thicken {}", operand(module, ops[0], names)),
        Opcode::ForceEffects => format!("force_effects {}", operand(module, ops[0], names)),
    };
    format!("{}{}", result, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::value::Ownership;

    #[test]
    fn identity_function_prints_stably() {
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

        let text = print_module(&module).unwrap();
        insta::assert_snapshot!(text, @r###"
        module m where

        @id : (Type, %0, (%0) -> ⊥) -> ⊥ {
        bb0(%0 : Type; %1 : %0; %2 : (%0) -> ⊥):
          %3 = copy_value %1
          destroy_value %1
          apply %2(%3)
        }
        "###);
    }

    #[test]
    fn nat_module_prints_declaration_and_switch() {
        let mut module = Module::new("arith");
        let nat = module.declare_data("Nat");
        module
            .define_data("Nat", vec![("zero".into(), None), ("succ".into(), Some(nat))])
            .unwrap();
        let mut b = Builder::new(&mut module);
        let entry = b.continuation("pred");
        let n = b.parameter(entry, "n", nat, Ownership::Owned).unwrap();
        let ret_ty = b.module().function_type(vec![nat]);
        let ret = b.parameter(entry, "ret", ret_ty, Ownership::Owned).unwrap();

        let on_zero = b.inner_continuation("on_zero");
        let zero = b.data_init(nat, "zero", None).unwrap();
        b.apply(on_zero, ret, &[zero]).unwrap();

        let on_succ = b.inner_continuation("on_succ");
        let prev = b.data_extract(n, "succ", nat).unwrap();
        b.apply(on_succ, ret, &[prev]).unwrap();

        let zero_ref = b.function_ref(on_zero).unwrap();
        let succ_ref = b.function_ref(on_succ).unwrap();
        b.switch_constr(entry, n, &[("zero".into(), zero_ref), ("succ".into(), succ_ref)], None)
            .unwrap();

        let text = print_module(&module).unwrap();
        assert!(text.contains("data Nat { zero; succ Nat }"));
        assert!(text.contains("switch_constr %0 [zero:"));
        assert!(text.contains("data_init Nat.zero"));
        assert!(text.contains("data_extract"));
    }

    #[test]
    fn missing_terminal_fails_to_print() {
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        b.continuation("f");
        assert!(print_module(&module).is_err());
    }

    #[test]
    fn address_types_print_starred() {
        let mut module = Module::new("m");
        let nat = module.define_data("Nat", vec![("zero".into(), None)]).unwrap();
        let addr = module.address_type(nat);
        assert_eq!(print_type(&module, addr, None), "*Nat");
        let boxed = module.box_type(nat);
        assert_eq!(print_type(&module, boxed, None), "(box Nat)");
    }
}
