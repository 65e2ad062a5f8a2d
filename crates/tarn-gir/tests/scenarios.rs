//! End-to-end scenarios over the public API: building, verifying,
//! scheduling, printing, parsing, and pipeline-driven simplification.

use tarn_gir::{
    parse_module, pass_by_name, print_module, verify, Builder, Module, Opcode, Ownership,
    Pipeline, Schedule, ScheduleTag, Scope,
};

/// The polymorphic identity function:
/// `@id : (T : Type) -> T -> (T -> ⊥)` with a copy of the argument
/// returned and the original destroyed on the way out.
fn build_identity(module: &mut Module) -> tarn_gir::ValueId {
    let mut b = Builder::new(module);
    let type_type = b.module().type_type();
    let entry = b.continuation("id");
    let t = b.parameter(entry, "T", type_type, Ownership::Owned).unwrap();
    let x = b.parameter(entry, "x", t, Ownership::Owned).unwrap();
    let ret_ty = b.module().function_type(vec![t]);
    let ret = b.parameter(entry, "ret", ret_ty, Ownership::Owned).unwrap();

    let copy = b.copy_value(x).unwrap();
    b.insert_cleanup(entry, Opcode::DestroyValue, x).unwrap();
    b.apply(entry, ret, &[copy]).unwrap();
    entry
}

#[test]
fn identity_function_verifies_schedules_and_roundtrips() {
    let mut module = Module::new("m");
    let entry = build_identity(&mut module);

    verify(&module).unwrap();

    let scope = Scope::new(&module, entry);
    let schedule = Schedule::compute(&module, &scope, ScheduleTag::Early).unwrap();
    let block = schedule.block(entry).unwrap();
    let mnemonics: Vec<&str> = block
        .primops
        .iter()
        .map(|&p| module.primop(p).opcode.mnemonic())
        .collect();
    assert_eq!(mnemonics, vec!["copy_value", "destroy_value", "apply"]);

    // Textual round-trip reaches a fixed point immediately.
    let printed = print_module(&module).unwrap();
    let reparsed = parse_module(&printed).unwrap();
    verify(&reparsed).unwrap();
    assert_eq!(print_module(&reparsed).unwrap(), printed);
}

#[test]
fn pipeline_simplify_cfg_merges_trivial_apply() {
    // bb0 applies a function_ref to bb1, which has bb0 as its only
    // predecessor and ends in unreachable.
    let mut module = Module::new("m");
    let mut b = Builder::new(&mut module);
    let bb0 = b.continuation("f");
    let bb1 = b.inner_continuation("k");
    b.unreachable(bb1).unwrap();
    let fr = b.function_ref(bb1).unwrap();
    b.apply(bb0, fr, &[]).unwrap();

    let mut pipeline = Pipeline::new();
    let stage = pipeline.add_stage("cleanup").unwrap();
    pipeline.add_pass(stage, pass_by_name("SimplifyCFG").unwrap()).unwrap();
    pipeline.execute(&mut module).unwrap();

    let scope = Scope::new(&module, bb0);
    assert_eq!(scope.continuations(), &[bb0]);
    let terminal = module.continuation(bb0).terminal.unwrap();
    assert!(matches!(module.primop(terminal).opcode, Opcode::Unreachable));
    assert!(module.try_value(bb1).is_none());
    verify(&module).unwrap();
}

#[test]
fn dropping_an_operand_updates_the_use_chain() {
    // %a = copy_value %x; destroy_value %x -- dropping the destroy's
    // operand leaves only the copy as a user of %x.
    let mut module = Module::new("m");
    let nat = module.define_data("Nat", vec![("zero".into(), None)]).unwrap();
    let mut b = Builder::new(&mut module);
    let entry = b.continuation("f");
    let x = b.parameter(entry, "x", nat, Ownership::Owned).unwrap();
    let copy = b.copy_value(x).unwrap();
    let destroy = b.destroy_value(x).unwrap();

    let destroy_use = module.primop(destroy).operands[0];
    module.drop_use(destroy_use);

    let owners: Vec<_> = module.users(x).map(|op| module.operand(op).owner).collect();
    assert_eq!(owners, vec![copy]);
}

#[test]
fn optimize_flow_from_text_to_text() {
    // The CLI's optimize path: parse, run a named pass, print.
    let text = "\
module m where

@f : () -> ⊥ {
bb0():
  %0 = function_ref bb1
  apply %0()
bb1():
  unreachable
}
";
    let mut module = parse_module(text).unwrap();
    verify(&module).unwrap();

    let mut pipeline = Pipeline::new();
    let stage = pipeline.add_stage("optimize").unwrap();
    pipeline.add_pass(stage, pass_by_name("SimplifyCFG").unwrap()).unwrap();
    pipeline.execute(&mut module).unwrap();

    let printed = print_module(&module).unwrap();
    assert_eq!(
        printed,
        "\
module m where

@f : () -> ⊥ {
bb0():
  unreachable
}
"
    );
}
