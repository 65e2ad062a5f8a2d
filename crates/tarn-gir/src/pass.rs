//! The pass pipeliner.
//!
//! Passes come in two shapes: [`ScopePass`], run over every top-level scope,
//! and [`ModulePass`], run once over the whole module. A [`Pipeline`] holds
//! stage-ordered groups of pass factories; execution runs consecutive scope
//! passes together over every top-level scope (a worklist of
//! `(scope, pass-index)` pairs), flushing the scope-pass buffer whenever a
//! module pass is encountered.
//!
//! Passes are constructed fresh for each execution through their factory
//! functions and must be pure functions of their input. A `frozen` flag
//! prevents reentrant `add_stage` / `execute`.

use tracing::debug;

use crate::error::GirError;
use crate::module::Module;
use crate::scope::Scope;
use crate::simplify_cfg::SimplifyCfg;

/// A pass over one scope. `run` returns whether anything changed.
pub trait ScopePass {
    fn name(&self) -> &'static str;
    fn run(&mut self, module: &mut Module, scope: &Scope) -> Result<bool, GirError>;
}

/// A pass over the whole module.
pub trait ModulePass {
    fn name(&self) -> &'static str;
    fn run(&mut self, module: &mut Module) -> Result<(), GirError>;
}

/// Constructs a fresh pass instance per execution.
pub enum PassFactory {
    Scope(&'static str, fn() -> Box<dyn ScopePass>),
    Module(&'static str, fn() -> Box<dyn ModulePass>),
}

impl PassFactory {
    /// The pass's registered name.
    pub fn name(&self) -> &'static str {
        match self {
            PassFactory::Scope(name, _) => name,
            PassFactory::Module(name, _) => name,
        }
    }
}

/// Looks a pass up by its implementation name (the CLI contract).
pub fn pass_by_name(name: &str) -> Option<PassFactory> {
    match name {
        "SimplifyCFG" => Some(PassFactory::Scope("SimplifyCFG", || Box::new(SimplifyCfg::new()))),
        _ => None,
    }
}

/// One named, ordered group of passes.
struct Stage {
    name: String,
    passes: Vec<PassFactory>,
}

/// A stage-ordered pass pipeline.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
    frozen: bool,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { stages: Vec::new(), frozen: false }
    }

    /// Opens a new stage, returning its index for [`Pipeline::add_pass`].
    pub fn add_stage(&mut self, name: &str) -> Result<usize, GirError> {
        if self.frozen {
            return Err(GirError::InternalInvariantViolation {
                reason: "add_stage on a frozen pipeline".into(),
            });
        }
        self.stages.push(Stage { name: name.to_string(), passes: Vec::new() });
        Ok(self.stages.len() - 1)
    }

    /// Appends a pass to a stage.
    pub fn add_pass(&mut self, stage: usize, pass: PassFactory) -> Result<(), GirError> {
        if self.frozen {
            return Err(GirError::InternalInvariantViolation {
                reason: "add_pass on a frozen pipeline".into(),
            });
        }
        let stage = self.stages.get_mut(stage).ok_or_else(|| {
            GirError::InternalInvariantViolation { reason: "add_pass to an unknown stage".into() }
        })?;
        stage.passes.push(pass);
        Ok(())
    }

    /// Runs every stage in order. Freezes the pipeline; executing twice is
    /// an internal invariant violation.
    pub fn execute(&mut self, module: &mut Module) -> Result<(), GirError> {
        if self.frozen {
            return Err(GirError::InternalInvariantViolation {
                reason: "execute on a frozen pipeline".into(),
            });
        }
        self.frozen = true;

        for stage in &self.stages {
            debug!(stage = %stage.name, passes = stage.passes.len(), "running stage");
            let mut scope_buffer: Vec<&PassFactory> = Vec::new();
            for pass in &stage.passes {
                match pass {
                    PassFactory::Scope(..) => scope_buffer.push(pass),
                    PassFactory::Module(name, make) => {
                        Self::flush_scope_passes(module, &scope_buffer)?;
                        scope_buffer.clear();
                        debug!(pass = *name, "running module pass");
                        make().run(module)?;
                    }
                }
            }
            Self::flush_scope_passes(module, &scope_buffer)?;
        }
        Ok(())
    }

    /// Runs a batch of scope passes over every top-level scope: a worklist
    /// of `(scope entry, pass index)` pairs in stage order.
    fn flush_scope_passes(module: &mut Module, batch: &[&PassFactory]) -> Result<(), GirError> {
        if batch.is_empty() {
            return Ok(());
        }
        let entries = module.top_level().to_vec();
        let mut worklist: Vec<(crate::id::ValueId, usize)> = Vec::new();
        for entry in entries {
            for index in 0..batch.len() {
                worklist.push((entry, index));
            }
        }
        // Process in insertion order.
        worklist.reverse();
        while let Some((entry, index)) = worklist.pop() {
            if module.try_value(entry).is_none() {
                continue;
            }
            let PassFactory::Scope(name, make) = batch[index] else { unreachable!() };
            let scope = Scope::new(module, entry);
            debug!(pass = *name, entry = %module.value(entry).name, "running scope pass");
            make().run(module, &scope)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    struct CountingPass;

    impl ModulePass for CountingPass {
        fn name(&self) -> &'static str {
            "Counting"
        }
        fn run(&mut self, module: &mut Module) -> Result<(), GirError> {
            // Tag the run by uniquifying a name.
            module.fresh_name("pass_ran");
            Ok(())
        }
    }

    #[test]
    fn execute_freezes_the_pipeline() {
        let mut module = Module::new("m");
        let mut pipeline = Pipeline::new();
        let stage = pipeline.add_stage("cleanup").unwrap();
        pipeline
            .add_pass(stage, PassFactory::Module("Counting", || Box::new(CountingPass)))
            .unwrap();
        pipeline.execute(&mut module).unwrap();

        assert!(matches!(
            pipeline.execute(&mut module),
            Err(GirError::InternalInvariantViolation { .. })
        ));
        assert!(matches!(
            pipeline.add_stage("late"),
            Err(GirError::InternalInvariantViolation { .. })
        ));
    }

    #[test]
    fn pass_registry_knows_simplify_cfg() {
        assert!(pass_by_name("SimplifyCFG").is_some());
        assert!(pass_by_name("NoSuchPass").is_none());
    }

    #[test]
    fn scope_passes_run_over_every_top_level_scope() {
        let mut module = Module::new("m");
        let mut b = Builder::new(&mut module);
        let f = b.continuation("f");
        b.unreachable(f).unwrap();
        let g = b.continuation("g");
        b.unreachable(g).unwrap();

        let mut pipeline = Pipeline::new();
        let stage = pipeline.add_stage("cleanup").unwrap();
        pipeline.add_pass(stage, pass_by_name("SimplifyCFG").unwrap()).unwrap();
        pipeline.execute(&mut module).unwrap();

        // Nothing to simplify; both functions survive untouched.
        assert_eq!(module.top_level().len(), 2);
    }
}
