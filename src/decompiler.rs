//! The decompilation driver.
//!
//! [`Decompiler`] owns a [`Program`] and runs the full pipeline for each of its functions:
//!
//! ```text
//! preprocess (once)  ->  NodeBuilder  ->  PassScheduler  ->  StructureBuilder
//! ```
//!
//! A function whose pipeline fails never aborts the run. Its error is logged and kept as
//! [`FunctionOutput::Failed`], and the remaining functions are processed as usual. The
//! program is only mutated by [`Decompiler::preprocess`]; the per-function pipelines share
//! it read-only, which lets them run on a rayon pool when
//! [`DecompilerOptions::parallel`] is set. Results are always in input order.

use log::{debug, warn};
use rayon::prelude::*;

use crate::{
    analysis::{ControlFlowGraph, NodeBuilder, NodeGraph},
    compiler::{PassContext, PassScheduler},
    program::{Function, Program},
    structure::{ControlBlock, StructureBuilder},
    Error, Result,
};

/// Configuration of a [`Decompiler`].
#[derive(Debug, Clone)]
pub struct DecompilerOptions {
    /// Process functions on the rayon pool (default: false).
    pub parallel: bool,

    /// Forward and backward type rounds before the type-directed array collapse
    /// (default: 2). More rounds only ever refine types further.
    pub type_rounds: usize,

    /// Print global declarations before the functions (default: true).
    pub emit_globals: bool,
}

impl Default for DecompilerOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            type_rounds: 2,
            emit_globals: true,
        }
    }
}

impl DecompilerOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables parallel processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the number of initial type propagation rounds.
    #[must_use]
    pub fn with_type_rounds(mut self, rounds: usize) -> Self {
        self.type_rounds = rounds;
        self
    }

    /// Enables or disables global declarations in the output.
    #[must_use]
    pub fn with_globals(mut self, emit: bool) -> Self {
        self.emit_globals = emit;
        self
    }
}

/// A function that went through the whole pipeline.
#[derive(Debug)]
pub struct DecompiledFunction {
    /// Position of the function in the program's function list
    pub index: usize,
    /// The function as preprocessed, including synthesized arguments
    pub function: Function,
    /// The final node graph
    pub graph: NodeGraph,
    /// The structured body
    pub body: ControlBlock,
}

/// The outcome for one function.
#[derive(Debug)]
pub enum FunctionOutput {
    /// Decompiled successfully
    Ok(DecompiledFunction),
    /// The pipeline failed; printed as a placeholder
    Failed {
        /// Function name
        name: String,
        /// Position of the function in the program's function list
        index: usize,
        /// The error that stopped the pipeline
        error: Error,
    },
}

impl FunctionOutput {
    /// Returns `true` for a failed function.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, FunctionOutput::Failed { .. })
    }

    /// The decompiled function, if the pipeline succeeded.
    #[must_use]
    pub fn function(&self) -> Option<&DecompiledFunction> {
        match self {
            FunctionOutput::Ok(function) => Some(function),
            FunctionOutput::Failed { .. } => None,
        }
    }
}

/// A function whose control flow could not be recovered during preprocessing.
#[derive(Debug)]
pub struct PreprocessFailure {
    /// Function name
    pub name: String,
    /// Position of the function in the program's function list
    pub index: usize,
    /// The decode error
    pub error: Error,
}

/// Result of a run over a whole program.
#[derive(Debug)]
pub struct Decompilation {
    pub(crate) preprocess_failures: Vec<PreprocessFailure>,
    pub(crate) functions: Vec<FunctionOutput>,
    pub(crate) emit_globals: bool,
}

impl Decompilation {
    /// One output per function, in input order.
    #[must_use]
    pub fn functions(&self) -> &[FunctionOutput] {
        &self.functions
    }

    /// Functions that failed preprocessing.
    #[must_use]
    pub fn preprocess_failures(&self) -> &[PreprocessFailure] {
        &self.preprocess_failures
    }

    /// Number of functions whose pipeline failed.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.functions.iter().filter(|f| f.is_failed()).count()
    }
}

/// Runs the decompilation pipeline over a program.
///
/// # Examples
///
/// ```rust
/// use smxscope::{assembly::Assembler, disassembler::Opcode, emitter::render, Decompiler, Program};
///
/// let mut asm = Assembler::new();
/// asm.emit(Opcode::Proc, &[])?;
/// asm.emit(Opcode::LoadSPri, &[12])?;
/// asm.emit(Opcode::AddC, &[1])?;
/// asm.emit(Opcode::Retn, &[])?;
///
/// let program = Program::builder().code(asm.finalize()?).function("inc", 0).build();
/// let mut decompiler = Decompiler::new(program);
/// let decompilation = decompiler.run();
///
/// let text = render(decompiler.program(), &decompilation);
/// assert!(text.contains("inc(_arg0)"));
/// assert!(text.contains("return _arg0 + 1;"));
/// # Ok::<(), smxscope::Error>(())
/// ```
pub struct Decompiler {
    program: Program,
    options: DecompilerOptions,
    scheduler: PassScheduler,
    preprocessed: bool,
    preprocess_failures: Vec<PreprocessFailure>,
}

impl Decompiler {
    /// Creates a decompiler with default options.
    #[must_use]
    pub fn new(program: Program) -> Self {
        Self::with_options(program, DecompilerOptions::default())
    }

    /// Creates a decompiler with the given options.
    #[must_use]
    pub fn with_options(program: Program, options: DecompilerOptions) -> Self {
        let scheduler = PassScheduler::new(options.type_rounds);
        Self {
            program,
            options,
            scheduler,
            preprocessed: false,
            preprocess_failures: Vec::new(),
        }
    }

    /// The program, as preprocessed so far.
    #[must_use]
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The options in effect.
    #[must_use]
    pub fn options(&self) -> &DecompilerOptions {
        &self.options
    }

    /// Completes the program's function table from the bytecode.
    ///
    /// For every function whose control flow can be recovered:
    ///
    /// - a code end left at the end of the code segment is narrowed to the function's
    ///   exit address
    /// - missing arguments are appended as `_argN` up to the highest argument offset read
    ///
    /// Declared arguments are never changed. Runs once; later calls are no-ops.
    ///
    /// Returns the functions whose control flow could not be recovered. They are handed
    /// over to the next [`Decompilation`].
    pub fn preprocess(&mut self) -> &[PreprocessFailure] {
        if !self.preprocessed {
            self.preprocessed = true;
            self.preprocess_failures = self.preprocess_functions();
        }
        &self.preprocess_failures
    }

    fn preprocess_functions(&mut self) -> Vec<PreprocessFailure> {
        let code_len = u32::try_from(self.program.code().len()).unwrap_or(u32::MAX);
        let recovered: Vec<Result<(u32, usize)>> = self
            .program
            .functions()
            .iter()
            .map(|f| -> Result<(u32, usize)> {
                let cfg = ControlFlowGraph::build(self.program.code(), f.address)?;
                Ok((cfg.exit_pc(), cfg.argument_count()?))
            })
            .collect();

        let mut failures = Vec::new();
        let functions = self.program.functions_mut().iter_mut();
        for (index, (function, result)) in functions.zip(recovered).enumerate() {
            match result {
                Ok((exit_pc, arity)) => {
                    if function.code_end == code_len {
                        function.code_end = exit_pc;
                    }
                    let added = function.synthesize_arguments(arity);
                    if added > 0 {
                        debug!("{}: synthesized {added} arguments", function.name);
                    }
                }
                Err(error) => {
                    warn!("{}: preprocessing failed: {error}", function.name);
                    failures.push(PreprocessFailure {
                        name: function.name.clone(),
                        index,
                        error,
                    });
                }
            }
        }
        failures
    }

    /// Runs the pipeline for function `index`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while decoding, building, processing or structuring
    /// the function.
    pub fn decompile_function(&self, index: usize) -> Result<DecompiledFunction> {
        let function = self
            .program
            .functions()
            .get(index)
            .ok_or_else(|| Error::Error(format!("No function with index {index}")))?;

        let mut graph = NodeBuilder::new(&self.program, function).build()?;
        let ctx = PassContext::new(&self.program, function);
        self.scheduler.run(&mut graph, &ctx)?;
        let body = StructureBuilder::run(&mut graph)?;

        Ok(DecompiledFunction {
            index,
            function: function.clone(),
            graph,
            body,
        })
    }

    fn output(&self, index: usize) -> FunctionOutput {
        match self.decompile_function(index) {
            Ok(function) => FunctionOutput::Ok(function),
            Err(error) => {
                let name = self.program.functions()[index].name.clone();
                warn!("{name} (number {index}): {error}");
                FunctionOutput::Failed { name, index, error }
            }
        }
    }

    /// Preprocesses the program if needed and decompiles every function.
    pub fn run(&mut self) -> Decompilation {
        self.preprocess();
        let count = self.program.functions().len();

        let functions: Vec<FunctionOutput> = if self.options.parallel {
            (0..count)
                .into_par_iter()
                .map(|index| self.output(index))
                .collect()
        } else {
            (0..count).map(|index| self.output(index)).collect()
        };

        let decompilation = Decompilation {
            preprocess_failures: std::mem::take(&mut self.preprocess_failures),
            functions,
            emit_globals: self.options.emit_globals,
        };
        debug!(
            "decompiled {} functions, {} failed",
            count,
            decompilation.failed_count()
        );
        decompilation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assembly::Assembler, disassembler::Opcode, program::Argument};

    fn two_argument_program() -> Program {
        let mut asm = Assembler::new();
        asm.emit(Opcode::Proc, &[]).unwrap();
        asm.emit(Opcode::LoadSPri, &[12]).unwrap();
        asm.emit(Opcode::LoadSAlt, &[16]).unwrap();
        asm.emit(Opcode::Add, &[]).unwrap();
        asm.emit(Opcode::Retn, &[]).unwrap();
        let code = asm.finalize().unwrap();

        let mut function = Function::new("add", 0, u32::MAX);
        function.args = vec![Argument::new(crate::program::VariableKind::Scalar, "a")];
        Program::builder().code(code).function_with(function).build()
    }

    #[test]
    fn test_preprocess_synthesizes_missing_arguments() {
        let mut decompiler = Decompiler::new(two_argument_program());
        assert!(decompiler.preprocess().is_empty());

        let function = &decompiler.program().functions()[0];
        let names: Vec<&str> = function.args.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["a", "_arg1"]);
        assert!(!function.args[0].synthesized);
        assert!(function.args[1].synthesized);
        assert_eq!(function.code_end, 28);
    }

    #[test]
    fn test_preprocess_runs_once() {
        let mut decompiler = Decompiler::new(two_argument_program());
        decompiler.preprocess();
        decompiler.preprocess();
        assert_eq!(decompiler.program().functions()[0].args.len(), 2);
    }

    #[test]
    fn test_parallel_keeps_order() {
        let options = DecompilerOptions::new().with_parallel(true).with_type_rounds(3);
        let mut decompiler = Decompiler::with_options(two_argument_program(), options);
        let decompilation = decompiler.run();
        assert_eq!(decompilation.functions().len(), 1);
        let output = decompilation.functions()[0].function().unwrap();
        assert_eq!(output.index, 0);
        assert_eq!(output.function.args.len(), 2);
    }

    #[test]
    fn test_results_are_debug_printable() {
        let mut decompiler = Decompiler::new(two_argument_program());
        let decompilation = decompiler.run();
        let text = format!("{decompilation:?}");
        assert!(text.contains("NodeGraph"), "{text}");
        assert!(text.contains("ControlFlowGraph"), "{text}");
    }
}
