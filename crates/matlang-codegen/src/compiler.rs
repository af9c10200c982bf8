//! The JIT driver: per-version compilation pipeline and version cache.
//!
//! One process-wide (per-thread) [`JitCompiler`] owns a leaked LLVM
//! context, a native target machine, and the map of compiled versions
//! keyed by `(function, argument-type string)`. Compiling a version:
//!
//! 1. ensure the function is prepared (lowered, environment attached);
//! 2. request the analyses (type inference, reaching definitions, live
//!    variables, bounds checks, and copy placement when enabled);
//! 3. emit the body with [`FunctionCompiler`] into a fresh module;
//! 4. verify, run the function pass pipeline
//!    (`mem2reg, instcombine, reassociate, gvn, simplifycfg, dce`);
//! 5. create the JIT execution engine, map the runtime shims and any
//!    directly called versions, and take the entry address.
//!
//! A failed compilation marks the function not-JIT-eligible; the
//! interpreter runs it from then on.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{CodeModel, InitializationConfig, RelocMode, Target, TargetMachine};
use inkwell::OptimizationLevel;
use tracing::{debug, warn};

use matlang_check::analysis::bounds_check::bounds_check;
use matlang_check::analysis::copy_placement::copy_placement;
use matlang_check::analysis::live_vars::live_vars;
use matlang_check::analysis::reaching_defs::reaching_defs;
use matlang_check::analysis::type_inference::type_inference;
use matlang_check::analysis_manager as manager;
use matlang_check::interpreter::Interpreter;
use matlang_core::config;
use matlang_core::function::FuncRef;
use matlang_core::metrics;
use matlang_core::stmt::StmtSeq;
use matlang_core::typeinfo::{type_set_string_key, TypeSetString};

use crate::codegen::{CalleeResolver, DirectCallee, FunctionCompiler};
use crate::error::CompError;
use crate::types::StorageMode;

/// The function-level optimization pipeline run on every version.
const PASS_PIPELINE: &str = "function(mem2reg,instcombine,reassociate,gvn,simplifycfg,dce)";

/// One compiled `(function, argument types)` version.
pub struct CompiledVersion {
    pub symbol: String,
    pub address: usize,
    pub in_modes: Vec<StorageMode>,
    pub out_modes: Vec<StorageMode>,
    pub n_outs: usize,
    /// Pins the lowered body: compiled code holds raw statement
    /// pointers for its interpreter fallbacks.
    _body: Rc<StmtSeq>,
    _engine: ExecutionEngine<'static>,
    _module: Module<'static>,
}

impl std::fmt::Debug for CompiledVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledVersion")
            .field("symbol", &self.symbol)
            .field("in_modes", &self.in_modes)
            .field("out_modes", &self.out_modes)
            .finish()
    }
}

type VersionKey = (usize, String);

/// The per-thread JIT compiler.
pub struct JitCompiler {
    context: &'static Context,
    target_machine: TargetMachine,
    versions: RefCell<HashMap<VersionKey, Rc<CompiledVersion>>>,
    pending: RefCell<HashSet<VersionKey>>,
    ineligible: RefCell<HashSet<usize>>,
    compiled_funcs: RefCell<HashSet<usize>>,
    next_version: Cell<u32>,
}

impl std::fmt::Debug for JitCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitCompiler")
            .field("versions", &self.versions.borrow().len())
            .finish()
    }
}

thread_local! {
    static JIT: RefCell<Option<Rc<JitCompiler>>> = const { RefCell::new(None) };
}

impl JitCompiler {
    /// Runs `f` against the thread's JIT compiler, creating it on first
    /// use. The handle is cloned out so runtime shims can re-enter.
    pub fn with<R>(f: impl FnOnce(&JitCompiler) -> R) -> R {
        let jit = JIT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_none() {
                *slot = Some(Rc::new(JitCompiler::new()));
            }
            slot.as_ref().expect("just initialized").clone()
        });
        f(&jit)
    }

    fn new() -> JitCompiler {
        Target::initialize_native(&InitializationConfig::default())
            .expect("native target initialization");
        let triple = TargetMachine::get_default_triple();
        let target = Target::from_triple(&triple).expect("target from native triple");
        let target_machine = target
            .create_target_machine(
                &triple,
                "generic",
                "",
                OptimizationLevel::Default,
                RelocMode::Default,
                CodeModel::JITDefault,
            )
            .expect("native target machine");
        JitCompiler {
            context: Box::leak(Box::new(Context::create())),
            target_machine,
            versions: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashSet::new()),
            ineligible: RefCell::new(HashSet::new()),
            compiled_funcs: RefCell::new(HashSet::new()),
            next_version: Cell::new(0),
        }
    }

    pub fn is_ineligible(&self, func: FuncRef) -> bool {
        self.ineligible
            .borrow()
            .contains(&(func as *const _ as usize))
    }

    /// Marks a function permanently interpreter-only.
    pub fn mark_ineligible(&self, func: FuncRef) {
        self.ineligible
            .borrow_mut()
            .insert(func as *const _ as usize);
    }

    /// Fetches (compiling on demand) the version of `func` specialized
    /// for `arg_types`.
    pub fn get_or_compile(
        &self,
        func: FuncRef,
        arg_types: &TypeSetString,
    ) -> Result<Rc<CompiledVersion>, CompError> {
        let key: VersionKey = (func as *const _ as usize, type_set_string_key(arg_types));
        if let Some(hit) = self.versions.borrow().get(&key) {
            return Ok(hit.clone());
        }
        if !self.pending.borrow_mut().insert(key.clone()) {
            return Err(CompError::Llvm(
                "version is already being compiled (mutual recursion)".into(),
            ));
        }
        let result = self.compile_version(func, arg_types);
        self.pending.borrow_mut().remove(&key);
        match result {
            Ok(version) => {
                let rc = Rc::new(version);
                self.versions.borrow_mut().insert(key, rc.clone());
                Ok(rc)
            }
            Err(e) => Err(e),
        }
    }

    fn compile_version(
        &self,
        func: FuncRef,
        arg_types: &TypeSetString,
    ) -> Result<CompiledVersion, CompError> {
        let prog = func
            .as_prog()
            .ok_or_else(|| CompError::Llvm("library functions are not versioned".into()))?;

        metrics::start_timer(metrics::COMP_TIME_TOTAL);
        Interpreter::with(|i| i.prepare_function(func));
        let body = prog.current_body();

        // Analyses; any failure aborts this version.
        metrics::start_timer(metrics::ANA_TIME_TOTAL);
        let analysis = (|| {
            let types = manager::request(type_inference, func, &body, arg_types)?;
            let _reach = manager::request(reaching_defs, func, &body, arg_types)?;
            let live = manager::request(live_vars, func, &body, arg_types)?;
            let bounds = manager::request(bounds_check, func, &body, arg_types)?;
            let copies = if config::get_bool("jit_copy_enable") {
                Some(manager::request(copy_placement, func, &body, arg_types)?)
            } else {
                None
            };
            Ok((types, live, bounds, copies))
        })();
        metrics::stop_timer(metrics::ANA_TIME_TOTAL);
        let (types, live, bounds, copies) = match analysis {
            Ok(parts) => parts,
            Err(e) => {
                metrics::stop_timer(metrics::COMP_TIME_TOTAL);
                return Err(CompError::AnalysisFailed(e));
            }
        };

        let version_id = self.next_version.get();
        self.next_version.set(version_id + 1);
        let mangled: String = prog
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let symbol = format!("ml_{}_v{}", mangled, version_id);

        let module = self.context.create_module(&symbol);
        crate::runtime::declare_runtime_functions(self.context, &module);

        let mut fc = FunctionCompiler::new(
            self.context,
            &module,
            func,
            prog,
            symbol.clone(),
            arg_types,
            types,
            bounds,
            live,
            copies,
            self,
        );
        let compile_result = fc.compile();
        let in_modes = fc.in_modes.clone();
        let out_modes = fc.out_modes.clone();
        let external_callees = std::mem::take(&mut fc.external_callees);
        drop(fc);
        if let Err(e) = compile_result {
            metrics::stop_timer(metrics::COMP_TIME_TOTAL);
            return Err(e);
        }

        module
            .verify()
            .map_err(|e| CompError::Llvm(format!("module verification failed: {}", e)))?;
        module
            .run_passes(
                PASS_PIPELINE,
                &self.target_machine,
                PassBuilderOptions::create(),
            )
            .map_err(|e| CompError::Llvm(format!("pass pipeline failed: {}", e)))?;

        let engine = module
            .create_jit_execution_engine(OptimizationLevel::None)
            .map_err(|e| CompError::Llvm(format!("execution engine: {}", e)))?;
        crate::runtime::map_runtime_symbols(&engine, &module);
        for (callee_symbol, address) in &external_callees {
            if let Some(decl) = module.get_function(callee_symbol) {
                engine.add_global_mapping(&decl, *address);
            }
        }
        let address = engine
            .get_function_address(&symbol)
            .map_err(|e| CompError::Llvm(format!("entry address: {}", e)))?;

        let func_addr = func as *const _ as usize;
        if self.compiled_funcs.borrow_mut().insert(func_addr) {
            metrics::incr_counter(metrics::FUNC_COMP_COUNT, 1);
        }
        metrics::incr_counter(metrics::FUNC_VERS_COUNT, 1);
        metrics::stop_timer(metrics::COMP_TIME_TOTAL);
        debug!(%symbol, function = %prog.name, "compiled function version");

        Ok(CompiledVersion {
            symbol,
            address,
            in_modes,
            out_modes,
            n_outs: prog.out_params.len(),
            _body: body,
            _engine: engine,
            _module: module,
        })
    }
}

impl CalleeResolver for JitCompiler {
    fn resolve(&self, func: FuncRef, arg_types: &TypeSetString) -> Option<DirectCallee> {
        if self.is_ineligible(func) {
            return None;
        }
        match self.get_or_compile(func, arg_types) {
            Ok(version) => Some(DirectCallee {
                symbol: version.symbol.clone(),
                address: version.address,
                in_modes: version.in_modes.clone(),
                out_modes: version.out_modes.clone(),
                n_outs: version.n_outs,
            }),
            Err(e) => {
                warn!(callee = %func.name(), error = %e, "direct-call compilation declined");
                None
            }
        }
    }
}
