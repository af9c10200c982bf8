//! Per-version code generation: lowers split-form IIR to LLVM IR.
//!
//! [`FunctionCompiler`] compiles one `(function, argument types)` version
//! into an LLVM function `void @sym(i64* ins, i64* outs)`. Inputs arrive
//! as 8-byte storage slots; outputs leave the same way, with a trailing
//! count slot recording how many outputs were assigned before the exit
//! edge taken.
//!
//! At every program point a per-symbol variable map tracks either a
//! native value (with its storage mode and inferred object kind) or the
//! environment-resident marker. Control-flow merges reconcile maps with
//! branch-point matching: all-environment stays environment, mixed sides
//! flush to the environment, all-native inserts a phi with mode
//! conversions on the incoming edges.
//!
//! Constructs the generator cannot lower fall back statement-by-
//! statement: locals flush to the call environment and the interpreter
//! executes the original statement in place.

use std::collections::BTreeSet;
use std::rc::Rc;

use indexmap::IndexMap;
use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::values::{BasicValueEnum, FunctionValue, IntValue, PointerValue};
use inkwell::IntPredicate;
use tracing::trace;

use matlang_check::analysis::bounds_check::BoundsCheckInfo;
use matlang_check::analysis::copy_placement::CopyPlacementInfo;
use matlang_check::analysis::live_vars::LiveVarInfo;
use matlang_check::analysis::type_inference::TypeInferInfo;
use matlang_core::expr::{Expr, ExprKind, UnOp};
use matlang_core::function::{FuncRef, ProgFunction};
use matlang_core::object::ObjKind;
use matlang_core::stmt::{Stmt, StmtKind, StmtSeq};
use matlang_core::symbol::Symbol;
use matlang_core::typeinfo::{type_set_widest, TypeSet, TypeSetString};

use crate::error::CompError;
use crate::runtime;
use crate::types::{convert_mode, JitValue, StorageMode};

/// A directly callable compiled callee, resolved by the driver.
#[derive(Debug, Clone)]
pub struct DirectCallee {
    pub symbol: String,
    pub address: usize,
    pub in_modes: Vec<StorageMode>,
    pub out_modes: Vec<StorageMode>,
    pub n_outs: usize,
}

/// Resolves callees to compiled versions (compiling on demand). `None`
/// means the callee is not available for the direct path.
pub trait CalleeResolver {
    fn resolve(&self, func: FuncRef, arg_types: &TypeSetString) -> Option<DirectCallee>;
}

/// Variable state at a program point.
#[derive(Debug, Clone, Copy)]
pub enum VarState<'ctx> {
    Local(JitValue<'ctx>),
    /// The value lives in the call environment and must be read back
    /// before use.
    Env,
}

pub type VarMap<'ctx> = IndexMap<Symbol, VarState<'ctx>>;

/// Loop context while compiling a loop body: jump targets plus the
/// branch points collected for the increment and exit merges.
struct LoopCtx<'ctx> {
    incr_bb: BasicBlock<'ctx>,
    exit_bb: BasicBlock<'ctx>,
    break_edges: Vec<(BasicBlock<'ctx>, VarMap<'ctx>)>,
    continue_edges: Vec<(BasicBlock<'ctx>, VarMap<'ctx>)>,
}

/// Compiles one function version into a module.
pub struct FunctionCompiler<'ctx, 'r> {
    pub context: &'ctx Context,
    pub module: &'r Module<'ctx>,
    pub builder: Builder<'ctx>,
    pub func: FuncRef,
    pub prog: &'static ProgFunction,
    pub body: Rc<StmtSeq>,
    pub arg_types: TypeSetString,
    pub types: Rc<TypeInferInfo>,
    pub bounds: Rc<BoundsCheckInfo>,
    pub live: Rc<LiveVarInfo>,
    pub copies: Option<Rc<CopyPlacementInfo>>,
    pub resolver: &'r dyn CalleeResolver,
    /// External callee declarations to map into the execution engine.
    pub external_callees: Vec<(String, usize)>,

    pub llvm_fn: FunctionValue<'ctx>,
    pub symbol_name: String,
    pub in_modes: Vec<StorageMode>,
    pub in_kinds: Vec<ObjKind>,
    pub out_modes: Vec<StorageMode>,

    env_ptr: Option<PointerValue<'ctx>>,
    call_in_buf: Option<PointerValue<'ctx>>,
    call_out_buf: Option<PointerValue<'ctx>>,

    // Config snapshot taken at compile start.
    pub use_array_opts: bool,
    pub use_binop_opts: bool,
    pub use_libfunc_opts: bool,
    pub use_direct_calls: bool,
    pub no_read_bound_checks: bool,
    pub no_write_bound_checks: bool,
    pub copy_enable: bool,
}

impl<'ctx, 'r> FunctionCompiler<'ctx, 'r> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: &'ctx Context,
        module: &'r Module<'ctx>,
        func: FuncRef,
        prog: &'static ProgFunction,
        symbol_name: String,
        arg_types: &TypeSetString,
        types: Rc<TypeInferInfo>,
        bounds: Rc<BoundsCheckInfo>,
        live: Rc<LiveVarInfo>,
        copies: Option<Rc<CopyPlacementInfo>>,
        resolver: &'r dyn CalleeResolver,
    ) -> FunctionCompiler<'ctx, 'r> {
        use matlang_core::config;

        let in_modes: Vec<StorageMode> = prog
            .in_params
            .iter()
            .enumerate()
            .map(|(i, _)| {
                arg_types
                    .get(i)
                    .map(StorageMode::for_type_set)
                    .unwrap_or(StorageMode::ObjPtr)
            })
            .collect();
        let in_kinds: Vec<ObjKind> = prog
            .in_params
            .iter()
            .enumerate()
            .map(|(i, _)| {
                arg_types
                    .get(i)
                    .map(|set| type_set_widest(set).kind)
                    .unwrap_or(ObjKind::Unknown)
            })
            .collect();
        let out_modes: Vec<StorageMode> = prog
            .out_params
            .iter()
            .enumerate()
            .map(|(i, _)| {
                types
                    .out_types
                    .get(i)
                    .map(StorageMode::for_type_set)
                    .unwrap_or(StorageMode::ObjPtr)
            })
            .collect();

        let ptr = context.ptr_type(inkwell::AddressSpace::default());
        let fn_type = context
            .void_type()
            .fn_type(&[ptr.into(), ptr.into()], false);
        let llvm_fn = module.add_function(&symbol_name, fn_type, None);

        FunctionCompiler {
            context,
            module,
            builder: context.create_builder(),
            func,
            prog,
            body: prog.current_body(),
            arg_types: arg_types.clone(),
            types,
            bounds,
            live,
            copies,
            resolver,
            external_callees: Vec::new(),
            llvm_fn,
            symbol_name,
            in_modes,
            in_kinds,
            out_modes,
            env_ptr: None,
            call_in_buf: None,
            call_out_buf: None,
            use_array_opts: config::get_bool("jit_use_array_opts"),
            use_binop_opts: config::get_bool("jit_use_binop_opts"),
            use_libfunc_opts: config::get_bool("jit_use_libfunc_opts"),
            use_direct_calls: config::get_bool("jit_use_direct_calls"),
            no_read_bound_checks: config::get_bool("jit_no_read_bound_checks"),
            no_write_bound_checks: config::get_bool("jit_no_write_bound_checks"),
            copy_enable: config::get_bool("jit_copy_enable"),
        }
    }

    /// Compiles the whole version body.
    pub fn compile(&mut self) -> Result<(), CompError> {
        let entry_bb = self.context.append_basic_block(self.llvm_fn, "entry");
        self.builder.position_at_end(entry_bb);

        // Call-buffer allocas, sized to the widest call site in the
        // body, shared by every direct call.
        let max_slots = self.max_call_slots();
        if max_slots > 0 {
            let buf_ty = self.context.i64_type().array_type(max_slots as u32);
            self.call_in_buf = Some(
                self.builder
                    .build_alloca(buf_ty, "call_ins")
                    .map_err(CompError::llvm)?,
            );
            self.call_out_buf = Some(
                self.builder
                    .build_alloca(buf_ty, "call_outs")
                    .map_err(CompError::llvm)?,
            );
        }

        // The call environment backs env-resident variables and the
        // interpreter fallback.
        let func_const = self.func_ptr_const(self.func);
        let env = runtime::call_runtime(
            &self.builder,
            self.module,
            runtime::RT_NEW_CALL_ENV,
            &[
                func_const.into(),
                self.i64_const(self.prog.in_params.len() as i64).into(),
                self.i64_const(self.prog.out_params.len() as i64).into(),
            ],
            "env",
        )?;
        self.env_ptr = Some(env.into_pointer_value());

        // Load inputs into the initial variable map.
        let ins_ptr = self
            .llvm_fn
            .get_nth_param(0)
            .expect("entry has two params")
            .into_pointer_value();
        let mut vars = VarMap::new();
        for (i, &param) in self.prog.in_params.iter().enumerate() {
            let mode = self.in_modes[i];
            let value = self.load_slot(ins_ptr, i, mode)?;
            let kind = self.in_kinds[i];
            let mut jv = JitValue::new(value, mode, kind);
            // Entry copies required by copy placement.
            if mode == StorageMode::ObjPtr && self.needs_param_copy(param) {
                let copied = runtime::call_runtime(
                    &self.builder,
                    self.module,
                    runtime::RT_COPY_OBJ,
                    &[jv.value.into()],
                    "pcopy",
                )?;
                jv = JitValue::new(copied, StorageMode::ObjPtr, jv.kind);
            }
            vars.insert(param, VarState::Local(jv));
        }

        let terminated = self.compile_seq(&self.body.clone(), &mut vars, None)?;
        if !terminated {
            self.emit_exit(&vars)?;
        }
        trace!(symbol = %self.symbol_name, "version body compiled");
        Ok(())
    }

    fn needs_param_copy(&self, param: Symbol) -> bool {
        self.copy_enable
            && self
                .copies
                .as_ref()
                .is_some_and(|c| c.param_copies.contains(&param))
    }

    /// Largest slot count any direct call in the body needs.
    fn max_call_slots(&self) -> usize {
        fn scan_expr(e: &Expr, max: &mut usize) {
            if let ExprKind::Param { args, .. } = &e.kind {
                *max = (*max).max(args.len() + 1);
            }
            for sub in e.sub_exprs() {
                scan_expr(sub, max);
            }
        }
        fn scan_seq(seq: &StmtSeq, max: &mut usize) {
            for stmt in &seq.stmts {
                match &stmt.kind {
                    StmtKind::Assign { lhs, rhs } => {
                        *max = (*max).max(lhs.len() + 1);
                        for t in lhs {
                            scan_expr(t, max);
                        }
                        scan_expr(rhs, max);
                    }
                    StmtKind::Expr(e) => scan_expr(e, max),
                    StmtKind::IfElse {
                        cond,
                        then_seq,
                        else_seq,
                    } => {
                        scan_expr(cond, max);
                        scan_seq(then_seq, max);
                        scan_seq(else_seq, max);
                    }
                    StmtKind::Loop {
                        init,
                        test,
                        body,
                        incr,
                        ..
                    } => {
                        scan_seq(init, max);
                        scan_seq(test, max);
                        scan_seq(body, max);
                        scan_seq(incr, max);
                    }
                    _ => {}
                }
            }
        }
        let mut max = self.prog.out_params.len() + 1;
        scan_seq(&self.body, &mut max);
        max
    }

    // -- small IR helpers ---------------------------------------------------

    pub(crate) fn i64_const(&self, v: i64) -> IntValue<'ctx> {
        self.context.i64_type().const_int(v as u64, true)
    }

    pub(crate) fn env(&self) -> PointerValue<'ctx> {
        self.env_ptr.expect("environment created in prologue")
    }

    pub(crate) fn func_ptr_const(&self, func: FuncRef) -> PointerValue<'ctx> {
        let addr = func as *const _ as u64;
        let int = self.context.i64_type().const_int(addr, false);
        self.builder
            .build_int_to_ptr(
                int,
                self.context.ptr_type(inkwell::AddressSpace::default()),
                "fptr",
            )
            .expect("const int-to-ptr")
    }

    pub(crate) fn stmt_ptr_const(&self, stmt: &Stmt) -> PointerValue<'ctx> {
        let addr = stmt as *const Stmt as u64;
        let int = self.context.i64_type().const_int(addr, false);
        self.builder
            .build_int_to_ptr(
                int,
                self.context.ptr_type(inkwell::AddressSpace::default()),
                "sptr",
            )
            .expect("const int-to-ptr")
    }

    pub(crate) fn sym_id_const(&self, sym: Symbol) -> IntValue<'ctx> {
        let id = runtime::register_symbol(sym);
        self.context.i32_type().const_int(id as u64, false)
    }

    fn slot_ptr(
        &self,
        base: PointerValue<'ctx>,
        index: usize,
    ) -> Result<PointerValue<'ctx>, CompError> {
        unsafe {
            self.builder
                .build_in_bounds_gep(
                    self.context.i64_type(),
                    base,
                    &[self.i64_const(index as i64)],
                    "slot",
                )
                .map_err(CompError::llvm)
        }
    }

    /// Loads storage slot `index` of `base` in `mode`.
    pub(crate) fn load_slot(
        &self,
        base: PointerValue<'ctx>,
        index: usize,
        mode: StorageMode,
    ) -> Result<BasicValueEnum<'ctx>, CompError> {
        let ptr = self.slot_ptr(base, index)?;
        let loaded = match mode {
            StorageMode::F64 => self
                .builder
                .build_load(self.context.f64_type(), ptr, "in_f")
                .map_err(CompError::llvm)?,
            StorageMode::ObjPtr => self
                .builder
                .build_load(
                    self.context.ptr_type(inkwell::AddressSpace::default()),
                    ptr,
                    "in_p",
                )
                .map_err(CompError::llvm)?,
            // Booleans travel as i64 slots.
            StorageMode::I1 => {
                let wide = self
                    .builder
                    .build_load(self.context.i64_type(), ptr, "in_b")
                    .map_err(CompError::llvm)?;
                self.builder
                    .build_int_compare(
                        IntPredicate::NE,
                        wide.into_int_value(),
                        self.context.i64_type().const_zero(),
                        "in_b1",
                    )
                    .map_err(CompError::llvm)?
                    .into()
            }
            StorageMode::I64 => self
                .builder
                .build_load(self.context.i64_type(), ptr, "in_i")
                .map_err(CompError::llvm)?,
        };
        Ok(loaded)
    }

    /// Stores a value (converted to `mode`) into slot `index` of `base`.
    pub(crate) fn store_slot(
        &self,
        base: PointerValue<'ctx>,
        index: usize,
        value: JitValue<'ctx>,
        mode: StorageMode,
    ) -> Result<(), CompError> {
        let converted = convert_mode(self.context, &self.builder, self.module, value, mode)?;
        let ptr = self.slot_ptr(base, index)?;
        let to_store: BasicValueEnum<'ctx> = match mode {
            StorageMode::I1 => self
                .builder
                .build_int_z_extend(
                    converted.value.into_int_value(),
                    self.context.i64_type(),
                    "out_b",
                )
                .map_err(CompError::llvm)?
                .into(),
            _ => converted.value,
        };
        self.builder.build_store(ptr, to_store).map_err(CompError::llvm)?;
        Ok(())
    }

    pub(crate) fn call_bufs(
        &self,
    ) -> Result<(PointerValue<'ctx>, PointerValue<'ctx>), CompError> {
        match (self.call_in_buf, self.call_out_buf) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(CompError::Llvm("call buffers not allocated".into())),
        }
    }

    pub(crate) fn current_block(&self) -> BasicBlock<'ctx> {
        self.builder
            .get_insert_block()
            .expect("builder is positioned")
    }

    /// The inferred type set of an expression (empty when inference did
    /// not see it).
    pub(crate) fn expr_type_set(&self, expr: &Expr) -> TypeSet {
        self.types
            .expr_types
            .get(&expr.id)
            .and_then(|tss| tss.first().cloned())
            .unwrap_or_default()
    }

    pub(crate) fn expr_kind_of(&self, expr: &Expr) -> ObjKind {
        type_set_widest(&self.expr_type_set(expr)).kind
    }

    // -- statements ---------------------------------------------------------

    /// Compiles a sequence; `true` if the flow terminated (returned or
    /// jumped away) and the caller must not fall through.
    fn compile_seq(
        &mut self,
        seq: &StmtSeq,
        vars: &mut VarMap<'ctx>,
        mut loop_ctx: Option<&mut LoopCtx<'ctx>>,
    ) -> Result<bool, CompError> {
        for stmt in &seq.stmts {
            if self.compile_stmt(stmt, vars, loop_ctx.as_deref_mut())? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn compile_stmt(
        &mut self,
        stmt: &Stmt,
        vars: &mut VarMap<'ctx>,
        loop_ctx: Option<&mut LoopCtx<'ctx>>,
    ) -> Result<bool, CompError> {
        match &stmt.kind {
            StmtKind::Assign { .. } | StmtKind::Expr(_) => {
                match self.try_compile_simple(stmt, vars) {
                    Ok(()) => Ok(false),
                    // Unsupported constructs fall back to the
                    // interpreter for this one statement.
                    Err(CompError::Unsupported { construct, .. }) => {
                        trace!(%construct, "statement falls back to interpreter");
                        self.fallback_stmt(stmt, vars)?;
                        Ok(false)
                    }
                    Err(other) => Err(other),
                }
            }
            StmtKind::IfElse {
                cond,
                then_seq,
                else_seq,
            } => self.compile_if(stmt, cond, then_seq, else_seq, vars, loop_ctx),
            StmtKind::Loop {
                init,
                test,
                body,
                incr,
                test_var,
            } => self.compile_loop(stmt, init, test, body, incr, *test_var, vars),
            StmtKind::Break => {
                let Some(ctx) = loop_ctx else {
                    return Err(CompError::unsupported("break outside a loop", stmt));
                };
                let block = self.current_block();
                ctx.break_edges.push((block, vars.clone()));
                self.builder
                    .build_unconditional_branch(ctx.exit_bb)
                    .map_err(CompError::llvm)?;
                Ok(true)
            }
            StmtKind::Continue => {
                let Some(ctx) = loop_ctx else {
                    return Err(CompError::unsupported("continue outside a loop", stmt));
                };
                let block = self.current_block();
                ctx.continue_edges.push((block, vars.clone()));
                self.builder
                    .build_unconditional_branch(ctx.incr_bb)
                    .map_err(CompError::llvm)?;
                Ok(true)
            }
            StmtKind::Return => {
                self.emit_exit(vars)?;
                Ok(true)
            }
            StmtKind::Switch { .. } | StmtKind::For { .. } | StmtKind::While { .. } => Err(
                CompError::unsupported("surface construct in lowered body", stmt),
            ),
        }
    }

    /// Interpreter fallback for one statement: flush locals, run, mark
    /// everything environment-resident.
    fn fallback_stmt(
        &mut self,
        stmt: &Stmt,
        vars: &mut VarMap<'ctx>,
    ) -> Result<(), CompError> {
        self.flush_all(vars)?;
        let stmt_ptr = self.stmt_ptr_const(stmt);
        runtime::call_runtime_void(
            &self.builder,
            self.module,
            runtime::RT_EXEC_STMT,
            &[self.env().into(), stmt_ptr.into()],
        )?;
        Ok(())
    }

    /// Flushes every local to the environment; all states become Env.
    pub(crate) fn flush_all(&mut self, vars: &mut VarMap<'ctx>) -> Result<(), CompError> {
        let symbols: Vec<Symbol> = vars.keys().copied().collect();
        for sym in symbols {
            self.flush_var(sym, vars)?;
        }
        Ok(())
    }

    /// Flushes one variable to the environment if locally stored.
    pub(crate) fn flush_var(
        &mut self,
        sym: Symbol,
        vars: &mut VarMap<'ctx>,
    ) -> Result<(), CompError> {
        if let Some(VarState::Local(jv)) = vars.get(&sym).copied() {
            let boxed = convert_mode(
                self.context,
                &self.builder,
                self.module,
                jv,
                StorageMode::ObjPtr,
            )?;
            runtime::call_runtime_void(
                &self.builder,
                self.module,
                runtime::RT_ENV_BIND,
                &[
                    self.env().into(),
                    self.sym_id_const(sym).into(),
                    boxed.value.into(),
                ],
            )?;
            vars.insert(sym, VarState::Env);
        }
        Ok(())
    }

    /// Reads a variable as a value, unboxing from the environment when
    /// not locally stored.
    pub(crate) fn read_var(
        &mut self,
        sym: Symbol,
        vars: &VarMap<'ctx>,
        kind_hint: ObjKind,
    ) -> Result<JitValue<'ctx>, CompError> {
        match vars.get(&sym) {
            Some(VarState::Local(jv)) => Ok(*jv),
            _ => {
                let obj = runtime::call_runtime(
                    &self.builder,
                    self.module,
                    runtime::RT_ENV_LOOKUP,
                    &[self.env().into(), self.sym_id_const(sym).into()],
                    "envrd",
                )?;
                Ok(JitValue::new(obj, StorageMode::ObjPtr, kind_hint))
            }
        }
    }

    // -- control flow -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn compile_if(
        &mut self,
        stmt: &Stmt,
        cond: &Expr,
        then_seq: &StmtSeq,
        else_seq: &StmtSeq,
        vars: &mut VarMap<'ctx>,
        mut loop_ctx: Option<&mut LoopCtx<'ctx>>,
    ) -> Result<bool, CompError> {
        let cond_val = match self.compile_expr(cond, vars) {
            Ok(v) => v,
            Err(CompError::Unsupported { .. }) => {
                // Condition the generator cannot lower: run the whole
                // statement in the interpreter.
                self.fallback_stmt(stmt, vars)?;
                return Ok(false);
            }
            Err(other) => return Err(other),
        };
        let cond_bool = convert_mode(
            self.context,
            &self.builder,
            self.module,
            cond_val,
            StorageMode::I1,
        )?;

        let then_bb = self.context.append_basic_block(self.llvm_fn, "then");
        let else_bb = self.context.append_basic_block(self.llvm_fn, "else");
        let merge_bb = self.context.append_basic_block(self.llvm_fn, "merge");
        self.builder
            .build_conditional_branch(cond_bool.value.into_int_value(), then_bb, else_bb)
            .map_err(CompError::llvm)?;

        let mut incomings: Vec<(BasicBlock<'ctx>, VarMap<'ctx>)> = Vec::new();

        self.builder.position_at_end(then_bb);
        let mut then_vars = vars.clone();
        let then_term = self.compile_seq(then_seq, &mut then_vars, loop_ctx.as_deref_mut())?;
        if !then_term {
            let block = self.current_block();
            self.builder
                .build_unconditional_branch(merge_bb)
                .map_err(CompError::llvm)?;
            incomings.push((block, then_vars));
        }

        self.builder.position_at_end(else_bb);
        let mut else_vars = vars.clone();
        let else_term = self.compile_seq(else_seq, &mut else_vars, loop_ctx)?;
        if !else_term {
            let block = self.current_block();
            self.builder
                .build_unconditional_branch(merge_bb)
                .map_err(CompError::llvm)?;
            incomings.push((block, else_vars));
        }

        if incomings.is_empty() {
            // Both sides left; the merge is unreachable.
            self.builder.position_at_end(merge_bb);
            self.builder
                .build_unreachable()
                .map_err(CompError::llvm)?;
            return Ok(true);
        }

        let live_after = self.live.after.get(&stmt.id).cloned();
        *vars = self.merge_branch_points(incomings, merge_bb, live_after.as_ref())?;
        self.builder.position_at_end(merge_bb);
        Ok(false)
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_loop(
        &mut self,
        stmt: &Stmt,
        init: &StmtSeq,
        test: &StmtSeq,
        body: &StmtSeq,
        incr: &StmtSeq,
        test_var: Symbol,
        vars: &mut VarMap<'ctx>,
    ) -> Result<bool, CompError> {
        if self.compile_seq(init, vars, None)? {
            return Ok(true);
        }

        // Symbols the loop writes anywhere.
        let mut loop_defs: BTreeSet<Symbol> = test.symbol_defs();
        loop_defs.extend(body.symbol_defs());
        loop_defs.extend(incr.symbol_defs());

        let header_bb = self.context.append_basic_block(self.llvm_fn, "loop_hdr");
        let body_bb = self.context.append_basic_block(self.llvm_fn, "loop_body");
        let incr_bb = self.context.append_basic_block(self.llvm_fn, "loop_incr");
        let exit_bb = self.context.append_basic_block(self.llvm_fn, "loop_exit");

        let preheader = self.current_block();
        self.builder
            .build_unconditional_branch(header_bb)
            .map_err(CompError::llvm)?;

        // Header phis for loop-written locals; everything else the loop
        // writes stays (or becomes) environment-resident.
        self.builder.position_at_end(header_bb);
        let mut pending_phis: Vec<(Symbol, inkwell::values::PhiValue<'ctx>, StorageMode, ObjKind)> =
            Vec::new();
        let mut header_env: Vec<Symbol> = Vec::new();
        for &sym in &loop_defs {
            match vars.get(&sym) {
                Some(VarState::Local(jv)) => {
                    let phi = self
                        .builder
                        .build_phi(jv.mode.llvm_type(self.context), &format!("phi_{}", sym))
                        .map_err(CompError::llvm)?;
                    phi.add_incoming(&[(&jv.value, preheader)]);
                    vars.insert(
                        sym,
                        VarState::Local(JitValue::new(phi.as_basic_value(), jv.mode, jv.kind)),
                    );
                    pending_phis.push((sym, phi, jv.mode, jv.kind));
                }
                Some(VarState::Env) => header_env.push(sym),
                None => {
                    vars.insert(sym, VarState::Env);
                    header_env.push(sym);
                }
            }
        }

        // Guarded copies: aliases made before the loop are cloned under
        // the loop's test, at the top of the first iteration's body.
        let guarded_copies: Vec<Symbol> = self
            .copies
            .as_ref()
            .filter(|_| self.copy_enable)
            .and_then(|c| c.loop_guarded.get(&stmt.id))
            .map(|list| list.iter().map(|c| c.symbol).collect())
            .unwrap_or_default();

        // Test sequence runs in the header.
        if self.compile_seq(test, vars, None)? {
            // The test returned; the remaining loop blocks are dead but
            // still need terminators for verification.
            for bb in [body_bb, incr_bb, exit_bb] {
                self.builder.position_at_end(bb);
                self.builder.build_unreachable().map_err(CompError::llvm)?;
            }
            return Ok(true);
        }
        let test_val = self.read_var(test_var, vars, ObjKind::LogicalArray)?;
        let test_bool = convert_mode(
            self.context,
            &self.builder,
            self.module,
            test_val,
            StorageMode::I1,
        )?;
        let test_end = self.current_block();
        let test_end_vars = vars.clone();
        self.builder
            .build_conditional_branch(test_bool.value.into_int_value(), body_bb, exit_bb)
            .map_err(CompError::llvm)?;

        // Body.
        self.builder.position_at_end(body_bb);
        let mut body_vars = vars.clone();
        for sym in guarded_copies {
            self.flush_var(sym, &mut body_vars)?;
            runtime::call_runtime_void(
                &self.builder,
                self.module,
                runtime::RT_COPY_FOR_WRITE,
                &[self.env().into(), self.sym_id_const(sym).into()],
            )?;
        }
        let mut ctx = LoopCtx {
            incr_bb,
            exit_bb,
            break_edges: Vec::new(),
            continue_edges: Vec::new(),
        };
        let body_term = self.compile_seq(body, &mut body_vars, Some(&mut ctx))?;
        let LoopCtx {
            break_edges,
            continue_edges,
            ..
        } = ctx;
        let mut incr_incomings = continue_edges;
        if !body_term {
            let block = self.current_block();
            self.builder
                .build_unconditional_branch(incr_bb)
                .map_err(CompError::llvm)?;
            incr_incomings.push((block, body_vars));
        }

        // Increment block: merge body-end and continue edges, run incr,
        // then reconcile with the header and jump back.
        if incr_incomings.is_empty() {
            self.builder.position_at_end(incr_bb);
            self.builder
                .build_unreachable()
                .map_err(CompError::llvm)?;
        } else {
            let mut incr_vars = self.merge_branch_points(incr_incomings, incr_bb, None)?;
            self.builder.position_at_end(incr_bb);
            if !self.compile_seq(incr, &mut incr_vars, None)? {
                // Back edge: feed the header phis and restore the
                // environment-resident contract.
                for (sym, phi, mode, _kind) in &pending_phis {
                    let current = self.read_var(*sym, &incr_vars, ObjKind::Unknown)?;
                    let converted = convert_mode(
                        self.context,
                        &self.builder,
                        self.module,
                        current,
                        *mode,
                    )?;
                    let block = self.current_block();
                    phi.add_incoming(&[(&converted.value, block)]);
                }
                for sym in &header_env {
                    self.flush_var(*sym, &mut incr_vars)?;
                }
                self.builder
                    .build_unconditional_branch(header_bb)
                    .map_err(CompError::llvm)?;
            }
        }

        // Exit: the test-false edge plus any break edges.
        let mut exit_incomings = vec![(test_end, test_end_vars)];
        exit_incomings.extend(break_edges);
        let live_after = self.live.after.get(&stmt.id).cloned();
        *vars = self.merge_branch_points(exit_incomings, exit_bb, live_after.as_ref())?;
        self.builder.position_at_end(exit_bb);
        Ok(false)
    }

    /// Reconciles variable maps at a control-flow merge.
    ///
    /// Phis are created at the head of `merge_bb`; incoming-edge mode
    /// conversions and environment flushes are inserted in each
    /// predecessor just before its terminator. When a liveness set is
    /// supplied, symbols dead at the merge are dropped instead of
    /// reconciled.
    pub(crate) fn merge_branch_points(
        &mut self,
        incomings: Vec<(BasicBlock<'ctx>, VarMap<'ctx>)>,
        merge_bb: BasicBlock<'ctx>,
        live: Option<&BTreeSet<Symbol>>,
    ) -> Result<VarMap<'ctx>, CompError> {
        if incomings.len() == 1 {
            return Ok(incomings.into_iter().next().unwrap().1);
        }

        let mut all_syms: BTreeSet<Symbol> = BTreeSet::new();
        for (_, map) in &incomings {
            all_syms.extend(map.keys().copied());
        }

        let mut merged = VarMap::new();
        for sym in all_syms {
            if let Some(live_set) = live {
                if !live_set.contains(&sym) {
                    continue;
                }
            }
            let states: Vec<Option<VarState<'ctx>>> = incomings
                .iter()
                .map(|(_, map)| map.get(&sym).copied())
                .collect();

            let all_local = states
                .iter()
                .all(|s| matches!(s, Some(VarState::Local(_))));
            if all_local {
                // Phi node with per-edge mode conversion.
                let mut mode = StorageMode::I1;
                let mut kind: Option<ObjKind> = None;
                for s in &states {
                    let Some(VarState::Local(jv)) = s else {
                        unreachable!()
                    };
                    mode = StorageMode::widen(mode, jv.mode);
                    kind = match kind {
                        None => Some(jv.kind),
                        Some(k) if k == jv.kind => Some(k),
                        Some(_) => Some(ObjKind::Unknown),
                    };
                }
                let mut edge_values = Vec::with_capacity(incomings.len());
                for ((block, _), state) in incomings.iter().zip(&states) {
                    let Some(VarState::Local(jv)) = state else {
                        unreachable!()
                    };
                    let terminator = block
                        .get_terminator()
                        .ok_or_else(|| CompError::Llvm("predecessor lacks terminator".into()))?;
                    self.builder.position_before(&terminator);
                    let converted = convert_mode(
                        self.context,
                        &self.builder,
                        self.module,
                        *jv,
                        mode,
                    )?;
                    edge_values.push((converted.value, *block));
                }
                // Phis live at the head of the merge block.
                match merge_bb.get_first_instruction() {
                    Some(first) => self.builder.position_before(&first),
                    None => self.builder.position_at_end(merge_bb),
                }
                let phi = self
                    .builder
                    .build_phi(mode.llvm_type(self.context), &format!("merge_{}", sym))
                    .map_err(CompError::llvm)?;
                for (value, block) in &edge_values {
                    phi.add_incoming(&[(value, *block)]);
                }
                merged.insert(
                    sym,
                    VarState::Local(JitValue::new(
                        phi.as_basic_value(),
                        mode,
                        kind.unwrap_or(ObjKind::Unknown),
                    )),
                );
            } else {
                // Mixed or environment-resident: locally stored sides
                // write the environment before branching in.
                for ((block, _), state) in incomings.iter().zip(&states) {
                    if let Some(VarState::Local(jv)) = state {
                        let terminator = block.get_terminator().ok_or_else(|| {
                            CompError::Llvm("predecessor lacks terminator".into())
                        })?;
                        self.builder.position_before(&terminator);
                        let boxed = convert_mode(
                            self.context,
                            &self.builder,
                            self.module,
                            *jv,
                            StorageMode::ObjPtr,
                        )?;
                        runtime::call_runtime_void(
                            &self.builder,
                            self.module,
                            runtime::RT_ENV_BIND,
                            &[
                                self.env().into(),
                                self.sym_id_const(sym).into(),
                                boxed.value.into(),
                            ],
                        )?;
                    }
                }
                merged.insert(sym, VarState::Env);
            }
        }
        Ok(merged)
    }

    // -- function exit ------------------------------------------------------

    /// Writes the output struct: each assigned output parameter in
    /// order, stopping at the first unset one, then the produced count;
    /// ends with `ret void`.
    pub(crate) fn emit_exit(&mut self, vars: &VarMap<'ctx>) -> Result<(), CompError> {
        let outs_ptr = self
            .llvm_fn
            .get_nth_param(1)
            .expect("entry has two params")
            .into_pointer_value();
        let n_outs = self.prog.out_params.len();
        let count_slot = n_outs;

        let done_bb = self.context.append_basic_block(self.llvm_fn, "exit_done");

        for i in 0..n_outs {
            let sym = self.prog.out_params[i];
            let mode = self.out_modes[i];
            match vars.get(&sym) {
                Some(VarState::Local(jv)) => {
                    self.store_slot(outs_ptr, i, *jv, mode)?;
                }
                _ => {
                    // Environment-resident (or never assigned): probe at
                    // run time; an unset output ends the produced list.
                    let obj = runtime::call_runtime(
                        &self.builder,
                        self.module,
                        runtime::RT_ENV_TRY_LOOKUP,
                        &[self.env().into(), self.sym_id_const(sym).into()],
                        "out_probe",
                    )?;
                    let is_null = self
                        .builder
                        .build_is_null(obj.into_pointer_value(), "out_null")
                        .map_err(CompError::llvm)?;
                    let have_bb = self
                        .context
                        .append_basic_block(self.llvm_fn, "out_have");
                    let stop_bb = self
                        .context
                        .append_basic_block(self.llvm_fn, "out_stop");
                    self.builder
                        .build_conditional_branch(is_null, stop_bb, have_bb)
                        .map_err(CompError::llvm)?;

                    // Unset: record how many outputs were produced.
                    self.builder.position_at_end(stop_bb);
                    let ptr = self.slot_ptr(outs_ptr, count_slot)?;
                    self.builder
                        .build_store(ptr, self.i64_const(i as i64))
                        .map_err(CompError::llvm)?;
                    self.builder
                        .build_unconditional_branch(done_bb)
                        .map_err(CompError::llvm)?;

                    self.builder.position_at_end(have_bb);
                    let jv = JitValue::new(obj, StorageMode::ObjPtr, ObjKind::Unknown);
                    self.store_slot(outs_ptr, i, jv, mode)?;
                }
            }
        }

        let ptr = self.slot_ptr(outs_ptr, count_slot)?;
        self.builder
            .build_store(ptr, self.i64_const(n_outs as i64))
            .map_err(CompError::llvm)?;
        self.builder
            .build_unconditional_branch(done_bb)
            .map_err(CompError::llvm)?;

        self.builder.position_at_end(done_bb);
        self.builder.build_return(None).map_err(CompError::llvm)?;
        Ok(())
    }

    // -- expressions --------------------------------------------------------

    /// Compiles an expression to a value. `Unsupported` errors bubble to
    /// the statement level, which falls back to the interpreter.
    pub(crate) fn compile_expr(
        &mut self,
        expr: &Expr,
        vars: &mut VarMap<'ctx>,
    ) -> Result<JitValue<'ctx>, CompError> {
        match &expr.kind {
            ExprKind::IntConst(v) => Ok(JitValue::new(
                self.i64_const(*v).into(),
                StorageMode::I64,
                ObjKind::MatrixF64,
            )),
            ExprKind::FpConst(v) => Ok(JitValue::new(
                self.context.f64_type().const_float(*v).into(),
                StorageMode::F64,
                ObjKind::MatrixF64,
            )),
            ExprKind::Symbol(sym) => {
                // A symbol inferred as a function auto-calls.
                let set = self.expr_type_set(expr);
                if type_set_widest(&set).kind == ObjKind::Function {
                    return self.compile_call_expr(expr, *sym, &[], vars);
                }
                let kind = type_set_widest(&set).kind;
                self.read_var(*sym, vars, kind)
            }
            ExprKind::Unary { op, operand } => {
                let v = self.compile_expr(operand, vars)?;
                self.compile_unop(*op, v)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.compile_expr(lhs, vars)?;
                let r = self.compile_expr(rhs, vars)?;
                let result_kind = self.expr_kind_of(expr);
                self.compile_binop(*op, l, r, result_kind)
            }
            ExprKind::Param { symbol, args } => {
                let head_kind = self.head_symbol_kind(*symbol, vars);
                if head_kind == ObjKind::Function || head_kind == ObjKind::FnHandle {
                    return self.compile_call_expr(expr, *symbol, args, vars);
                }
                if self.is_statically_function(*symbol, vars) {
                    return self.compile_call_expr(expr, *symbol, args, vars);
                }
                self.compile_array_read(expr, *symbol, args, vars)
            }
            other => Err(CompError::unsupported(
                format!("expression kind {:?}", variant_name(other)),
                expr,
            )),
        }
    }

    fn compile_unop(
        &mut self,
        op: UnOp,
        v: JitValue<'ctx>,
    ) -> Result<JitValue<'ctx>, CompError> {
        match (op, v.mode) {
            (UnOp::Plus, StorageMode::I1 | StorageMode::I64 | StorageMode::F64) => Ok(v),
            (UnOp::Minus, StorageMode::I64) => Ok(JitValue::new(
                self.builder
                    .build_int_neg(v.value.into_int_value(), "neg")
                    .map_err(CompError::llvm)?
                    .into(),
                StorageMode::I64,
                ObjKind::MatrixF64,
            )),
            (UnOp::Minus, StorageMode::F64) => Ok(JitValue::new(
                self.builder
                    .build_float_neg(v.value.into_float_value(), "fneg")
                    .map_err(CompError::llvm)?
                    .into(),
                StorageMode::F64,
                ObjKind::MatrixF64,
            )),
            (UnOp::Minus, StorageMode::I1) => {
                let wide = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    v,
                    StorageMode::I64,
                )?;
                self.compile_unop(UnOp::Minus, wide)
            }
            (UnOp::Not, StorageMode::I1 | StorageMode::I64 | StorageMode::F64) => {
                let b = convert_mode(
                    self.context,
                    &self.builder,
                    self.module,
                    v,
                    StorageMode::I1,
                )?;
                Ok(JitValue::new(
                    self.builder
                        .build_not(b.value.into_int_value(), "not")
                        .map_err(CompError::llvm)?
                        .into(),
                    StorageMode::I1,
                    ObjKind::LogicalArray,
                ))
            }
            // Scalar transpose is the identity.
            (UnOp::Transpose | UnOp::CtransPose, m) if m != StorageMode::ObjPtr => Ok(v),
            // Object operand: generic runtime unary.
            (_, StorageMode::ObjPtr) => {
                let out = runtime::call_runtime(
                    &self.builder,
                    self.module,
                    runtime::RT_UN_OP,
                    &[
                        self.i64_const(runtime::un_op_code(op) as i64).into(),
                        v.value.into(),
                    ],
                    "unop",
                )?;
                Ok(JitValue::new(out, StorageMode::ObjPtr, ObjKind::Unknown))
            }
        }
    }

    /// The inferred kind of a Param head: local map first, then the
    /// inference's view of the symbol.
    fn head_symbol_kind(&self, sym: Symbol, vars: &VarMap<'ctx>) -> ObjKind {
        if let Some(VarState::Local(jv)) = vars.get(&sym) {
            return jv.kind;
        }
        ObjKind::Unknown
    }

    /// Whether the symbol statically resolves to a function through the
    /// environment chain (and is not shadowed by a local variable).
    pub(crate) fn is_statically_function(&self, sym: Symbol, vars: &VarMap<'ctx>) -> bool {
        if vars.contains_key(&sym) {
            return false;
        }
        self.resolve_static_function(sym).is_some()
    }

    /// Compile-time resolution of a symbol to a function binding.
    pub(crate) fn resolve_static_function(&self, sym: Symbol) -> Option<FuncRef> {
        if let Some(nested) = self.prog.find_nested(&sym.name()) {
            return Some(nested);
        }
        let env = (*self.prog.local_env.borrow())?;
        match env.try_lookup(sym) {
            Some(matlang_core::object::DataObject::Func(f)) => Some(f),
            _ => None,
        }
    }
}

fn variant_name(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Symbol(_) => "Symbol",
        ExprKind::IntConst(_) => "IntConst",
        ExprKind::FpConst(_) => "FpConst",
        ExprKind::StrConst(_) => "StrConst",
        ExprKind::Unary { .. } => "Unary",
        ExprKind::Binary { .. } => "Binary",
        ExprKind::Param { .. } => "Param",
        ExprKind::CellIndex { .. } => "CellIndex",
        ExprKind::Range { .. } => "Range",
        ExprKind::End { .. } => "End",
        ExprKind::Matrix { .. } => "Matrix",
        ExprKind::CellArray { .. } => "CellArray",
        ExprKind::FnHandle(_) => "FnHandle",
        ExprKind::Lambda { .. } => "Lambda",
    }
}

