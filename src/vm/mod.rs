use std::fmt;
use std::io::{self, Write};

use crate::bytecode::{Function, Module, Op, UnknownOpcode};
use crate::heap::{AllocError, Handle, Heap};
use crate::value::Value;

mod config;

pub use config::{GC_EVERY_ENV, TRACE_ENV, VmConfig};

// ── Errors ───────────────────────────────────────────────────────────

/// Where a fault happened: function name, pc of the faulting instruction, opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub function: String,
    pub pc: usize,
    pub op: Op,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.function, self.pc, self.op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Local,
    Const,
    Function,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::Local => "local",
            IndexKind::Const => "constant",
            IndexKind::Function => "function",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("entry function '{name}' not found")]
    EntryNotFound { name: String },
    #[error("entry function '{name}' expects {expected} argument(s), got {got}")]
    EntryArityMismatch { name: String, expected: usize, got: usize },
    #[error("stack underflow at {site}")]
    StackUnderflow { site: Site },
    #[error("{kind} index {index} out of range at {site} ({len} available)")]
    IndexOutOfRange { kind: IndexKind, index: i64, len: usize, site: Site },
    #[error("pc {pc} out of range in '{function}' ({len} instructions)")]
    PcOutOfRange { function: String, pc: i64, len: usize },
    #[error("arity mismatch at {site}: '{callee}' expects {expected} argument(s), got {got}")]
    ArityMismatch { callee: String, expected: usize, got: i32, site: Site },
    #[error("'{function}' has {nlocals} local(s) but takes {arity} argument(s){}", located(.site))]
    FrameTooSmall { function: String, arity: usize, nlocals: usize, site: Option<Site> },
    #[error("division by zero at {site}")]
    DivisionByZero { site: Site },
    #[error("type mismatch at {site}: expected integer operands, found a heap reference")]
    TypeMismatch { site: Site },
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u8 },
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("output error: {0}")]
    Output(#[from] io::Error),
}

fn located(site: &Option<Site>) -> String {
    site.as_ref().map(|s| format!(" at {s}")).unwrap_or_default()
}

impl From<UnknownOpcode> for VmError {
    fn from(e: UnknownOpcode) -> Self {
        VmError::UnknownOpcode { op: e.0 }
    }
}

pub type VmResult<T> = Result<T, VmError>;

// ── Run result ───────────────────────────────────────────────────────

/// Summary of a run that halted successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Value returned by the entry function.
    pub value: Value,
    pub steps: u64,
    pub collections: u64,
    /// Operand-stack depth left behind when the entry frame returned.
    pub residual_stack: usize,
}

// ── VM ───────────────────────────────────────────────────────────────

/// Execution engine plus the heap it collects.
///
/// A `Vm` owns its [`Heap`], so independent VMs never share GC state.
/// `run` borrows the VM mutably: one run at a time per instance.
pub struct Vm {
    config: VmConfig,
    heap: Heap,
    trace_sink: Box<dyn Write>,
}

impl Vm {
    pub fn new(config: VmConfig) -> Self {
        Self::with_heap(config, Heap::new())
    }

    pub fn with_heap(config: VmConfig, heap: Heap) -> Self {
        Vm { config, heap, trace_sink: Box::new(io::stderr()) }
    }

    /// Redirect instruction-trace lines (stderr by default).
    pub fn trace_to(mut self, sink: impl Write + 'static) -> Self {
        self.trace_sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> VmConfig {
        self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn into_heap(self) -> Heap {
        self.heap
    }

    pub fn run(&mut self, module: &Module, entry: &str, out: &mut dyn Write) -> VmResult<Outcome> {
        self.run_with_args(module, entry, Vec::new(), out)
    }

    /// Run `entry` with `args` placed in its leading locals.
    pub fn run_with_args(
        &mut self,
        module: &Module,
        entry: &str,
        args: Vec<Value>,
        out: &mut dyn Write,
    ) -> VmResult<Outcome> {
        let func_idx = module
            .find_function_by_name(entry)
            .ok_or_else(|| VmError::EntryNotFound { name: entry.to_string() })?;
        let func = &module.funcs[func_idx];
        if args.len() != func.arity {
            return Err(VmError::EntryArityMismatch {
                name: entry.to_string(),
                expected: func.arity,
                got: args.len(),
            });
        }
        let frame = Frame::with_args(func, &args, || None)?;

        tracing::debug!(entry, func_idx, gc_every = ?self.config.gc_every, "run start");
        let machine = Machine {
            module,
            config: self.config,
            heap: &mut self.heap,
            out,
            trace: &mut *self.trace_sink,
            stack: Vec::with_capacity(256),
            frames: vec![frame],
            steps: 0,
            collections: 0,
        };
        let result = machine.execute();
        match &result {
            Ok(o) => tracing::debug!(steps = o.steps, collections = o.collections, "run halted"),
            Err(e) => tracing::debug!(error = %e, "run failed"),
        }
        result
    }
}

/// Run `entry` with default settings on a fresh heap.
pub fn run(module: &Module, entry: &str, out: &mut dyn Write) -> VmResult<Outcome> {
    Vm::new(VmConfig::default()).run(module, entry, out)
}

// ── Machine ──────────────────────────────────────────────────────────

struct Frame<'m> {
    func: &'m Function,
    pc: usize,
    locals: Box<[Value]>,
}

impl<'m> Frame<'m> {
    /// `site` names the CALL that builds the frame; the entry frame has none.
    fn with_args(func: &'m Function, args: &[Value], site: impl FnOnce() -> Option<Site>) -> VmResult<Self> {
        if args.len() > func.nlocals {
            return Err(VmError::FrameTooSmall {
                function: func.name.clone(),
                arity: args.len(),
                nlocals: func.nlocals,
                site: site(),
            });
        }
        let mut locals = vec![Value::Nil; func.nlocals].into_boxed_slice();
        locals[..args.len()].copy_from_slice(args);
        Ok(Frame { func, pc: 0, locals })
    }
}

enum Step {
    Running,
    Halted(Value),
}

struct Machine<'m, 'r> {
    module: &'m Module,
    config: VmConfig,
    heap: &'r mut Heap,
    out: &'r mut dyn Write,
    trace: &'r mut dyn Write,
    stack: Vec<Value>,
    frames: Vec<Frame<'m>>,
    steps: u64,
    collections: u64,
}

/// Bounds-checked conversion of an instruction operand into a table index.
fn slot(operand: i32, len: usize) -> Option<usize> {
    usize::try_from(operand).ok().filter(|&i| i < len)
}

impl<'m> Machine<'m, '_> {
    fn execute(mut self) -> VmResult<Outcome> {
        loop {
            if let Step::Halted(value) = self.step()? {
                return Ok(Outcome {
                    value,
                    steps: self.steps,
                    collections: self.collections,
                    residual_stack: self.stack.len(),
                });
            }
        }
    }

    fn step(&mut self) -> VmResult<Step> {
        let Some(top) = self.frames.len().checked_sub(1) else {
            return Ok(Step::Halted(Value::Nil));
        };
        let func = self.frames[top].func;
        let pc = self.frames[top].pc;
        let inst = *func.code.get(pc).ok_or_else(|| VmError::PcOutOfRange {
            function: func.name.clone(),
            pc: pc as i64,
            len: func.code.len(),
        })?;
        self.frames[top].pc = pc + 1;
        self.steps += 1;

        if self.config.trace {
            // Trace failures must not affect the run.
            let _ = writeln!(
                self.trace,
                "[pc={pc}] {} a={} b={} stack={}",
                inst.op, inst.a, inst.b, self.stack.len()
            );
        }

        let site = || Site { function: func.name.clone(), pc, op: inst.op };

        match inst.op {
            Op::Enter | Op::Leave => {}
            Op::Const => {
                let consts = &self.module.consts;
                let k = slot(inst.a, consts.len()).ok_or_else(|| VmError::IndexOutOfRange {
                    kind: IndexKind::Const,
                    index: inst.a.into(),
                    len: consts.len(),
                    site: site(),
                })?;
                self.stack.push(consts[k].into());
            }
            Op::Load => {
                let i = self.local_slot(top, inst.a, &site)?;
                self.stack.push(self.frames[top].locals[i]);
            }
            Op::Store => {
                let i = self.local_slot(top, inst.a, &site)?;
                let v = self.pop(&site)?;
                self.frames[top].locals[i] = v;
            }
            Op::Pop => {
                self.pop(&site)?;
            }
            Op::Dup => {
                let v = *self.stack.last().ok_or_else(|| VmError::StackUnderflow { site: site() })?;
                self.stack.push(v);
            }
            Op::Add => self.arith(&site, |a, b| Some(a.wrapping_add(b)))?,
            Op::Sub => self.arith(&site, |a, b| Some(a.wrapping_sub(b)))?,
            Op::Mul => self.arith(&site, |a, b| Some(a.wrapping_mul(b)))?,
            Op::Div => self.arith(&site, |a, b| (b != 0).then(|| a.wrapping_div(b)))?,
            Op::Mod => self.arith(&site, |a, b| (b != 0).then(|| a.wrapping_rem(b)))?,
            Op::Not => {
                let v = self.pop(&site)?;
                self.stack.push((!v.truthy()).into());
            }
            Op::Eq => self.compare(&site, |a, b| a == b)?,
            Op::Ne => self.compare(&site, |a, b| a != b)?,
            Op::Lt => self.compare(&site, |a, b| a < b)?,
            Op::Le => self.compare(&site, |a, b| a <= b)?,
            Op::Gt => self.compare(&site, |a, b| a > b)?,
            Op::Ge => self.compare(&site, |a, b| a >= b)?,
            Op::Jmp => self.jump(top, inst.a)?,
            Op::JmpIfFalse => {
                let cond = self.pop(&site)?;
                if !cond.truthy() {
                    self.jump(top, inst.a)?;
                }
            }
            Op::Call => self.call(inst.a, inst.b, &site)?,
            Op::Ret => {
                let rv = self.stack.pop().unwrap_or(Value::Nil);
                self.frames.pop();
                if self.frames.is_empty() {
                    return Ok(Step::Halted(rv));
                }
                self.stack.push(rv);
            }
            Op::Print => {
                let v = self.pop(&site)?;
                writeln!(self.out, "{v}")?;
            }
        }

        if self.config.gc_every.is_some_and(|n| self.steps % n.get() == 0) {
            self.collect();
        }
        Ok(Step::Running)
    }

    fn pop(&mut self, site: &impl Fn() -> Site) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| VmError::StackUnderflow { site: site() })
    }

    fn pop_int(&mut self, site: &impl Fn() -> Site) -> VmResult<i64> {
        self.pop(site)?.as_int().ok_or_else(|| VmError::TypeMismatch { site: site() })
    }

    fn local_slot(&self, top: usize, operand: i32, site: &impl Fn() -> Site) -> VmResult<usize> {
        let len = self.frames[top].locals.len();
        slot(operand, len).ok_or_else(|| VmError::IndexOutOfRange {
            kind: IndexKind::Local,
            index: operand.into(),
            len,
            site: site(),
        })
    }

    /// Pops `b` then `a`; `None` from `f` means a zero divisor.
    fn arith(&mut self, site: &impl Fn() -> Site, f: impl Fn(i64, i64) -> Option<i64>) -> VmResult<()> {
        let b = self.pop_int(site)?;
        let a = self.pop_int(site)?;
        let r = f(a, b).ok_or_else(|| VmError::DivisionByZero { site: site() })?;
        self.stack.push(r.into());
        Ok(())
    }

    fn compare(&mut self, site: &impl Fn() -> Site, f: impl Fn(i64, i64) -> bool) -> VmResult<()> {
        let b = self.pop_int(site)?;
        let a = self.pop_int(site)?;
        self.stack.push(f(a, b).into());
        Ok(())
    }

    /// Relative jump from the already-advanced pc of frame `top`.
    fn jump(&mut self, top: usize, offset: i32) -> VmResult<()> {
        let frame = &mut self.frames[top];
        match frame.pc.checked_add_signed(offset as isize) {
            Some(target) => {
                frame.pc = target;
                Ok(())
            }
            None => Err(VmError::PcOutOfRange {
                function: frame.func.name.clone(),
                pc: frame.pc as i64 + i64::from(offset),
                len: frame.func.code.len(),
            }),
        }
    }

    /// Arguments come off the stack last-first and land in the callee's
    /// locals in call order.
    fn call(&mut self, func_operand: i32, argc: i32, site: &impl Fn() -> Site) -> VmResult<()> {
        let module = self.module;
        let idx = slot(func_operand, module.funcs.len()).ok_or_else(|| VmError::IndexOutOfRange {
            kind: IndexKind::Function,
            index: func_operand.into(),
            len: module.funcs.len(),
            site: site(),
        })?;
        let callee = &module.funcs[idx];
        if usize::try_from(argc).ok() != Some(callee.arity) {
            return Err(VmError::ArityMismatch {
                callee: callee.name.clone(),
                expected: callee.arity,
                got: argc,
                site: site(),
            });
        }
        let base = self
            .stack
            .len()
            .checked_sub(callee.arity)
            .ok_or_else(|| VmError::StackUnderflow { site: site() })?;
        let frame = Frame::with_args(callee, &self.stack[base..], || Some(site()))?;
        self.stack.truncate(base);
        self.frames.push(frame);
        Ok(())
    }

    /// Roots are every heap reference on the operand stack and in the
    /// locals of every frame, not just the active one.
    fn roots(&self) -> Vec<Handle> {
        let locals = self.frames.iter().flat_map(|f| f.locals.iter());
        self.stack.iter().chain(locals).filter_map(|v| v.as_handle()).collect()
    }

    fn collect(&mut self) {
        let roots = self.roots();
        let stats = self.heap.collect(&roots);
        self.collections += 1;
        tracing::trace!(
            step = self.steps,
            roots = roots.len(),
            freed_objects = stats.freed_objects,
            freed_bytes = stats.freed_bytes,
            "collection"
        );
    }
}

// ── Tests ────────────────────────────────────────────────────────────
