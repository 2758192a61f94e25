use crate::bytecode::{Function, Module, Op};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub function: String,
    /// `None` for problems with the function header rather than an instruction.
    pub pc: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pc {
            Some(pc) => write!(f, "verify: {} at {}:{pc}", self.message, self.function),
            None => write!(f, "verify: {} in '{}'", self.message, self.function),
        }
    }
}

impl std::error::Error for VerifyError {}

struct VerifyContext<'m> {
    module: &'m Module,
    errors: Vec<VerifyError>,
}

impl<'m> VerifyContext<'m> {
    fn new(module: &'m Module) -> Self {
        Self { module, errors: Vec::new() }
    }

    fn err(&mut self, function: &str, pc: Option<usize>, message: String) {
        self.errors.push(VerifyError { function: function.to_string(), pc, message });
    }

    fn verify_function(&mut self, func: &Function) {
        if func.nlocals < func.arity {
            self.err(
                &func.name,
                None,
                format!("{} local(s) cannot hold {} argument(s)", func.nlocals, func.arity),
            );
        }
        for (pc, inst) in func.code.iter().enumerate() {
            match inst.op {
                Op::Const => {
                    let len = self.module.consts.len();
                    if !in_range(inst.a, len) {
                        self.err(&func.name, Some(pc), format!("constant index {} out of range ({len} constants)", inst.a));
                    }
                }
                Op::Load | Op::Store => {
                    if !in_range(inst.a, func.nlocals) {
                        self.err(
                            &func.name,
                            Some(pc),
                            format!("{} of local {} out of range ({} locals)", inst.op, inst.a, func.nlocals),
                        );
                    }
                }
                Op::Jmp | Op::JmpIfFalse => {
                    // A target equal to the length is allowed here; running
                    // into it still faults at fetch time.
                    let target = pc as i64 + 1 + i64::from(inst.a);
                    if target < 0 || target > func.code.len() as i64 {
                        self.err(
                            &func.name,
                            Some(pc),
                            format!("jump target {target} outside 0..={}", func.code.len()),
                        );
                    }
                }
                Op::Call => self.verify_call(func, pc, inst.a, inst.b),
                _ => {}
            }
        }
    }

    fn verify_call(&mut self, func: &Function, pc: usize, target: i32, argc: i32) {
        let module = self.module;
        let funcs = &module.funcs;
        let Some(callee) = usize::try_from(target).ok().and_then(|i| funcs.get(i)) else {
            let len = funcs.len();
            self.err(&func.name, Some(pc), format!("call to function {target} out of range ({len} functions)"));
            return;
        };
        if usize::try_from(argc).ok() != Some(callee.arity) {
            let message = format!("arity mismatch: '{}' takes {} argument(s), called with {argc}", callee.name, callee.arity);
            self.err(&func.name, Some(pc), message);
        }
    }
}

fn in_range(operand: i32, len: usize) -> bool {
    usize::try_from(operand).is_ok_and(|i| i < len)
}

/// Statically check every function of a module.
/// Returns Ok(()) if valid, Err(errors) with every problem found.
pub fn verify(module: &Module) -> Result<(), Vec<VerifyError>> {
    let mut ctx = VerifyContext::new(module);
    for func in &module.funcs {
        ctx.verify_function(func);
    }

    if ctx.errors.is_empty() {
        Ok(())
    } else {
        Err(ctx.errors)
    }
}
