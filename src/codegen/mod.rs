//! Native backends for the `main` → `add(a, b)` → print program shape.
//!
//! Both backends share [`recognize`], which pulls the two `add` operands
//! out of `main`'s bytecode. Anything it can't read is refused.

use std::collections::HashMap;

use crate::bytecode::{Module, Op};

pub mod a64;
#[cfg(feature = "cranelift")]
pub mod jit_cranelift;

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("{0} function not found")]
    MissingFunction(&'static str),
    #[error("add must have arity 2, found {0}")]
    AddArity(usize),
    #[error("unrecognized program shape: main must call add with CONST/LOAD arguments")]
    UnrecognizedShape,
    #[error("unsupported target '{0}': only aarch64 Mach-O and ELF are emitted")]
    UnsupportedTarget(String),
    #[error("jit: {0}")]
    Jit(String),
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

/// Operands of the recognized `add` call, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddCall {
    pub lhs: i64,
    pub rhs: i64,
}

/// Find `main` and a two-argument `add`, then read the first `CALL add 2`
/// in `main`. The call must be preceded by `CONST k`, and before that by
/// `CONST k` or `LOAD s` of a local that an earlier `CONST k; STORE s`
/// initialized.
pub fn recognize(module: &Module) -> Result<AddCall, CodegenError> {
    let main_idx = module.find_function_by_name("main").ok_or(CodegenError::MissingFunction("main"))?;
    let add_idx = module.find_function_by_name("add").ok_or(CodegenError::MissingFunction("add"))?;
    let add = &module.funcs[add_idx];
    if add.arity != 2 {
        return Err(CodegenError::AddArity(add.arity));
    }

    let code = &module.funcs[main_idx].code;
    let constant = |index: i32| usize::try_from(index).ok().and_then(|i| module.consts.get(i)).copied();

    let mut locals: HashMap<i32, i64> = HashMap::new();
    for pair in code.windows(2) {
        if pair[0].op == Op::Const && pair[1].op == Op::Store {
            if let Some(k) = constant(pair[0].a) {
                locals.insert(pair[1].a, k);
            }
        }
    }

    let call_at = code
        .iter()
        .position(|inst| inst.op == Op::Call && usize::try_from(inst.a) == Ok(add_idx) && inst.b == 2)
        .ok_or(CodegenError::UnrecognizedShape)?;
    if call_at < 2 {
        return Err(CodegenError::UnrecognizedShape);
    }
    let (first, second) = (code[call_at - 2], code[call_at - 1]);

    let rhs = match second.op {
        Op::Const => constant(second.a),
        _ => None,
    }
    .ok_or(CodegenError::UnrecognizedShape)?;
    let lhs = match first.op {
        Op::Const => constant(first.a),
        Op::Load => locals.get(&first.a).copied(),
        _ => None,
    }
    .ok_or(CodegenError::UnrecognizedShape)?;

    tracing::debug!(lhs, rhs, "recognized add call");
    Ok(AddCall { lhs, rhs })
}
