//! Cranelift JIT backend for the recognized `add` program.
//!
//! Builds `add(i64, i64) -> i64` and a `main() -> i64` that calls it with
//! the recognized operands, compiles both for the host and runs `main`.

use std::io::Write;

use cranelift_codegen::Context;
use cranelift_codegen::ir::types::I64;
use cranelift_codegen::ir::{AbiParam, InstBuilder};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module as _, default_libcall_names};

use super::{AddCall, CodegenError, recognize};
use crate::bytecode::Module;

fn jit_err(e: impl std::fmt::Display) -> CodegenError {
    CodegenError::Jit(e.to_string())
}

/// JIT-compile and run `module`, writing `"<sum>\n"` to `out`.
pub fn run(module: &Module, out: &mut dyn Write) -> Result<i64, CodegenError> {
    let call = recognize(module)?;
    let sum = compile_and_call(call)?;
    writeln!(out, "{sum}")?;
    Ok(sum)
}

fn compile_and_call(call: AddCall) -> Result<i64, CodegenError> {
    let mut flag_builder = settings::builder();
    flag_builder.set("opt_level", "speed").map_err(jit_err)?;
    let isa_builder = cranelift_native::builder().map_err(jit_err)?;
    let isa = isa_builder.finish(settings::Flags::new(flag_builder)).map_err(jit_err)?;

    let mut jit = JITModule::new(JITBuilder::with_isa(isa, default_libcall_names()));

    // add: (i64, i64) -> i64
    let mut add_sig = jit.make_signature();
    add_sig.params.push(AbiParam::new(I64));
    add_sig.params.push(AbiParam::new(I64));
    add_sig.returns.push(AbiParam::new(I64));
    let add_id = jit.declare_function("seed_add", Linkage::Local, &add_sig).map_err(jit_err)?;

    // main: () -> i64
    let mut main_sig = jit.make_signature();
    main_sig.returns.push(AbiParam::new(I64));
    let main_id = jit.declare_function("seed_main", Linkage::Local, &main_sig).map_err(jit_err)?;

    let mut ctx = Context::new();
    let mut fn_builder_ctx = FunctionBuilderContext::new();

    ctx.func.signature = add_sig;
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fn_builder_ctx);
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let (a, b) = (builder.block_params(entry)[0], builder.block_params(entry)[1]);
        let sum = builder.ins().iadd(a, b);
        builder.ins().return_(&[sum]);
        builder.finalize();
    }
    jit.define_function(add_id, &mut ctx).map_err(jit_err)?;
    jit.clear_context(&mut ctx);

    ctx.func.signature = main_sig;
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fn_builder_ctx);
        let entry = builder.create_block();
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let add_ref = jit.declare_func_in_func(add_id, builder.func);
        let lhs = builder.ins().iconst(I64, call.lhs);
        let rhs = builder.ins().iconst(I64, call.rhs);
        let inst = builder.ins().call(add_ref, &[lhs, rhs]);
        let result = builder.inst_results(inst)[0];
        builder.ins().return_(&[result]);
        builder.finalize();
    }
    jit.define_function(main_id, &mut ctx).map_err(jit_err)?;
    jit.clear_context(&mut ctx);

    jit.finalize_definitions().map_err(jit_err)?;
    let main_ptr = jit.get_finalized_function(main_id);
    tracing::debug!(lhs = call.lhs, rhs = call.rhs, "jit compiled add program");

    // SAFETY: `main_ptr` was finalized above with signature `() -> i64`, and
    // `jit` keeps the code mapped until after the call returns.
    let main_fn: extern "C" fn() -> i64 = unsafe { std::mem::transmute(main_ptr) };
    Ok(main_fn())
}
