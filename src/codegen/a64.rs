//! AArch64 assembly text for the recognized `add` program.
//!
//! Mach-O and ELF differ in symbol prefix, page relocations and how the
//! variadic `printf` argument is passed: Apple's ABI puts it on the stack,
//! AAPCS64 in `x1`.

use target_lexicon::{Architecture, BinaryFormat, Triple};

use super::{AddCall, CodegenError, recognize};
use crate::bytecode::Module;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    MachO,
    Elf,
}

impl Flavor {
    fn of(triple: &Triple) -> Result<Self, CodegenError> {
        if !matches!(triple.architecture, Architecture::Aarch64(_)) {
            return Err(CodegenError::UnsupportedTarget(triple.to_string()));
        }
        match triple.binary_format {
            BinaryFormat::Macho => Ok(Flavor::MachO),
            BinaryFormat::Elf => Ok(Flavor::Elf),
            _ => Err(CodegenError::UnsupportedTarget(triple.to_string())),
        }
    }

    fn symbol(self, name: &str) -> String {
        match self {
            Flavor::MachO => format!("_{name}"),
            Flavor::Elf => name.to_string(),
        }
    }
}

/// Emit assembly for `module` on `triple`.
pub fn emit(module: &Module, triple: &Triple) -> Result<String, CodegenError> {
    let flavor = Flavor::of(triple)?;
    let call = recognize(module)?;
    tracing::debug!(target_triple = %triple, ?flavor, "emitting aarch64 assembly");
    Ok(render(flavor, call))
}

fn render(flavor: Flavor, call: AddCall) -> String {
    let add = flavor.symbol("add");
    let main = flavor.symbol("main");
    let printf = flavor.symbol("printf");
    let mut asm = String::new();

    match flavor {
        Flavor::MachO => asm.push_str(".section __TEXT,__text,regular,pure_instructions\n"),
        Flavor::Elf => asm.push_str("  .text\n"),
    }

    // add(x0, x1) -> x0
    function_header(&mut asm, flavor, &add);
    asm.push_str("  add x0, x0, x1\n  ret\n");
    function_footer(&mut asm, flavor, &add);

    asm.push('\n');
    function_header(&mut asm, flavor, &main);
    asm.push_str("  stp x29, x30, [sp, #-16]!\n  mov x29, sp\n");
    load_immediate(&mut asm, "x0", call.lhs);
    load_immediate(&mut asm, "x1", call.rhs);
    asm.push_str(&format!("  bl {add}\n"));
    match flavor {
        Flavor::MachO => {
            asm.push_str("  sub sp, sp, #16\n  str x0, [sp]\n");
            asm.push_str("  adrp x0, Lfmt@PAGE\n  add x0, x0, Lfmt@PAGEOFF\n");
            asm.push_str(&format!("  bl {printf}\n"));
            asm.push_str("  add sp, sp, #16\n");
        }
        Flavor::Elf => {
            asm.push_str("  mov x1, x0\n");
            asm.push_str("  adrp x0, .Lfmt\n  add x0, x0, :lo12:.Lfmt\n");
            asm.push_str(&format!("  bl {printf}\n"));
        }
    }
    asm.push_str("  mov w0, #0\n  ldp x29, x30, [sp], #16\n  ret\n");
    function_footer(&mut asm, flavor, &main);

    asm.push('\n');
    match flavor {
        Flavor::MachO => {
            asm.push_str(".section __TEXT,__cstring,cstring_literals\n");
            asm.push_str("Lfmt:\n  .asciz \"%lld\\n\"\n");
            asm.push_str(".subsections_via_symbols\n");
        }
        Flavor::Elf => {
            asm.push_str("  .section .rodata\n");
            asm.push_str(".Lfmt:\n  .asciz \"%lld\\n\"\n");
            asm.push_str("  .section .note.GNU-stack,\"\",%progbits\n");
        }
    }
    asm
}

fn function_header(asm: &mut String, flavor: Flavor, sym: &str) {
    asm.push_str(&format!("  .globl {sym}\n"));
    if flavor == Flavor::Elf {
        asm.push_str(&format!("  .type {sym}, %function\n"));
    }
    asm.push_str(&format!("  .p2align 2\n{sym}:\n"));
}

fn function_footer(asm: &mut String, flavor: Flavor, sym: &str) {
    if flavor == Flavor::Elf {
        asm.push_str(&format!("  .size {sym}, .-{sym}\n"));
    }
}

/// `movz` the low half-word, then `movk` each non-zero higher one.
fn load_immediate(asm: &mut String, reg: &str, value: i64) {
    let bits = value as u64;
    asm.push_str(&format!("  movz {reg}, #{}\n", bits & 0xffff));
    for shift in [16, 32, 48] {
        let chunk = (bits >> shift) & 0xffff;
        if chunk != 0 {
            asm.push_str(&format!("  movk {reg}, #{chunk}, lsl #{shift}\n"));
        }
    }
}
