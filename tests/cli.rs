use std::io::Write;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::NamedTempFile;

fn seed() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_seed"));
    cmd.env_remove("SEED_TRACE").env_remove("SEED_GC_EVERY").env_remove("RUST_LOG");
    cmd
}

fn module_file(text: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().expect("tempfile");
    file.write_all(text.as_bytes()).expect("write module");
    file
}

fn run(args: &[&str], path: &Path) -> Output {
    seed().args(args).arg(path).output().expect("failed to run seed")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

const ADD: &str = "\
.consts 2
  0: 3
  1: 5
.funcs 2
.func 0 add arity=2 locals=2
   0  LOAD 0
   1  LOAD 1
   2  ADD
   3  RET
.end
.func 1 main arity=0 locals=1
   0  CONST 0
   1  STORE 0
   2  LOAD 0
   3  CONST 1
   4  CALL 0 2
   5  PRINT
   6  RET
.end
";

const BAD_CALL: &str = "\
.consts 1
  0: 3
.funcs 1
.func 0 main arity=0 locals=0
   0  CONST 0
   1  PRINT
   2  CALL 7 0
   3  CONST 0
   4  PRINT
   5  RET
.end
";

// --- run ---

#[test]
fn run_prints_sum() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["run"], file.path());
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "8\n");
    assert!(stderr(&out).is_empty());
}

#[test]
fn run_reports_fault_after_partial_output() {
    let file = module_file(BAD_CALL, ".sbc");
    let out = run(&["run"], file.path());
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout(&out), "3\n");
    assert!(stderr(&out).starts_with("error: function index 7 out of range"), "stderr: {}", stderr(&out));
}

#[test]
fn run_missing_entry() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["run", "--entry", "nonexistent"], file.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).is_empty());
    assert!(stderr(&out).contains("entry function 'nonexistent' not found"));
}

#[test]
fn run_trace_flag_writes_trace_to_stderr() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["run", "--trace"], file.path());
    assert!(out.status.success());
    assert_eq!(stdout(&out), "8\n");
    let trace = stderr(&out);
    assert_eq!(trace.lines().count(), 11);
    assert!(trace.starts_with("[pc=0] CONST a=0 b=0 stack=0\n"));
}

#[test]
fn run_trace_from_environment() {
    let file = module_file(ADD, ".sbc");
    let out = seed().env("SEED_TRACE", "1").arg("run").arg(file.path()).output().expect("failed to run seed");
    assert!(out.status.success());
    assert!(stderr(&out).contains("[pc=4] CALL a=0 b=2 stack=2"));
}

#[test]
fn run_stats_counts_collections() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["run", "--gc-every", "2", "--stats"], file.path());
    assert!(out.status.success());
    assert_eq!(stdout(&out), "8\n");
    // 11 steps; the final RET halts before its collection check.
    assert!(stderr(&out).contains("steps=11 collections=5 residual_stack=0"), "stderr: {}", stderr(&out));
}

#[test]
fn run_json_module() {
    let text = module_file(ADD, ".sbc");
    let dumped = run(&["dump", "--json"], text.path());
    assert!(dumped.status.success());
    let json = module_file(&stdout(&dumped), ".json");
    let out = run(&["run"], json.path());
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "8\n");
}

#[test]
fn run_load_error_names_line() {
    let file = module_file(".funcs 1\n.func 0 main arity=0 locals=0\n 0 HALT\n.end\n", ".sbc");
    let out = run(&["run"], file.path());
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stderr(&out).trim(), "error: line 3: unknown mnemonic 'HALT'");
}

// --- check / dump ---

#[test]
fn check_accepts_valid_module() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["check"], file.path());
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), "ok: 2 function(s), 2 constant(s)");
}

#[test]
fn check_lists_every_problem() {
    let file = module_file(BAD_CALL, ".sbc");
    let out = run(&["check"], file.path());
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("1 verification error(s)"), "stderr: {err}");
    assert!(err.contains("call to function 7 out of range (1 functions) at main:2"));
}

#[test]
fn dump_round_trips_text() {
    let file = module_file(ADD, ".sbc");
    let first = run(&["dump"], file.path());
    assert!(first.status.success());
    let again = module_file(&stdout(&first), ".sbc");
    let second = run(&["dump"], again.path());
    assert_eq!(stdout(&first), stdout(&second));
    assert!(stdout(&first).contains(".func 1 main arity=0 locals=1\n"));
}

#[test]
fn dump_json_uses_mnemonics() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["dump", "--json"], file.path());
    let value: serde_json::Value = serde_json::from_slice(&out.stdout).expect("valid json");
    assert_eq!(value["consts"], serde_json::json!([3, 5]));
    assert_eq!(value["funcs"][1]["code"][4]["op"], "CALL");
}

// --- asm / jit ---

#[test]
fn asm_darwin_to_file() {
    let file = module_file(ADD, ".sbc");
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("add.s");
    let out = seed()
        .args(["asm", "--target", "aarch64-apple-darwin", "-o"])
        .arg(&target)
        .arg(file.path())
        .output()
        .expect("failed to run seed");
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let asm = std::fs::read_to_string(target).expect("asm written");
    assert!(asm.contains("bl _add"));
}

#[test]
fn asm_linux_to_stdout() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["asm", "--target", "aarch64-unknown-linux-gnu"], file.path());
    assert!(out.status.success());
    assert!(stdout(&out).contains("  bl add\n"));
}

#[test]
fn asm_refuses_x86() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["asm", "--target", "x86_64-unknown-linux-gnu"], file.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("unsupported target 'x86_64-unknown-linux-gnu'"));
}

#[test]
fn asm_refuses_other_programs() {
    let file = module_file(BAD_CALL, ".sbc");
    let out = run(&["asm", "--target", "aarch64-apple-darwin"], file.path());
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("add function not found"));
}

#[cfg(feature = "cranelift")]
#[test]
fn jit_prints_sum() {
    let file = module_file(ADD, ".sbc");
    let out = run(&["jit"], file.path());
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "8\n");
}

#[test]
fn usage_error_exits_two() {
    let out = seed().arg("launch").output().expect("failed to run seed");
    assert_eq!(out.status.code(), Some(2));
}
