//! Textual (`.sbc`) and JSON module loading.
//!
//! ```text
//! .consts 2
//!   0: 3
//!   1: 5
//! .funcs 1
//! .func 0 main arity=0 locals=1
//!    0  CONST 0
//!    1  PRINT
//!    2  RET
//! .end
//! ```

use std::io;
use std::path::{Path, PathBuf};

use crate::bytecode::{Function, Instr, Module, Op};
use crate::lexer::{self, Token};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid JSON module: {0}")]
    Json(#[from] serde_json::Error),
}

fn syntax(line: usize, message: impl Into<String>) -> LoadError {
    LoadError::Syntax { line, message: message.into() }
}

/// Read a module from disk: `*.json` through serde, anything else as text.
pub fn load(path: impl AsRef<Path>) -> Result<Module, LoadError> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    let module = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&source)?
    } else {
        parse(&source)?
    };
    tracing::debug!(
        path = %path.display(),
        consts = module.consts.len(),
        funcs = module.funcs.len(),
        "module loaded"
    );
    Ok(module)
}

enum Section {
    Preamble,
    Consts,
    Funcs,
}

struct OpenFunc {
    header_line: usize,
    func: Function,
}

/// Parse the textual module form.
pub fn parse(source: &str) -> Result<Module, LoadError> {
    let mut module = Module::default();
    let mut section = Section::Preamble;
    let mut open: Option<OpenFunc> = None;

    for (i, raw) in source.lines().enumerate() {
        let line = i + 1;
        let text = raw.split_once(';').map_or(raw, |(code, _)| code);

        // Function names are taken verbatim, so the header skips the lexer.
        if text.split_whitespace().next() == Some(".func") {
            if let Some(f) = &open {
                return Err(unterminated(f));
            }
            if !matches!(section, Section::Funcs) {
                return Err(syntax(line, ".func outside the .funcs section"));
            }
            open = Some(OpenFunc { header_line: line, func: function_header(line, text)? });
            continue;
        }

        let toks: Vec<Token> = lexer::lex(text)
            .map_err(|e| syntax(line, format!("unexpected input '{}'", e.snippet)))?
            .into_iter()
            .map(|(tok, _)| tok)
            .collect();
        match toks.as_slice() {
            [] => {}
            [Token::Consts, Token::Int(_)] => {
                if let Some(f) = &open {
                    return Err(unterminated(f));
                }
                section = Section::Consts;
            }
            [Token::Funcs, Token::Int(_)] => {
                if let Some(f) = &open {
                    return Err(unterminated(f));
                }
                section = Section::Funcs;
            }
            [Token::Consts | Token::Funcs, ..] => {
                return Err(syntax(line, "malformed section header, expected a count"));
            }
            [Token::End] => {
                let f = open.take().ok_or_else(|| syntax(line, ".end without an open .func"))?;
                module.funcs.push(f.func);
            }
            [Token::End, ..] => return Err(syntax(line, "unexpected tokens after .end")),
            [Token::Int(_), Token::Colon, value] if matches!(section, Section::Consts) => {
                module.consts.push(constant(line, value)?);
            }
            [Token::Int(_), Token::Colon, ..] => {
                return Err(syntax(line, "constant entry outside .consts or without a value"));
            }
            [Token::Int(_), Token::Ident(mnemonic), operands @ ..] | [Token::Ident(mnemonic), operands @ ..] => {
                let f = open
                    .as_mut()
                    .ok_or_else(|| syntax(line, format!("instruction '{mnemonic}' outside .func")))?;
                f.func.code.push(instruction(line, mnemonic, operands)?);
            }
            _ => return Err(syntax(line, "unrecognized line")),
        }
    }

    if let Some(f) = &open {
        return Err(unterminated(f));
    }
    Ok(module)
}

fn unterminated(f: &OpenFunc) -> LoadError {
    syntax(f.header_line, format!("unterminated .func '{}'", f.func.name))
}

/// `.func <idx> <name> arity=<n> locals=<n>`, split on whitespace. The name
/// is any run of non-space characters.
fn function_header(line: usize, text: &str) -> Result<Function, LoadError> {
    let malformed = || syntax(line, "malformed .func header, expected '.func <idx> <name> arity=<n> locals=<n>'");
    let words: Vec<&str> = text.split_whitespace().collect();
    let [_, idx, name, arity_kv, locals_kv] = words[..] else {
        return Err(malformed());
    };
    idx.parse::<i64>().map_err(|_| malformed())?;
    let (Some(arity), Some(nlocals)) = (arity_kv.strip_prefix("arity="), locals_kv.strip_prefix("locals=")) else {
        return Err(syntax(
            line,
            format!("malformed .func header: expected arity= and locals=, got '{arity_kv}' and '{locals_kv}'"),
        ));
    };
    let count = |key: &str, v: &str| -> Result<usize, LoadError> {
        let n: i64 = v.parse().map_err(|_| syntax(line, format!("{key} must be an integer, got '{v}'")))?;
        usize::try_from(n).map_err(|_| syntax(line, format!("{key} must be non-negative, got {n}")))
    };
    Ok(Function::new(name, count("arity", arity)?, count("locals", nlocals)?, Vec::new()))
}

fn constant(line: usize, value: &Token) -> Result<i64, LoadError> {
    match value {
        Token::Int(n) => Ok(*n),
        Token::True => Ok(1),
        Token::False | Token::Nil => Ok(0),
        other => Err(syntax(line, format!("bad constant value {other:?}"))),
    }
}

fn instruction(line: usize, mnemonic: &str, operands: &[Token]) -> Result<Instr, LoadError> {
    let op = Op::from_mnemonic(mnemonic).ok_or_else(|| syntax(line, format!("unknown mnemonic '{mnemonic}'")))?;
    let want = op.operand_count();
    if operands.len() != want {
        return Err(syntax(line, format!("{op} takes {want} operand(s), found {}", operands.len())));
    }
    let mut values = [0i32; 2];
    for (slot, tok) in values.iter_mut().zip(operands) {
        let Token::Int(n) = tok else {
            return Err(syntax(line, format!("{op} operand must be an integer, found {tok:?}")));
        };
        *slot = i32::try_from(*n).map_err(|_| syntax(line, format!("{op} operand {n} out of range")))?;
    }
    Ok(Instr::with_ab(op, values[0], values[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ADD: &str = "\
; add two constants
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
   4  CALL 0 2   ; add(a, 5)
   5  PRINT
   6  RET
.end
";

    fn expected_add() -> Module {
        Module::new(vec![3, 5], vec![
            Function::new("add", 2, 2, vec![
                Instr::with_a(Op::Load, 0),
                Instr::with_a(Op::Load, 1),
                Instr::new(Op::Add),
                Instr::new(Op::Ret),
            ]),
            Function::new("main", 0, 1, vec![
                Instr::with_a(Op::Const, 0),
                Instr::with_a(Op::Store, 0),
                Instr::with_a(Op::Load, 0),
                Instr::with_a(Op::Const, 1),
                Instr::with_ab(Op::Call, 0, 2),
                Instr::new(Op::Print),
                Instr::new(Op::Ret),
            ]),
        ])
    }

    fn syntax_line(err: LoadError) -> (usize, String) {
        match err {
            LoadError::Syntax { line, message } => (line, message),
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn parses_add_program() {
        assert_eq!(parse(ADD).unwrap(), expected_add());
    }

    #[test]
    fn display_output_reparses() {
        let mut m = expected_add();
        m.consts.push(-12);
        m.funcs[1].code.insert(0, Instr::with_a(Op::Jmp, 0));
        m.funcs[1].code.insert(0, Instr::with_a(Op::JmpIfFalse, -1));
        assert_eq!(parse(&m.to_string()).unwrap(), m);
    }

    #[test]
    fn function_names_reparse_verbatim() {
        for name in ["main", "nil", "true", "false", "null", "2nd", "my-fn", "a.b:c=d"] {
            let m = Module::new(vec![], vec![Function::new(name, 1, 2, vec![Instr::new(Op::Ret)])]);
            assert_eq!(parse(&m.to_string()).unwrap(), m, "name {name:?}");
        }
    }

    #[test]
    fn header_comment_is_not_part_of_the_name() {
        let m = parse(".funcs 1\n.func 0 f arity=0 locals=0 ; entry\nRET\n.end\n").unwrap();
        assert_eq!(m.funcs[0].name, "f");
    }

    #[test]
    fn literal_constants() {
        let m = parse(".consts 4\n 0: true\n 1: false\n 2: nil\n 3: null\n.funcs 0\n").unwrap();
        assert_eq!(m.consts, vec![1, 0, 0, 0]);
        assert!(m.funcs.is_empty());
    }

    #[test]
    fn counts_need_not_match() {
        let m = parse(".consts 9\n0: 1\n.funcs 7\n.func 3 f arity=0 locals=0\nRET\n.end\n").unwrap();
        assert_eq!(m.consts, vec![1]);
        assert_eq!(m.funcs.len(), 1);
        assert_eq!(m.funcs[0].code, vec![Instr::new(Op::Ret)]);
    }

    #[test]
    fn unknown_mnemonic() {
        let (line, msg) = syntax_line(parse(".funcs 1\n.func 0 f arity=0 locals=0\n 0 HALT\n.end\n").unwrap_err());
        assert_eq!(line, 3);
        assert_eq!(msg, "unknown mnemonic 'HALT'");
    }

    #[test]
    fn operand_counts_are_exact() {
        let src = |body: &str| format!(".funcs 1\n.func 0 f arity=0 locals=1\n{body}\n.end\n");
        assert_eq!(syntax_line(parse(&src("0 LOAD")).unwrap_err()).1, "LOAD takes 1 operand(s), found 0");
        assert_eq!(syntax_line(parse(&src("0 RET 1")).unwrap_err()).1, "RET takes 0 operand(s), found 1");
        assert_eq!(syntax_line(parse(&src("0 CALL 1")).unwrap_err()).1, "CALL takes 2 operand(s), found 1");
        assert!(parse(&src("0 CALL 0 0")).is_ok());
    }

    #[test]
    fn operand_out_of_i32_range() {
        let err = parse(".funcs 1\n.func 0 f arity=0 locals=0\n0 JMP 3000000000\n.end\n").unwrap_err();
        assert_eq!(syntax_line(err).0, 3);
    }

    #[test]
    fn instruction_outside_func() {
        let (line, msg) = syntax_line(parse(".funcs 0\n 0 RET\n").unwrap_err());
        assert_eq!(line, 2);
        assert_eq!(msg, "instruction 'RET' outside .func");
    }

    #[test]
    fn unterminated_func_points_at_header() {
        let (line, msg) = syntax_line(parse(".funcs 1\n\n.func 0 main arity=0 locals=0\n 0 RET\n").unwrap_err());
        assert_eq!(line, 3);
        assert_eq!(msg, "unterminated .func 'main'");

        let nested = ".funcs 2\n.func 0 a arity=0 locals=0\n.func 1 b arity=0 locals=0\n.end\n";
        assert_eq!(syntax_line(parse(nested).unwrap_err()).0, 2);
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(syntax_line(parse(".consts\n").unwrap_err()).0, 1);
        assert_eq!(syntax_line(parse(".funcs 1\n.func 0 f arity=0\n.end\n").unwrap_err()).0, 2);
        assert_eq!(syntax_line(parse(".funcs 1\n.func 0 f locals=0 arity=0\n.end\n").unwrap_err()).0, 2);
        assert_eq!(syntax_line(parse(".funcs 1\n.func 0 f arity=-1 locals=0\n.end\n").unwrap_err()).0, 2);
        assert_eq!(syntax_line(parse(".end\n").unwrap_err()).1, ".end without an open .func");
    }

    #[test]
    fn bad_token_reports_line() {
        let (line, msg) = syntax_line(parse(".consts 1\n  0: $\n").unwrap_err());
        assert_eq!((line, msg.as_str()), (2, "unexpected input '$'"));
    }

    #[test]
    fn load_text_and_json_files() {
        let mut text = tempfile::Builder::new().suffix(".sbc").tempfile().unwrap();
        text.write_all(ADD.as_bytes()).unwrap();
        assert_eq!(load(text.path()).unwrap(), expected_add());

        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json.write_all(serde_json::to_string(&expected_add()).unwrap().as_bytes()).unwrap();
        assert_eq!(load(json.path()).unwrap(), expected_add());
    }

    #[test]
    fn json_rejects_unknown_opcode() {
        let mut json = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        json.write_all(br#"{"consts":[],"funcs":[{"name":"f","arity":0,"nlocals":0,"code":[{"op":"HALT"}]}]}"#)
            .unwrap();
        assert!(matches!(load(json.path()), Err(LoadError::Json(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(dir.path().join("absent.sbc")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().starts_with("cannot read "));
    }
}
