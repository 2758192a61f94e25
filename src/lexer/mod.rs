use logos::Logos;

#[derive(Logos, Debug, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r]+")]
pub enum Token {
    // Section directives
    #[token(".consts")]
    Consts,
    #[token(".funcs")]
    Funcs,
    #[token(".func")]
    Func,
    #[token(".end")]
    End,

    // Constant literals besides integers
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    #[token("null")]
    Nil,

    #[token(":")]
    Colon,
    #[token("=")]
    Eq,

    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),
    // Mnemonics
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // `;` to end of line
    #[regex(r";[^\n]*", logos::skip, allow_greedy = true)]
    Comment,

    // Lines are significant: one directive, constant or instruction each
    #[token("\n")]
    Newline,
}

pub type Spanned = (Token, std::ops::Range<usize>);

/// Lex a textual module into tokens with byte spans.
pub fn lex(source: &str) -> Result<Vec<Spanned>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push((token, lexer.span())),
            Err(()) => {
                let span = lexer.span();
                return Err(LexError {
                    line: line_of(source, span.start),
                    snippet: source[span].to_string(),
                });
            }
        }
    }
    Ok(tokens)
}

/// 1-based line number of byte offset `pos`.
pub fn line_of(source: &str, pos: usize) -> usize {
    source.as_bytes()[..pos.min(source.len())].iter().filter(|&&b| b == b'\n').count() + 1
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: unexpected input '{snippet}'")]
pub struct LexError {
    pub line: usize,
    pub snippet: String,
}
