use logos::Logos;

#[derive(Default)]
pub struct LexerExtras {
    pub error_message: Option<String>,
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"#[^\n]*")]
#[logos(extras = LexerExtras)]
pub enum RawToken {
    // Keywords
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("def")]
    Def,
    #[token("lamb")]
    Lamb,
    #[token("class")]
    Class,
    #[token("extends")]
    Extends,
    #[token("new")]
    New,
    #[token("return")]
    Return,
    #[token("using")]
    Using,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    // Identifiers and literals
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),
    #[token("none")]
    None,
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", lex_float)]
    Float(f64),
    #[regex(r"[0-9]+", lex_integer)]
    Int(i64),
    #[regex(r#""([^"\\\n]|\\.)*""#, lex_string)]
    String(String),
    #[regex(r"\$?[A-Za-z_][A-Za-z0-9_]*", lex_identifier)]
    Identifier(String),

    // Operators and punctuation
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEqual,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEqual,
    #[token("=")]
    Equal,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,

    #[token("\n")]
    Newline,
}

fn lex_integer(lexer: &mut logos::Lexer<RawToken>) -> Option<i64> {
    let slice = lexer.slice();
    match slice.parse::<i64>() {
        Ok(i) => Some(i),
        Err(_) => {
            lexer.extras.error_message =
                Some(format!("integer literal '{}' out of range", slice));
            None
        }
    }
}

fn lex_float(lexer: &mut logos::Lexer<RawToken>) -> Option<f64> {
    let slice = lexer.slice();
    match slice.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(f),
        _ => {
            lexer.extras.error_message =
                Some(format!("float literal '{}' out of range", slice));
            None
        }
    }
}

fn lex_string(lexer: &mut logos::Lexer<RawToken>) -> Option<String> {
    let slice = lexer.slice();
    // strip the surrounding quotes, then process escapes
    let inner = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                lexer.extras.error_message =
                    Some(format!("unknown escape sequence '\\{}'", other));
                return None;
            }
            None => return None,
        }
    }
    Some(out)
}

fn lex_identifier(lexer: &mut logos::Lexer<RawToken>) -> Option<String> {
    Some(lexer.slice().to_string())
}
