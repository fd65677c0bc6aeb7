mod raw_token;
pub mod token;

use logos::{Lexer as LogosLexer, Logos};
use raw_token::RawToken;
use std::ops::Range;
pub(crate) use token::Token;

pub struct Lexer<'source> {
    inner: LogosLexer<'source, RawToken>,
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str) -> Self {
        Lexer {
            inner: RawToken::lexer(source),
        }
    }

    pub fn next_token(&mut self) -> Token {
        let (tok, _) = self.next_token_with_span();
        tok
    }

    pub fn next_token_with_span(&mut self) -> (Token, Range<usize>) {
        match self.inner.next() {
            Some(Ok(raw_token)) => {
                let span = self.inner.span();
                (Self::convert_token(raw_token), span)
            }
            Some(Err(_)) => {
                let span = self.inner.span();
                let error_msg = self
                    .inner
                    .extras
                    .error_message
                    .take()
                    .unwrap_or_else(|| format!("invalid token '{}'", self.inner.slice()));
                (Token::Error(error_msg, span.clone()), span)
            }
            None => {
                let pos = self.inner.span().end;
                (Token::Eof, pos..pos)
            }
        }
    }

    fn convert_token(raw: RawToken) -> Token {
        match raw {
            RawToken::If => Token::If,
            RawToken::Elif => Token::Elif,
            RawToken::Else => Token::Else,
            RawToken::While => Token::While,
            RawToken::Def => Token::Def,
            RawToken::Lamb => Token::Lamb,
            RawToken::Class => Token::Class,
            RawToken::Extends => Token::Extends,
            RawToken::New => Token::New,
            RawToken::Return => Token::Return,
            RawToken::Using => Token::Using,
            RawToken::And => Token::And,
            RawToken::Or => Token::Or,
            RawToken::Not => Token::Not,

            RawToken::None => Token::None,
            RawToken::Bool(b) => Token::Bool(b),
            RawToken::Int(i) => Token::Int(i),
            RawToken::Float(f) => Token::Float(f),
            RawToken::String(s) => Token::String(s),
            RawToken::Identifier(name) => Token::Identifier(name),

            RawToken::Plus => Token::Plus,
            RawToken::Minus => Token::Minus,
            RawToken::Star => Token::Star,
            RawToken::Slash => Token::Slash,
            RawToken::Percent => Token::Percent,
            RawToken::EqualEqual => Token::EqualEqual,
            RawToken::NotEqual => Token::NotEqual,
            RawToken::Less => Token::Less,
            RawToken::LessEqual => Token::LessEqual,
            RawToken::Greater => Token::Greater,
            RawToken::GreaterEqual => Token::GreaterEqual,
            RawToken::Equal => Token::Equal,
            RawToken::LParen => Token::LParen,
            RawToken::RParen => Token::RParen,
            RawToken::LBracket => Token::LBracket,
            RawToken::RBracket => Token::RBracket,
            RawToken::LBrace => Token::LBrace,
            RawToken::RBrace => Token::RBrace,
            RawToken::Comma => Token::Comma,
            RawToken::Semicolon => Token::Semicolon,
            RawToken::Dot => Token::Dot,

            RawToken::Newline => Token::Newline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens_of(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next_token();
            if tok == Token::Eof {
                break;
            }
            out.push(tok);
        }
        out
    }

    #[test]
    fn test_factorial() {
        let source = "\
def fact(n) {
  if n < 2 { return 1 }
  return n * fact(n - 1)
}
";
        let expected = vec![
            Token::Def,
            Token::Identifier("fact".to_string()),
            Token::LParen,
            Token::Identifier("n".to_string()),
            Token::RParen,
            Token::LBrace,
            Token::Newline,
            Token::If,
            Token::Identifier("n".to_string()),
            Token::Less,
            Token::Int(2),
            Token::LBrace,
            Token::Return,
            Token::Int(1),
            Token::RBrace,
            Token::Newline,
            Token::Return,
            Token::Identifier("n".to_string()),
            Token::Star,
            Token::Identifier("fact".to_string()),
            Token::LParen,
            Token::Identifier("n".to_string()),
            Token::Minus,
            Token::Int(1),
            Token::RParen,
            Token::Newline,
            Token::RBrace,
            Token::Newline,
        ];
        assert_eq!(tokens_of(source), expected);
    }

    #[test]
    fn test_global_sigil_identifier() {
        let tokens = tokens_of("$count = 1");
        assert_eq!(tokens[0], Token::Identifier("$count".to_string()));
        assert_eq!(tokens[1], Token::Equal);
        assert_eq!(tokens[2], Token::Int(1));
    }

    #[test]
    fn test_float_and_int_literals() {
        let tokens = tokens_of("1 2.5 3.0e2");
        assert_eq!(tokens[0], Token::Int(1));
        assert_eq!(tokens[1], Token::Float(2.5));
        assert_eq!(tokens[2], Token::Float(300.0));
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokens_of(r#""a\nb\"c""#);
        assert_eq!(tokens[0], Token::String("a\nb\"c".to_string()));
    }

    #[test]
    fn test_integer_overflow() {
        let mut lexer = Lexer::new("99999999999999999999");
        match lexer.next_token() {
            Token::Error(msg, _) => {
                assert!(msg.contains("out of range"), "unexpected message: {}", msg);
            }
            other => panic!("expected error token, got {:?}", other),
        }
    }

    #[test]
    fn test_comment_skipped() {
        let tokens = tokens_of("1 # comment here\n2");
        assert_eq!(
            tokens,
            vec![Token::Int(1), Token::Newline, Token::Int(2)]
        );
    }

    #[test]
    fn test_keywords_not_identifiers() {
        let tokens = tokens_of("lamb new extends");
        assert_eq!(tokens, vec![Token::Lamb, Token::New, Token::Extends]);
    }
}
