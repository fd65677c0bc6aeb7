pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod repl;
pub mod resolver;
pub mod runtime;
pub mod runtime_io;
pub mod types;
pub mod vm;

use ariadne::{Color, Label, Report, ReportKind, Source};
use chumsky::Parser;
use chumsky::input::{Input, Stream};
use chumsky::span::SimpleSpan;

pub use interpreter::{EvalError, Interpreter};
pub use runtime::value::Value;
pub use vm::Vm;

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub span: std::ops::Range<usize>,
}

impl Diagnostic {
    pub fn format(&self, path: &str, src: &str, kind: &str, code: usize) -> String {
        let mut buffer = Vec::new();
        Report::build(ReportKind::Error, (path, self.span.clone()))
            .with_config(ariadne::Config::new().with_index_type(ariadne::IndexType::Byte))
            .with_code(code)
            .with_message(kind)
            .with_label(
                Label::new((path, self.span.clone()))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((path, Source::from(src)), &mut buffer)
            .ok();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

pub fn parse_source(src: &str) -> Result<Vec<parser::ast::StmtS>, Vec<Diagnostic>> {
    let mut lexer = lexer::Lexer::new(src);
    let mut reached_eof = false;
    let token_iter = std::iter::from_fn(move || {
        if reached_eof {
            return None;
        }
        let (t, span) = lexer.next_token_with_span();
        if t == lexer::token::Token::Eof {
            reached_eof = true;
            return None;
        }
        Some((t, SimpleSpan::new(span.start, span.end)))
    });
    let eoi_span = SimpleSpan::new(src.len(), src.len());
    let token_stream = Stream::from_iter(token_iter).map(eoi_span, |(t, s)| (t, s));
    match parser::program_parser().parse(token_stream).into_result() {
        Ok(program) => Ok(program),
        Err(errors) => {
            let mut errors = errors;
            errors.sort_by(|x1, x2| {
                let x1 = (x1.span().start, x1.span().end);
                let x2 = (x2.span().start, x2.span().end);
                x1.cmp(&x2)
            });
            let diagnostics = errors
                .into_iter()
                .map(|e| Diagnostic {
                    message: e.reason().to_string(),
                    span: e.span().into_range(),
                })
                .collect();
            Err(diagnostics)
        }
    }
}

/// Render an evaluation error against its source unit. Spanned errors
/// (resolve/compile) become ariadne reports; runtime errors have no
/// span and print as a single line.
pub fn format_eval_error(error: &EvalError, path: &str, src: &str) -> String {
    match error.span() {
        Some(span) => {
            let diag = Diagnostic {
                message: error.to_string(),
                span,
            };
            let kind = match error {
                EvalError::Resolve(_) => "Resolution failed",
                EvalError::Compile(_) => "Compilation failed",
                EvalError::Runtime(_) => unreachable!("runtime errors carry no span"),
            };
            diag.format(path, src, kind, 1)
        }
        None => format!("{}\n", error),
    }
}
