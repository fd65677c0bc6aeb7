//! Finch REPL
//!
//! 전역 상태를 세션 동안 유지하는 대화형 실행 환경. 괄호/중괄호가
//! 닫히지 않은 입력은 다음 줄로 이어진다.

use crate::interpreter::Interpreter;
use crate::runtime::value::Value;
use crate::runtime_io::StdIo;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;

pub struct ReplState {
    interp: Interpreter,
}

impl Default for ReplState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplState {
    pub fn new() -> Self {
        Self {
            interp: Interpreter::new(),
        }
    }

    /// Evaluate one (possibly multi-line) input. Returns the value of a
    /// trailing expression, if any.
    pub fn eval_line(&mut self, input: &str) -> Result<Option<Value>, String> {
        if input.trim().is_empty() {
            return Ok(None);
        }

        let program = match crate::parse_source(input) {
            Ok(p) => p,
            Err(diagnostics) => {
                let mut message = String::new();
                for diag in diagnostics {
                    message.push_str(&diag.format("<repl>", input, "Parsing failed", 3));
                }
                return Err(message);
            }
        };

        let env = self.interp.unit_env();
        let mut io = StdIo;
        self.interp
            .resolve_and_compile(&program, &env, &mut io)
            .map_err(|e| crate::format_eval_error(&e, "<repl>", input))
    }
}

/// Count unclosed delimiters to decide whether to keep reading lines.
fn open_delimiters(input: &str) -> i32 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '#' => break,
            '{' | '(' | '[' => depth += 1,
            '}' | ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".finch_history"))
}

pub fn run() {
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("failed to start line editor: {}", e);
            return;
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    let mut state = ReplState::new();
    println!("finch repl (ctrl-d to exit)");

    loop {
        let mut input = match editor.readline(">>> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        };

        while open_delimiters(&input) > 0 {
            match editor.readline("... ") {
                Ok(line) => {
                    input.push('\n');
                    input.push_str(&line);
                }
                Err(_) => break,
            }
        }

        let _ = editor.add_history_entry(input.as_str());
        match state.eval_line(&input) {
            Ok(Some(value)) => println!("{}", value),
            Ok(None) => {}
            Err(message) => eprint!("{}", message),
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_line_keeps_state() {
        let mut repl = ReplState::new();
        assert_eq!(repl.eval_line("x = 10").unwrap(), None);
        assert_eq!(repl.eval_line("x + 5").unwrap(), Some(Value::Int(15)));
    }

    #[test]
    fn test_eval_line_defines_functions() {
        let mut repl = ReplState::new();
        repl.eval_line("def inc(n) { return n + 1 }").unwrap();
        assert_eq!(repl.eval_line("inc(41)").unwrap(), Some(Value::Int(42)));
    }

    #[test]
    fn test_eval_line_reports_errors() {
        let mut repl = ReplState::new();
        assert!(repl.eval_line("1 +").is_err());
        assert!(repl.eval_line("missing").is_err());
    }

    #[test]
    fn test_open_delimiters_counting() {
        assert_eq!(open_delimiters("def f() {"), 1);
        assert_eq!(open_delimiters("def f() { }"), 0);
        assert_eq!(open_delimiters("x = \"{\""), 0);
        assert_eq!(open_delimiters("a = [1, 2"), 1);
        assert_eq!(open_delimiters("# {"), 0);
    }
}
