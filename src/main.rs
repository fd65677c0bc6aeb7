use finch as lib;
use lib::interpreter::ProgramError;
use lib::runtime_io::StdIo;
use std::env;
use std::path::Path;
use std::process::exit;

fn main() {
    // Usage:
    //   finch run program.fin   (or just: finch program.fin)
    //   finch disasm program.fin
    //   finch repl
    let mut args = env::args().skip(1).collect::<Vec<String>>();
    let mut subcmd = "run".to_string();
    if !args.is_empty() && ["run", "disasm", "repl"].contains(&args[0].as_str()) {
        subcmd = args.remove(0);
    }

    match subcmd.as_str() {
        "repl" => {
            lib::repl::run();
            return;
        }
        _ => {}
    }

    let Some(path) = args.first() else {
        eprintln!("usage: finch [run|disasm|repl] <program.fin>");
        exit(2);
    };
    let path = Path::new(path);

    match subcmd.as_str() {
        "run" => {
            let mut interp = lib::Interpreter::new();
            let mut io = StdIo;
            if let Err(e) = interp.run_file(path, &mut io) {
                match e {
                    ProgramError::Preprocess(pp) => match pp {
                        lib::preprocessor::PreprocessError::Parse {
                            path,
                            source,
                            diagnostics,
                        } => {
                            let path = path.display().to_string();
                            for diag in diagnostics {
                                eprint!("{}", diag.format(&path, &source, "Parsing failed", 3));
                            }
                        }
                        other => eprintln!("{}", other),
                    },
                    ProgramError::Eval {
                        path,
                        source,
                        error,
                    } => {
                        eprint!("{}", lib::format_eval_error(&error, &path, &source));
                    }
                }
                exit(1);
            }
        }
        "disasm" => {
            let source = match std::fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("cannot read '{}': {}", path.display(), e);
                    exit(1);
                }
            };
            let path_str = path.display().to_string();
            let program = match lib::parse_source(&source) {
                Ok(p) => p,
                Err(diagnostics) => {
                    for diag in diagnostics {
                        eprint!("{}", diag.format(&path_str, &source, "Parsing failed", 3));
                    }
                    exit(1);
                }
            };
            let mut interp = lib::Interpreter::new();
            let env = interp.unit_env();
            match interp.compile_unit(&program, &env) {
                Ok(codes) => {
                    for (name, code) in codes {
                        print!(
                            "{}",
                            lib::vm::disasm::disassemble_to_string(&name, &code, &interp.ctx)
                        );
                        println!();
                    }
                }
                Err(e) => {
                    eprint!("{}", lib::format_eval_error(&e, &path_str, &source));
                    exit(1);
                }
            }
        }
        _ => unreachable!(),
    }
}
