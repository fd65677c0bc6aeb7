//! 유닛 로딩과 프로그램 실행
//!
//! 전처리기가 의존성 순서로 넘겨준 유닛들을 차례로 적재한다. 유닛
//! 하나의 적재는 해석 패스 → 유닛 레벨 정의 평가(함수는 즉시 컴파일,
//! 클래스는 컴파일된 멤버 환경 구축) → 남은 최상위 문장을 스크립트
//! 함수로 컴파일해 실행, 순서로 진행된다. 모든 유닛이 적재된 뒤 진입
//! 유닛의 `main`이 있으면 호출한다 (없어도 오류가 아니다).

use crate::parser::ast::{ClassDecl, FuncDecl, Stmt, StmtS};
use crate::preprocessor::{self, PreprocessError};
use crate::resolver::{self, ResolveError};
use crate::runtime::env::{self, Env, EnvRef};
use crate::runtime::native;
use crate::runtime::value::{ClassInfo, FuncObject, Value};
use crate::runtime_io::RuntimeIo;
use crate::types::Span;
use crate::vm::Vm;
use crate::vm::bytecode::{Code, CompileCtx};
use crate::vm::compiler::{self, CompileError};
use crate::vm::machine::{VmError, VmErrorKind, err};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

#[derive(Debug)]
pub enum EvalError {
    Resolve(ResolveError),
    Compile(CompileError),
    Runtime(VmError),
}

impl From<ResolveError> for EvalError {
    fn from(e: ResolveError) -> Self {
        EvalError::Resolve(e)
    }
}

impl From<CompileError> for EvalError {
    fn from(e: CompileError) -> Self {
        EvalError::Compile(e)
    }
}

impl From<VmError> for EvalError {
    fn from(e: VmError) -> Self {
        EvalError::Runtime(e)
    }
}

impl EvalError {
    /// Byte span for diagnostics, when the error carries one.
    pub fn span(&self) -> Option<Span> {
        match self {
            EvalError::Resolve(e) => Some(e.span.clone()),
            EvalError::Compile(e) => Some(e.span.clone()),
            EvalError::Runtime(_) => None,
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Resolve(e) => write!(f, "resolve error: {}", e.message),
            EvalError::Compile(e) => write!(f, "compile error: {}", e.message),
            EvalError::Runtime(e) => write!(f, "runtime error: {:?}: {}", e.kind, e.message),
        }
    }
}

pub struct Interpreter {
    pub ctx: CompileCtx,
    global_env: EnvRef,
    /// Environment for directly evaluated sources (REPL, tests).
    unit_env: EnvRef,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let global_env = Env::named(None);
        native::install(&global_env);
        let unit_env = Env::named(Some(global_env.clone()));
        Self {
            ctx: CompileCtx::new(),
            global_env,
            unit_env,
        }
    }

    pub fn global_env(&self) -> EnvRef {
        self.global_env.clone()
    }

    pub fn unit_env(&self) -> EnvRef {
        self.unit_env.clone()
    }

    /// Load one unit into `unit_env`: run the symbol pass, evaluate
    /// unit-level definitions into the environment, then compile and
    /// run the remaining top-level statements. A trailing expression
    /// statement's value is returned.
    pub fn resolve_and_compile(
        &mut self,
        stmts: &[StmtS],
        unit_env: &EnvRef,
        io: &mut dyn RuntimeIo,
    ) -> Result<Option<Value>, EvalError> {
        let preset = native::names();
        resolver::resolve_unit(stmts, &mut self.ctx, &preset)?;

        for (stmt, span) in stmts {
            match stmt {
                Stmt::Def(decl) => {
                    let func = self.define_function(decl, unit_env)?;
                    env::put(unit_env, &func.name.clone(), Value::Function(func));
                }
                Stmt::Class(decl) => {
                    let info = self.define_class(decl, unit_env, span)?;
                    env::put(unit_env, &decl.name, Value::Class(info));
                }
                _ => {}
            }
        }

        let script = compiler::compile_script(stmts, &mut self.ctx, true)?;
        let value = self.run_code(script, unit_env, io)?;
        Ok(value)
    }

    /// Unit-level `def`: the function compiles eagerly, unlike `lamb`
    /// closures which wait for their first call.
    fn define_function(
        &mut self,
        decl: &Rc<FuncDecl>,
        unit_env: &EnvRef,
    ) -> Result<Rc<FuncObject>, EvalError> {
        let name = decl.name.clone().expect("unit-level def carries a name");
        let func = Rc::new(FuncObject::new(name, decl.clone(), unit_env.clone()));
        func.ensure_compiled(&mut self.ctx)?;
        Ok(func)
    }

    /// Class definition: resolve the superclass in the defining
    /// environment, then build the compiled member environment by
    /// evaluating the body's defs. Each method compiles here, once.
    fn define_class(
        &mut self,
        decl: &Rc<ClassDecl>,
        unit_env: &EnvRef,
        span: &Span,
    ) -> Result<Rc<ClassInfo>, EvalError> {
        let superclass = match &decl.superclass {
            Some(name) => match env::get(unit_env, name) {
                Some(Value::Class(c)) => Some(c),
                Some(other) => {
                    return Err(EvalError::Compile(CompileError {
                        message: format!(
                            "superclass '{}' is {}, not a class",
                            name,
                            other.type_name()
                        ),
                        span: span.clone(),
                    }));
                }
                None => {
                    return Err(EvalError::Compile(CompileError {
                        message: format!("unknown superclass '{}'", name),
                        span: span.clone(),
                    }));
                }
            },
            None => None,
        };

        let members = Env::named(Some(unit_env.clone()));
        for (method, _) in &decl.methods {
            let name = method.name.clone().expect("method carries a name");
            let func = Rc::new(FuncObject::new(
                name.clone(),
                method.clone(),
                members.clone(),
            ));
            func.ensure_compiled(&mut self.ctx)?;
            members.borrow_mut().insert(name, Value::Function(func));
        }

        Ok(Rc::new(ClassInfo {
            name: decl.name.clone(),
            decl: decl.clone(),
            superclass,
            members,
        }))
    }

    fn run_code(
        &mut self,
        code: Code,
        unit_env: &EnvRef,
        io: &mut dyn RuntimeIo,
    ) -> Result<Option<Value>, EvalError> {
        let script_decl = Rc::new(FuncDecl::new(None, Vec::new(), Vec::new()));
        let script = Rc::new(FuncObject::with_code(
            "<unit>",
            script_decl,
            unit_env.clone(),
            Rc::new(code),
        ));
        let mut vm = Vm::new();
        Ok(vm.run_with_io(&script, &mut self.ctx, io)?)
    }

    /// Run a whole program: preprocess `using` dependencies, load every
    /// unit leaves-first, then invoke `main` from the entry unit if it
    /// exists.
    pub fn run_file(
        &mut self,
        path: &Path,
        io: &mut dyn RuntimeIo,
    ) -> Result<(), ProgramError> {
        let units = preprocessor::collect_units(path).map_err(ProgramError::Preprocess)?;
        let mut entry_env = None;
        for unit in &units {
            let unit_env = Env::named(Some(self.global_env.clone()));
            self.resolve_and_compile(&unit.stmts, &unit_env, io)
                .map_err(|e| ProgramError::Eval {
                    path: unit.path.display().to_string(),
                    source: unit.source.clone(),
                    error: e,
                })?;
            entry_env = Some(unit_env);
        }

        // the entry unit is loaded last
        if let Some(entry_env) = entry_env {
            if let Some(Value::Function(main)) = env::get(&entry_env, "main") {
                let mut vm = Vm::new();
                vm.run_with_io(&main, &mut self.ctx, io)
                    .map_err(|e| ProgramError::Eval {
                        path: path.display().to_string(),
                        source: String::new(),
                        error: EvalError::Runtime(e),
                    })?;
            }
        }
        Ok(())
    }

    /// Compile a unit without running its top-level statements: used by
    /// the disassembler. Returns (name, code) for every unit-level
    /// function, every class method and the unit script.
    pub fn compile_unit(
        &mut self,
        stmts: &[StmtS],
        unit_env: &EnvRef,
    ) -> Result<Vec<(String, Rc<Code>)>, EvalError> {
        let preset = native::names();
        resolver::resolve_unit(stmts, &mut self.ctx, &preset)?;

        let mut out = Vec::new();
        for (stmt, span) in stmts {
            match stmt {
                Stmt::Def(decl) => {
                    let func = self.define_function(decl, unit_env)?;
                    let code = func.ensure_compiled(&mut self.ctx)?;
                    env::put(unit_env, &func.name.clone(), Value::Function(func.clone()));
                    out.push((func.name.clone(), code));
                }
                Stmt::Class(decl) => {
                    let info = self.define_class(decl, unit_env, span)?;
                    for (name, value) in info.members.borrow().local_entries() {
                        if let Value::Function(m) = value {
                            let code = m.ensure_compiled(&mut self.ctx)?;
                            out.push((format!("{}.{}", info.name, name), code));
                        }
                    }
                    env::put(unit_env, &decl.name, Value::Class(info));
                }
                _ => {}
            }
        }
        let script = compiler::compile_script(stmts, &mut self.ctx, false)?;
        out.push(("<unit>".to_string(), Rc::new(script)));
        Ok(out)
    }

    /// Look a function up by name in an environment and run it with no
    /// arguments.
    pub fn call_by_name(
        &mut self,
        env_ref: &EnvRef,
        name: &str,
        io: &mut dyn RuntimeIo,
    ) -> Result<Option<Value>, EvalError> {
        match env::get(env_ref, name) {
            Some(Value::Function(func)) => {
                let mut vm = Vm::new();
                Ok(vm.run_with_io(&func, &mut self.ctx, io)?)
            }
            Some(other) => Err(EvalError::Runtime(err(
                VmErrorKind::TypeError("call"),
                format!("'{}' is {}, not a function", name, other.type_name()),
            ))),
            None => Err(EvalError::Runtime(err(
                VmErrorKind::NotFound,
                format!("undefined function '{}'", name),
            ))),
        }
    }
}

/// Failure of a whole-program run, carrying enough context to render a
/// source-anchored diagnostic.
#[derive(Debug)]
pub enum ProgramError {
    Preprocess(PreprocessError),
    Eval {
        path: String,
        source: String,
        error: EvalError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_io::BufferIo;

    fn eval(interp: &mut Interpreter, source: &str, io: &mut BufferIo) -> Option<Value> {
        let stmts = crate::parse_source(source).expect("parse failed");
        let env = interp.unit_env();
        interp
            .resolve_and_compile(&stmts, &env, io)
            .expect("eval failed")
    }

    #[test]
    fn test_definitions_persist_across_evals() {
        let mut interp = Interpreter::new();
        let mut io = BufferIo::new();
        eval(&mut interp, "def double(x) { return x * 2 }", &mut io);
        let v = eval(&mut interp, "double(21)", &mut io);
        assert_eq!(v, Some(Value::Int(42)));
    }

    #[test]
    fn test_unit_level_def_compiles_eagerly() {
        let mut interp = Interpreter::new();
        let mut io = BufferIo::new();
        eval(&mut interp, "def f() { return 1 }", &mut io);
        let env = interp.unit_env();
        match env::get(&env, "f") {
            Some(Value::Function(f)) => assert!(f.is_compiled()),
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_top_level_statements_run_at_load() {
        let mut interp = Interpreter::new();
        let mut io = BufferIo::new();
        eval(
            &mut interp,
            "def f(x) { return x * x }\nprint(f(5))",
            &mut io,
        );
        assert_eq!(io.drain_output(), "25\n");
    }

    #[test]
    fn test_trailing_expression_value_returned() {
        let mut interp = Interpreter::new();
        let mut io = BufferIo::new();
        assert_eq!(eval(&mut interp, "1 + 2", &mut io), Some(Value::Int(3)));
        assert_eq!(eval(&mut interp, "x = 5", &mut io), None);
    }

    #[test]
    fn test_unknown_superclass_rejected() {
        let mut interp = Interpreter::new();
        let mut io = BufferIo::new();
        let stmts = crate::parse_source("class A extends Missing { def init() { } }").unwrap();
        let env = interp.unit_env();
        let result = interp.resolve_and_compile(&stmts, &env, &mut io);
        assert!(matches!(result, Err(EvalError::Compile(_))));
    }

    #[test]
    fn test_compile_unit_lists_functions_and_methods() {
        let mut interp = Interpreter::new();
        let stmts = crate::parse_source(
            "def f() { return 1 }\nclass C { def init() { }\ndef m() { return 2 } }\n",
        )
        .unwrap();
        let env = interp.unit_env();
        let codes = interp.compile_unit(&stmts, &env).unwrap();
        let names: Vec<&str> = codes.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"f"));
        assert!(names.contains(&"C.init"));
        assert!(names.contains(&"C.m"));
        assert!(names.contains(&"<unit>"));
    }

    #[test]
    fn test_call_by_name_missing_is_error() {
        let mut interp = Interpreter::new();
        let mut io = BufferIo::new();
        let env = interp.unit_env();
        assert!(interp.call_by_name(&env, "main", &mut io).is_err());
    }
}
