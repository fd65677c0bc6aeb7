//! 런타임 값 모델
//!
//! 모든 값은 `Value` 태그 유니온 하나로 표현된다. 힙을 쓰는 값(배열,
//! 함수, 클래스, 환경)은 `Rc`로 공유되고, 환경 그래프의 순환 참조는
//! 의도된 것이다 (클로저와 공유 클래스 상태가 이 별칭으로 구현된다).

use super::env::{Env, EnvRef};
use crate::parser::ast::{ClassDecl, FuncDecl};
use crate::vm::bytecode::{Code, CompileCtx};
use crate::vm::compiler::{self, CompileError};
use crate::vm::machine::VmResult;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<String>),
    None,
    Array(Rc<RefCell<Vec<Value>>>),
    Function(Rc<FuncObject>),
    Native(Rc<NativeFunction>),
    Class(Rc<ClassInfo>),
    Env(EnvRef),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::None => "none",
            Value::Array(_) => "array",
            Value::Function(_) => "function",
            Value::Native(_) => "native function",
            Value::Class(_) => "class",
            Value::Env(e) => {
                if e.borrow().is_instance() {
                    "instance"
                } else {
                    "environment"
                }
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => *a as f64 == *b,
            (Value::Float(a), Value::Int(b)) => *a == *b as f64,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Env(a), Value::Env(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => {
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Bool(true) => write!(f, "true"),
            Value::Bool(false) => write!(f, "false"),
            Value::Str(s) => write!(f, "{}", s),
            Value::None => write!(f, "none"),
            Value::Array(items) => {
                let items = items.borrow();
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Function(func) => write!(f, "<func {}>", func.name),
            Value::Native(n) => write!(f, "<native func {}>", n.name),
            Value::Class(c) => write!(f, "<class {}>", c.name),
            Value::Env(e) => {
                let e = e.borrow();
                match e.class_name() {
                    Some(name) => write!(f, "<instance of {}>", name),
                    None => write!(f, "<environment>"),
                }
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "\"{}\"", s),
            other => write!(f, "{}", other),
        }
    }
}

/// Compilation state of a function body: the `Uncompiled → Compiled`
/// transition happens on first call.
#[derive(Clone)]
pub enum FuncState {
    Pending,
    Ready(Rc<Code>),
}

/// A user function or closure: declaration AST, the environment it was
/// defined in, and its (possibly not yet generated) bytecode.
pub struct FuncObject {
    pub name: String,
    pub decl: Rc<FuncDecl>,
    pub env: EnvRef,
    code: RefCell<FuncState>,
}

impl FuncObject {
    pub fn new(name: impl Into<String>, decl: Rc<FuncDecl>, env: EnvRef) -> Self {
        Self {
            name: name.into(),
            decl,
            env,
            code: RefCell::new(FuncState::Pending),
        }
    }

    /// For pre-compiled bodies (unit scripts).
    pub fn with_code(
        name: impl Into<String>,
        decl: Rc<FuncDecl>,
        env: EnvRef,
        code: Rc<Code>,
    ) -> Self {
        Self {
            name: name.into(),
            decl,
            env,
            code: RefCell::new(FuncState::Ready(code)),
        }
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }

    pub fn num_locals(&self) -> usize {
        self.decl.num_locals.get()
    }

    pub fn is_compiled(&self) -> bool {
        matches!(&*self.code.borrow(), FuncState::Ready(_))
    }

    pub fn ensure_compiled(&self, ctx: &mut CompileCtx) -> Result<Rc<Code>, CompileError> {
        if let FuncState::Ready(code) = &*self.code.borrow() {
            return Ok(code.clone());
        }
        let code = Rc::new(compiler::compile_function(&self.decl, ctx)?);
        *self.code.borrow_mut() = FuncState::Ready(code.clone());
        Ok(code)
    }

    /// A copy of this function bound to a different environment. The
    /// declaration and any generated code stay shared; instantiation
    /// uses this to give each instance level methods that see its
    /// state.
    pub fn bind(&self, env: EnvRef) -> FuncObject {
        FuncObject {
            name: self.name.clone(),
            decl: self.decl.clone(),
            env,
            code: RefCell::new(self.code.borrow().clone()),
        }
    }
}

impl fmt::Debug for FuncObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<func {}/{}>", self.name, self.arity())
    }
}

/// Host function: receives already-evaluated arguments and the runtime
/// I/O handle, returns at most one value.
pub type NativeFn =
    fn(&[Value], &mut dyn crate::runtime_io::RuntimeIo) -> VmResult<Option<Value>>;

pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn invoke(
        &self,
        args: &[Value],
        io: &mut dyn crate::runtime_io::RuntimeIo,
    ) -> VmResult<Option<Value>> {
        (self.func)(args, io)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native func {}/{}>", self.name, self.arity)
    }
}

/// Class metadata: the definition, its defining environment, the
/// resolved superclass and the once-built compiled member environment.
pub struct ClassInfo {
    pub name: String,
    pub decl: Rc<ClassDecl>,
    pub superclass: Option<Rc<ClassInfo>>,
    /// Name-indexed environment holding the compiled methods; its
    /// outer link is the class's defining environment.
    pub members: EnvRef,
}

impl ClassInfo {
    /// Build an instance: recursively instantiate the superclass,
    /// value-copy the compiled environment with methods re-bound to
    /// the new level, then wire the outer link (to the super instance
    /// when there is one, else to the defining environment) only after
    /// the copy is complete.
    pub fn instantiate(self: &Rc<Self>) -> VmResult<EnvRef> {
        let super_instance = match &self.superclass {
            Some(sup) => Some(sup.instantiate()?),
            None => None,
        };

        let instance = Env::instance(self.name.clone());
        {
            let members = self.members.borrow();
            for (name, value) in members.local_entries() {
                let bound = match value {
                    Value::Function(func) => {
                        Value::Function(Rc::new(func.bind(instance.clone())))
                    }
                    other => other,
                };
                instance.borrow_mut().insert(name, bound);
            }
        }

        let outer = match super_instance {
            Some(sup) => Some(sup),
            None => self.members.borrow().outer(),
        };
        instance.borrow_mut().set_outer(outer);
        Ok(instance)
    }
}

impl fmt::Debug for ClassInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_cross_equality() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_eq!(Value::Float(2.0), Value::Int(2));
        assert_ne!(Value::Int(2), Value::Float(2.5));
    }

    #[test]
    fn test_string_value_equality() {
        let a = Value::Str(Rc::new("hi".to_string()));
        let b = Value::Str(Rc::new("hi".to_string()));
        assert_eq!(a, b);
    }

    #[test]
    fn test_array_identity_equality() {
        let a = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let v1 = Value::Array(a.clone());
        let v2 = Value::Array(a);
        let v3 = Value::Array(Rc::new(RefCell::new(vec![Value::Int(1)])));
        assert_eq!(v1, v2);
        assert_ne!(v1, v3);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Int(25).to_string(), "25");
        assert_eq!(Value::Float(5.0).to_string(), "5.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::None.to_string(), "none");
        let arr = Value::Array(Rc::new(RefCell::new(vec![
            Value::Int(1),
            Value::Str(Rc::new("x".to_string())),
        ])));
        assert_eq!(arr.to_string(), "[1, x]");
    }
}
