//! 바이트코드 해석기
//!
//! 하나의 호출 스택과 하나의 공유 피연산자 스택으로 실행한다. 호출은
//! 프레임을 쌓고, 명령 포인터가 코드 끝에 닿은 프레임은 암묵적으로
//! 내려간다 (명시적 return 없이 끝나는 함수 지원). 모든 오류는
//! 치명적이며 복구 없이 최상위로 전파된다.

use super::bytecode::{Code, CompileCtx, Instruction as I};
use crate::runtime::env::{self, Env, EnvRef};
use crate::runtime::value::{FuncObject, Value};
use crate::runtime_io::{RuntimeIo, StdIo};
use std::rc::Rc;

#[derive(Debug)]
pub enum VmErrorKind {
    TypeError(&'static str),
    ZeroDivision,
    ArityError { expected: usize, got: usize },
    NotFound,
    IndexError,
    StackUnderflow,
    StackOverflow,
    MissingInitializer,
    CompileFailed,
}

#[derive(Debug)]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
}

pub type VmResult<T> = Result<T, VmError>;

pub(crate) fn err(kind: VmErrorKind, message: String) -> VmError {
    VmError { kind, message }
}

/// Per-call record: the function, its code, the instruction pointer
/// and the slot environment created for this call.
pub struct Frame {
    pub func: Rc<FuncObject>,
    pub code: Rc<Code>,
    pub ip: usize,
    pub env: EnvRef,
}

pub struct Vm {
    pub stack: Vec<Value>,
    pub frames: Vec<Frame>,
    pub max_stack: usize,
    pub max_frames: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(128),
            frames: Vec::with_capacity(32),
            max_stack: 4096,
            max_frames: 256,
        }
    }

    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= self.max_stack {
            return Err(err(
                VmErrorKind::StackOverflow,
                "operand stack overflow".into(),
            ));
        }
        self.stack.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or_else(|| {
            err(
                VmErrorKind::StackUnderflow,
                "operand stack underflow".into(),
            )
        })
    }

    pub fn run(
        &mut self,
        entry: &Rc<FuncObject>,
        ctx: &mut CompileCtx,
    ) -> VmResult<Option<Value>> {
        let mut stdio = StdIo;
        self.run_with_io(entry, ctx, &mut stdio)
    }

    /// Seed the call stack with `entry` and run until it empties (or a
    /// Halt executes). The returned value is whatever the program left
    /// on the operand stack, if anything.
    pub fn run_with_io(
        &mut self,
        entry: &Rc<FuncObject>,
        ctx: &mut CompileCtx,
        io: &mut dyn RuntimeIo,
    ) -> VmResult<Option<Value>> {
        self.enter_function(entry.clone(), Vec::new(), ctx)?;
        self.dispatch(ctx, io)?;
        Ok(self.stack.pop())
    }

    fn dispatch(&mut self, ctx: &mut CompileCtx, io: &mut dyn RuntimeIo) -> VmResult<()> {
        loop {
            let (ip, code_len) = match self.frames.last() {
                Some(frame) => (frame.ip, frame.code.len()),
                None => break,
            };
            if ip >= code_len {
                // implicit return: the body's final push is the result
                self.frames.pop();
                continue;
            }
            let ins = {
                let frame = self.frames.last_mut().expect("frame checked above");
                let ins = frame.code.ins[ip];
                frame.ip = ip + 1;
                ins
            };
            match ins {
                I::IConst(idx) => {
                    let v = *ctx.ints.get(idx);
                    self.push(Value::Int(v))?;
                }
                I::FConst(idx) => {
                    let v = *ctx.floats.get(idx);
                    self.push(Value::Float(v))?;
                }
                I::SConst(idx) => {
                    let s = ctx.strings.get(idx).clone();
                    self.push(Value::Str(Rc::new(s)))?;
                }
                I::True => self.push(Value::Bool(true))?,
                I::False => self.push(Value::Bool(false))?,
                I::Nil => self.push(Value::None)?,

                I::Load(slot) => {
                    let v = self
                        .frame_env()
                        .borrow()
                        .get_slot(slot as usize)
                        .ok_or_else(|| {
                            err(
                                VmErrorKind::IndexError,
                                format!("local slot {} out of range", slot),
                            )
                        })?;
                    self.push(v)?;
                }
                I::Store(slot) => {
                    let v = self.pop()?;
                    let ok = self.frame_env().borrow_mut().set_slot(slot as usize, v);
                    if !ok {
                        return Err(err(
                            VmErrorKind::IndexError,
                            format!("local slot {} out of range", slot),
                        ));
                    }
                }
                I::GLoad(idx) => {
                    let (name, envref) = {
                        let frame = self.frames.last().expect("running frame");
                        (frame.code.name(idx).to_string(), frame.env.clone())
                    };
                    let v = env::get(&envref, &name).ok_or_else(|| {
                        err(
                            VmErrorKind::NotFound,
                            format!("undefined variable '{}'", name),
                        )
                    })?;
                    self.push(v)?;
                }
                I::GStore(idx) => {
                    let v = self.pop()?;
                    let (name, envref) = {
                        let frame = self.frames.last().expect("running frame");
                        (frame.code.name(idx).to_string(), frame.env.clone())
                    };
                    env::put(&envref, &name, v);
                }
                // closure access addresses the immediately enclosing
                // function's slot environment, no chain search
                I::CLoad(slot) => {
                    let outer = self.enclosing_env()?;
                    let v = outer.borrow().get_slot(slot as usize).ok_or_else(|| {
                        err(
                            VmErrorKind::IndexError,
                            format!("captured slot {} out of range", slot),
                        )
                    })?;
                    self.push(v)?;
                }
                I::CStore(slot) => {
                    let v = self.pop()?;
                    let outer = self.enclosing_env()?;
                    let ok = outer.borrow_mut().set_slot(slot as usize, v);
                    if !ok {
                        return Err(err(
                            VmErrorKind::IndexError,
                            format!("captured slot {} out of range", slot),
                        ));
                    }
                }

                I::Add | I::Sub | I::Mul | I::Div | I::Mod => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = arithmetic(ins, a, b)?;
                    self.push(result)?;
                }
                I::Neg => {
                    let v = self.pop()?;
                    let result = match v {
                        Value::Int(i) => Value::Int(i.wrapping_neg()),
                        Value::Float(f) => Value::Float(-f),
                        other => {
                            return Err(err(
                                VmErrorKind::TypeError("negate"),
                                format!("cannot negate {}", other.type_name()),
                            ));
                        }
                    };
                    self.push(result)?;
                }
                I::Eq | I::Neq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let eq = equals(&a, &b)?;
                    self.push(Value::Bool(if matches!(ins, I::Eq) { eq } else { !eq }))?;
                }
                I::Lt | I::Le | I::Gt | I::Ge => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = ordering(ins, a, b)?;
                    self.push(Value::Bool(result))?;
                }
                I::And => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = truth(&a)? && truth(&b)?;
                    self.push(Value::Bool(result))?;
                }
                I::Or => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = truth(&a)? || truth(&b)?;
                    self.push(Value::Bool(result))?;
                }
                I::Not => {
                    let v = self.pop()?;
                    let result = !truth(&v)?;
                    self.push(Value::Bool(result))?;
                }

                I::Br(target) => {
                    self.frames.last_mut().expect("running frame").ip = target as usize;
                }
                I::Brt(target) => {
                    let c = self.pop()?;
                    if truth(&c)? {
                        self.frames.last_mut().expect("running frame").ip = target as usize;
                    }
                }
                I::Brf(target) => {
                    let c = self.pop()?;
                    if !truth(&c)? {
                        self.frames.last_mut().expect("running frame").ip = target as usize;
                    }
                }

                I::Call(argc) => {
                    // arguments were pushed in reverse; popping
                    // restores source order
                    let mut args = Vec::with_capacity(argc as usize);
                    for _ in 0..argc {
                        args.push(self.pop()?);
                    }
                    let callee = self.pop()?;
                    match callee {
                        Value::Function(func) => {
                            self.enter_function(func, args, ctx)?;
                        }
                        Value::Native(native) => {
                            if args.len() != native.arity {
                                return Err(err(
                                    VmErrorKind::ArityError {
                                        expected: native.arity,
                                        got: args.len(),
                                    },
                                    format!(
                                        "{}() takes {} argument(s), got {}",
                                        native.name,
                                        native.arity,
                                        args.len()
                                    ),
                                ));
                            }
                            let result = native.invoke(&args, io)?;
                            self.push(result.unwrap_or(Value::None))?;
                        }
                        other => {
                            return Err(err(
                                VmErrorKind::TypeError("call"),
                                format!("{} is not callable", other.type_name()),
                            ));
                        }
                    }
                }
                I::Ret => {
                    // the return value is already on the shared stack
                    if self.frames.pop().is_none() {
                        return Err(err(
                            VmErrorKind::StackUnderflow,
                            "return outside of a call".into(),
                        ));
                    }
                }
                I::Halt => {
                    self.frames.clear();
                    break;
                }

                I::Pop => {
                    self.pop()?;
                }

                I::ArrayGen(count) => {
                    let mut items = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        items.push(self.pop()?);
                    }
                    // compiled element order is left to right, stack
                    // pop order reverses it
                    items.reverse();
                    self.push(Value::Array(Rc::new(std::cell::RefCell::new(items))))?;
                }
                I::ArrayGet => {
                    let index = self.pop()?;
                    let array = self.pop()?;
                    let v = array_index(&array, &index)?;
                    self.push(v)?;
                }
                I::ArraySet => {
                    let index = self.pop()?;
                    let array = self.pop()?;
                    let value = self.pop()?;
                    array_assign(&array, &index, value)?;
                }

                I::DotGet => {
                    let name = self.pop_field_name()?;
                    let object = self.pop()?;
                    let envref = instance_env(&object)?;
                    let v = env::read_member(&envref, &name).ok_or_else(|| {
                        err(
                            VmErrorKind::NotFound,
                            format!("no member '{}' on {}", name, object.type_name()),
                        )
                    })?;
                    self.push(v)?;
                }
                I::DotSet => {
                    let name = self.pop_field_name()?;
                    let object = self.pop()?;
                    let value = self.pop()?;
                    let envref = instance_env(&object)?;
                    env::write_member(&envref, &name, value);
                }

                I::New => {
                    let class = match self.pop()? {
                        Value::Class(c) => c,
                        other => {
                            return Err(err(
                                VmErrorKind::TypeError("new"),
                                format!("cannot instantiate {}", other.type_name()),
                            ));
                        }
                    };
                    let instance = class.instantiate()?;
                    let init = env::read_member(&instance, "init").ok_or_else(|| {
                        err(
                            VmErrorKind::MissingInitializer,
                            format!("class '{}' has no 'init' member", class.name),
                        )
                    })?;
                    // construction and initialization cooperate: the
                    // compiler emits the Call for `init` right after
                    self.push(Value::Env(instance))?;
                    self.push(init)?;
                }

                I::Closure(idx) => {
                    let decl = ctx
                        .lambs
                        .get(idx as usize)
                        .map(|src| src.decl.clone())
                        .ok_or_else(|| {
                            err(
                                VmErrorKind::IndexError,
                                format!("closure source {} out of range", idx),
                            )
                        })?;
                    let defining = self.frame_env();
                    let func = FuncObject::new("CLOSURE", decl, defining);
                    self.push(Value::Function(Rc::new(func)))?;
                }
            }
        }
        Ok(())
    }

    fn frame_env(&self) -> EnvRef {
        self.frames.last().expect("running frame").env.clone()
    }

    fn enclosing_env(&self) -> VmResult<EnvRef> {
        let outer = self.frame_env().borrow().outer();
        outer.ok_or_else(|| {
            err(
                VmErrorKind::NotFound,
                "no enclosing environment for captured variable".into(),
            )
        })
    }

    fn pop_field_name(&mut self) -> VmResult<String> {
        match self.pop()? {
            Value::Str(s) => Ok(s.as_ref().clone()),
            other => Err(err(
                VmErrorKind::TypeError("member name"),
                format!("member name must be a string, got {}", other.type_name()),
            )),
        }
    }

    fn enter_function(
        &mut self,
        func: Rc<FuncObject>,
        args: Vec<Value>,
        ctx: &mut CompileCtx,
    ) -> VmResult<()> {
        if args.len() != func.arity() {
            return Err(err(
                VmErrorKind::ArityError {
                    expected: func.arity(),
                    got: args.len(),
                },
                format!(
                    "{}() takes {} argument(s), got {}",
                    func.name,
                    func.arity(),
                    args.len()
                ),
            ));
        }
        if self.frames.len() >= self.max_frames {
            return Err(err(
                VmErrorKind::StackOverflow,
                format!("call stack overflow entering '{}'", func.name),
            ));
        }
        let code = func
            .ensure_compiled(ctx)
            .map_err(|e| err(VmErrorKind::CompileFailed, e.message))?;

        // parameters occupy the lowest slots; the rest start as none
        let mut slots = vec![Value::None; func.num_locals()];
        for (i, arg) in args.into_iter().enumerate() {
            slots[i] = arg;
        }
        let frame_env = Env::slots(
            slots,
            func.name.clone(),
            Rc::downgrade(&func),
            func.env.clone(),
        );
        self.frames.push(Frame {
            func,
            code,
            ip: 0,
            env: frame_env,
        });
        Ok(())
    }
}

fn truth(v: &Value) -> VmResult<bool> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Int(i) => Ok(*i != 0),
        other => Err(err(
            VmErrorKind::TypeError("condition"),
            format!("expected bool or int, got {}", other.type_name()),
        )),
    }
}

/// Numeric tower: int⊗int stays int, any float promotes both sides,
/// string + string concatenates. Everything else is fatal.
fn arithmetic(op: I, a: Value, b: Value) -> VmResult<Value> {
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => {
            let (x, y) = (*x, *y);
            let v = match op {
                I::Add => x.wrapping_add(y),
                I::Sub => x.wrapping_sub(y),
                I::Mul => x.wrapping_mul(y),
                I::Div => {
                    if y == 0 {
                        return Err(err(
                            VmErrorKind::ZeroDivision,
                            "integer division by zero".into(),
                        ));
                    }
                    x.wrapping_div(y)
                }
                I::Mod => {
                    if y == 0 {
                        return Err(err(
                            VmErrorKind::ZeroDivision,
                            "integer modulo by zero".into(),
                        ));
                    }
                    x.wrapping_rem(y)
                }
                _ => unreachable!("not an arithmetic instruction"),
            };
            Ok(Value::Int(v))
        }
        (Value::Str(x), Value::Str(y)) if matches!(op, I::Add) => {
            Ok(Value::Str(Rc::new(format!("{}{}", x, y))))
        }
        _ => {
            let (x, y) = match (as_float(&a), as_float(&b)) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(err(
                        VmErrorKind::TypeError("arithmetic"),
                        format!(
                            "unsupported operand types {} and {}",
                            a.type_name(),
                            b.type_name()
                        ),
                    ));
                }
            };
            let v = match op {
                I::Add => x + y,
                I::Sub => x - y,
                I::Mul => x * y,
                I::Div => {
                    if y == 0.0 {
                        return Err(err(VmErrorKind::ZeroDivision, "division by zero".into()));
                    }
                    x / y
                }
                I::Mod => {
                    if y == 0.0 {
                        return Err(err(VmErrorKind::ZeroDivision, "modulo by zero".into()));
                    }
                    x % y
                }
                _ => unreachable!("not an arithmetic instruction"),
            };
            Ok(Value::Float(v))
        }
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// Equality follows the tower plus one extension: comparing anything
/// against `none` is always allowed.
fn equals(a: &Value, b: &Value) -> VmResult<bool> {
    match (a, b) {
        (Value::None, _) | (_, Value::None) => Ok(a == b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => Ok(a == b),
        (Value::Bool(_), Value::Bool(_)) => Ok(a == b),
        (Value::Str(_), Value::Str(_)) => Ok(a == b),
        (Value::Array(_), Value::Array(_))
        | (Value::Function(_), Value::Function(_))
        | (Value::Native(_), Value::Native(_))
        | (Value::Class(_), Value::Class(_))
        | (Value::Env(_), Value::Env(_)) => Ok(a == b),
        _ => Err(err(
            VmErrorKind::TypeError("equality"),
            format!("cannot compare {} with {}", a.type_name(), b.type_name()),
        )),
    }
}

/// Ordering exists for numbers only; strings compare with == and !=
/// but have no order.
fn ordering(op: I, a: Value, b: Value) -> VmResult<bool> {
    let (x, y) = match (as_float(&a), as_float(&b)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(err(
                VmErrorKind::TypeError("comparison"),
                format!("cannot order {} and {}", a.type_name(), b.type_name()),
            ));
        }
    };
    Ok(match op {
        I::Lt => x < y,
        I::Le => x <= y,
        I::Gt => x > y,
        I::Ge => x >= y,
        _ => unreachable!("not an ordering instruction"),
    })
}

fn array_index(array: &Value, index: &Value) -> VmResult<Value> {
    let items = match array {
        Value::Array(items) => items,
        other => {
            return Err(err(
                VmErrorKind::TypeError("index"),
                format!("{} is not indexable", other.type_name()),
            ));
        }
    };
    let i = index_of(index, items.borrow().len())?;
    Ok(items.borrow()[i].clone())
}

fn array_assign(array: &Value, index: &Value, value: Value) -> VmResult<()> {
    let items = match array {
        Value::Array(items) => items,
        other => {
            return Err(err(
                VmErrorKind::TypeError("index"),
                format!("{} is not indexable", other.type_name()),
            ));
        }
    };
    let i = index_of(index, items.borrow().len())?;
    items.borrow_mut()[i] = value;
    Ok(())
}

fn index_of(index: &Value, len: usize) -> VmResult<usize> {
    let i = match index {
        Value::Int(i) => *i,
        other => {
            return Err(err(
                VmErrorKind::TypeError("index"),
                format!("array index must be int, got {}", other.type_name()),
            ));
        }
    };
    if i < 0 || i as usize >= len {
        return Err(err(
            VmErrorKind::IndexError,
            format!("index {} out of range for length {}", i, len),
        ));
    }
    Ok(i as usize)
}

fn instance_env(object: &Value) -> VmResult<EnvRef> {
    match object {
        Value::Env(e) => Ok(e.clone()),
        other => Err(err(
            VmErrorKind::TypeError("member access"),
            format!("{} has no members", other.type_name()),
        )),
    }
}
