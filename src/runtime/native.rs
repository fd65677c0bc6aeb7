//! Native functions installed into the outermost global environment at
//! startup, mirroring how the host seeds the runtime before any unit
//! loads.

use super::env::{self, EnvRef};
use super::value::{NativeFunction, Value};
use crate::runtime_io::RuntimeIo;
use crate::vm::machine::{VmError, VmErrorKind, VmResult};
use std::rc::Rc;

fn err(kind: VmErrorKind, message: String) -> VmError {
    VmError { kind, message }
}

fn native_print(args: &[Value], io: &mut dyn RuntimeIo) -> VmResult<Option<Value>> {
    io.write_line(&args[0].to_string());
    Ok(None)
}

fn native_len(args: &[Value], _io: &mut dyn RuntimeIo) -> VmResult<Option<Value>> {
    match &args[0] {
        Value::Array(items) => Ok(Some(Value::Int(items.borrow().len() as i64))),
        Value::Str(s) => Ok(Some(Value::Int(s.chars().count() as i64))),
        other => Err(err(
            VmErrorKind::TypeError("len"),
            format!("len() expects an array or string, got {}", other.type_name()),
        )),
    }
}

fn native_str(args: &[Value], _io: &mut dyn RuntimeIo) -> VmResult<Option<Value>> {
    Ok(Some(Value::Str(Rc::new(args[0].to_string()))))
}

const NATIVES: &[NativeFunction] = &[
    NativeFunction {
        name: "print",
        arity: 1,
        func: native_print,
    },
    NativeFunction {
        name: "len",
        arity: 1,
        func: native_len,
    },
    NativeFunction {
        name: "str",
        arity: 1,
        func: native_str,
    },
];

/// Register every native into `global`.
pub fn install(global: &EnvRef) {
    for native in NATIVES {
        env::put(
            global,
            native.name,
            Value::Native(Rc::new(NativeFunction {
                name: native.name,
                arity: native.arity,
                func: native.func,
            })),
        );
    }
}

/// Names visible to the resolver before any unit statement runs.
pub fn names() -> Vec<String> {
    NATIVES.iter().map(|n| n.name.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::env::Env;
    use crate::runtime_io::BufferIo;

    #[test]
    fn test_install_registers_all() {
        let global = Env::named(None);
        install(&global);
        for name in names() {
            assert!(matches!(env::get(&global, &name), Some(Value::Native(_))));
        }
    }

    #[test]
    fn test_print_writes_line() {
        let mut io = BufferIo::new();
        native_print(&[Value::Int(25)], &mut io).unwrap();
        assert_eq!(io.take_output(), "25\n");
    }

    #[test]
    fn test_len_on_array_and_string() {
        let mut io = BufferIo::new();
        let arr = Value::Array(Rc::new(std::cell::RefCell::new(vec![
            Value::Int(1),
            Value::Int(2),
        ])));
        assert_eq!(
            native_len(&[arr], &mut io).unwrap(),
            Some(Value::Int(2))
        );
        let s = Value::Str(Rc::new("abc".to_string()));
        assert_eq!(native_len(&[s], &mut io).unwrap(), Some(Value::Int(3)));
        assert!(native_len(&[Value::Int(1)], &mut io).is_err());
    }
}
