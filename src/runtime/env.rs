//! 실행 환경
//!
//! 두 종류의 환경이 하나의 타입을 공유한다:
//!
//! - **이름 기반** (`Named`): 전역/유닛 스코프, 클래스의 컴파일된
//!   환경, 인스턴스. 이름 → 값 사전과 바깥 환경 링크를 가진다.
//! - **슬롯 기반** (`Slots`): 함수 호출 프레임. 고정 크기 배열이며
//!   호출마다 새로 만들어진다. 이름 조회는 소유 함수의 재귀 참조
//!   하나만 답한다.
//!
//! 체인 검색 규칙: `get`은 안에서 밖으로 이름을 찾고, `put`은 이름이
//! 이미 존재하는 가장 안쪽 레벨을 갱신하며 어디에도 없으면 가장
//! 가까운 이름 기반 레벨에 새로 만든다. `$`로 시작하는 이름은 항상
//! 최외곽 환경에서만 읽고 쓴다.

use super::value::{FuncObject, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

pub type EnvRef = Rc<RefCell<Env>>;

pub struct Env {
    outer: Option<EnvRef>,
    data: EnvData,
}

enum EnvData {
    Named {
        map: HashMap<String, Value>,
        /// `Some(class name)` marks an instance environment, which
        /// answers `self` and `super` lookups.
        instance_of: Option<String>,
    },
    Slots {
        slots: Vec<Value>,
        owner_name: String,
        // non-owning: the frame keeps the function alive for the call
        owner: Weak<FuncObject>,
    },
}

impl Env {
    pub fn named(outer: Option<EnvRef>) -> EnvRef {
        Rc::new(RefCell::new(Env {
            outer,
            data: EnvData::Named {
                map: HashMap::new(),
                instance_of: None,
            },
        }))
    }

    pub fn instance(class_name: String) -> EnvRef {
        Rc::new(RefCell::new(Env {
            outer: None,
            data: EnvData::Named {
                map: HashMap::new(),
                instance_of: Some(class_name),
            },
        }))
    }

    pub fn slots(
        slots: Vec<Value>,
        owner_name: String,
        owner: Weak<FuncObject>,
        outer: EnvRef,
    ) -> EnvRef {
        Rc::new(RefCell::new(Env {
            outer: Some(outer),
            data: EnvData::Slots {
                slots,
                owner_name,
                owner,
            },
        }))
    }

    pub fn outer(&self) -> Option<EnvRef> {
        self.outer.clone()
    }

    pub fn set_outer(&mut self, outer: Option<EnvRef>) {
        self.outer = outer;
    }

    pub fn is_instance(&self) -> bool {
        matches!(
            &self.data,
            EnvData::Named {
                instance_of: Some(_),
                ..
            }
        )
    }

    pub fn class_name(&self) -> Option<&str> {
        match &self.data {
            EnvData::Named { instance_of, .. } => instance_of.as_deref(),
            EnvData::Slots { .. } => None,
        }
    }

    /// Insert into this level. Only meaningful for name-indexed
    /// environments; chain insertion rules live in [`put`].
    pub fn insert(&mut self, name: String, value: Value) {
        match &mut self.data {
            EnvData::Named { map, .. } => {
                map.insert(name, value);
            }
            EnvData::Slots { .. } => {
                unreachable!("insert by name into a slot environment")
            }
        }
    }

    pub fn has_local(&self, name: &str) -> bool {
        match &self.data {
            EnvData::Named { map, .. } => map.contains_key(name),
            EnvData::Slots { .. } => false,
        }
    }

    pub fn local_entries(&self) -> Vec<(String, Value)> {
        match &self.data {
            EnvData::Named { map, .. } => {
                map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            EnvData::Slots { .. } => Vec::new(),
        }
    }

    pub fn get_slot(&self, index: usize) -> Option<Value> {
        match &self.data {
            EnvData::Slots { slots, .. } => slots.get(index).cloned(),
            EnvData::Named { .. } => None,
        }
    }

    pub fn set_slot(&mut self, index: usize, value: Value) -> bool {
        match &mut self.data {
            EnvData::Slots { slots, .. } => match slots.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            EnvData::Named { .. } => false,
        }
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never walk the chain here: environment graphs are cyclic
        match &self.data {
            EnvData::Named {
                map,
                instance_of: Some(name),
            } => write!(f, "<instance of {} ({} members)>", name, map.len()),
            EnvData::Named { map, .. } => write!(f, "<environment ({} names)>", map.len()),
            EnvData::Slots {
                slots, owner_name, ..
            } => write!(f, "<frame of {} ({} slots)>", owner_name, slots.len()),
        }
    }
}

pub fn outermost(env: &EnvRef) -> EnvRef {
    let mut cur = env.clone();
    loop {
        let next = cur.borrow().outer();
        match next {
            Some(n) => cur = n,
            None => return cur,
        }
    }
}

/// Search the chain inside-out. `$`-names go straight to the outermost
/// environment; a slot level answers only its owning function's name;
/// an instance level answers `self` and `super`.
pub fn get(env: &EnvRef, name: &str) -> Option<Value> {
    if name.starts_with('$') {
        let root = outermost(env);
        let v = match &root.borrow().data {
            EnvData::Named { map, .. } => map.get(name).cloned(),
            EnvData::Slots { .. } => None,
        };
        return v;
    }
    let mut cur = Some(env.clone());
    while let Some(e) = cur {
        let next = {
            let eb = e.borrow();
            match &eb.data {
                EnvData::Named {
                    map,
                    instance_of,
                } => {
                    if instance_of.is_some() {
                        if name == "self" {
                            return Some(Value::Env(e.clone()));
                        }
                        if name == "super" {
                            // only meaningful when a super instance exists
                            match &eb.outer {
                                Some(o) if o.borrow().is_instance() => {
                                    return Some(Value::Env(o.clone()));
                                }
                                _ => return None,
                            }
                        }
                    }
                    if let Some(v) = map.get(name) {
                        return Some(v.clone());
                    }
                }
                EnvData::Slots {
                    owner_name, owner, ..
                } => {
                    if owner_name == name {
                        if let Some(f) = owner.upgrade() {
                            return Some(Value::Function(f));
                        }
                    }
                }
            }
            eb.outer.clone()
        };
        cur = next;
    }
    None
}

/// Store `name`, updating the nearest enclosing level that already
/// binds it, otherwise creating it at the nearest name-indexed level.
pub fn put(env: &EnvRef, name: &str, value: Value) {
    if name.starts_with('$') {
        outermost(env)
            .borrow_mut()
            .insert(name.to_string(), value);
        return;
    }
    let mut cur = Some(env.clone());
    while let Some(e) = cur {
        if e.borrow().has_local(name) {
            e.borrow_mut().insert(name.to_string(), value);
            return;
        }
        cur = e.borrow().outer();
    }
    // new name: innermost name-indexed level gets it
    let mut cur = env.clone();
    loop {
        let is_named = matches!(&cur.borrow().data, EnvData::Named { .. });
        if is_named {
            cur.borrow_mut().insert(name.to_string(), value);
            return;
        }
        let next = cur.borrow().outer();
        match next {
            Some(n) => cur = n,
            None => return,
        }
    }
}

/// Member lookup for dot access: walks the instance chain only, never
/// escaping into unit or global scope.
pub fn read_member(env: &EnvRef, name: &str) -> Option<Value> {
    let mut cur = Some(env.clone());
    while let Some(e) = cur {
        let next = {
            let eb = e.borrow();
            match &eb.data {
                EnvData::Named {
                    map,
                    instance_of: Some(_),
                } => {
                    if name == "self" {
                        return Some(Value::Env(e.clone()));
                    }
                    if let Some(v) = map.get(name) {
                        return Some(v.clone());
                    }
                }
                _ => return None,
            }
            eb.outer.clone()
        };
        cur = next;
    }
    None
}

/// Member store for dot assignment: updates the instance level that
/// already holds the field, else creates it on the receiver.
pub fn write_member(env: &EnvRef, name: &str, value: Value) {
    let mut cur = Some(env.clone());
    while let Some(e) = cur {
        let (has, is_instance) = {
            let eb = e.borrow();
            (eb.has_local(name), eb.is_instance())
        };
        if !is_instance {
            break;
        }
        if has {
            e.borrow_mut().insert(name.to_string(), value);
            return;
        }
        cur = e.borrow().outer();
    }
    env.borrow_mut().insert(name.to_string(), value);
}
