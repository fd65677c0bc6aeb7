//! 스코프 해석 패스
//!
//! 컴파일 전에 AST를 한 번 순회하며 모든 이름 참조에 저장 위치를
//! 배정한다. 인코딩은 다음과 같다:
//!
//! - `0 이상`: 현재 함수의 로컬 슬롯 인덱스
//! - `-1`: 전역 (이름 기반, 환경 체인 탐색)
//! - `-2 이하`: 바로 바깥 함수의 슬롯 `k = -2 - 인코딩값`
//!
//! UNIT/CLASS 스코프는 슬롯을 배정하지 않는다. 함수 스코프는 처음 본
//! 이름에 슬롯을 배정하며, 파라미터가 항상 가장 낮은 슬롯을 차지한다.

use crate::parser::ast::{ClassDecl, Expr, ExprS, FuncDecl, Stmt, StmtS};
use crate::types::Span;
use crate::vm::bytecode::{CompileCtx, LambSource};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Storage class sentinel for globals.
pub const GLOBAL_SLOT: i32 = -1;

/// Recover the enclosing-function slot from a closure encoding.
pub fn closure_slot(encoded: i32) -> usize {
    debug_assert!(encoded <= -2);
    (-2 - encoded) as usize
}

#[derive(Debug)]
pub struct ResolveError {
    pub message: String,
    pub span: Span,
}

pub type ResolveResult<T> = Result<T, ResolveError>;

fn err<T>(message: impl Into<String>, span: &Span) -> ResolveResult<T> {
    Err(ResolveError {
        message: message.into(),
        span: span.clone(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Unit,
    Function,
    Class,
}

pub type SymbolsRef = Rc<RefCell<Symbols>>;

/// One scope level of the symbol table tree.
#[derive(Debug)]
pub struct Symbols {
    kind: ScopeKind,
    outer: Option<SymbolsRef>,
    index: HashMap<String, i32>,
}

impl Symbols {
    pub fn unit() -> SymbolsRef {
        Rc::new(RefCell::new(Symbols {
            kind: ScopeKind::Unit,
            outer: None,
            index: HashMap::new(),
        }))
    }

    pub fn function(outer: SymbolsRef) -> SymbolsRef {
        Rc::new(RefCell::new(Symbols {
            kind: ScopeKind::Function,
            outer: Some(outer),
            index: HashMap::new(),
        }))
    }

    /// Class scopes carry the `self`/`super` sentinels from creation;
    /// resolving through a class scope that lacks them is a bug in the
    /// compiler, not a user error.
    pub fn class(outer: SymbolsRef) -> SymbolsRef {
        let mut index = HashMap::new();
        index.insert("self".to_string(), GLOBAL_SLOT);
        index.insert("super".to_string(), GLOBAL_SLOT);
        Rc::new(RefCell::new(Symbols {
            kind: ScopeKind::Class,
            outer: Some(outer),
            index,
        }))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Assign a storage class to `name` within `scope`.
pub fn resolve(scope: &SymbolsRef, name: &str) -> i32 {
    if name.starts_with('$') {
        return GLOBAL_SLOT;
    }

    let kind = scope.borrow().kind;
    if kind == ScopeKind::Class {
        debug_assert!(
            scope.borrow().index.contains_key("self"),
            "class scope created without self/super sentinels"
        );
    }

    if kind != ScopeKind::Function {
        scope
            .borrow_mut()
            .index
            .insert(name.to_string(), GLOBAL_SLOT);
        return GLOBAL_SLOT;
    }

    if let Some(&slot) = scope.borrow().index.get(name) {
        return slot;
    }

    let outer = scope.borrow().outer.clone();
    match locate(outer, name) {
        None => {
            // first use in this function: allocate a fresh local slot
            let mut s = scope.borrow_mut();
            let slot = s.index.len() as i32;
            s.index.insert(name.to_string(), slot);
            slot
        }
        Some(ancestor) => {
            if ancestor.borrow().kind == ScopeKind::Function {
                -2 - resolve(&ancestor, name)
            } else {
                GLOBAL_SLOT
            }
        }
    }
}

fn locate(scope: Option<SymbolsRef>, name: &str) -> Option<SymbolsRef> {
    let scope = scope?;
    if scope.borrow().index.contains_key(name) {
        Some(scope)
    } else {
        let outer = scope.borrow().outer.clone();
        locate(outer, name)
    }
}

/// Resolve one source unit. `preset` seeds the unit scope with names
/// known before any statement runs (native functions), and a pre-pass
/// registers every unit-level definition so bodies may refer to
/// definitions that appear later in the file.
pub fn resolve_unit(
    stmts: &[StmtS],
    ctx: &mut CompileCtx,
    preset: &[String],
) -> ResolveResult<SymbolsRef> {
    let unit = Symbols::unit();
    {
        let mut s = unit.borrow_mut();
        for name in preset {
            s.index.insert(name.clone(), GLOBAL_SLOT);
        }
        for (stmt, _) in stmts {
            match stmt {
                Stmt::Def(decl) => {
                    if let Some(name) = &decl.name {
                        s.index.insert(name.clone(), GLOBAL_SLOT);
                    }
                }
                Stmt::Class(decl) => {
                    s.index.insert(decl.name.clone(), GLOBAL_SLOT);
                }
                Stmt::Assign { target, .. } => {
                    if let Expr::Name(n) = &target.0 {
                        s.index.insert(n.name.clone(), GLOBAL_SLOT);
                    }
                }
                _ => {}
            }
        }
    }

    for stmt in stmts {
        resolve_stmt(stmt, &unit, ctx, true)?;
    }
    Ok(unit)
}

fn resolve_stmt(
    stmt: &StmtS,
    scope: &SymbolsRef,
    ctx: &mut CompileCtx,
    at_unit_level: bool,
) -> ResolveResult<()> {
    let (node, span) = stmt;
    match node {
        Stmt::Expr(e) => resolve_expr(e, scope, ctx),
        Stmt::Assign { target, value } => {
            resolve_expr(value, scope, ctx)?;
            if let Expr::Name(n) = &target.0 {
                if n.name == "self" || n.name == "super" {
                    return err(format!("cannot assign to '{}'", n.name), &target.1);
                }
            }
            resolve_expr(target, scope, ctx)
        }
        Stmt::If {
            condition,
            then_block,
            elif_blocks,
            else_block,
        } => {
            resolve_expr(condition, scope, ctx)?;
            for s in then_block {
                resolve_stmt(s, scope, ctx, at_unit_level)?;
            }
            for (cond, block) in elif_blocks {
                resolve_expr(cond, scope, ctx)?;
                for s in block {
                    resolve_stmt(s, scope, ctx, at_unit_level)?;
                }
            }
            if let Some(block) = else_block {
                for s in block {
                    resolve_stmt(s, scope, ctx, at_unit_level)?;
                }
            }
            Ok(())
        }
        Stmt::While { condition, body } => {
            resolve_expr(condition, scope, ctx)?;
            for s in body {
                resolve_stmt(s, scope, ctx, at_unit_level)?;
            }
            Ok(())
        }
        Stmt::Return(e) => {
            if let Some(e) = e {
                resolve_expr(e, scope, ctx)?;
            }
            Ok(())
        }
        Stmt::Def(decl) => {
            if !at_unit_level {
                return err("'def' is only allowed at unit level; use 'lamb'", span);
            }
            resolve_function(decl, scope, ctx, span)
        }
        Stmt::Class(decl) => {
            if !at_unit_level {
                return err("'class' is only allowed at unit level", span);
            }
            resolve_class(decl, scope, ctx, span)
        }
        Stmt::Using { .. } => {
            if !at_unit_level {
                return err("'using' is only allowed at unit level", span);
            }
            Ok(())
        }
    }
}

fn resolve_expr(expr: &ExprS, scope: &SymbolsRef, ctx: &mut CompileCtx) -> ResolveResult<()> {
    let (node, _span) = expr;
    match node {
        Expr::Literal(_) => Ok(()),
        Expr::Name(n) => {
            n.slot.set(resolve(scope, &n.name));
            Ok(())
        }
        Expr::Unary { expr, .. } => resolve_expr(expr, scope, ctx),
        Expr::Binary { left, right, .. }
        | Expr::AndLogic { left, right }
        | Expr::OrLogic { left, right } => {
            resolve_expr(left, scope, ctx)?;
            resolve_expr(right, scope, ctx)
        }
        Expr::Call { callee, args } => {
            resolve_expr(callee, scope, ctx)?;
            for a in args {
                resolve_expr(a, scope, ctx)?;
            }
            Ok(())
        }
        Expr::Dot { object, .. } => resolve_expr(object, scope, ctx),
        Expr::Index { object, index } => {
            resolve_expr(object, scope, ctx)?;
            resolve_expr(index, scope, ctx)
        }
        Expr::Array(elems) => {
            for e in elems {
                resolve_expr(e, scope, ctx)?;
            }
            Ok(())
        }
        Expr::Lambda(decl) => {
            // register in the closure-source table; the Closure
            // instruction carries this index at run time
            let idx = ctx.lambs.len() as i32;
            decl.lamb_index.set(idx);
            ctx.lambs.push(LambSource { decl: decl.clone() });
            resolve_function(decl, scope, ctx, &expr.1)
        }
        Expr::New { class, args } => {
            class.slot.set(resolve(scope, &class.name));
            for a in args {
                resolve_expr(a, scope, ctx)?;
            }
            Ok(())
        }
    }
}

fn resolve_function(
    decl: &Rc<FuncDecl>,
    outer: &SymbolsRef,
    ctx: &mut CompileCtx,
    span: &Span,
) -> ResolveResult<()> {
    let scope = Symbols::function(outer.clone());
    {
        // parameters are declared directly in the function scope so
        // they shadow any outer binding and take the lowest slots
        let mut s = scope.borrow_mut();
        for p in &decl.params {
            if p.starts_with('$') {
                return err(format!("parameter '{}' may not be a global name", p), span);
            }
            if p == "self" || p == "super" {
                return err(format!("parameter may not be named '{}'", p), span);
            }
            if s.index.contains_key(p) {
                return err(format!("duplicate parameter '{}'", p), span);
            }
            let slot = s.index.len() as i32;
            s.index.insert(p.clone(), slot);
        }
    }
    debug_assert_eq!(scope.borrow().len(), decl.params.len());
    for s in &decl.body {
        resolve_stmt(s, &scope, ctx, false)?;
    }
    decl.num_locals.set(scope.borrow().len());
    Ok(())
}

fn resolve_class(
    decl: &Rc<ClassDecl>,
    unit: &SymbolsRef,
    ctx: &mut CompileCtx,
    _span: &Span,
) -> ResolveResult<()> {
    if let Some(sup) = &decl.superclass {
        resolve(unit, sup);
    }
    let class_scope = Symbols::class(unit.clone());
    // seed member names first so method bodies can call siblings
    for (m, _) in &decl.methods {
        if let Some(name) = &m.name {
            resolve(&class_scope, name);
        }
    }
    for (m, mspan) in &decl.methods {
        resolve_function(m, &class_scope, ctx, mspan)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::UNRESOLVED;

    fn parse(source: &str) -> Vec<StmtS> {
        crate::parse_source(source).expect("parse failed")
    }

    fn resolve_src(source: &str) -> (Vec<StmtS>, CompileCtx) {
        let stmts = parse(source);
        let mut ctx = CompileCtx::new();
        resolve_unit(&stmts, &mut ctx, &[]).expect("resolve failed");
        (stmts, ctx)
    }

    fn first_func(stmts: &[StmtS]) -> Rc<FuncDecl> {
        for (s, _) in stmts {
            if let Stmt::Def(d) = s {
                return d.clone();
            }
        }
        panic!("no def found");
    }

    /// Collect the slot of every `Name` reference to `name` inside an
    /// expression tree.
    fn slots_of(expr: &ExprS, name: &str, out: &mut Vec<i32>) {
        match &expr.0 {
            Expr::Name(n) => {
                if n.name == name {
                    out.push(n.slot.get());
                }
            }
            Expr::Unary { expr, .. } => slots_of(expr, name, out),
            Expr::Binary { left, right, .. }
            | Expr::AndLogic { left, right }
            | Expr::OrLogic { left, right } => {
                slots_of(left, name, out);
                slots_of(right, name, out);
            }
            Expr::Call { callee, args } => {
                slots_of(callee, name, out);
                for a in args {
                    slots_of(a, name, out);
                }
            }
            _ => {}
        }
    }

    #[test]
    fn test_params_take_lowest_slots() {
        let (stmts, _) = resolve_src("def f(a, b) { c = a + b\nreturn c }\n");
        let f = first_func(&stmts);
        assert_eq!(f.num_locals.get(), 3);
        // c was allocated after the params, so it got slot 2
        if let Stmt::Assign { target, value } = &f.body[0].0 {
            if let Expr::Name(n) = &target.0 {
                assert_eq!(n.slot.get(), 2);
            }
            let mut a_slots = vec![];
            slots_of(value, "a", &mut a_slots);
            assert_eq!(a_slots, vec![0]);
            let mut b_slots = vec![];
            slots_of(value, "b", &mut b_slots);
            assert_eq!(b_slots, vec![1]);
        } else {
            panic!("expected assignment");
        }
    }

    #[test]
    fn test_slot_stability() {
        let scope = Symbols::function(Symbols::unit());
        let first = resolve(&scope, "x");
        let second = resolve(&scope, "x");
        assert_eq!(first, second);
        assert!(first >= 0);
    }

    #[test]
    fn test_global_sigil_is_global_everywhere() {
        let scope = Symbols::function(Symbols::unit());
        assert_eq!(resolve(&scope, "$shared"), GLOBAL_SLOT);
        // and it did not allocate a slot
        assert!(scope.borrow().is_empty());
    }

    #[test]
    fn test_unit_scope_never_allocates() {
        let unit = Symbols::unit();
        assert_eq!(resolve(&unit, "anything"), GLOBAL_SLOT);
        assert_eq!(resolve(&unit, "other"), GLOBAL_SLOT);
    }

    #[test]
    fn test_closure_encoding_round_trip() {
        let unit = Symbols::unit();
        let outer = Symbols::function(unit);
        let k = resolve(&outer, "captured");
        assert!(k >= 0);
        let inner = Symbols::function(outer);
        let encoded = resolve(&inner, "captured");
        assert!(encoded <= -2);
        assert_eq!(closure_slot(encoded), k as usize);
        // disjoint from the global sentinel and from any local slot
        assert_ne!(encoded, GLOBAL_SLOT);
        assert!(encoded < 0);
    }

    #[test]
    fn test_name_in_unit_ancestor_is_global() {
        let (stmts, _) = resolve_src("g = 1\ndef f() { return g }\n");
        let f = first_func(&stmts);
        if let Stmt::Return(Some(e)) = &f.body[0].0 {
            let mut slots = vec![];
            slots_of(e, "g", &mut slots);
            assert_eq!(slots, vec![GLOBAL_SLOT]);
        } else {
            panic!("expected return");
        }
    }

    #[test]
    fn test_forward_reference_to_later_def() {
        let (stmts, _) = resolve_src("def f() { return g() }\ndef g() { return 1 }\n");
        let f = first_func(&stmts);
        if let Stmt::Return(Some(e)) = &f.body[0].0 {
            let mut slots = vec![];
            slots_of(e, "g", &mut slots);
            // seeded by the unit pre-pass, so not a local of f
            assert_eq!(slots, vec![GLOBAL_SLOT]);
        }
    }

    #[test]
    fn test_lambda_capture_encodes_outer_slot() {
        let (stmts, ctx) = resolve_src(
            "def f() { x = 1\nreturn lamb () { return x } }\n",
        );
        assert_eq!(ctx.lambs.len(), 1);
        let f = first_func(&stmts);
        // x is f's local 0
        assert_eq!(f.num_locals.get(), 1);
        let lamb = &ctx.lambs[0].decl;
        assert_eq!(lamb.lamb_index.get(), 0);
        assert_eq!(lamb.num_locals.get(), 0);
        if let Stmt::Return(Some(e)) = &lamb.body[0].0 {
            let mut slots = vec![];
            slots_of(e, "x", &mut slots);
            assert_eq!(slots.len(), 1);
            assert!(slots[0] <= -2);
            assert_eq!(closure_slot(slots[0]), 0);
        } else {
            panic!("expected return in lamb body");
        }
    }

    #[test]
    fn test_self_resolves_global_in_methods() {
        let (stmts, _) = resolve_src(
            "class P { def init(v) { self.v = v } }\n",
        );
        if let Stmt::Class(decl) = &stmts[0].0 {
            let init = &decl.methods[0].0;
            if let Stmt::Assign { value, .. } = &init.body[0].0 {
                let mut slots = vec![];
                slots_of(value, "v", &mut slots);
                assert_eq!(slots, vec![0]);
            }
            // `self` went through the class sentinel, not a local slot
            if let Stmt::Assign { target, .. } = &init.body[0].0 {
                if let Expr::Dot { object, .. } = &target.0 {
                    if let Expr::Name(n) = &object.0 {
                        assert_eq!(n.name, "self");
                        assert_eq!(n.slot.get(), GLOBAL_SLOT);
                        return;
                    }
                }
            }
        }
        panic!("unexpected shape");
    }

    #[test]
    fn test_parameter_shadows_unit_name() {
        // g exists at unit level, but as a parameter it must be local
        let (stmts, _) = resolve_src("def g() { return 1 }\ndef f(g) { return g }\n");
        for (s, _) in &stmts {
            if let Stmt::Def(d) = s {
                if d.name.as_deref() == Some("f") {
                    if let Stmt::Return(Some(e)) = &d.body[0].0 {
                        let mut slots = vec![];
                        slots_of(e, "g", &mut slots);
                        assert_eq!(slots, vec![0]);
                        return;
                    }
                }
            }
        }
        panic!("f not found");
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let stmts = parse("def f(a, a) { return a }\n");
        let mut ctx = CompileCtx::new();
        assert!(resolve_unit(&stmts, &mut ctx, &[]).is_err());
    }

    #[test]
    fn test_nested_def_rejected() {
        let stmts = parse("def f() { def g() { return 1 } }\n");
        let mut ctx = CompileCtx::new();
        assert!(resolve_unit(&stmts, &mut ctx, &[]).is_err());
    }

    #[test]
    fn test_sigil_parameter_rejected() {
        let stmts = parse("def f($a) { return $a }\n");
        let mut ctx = CompileCtx::new();
        assert!(resolve_unit(&stmts, &mut ctx, &[]).is_err());
    }

    #[test]
    fn test_unresolved_marker_replaced() {
        let (stmts, _) = resolve_src("x = 1\nprint(x)\n");
        for (s, _) in &stmts {
            if let Stmt::Expr(e) = s {
                let mut slots = vec![];
                slots_of(e, "x", &mut slots);
                for s in slots {
                    assert_ne!(s, UNRESOLVED);
                }
            }
        }
    }
}
