//! 바이트코드 컴파일러
//!
//! 해석 패스가 끝난 AST를 한 번 순회하며 함수 단위의 평탄한 명령
//! 스트림을 만든다. 분기 대상은 2단계 주소 보정으로 채운다: 자리
//! 표시자를 먼저 내보내고, 종속 블록을 컴파일한 뒤 확정된 절대
//! 오프셋을 덮어쓴다.

use super::bytecode::{Code, CompileCtx, Instruction as I};
use crate::parser::ast::{
    BinaryOp, Expr, ExprS, FuncDecl, NameRef, Stmt, StmtS, UNRESOLVED, UnaryOp,
};
use crate::resolver::{GLOBAL_SLOT, closure_slot};
use crate::types::Span;

#[derive(Debug)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
}

pub type CompileResult<T> = Result<T, CompileError>;

fn err<T>(message: impl Into<String>, span: &Span) -> CompileResult<T> {
    Err(CompileError {
        message: message.into(),
        span: span.clone(),
    })
}

/// Compile a function body. Falling off the end yields `none`: every
/// body ends with an implicit Nil push, so a call always leaves
/// exactly one value on the shared operand stack.
pub fn compile_function(decl: &FuncDecl, ctx: &mut CompileCtx) -> CompileResult<Code> {
    let mut code = Code::new();
    let mut compiler = Compiler { ctx };
    for stmt in &decl.body {
        compiler.emit_stmt(stmt, &mut code)?;
    }
    code.emit(I::Nil);
    Ok(code)
}

/// Compile the executable part of a unit: definitions were already
/// evaluated by the interpreter and are skipped here. When
/// `keep_last_value` is set, a trailing expression statement keeps its
/// value on the stack for the embedder (REPL) to observe.
pub fn compile_script(
    stmts: &[StmtS],
    ctx: &mut CompileCtx,
    keep_last_value: bool,
) -> CompileResult<Code> {
    let mut code = Code::new();
    let mut compiler = Compiler { ctx };
    let last_exec = stmts
        .iter()
        .rposition(|s| !matches!(s.0, Stmt::Def(_) | Stmt::Class(_) | Stmt::Using { .. }));
    for (i, stmt) in stmts.iter().enumerate() {
        if matches!(stmt.0, Stmt::Def(_) | Stmt::Class(_) | Stmt::Using { .. }) {
            continue;
        }
        if keep_last_value && Some(i) == last_exec {
            if let Stmt::Expr(e) = &stmt.0 {
                compiler.emit_expr(e, &mut code)?;
                continue;
            }
        }
        compiler.emit_stmt(stmt, &mut code)?;
    }
    code.emit(I::Halt);
    Ok(code)
}

struct Compiler<'a> {
    ctx: &'a mut CompileCtx,
}

impl Compiler<'_> {
    fn emit_block(&mut self, block: &[StmtS], code: &mut Code) -> CompileResult<()> {
        for stmt in block {
            self.emit_stmt(stmt, code)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &StmtS, code: &mut Code) -> CompileResult<()> {
        let (node, span) = stmt;
        match node {
            Stmt::Expr(e) => {
                self.emit_expr(e, code)?;
                code.emit(I::Pop);
                Ok(())
            }
            Stmt::Assign { target, value } => {
                self.emit_expr(value, code)?;
                match &target.0 {
                    Expr::Name(name) => self.emit_store_name(name, &target.1, code),
                    Expr::Dot { object, field } => {
                        self.emit_expr(object, code)?;
                        let sid = self.ctx.strings.intern(field.clone());
                        code.emit(I::SConst(sid));
                        code.emit(I::DotSet);
                        Ok(())
                    }
                    Expr::Index { object, index } => {
                        self.emit_expr(object, code)?;
                        self.emit_expr(index, code)?;
                        code.emit(I::ArraySet);
                        Ok(())
                    }
                    _ => err("invalid assignment target", &target.1),
                }
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => self.emit_expr(e, code)?,
                    None => {
                        code.emit(I::Nil);
                    }
                }
                code.emit(I::Ret);
                Ok(())
            }
            Stmt::If {
                condition,
                then_block,
                elif_blocks,
                else_block,
            } => {
                // the false branch of each condition targets the next
                // condition (or else/end); every block's closing jump
                // targets the overall end
                let mut end_jumps = Vec::new();

                self.emit_expr(condition, code)?;
                let mut pending_false = code.emit(I::Brf(0));
                self.emit_block(then_block, code)?;
                end_jumps.push(code.emit(I::Br(0)));

                for (cond, block) in elif_blocks {
                    patch(code, pending_false, code.len());
                    self.emit_expr(cond, code)?;
                    pending_false = code.emit(I::Brf(0));
                    self.emit_block(block, code)?;
                    end_jumps.push(code.emit(I::Br(0)));
                }

                patch(code, pending_false, code.len());
                if let Some(block) = else_block {
                    self.emit_block(block, code)?;
                }

                let end = code.len();
                for jump in end_jumps {
                    patch(code, jump, end);
                }
                Ok(())
            }
            Stmt::While { condition, body } => {
                let loop_start = code.len();
                self.emit_expr(condition, code)?;
                let exit = code.emit(I::Brf(0));
                self.emit_block(body, code)?;
                code.emit(I::Br(loop_start as u32));
                patch(code, exit, code.len());
                Ok(())
            }
            Stmt::Def(_) | Stmt::Class(_) | Stmt::Using { .. } => {
                // the resolver rejects these in function bodies and the
                // interpreter consumes them at unit level
                err("declaration not allowed here", span)
            }
        }
    }

    fn emit_expr(&mut self, expr: &ExprS, code: &mut Code) -> CompileResult<()> {
        let (node, span) = expr;
        match node {
            Expr::Literal(lit) => {
                use crate::parser::ast::Literal as L;
                match lit {
                    L::Int(i) => {
                        let idx = self.ctx.ints.intern(*i);
                        code.emit(I::IConst(idx));
                    }
                    L::Float(f) => {
                        let idx = self.ctx.floats.intern(*f);
                        code.emit(I::FConst(idx));
                    }
                    L::Str(s) => {
                        let idx = self.ctx.strings.intern(s.clone());
                        code.emit(I::SConst(idx));
                    }
                    L::Bool(true) => {
                        code.emit(I::True);
                    }
                    L::Bool(false) => {
                        code.emit(I::False);
                    }
                    L::None => {
                        code.emit(I::Nil);
                    }
                }
                Ok(())
            }
            Expr::Name(name) => self.emit_load_name(name, span, code),
            Expr::Unary { op, expr } => {
                self.emit_expr(expr, code)?;
                match op {
                    UnaryOp::Not => code.emit(I::Not),
                    UnaryOp::Negate => code.emit(I::Neg),
                };
                Ok(())
            }
            Expr::Binary { op, left, right } => {
                self.emit_expr(left, code)?;
                self.emit_expr(right, code)?;
                code.emit(match op {
                    BinaryOp::Add => I::Add,
                    BinaryOp::Subtract => I::Sub,
                    BinaryOp::Multiply => I::Mul,
                    BinaryOp::Divide => I::Div,
                    BinaryOp::Modulo => I::Mod,
                    BinaryOp::Equal => I::Eq,
                    BinaryOp::NotEqual => I::Neq,
                    BinaryOp::Less => I::Lt,
                    BinaryOp::LessEqual => I::Le,
                    BinaryOp::Greater => I::Gt,
                    BinaryOp::GreaterEqual => I::Ge,
                });
                Ok(())
            }
            // both operands always evaluate; reduction happens in one
            // boolean instruction
            Expr::AndLogic { left, right } => {
                self.emit_expr(left, code)?;
                self.emit_expr(right, code)?;
                code.emit(I::And);
                Ok(())
            }
            Expr::OrLogic { left, right } => {
                self.emit_expr(left, code)?;
                self.emit_expr(right, code)?;
                code.emit(I::Or);
                Ok(())
            }
            Expr::Call { callee, args } => {
                self.emit_expr(callee, code)?;
                self.emit_call_args(args, span, code)
            }
            Expr::Dot { object, field } => {
                self.emit_expr(object, code)?;
                let sid = self.ctx.strings.intern(field.clone());
                code.emit(I::SConst(sid));
                code.emit(I::DotGet);
                Ok(())
            }
            Expr::Index { object, index } => {
                self.emit_expr(object, code)?;
                self.emit_expr(index, code)?;
                code.emit(I::ArrayGet);
                Ok(())
            }
            Expr::Array(elems) => {
                if elems.len() > u16::MAX as usize {
                    return err("array literal too long", span);
                }
                for e in elems {
                    self.emit_expr(e, code)?;
                }
                code.emit(I::ArrayGen(elems.len() as u16));
                Ok(())
            }
            Expr::Lambda(decl) => {
                let idx = decl.lamb_index.get();
                if idx < 0 {
                    return err("closure was not registered by the resolver", span);
                }
                code.emit(I::Closure(idx as u32));
                Ok(())
            }
            Expr::New { class, args } => {
                self.emit_load_name(class, span, code)?;
                code.emit(I::New);
                self.emit_call_args(args, span, code)?;
                // the initializer's result is discarded; the instance
                // pushed by New remains as the expression value
                code.emit(I::Pop);
                Ok(())
            }
        }
    }

    /// Arguments are pushed in reverse so the callee pops them back in
    /// source order.
    fn emit_call_args(
        &mut self,
        args: &[ExprS],
        span: &Span,
        code: &mut Code,
    ) -> CompileResult<()> {
        if args.len() > u8::MAX as usize {
            return err("too many call arguments", span);
        }
        for arg in args.iter().rev() {
            self.emit_expr(arg, code)?;
        }
        code.emit(I::Call(args.len() as u8));
        Ok(())
    }

    fn emit_load_name(
        &mut self,
        name: &NameRef,
        span: &Span,
        code: &mut Code,
    ) -> CompileResult<()> {
        match self.storage_of(name, span)? {
            Storage::Local(slot) => code.emit(I::Load(slot)),
            Storage::Global => {
                let idx = code.name_index(&name.name);
                code.emit(I::GLoad(idx))
            }
            Storage::Closure(slot) => code.emit(I::CLoad(slot)),
        };
        Ok(())
    }

    fn emit_store_name(
        &mut self,
        name: &NameRef,
        span: &Span,
        code: &mut Code,
    ) -> CompileResult<()> {
        match self.storage_of(name, span)? {
            Storage::Local(slot) => code.emit(I::Store(slot)),
            Storage::Global => {
                let idx = code.name_index(&name.name);
                code.emit(I::GStore(idx))
            }
            Storage::Closure(slot) => code.emit(I::CStore(slot)),
        };
        Ok(())
    }

    fn storage_of(&self, name: &NameRef, span: &Span) -> CompileResult<Storage> {
        let slot = name.slot.get();
        if slot == UNRESOLVED {
            return err(
                format!("name '{}' was not resolved before compilation", name.name),
                span,
            );
        }
        Ok(if slot >= 0 {
            Storage::Local(slot as u16)
        } else if slot == GLOBAL_SLOT {
            Storage::Global
        } else {
            Storage::Closure(closure_slot(slot) as u16)
        })
    }
}

enum Storage {
    Local(u16),
    Global,
    Closure(u16),
}

fn patch(code: &mut Code, at: usize, target: usize) {
    match &mut code.ins[at] {
        I::Br(t) | I::Brt(t) | I::Brf(t) => *t = target as u32,
        other => unreachable!("patching a non-branch instruction {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve_unit;

    /// Parse + resolve a single `def`, then compile its body.
    fn compile_def(source: &str) -> (Code, CompileCtx) {
        let stmts = crate::parse_source(source).expect("parse failed");
        let mut ctx = CompileCtx::new();
        resolve_unit(&stmts, &mut ctx, &[]).expect("resolve failed");
        for (s, _) in &stmts {
            if let Stmt::Def(decl) = s {
                let code = compile_function(decl, &mut ctx).expect("compile failed");
                return (code, ctx);
            }
        }
        panic!("no def in source");
    }

    fn compile_top(source: &str) -> (Code, CompileCtx) {
        let stmts = crate::parse_source(source).expect("parse failed");
        let mut ctx = CompileCtx::new();
        resolve_unit(&stmts, &mut ctx, &[]).expect("resolve failed");
        let code = compile_script(&stmts, &mut ctx, false).expect("compile failed");
        (code, ctx)
    }

    #[test]
    fn test_body_ends_with_nil() {
        let (code, _) = compile_def("def f() { 1 }\n");
        assert_eq!(code.ins.last(), Some(&I::Nil));
    }

    #[test]
    fn test_return_emits_ret() {
        let (code, _) = compile_def("def f(x) { return x }\n");
        assert_eq!(code.ins[0], I::Load(0));
        assert_eq!(code.ins[1], I::Ret);
    }

    #[test]
    fn test_operands_left_then_right() {
        let (code, ctx) = compile_def("def f(a, b) { return a - b }\n");
        assert_eq!(code.ins[0], I::Load(0));
        assert_eq!(code.ins[1], I::Load(1));
        assert_eq!(code.ins[2], I::Sub);
        let _ = ctx;
    }

    #[test]
    fn test_call_args_reversed() {
        let (code, _) = compile_def("def f(g) { return g(1, 2) }\n");
        // callee first, then args reversed: 2, 1
        assert_eq!(code.ins[0], I::Load(0));
        assert!(matches!(code.ins[1], I::IConst(_)));
        assert!(matches!(code.ins[2], I::IConst(_)));
        assert_eq!(code.ins[3], I::Call(2));
        let (code2, ctx) = compile_def("def f(g) { return g(7, 8) }\n");
        if let (I::IConst(first), I::IConst(second)) = (code2.ins[1], code2.ins[2]) {
            assert_eq!(*ctx.ints.get(first), 8);
            assert_eq!(*ctx.ints.get(second), 7);
        } else {
            panic!("expected two int constants");
        }
    }

    #[test]
    fn test_global_store_uses_name_table() {
        let (code, _) = compile_top("x = 1\n");
        assert!(matches!(code.ins[0], I::IConst(_)));
        if let I::GStore(idx) = code.ins[1] {
            assert_eq!(code.name(idx), "x");
        } else {
            panic!("expected GStore, got {:?}", code.ins[1]);
        }
        assert_eq!(code.ins.last(), Some(&I::Halt));
    }

    #[test]
    fn test_if_elif_else_patching() {
        let (code, _) = compile_def(
            "def f(x) { if x == 1 { return 10 } elif x == 2 { return 20 } else { return 30 } }\n",
        );
        // find the two Brf placeholders; each must target the offset
        // right after its block's closing Br
        let brfs: Vec<(usize, u32)> = code
            .ins
            .iter()
            .enumerate()
            .filter_map(|(i, ins)| match ins {
                I::Brf(t) => Some((i, *t)),
                _ => None,
            })
            .collect();
        assert_eq!(brfs.len(), 2);
        for (at, target) in &brfs {
            assert!(*target as usize > *at);
            assert!(matches!(code.ins[*target as usize - 1], I::Br(_)));
        }
        // every end jump lands on the same final offset
        let end_targets: Vec<u32> = code
            .ins
            .iter()
            .filter_map(|ins| match ins {
                I::Br(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert!(end_targets.iter().all(|t| *t == end_targets[0]));
        assert_eq!(end_targets[0] as usize, code.len() - 1); // before the closing Nil
    }

    #[test]
    fn test_while_loops_back_to_condition() {
        let (code, _) = compile_def("def f(n) { while n > 0 { n = n - 1 } }\n");
        // last body instruction jumps back to offset 0 (the condition)
        let back = code
            .ins
            .iter()
            .find_map(|ins| match ins {
                I::Br(t) => Some(*t),
                _ => None,
            })
            .expect("no back jump");
        assert_eq!(back, 0);
        // the exit branch targets the instruction after the loop
        if let Some(I::Brf(t)) = code.ins.iter().find(|i| matches!(i, I::Brf(_))) {
            assert!(matches!(code.ins[*t as usize], I::Nil));
        } else {
            panic!("no exit branch");
        }
    }

    #[test]
    fn test_dot_assign_shape() {
        let (code, ctx) = compile_def("def f(p) { p.x = 1 }\n");
        // value, receiver, name, DotSet
        assert!(matches!(code.ins[0], I::IConst(_)));
        assert_eq!(code.ins[1], I::Load(0));
        if let I::SConst(s) = code.ins[2] {
            assert_eq!(ctx.strings.get(s), "x");
        } else {
            panic!("expected field name push");
        }
        assert_eq!(code.ins[3], I::DotSet);
    }

    #[test]
    fn test_index_assign_shape() {
        let (code, _) = compile_def("def f(a, i) { a[i] = 0 }\n");
        assert!(matches!(code.ins[0], I::IConst(_)));
        assert_eq!(code.ins[1], I::Load(0));
        assert_eq!(code.ins[2], I::Load(1));
        assert_eq!(code.ins[3], I::ArraySet);
    }

    #[test]
    fn test_array_literal_in_source_order() {
        let (code, _) = compile_def("def f() { return [1, 2, 3] }\n");
        assert!(matches!(code.ins[0], I::IConst(_)));
        assert!(matches!(code.ins[1], I::IConst(_)));
        assert!(matches!(code.ins[2], I::IConst(_)));
        assert_eq!(code.ins[3], I::ArrayGen(3));
    }

    #[test]
    fn test_and_or_compile_both_operands() {
        let (code, _) = compile_def("def f(a, b) { return a and b }\n");
        assert_eq!(code.ins[0], I::Load(0));
        assert_eq!(code.ins[1], I::Load(1));
        assert_eq!(code.ins[2], I::And);
    }

    #[test]
    fn test_new_emits_call_then_pop() {
        let (code, _) = compile_top("class C { def init() { } }\nc = new C()\n");
        let new_at = code
            .ins
            .iter()
            .position(|i| matches!(i, I::New))
            .expect("no New instruction");
        assert!(matches!(code.ins[new_at - 1], I::GLoad(_)));
        assert_eq!(code.ins[new_at + 1], I::Call(0));
        assert_eq!(code.ins[new_at + 2], I::Pop);
    }

    #[test]
    fn test_constants_deduplicated_across_functions() {
        let stmts = crate::parse_source("def f() { return 7 }\ndef g() { return 7 }\n").unwrap();
        let mut ctx = CompileCtx::new();
        resolve_unit(&stmts, &mut ctx, &[]).unwrap();
        for (s, _) in &stmts {
            if let Stmt::Def(decl) = s {
                compile_function(decl, &mut ctx).unwrap();
            }
        }
        assert_eq!(ctx.ints.len(), 1);
    }
}
