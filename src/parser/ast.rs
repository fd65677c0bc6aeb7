use crate::types::Span;
use std::cell::Cell;
use std::rc::Rc;

pub type ExprS = (Expr, Span);
pub type StmtS = (Stmt, Span);

/// Slot annotation before the resolver pass has run.
pub const UNRESOLVED: i32 = i32::MIN;

/// An identifier reference. The resolver writes the storage class into
/// `slot` exactly once: `>= 0` is a local slot, `-1` is global, `<= -2`
/// encodes a slot in the enclosing function (`slot = -2 - encoded`).
#[derive(Debug, Clone)]
pub struct NameRef {
    pub name: String,
    pub slot: Cell<i32>,
}

impl NameRef {
    pub fn new(name: String) -> Self {
        Self {
            name,
            slot: Cell::new(UNRESOLVED),
        }
    }
}

/// Shared declaration node for `def` functions, class methods and
/// `lamb` closures. `name` is `None` for closures. `num_locals` and
/// `lamb_index` are filled in by the resolver.
#[derive(Debug)]
pub struct FuncDecl {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<StmtS>,
    pub num_locals: Cell<usize>,
    pub lamb_index: Cell<i32>,
}

impl FuncDecl {
    pub fn new(name: Option<String>, params: Vec<String>, body: Vec<StmtS>) -> Self {
        Self {
            name,
            params,
            body,
            num_locals: Cell::new(0),
            lamb_index: Cell::new(-1),
        }
    }
}

#[derive(Debug)]
pub struct ClassDecl {
    pub name: String,
    pub superclass: Option<String>,
    pub methods: Vec<(Rc<FuncDecl>, Span)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Name(NameRef),
    Unary {
        op: UnaryOp,
        expr: Box<ExprS>,
    },
    Binary {
        op: BinaryOp,
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    /// `and`/`or` keep their own nodes: they are not ordinary binary
    /// operators at compile time (both operands always evaluate, then a
    /// boolean instruction reduces them).
    AndLogic {
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    OrLogic {
        left: Box<ExprS>,
        right: Box<ExprS>,
    },
    Call {
        callee: Box<ExprS>,
        args: Vec<ExprS>,
    },
    Dot {
        object: Box<ExprS>,
        field: String,
    },
    Index {
        object: Box<ExprS>,
        index: Box<ExprS>,
    },
    Array(Vec<ExprS>),
    Lambda(Rc<FuncDecl>),
    New {
        class: NameRef,
        args: Vec<ExprS>,
    },
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(ExprS),
    Assign {
        target: ExprS,
        value: ExprS,
    },
    If {
        condition: ExprS,
        then_block: Vec<StmtS>,
        elif_blocks: Vec<(ExprS, Vec<StmtS>)>,
        else_block: Option<Vec<StmtS>>,
    },
    While {
        condition: ExprS,
        body: Vec<StmtS>,
    },
    Return(Option<ExprS>),
    Def(Rc<FuncDecl>),
    Class(Rc<ClassDecl>),
    Using {
        path: String,
    },
}
