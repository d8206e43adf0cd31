use std::fmt;

use crate::lexer::Span;


/// A named type. `reference` marks an expression that denotes an assignable
/// storage location rather than a value; it decays through a `Cast`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub name: String,
    pub reference: bool,
}

impl Type {
    pub fn named(name: &str) -> Type {
        Type { name: name.to_string(), reference: false }
    }
    pub fn i32() -> Type    { Type::named("i32") }
    pub fn bool() -> Type   { Type::named("bool") }
    pub fn string() -> Type { Type::named("string") }
    pub fn void() -> Type   { Type::named("void") }

    pub fn unref_eq(&self, other: &Type) -> bool {
        self.name == other.name
    }

    pub fn add_reference(&self) -> Type {
        Type { name: self.name.clone(), reference: true }
    }

    pub fn remove_reference(&self) -> Type {
        Type { name: self.name.clone(), reference: false }
    }

    pub fn is_void(&self) -> bool {
        self.name == "void"
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reference {
            write!(f, "{}&", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub ty: Type,
    pub name: String,
}

impl Variable {
    pub fn new(name: &str, ty: Type) -> Variable {
        Variable { ty, name: name.to_string() }
    }
}

/// Variables in the order the type checker encountered their declarations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scope {
    pub variables: Vec<Variable>,
}

impl Scope {
    pub fn find(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum BinOp {
    Plus,
    Minus,
    Times,
    Eq,
    NotEq,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Times => "*",
            BinOp::Eq => "==",
            BinOp::NotEq => "!=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Eq | BinOp::NotEq)
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

impl UnOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "!",
            UnOp::BitNot => "~",
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    Bool(bool),
    Int(i32),
    Str(String),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Declaration(Variable),
    Variable(String),
    Assignment(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    UnOp(UnOp, Box<Expr>),
    // only ever inserted by the type checker
    Cast(Box<Expr>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub value_type: Option<Type>,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Expr {
        Expr { kind, value_type: None, span }
    }

    pub fn number(i: i32) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Int(i)), Span::default())
    }
    pub fn boolean(b: bool) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Bool(b)), Span::default())
    }
    pub fn string(s: &str) -> Expr {
        Expr::new(ExprKind::Literal(Literal::Str(s.to_string())), Span::default())
    }
    pub fn var(name: &str) -> Expr {
        Expr::new(ExprKind::Variable(name.to_string()), Span::default())
    }
    pub fn declare(name: &str, ty: Type) -> Expr {
        Expr::new(ExprKind::Declaration(Variable::new(name, ty)), Span::default())
    }
    pub fn assign(lhs: Expr, rhs: Expr) -> Expr {
        let span = lhs.span.to(rhs.span);
        Expr::new(ExprKind::Assignment(Box::new(lhs), Box::new(rhs)), span)
    }
    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::new(ExprKind::Call(name.to_string(), args), Span::default())
    }
    pub fn binop(op: BinOp, l: Expr, r: Expr) -> Expr {
        let span = l.span.to(r.span);
        Expr::new(ExprKind::BinOp(op, Box::new(l), Box::new(r)), span)
    }
    pub fn unop(op: UnOp, e: Expr) -> Expr {
        Expr::new(ExprKind::UnOp(op, Box::new(e)), Span::default())
    }

    pub fn with_span(mut self, span: Span) -> Expr {
        self.span = span;
        self
    }

    /// Operands in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Declaration(_) | ExprKind::Variable(_) => vec![],
            ExprKind::Assignment(lhs, rhs) => vec![rhs, lhs],
            ExprKind::Call(_, args) => args.iter().collect(),
            ExprKind::BinOp(_, l, r) => vec![l, r],
            ExprKind::UnOp(_, e) | ExprKind::Cast(e) => vec![e],
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(Literal::Bool(b)) => write!(f, "{}", b),
            ExprKind::Literal(Literal::Int(i)) => write!(f, "{}", i),
            ExprKind::Literal(Literal::Str(s)) => write!(f, "{:?}", s),
            ExprKind::Declaration(v) => write!(f, "(var {}: {})", v.name, v.ty),
            ExprKind::Variable(name) => write!(f, "{}", name),
            ExprKind::Assignment(lhs, rhs) => write!(f, "(= {} {})", lhs, rhs),
            ExprKind::Call(name, args) => {
                write!(f, "(call {}", name)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                write!(f, ")")
            }
            ExprKind::BinOp(op, l, r) => write!(f, "({} {} {})", op.symbol(), l, r),
            ExprKind::UnOp(op, e) => write!(f, "({} {})", op.symbol(), e),
            ExprKind::Cast(e) => write!(f, "(cast {})", e),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum StmtKind {
    Expression(Expr),
    Return(Option<Expr>),
    If {
        cond: Expr,
        body: Vec<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    // a plain block, only found as the else branch of an `if`
    Else(Vec<Stmt>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Stmt {
        Stmt { kind, span }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Function {
    pub return_type: Type,
    pub name: String,
    pub arguments: Vec<Variable>,
    pub scope: Scope,
    pub statements: Vec<Stmt>,
    pub builtin: bool,
    pub span: Span,
}

impl Function {
    pub fn find_variable(&self, name: &str) -> Option<&Variable> {
        self.scope.find(name)
            .or_else(|| self.arguments.iter().find(|v| v.name == name))
    }
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub functions: Vec<Function>,
    pub file_name: Option<String>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
