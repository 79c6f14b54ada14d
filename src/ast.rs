//! Program tree handed from the front end to the code generator.
//!
//! The code generator assumes the tree already passed semantic checking:
//! every name it references exists and every expression is well typed.

use std::fmt::{Display, Formatter, Result as FmtResult};

#[derive(Debug, Default, PartialEq, Clone)]
pub struct Program {
    pub structs: Vec<StructDef>,
    pub functions: Vec<FunDef>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<VarDef>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FunDef {
    pub return_type: DataType,
    pub name: String,
    pub params: Vec<VarDef>,
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct VarDef {
    pub data_type: DataType,
    pub name: String,
}

impl VarDef {
    pub fn new(data_type: DataType, name: impl Into<String>) -> Self {
        Self {
            data_type,
            name: name.into(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Shape {
    Scalar,
    Array,
    List,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum TypeName {
    Int,
    Double,
    Bool,
    String,
    Void,
    Struct(String),
}

impl Display for TypeName {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            TypeName::Int => write!(f, "int"),
            TypeName::Double => write!(f, "double"),
            TypeName::Bool => write!(f, "bool"),
            TypeName::String => write!(f, "string"),
            TypeName::Void => write!(f, "void"),
            TypeName::Struct(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DataType {
    pub shape: Shape,
    pub name: TypeName,
}

impl DataType {
    pub fn scalar(name: TypeName) -> Self {
        Self {
            shape: Shape::Scalar,
            name,
        }
    }

    pub fn array(name: TypeName) -> Self {
        Self {
            shape: Shape::Array,
            name,
        }
    }

    pub fn list(name: TypeName) -> Self {
        Self {
            shape: Shape::List,
            name,
        }
    }

    pub fn is_void(&self) -> bool {
        self.shape == Shape::Scalar && self.name == TypeName::Void
    }

    pub fn is_list(&self) -> bool {
        self.shape == Shape::List
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self.shape {
            Shape::Scalar => write!(f, "{}", self.name),
            Shape::Array => write!(f, "array {}", self.name),
            Shape::List => write!(f, "list {}", self.name),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    VarDecl(VarDef, Option<Expression>),
    Assign(Vec<VarRef>, Expression),
    /// `path.append(e)`, `path.clear()`, `path.pop()`; the path names the list.
    ListFunction(Vec<VarRef>, ListFunction),
    While(Expression, Vec<Statement>),
    For(ForLoop),
    If(IfStatement),
    Return(Expression),
    Call(CallExpression),
}

#[derive(Debug, PartialEq, Clone)]
pub enum ListFunction {
    Append(Expression),
    Clear,
    Pop,
}

#[derive(Debug, PartialEq, Clone)]
pub struct ForLoop {
    pub init: VarDef,
    pub init_value: Option<Expression>,
    pub condition: Expression,
    pub update: (Vec<VarRef>, Expression),
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Branch {
    pub condition: Expression,
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct IfStatement {
    pub if_part: Branch,
    pub else_ifs: Vec<Branch>,
    pub else_body: Option<Vec<Statement>>,
}

/// One step of a path such as `a[0].b.c[i]`.
#[derive(Debug, PartialEq, Clone)]
pub struct VarRef {
    pub name: String,
    pub index: Option<Expression>,
}

impl VarRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    pub fn indexed(name: impl Into<String>, index: Expression) -> Self {
        Self {
            name: name.into(),
            index: Some(index),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct CallExpression {
    pub name: String,
    pub args: Vec<Expression>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Literal(Literal),
    Path(Vec<VarRef>),
    Call(CallExpression),
    NewStruct(String, Vec<Expression>),
    NewArray(TypeName, Box<Expression>),
    /// `path.max()` / `path.min()`.
    ListQuery(Vec<VarRef>, Extremum),
    Not(Box<Expression>),
    Binary(Box<Expression>, Operator, Box<Expression>),
}

impl Expression {
    pub fn binary(left: Expression, operator: Operator, right: Expression) -> Self {
        Expression::Binary(Box::new(left), operator, Box::new(right))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expression::Path(vec![VarRef::named(name)])
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call(CallExpression {
            name: name.into(),
            args,
        })
    }
}

impl From<Literal> for Expression {
    fn from(literal: Literal) -> Self {
        Expression::Literal(literal)
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Extremum {
    Max,
    Min,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Literal {
    Integer(i64),
    Double(f64),
    Bool(bool),
    String(String),
    Null,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
    Or,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let operator = match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
        };
        write!(f, "{}", operator)
    }
}
