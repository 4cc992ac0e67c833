//! The Vellum AST.
//!
//! One canonical tree shape for every downstream consumer (code generator,
//! reflector, debugger, evaluator), regardless of surface dialect. Nodes are
//! closed tagged unions so each consumer's match is checked exhaustively, and
//! every node carries its position and the verbatim source text it was built
//! from. Callers receive nodes by value and must not mutate position or
//! source text after receipt.

use serde::{Deserialize, Serialize};

use crate::source::Position;

/// Shared per-node metadata: the span, the verbatim substring it was built
/// from, and any comments associated with the node after the tree is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub position: Position,
    pub source_text: String,
    pub comments: Vec<Comment>,
}

impl NodeMeta {
    pub fn new(position: Position, source_text: impl Into<String>) -> NodeMeta {
        NodeMeta {
            position,
            source_text: source_text.into(),
            comments: Vec::new(),
        }
    }

    /// Metadata for a synthesized node: zero-width span, no source text.
    pub fn synthetic(position: Position) -> NodeMeta {
        NodeMeta {
            position,
            source_text: String::new(),
            comments: Vec::new(),
        }
    }
}

/// A comment harvested from the source. Tag comments (`<!--- --->`) and
/// script comments (`//`, `/* */`) are normalized into this one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub text: String,
    pub position: Position,
    pub source_text: String,
}

/// The root of a parsed template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub statements: Vec<Stmt>,
    pub meta: NodeMeta,
}

/// Statement nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Import(Import),
    Expression(ExprStmt),
    If(If),
    While(While),
    Switch(Switch),
    Try(Try),
    Break(Break),
    Continue(Continue),
    Return(Return),
    Rethrow(Rethrow),
    Function(FunctionDecl),
    Component(Component),
    BufferOutput(BufferOutput),
    ScriptIsland(ScriptIsland),
    Block(Block),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub name: Option<Fqn>,
    pub alias: Option<Identifier>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expression: Expr,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct If {
    pub condition: Expr,
    pub then_body: Box<Stmt>,
    pub else_body: Option<Box<Stmt>>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct While {
    pub label: Option<String>,
    pub condition: Expr,
    pub body: Box<Stmt>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Switch {
    pub expression: Expr,
    pub cases: Vec<SwitchCase>,
    pub meta: NodeMeta,
}

/// One `case`/`defaultcase` arm. A `None` value marks the default case.
/// Case lists reproduce the source structurally: no synthetic breaks are
/// inserted between cases, so fallthrough is visible to the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Option<Expr>,
    pub delimiter: Option<Expr>,
    pub body: Vec<Stmt>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Try {
    pub body: Vec<Stmt>,
    pub catches: Vec<CatchClause>,
    pub finally_body: Vec<Stmt>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub types: Vec<Expr>,
    pub variable: Identifier,
    pub body: Vec<Stmt>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Break {
    pub label: Option<String>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Continue {
    pub label: Option<String>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Return {
    pub expression: Option<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rethrow {
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Public,
    Private,
    Remote,
    Package,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub access: Option<Access>,
    pub name: String,
    pub return_type: Option<String>,
    pub args: Vec<ArgumentDecl>,
    pub annotations: Vec<Attribute>,
    pub body: Vec<Stmt>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDecl {
    pub required: bool,
    pub type_name: String,
    pub name: String,
    pub default: Option<Expr>,
    pub annotations: Vec<Attribute>,
    pub meta: NodeMeta,
}

/// A generic open/close markup construct: name, attributes, and an optional
/// body delimited by a separate close construct.
///
/// `body` is `None` until a matching close populates it; a self-closing
/// component gets an empty populated body so a later close can never claim
/// it. A `None` body on a component whose descriptor requires one is an
/// issue, reported by the builder; the body stays `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub body: Option<Vec<Stmt>>,
    pub requires_body: bool,
    /// Byte offset of the opening tag, kept so the source text can be
    /// extended to the close tag when the body is populated.
    pub source_start: usize,
    pub meta: NodeMeta,
}

/// Literal or interpolated text emitted into the output buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferOutput {
    pub expression: Expr,
    pub meta: NodeMeta,
}

/// Statements embedded via `<vl:script>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptIsland {
    pub statements: Vec<Stmt>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub meta: NodeMeta,
}

/// A markup attribute: `name="value"`, `name=#expr#`, `name=bare`, or a
/// bare flag with no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: Fqn,
    pub value: Expr,
    pub meta: NodeMeta,
}

/// Expression nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    StringLiteral(StringLiteral),
    StringInterpolation(StringInterpolation),
    Number(NumberLiteral),
    Bool(BoolLiteral),
    Null(NullLiteral),
    Identifier(Identifier),
    Fqn(Fqn),
    Array(ArrayLiteral),
    Struct(StructLiteral),
    Unary(Unary),
    Binary(Binary),
    Assign(Assign),
    Call(Call),
    Index(Index),
    Member(Member),
    Closure(Closure),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringLiteral {
    pub value: String,
    pub meta: NodeMeta,
}

/// Ordered sub-expressions concatenated at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringInterpolation {
    pub parts: Vec<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberLiteral {
    pub value: f64,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolLiteral {
    pub value: bool,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullLiteral {
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    pub meta: NodeMeta,
}

/// A dotted fully-qualified name, e.g. `util.text.trim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fqn {
    pub value: String,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayLiteral {
    pub items: Vec<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructLiteral {
    pub entries: Vec<StructEntry>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructEntry {
    pub key: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubtractAssign,
    MultiplyAssign,
    DivideAssign,
    ConcatAssign,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unary {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binary {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assign {
    pub op: AssignOp,
    pub target: Box<Expr>,
    pub value: Box<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub object: Box<Expr>,
    pub index: Box<Expr>,
    pub meta: NodeMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub object: Box<Expr>,
    pub name: String,
    pub meta: NodeMeta,
}

/// A closure. The loop-condition rewrite produces the zero-argument form
/// wrapping a `Return`, deferring evaluation to each iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Box<Stmt>,
    pub meta: NodeMeta,
}

impl Stmt {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Stmt::Import(n) => &n.meta,
            Stmt::Expression(n) => &n.meta,
            Stmt::If(n) => &n.meta,
            Stmt::While(n) => &n.meta,
            Stmt::Switch(n) => &n.meta,
            Stmt::Try(n) => &n.meta,
            Stmt::Break(n) => &n.meta,
            Stmt::Continue(n) => &n.meta,
            Stmt::Return(n) => &n.meta,
            Stmt::Rethrow(n) => &n.meta,
            Stmt::Function(n) => &n.meta,
            Stmt::Component(n) => &n.meta,
            Stmt::BufferOutput(n) => &n.meta,
            Stmt::ScriptIsland(n) => &n.meta,
            Stmt::Block(n) => &n.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Stmt::Import(n) => &mut n.meta,
            Stmt::Expression(n) => &mut n.meta,
            Stmt::If(n) => &mut n.meta,
            Stmt::While(n) => &mut n.meta,
            Stmt::Switch(n) => &mut n.meta,
            Stmt::Try(n) => &mut n.meta,
            Stmt::Break(n) => &mut n.meta,
            Stmt::Continue(n) => &mut n.meta,
            Stmt::Return(n) => &mut n.meta,
            Stmt::Rethrow(n) => &mut n.meta,
            Stmt::Function(n) => &mut n.meta,
            Stmt::Component(n) => &mut n.meta,
            Stmt::BufferOutput(n) => &mut n.meta,
            Stmt::ScriptIsland(n) => &mut n.meta,
            Stmt::Block(n) => &mut n.meta,
        }
    }

    pub fn position(&self) -> &Position {
        &self.meta().position
    }

    pub fn source_text(&self) -> &str {
        &self.meta().source_text
    }
}

impl Expr {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Expr::StringLiteral(n) => &n.meta,
            Expr::StringInterpolation(n) => &n.meta,
            Expr::Number(n) => &n.meta,
            Expr::Bool(n) => &n.meta,
            Expr::Null(n) => &n.meta,
            Expr::Identifier(n) => &n.meta,
            Expr::Fqn(n) => &n.meta,
            Expr::Array(n) => &n.meta,
            Expr::Struct(n) => &n.meta,
            Expr::Unary(n) => &n.meta,
            Expr::Binary(n) => &n.meta,
            Expr::Assign(n) => &n.meta,
            Expr::Call(n) => &n.meta,
            Expr::Index(n) => &n.meta,
            Expr::Member(n) => &n.meta,
            Expr::Closure(n) => &n.meta,
        }
    }

    pub fn position(&self) -> &Position {
        &self.meta().position
    }

    pub fn source_text(&self) -> &str {
        &self.meta().source_text
    }
}

impl Template {
    /// Associate harvested comments with the AST: each comment attaches to
    /// the nearest statement starting at or after it, descending into bodies
    /// when the comment falls inside a statement's span. Comments with no
    /// following statement attach to the root.
    pub fn associate_comments(&mut self, comments: &[Comment]) {
        for comment in comments {
            if !attach_comment(&mut self.statements, comment) {
                self.meta.comments.push(comment.clone());
            }
        }
    }
}

fn attach_comment(statements: &mut [Stmt], comment: &Comment) -> bool {
    for stmt in statements.iter_mut() {
        if comment.position.end <= stmt.position().start {
            stmt.meta_mut().comments.push(comment.clone());
            return true;
        }
        if contains(stmt.position(), &comment.position) {
            if attach_into_children(stmt, comment) {
                return true;
            }
            stmt.meta_mut().comments.push(comment.clone());
            return true;
        }
    }
    false
}

fn attach_into_children(stmt: &mut Stmt, comment: &Comment) -> bool {
    match stmt {
        Stmt::If(n) => {
            if attach_comment(std::slice::from_mut(&mut *n.then_body), comment) {
                return true;
            }
            if let Some(else_body) = n.else_body.as_mut() {
                return attach_comment(std::slice::from_mut(&mut **else_body), comment);
            }
            false
        }
        Stmt::While(n) => attach_comment(std::slice::from_mut(&mut *n.body), comment),
        Stmt::Switch(n) => n
            .cases
            .iter_mut()
            .any(|case| attach_comment(&mut case.body, comment)),
        Stmt::Try(n) => {
            attach_comment(&mut n.body, comment)
                || n.catches
                    .iter_mut()
                    .any(|c| attach_comment(&mut c.body, comment))
                || attach_comment(&mut n.finally_body, comment)
        }
        Stmt::Function(n) => attach_comment(&mut n.body, comment),
        Stmt::Component(n) => n
            .body
            .as_mut()
            .map(|body| attach_comment(body, comment))
            .unwrap_or(false),
        Stmt::ScriptIsland(n) => attach_comment(&mut n.statements, comment),
        Stmt::Block(n) => attach_comment(&mut n.statements, comment),
        _ => false,
    }
}

fn contains(outer: &Position, inner: &Position) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}
