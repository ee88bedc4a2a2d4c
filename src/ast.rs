//! Abstract Syntax Tree for Paw
//!
//! The tree is a strict tree: every sub-expression is owned exclusively
//! by its parent (spec §3), so ordinary `Box`/`Vec` ownership is
//! sufficient and no arena or cyclic parent pointers are required (see
//! `DESIGN.md`'s note on AST node ownership).

use crate::types::Type;
use std::path::PathBuf;

/// Source location for error reporting and tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: PathBuf, line: usize, column: usize) -> Self {
        SourceLocation { file, line, column }
    }
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line + 1, self.column + 1)
    }
}

/// Source span for a single token or expression.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub length: usize,
}

impl Span {
    pub fn new(line: usize, column: usize, length: usize) -> Self {
        Span { line, column, length }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompoundOp {
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
}

/// A field initializer in `struct_init`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub name: String,
    pub value: Expr,
}

/// One alternating chunk of a string interpolation: either literal text
/// or a re-parsed expression from a `${...}` slot (spec §4.2).
#[derive(Debug, Clone, PartialEq)]
pub enum InterpPart {
    Literal(String),
    Expr(Expr),
}

/// A pattern appearing in an `is` arm (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Identifier(String),
    Variant { name: String, bindings: Vec<String> },
    Literal(Box<Expr>),
    Wildcard,
}

/// One arm of an `is` expression: `pattern [if guard] => body`.
#[derive(Debug, Clone, PartialEq)]
pub struct IsArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    CharLiteral(char),
    BoolLiteral(bool),

    Identifier(String),

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        type_args: Vec<Type>,
        span: Span,
    },
    StaticMethodCall {
        type_name: String,
        type_args: Vec<Type>,
        method_name: String,
        args: Vec<Expr>,
        span: Span,
    },
    FieldAccess {
        object: Box<Expr>,
        field: String,
        span: Span,
    },
    StructInit {
        type_name: String,
        type_args: Vec<Type>,
        fields: Vec<FieldInit>,
        span: Span,
    },
    EnumVariant {
        enum_name: Option<String>,
        variant: String,
        args: Vec<Expr>,
        span: Span,
    },

    Block(Vec<Stmt>),
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
        span: Span,
    },
    Is {
        value: Box<Expr>,
        arms: Vec<IsArm>,
        span: Span,
    },
    As {
        value: Box<Expr>,
        target_type: Type,
        span: Span,
    },
    Await {
        value: Box<Expr>,
        span: Span,
    },

    ArrayLiteral {
        elements: Vec<Expr>,
        span: Span,
    },
    ArrayIndex {
        array: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
        span: Span,
    },
    StringInterp {
        parts: Vec<InterpPart>,
        span: Span,
    },
    Try {
        value: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    /// Best-effort span for diagnostics; literal/identifier nodes that
    /// predate span tracking fall back to a zeroed span.
    pub fn span(&self) -> Span {
        match self {
            Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::StaticMethodCall { span, .. }
            | Expr::FieldAccess { span, .. }
            | Expr::StructInit { span, .. }
            | Expr::EnumVariant { span, .. }
            | Expr::If { span, .. }
            | Expr::Is { span, .. }
            | Expr::As { span, .. }
            | Expr::Await { span, .. }
            | Expr::ArrayLiteral { span, .. }
            | Expr::ArrayIndex { span, .. }
            | Expr::Range { span, .. }
            | Expr::StringInterp { span, .. }
            | Expr::Try { span, .. } => *span,
            _ => Span::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Let {
        name: String,
        is_mut: bool,
        type_ann: Option<Type>,
        init: Option<Expr>,
        span: Span,
    },
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },
    CompoundAssign {
        target: Expr,
        op: CompoundOp,
        value: Expr,
        span: Span,
    },
    Return(Option<Expr>, Span),
    Break(Option<Expr>, Span),
    Continue(Span),

    /// Unified `loop` form (spec §4.2): `cond` xor `iterator` may be
    /// present; neither present means an infinite loop.
    Loop {
        cond: Option<Expr>,
        iterator: Option<(String, Expr)>,
        body: Vec<Stmt>,
        span: Span,
    },
    /// Legacy alias kept for AST drafts that still emit a plain
    /// `while`-shaped loop; lowered identically to `Loop { cond: Some(_), .. }`.
    WhileLoop {
        cond: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    /// Legacy alias for the iterator form of `loop`.
    ForLoop {
        binding: String,
        iterable: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_ann: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub is_public: bool,
    /// Present when this function is a method (`self` receiver) on a type.
    pub self_type: Option<String>,
    pub source: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_ann: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariantDecl {
    pub name: String,
    pub fields: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitMethodSig {
    pub name: String,
    pub params: Vec<Type>,
    pub return_type: Type,
}

/// Discriminates what kind of nominal type a `type_decl` introduces
/// (spec §3, `type_decl { name, type_params, kind, is_public }`).
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDeclKind {
    Struct {
        fields: Vec<FieldDecl>,
        methods: Vec<FunctionDecl>,
    },
    Enum {
        variants: Vec<EnumVariantDecl>,
        methods: Vec<FunctionDecl>,
    },
    Trait {
        methods: Vec<TraitMethodSig>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub kind: TypeDeclKind,
    pub is_public: bool,
    pub source: Option<SourceLocation>,
}

/// Legacy declaration shapes kept alongside `TypeDecl` per spec §3's
/// "union of behaviors actually used by any backend" (design note on
/// duplicate AST drafts): `impl_decl` attaches methods to an
/// already-declared struct/enum, and `import_decl` records a module
/// reference for the (out-of-scope) resolver to consume.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplDecl {
    pub type_name: String,
    pub trait_name: Option<String>,
    pub methods: Vec<FunctionDecl>,
    pub source: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub path: String,
    pub source: Option<SourceLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Function(FunctionDecl),
    TypeDecl(TypeDecl),
    Impl(ImplDecl),
    Import(ImportDecl),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn find_function(&self, name: &str) -> Option<&FunctionDecl> {
        self.declarations.iter().find_map(|d| match d {
            Declaration::Function(f) if f.name == name => Some(f),
            _ => None,
        })
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeDecl> {
        self.declarations.iter().find_map(|d| match d {
            Declaration::TypeDecl(t) if t.name == name => Some(t),
            _ => None,
        })
    }

    /// Maps every enum variant name to its owning enum, used to resolve
    /// bare `V(args)` constructor calls at typing time (spec §9,
    /// "enum-constructor name aliasing").
    pub fn variant_owners(&self) -> std::collections::HashMap<String, String> {
        let mut map = std::collections::HashMap::new();
        for decl in &self.declarations {
            if let Declaration::TypeDecl(TypeDecl {
                name,
                kind: TypeDeclKind::Enum { variants, .. },
                ..
            }) = decl
            {
                for variant in variants {
                    map.entry(variant.name.clone()).or_insert_with(|| name.clone());
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntWidth;

    fn dummy_span() -> Span {
        Span::new(0, 0, 0)
    }

    #[test]
    fn program_finds_declared_function() {
        let program = Program {
            declarations: vec![Declaration::Function(FunctionDecl {
                name: "main".to_string(),
                type_params: vec![],
                params: vec![],
                return_type: Type::Int(IntWidth::I32),
                body: vec![],
                is_async: false,
                is_public: false,
                self_type: None,
                source: None,
            })],
        };
        assert!(program.find_function("main").is_some());
        assert!(program.find_function("missing").is_none());
    }

    #[test]
    fn variant_owners_maps_enum_variants_to_enum_name() {
        let program = Program {
            declarations: vec![Declaration::TypeDecl(TypeDecl {
                name: "Result".to_string(),
                type_params: vec!["T".to_string(), "E".to_string()],
                kind: TypeDeclKind::Enum {
                    variants: vec![
                        EnumVariantDecl {
                            name: "Ok".to_string(),
                            fields: vec![Type::Generic("T".to_string())],
                        },
                        EnumVariantDecl {
                            name: "Err".to_string(),
                            fields: vec![Type::Generic("E".to_string())],
                        },
                    ],
                    methods: vec![],
                },
                is_public: false,
                source: None,
            })],
        };
        let owners = program.variant_owners();
        assert_eq!(owners.get("Ok").map(String::as_str), Some("Result"));
        assert_eq!(owners.get("Err").map(String::as_str), Some("Result"));
    }

    #[test]
    fn loop_stmt_carries_span_for_diagnostics() {
        let stmt = Stmt::Loop {
            cond: None,
            iterator: None,
            body: vec![],
            span: dummy_span(),
        };
        match stmt {
            Stmt::Loop { span, .. } => assert_eq!(span, dummy_span()),
            _ => panic!("expected Loop"),
        }
    }

    #[test]
    fn expr_span_falls_back_to_default_for_literals() {
        assert_eq!(Expr::IntLiteral(1).span(), Span::default());
    }
}
