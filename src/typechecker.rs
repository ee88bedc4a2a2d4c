//! Type checker for Paw (spec §4.3)
//!
//! Two passes over the AST: pass A registers every top-level declaration
//! into symbol/type/function tables; pass B walks each declaration body,
//! inferring an expression's `Type` and emitting a [`Diagnostic`] for
//! every violation rather than stopping at the first one.

use crate::ast::*;
use crate::diagnostics::{Diagnostic, DiagnosticSink, TypeError};
use crate::types::Type;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FunctionSig {
    pub params: Vec<Type>,
    pub return_type: Type,
    pub is_async: bool,
}

impl FunctionSig {
    fn from_decl(f: &FunctionDecl) -> Self {
        FunctionSig {
            params: f.params.iter().map(|p| p.type_ann.clone()).collect(),
            return_type: f.return_type.clone(),
            is_async: f.is_async,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StructInfo {
    pub fields: Vec<(String, Type)>,
    pub methods: HashMap<String, FunctionSig>,
}

#[derive(Debug, Clone)]
pub struct EnumInfo {
    pub variants: Vec<(String, Vec<Type>)>,
    pub methods: HashMap<String, FunctionSig>,
}

#[derive(Debug, Clone)]
pub struct TraitInfo {
    pub methods: HashMap<String, FunctionSig>,
}

#[derive(Debug, Clone)]
pub enum TypeInfo {
    Struct(StructInfo),
    Enum(EnumInfo),
    Trait(TraitInfo),
}

impl TypeInfo {
    fn methods(&self) -> &HashMap<String, FunctionSig> {
        match self {
            TypeInfo::Struct(s) => &s.methods,
            TypeInfo::Enum(e) => &e.methods,
            TypeInfo::Trait(t) => &t.methods,
        }
    }
}

/// One lexical scope of local bindings: name -> (type, is_mut).
type Scope = HashMap<String, (Type, bool)>;

/// Pass A + pass B output: the symbol tables codegen consults while
/// lowering the AST (spec §4.4/§4.5 both maintain their own copies of
/// these tables; the type checker's copy is the source of truth).
pub struct TypeTables {
    pub functions: HashMap<String, FunctionSig>,
    pub types: HashMap<String, TypeInfo>,
    pub variant_owners: HashMap<String, String>,
}

pub struct TypeChecker<'a> {
    filename: String,
    program: &'a Program,
    functions: HashMap<String, FunctionSig>,
    types: HashMap<String, TypeInfo>,
    variant_owners: HashMap<String, String>,
    scopes: Vec<Scope>,
    current_return_type: Type,
    current_function_is_async: bool,
    loop_depth: usize,
    diagnostics: DiagnosticSink,
}

impl<'a> TypeChecker<'a> {
    fn new(program: &'a Program, filename: impl Into<String>) -> Self {
        TypeChecker {
            filename: filename.into(),
            program,
            functions: HashMap::new(),
            types: HashMap::new(),
            variant_owners: program.variant_owners(),
            scopes: Vec::new(),
            current_return_type: Type::Void,
            current_function_is_async: false,
            loop_depth: 0,
            diagnostics: DiagnosticSink::new(),
        }
    }

    fn err(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(self.filename.clone(), span.line, span.column, message));
    }

    fn warn(&mut self, span: Span, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::warning(self.filename.clone(), span.line, span.column, message));
    }

    // --- pass A: registration --------------------------------------------------

    fn register_declarations(&mut self) {
        let mut seen_names: HashMap<String, ()> = HashMap::new();
        for decl in &self.program.declarations {
            match decl {
                Declaration::Function(f) => {
                    if self.functions.contains_key(&f.name) {
                        self.err(
                            f.source.as_ref().map(|s| Span::new(s.line, s.column, 1)).unwrap_or_default(),
                            format!("duplicate declaration of function '{}'", f.name),
                        );
                    }
                    self.functions.insert(f.name.clone(), FunctionSig::from_decl(f));
                }
                Declaration::TypeDecl(t) => {
                    if seen_names.insert(t.name.clone(), ()).is_some() {
                        self.err(
                            t.source.as_ref().map(|s| Span::new(s.line, s.column, 1)).unwrap_or_default(),
                            format!("duplicate declaration of type '{}'", t.name),
                        );
                    }
                    let info = match &t.kind {
                        TypeDeclKind::Struct { fields, methods } => TypeInfo::Struct(StructInfo {
                            fields: fields.iter().map(|f| (f.name.clone(), f.type_ann.clone())).collect(),
                            methods: methods.iter().map(|m| (m.name.clone(), FunctionSig::from_decl(m))).collect(),
                        }),
                        TypeDeclKind::Enum { variants, methods } => TypeInfo::Enum(EnumInfo {
                            variants: variants.iter().map(|v| (v.name.clone(), v.fields.clone())).collect(),
                            methods: methods.iter().map(|m| (m.name.clone(), FunctionSig::from_decl(m))).collect(),
                        }),
                        TypeDeclKind::Trait { methods } => TypeInfo::Trait(TraitInfo {
                            methods: methods
                                .iter()
                                .map(|m| {
                                    (
                                        m.name.clone(),
                                        FunctionSig {
                                            params: m.params.clone(),
                                            return_type: m.return_type.clone(),
                                            is_async: false,
                                        },
                                    )
                                })
                                .collect(),
                        }),
                    };
                    self.types.insert(t.name.clone(), info);
                }
                Declaration::Impl(_) | Declaration::Import(_) => {}
            }
        }
    }

    /// Trait implementation completeness (spec §4.3): for every method in
    /// a trait, the implementing type must supply a matching method.
    fn check_trait_completeness(&mut self) {
        for decl in &self.program.declarations {
            let Declaration::Impl(impl_decl) = decl else { continue };
            let Some(trait_name) = &impl_decl.trait_name else { continue };
            let Some(TypeInfo::Trait(trait_info)) = self.types.get(trait_name).cloned() else {
                self.err(Span::default(), format!("unknown trait '{}'", trait_name));
                continue;
            };
            let provided: HashMap<String, FunctionSig> = impl_decl
                .methods
                .iter()
                .map(|m| (m.name.clone(), FunctionSig::from_decl(m)))
                .collect();
            for (name, sig) in &trait_info.methods {
                match provided.get(name) {
                    None => self.err(
                        Span::default(),
                        format!("type '{}' does not implement trait method '{}'", impl_decl.type_name, name),
                    ),
                    Some(actual) => {
                        if actual.params != sig.params || actual.return_type != sig.return_type {
                            self.err(
                                Span::default(),
                                format!(
                                    "method '{}' on '{}' does not match trait '{}' signature",
                                    name, impl_decl.type_name, trait_name
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    // --- pass B: checking --------------------------------------------------

    fn check_declarations(&mut self) {
        let decls: Vec<Declaration> = self.program.declarations.clone();
        for decl in &decls {
            match decl {
                Declaration::Function(f) => self.check_function(f),
                Declaration::TypeDecl(t) => match &t.kind {
                    TypeDeclKind::Struct { methods, .. } | TypeDeclKind::Enum { methods, .. } => {
                        for m in methods {
                            self.check_function(m);
                        }
                    }
                    TypeDeclKind::Trait { .. } => {}
                },
                Declaration::Impl(impl_decl) => {
                    for m in &impl_decl.methods {
                        self.check_function(m);
                    }
                }
                Declaration::Import(_) => {}
            }
        }
        if self.program.find_function("main").is_none() {
            self.err(Span::default(), "program has no 'main' function");
        }
    }

    fn check_function(&mut self, f: &FunctionDecl) {
        self.scopes.clear();
        self.scopes.push(Scope::new());
        for p in &f.params {
            self.define(&p.name, p.type_ann.clone(), false);
        }
        self.current_return_type = f.return_type.clone();
        self.current_function_is_async = f.is_async;
        self.loop_depth = 0;
        for stmt in &f.body {
            self.check_stmt(stmt);
        }
        self.scopes.pop();
    }

    // --- scope helpers -------------------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn define(&mut self, name: &str, ty: Type, is_mut: bool) {
        self.scopes.last_mut().expect("at least one scope active").insert(name.to_string(), (ty, is_mut));
    }

    fn lookup(&self, name: &str) -> Option<(Type, bool)> {
        self.scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    // --- statements -----------------------------------------------------------

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => {
                self.check_expr(e);
            }
            Stmt::Let { name, is_mut, type_ann, init, span } => {
                let resolved = match (type_ann, init) {
                    (Some(ann), Some(init_expr)) => {
                        let init_ty = self.check_expr(init_expr);
                        if !init_ty.compatible_with(ann) {
                            self.err(
                                *span,
                                format!("cannot assign value of type '{}' to '{}' of type '{}'", init_ty, name, ann),
                            );
                        }
                        ann.clone()
                    }
                    (Some(ann), None) => ann.clone(),
                    (None, Some(init_expr)) => self.check_expr(init_expr),
                    (None, None) => {
                        self.err(*span, format!("let binding '{}' has no annotation and no initializer to infer from", name));
                        Type::Void
                    }
                };
                self.define(name, resolved, *is_mut);
            }
            Stmt::Assign { target, value, span } => {
                let target_ty = self.check_lvalue(target, *span);
                let value_ty = self.check_expr(value);
                if !value_ty.compatible_with(&target_ty) {
                    self.err(*span, format!("cannot assign '{}' to target of type '{}'", value_ty, target_ty));
                }
            }
            Stmt::CompoundAssign { target, value, span, .. } => {
                let target_ty = self.check_lvalue(target, *span);
                let value_ty = self.check_expr(value);
                if !target_ty.is_numeric() || !value_ty.is_numeric() {
                    self.err(*span, "compound assignment requires numeric operands");
                }
            }
            Stmt::Return(expr, span) => {
                let actual = match expr {
                    Some(e) => self.check_expr(e),
                    None => Type::Void,
                };
                if !actual.compatible_with(&self.current_return_type) {
                    self.err(
                        *span,
                        format!("return type '{}' does not match function return type '{}'", actual, self.current_return_type),
                    );
                }
            }
            Stmt::Break(expr, span) => {
                if self.loop_depth == 0 {
                    self.err(*span, "'break' outside of a loop");
                }
                if let Some(e) = expr {
                    self.check_expr(e);
                }
            }
            Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    self.err(*span, "'continue' outside of a loop");
                }
            }
            Stmt::Loop { cond, iterator, body, span } => self.check_loop(cond, iterator, body, *span),
            Stmt::WhileLoop { cond, body, span } => self.check_loop(&Some(cond.clone()), &None, body, *span),
            Stmt::ForLoop { binding, iterable, body, span } => {
                self.check_loop(&None, &Some((binding.clone(), iterable.clone())), body, *span)
            }
        }
    }

    fn check_lvalue(&mut self, target: &Expr, span: Span) -> Type {
        match target {
            Expr::Identifier(name) => match self.lookup(name) {
                Some((ty, is_mut)) => {
                    if !is_mut {
                        self.err(span, format!("cannot assign to immutable binding '{}'", name));
                    }
                    ty
                }
                None => {
                    self.err(span, format!("undefined identifier '{}'", name));
                    Type::Void
                }
            },
            Expr::FieldAccess { .. } | Expr::ArrayIndex { .. } => self.check_expr(target),
            _ => {
                self.err(span, "invalid assignment target");
                Type::Void
            }
        }
    }

    /// `loop` unification (spec §4.2/§4.3): infinite / while-style /
    /// iterator forms share one check path. Property 4 (loop scope
    /// hygiene) falls out of the push/pop around the iterator binding.
    fn check_loop(&mut self, cond: &Option<Expr>, iterator: &Option<(String, Expr)>, body: &[Stmt], span: Span) {
        self.push_scope();
        if let Some(cond) = cond {
            let cond_ty = self.check_expr(cond);
            if cond_ty != Type::Bool {
                self.err(span, format!("loop condition must be bool, found '{}'", cond_ty));
            }
        }
        if let Some((name, iterable)) = iterator {
            let iterable_ty = self.check_expr(iterable);
            let elem_ty = match iterable_ty {
                Type::Array(elem, _) => *elem,
                ref int_ty if int_ty.is_integer() => int_ty.clone(),
                other => {
                    self.err(span, format!("'loop {} in ...' requires a range or array, found '{}'", name, other));
                    Type::i32()
                }
            };
            self.define(name, elem_ty, false);
        }
        self.loop_depth += 1;
        for stmt in body {
            self.check_stmt(stmt);
        }
        self.loop_depth -= 1;
        self.pop_scope();
    }

    // --- expressions -----------------------------------------------------------

    fn check_expr(&mut self, expr: &Expr) -> Type {
        match expr {
            Expr::IntLiteral(_) => Type::i32(),
            Expr::FloatLiteral(_) => Type::f64(),
            Expr::BoolLiteral(_) => Type::Bool,
            Expr::CharLiteral(_) => Type::Char,
            Expr::StringLiteral(_) => Type::String,

            Expr::Identifier(name) => match self.lookup(name) {
                Some((ty, _)) => ty,
                None => {
                    self.err(Span::default(), format!("undefined identifier '{}'", name));
                    Type::Void
                }
            },

            Expr::Binary { op, left, right, span } => self.check_binary(*op, left, right, *span),
            Expr::Unary { op, operand, span } => self.check_unary(*op, operand, *span),

            Expr::Call { callee, args, span, .. } => self.check_call(callee, args, *span),
            Expr::StaticMethodCall { type_name, method_name, args, span, .. } => {
                self.check_static_method_call(type_name, method_name, args, *span)
            }
            Expr::FieldAccess { object, field, span } => self.check_field_access(object, field, *span),
            Expr::StructInit { type_name, fields, span, .. } => self.check_struct_init(type_name, fields, *span),
            Expr::EnumVariant { enum_name, variant, args, span } => {
                self.check_enum_variant(enum_name.as_deref(), variant, args, *span)
            }

            Expr::Block(stmts) => self.check_block(stmts),
            Expr::If { cond, then_branch, else_branch, span } => self.check_if(cond, then_branch, else_branch.as_deref(), *span),
            Expr::Is { value, arms, span } => self.check_is(value, arms, *span),
            Expr::As { value, target_type, span } => self.check_as(value, target_type, *span),
            Expr::Await { value, span } => self.check_await(value, *span),

            Expr::ArrayLiteral { elements, span } => self.check_array_literal(elements, *span),
            Expr::ArrayIndex { array, index, span } => self.check_array_index(array, index, *span),
            Expr::Range { start, end, span, .. } => self.check_range(start, end, *span),
            Expr::StringInterp { parts, .. } => {
                for part in parts {
                    if let InterpPart::Expr(e) = part {
                        self.check_expr(e);
                    }
                }
                Type::String
            }
            Expr::Try { value, span } => self.check_try(value, *span),
        }
    }

    fn unify_literal(&self, a: &Type, b: &Type) -> Option<Type> {
        if a == b {
            return Some(a.clone());
        }
        if a.compatible_with(b) {
            if *a == Type::i32() || *a == Type::f64() {
                Some(b.clone())
            } else {
                Some(a.clone())
            }
        } else {
            None
        }
    }

    fn check_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) -> Type {
        let left_ty = self.check_expr(left);
        let right_ty = self.check_expr(right);
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                match self.unify_literal(&left_ty, &right_ty) {
                    Some(ty) if ty.is_numeric() => ty,
                    _ => {
                        self.err(span, format!("arithmetic operands must share a numeric type, found '{}' and '{}'", left_ty, right_ty));
                        left_ty
                    }
                }
            }
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                if self.unify_literal(&left_ty, &right_ty).is_none() {
                    self.err(span, format!("comparison operands must share a type, found '{}' and '{}'", left_ty, right_ty));
                }
                Type::Bool
            }
            BinaryOp::And | BinaryOp::Or => {
                if left_ty != Type::Bool || right_ty != Type::Bool {
                    self.err(span, "logical operands must be bool");
                }
                Type::Bool
            }
        }
    }

    fn check_unary(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> Type {
        let ty = self.check_expr(operand);
        match op {
            UnaryOp::Neg => {
                if !ty.is_numeric() {
                    self.err(span, format!("unary '-' requires a numeric operand, found '{}'", ty));
                }
                ty
            }
            UnaryOp::Not => {
                if ty != Type::Bool {
                    self.err(span, format!("unary '!' requires bool, found '{}'", ty));
                }
                Type::Bool
            }
        }
    }

    fn check_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|a| self.check_expr(a)).collect();
        match callee {
            Expr::Identifier(name) => {
                let Some(sig) = self.functions.get(name).cloned() else {
                    self.err(span, format!("call to undefined function '{}'", name));
                    return Type::Void;
                };
                self.check_arg_arity_and_types(name, &sig.params, &arg_types, span);
                sig.return_type
            }
            Expr::FieldAccess { object, field, .. } => {
                let object_ty = self.check_expr(object);
                let Some(type_name) = type_name_of(&object_ty) else {
                    self.err(span, format!("cannot call method '{}' on non-nominal type '{}'", field, object_ty));
                    return Type::Void;
                };
                let Some(info) = self.types.get(&type_name) else {
                    self.err(span, format!("undefined type '{}'", type_name));
                    return Type::Void;
                };
                let Some(sig) = info.methods().get(field).cloned() else {
                    self.err(span, format!("type '{}' has no method '{}'", type_name, field));
                    return Type::Void;
                };
                let expected = if sig.params.first() == Some(&Type::Named(type_name.clone())) {
                    &sig.params[1..]
                } else {
                    &sig.params[..]
                };
                self.check_arg_arity_and_types(field, expected, &arg_types, span);
                sig.return_type
            }
            other => {
                let callee_ty = self.check_expr(other);
                match callee_ty {
                    Type::Function { params, return_type } => {
                        self.check_arg_arity_and_types("<closure>", &params, &arg_types, span);
                        *return_type
                    }
                    _ => {
                        self.err(span, "callee is not callable");
                        Type::Void
                    }
                }
            }
        }
    }

    fn check_arg_arity_and_types(&mut self, name: &str, expected: &[Type], actual: &[Type], span: Span) {
        if expected.len() != actual.len() {
            self.err(span, format!("'{}' expects {} argument(s), found {}", name, expected.len(), actual.len()));
            return;
        }
        for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
            if !a.compatible_with(e) {
                self.err(span, format!("argument {} to '{}': expected '{}', found '{}'", i + 1, name, e, a));
            }
        }
    }

    fn check_static_method_call(&mut self, type_name: &str, method_name: &str, args: &[Expr], span: Span) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|a| self.check_expr(a)).collect();
        let Some(info) = self.types.get(type_name).cloned() else {
            self.err(span, format!("undefined type '{}'", type_name));
            return Type::Void;
        };
        let Some(sig) = info.methods().get(method_name).cloned() else {
            self.err(span, format!("type '{}' has no static method '{}'", type_name, method_name));
            return Type::Void;
        };
        self.check_arg_arity_and_types(method_name, &sig.params, &arg_types, span);
        sig.return_type
    }

    fn check_field_access(&mut self, object: &Expr, field: &str, span: Span) -> Type {
        let object_ty = self.check_expr(object);
        let Some(type_name) = type_name_of(&object_ty) else {
            self.err(span, format!("cannot access field '{}' on '{}'", field, object_ty));
            return Type::Void;
        };
        match self.types.get(&type_name) {
            Some(TypeInfo::Struct(s)) => match s.fields.iter().find(|(n, _)| n == field) {
                Some((_, ty)) => ty.clone(),
                None => {
                    self.err(span, format!("type '{}' has no field '{}'", type_name, field));
                    Type::Void
                }
            },
            Some(_) => {
                self.err(span, format!("type '{}' is not a struct", type_name));
                Type::Void
            }
            None => {
                self.err(span, format!("undefined type '{}'", type_name));
                Type::Void
            }
        }
    }

    fn check_struct_init(&mut self, type_name: &str, fields: &[FieldInit], span: Span) -> Type {
        let Some(TypeInfo::Struct(info)) = self.types.get(type_name).cloned() else {
            self.err(span, format!("'{}' is not a struct type", type_name));
            for f in fields {
                self.check_expr(&f.value);
            }
            return Type::Void;
        };
        for f in fields {
            let value_ty = self.check_expr(&f.value);
            match info.fields.iter().find(|(n, _)| n == &f.name) {
                Some((_, expected)) => {
                    if !value_ty.compatible_with(expected) {
                        self.err(span, format!("field '{}' expects '{}', found '{}'", f.name, expected, value_ty));
                    }
                }
                None => self.err(span, format!("struct '{}' has no field '{}'", type_name, f.name)),
            }
        }
        Type::Named(type_name.to_string())
    }

    /// Enum construction (spec §4.3): `V(args)` where `V` is a variant
    /// of a known enum `E` is typed as `named(E)`. Resolves bare
    /// variant names via the variant-to-enum index (spec §9,
    /// "enum-constructor name aliasing").
    fn check_enum_variant(&mut self, enum_name: Option<&str>, variant: &str, args: &[Expr], span: Span) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|a| self.check_expr(a)).collect();
        let owner = enum_name.map(str::to_string).or_else(|| self.variant_owners.get(variant).cloned());
        let Some(owner) = owner else {
            self.err(span, format!("'{}' is not a known enum variant", variant));
            return Type::Void;
        };
        let Some(TypeInfo::Enum(info)) = self.types.get(&owner).cloned() else {
            self.err(span, format!("'{}' is not an enum type", owner));
            return Type::Void;
        };
        match info.variants.iter().find(|(n, _)| n == variant) {
            Some((_, field_types)) => self.check_arg_arity_and_types(variant, field_types, &arg_types, span),
            None => self.err(span, format!("enum '{}' has no variant '{}'", owner, variant)),
        }
        Type::Named(owner)
    }

    fn check_block(&mut self, stmts: &[Stmt]) -> Type {
        self.push_scope();
        let mut result = Type::Void;
        for (i, stmt) in stmts.iter().enumerate() {
            if i + 1 == stmts.len() {
                if let Stmt::Expr(e) = stmt {
                    result = self.check_expr(e);
                    continue;
                }
            }
            self.check_stmt(stmt);
        }
        self.pop_scope();
        result
    }

    fn check_if(&mut self, cond: &Expr, then_branch: &Expr, else_branch: Option<&Expr>, span: Span) -> Type {
        let cond_ty = self.check_expr(cond);
        if cond_ty != Type::Bool {
            self.err(span, format!("'if' condition must be bool, found '{}'", cond_ty));
        }
        let then_ty = self.check_expr(then_branch);
        match else_branch {
            Some(else_expr) => {
                let else_ty = self.check_expr(else_expr);
                match self.unify_literal(&then_ty, &else_ty) {
                    Some(ty) => ty,
                    None => {
                        self.err(span, format!("'if' branches disagree: '{}' vs '{}'", then_ty, else_ty));
                        then_ty
                    }
                }
            }
            // No join is imposed on the missing branch (spec §4.3).
            None => then_ty,
        }
    }

    /// `is` arms extend the scope for the arm body (spec §4.3);
    /// multi-binding variant patterns are typed element-wise from the
    /// variant's declared field types (Open Question resolution,
    /// `SPEC_FULL.md`).
    fn check_is(&mut self, value: &Expr, arms: &[IsArm], span: Span) -> Type {
        let value_ty = self.check_expr(value);
        let mut result: Option<Type> = None;
        let mut has_wildcard = false;
        let mut covered_variants: Vec<String> = Vec::new();

        for arm in arms {
            self.push_scope();
            match &arm.pattern {
                Pattern::Wildcard => has_wildcard = true,
                Pattern::Identifier(name) => self.define(name, value_ty.clone(), false),
                Pattern::Literal(lit) => {
                    let lit_ty = self.check_expr(lit);
                    if self.unify_literal(&lit_ty, &value_ty).is_none() {
                        self.err(arm.span, format!("pattern type '{}' does not match matched value type '{}'", lit_ty, value_ty));
                    }
                }
                Pattern::Variant { name, bindings } => {
                    covered_variants.push(name.clone());
                    let owner = self.variant_owners.get(name).cloned();
                    let field_types = owner
                        .as_ref()
                        .and_then(|o| self.types.get(o))
                        .and_then(|info| match info {
                            TypeInfo::Enum(e) => e.variants.iter().find(|(n, _)| n == name).map(|(_, f)| f.clone()),
                            _ => None,
                        });
                    match field_types {
                        Some(field_types) => {
                            if field_types.len() != bindings.len() {
                                self.err(
                                    arm.span,
                                    format!(
                                        "variant '{}' has {} field(s) but pattern binds {}",
                                        name,
                                        field_types.len(),
                                        bindings.len()
                                    ),
                                );
                            }
                            for (binding, field_ty) in bindings.iter().zip(field_types.iter().chain(std::iter::repeat(&Type::i32()))) {
                                self.define(binding, field_ty.clone(), false);
                            }
                        }
                        None => {
                            self.err(arm.span, format!("'{}' is not a known enum variant", name));
                            for binding in bindings {
                                self.define(binding, Type::i32(), false);
                            }
                        }
                    }
                }
            }
            if let Some(guard) = &arm.guard {
                let guard_ty = self.check_expr(guard);
                if guard_ty != Type::Bool {
                    self.err(arm.span, "'is' guard must be bool");
                }
            }
            let body_ty = self.check_expr(&arm.body);
            self.pop_scope();
            result = match (&result, self.unify_literal(result.as_ref().unwrap_or(&body_ty), &body_ty)) {
                (_, Some(unified)) => Some(unified),
                (Some(prev), None) => {
                    self.err(arm.span, format!("'is' arms disagree: '{}' vs '{}'", prev, body_ty));
                    Some(prev.clone())
                }
                (None, None) => Some(body_ty),
            };
        }

        // Non-exhaustive `is` expressions warn rather than fail (Open
        // Question resolution, `SPEC_FULL.md`).
        if !has_wildcard {
            if let Some(owner) = type_name_of(&value_ty) {
                if let Some(TypeInfo::Enum(info)) = self.types.get(&owner) {
                    let missing: Vec<&str> = info
                        .variants
                        .iter()
                        .map(|(n, _)| n.as_str())
                        .filter(|n| !covered_variants.iter().any(|c| c == n))
                        .collect();
                    if !missing.is_empty() {
                        self.warn(span, format!("non-exhaustive 'is': missing variant(s) {}", missing.join(", ")));
                    }
                }
            }
        }

        result.unwrap_or(Type::Void)
    }

    fn check_as(&mut self, value: &Expr, target_type: &Type, span: Span) -> Type {
        let value_ty = self.check_expr(value);
        if value_ty == *target_type || (value_ty.is_numeric() && target_type.is_numeric()) {
            target_type.clone()
        } else {
            self.err(span, format!("cannot cast '{}' as '{}'", value_ty, target_type));
            target_type.clone()
        }
    }

    fn check_await(&mut self, value: &Expr, span: Span) -> Type {
        if !self.current_function_is_async {
            self.err(span, "'await' is only legal inside an async function");
        }
        self.check_expr(value)
    }

    fn check_array_literal(&mut self, elements: &[Expr], span: Span) -> Type {
        if elements.is_empty() {
            return Type::Array(Box::new(Type::Void), Some(0));
        }
        let mut elem_ty = self.check_expr(&elements[0]);
        for e in &elements[1..] {
            let ty = self.check_expr(e);
            match self.unify_literal(&elem_ty, &ty) {
                Some(unified) => elem_ty = unified,
                None => self.err(span, format!("array elements must share a type, found '{}' and '{}'", elem_ty, ty)),
            }
        }
        Type::Array(Box::new(elem_ty), Some(elements.len()))
    }

    fn check_array_index(&mut self, array: &Expr, index: &Expr, span: Span) -> Type {
        let array_ty = self.check_expr(array);
        let index_ty = self.check_expr(index);
        if !index_ty.is_integer() {
            self.err(span, format!("array index must be an integer, found '{}'", index_ty));
        }
        match array_ty {
            Type::Array(elem, _) => *elem,
            other => {
                self.err(span, format!("cannot index into non-array type '{}'", other));
                Type::Void
            }
        }
    }

    fn check_range(&mut self, start: &Expr, end: &Expr, span: Span) -> Type {
        let start_ty = self.check_expr(start);
        let end_ty = self.check_expr(end);
        if !start_ty.is_integer() || !end_ty.is_integer() {
            self.err(span, "range bounds must be integers");
        }
        start_ty
    }

    /// `expr?` (spec §4.3/§4.5): the operand must be a `Result<T,E>`
    /// generic instance; the expression's type is the unwrapped `T`.
    fn check_try(&mut self, value: &Expr, span: Span) -> Type {
        let value_ty = self.check_expr(value);
        match &value_ty {
            Type::GenericInstance { name, args } if name == "Result" && args.len() == 2 => args[0].clone(),
            other => {
                self.err(span, format!("'?' requires a Result value, found '{}'", other));
                Type::Void
            }
        }
    }
}

fn type_name_of(ty: &Type) -> Option<String> {
    match ty {
        Type::Named(name) => Some(name.clone()),
        Type::GenericInstance { name, .. } => Some(name.clone()),
        _ => None,
    }
}

/// Runs both passes and returns the symbol tables codegen needs, or the
/// accumulated diagnostics if any stage failed.
pub fn check_program(program: &Program, filename: &str) -> Result<TypeTables, TypeError> {
    let mut tc = TypeChecker::new(program, filename);
    tc.register_declarations();
    tc.check_trait_completeness();
    tc.check_declarations();
    if tc.diagnostics.has_errors() {
        Err(TypeError(tc.diagnostics.into_vec()))
    } else {
        Ok(TypeTables {
            functions: tc.functions,
            types: tc.types,
            variant_owners: tc.variant_owners,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn check(src: &str) -> Result<TypeTables, TypeError> {
        let stream = tokenize(src, "test.paw").unwrap();
        let program = parse(&stream).unwrap();
        check_program(&program, "test.paw")
    }

    #[test]
    fn accepts_simple_valid_program() {
        assert!(check("fn main() -> i32 { return 40 + 2; }").is_ok());
    }

    #[test]
    fn missing_main_is_fatal() {
        let err = check("fn helper() -> i32 { return 1; }").unwrap_err();
        assert!(err.0.iter().any(|d| d.message.contains("main")));
    }

    #[test]
    fn arithmetic_requires_matching_operand_types() {
        let err = check("fn main() -> i32 { let x: i64 = 1 as i64; let y: i32 = 2; return x + y; }").unwrap_err();
        assert!(err.0.iter().any(|d| d.message.contains("arithmetic")));
    }

    #[test]
    fn literal_defaults_are_compatible_with_annotated_width() {
        assert!(check("fn main() -> i32 { let x: i64 = 3 as i64; let y: i32 = x as i32; return y; }").is_ok());
    }

    #[test]
    fn await_outside_async_is_an_error() {
        let err = check("fn f() -> i32 { return await g(); } fn g() -> i32 { return 1; } fn main() -> i32 { return f(); }")
            .unwrap_err();
        assert!(err.0.iter().any(|d| d.message.contains("await")));
    }

    #[test]
    fn is_expression_binds_variant_fields_element_wise() {
        let result = check(
            "type Result<T,E> = enum { Ok(T), Err(E) } \
             fn f() -> i32 { let r = Ok(1); return r is { Ok(x) => x, Err(e) => e }; } \
             fn main() -> i32 { return f(); }",
        );
        assert!(result.is_ok(), "{:?}", result.err());
    }

    #[test]
    fn non_exhaustive_is_warns_but_does_not_fail() {
        let tables = check(
            "type Result<T,E> = enum { Ok(T), Err(E) } \
             fn f() -> i32 { let r = Ok(1); return r is { Ok(x) => x }; } \
             fn main() -> i32 { return f(); }",
        );
        assert!(tables.is_ok());
    }

    #[test]
    fn array_literal_elements_must_share_a_type() {
        assert!(check("fn main() -> i32 { let a = [1, 2, 3]; return a[0]; }").is_ok());
    }

    #[test]
    fn try_expr_unwraps_result_ok_type() {
        let result = check(
            "type Result<T,E> = enum { Ok(T), Err(E) } \
             fn div(a: i32, b: i32) -> Result<i32,i32> { return Ok(a / b); } \
             fn run() -> Result<i32,i32> { let v = div(10, 2)?; return Ok(v + 1); } \
             fn main() -> i32 { return run() is { Ok(x) => x, Err(e) => e }; }",
        );
        assert!(result.is_ok(), "{:?}", result.err());
    }
}
