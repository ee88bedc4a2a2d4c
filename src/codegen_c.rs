//! C backend: lowers a type-checked [`Program`] to a single C11 translation
//! unit (spec §4.4).
//!
//! The emitted file is self-contained: a small preamble of standard
//! headers, struct/enum typedefs, forward declarations, then function
//! bodies in source order. A subsequent compile to object/executable is
//! delegated to the external C toolchain by the driver (`lib.rs`), not by
//! this module.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::ast::{
    BinaryOp, CompoundOp, Declaration, EnumVariantDecl, Expr, FieldDecl, FieldInit, FunctionDecl,
    InterpPart, IsArm, Pattern, Program, Stmt, TypeDeclKind, UnaryOp,
};
use crate::diagnostics::CodeGenError;
use crate::typechecker::{TypeInfo, TypeTables};
use crate::types::{FloatWidth, IntWidth, Type};

const PREAMBLE: &str =
    "#include <stdio.h>\n#include <stdlib.h>\n#include <stdint.h>\n#include <stdbool.h>\n#include <string.h>\n\n";

/// Per-file state threaded through lowering: the type tables produced by
/// the checker, a running counter for codegen-local C temporaries, and a
/// scope of locally bound names to their Paw type, kept just precisely
/// enough to resolve a method receiver's owning struct/enum (spec §4.4
/// qualifies `obj.method(args)` as `T_method(&obj, args)`).
struct CContext<'a> {
    tables: &'a TypeTables,
    tmp_counter: usize,
    locals: HashMap<String, Type>,
}

impl<'a> CContext<'a> {
    fn fresh_tmp(&mut self) -> String {
        self.tmp_counter += 1;
        format!("__paw_tmp{}", self.tmp_counter)
    }
}

/// A light structural type-inferencer, mirroring the LLVM backend's
/// `infer_type`: the checker's per-expression types aren't threaded
/// through to codegen, so this recomputes just enough to resolve a
/// method call's receiver type and a `?` operand's enum owner.
fn infer_type(ctx: &CContext, expr: &Expr) -> Type {
    match expr {
        Expr::IntLiteral(_) => Type::i32(),
        Expr::FloatLiteral(_) => Type::f64(),
        Expr::BoolLiteral(_) => Type::Bool,
        Expr::CharLiteral(_) => Type::Char,
        Expr::StringLiteral(_) => Type::String,
        Expr::Identifier(name) => ctx.locals.get(name).cloned().unwrap_or_else(Type::i32),
        Expr::Binary { op, left, .. } => match op {
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
            | BinaryOp::And
            | BinaryOp::Or => Type::Bool,
            _ => infer_type(ctx, left),
        },
        Expr::Unary { operand, .. } => infer_type(ctx, operand),
        Expr::Call { callee, .. } => match callee.as_ref() {
            Expr::Identifier(name) => ctx
                .tables
                .functions
                .get(name)
                .map(|sig| sig.return_type.clone())
                .unwrap_or_else(Type::i32),
            Expr::FieldAccess { object, field, .. } => {
                let owner = owner_name(&infer_type(ctx, object));
                lookup_method_return(ctx, &owner, field)
            }
            _ => Type::i32(),
        },
        Expr::StaticMethodCall { type_name, method_name, .. } => lookup_method_return(ctx, type_name, method_name),
        Expr::FieldAccess { object, field, .. } => {
            let owner = owner_name(&infer_type(ctx, object));
            field_type(ctx, &owner, field)
        }
        Expr::StructInit { type_name, .. } => Type::Named(type_name.clone()),
        Expr::EnumVariant { enum_name, variant, .. } => {
            let owner = resolve_variant_owner(ctx, enum_name.as_deref(), variant);
            Type::Named(owner)
        }
        Expr::Block(stmts) => stmts
            .last()
            .and_then(|s| match s {
                Stmt::Expr(e) => Some(infer_type(ctx, e)),
                _ => None,
            })
            .unwrap_or(Type::Void),
        Expr::If { then_branch, .. } => infer_type(ctx, then_branch),
        Expr::Is { arms, .. } => arms.first().map(|a| infer_type(ctx, &a.body)).unwrap_or_else(Type::i32),
        Expr::As { target_type, .. } => target_type.clone(),
        Expr::Await { value, .. } => infer_type(ctx, value),
        Expr::ArrayLiteral { elements, .. } => Type::Array(
            Box::new(elements.first().map(|e| infer_type(ctx, e)).unwrap_or_else(Type::i32)),
            Some(elements.len()),
        ),
        Expr::ArrayIndex { array, .. } => match infer_type(ctx, array) {
            Type::Array(inner, _) => *inner,
            _ => Type::i32(),
        },
        Expr::Range { .. } => Type::i32(),
        Expr::StringInterp { .. } => Type::String,
        Expr::Try { value, .. } => match infer_type(ctx, value) {
            Type::GenericInstance { args, .. } => args.first().cloned().unwrap_or_else(Type::i32),
            _ => Type::i32(),
        },
    }
}

/// A receiver's Paw type may be a direct nominal type or a pointer to one
/// (`self` inside a method body); both name the same owning struct/enum.
fn owner_name(ty: &Type) -> String {
    match ty {
        Type::Named(n) => n.clone(),
        Type::GenericInstance { name, .. } => name.clone(),
        Type::Pointer(inner) => owner_name(inner),
        _ => String::new(),
    }
}

fn field_type(ctx: &CContext, owner: &str, field: &str) -> Type {
    match ctx.tables.types.get(owner) {
        Some(TypeInfo::Struct(s)) => s.fields.iter().find(|(n, _)| n == field).map(|(_, t)| t.clone()).unwrap_or_else(Type::i32),
        _ => Type::i32(),
    }
}

fn lookup_method_return(ctx: &CContext, type_name: &str, method_name: &str) -> Type {
    match ctx.tables.types.get(type_name) {
        Some(TypeInfo::Struct(s)) => s.methods.get(method_name).map(|sig| sig.return_type.clone()).unwrap_or_else(Type::i32),
        Some(TypeInfo::Enum(e)) => e.methods.get(method_name).map(|sig| sig.return_type.clone()).unwrap_or_else(Type::i32),
        Some(TypeInfo::Trait(t)) => t.methods.get(method_name).map(|sig| sig.return_type.clone()).unwrap_or_else(Type::i32),
        None => Type::i32(),
    }
}

pub fn codegen_program(program: &Program, tables: &TypeTables) -> Result<String, CodeGenError> {
    let mut out = String::with_capacity(4096);
    out.push_str(PREAMBLE);

    // Struct/enum typedefs first so every function signature below can
    // reference them (spec §5: "codegen emits in source order for C").
    for decl in &program.declarations {
        if let Declaration::TypeDecl(t) = decl {
            match &t.kind {
                TypeDeclKind::Struct { fields, .. } => emit_struct_typedef(&t.name, fields, &mut out)?,
                TypeDeclKind::Enum { variants, .. } => emit_enum_typedef(&t.name, variants, &mut out)?,
                TypeDeclKind::Trait { .. } => {}
            }
        }
    }

    let functions = collect_functions(program);

    for f in &functions {
        emit_function_decl(f, &mut out)?;
    }
    out.push('\n');

    for decl in &program.declarations {
        if let Declaration::TypeDecl(t) = decl {
            if let TypeDeclKind::Enum { variants, .. } = &t.kind {
                emit_enum_constructors(&t.name, variants, &mut out)?;
            }
        }
    }

    let mut ctx = CContext { tables, tmp_counter: 0, locals: HashMap::new() };
    for f in &functions {
        emit_function_body(f, &mut ctx, &mut out)?;
    }

    Ok(out)
}

/// Every function the program defines, in source order: free functions,
/// struct/enum methods, and `impl` block methods all share one namespace
/// of `FunctionDecl`s distinguished by `self_type` (spec §9).
fn collect_functions(program: &Program) -> Vec<FunctionDecl> {
    let mut out = Vec::new();
    for decl in &program.declarations {
        match decl {
            Declaration::Function(f) => out.push(f.clone()),
            Declaration::TypeDecl(t) => match &t.kind {
                TypeDeclKind::Struct { methods, .. } | TypeDeclKind::Enum { methods, .. } => {
                    out.extend(methods.iter().cloned());
                }
                TypeDeclKind::Trait { .. } => {}
            },
            Declaration::Impl(impl_decl) => out.extend(impl_decl.methods.iter().cloned()),
            Declaration::Import(_) => {}
        }
    }
    out
}

/// Escapes a Paw identifier that collides with a C keyword. `main` is
/// deliberately left unescaped: Paw's `fn main` is meant to become the C
/// program's actual entry point, not a clashing keyword.
fn c_ident(name: &str) -> String {
    match name {
        "union" | "struct" | "typedef" | "default" | "switch" | "case" | "break" | "return" | "void" | "int"
        | "char" | "float" | "double" | "bool" | "short" | "long" | "const" | "static" | "extern" => {
            format!("paw_{}", name)
        }
        _ => name.to_string(),
    }
}

fn c_type_name(ty: &Type) -> String {
    match ty {
        Type::Int(w) => match w {
            IntWidth::I8 => "int8_t".to_string(),
            IntWidth::I16 => "int16_t".to_string(),
            IntWidth::I32 => "int32_t".to_string(),
            IntWidth::I64 => "int64_t".to_string(),
            IntWidth::I128 => "__int128".to_string(),
            IntWidth::U8 => "uint8_t".to_string(),
            IntWidth::U16 => "uint16_t".to_string(),
            IntWidth::U32 => "uint32_t".to_string(),
            IntWidth::U64 => "uint64_t".to_string(),
            IntWidth::U128 => "unsigned __int128".to_string(),
        },
        Type::Float(FloatWidth::F32) => "float".to_string(),
        Type::Float(FloatWidth::F64) => "double".to_string(),
        Type::Bool => "bool".to_string(),
        Type::Char => "char".to_string(),
        Type::String => "char*".to_string(),
        Type::Void => "void".to_string(),
        Type::Named(name) => c_ident(name),
        Type::GenericInstance { .. } => c_ident(&ty.mangle_fragment()),
        Type::Pointer(inner) => format!("{}*", c_type_name(inner)),
        Type::Array(inner, _) => format!("{}*", c_type_name(inner)),
        Type::Function { .. } => "void*".to_string(),
        Type::Generic(_) => "int32_t".to_string(),
    }
}

fn emit_struct_typedef(name: &str, fields: &[FieldDecl], out: &mut String) -> Result<(), CodeGenError> {
    writeln!(out, "typedef struct {{")?;
    for field in fields {
        writeln!(out, "    {} {};", c_type_name(&field.type_ann), c_ident(&field.name))?;
    }
    writeln!(out, "}} {};\n", c_ident(name))?;
    Ok(())
}

fn emit_enum_typedef(name: &str, variants: &[EnumVariantDecl], out: &mut String) -> Result<(), CodeGenError> {
    let ename = c_ident(name);
    write!(out, "typedef enum {{ ")?;
    for (i, v) in variants.iter().enumerate() {
        if i > 0 {
            write!(out, ", ")?;
        }
        write!(out, "{}_TAG_{}", ename.to_uppercase(), v.name.to_uppercase())?;
    }
    writeln!(out, " }} {}_Tag;\n", ename)?;

    let has_data = variants.iter().any(|v| !v.fields.is_empty());
    writeln!(out, "typedef struct {{")?;
    writeln!(out, "    {}_Tag tag;", ename)?;
    if has_data {
        writeln!(out, "    union {{")?;
        for v in variants {
            if v.fields.is_empty() {
                continue;
            }
            if v.fields.len() == 1 {
                writeln!(out, "        {} {}_value;", c_type_name(&v.fields[0]), v.name)?;
            } else {
                writeln!(out, "        struct {{")?;
                for (i, field_ty) in v.fields.iter().enumerate() {
                    writeln!(out, "            {} field{};", c_type_name(field_ty), i)?;
                }
                writeln!(out, "        }} {}_value;", v.name)?;
            }
        }
        writeln!(out, "    }} data;")?;
    }
    writeln!(out, "}} {};\n", ename)?;
    Ok(())
}

fn emit_enum_constructors(name: &str, variants: &[EnumVariantDecl], out: &mut String) -> Result<(), CodeGenError> {
    let ename = c_ident(name);
    for v in variants {
        let params: Vec<String> = v
            .fields
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} a{}", c_type_name(ty), i))
            .collect();
        writeln!(out, "{} {}_{}({}) {{", ename, ename, v.name, params.join(", "))?;
        writeln!(out, "    {} __r;", ename)?;
        writeln!(out, "    __r.tag = {}_TAG_{};", ename.to_uppercase(), v.name.to_uppercase())?;
        if v.fields.len() == 1 {
            writeln!(out, "    __r.data.{}_value = a0;", v.name)?;
        } else if v.fields.len() > 1 {
            for i in 0..v.fields.len() {
                writeln!(out, "    __r.data.{}_value.field{} = a{};", v.name, i, i)?;
            }
        }
        writeln!(out, "    return __r;")?;
        writeln!(out, "}}\n")?;
    }
    Ok(())
}

/// Whether `f`'s first parameter is a bound `self` receiver (spec §4.2:
/// the parser records it as a real `Param{name: "self", ..}` entry).
fn has_self_receiver(f: &FunctionDecl) -> bool {
    f.params.first().is_some_and(|p| p.name == "self")
}

fn function_c_name(f: &FunctionDecl) -> String {
    match &f.self_type {
        Some(owner) => format!("{}_{}", c_ident(owner), f.name),
        None => c_ident(&f.name),
    }
}

fn function_signature(f: &FunctionDecl) -> (String, Vec<String>) {
    let ret = c_type_name(&f.return_type);
    let mut params = Vec::new();
    let rest = if has_self_receiver(f) {
        let owner = f.self_type.as_deref().unwrap_or_default();
        params.push(format!("{}* self", c_ident(owner)));
        &f.params[1..]
    } else {
        &f.params[..]
    };
    for p in rest {
        params.push(format!("{} {}", c_type_name(&p.type_ann), c_ident(&p.name)));
    }
    if params.is_empty() {
        params.push("void".to_string());
    }
    (ret, params)
}

fn emit_function_decl(f: &FunctionDecl, out: &mut String) -> Result<(), CodeGenError> {
    let (ret, params) = function_signature(f);
    writeln!(out, "{} {}({});", ret, function_c_name(f), params.join(", "))?;
    Ok(())
}

fn emit_function_body(f: &FunctionDecl, ctx: &mut CContext, out: &mut String) -> Result<(), CodeGenError> {
    let (ret, params) = function_signature(f);
    writeln!(out, "{} {}({}) {{", ret, function_c_name(f), params.join(", "))?;

    ctx.locals.clear();
    let rest = if has_self_receiver(f) {
        let owner = f.self_type.clone().unwrap_or_default();
        ctx.locals.insert("self".to_string(), Type::Pointer(Box::new(Type::Named(owner))));
        &f.params[1..]
    } else {
        &f.params[..]
    };
    for p in rest {
        ctx.locals.insert(p.name.clone(), p.type_ann.clone());
    }

    for stmt in &f.body {
        emit_stmt(stmt, ctx, out, 1)?;
    }
    writeln!(out, "}}\n")?;
    Ok(())
}

fn indent(n: usize) -> String {
    "    ".repeat(n)
}

fn emit_stmt(stmt: &Stmt, ctx: &mut CContext, out: &mut String, depth: usize) -> Result<(), CodeGenError> {
    let pad = indent(depth);
    match stmt {
        Stmt::Expr(e) => {
            let v = emit_expr(e, ctx, out, depth)?;
            writeln!(out, "{}{};", pad, v)?;
        }
        Stmt::Let { name, type_ann, init, .. } => {
            let inferred = init.as_ref().map(|e| infer_type(ctx, e));
            let value = match init {
                Some(e) => emit_expr(e, ctx, out, depth)?,
                None => "0".to_string(),
            };
            let c_ty = type_ann.clone().or(inferred).unwrap_or_else(Type::i32);
            writeln!(out, "{}{} {} = {};", pad, c_type_name(&c_ty), c_ident(name), value)?;
            ctx.locals.insert(name.clone(), c_ty);
        }
        Stmt::Assign { target, value, .. } => {
            let lhs = emit_lvalue(target, ctx, out, depth)?;
            let rhs = emit_expr(value, ctx, out, depth)?;
            writeln!(out, "{}{} = {};", pad, lhs, rhs)?;
        }
        Stmt::CompoundAssign { target, op, value, .. } => {
            let lhs = emit_lvalue(target, ctx, out, depth)?;
            let rhs = emit_expr(value, ctx, out, depth)?;
            let op_str = match op {
                CompoundOp::AddAssign => "+=",
                CompoundOp::SubAssign => "-=",
                CompoundOp::MulAssign => "*=",
                CompoundOp::DivAssign => "/=",
                CompoundOp::ModAssign => "%=",
            };
            writeln!(out, "{}{} {} {};", pad, lhs, op_str, rhs)?;
        }
        Stmt::Return(value, _) => match value {
            Some(v) => {
                let s = emit_expr(v, ctx, out, depth)?;
                writeln!(out, "{}return {};", pad, s)?;
            }
            None => writeln!(out, "{}return;", pad)?,
        },
        Stmt::Break(value, _) => {
            if let Some(v) = value {
                emit_expr(v, ctx, out, depth)?;
            }
            writeln!(out, "{}break;", pad)?;
        }
        Stmt::Continue(_) => writeln!(out, "{}continue;", pad)?,
        Stmt::Loop { cond, iterator, body, .. } => {
            emit_loop(cond.as_ref(), iterator.as_ref(), body, ctx, out, depth)?;
        }
        Stmt::WhileLoop { cond, body, .. } => {
            emit_loop(Some(cond), None, body, ctx, out, depth)?;
        }
        Stmt::ForLoop { binding, iterable, body, .. } => {
            emit_loop(None, Some(&(binding.clone(), iterable.clone())), body, ctx, out, depth)?;
        }
    }
    Ok(())
}

/// `self.field` lowers to `self->field` once `self` has become a C
/// pointer parameter (spec §4.4's "`T*` as the first parameter").
fn emit_lvalue(expr: &Expr, ctx: &mut CContext, out: &mut String, depth: usize) -> Result<String, CodeGenError> {
    emit_expr(expr, ctx, out, depth)
}

fn emit_loop(
    cond: Option<&Expr>,
    iterator: Option<&(String, Expr)>,
    body: &[Stmt],
    ctx: &mut CContext,
    out: &mut String,
    depth: usize,
) -> Result<(), CodeGenError> {
    let pad = indent(depth);
    if let Some((var, iterable)) = iterator {
        if let Expr::Range { start, end, inclusive, .. } = iterable {
            let s = emit_expr(start, ctx, out, depth)?;
            let e = emit_expr(end, ctx, out, depth)?;
            let cmp = if *inclusive { "<=" } else { "<" };
            writeln!(
                out,
                "{}for (int32_t {} = {}; {} {} {}; {}++) {{",
                pad, c_ident(var), s, c_ident(var), cmp, e, c_ident(var)
            )?;
            ctx.locals.insert(var.clone(), Type::i32());
            for s in body {
                emit_stmt(s, ctx, out, depth + 1)?;
            }
            writeln!(out, "{}}}", pad)?;
            ctx.locals.remove(var);
            return Ok(());
        }
        // Array-literal iteration: materialize into a temporary then
        // index over it (spec §4.4).
        let elem_ty = match infer_type(ctx, iterable) {
            Type::Array(inner, _) => *inner,
            _ => Type::i32(),
        };
        let arr = emit_expr(iterable, ctx, out, depth)?;
        let tmp = ctx.fresh_tmp();
        writeln!(out, "{}{{", pad)?;
        writeln!(out, "{}    __typeof__({}[0]) {}[] = {};", pad, arr, tmp, arr)?;
        writeln!(out, "{}    for (size_t __i = 0; __i < sizeof({}) / sizeof({}[0]); __i++) {{", pad, tmp, tmp)?;
        writeln!(out, "{}        __typeof__({}[0]) {} = {}[__i];", pad, tmp, c_ident(var), tmp)?;
        ctx.locals.insert(var.clone(), elem_ty);
        for s in body {
            emit_stmt(s, ctx, out, depth + 2)?;
        }
        writeln!(out, "{}    }}", pad)?;
        writeln!(out, "{}}}", pad)?;
        ctx.locals.remove(var);
        return Ok(());
    }
    match cond {
        Some(c) => {
            let cs = emit_expr(c, ctx, out, depth)?;
            writeln!(out, "{}while ({}) {{", pad, cs)?;
        }
        None => writeln!(out, "{}while (1) {{", pad)?,
    }
    for s in body {
        emit_stmt(s, ctx, out, depth + 1)?;
    }
    writeln!(out, "{}}}", pad)?;
    Ok(())
}

fn binop_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
    }
}

fn resolve_variant_owner(ctx: &CContext, enum_name: Option<&str>, variant: &str) -> String {
    enum_name
        .map(str::to_string)
        .or_else(|| ctx.tables.variant_owners.get(variant).cloned())
        .unwrap_or_default()
}

fn variant_field_types(ctx: &CContext, owner: &str, variant: &str) -> Vec<Type> {
    match ctx.tables.types.get(owner) {
        Some(TypeInfo::Enum(info)) => info
            .variants
            .iter()
            .find(|(n, _)| n == variant)
            .map(|(_, f)| f.clone())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Lowers an expression to a C source fragment. Control-flow expressions
/// (`if`, `is`, blocks with a trailing value) that need statements of
/// their own are emitted as a GCC/Clang statement-expression so they can
/// still appear where an rvalue is expected (spec §4.4).
fn emit_expr(expr: &Expr, ctx: &mut CContext, out: &mut String, depth: usize) -> Result<String, CodeGenError> {
    match expr {
        Expr::IntLiteral(v) => Ok(v.to_string()),
        Expr::FloatLiteral(v) => Ok(format!("{:?}", v)),
        Expr::BoolLiteral(v) => Ok(if *v { "true".to_string() } else { "false".to_string() }),
        Expr::CharLiteral(c) => Ok(format!("'{}'", c)),
        Expr::StringLiteral(s) => Ok(format!("\"{}\"", escape_c_string(s))),
        Expr::Identifier(name) => Ok(c_ident(name)),

        Expr::Binary { op, left, right, .. } => {
            let l = emit_expr(left, ctx, out, depth)?;
            let r = emit_expr(right, ctx, out, depth)?;
            Ok(format!("({} {} {})", l, binop_str(*op), r))
        }
        Expr::Unary { op, operand, .. } => {
            let v = emit_expr(operand, ctx, out, depth)?;
            let sym = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
            };
            Ok(format!("({}{})", sym, v))
        }

        Expr::Call { callee, args, .. } => emit_call(callee, args, ctx, out, depth),

        Expr::StaticMethodCall { type_name, method_name, args, .. } => {
            // Methods are emitted once per declaring type, not once per
            // instantiation (struct/enum layouts are likewise emitted
            // once, with generic fields uniformly widened) — the callee
            // name must match `function_c_name`'s `{owner}_{method}`
            // regardless of any type arguments at the call site.
            let mut arg_strs = Vec::new();
            for a in args {
                arg_strs.push(emit_expr(a, ctx, out, depth)?);
            }
            Ok(format!("{}_{}({})", c_ident(type_name), method_name, arg_strs.join(", ")))
        }

        Expr::FieldAccess { object, field, .. } => {
            let base = emit_expr(object, ctx, out, depth)?;
            if matches!(object.as_ref(), Expr::Identifier(n) if n == "self") {
                Ok(format!("{}->{}", base, c_ident(field)))
            } else {
                Ok(format!("{}.{}", base, c_ident(field)))
            }
        }

        Expr::StructInit { type_name, fields, .. } => {
            let mut parts = Vec::new();
            for FieldInit { name, value } in fields {
                let v = emit_expr(value, ctx, out, depth)?;
                parts.push(format!(".{} = {}", c_ident(name), v));
            }
            Ok(format!("({}){{{}}}", c_ident(type_name), parts.join(", ")))
        }

        Expr::EnumVariant { enum_name, variant, args, .. } => {
            let owner = resolve_variant_owner(ctx, enum_name.as_deref(), variant);
            let mut arg_strs = Vec::new();
            for a in args {
                arg_strs.push(emit_expr(a, ctx, out, depth)?);
            }
            Ok(format!("{}_{}({})", c_ident(&owner), variant, arg_strs.join(", ")))
        }

        Expr::Block(stmts) => emit_block_as_expr(stmts, ctx, out, depth),
        Expr::If { cond, then_branch, else_branch, .. } => {
            emit_if_as_expr(cond, then_branch, else_branch.as_deref(), ctx, out, depth)
        }
        Expr::Is { value, arms, .. } => emit_is_as_expr(value, arms, ctx, out, depth),
        Expr::As { value, target_type, .. } => {
            let v = emit_expr(value, ctx, out, depth)?;
            Ok(format!("(({}) {})", c_type_name(target_type), v))
        }
        Expr::Await { value, .. } => emit_expr(value, ctx, out, depth),

        Expr::ArrayLiteral { elements, .. } => {
            let mut parts = Vec::new();
            for e in elements {
                parts.push(emit_expr(e, ctx, out, depth)?);
            }
            Ok(format!("{{{}}}", parts.join(", ")))
        }
        Expr::ArrayIndex { array, index, .. } => {
            let a = emit_expr(array, ctx, out, depth)?;
            let i = emit_expr(index, ctx, out, depth)?;
            Ok(format!("{}[{}]", a, i))
        }
        Expr::Range { start, end, .. } => {
            let s = emit_expr(start, ctx, out, depth)?;
            let e = emit_expr(end, ctx, out, depth)?;
            Ok(format!("/* range {}..{} used outside a loop */ ({})", s, e, s))
        }
        Expr::StringInterp { parts, .. } => emit_string_interp(parts, ctx, out, depth),
        Expr::Try { value, .. } => emit_try_as_expr(value, ctx, out, depth),
    }
}

/// `obj.method(args)` lowers to `T_method(&obj, args)`; every other
/// callee shape is a plain call, with a bare uppercase identifier
/// resolved through the variant-owner index in case the parser produced
/// a qualified `EnumVariant` it could not see was unambiguous.
fn emit_call(callee: &Expr, args: &[Expr], ctx: &mut CContext, out: &mut String, depth: usize) -> Result<String, CodeGenError> {
    if let Expr::FieldAccess { object, field, .. } = callee {
        let recv = emit_expr(object, ctx, out, depth)?;
        let recv_addr = if matches!(object.as_ref(), Expr::Identifier(n) if n == "self") {
            recv
        } else {
            format!("&{}", recv)
        };
        let owner = struct_owner_of(ctx, object);
        let mut arg_strs = vec![recv_addr];
        for a in args {
            arg_strs.push(emit_expr(a, ctx, out, depth)?);
        }
        let fname = match owner {
            Some(owner) => format!("{}_{}", c_ident(&owner), field),
            None => c_ident(field),
        };
        return Ok(format!("{}({})", fname, arg_strs.join(", ")));
    }
    let name = emit_expr(callee, ctx, out, depth)?;
    let mut arg_strs = Vec::new();
    for a in args {
        arg_strs.push(emit_expr(a, ctx, out, depth)?);
    }
    Ok(format!("{}({})", name, arg_strs.join(", ")))
}

/// Struct/enum-type lookup for a receiver expression, used to qualify the
/// lowered method name (`T_method`); falls back to an unqualified call
/// only when the receiver's type genuinely can't be resolved (e.g. it
/// names neither a local nor a known type).
fn struct_owner_of(ctx: &CContext, object: &Expr) -> Option<String> {
    let owner = owner_name(&infer_type(ctx, object));
    if owner.is_empty() {
        None
    } else {
        Some(owner)
    }
}

fn emit_block_as_expr(stmts: &[Stmt], ctx: &mut CContext, out: &mut String, depth: usize) -> Result<String, CodeGenError> {
    let _ = out;
    let mut inner = String::new();
    let mut tail = "0".to_string();
    for (i, stmt) in stmts.iter().enumerate() {
        if i + 1 == stmts.len() {
            if let Stmt::Expr(e) = stmt {
                tail = emit_expr(e, ctx, &mut inner, depth + 1)?;
                continue;
            }
        }
        emit_stmt(stmt, ctx, &mut inner, depth + 1)?;
    }
    writeln!(inner, "{}{};", indent(depth + 1), tail)?;
    Ok(format!("({{\n{}{}}})", inner, indent(depth)))
}

fn emit_if_as_expr(
    cond: &Expr,
    then_branch: &Expr,
    else_branch: Option<&Expr>,
    ctx: &mut CContext,
    out: &mut String,
    depth: usize,
) -> Result<String, CodeGenError> {
    let c = emit_expr(cond, ctx, out, depth)?;
    let mut inner = String::new();
    writeln!(inner, "int32_t __mr = 0;")?;
    writeln!(inner, "if ({}) {{", c)?;
    let then_val = emit_expr(then_branch, ctx, &mut inner, depth + 1)?;
    writeln!(inner, "{}__mr = {};", indent(depth + 1), then_val)?;
    writeln!(inner, "{}}}", indent(depth))?;
    if let Some(eb) = else_branch {
        writeln!(inner, "{}else {{", indent(depth))?;
        let else_val = emit_expr(eb, ctx, &mut inner, depth + 1)?;
        writeln!(inner, "{}__mr = {};", indent(depth + 1), else_val)?;
        writeln!(inner, "{}}}", indent(depth))?;
    }
    writeln!(inner, "{}__mr;", indent(depth))?;
    Ok(format!("({{ {} }})", inner))
}

/// Lowers `value is { ... }`. Variant patterns switch on the tag field
/// (the struct shape set up by [`emit_enum_typedef`]); literal/identifier
/// patterns fall back to an `if`/`else if` chain (spec §4.4).
fn emit_is_as_expr(value: &Expr, arms: &[IsArm], ctx: &mut CContext, out: &mut String, depth: usize) -> Result<String, CodeGenError> {
    let scrut_ty = infer_type(ctx, value);
    let scrut_val = emit_expr(value, ctx, out, depth)?;
    let mut inner = String::new();
    let tmp = ctx.fresh_tmp();
    writeln!(inner, "__typeof__({}) {} = {};", scrut_val, tmp, scrut_val)?;
    writeln!(inner, "int32_t __mr = 0;")?;

    let has_variant_arm = arms.iter().any(|a| matches!(a.pattern, Pattern::Variant { .. }));
    if has_variant_arm {
        writeln!(inner, "switch ({}.tag) {{", tmp)?;
        for arm in arms {
            match &arm.pattern {
                Pattern::Variant { name, bindings } => {
                    let owner = ctx.tables.variant_owners.get(name).cloned().unwrap_or_default();
                    writeln!(inner, "    case {}_TAG_{}: {{", owner.to_uppercase(), name.to_uppercase())?;
                    let field_types = variant_field_types(ctx, &owner, name);
                    if bindings.len() == 1 {
                        writeln!(
                            inner,
                            "        {} {} = {}.data.{}_value;",
                            c_type_name(field_types.first().unwrap_or(&Type::i32())),
                            bindings[0],
                            tmp,
                            name
                        )?;
                        ctx.locals.insert(bindings[0].clone(), field_types.first().cloned().unwrap_or_else(Type::i32));
                    } else if bindings.len() > 1 {
                        for (i, b) in bindings.iter().enumerate() {
                            let fty = field_types.get(i).cloned().unwrap_or_else(Type::i32);
                            writeln!(inner, "        {} {} = {}.data.{}_value.field{};", c_type_name(&fty), b, tmp, name, i)?;
                            ctx.locals.insert(b.clone(), fty);
                        }
                    }
                    if let Some(guard) = &arm.guard {
                        let g = emit_expr(guard, ctx, &mut inner, depth + 2)?;
                        writeln!(inner, "        if ({}) {{", g)?;
                        let body_val = emit_expr(&arm.body, ctx, &mut inner, depth + 3)?;
                        writeln!(inner, "            __mr = {};", body_val)?;
                        writeln!(inner, "        }}")?;
                    } else {
                        let body_val = emit_expr(&arm.body, ctx, &mut inner, depth + 2)?;
                        writeln!(inner, "        __mr = {};", body_val)?;
                    }
                    for b in bindings {
                        ctx.locals.remove(b);
                    }
                    writeln!(inner, "        break;")?;
                    writeln!(inner, "    }}")?;
                }
                Pattern::Wildcard => {
                    writeln!(inner, "    default: {{")?;
                    let body_val = emit_expr(&arm.body, ctx, &mut inner, depth + 2)?;
                    writeln!(inner, "        __mr = {};", body_val)?;
                    writeln!(inner, "        break;")?;
                    writeln!(inner, "    }}")?;
                }
                _ => {}
            }
        }
        if !arms.iter().any(|a| matches!(a.pattern, Pattern::Wildcard)) {
            writeln!(inner, "    default: __mr = 0;")?;
        }
        writeln!(inner, "}}")?;
    } else {
        for (i, arm) in arms.iter().enumerate() {
            let kw = if i == 0 { "if" } else { "else if" };
            match &arm.pattern {
                Pattern::Literal(lit) => {
                    let lit_str = emit_expr(lit, ctx, &mut inner, depth)?;
                    writeln!(inner, "{} ({} == {}) {{", kw, tmp, lit_str)?;
                    let body_val = emit_expr(&arm.body, ctx, &mut inner, depth + 1)?;
                    writeln!(inner, "    __mr = {};", body_val)?;
                    writeln!(inner, "}}")?;
                }
                Pattern::Identifier(bind) => {
                    writeln!(inner, "{{ __typeof__({}) {} = {};", tmp, bind, tmp)?;
                    ctx.locals.insert(bind.clone(), scrut_ty.clone());
                    let body_val = emit_expr(&arm.body, ctx, &mut inner, depth + 1)?;
                    ctx.locals.remove(bind);
                    writeln!(inner, "    __mr = {}; }}", body_val)?;
                }
                Pattern::Wildcard => {
                    writeln!(inner, "{{")?;
                    let body_val = emit_expr(&arm.body, ctx, &mut inner, depth + 1)?;
                    writeln!(inner, "    __mr = {};", body_val)?;
                    writeln!(inner, "}}")?;
                }
                Pattern::Variant { .. } => {}
            }
        }
    }
    Ok(format!("({{ {} __mr; }})", inner))
}

/// `expr?`: on the `Err` tag, returns the whole `Result` value from the
/// enclosing function; otherwise extracts the `Ok` payload (spec
/// §4.4/§4.5). The checker only accepts `?` on a `Result<T, E>`-shaped
/// value (`check_try`), but doesn't fix the declared order of its two
/// variants, so the `Err` tag is looked up by name rather than assumed
/// to be index 1.
fn emit_try_as_expr(value: &Expr, ctx: &mut CContext, out: &mut String, depth: usize) -> Result<String, CodeGenError> {
    let owner = owner_name(&infer_type(ctx, value));
    let err_tag = match ctx.tables.types.get(&owner) {
        Some(TypeInfo::Enum(e)) => e.variants.iter().position(|(n, _)| n == "Err").unwrap_or(1),
        _ => 1,
    };
    let v = emit_expr(value, ctx, out, depth)?;
    let tmp = ctx.fresh_tmp();
    Ok(format!(
        "({{ __typeof__({v}) {t} = {v}; if ({t}.tag == {err_tag}) {{ return {t}; }} {t}.data.Ok_value; }})",
        v = v,
        t = tmp,
        err_tag = err_tag
    ))
}

/// Picks the `printf`-family conversion for an interpolated expression's
/// inferred type (spec §9 `repr(expr)`), casting to the conversion's
/// argument width where C's default promotions would otherwise mismatch.
fn interp_format(ty: &Type, v: &str) -> (&'static str, String) {
    match ty {
        Type::Int(w) if w.bits() > 32 && w.is_signed() => ("%lld", format!("(long long){}", v)),
        Type::Int(w) if w.bits() > 32 => ("%llu", format!("(unsigned long long){}", v)),
        Type::Int(w) if w.is_signed() => ("%d", format!("(int){}", v)),
        Type::Int(_) => ("%u", format!("(unsigned int){}", v)),
        Type::Float(_) => ("%g", v.to_string()),
        Type::Bool => ("%s", format!("(({}) ? \"true\" : \"false\")", v)),
        Type::Char => ("%c", v.to_string()),
        Type::String => ("%s", v.to_string()),
        _ => ("%d", format!("(int){}", v)),
    }
}

/// Builds `literal0 + repr(expr0) + literal1 + …` (spec §9) into a
/// heap-allocated buffer, since an interpolation result may be returned
/// from the enclosing function and must outlive its stack frame.
fn emit_string_interp(parts: &[InterpPart], ctx: &mut CContext, out: &mut String, depth: usize) -> Result<String, CodeGenError> {
    let tmp = ctx.fresh_tmp();
    writeln!(out, "{}char *{} = malloc(4096); {}[0] = 0;", indent(depth), tmp, tmp)?;
    for part in parts {
        match part {
            InterpPart::Literal(lit) => {
                writeln!(out, "{}strncat({}, \"{}\", 4095 - strlen({}));", indent(depth), tmp, escape_c_string(lit), tmp)?;
            }
            InterpPart::Expr(e) => {
                let ty = infer_type(ctx, e);
                let v = emit_expr(e, ctx, out, depth)?;
                let (fmt, arg) = interp_format(&ty, &v);
                writeln!(
                    out,
                    "{}{{ char __piece[256]; snprintf(__piece, sizeof(__piece), \"{}\", {}); strncat({}, __piece, 4095 - strlen({})); }}",
                    indent(depth), fmt, arg, tmp, tmp
                )?;
            }
        }
    }
    Ok(tmp)
}

fn escape_c_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;
    use crate::typechecker::check_program;

    fn compile(src: &str) -> String {
        let stream = tokenize(src, "t.paw").expect("lex");
        let program = parse(&stream).expect("parse");
        let tables = check_program(&program, "t.paw").expect("typecheck");
        codegen_program(&program, &tables).expect("codegen")
    }

    #[test]
    fn emits_preamble_headers() {
        let c = compile("fn main() -> i32 { return 0; }");
        assert!(c.contains("#include <stdint.h>"));
    }

    #[test]
    fn emits_struct_typedef() {
        let c = compile(
            "type Point = struct { x: i32, y: i32 }\n\
             fn main() -> i32 { let p = Point { x: 1, y: 2 }; return p.x; }",
        );
        assert!(c.contains("typedef struct {"));
        assert!(c.contains("int32_t x;"));
    }

    #[test]
    fn emits_enum_tag_typedef_and_constructor() {
        let c = compile(
            "type Result = enum { Ok(i32), Err(i32) }\n\
             fn f() -> Result { return Ok(1); }\n\
             fn main() -> i32 { let r = f(); return r is { Ok(x) => x, Err(e) => e }; }",
        );
        assert!(c.contains("RESULT_TAG_OK"));
        assert!(c.contains("Result_Ok("));
        assert!(c.contains("switch"));
    }

    #[test]
    fn range_loop_lowers_to_c_for() {
        let c = compile("fn main() -> i32 { let mut s: i32 = 0; loop i in 1..=10 { s += i; } return s; }");
        assert!(c.contains("for (int32_t i = 1; i <= 10; i++)"));
    }

    #[test]
    fn try_expr_lowers_to_tag_check_and_early_return() {
        let c = compile(
            "type Result = enum { Ok(i32), Err(i32) }\n\
             fn div(a: i32, b: i32) -> Result { if (b == 0) { return Err(0); } return Ok(a / b); }\n\
             fn run() -> Result { let v = div(10, 2)?; return Ok(v + 1); }\n\
             fn main() -> i32 { return run() is { Ok(x) => x, Err(_) => 0 - 1 }; }",
        );
        assert!(c.contains(".tag == 1"));
    }

    #[test]
    fn struct_method_gets_self_pointer_parameter() {
        let c = compile(
            "type Point = struct { x: i32, y: i32, fn sum(self) -> i32 { return self.x + self.y; } }\n\
             fn main() -> i32 { let p = Point { x: 1, y: 2 }; return p.sum(); }",
        );
        assert!(c.contains("Point* self"));
        assert!(c.contains("self->x"));
    }

    #[test]
    fn method_call_on_local_receiver_is_qualified_by_owner() {
        let c = compile(
            "type Point = struct { x: i32, y: i32, fn sum(self) -> i32 { return self.x + self.y; } }\n\
             fn main() -> i32 { let p = Point { x: 1, y: 2 }; return p.sum(); }",
        );
        assert!(c.contains("Point_sum(&p)"));
    }

    #[test]
    fn main_entry_point_is_not_keyword_escaped() {
        let c = compile("fn main() -> i32 { return 0; }");
        assert!(c.contains("int32_t main(void)"));
        assert!(!c.contains("paw_main"));
    }

    #[test]
    fn err_tag_is_resolved_by_variant_name_not_fixed_index() {
        let c = compile(
            "type Result = enum { Err(i32), Ok(i32) }\n\
             fn div(a: i32, b: i32) -> Result { if (b == 0) { return Err(0); } return Ok(a / b); }\n\
             fn run() -> Result { let v = div(10, 2)?; return Ok(v + 1); }\n\
             fn main() -> i32 { return run() is { Ok(x) => x, Err(_) => 0 - 1 }; }",
        );
        assert!(c.contains(".tag == 0"));
    }

    #[test]
    fn static_method_call_with_type_args_targets_the_one_emitted_function() {
        let c = compile(
            "type Box<T> = struct { value: T, fn wrap(x: T) -> Box<T> { return Box { value: x }; } }\n\
             fn f() -> i32 { let a = Box<i32>::wrap(1); let b = Box<i32>::wrap(2); return 0; }",
        );
        // Forward declaration, definition, and two call sites, all
        // against the same symbol name.
        assert_eq!(c.matches("Box_wrap(").count(), 4);
        assert!(!c.contains("Box_i32_wrap"));
    }
}
