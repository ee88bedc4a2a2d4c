//! LLVM backend: drives a textual-IR builder through the AST (spec §4.5).
//!
//! Unlike the C backend this module tracks its own notion of each
//! expression's [`Type`] as it walks the AST (`variable_types`), since
//! LLVM values carry no runtime type tag. Everything is emitted as plain
//! text into a `String`; there is no dependency on `inkwell`/`llvm-sys`,
//! matching the teacher's own LLVM codegen.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::ast::{
    BinaryOp, CompoundOp, Declaration, EnumVariantDecl, Expr, FieldDecl, FieldInit, FunctionDecl,
    InterpPart, IsArm, Pattern, Program, Stmt, TypeDeclKind, UnaryOp,
};
use crate::diagnostics::CodeGenError;
use crate::typechecker::TypeTables;
use crate::types::{FloatWidth, IntWidth, Type};

struct StructLayout {
    fields: Vec<(String, Type)>,
}

struct EnumLayout {
    variants: Vec<(String, Vec<Type>)>,
}

/// Owns every table spec §4.5 calls out by name, plus the running output
/// buffer and SSA-naming counters.
struct LlvmContext<'a> {
    tables: &'a TypeTables,
    output: String,
    temp_counter: usize,
    block_counter: usize,
    /// name -> alloca register (spec: `variables`)
    variables: HashMap<String, String>,
    /// name -> its Paw type (spec: `variable_types`)
    variable_types: HashMap<String, Type>,
    struct_layouts: HashMap<String, StructLayout>,
    enum_layouts: HashMap<String, EnumLayout>,
    /// mangled generic-instance names already emitted (spec: monomorphization cache)
    monomorphized: HashSet<String>,
    /// continue-target block per enclosing loop, innermost last
    loop_continue_stack: Vec<String>,
    /// exit-target block per enclosing loop, innermost last
    loop_exit_stack: Vec<String>,
    current_return_type: Type,
    /// Interned string constants (name, bytes) emitted as module-level
    /// globals once the whole program has been lowered (spec §9 string
    /// interpolation's literal fragments and `repr()` format strings).
    string_globals: Vec<(String, String)>,
}

impl<'a> LlvmContext<'a> {
    fn fresh_temp(&mut self) -> String {
        let n = self.temp_counter;
        self.temp_counter += 1;
        format!("t{}", n)
    }

    fn fresh_block(&mut self, prefix: &str) -> String {
        let n = self.block_counter;
        self.block_counter += 1;
        format!("{}{}", prefix, n)
    }

    fn emit(&mut self, line: &str) -> Result<(), CodeGenError> {
        writeln!(self.output, "{}", line)?;
        Ok(())
    }
}

pub fn codegen_program(program: &Program, tables: &TypeTables) -> Result<String, CodeGenError> {
    let mut ctx = LlvmContext {
        tables,
        output: String::with_capacity(8192),
        temp_counter: 0,
        block_counter: 0,
        variables: HashMap::new(),
        variable_types: HashMap::new(),
        struct_layouts: HashMap::new(),
        enum_layouts: HashMap::new(),
        monomorphized: HashSet::new(),
        loop_continue_stack: Vec::new(),
        loop_exit_stack: Vec::new(),
        current_return_type: Type::Void,
        string_globals: Vec::new(),
    };

    let mut header = String::new();
    writeln!(header, "; ModuleID = 'paw'")?;
    writeln!(header)?;
    // String interpolation's runtime support (spec §9): literal fragments
    // and formatted expression pieces are folded together through this
    // declared concatenation routine rather than inline buffer stores.
    writeln!(header, "declare ptr @paw_concat(ptr, ptr)")?;
    writeln!(header, "declare i32 @sprintf(ptr, ptr, ...)")?;
    writeln!(header)?;

    for decl in &program.declarations {
        if let Declaration::TypeDecl(t) = decl {
            match &t.kind {
                TypeDeclKind::Struct { fields, .. } => {
                    ctx.struct_layouts.insert(
                        t.name.clone(),
                        StructLayout { fields: fields.iter().map(|f| (f.name.clone(), f.type_ann.clone())).collect() },
                    );
                    emit_struct_type(&t.name, fields, &mut header)?;
                }
                TypeDeclKind::Enum { variants, .. } => {
                    ctx.enum_layouts.insert(
                        t.name.clone(),
                        EnumLayout { variants: variants.iter().map(|v| (v.name.clone(), v.fields.clone())).collect() },
                    );
                    emit_enum_type(&t.name, &mut header)?;
                }
                TypeDeclKind::Trait { .. } => {}
            }
        }
    }
    writeln!(header)?;

    ctx.output.push_str(&header);

    for decl in &program.declarations {
        if let Declaration::TypeDecl(t) = decl {
            if let TypeDeclKind::Enum { variants, .. } = &t.kind {
                emit_enum_constructors(&t.name, variants, &mut ctx)?;
            }
        }
    }

    let functions = collect_functions(program);
    for f in &functions {
        emit_function(f, &mut ctx)?;
    }

    if !ctx.string_globals.is_empty() {
        writeln!(ctx.output)?;
        for (name, bytes) in &ctx.string_globals {
            writeln!(
                ctx.output,
                "{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
                name,
                bytes.len() + 1,
                escape_ll_string(bytes)
            )?;
        }
    }

    Ok(ctx.output)
}

/// Escapes bytes outside printable ASCII (and `\`/`"`) as LLVM's `\XX`
/// hex-pair string-constant syntax.
fn escape_ll_string(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
        match b {
            b'\\' => out.push_str("\\5C"),
            b'"' => out.push_str("\\22"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:02X}", b)),
        }
    }
    out
}

/// Interns a string as a private global constant, returning the `ptr`-
/// typed global name to reference it at a use site.
fn intern_string(ctx: &mut LlvmContext, s: &str) -> String {
    let name = format!("@.str.{}", ctx.string_globals.len());
    ctx.string_globals.push((name.clone(), s.to_string()));
    name
}

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

fn ll_ident(name: &str) -> String {
    name.replace('-', "_")
}

/// Spec §4.5: `bool` is a uniform 8-bit value in LLVM IR; comparisons
/// produce `i1` and are immediately zero-extended.
fn llvm_type(ty: &Type) -> String {
    match ty {
        Type::Int(w) => format!("i{}", w.bits()),
        Type::Float(FloatWidth::F32) => "float".to_string(),
        Type::Float(FloatWidth::F64) => "double".to_string(),
        Type::Bool => "i8".to_string(),
        Type::Char => "i8".to_string(),
        Type::String => "ptr".to_string(),
        Type::Void => "void".to_string(),
        Type::Named(name) => format!("%{}", ll_ident(name)),
        Type::GenericInstance { .. } => format!("%{}", ll_ident(&ty.mangle_fragment())),
        Type::Pointer(_) => "ptr".to_string(),
        Type::Array(_, _) => "ptr".to_string(),
        Type::Function { .. } => "ptr".to_string(),
        Type::Generic(_) => "i32".to_string(),
    }
}

fn emit_struct_type(name: &str, fields: &[FieldDecl], out: &mut String) -> Result<(), CodeGenError> {
    let field_tys: Vec<String> = fields.iter().map(|f| llvm_type(&f.type_ann)).collect();
    writeln!(out, "%{} = type {{ {} }}", ll_ident(name), field_tys.join(", "))?;
    Ok(())
}

/// Spec §4.5: every enum, regardless of variant shape, becomes a single
/// fixed-size `{ i32 tag, [32 x i8] data }` — the data buffer is
/// bit-cast to the concrete payload type per variant at construction and
/// unpack sites.
fn emit_enum_type(name: &str, out: &mut String) -> Result<(), CodeGenError> {
    writeln!(out, "%{} = type {{ i32, [32 x i8] }}", ll_ident(name))?;
    Ok(())
}

fn variant_tag_index(ctx: &LlvmContext, owner: &str, variant: &str) -> i64 {
    ctx.enum_layouts
        .get(owner)
        .and_then(|l| l.variants.iter().position(|(n, _)| n == variant))
        .unwrap_or(0) as i64
}

fn variant_field_types(ctx: &LlvmContext, owner: &str, variant: &str) -> Vec<Type> {
    ctx.enum_layouts
        .get(owner)
        .and_then(|l| l.variants.iter().find(|(n, _)| n == variant).map(|(_, f)| f.clone()))
        .unwrap_or_default()
}

fn payload_llvm_type(fields: &[Type]) -> String {
    if fields.len() == 1 {
        llvm_type(&fields[0])
    } else {
        format!("{{ {} }}", fields.iter().map(llvm_type).collect::<Vec<_>>().join(", "))
    }
}

/// Each constructor stores the tag, bit-casts the `[32 x i8]` buffer to
/// the variant's payload type, and stores the arguments through it
/// (spec §4.5).
fn emit_enum_constructors(name: &str, variants: &[EnumVariantDecl], ctx: &mut LlvmContext) -> Result<(), CodeGenError> {
    let ename = ll_ident(name);
    for (idx, v) in variants.iter().enumerate() {
        let params: Vec<String> = v
            .fields
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} %a{}", llvm_type(ty), i))
            .collect();
        ctx.emit(&format!("define %{} @{}_{}({}) {{", ename, ename, v.name, params.join(", ")))?;
        ctx.emit("entry:")?;
        let slot = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = alloca %{}", slot, ename))?;
        let tag_ptr = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = getelementptr %{}, ptr %{}, i32 0, i32 0", tag_ptr, ename, slot))?;
        ctx.emit(&format!("  store i32 {}, ptr %{}", idx, tag_ptr))?;
        if !v.fields.is_empty() {
            let data_ptr = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = getelementptr %{}, ptr %{}, i32 0, i32 1", data_ptr, ename, slot))?;
            let payload_ty = payload_llvm_type(&v.fields);
            if v.fields.len() == 1 {
                ctx.emit(&format!("  store {} %a0, ptr %{}", payload_ty, data_ptr))?;
            } else {
                for i in 0..v.fields.len() {
                    let fld_ptr = ctx.fresh_temp();
                    ctx.emit(&format!(
                        "  %{} = getelementptr {}, ptr %{}, i32 0, i32 {}",
                        fld_ptr, payload_ty, data_ptr, i
                    ))?;
                    ctx.emit(&format!("  store {} %a{}, ptr %{}", llvm_type(&v.fields[i]), i, fld_ptr))?;
                }
            }
        }
        let result = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = load %{}, ptr %{}", result, ename, slot))?;
        ctx.emit(&format!("  ret %{} %{}", ename, result))?;
        ctx.emit("}")?;
        ctx.emit("")?;
    }
    Ok(())
}

fn has_self_receiver(f: &FunctionDecl) -> bool {
    f.params.first().is_some_and(|p| p.name == "self")
}

fn function_ll_name(f: &FunctionDecl) -> String {
    match &f.self_type {
        Some(owner) => format!("{}_{}", ll_ident(owner), f.name),
        None => ll_ident(&f.name),
    }
}

fn emit_function(f: &FunctionDecl, ctx: &mut LlvmContext) -> Result<(), CodeGenError> {
    ctx.variables.clear();
    ctx.variable_types.clear();
    ctx.current_return_type = f.return_type.clone();

    let rest = if has_self_receiver(f) { &f.params[1..] } else { &f.params[..] };
    let mut params = Vec::new();
    if has_self_receiver(f) {
        params.push("ptr %self".to_string());
    }
    for p in rest {
        params.push(format!("{} %arg_{}", llvm_type(&p.type_ann), ll_ident(&p.name)));
    }

    let ret_ty = llvm_type(&f.return_type);
    ctx.emit(&format!("define {} @{}({}) {{", ret_ty, function_ll_name(f), params.join(", ")))?;
    ctx.emit("entry:")?;

    if has_self_receiver(f) {
        ctx.variables.insert("self".to_string(), "self".to_string());
        let owner = f.self_type.clone().unwrap_or_default();
        ctx.variable_types.insert("self".to_string(), Type::Pointer(Box::new(Type::Named(owner))));
    }
    for p in rest {
        let alloca = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = alloca {}", alloca, llvm_type(&p.type_ann)))?;
        ctx.emit(&format!("  store {} %arg_{}, ptr %{}", llvm_type(&p.type_ann), ll_ident(&p.name), alloca))?;
        ctx.variables.insert(p.name.clone(), alloca);
        ctx.variable_types.insert(p.name.clone(), p.type_ann.clone());
    }

    let mut terminated = false;
    for stmt in &f.body {
        terminated = emit_stmt(stmt, ctx)?;
        if terminated {
            break;
        }
    }
    if !terminated {
        if matches!(f.return_type, Type::Void) {
            ctx.emit("  ret void")?;
        } else {
            ctx.emit(&format!("  ret {} zeroinitializer", ret_ty))?;
        }
    }
    ctx.emit("}")?;
    ctx.emit("")?;
    Ok(())
}

/// Lowers a statement. Returns whether the statement unconditionally
/// terminated the current block (so callers can stop emitting dead code
/// after it — LLVM rejects a block with more than one terminator).
fn emit_stmt(stmt: &Stmt, ctx: &mut LlvmContext) -> Result<bool, CodeGenError> {
    match stmt {
        Stmt::Expr(e) => {
            emit_expr(e, ctx)?;
            Ok(false)
        }
        Stmt::Let { name, type_ann, init, .. } => {
            let (value, inferred) = match init {
                Some(e) => emit_expr(e, ctx)?,
                None => ("0".to_string(), Type::i32()),
            };
            let ty = type_ann.clone().unwrap_or(inferred);
            let ll_ty = llvm_type(&ty);
            let alloca = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = alloca {}", alloca, ll_ty))?;
            ctx.emit(&format!("  store {} {}, ptr %{}", ll_ty, value, alloca))?;
            ctx.variables.insert(name.clone(), alloca);
            ctx.variable_types.insert(name.clone(), ty);
            Ok(false)
        }
        Stmt::Assign { target, value, .. } => {
            let (v, _) = emit_expr(value, ctx)?;
            let (ptr, ty) = emit_place(target, ctx)?;
            ctx.emit(&format!("  store {} {}, ptr {}", llvm_type(&ty), v, ptr))?;
            Ok(false)
        }
        Stmt::CompoundAssign { target, op, value, .. } => {
            let (ptr, ty) = emit_place(target, ctx)?;
            let ll_ty = llvm_type(&ty);
            let cur = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = load {}, ptr {}", cur, ll_ty, ptr))?;
            let (rhs, _) = emit_expr(value, ctx)?;
            let opname = match op {
                CompoundOp::AddAssign => if ty.is_float() { "fadd" } else { "add" },
                CompoundOp::SubAssign => if ty.is_float() { "fsub" } else { "sub" },
                CompoundOp::MulAssign => if ty.is_float() { "fmul" } else { "mul" },
                CompoundOp::DivAssign => if ty.is_float() { "fdiv" } else { "sdiv" },
                CompoundOp::ModAssign => if ty.is_float() { "frem" } else { "srem" },
            };
            let result = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = {} {} %{}, {}", result, opname, ll_ty, cur, rhs))?;
            ctx.emit(&format!("  store {} %{}, ptr {}", ll_ty, result, ptr))?;
            Ok(false)
        }
        Stmt::Return(value, _) => {
            match value {
                Some(v) => {
                    let (val, _) = emit_expr(v, ctx)?;
                    let ret_ty = llvm_type(&ctx.current_return_type);
                    ctx.emit(&format!("  ret {} {}", ret_ty, val))?;
                }
                None => ctx.emit("  ret void")?,
            }
            Ok(true)
        }
        Stmt::Break(_, _) => {
            let target = ctx.loop_exit_stack.last().cloned().ok_or_else(|| {
                CodeGenError::Logic("break outside a loop".to_string())
            })?;
            ctx.emit(&format!("  br label %{}", target))?;
            Ok(true)
        }
        Stmt::Continue(_) => {
            let target = ctx.loop_continue_stack.last().cloned().ok_or_else(|| {
                CodeGenError::Logic("continue outside a loop".to_string())
            })?;
            ctx.emit(&format!("  br label %{}", target))?;
            Ok(true)
        }
        Stmt::Loop { cond, iterator, body, .. } => emit_loop(cond.as_ref(), iterator.as_ref(), body, ctx),
        Stmt::WhileLoop { cond, body, .. } => emit_loop(Some(cond), None, body, ctx),
        Stmt::ForLoop { binding, iterable, body, .. } => {
            emit_loop(None, Some(&(binding.clone(), iterable.clone())), body, ctx)
        }
    }
}

/// Resolves an assignment target to a pointer register plus its Paw
/// type; `self.field` and plain identifiers are the only targets the
/// grammar produces.
fn emit_place(expr: &Expr, ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    match expr {
        Expr::Identifier(name) => {
            let ptr = ctx.variables.get(name).cloned().ok_or_else(|| {
                CodeGenError::Unresolved(format!("undefined variable `{}`", name))
            })?;
            let ty = ctx.variable_types.get(name).cloned().unwrap_or_else(Type::i32);
            Ok((format!("%{}", ptr), ty))
        }
        Expr::FieldAccess { object, field, .. } => {
            let (base_ptr, base_ty) = emit_place(object, ctx)?;
            let owner = match &base_ty {
                Type::Named(n) => n.clone(),
                Type::Pointer(inner) => match inner.as_ref() {
                    Type::Named(n) => n.clone(),
                    _ => String::new(),
                },
                _ => String::new(),
            };
            let (idx, field_ty) = field_index(ctx, &owner, field);
            let gep = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = getelementptr %{}, ptr {}, i32 0, i32 {}", gep, ll_ident(&owner), base_ptr, idx))?;
            Ok((format!("%{}", gep), field_ty))
        }
        _ => Err(CodeGenError::Logic("unsupported assignment target".to_string())),
    }
}

fn field_index(ctx: &LlvmContext, owner: &str, field: &str) -> (usize, Type) {
    ctx.struct_layouts
        .get(owner)
        .and_then(|l| l.fields.iter().position(|(n, _)| n == field).map(|i| (i, l.fields[i].1.clone())))
        .unwrap_or((0, Type::i32()))
}

fn emit_loop(
    cond: Option<&Expr>,
    iterator: Option<&(String, Expr)>,
    body: &[Stmt],
    ctx: &mut LlvmContext,
) -> Result<bool, CodeGenError> {
    if let Some((var, iterable)) = iterator {
        if let Expr::Range { start, end, inclusive, .. } = iterable {
            let (start_val, _) = emit_expr(start, ctx)?;
            let (end_val, _) = emit_expr(end, ctx)?;
            let iter_alloca = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = alloca i32", iter_alloca))?;
            ctx.emit(&format!("  store i32 {}, ptr %{}", start_val, iter_alloca))?;
            ctx.variables.insert(var.clone(), iter_alloca.clone());
            ctx.variable_types.insert(var.clone(), Type::i32());

            let cond_block = ctx.fresh_block("loop_cond");
            let body_block = ctx.fresh_block("loop_body");
            let incr_block = ctx.fresh_block("loop_incr");
            let exit_block = ctx.fresh_block("loop_exit");

            ctx.emit(&format!("  br label %{}", cond_block))?;
            ctx.emit(&format!("{}:", cond_block))?;
            let cur = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = load i32, ptr %{}", cur, iter_alloca))?;
            let cmp_op = if *inclusive { "sle" } else { "slt" };
            let cmp = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = icmp {} i32 %{}, {}", cmp, cmp_op, cur, end_val))?;
            ctx.emit(&format!("  br i1 %{}, label %{}, label %{}", cmp, body_block, exit_block))?;

            ctx.emit(&format!("{}:", body_block))?;
            ctx.loop_continue_stack.push(incr_block.clone());
            ctx.loop_exit_stack.push(exit_block.clone());
            let mut terminated = false;
            for s in body {
                terminated = emit_stmt(s, ctx)?;
                if terminated {
                    break;
                }
            }
            ctx.loop_continue_stack.pop();
            ctx.loop_exit_stack.pop();
            if !terminated {
                ctx.emit(&format!("  br label %{}", incr_block))?;
            }

            ctx.emit(&format!("{}:", incr_block))?;
            let loaded = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = load i32, ptr %{}", loaded, iter_alloca))?;
            let next = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = add i32 %{}, 1", next, loaded))?;
            ctx.emit(&format!("  store i32 %{}, ptr %{}", next, iter_alloca))?;
            ctx.emit(&format!("  br label %{}", cond_block))?;

            ctx.emit(&format!("{}:", exit_block))?;
            ctx.variables.remove(var);
            ctx.variable_types.remove(var);
            return Ok(false);
        }

        // Array-literal iteration: emit the elements as a stack array and
        // index over it with an ordinary counted loop.
        let (arr_ptr, elem_ty) = emit_array_alloca(iterable, ctx)?;
        let len = match iterable {
            Expr::ArrayLiteral { elements, .. } => elements.len() as i64,
            _ => 0,
        };
        let idx_alloca = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = alloca i64", idx_alloca))?;
        ctx.emit(&format!("  store i64 0, ptr %{}", idx_alloca))?;

        let cond_block = ctx.fresh_block("loop_cond");
        let body_block = ctx.fresh_block("loop_body");
        let incr_block = ctx.fresh_block("loop_incr");
        let exit_block = ctx.fresh_block("loop_exit");

        ctx.emit(&format!("  br label %{}", cond_block))?;
        ctx.emit(&format!("{}:", cond_block))?;
        let idx_val = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = load i64, ptr %{}", idx_val, idx_alloca))?;
        let cmp = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = icmp slt i64 %{}, {}", cmp, idx_val, len))?;
        ctx.emit(&format!("  br i1 %{}, label %{}, label %{}", cmp, body_block, exit_block))?;

        ctx.emit(&format!("{}:", body_block))?;
        let elem_ptr = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = getelementptr {}, ptr %{}, i64 %{}", elem_ptr, llvm_type(&elem_ty), arr_ptr, idx_val))?;
        let binding_alloca = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = alloca {}", binding_alloca, llvm_type(&elem_ty)))?;
        let elem_val = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = load {}, ptr %{}", elem_val, llvm_type(&elem_ty), elem_ptr))?;
        ctx.emit(&format!("  store {} %{}, ptr %{}", llvm_type(&elem_ty), elem_val, binding_alloca))?;
        ctx.variables.insert(var.clone(), binding_alloca);
        ctx.variable_types.insert(var.clone(), elem_ty);

        ctx.loop_continue_stack.push(incr_block.clone());
        ctx.loop_exit_stack.push(exit_block.clone());
        let mut terminated = false;
        for s in body {
            terminated = emit_stmt(s, ctx)?;
            if terminated {
                break;
            }
        }
        ctx.loop_continue_stack.pop();
        ctx.loop_exit_stack.pop();
        if !terminated {
            ctx.emit(&format!("  br label %{}", incr_block))?;
        }

        ctx.emit(&format!("{}:", incr_block))?;
        let cur_idx = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = load i64, ptr %{}", cur_idx, idx_alloca))?;
        let next_idx = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = add i64 %{}, 1", next_idx, cur_idx))?;
        ctx.emit(&format!("  store i64 %{}, ptr %{}", next_idx, idx_alloca))?;
        ctx.emit(&format!("  br label %{}", cond_block))?;

        ctx.emit(&format!("{}:", exit_block))?;
        ctx.variables.remove(var);
        ctx.variable_types.remove(var);
        return Ok(false);
    }

    // Plain `while`/infinite loop.
    let cond_block = ctx.fresh_block("loop_cond");
    let body_block = ctx.fresh_block("loop_body");
    let exit_block = ctx.fresh_block("loop_exit");

    ctx.emit(&format!("  br label %{}", cond_block))?;
    ctx.emit(&format!("{}:", cond_block))?;
    match cond {
        Some(c) => {
            let (v, _) = emit_expr(c, ctx)?;
            let narrowed = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = icmp ne i8 {}, 0", narrowed, v))?;
            ctx.emit(&format!("  br i1 %{}, label %{}, label %{}", narrowed, body_block, exit_block))?;
        }
        None => ctx.emit(&format!("  br label %{}", body_block))?,
    }

    ctx.emit(&format!("{}:", body_block))?;
    ctx.loop_continue_stack.push(cond_block.clone());
    ctx.loop_exit_stack.push(exit_block.clone());
    let mut terminated = false;
    for s in body {
        terminated = emit_stmt(s, ctx)?;
        if terminated {
            break;
        }
    }
    ctx.loop_continue_stack.pop();
    ctx.loop_exit_stack.pop();
    if !terminated {
        ctx.emit(&format!("  br label %{}", cond_block))?;
    }

    ctx.emit(&format!("{}:", exit_block))?;
    Ok(false)
}

fn emit_array_alloca(expr: &Expr, ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    if let Expr::ArrayLiteral { elements, .. } = expr {
        let elem_ty = infer_type(elements.first().unwrap_or(&Expr::IntLiteral(0)), ctx);
        let ll_ty = llvm_type(&elem_ty);
        let arr = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = alloca [{} x {}]", arr, elements.len(), ll_ty))?;
        let base = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = getelementptr [{} x {}], ptr %{}, i64 0, i64 0", base, elements.len(), ll_ty, arr))?;
        for (i, e) in elements.iter().enumerate() {
            let (v, _) = emit_expr(e, ctx)?;
            let slot = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = getelementptr {}, ptr %{}, i64 {}", slot, ll_ty, base, i))?;
            ctx.emit(&format!("  store {} {}, ptr %{}", ll_ty, v, slot))?;
        }
        return Ok((base, elem_ty));
    }
    let (v, ty) = emit_expr(expr, ctx)?;
    Ok((v, ty))
}

/// A light structural type-inferencer: the checker's own per-expression
/// type annotations aren't threaded through to codegen (spec §4.5 has
/// the backend keep its own `variable_types`), so this recomputes just
/// enough to pick an LLVM type for a freshly materialized temporary.
fn infer_type(expr: &Expr, ctx: &LlvmContext) -> Type {
    match expr {
        Expr::IntLiteral(_) => Type::i32(),
        Expr::FloatLiteral(_) => Type::f64(),
        Expr::BoolLiteral(_) => Type::Bool,
        Expr::CharLiteral(_) => Type::Char,
        Expr::StringLiteral(_) => Type::String,
        Expr::Identifier(name) => ctx.variable_types.get(name).cloned().unwrap_or_else(Type::i32),
        Expr::Binary { op, left, .. } => match op {
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq
            | BinaryOp::And
            | BinaryOp::Or => Type::Bool,
            _ => infer_type(left, ctx),
        },
        Expr::Unary { operand, .. } => infer_type(operand, ctx),
        Expr::Call { callee, .. } => match callee.as_ref() {
            Expr::Identifier(name) => ctx
                .tables
                .functions
                .get(name)
                .map(|sig| sig.return_type.clone())
                .unwrap_or_else(Type::i32),
            _ => Type::i32(),
        },
        Expr::StaticMethodCall { type_name, method_name, .. } => {
            lookup_method_return(ctx, type_name, method_name)
        }
        Expr::FieldAccess { object, field, .. } => {
            let base = infer_type(object, ctx);
            let owner = match &base {
                Type::Named(n) => n.clone(),
                Type::Pointer(inner) => match inner.as_ref() {
                    Type::Named(n) => n.clone(),
                    _ => return Type::i32(),
                },
                _ => return Type::i32(),
            };
            field_index(ctx, &owner, field).1
        }
        Expr::StructInit { type_name, .. } => Type::Named(type_name.clone()),
        Expr::EnumVariant { enum_name, variant, .. } => {
            let owner = enum_name.clone().or_else(|| ctx.tables.variant_owners.get(variant).cloned());
            Type::Named(owner.unwrap_or_default())
        }
        Expr::Block(stmts) => stmts
            .last()
            .and_then(|s| match s {
                Stmt::Expr(e) => Some(infer_type(e, ctx)),
                _ => None,
            })
            .unwrap_or(Type::Void),
        Expr::If { then_branch, .. } => infer_type(then_branch, ctx),
        Expr::Is { arms, .. } => arms.first().map(|a| infer_type(&a.body, ctx)).unwrap_or(Type::i32()),
        Expr::As { target_type, .. } => target_type.clone(),
        Expr::Await { value, .. } => infer_type(value, ctx),
        Expr::ArrayLiteral { elements, .. } => {
            Type::Array(Box::new(elements.first().map(|e| infer_type(e, ctx)).unwrap_or_else(Type::i32)), Some(elements.len()))
        }
        Expr::ArrayIndex { array, .. } => match infer_type(array, ctx) {
            Type::Array(inner, _) => *inner,
            _ => Type::i32(),
        },
        Expr::Range { .. } => Type::i32(),
        Expr::StringInterp { .. } => Type::String,
        Expr::Try { value, .. } => match infer_type(value, ctx) {
            Type::GenericInstance { args, .. } => args.first().cloned().unwrap_or_else(Type::i32),
            _ => Type::i32(),
        },
    }
}

fn lookup_method_return(ctx: &LlvmContext, type_name: &str, method_name: &str) -> Type {
    use crate::typechecker::TypeInfo;
    match ctx.tables.types.get(type_name) {
        Some(TypeInfo::Struct(s)) => s.methods.get(method_name).map(|sig| sig.return_type.clone()).unwrap_or_else(Type::i32),
        Some(TypeInfo::Enum(e)) => e.methods.get(method_name).map(|sig| sig.return_type.clone()).unwrap_or_else(Type::i32),
        Some(TypeInfo::Trait(t)) => t.methods.get(method_name).map(|sig| sig.return_type.clone()).unwrap_or_else(Type::i32),
        None => Type::i32(),
    }
}

/// Records that a generic instance has been referenced at a call site,
/// for the monomorphization-cache testable property (spec §8 property
/// 2: exactly one emission per distinct mangled name). This backend
/// emits a type's methods once per declaring type rather than once per
/// instantiation (struct/enum layouts are likewise emitted once, with
/// generic fields uniformly widened), so the callee name used at the
/// call site must stay `ll_ident(type_name)` regardless of type
/// arguments — only the cache bookkeeping is keyed on the mangled name.
fn mangled_type_name(type_name: &str, type_args: &[Type], ctx: &mut LlvmContext) -> String {
    if !type_args.is_empty() {
        let inst = Type::GenericInstance { name: type_name.to_string(), args: type_args.to_vec() };
        ctx.monomorphized.insert(inst.mangle_fragment());
    }
    ll_ident(type_name)
}

/// Lowers an expression, returning the SSA value text (a register like
/// `%t3` or a literal like `42`) together with its inferred [`Type`].
fn emit_expr(expr: &Expr, ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    match expr {
        Expr::IntLiteral(v) => Ok((v.to_string(), Type::i32())),
        Expr::FloatLiteral(v) => Ok((format!("{:?}", v), Type::f64())),
        Expr::BoolLiteral(v) => Ok((if *v { "1".to_string() } else { "0".to_string() }, Type::Bool)),
        Expr::CharLiteral(c) => Ok(((*c as u32).to_string(), Type::Char)),
        Expr::StringLiteral(s) => {
            let g = ctx.fresh_temp();
            ctx.emit(&format!(
                "  %{} = alloca [{} x i8] ; \"{}\"",
                g,
                s.len() + 1,
                s.replace('\\', "\\\\").replace('"', "\\\"")
            ))?;
            Ok((format!("%{}", g), Type::String))
        }
        Expr::Identifier(name) => {
            let ty = ctx.variable_types.get(name).cloned().unwrap_or_else(Type::i32);
            let ptr = ctx
                .variables
                .get(name)
                .cloned()
                .ok_or_else(|| CodeGenError::Unresolved(format!("undefined identifier `{}`", name)))?;
            if name == "self" {
                return Ok((format!("%{}", ptr), ty));
            }
            let reg = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = load {}, ptr %{}", reg, llvm_type(&ty), ptr))?;
            Ok((format!("%{}", reg), ty))
        }

        Expr::Binary { op, left, right, .. } => emit_binary(*op, left, right, ctx),
        Expr::Unary { op, operand, .. } => {
            let (v, ty) = emit_expr(operand, ctx)?;
            let reg = ctx.fresh_temp();
            match op {
                UnaryOp::Neg => {
                    if ty.is_float() {
                        ctx.emit(&format!("  %{} = fneg {} {}", reg, llvm_type(&ty), v))?;
                    } else {
                        ctx.emit(&format!("  %{} = sub {} 0, {}", reg, llvm_type(&ty), v))?;
                    }
                }
                UnaryOp::Not => {
                    ctx.emit(&format!("  %{} = xor i8 {}, 1", reg, v))?;
                }
            }
            Ok((format!("%{}", reg), ty))
        }

        Expr::Call { callee, args, .. } => emit_call(callee, args, ctx),

        Expr::StaticMethodCall { type_name, type_args, method_name, args, .. } => {
            let mangled = mangled_type_name(type_name, type_args, ctx);
            let mut arg_vals = Vec::new();
            for a in args {
                let (v, ty) = emit_expr(a, ctx)?;
                arg_vals.push(format!("{} {}", llvm_type(&ty), v));
            }
            let ret_ty = llvm_type(&lookup_method_return(ctx, type_name, method_name));
            let reg = ctx.fresh_temp();
            ctx.emit(&format!(
                "  %{} = call {} @{}_{}({})",
                reg, ret_ty, mangled, method_name, arg_vals.join(", ")
            ))?;
            Ok((format!("%{}", reg), lookup_method_return(ctx, type_name, method_name)))
        }

        Expr::FieldAccess { object, field, .. } => {
            let (ptr, field_ty) = emit_place(expr, ctx)?;
            let _ = object;
            let reg = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = load {}, ptr {}", reg, llvm_type(&field_ty), ptr))?;
            let _ = field;
            Ok((format!("%{}", reg), field_ty))
        }

        Expr::StructInit { type_name, fields, .. } => {
            let ename = ll_ident(type_name);
            let slot = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = alloca %{}", slot, ename))?;
            for FieldInit { name, value } in fields {
                let (idx, field_ty) = field_index(ctx, type_name, name);
                let (v, _) = emit_expr(value, ctx)?;
                let gep = ctx.fresh_temp();
                ctx.emit(&format!("  %{} = getelementptr %{}, ptr %{}, i32 0, i32 {}", gep, ename, slot, idx))?;
                ctx.emit(&format!("  store {} {}, ptr %{}", llvm_type(&field_ty), v, gep))?;
            }
            Ok((format!("%{}", slot), Type::Named(type_name.clone())))
        }

        Expr::EnumVariant { enum_name, variant, args, .. } => {
            let owner = enum_name
                .clone()
                .or_else(|| ctx.tables.variant_owners.get(variant).cloned())
                .unwrap_or_default();
            let ename = ll_ident(&owner);
            let mut arg_vals = Vec::new();
            for a in args {
                let (v, ty) = emit_expr(a, ctx)?;
                arg_vals.push(format!("{} {}", llvm_type(&ty), v));
            }
            let reg = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = call %{} @{}_{}({})", reg, ename, ename, variant, arg_vals.join(", ")))?;
            Ok((format!("%{}", reg), Type::Named(owner)))
        }

        Expr::Block(stmts) => emit_block_value(stmts, ctx),
        Expr::If { cond, then_branch, else_branch, .. } => emit_if_value(cond, then_branch, else_branch.as_deref(), ctx),
        Expr::Is { value, arms, .. } => emit_is_value(value, arms, ctx),
        Expr::As { value, target_type, .. } => emit_cast(value, target_type, ctx),
        Expr::Await { value, .. } => emit_expr(value, ctx),

        Expr::ArrayLiteral { .. } => {
            let (ptr, elem_ty) = emit_array_alloca(expr, ctx)?;
            Ok((format!("%{}", ptr), Type::Array(Box::new(elem_ty), None)))
        }
        Expr::ArrayIndex { array, index, .. } => {
            let (base, ty) = emit_expr(array, ctx)?;
            let elem_ty = match &ty {
                Type::Array(inner, _) => inner.as_ref().clone(),
                _ => Type::i32(),
            };
            let (idx, _) = emit_expr(index, ctx)?;
            let gep = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = getelementptr {}, ptr {}, i64 {}", gep, llvm_type(&elem_ty), base, idx))?;
            let reg = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = load {}, ptr %{}", reg, llvm_type(&elem_ty), gep))?;
            Ok((format!("%{}", reg), elem_ty))
        }
        Expr::Range { start, .. } => emit_expr(start, ctx),
        Expr::StringInterp { parts, .. } => emit_string_interp(parts, ctx),
        Expr::Try { value, .. } => emit_try(value, ctx),
    }
}

fn emit_binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    let (l, lty) = emit_expr(left, ctx)?;
    let (r, _) = emit_expr(right, ctx)?;
    let ll_ty = llvm_type(&lty);
    let is_float = lty.is_float();

    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let reg = ctx.fresh_temp();
        let instr = if matches!(op, BinaryOp::And) { "and" } else { "or" };
        ctx.emit(&format!("  %{} = {} i8 {}, {}", reg, instr, l, r))?;
        return Ok((format!("%{}", reg), Type::Bool));
    }

    if matches!(op, BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq) {
        let cmp_op = if is_float {
            match op {
                BinaryOp::Eq => "oeq",
                BinaryOp::NotEq => "one",
                BinaryOp::Lt => "olt",
                BinaryOp::LtEq => "ole",
                BinaryOp::Gt => "ogt",
                BinaryOp::GtEq => "oge",
                _ => unreachable!(),
            }
        } else {
            match op {
                BinaryOp::Eq => "eq",
                BinaryOp::NotEq => "ne",
                BinaryOp::Lt => "slt",
                BinaryOp::LtEq => "sle",
                BinaryOp::Gt => "sgt",
                BinaryOp::GtEq => "sge",
                _ => unreachable!(),
            }
        };
        let instr = if is_float { "fcmp" } else { "icmp" };
        let cmp = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = {} {} {} {}, {}", cmp, instr, cmp_op, ll_ty, l, r))?;
        // Comparison re-narrowed to a uniform i8 bool (spec §4.5).
        let ext = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = zext i1 %{} to i8", ext, cmp))?;
        return Ok((format!("%{}", ext), Type::Bool));
    }

    let instr = match (op, is_float) {
        (BinaryOp::Add, false) => "add",
        (BinaryOp::Add, true) => "fadd",
        (BinaryOp::Sub, false) => "sub",
        (BinaryOp::Sub, true) => "fsub",
        (BinaryOp::Mul, false) => "mul",
        (BinaryOp::Mul, true) => "fmul",
        (BinaryOp::Div, false) => "sdiv",
        (BinaryOp::Div, true) => "fdiv",
        (BinaryOp::Mod, false) => "srem",
        (BinaryOp::Mod, true) => "frem",
        _ => unreachable!(),
    };
    let reg = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = {} {} {}, {}", reg, instr, ll_ty, l, r))?;
    Ok((format!("%{}", reg), lty))
}

fn emit_call(callee: &Expr, args: &[Expr], ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    if let Expr::FieldAccess { object, field, .. } = callee {
        let (recv_ptr, recv_ty) = emit_place(object, ctx)?;
        let owner = match &recv_ty {
            Type::Named(n) => n.clone(),
            Type::Pointer(inner) => match inner.as_ref() {
                Type::Named(n) => n.clone(),
                _ => String::new(),
            },
            _ => String::new(),
        };
        let mut arg_vals = vec![format!("ptr {}", recv_ptr)];
        for a in args {
            let (v, ty) = emit_expr(a, ctx)?;
            arg_vals.push(format!("{} {}", llvm_type(&ty), v));
        }
        let ret_ty = lookup_method_return(ctx, &owner, field);
        let reg = ctx.fresh_temp();
        if matches!(ret_ty, Type::Void) {
            ctx.emit(&format!("  call void @{}_{}({})", ll_ident(&owner), field, arg_vals.join(", ")))?;
            return Ok(("0".to_string(), Type::Void));
        }
        ctx.emit(&format!(
            "  %{} = call {} @{}_{}({})",
            reg, llvm_type(&ret_ty), ll_ident(&owner), field, arg_vals.join(", ")
        ))?;
        return Ok((format!("%{}", reg), ret_ty));
    }

    let name = match callee {
        Expr::Identifier(n) => n.clone(),
        _ => return Err(CodeGenError::Logic("unsupported call target".to_string())),
    };
    let sig = ctx.tables.functions.get(&name).cloned();
    let ret_ty = sig.as_ref().map(|s| s.return_type.clone()).unwrap_or_else(Type::i32);
    let mut arg_vals = Vec::new();
    for a in args {
        let (v, ty) = emit_expr(a, ctx)?;
        arg_vals.push(format!("{} {}", llvm_type(&ty), v));
    }
    if matches!(ret_ty, Type::Void) {
        ctx.emit(&format!("  call void @{}({})", ll_ident(&name), arg_vals.join(", ")))?;
        return Ok(("0".to_string(), Type::Void));
    }
    let reg = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = call {} @{}({})", reg, llvm_type(&ret_ty), ll_ident(&name), arg_vals.join(", ")))?;
    Ok((format!("%{}", reg), ret_ty))
}

/// Lowers a block's statements, reporting both its trailing value (if
/// its last statement is an expression-statement) and whether the block
/// already emitted its own terminator (`return`/`break`/`continue`,
/// possibly from a non-trailing statement) — mirrors the `terminated`
/// bool `emit_function`/`emit_loop` already thread through statement
/// sequences, extended to block-as-expression lowering.
fn emit_block_terminating(stmts: &[Stmt], ctx: &mut LlvmContext) -> Result<(Option<(String, Type)>, bool), CodeGenError> {
    if stmts.is_empty() {
        return Ok((None, false));
    }
    let mut terminated = false;
    for stmt in &stmts[..stmts.len() - 1] {
        terminated = emit_stmt(stmt, ctx)?;
        if terminated {
            break;
        }
    }
    if terminated {
        return Ok((None, true));
    }
    match stmts.last().unwrap() {
        Stmt::Expr(e) => {
            let (v, ty) = emit_expr(e, ctx)?;
            Ok((Some((v, ty)), false))
        }
        other => {
            let terminated = emit_stmt(other, ctx)?;
            Ok((None, terminated))
        }
    }
}

fn emit_block_value(stmts: &[Stmt], ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    let (value, _) = emit_block_terminating(stmts, ctx)?;
    Ok(value.unwrap_or_else(|| ("0".to_string(), Type::Void)))
}

/// Lowers an `if`/`is`-arm branch body, propagating whether it already
/// terminated its own block so the caller can skip the branch-join `br`
/// (and phi incoming edge) it would otherwise unconditionally emit —
/// emitting one would produce a second terminator in an already-`ret`/
/// `br`-terminated block (spec §4.5's terminator check).
fn emit_branch_body(expr: &Expr, ctx: &mut LlvmContext) -> Result<(Option<(String, Type)>, bool), CodeGenError> {
    match expr {
        Expr::Block(stmts) => emit_block_terminating(stmts, ctx),
        other => {
            let (v, ty) = emit_expr(other, ctx)?;
            Ok((Some((v, ty)), false))
        }
    }
}

/// Spec §4.5: a PHI at `cont` only takes incoming edges from branches
/// that actually reached it (a branch ending in `return`/`break` never
/// contributes).
fn emit_if_value(
    cond: &Expr,
    then_branch: &Expr,
    else_branch: Option<&Expr>,
    ctx: &mut LlvmContext,
) -> Result<(String, Type), CodeGenError> {
    let (c, _) = emit_expr(cond, ctx)?;
    let narrowed = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = icmp ne i8 {}, 0", narrowed, c))?;

    let then_block = ctx.fresh_block("if_then");
    let else_block = ctx.fresh_block("if_else");
    let cont_block = ctx.fresh_block("if_cont");

    ctx.emit(&format!("  br i1 %{}, label %{}, label %{}", narrowed, then_block, else_block))?;

    let mut incoming: Vec<(String, String)> = Vec::new();

    ctx.emit(&format!("{}:", then_block))?;
    let (then_result, then_terminated) = emit_branch_body(then_branch, ctx)?;
    let then_ty = then_result.as_ref().map(|(_, t)| t.clone()).unwrap_or(Type::Void);
    if !then_terminated {
        let (val, _) = then_result.unwrap_or_else(|| ("0".to_string(), Type::Void));
        let then_pred = ctx.fresh_block("if_then_end");
        ctx.emit(&format!("  br label %{}", then_pred))?;
        ctx.emit(&format!("{}:", then_pred))?;
        ctx.emit(&format!("  br label %{}", cont_block))?;
        incoming.push((val, then_pred));
    }

    ctx.emit(&format!("{}:", else_block))?;
    let (else_result, else_terminated) = match else_branch {
        Some(eb) => emit_branch_body(eb, ctx)?,
        None => (Some(("0".to_string(), then_ty.clone())), false),
    };
    let result_ty = if !then_terminated {
        then_ty
    } else if let Some((_, t)) = &else_result {
        t.clone()
    } else {
        Type::Void
    };
    if !else_terminated {
        let (val, _) = else_result.unwrap_or_else(|| ("0".to_string(), Type::Void));
        let else_pred = ctx.fresh_block("if_else_end");
        ctx.emit(&format!("  br label %{}", else_pred))?;
        ctx.emit(&format!("{}:", else_pred))?;
        ctx.emit(&format!("  br label %{}", cont_block))?;
        incoming.push((val, else_pred));
    }

    ctx.emit(&format!("{}:", cont_block))?;
    if incoming.is_empty() || matches!(result_ty, Type::Void) {
        return Ok(("0".to_string(), result_ty));
    }
    let merged = ctx.fresh_temp();
    let phi_parts: Vec<String> = incoming.iter().map(|(v, b)| format!("[ {}, %{} ]", v, b)).collect();
    ctx.emit(&format!("  %{} = phi {} {}", merged, llvm_type(&result_ty), phi_parts.join(", ")))?;
    Ok((format!("%{}", merged), result_ty))
}

/// Finishes an `is`-arm body: if it already terminated its own block
/// (`return`/`break`/`continue`), emits nothing further — doing so would
/// give that block a second terminator. Otherwise routes the arm's value
/// through a fresh end block into `cont_block` and records the matching
/// phi incoming edge.
fn finish_is_arm(
    result: Option<(String, Type)>,
    terminated: bool,
    cont_block: &str,
    incoming: &mut Vec<(String, String)>,
    result_ty: &mut Type,
    ctx: &mut LlvmContext,
) -> Result<(), CodeGenError> {
    if terminated {
        return Ok(());
    }
    let (val, ty) = result.unwrap_or_else(|| ("0".to_string(), Type::Void));
    *result_ty = ty;
    let end_block = ctx.fresh_block("is_arm_end");
    ctx.emit(&format!("  br label %{}", end_block))?;
    ctx.emit(&format!("{}:", end_block))?;
    ctx.emit(&format!("  br label %{}", cont_block))?;
    incoming.push((val, end_block));
    Ok(())
}

fn emit_is_value(value: &Expr, arms: &[IsArm], ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    let (scrut, scrut_ty) = emit_expr(value, ctx)?;
    let scrut_ptr = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = alloca {}", scrut_ptr, llvm_type(&scrut_ty)))?;
    ctx.emit(&format!("  store {} {}, ptr %{}", llvm_type(&scrut_ty), scrut, scrut_ptr))?;

    let has_variant_arm = arms.iter().any(|a| matches!(a.pattern, Pattern::Variant { .. }));
    let owner = match &scrut_ty {
        Type::Named(n) => n.clone(),
        _ => String::new(),
    };

    let cont_block = ctx.fresh_block("is_cont");
    let mut incoming: Vec<(String, String)> = Vec::new();
    let mut result_ty = Type::i32();

    if has_variant_arm {
        let tag_ptr = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = getelementptr %{}, ptr %{}, i32 0, i32 0", tag_ptr, ll_ident(&owner), scrut_ptr))?;
        let tag = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = load i32, ptr %{}", tag, tag_ptr))?;

        let mut case_blocks = Vec::new();
        let mut wildcard_block = None;
        for arm in arms {
            match &arm.pattern {
                Pattern::Variant { name, .. } => {
                    case_blocks.push((variant_tag_index(ctx, &owner, name), ctx.fresh_block("is_arm")));
                }
                Pattern::Wildcard => {
                    wildcard_block = Some(ctx.fresh_block("is_default"));
                }
                _ => {}
            }
        }
        // The switch always needs a `default:` target. Without a wildcard
        // arm, synthesize one that simply joins `cont_block` with a
        // placeholder value (mirrors the C backend's `default: __mr = 0`)
        // so the switch's parent block gets a matching phi edge, instead
        // of becoming an untracked predecessor of `cont_block`.
        let default_block = wildcard_block.clone().unwrap_or_else(|| ctx.fresh_block("is_default"));
        let cases: Vec<String> = case_blocks
            .iter()
            .map(|(idx, block)| format!("i32 {}, label %{}", idx, block))
            .collect();
        ctx.emit(&format!("  switch i32 %{}, label %{} [ {} ]", tag, default_block, cases.join(" ")))?;

        let mut block_iter = case_blocks.into_iter();
        for arm in arms {
            match &arm.pattern {
                Pattern::Variant { name, bindings } => {
                    let (_, block) = block_iter.next().unwrap();
                    ctx.emit(&format!("{}:", block))?;
                    let field_types = variant_field_types(ctx, &owner, name);
                    let data_ptr = ctx.fresh_temp();
                    ctx.emit(&format!("  %{} = getelementptr %{}, ptr %{}, i32 0, i32 1", data_ptr, ll_ident(&owner), scrut_ptr))?;
                    let payload_ty = payload_llvm_type(&field_types);
                    if bindings.len() == 1 {
                        let alloca = ctx.fresh_temp();
                        ctx.emit(&format!("  %{} = alloca {}", alloca, llvm_type(&field_types[0])))?;
                        let v = ctx.fresh_temp();
                        ctx.emit(&format!("  %{} = load {}, ptr %{}", v, payload_ty, data_ptr))?;
                        ctx.emit(&format!("  store {} %{}, ptr %{}", llvm_type(&field_types[0]), v, alloca))?;
                        ctx.variables.insert(bindings[0].clone(), alloca);
                        ctx.variable_types.insert(bindings[0].clone(), field_types[0].clone());
                    } else {
                        for (i, b) in bindings.iter().enumerate() {
                            let fty = field_types.get(i).cloned().unwrap_or_else(Type::i32);
                            let fld_ptr = ctx.fresh_temp();
                            ctx.emit(&format!("  %{} = getelementptr {}, ptr %{}, i32 0, i32 {}", fld_ptr, payload_ty, data_ptr, i))?;
                            let alloca = ctx.fresh_temp();
                            ctx.emit(&format!("  %{} = alloca {}", alloca, llvm_type(&fty)))?;
                            let v = ctx.fresh_temp();
                            ctx.emit(&format!("  %{} = load {}, ptr %{}", v, llvm_type(&fty), fld_ptr))?;
                            ctx.emit(&format!("  store {} %{}, ptr %{}", llvm_type(&fty), v, alloca))?;
                            ctx.variables.insert(b.clone(), alloca);
                            ctx.variable_types.insert(b.clone(), fty);
                        }
                    }
                    let (result, terminated) = emit_branch_body(&arm.body, ctx)?;
                    finish_is_arm(result, terminated, &cont_block, &mut incoming, &mut result_ty, ctx)?;
                }
                Pattern::Wildcard => {
                    ctx.emit(&format!("{}:", default_block))?;
                    let (result, terminated) = emit_branch_body(&arm.body, ctx)?;
                    finish_is_arm(result, terminated, &cont_block, &mut incoming, &mut result_ty, ctx)?;
                }
                _ => {}
            }
        }
        if wildcard_block.is_none() {
            ctx.emit(&format!("{}:", default_block))?;
            ctx.emit(&format!("  br label %{}", cont_block))?;
            incoming.push(("zeroinitializer".to_string(), default_block));
        }
    } else {
        let mut next_block = ctx.fresh_block("is_check");
        ctx.emit(&format!("  br label %{}", next_block))?;
        for arm in arms {
            ctx.emit(&format!("{}:", next_block))?;
            let arm_block = ctx.fresh_block("is_arm");
            let check_next = ctx.fresh_block("is_check");
            match &arm.pattern {
                Pattern::Literal(lit) => {
                    let (lit_val, _) = emit_expr(lit, ctx)?;
                    let cur = ctx.fresh_temp();
                    ctx.emit(&format!("  %{} = load {}, ptr %{}", cur, llvm_type(&scrut_ty), scrut_ptr))?;
                    let cmp = ctx.fresh_temp();
                    ctx.emit(&format!("  %{} = icmp eq {} %{}, {}", cmp, llvm_type(&scrut_ty), cur, lit_val))?;
                    ctx.emit(&format!("  br i1 %{}, label %{}, label %{}", cmp, arm_block, check_next))?;
                }
                Pattern::Identifier(bind) => {
                    ctx.variables.insert(bind.clone(), scrut_ptr.clone());
                    ctx.variable_types.insert(bind.clone(), scrut_ty.clone());
                    ctx.emit(&format!("  br label %{}", arm_block))?;
                }
                Pattern::Wildcard => {
                    ctx.emit(&format!("  br label %{}", arm_block))?;
                }
                Pattern::Variant { .. } => {}
            }
            ctx.emit(&format!("{}:", arm_block))?;
            let (result, terminated) = emit_branch_body(&arm.body, ctx)?;
            finish_is_arm(result, terminated, &cont_block, &mut incoming, &mut result_ty, ctx)?;
            next_block = check_next;
        }
        // No arm matched (no wildcard in the chain): falls through here,
        // another predecessor of `cont_block` that needs its own phi edge.
        ctx.emit(&format!("{}:", next_block))?;
        ctx.emit(&format!("  br label %{}", cont_block))?;
        incoming.push(("zeroinitializer".to_string(), next_block));
    }

    ctx.emit(&format!("{}:", cont_block))?;
    if incoming.is_empty() || matches!(result_ty, Type::Void) {
        return Ok(("0".to_string(), result_ty));
    }
    let phi_parts: Vec<String> = incoming.iter().map(|(v, b)| format!("[ {}, %{} ]", v, b)).collect();
    let merged = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = phi {} {}", merged, llvm_type(&result_ty), phi_parts.join(", ")))?;
    Ok((format!("%{}", merged), result_ty))
}

fn emit_cast(value: &Expr, target_type: &Type, ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    let (v, from_ty) = emit_expr(value, ctx)?;
    let from_ll = llvm_type(&from_ty);
    let to_ll = llvm_type(target_type);
    if from_ll == to_ll {
        return Ok((v, target_type.clone()));
    }
    let reg = ctx.fresh_temp();
    let instr = match (&from_ty, target_type) {
        (Type::Int(a), Type::Int(b)) if a.bits() < b.bits() => {
            if a.is_signed() { "sext" } else { "zext" }
        }
        (Type::Int(a), Type::Int(b)) if a.bits() > b.bits() => "trunc",
        (Type::Int(a), Type::Float(_)) => {
            if a.is_signed() { "sitofp" } else { "uitofp" }
        }
        (Type::Float(_), Type::Int(b)) => {
            if b.is_signed() { "fptosi" } else { "fptoui" }
        }
        (Type::Float(FloatWidth::F32), Type::Float(FloatWidth::F64)) => "fpext",
        (Type::Float(FloatWidth::F64), Type::Float(FloatWidth::F32)) => "fptrunc",
        _ => "bitcast",
    };
    ctx.emit(&format!("  %{} = {} {} {} to {}", reg, instr, from_ll, v, to_ll))?;
    Ok((format!("%{}", reg), target_type.clone()))
}

/// Builds `literal0 + repr(expr0) + literal1 + …` (spec §9) by folding
/// each piece into the running result through the `paw_concat` runtime
/// declared in the module header: literal fragments are interned string
/// constants, expression pieces are formatted with `sprintf` first.
fn emit_string_interp(parts: &[InterpPart], ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    let mut acc: Option<String> = None;
    for part in parts {
        let piece = match part {
            InterpPart::Literal(s) => intern_string(ctx, s),
            InterpPart::Expr(e) => {
                let (v, ty) = emit_expr(e, ctx)?;
                emit_repr(&v, &ty, ctx)?
            }
        };
        acc = Some(match acc {
            None => piece,
            Some(prev) => {
                let reg = ctx.fresh_temp();
                ctx.emit(&format!("  %{} = call ptr @paw_concat(ptr {}, ptr {})", reg, prev, piece))?;
                format!("%{}", reg)
            }
        });
    }
    let result = acc.unwrap_or_else(|| intern_string(ctx, ""));
    Ok((result, Type::String))
}

/// Formats a single interpolated value per `repr(expr)` (spec §9), the
/// LLVM counterpart of the C backend's per-type `snprintf` conversion.
/// `bool` is rendered without a libc call (a `select` between two
/// interned literals); every other type widens to its vararg-promoted
/// width and is `sprintf`'d into a scratch buffer.
fn emit_repr(val: &str, ty: &Type, ctx: &mut LlvmContext) -> Result<String, CodeGenError> {
    if matches!(ty, Type::String) {
        return Ok(val.to_string());
    }
    if matches!(ty, Type::Bool) {
        let cond = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = icmp ne i8 {}, 0", cond, val))?;
        let true_str = intern_string(ctx, "true");
        let false_str = intern_string(ctx, "false");
        let reg = ctx.fresh_temp();
        ctx.emit(&format!("  %{} = select i1 %{}, ptr {}, ptr {}", reg, cond, true_str, false_str))?;
        return Ok(format!("%{}", reg));
    }

    let (fmt, call_ty, arg) = match ty {
        Type::Int(w) if w.bits() > 32 && w.is_signed() => {
            let widened = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = sext {} {} to i64", widened, llvm_type(ty), val))?;
            ("%lld", "i64".to_string(), format!("%{}", widened))
        }
        Type::Int(w) if w.bits() > 32 => {
            let widened = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = zext {} {} to i64", widened, llvm_type(ty), val))?;
            ("%llu", "i64".to_string(), format!("%{}", widened))
        }
        Type::Int(w) if w.bits() < 32 && w.is_signed() => {
            let widened = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = sext {} {} to i32", widened, llvm_type(ty), val))?;
            ("%d", "i32".to_string(), format!("%{}", widened))
        }
        Type::Int(w) if w.bits() < 32 => {
            let widened = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = zext {} {} to i32", widened, llvm_type(ty), val))?;
            ("%u", "i32".to_string(), format!("%{}", widened))
        }
        Type::Int(w) if w.is_signed() => ("%d", "i32".to_string(), val.to_string()),
        Type::Int(_) => ("%u", "i32".to_string(), val.to_string()),
        Type::Char => {
            let widened = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = zext i8 {} to i32", widened, val))?;
            ("%c", "i32".to_string(), format!("%{}", widened))
        }
        Type::Float(FloatWidth::F32) => {
            let widened = ctx.fresh_temp();
            ctx.emit(&format!("  %{} = fpext float {} to double", widened, val))?;
            ("%g", "double".to_string(), format!("%{}", widened))
        }
        Type::Float(FloatWidth::F64) => ("%g", "double".to_string(), val.to_string()),
        _ => ("%d", "i32".to_string(), val.to_string()),
    };

    let fmt_ptr = intern_string(ctx, fmt);
    let buf = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = alloca [64 x i8]", buf))?;
    ctx.emit(&format!(
        "  call i32 (ptr, ptr, ...) @sprintf(ptr %{}, ptr {}, {} {})",
        buf, fmt_ptr, call_ty, arg
    ))?;
    Ok(format!("%{}", buf))
}

/// Spec §4.5: on `Err`, return the whole `Result` value from the
/// enclosing function; otherwise unwrap the `Ok` payload. The checker
/// only requires the operand to be named `Result` with two type
/// arguments (`check_try`), not that `Err` is declared second, so its
/// tag is looked up by name rather than assumed to be index 1.
fn emit_try(value: &Expr, ctx: &mut LlvmContext) -> Result<(String, Type), CodeGenError> {
    let (v, result_ty) = emit_expr(value, ctx)?;
    let owner = match &result_ty {
        Type::Named(n) => n.clone(),
        Type::GenericInstance { name, .. } => name.clone(),
        _ => String::new(),
    };
    let ename = ll_ident(&owner);
    let err_tag = variant_tag_index(ctx, &owner, "Err");
    let slot = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = alloca %{}", slot, ename))?;
    ctx.emit(&format!("  store %{} {}, ptr %{}", ename, v, slot))?;
    let tag_ptr = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = getelementptr %{}, ptr %{}, i32 0, i32 0", tag_ptr, ename, slot))?;
    let tag = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = load i32, ptr %{}", tag, tag_ptr))?;
    let cmp = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = icmp eq i32 %{}, {}", cmp, tag, err_tag))?;

    let err_block = ctx.fresh_block("try_err");
    let ok_block = ctx.fresh_block("try_ok");
    ctx.emit(&format!("  br i1 %{}, label %{}, label %{}", cmp, err_block, ok_block))?;

    ctx.emit(&format!("{}:", err_block))?;
    let whole = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = load %{}, ptr %{}", whole, ename, slot))?;
    ctx.emit(&format!("  ret %{} %{}", ename, whole))?;

    ctx.emit(&format!("{}:", ok_block))?;
    let ok_variant_fields = variant_field_types(ctx, &owner, "Ok");
    let ok_ty = ok_variant_fields.first().cloned().unwrap_or_else(Type::i32);
    let data_ptr = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = getelementptr %{}, ptr %{}, i32 0, i32 1", data_ptr, ename, slot))?;
    let reg = ctx.fresh_temp();
    ctx.emit(&format!("  %{} = load {}, ptr %{}", reg, llvm_type(&ok_ty), data_ptr))?;
    Ok((format!("%{}", reg), ok_ty))
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
    fn emits_module_header() {
        let ir = compile("fn main() -> i32 { return 0; }");
        assert!(ir.contains("ModuleID"));
        assert!(ir.contains("define i32 @main()"));
    }

    #[test]
    fn literal_addition_lowers_to_add_and_ret() {
        let ir = compile("fn main() -> i32 { return 40 + 2; }");
        assert!(ir.contains("add i32"));
        assert!(ir.contains("ret i32"));
    }

    #[test]
    fn enum_lowers_to_tagged_struct_and_constructor() {
        let ir = compile(
            "type Result = enum { Ok(i32), Err(i32) }\n\
             fn f() -> Result { return Ok(1); }\n\
             fn main() -> i32 { let r = f(); return r is { Ok(x) => x, Err(e) => e }; }",
        );
        assert!(ir.contains("type { i32, [32 x i8] }"));
        assert!(ir.contains("@Result_Ok"));
        assert!(ir.contains("switch i32"));
    }

    #[test]
    fn range_loop_emits_cond_body_incr_exit_blocks() {
        let ir = compile("fn main() -> i32 { let mut s: i32 = 0; loop i in 1..=10 { s += i; } return s; }");
        assert!(ir.contains("loop_cond0"));
        assert!(ir.contains("loop_incr0"));
        assert!(ir.contains("icmp sle i32"));
    }

    #[test]
    fn comparison_zero_extends_to_i8_bool() {
        let ir = compile("fn main() -> i32 { let a = 1; let b = 2; if (a < b) { return 1; } return 0; }");
        assert!(ir.contains("icmp slt i32"));
        assert!(ir.contains("zext i1"));
    }

    #[test]
    fn try_expr_checks_tag_and_returns_early_on_err() {
        let ir = compile(
            "type Result = enum { Ok(i32), Err(i32) }\n\
             fn div(a: i32, b: i32) -> Result { if (b == 0) { return Err(0); } return Ok(a / b); }\n\
             fn run() -> Result { let v = div(10, 2)?; return Ok(v + 1); }\n\
             fn main() -> i32 { return run() is { Ok(x) => x, Err(_) => 0 - 1 }; }",
        );
        assert!(ir.contains("icmp eq i32 %"));
        assert!(ir.contains("try_err"));
    }

    #[test]
    fn try_expr_resolves_err_tag_by_name_for_reordered_variants() {
        let ir = compile(
            "type Result = enum { Err(i32), Ok(i32) }\n\
             fn div(a: i32, b: i32) -> Result { if (b == 0) { return Err(0); } return Ok(a / b); }\n\
             fn run() -> Result { let v = div(10, 2)?; return Ok(v + 1); }\n\
             fn main() -> i32 { return run() is { Ok(x) => x, Err(_) => 0 - 1 }; }",
        );
        // `run`'s try block is emitted after `div`'s own `b == 0` comparison,
        // so the last `icmp eq i32` in the module is the `?` tag check.
        let tag_check = ir.lines().rev().find(|l| l.contains("icmp eq i32")).expect("tag check line");
        assert!(tag_check.trim_end().ends_with(", 0"));
    }

    #[test]
    fn static_method_call_with_type_args_targets_the_one_emitted_function() {
        let ir = compile(
            "type Box<T> = struct { value: T, fn wrap(x: T) -> Box<T> { return Box { value: x }; } }\n\
             fn f() -> i32 { let a = Box<i32>::wrap(1); let b = Box<i32>::wrap(2); return 0; }",
        );
        // One `define` plus two call sites, all against the same symbol.
        assert_eq!(ir.matches("@Box_wrap(").count(), 3);
        assert!(!ir.contains("@Box_i32_wrap"));
    }
}
