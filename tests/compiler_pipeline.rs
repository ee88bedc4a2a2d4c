//! End-to-end scenario and property tests (spec §8) driven entirely
//! through the public library API. No toolchain is invoked here — each
//! scenario is verified by checking the pipeline accepts/rejects the
//! program as expected and by inspecting the generated C/LLVM text for
//! the structural properties that would make the emitted artifact
//! behave as specified if it were compiled and run.

use pawc::{check_source, codegen_c, codegen_llvm, CompileError};

fn checked(src: &str) -> pawc::CheckedProgram {
    check_source(src, "t.paw").expect("expected program to type-check")
}

// (a) fn main() -> i32 { return 40 + 2; } compiles; running it returns 42.
#[test]
fn scenario_a_simple_arithmetic_return() {
    let program = checked("fn main() -> i32 { return 40 + 2; }");
    let c = codegen_c::codegen_program(&program.program, &program.tables).unwrap();
    assert!(c.contains("main(void)"));
    let ir = codegen_llvm::codegen_program(&program.program, &program.tables).unwrap();
    assert!(ir.contains("define"));
}

// (b) enum Result with is-expression dispatch returns 1.
#[test]
fn scenario_b_enum_is_dispatch() {
    let src = "type Result<T,E> = enum { Ok(T), Err(E) } \
               fn f() -> Result<i32,i32> { return Ok(1); } \
               fn main() -> i32 { let r = f(); return r is { Ok(x) => x, Err(e) => e }; }";
    let program = checked(src);
    let c = codegen_c::codegen_program(&program.program, &program.tables).unwrap();
    assert!(c.contains("Result_Ok"));
    assert!(c.contains("Result_Err"));
    let ir = codegen_llvm::codegen_program(&program.program, &program.tables).unwrap();
    assert!(ir.contains("Result_Ok"));
}

// (c) loop i in 1..=10 { s += i; } returns 55; property 4 (loop scope
// hygiene) holds because `i` is not visible once the loop ends.
#[test]
fn scenario_c_inclusive_range_loop_type_checks() {
    let src = "fn main() -> i32 { let mut s: i32 = 0; loop i in 1..=10 { s += i; } return s; }";
    checked(src);
}

#[test]
fn property_4_loop_binding_not_visible_after_loop() {
    let src = "fn main() -> i32 { loop i in 1..=3 { } return i; }";
    let err = check_source(src, "t.paw").unwrap_err();
    assert!(matches!(err, CompileError::Type(_)));
}

// (d) ? propagates Err early; calling with (10, 2) vs (10, 0) both
// type-check identically (the branch taken is a runtime concern).
#[test]
fn scenario_d_try_operator_propagates_result() {
    let src = "type Result<T,E> = enum { Ok(T), Err(E) } \
               fn div(a: i32, b: i32) -> Result<i32,i32> { if (b == 0) { return Err(0); } return Ok(a / b); } \
               fn run() -> Result<i32,i32> { let v = div(10, 2)?; return Ok(v + 1); } \
               fn main() -> i32 { return run() is { Ok(x) => x, Err(_) => -1 }; }";
    let program = checked(src);
    let ir = codegen_llvm::codegen_program(&program.program, &program.tables).unwrap();
    assert!(ir.contains("define"));
}

// (e) an explicit `as i32` narrowing cast type-checks; removing it is a
// TypeError (i64 cannot flow into an i32 binding without a cast).
#[test]
fn scenario_e_explicit_cast_required_across_int_widths() {
    checked("fn main() -> i32 { let x: i64 = 3 as i64; let y: i32 = x as i32; return y; }");

    let err = check_source(
        "fn main() -> i32 { let x: i64 = 3 as i64; let y: i32 = x; return y; }",
        "t.paw",
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::Type(_)));
}

// (f) `if (a < b)` must not be misread as the start of a generic
// argument list when no type named `a` exists.
#[test]
fn scenario_f_comparison_not_misread_as_generic_args() {
    checked("fn main() -> i32 { let a = 1; let b = 2; if (a < b) { return 1; } return 0; }");
}

// Property 1: type-checking is idempotent - running it twice over
// independently parsed copies of the same source yields the same
// (empty) diagnostic outcome.
#[test]
fn property_1_type_checking_is_idempotent() {
    let src = "fn main() -> i32 { return 40 + 2; }";
    assert!(check_source(src, "t.paw").is_ok());
    assert!(check_source(src, "t.paw").is_ok());
}

// Property 2: a generic instance appearing twice at call sites is
// recorded once in the monomorphization cache, and every call site for
// that instantiation resolves to the single function actually emitted
// for the declaring type (no dangling reference to a specialized name
// that was never defined).
#[test]
fn property_2_generic_instance_cached_and_call_sites_resolve() {
    let src = "type Box<T> = struct { value: T, fn wrap(x: T) -> Box<T> { return Box { value: x }; } } \
               fn f() -> i32 { let a = Box<i32>::wrap(1); let b = Box<i32>::wrap(2); return 0; }";
    let program = checked(src);
    let ir = codegen_llvm::codegen_program(&program.program, &program.tables).unwrap();
    // One `define` plus two call sites, all against the same symbol name.
    assert_eq!(ir.matches("@Box_wrap(").count(), 3, "expected 1 definition + 2 call sites on the same symbol:\n{ir}");
    assert!(!ir.contains("@Box_i32_wrap"), "call site must not reference a specialized name that was never defined:\n{ir}");
}

// Property 3: every LLVM basic block has exactly one terminator
// (ret/br). A block accidentally holding two terminators, or none,
// would make the emitted IR malformed.
#[test]
fn property_3_every_basic_block_has_one_terminator() {
    let src = "fn main() -> i32 { let x = 3; if (x > 0) { return 1; } else { return 0; } }";
    let program = checked(src);
    let ir = codegen_llvm::codegen_program(&program.program, &program.tables).unwrap();

    let mut in_function = false;
    let mut terminators_in_block = 0;
    for line in ir.lines() {
        let line = line.trim();
        if line.starts_with("define") {
            in_function = true;
            terminators_in_block = 0;
            continue;
        }
        if !in_function {
            continue;
        }
        if line == "}" {
            in_function = false;
            continue;
        }
        if line.ends_with(':') && !line.contains('=') {
            terminators_in_block = 0;
            continue;
        }
        if line.starts_with("ret ") || line.starts_with("br ") {
            terminators_in_block += 1;
            assert_eq!(terminators_in_block, 1, "basic block has more than one terminator:\n{ir}");
        }
    }
}

// Property 5: a bare `V(args)` call where `V` is a unique variant name
// resolves to the owning enum's mangled constructor, `E_V`.
#[test]
fn property_5_bare_variant_constructor_resolves_to_owning_enum() {
    let src = "type Shape = enum { Circle(i32), Square(i32) } \
               fn area(s: Shape) -> i32 { return s is { Circle(r) => r * r, Square(w) => w * w }; } \
               fn main() -> i32 { return area(Circle(3)); }";
    let program = checked(src);
    let c = codegen_c::codegen_program(&program.program, &program.tables).unwrap();
    assert!(c.contains("Shape_Circle"));
    assert!(c.contains("Shape_Square"));
}

// Property 6: disambiguation stability across a program exercising both
// `identifier <` readings.
#[test]
fn property_6_generic_instance_and_comparison_coexist() {
    let src = "type Box<T> = struct { value: T } \
               fn f() -> i32 { let a: Box<i32> = Box { value: 1 }; let b = 2; if (a.value < b) { return 1; } return 0; }";
    checked(src);
}
