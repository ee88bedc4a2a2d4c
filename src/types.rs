//! Type system for Paw
//!
//! A Paw type is a tagged sum of primitive widths, pointers, arrays,
//! named nominal types, function types and generic instances. Equality
//! is structural and recursive; a separate `compatible_with` relation
//! additionally allows default-width integer/float literals to flow
//! into any same-kind width, matching the literal-to-annotation rule
//! in the type checker.

use std::fmt;

/// Integer and float widths recognized by the lexer's type-keyword table
/// and by every backend's type-mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    F32,
    F64,
}

impl IntWidth {
    pub fn name(self) -> &'static str {
        match self {
            IntWidth::I8 => "i8",
            IntWidth::I16 => "i16",
            IntWidth::I32 => "i32",
            IntWidth::I64 => "i64",
            IntWidth::I128 => "i128",
            IntWidth::U8 => "u8",
            IntWidth::U16 => "u16",
            IntWidth::U32 => "u32",
            IntWidth::U64 => "u64",
            IntWidth::U128 => "u128",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "i8" => IntWidth::I8,
            "i16" => IntWidth::I16,
            "i32" => IntWidth::I32,
            "i64" => IntWidth::I64,
            "i128" => IntWidth::I128,
            "u8" => IntWidth::U8,
            "u16" => IntWidth::U16,
            "u32" => IntWidth::U32,
            "u64" => IntWidth::U64,
            "u128" => IntWidth::U128,
            _ => return None,
        })
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IntWidth::I8 | IntWidth::I16 | IntWidth::I32 | IntWidth::I64 | IntWidth::I128
        )
    }

    /// Bit width, used by both backends' type-mapping tables.
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::I8 | IntWidth::U8 => 8,
            IntWidth::I16 | IntWidth::U16 => 16,
            IntWidth::I32 | IntWidth::U32 => 32,
            IntWidth::I64 | IntWidth::U64 => 64,
            IntWidth::I128 | IntWidth::U128 => 128,
        }
    }
}

impl FloatWidth {
    pub fn name(self) -> &'static str {
        match self {
            FloatWidth::F32 => "f32",
            FloatWidth::F64 => "f64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "f32" => FloatWidth::F32,
            "f64" => FloatWidth::F64,
            _ => return None,
        })
    }
}

/// A Paw type. Equality is structural and recursive (derived `PartialEq`);
/// [`Type::compatible_with`] implements the looser literal-compatibility
/// relation used at `let`/argument annotation boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int(IntWidth),
    Float(FloatWidth),
    Bool,
    Char,
    String,
    Void,
    /// Unresolved generic type parameter, e.g. `T` in `fn id<T>(x: T) -> T`.
    Generic(String),
    /// A nominal reference resolved against the type table (struct, enum or trait name).
    Named(String),
    /// An owning reference to another type: `*T`.
    Pointer(Box<Type>),
    /// `size = None` means unsized/dynamic (a slice-like array).
    Array(Box<Type>, Option<usize>),
    Function {
        params: Vec<Type>,
        return_type: Box<Type>,
    },
    /// A named type applied to type arguments, e.g. `Box<i32>`.
    GenericInstance {
        name: String,
        args: Vec<Type>,
    },
}

impl Type {
    pub fn i32() -> Type {
        Type::Int(IntWidth::I32)
    }

    pub fn f64() -> Type {
        Type::Float(FloatWidth::F64)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Structural equality with the literal-compatibility relation folded
    /// in: a default `i32` literal type is compatible with any integer
    /// width annotation, and a default `f64` literal type is compatible
    /// with any float width annotation. The reverse direction (a
    /// concretely-typed value flowing into an `i32`/`f64` annotation) only
    /// holds when that's a widening, not a narrowing conversion — an
    /// `i64` value still needs an explicit `as i32` cast.
    pub fn compatible_with(&self, other: &Type) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            // An unresolved generic type parameter (e.g. the `T` in a
            // variant field `Ok(T)` before monomorphization) accepts any
            // concrete type flowing into it.
            (Type::Generic(_), _) | (_, Type::Generic(_)) => true,
            // A bare i32-typed literal adapts to any annotated width (the
            // literal-polymorphism direction). The reverse direction only
            // holds for widths that fit in i32 without truncation — an
            // i64-typed value still needs an explicit `as i32` cast.
            (Type::Int(IntWidth::I32), Type::Int(_)) => true,
            (Type::Int(w), Type::Int(IntWidth::I32)) if w.bits() <= 32 => true,
            (Type::Float(FloatWidth::F64), Type::Float(_))
            | (Type::Float(_), Type::Float(FloatWidth::F64)) => true,
            // array(_, None) is compatible with array(_, Some(n)) when element types agree.
            (Type::Array(e1, None), Type::Array(e2, _))
            | (Type::Array(e1, _), Type::Array(e2, None)) => e1.compatible_with(e2),
            (Type::Array(e1, Some(n1)), Type::Array(e2, Some(n2))) => {
                n1 == n2 && e1.compatible_with(e2)
            }
            (
                Type::GenericInstance {
                    name: n1,
                    args: a1,
                },
                Type::GenericInstance {
                    name: n2,
                    args: a2,
                },
            ) => {
                n1 == n2
                    && a1.len() == a2.len()
                    && a1.iter().zip(a2).all(|(x, y)| x.compatible_with(y))
            }
            (Type::Pointer(e1), Type::Pointer(e2)) => e1.compatible_with(e2),
            // An enum constructor (`Ok(1)`) is typed `Named(enum_name)` without
            // carrying the instantiated type arguments; it is compatible with
            // any generic instance of that same enum (e.g. `Result<i32, i32>`).
            (Type::Named(n), Type::GenericInstance { name, .. })
            | (Type::GenericInstance { name, .. }, Type::Named(n)) => n == name,
            _ => false,
        }
    }

    /// Mangled type-argument fragment used by generic instantiation
    /// (`Box<i32>` -> `Box_i32`) and by static method call mangling
    /// (`T<Args>::m` -> `T_Arg1_Arg2_m`).
    pub fn mangle_fragment(&self) -> String {
        match self {
            Type::Int(w) => w.name().to_string(),
            Type::Float(w) => w.name().to_string(),
            Type::Bool => "bool".to_string(),
            Type::Char => "char".to_string(),
            Type::String => "string".to_string(),
            Type::Void => "void".to_string(),
            Type::Generic(name) | Type::Named(name) => name.clone(),
            Type::Pointer(inner) => format!("ptr_{}", inner.mangle_fragment()),
            Type::Array(inner, size) => match size {
                Some(n) => format!("arr{}_{}", n, inner.mangle_fragment()),
                None => format!("arr_{}", inner.mangle_fragment()),
            },
            Type::Function { .. } => "fn".to_string(),
            Type::GenericInstance { name, args } => {
                let parts: Vec<String> = args.iter().map(|a| a.mangle_fragment()).collect();
                format!("{}_{}", name, parts.join("_"))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(w) => write!(f, "{}", w.name()),
            Type::Float(w) => write!(f, "{}", w.name()),
            Type::Bool => write!(f, "bool"),
            Type::Char => write!(f, "char"),
            Type::String => write!(f, "string"),
            Type::Void => write!(f, "void"),
            Type::Generic(name) => write!(f, "{}", name),
            Type::Named(name) => write!(f, "{}", name),
            Type::Pointer(inner) => write!(f, "*{}", inner),
            Type::Array(inner, Some(n)) => write!(f, "[{}; {}]", inner, n),
            Type::Array(inner, None) => write!(f, "[{}]", inner),
            Type::Function {
                params,
                return_type,
            } => {
                let ps: Vec<String> = params.iter().map(|p| p.to_string()).collect();
                write!(f, "fn({}) -> {}", ps.join(", "), return_type)
            }
            Type::GenericInstance { name, args } => {
                let a: Vec<String> = args.iter().map(|t| t.to_string()).collect();
                write!(f, "{}<{}>", name, a.join(", "))
            }
        }
    }
}

/// All primitive type-keyword spellings recognized by the lexer, used to
/// build the keyword table shared by [`crate::lexer`] and to seed the
/// parser's known-type-name set described in spec §4.2.
pub const PRIMITIVE_TYPE_NAMES: &[&str] = &[
    "i8", "i16", "i32", "i64", "i128", "u8", "u16", "u32", "u64", "u128", "f32", "f64", "bool",
    "char", "string", "void",
];

pub fn primitive_type_from_name(name: &str) -> Option<Type> {
    if let Some(w) = IntWidth::from_name(name) {
        return Some(Type::Int(w));
    }
    if let Some(w) = FloatWidth::from_name(name) {
        return Some(Type::Float(w));
    }
    match name {
        "bool" => Some(Type::Bool),
        "char" => Some(Type::Char),
        "string" => Some(Type::String),
        "void" => Some(Type::Void),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_primitives_are_equal() {
        assert_eq!(Type::Int(IntWidth::I32), Type::Int(IntWidth::I32));
        assert_ne!(Type::Int(IntWidth::I32), Type::Int(IntWidth::I64));
    }

    #[test]
    fn literal_i32_compatible_with_any_int_width() {
        assert!(Type::i32().compatible_with(&Type::Int(IntWidth::I64)));
        assert!(Type::Int(IntWidth::U8).compatible_with(&Type::i32()));
        assert!(!Type::Int(IntWidth::I64).compatible_with(&Type::Int(IntWidth::U8)));
    }

    #[test]
    fn i64_does_not_narrow_into_i32_without_a_cast() {
        assert!(!Type::Int(IntWidth::I64).compatible_with(&Type::i32()));
        assert!(!Type::Int(IntWidth::U64).compatible_with(&Type::i32()));
    }

    #[test]
    fn literal_f64_compatible_with_any_float_width() {
        assert!(Type::f64().compatible_with(&Type::Float(FloatWidth::F32)));
    }

    #[test]
    fn unsized_array_compatible_with_sized_same_element() {
        let unsized_arr = Type::Array(Box::new(Type::i32()), None);
        let sized_arr = Type::Array(Box::new(Type::Int(IntWidth::I32)), Some(4));
        assert!(unsized_arr.compatible_with(&sized_arr));
    }

    #[test]
    fn sized_arrays_require_matching_length() {
        let a = Type::Array(Box::new(Type::i32()), Some(3));
        let b = Type::Array(Box::new(Type::i32()), Some(4));
        assert!(!a.compatible_with(&b));
    }

    #[test]
    fn generic_parameter_accepts_any_concrete_type() {
        let t = Type::Generic("T".to_string());
        assert!(t.compatible_with(&Type::i32()));
        assert!(Type::String.compatible_with(&t));
    }

    #[test]
    fn generic_instance_mangling() {
        let t = Type::GenericInstance {
            name: "Box".to_string(),
            args: vec![Type::i32()],
        };
        assert_eq!(t.mangle_fragment(), "Box_i32");
    }

    #[test]
    fn display_formats_match_source_spelling() {
        assert_eq!(Type::Int(IntWidth::U64).to_string(), "u64");
        assert_eq!(
            Type::GenericInstance {
                name: "Result".to_string(),
                args: vec![Type::i32(), Type::i32()],
            }
            .to_string(),
            "Result<i32, i32>"
        );
    }
}
