//! Tagged runtime objects.
//!
//! Every heap value is one variant of `Obj`, referenced through stable
//! `ObjRef` handles into the collector's slot array. Numbers are a single
//! `f64`; whether a value prints as an integer is decided at print time.

/// Handle to a heap object. Stable across collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjRef(pub u32);

/// A heap object.
#[derive(Debug, Clone, PartialEq)]
pub enum Obj {
    Bool(bool),
    Number(f64),
    Str(StrObj),
    Table(TableObj),
    Path(PathObj),
}

impl Obj {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Obj::Bool(_) => "Bool",
            Obj::Number(_) => "Number",
            Obj::Str(_) => "String",
            Obj::Table(_) => "Table",
            Obj::Path(_) => "ContentPath",
        }
    }

    /// Approximate heap footprint, for collector accounting.
    pub fn size(&self) -> usize {
        match self {
            Obj::Bool(_) | Obj::Number(_) => std::mem::size_of::<Obj>(),
            Obj::Str(s) => std::mem::size_of::<Obj>() + s.bytes.len() + 1,
            Obj::Table(t) => {
                std::mem::size_of::<Obj>()
                    + t.entries.len() * std::mem::size_of::<Option<TableEntry>>()
            }
            Obj::Path(p) => {
                std::mem::size_of::<Obj>()
                    + p.code.len()
                    + p.consts.len() * std::mem::size_of::<ObjRef>()
            }
        }
    }
}

/// Interned string with a cached hash.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StrObj {
    pub hash: u32,
    pub bytes: Vec<u8>,
}

impl StrObj {
    pub fn new(bytes: impl Into<Vec<u8>>) -> StrObj {
        let bytes = bytes.into();

        StrObj {
            hash: str_hash(&bytes),
            bytes,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// FNV-1a, as used for the open-addressed tables.
pub fn str_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;

    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// One occupied table slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableEntry {
    /// Always a `Str` object.
    pub key: ObjRef,
    pub value: ObjRef,
}

/// Open-addressed string-keyed table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableObj {
    pub count: u32,
    pub entries: Vec<Option<TableEntry>>,
}

impl TableObj {
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// A compiled content path interned into the heap: bytecode plus its
/// constant pool of objects.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathObj {
    /// Always a `Str` object.
    pub name: ObjRef,
    pub arity: u32,
    pub locals: u32,
    pub is_function: bool,
    pub code: Vec<u8>,
    pub consts: Vec<ObjRef>,
}

/// Falsey-ness: the `false` boolean or a zero number. Everything else is
/// truthy.
pub fn is_falsey(obj: &Obj) -> bool {
    match obj {
        Obj::Bool(value) => !value,
        Obj::Number(value) => *value == 0.0,
        _ => false,
    }
}

/// Numeric view of a value; booleans coerce to 0/1.
pub fn as_number(obj: &Obj) -> Option<f64> {
    match obj {
        Obj::Number(value) => Some(*value),
        Obj::Bool(true) => Some(1.0),
        Obj::Bool(false) => Some(0.0),
        _ => None,
    }
}

/// Printable form of a number: integral values print without a decimal
/// point.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falseyness_matches_booleans_and_zero() {
        assert!(is_falsey(&Obj::Bool(false)));
        assert!(is_falsey(&Obj::Number(0.0)));
        assert!(!is_falsey(&Obj::Bool(true)));
        assert!(!is_falsey(&Obj::Number(-1.0)));
        assert!(!is_falsey(&Obj::Str(StrObj::new(""))));
    }

    #[test]
    fn numbers_print_integrally_when_integral() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.25), "0.25");
    }

    #[test]
    fn string_hash_is_stable_and_cached() {
        let a = StrObj::new("key");
        let b = StrObj::new("key");

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash, str_hash(b"key"));
        assert_ne!(a.hash, str_hash(b"other"));
    }

    #[test]
    fn number_round_trips_through_text() {
        for value in [0.0, 1.0, -7.0, 2.5, 1234567.0, 0.125] {
            let text = format_number(value);
            let parsed: f64 = text.parse().unwrap();
            assert_eq!(parsed, value);
        }
    }
}
