use std::rc::Rc;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GType {
    Str = 1,
    Int = 2,
}

/// The unit of storage. Shared between the keyspace, reply lists and
/// parsed arguments through [`GobjRef`]; the strong count is the
/// reference count.
#[derive(Debug, PartialEq, Eq)]
pub enum Gobj {
    Str(Vec<u8>),
    Int(i64),
}

pub type GobjRef = Rc<Gobj>;

impl Gobj {
    pub fn create_str(payload: impl Into<Vec<u8>>) -> GobjRef {
        Rc::new(Gobj::Str(payload.into()))
    }

    pub fn create_int(val: i64) -> GobjRef {
        Rc::new(Gobj::Int(val))
    }

    pub fn gtype(&self) -> GType {
        match self {
            Gobj::Str(..) => GType::Str,
            Gobj::Int(..) => GType::Int,
        }
    }

    pub fn str_val(&self) -> Option<&[u8]> {
        match self {
            Gobj::Str(bytes) => Some(bytes),
            Gobj::Int(_) => None,
        }
    }

    /// Integer view: the value itself for integers, a decimal parse for
    /// strings.
    pub fn int_val(&self) -> Option<i64> {
        match self {
            Gobj::Int(val) => Some(*val),
            Gobj::Str(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        }
    }

    /// Lossy text rendering, for logs.
    pub fn display(&self) -> String {
        match self {
            Gobj::Str(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Gobj::Int(val) => val.to_string(),
        }
    }
}

pub fn ref_count(obj: &GobjRef) -> usize {
    Rc::strong_count(obj)
}

/// Equality for string keys. Anything that is not a string never matches.
pub fn gstr_equal(a: &Gobj, b: &Gobj) -> bool {
    match (a, b) {
        (Gobj::Str(x), Gobj::Str(y)) => x == y,
        _ => false,
    }
}

/// 64-bit FNV-1a over a string key's payload. Non-string keys hash to 0.
pub fn gstr_hash(key: &Gobj) -> u64 {
    match key {
        Gobj::Str(bytes) => fnv1a(bytes),
        Gobj::Int(_) => 0,
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_count_follows_owners() {
        let obj = Gobj::create_str("hello");
        assert_eq!(ref_count(&obj), 1);

        let reply_owner = obj.clone();
        let arg_owner = Rc::clone(&obj);
        assert_eq!(ref_count(&obj), 3);

        drop(reply_owner);
        drop(arg_owner);
        assert_eq!(ref_count(&obj), 1);
    }

    #[test]
    fn test_int_val() {
        assert_eq!(Gobj::create_int(42).int_val(), Some(42));
        assert_eq!(Gobj::create_str("-17").int_val(), Some(-17));
        assert_eq!(Gobj::create_str("abc").int_val(), None);
        assert_eq!(Gobj::create_str(vec![0xff, 0xfe]).int_val(), None);
    }

    #[test]
    fn test_gstr_equal_only_matches_strings() {
        assert!(gstr_equal(&Gobj::Str(b"a".to_vec()), &Gobj::Str(b"a".to_vec())));
        assert!(!gstr_equal(&Gobj::Str(b"a".to_vec()), &Gobj::Str(b"b".to_vec())));
        assert!(!gstr_equal(&Gobj::Int(1), &Gobj::Int(1)));
    }

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
        assert_eq!(gstr_hash(&Gobj::Str(b"foobar".to_vec())), 0x8594_4171_f739_67e8);
    }
}
