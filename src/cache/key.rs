//! Cache key derivation
//!
//! An argument value is turned into its canonical JSON form. Sequences are the
//! positional argument list, unit is the empty list, and anything else is a
//! single argument. `serde_json::Value` keeps object keys sorted, so two maps
//! with the same contents produce the same key whatever their insertion order.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::KeyError;

/// Canonical string identifying one argument list
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for an argument value
    pub fn new<A: Serialize + ?Sized>(args: &A) -> Result<Self, KeyError> {
        Ok(ArgsKey::new(args)?.key)
    }

    /// The canonical serialization, e.g. `[7]`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A derived key together with the argument list it was built from
#[derive(Debug, Clone)]
pub(crate) struct ArgsKey {
    pub(crate) key: CacheKey,
    pub(crate) args: Vec<Value>,
}

impl ArgsKey {
    pub(crate) fn new<A: Serialize + ?Sized>(args: &A) -> Result<Self, KeyError> {
        let args = match serde_json::to_value(args)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        let key = CacheKey(Value::Array(args.clone()).to_string());
        Ok(Self { key, args })
    }

    /// Whether the argument at `index` is structurally equal to `value`
    ///
    /// `None` matches every argument list.
    pub(crate) fn matches(&self, index: Option<usize>, value: &Value) -> bool {
        match index {
            None => true,
            Some(index) => self.args.get(index) == Some(value),
        }
    }
}

/// Canonical form of a single argument, for positional comparisons
pub(crate) fn canonical_arg<T: Serialize + ?Sized>(arg: &T) -> Result<Value, KeyError> {
    Ok(serde_json::to_value(arg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Filter {
        tag: String,
        page: u32,
    }

    #[test]
    fn test_single_tuple_argument_key() {
        assert_eq!(CacheKey::new(&(7,)).unwrap().as_str(), "[7]");
    }

    #[test]
    fn test_scalar_is_a_one_element_list() {
        assert_eq!(CacheKey::new(&7).unwrap(), CacheKey::new(&(7,)).unwrap());
    }

    #[test]
    fn test_unit_is_the_empty_list() {
        assert_eq!(CacheKey::new(&()).unwrap().as_str(), "[]");
    }

    #[test]
    fn test_multiple_arguments_keep_their_order() {
        let a = CacheKey::new(&(1, "x")).unwrap();
        let b = CacheKey::new(&("x", 1)).unwrap();

        assert_eq!(a.as_str(), r#"[1,"x"]"#);
        assert_ne!(a, b);
    }

    #[test]
    fn test_nested_structures_serialize_identically() {
        let a = CacheKey::new(&(
            1,
            Filter {
                tag: "rust".to_string(),
                page: 2,
            },
        ))
        .unwrap();
        let b = CacheKey::new(&(
            1,
            Filter {
                tag: "rust".to_string(),
                page: 2,
            },
        ))
        .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.as_str(), r#"[1,{"page":2,"tag":"rust"}]"#);
    }

    #[test]
    fn test_map_insertion_order_does_not_matter() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            first.insert(k, v);
        }
        for (k, v) in [("d", 4), ("c", 3), ("b", 2), ("a", 1)] {
            second.insert(k, v);
        }

        assert_eq!(
            CacheKey::new(&(first,)).unwrap(),
            CacheKey::new(&(second,)).unwrap()
        );
    }

    #[test]
    fn test_non_string_map_keys_are_rejected() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1);

        assert!(CacheKey::new(&(map,)).is_err());
    }

    #[test]
    fn test_matches_by_position() {
        let key = ArgsKey::new(&(1, "x")).unwrap();

        assert!(key.matches(Some(1), &canonical_arg("x").unwrap()));
        assert!(key.matches(Some(0), &canonical_arg(&1).unwrap()));
        assert!(!key.matches(Some(1), &canonical_arg("y").unwrap()));
        assert!(!key.matches(Some(5), &canonical_arg("x").unwrap()));
        assert!(key.matches(None, &Value::Null));
    }
}
