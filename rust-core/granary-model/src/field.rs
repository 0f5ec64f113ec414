// SPDX-License-Identifier: PMPL-1.0-or-later
//! Tri-state payload fields.
//!
//! Every optional granule attribute arrives in one of three shapes: omitted
//! (leave the stored value untouched), explicit `null` (clear it), or a value
//! (replace it). `Option<T>` collapses the first two, so payload structs use
//! [`Field`] together with
//! `#[serde(default, skip_serializing_if = "Field::is_missing")]`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An optional payload attribute that remembers whether it was sent.
#[derive(Debug, Clone, PartialEq)]
pub enum Field<T> {
    /// The key was absent from the payload.
    Missing,
    /// The key was present with a `null` value.
    Null,
    /// The key carried a value.
    Value(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Missing
    }
}

impl<T> Field<T> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Field::Missing)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// True when the payload mentioned the key at all (`null` or a value).
    pub fn is_present(&self) -> bool {
        !self.is_missing()
    }

    pub fn as_value(&self) -> Option<&T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Field::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Field<&T> {
        match self {
            Field::Missing => Field::Missing,
            Field::Null => Field::Null,
            Field::Value(v) => Field::Value(v),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Field<U> {
        match self {
            Field::Missing => Field::Missing,
            Field::Null => Field::Null,
            Field::Value(v) => Field::Value(f(v)),
        }
    }

    /// Merge this field onto a stored optional value.
    pub fn apply_to(self, current: Option<T>) -> Option<T> {
        match self {
            Field::Missing => current,
            Field::Null => None,
            Field::Value(v) => Some(v),
        }
    }

    /// Merge onto a stored value whose column has no null state.
    ///
    /// An explicit `null` resets the column to `default`.
    pub fn apply_or(self, current: T, default: impl FnOnce() -> T) -> T {
        match self {
            Field::Missing => current,
            Field::Null => default(),
            Field::Value(v) => v,
        }
    }

    /// Replace an explicit `null` with a value; leave the other states alone.
    pub fn null_as(self, default: impl FnOnce() -> T) -> Field<T> {
        match self {
            Field::Null => Field::Value(default()),
            other => other,
        }
    }

    /// Fill an omitted or `null` field with a value.
    pub fn or_insert_with(self, default: impl FnOnce() -> T) -> Field<T> {
        match self {
            Field::Value(v) => Field::Value(v),
            _ => Field::Value(default()),
        }
    }
}

impl<T> From<Option<T>> for Field<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Field::Value(v),
            None => Field::Null,
        }
    }
}

impl<T: Serialize> Serialize for Field<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Field::Value(v) => serializer.serialize_some(v),
            Field::Missing | Field::Null => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Field<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(Field::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Probe {
        #[serde(default, skip_serializing_if = "Field::is_missing")]
        link: Field<String>,
    }

    #[test]
    fn test_deserialize_three_states() {
        let omitted: Probe = serde_json::from_str("{}").unwrap();
        let null: Probe = serde_json::from_str(r#"{"link":null}"#).unwrap();
        let value: Probe = serde_json::from_str(r#"{"link":"x"}"#).unwrap();

        assert!(omitted.link.is_missing());
        assert!(null.link.is_null());
        assert_eq!(value.link, Field::Value("x".to_string()));
    }

    #[test]
    fn test_serialize_preserves_null_and_omission() {
        let omitted = Probe { link: Field::Missing };
        let null = Probe { link: Field::Null };

        assert_eq!(serde_json::to_string(&omitted).unwrap(), "{}");
        assert_eq!(serde_json::to_string(&null).unwrap(), r#"{"link":null}"#);
    }

    #[test]
    fn test_apply_to() {
        let current = Some("x".to_string());
        assert_eq!(Field::Missing.apply_to(current.clone()), current);
        assert_eq!(Field::<String>::Null.apply_to(current.clone()), None);
        assert_eq!(
            Field::Value("y".to_string()).apply_to(current),
            Some("y".to_string())
        );
    }

    #[test]
    fn test_apply_or_resets_null_to_default() {
        assert!(Field::Missing.apply_or(true, || false));
        assert!(!Field::Null.apply_or(true, || false));
        assert!(Field::Value(true).apply_or(false, || false));
    }
}
