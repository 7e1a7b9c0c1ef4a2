//! Strict conversion of a generic payload mapping into a typed parameter
//! record.
//!
//! Envelopes carry heterogeneous parameters, so on the wire a payload is just
//! a string-keyed JSON object. Each executor turns that object back into its
//! own record through [`fill_struct`]. Matching is by exact key name and exact
//! value type: there is no coercion, no defaulting of unknown keys and no
//! schema evolution. Records not named in the payload keep their
//! `Default` values.
//!
//! Records opt in with the [`materialize!`](crate::materialize!) macro, which
//! generates an explicit field-by-field [`Materialize`] impl:
//!
//! ```rust
//! use dispatchq::materialize;
//! use dispatchq::materialize::fill_struct;
//! use serde_json::json;
//!
//! #[derive(Debug, Default)]
//! struct Resize {
//!     width: i64,
//!     label: String,
//!     checksum: String,
//! }
//!
//! materialize!(Resize {
//!     "Width" => width,
//!     "Label" => label,
//! } sealed ["Checksum"]);
//!
//! let resize: Resize = fill_struct(&json!({"Width": 640})).unwrap();
//! assert_eq!(resize.width, 640);
//! assert!(resize.label.is_empty());
//! ```

use thiserror::Error;

pub use serde_json::{Map, Value};

/// Reasons a payload cannot be materialized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    /// The payload is not a string-keyed mapping
    #[error("payload is not a mapping (found {found})")]
    NotAMapping {
        /// JSON kind of the payload
        found: &'static str,
    },

    /// No field with this name exists on the record
    #[error("no such field: {field}")]
    FieldNotFound {
        /// Key from the payload
        field: String,
    },

    /// The field exists but cannot be written
    #[error("cannot set {field} field value")]
    FieldNotSettable {
        /// Key from the payload
        field: String,
    },

    /// The value's type does not exactly match the field's type
    #[error("type mismatch for {field}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Key from the payload
        field: String,
        /// Declared field type
        expected: String,
        /// JSON kind of the supplied value
        found: &'static str,
    },
}

/// A record that can be filled from a payload mapping one key at a time.
pub trait Materialize {
    /// Write `value` into the field named `name`.
    fn set_field(&mut self, name: &str, value: &Value) -> Result<(), MaterializeError>;

    /// Write every entry of `map`, stopping at the first failure. Fields
    /// already written are left in place.
    fn fill_from(&mut self, map: &Map<String, Value>) -> Result<(), MaterializeError> {
        for (name, value) in map {
            self.set_field(name, value)?;
        }
        Ok(())
    }
}

/// Materialize `payload` into a fresh `T`.
pub fn fill_struct<T>(payload: &Value) -> Result<T, MaterializeError>
where
    T: Materialize + Default,
{
    let map = payload.as_object().ok_or(MaterializeError::NotAMapping {
        found: json_kind(payload),
    })?;

    let mut record = T::default();
    record.fill_from(map)?;
    Ok(record)
}

/// Name of the JSON kind of `value`, as used in error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A field type that accepts exactly one JSON shape.
pub trait FieldValue: Sized {
    /// Type name reported in [`MaterializeError::TypeMismatch`].
    fn expected() -> String;

    /// Convert `value`, or `None` if its type does not match.
    fn from_json(value: &Value) -> Option<Self>;

    /// Convert `value` for the field `field`.
    fn from_field_value(field: &str, value: &Value) -> Result<Self, MaterializeError> {
        Self::from_json(value).ok_or_else(|| MaterializeError::TypeMismatch {
            field: field.to_string(),
            expected: Self::expected(),
            found: json_kind(value),
        })
    }
}

impl FieldValue for String {
    fn expected() -> String {
        "string".into()
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl FieldValue for bool {
    fn expected() -> String {
        "bool".into()
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

macro_rules! signed_field_value {
    ($($t:ty),*) => {$(
        impl FieldValue for $t {
            fn expected() -> String {
                stringify!($t).into()
            }

            fn from_json(value: &Value) -> Option<Self> {
                value.as_i64().and_then(|n| <$t>::try_from(n).ok())
            }
        }
    )*};
}

macro_rules! unsigned_field_value {
    ($($t:ty),*) => {$(
        impl FieldValue for $t {
            fn expected() -> String {
                stringify!($t).into()
            }

            fn from_json(value: &Value) -> Option<Self> {
                value.as_u64().and_then(|n| <$t>::try_from(n).ok())
            }
        }
    )*};
}

signed_field_value!(i8, i16, i32, i64);
unsigned_field_value!(u8, u16, u32, u64, usize);

impl FieldValue for f64 {
    fn expected() -> String {
        "f64".into()
    }

    fn from_json(value: &Value) -> Option<Self> {
        if value.is_f64() { value.as_f64() } else { None }
    }
}

impl FieldValue for Value {
    fn expected() -> String {
        "any".into()
    }

    fn from_json(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn expected() -> String {
        format!("optional {}", T::expected())
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_json(other).map(Some),
        }
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn expected() -> String {
        format!("array of {}", T::expected())
    }

    fn from_json(value: &Value) -> Option<Self> {
        value.as_array()?.iter().map(T::from_json).collect()
    }
}

/// Generate a [`Materialize`] impl mapping payload keys to record fields.
///
/// Keys listed before `=>` are matched exactly. Keys in the optional `sealed`
/// list name fields that exist but may not be written from a payload. Any
/// other key is rejected with `FieldNotFound`.
#[macro_export]
macro_rules! materialize {
    ($record:ty { $($key:literal => $field:ident),* $(,)? } $(sealed [$($sealed:literal),* $(,)?])?) => {
        impl $crate::materialize::Materialize for $record {
            fn set_field(
                &mut self,
                name: &str,
                value: &$crate::materialize::Value,
            ) -> Result<(), $crate::materialize::MaterializeError> {
                match name {
                    $(
                        $key => {
                            self.$field = $crate::materialize::FieldValue::from_field_value(name, value)?;
                            Ok(())
                        }
                    )*
                    $($(
                        $sealed => Err($crate::materialize::MaterializeError::FieldNotSettable {
                            field: name.to_string(),
                        }),
                    )*)?
                    _ => Err($crate::materialize::MaterializeError::FieldNotFound {
                        field: name.to_string(),
                    }),
                }
            }
        }
    };
}
