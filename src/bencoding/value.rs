use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Value {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<Value>),
    /// Keys are unique; a `BTreeMap` keeps them in the canonical (sorted) encoding order.
    /// Decoding does not keep the key order of the input, so re-encoding an unsorted
    /// dictionary yields different bytes. Info hashes are computed over the canonical form.
    Dictionary(BTreeMap<Vec<u8>, Value>),
    /// Already serialized bencode emitted verbatim by the encoder. Never produced by decoding.
    PreEncoded(Vec<u8>),
}

impl Value {
    pub fn string(string: &str) -> Self {
        Self::String(string.as_bytes().to_vec())
    }

    pub fn list() -> Self {
        Self::List(Vec::new())
    }

    pub fn dictionary() -> Self {
        Self::Dictionary(BTreeMap::new())
    }

    pub fn with_value(mut self, value: Value) -> Self {
        if let Self::List(values) = &mut self {
            values.push(value);
        }
        self
    }

    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        if let Self::Dictionary(entries) = &mut self {
            entries.insert(key.as_bytes().to_vec(), value);
        }
        self
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::List(_) => "list",
            Self::Dictionary(_) => "dictionary",
            Self::PreEncoded(_) => "pre-encoded",
        }
    }

    pub fn contains_entry(&self, key: &str) -> bool {
        match self {
            Self::Dictionary(entries) => entries.contains_key(key.as_bytes()),
            _ => false,
        }
    }

    /// Removes a required dictionary entry.
    pub fn remove_entry(&mut self, key: &str) -> Result<Value> {
        self.try_remove_entry(key)?
            .ok_or_else(|| Error::metadata(format!("missing entry \"{}\"", key)))
    }

    /// Removes an optional dictionary entry.
    pub fn try_remove_entry(&mut self, key: &str) -> Result<Option<Value>> {
        match self {
            Self::Dictionary(entries) => Ok(entries.remove(key.as_bytes())),
            other => Err(Error::metadata(format!(
                "expected dictionary holding \"{}\", found {}",
                key,
                other.type_name()
            ))),
        }
    }
}

fn unexpected(expected: &str, value: &Value) -> Error {
    Error::metadata(format!("expected {}, found {}", expected, value.type_name()))
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Integer(integer) => Ok(integer),
            other => Err(unexpected("integer", &other)),
        }
    }
}

macro_rules! try_from_integer {
    ($($target:ty),*) => {
        $(
            impl TryFrom<Value> for $target {
                type Error = Error;

                fn try_from(value: Value) -> Result<Self> {
                    let integer = i64::try_from(value)?;
                    <$target>::try_from(integer).map_err(|_| {
                        Error::metadata(format!(
                            "integer {} out of range for {}",
                            integer,
                            stringify!($target)
                        ))
                    })
                }
            }
        )*
    };
}

try_from_integer!(u64, usize, u32, u16);

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Ok(i64::try_from(value)? != 0)
    }
}

impl TryFrom<Value> for Duration {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let seconds = u64::try_from(value)?;
        Ok(Duration::from_secs(seconds))
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(bytes) => Ok(bytes),
            other => Err(unexpected("string", &other)),
        }
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        let bytes = Vec::<u8>::try_from(value)?;
        String::from_utf8(bytes).map_err(|_| Error::metadata("string should be valid utf8"))
    }
}

impl TryFrom<Value> for Vec<Value> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::List(values) => Ok(values),
            other => Err(unexpected("list", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_required_entry() {
        let mut value = Value::dictionary().with_entry("length", Value::Integer(42));

        let length: u64 = value.remove_entry("length").unwrap().try_into().unwrap();

        assert_eq!(length, 42);
        assert!(!value.contains_entry("length"));
    }

    #[test]
    fn missing_entry() {
        let mut value = Value::dictionary();

        assert!(matches!(
            value.remove_entry("name"),
            Err(Error::InvalidMetadata(_))
        ));
        assert!(value.try_remove_entry("name").unwrap().is_none());
    }

    #[test]
    fn negative_integer_is_not_unsigned() {
        assert!(u64::try_from(Value::Integer(-1)).is_err());
    }

    #[test]
    fn port_out_of_range() {
        assert!(u16::try_from(Value::Integer(70000)).is_err());
    }

    #[test]
    fn invalid_utf8_string() {
        assert!(String::try_from(Value::String(vec![0xff, 0xfe])).is_err());
    }
}
