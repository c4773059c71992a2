use std::io::{Result, Write};

use crate::bencoding::value::Value;
use crate::codec::Encoder;

impl Encoder for Value {
    fn encode(&self, dest: &mut impl Write) -> Result<()> {
        match self {
            Self::String(string) => encode_string(string, dest),
            Self::Integer(integer) => write!(dest, "i{}e", integer),
            Self::List(values) => {
                write!(dest, "l")?;
                for value in values {
                    value.encode(dest)?;
                }
                write!(dest, "e")
            }
            Self::Dictionary(entries) => {
                // BTreeMap iterates keys in lexicographic byte order, the canonical form
                write!(dest, "d")?;
                for (key, value) in entries {
                    encode_string(key, dest)?;
                    value.encode(dest)?;
                }
                write!(dest, "e")
            }
            Self::PreEncoded(bytes) => dest.write_all(bytes),
        }
    }
}

fn encode_string(string: &[u8], dest: &mut impl Write) -> Result<()> {
    write!(dest, "{}:", string.len())?;
    dest.write_all(string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer() {
        assert_eq!(Value::Integer(42).to_bytes(), b"i42e");
        assert_eq!(Value::Integer(-7).to_bytes(), b"i-7e");
    }

    #[test]
    fn string() {
        assert_eq!(Value::string("foo").to_bytes(), b"3:foo");
        assert_eq!(Value::String(Vec::new()).to_bytes(), b"0:");
    }

    #[test]
    fn list() {
        let value = Value::list()
            .with_value(Value::string("foo"))
            .with_value(Value::string("bar"));

        assert_eq!(value.to_bytes(), b"l3:foo3:bare");
    }

    #[test]
    fn dictionary() {
        let value = Value::dictionary()
            .with_entry("foo", Value::Integer(1))
            .with_entry("bar", Value::Integer(2))
            .with_entry("Zed", Value::Integer(3));

        // Dictionary keys are sorted by raw bytes
        assert_eq!(value.to_bytes(), b"d3:Zedi3e3:bari2e3:fooi1ee");
    }

    #[test]
    fn pre_encoded_is_written_verbatim() {
        let value = Value::dictionary()
            .with_entry("info", Value::PreEncoded(b"d1:bi1e1:ai2ee".to_vec()));

        assert_eq!(value.to_bytes(), b"d4:infod1:bi1e1:ai2eee");
    }

    #[test]
    fn decode_after_encode() {
        let value = Value::dictionary()
            .with_entry(
                "announce-list",
                Value::list().with_value(Value::list().with_value(Value::string("http://a"))),
            )
            .with_entry("pieces", Value::String(vec![0, 255, 1, 254]))
            .with_entry("length", Value::Integer(-12345));

        assert_eq!(Value::from_bytes(&value.to_bytes()).unwrap(), value);
    }
}
