use std::collections::BTreeMap;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

use crate::bencoding::value::Value;
use crate::codec::AsyncDecoder;
use crate::error::{Error, Result};

const BUFFER_SIZE: usize = 1024 * 8;
const MAX_DEPTH: usize = 64;
const MAX_PREALLOCATION: usize = 1024 * 64;

impl Value {
    /// Decodes a single bencoded value which must span the whole input.
    pub fn from_bytes(input: &[u8]) -> Result<Self> {
        let mut parser = Parser::new();
        parser.feed(input)?;
        parser.result()
    }
}

impl AsyncDecoder for Value {
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let mut parser = Parser::new();
        let mut buf = [0; BUFFER_SIZE];
        loop {
            let read = stream.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            parser.feed(&buf[0..read])?;
        }
        parser.result()
    }
}

/// Push parser: input can be fed in chunks of any size, e.g. straight from a
/// socket or an HTTP body stream.
#[derive(Debug)]
pub struct Parser {
    state: State,
    stack: Vec<StackState>,
    position: usize,
}

#[derive(Debug)]
enum State {
    Ready,
    Integer(Integer),
    StringLength { length: usize, leading_zero: bool },
    StringContents(Vec<u8>, usize),
    Done(Value),
}

#[derive(Debug)]
enum Integer {
    Start,
    Negative,
    Zero,
    Digits { value: i64, negative: bool },
}

#[derive(Debug)]
enum StackState {
    List(Vec<Value>),
    Dictionary(Option<Vec<u8>>, BTreeMap<Vec<u8>, Value>),
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ready,
            stack: Vec::new(),
            position: 0,
        }
    }

    pub fn feed(&mut self, mut input: &[u8]) -> Result<()> {
        while !input.is_empty() {
            if let State::StringContents(bytes, length) = &mut self.state {
                // Copy string contents in bulk instead of byte by byte
                let take = (*length - bytes.len()).min(input.len());
                bytes.extend_from_slice(&input[..take]);
                input = &input[take..];
                self.position += take;
                if bytes.len() == *length {
                    let string = std::mem::take(bytes);
                    self.emit(Value::String(string))?;
                }
            } else {
                self.consume(input[0])?;
                input = &input[1..];
            }
        }
        Ok(())
    }

    fn consume(&mut self, byte: u8) -> Result<()> {
        let position = self.position;
        match (&mut self.state, byte) {
            (State::Done(_), _) => {
                return Err(Error::malformed(position, "trailing bytes after value"));
            }

            // Integer
            (State::Ready, b'i') => {
                self.state = State::Integer(Integer::Start);
            }
            (State::Integer(integer @ Integer::Start), b'-') => {
                *integer = Integer::Negative;
            }
            (State::Integer(integer @ Integer::Start), b'0') => {
                *integer = Integer::Zero;
            }
            (State::Integer(Integer::Negative), b'0') => {
                return Err(Error::malformed(position, "negative zero not allowed"));
            }
            (State::Integer(Integer::Zero), b'0'..=b'9') => {
                return Err(Error::malformed(position, "leading zeros not allowed"));
            }
            (State::Integer(integer @ (Integer::Start | Integer::Negative)), b'1'..=b'9') => {
                let negative = matches!(integer, Integer::Negative);
                let digit = (byte - b'0') as i64;
                let value = if negative { -digit } else { digit };
                *integer = Integer::Digits { value, negative };
            }
            (State::Integer(Integer::Digits { value, negative }), b'0'..=b'9') => {
                let digit = (byte - b'0') as i64;
                // Accumulate negative numbers below zero so that i64::MIN fits
                *value = value
                    .checked_mul(10)
                    .and_then(|shifted| {
                        if *negative {
                            shifted.checked_sub(digit)
                        } else {
                            shifted.checked_add(digit)
                        }
                    })
                    .ok_or_else(|| Error::malformed(position, "integer overflow"))?;
            }
            (State::Integer(Integer::Zero), b'e') => {
                self.emit(Value::Integer(0))?;
            }
            (&mut State::Integer(Integer::Digits { value, .. }), b'e') => {
                self.emit(Value::Integer(value))?;
            }

            // String
            (State::Ready, b'0') => {
                self.state = State::StringLength {
                    length: 0,
                    leading_zero: true,
                };
            }
            (State::Ready, b'1'..=b'9') => {
                let digit = (byte - b'0') as usize;
                self.state = State::StringLength {
                    length: digit,
                    leading_zero: false,
                };
            }
            (
                State::StringLength {
                    leading_zero: true, ..
                },
                b'0'..=b'9',
            ) => {
                return Err(Error::malformed(
                    position,
                    "leading zeros not allowed in string length",
                ));
            }
            (State::StringLength { length, .. }, b'0'..=b'9') => {
                let digit = (byte - b'0') as usize;
                *length = length
                    .checked_mul(10)
                    .and_then(|shifted| shifted.checked_add(digit))
                    .ok_or_else(|| Error::malformed(position, "string length overflow"))?;
            }
            (&mut State::StringLength { length, .. }, b':') => {
                if length == 0 {
                    self.emit(Value::String(Vec::new()))?;
                } else {
                    let string = Vec::with_capacity(length.min(MAX_PREALLOCATION));
                    self.state = State::StringContents(string, length);
                }
            }

            // List
            (State::Ready, b'l') => {
                self.open(StackState::List(Vec::new()), position)?;
            }

            // Dictionary
            (State::Ready, b'd') => {
                self.open(StackState::Dictionary(None, BTreeMap::new()), position)?;
            }

            // End collection
            (State::Ready, b'e') => match self.stack.pop() {
                Some(StackState::List(list)) => {
                    self.emit(Value::List(list))?;
                }
                Some(StackState::Dictionary(None, entries)) => {
                    self.emit(Value::Dictionary(entries))?;
                }
                Some(StackState::Dictionary(Some(_), _)) => {
                    return Err(Error::malformed(position, "dictionary key without value"));
                }
                None => {
                    return Err(Error::malformed(position, "nothing to close"));
                }
            },

            // Unexpected input
            (_, byte) => {
                return Err(Error::malformed(
                    position,
                    format!("unexpected byte 0x{byte:02x}"),
                ));
            }
        }
        self.position += 1;
        Ok(())
    }

    fn open(&mut self, collection: StackState, position: usize) -> Result<()> {
        if self.stack.len() >= MAX_DEPTH {
            return Err(Error::malformed(position, "nesting too deep"));
        }
        self.stack.push(collection);
        Ok(())
    }

    fn emit(&mut self, value: Value) -> Result<()> {
        let position = self.position;
        match (self.stack.last_mut(), value) {
            (Some(StackState::List(list)), value) => {
                list.push(value);
            }
            (Some(StackState::Dictionary(key @ None, entries)), Value::String(string)) => {
                if entries.contains_key(&string) {
                    return Err(Error::malformed(position, "duplicate dictionary key"));
                }
                *key = Some(string);
            }
            (Some(StackState::Dictionary(None, _)), _) => {
                return Err(Error::malformed(
                    position,
                    "only string keys are allowed in dictionaries",
                ));
            }
            (Some(StackState::Dictionary(key, entries)), value) => {
                if let Some(key) = key.take() {
                    entries.insert(key, value);
                }
            }
            (None, value) => {
                self.state = State::Done(value);
                return Ok(());
            }
        }
        self.state = State::Ready;
        Ok(())
    }

    pub fn result(self) -> Result<Value> {
        match self.state {
            State::Done(value) => Ok(value),
            _ => Err(Error::malformed(self.position, "unexpected end of input")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tokio::io::BufReader;

    use super::*;
    use crate::codec::Encoder;

    fn decode(input: &[u8]) -> Result<Value> {
        Value::from_bytes(input)
    }

    fn is_malformed(result: Result<Value>) -> bool {
        matches!(result, Err(Error::MalformedEncoding { .. }))
    }

    #[test]
    fn parse_error() {
        assert!(is_malformed(decode(b"foo")));
    }

    #[test]
    fn empty_input() {
        assert!(is_malformed(decode(b"")));
    }

    #[test]
    fn string() {
        assert_eq!(decode(b"3:foo").unwrap(), Value::string("foo"));
    }

    #[test]
    fn empty_string() {
        assert_eq!(decode(b"0:").unwrap(), Value::String(Vec::new()));
    }

    #[test]
    fn binary_string() {
        assert_eq!(
            decode(b"3:\x00\xff\x10").unwrap(),
            Value::String(vec![0x00, 0xff, 0x10])
        );
    }

    #[test]
    fn fail_for_leading_zero_in_string_length() {
        assert!(is_malformed(decode(b"03:abc")));
    }

    #[test]
    fn fail_for_truncated_string() {
        assert!(is_malformed(decode(b"5:abc")));
    }

    #[test]
    fn fail_for_unterminated_string_length() {
        assert!(is_malformed(decode(b"12")));
    }

    #[test]
    fn zero() {
        assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
    }

    #[test]
    fn multi_digit_integer() {
        assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    }

    #[test]
    fn negative_integer() {
        assert_eq!(decode(b"i-17e").unwrap(), Value::Integer(-17));
    }

    #[test]
    fn integer_limits() {
        assert_eq!(
            decode(b"i9223372036854775807e").unwrap(),
            Value::Integer(i64::MAX)
        );
        assert_eq!(
            decode(b"i-9223372036854775808e").unwrap(),
            Value::Integer(i64::MIN)
        );
        assert!(is_malformed(decode(b"i9223372036854775808e")));
    }

    #[test]
    fn fail_for_minus_zero() {
        assert!(is_malformed(decode(b"i-0e")));
    }

    #[test]
    fn fail_for_leading_zero() {
        assert!(is_malformed(decode(b"i01e")));
        assert!(is_malformed(decode(b"i00e")));
    }

    #[test]
    fn fail_for_empty_integer() {
        assert!(is_malformed(decode(b"ie")));
        assert!(is_malformed(decode(b"i-e")));
    }

    #[test]
    fn fail_for_unterminated_integer() {
        assert!(is_malformed(decode(b"i42")));
    }

    #[test]
    fn fail_for_trailing_bytes() {
        assert!(is_malformed(decode(b"i42ei1e")));
        assert!(is_malformed(decode(b"4:spam ")));
        assert!(is_malformed(decode(b"lee")));
    }

    #[test]
    fn empty_list() {
        assert_eq!(decode(b"le").unwrap(), Value::list());
    }

    #[test]
    fn nested_list() {
        assert_eq!(
            decode(b"li1eli2ei3eee").unwrap(),
            Value::list().with_value(Value::Integer(1)).with_value(
                Value::list()
                    .with_value(Value::Integer(2))
                    .with_value(Value::Integer(3))
            )
        );
    }

    #[test]
    fn heterogeneous_list() {
        assert_eq!(
            decode(b"l3:fooi42ee").unwrap(),
            Value::list()
                .with_value(Value::string("foo"))
                .with_value(Value::Integer(42))
        );
    }

    #[test]
    fn fail_for_unclosed_list() {
        assert!(is_malformed(decode(b"li1e")));
    }

    #[test]
    fn non_empty_dictionary() {
        assert_eq!(
            decode(b"d3:cow3:moo4:spam4:eggse").unwrap(),
            Value::dictionary()
                .with_entry("cow", Value::string("moo"))
                .with_entry("spam", Value::string("eggs"))
        );
    }

    #[test]
    fn unsorted_dictionary_keys_are_accepted() {
        assert_eq!(
            decode(b"d4:spami1e3:cowi2ee").unwrap(),
            Value::dictionary()
                .with_entry("cow", Value::Integer(2))
                .with_entry("spam", Value::Integer(1))
        );
    }

    #[test]
    fn unsorted_dictionary_reencodes_canonically() {
        let value = decode(b"d4:spami1e3:cowi2ee").unwrap();

        assert_eq!(value.to_bytes(), b"d3:cowi2e4:spami1ee");
    }

    #[test]
    fn fail_for_non_string_keys() {
        assert!(is_malformed(decode(b"di1ei2ee")));
    }

    #[test]
    fn fail_for_duplicate_keys() {
        assert!(is_malformed(decode(b"d3:fooi1e3:fooi2ee")));
    }

    #[test]
    fn fail_for_key_without_value() {
        assert!(is_malformed(decode(b"d3:fooe")));
    }

    #[test]
    fn fail_for_excessive_nesting() {
        let mut input = vec![b'l'; MAX_DEPTH + 1];
        input.extend(vec![b'e'; MAX_DEPTH + 1]);

        assert!(is_malformed(decode(&input)));
    }

    #[test]
    fn error_reports_position() {
        match decode(b"li1ex") {
            Err(Error::MalformedEncoding { position, .. }) => assert_eq!(position, 4),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn feed_in_chunks() {
        let input = b"d4:infod6:lengthi1234e4:name5:helloee";
        let mut parser = Parser::new();
        for chunk in input.chunks(3) {
            parser.feed(chunk).unwrap();
        }

        assert_eq!(
            parser.result().unwrap(),
            Value::dictionary().with_entry(
                "info",
                Value::dictionary()
                    .with_entry("length", Value::Integer(1234))
                    .with_entry("name", Value::string("hello"))
            )
        );
    }

    #[tokio::test]
    async fn decode_from_stream() {
        let cursor = Cursor::new(b"d3:food3:barl3:bazee3:quxi42ee".to_vec());
        let mut buf = BufReader::new(cursor);

        let result = <Value as AsyncDecoder>::decode(&mut buf).await;

        assert_eq!(
            result.unwrap(),
            Value::dictionary()
                .with_entry(
                    "foo",
                    Value::dictionary()
                        .with_entry("bar", Value::list().with_value(Value::string("baz")))
                )
                .with_entry("qux", Value::Integer(42))
        );
    }
}
