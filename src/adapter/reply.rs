//! Normalized reply values
//!
//! Every adapter converts its client library's reply representation
//! into this closed set before it reaches the core. Binary payloads
//! always come back as `Bytes`.

use bytes::Bytes;
use std::fmt;

/// Normalized store reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Missing key / empty script result
    Nil,

    /// Integer reply
    Int(i64),

    /// Binary-safe payload
    Data(Bytes),

    /// Status line such as OK
    Simple(String),

    /// Nested array reply
    Array(Vec<Reply>),
}

impl Reply {
    /// Create a data reply from bytes
    pub fn data(b: impl Into<Bytes>) -> Self {
        Reply::Data(b.into())
    }

    /// Create an array reply
    pub fn array(v: Vec<Reply>) -> Self {
        Reply::Array(v)
    }

    /// Check whether the reply is Nil or an empty array
    pub fn is_empty(&self) -> bool {
        match self {
            Reply::Nil => true,
            Reply::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    /// Try to extract payload bytes
    pub fn as_data(&self) -> Option<&Bytes> {
        match self {
            Reply::Data(b) => Some(b),
            _ => None,
        }
    }

    /// Try to extract an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Reply::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to extract array elements
    pub fn as_array(&self) -> Option<&[Reply]> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Interpret the payload as a float (scores come back as bulk strings)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reply::Int(i) => Some(*i as f64),
            Reply::Data(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            Reply::Simple(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "Nil"),
            Reply::Int(i) => write!(f, "Int({})", i),
            Reply::Data(b) => write!(f, "Data({} bytes)", b.len()),
            Reply::Simple(s) => write!(f, "Simple({})", s),
            Reply::Array(items) => write!(f, "Array({} elements)", items.len()),
        }
    }
}

impl From<redis::Value> for Reply {
    fn from(value: redis::Value) -> Self {
        match value {
            redis::Value::Nil => Reply::Nil,
            redis::Value::Int(i) => Reply::Int(i),
            redis::Value::BulkString(raw) => Reply::Data(Bytes::from(raw)),
            redis::Value::SimpleString(s) => Reply::Simple(s),
            redis::Value::Okay => Reply::Simple("OK".to_string()),
            redis::Value::Double(d) => Reply::Simple(d.to_string()),
            redis::Value::Boolean(b) => Reply::Int(b as i64),
            redis::Value::Array(items) => {
                Reply::Array(items.into_iter().map(Reply::from).collect())
            }
            redis::Value::Set(items) => {
                Reply::Array(items.into_iter().map(Reply::from).collect())
            }
            redis::Value::Map(pairs) => {
                let mut flat = Vec::with_capacity(pairs.len() * 2);
                for (k, v) in pairs {
                    flat.push(Reply::from(k));
                    flat.push(Reply::from(v));
                }
                Reply::Array(flat)
            }
            other => Reply::Simple(format!("{:?}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_empty() {
        assert!(Reply::Nil.is_empty());
        assert!(Reply::Array(vec![]).is_empty());
        assert!(!Reply::Int(0).is_empty());
        assert!(!Reply::array(vec![Reply::Nil]).is_empty());
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Reply::data("2.5").as_f64(), Some(2.5));
        assert_eq!(Reply::Int(4).as_f64(), Some(4.0));
        assert_eq!(Reply::Nil.as_f64(), None);
    }

    #[test]
    fn test_from_redis_value() {
        let v = redis::Value::Array(vec![
            redis::Value::BulkString(b"a".to_vec()),
            redis::Value::Int(1),
        ]);
        let reply = Reply::from(v);
        let items = reply.as_array().unwrap();
        assert_eq!(items[0].as_data().unwrap().as_ref(), b"a");
        assert_eq!(items[1].as_int(), Some(1));
    }
}
