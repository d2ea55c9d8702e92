//! Stored Values
//!
//! Every value in the keyspace is a [`Value`] wrapped in an `Rc`. The `Rc`
//! plays the role of the reference count: a hash entry, a reply in flight or a
//! local in a command handler each hold one strong reference, and the payload
//! is freed when the last one goes away.
//!
//! Lists are mutated copy-on-write through [`Rc::make_mut`], so a handler that
//! still holds an older snapshot never observes the change.

use bytes::Bytes;
use std::collections::VecDeque;
use std::rc::Rc;

/// A shared handle to a stored value.
pub type Object = Rc<Value>;

/// The payload of a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Binary-safe string
    Str(Bytes),
    /// Double-ended list of strings
    List(VecDeque<Bytes>),
}

impl Value {
    /// Creates a string object.
    pub fn string(data: impl Into<Bytes>) -> Object {
        Rc::new(Value::Str(data.into()))
    }

    /// Creates a string object holding the decimal form of `n`.
    pub fn integer(n: i64) -> Object {
        Rc::new(Value::Str(Bytes::from(n.to_string())))
    }

    /// Creates an empty list object.
    pub fn list() -> Object {
        Rc::new(Value::List(VecDeque::new()))
    }

    /// The name reported by the TYPE command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Returns the string payload, if this is a string.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Str(b) => Some(b),
            Value::List(_) => None,
        }
    }

    /// Parses a string payload as a signed 64-bit integer.
    pub fn as_integer(&self) -> Option<i64> {
        self.as_bytes()
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse().ok())
    }

    /// Returns the list payload, if this is a list.
    pub fn as_list(&self) -> Option<&VecDeque<Bytes>> {
        match self {
            Value::List(l) => Some(l),
            Value::Str(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_roundtrip() {
        let obj = Value::integer(-42);
        assert_eq!(obj.as_bytes(), Some(&Bytes::from("-42")));
        assert_eq!(obj.as_integer(), Some(-42));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::string("x").type_name(), "string");
        assert_eq!(Value::list().type_name(), "list");
    }

    #[test]
    fn test_last_release_drops_payload() {
        let obj = Value::string("payload");
        let weak = Rc::downgrade(&obj);
        let held = Rc::clone(&obj);
        drop(obj);
        assert!(weak.upgrade().is_some());
        drop(held);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_make_mut_copies_shared_list() {
        let mut list = Value::list();
        let snapshot = Rc::clone(&list);
        if let Value::List(items) = Rc::make_mut(&mut list) {
            items.push_back(Bytes::from("a"));
        }
        assert_eq!(list.as_list().map(VecDeque::len), Some(1));
        assert_eq!(snapshot.as_list().map(VecDeque::len), Some(0));
    }
}
