//! The dynamic value sum carried inside messages.
//!
//! Node payloads are heterogeneous: scalars from literals, arrays from
//! `range`/`list`, maps from selectors and fetched pages from Goto. The
//! engine represents them as one tagged enum and every operator checks tags
//! before use.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A handle to a fetched, not-yet-consumed HTTP response.
///
/// Goto wraps the response without reading the body; the Selector that
/// consumes it calls [`Page::take`], which succeeds at most once. Cloning a
/// `Page` clones the handle, not the response.
#[derive(Clone)]
pub struct Page {
    url: String,
    response: Arc<Mutex<Option<reqwest::Response>>>,
}

impl Page {
    pub fn new(url: impl Into<String>, response: reqwest::Response) -> Self {
        Page {
            url: url.into(),
            response: Arc::new(Mutex::new(Some(response))),
        }
    }

    /// The URL the page was fetched from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Takes the response out of the handle. Returns `None` if it was
    /// already consumed.
    pub fn take(&self) -> Option<reqwest::Response> {
        self.response.lock().expect("page lock poisoned").take()
    }

    fn same_handle(&self, other: &Page) -> bool {
        Arc::ptr_eq(&self.response, &other.response)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("url", &self.url).finish()
    }
}

/// A dynamically typed runtime value.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Int(i32),
    Str(String),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Page(Page),
}

impl Value {
    /// The value's kind name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Page(_) => "page",
        }
    }

    /// True when both values carry the same dynamic type tag.
    pub fn same_kind(&self, other: &Value) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Renders the value as JSON for CLI output and diagnostics. Pages
    /// render as their URL.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Str(s) => serde_json::Value::from(s.clone()),
            Value::Bool(b) => serde_json::Value::from(*b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Page(p) => serde_json::Value::from(format!("<page {}>", p.url())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            // Pages compare by handle identity; there is no meaningful
            // structural equality for an unread response.
            (Value::Page(a), Value::Page(b)) => a.same_handle(b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_kind_distinguishes_variants() {
        assert!(Value::Int(1).same_kind(&Value::Int(2)));
        assert!(!Value::Int(1).same_kind(&Value::Bool(true)));
        assert!(!Value::Null.same_kind(&Value::Str("".into())));
    }

    #[test]
    fn deep_equality_on_nested_lists() {
        let a = Value::List(vec![Value::Int(1), Value::List(vec![Value::Str("x".into())])]);
        let b = Value::List(vec![Value::Int(1), Value::List(vec![Value::Str("x".into())])]);
        assert_eq!(a, b);
        let c = Value::List(vec![Value::Int(1), Value::List(vec![Value::Str("y".into())])]);
        assert_ne!(a, c);
    }

    #[test]
    fn json_rendering() {
        let v = Value::List(vec![Value::Int(2), Value::Null, Value::Bool(true)]);
        assert_eq!(v.to_string(), "[2,null,true]");
    }
}
