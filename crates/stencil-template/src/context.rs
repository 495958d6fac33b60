//! Template values and scopes.
//!
//! Provides [`Value`] for representing dynamic template data and [`Scope`], a
//! stack of variable layers used during rendering. Lookups are total: a
//! missing name or member yields [`Value::Undefined`], which renders as an
//! empty string.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use stencil_core::error::{StencilError, StencilResult};

/// A compiled regular-expression literal (`r/pattern/flags`).
#[derive(Debug, Clone)]
pub struct RegexValue {
    pub regex: regex::Regex,
    /// The `g` flag: replace every match instead of the first.
    pub global: bool,
    pub source: String,
    pub flags: String,
}

/// A dynamic value visible to templates.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// A missing variable or member.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// A string that must not be HTML-escaped again.
    SafeString(String),
    List(Vec<Value>),
    /// An insertion-ordered mapping.
    Map(IndexMap<String, Value>),
    Regex(Arc<RegexValue>),
}

impl Value {
    /// Creates a [`Value::SafeString`].
    pub fn safe(s: impl Into<String>) -> Self {
        Self::SafeString(s.into())
    }

    /// Returns `true` if this value is considered "truthy".
    ///
    /// `Undefined`, `Null`, `false`, `0`, `NaN`, empty strings, empty lists
    /// and empty maps are falsy. Everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Integer(i) => *i != 0,
            Self::Float(f) => *f != 0.0 && !f.is_nan(),
            Self::String(s) | Self::SafeString(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Map(map) => !map.is_empty(),
            Self::Regex(_) => true,
        }
    }

    /// Returns `true` for `Undefined` and `Null`.
    pub const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Returns `true` if this value is a safe string (auto-escaping bypassed).
    pub const fn is_safe(&self) -> bool {
        matches!(self, Self::SafeString(_))
    }

    /// Marks a string value as safe, bypassing auto-escaping.
    #[must_use]
    pub fn mark_safe(self) -> Self {
        match self {
            Self::String(s) => Self::SafeString(s),
            other => other,
        }
    }

    /// Returns the string content of `String` and `SafeString` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::SafeString(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for integers and floats.
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Integer(_) | Self::Float(_))
    }

    /// Returns `true` for `String` and `SafeString`.
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_) | Self::SafeString(_))
    }

    /// Converts this value to a display string (without HTML escaping).
    ///
    /// `Undefined` and `Null` render empty, integral floats drop their
    /// fractional part, lists join their items with `,`, and maps render as
    /// JSON.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined | Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => format_number(*f),
            Self::String(s) | Self::SafeString(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(Self::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            Self::Map(_) => self.to_json().to_string(),
            Self::Regex(re) => format!("/{}/{}", re.source, re.flags),
        }
    }

    /// Converts this value to JSON. `Undefined` and non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) | Self::SafeString(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Regex(re) => serde_json::Value::String(format!("/{}/{}", re.source, re.flags)),
        }
    }

    /// Numeric conversion: `Null` and `false` are 0, `true` is 1, numeric
    /// strings parse (an empty string is 0), everything else is `NaN`.
    #[allow(clippy::cast_precision_loss)]
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Integer(i) => *i as f64,
            Self::Float(f) => *f,
            Self::String(s) | Self::SafeString(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Returns the value as an integer when it is one, or an integral float.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Some(*f as i64),
            _ => None,
        }
    }

    /// Returns the number of items in a list or map, or characters in a string.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::String(s) | Self::SafeString(s) => Some(s.chars().count()),
            Self::List(items) => Some(items.len()),
            Self::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    /// Returns whether the collection is empty, or `None` for non-collections.
    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|l| l == 0)
    }

    /// Looks up a member by name. Lists and strings expose `length` and
    /// numeric indices; maps expose their keys. Anything else is `Undefined`.
    pub fn get_member(&self, key: &str) -> Self {
        match self {
            Self::Map(map) => map.get(key).cloned().unwrap_or_default(),
            Self::List(_) | Self::String(_) | Self::SafeString(_) => {
                if key == "length" {
                    self.len().map_or(Self::Undefined, Self::from)
                } else {
                    key.parse::<usize>()
                        .map_or(Self::Undefined, |index| self.get_index(index))
                }
            }
            _ => Self::Undefined,
        }
    }

    /// Looks up a member by a computed key (`value[key]`).
    pub fn get_item(&self, key: &Self) -> Self {
        if let (Self::List(_) | Self::String(_) | Self::SafeString(_), Some(index)) =
            (self, key.as_integer())
        {
            return usize::try_from(index).map_or(Self::Undefined, |i| self.get_index(i));
        }
        self.get_member(&key.to_display_string())
    }

    fn get_index(&self, index: usize) -> Self {
        match self {
            Self::List(items) => items.get(index).cloned().unwrap_or_default(),
            Self::String(s) | Self::SafeString(s) => s
                .chars()
                .nth(index)
                .map_or(Self::Undefined, |c| Self::String(c.to_string())),
            _ => Self::Undefined,
        }
    }

    /// Loose equality (`==`): `null` equals `undefined`, numbers compare with
    /// numeric strings and booleans by value.
    pub fn loose_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (a, b) if a.is_string() && b.is_string() => a.as_str() == b.as_str(),
            (Self::List(_) | Self::Map(_) | Self::Regex(_), _)
            | (_, Self::List(_) | Self::Map(_) | Self::Regex(_)) => self.strict_eq(other),
            _ => self.to_number() == other.to_number(),
        }
    }

    /// Strict equality (`===`): same kind of value and equal content.
    /// Integers and floats are the same kind; so are plain and safe strings.
    pub fn strict_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => a.to_number() == b.to_number(),
            (a, b) if a.is_string() && b.is_string() => a.as_str() == b.as_str(),
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.strict_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.strict_eq(w)))
            }
            (Self::Regex(a), Self::Regex(b)) => a.source == b.source && a.flags == b.flags,
            _ => false,
        }
    }

    /// Ordering for `<`, `>`, `<=`, `>=`: strings compare lexically, anything
    /// else numerically. `None` when either side is `NaN`.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self.as_str(), other.as_str()) {
            (Some(a), Some(b)) => Some(a.cmp(b)),
            _ => self.to_number().partial_cmp(&other.to_number()),
        }
    }

    /// Membership for the `in` operator: substring, list item, or map key.
    pub fn contains(&self, needle: &Self) -> bool {
        match self {
            Self::String(s) | Self::SafeString(s) => s.contains(&needle.to_display_string()),
            Self::List(items) => items.iter().any(|item| item.loose_eq(needle)),
            Self::Map(map) => map.contains_key(&needle.to_display_string()),
            _ => false,
        }
    }
}

/// Formats a float the way templates expect: integral values without a
/// fractional part, `NaN` and `Infinity` spelled out.
pub fn format_number(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        let sign = if f > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{f:.0}")
    } else {
        f.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// -- From implementations --

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u64> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(i: u64) -> Self {
        i64::try_from(i).map_or(Self::Float(i as f64), Self::Integer)
    }
}

impl From<usize> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(i: usize) -> Self {
        i64::try_from(i).map_or(Self::Float(i as f64), Self::Integer)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Self::Float(f64::from(f))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<IndexMap<String, T>> for Value {
    fn from(m: IndexMap<String, T>) -> Self {
        Self::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<HashMap<String, T>> for Value {
    fn from(m: HashMap<String, T>) -> Self {
        Self::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(arr) => Self::List(arr.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// The variables visible at one point of a render, as a stack of layers.
///
/// Lookup searches from the top layer downward; [`Scope::set`] always writes
/// into the top layer. A render call owns its scope: macro calls and
/// includes work on a [`Scope::snapshot`] instead of the caller's layers.
///
/// # Examples
///
/// ```
/// use stencil_template::context::{Scope, Value};
///
/// let mut scope = Scope::new().with("name", "stencil");
/// scope.push();
/// scope.set("name", Value::from("shadowed"));
/// assert_eq!(scope.get("name").unwrap().to_display_string(), "shadowed");
///
/// scope.pop();
/// assert_eq!(scope.get("name").unwrap().to_display_string(), "stencil");
/// ```
#[derive(Debug, Clone)]
pub struct Scope {
    layers: Vec<IndexMap<String, Value>>,
}

impl Scope {
    /// Creates a new empty scope with a single layer.
    pub fn new() -> Self {
        Self {
            layers: vec![IndexMap::new()],
        }
    }

    /// Builds a scope from a JSON object. `null` gives an empty scope.
    pub fn from_json(value: serde_json::Value) -> StencilResult<Self> {
        match Value::from(value) {
            Value::Map(map) => Ok(Self::from(map)),
            Value::Null => Ok(Self::new()),
            other => Err(StencilError::SerializationError(format!(
                "scope data must be an object, got `{}`",
                other.to_display_string()
            ))),
        }
    }

    /// Builds a scope from any serializable value whose JSON form is an object.
    pub fn from_serialize<T: Serialize + ?Sized>(data: &T) -> StencilResult<Self> {
        let json = serde_json::to_value(data)
            .map_err(|e| StencilError::SerializationError(e.to_string()))?;
        Self::from_json(json)
    }

    /// Sets a variable in the top layer and returns the scope.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    /// Pushes a new empty layer.
    pub fn push(&mut self) {
        self.layers.push(IndexMap::new());
    }

    /// Pops the top layer. The bottom layer is never removed.
    pub fn pop(&mut self) {
        if self.layers.len() > 1 {
            self.layers.pop();
        }
    }

    /// Returns the number of layers.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Sets a variable in the current (top) layer.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        if let Some(top) = self.layers.last_mut() {
            top.insert(key.into(), value);
        }
    }

    /// Looks up a single name, searching from the top layer downward.
    pub fn resolve(&self, name: &str) -> Option<&Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(name))
    }

    /// Looks up a variable by dotted path, like `user.name` or `items.0`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut parts = key.split('.');
        let mut current = self.resolve(parts.next()?)?.clone();
        for part in parts {
            current = current.get_member(part);
            if matches!(current, Value::Undefined) {
                return None;
            }
        }
        Some(current)
    }

    /// Flattens all layers into one map, with upper layers overriding lower ones.
    pub fn flatten(&self) -> IndexMap<String, Value> {
        let mut result = IndexMap::new();
        for layer in &self.layers {
            for (k, v) in layer {
                result.insert(k.clone(), v.clone());
            }
        }
        result
    }

    /// Returns a single-layer copy of the visible variables.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        Self::from(self.flatten())
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl From<IndexMap<String, Value>> for Scope {
    fn from(layer: IndexMap<String, Value>) -> Self {
        Self {
            layers: vec![layer],
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Scope {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect::<IndexMap<_, _>>(),
        )
    }
}

/// Escapes HTML special characters in a string.
///
/// Replaces `&`, `<`, `>`, `"`, `'`, `` ` `` and `=` with HTML entities.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_from_str() {
        let v: Value = "hello".into();
        assert_eq!(v.to_display_string(), "hello");
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(Value::Undefined.to_display_string(), "");
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::Bool(true).to_display_string(), "true");
        assert_eq!(Value::Float(3.0).to_display_string(), "3");
        assert_eq!(Value::Float(0.5).to_display_string(), "0.5");
        assert_eq!(Value::Float(f64::NAN).to_display_string(), "NaN");
        assert_eq!(Value::from(vec![1, 2, 3]).to_display_string(), "1,2,3");
    }

    #[test]
    fn test_map_displays_as_json() {
        let mut map = IndexMap::new();
        map.insert("a".to_string(), Value::from("1"));
        map.insert("b".to_string(), Value::from(2));
        assert_eq!(Value::Map(map).to_display_string(), r#"{"a":"1","b":2}"#);
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::Float(f64::NAN).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::from(vec![0]).is_truthy());
    }

    #[test]
    fn test_loose_and_strict_equality() {
        assert!(Value::from("1").loose_eq(&Value::from(1)));
        assert!(!Value::from("1").strict_eq(&Value::from(1)));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(Value::from(1).strict_eq(&Value::Float(1.0)));
        assert!(Value::from("a").strict_eq(&Value::safe("a")));
        assert!(!Value::Float(f64::NAN).strict_eq(&Value::Float(f64::NAN)));
        assert!(!Value::from(0).loose_eq(&Value::Null));
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::from("a").compare(&Value::from("b")), Some(Ordering::Less));
        assert_eq!(Value::from(10).compare(&Value::from("9")), Some(Ordering::Greater));
        assert_eq!(Value::Undefined.compare(&Value::from(1)), None);
    }

    #[test]
    fn test_members() {
        let list = Value::from(vec!["x", "y"]);
        assert_eq!(list.get_member("length"), Value::from(2));
        assert_eq!(list.get_member("1"), Value::from("y"));
        assert_eq!(list.get_item(&Value::from(0)), Value::from("x"));
        assert!(matches!(list.get_member("5"), Value::Undefined));
        assert_eq!(Value::from("héllo").get_member("length"), Value::from(5));
        assert!(matches!(Value::Null.get_member("a"), Value::Undefined));
    }

    #[test]
    fn test_contains() {
        assert!(Value::from("abc").contains(&Value::from("b")));
        assert!(Value::from(vec![1, 2]).contains(&Value::from("2")));
        assert!(!Value::from(vec![1, 2]).contains(&Value::from(3)));
    }

    #[test]
    fn test_from_json() {
        let v = Value::from(serde_json::json!({"a": [1, 2.5, null], "b": true}));
        let Value::Map(map) = v else { panic!("expected map") };
        assert_eq!(map["a"], Value::List(vec![Value::from(1), Value::Float(2.5), Value::Null]));
        assert_eq!(map["b"], Value::Bool(true));
    }

    #[test]
    fn test_to_json_roundtrip_order() {
        let v = Value::from(serde_json::json!({"z": 1, "a": 2}));
        assert_eq!(v.to_json().to_string(), r#"{"z":1,"a":2}"#);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"z":1,"a":2}"#);
    }

    #[test]
    fn test_mark_safe() {
        assert!(Value::from("<b>").mark_safe().is_safe());
        assert!(!Value::from(1).mark_safe().is_safe());
    }

    #[test]
    fn test_scope_push_pop() {
        let mut scope = Scope::new();
        scope.set("x", Value::from(1));
        scope.push();
        scope.set("x", Value::from(2));
        scope.set("y", Value::from(3));
        assert_eq!(scope.get("x"), Some(Value::from(2)));
        scope.pop();
        assert_eq!(scope.get("x"), Some(Value::from(1)));
        assert_eq!(scope.get("y"), None);
        scope.pop();
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn test_scope_dotted_get() {
        let scope = Scope::from_json(serde_json::json!({"user": {"name": "ann", "tags": ["a"]}}))
            .unwrap();
        assert_eq!(scope.get("user.name"), Some(Value::from("ann")));
        assert_eq!(scope.get("user.tags.0"), Some(Value::from("a")));
        assert_eq!(scope.get("user.missing"), None);
        assert_eq!(scope.get("nobody.name"), None);
    }

    #[test]
    fn test_scope_snapshot_flattens() {
        let mut scope = Scope::new().with("a", 1).with("b", 2);
        scope.push();
        scope.set("a", Value::from(10));
        let snap = scope.snapshot();
        assert_eq!(snap.depth(), 1);
        assert_eq!(snap.get("a"), Some(Value::from(10)));
        assert_eq!(snap.get("b"), Some(Value::from(2)));
    }

    #[test]
    fn test_scope_from_serialize() {
        #[derive(Serialize)]
        struct Data {
            title: &'static str,
            count: u32,
        }
        let scope = Scope::from_serialize(&Data { title: "t", count: 3 }).unwrap();
        assert_eq!(scope.get("count"), Some(Value::from(3)));
        assert!(Scope::from_serialize(&[1, 2]).is_err());
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'`=&"#),
            "&lt;a href&#x3D;&quot;x&quot;&gt;&#39;&#x60;&#x3D;&amp;"
        );
    }
}
