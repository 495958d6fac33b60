//! Template filters.
//!
//! A filter is a named transform applied with `{{ value | name(args) }}`.
//! Each engine owns a [`FilterRegistry`] of overrides; names it does not
//! define fall through to the built-in [`default_registry`].

use std::collections::HashMap;
use std::sync::OnceLock;

use stencil_core::error::{StencilError, StencilResult};

use crate::context::{escape_html, Value};

/// A template filter function.
///
/// Takes a value and evaluated arguments, and returns a transformed value.
pub trait Filter: Send + Sync {
    /// Returns the filter name.
    fn name(&self) -> &str;

    /// Applies the filter to a value with the given arguments.
    fn apply(&self, value: &Value, args: &[Value]) -> StencilResult<Value>;
}

/// Resolves filter names at render time.
pub trait FilterResolver {
    fn resolve_filter(&self, name: &str) -> Option<&dyn Filter>;
}

/// A [`Filter`] backed by a closure.
pub struct FnFilter<F> {
    name: String,
    func: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&Value, &[Value]) -> StencilResult<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Filter for FnFilter<F>
where
    F: Fn(&Value, &[Value]) -> StencilResult<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, value: &Value, args: &[Value]) -> StencilResult<Value> {
        (self.func)(value, args)
    }
}

/// A registry of template filters.
pub struct FilterRegistry {
    filters: HashMap<String, Box<dyn Filter>>,
}

impl FilterRegistry {
    /// Creates a new empty filter registry.
    pub fn new() -> Self {
        Self {
            filters: HashMap::new(),
        }
    }

    /// Registers a filter under its own name, replacing any previous one.
    pub fn register(&mut self, filter: Box<dyn Filter>) {
        self.filters.insert(filter.name().to_string(), filter);
    }

    /// Registers a closure as a filter.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&Value, &[Value]) -> StencilResult<Value> + Send + Sync + 'static,
    {
        self.register(Box::new(FnFilter::new(name, func)));
    }

    /// Returns the filter registered in this registry only.
    pub fn get(&self, name: &str) -> Option<&dyn Filter> {
        self.filters.get(name).map(|f| &**f)
    }

    /// Returns `true` if this registry defines `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Looks `name` up here first, then among the built-in filters.
    pub fn lookup(&self, name: &str) -> Option<&dyn Filter> {
        self.get(name).or_else(|| default_registry().get(name))
    }

    /// Applies a named filter to a value.
    pub fn apply(&self, name: &str, value: &Value, args: &[Value]) -> StencilResult<Value> {
        let filter = self
            .lookup(name)
            .ok_or_else(|| StencilError::render(format!("unknown filter `{name}`"), name))?;
        filter.apply(value, args)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterResolver for FilterRegistry {
    fn resolve_filter(&self, name: &str) -> Option<&dyn Filter> {
        self.lookup(name)
    }
}

/// Returns the registry of built-in filters.
pub fn default_registry() -> &'static FilterRegistry {
    static REGISTRY: OnceLock<FilterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut r = FilterRegistry::new();
        register_all(&mut r);
        r
    })
}

/// Registers all built-in filters.
fn register_all(r: &mut FilterRegistry) {
    r.register(Box::new(Nl2brFilter));
    r.register(Box::new(JsonFilter));
    r.register(Box::new(EscapeFilter));
    r.register(Box::new(ReverseFilter));
    r.register(Box::new(ReplaceFilter));
    r.register(Box::new(AbsFilter));
    r.register(Box::new(JoinFilter));
    r.register(Box::new(LowerFilter));
    r.register(Box::new(UpperFilter));
    r.register(Box::new(SliceFilter));
    r.register(Box::new(TrimFilter));
}

/// Maps a string transform over a value, keeping it unchanged when nullish.
fn map_str(value: &Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::Undefined | Value::Null => value.clone(),
        Value::SafeString(s) => Value::SafeString(f(s)),
        other => Value::String(f(&other.to_display_string())),
    }
}

// ── Built-in filters ────────────────────────────────────────────────

struct Nl2brFilter;
impl Filter for Nl2brFilter {
    fn name(&self) -> &str {
        "nl2br"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        Ok(map_str(value, |s| s.replace("\r\n", "<br/>").replace('\n', "<br/>")))
    }
}

struct JsonFilter;
impl Filter for JsonFilter {
    fn name(&self) -> &str {
        "json"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        if !value.is_truthy() {
            return Ok(Value::from("{}"));
        }
        let json = serde_json::to_string(&value.to_json())
            .map_err(|e| StencilError::render(format!("json filter failed: {e}"), "json"))?;
        Ok(Value::String(json))
    }
}

struct EscapeFilter;
impl Filter for EscapeFilter {
    fn name(&self) -> &str {
        "escape"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        Ok(Value::SafeString(escape_html(&value.to_display_string())))
    }
}

struct ReverseFilter;
impl Filter for ReverseFilter {
    fn name(&self) -> &str {
        "reverse"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        Ok(match value {
            Value::List(items) => Value::List(items.iter().rev().cloned().collect()),
            Value::String(_) | Value::SafeString(_) => map_str(value, |s| s.chars().rev().collect()),
            other => other.clone(),
        })
    }
}

struct ReplaceFilter;
impl Filter for ReplaceFilter {
    fn name(&self) -> &str {
        "replace"
    }
    fn apply(&self, value: &Value, args: &[Value]) -> StencilResult<Value> {
        let replacement = args.get(1).map(Value::to_display_string).unwrap_or_default();
        Ok(match args.first() {
            None => value.clone(),
            Some(Value::Regex(re)) => map_str(value, |s| {
                let replaced = if re.global {
                    re.regex.replace_all(s, replacement.as_str())
                } else {
                    re.regex.replace(s, replacement.as_str())
                };
                replaced.into_owned()
            }),
            Some(pattern) => {
                let pattern = pattern.to_display_string();
                map_str(value, |s| s.replacen(&pattern, &replacement, 1))
            }
        })
    }
}

struct AbsFilter;
impl Filter for AbsFilter {
    fn name(&self) -> &str {
        "abs"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        Ok(match value {
            Value::Integer(i) => i
                .checked_abs()
                .map_or_else(|| Value::Float(value.to_number().abs()), Value::Integer),
            other => Value::Float(other.to_number().abs()),
        })
    }
}

struct JoinFilter;
impl Filter for JoinFilter {
    fn name(&self) -> &str {
        "join"
    }
    fn apply(&self, value: &Value, args: &[Value]) -> StencilResult<Value> {
        let separator = args.first().map(Value::to_display_string).unwrap_or_default();
        match value {
            Value::List(list) => {
                let joined = list
                    .iter()
                    .map(Value::to_display_string)
                    .collect::<Vec<_>>()
                    .join(&separator);
                Ok(Value::String(joined))
            }
            _ => Ok(value.clone()),
        }
    }
}

struct LowerFilter;
impl Filter for LowerFilter {
    fn name(&self) -> &str {
        "lower"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        Ok(map_str(value, str::to_lowercase))
    }
}

struct UpperFilter;
impl Filter for UpperFilter {
    fn name(&self) -> &str {
        "upper"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        Ok(map_str(value, str::to_uppercase))
    }
}

struct TrimFilter;
impl Filter for TrimFilter {
    fn name(&self) -> &str {
        "trim"
    }
    fn apply(&self, value: &Value, _args: &[Value]) -> StencilResult<Value> {
        Ok(map_str(value, |s| s.trim().to_string()))
    }
}

struct SliceFilter;
impl Filter for SliceFilter {
    fn name(&self) -> &str {
        "slice"
    }
    fn apply(&self, value: &Value, args: &[Value]) -> StencilResult<Value> {
        Ok(match value {
            Value::List(items) => {
                let (start, end) = slice_bounds(items.len(), args);
                Value::List(items[start..end].to_vec())
            }
            Value::String(_) | Value::SafeString(_) => map_str(value, |s| {
                let chars: Vec<char> = s.chars().collect();
                let (start, end) = slice_bounds(chars.len(), args);
                chars[start..end].iter().collect()
            }),
            other => other.clone(),
        })
    }
}

/// Resolves `slice(start, end)` arguments against a length. Negative
/// indices count from the end; a missing `end` means the full length.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn slice_bounds(len: usize, args: &[Value]) -> (usize, usize) {
    let resolve = |arg: Option<&Value>, default: usize| -> usize {
        let Some(index) = arg.filter(|v| !v.is_nullish()).map(Value::to_number) else {
            return default;
        };
        if index.is_nan() {
            return 0;
        }
        let index = index.trunc();
        let len_f = len as f64;
        if index < 0.0 {
            (len_f + index).max(0.0) as usize
        } else {
            index.min(len_f) as usize
        }
    };
    let start = resolve(args.first(), 0);
    let end = resolve(args.get(1), len);
    (start, end.max(start))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::RegexValue;

    fn apply(name: &str, value: Value, args: &[Value]) -> Value {
        default_registry().apply(name, &value, args).unwrap()
    }

    #[test]
    fn test_nl2br() {
        assert_eq!(apply("nl2br", Value::from("\n"), &[]), Value::from("<br/>"));
        assert_eq!(apply("nl2br", Value::from("a\r\nb"), &[]), Value::from("a<br/>b"));
        assert!(apply("nl2br", Value::safe("a\nb"), &[]).is_safe());
        assert!(matches!(apply("nl2br", Value::Null, &[]), Value::Null));
    }

    #[test]
    fn test_json() {
        let value = Value::from(serde_json::json!({"a": "ss"}));
        assert_eq!(apply("json", value, &[]), Value::from(r#"{"a":"ss"}"#));
        assert_eq!(apply("json", Value::Null, &[]), Value::from("{}"));
    }

    #[test]
    fn test_escape_is_safe() {
        let escaped = apply("escape", Value::from("<div>"), &[]);
        assert!(escaped.is_safe());
        assert_eq!(escaped.to_display_string(), "&lt;div&gt;");
    }

    #[test]
    fn test_reverse() {
        assert_eq!(
            apply("reverse", Value::from(vec![1, 2]), &[]),
            Value::from(vec![2, 1])
        );
        assert_eq!(apply("reverse", Value::from("abc"), &[]), Value::from("cba"));
    }

    #[test]
    fn test_replace_string_first_only() {
        let args = [Value::from("c"), Value::from("b")];
        assert_eq!(apply("replace", Value::from("abc"), &args), Value::from("abb"));
        let args = [Value::from("a")];
        assert_eq!(apply("replace", Value::from("aXa"), &args), Value::from("Xa"));
    }

    #[test]
    fn test_replace_regex() {
        let regex = |global: bool| {
            Value::Regex(Arc::new(RegexValue {
                regex: regex::Regex::new("[0-9]").unwrap(),
                global,
                source: "[0-9]".into(),
                flags: if global { "g".into() } else { String::new() },
            }))
        };
        let args = [regex(true), Value::from("#")];
        assert_eq!(apply("replace", Value::from("a1b2"), &args), Value::from("a#b#"));
        let args = [regex(false), Value::from("#")];
        assert_eq!(apply("replace", Value::from("a1b2"), &args), Value::from("a#b2"));
    }

    #[test]
    fn test_abs() {
        assert_eq!(apply("abs", Value::from(-1), &[]), Value::from(1));
        assert_eq!(apply("abs", Value::from("-2.5"), &[]), Value::Float(2.5));
    }

    #[test]
    fn test_join() {
        assert_eq!(apply("join", Value::from(vec![1, 2, 3]), &[]), Value::from("123"));
        assert_eq!(
            apply("join", Value::from(vec![1, 2, 3]), &[Value::from("+")]),
            Value::from("1+2+3")
        );
    }

    #[test]
    fn test_case_and_trim() {
        assert_eq!(apply("lower", Value::from("Abc"), &[]), Value::from("abc"));
        assert_eq!(apply("upper", Value::from("Abc"), &[]), Value::from("ABC"));
        assert_eq!(apply("trim", Value::from("  asd "), &[]), Value::from("asd"));
    }

    #[test]
    fn test_slice() {
        let list = Value::from(vec![1, 2, 3]);
        assert_eq!(apply("slice", list.clone(), &[Value::from(1)]), Value::from(vec![2, 3]));
        assert_eq!(
            apply("slice", list.clone(), &[Value::from(-2), Value::from(-1)]),
            Value::from(vec![2])
        );
        assert_eq!(apply("slice", list, &[Value::from(5)]), Value::List(vec![]));
        assert_eq!(
            apply("slice", Value::from("hello"), &[Value::from(1), Value::from(3)]),
            Value::from("el")
        );
    }

    #[test]
    fn test_registry_override_and_fallback() {
        let mut registry = FilterRegistry::new();
        registry.register_fn("upper", |v, _| Ok(Value::from(format!("{v}!"))));
        registry.register_fn("isNull", |v, _| Ok(Value::Bool(matches!(v, Value::Null))));

        assert_eq!(registry.apply("upper", &Value::from("a"), &[]).unwrap(), Value::from("a!"));
        assert_eq!(registry.apply("lower", &Value::from("A"), &[]).unwrap(), Value::from("a"));
        assert_eq!(registry.apply("isNull", &Value::Null, &[]).unwrap(), Value::Bool(true));
        assert!(registry.contains("isNull"));
        assert!(!registry.contains("lower"));
    }

    #[test]
    fn test_unknown_filter_is_render_error() {
        let err = FilterRegistry::new()
            .apply("aaa", &Value::Null, &[])
            .unwrap_err();
        assert!(err.is_render_error());
    }
}
