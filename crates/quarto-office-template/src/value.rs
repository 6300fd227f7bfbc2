/*
 * value.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Template data values.
//!
//! This module defines the data model tags are evaluated against. Values are
//! usually built from JSON with `From<serde_json::Value>`. A value may also be
//! [`TemplateValue::Deferred`], standing for data that arrives asynchronously;
//! deferred values are only awaited by the resolve pipeline.

use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

/// The shareable future behind a deferred value.
pub type DeferredFuture = Shared<BoxFuture<'static, Result<TemplateValue, String>>>;

/// Handle on data that has not arrived yet.
///
/// Cloning the handle does not restart the computation: every clone observes
/// the same outcome.
#[derive(Clone)]
pub struct DeferredValue(DeferredFuture);

impl DeferredValue {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<TemplateValue, String>> + Send + 'static,
    {
        DeferredValue(future.boxed().shared())
    }

    /// Wait for the value. Errors are reported as their message.
    pub async fn get(&self) -> Result<TemplateValue, String> {
        self.0.clone().await
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeferredValue(..)")
    }
}

impl PartialEq for DeferredValue {
    fn eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

/// A value that can be bound to a tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TemplateValue {
    /// A null/missing value.
    #[default]
    Null,

    /// A boolean value.
    Bool(bool),

    /// A number. JSON integers and floats both land here.
    Number(f64),

    /// A string value.
    String(String),

    /// A list of values.
    List(Vec<TemplateValue>),

    /// A map of string keys to values.
    Map(HashMap<String, TemplateValue>),

    /// A value that must be awaited before use.
    Deferred(DeferredValue),
}

impl TemplateValue {
    /// Wrap a future producing a value.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<TemplateValue, String>> + Send + 'static,
    {
        TemplateValue::Deferred(DeferredValue::new(future))
    }

    /// Check if this value is "truthy" for loops and conditions.
    ///
    /// `null`, `false`, `0`, `NaN`, the empty string and the empty list are
    /// falsy. Maps are truthy even when empty; so are deferred values, which
    /// must be resolved before their truthiness means anything.
    pub fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::Null => false,
            TemplateValue::Bool(b) => *b,
            TemplateValue::Number(n) => *n != 0.0 && !n.is_nan(),
            TemplateValue::String(s) => !s.is_empty(),
            TemplateValue::List(items) => !items.is_empty(),
            TemplateValue::Map(_) | TemplateValue::Deferred(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TemplateValue::Null)
    }

    /// Look up a key of a map value.
    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        match self {
            TemplateValue::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Get a nested field by path.
    ///
    /// For example, `get_path(&["employee", "salary"])` on a Map containing
    /// `{"employee": {"salary": 50000}}` returns the salary value.
    pub fn get_path(&self, path: &[&str]) -> Option<&TemplateValue> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self.get(first).and_then(|v| v.get_path(rest)),
        }
    }

    /// Whether a deferred value is reachable from this value.
    pub fn contains_deferred(&self) -> bool {
        match self {
            TemplateValue::Deferred(_) => true,
            TemplateValue::List(items) => items.iter().any(|v| v.contains_deferred()),
            TemplateValue::Map(m) => m.values().any(|v| v.contains_deferred()),
            _ => false,
        }
    }

    /// Await every deferred value reachable from this value.
    ///
    /// Lists and maps are resolved concurrently; the first failure wins.
    pub fn resolve_deep(&self) -> BoxFuture<'static, Result<TemplateValue, String>> {
        let value = self.clone();
        async move {
            match value {
                TemplateValue::Deferred(deferred) => deferred.get().await?.resolve_deep().await,
                TemplateValue::List(items) => {
                    let items = try_join_all(items.iter().map(|v| v.resolve_deep())).await?;
                    Ok(TemplateValue::List(items))
                }
                TemplateValue::Map(map) => {
                    let (keys, values): (Vec<_>, Vec<_>) = map.into_iter().unzip();
                    let values = try_join_all(values.iter().map(|v| v.resolve_deep())).await?;
                    Ok(TemplateValue::Map(keys.into_iter().zip(values).collect()))
                }
                other => Ok(other),
            }
        }
        .boxed()
    }

    /// Render this value as text for substitution.
    ///
    /// - String: returned as-is
    /// - Number: shortest form, integers without a fraction
    /// - Bool: "true" or "false"
    /// - List: elements joined with ","
    /// - Map: its JSON form
    /// - Null and Deferred: ""
    pub fn render(&self) -> String {
        match self {
            TemplateValue::String(s) => s.clone(),
            TemplateValue::Number(n) => n.to_string(),
            TemplateValue::Bool(b) => b.to_string(),
            TemplateValue::List(items) => items
                .iter()
                .map(|v| v.render())
                .collect::<Vec<_>>()
                .join(","),
            TemplateValue::Map(_) => self.to_json().to_string(),
            TemplateValue::Null | TemplateValue::Deferred(_) => String::new(),
        }
    }

    /// Convert to JSON. Deferred values become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TemplateValue::Null | TemplateValue::Deferred(_) => serde_json::Value::Null,
            TemplateValue::Bool(b) => serde_json::Value::Bool(*b),
            TemplateValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            TemplateValue::String(s) => serde_json::Value::String(s.clone()),
            TemplateValue::List(items) => {
                serde_json::Value::Array(items.iter().map(|v| v.to_json()).collect())
            }
            TemplateValue::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for TemplateValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => TemplateValue::Null,
            serde_json::Value::Bool(b) => TemplateValue::Bool(b),
            serde_json::Value::Number(n) => TemplateValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => TemplateValue::String(s),
            serde_json::Value::Array(items) => {
                TemplateValue::List(items.into_iter().map(TemplateValue::from).collect())
            }
            serde_json::Value::Object(map) => TemplateValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, TemplateValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(value: &str) -> Self {
        TemplateValue::String(value.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(value: String) -> Self {
        TemplateValue::String(value)
    }
}

impl From<bool> for TemplateValue {
    fn from(value: bool) -> Self {
        TemplateValue::Bool(value)
    }
}

impl From<f64> for TemplateValue {
    fn from(value: f64) -> Self {
        TemplateValue::Number(value)
    }
}

impl From<Vec<TemplateValue>> for TemplateValue {
    fn from(value: Vec<TemplateValue>) -> Self {
        TemplateValue::List(value)
    }
}

impl From<HashMap<String, TemplateValue>> for TemplateValue {
    fn from(value: HashMap<String, TemplateValue>) -> Self {
        TemplateValue::Map(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        assert!(TemplateValue::Bool(true).is_truthy());
        assert!(!TemplateValue::Bool(false).is_truthy());

        assert!(TemplateValue::from("false").is_truthy()); // "false" string is truthy!
        assert!(!TemplateValue::from("").is_truthy());

        assert!(!TemplateValue::Number(0.0).is_truthy());
        assert!(!TemplateValue::Number(f64::NAN).is_truthy());
        assert!(TemplateValue::Number(-1.0).is_truthy());

        assert!(TemplateValue::List(vec![TemplateValue::Bool(false)]).is_truthy());
        assert!(!TemplateValue::List(vec![]).is_truthy());

        assert!(TemplateValue::Map(HashMap::new()).is_truthy()); // empty map is truthy
        assert!(!TemplateValue::Null.is_truthy());
    }

    #[test]
    fn test_get_path() {
        let value = TemplateValue::from(json!({"employee": {"salary": 50000}}));

        assert_eq!(
            value.get_path(&["employee", "salary"]),
            Some(&TemplateValue::Number(50000.0))
        );
        assert_eq!(value.get_path(&["employee", "name"]), None);
        assert_eq!(value.get_path(&["nonexistent"]), None);
        assert_eq!(value.get_path(&[]), Some(&value));
    }

    #[test]
    fn test_render() {
        assert_eq!(TemplateValue::Number(3.0).render(), "3");
        assert_eq!(TemplateValue::Number(1.5).render(), "1.5");
        assert_eq!(TemplateValue::Bool(false).render(), "false");
        assert_eq!(TemplateValue::from(json!(["a", 1])).render(), "a,1");
        assert_eq!(TemplateValue::Null.render(), "");
    }

    #[test]
    fn test_json_conversion() {
        let source = json!({"name": "x", "tags": [true, null], "n": 2.5});
        let value = TemplateValue::from(source.clone());
        assert_eq!(value.to_json(), source);
    }

    #[test]
    fn test_deferred_equality_is_identity() {
        let a = TemplateValue::deferred(async { Ok(TemplateValue::from("x")) });
        let b = TemplateValue::deferred(async { Ok(TemplateValue::from("x")) });
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert!(a.is_truthy());
        assert_eq!(a.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn test_resolve_deep_awaits_nested_values() {
        let inner = TemplateValue::deferred(async { Ok(TemplateValue::from("deep")) });
        let list = TemplateValue::List(vec![inner, TemplateValue::Number(1.0)]);
        let mut map = HashMap::new();
        map.insert("items".to_string(), list);
        let value = TemplateValue::deferred(async move { Ok(TemplateValue::Map(map)) });

        assert!(value.contains_deferred());
        let resolved = pollster::block_on(value.resolve_deep()).unwrap();
        assert!(!resolved.contains_deferred());
        assert_eq!(resolved.to_json(), json!({"items": ["deep", 1.0]}));
    }

    #[test]
    fn test_resolve_deep_propagates_failure() {
        let value = TemplateValue::List(vec![TemplateValue::deferred(async {
            Err("offline".to_string())
        })]);
        let result = pollster::block_on(value.resolve_deep());
        assert_eq!(result, Err("offline".to_string()));
    }
}
