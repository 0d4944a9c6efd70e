//! Dynamic values exchanged with resources.
//!
//! [`Value`] is generic over the representation of resource references. Inside
//! the graph a reference is a [`ResourceKey`]; once a value leaves through a
//! [`Proxy`](crate::proxy::Proxy) every reference becomes a proxy. Converting
//! between the two is a single structural map ([`Value::map_refs`] /
//! [`Value::try_map_refs`]) applied at every forwarding point.

use crate::id::ResourceKey;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value<R = ResourceKey> {
    /// No value.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
    /// Structured data that is not a resource.
    Json(serde_json::Value),
    /// A reference to another resource.
    Resource(R),
    /// Ordered list of values, e.g. the elements of a reference collection.
    List(Vec<Value<R>>),
}

impl<R> Value<R> {
    /// Rebuild the value with every resource reference mapped through `f`.
    pub fn map_refs<S>(self, f: &mut impl FnMut(R) -> S) -> Value<S> {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(x) => Value::Float(x),
            Self::Text(s) => Value::Text(s),
            Self::Json(j) => Value::Json(j),
            Self::Resource(r) => Value::Resource(f(r)),
            Self::List(items) => Value::List(items.into_iter().map(|v| v.map_refs(f)).collect()),
        }
    }

    /// Fallible variant of [`map_refs`](Self::map_refs); stops at the first error.
    pub fn try_map_refs<S, E>(
        self,
        f: &mut impl FnMut(R) -> Result<S, E>,
    ) -> Result<Value<S>, E> {
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(x) => Value::Float(x),
            Self::Text(s) => Value::Text(s),
            Self::Json(j) => Value::Json(j),
            Self::Resource(r) => Value::Resource(f(r)?),
            Self::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|v| v.try_map_refs(f))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Whether this is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The referenced resource, if this is a [`Value::Resource`].
    #[must_use]
    pub fn as_resource(&self) -> Option<&R> {
        match self {
            Self::Resource(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value<R>]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::Resource(_) => "resource",
            Self::List(_) => "list",
        }
    }
}

impl<R> From<bool> for Value<R> {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<R> From<i64> for Value<R> {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl<R> From<f64> for Value<R> {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl<R> From<String> for Value<R> {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<R> From<&str> for Value<R> {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl<R> From<serde_json::Value> for Value<R> {
    fn from(j: serde_json::Value) -> Self {
        Self::Json(j)
    }
}

impl<R> From<Option<R>> for Value<R> {
    fn from(r: Option<R>) -> Self {
        r.map_or(Self::Null, Self::Resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_refs_reaches_nested_lists() {
        let v: Value<u32> = Value::List(vec![
            Value::Resource(1),
            Value::Text("x".into()),
            Value::List(vec![Value::Resource(2)]),
        ]);
        let mapped = v.map_refs(&mut |r| r * 10);
        assert_eq!(
            mapped,
            Value::List(vec![
                Value::Resource(10),
                Value::Text("x".into()),
                Value::List(vec![Value::Resource(20)]),
            ])
        );
    }

    #[test]
    fn try_map_refs_stops_on_error() {
        let v: Value<u32> = Value::List(vec![Value::Resource(1), Value::Resource(2)]);
        let result: Result<Value<u32>, &str> =
            v.try_map_refs(&mut |r| if r == 2 { Err("bad") } else { Ok(r) });
        assert_eq!(result, Err("bad"));
    }

    #[test]
    fn option_converts_to_null_or_resource() {
        assert!(Value::<u32>::from(None).is_null());
        assert_eq!(Value::from(Some(5u32)).as_resource(), Some(&5));
    }
}
