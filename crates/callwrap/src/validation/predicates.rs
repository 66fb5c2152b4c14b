// Ready-made predicates for common argument checks
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Predicate;

/// JSON shape of an argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonType {
    Null,
    Bool,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    /// Check whether a value has this shape
    ///
    /// `Number` accepts integers as well as floats.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::Null => value.is_null(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Integer strictly greater than zero
pub fn positive_integer() -> Predicate {
    Predicate::new("must be a positive integer", |value| {
        value.as_i64().map_or_else(|| value.as_u64().is_some_and(|n| n > 0), |n| n > 0)
    })
}

/// Number within `min..=max`
pub fn in_range(min: f64, max: f64) -> Predicate {
    Predicate::new(format!("must be a number between {min} and {max}"), move |value| {
        value.as_f64().is_some_and(|n| (min..=max).contains(&n))
    })
}

/// String with at least one non-whitespace character
pub fn non_empty_string() -> Predicate {
    Predicate::new("must be a non-empty string", |value| {
        value.as_str().is_some_and(|s| !s.trim().is_empty())
    })
}

/// Value of the given JSON shape
pub fn is_type(expected: JsonType) -> Predicate {
    let description = format!("must be of type {expected:?}").to_lowercase();
    Predicate::new(description, move |value| expected.matches(value))
}

/// Every predicate holds
pub fn all_of(predicates: impl IntoIterator<Item = Predicate>) -> Predicate {
    let predicates: Vec<Predicate> = predicates.into_iter().collect();
    let description =
        predicates.iter().map(Predicate::description).collect::<Vec<_>>().join(" and ");
    Predicate::new(description, move |value| predicates.iter().all(|p| p.test(value)))
}
