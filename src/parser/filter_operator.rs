use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::schema::validation::find_value;

/// Value filter of a PATCH path, e.g. the `type eq "work"` in `emails[type eq "work"]`
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOperator {
    // Comparison operators
    Equal(String, Value),
    NotEqual(String, Value),
    Contains(String, Value),
    StartsWith(String, Value),
    EndsWith(String, Value),
    GreaterThan(String, Value),
    GreaterThanOrEqual(String, Value),
    LessThan(String, Value),
    LessThanOrEqual(String, Value),
    Present(String),

    // Logical operators
    And(Box<FilterOperator>, Box<FilterOperator>),
    Or(Box<FilterOperator>, Box<FilterOperator>),
    Not(Box<FilterOperator>),
}

impl FilterOperator {
    /// Attribute names compared by this filter, in order of appearance
    pub fn attribute_names(&self) -> Vec<&str> {
        match self {
            FilterOperator::Equal(attr, _)
            | FilterOperator::NotEqual(attr, _)
            | FilterOperator::Contains(attr, _)
            | FilterOperator::StartsWith(attr, _)
            | FilterOperator::EndsWith(attr, _)
            | FilterOperator::GreaterThan(attr, _)
            | FilterOperator::GreaterThanOrEqual(attr, _)
            | FilterOperator::LessThan(attr, _)
            | FilterOperator::LessThanOrEqual(attr, _)
            | FilterOperator::Present(attr) => vec![attr.as_str()],
            FilterOperator::And(left, right) | FilterOperator::Or(left, right) => {
                let mut names = left.attribute_names();
                names.extend(right.attribute_names());
                names
            }
            FilterOperator::Not(inner) => inner.attribute_names(),
        }
    }

    /// Evaluates the filter against one element of a multi-valued complex attribute.
    ///
    /// `case_exact` tells for an attribute name whether string comparison respects case.
    pub fn matches<F>(&self, element: &Map<String, Value>, case_exact: &F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        match self {
            FilterOperator::Equal(attr, expected) => {
                compare(element, attr, expected, case_exact) == Some(Ordering::Equal)
            }
            FilterOperator::NotEqual(attr, expected) => {
                compare(element, attr, expected, case_exact) != Some(Ordering::Equal)
            }
            FilterOperator::Contains(attr, expected) => {
                text_match(element, attr, expected, case_exact, |a, e| a.contains(e))
            }
            FilterOperator::StartsWith(attr, expected) => {
                text_match(element, attr, expected, case_exact, |a, e| a.starts_with(e))
            }
            FilterOperator::EndsWith(attr, expected) => {
                text_match(element, attr, expected, case_exact, |a, e| a.ends_with(e))
            }
            FilterOperator::GreaterThan(attr, expected) => {
                compare(element, attr, expected, case_exact) == Some(Ordering::Greater)
            }
            FilterOperator::GreaterThanOrEqual(attr, expected) => matches!(
                compare(element, attr, expected, case_exact),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::LessThan(attr, expected) => {
                compare(element, attr, expected, case_exact) == Some(Ordering::Less)
            }
            FilterOperator::LessThanOrEqual(attr, expected) => matches!(
                compare(element, attr, expected, case_exact),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Present(attr) => {
                find_value(element, attr).is_some_and(|v| !v.is_null())
            }
            FilterOperator::And(left, right) => {
                left.matches(element, case_exact) && right.matches(element, case_exact)
            }
            FilterOperator::Or(left, right) => {
                left.matches(element, case_exact) || right.matches(element, case_exact)
            }
            FilterOperator::Not(inner) => !inner.matches(element, case_exact),
        }
    }
}

fn compare<F>(
    element: &Map<String, Value>,
    attribute: &str,
    expected: &Value,
    case_exact: &F,
) -> Option<Ordering>
where
    F: Fn(&str) -> bool,
{
    let actual = find_value(element, attribute)?;
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => {
            if case_exact(attribute) {
                Some(a.cmp(e))
            } else {
                Some(a.to_lowercase().cmp(&e.to_lowercase()))
            }
        }
        (Value::Number(a), Value::Number(e)) => a.as_f64()?.partial_cmp(&e.as_f64()?),
        (Value::Bool(a), Value::Bool(e)) => Some(a.cmp(e)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn text_match<F, M>(
    element: &Map<String, Value>,
    attribute: &str,
    expected: &Value,
    case_exact: &F,
    op: M,
) -> bool
where
    F: Fn(&str) -> bool,
    M: Fn(&str, &str) -> bool,
{
    match (find_value(element, attribute), expected) {
        (Some(Value::String(actual)), Value::String(expected)) => {
            if case_exact(attribute) {
                op(actual, expected)
            } else {
                op(&actual.to_lowercase(), &expected.to_lowercase())
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn element(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_equal_respects_case_rule() {
        let item = element(json!({"value": "Alice@Example.com", "type": "work"}));
        let filter = FilterOperator::Equal("value".to_string(), json!("alice@example.com"));
        assert!(filter.matches(&item, &|_| false));
        assert!(!filter.matches(&item, &|_| true));
    }

    #[test]
    fn test_logical_operators() {
        let item = element(json!({"value": "a", "type": "work", "primary": true}));
        let filter = FilterOperator::Or(
            Box::new(FilterOperator::Equal("value".to_string(), json!("b"))),
            Box::new(FilterOperator::And(
                Box::new(FilterOperator::Equal("type".to_string(), json!("work"))),
                Box::new(FilterOperator::Equal("primary".to_string(), json!(true))),
            )),
        );
        assert!(filter.matches(&item, &|_| false));
        assert!(!FilterOperator::Not(Box::new(filter)).matches(&item, &|_| false));
    }

    #[test]
    fn test_missing_attribute_does_not_match() {
        let item = element(json!({"value": "a"}));
        assert!(!FilterOperator::Equal("type".to_string(), json!("work")).matches(&item, &|_| false));
        assert!(!FilterOperator::Present("type".to_string()).matches(&item, &|_| false));
        assert!(FilterOperator::Present("VALUE".to_string()).matches(&item, &|_| false));
    }

    #[test]
    fn test_attribute_names() {
        let filter = FilterOperator::Or(
            Box::new(FilterOperator::Equal("value".to_string(), json!("b"))),
            Box::new(FilterOperator::Present("display".to_string())),
        );
        assert_eq!(filter.attribute_names(), vec!["value", "display"]);
    }
}
