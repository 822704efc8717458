use serde_json::Value;

use crate::error::{AppError, AppResult, ScimType};
pub use crate::parser::filter_operator::FilterOperator;

fn filter_error(message: String) -> AppError {
    AppError::bad_request(ScimType::InvalidFilter, message)
}

/// Parses the value filter between the brackets of a PATCH path
pub fn parse_filter(filter_str: &str) -> AppResult<FilterOperator> {
    let trimmed = filter_str.trim();
    if trimmed.is_empty() {
        return Err(filter_error("empty filter expression".to_string()));
    }

    // Only strip parentheses that enclose the whole expression
    if trimmed.starts_with('(') && trimmed.ends_with(')') && closing_paren_of_first(trimmed) == Some(trimmed.len() - 1) {
        return parse_filter(&trimmed[1..trimmed.len() - 1]);
    }

    if let Some(logical_op) = find_logical_operator(trimmed)? {
        return Ok(logical_op);
    }

    if let Some(inner) = strip_keyword(trimmed, "not") {
        return Ok(FilterOperator::Not(Box::new(parse_filter(inner)?)));
    }

    parse_simple_filter(trimmed)
}

/// Byte index of the parenthesis closing the one at index 0
fn closing_paren_of_first(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escape_next = false;

    for (i, byte) in text.bytes().enumerate() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match byte {
            b'\\' if in_quotes => escape_next = true,
            b'"' => in_quotes = !in_quotes,
            b'(' if !in_quotes => depth += 1,
            b')' if !in_quotes => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len() + 1)?;
    if head[..keyword.len()].eq_ignore_ascii_case(keyword) && head.ends_with([' ', '(']) {
        Some(&text[keyword.len()..])
    } else {
        None
    }
}

/// Parse simple SCIM filter expressions (attr op value)
fn parse_simple_filter(filter_str: &str) -> AppResult<FilterOperator> {
    let trimmed = filter_str.trim();

    if let Some(attr) = trimmed
        .len()
        .checked_sub(3)
        .filter(|&pos| trimmed.is_char_boundary(pos) && trimmed[pos..].eq_ignore_ascii_case(" pr"))
        .map(|pos| trimmed[..pos].trim())
    {
        return Ok(FilterOperator::Present(attr.to_string()));
    }

    let operators = ["eq", "ne", "co", "sw", "ew", "gt", "ge", "lt", "le"];

    for op_str in operators {
        if let Some(op_pos) = find_operator_position(trimmed, op_str) {
            let attr = trimmed[..op_pos].trim();
            let value_str = trimmed[op_pos + op_str.len()..].trim();

            if attr.is_empty() || value_str.is_empty() || attr.contains(' ') {
                continue;
            }

            let attr = attr.to_string();
            let value = parse_filter_value(value_str)?;

            return Ok(match op_str {
                "eq" => FilterOperator::Equal(attr, value),
                "ne" => FilterOperator::NotEqual(attr, value),
                "co" => FilterOperator::Contains(attr, value),
                "sw" => FilterOperator::StartsWith(attr, value),
                "ew" => FilterOperator::EndsWith(attr, value),
                "gt" => FilterOperator::GreaterThan(attr, value),
                "ge" => FilterOperator::GreaterThanOrEqual(attr, value),
                "lt" => FilterOperator::LessThan(attr, value),
                _ => FilterOperator::LessThanOrEqual(attr, value),
            });
        }
    }

    Err(filter_error(format!("Could not parse filter: {}", filter_str)))
}

/// Find the position of a word operator outside of quotes, case-insensitively
fn find_operator_position(text: &str, operator: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut escape_next = false;
    let bytes = text.as_bytes();
    let op_len = operator.len();

    for i in 0..bytes.len() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match bytes[i] {
            b'\\' if in_quotes => escape_next = true,
            b'"' => in_quotes = !in_quotes,
            _ => {
                if !in_quotes
                    && i + op_len <= bytes.len()
                    && bytes[i..i + op_len].eq_ignore_ascii_case(operator.as_bytes())
                {
                    let before_ok = i > 0 && bytes[i - 1] == b' ';
                    let after_ok = i + op_len < bytes.len() && bytes[i + op_len] == b' ';
                    if before_ok && after_ok {
                        return Some(i);
                    }
                }
            }
        }
    }

    None
}

/// Parse a filter value, handling quoted strings, numbers, and booleans
fn parse_filter_value(value_str: &str) -> AppResult<Value> {
    let trimmed = value_str.trim();

    if trimmed.starts_with('"') {
        if trimmed.len() < 2 || !trimmed.ends_with('"') {
            return Err(filter_error(format!("unterminated string in filter: {}", value_str)));
        }
        let unquoted = &trimmed[1..trimmed.len() - 1];
        let unescaped = unquoted.replace("\\\"", "\"").replace("\\\\", "\\");
        return Ok(Value::String(unescaped));
    }

    match trimmed {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if let Ok(num) = trimmed.parse::<i64>() {
        return Ok(Value::Number(serde_json::Number::from(num)));
    }

    if let Ok(num) = trimmed.parse::<f64>() {
        if let Some(json_num) = serde_json::Number::from_f64(num) {
            return Ok(Value::Number(json_num));
        }
    }

    // Unquoted literals are accepted as strings for lenient clients
    Ok(Value::String(trimmed.to_string()))
}

/// Find and parse logical operators (AND/OR) at the top level of the expression
/// Returns None if no logical operators are found at the top level
fn find_logical_operator(filter_str: &str) -> AppResult<Option<FilterOperator>> {
    // OR binds weaker than AND, so it is split first
    for keyword in [" or ", " and "] {
        if let Some(pos) = find_top_level(filter_str, keyword) {
            let left = parse_filter(&filter_str[..pos])?;
            let right = parse_filter(&filter_str[pos + keyword.len()..])?;
            let op = if keyword == " or " {
                FilterOperator::Or(Box::new(left), Box::new(right))
            } else {
                FilterOperator::And(Box::new(left), Box::new(right))
            };
            return Ok(Some(op));
        }
    }
    Ok(None)
}

/// Byte index of the first occurrence of `keyword` outside quotes and parentheses
fn find_top_level(text: &str, keyword: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_quotes = false;
    let mut escape_next = false;

    for i in 0..bytes.len() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match bytes[i] {
            b'\\' if in_quotes => escape_next = true,
            b'"' => in_quotes = !in_quotes,
            b'(' if !in_quotes => depth += 1,
            b')' if !in_quotes => depth -= 1,
            _ => {
                if !in_quotes
                    && depth == 0
                    && bytes[i..].len() >= keyword.len()
                    && bytes[i..i + keyword.len()].eq_ignore_ascii_case(keyword.as_bytes())
                {
                    return Some(i);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_equal_filter() {
        let result = parse_filter("value eq \"john.doe\"").unwrap();
        assert_eq!(result, FilterOperator::Equal("value".to_string(), json!("john.doe")));
    }

    #[test]
    fn test_equal_with_spaces_in_value() {
        let result = parse_filter("display eq \"Product Manager\"").unwrap();
        assert_eq!(result, FilterOperator::Equal("display".to_string(), json!("Product Manager")));
    }

    #[test]
    fn test_operator_inside_quotes_ignored() {
        let result = parse_filter("display eq \"this or that\"").unwrap();
        assert_eq!(result, FilterOperator::Equal("display".to_string(), json!("this or that")));
    }

    #[test]
    fn test_escaped_quotes() {
        let result = parse_filter(r#"value eq "say \"hi\"""#).unwrap();
        assert_eq!(result, FilterOperator::Equal("value".to_string(), json!("say \"hi\"")));
    }

    #[test]
    fn test_present_operator() {
        let result = parse_filter("display pr").unwrap();
        assert_eq!(result, FilterOperator::Present("display".to_string()));
    }

    #[test]
    fn test_numeric_and_boolean_values() {
        assert_eq!(
            parse_filter("primary eq true").unwrap(),
            FilterOperator::Equal("primary".to_string(), json!(true))
        );
        assert_eq!(
            parse_filter("level gt 30").unwrap(),
            FilterOperator::GreaterThan("level".to_string(), json!(30))
        );
    }

    #[test]
    fn test_or_disjunction() {
        let result = parse_filter("value eq \"a\" or value eq \"b\" or value eq \"c\"").unwrap();
        match result {
            FilterOperator::Or(left, right) => {
                assert_eq!(*left, FilterOperator::Equal("value".to_string(), json!("a")));
                assert!(matches!(*right, FilterOperator::Or(_, _)));
            }
            _ => panic!("Expected Or operator"),
        }
    }

    #[test]
    fn test_operator_precedence() {
        // AND has higher precedence than OR
        let result = parse_filter("a eq \"1\" OR b eq \"2\" and c eq \"3\"").unwrap();
        match result {
            FilterOperator::Or(left, right) => {
                assert_eq!(*left, FilterOperator::Equal("a".to_string(), json!("1")));
                assert!(matches!(*right, FilterOperator::And(_, _)));
            }
            _ => panic!("Expected Or operator at top level"),
        }
    }

    #[test]
    fn test_parentheses() {
        let result = parse_filter("(value eq \"a\")").unwrap();
        assert_eq!(result, FilterOperator::Equal("value".to_string(), json!("a")));

        let result = parse_filter("(type eq \"work\" or type eq \"home\") and primary eq true").unwrap();
        match result {
            FilterOperator::And(left, right) => {
                assert!(matches!(*left, FilterOperator::Or(_, _)));
                assert_eq!(*right, FilterOperator::Equal("primary".to_string(), json!(true)));
            }
            _ => panic!("Expected And operator at top level"),
        }
    }

    #[test]
    fn test_not_operator() {
        let result = parse_filter("not (type eq \"work\")").unwrap();
        assert_eq!(
            result,
            FilterOperator::Not(Box::new(FilterOperator::Equal("type".to_string(), json!("work"))))
        );
    }

    #[test]
    fn test_invalid_filters() {
        assert!(parse_filter("").is_err());
        assert!(parse_filter("value").is_err());
        let err = parse_filter("value eq \"open").unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::InvalidFilter));
    }
}
