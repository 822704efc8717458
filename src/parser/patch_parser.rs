use crate::error::{AppError, AppResult};
use crate::parser::filter_operator::FilterOperator;
use crate::parser::filter_parser::parse_filter;

/// SCIM PATCH path according to RFC 7644 section 3.5.2
///
/// `[schemaUri ":"] attrName ["[" valFilter "]"] ["." subAttrName]`
#[derive(Debug, Clone, PartialEq)]
pub struct PatchPath {
    /// Path as sent by the client
    pub raw: String,
    pub schema_uri: Option<String>,
    pub attribute: String,
    pub filter: Option<FilterOperator>,
    pub sub_attribute: Option<String>,
}

impl PatchPath {
    pub fn parse(path: &str) -> AppResult<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(AppError::invalid_path("empty path expression"));
        }

        let (head, filter, tail) = match trimmed.find('[') {
            Some(bracket_start) => {
                let bracket_end = trimmed.rfind(']').ok_or_else(|| {
                    AppError::invalid_path(format!("Invalid value path: missing ']' in {}", path))
                })?;
                if bracket_end < bracket_start {
                    return Err(AppError::invalid_path(format!(
                        "Invalid value path: malformed brackets in {}",
                        path
                    )));
                }
                let filter = parse_filter(&trimmed[bracket_start + 1..bracket_end])?;
                (
                    &trimmed[..bracket_start],
                    Some(filter),
                    &trimmed[bracket_end + 1..],
                )
            }
            None => (trimmed, None, ""),
        };

        let (schema_uri, attr_part) = split_schema_uri(head);
        if attr_part.is_empty() {
            return Err(AppError::invalid_path(format!(
                "Invalid attribute path: {}",
                path
            )));
        }

        let mut segments = attr_part.split('.');
        let attribute = segments.next().unwrap_or_default().to_string();
        let mut sub_attribute = segments.next().map(|s| s.to_string());
        if segments.next().is_some() {
            return Err(AppError::invalid_path(format!(
                "path '{}' is nested deeper than attribute.subAttribute",
                path
            )));
        }

        if filter.is_some() {
            if sub_attribute.is_some() {
                return Err(AppError::invalid_path(format!(
                    "a value filter may only follow a top-level attribute: {}",
                    path
                )));
            }
            if !tail.is_empty() {
                match tail.strip_prefix('.') {
                    Some(sub) if !sub.is_empty() && !sub.contains('.') => {
                        sub_attribute = Some(sub.to_string())
                    }
                    _ => {
                        return Err(AppError::invalid_path(format!(
                            "Invalid value path: malformed sub-attribute in {}",
                            path
                        )))
                    }
                }
            }
        }

        if attribute.is_empty() || sub_attribute.as_deref() == Some("") {
            return Err(AppError::invalid_path(format!(
                "Invalid attribute path: {}",
                path
            )));
        }

        Ok(PatchPath {
            raw: trimmed.to_string(),
            schema_uri,
            attribute,
            filter,
            sub_attribute,
        })
    }

    /// `attribute` or `attribute.subAttribute`, without schema and filter
    pub fn attribute_path(&self) -> String {
        match &self.sub_attribute {
            Some(sub) => format!("{}.{}", self.attribute, sub),
            None => self.attribute.clone(),
        }
    }
}

/// Splits a schema-qualified name like
/// `urn:ietf:params:scim:schemas:extension:enterprise:2.0:User:manager.value`
fn split_schema_uri(head: &str) -> (Option<String>, &str) {
    if head.get(..4).is_some_and(|p| p.eq_ignore_ascii_case("urn:")) {
        if let Some(last_colon) = head.rfind(':') {
            return (
                Some(head[..last_colon].to_string()),
                &head[last_colon + 1..],
            );
        }
    }
    (None, head)
}
