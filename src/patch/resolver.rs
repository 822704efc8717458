use serde_json::Value;

use crate::error::{AppError, AppResult, ScimType};
use crate::parser::{FilterOperator, PatchPath};
use crate::patch::PatchOp;
use crate::schema::{AttributeDescriptor, ResourceSchema, SchemaTree};

/// A PATCH path resolved against the schemas of one resource type
#[derive(Debug, Clone)]
pub struct ResolvedPath<'r> {
    pub raw: String,
    /// Schema declaring the targeted attribute
    pub schema: &'r SchemaTree,
    /// Key of the extension block holding the target; `None` for the main document
    pub extension_uri: Option<&'r str>,
    /// `None` when the path names a whole extension block
    pub attribute: Option<&'r AttributeDescriptor>,
    pub filter: Option<FilterOperator>,
    pub sub_attribute: Option<&'r AttributeDescriptor>,
}

impl<'r> ResolvedPath<'r> {
    /// Descriptor of the value written by the operation
    pub fn governing_attribute(&self) -> Option<&'r AttributeDescriptor> {
        self.sub_attribute.or(self.attribute)
    }

    /// Indices of the array elements selected by the filter.
    ///
    /// Without a filter every element matches.
    pub fn matching_indices(&self, elements: &[Value]) -> Vec<usize> {
        let (Some(filter), Some(attribute)) = (&self.filter, self.attribute) else {
            return (0..elements.len()).collect();
        };
        let case_exact = |name: &str| {
            self.schema
                .sub_attribute(attribute, name)
                .is_some_and(|sub| sub.case_exact)
        };
        elements
            .iter()
            .enumerate()
            .filter(|(_, element)| {
                element
                    .as_object()
                    .is_some_and(|obj| filter.matches(obj, &case_exact))
            })
            .map(|(index, _)| index)
            .collect()
    }
}

pub struct PatchPathResolver<'a, 'r> {
    resource: &'a ResourceSchema<'r>,
}

impl<'a, 'r> PatchPathResolver<'a, 'r> {
    pub fn new(resource: &'a ResourceSchema<'r>) -> Self {
        PatchPathResolver { resource }
    }

    pub fn resolve(&self, op: PatchOp, path: &str) -> AppResult<ResolvedPath<'r>> {
        let trimmed = path.trim();
        if let Some(&(extension, tree)) = self
            .resource
            .extensions
            .iter()
            .find(|(ext, _)| ext.schema.eq_ignore_ascii_case(trimmed))
        {
            return Ok(ResolvedPath {
                raw: trimmed.to_string(),
                schema: tree,
                extension_uri: Some(extension.schema.as_str()),
                attribute: None,
                filter: None,
                sub_attribute: None,
            });
        }

        let parsed = PatchPath::parse(trimmed)?;
        let (schema, extension_uri, attribute) = self.resolve_head(&parsed)?;

        if let Some(filter) = &parsed.filter {
            if !attribute.is_multi_valued_complex() {
                return Err(AppError::bad_request(
                    ScimType::InvalidFilter,
                    format!(
                        "filter in path '{}' requires a multi valued complex attribute but '{}' is not",
                        parsed.raw,
                        attribute.full_resource_name()
                    ),
                ));
            }
            for name in filter.attribute_names() {
                let sub_name = strip_parent(name, &attribute.name);
                if schema.sub_attribute(attribute, sub_name).is_none() {
                    return Err(AppError::bad_request(
                        ScimType::InvalidFilter,
                        format!(
                            "filter in path '{}' references '{}' which is not a sub-attribute of '{}'",
                            parsed.raw,
                            name,
                            attribute.full_resource_name()
                        ),
                    ));
                }
            }
            if op != PatchOp::Remove && parsed.sub_attribute.is_none() {
                return Err(AppError::invalid_path(format!(
                    "path '{}' selects elements of '{}' without naming a sub-attribute, \
                     did you mean `{}[filter].subAttributeName`?",
                    parsed.raw, attribute.name, attribute.name
                )));
            }
        }

        let sub_attribute = match &parsed.sub_attribute {
            Some(sub_name) => {
                if !attribute.is_complex() {
                    return Err(AppError::invalid_path(format!(
                        "attribute '{}' has no sub-attributes but path '{}' names '{}'",
                        attribute.full_resource_name(),
                        parsed.raw,
                        sub_name
                    )));
                }
                let sub = schema.sub_attribute(attribute, sub_name).ok_or_else(|| {
                    self.unknown_attribute(&format!("{}.{}", attribute.name, sub_name))
                })?;
                Some(sub)
            }
            None => None,
        };

        Ok(ResolvedPath {
            raw: parsed.raw,
            schema,
            extension_uri,
            attribute: Some(attribute),
            filter: parsed.filter,
            sub_attribute,
        })
    }

    /// Descriptor an operation on `path` writes to, or `None` if the path does not resolve
    pub fn governing_attribute(&self, path: &str) -> Option<&'r AttributeDescriptor> {
        let parsed = PatchPath::parse(path).ok()?;
        let (schema, _, attribute) = self.resolve_head(&parsed).ok()?;
        match &parsed.sub_attribute {
            Some(sub_name) => schema.sub_attribute(attribute, sub_name),
            None => Some(attribute),
        }
    }

    fn resolve_head(
        &self,
        parsed: &PatchPath,
    ) -> AppResult<(&'r SchemaTree, Option<&'r str>, &'r AttributeDescriptor)> {
        let main = self.resource.main;
        let candidates: Vec<(&'r SchemaTree, Option<&'r str>)> = match &parsed.schema_uri {
            Some(uri) if main.id.eq_ignore_ascii_case(uri) => vec![(main, None)],
            Some(uri) => {
                let &(extension, tree) = self
                    .resource
                    .extensions
                    .iter()
                    .find(|(ext, _)| ext.schema.eq_ignore_ascii_case(uri))
                    .ok_or_else(|| {
                        AppError::invalid_path(format!(
                            "schema '{}' of path '{}' is not part of resource type '{}'",
                            uri, parsed.raw, self.resource.resource_type.name
                        ))
                    })?;
                vec![(tree, Some(extension.schema.as_str()))]
            }
            None => std::iter::once((main, None))
                .chain(
                    self.resource
                        .extensions
                        .iter()
                        .map(|&(ext, tree)| (tree, Some(ext.schema.as_str()))),
                )
                .collect(),
        };

        candidates
            .into_iter()
            .find_map(|(tree, extension_uri)| {
                tree.lookup(&parsed.attribute)
                    .filter(|attr| attr.parent.is_none())
                    .map(|attr| (tree, extension_uri, attr))
            })
            .ok_or_else(|| self.unknown_attribute(&parsed.attribute))
    }

    fn unknown_attribute(&self, name: &str) -> AppError {
        AppError::invalid_path(format!(
            "attribute '{}' is unknown to resource type '{}'",
            name, self.resource.resource_type.name
        ))
    }
}

/// `emails.value` inside an `emails[...]` filter names the sub-attribute `value`
fn strip_parent<'n>(name: &'n str, parent: &str) -> &'n str {
    match name.split_once('.') {
        Some((head, tail)) if head.eq_ignore_ascii_case(parent) => tail,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definitions::SCIM_SCHEMA_ENTERPRISE_USER;
    use crate::schema::SchemaRegistry;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::with_core_resource_types().unwrap()
    }

    #[test]
    fn test_resolve_main_and_extension_attributes() {
        let registry = registry();
        let user = registry.resource_schema("User").unwrap();
        let resolver = PatchPathResolver::new(&user);

        let resolved = resolver.resolve(PatchOp::Replace, "name.givenName").unwrap();
        assert_eq!(resolved.extension_uri, None);
        assert_eq!(resolved.attribute.unwrap().name, "name");
        assert_eq!(resolved.sub_attribute.unwrap().name, "givenName");

        let resolved = resolver.resolve(PatchOp::Replace, "employeeNumber").unwrap();
        assert_eq!(resolved.extension_uri, Some(SCIM_SCHEMA_ENTERPRISE_USER));

        let resolved = resolver
            .resolve(PatchOp::Replace, &format!("{}:manager.value", SCIM_SCHEMA_ENTERPRISE_USER))
            .unwrap();
        assert_eq!(resolved.governing_attribute().unwrap().name, "value");
    }

    #[test]
    fn test_resolve_whole_extension() {
        let registry = registry();
        let user = registry.resource_schema("User").unwrap();
        let resolved = PatchPathResolver::new(&user)
            .resolve(PatchOp::Remove, SCIM_SCHEMA_ENTERPRISE_USER)
            .unwrap();
        assert!(resolved.attribute.is_none());
        assert_eq!(resolved.extension_uri, Some(SCIM_SCHEMA_ENTERPRISE_USER));
    }

    #[test]
    fn test_unknown_attribute() {
        let registry = registry();
        let user = registry.resource_schema("User").unwrap();
        let err = PatchPathResolver::new(&user)
            .resolve(PatchOp::Add, "unknown")
            .unwrap_err();
        assert_eq!(err.scim_type(), Some(ScimType::InvalidPath));
        assert!(err.to_string().contains("unknown to resource type 'User'"));
    }

    #[test]
    fn test_filter_rules() {
        let registry = registry();
        let user = registry.resource_schema("User").unwrap();
        let resolver = PatchPathResolver::new(&user);

        let err = resolver
            .resolve(PatchOp::Add, "emails[type eq \"work\"]")
            .unwrap_err();
        assert!(err.to_string().contains("did you mean"));

        assert!(resolver.resolve(PatchOp::Remove, "emails[type eq \"work\"]").is_ok());
        assert!(resolver
            .resolve(PatchOp::Replace, "userName[value eq \"x\"].value")
            .is_err());
        assert!(resolver
            .resolve(PatchOp::Remove, "emails[unknown eq \"x\"]")
            .is_err());
        assert!(resolver.resolve(PatchOp::Replace, "userName.value").is_err());
    }

    #[test]
    fn test_matching_indices_case_rules() {
        let registry = registry();
        let user = registry.resource_schema("User").unwrap();
        let resolved = PatchPathResolver::new(&user)
            .resolve(PatchOp::Remove, "emails[type eq \"WORK\"]")
            .unwrap();
        let emails = vec![
            json!({"value": "a@example.com", "type": "work"}),
            json!({"value": "b@example.com", "type": "home"}),
        ];
        assert_eq!(resolved.matching_indices(&emails), vec![0]);
    }
}
