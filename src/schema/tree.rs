use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::schema::attribute::{AttributeDescriptor, AttributeId};
use crate::schema::definitions::{ReferenceType, ATTR_REF, ATTR_VALUE};

/// A parsed schema: ordered top-level attributes plus a case-insensitive index of
/// every attribute by its dotted name.
///
/// The tree owns all descriptors in an arena; descriptors refer to their parent and
/// children by `AttributeId`.
#[derive(Debug, Clone)]
pub struct SchemaTree {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    name_prefix: Option<String>,
    arena: Vec<AttributeDescriptor>,
    attributes: Vec<AttributeId>,
    index: HashMap<String, AttributeId>,
    complex_bulk_id_candidates: Vec<AttributeId>,
    simple_bulk_id_candidates: Vec<AttributeId>,
}

impl SchemaTree {
    pub fn from_json(document: &Value) -> AppResult<Self> {
        Self::from_json_with_prefix(document, None)
    }

    /// Builds a tree whose top-level node names are prefixed, e.g. `meta.created`
    pub fn from_json_with_prefix(document: &Value, name_prefix: Option<&str>) -> AppResult<Self> {
        let id = document
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::invalid_schema("schema document is missing its 'id'"))?;

        let attributes = document
            .get("attributes")
            .and_then(Value::as_array)
            .filter(|attrs| !attrs.is_empty())
            .ok_or_else(|| {
                AppError::invalid_schema(format!(
                    "schema '{}' must declare at least one attribute",
                    id
                ))
            })?;

        let mut tree = SchemaTree {
            id: id.to_string(),
            name: document.get("name").and_then(Value::as_str).map(|s| s.to_string()),
            description: document
                .get("description")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            name_prefix: name_prefix.map(|p| p.to_string()),
            arena: Vec::new(),
            attributes: Vec::new(),
            index: HashMap::new(),
            complex_bulk_id_candidates: Vec::new(),
            simple_bulk_id_candidates: Vec::new(),
        };

        for node in attributes {
            let attr_id = tree.build_attribute(node, None)?;
            tree.attributes.push(attr_id);
        }
        debug!(
            "Parsed schema '{}' with {} attributes ({} nodes)",
            tree.id,
            tree.attributes.len(),
            tree.index.len()
        );
        Ok(tree)
    }

    fn build_attribute(&mut self, node: &Value, parent: Option<AttributeId>) -> AppResult<AttributeId> {
        let attr_id = AttributeId(self.arena.len());
        let descriptor = AttributeDescriptor::from_json(
            node,
            attr_id,
            parent.map(|p| &self.arena[p.0]),
            &self.id,
            self.name_prefix.as_deref(),
        )?;

        let key = descriptor.scim_node_name.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(AppError::invalid_schema(format!(
                "The attribute with the name '{}' was found twice within the given schema declaration",
                descriptor.full_resource_name()
            )));
        }
        let simple_candidate = descriptor.is_simple_bulk_candidate();
        let complex = descriptor.is_complex();
        let read_only = descriptor.is_read_only();
        let name = descriptor.name.clone();

        self.arena.push(descriptor);
        self.index.insert(key, attr_id);
        if simple_candidate {
            self.simple_bulk_id_candidates.push(attr_id);
        }

        if complex {
            let sub_nodes = node
                .get("subAttributes")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    AppError::invalid_schema(format!(
                        "missing attribute 'subAttributes' on 'complex'-attribute with name: {}",
                        name
                    ))
                })?;
            let mut children = Vec::with_capacity(sub_nodes.len());
            for sub_node in sub_nodes {
                children.push(self.build_attribute(sub_node, Some(attr_id))?);
            }

            let has_value = children
                .iter()
                .any(|c| self.arena[c.0].name == ATTR_VALUE);
            let has_resource_ref = children.iter().any(|c| {
                let child = &self.arena[c.0];
                child.name == ATTR_REF && child.reference_types.contains(&ReferenceType::Resource)
            });
            if !read_only && has_value && has_resource_ref {
                self.complex_bulk_id_candidates.push(attr_id);
            }
            self.arena[attr_id.0].sub_attributes = children;
        }
        Ok(attr_id)
    }

    pub fn attribute(&self, id: AttributeId) -> &AttributeDescriptor {
        &self.arena[id.0]
    }

    /// Top-level attributes in declaration order
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().map(move |id| &self.arena[id.0])
    }

    pub fn sub_attributes<'a>(
        &'a self,
        parent: &'a AttributeDescriptor,
    ) -> impl Iterator<Item = &'a AttributeDescriptor> {
        parent.sub_attributes.iter().map(move |id| &self.arena[id.0])
    }

    pub fn parent_of(&self, attribute: &AttributeDescriptor) -> Option<&AttributeDescriptor> {
        attribute.parent.map(|id| &self.arena[id.0])
    }

    /// Case-insensitive lookup by dotted name; a leading `<schemaId>:` is ignored
    pub fn lookup(&self, name: &str) -> Option<&AttributeDescriptor> {
        let lowered = name.to_lowercase();
        let schema_prefix = format!("{}:", self.id.to_lowercase());
        let key = lowered.strip_prefix(&schema_prefix).unwrap_or(&lowered);
        self.index.get(key).map(|id| &self.arena[id.0])
    }

    /// Resolves a direct child of `parent`.
    ///
    /// Falls back to the dotted index entry `parent.name`, accepted only when it is
    /// attached to the same parent.
    pub fn sub_attribute<'a>(
        &'a self,
        parent: &'a AttributeDescriptor,
        name: &str,
    ) -> Option<&'a AttributeDescriptor> {
        self.sub_attributes(parent)
            .find(|child| child.name.eq_ignore_ascii_case(name))
            .or_else(|| {
                self.lookup(&format!("{}.{}", parent.scim_node_name, name))
                    .filter(|found| found.parent == Some(parent.id))
            })
    }

    pub fn complex_bulk_id_candidates(&self) -> Vec<&AttributeDescriptor> {
        self.complex_bulk_id_candidates
            .iter()
            .map(|id| &self.arena[id.0])
            .collect()
    }

    pub fn simple_bulk_id_candidates(&self) -> Vec<&AttributeDescriptor> {
        self.simple_bulk_id_candidates
            .iter()
            .map(|id| &self.arena[id.0])
            .collect()
    }

    /// Adds a top-level attribute; the tree is left untouched if the definition is invalid
    pub fn add_attribute(&mut self, node: &Value) -> AppResult<AttributeId> {
        let arena_len = self.arena.len();
        let simple_len = self.simple_bulk_id_candidates.len();
        let complex_len = self.complex_bulk_id_candidates.len();

        match self.build_attribute(node, None) {
            Ok(attr_id) => {
                self.attributes.push(attr_id);
                Ok(attr_id)
            }
            Err(e) => {
                self.arena.truncate(arena_len);
                self.index.retain(|_, id| id.0 < arena_len);
                self.simple_bulk_id_candidates.truncate(simple_len);
                self.complex_bulk_id_candidates.truncate(complex_len);
                Err(e)
            }
        }
    }

    /// Detaches an attribute (and its sub-attributes) from the tree.
    ///
    /// Returns false if no attribute with that name is known.
    pub fn remove_attribute(&mut self, name: &str) -> bool {
        let Some(target) = self.lookup(name).map(|attr| attr.id) else {
            return false;
        };

        let mut detached = vec![target];
        let mut cursor = 0;
        while cursor < detached.len() {
            let children = self.arena[detached[cursor].0].sub_attributes.clone();
            detached.extend(children);
            cursor += 1;
        }

        match self.arena[target.0].parent {
            Some(parent) => self.arena[parent.0].sub_attributes.retain(|id| *id != target),
            None => self.attributes.retain(|id| *id != target),
        }
        self.index.retain(|_, id| !detached.contains(id));
        self.simple_bulk_id_candidates.retain(|id| !detached.contains(id));
        self.complex_bulk_id_candidates.retain(|id| !detached.contains(id));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::definitions::{ENTERPRISE_USER_SCHEMA, GROUP_SCHEMA, USER_SCHEMA};
    use serde_json::json;

    #[test]
    fn test_parse_user_schema() {
        let tree = SchemaTree::from_json(&USER_SCHEMA).unwrap();
        assert_eq!(tree.id, "urn:ietf:params:scim:schemas:core:2.0:User");
        assert!(tree.lookup("userName").is_some());
        assert!(tree.lookup("USERNAME").is_some());
        assert!(tree.lookup("name.givenName").is_some());
        assert!(tree
            .lookup("urn:ietf:params:scim:schemas:core:2.0:User:emails.value")
            .is_some());
        assert!(tree.lookup("unknown").is_none());
    }

    #[test]
    fn test_sub_attributes_link_to_parent() {
        let tree = SchemaTree::from_json(&USER_SCHEMA).unwrap();
        let emails = tree.lookup("emails").unwrap();
        assert!(emails.is_multi_valued_complex());
        let primary = tree.sub_attribute(emails, "PRIMARY").unwrap();
        assert_eq!(primary.scim_node_name, "emails.primary");
        assert!(primary.is_child_of_complex());
        assert_eq!(tree.parent_of(primary).unwrap().name, "emails");
    }

    #[test]
    fn test_missing_attributes_rejected() {
        let result = SchemaTree::from_json(&json!({"id": "urn:x", "attributes": []}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
        let result = SchemaTree::from_json(&json!({"id": "urn:x"}));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_duplicate_names_rejected_case_insensitively() {
        let result = SchemaTree::from_json(&json!({
            "id": "urn:x",
            "attributes": [
                {"name": "userName", "type": "string", "description": "a"},
                {"name": "USERNAME", "type": "string", "description": "b"}
            ]
        }));
        match result {
            Err(AppError::InvalidSchema(message)) => assert!(message.contains("found twice")),
            other => panic!("Expected InvalidSchema, got {:?}", other),
        }

        let result = SchemaTree::from_json(&json!({
            "id": "urn:x",
            "attributes": [{
                "name": "name", "type": "complex", "description": "a",
                "subAttributes": [
                    {"name": "given", "type": "string", "description": "a"},
                    {"name": "Given", "type": "string", "description": "b"}
                ]
            }]
        }));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_complex_without_sub_attributes_rejected() {
        let result = SchemaTree::from_json(&json!({
            "id": "urn:x",
            "attributes": [{"name": "name", "type": "complex", "description": "a"}]
        }));
        assert!(matches!(result, Err(AppError::InvalidSchema(_))));
    }

    #[test]
    fn test_bulk_id_candidates() {
        let enterprise = SchemaTree::from_json(&ENTERPRISE_USER_SCHEMA).unwrap();
        let complex: Vec<&str> = enterprise
            .complex_bulk_id_candidates()
            .iter()
            .map(|a| a.scim_node_name.as_str())
            .collect();
        assert_eq!(complex, vec!["manager"]);
        let simple: Vec<&str> = enterprise
            .simple_bulk_id_candidates()
            .iter()
            .map(|a| a.scim_node_name.as_str())
            .collect();
        assert_eq!(simple, vec!["manager.$ref"]);

        // groups is readOnly on User
        let user = SchemaTree::from_json(&USER_SCHEMA).unwrap();
        assert!(user.complex_bulk_id_candidates().is_empty());

        let group = SchemaTree::from_json(&GROUP_SCHEMA).unwrap();
        assert_eq!(group.complex_bulk_id_candidates().len(), 1);
        assert!(group.simple_bulk_id_candidates().is_empty());
    }

    #[test]
    fn test_name_prefix() {
        let tree = SchemaTree::from_json_with_prefix(
            &json!({
                "id": "urn:meta",
                "attributes": [{"name": "created", "type": "dateTime", "description": "c"}]
            }),
            Some("meta"),
        )
        .unwrap();
        let created = tree.lookup("meta.created").unwrap();
        assert_eq!(created.name, "created");
        assert_eq!(created.full_resource_name(), "urn:meta:meta.created");
    }

    #[test]
    fn test_add_and_remove_attribute() {
        let mut tree = SchemaTree::from_json(&ENTERPRISE_USER_SCHEMA).unwrap();
        tree.add_attribute(&json!({"name": "badge", "type": "string", "description": "b"}))
            .unwrap();
        assert!(tree.lookup("badge").is_some());
        assert_eq!(tree.attributes().last().unwrap().name, "badge");

        let duplicate = tree.add_attribute(&json!({"name": "Badge", "type": "string", "description": "b"}));
        assert!(duplicate.is_err());
        assert_eq!(tree.attributes().filter(|a| a.name == "badge").count(), 1);

        assert!(tree.remove_attribute("manager"));
        assert!(tree.lookup("manager").is_none());
        assert!(tree.lookup("manager.value").is_none());
        assert!(tree.complex_bulk_id_candidates().is_empty());
        assert!(tree.simple_bulk_id_candidates().is_empty());
        assert!(!tree.remove_attribute("manager"));
    }

    #[test]
    fn test_failed_add_leaves_tree_unchanged() {
        let mut tree = SchemaTree::from_json(&GROUP_SCHEMA).unwrap();
        let before = tree.attributes().count();
        let result = tree.add_attribute(&json!({
            "name": "owner", "type": "complex", "description": "o",
            "subAttributes": [
                {"name": "value", "type": "string", "description": "v"},
                {"name": "bad", "type": "binary", "description": "b"}
            ]
        }));
        assert!(result.is_err());
        assert_eq!(tree.attributes().count(), before);
        assert!(tree.lookup("owner").is_none());
        assert!(tree.lookup("owner.value").is_none());
    }
}
