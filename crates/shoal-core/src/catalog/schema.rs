//! Declarative entity schema files.
//!
//! A schema file is a JSON document listing entities:
//!
//! ```json
//! { "entities": [
//!     { "name": "tasks", "id": "id",
//!       "fields": [ { "key": "id", "type": "integer", "autoIncrement": true },
//!                   { "key": "title", "type": "string", "required": true } ],
//!       "permissions": { "read": "allowed", "insert": "authenticated",
//!                        "update": { "role": "editor" }, "delete": "denied" } } ] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use shoal_proto::{OrderDirection, OrderSpec};

use super::entity::EntityDef;
use super::field::FieldDef;
use super::permissions::{EntityPermissions, Permission};
use super::types::ValueType;
use crate::error::Error;

/// A schema file: the list of entities it declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaFile {
    pub entities: Vec<EntitySchema>,
}

/// Declarative form of an [`EntityDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    pub id: String,
    pub fields: Vec<FieldSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_order: Vec<OrderSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionsSchema>,
}

/// Declarative form of a [`FieldDef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub key: String,
    #[serde(rename = "type", default = "default_type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

/// Default ordering entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSchema {
    pub field: String,
    #[serde(default)]
    pub direction: OrderDirection,
}

/// Static permission rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionRule {
    Allowed,
    Denied,
    Authenticated,
    Role(String),
}

/// Per-operation permission rules; omitted operations keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionsSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<PermissionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<PermissionRule>,
}

fn default_type() -> ValueType {
    ValueType::String
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl SchemaFile {
    /// Parse a schema from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a schema file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Schema(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Build the entity definitions.
    pub fn into_entities(self) -> Vec<EntityDef> {
        self.entities.into_iter().map(EntitySchema::into_entity).collect()
    }
}

impl EntitySchema {
    /// Describe an entity definition. Predicate permissions cannot be
    /// described and are omitted.
    pub fn describe(entity: &EntityDef) -> Self {
        let permissions = entity.permissions();
        Self {
            name: entity.name().to_string(),
            db_name: (entity.db_name() != entity.name()).then(|| entity.db_name().to_string()),
            id: entity.id_key().to_string(),
            fields: entity.fields().iter().map(FieldSchema::describe).collect(),
            default_order: entity
                .default_order()
                .iter()
                .map(|o| OrderSchema {
                    field: o.field.clone(),
                    direction: o.direction,
                })
                .collect(),
            permissions: Some(PermissionsSchema {
                read: PermissionRule::describe(&permissions.read),
                insert: PermissionRule::describe(&permissions.insert),
                update: PermissionRule::describe(&permissions.update),
                delete: PermissionRule::describe(&permissions.delete),
            }),
        }
    }

    /// Build the entity definition.
    pub fn into_entity(self) -> EntityDef {
        let mut entity = EntityDef::new(self.name, self.id);
        if let Some(db_name) = self.db_name {
            entity = entity.with_db_name(db_name);
        }
        for field in self.fields {
            entity = entity.with_field(field.into_field());
        }
        for order in self.default_order {
            entity = entity.with_default_order(OrderSpec {
                field: order.field,
                direction: order.direction,
            });
        }
        let rules = self.permissions.unwrap_or_default();
        let mut permissions = EntityPermissions::default();
        let slots = [
            (rules.read, &mut permissions.read),
            (rules.insert, &mut permissions.insert),
            (rules.update, &mut permissions.update),
            (rules.delete, &mut permissions.delete),
        ];
        for (rule, slot) in slots {
            if let Some(rule) = rule {
                *slot = rule.into_permission();
            }
        }
        entity.with_permissions(permissions)
    }
}

impl FieldSchema {
    /// Describe a field definition.
    pub fn describe(field: &FieldDef) -> Self {
        Self {
            key: field.key().to_string(),
            value_type: field.value_type(),
            caption: Some(field.caption().to_string()),
            db_name: (field.db_name() != field.key()).then(|| field.db_name().to_string()),
            required: field.is_required(),
            auto_increment: field.is_auto_increment(),
            read_only: !field.allow_api_update(),
            hidden: !field.allow_api_read(),
            members: field.members().to_vec(),
        }
    }

    /// Build the field definition.
    pub fn into_field(self) -> FieldDef {
        let mut field = if self.members.is_empty() {
            FieldDef::new(self.key, self.value_type)
        } else {
            FieldDef::compound(self.key, self.members)
        };
        if let Some(caption) = self.caption {
            field = field.with_caption(caption);
        }
        if let Some(db_name) = self.db_name {
            field = field.with_db_name(db_name);
        }
        if self.required {
            field = field.required();
        }
        if self.auto_increment {
            field = field.auto_increment();
        }
        if self.read_only {
            field = field.read_only();
        }
        if self.hidden {
            field = field.hidden();
        }
        field
    }
}

impl PermissionRule {
    fn describe(permission: &Permission) -> Option<Self> {
        match permission {
            Permission::Allowed => Some(PermissionRule::Allowed),
            Permission::Denied => Some(PermissionRule::Denied),
            Permission::Authenticated => Some(PermissionRule::Authenticated),
            Permission::Role(role) => Some(PermissionRule::Role(role.clone())),
            Permission::Predicate(_) => None,
        }
    }

    fn into_permission(self) -> Permission {
        match self {
            PermissionRule::Allowed => Permission::Allowed,
            PermissionRule::Denied => Permission::Denied,
            PermissionRule::Authenticated => Permission::Authenticated,
            PermissionRule::Role(role) => Permission::Role(role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{registry, Decision, Operation, RequestContext};
    use serde_json::json;

    const SCHEMA: &str = r#"{
        "entities": [{
            "name": "tasks",
            "id": "id",
            "fields": [
                {"key": "id", "type": "integer", "autoIncrement": true},
                {"key": "title", "required": true},
                {"key": "dueOn", "type": "dateOnly", "dbName": "due_on"},
                {"key": "notes", "type": "json", "hidden": true}
            ],
            "defaultOrder": [{"field": "title", "direction": "desc"}],
            "permissions": {"insert": "authenticated", "update": {"role": "editor"}}
        }]
    }"#;

    #[test]
    fn test_parse_schema_file() {
        let schema = SchemaFile::from_json_str(SCHEMA).unwrap();
        let entities = schema.into_entities();
        assert_eq!(entities.len(), 1);
        let tasks = &entities[0];
        registry::validate(tasks).unwrap();

        let title = tasks.field("title").unwrap();
        assert_eq!(title.value_type(), ValueType::String);
        assert!(title.is_required());
        assert_eq!(tasks.field("dueOn").unwrap().db_name(), "due_on");
        assert!(!tasks.field("notes").unwrap().allow_api_read());
        assert_eq!(tasks.default_order(), &[OrderSpec::desc("title")]);

        let perms = tasks.permissions();
        let anon = RequestContext::anonymous();
        assert_eq!(perms.check(Operation::Read, &anon), Decision::Granted);
        assert_eq!(perms.check(Operation::Insert, &anon), Decision::Forbidden);
        assert_eq!(
            perms.check(Operation::Update, &RequestContext::user("a").with_role("editor")),
            Decision::Granted
        );
        assert_eq!(perms.check(Operation::Delete, &anon), Decision::NotAllowed);
    }

    #[test]
    fn test_describe_entity() {
        let entity = SchemaFile::from_json_str(SCHEMA)
            .unwrap()
            .into_entities()
            .remove(0);
        let described = serde_json::to_value(EntitySchema::describe(&entity)).unwrap();

        assert_eq!(described["name"], json!("tasks"));
        assert_eq!(described["fields"][0]["autoIncrement"], json!(true));
        assert_eq!(described["fields"][0]["readOnly"], json!(true));
        assert_eq!(described["fields"][2]["dbName"], json!("due_on"));
        assert_eq!(described["permissions"]["update"], json!({"role": "editor"}));
    }

    #[test]
    fn test_malformed_schema() {
        assert!(matches!(
            SchemaFile::from_json_str("{\"entities\": 3}"),
            Err(Error::Json(_))
        ));
    }
}
