//! Registry of entity definitions.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::entity::EntityDef;
use crate::error::Error;
use crate::filter::url::url_key_conflict;

/// Thread-safe registry of entity definitions, keyed by entity name.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: RwLock<BTreeMap<String, Arc<EntityDef>>>,
}

impl EntityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register an entity.
    pub fn register(&self, entity: EntityDef) -> Result<Arc<EntityDef>, Error> {
        validate(&entity)?;
        let mut entities = self.entities.write();
        if entities.contains_key(entity.name()) {
            return Err(Error::Schema(format!(
                "entity '{}' is already registered",
                entity.name()
            )));
        }
        debug!(entity = entity.name(), fields = entity.fields().len(), "registered entity");
        let entity = Arc::new(entity);
        entities.insert(entity.name().to_string(), entity.clone());
        Ok(entity)
    }

    /// Get an entity by name.
    pub fn get(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.entities.read().get(name).cloned()
    }

    /// Get an entity by name, failing with `UnknownEntity`.
    pub fn require(&self, name: &str) -> Result<Arc<EntityDef>, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Registered entity names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entities.read().keys().cloned().collect()
    }

    /// All registered entities, sorted by name.
    pub fn entities(&self) -> Vec<Arc<EntityDef>> {
        self.entities.read().values().cloned().collect()
    }
}

/// Check an entity definition for internal consistency.
pub fn validate(entity: &EntityDef) -> Result<(), Error> {
    let schema_err = |msg: String| Error::Schema(format!("entity '{}': {msg}", entity.name()));

    let mut keys = HashSet::new();
    let mut columns = HashSet::new();
    for field in entity.fields() {
        if !keys.insert(field.key()) {
            return Err(schema_err(format!("duplicate field '{}'", field.key())));
        }
        if let Some(conflict) = url_key_conflict(field.key(), entity) {
            return Err(schema_err(format!("field key clashes with URL parameters: {conflict}")));
        }
        if field.is_stored() && !columns.insert(field.db_name()) {
            return Err(schema_err(format!("duplicate column '{}'", field.db_name())));
        }
        for member in field.members() {
            let target = entity.field(member).ok_or_else(|| {
                schema_err(format!("compound field '{}' names unknown member '{member}'", field.key()))
            })?;
            if !target.is_stored() {
                return Err(schema_err(format!(
                    "member '{member}' of '{}' must be a stored field",
                    field.key()
                )));
            }
        }
    }

    let id = entity
        .field(entity.id_key())
        .ok_or_else(|| schema_err(format!("id field '{}' is not defined", entity.id_key())))?;
    if id.is_computed() {
        return Err(schema_err("the id field cannot be computed".into()));
    }
    if id.is_auto_increment() && (id.is_compound() || id.value_type() != super::ValueType::Integer) {
        return Err(schema_err("auto-increment ids must be single integer fields".into()));
    }

    for order in entity.default_order() {
        let field = entity
            .field(&order.field)
            .ok_or_else(|| schema_err(format!("default order names unknown field '{}'", order.field)))?;
        if field.is_computed() {
            return Err(schema_err(format!("cannot order by computed field '{}'", order.field)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldDef;
    use shoal_proto::OrderSpec;

    fn tasks() -> EntityDef {
        EntityDef::new("tasks", "id")
            .with_field(FieldDef::integer("id").auto_increment())
            .with_field(FieldDef::string("title"))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = EntityRegistry::new();
        registry.register(tasks()).unwrap();

        assert!(registry.get("tasks").is_some());
        assert_eq!(registry.names(), vec!["tasks".to_string()]);
        assert!(matches!(
            registry.require("missing"),
            Err(Error::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_duplicate_entity_rejected() {
        let registry = EntityRegistry::new();
        registry.register(tasks()).unwrap();
        assert!(matches!(registry.register(tasks()), Err(Error::Schema(_))));
    }

    #[test]
    fn test_invalid_definitions() {
        let missing_id = EntityDef::new("a", "id").with_field(FieldDef::string("name"));
        assert!(validate(&missing_id).is_err());

        let bad_member = EntityDef::new("b", "key")
            .with_field(FieldDef::integer("x"))
            .with_field(FieldDef::compound("key", ["x", "y"]));
        assert!(validate(&bad_member).is_err());

        let duplicate = tasks().with_field(FieldDef::string("title"));
        assert!(validate(&duplicate).is_err());

        let bad_order = tasks().with_default_order(OrderSpec::asc("nope"));
        assert!(validate(&bad_order).is_err());

        let string_auto = EntityDef::new("c", "id").with_field(FieldDef::string("id").auto_increment());
        assert!(validate(&string_auto).is_err());
    }

    #[test]
    fn test_url_parameter_clashes_rejected() {
        let reserved = tasks().with_field(FieldDef::string("where"));
        assert!(matches!(validate(&reserved), Err(Error::Schema(_))));

        let underscore = tasks().with_field(FieldDef::string("_sort"));
        assert!(matches!(validate(&underscore), Err(Error::Schema(_))));

        let suffixed = tasks().with_field(FieldDef::string("title_ne"));
        assert!(matches!(validate(&suffixed), Err(Error::Schema(_))));

        let unrelated_suffix = tasks().with_field(FieldDef::string("status_in"));
        assert!(validate(&unrelated_suffix).is_ok());
    }
}
