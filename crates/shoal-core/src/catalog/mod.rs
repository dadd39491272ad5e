//! Entity catalog.
//!
//! The catalog holds entity definitions: ordered field metadata with value
//! converters, id fields, permissions and custom filters. Translators and
//! providers only look fields up through it.

mod converter;
mod entity;
mod field;
mod permissions;
pub mod registry;
mod schema;
mod types;

pub use converter::{
    converter_for, plain_json, BooleanConverter, DateConverter, DateOnlyConverter,
    IntegerConverter, JsonConverter, NumberConverter, StringConverter, ValueConverter,
};
pub use entity::{CustomFilterFn, EntityDef, FieldRef};
pub use field::{humanize, ComputedFn, FieldDef, Validator};
pub use permissions::{Decision, EntityPermissions, Operation, Permission, RequestContext};
pub use registry::EntityRegistry;
pub use schema::{EntitySchema, FieldSchema, OrderSchema, PermissionRule, PermissionsSchema, SchemaFile};
pub use types::ValueType;
