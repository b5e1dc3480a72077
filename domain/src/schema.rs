//! Per-entity metadata: field descriptors, schemas and the registry.
//!
//! Schemas are declared in code with `&'static str` column names and checked
//! once when they are built. Everything that later reaches a query (sort
//! keys, search columns, mutation columns) is taken from a `Schema`, never
//! from caller input.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::query::{Direction, SortKey, SortSpec};
use crate::{CoreError, Value};

/// Input/display type of a field. Select fields carry their option set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Textarea,
    Email,
    Url,
    Number,
    Boolean,
    Date,
    Datetime,
    Select(&'static [&'static str]),
    Password,
    Readonly,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Textarea => "textarea",
            FieldType::Email => "email",
            FieldType::Url => "url",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Datetime => "datetime",
            FieldType::Select(_) => "select",
            FieldType::Password => "password",
            FieldType::Readonly => "readonly",
        }
    }

    pub fn options(&self) -> Option<&'static [&'static str]> {
        match self {
            FieldType::Select(options) => Some(*options),
            _ => None,
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Datetime)
    }
}

/// Write-time capability attached to a field. The raw payload value is
/// handed over untouched; the handler either discards it (`None`) or names
/// the column and value to persist.
#[async_trait]
pub trait FieldHandler: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve(
        &self,
        raw: &serde_json::Value,
    ) -> Result<Option<(&'static str, Value)>, CoreError>;
}

/// One field of an entity.
#[derive(Clone)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub creatable: bool,
    pub editable: bool,
    pub show_in_list: bool,
    /// No two rows may hold the same non-null value.
    pub unique: bool,
    handler: Option<Arc<dyn FieldHandler>>,
}

impl FieldDescriptor {
    pub fn new(name: &'static str, label: &'static str, field_type: FieldType) -> Self {
        let writable = field_type != FieldType::Readonly;
        Self {
            name,
            label,
            field_type,
            required: false,
            creatable: writable,
            editable: writable,
            show_in_list: true,
            unique: false,
            handler: None,
        }
    }

    /// A read-only identifier column.
    pub fn primary_key(name: &'static str, label: &'static str) -> Self {
        Self::new(name, label, FieldType::Readonly)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Settable on create only.
    pub fn fixed_after_create(mut self) -> Self {
        self.editable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn hidden_in_list(mut self) -> Self {
        self.show_in_list = false;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn FieldHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn handler(&self) -> Option<&Arc<dyn FieldHandler>> {
        self.handler.as_ref()
    }

    /// Fields that may be read back, sorted or searched.
    pub fn is_selectable(&self) -> bool {
        self.field_type != FieldType::Password && self.handler.is_none()
    }

    fn metadata(&self) -> FieldMeta {
        let handler = match (self.field_type, &self.handler) {
            (FieldType::Password, _) | (_, None) => None,
            (_, Some(h)) => Some(h.name()),
        };
        FieldMeta {
            name: self.name,
            label: self.label,
            field_type: self.field_type.as_str(),
            required: self.required,
            creatable: self.creatable,
            editable: self.editable,
            show_in_list: self.show_in_list,
            options: self.field_type.options(),
            handler,
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("label", &self.label)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("creatable", &self.creatable)
            .field("editable", &self.editable)
            .field("show_in_list", &self.show_in_list)
            .field("unique", &self.unique)
            .field("handler", &self.handler.as_ref().map(|h| h.name()))
            .finish()
    }
}

/// Errors raised while declaring schemas. These are programming errors and
/// abort startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("entity '{entity}': primary key '{column}' is not declared as a field")]
    MissingPrimaryKey {
        entity: &'static str,
        column: &'static str,
    },
    #[error("entity '{entity}': primary key '{column}' must not be creatable or editable")]
    WritablePrimaryKey {
        entity: &'static str,
        column: &'static str,
    },
    #[error("entity '{entity}': field '{column}' is declared twice")]
    DuplicateField {
        entity: &'static str,
        column: &'static str,
    },
    #[error("entity '{entity}': column '{column}' cannot be used for {usage}")]
    IllegalColumn {
        entity: &'static str,
        column: &'static str,
        usage: &'static str,
    },
    #[error("entity '{entity}': default sort must include the primary key")]
    NonTotalSort { entity: &'static str },
    #[error("entity '{entity}': select field '{column}' declares no options")]
    EmptyOptions {
        entity: &'static str,
        column: &'static str,
    },
    #[error("entity '{0}' is registered twice")]
    DuplicateEntity(&'static str),
}

/// Immutable metadata for one entity.
#[derive(Debug)]
pub struct Schema {
    key: &'static str,
    label: &'static str,
    table: &'static str,
    primary_key: &'static str,
    fields: Vec<FieldDescriptor>,
    default_sort: SortSpec,
    searchable: Vec<&'static str>,
}

impl Schema {
    pub fn builder(
        key: &'static str,
        label: &'static str,
        table: &'static str,
        primary_key: &'static str,
    ) -> SchemaBuilder {
        SchemaBuilder {
            key,
            label,
            table,
            primary_key,
            fields: Vec::new(),
            default_sort: Vec::new(),
            searchable: Vec::new(),
        }
    }

    pub fn key(&self) -> &'static str {
        self.key
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn primary_key(&self) -> &'static str {
        self.primary_key
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn default_sort(&self) -> &SortSpec {
        &self.default_sort
    }

    pub fn searchable(&self) -> &[&'static str] {
        &self.searchable
    }

    /// Allow-list lookup: the schema's own column name when `name` may be
    /// sorted on, `None` otherwise.
    pub fn sortable_column(&self, name: &str) -> Option<&'static str> {
        self.field(name)
            .filter(|f| f.is_selectable())
            .map(|f| f.name)
    }

    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.unique)
    }

    /// Primary key followed by every selectable field.
    pub fn selectable_columns(&self) -> Vec<&'static str> {
        std::iter::once(self.primary_key)
            .chain(
                self.fields
                    .iter()
                    .filter(|f| f.is_selectable() && f.name != self.primary_key)
                    .map(|f| f.name),
            )
            .collect()
    }

    pub fn metadata(&self) -> EntityMeta {
        EntityMeta {
            key: self.key,
            label: self.label,
            primary_key: self.primary_key,
            fields: self.fields.iter().map(FieldDescriptor::metadata).collect(),
        }
    }
}

/// Declarative builder; `build` enforces the schema invariants.
pub struct SchemaBuilder {
    key: &'static str,
    label: &'static str,
    table: &'static str,
    primary_key: &'static str,
    fields: Vec<FieldDescriptor>,
    default_sort: Vec<(&'static str, Direction)>,
    searchable: Vec<&'static str>,
}

impl SchemaBuilder {
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn default_sort(mut self, keys: &[(&'static str, Direction)]) -> Self {
        self.default_sort = keys.to_vec();
        self
    }

    pub fn searchable(mut self, columns: &[&'static str]) -> Self {
        self.searchable = columns.to_vec();
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let entity = self.key;

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name) {
                return Err(SchemaError::DuplicateField {
                    entity,
                    column: field.name,
                });
            }
            if matches!(field.field_type, FieldType::Select(options) if options.is_empty()) {
                return Err(SchemaError::EmptyOptions {
                    entity,
                    column: field.name,
                });
            }
        }

        let pk = self
            .fields
            .iter()
            .find(|f| f.name == self.primary_key)
            .ok_or(SchemaError::MissingPrimaryKey {
                entity,
                column: self.primary_key,
            })?;
        if pk.creatable || pk.editable || pk.handler.is_some() {
            return Err(SchemaError::WritablePrimaryKey {
                entity,
                column: self.primary_key,
            });
        }

        let selectable = |column: &'static str| {
            self.fields
                .iter()
                .any(|f| f.name == column && f.is_selectable())
        };
        for &(column, _) in &self.default_sort {
            if !selectable(column) {
                return Err(SchemaError::IllegalColumn {
                    entity,
                    column,
                    usage: "sorting",
                });
            }
        }
        if !self.default_sort.iter().any(|(c, _)| *c == self.primary_key) {
            return Err(SchemaError::NonTotalSort { entity });
        }
        for &column in &self.searchable {
            if !selectable(column) {
                return Err(SchemaError::IllegalColumn {
                    entity,
                    column,
                    usage: "search",
                });
            }
        }

        let default_sort = SortSpec::new(
            self.default_sort
                .iter()
                .map(|&(c, d)| SortKey::new(c, d))
                .collect(),
        );
        Ok(Schema {
            key: self.key,
            label: self.label,
            table: self.table,
            primary_key: self.primary_key,
            fields: self.fields,
            default_sort,
            searchable: self.searchable,
        })
    }
}

/// All registered entities, fixed at startup.
#[derive(Debug)]
pub struct SchemaRegistry {
    schemas: Vec<Schema>,
}

impl SchemaRegistry {
    pub fn new(schemas: Vec<Schema>) -> Result<Self, SchemaError> {
        let mut keys = HashSet::new();
        for schema in &schemas {
            if !keys.insert(schema.key) {
                return Err(SchemaError::DuplicateEntity(schema.key));
            }
        }
        Ok(Self { schemas })
    }

    pub fn get(&self, key: &str) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.key == key)
    }

    /// Like `get`, turning an unknown key into `CoreError::NotFound`.
    pub fn require(&self, key: &str) -> Result<&Schema, CoreError> {
        self.get(key)
            .ok_or_else(|| CoreError::NotFound(format!("unknown entity '{key}'")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Schema> {
        self.schemas.iter()
    }

    pub fn metadata(&self) -> Vec<EntityMeta> {
        self.schemas.iter().map(Schema::metadata).collect()
    }
}

/// Public description of an entity for admin front-ends.
#[derive(Clone, Debug, Serialize)]
pub struct EntityMeta {
    pub key: &'static str,
    pub label: &'static str,
    pub primary_key: &'static str,
    pub fields: Vec<FieldMeta>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FieldMeta {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: &'static str,
    pub required: bool,
    pub creatable: bool,
    pub editable: bool,
    pub show_in_list: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'static [&'static str]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<&'static str>,
}
