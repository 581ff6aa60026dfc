//! Service metadata lookups used while binding.
//!
//! The binder needs element types for entity sets and singletons, key
//! properties for key predicates, and whether a member is a structural or a
//! navigation property. [`InMemoryMetadata`] is a builder-style provider that
//! can also be loaded from a TOML model file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::errors::{CompileError, CompileResult};
use crate::query::value::Ty;

/// Declared member of an entity or complex type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyDef {
    /// Member name.
    pub name: String,
    /// Member type; navigation collections are `Ty::Collection(Entity)`.
    pub ty: Ty,
    /// Whether the member is a navigation property.
    pub navigation: bool,
}

/// Provides type information for the resources a query touches.
pub trait MetadataProvider: Send + Sync {
    /// Element type of an entity set.
    fn entity_set_type(&self, name: &str) -> CompileResult<Ty>;
    /// Type of a singleton.
    fn singleton_type(&self, name: &str) -> CompileResult<Ty>;
    /// Key property names of an entity type, in declaration order.
    fn key_properties(&self, entity: &str) -> CompileResult<Vec<String>>;
    /// Member declared on an entity or complex type.
    fn property(&self, structured: &str, name: &str) -> CompileResult<PropertyDef>;

    /// Member lookup on any type that can carry members.
    fn member(&self, owner: &Ty, name: &str) -> CompileResult<PropertyDef> {
        match owner.non_nullable() {
            Ty::Entity(ty) | Ty::Complex(ty) => self.property(ty, name),
            Ty::Collection(inner) => self.member(inner, name),
            other => Err(CompileError::UnknownMember {
                ty: other.to_string(),
                member: name.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct StructuredType {
    keys: Vec<String>,
    properties: Vec<PropertyDef>,
}

/// Builder-style metadata provider held in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetadata {
    entity_sets: HashMap<String, String>,
    singletons: HashMap<String, String>,
    types: HashMap<String, StructuredType>,
}

impl InMemoryMetadata {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an entity type with its key properties.
    pub fn with_entity_type<I, S>(mut self, name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.types.entry(name.into()).or_default();
        entry.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a complex type.
    pub fn with_complex_type(mut self, name: impl Into<String>) -> Self {
        self.types.entry(name.into()).or_default();
        self
    }

    /// Declares a structural property.
    pub fn with_property(
        mut self,
        owner: impl Into<String>,
        name: impl Into<String>,
        ty: Ty,
    ) -> Self {
        self.types
            .entry(owner.into())
            .or_default()
            .properties
            .push(PropertyDef {
                name: name.into(),
                ty,
                navigation: false,
            });
        self
    }

    /// Declares a navigation property to `target`.
    pub fn with_navigation(
        mut self,
        owner: impl Into<String>,
        name: impl Into<String>,
        target: impl Into<String>,
        collection: bool,
    ) -> Self {
        let target = Ty::entity(target);
        self.types
            .entry(owner.into())
            .or_default()
            .properties
            .push(PropertyDef {
                name: name.into(),
                ty: if collection {
                    Ty::collection(target)
                } else {
                    target
                },
                navigation: true,
            });
        self
    }

    /// Declares an entity set of `entity_type`.
    pub fn with_entity_set(
        mut self,
        name: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        self.entity_sets.insert(name.into(), entity_type.into());
        self
    }

    /// Declares a singleton of `entity_type`.
    pub fn with_singleton(mut self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.singletons.insert(name.into(), entity_type.into());
        self
    }

    /// Parses a TOML model.
    pub fn from_toml_str(contents: &str) -> Result<Self, MetadataError> {
        let model: ModelFile = toml::from_str(contents)?;
        model.into_metadata()
    }

    /// Loads a TOML model from disk.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let contents = fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    fn structured(&self, name: &str) -> CompileResult<&StructuredType> {
        self.types
            .get(name)
            .ok_or_else(|| CompileError::UnknownResource {
                name: name.to_string(),
            })
    }
}

impl MetadataProvider for InMemoryMetadata {
    fn entity_set_type(&self, name: &str) -> CompileResult<Ty> {
        self.entity_sets
            .get(name)
            .map(Ty::entity)
            .ok_or_else(|| CompileError::UnknownResource {
                name: name.to_string(),
            })
    }

    fn singleton_type(&self, name: &str) -> CompileResult<Ty> {
        self.singletons
            .get(name)
            .map(Ty::entity)
            .ok_or_else(|| CompileError::UnknownResource {
                name: name.to_string(),
            })
    }

    fn key_properties(&self, entity: &str) -> CompileResult<Vec<String>> {
        Ok(self.structured(entity)?.keys.clone())
    }

    fn property(&self, structured: &str, name: &str) -> CompileResult<PropertyDef> {
        self.structured(structured)?
            .properties
            .iter()
            .find(|prop| prop.name == name)
            .cloned()
            .ok_or_else(|| CompileError::UnknownMember {
                ty: structured.to_string(),
                member: name.to_string(),
            })
    }
}

/// Errors raised while loading a model file.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// File could not be read.
    #[error("failed to read model {path}: {source}")]
    Io {
        /// Model path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// File is not valid TOML for the model schema.
    #[error("failed to parse model: {0}")]
    Parse(#[from] toml::de::Error),
    /// A property names a type the model does not declare.
    #[error("property '{owner}.{property}' has unknown type '{ty}'")]
    UnknownType {
        /// Declaring type.
        owner: String,
        /// Property name.
        property: String,
        /// Type text.
        ty: String,
    },
    /// An entity set or singleton names an undeclared entity type.
    #[error("'{name}' refers to undeclared entity type '{ty}'")]
    UnknownEntityType {
        /// Set or singleton name.
        name: String,
        /// Entity type name.
        ty: String,
    },
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct ModelFile {
    entity_sets: BTreeMap<String, String>,
    singletons: BTreeMap<String, String>,
    entity_types: BTreeMap<String, TypeFile>,
    complex_types: BTreeMap<String, TypeFile>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct TypeFile {
    keys: Vec<String>,
    properties: BTreeMap<String, String>,
    navigation: BTreeMap<String, NavigationFile>,
}

#[derive(Debug, Deserialize, Serialize)]
struct NavigationFile {
    target: String,
    #[serde(default)]
    collection: bool,
}

impl ModelFile {
    fn into_metadata(self) -> Result<InMemoryMetadata, MetadataError> {
        let mut metadata = InMemoryMetadata::new();
        for name in self.complex_types.keys() {
            metadata = metadata.with_complex_type(name.clone());
        }
        for (name, def) in &self.entity_types {
            metadata = metadata.with_entity_type(name.clone(), def.keys.iter().cloned());
        }
        let declared = self
            .entity_types
            .iter()
            .chain(self.complex_types.iter());
        for (owner, def) in declared {
            for (property, text) in &def.properties {
                let ty = parse_type(text, &self.complex_types).ok_or_else(|| {
                    MetadataError::UnknownType {
                        owner: owner.clone(),
                        property: property.clone(),
                        ty: text.clone(),
                    }
                })?;
                metadata = metadata.with_property(owner.clone(), property.clone(), ty);
            }
            for (property, nav) in &def.navigation {
                if !self.entity_types.contains_key(&nav.target) {
                    return Err(MetadataError::UnknownType {
                        owner: owner.clone(),
                        property: property.clone(),
                        ty: nav.target.clone(),
                    });
                }
                metadata = metadata.with_navigation(
                    owner.clone(),
                    property.clone(),
                    nav.target.clone(),
                    nav.collection,
                );
            }
        }
        for (name, ty) in self.entity_sets {
            check_entity(&self.entity_types, &name, &ty)?;
            metadata = metadata.with_entity_set(name, ty);
        }
        for (name, ty) in self.singletons {
            check_entity(&self.entity_types, &name, &ty)?;
            metadata = metadata.with_singleton(name, ty);
        }
        Ok(metadata)
    }
}

fn check_entity(
    entity_types: &BTreeMap<String, TypeFile>,
    name: &str,
    ty: &str,
) -> Result<(), MetadataError> {
    if entity_types.contains_key(ty) {
        Ok(())
    } else {
        Err(MetadataError::UnknownEntityType {
            name: name.to_string(),
            ty: ty.to_string(),
        })
    }
}

/// Parses a property type such as `int32`, `string?`, or `Collection(Address)`.
pub fn parse_type<V>(text: &str, complex_types: &BTreeMap<String, V>) -> Option<Ty> {
    let text = text.trim();
    if let Some(inner) = text.strip_suffix('?') {
        return parse_type(inner, complex_types).map(Ty::nullable);
    }
    if let Some(inner) = text
        .strip_prefix("Collection(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return parse_type(inner, complex_types).map(Ty::collection);
    }
    Some(match text {
        "bool" => Ty::Bool,
        "int32" => Ty::Int32,
        "int64" => Ty::Int64,
        "single" => Ty::Single,
        "double" => Ty::Double,
        "decimal" => Ty::Decimal,
        "string" => Ty::String,
        other if complex_types.contains_key(other) => Ty::Complex(other.to_string()),
        _ => return None,
    })
}
