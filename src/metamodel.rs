//! # Metamodel
//!
//! Entity types known to the builders: their tables, attribute columns,
//! associations and CTE markers. Builders resolve aliases, joins and CTE binds
//! against it; the renderer maps attribute paths to columns with it.

use crate::error::{CriteriaError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Basic { column: String },
    /// Foreign key column lives on the owning table.
    ToOne { target: String, join_column: String },
    /// Foreign key column lives on the target table and references the owner id.
    ToMany { target: String, foreign_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
}

impl Attribute {
    pub fn column(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::Basic { column } => Some(column),
            AttributeKind::ToOne { join_column, .. } => Some(join_column),
            AttributeKind::ToMany { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            AttributeKind::Basic { .. } => None,
            AttributeKind::ToOne { target, .. } | AttributeKind::ToMany { target, .. } => {
                Some(target)
            }
        }
    }

    pub fn is_association(&self) -> bool {
        !matches!(self.kind, AttributeKind::Basic { .. })
    }
}

/// Marks an entity as a CTE; `inline` overrides the configured inlining default.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CteMetadata {
    pub inline: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    pub table: String,
    pub id_attribute: String,
    pub attributes: Vec<Attribute>,
    pub supertype: Option<String>,
    pub cte: Option<CteMetadata>,
}

impl EntityType {
    /// An entity with a basic `id` attribute.
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            id_attribute: "id".to_string(),
            attributes: vec![Attribute {
                name: "id".to_string(),
                kind: AttributeKind::Basic {
                    column: "id".to_string(),
                },
            }],
            supertype: None,
            cte: None,
        }
    }

    /// A subtype sharing its supertype's table and attributes.
    pub fn subtype(name: &str, supertype: &str) -> Self {
        Self {
            name: name.to_string(),
            table: String::new(),
            id_attribute: String::new(),
            attributes: Vec::new(),
            supertype: Some(supertype.to_string()),
            cte: None,
        }
    }

    pub fn id(mut self, name: &str, column: &str) -> Self {
        self.attributes.retain(|a| a.name != self.id_attribute);
        self.id_attribute = name.to_string();
        self.attributes.insert(
            0,
            Attribute {
                name: name.to_string(),
                kind: AttributeKind::Basic {
                    column: column.to_string(),
                },
            },
        );
        self
    }

    pub fn attribute(self, name: &str) -> Self {
        self.column(name, name)
    }

    pub fn column(mut self, name: &str, column: &str) -> Self {
        self.attributes.push(Attribute {
            name: name.to_string(),
            kind: AttributeKind::Basic {
                column: column.to_string(),
            },
        });
        self
    }

    pub fn to_one(mut self, name: &str, target: &str, join_column: &str) -> Self {
        self.attributes.push(Attribute {
            name: name.to_string(),
            kind: AttributeKind::ToOne {
                target: target.to_string(),
                join_column: join_column.to_string(),
            },
        });
        self
    }

    pub fn to_many(mut self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.attributes.push(Attribute {
            name: name.to_string(),
            kind: AttributeKind::ToMany {
                target: target.to_string(),
                foreign_key: foreign_key.to_string(),
            },
        });
        self
    }

    pub fn cte(mut self) -> Self {
        self.cte = Some(CteMetadata::default());
        self
    }

    pub fn inline_cte(mut self, inline: bool) -> Self {
        self.cte = Some(CteMetadata {
            inline: Some(inline),
        });
        self
    }

    pub fn is_cte(&self) -> bool {
        self.cte.is_some()
    }
}

/// Validated, immutable set of entity types.
#[derive(Debug, Clone, Default)]
pub struct Metamodel {
    entities: BTreeMap<String, EntityType>,
}

#[derive(Debug, Default)]
pub struct MetamodelBuilder {
    entities: Vec<EntityType>,
}

impl Metamodel {
    pub fn builder() -> MetamodelBuilder {
        MetamodelBuilder::default()
    }

    pub fn entity(&self, name: &str) -> Result<&EntityType> {
        self.entities.get(name).ok_or_else(|| {
            CriteriaError::IllegalArgument(format!("Entity '{name}' is not part of the metamodel"))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Supertype chain starting with the entity itself.
    fn hierarchy(&self, name: &str) -> Result<Vec<&EntityType>> {
        let mut chain = vec![self.entity(name)?];
        while let Some(supertype) = chain.last().and_then(|e| e.supertype.as_deref()) {
            chain.push(self.entity(supertype)?);
        }
        Ok(chain)
    }

    /// Table of the entity, inherited from the root of its hierarchy.
    pub fn table_name(&self, name: &str) -> Result<&str> {
        let hierarchy = self.hierarchy(name)?;
        Ok(hierarchy
            .iter()
            .find(|e| !e.table.is_empty())
            .map(|e| e.table.as_str())
            .unwrap_or(""))
    }

    pub fn id_attribute(&self, name: &str) -> Result<&Attribute> {
        let hierarchy = self.hierarchy(name)?;
        let id = hierarchy
            .iter()
            .find(|e| !e.id_attribute.is_empty())
            .map(|e| e.id_attribute.as_str())
            .unwrap_or("");
        self.attribute(name, id)
    }

    pub fn id_column(&self, name: &str) -> Result<&str> {
        let attribute = self.id_attribute(name)?;
        attribute.column().ok_or_else(|| {
            CriteriaError::Metamodel(format!("Id attribute of '{name}' has no column"))
        })
    }

    pub fn attribute(&self, entity: &str, attribute: &str) -> Result<&Attribute> {
        for candidate in self.hierarchy(entity)? {
            if let Some(found) = candidate.attributes.iter().find(|a| a.name == attribute) {
                return Ok(found);
            }
        }
        Err(CriteriaError::IllegalArgument(format!(
            "Attribute '{attribute}' not found on entity '{entity}'"
        )))
    }

    /// Attributes backed by a column on the entity's table, supertypes first.
    pub fn column_attributes(&self, name: &str) -> Result<Vec<&Attribute>> {
        let mut hierarchy = self.hierarchy(name)?;
        hierarchy.reverse();
        Ok(hierarchy
            .into_iter()
            .flat_map(|e| e.attributes.iter())
            .filter(|a| a.column().is_some())
            .collect())
    }

    pub fn is_cte(&self, name: &str) -> bool {
        self.entities.get(name).is_some_and(EntityType::is_cte)
    }

    pub fn subtypes(&self, name: &str) -> Vec<&EntityType> {
        self.entities
            .values()
            .filter(|e| e.supertype.as_deref() == Some(name))
            .collect()
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }
}

impl MetamodelBuilder {
    pub fn entity(mut self, entity: EntityType) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<Metamodel> {
        let mut entities = BTreeMap::new();
        for entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(CriteriaError::Metamodel(format!(
                    "Duplicate entity definition '{}'",
                    entity.name
                )));
            }
            entities.insert(entity.name.clone(), entity);
        }
        let metamodel = Metamodel { entities };

        for entity in metamodel.entities.values() {
            metamodel.validate_hierarchy(entity)?;
            for attribute in &entity.attributes {
                if let Some(target) = attribute.target() {
                    if !metamodel.contains(target) {
                        return Err(CriteriaError::Metamodel(format!(
                            "Attribute '{}.{}' targets unknown entity '{target}'",
                            entity.name, attribute.name
                        )));
                    }
                }
            }
            let id = metamodel.id_attribute(&entity.name).map_err(|_| {
                CriteriaError::Metamodel(format!("Entity '{}' has no id attribute", entity.name))
            })?;
            if id.column().is_none() {
                return Err(CriteriaError::Metamodel(format!(
                    "Id attribute of '{}' must be a column",
                    entity.name
                )));
            }
        }

        let invalid: BTreeSet<String> = metamodel
            .entities
            .values()
            .filter(|e| e.is_cte())
            .flat_map(|cte| {
                metamodel
                    .subtypes(&cte.name)
                    .into_iter()
                    .map(move |sub| format!("{} -> {}", sub.name, cte.name))
            })
            .collect();
        if !invalid.is_empty() {
            return Err(CriteriaError::Metamodel(format!(
                "Found invalid polymorphic CTE entity definitions. CTE entities may not be extended: {}",
                invalid.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        debug!(
            entities = metamodel.entities.len(),
            ctes = metamodel.entities.values().filter(|e| e.is_cte()).count(),
            "metamodel built"
        );
        Ok(metamodel)
    }
}

impl Metamodel {
    fn validate_hierarchy(&self, entity: &EntityType) -> Result<()> {
        let mut seen = BTreeSet::new();
        let mut current = Some(entity);
        while let Some(e) = current {
            if !seen.insert(e.name.as_str()) {
                return Err(CriteriaError::Metamodel(format!(
                    "Cyclic inheritance involving '{}'",
                    entity.name
                )));
            }
            current = match &e.supertype {
                Some(supertype) => Some(self.entities.get(supertype).ok_or_else(|| {
                    CriteriaError::Metamodel(format!(
                        "Entity '{}' extends unknown entity '{supertype}'",
                        e.name
                    ))
                })?),
                None => None,
            };
        }
        Ok(())
    }
}
