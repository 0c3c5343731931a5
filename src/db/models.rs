use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;


pub type RecordId = i64;

pub type Attributes = serde_json::Map<String, Value>;


/// Identity of one row: model name plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub model: String,
    pub id: RecordId,
}

impl RecordKey {
    pub fn new(model: impl Into<String>, id: RecordId) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.model, self.id)
    }
}


/// A row as the store hands it out. The primary key lives in `id` and is never
/// repeated inside `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub model: String,
    pub id: RecordId,
    pub attributes: Attributes,
}

impl Record {
    pub fn new(model: impl Into<String>, id: RecordId, attributes: Value) -> Self {
        let attributes = match attributes {
            Value::Object(mut map) => {
                map.remove("id");
                map
            }
            _ => Attributes::new(),
        };
        Self {
            model: model.into(),
            id,
            attributes,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.model.clone(), self.id)
    }

    /// Integer value of a foreign-key style column; `None` for null or absent.
    pub fn id_column(&self, column: &str) -> Option<RecordId> {
        self.attributes.get(column).and_then(Value::as_i64)
    }

    pub fn text_column(&self, column: &str) -> Option<&str> {
        self.attributes.get(column).and_then(Value::as_str)
    }
}


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// Rows of the target whose `foreign_key` points at this row. Destroyed and
    /// restored together with this row.
    Owned,
    /// The target row this row's `foreign_key` points at. Shared data: only its
    /// identity is captured.
    Reference,
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationDef {
    pub name: String,
    pub target: String,
    pub foreign_key: String,
    pub kind: AssociationKind,
}


/// A foreign-key constraint: `table.column` holds ids of `references`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    pub table: String,
    pub column: String,
    pub references: String,
}

impl ForeignKeyDef {
    pub fn relation(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }
}


#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDef {
    pub name: String,
    pub is_reference: bool,
    pub label_column: Option<String>,
    pub associations: Vec<AssociationDef>,
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl ModelDef {
    /// A model whose rows belong to some owner and are deleted with it.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_reference: false,
            label_column: None,
            associations: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Shared/master data. Never captured by value, never recreated.
    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            is_reference: true,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn label(mut self, column: impl Into<String>) -> Self {
        self.label_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn owns(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.associations.push(AssociationDef {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            kind: AssociationKind::Owned,
        });
        self
    }

    #[must_use]
    pub fn references(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.associations.push(AssociationDef {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            kind: AssociationKind::Reference,
        });
        self
    }

    /// A plain constraint that is neither ownership nor a captured reference,
    /// e.g. a sibling pointer inside the same owned sub-graph.
    #[must_use]
    pub fn foreign_key(mut self, column: impl Into<String>, references: impl Into<String>) -> Self {
        let table = self.name.clone();
        self.foreign_keys.push(ForeignKeyDef {
            table,
            column: column.into(),
            references: references.into(),
        });
        self
    }

    pub fn association(&self, name: &str) -> Option<(usize, &AssociationDef)> {
        self.associations
            .iter()
            .enumerate()
            .find(|(_, assoc)| assoc.name == name)
    }

    pub fn owned_associations(&self) -> impl Iterator<Item = &AssociationDef> {
        self.associations
            .iter()
            .filter(|assoc| assoc.kind == AssociationKind::Owned)
    }
}


/// Per-model metadata: which associations are owned and which are references.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: BTreeMap<String, ModelDef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_model(mut self, model: ModelDef) -> Self {
        self.register(model);
        self
    }

    pub fn register(&mut self, model: ModelDef) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models.get(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    pub fn is_reference(&self, name: &str) -> bool {
        self.models.get(name).is_some_and(|m| m.is_reference)
    }

    /// Every FK constraint implied by the declarations, deduplicated.
    pub fn foreign_keys(&self) -> Vec<ForeignKeyDef> {
        let mut keys: Vec<ForeignKeyDef> = Vec::new();

        for model in self.models.values() {
            for assoc in &model.associations {
                let key = match assoc.kind {
                    AssociationKind::Owned => ForeignKeyDef {
                        table: assoc.target.clone(),
                        column: assoc.foreign_key.clone(),
                        references: model.name.clone(),
                    },
                    AssociationKind::Reference => ForeignKeyDef {
                        table: model.name.clone(),
                        column: assoc.foreign_key.clone(),
                        references: assoc.target.clone(),
                    },
                };
                keys.push(key);
            }
            keys.extend(model.foreign_keys.iter().cloned());
        }

        keys.sort();
        keys.dedup();
        keys
    }

    /// Human label for a row: its label column when declared and present,
    /// otherwise `Model #id`.
    pub fn label_for(&self, record: &Record) -> String {
        self.model(&record.model)
            .and_then(|m| m.label_column.as_deref())
            .and_then(|column| record.text_column(column))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} #{}", record.model, record.id))
    }
}
