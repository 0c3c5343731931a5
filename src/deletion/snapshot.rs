use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{Attributes, Record, RecordId, RecordKey, Schema};


/// One row in a captured sub-graph.
///
/// Owned nodes carry the full attribute set and are recreated on undo. Reference
/// nodes carry identity only and are existence-checked, never recreated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    #[serde(rename = "model")]
    pub model_name: String,
    #[serde(rename = "id")]
    pub primary_key: RecordId,
    #[serde(rename = "reference", default)]
    pub is_reference: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    #[serde(default)]
    pub children: BTreeMap<String, Vec<SnapshotNode>>,
}

impl SnapshotNode {
    pub fn owned(record: &Record) -> Self {
        Self {
            model_name: record.model.clone(),
            primary_key: record.id,
            is_reference: false,
            attributes: Some(record.attributes.clone()),
            children: BTreeMap::new(),
        }
    }

    pub fn reference(key: &RecordKey) -> Self {
        Self {
            model_name: key.model.clone(),
            primary_key: key.id,
            is_reference: true,
            attributes: None,
            children: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.model_name.clone(), self.primary_key)
    }

    /// The row this node recreates, if it is an owned node.
    pub fn to_record(&self) -> Option<Record> {
        if self.is_reference {
            return None;
        }
        self.attributes.as_ref().map(|attributes| Record {
            model: self.model_name.clone(),
            id: self.primary_key,
            attributes: attributes.clone(),
        })
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .values()
            .flatten()
            .map(SnapshotNode::node_count)
            .sum::<usize>()
    }

    pub fn owned_count(&self) -> usize {
        let own = usize::from(!self.is_reference);
        own + self
            .children
            .values()
            .flatten()
            .map(SnapshotNode::owned_count)
            .sum::<usize>()
    }
}


#[derive(Debug, Clone)]
pub struct Visit<'a> {
    pub path: String,
    pub node: &'a SnapshotNode,
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalError {
    pub path: String,
    pub reason: String,
}


/// Canonical pre-order: a node, then its associations in the order the model
/// declares them, each list front to back.
pub fn preorder<'a>(schema: &Schema, root: &'a SnapshotNode) -> Result<Vec<Visit<'a>>, TraversalError> {
    walk(schema, root).map(|(visits, _)| visits)
}

/// The order restore inserts in; delete removes in reverse.
///
/// Pre-order, except that an owned row waits until every other owned row of
/// the same snapshot its foreign keys point at has been placed. Parents still
/// precede their children. Declared association order only breaks ties.
pub fn replay_order<'a>(schema: &Schema, root: &'a SnapshotNode) -> Result<Vec<Visit<'a>>, TraversalError> {
    let (visits, parents) = walk(schema, root)?;

    let owned: HashMap<RecordKey, usize> = visits
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.node.is_reference)
        .map(|(idx, v)| (v.node.key(), idx))
        .collect();
    let foreign_keys = schema.foreign_keys();

    let mut pending = vec![0usize; visits.len()];
    let mut unlocks: Vec<Vec<usize>> = vec![Vec::new(); visits.len()];
    for (idx, v) in visits.iter().enumerate() {
        let mut needs: BTreeSet<usize> = parents[idx].into_iter().collect();

        if let Some(attributes) = v.node.attributes.as_ref().filter(|_| !v.node.is_reference) {
            for fk in foreign_keys.iter().filter(|fk| fk.table == v.node.model_name) {
                let Some(id) = attributes.get(&fk.column).and_then(Value::as_i64) else {
                    continue;
                };
                if let Some(&target) = owned.get(&RecordKey::new(fk.references.clone(), id)) {
                    if target != idx {
                        needs.insert(target);
                    }
                }
            }
        }

        pending[idx] = needs.len();
        for need in needs {
            unlocks[need].push(idx);
        }
    }

    let mut ready: BTreeSet<usize> = (0..visits.len()).filter(|&idx| pending[idx] == 0).collect();
    let mut order = Vec::with_capacity(visits.len());
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &next in &unlocks[idx] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < visits.len() {
        let stuck = pending.iter().position(|&n| n > 0).unwrap_or(0);
        return Err(TraversalError {
            path: visits[stuck].path.clone(),
            reason: "foreign keys between captured rows form a cycle".to_string(),
        });
    }

    let mut slots: Vec<Option<Visit<'a>>> = visits.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|idx| slots[idx].take()).collect())
}

/// Pre-order visits plus, for each, the index of its parent visit.
fn walk<'a>(
    schema: &Schema,
    root: &'a SnapshotNode,
) -> Result<(Vec<Visit<'a>>, Vec<Option<usize>>), TraversalError> {
    let mut visits = Vec::with_capacity(root.node_count());
    let mut parents = Vec::with_capacity(root.node_count());
    visit(schema, root, root.key().to_string(), None, &mut visits, &mut parents)?;
    Ok((visits, parents))
}

fn visit<'a>(
    schema: &Schema,
    node: &'a SnapshotNode,
    path: String,
    parent: Option<usize>,
    out: &mut Vec<Visit<'a>>,
    parents: &mut Vec<Option<usize>>,
) -> Result<(), TraversalError> {
    let here = out.len();
    out.push(Visit {
        path: path.clone(),
        node,
    });
    parents.push(parent);

    if node.children.is_empty() {
        return Ok(());
    }

    let model = schema.model(&node.model_name).ok_or_else(|| TraversalError {
        path: path.clone(),
        reason: format!("model {} is not declared", node.model_name),
    })?;

    if let Some(unknown) = node
        .children
        .keys()
        .find(|name| model.association(name).is_none())
    {
        return Err(TraversalError {
            path,
            reason: format!("{} declares no association {}", model.name, unknown),
        });
    }

    for assoc in &model.associations {
        let Some(children) = node.children.get(&assoc.name) else {
            continue;
        };
        for child in children {
            let child_path = format!("{}/{}/{}", path, assoc.name, child.key());
            visit(schema, child, child_path, Some(here), out, parents)?;
        }
    }

    Ok(())
}
