use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use super::snapshot::{replay_order, SnapshotNode};
use crate::core::error::{Result, UndoError};
use crate::db::{AssociationKind, Record, RecordKey, Schema, UndoStorage};


/// Position of a placed node: one `(association index, list index)` step per
/// level below the root. Ordering these paths is ordering the pre-order walk.
type TreePath = Vec<(usize, usize)>;


#[derive(Debug, Clone, Copy)]
struct Edge {
    parent: usize,
    assoc: usize,
}


#[derive(Debug)]
struct Discovered {
    key: RecordKey,
    record: Option<Record>,
    path: String,
    parents: Vec<Edge>,
}

impl Discovered {
    fn is_reference(&self) -> bool {
        self.record.is_none()
    }
}


/// Walks a record's declared associations into a snapshot tree.
///
/// Owned rows are captured by value, shared rows by identity. Every row shows
/// up once even when several owners reach it; it is attached through whichever
/// owning association puts it last in the pre-order walk, so restore sees every
/// owner first and delete removes it before any of them.
pub struct SnapshotCapture<S: UndoStorage> {
    storage: Arc<S>,
    schema: Arc<Schema>,
}

impl<S: UndoStorage> SnapshotCapture<S> {
    pub fn new(storage: Arc<S>, schema: Arc<Schema>) -> Self {
        Self { storage, schema }
    }

    pub async fn capture(&self, tx: &mut S::Tx, record: &Record) -> Result<SnapshotNode> {
        let nodes = self.discover(tx, record).await?;
        let placement = place(&nodes)?;
        let root = materialize(&self.schema, &nodes, &placement, 0);
        replay_order(&self.schema, &root).map_err(|e| UndoError::capture(e.path, e.reason))?;

        debug!(
            "Captured {} with {} nodes ({} owned)",
            nodes[0].key,
            root.node_count(),
            root.owned_count()
        );
        Ok(root)
    }

    /// Breadth-first walk over declared associations, one entry per distinct
    /// row, recording every edge that reaches it.
    async fn discover(&self, tx: &mut S::Tx, root: &Record) -> Result<Vec<Discovered>> {
        let root_key = root.key();
        if self.schema.model(&root.model).is_none() {
            return Err(UndoError::capture(
                root_key.to_string(),
                format!("model {} is not declared", root.model),
            ));
        }

        let mut nodes = vec![Discovered {
            key: root_key.clone(),
            record: Some(root.clone()),
            path: root_key.to_string(),
            parents: Vec::new(),
        }];
        let mut index: HashMap<RecordKey, usize> = HashMap::from([(root_key, 0)]);
        let mut queue = VecDeque::from([0usize]);

        while let Some(current) = queue.pop_front() {
            let Some(record) = nodes[current].record.clone() else {
                continue;
            };
            let model = self.schema.model(&record.model).ok_or_else(|| {
                UndoError::capture(
                    nodes[current].path.clone(),
                    format!("model {} is not declared", record.model),
                )
            })?;

            for (assoc_idx, assoc) in model.associations.iter().enumerate() {
                let assoc_path = format!("{}/{}", nodes[current].path, assoc.name);
                let target = self.schema.model(&assoc.target).ok_or_else(|| {
                    UndoError::capture(
                        assoc_path.clone(),
                        format!("association targets undeclared model {}", assoc.target),
                    )
                })?;

                match assoc.kind {
                    AssociationKind::Owned => {
                        if target.is_reference {
                            return Err(UndoError::capture(
                                assoc_path,
                                format!("owned association targets shared model {}", target.name),
                            ));
                        }

                        let rows = self
                            .storage
                            .find_records_by(tx, &assoc.target, &assoc.foreign_key, record.id)
                            .await?;

                        for row in rows {
                            let key = row.key();
                            let child = match index.get(&key) {
                                Some(&seen) => {
                                    if nodes[seen].is_reference() {
                                        return Err(kind_conflict(&assoc_path, &key));
                                    }
                                    debug!("{} reached again via {}", key, assoc_path);
                                    seen
                                }
                                None => {
                                    let idx = nodes.len();
                                    nodes.push(Discovered {
                                        path: format!("{}/{}", assoc_path, key),
                                        key: key.clone(),
                                        record: Some(row),
                                        parents: Vec::new(),
                                    });
                                    index.insert(key, idx);
                                    queue.push_back(idx);
                                    idx
                                }
                            };
                            nodes[child].parents.push(Edge {
                                parent: current,
                                assoc: assoc_idx,
                            });
                        }
                    }
                    AssociationKind::Reference => {
                        if !target.is_reference {
                            return Err(UndoError::capture(
                                assoc_path,
                                format!("reference association targets owned model {}", target.name),
                            ));
                        }

                        let Some(target_id) = record.id_column(&assoc.foreign_key) else {
                            continue;
                        };
                        let key = RecordKey::new(assoc.target.clone(), target_id);

                        let child = match index.get(&key) {
                            Some(&seen) => {
                                if !nodes[seen].is_reference() {
                                    return Err(kind_conflict(&assoc_path, &key));
                                }
                                seen
                            }
                            None => {
                                if self.storage.find_record(tx, &key).await?.is_none() {
                                    warn!("Dangling reference {} at {}", key, assoc_path);
                                    return Err(UndoError::capture(
                                        format!("{}/{}", assoc_path, key),
                                        format!("referenced record {} does not exist", key),
                                    ));
                                }
                                let idx = nodes.len();
                                nodes.push(Discovered {
                                    path: format!("{}/{}", assoc_path, key),
                                    key: key.clone(),
                                    record: None,
                                    parents: Vec::new(),
                                });
                                index.insert(key, idx);
                                idx
                            }
                        };
                        nodes[child].parents.push(Edge {
                            parent: current,
                            assoc: assoc_idx,
                        });
                    }
                }
            }
        }

        Ok(nodes)
    }
}

fn kind_conflict(path: &str, key: &RecordKey) -> UndoError {
    UndoError::capture(
        format!("{}/{}", path, key),
        format!("{} is reached both as owned and as shared data", key),
    )
}


#[derive(Debug, Default)]
struct Placement {
    paths: Vec<Option<TreePath>>,
    /// Per node, the `(association index, child)` pairs in attach order.
    children: Vec<Vec<(usize, usize)>>,
    list_len: HashMap<(usize, usize), usize>,
}

impl Placement {
    fn new(len: usize) -> Self {
        Self {
            paths: vec![None; len],
            children: vec![Vec::new(); len],
            list_len: HashMap::new(),
        }
    }

    /// The edge that would put `node` latest in pre-order, with the path it
    /// would get.
    fn latest_slot(&self, node: &Discovered) -> Option<(Edge, TreePath)> {
        node.parents
            .iter()
            .filter_map(|edge| {
                let parent_path = self.paths[edge.parent].as_ref()?;
                let slot = self.list_len.get(&(edge.parent, edge.assoc)).copied().unwrap_or(0);
                let mut path = parent_path.clone();
                path.push((edge.assoc, slot));
                Some((*edge, path))
            })
            .max_by(|a, b| a.1.cmp(&b.1))
    }

    fn attach(&mut self, child: usize, edge: Edge, path: TreePath) {
        *self.list_len.entry((edge.parent, edge.assoc)).or_insert(0) += 1;
        self.children[edge.parent].push((edge.assoc, child));
        self.paths[child] = Some(path);
    }
}

/// Topological placement of owned rows (an owner is always placed before what
/// it owns), then reference leaves.
fn place(nodes: &[Discovered]) -> Result<Placement> {
    if !nodes[0].parents.is_empty() {
        return Err(UndoError::capture(
            nodes[0].path.clone(),
            "ownership cycle leads back to the deleted record",
        ));
    }

    let mut placement = Placement::new(nodes.len());
    placement.paths[0] = Some(TreePath::new());

    let mut pending: Vec<usize> = nodes.iter().map(|n| n.parents.len()).collect();
    let mut owned_edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (idx, node) in nodes.iter().enumerate() {
        if node.is_reference() {
            continue;
        }
        for edge in &node.parents {
            owned_edges[edge.parent].push(idx);
        }
    }

    let mut ready: BTreeSet<usize> = BTreeSet::from([0]);
    let mut placed = 0usize;

    while let Some(current) = ready.pop_first() {
        if current != 0 {
            let (edge, path) = placement.latest_slot(&nodes[current]).ok_or_else(|| {
                UndoError::capture(nodes[current].path.clone(), "no placed owner")
            })?;
            placement.attach(current, edge, path);
        }
        placed += 1;

        for &child in &owned_edges[current] {
            pending[child] -= 1;
            if pending[child] == 0 {
                ready.insert(child);
            }
        }
    }

    let owned_total = nodes.iter().filter(|n| !n.is_reference()).count();
    if placed < owned_total {
        let stuck = nodes
            .iter()
            .enumerate()
            .find(|(idx, node)| !node.is_reference() && placement.paths[*idx].is_none())
            .map(|(_, node)| node.path.clone())
            .unwrap_or_default();
        return Err(UndoError::capture(stuck, "ownership cycle between owned rows"));
    }

    for (idx, node) in nodes.iter().enumerate().filter(|(_, n)| n.is_reference()) {
        let (edge, path) = placement
            .latest_slot(node)
            .ok_or_else(|| UndoError::capture(node.path.clone(), "no placed owner"))?;
        placement.attach(idx, edge, path);
    }

    Ok(placement)
}

fn materialize(schema: &Schema, nodes: &[Discovered], placement: &Placement, idx: usize) -> SnapshotNode {
    let node = &nodes[idx];
    let mut snapshot = match &node.record {
        Some(record) => SnapshotNode::owned(record),
        None => SnapshotNode::reference(&node.key),
    };

    if let Some(model) = schema.model(&node.key.model) {
        let mut children: BTreeMap<String, Vec<SnapshotNode>> = BTreeMap::new();
        for &(assoc_idx, child) in &placement.children[idx] {
            let name = model.associations[assoc_idx].name.clone();
            children
                .entry(name)
                .or_default()
                .push(materialize(schema, nodes, placement, child));
        }
        snapshot.children = children;
    }

    snapshot
}
