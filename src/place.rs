//! Place tree (spec §3, §4.B): the hierarchy of memory/compute places that
//! gives work stealing its only notion of locality. Each place owns one
//! deque-stealer per resident worker; a worker whose own place has nothing
//! left to steal escalates to the parent place and tries its siblings.

use std::sync::{Arc, Mutex, Weak};

use crate::deque::BoundedDeque;
use crate::errors::Result;
use crate::task::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceKind {
    Memory,
    Cache,
    NumaNode,
    Compute,
}

pub struct Place {
    pub id: usize,
    pub kind: PlaceKind,
    /// Ids of the workers resident at this place, in ascending order. The
    /// deque for worker `w` lives in `Worker::deque`; the place only needs
    /// to know which worker ids are "local" to it for the steal domain.
    pub worker_ids: Vec<usize>,
    /// Set once, after every place in the tree has been allocated (parent
    /// `Arc`s must exist before a child can point back at them).
    parent: Mutex<Option<Weak<Place>>>,
    pub children: Vec<Arc<Place>>,
}

impl Place {
    pub fn parent(&self) -> Option<Arc<Place>> {
        self.parent.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn set_parent(&self, parent: &Arc<Place>) {
        *self.parent.lock().unwrap() = Some(Arc::downgrade(parent));
    }

    fn leaf(id: usize, worker_ids: Vec<usize>) -> Arc<Place> {
        Arc::new(Place {
            id,
            kind: PlaceKind::Compute,
            worker_ids,
            parent: Mutex::new(None),
            children: Vec::new(),
        })
    }

    /// A single-level root place owning every worker (the default when no
    /// `CRT_HPT_FILE` hierarchy is supplied).
    pub fn single_level(num_workers: usize) -> Arc<Place> {
        Place::leaf(0, (0..num_workers).collect())
    }
}

/// One line per place: `id,kind,parent_id,worker_ids` where `worker_ids` is
/// a `;`-separated list and `parent_id` of `-1` marks the root. This is
/// intentionally minimal: spec.md's Non-goals exclude general-purpose HPT
/// file parsing, only the semantic outputs (ids, kinds, parent/child,
/// worker membership) matter.
pub fn load_hierarchy(path: &std::path::Path) -> Result<Arc<Place>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| err_format!("cannot read hierarchy file {:?}: {}", path, e))?;

    let mut nodes: Vec<(usize, PlaceKind, i64, Vec<usize>)> = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 4 {
            return Err(err_format!(
                "hierarchy file {:?}: malformed line {}: {:?}",
                path,
                lineno + 1,
                line
            ));
        }
        let id: usize = parts[0]
            .trim()
            .parse()
            .map_err(|_| err_format!("hierarchy file {:?}: bad id on line {}", path, lineno + 1))?;
        let kind = match parts[1].trim() {
            "memory" => PlaceKind::Memory,
            "cache" => PlaceKind::Cache,
            "numa" => PlaceKind::NumaNode,
            "compute" => PlaceKind::Compute,
            other => {
                return Err(err_format!(
                    "hierarchy file {:?}: unknown place kind {:?} on line {}",
                    path,
                    other,
                    lineno + 1
                ))
            }
        };
        let parent_id: i64 = parts[2]
            .trim()
            .parse()
            .map_err(|_| err_format!("hierarchy file {:?}: bad parent id on line {}", path, lineno + 1))?;
        let worker_ids = if parts[3].trim().is_empty() {
            Vec::new()
        } else {
            parts[3]
                .trim()
                .split(';')
                .map(|s| s.trim().parse::<usize>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| {
                    err_format!("hierarchy file {:?}: bad worker id list on line {}", path, lineno + 1)
                })?
        };
        nodes.push((id, kind, parent_id, worker_ids));
    }

    if nodes.is_empty() {
        return Err(err_format!("hierarchy file {:?}: no places defined", path));
    }

    build_tree(nodes).ok_or_else(|| err_format!("hierarchy file {:?}: no root place (parent_id -1)", path))
}

fn build_tree(nodes: Vec<(usize, PlaceKind, i64, Vec<usize>)>) -> Option<Arc<Place>> {
    use std::collections::HashMap;

    let mut built: HashMap<usize, Arc<Place>> = HashMap::new();
    let mut children_of: HashMap<i64, Vec<usize>> = HashMap::new();

    for (id, _, parent_id, _) in &nodes {
        children_of.entry(*parent_id).or_default().push(*id);
    }

    let by_id: HashMap<usize, &(usize, PlaceKind, i64, Vec<usize>)> =
        nodes.iter().map(|n| (n.0, n)).collect();

    fn construct(
        id: usize,
        by_id: &std::collections::HashMap<usize, &(usize, PlaceKind, i64, Vec<usize>)>,
        children_of: &std::collections::HashMap<i64, Vec<usize>>,
        built: &mut std::collections::HashMap<usize, Arc<Place>>,
    ) -> Arc<Place> {
        if let Some(p) = built.get(&id) {
            return p.clone();
        }
        let (_, kind, _, worker_ids) = by_id[&id];
        let children: Vec<Arc<Place>> = children_of
            .get(&(id as i64))
            .into_iter()
            .flatten()
            .map(|&cid| construct(cid, by_id, children_of, built))
            .collect();

        let place = Arc::new(Place {
            id,
            kind: *kind,
            worker_ids: worker_ids.clone(),
            parent: Mutex::new(None),
            children,
        });
        for child in &place.children {
            child.set_parent(&place);
        }
        built.insert(id, place.clone());
        place
    }

    let root_id = nodes.iter().find(|n| n.2 == -1)?.0;
    Some(construct(root_id, &by_id, &children_of, &mut built))
}

/// Rotates `ids` (ascending) so it starts at the element right after
/// `self_id` and wraps around, excluding `self_id` itself -- the
/// "`(self + 1) mod N`" tie-break from spec.md §4.A, with `N` scoped to
/// this one place's worker set.
fn rotate_from(ids: &[usize], self_id: usize) -> Vec<usize> {
    let n = ids.len();
    let start = ids.iter().position(|&w| w == self_id).map(|p| p + 1).unwrap_or(0);
    (0..n).map(|i| ids[(start + i) % n]).filter(|&w| w != self_id).collect()
}

/// Per-worker view into its place's steal domain: siblings at this place
/// first (in `(self + 1) mod N` order), then -- only once the local place
/// is exhausted -- the same rotation over each ancestor place in turn.
pub fn steal_domain(place: &Arc<Place>, self_id: usize) -> Vec<usize> {
    let mut domain = rotate_from(&place.worker_ids, self_id);
    let mut cur = place.parent();
    while let Some(p) = cur {
        domain.extend(rotate_from(&p.worker_ids, self_id));
        cur = p.parent();
    }
    domain
}

// `BoundedDeque`/`Job` are only referenced here to document the intended
// shape of `Place`-resident deques; the actual ownership lives on
// `Worker` (see worker.rs) to keep the steal path monomorphic.
#[allow(dead_code)]
type _PlaceDeque = BoundedDeque<Job>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_owns_every_worker() {
        let root = Place::single_level(4);
        assert_eq!(root.worker_ids, vec![0, 1, 2, 3]);
        assert!(root.children.is_empty());
    }
}
