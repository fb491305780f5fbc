//! Identifier model: the scanned domain, its valid window, and striping of
//! an identifier set across workers.

pub mod codec;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};
use crate::store::Hole;

/// A point in the scanned identifier space.
pub type Identifier = i64;

/// Inclusive window of identifiers whose present payloads are expected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierRange {
    pub min: Identifier,
    /// `None` leaves the window open-ended.
    pub max: Option<Identifier>,
}

impl Default for IdentifierRange {
    fn default() -> Self {
        Self { min: 1, max: None }
    }
}

impl IdentifierRange {
    pub fn new(min: Identifier, max: Option<Identifier>) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, id: Identifier) -> bool {
        id >= self.min && self.max.is_none_or(|max| id <= max)
    }
}

/// The identifiers a scan will visit, in visiting order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentifierSet {
    /// Half-open implicit range `[start, end)`. Never materialised.
    Range { start: Identifier, end: Identifier },
    /// Explicit identifiers, visited in the given order.
    List(Vec<Identifier>),
}

impl IdentifierSet {
    pub fn range(start: Identifier, end: Identifier) -> Self {
        Self::Range { start, end }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Range { start, end } => {
                usize::try_from(end.saturating_sub(*start)).unwrap_or(0)
            }
            Self::List(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every identifier already present in `checked`, keeping order.
    pub fn without(&self, checked: &BTreeSet<Identifier>) -> Self {
        let remaining = match self {
            Self::Range { start, end } => (*start..*end)
                .filter(|id| !checked.contains(id))
                .collect(),
            Self::List(ids) => ids
                .iter()
                .copied()
                .filter(|id| !checked.contains(id))
                .collect(),
        };
        Self::List(remaining)
    }

    /// Interior identifiers of every hole, in the order the holes are given.
    pub fn from_holes(holes: &[Hole]) -> Self {
        Self::List(
            holes
                .iter()
                .flat_map(|hole| (hole.start + 1)..hole.end)
                .collect(),
        )
    }

    /// Stripe the set across `workers`: position `p` goes to worker
    /// `p % workers`.
    pub fn partition(&self, workers: usize) -> Result<Vec<Partition>> {
        if workers == 0 {
            return Err(ScanError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }

        let source = match self {
            Self::Range { start, end } => Source::Range {
                start: *start,
                end: *end,
            },
            Self::List(ids) => Source::List(Arc::from(ids.as_slice())),
        };

        Ok((0..workers)
            .map(|worker| Partition {
                worker,
                stride: workers,
                position: 0,
                source: source.clone(),
            })
            .collect())
    }
}

#[derive(Clone, Debug)]
enum Source {
    Range { start: Identifier, end: Identifier },
    List(Arc<[Identifier]>),
}

/// Lazy, one-shot view over one worker's stripe.
#[derive(Clone, Debug)]
pub struct Partition {
    worker: usize,
    stride: usize,
    position: usize,
    source: Source,
}

impl Partition {
    pub fn worker(&self) -> usize {
        self.worker
    }

    fn global_index(&self) -> Option<usize> {
        self.position
            .checked_mul(self.stride)?
            .checked_add(self.worker)
    }
}

impl Iterator for Partition {
    type Item = Identifier;

    fn next(&mut self) -> Option<Identifier> {
        let index = self.global_index()?;
        let id = match &self.source {
            Source::Range { start, end } => {
                let id = start.checked_add(i64::try_from(index).ok()?)?;
                (id < *end).then_some(id)?
            }
            Source::List(ids) => *ids.get(index)?,
        };
        self.position += 1;
        Some(id)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let total = match &self.source {
            Source::Range { start, end } => {
                usize::try_from(end.saturating_sub(*start)).unwrap_or(0)
            }
            Source::List(ids) => ids.len(),
        };
        let consumed = self.global_index().unwrap_or(usize::MAX);
        let remaining = if consumed >= total {
            0
        } else {
            (total - consumed).div_ceil(self.stride)
        };
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(set: &IdentifierSet, workers: usize) -> Vec<Vec<Identifier>> {
        set.partition(workers)
            .expect("partition")
            .into_iter()
            .map(Iterator::collect)
            .collect()
    }

    #[test]
    fn partitions_are_disjoint_and_cover_the_list() {
        let ids: Vec<Identifier> = vec![40, 3, 17, 99, 5, 8, 61, 2, 11, 70];
        let set = IdentifierSet::List(ids.clone());

        for workers in 1..=12 {
            let parts = collect(&set, workers);
            assert_eq!(parts.len(), workers);

            let mut seen = BTreeSet::new();
            for part in &parts {
                for id in part {
                    assert!(seen.insert(*id), "{id} assigned twice");
                }
            }
            let expected: BTreeSet<_> = ids.iter().copied().collect();
            assert_eq!(seen, expected);
        }
    }

    #[test]
    fn list_position_maps_to_worker_modulo() {
        let set = IdentifierSet::List(vec![10, 11, 12, 13, 14, 15, 16]);
        let parts = collect(&set, 3);
        assert_eq!(parts[0], vec![10, 13, 16]);
        assert_eq!(parts[1], vec![11, 14]);
        assert_eq!(parts[2], vec![12, 15]);
    }

    #[test]
    fn implicit_range_stripes_without_materialising() {
        let set = IdentifierSet::range(5, 12);
        let parts = collect(&set, 2);
        assert_eq!(parts[0], vec![5, 7, 9, 11]);
        assert_eq!(parts[1], vec![6, 8, 10]);

        let partition = set.partition(2).expect("partition").remove(1);
        assert_eq!(partition.size_hint(), (3, Some(3)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = IdentifierSet::range(0, 3).partition(0).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
    }

    #[test]
    fn resume_and_hole_sets() {
        let checked: BTreeSet<Identifier> = [1, 2, 5].into_iter().collect();
        assert_eq!(
            IdentifierSet::range(0, 7).without(&checked),
            IdentifierSet::List(vec![0, 3, 4, 6])
        );

        let holes = [
            Hole { start: 2, end: 5, size: 3 },
            Hole { start: 6, end: 10, size: 4 },
        ];
        assert_eq!(
            IdentifierSet::from_holes(&holes),
            IdentifierSet::List(vec![3, 4, 7, 8, 9])
        );
    }

    #[test]
    fn range_membership() {
        let bounded = IdentifierRange::new(0, Some(9));
        assert!(bounded.contains(0));
        assert!(bounded.contains(9));
        assert!(!bounded.contains(10));
        assert!(!bounded.contains(-1));

        let open = IdentifierRange::default();
        assert!(open.contains(i64::MAX));
        assert!(!open.contains(0));
    }
}
