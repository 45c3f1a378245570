use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::domain::{ids::EntityId, kind::CalculationKind};

/// Identity of one load. Later loads of the same slot get larger values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Latest generation per `(kind, entity)` cache slot.
#[derive(Debug, Default)]
pub struct NavigationTracker {
    next: AtomicU64,
    current: DashMap<(CalculationKind, EntityId), u64>,
}

impl NavigationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a load for the slot, superseding every earlier one.
    pub fn begin(&self, kind: CalculationKind, entity: &EntityId) -> Generation {
        let generation = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        self.current.insert((kind, entity.clone()), generation);
        Generation(generation)
    }

    pub fn is_current(&self, kind: CalculationKind, entity: &EntityId, generation: Generation) -> bool {
        self.current
            .get(&(kind, entity.clone()))
            .is_some_and(|latest| *latest == generation.0)
    }
}
