//! Scriptable engine for protocol tests.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::{
    cache::CalculationInput,
    domain::{ids::EntityId, kind::CalculationKind},
};

use super::{CalculationEngine, CalculationError};

#[derive(Debug, Clone, Serialize)]
pub(crate) struct StubInput {
    pub entity: EntityId,
    pub revision: u64,
}

impl CalculationInput for StubInput {
    const KIND: CalculationKind = CalculationKind::NitrogenBalance;
    const SCHEMA_VERSION: u32 = 1;
}

/// Output is `revision * 10`; `revision` models the underlying data.
#[derive(Default)]
pub(crate) struct StubEngine {
    pub revision: AtomicU64,
    pub collects: AtomicUsize,
    pub computes: AtomicUsize,
    pub fail: AtomicBool,
    /// When set, each compute waits for one permit.
    pub gate: Option<Arc<Semaphore>>,
}

impl StubEngine {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }

    pub fn collects(&self) -> usize {
        self.collects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalculationEngine for StubEngine {
    type Input = StubInput;
    type Output = u64;

    async fn collect_input(&self, entity: &EntityId) -> Result<StubInput, CalculationError> {
        self.collects.fetch_add(1, Ordering::SeqCst);
        Ok(StubInput {
            entity: entity.clone(),
            revision: self.revision.load(Ordering::SeqCst),
        })
    }

    async fn compute(&self, input: &StubInput) -> Result<u64, CalculationError> {
        self.computes.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| CalculationError::unavailable("gate closed"))?;
            permit.forget();
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CalculationError::missing_parameter("crop yield"));
        }
        Ok(input.revision * 10)
    }
}
