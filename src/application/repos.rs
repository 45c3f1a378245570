//! Repository traits describing data adapters.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    error::DomainError,
    farm::{FarmDataset, FertilizerApplication},
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Source of the facts calculation engines collect from.
#[async_trait]
pub trait FarmDataRepo: Send + Sync {
    /// Consistent view of the whole dataset.
    async fn snapshot(&self) -> Result<Arc<FarmDataset>, RepoError>;

    /// Insert or replace an application, keyed by its id.
    async fn upsert_application(
        &self,
        application: FertilizerApplication,
    ) -> Result<(), RepoError>;
}
