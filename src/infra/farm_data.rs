//! In-memory farm dataset loaded from TOML.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    application::repos::{FarmDataRepo, RepoError},
    domain::{
        error::DomainError,
        farm::{FarmDataset, FertilizerApplication},
    },
    infra::error::InfraError,
};

/// Copy-on-write holder: readers clone the `Arc`, writers swap it.
pub struct InMemoryFarmData {
    dataset: RwLock<Arc<FarmDataset>>,
}

impl InMemoryFarmData {
    pub fn new(dataset: FarmDataset) -> Self {
        Self {
            dataset: RwLock::new(Arc::new(dataset)),
        }
    }

    /// Parse and validate a dataset file.
    pub async fn from_toml_file(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let dataset = parse_dataset(path, &raw)?;
        info!(
            target = "furrow::infra::farm_data",
            path = %path.display(),
            farms = dataset.farms.len(),
            fields = dataset.fields.len(),
            applications = dataset.applications.len(),
            "Farm dataset loaded"
        );
        Ok(Self::new(dataset))
    }
}

pub fn parse_dataset(path: &Path, raw: &str) -> Result<FarmDataset, InfraError> {
    let dataset: FarmDataset =
        toml::from_str(raw).map_err(|err| InfraError::dataset(path, err.to_string()))?;
    dataset
        .validate()
        .map_err(|err| InfraError::dataset(path, err.to_string()))?;
    Ok(dataset)
}

#[async_trait]
impl FarmDataRepo for InMemoryFarmData {
    async fn snapshot(&self) -> Result<Arc<FarmDataset>, RepoError> {
        Ok(Arc::clone(&*self.dataset.read().await))
    }

    async fn upsert_application(
        &self,
        application: FertilizerApplication,
    ) -> Result<(), RepoError> {
        let mut guard = self.dataset.write().await;
        if guard.field(&application.field_id).is_none() {
            return Err(DomainError::not_found("field", application.field_id).into());
        }

        let mut next = FarmDataset::clone(&guard);
        match next
            .applications
            .iter_mut()
            .find(|existing| existing.id == application.id)
        {
            Some(existing) => *existing = application.clone(),
            None => next.applications.push(application.clone()),
        }
        *guard = Arc::new(next);

        debug!(
            target = "furrow::infra::farm_data",
            application = %application.id,
            field = %application.field_id,
            "Fertilizer application upserted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    const DATASET: &str = r#"
[timeframe]
start = "2025-01-01"
end = "2025-12-31"

[[farms]]
id = "farm-1"
name = "De Hoeve"

[[fields]]
id = "field-1"
farm_id = "farm-1"
name = "Achterveld"
area_m2 = 50000
crop_code = "wheat"
yield_kg_per_ha = 8000
"#;

    fn application(id: &str, field_id: &str, amount_kg: u64) -> FertilizerApplication {
        FertilizerApplication {
            id: id.to_string(),
            field_id: field_id.to_string(),
            product_id: "can-27".to_string(),
            date: date!(2025 - 05 - 01),
            amount_kg,
        }
    }

    #[test]
    fn parses_toml_dataset() {
        let dataset = parse_dataset(Path::new("farm.toml"), DATASET).unwrap();
        assert_eq!(dataset.fields[0].area_m2, 50_000);
        assert_eq!(dataset.timeframe.start, date!(2025 - 01 - 01));
        assert!(dataset.applications.is_empty());
    }

    #[test]
    fn invalid_dataset_names_the_file() {
        let broken = DATASET.replace("farm_id = \"farm-1\"", "farm_id = \"farm-2\"");
        let err = parse_dataset(Path::new("farm.toml"), &broken).unwrap_err();
        assert!(err.to_string().contains("farm.toml"), "{err}");
    }

    #[tokio::test]
    async fn upsert_replaces_by_id_and_keeps_old_snapshots() {
        let repo = InMemoryFarmData::new(parse_dataset(Path::new("farm.toml"), DATASET).unwrap());
        repo.upsert_application(application("app-1", "field-1", 100))
            .await
            .unwrap();
        let before = repo.snapshot().await.unwrap();

        repo.upsert_application(application("app-1", "field-1", 250))
            .await
            .unwrap();
        let after = repo.snapshot().await.unwrap();

        assert_eq!(before.applications[0].amount_kg, 100);
        assert_eq!(after.applications.len(), 1);
        assert_eq!(after.applications[0].amount_kg, 250);
    }

    #[tokio::test]
    async fn upsert_rejects_unknown_fields() {
        let repo = InMemoryFarmData::new(parse_dataset(Path::new("farm.toml"), DATASET).unwrap());
        let err = repo
            .upsert_application(application("app-1", "field-9", 100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepoError::Domain(DomainError::NotFound { entity: "field", .. })
        ));
    }
}
