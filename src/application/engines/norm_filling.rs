use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    application::{
        calculation::{CalculationEngine, CalculationError},
        repos::FarmDataRepo,
    },
    cache::CalculationInput,
    domain::{farm::Timeframe, ids::EntityId, kind::CalculationKind},
};

use super::{AppliedNitrogen, applied_nitrogen, grams_on_area, kg, total_grams, unavailable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldShare {
    pub field_id: String,
    pub name: String,
    pub area_m2: u64,
    pub norm_kg_n_per_ha: u32,
    pub applications: Vec<AppliedNitrogen>,
}

/// Everything the farm-level norm filling depends on. Fields are sorted by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormFillingInput {
    pub farm_id: String,
    pub timeframe: Timeframe,
    pub fields: Vec<FieldShare>,
}

impl CalculationInput for NormFillingInput {
    const KIND: CalculationKind = CalculationKind::NormFilling;
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilling {
    pub field_id: String,
    pub name: String,
    pub norm_kg_n: i64,
    pub filled_kg_n: i64,
}

/// Usage of the legal nitrogen allowance of a farm, in kg N. A negative
/// `remaining_kg_n` means the norm is exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormFilling {
    pub farm_id: String,
    pub norm_kg_n: i64,
    pub filled_kg_n: i64,
    pub remaining_kg_n: i64,
    pub fields: Vec<FieldFilling>,
}

pub struct NormFillingEngine {
    repo: Arc<dyn FarmDataRepo>,
}

impl NormFillingEngine {
    pub fn new(repo: Arc<dyn FarmDataRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl CalculationEngine for NormFillingEngine {
    type Input = NormFillingInput;
    type Output = NormFilling;

    async fn collect_input(&self, entity: &EntityId) -> Result<NormFillingInput, CalculationError> {
        let dataset = self.repo.snapshot().await.map_err(unavailable)?;
        let farm = dataset
            .farm(entity.as_str())
            .ok_or_else(|| CalculationError::missing_data("farm", entity.as_str()))?;

        let mut fields = Vec::new();
        for field in dataset.fields_of_farm(&farm.id) {
            let crop = dataset.crop(&field.crop_code).ok_or_else(|| {
                CalculationError::missing_parameter(format!(
                    "crop `{}` of field `{}`",
                    field.crop_code, field.id
                ))
            })?;
            fields.push(FieldShare {
                field_id: field.id.clone(),
                name: field.name.clone(),
                area_m2: field.area_m2,
                norm_kg_n_per_ha: crop.norm_kg_n_per_ha,
                applications: applied_nitrogen(&dataset, &field.id)?,
            });
        }
        fields.sort_by(|a, b| a.field_id.cmp(&b.field_id));

        Ok(NormFillingInput {
            farm_id: farm.id.clone(),
            timeframe: dataset.timeframe,
            fields,
        })
    }

    async fn compute(&self, input: &NormFillingInput) -> Result<NormFilling, CalculationError> {
        let mut rows = Vec::with_capacity(input.fields.len());
        let (mut norm_g, mut filled_g) = (0_i64, 0_i64);

        for field in &input.fields {
            if field.area_m2 == 0 {
                return Err(CalculationError::invalid_input(format!(
                    "field `{}` has zero area",
                    field.field_id
                )));
            }
            let norm = grams_on_area(i64::from(field.norm_kg_n_per_ha) * 1_000, field.area_m2);
            let filled = total_grams(&field.applications);
            norm_g = norm_g.saturating_add(norm);
            filled_g = filled_g.saturating_add(filled);
            rows.push(FieldFilling {
                field_id: field.field_id.clone(),
                name: field.name.clone(),
                norm_kg_n: kg(norm),
                filled_kg_n: kg(filled),
            });
        }

        Ok(NormFilling {
            farm_id: input.farm_id.clone(),
            norm_kg_n: kg(norm_g),
            filled_kg_n: kg(filled_g),
            remaining_kg_n: kg(norm_g - filled_g),
            fields: rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::engines::tests_support::{fixture, repo};

    #[tokio::test]
    async fn sums_the_norm_over_fields() {
        let engine = NormFillingEngine::new(repo(fixture()));
        let input = engine.collect_input(&EntityId::from("farm-1")).await.unwrap();
        let filling = engine.compute(&input).await.unwrap();

        assert_eq!(filling.norm_kg_n, 1_490);
        assert_eq!(filling.filled_kg_n, 243);
        assert_eq!(filling.remaining_kg_n, 1_247);
        let ids: Vec<_> = filling.fields.iter().map(|row| row.field_id.as_str()).collect();
        assert_eq!(ids, vec!["field-1", "field-2"]);
    }

    #[tokio::test]
    async fn field_order_in_the_dataset_is_irrelevant() {
        let mut data = fixture();
        data.fields.reverse();
        let shuffled = NormFillingEngine::new(repo(data))
            .collect_input(&EntityId::from("farm-1"))
            .await
            .unwrap();
        let ordered = NormFillingEngine::new(repo(fixture()))
            .collect_input(&EntityId::from("farm-1"))
            .await
            .unwrap();
        assert_eq!(shuffled, ordered);
    }

    #[tokio::test]
    async fn unknown_product_is_a_missing_parameter() {
        let mut data = fixture();
        data.applications[0].product_id = "mystery".to_string();
        let err = NormFillingEngine::new(repo(data))
            .collect_input(&EntityId::from("farm-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, CalculationError::MissingParameter { .. }));
    }

    #[tokio::test]
    async fn unknown_farm_is_missing_data() {
        let err = NormFillingEngine::new(repo(fixture()))
            .collect_input(&EntityId::from("farm-9"))
            .await
            .unwrap_err();
        assert_eq!(err, CalculationError::missing_data("farm", "farm-9"));
    }
}
