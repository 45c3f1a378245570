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

use super::{AppliedNitrogen, applied_nitrogen, grams_per_ha, kg, total_grams, unavailable};

/// Everything the balance of one field depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NitrogenBalanceInput {
    pub field_id: String,
    pub timeframe: Timeframe,
    pub area_m2: u64,
    pub crop_code: String,
    pub yield_kg_per_ha: u32,
    pub nitrogen_removal_g_per_kg: u32,
    pub applications: Vec<AppliedNitrogen>,
}

impl CalculationInput for NitrogenBalanceInput {
    const KIND: CalculationKind = CalculationKind::NitrogenBalance;
    const SCHEMA_VERSION: u32 = 1;
}

/// Field balance in kg N per hectare. A positive balance is a surplus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NitrogenBalance {
    pub field_id: String,
    pub supply_kg_n_per_ha: i64,
    pub removal_kg_n_per_ha: i64,
    pub balance_kg_n_per_ha: i64,
    pub application_count: usize,
}

pub struct NitrogenBalanceEngine {
    repo: Arc<dyn FarmDataRepo>,
}

impl NitrogenBalanceEngine {
    pub fn new(repo: Arc<dyn FarmDataRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl CalculationEngine for NitrogenBalanceEngine {
    type Input = NitrogenBalanceInput;
    type Output = NitrogenBalance;

    async fn collect_input(
        &self,
        entity: &EntityId,
    ) -> Result<NitrogenBalanceInput, CalculationError> {
        let dataset = self.repo.snapshot().await.map_err(unavailable)?;
        let field = dataset
            .field(entity.as_str())
            .ok_or_else(|| CalculationError::missing_data("field", entity.as_str()))?;
        let crop = dataset.crop(&field.crop_code).ok_or_else(|| {
            CalculationError::missing_parameter(format!(
                "crop `{}` of field `{}`",
                field.crop_code, field.id
            ))
        })?;

        Ok(NitrogenBalanceInput {
            field_id: field.id.clone(),
            timeframe: dataset.timeframe,
            area_m2: field.area_m2,
            crop_code: crop.code.clone(),
            yield_kg_per_ha: field.yield_kg_per_ha,
            nitrogen_removal_g_per_kg: crop.nitrogen_removal_g_per_kg,
            applications: applied_nitrogen(&dataset, &field.id)?,
        })
    }

    async fn compute(
        &self,
        input: &NitrogenBalanceInput,
    ) -> Result<NitrogenBalance, CalculationError> {
        if input.area_m2 == 0 {
            return Err(CalculationError::invalid_input(format!(
                "field `{}` has zero area",
                input.field_id
            )));
        }

        let supply = grams_per_ha(total_grams(&input.applications), input.area_m2);
        let removal =
            i64::from(input.yield_kg_per_ha) * i64::from(input.nitrogen_removal_g_per_kg);

        Ok(NitrogenBalance {
            field_id: input.field_id.clone(),
            supply_kg_n_per_ha: kg(supply),
            removal_kg_n_per_ha: kg(removal),
            balance_kg_n_per_ha: kg(supply - removal),
            application_count: input.applications.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::engines::tests_support::{fixture, repo},
        cache::hash_input,
        domain::farm::FertilizerApplication,
    };
    use time::macros::date;

    #[tokio::test]
    async fn computes_field_balance() {
        let engine = NitrogenBalanceEngine::new(repo(fixture()));
        let input = engine.collect_input(&EntityId::from("field-1")).await.unwrap();
        let balance = engine.compute(&input).await.unwrap();

        // 500 kg * 270 g/kg over 5 ha = 27 kg N/ha; 8000 kg * 20 g/kg = 160 kg N/ha.
        assert_eq!(balance.supply_kg_n_per_ha, 27);
        assert_eq!(balance.removal_kg_n_per_ha, 160);
        assert_eq!(balance.balance_kg_n_per_ha, -133);
        assert_eq!(balance.application_count, 1);
    }

    #[tokio::test]
    async fn application_order_does_not_change_the_hash() {
        let mut data = fixture();
        data.applications.push(FertilizerApplication {
            id: "app-0".to_string(),
            field_id: "field-1".to_string(),
            product_id: "can-27".to_string(),
            date: date!(2025 - 04 - 01),
            amount_kg: 100,
        });
        let mut reversed = data.clone();
        reversed.applications.reverse();

        let forward = NitrogenBalanceEngine::new(repo(data))
            .collect_input(&EntityId::from("field-1"))
            .await
            .unwrap();
        let backward = NitrogenBalanceEngine::new(repo(reversed))
            .collect_input(&EntityId::from("field-1"))
            .await
            .unwrap();

        assert_eq!(hash_input(&forward).unwrap(), hash_input(&backward).unwrap());
    }

    #[tokio::test]
    async fn unknown_field_is_missing_data() {
        let engine = NitrogenBalanceEngine::new(repo(fixture()));
        let err = engine
            .collect_input(&EntityId::from("nowhere"))
            .await
            .unwrap_err();
        assert_eq!(err, CalculationError::missing_data("field", "nowhere"));
    }

    #[tokio::test]
    async fn unknown_crop_is_a_missing_parameter() {
        let mut data = fixture();
        data.fields[0].crop_code = "quinoa".to_string();
        let err = NitrogenBalanceEngine::new(repo(data))
            .collect_input(&EntityId::from("field-1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "missing_parameter");
    }

    #[tokio::test]
    async fn zero_area_is_invalid_input() {
        let mut data = fixture();
        data.fields[0].area_m2 = 0;
        let engine = NitrogenBalanceEngine::new(repo(data));
        let input = engine.collect_input(&EntityId::from("field-1")).await.unwrap();
        assert_eq!(
            engine.compute(&input).await.unwrap_err().code(),
            "invalid_input"
        );
    }
}
