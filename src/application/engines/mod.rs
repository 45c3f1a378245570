//! Deterministic demo engines for the two calculation kinds.
//!
//! All arithmetic runs on integer grams; results are rounded to whole
//! kilograms only at the end.

mod nitrogen_balance;
mod norm_filling;

pub use nitrogen_balance::{NitrogenBalance, NitrogenBalanceEngine, NitrogenBalanceInput};
pub use norm_filling::{FieldFilling, NormFilling, NormFillingEngine, NormFillingInput};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{
    application::{calculation::CalculationError, repos::RepoError},
    domain::farm::{FarmDataset, iso_date},
};

const M2_PER_HA: i64 = 10_000;
const G_PER_KG: i64 = 1_000;

/// One application of nitrogen as it enters a calculation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedNitrogen {
    pub application_id: String,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub amount_kg: u64,
    pub nitrogen_g_per_kg: u32,
}

impl AppliedNitrogen {
    fn grams(&self) -> i64 {
        i64::try_from(self.amount_kg)
            .unwrap_or(i64::MAX)
            .saturating_mul(i64::from(self.nitrogen_g_per_kg))
    }
}

/// Applications on `field_id` within the timeframe, sorted by id.
fn applied_nitrogen(
    dataset: &FarmDataset,
    field_id: &str,
) -> Result<Vec<AppliedNitrogen>, CalculationError> {
    let mut applied = dataset
        .applications_in_timeframe(field_id)
        .map(|application| {
            let product = dataset.product(&application.product_id).ok_or_else(|| {
                CalculationError::missing_parameter(format!(
                    "fertilizer product `{}` of application `{}`",
                    application.product_id, application.id
                ))
            })?;
            Ok(AppliedNitrogen {
                application_id: application.id.clone(),
                date: application.date,
                amount_kg: application.amount_kg,
                nitrogen_g_per_kg: product.nitrogen_g_per_kg,
            })
        })
        .collect::<Result<Vec<_>, CalculationError>>()?;
    applied.sort_by(|a, b| a.application_id.cmp(&b.application_id));
    Ok(applied)
}

fn total_grams(applied: &[AppliedNitrogen]) -> i64 {
    applied
        .iter()
        .fold(0_i64, |total, item| total.saturating_add(item.grams()))
}

fn grams_per_ha(grams: i64, area_m2: u64) -> i64 {
    let area = i64::try_from(area_m2).unwrap_or(i64::MAX);
    div_round(grams.saturating_mul(M2_PER_HA), area)
}

fn grams_on_area(grams_per_ha: i64, area_m2: u64) -> i64 {
    let area = i64::try_from(area_m2).unwrap_or(i64::MAX);
    div_round(grams_per_ha.saturating_mul(area), M2_PER_HA)
}

fn kg(grams: i64) -> i64 {
    div_round(grams, G_PER_KG)
}

/// Integer division rounding half away from zero. `divisor` must be positive.
fn div_round(numerator: i64, divisor: i64) -> i64 {
    let half = divisor / 2;
    if numerator >= 0 {
        numerator.saturating_add(half) / divisor
    } else {
        numerator.saturating_sub(half) / divisor
    }
}

fn unavailable(err: RepoError) -> CalculationError {
    CalculationError::unavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_symmetric() {
        assert_eq!(div_round(1_500, 1_000), 2);
        assert_eq!(div_round(1_499, 1_000), 1);
        assert_eq!(div_round(-1_500, 1_000), -2);
        assert_eq!(div_round(-1_499, 1_000), -1);
    }

    #[test]
    fn per_hectare_conversions() {
        // 40 kg N on half a hectare is 80 kg N/ha.
        assert_eq!(grams_per_ha(40_000, 5_000), 80_000);
        assert_eq!(grams_on_area(80_000, 5_000), 40_000);
        assert_eq!(kg(80_000), 80);
    }
}
