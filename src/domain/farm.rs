//! Farm dataset: the external facts calculations are collected from.
//!
//! Quantities are integers in fixed units (square metres, kilograms, grams per
//! kilogram) so that every input built from them serializes identically.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::Date;

use super::error::DomainError;

time::serde::format_description!(pub(crate) iso_date, Date, "[year]-[month]-[day]");

/// Inclusive date range a calculation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    #[serde(with = "iso_date")]
    pub start: Date,
    #[serde(with = "iso_date")]
    pub end: Date,
}

impl Timeframe {
    pub fn contains(&self, date: Date) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Farm {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    pub area_m2: u64,
    pub crop_code: String,
    pub yield_kg_per_ha: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FertilizerProduct {
    pub id: String,
    pub name: String,
    pub nitrogen_g_per_kg: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FertilizerApplication {
    pub id: String,
    pub field_id: String,
    pub product_id: String,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub amount_kg: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Crop {
    pub code: String,
    pub name: String,
    /// Nitrogen removed with the harvested product.
    pub nitrogen_removal_g_per_kg: u32,
    /// Legal usage norm for the crop.
    pub norm_kg_n_per_ha: u32,
}

/// Complete farm dataset, as loaded from the data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmDataset {
    pub timeframe: Timeframe,
    #[serde(default)]
    pub farms: Vec<Farm>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub products: Vec<FertilizerProduct>,
    #[serde(default)]
    pub crops: Vec<Crop>,
    #[serde(default)]
    pub applications: Vec<FertilizerApplication>,
}

impl FarmDataset {
    /// Check id uniqueness and structural references.
    ///
    /// Product and crop references are left to the calculation engines, which
    /// report them as missing parameters.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.timeframe.start > self.timeframe.end {
            return Err(DomainError::validation(format!(
                "timeframe start {} is after end {}",
                self.timeframe.start, self.timeframe.end
            )));
        }

        ensure_unique("farm", self.farms.iter().map(|farm| farm.id.as_str()))?;
        ensure_unique("field", self.fields.iter().map(|field| field.id.as_str()))?;
        ensure_unique(
            "product",
            self.products.iter().map(|product| product.id.as_str()),
        )?;
        ensure_unique("crop", self.crops.iter().map(|crop| crop.code.as_str()))?;
        ensure_unique(
            "application",
            self.applications.iter().map(|application| application.id.as_str()),
        )?;

        for field in &self.fields {
            if self.farm(&field.farm_id).is_none() {
                return Err(DomainError::not_found("farm", field.farm_id.clone()));
            }
        }
        for application in &self.applications {
            if self.field(&application.field_id).is_none() {
                return Err(DomainError::not_found(
                    "field",
                    application.field_id.clone(),
                ));
            }
        }
        Ok(())
    }

    pub fn farm(&self, id: &str) -> Option<&Farm> {
        self.farms.iter().find(|farm| farm.id == id)
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn product(&self, id: &str) -> Option<&FertilizerProduct> {
        self.products.iter().find(|product| product.id == id)
    }

    pub fn crop(&self, code: &str) -> Option<&Crop> {
        self.crops.iter().find(|crop| crop.code == code)
    }

    pub fn fields_of_farm<'a>(&'a self, farm_id: &'a str) -> impl Iterator<Item = &'a Field> + 'a {
        self.fields.iter().filter(move |field| field.farm_id == farm_id)
    }

    /// Applications on a field that fall inside the dataset timeframe.
    pub fn applications_in_timeframe<'a>(
        &'a self,
        field_id: &'a str,
    ) -> impl Iterator<Item = &'a FertilizerApplication> + 'a {
        self.applications.iter().filter(move |application| {
            application.field_id == field_id && self.timeframe.contains(application.date)
        })
    }
}

fn ensure_unique<'a>(
    entity: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), DomainError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(DomainError::duplicate(entity, id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn dataset() -> FarmDataset {
        FarmDataset {
            timeframe: Timeframe {
                start: date!(2025 - 01 - 01),
                end: date!(2025 - 12 - 31),
            },
            farms: vec![Farm {
                id: "farm-1".to_string(),
                name: "De Hoeve".to_string(),
            }],
            fields: vec![Field {
                id: "field-1".to_string(),
                farm_id: "farm-1".to_string(),
                name: "Achterveld".to_string(),
                area_m2: 50_000,
                crop_code: "wheat".to_string(),
                yield_kg_per_ha: 9_000,
            }],
            products: vec![],
            crops: vec![],
            applications: vec![
                FertilizerApplication {
                    id: "app-1".to_string(),
                    field_id: "field-1".to_string(),
                    product_id: "can-27".to_string(),
                    date: date!(2025 - 03 - 10),
                    amount_kg: 500,
                },
                FertilizerApplication {
                    id: "app-2".to_string(),
                    field_id: "field-1".to_string(),
                    product_id: "can-27".to_string(),
                    date: date!(2024 - 11 - 02),
                    amount_kg: 300,
                },
            ],
        }
    }

    #[test]
    fn valid_dataset_passes() {
        dataset().validate().expect("dataset should validate");
    }

    #[test]
    fn duplicate_field_ids_are_rejected() {
        let mut data = dataset();
        let copy = data.fields[0].clone();
        data.fields.push(copy);
        assert!(matches!(
            data.validate(),
            Err(DomainError::Duplicate { entity: "field", .. })
        ));
    }

    #[test]
    fn dangling_farm_reference_is_rejected() {
        let mut data = dataset();
        data.fields[0].farm_id = "elsewhere".to_string();
        assert!(matches!(
            data.validate(),
            Err(DomainError::NotFound { entity: "farm", .. })
        ));
    }

    #[test]
    fn timeframe_filters_applications() {
        let data = dataset();
        let ids: Vec<_> = data
            .applications_in_timeframe("field-1")
            .map(|application| application.id.as_str())
            .collect();
        assert_eq!(ids, vec!["app-1"]);
    }
}
