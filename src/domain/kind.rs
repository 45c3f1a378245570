//! Calculation kinds served by the coherence subsystem.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A category of expensive farm-scoped computation.
///
/// Each kind owns exactly one cache store; the namespace keeps two kinds from
/// colliding on the same entity id in durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationKind {
    /// Field-scoped nitrogen balance.
    NitrogenBalance,
    /// Farm-scoped usage-norm filling.
    NormFilling,
}

impl CalculationKind {
    pub const ALL: [CalculationKind; 2] = [Self::NitrogenBalance, Self::NormFilling];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NitrogenBalance => "nitrogen_balance",
            Self::NormFilling => "norm_filling",
        }
    }

    /// Storage namespace of the kind's cache store.
    pub fn namespace(self) -> &'static str {
        match self {
            Self::NitrogenBalance => "furrow.nitrogen_balance",
            Self::NormFilling => "furrow.norm_filling",
        }
    }
}

impl fmt::Display for CalculationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown calculation kind `{0}` (expected one of: nitrogen_balance, norm_filling)")]
pub struct UnknownKind(String);

impl FromStr for CalculationKind {
    type Err = UnknownKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| UnknownKind(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaces_are_distinct() {
        assert_ne!(
            CalculationKind::NitrogenBalance.namespace(),
            CalculationKind::NormFilling.namespace()
        );
    }

    #[test]
    fn parses_kebab_and_snake_case() {
        assert_eq!(
            "nitrogen-balance".parse::<CalculationKind>().unwrap(),
            CalculationKind::NitrogenBalance
        );
        assert_eq!(
            "norm_filling".parse::<CalculationKind>().unwrap(),
            CalculationKind::NormFilling
        );
        assert!("phosphate".parse::<CalculationKind>().is_err());
    }
}
