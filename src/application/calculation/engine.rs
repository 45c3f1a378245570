use async_trait::async_trait;
use thiserror::Error;

use crate::{
    cache::{CachedResult, CalculationInput},
    domain::ids::EntityId,
};

/// Rejections from a calculation engine. Carried as data up to the page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CalculationError {
    #[error("{entity} `{id}` does not exist")]
    MissingData { entity: &'static str, id: String },
    #[error("missing required parameter: {message}")]
    MissingParameter { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("calculation engine unavailable: {message}")]
    Unavailable { message: String },
}

impl CalculationError {
    pub fn missing_data(entity: &'static str, id: impl Into<String>) -> Self {
        Self::MissingData {
            entity,
            id: id.into(),
        }
    }

    pub fn missing_parameter(message: impl Into<String>) -> Self {
        Self::MissingParameter {
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingData { .. } => "missing_data",
            Self::MissingParameter { .. } => "missing_parameter",
            Self::InvalidInput { .. } => "invalid_input",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

/// External collaborator computing one calculation kind.
///
/// Both operations are expected to be deterministic for identical data. The
/// kind is taken from [`CalculationInput::KIND`] of the input type.
#[async_trait]
pub trait CalculationEngine: Send + Sync + 'static {
    type Input: CalculationInput;
    type Output: CachedResult;

    /// Gather every fact that influences the calculation for `entity`.
    async fn collect_input(&self, entity: &EntityId) -> Result<Self::Input, CalculationError>;

    /// Run the expensive aggregation.
    async fn compute(&self, input: &Self::Input) -> Result<Self::Output, CalculationError>;
}
