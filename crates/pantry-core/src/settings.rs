use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Household-wide thresholds consumed by the favorite calculator, inventory
/// queries and the suggestion strategies.
///
/// The engine only ever reads these; an administration surface owns them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub favorites_threshold: Decimal,
    pub favorites_min_raters: u32,
    pub rotation_period_days: u32,
    pub low_stock_threshold_percent: Decimal,
    pub expiration_warning_days: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            favorites_threshold: Decimal::new(75, 2),
            favorites_min_raters: 3,
            rotation_period_days: 14,
            low_stock_threshold_percent: Decimal::new(20, 2),
            expiration_warning_days: 7,
        }
    }
}

impl Settings {
    /// # Errors
    /// Returns [`EngineError::Validation`] when a threshold falls outside its range.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.favorites_threshold < Decimal::ZERO || self.favorites_threshold > Decimal::ONE {
            return Err(EngineError::Validation(
                "favorites_threshold must be in [0.0, 1.0]".to_string(),
            ));
        }
        if self.favorites_min_raters == 0 {
            return Err(EngineError::Validation(
                "favorites_min_raters must be greater than zero".to_string(),
            ));
        }
        if self.rotation_period_days == 0 {
            return Err(EngineError::Validation(
                "rotation_period_days must be greater than zero".to_string(),
            ));
        }
        if self.low_stock_threshold_percent < Decimal::ZERO
            || self.low_stock_threshold_percent > Decimal::ONE
        {
            return Err(EngineError::Validation(
                "low_stock_threshold_percent must be in [0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}
