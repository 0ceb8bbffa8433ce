use crate::domain::model::BalanceResult;
use crate::utils::error::{BridgeError, Result};
use regex::Regex;

/// Ukrainian-locale USSD reply: "... Na rahunku 42.50 grn ...".
pub const DEFAULT_BALANCE_PATTERN: &str = r"Na rahunku\s+([\d.]+)\s+grn";

/// Pulls the amount out of a USSD balance reply.
#[derive(Debug, Clone)]
pub struct BalanceParser {
    pattern: Regex,
}

impl BalanceParser {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| BridgeError::InvalidConfigValueError {
            field: "balance.pattern".to_string(),
            value: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern })
    }

    /// Never fails: anything without a finite amount becomes
    /// [`BalanceResult::Unparseable`].
    pub fn extract(&self, text: &str) -> BalanceResult {
        let flattened = text.replace(['\r', '\n'], " ");
        let amount = self
            .pattern
            .captures(&flattened)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|amount| amount.is_finite());

        match amount {
            Some(amount) => BalanceResult::Amount(amount),
            None => {
                tracing::warn!("Failed to parse balance response: {}", flattened.trim());
                BalanceResult::Unparseable
            }
        }
    }
}
