use crate::error::FlowError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatType {
    T,
}

impl Default for StatType {
    fn default() -> Self {
        Self::T
    }
}

/// A contrast over condition regressors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast {
    pub name: String,
    #[serde(default)]
    pub stat: StatType,
    pub conditions: Vec<String>,
    pub weights: Vec<f64>,
}

impl Contrast {
    pub fn t(name: impl Into<String>, conditions: &[&str], weights: &[f64]) -> Self {
        Self {
            name: name.into(),
            stat: StatType::T,
            conditions: conditions.iter().map(|c| c.to_string()).collect(),
            weights: weights.to_vec(),
        }
    }

    /// Check the contrast against the conditions of one run.
    ///
    /// Every condition needs a weight. Conditions absent from the run are only
    /// warned about, they contribute nothing to the design.
    pub fn validate(&self, run_conditions: &[&str]) -> Result<(), FlowError> {
        if self.conditions.len() != self.weights.len() {
            return Err(FlowError::Contrast {
                name: self.name.clone(),
                detail: format!(
                    "{} conditions but {} weights",
                    self.conditions.len(),
                    self.weights.len()
                ),
            });
        }
        let unknown: Vec<&str> = self
            .conditions
            .iter()
            .map(String::as_str)
            .filter(|c| !run_conditions.contains(c))
            .collect();
        if !unknown.is_empty() {
            log::warn!(
                "Contrast '{}' names conditions missing from the run: {}",
                self.name,
                unknown.join(", ")
            );
        }
        Ok(())
    }

    /// Weight given to a condition, zero when the contrast does not mention it
    pub fn weight_for(&self, condition: &str) -> f64 {
        self.conditions
            .iter()
            .zip(&self.weights)
            .find(|(c, _)| c.as_str() == condition)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }
}
