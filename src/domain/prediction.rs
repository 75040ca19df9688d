// ============================================================
// Layer 3 - Prediction Types
// ============================================================
// PredictionResponse is what the serving boundary hands back
// to its caller. PredictionRecord is what goes into the durable
// audit log, one per served request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which registered model answered a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub name:  String,
    pub alias: String,
}

impl ModelIdentity {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self { name: name.into(), alias: alias.into() }
    }
}

impl std::fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.alias)
    }
}

/// Response for one submitted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub probs:           Vec<f32>,
    pub best_prob:       f64,
    pub predicted_id:    i64,
    pub predicted_class: String,
    pub predicted_name:  String,
    pub predicted_alias: String,
}

impl Default for PredictionResponse {
    fn default() -> Self {
        Self {
            probs:           Vec::new(),
            best_prob:       -1.0,
            predicted_id:    -1,
            predicted_class: String::new(),
            predicted_name:  String::new(),
            predicted_alias: String::new(),
        }
    }
}

/// Durable audit entry for one served prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub image_name:      String,
    pub probs:           Vec<f32>,
    pub best_prob:       f64,
    pub predicted_id:    usize,
    pub predicted_class: String,
    pub model:           ModelIdentity,
    pub timestamp:       DateTime<Utc>,
}

impl PredictionRecord {
    pub fn to_response(&self) -> PredictionResponse {
        PredictionResponse {
            probs:           self.probs.clone(),
            best_prob:       self.best_prob,
            predicted_id:    self.predicted_id as i64,
            predicted_class: self.predicted_class.clone(),
            predicted_name:  self.model.name.clone(),
            predicted_alias: self.model.alias.clone(),
        }
    }
}
