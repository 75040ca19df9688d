// ============================================================
// Layer 3 - Training Configuration Types
// ============================================================
// Closed enums for everything selected by name on the command
// line or in run metadata: architecture, best-model metric and
// device.
// Unsupported names fail once, at parse time, with the valid
// set in the message. Past that point every match is exhaustive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{Error, Result};

// ─── Architecture ─────────────────────────────────────────────────────────────
/// Supported classifier families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "resnet_18")]
    ResNet18,
    #[serde(rename = "resnet_34")]
    ResNet34,
    #[serde(rename = "mobilenet_v2")]
    MobileNetV2,
    #[serde(rename = "mobilenet_v3_small")]
    MobileNetV3Small,
}

impl Architecture {
    pub const ALL: [Architecture; 4] = [
        Architecture::ResNet18,
        Architecture::ResNet34,
        Architecture::MobileNetV2,
        Architecture::MobileNetV3Small,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::ResNet18 => "resnet_18",
            Architecture::ResNet34 => "resnet_34",
            Architecture::MobileNetV2 => "mobilenet_v2",
            Architecture::MobileNetV3Small => "mobilenet_v3_small",
        }
    }

    /// Model class name, logged as the `model` run parameter.
    pub fn family(&self) -> &'static str {
        match self {
            Architecture::ResNet18 | Architecture::ResNet34 => "ResNet",
            Architecture::MobileNetV2 => "MobileNetV2",
            Architecture::MobileNetV3Small => "MobileNetV3",
        }
    }

    fn valid_set() -> String {
        Self::ALL.iter().map(|a| a.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unsupported architecture '{s}', expected one of [{}]",
                    Self::valid_set()
                ))
            })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── SelectionMetric ──────────────────────────────────────────────────────────
/// Validation metric used to pick the checkpoint that gets registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMetric {
    ValLoss,
    ValAcc,
}

impl SelectionMetric {
    pub const ALL: [SelectionMetric; 2] = [SelectionMetric::ValLoss, SelectionMetric::ValAcc];

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionMetric::ValLoss => "val_loss",
            SelectionMetric::ValAcc => "val_acc",
        }
    }

    /// Summary metric key logged on the run at the end of training.
    pub fn summary_key(&self) -> &'static str {
        match self {
            SelectionMetric::ValLoss => "best_val_loss",
            SelectionMetric::ValAcc => "best_val_acc",
        }
    }

    /// Starting value of a best-so-far tracker: anything beats it.
    pub fn worst(&self) -> f64 {
        match self {
            SelectionMetric::ValLoss => f64::INFINITY,
            SelectionMetric::ValAcc => f64::NEG_INFINITY,
        }
    }

    /// Strict improvement test. Ties never replace the incumbent.
    pub fn improves(&self, candidate: f64, best: f64) -> bool {
        match self {
            SelectionMetric::ValLoss => candidate < best,
            SelectionMetric::ValAcc => candidate > best,
        }
    }
}

impl FromStr for SelectionMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "val_loss" => Ok(SelectionMetric::ValLoss),
            "val_acc" => Ok(SelectionMetric::ValAcc),
            other => Err(Error::InvalidArgument(format!(
                "invalid best model metric '{other}', expected one of [val_loss, val_acc]"
            ))),
        }
    }
}

impl fmt::Display for SelectionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── DeviceTarget ─────────────────────────────────────────────────────────────
/// Where tensors live. `cuda` is kept as the spelling for any GPU
/// so that existing `.env` files keep working; it maps to wgpu.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTarget {
    #[default]
    Cpu,
    Cuda,
}

impl DeviceTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceTarget::Cpu => "cpu",
            DeviceTarget::Cuda => "cuda",
        }
    }
}

impl FromStr for DeviceTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceTarget::Cpu),
            "cuda" | "gpu" => Ok(DeviceTarget::Cuda),
            other => Err(Error::InvalidArgument(format!(
                "invalid device '{other}', expected one of [cpu, cuda]"
            ))),
        }
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── TrainingConfiguration ────────────────────────────────────────────────────
/// Hyperparameters for one training run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfiguration {
    pub architecture:     Architecture,
    pub n_classes:        usize,
    pub epochs:           usize,
    pub learning_rate:    f64,
    pub weight_decay:     f64,
    pub batch_size:       usize,
    pub device:           DeviceTarget,
    pub selection_metric: SelectionMetric,
    pub seed:             u64,
    pub load_pretrained:  bool,
}

impl TrainingConfiguration {
    /// Reject values that would make the loop meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.n_classes < 2 {
            return Err(Error::InvalidArgument(format!(
                "n_classes must be at least 2, got {}",
                self.n_classes
            )));
        }
        if self.epochs == 0 {
            return Err(Error::InvalidArgument("epochs must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidArgument("batch_size must be > 0".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(Error::InvalidArgument(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.weight_decay < 0.0 || !self.weight_decay.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "weight decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TrainingConfiguration {
        TrainingConfiguration {
            architecture:     Architecture::ResNet18,
            n_classes:        2,
            epochs:           5,
            learning_rate:    1e-4,
            weight_decay:     1e-5,
            batch_size:       32,
            device:           DeviceTarget::Cpu,
            selection_metric: SelectionMetric::ValLoss,
            seed:             42,
            load_pretrained:  false,
        }
    }

    #[test]
    fn architecture_round_trips_through_its_name() {
        for arch in Architecture::ALL {
            assert_eq!(arch.as_str().parse::<Architecture>().unwrap(), arch);
        }
    }

    #[test]
    fn unknown_architecture_names_the_valid_set() {
        let err = "vgg_16".parse::<Architecture>().unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(msg.contains("resnet_18"));
        assert!(msg.contains("mobilenet_v3_small"));
    }

    #[test]
    fn architecture_serialises_with_snake_names() {
        let json = serde_json::to_string(&Architecture::MobileNetV3Small).unwrap();
        assert_eq!(json, "\"mobilenet_v3_small\"");
    }

    #[test]
    fn unknown_metric_is_invalid_argument() {
        assert!(matches!(
            "val_f1".parse::<SelectionMetric>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn improvement_is_strict() {
        assert!(SelectionMetric::ValLoss.improves(0.5, 0.6));
        assert!(!SelectionMetric::ValLoss.improves(0.6, 0.6));
        assert!(SelectionMetric::ValAcc.improves(0.9, 0.8));
        assert!(!SelectionMetric::ValAcc.improves(0.8, 0.8));
        assert!(SelectionMetric::ValLoss.improves(1e9, SelectionMetric::ValLoss.worst()));
        assert!(SelectionMetric::ValAcc.improves(0.0, SelectionMetric::ValAcc.worst()));
    }

    #[test]
    fn gpu_spellings_map_to_cuda() {
        assert_eq!("GPU".parse::<DeviceTarget>().unwrap(), DeviceTarget::Cuda);
        assert_eq!("cuda".parse::<DeviceTarget>().unwrap(), DeviceTarget::Cuda);
        assert!("tpu".parse::<DeviceTarget>().is_err());
    }

    #[test]
    fn validate_rejects_zero_epochs_and_single_class() {
        assert!(config().validate().is_ok());
        assert!(TrainingConfiguration { epochs: 0, ..config() }.validate().is_err());
        assert!(TrainingConfiguration { n_classes: 1, ..config() }.validate().is_err());
        assert!(TrainingConfiguration { learning_rate: 0.0, ..config() }.validate().is_err());
    }
}
