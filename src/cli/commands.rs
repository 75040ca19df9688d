// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the three subcommands: `train`, `register`, `predict`
// and all their configurable flags.
//
// Flags that the deployment sets through the environment
// (tracking URI, experiment, model name/alias, device) fall
// back to these variables when not given on the command line:
//
//   MLFLOW_TRACKING_URI, MLFLOW_EXPERIMENT_NAME,
//   MODEL_NAME, MODEL_ALIAS, DEVICE
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};

use crate::application::{
    predict_use_case::PredictConfig, register_use_case::RegisterConfig,
    train_use_case::TrainConfig,
};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a classifier on one data version and log the run
    Train(TrainArgs),

    /// Register the best logged run and point an alias at it
    Register(RegisterArgs),

    /// Classify image files with the model behind an alias
    Predict(PredictArgs),
}

/// Registry location shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TrackingArgs {
    /// Tracking store: a local path or file:// URI
    #[arg(long, env = "MLFLOW_TRACKING_URI", default_value = "./mlruns")]
    pub tracking_uri: String,
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Data version to train on, a directory under --data-dir
    #[arg(long)]
    pub data_version: String,

    /// Directory holding the data versions
    #[arg(long, default_value = "data")]
    pub data_dir: String,

    /// Architecture: resnet_18, resnet_34, mobilenet_v2, mobilenet_v3_small
    #[arg(long, default_value = "resnet_18")]
    pub model_name: String,

    /// Number of full passes through the training data
    #[arg(long, default_value_t = 5)]
    pub epochs: usize,

    /// Images per optimisation step
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,

    /// Adam weight decay
    #[arg(long, default_value_t = 1e-5)]
    pub weight_decay: f64,

    /// Metric that picks the kept epoch: val_loss or val_acc
    #[arg(long, default_value = "val_loss")]
    pub best_model_metric: String,

    /// cpu or cuda
    #[arg(long, env = "DEVICE", default_value = "cpu")]
    pub device: String,

    /// Seed for initialisation, shuffling and augmentation
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Freeze the feature trunk and train only the head
    #[arg(long)]
    pub load_pretrained: bool,

    /// Record file with pretrained trunk weights for --load-pretrained
    #[arg(long)]
    pub trunk_weights: Option<String>,

    /// Square input size in pixels
    #[arg(long, default_value_t = 224)]
    pub image_size: usize,

    /// Where the finalized weights, config and metrics CSV are staged
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    #[command(flatten)]
    pub tracking: TrackingArgs,

    /// Experiment the run is logged under
    #[arg(long, env = "MLFLOW_EXPERIMENT_NAME", default_value = "catdog")]
    pub experiment_name: String,

    /// Run name; defaults to <model_name>-<timestamp>
    #[arg(long)]
    pub run_name: Option<String>,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            data_dir:          a.data_dir,
            data_version:      a.data_version,
            model_name:        a.model_name,
            epochs:            a.epochs,
            batch_size:        a.batch_size,
            lr:                a.lr,
            weight_decay:      a.weight_decay,
            best_model_metric: a.best_model_metric,
            device:            a.device,
            seed:              a.seed,
            load_pretrained:   a.load_pretrained,
            trunk_weights:     a.trunk_weights,
            image_size:        a.image_size,
            checkpoint_dir:    a.checkpoint_dir,
            tracking_uri:      a.tracking.tracking_uri,
            experiment_name:   a.experiment_name,
            run_name:          a.run_name,
        }
    }
}

/// All arguments for the `register` command.
#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Name of the serve config file written on success
    #[arg(long, default_value = "raw_data")]
    pub config_name: String,

    /// Run filter, e.g. "params.model_name = 'resnet_18' and metrics.best_val_acc > 0.8"
    #[arg(long, default_value = "")]
    pub filter_string: String,

    /// Ranking metric: best_val_loss or best_val_acc
    #[arg(long, default_value = "best_val_loss")]
    pub best_metric: String,

    /// ASC or DESC; defaults to ascending for losses, descending otherwise
    #[arg(long)]
    pub order: Option<String>,

    /// Alias to point at the new version
    #[arg(long, default_value = "Production")]
    pub model_alias: String,

    /// Registered model name; defaults to the best run's architecture
    #[arg(long)]
    pub model_name: Option<String>,

    /// Directory for serve config files
    #[arg(long, default_value = "configs/serve")]
    pub serve_config_dir: String,

    #[command(flatten)]
    pub tracking: TrackingArgs,

    /// Experiment to search
    #[arg(long, env = "MLFLOW_EXPERIMENT_NAME", default_value = "catdog")]
    pub experiment_name: String,
}

impl From<RegisterArgs> for RegisterConfig {
    fn from(a: RegisterArgs) -> Self {
        RegisterConfig {
            tracking_uri:     a.tracking.tracking_uri,
            experiment_name:  a.experiment_name,
            config_name:      a.config_name,
            filter_string:    a.filter_string,
            best_metric:      a.best_metric,
            order:            a.order,
            model_alias:      a.model_alias,
            model_name:       a.model_name,
            serve_config_dir: a.serve_config_dir,
        }
    }
}

/// All arguments for the `predict` command.
#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Image files or directories of images
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Registered model to serve
    #[arg(long, env = "MODEL_NAME")]
    pub model_name: Option<String>,

    /// Alias to resolve; Production when neither set nor in --serve-config
    #[arg(long, env = "MODEL_ALIAS")]
    pub model_alias: Option<String>,

    /// Serve config written by `register`
    #[arg(long)]
    pub serve_config: Option<String>,

    /// cpu or cuda
    #[arg(long, env = "DEVICE", default_value = "cpu")]
    pub device: String,

    /// Directory holding predicted_cache.csv
    #[arg(long, default_value = "cache")]
    pub cache_dir: String,

    /// Keep a copy of every decoded upload here
    #[arg(long)]
    pub capture_dir: Option<String>,

    /// Concurrent prediction workers
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    #[command(flatten)]
    pub tracking: TrackingArgs,
}

impl From<PredictArgs> for PredictConfig {
    fn from(a: PredictArgs) -> Self {
        PredictConfig {
            tracking_uri: a.tracking.tracking_uri,
            model_name:   a.model_name,
            model_alias:  a.model_alias,
            serve_config: a.serve_config,
            device:       a.device,
            cache_dir:    a.cache_dir,
            capture_dir:  a.capture_dir,
            workers:      a.workers,
            inputs:       a.inputs,
        }
    }
}
