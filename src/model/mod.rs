//! The illumination network, its weights, and the decomposition model.

mod finetune;
mod layers;
mod network;
mod weights;

pub use finetune::{decompose, FinetuneModel, ENHANCE_PREFIX};
pub use layers::{BatchNorm2d, Conv2d, BATCH_NORM_EPS};
pub use network::{EnhanceConfig, EnhanceNetwork, ILLUMINATION_CEIL, ILLUMINATION_FLOOR};
pub use weights::{LoadReport, WeightSet};
