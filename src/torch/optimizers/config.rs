//! Optimizer configuration tree
use super::{
    AdamConfig, AdamWConfig, BuildOptimizer, LineSearchMode, NaturalGradientConfig,
    OptimizedStepConfig, Optimizer, PlusConfig, RmsPropConfig, SgdConfig,
};
use crate::error::ConfigError;
use crate::torch::variables::VariableSet;
use serde::{Deserialize, Serialize};

/// Optimizer configuration.
///
/// Parsed from a tagged tree such as
/// ```json
/// {"type": "optimized_step",
///  "optimizer": {"type": "natural_gradient", "learning_rate": 1.0},
///  "ls_max_iterations": 10}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    NaturalGradient(NaturalGradientConfig),
    OptimizedStep(OptimizedStepConfig),
    Plus(PlusConfig),
    Sgd(SgdConfig),
    RmsProp(RmsPropConfig),
    Adam(AdamConfig),
    AdamW(AdamWConfig),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::trpo(1.0)
    }
}

impl OptimizerConfig {
    /// Trust region policy optimization: a line search over the natural gradient direction.
    pub fn trpo(learning_rate: f64) -> Self {
        Self::OptimizedStep(OptimizedStepConfig {
            optimizer: Box::new(Self::NaturalGradient(NaturalGradientConfig {
                learning_rate,
                cg_max_iterations: 10,
                cg_damping: 1e-3,
                max_kl_divergence: None,
            })),
            ls_max_iterations: 10,
            ls_accept_ratio: 0.9,
            ls_mode: LineSearchMode::Exponential,
            ls_parameter: 0.5,
            ls_max_kl_divergence: None,
        })
    }
}

impl BuildOptimizer for OptimizerConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        match self {
            Self::NaturalGradient(config) => config.build_optimizer(variables),
            Self::OptimizedStep(config) => config.build_optimizer(variables),
            Self::Plus(config) => config.build_optimizer(variables),
            Self::Sgd(config) => config.build_optimizer(variables),
            Self::RmsProp(config) => config.build_optimizer(variables),
            Self::Adam(config) => config.build_optimizer(variables),
            Self::AdamW(config) => config.build_optimizer(variables),
        }
    }
}
