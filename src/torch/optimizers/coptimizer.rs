//! Torch optimizer wrappers and configuration
use super::{ensure, BuildOptimizer, Optimizer, OptimizerError, StepContext};
use crate::error::ConfigError;
use crate::logging::StatsLogger;
use crate::torch::arguments::Arguments;
use crate::torch::variables::{Delta, ShapeMismatch, VariableSet};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use tch::{COptimizer, TchError};

/// First-order torch optimizer proposing the delta of a single optimization step.
///
/// The step is taken on the variables, the change is recorded, and the variables are restored.
/// The internal state of the torch optimizer (momentum, running averages) advances with
/// every step whether or not the delta is eventually applied.
pub struct TorchOptimizer {
    optimizer: COptimizer,
    shapes: Vec<Vec<i64>>,
}

impl TorchOptimizer {
    /// Attach a torch optimizer to a set of variables.
    pub fn new(mut optimizer: COptimizer, variables: &VariableSet) -> Result<Self, ConfigError> {
        if variables.is_empty() {
            return Err(ConfigError::NoVariables);
        }
        for tensor in variables.tensors() {
            optimizer.add_parameters(tensor, 0)?;
        }
        Ok(Self {
            optimizer,
            shapes: variables.shapes().to_vec(),
        })
    }
}

impl Optimizer for TorchOptimizer {
    fn shapes(&self) -> &[Vec<i64>] {
        &self.shapes
    }

    fn step(
        &mut self,
        variables: &VariableSet,
        arguments: &Arguments,
        context: &StepContext,
        logger: &mut dyn StatsLogger,
    ) -> Result<Delta, OptimizerError> {
        ShapeMismatch::check(&self.shapes, variables.shapes())?;
        let guard = variables.restore_guard();
        self.optimizer.zero_grad()?;
        let loss = context.loss(arguments)?;
        loss.backward();
        self.optimizer.step()?;
        logger.log_scalar("loss", f64::from(&loss));
        Ok(guard.f_difference()?)
    }
}

fn build_torch_optimizer(
    optimizer: Result<COptimizer, TchError>,
    variables: &VariableSet,
) -> Result<Box<dyn Optimizer>, ConfigError> {
    Ok(Box::new(TorchOptimizer::new(optimizer?, variables)?))
}

fn validate_learning_rate(learning_rate: f64) -> Result<(), ConfigError> {
    ensure(
        learning_rate.is_finite() && learning_rate > 0.0,
        "learning_rate",
        learning_rate,
        "> 0",
    )
}

fn validate_beta(name: &'static str, beta: f64) -> Result<(), ConfigError> {
    ensure((0.0..1.0).contains(&beta), name, beta, "in [0, 1)")
}

/// Configuration for the SGD optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Momentum
    pub momentum: f64,
    /// Weight decay (L2 penalty)
    pub weight_decay: f64,
    /// Dampening for momentum
    pub dampening: f64,
    /// Enables Nesterov momentum
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            momentum: 0.0,
            weight_decay: 0.0,
            dampening: 0.0,
            nesterov: false,
        }
    }
}

impl TryFrom<&SgdConfig> for COptimizer {
    type Error = TchError;
    fn try_from(config: &SgdConfig) -> Result<Self, Self::Error> {
        Self::sgd(
            config.learning_rate,
            config.momentum,
            config.dampening,
            config.weight_decay,
            config.nesterov,
        )
    }
}

impl BuildOptimizer for SgdConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        validate_learning_rate(self.learning_rate)?;
        build_torch_optimizer(COptimizer::try_from(self), variables)
    }
}

#[allow(clippy::doc_markdown)] // false positive on RMSProp
/// Configuration for the RMSProp optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RmsPropConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Momentum
    pub momentum: f64,
    /// Smoothing factor
    pub alpha: f64,
    /// A term added to the denominator to improve numerical stability
    pub eps: f64,
    /// If true, normalize the gradient by the estimated variance.
    pub centered: bool,
    /// Weight decay (L2 penalty)
    pub weight_decay: f64,
}

impl Default for RmsPropConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            momentum: 0.0,
            alpha: 0.99,
            eps: 1e-8,
            centered: false,
            weight_decay: 0.0,
        }
    }
}

impl TryFrom<&RmsPropConfig> for COptimizer {
    type Error = TchError;
    fn try_from(config: &RmsPropConfig) -> Result<Self, Self::Error> {
        Self::rms_prop(
            config.learning_rate,
            config.alpha,
            config.eps,
            config.weight_decay,
            config.momentum,
            config.centered,
        )
    }
}

impl BuildOptimizer for RmsPropConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        validate_learning_rate(self.learning_rate)?;
        validate_beta("alpha", self.alpha)?;
        build_torch_optimizer(COptimizer::try_from(self), variables)
    }
}

/// Configuration for the Adam optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Coefficient for the running average of the gradient
    pub beta1: f64,
    /// Coefficient for the running average of the square of the gradient
    pub beta2: f64,
    /// Weight decay (L2 penalty)
    pub weight_decay: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 0.0,
        }
    }
}

impl TryFrom<&AdamConfig> for COptimizer {
    type Error = TchError;
    fn try_from(config: &AdamConfig) -> Result<Self, Self::Error> {
        Self::adam(
            config.learning_rate,
            config.beta1,
            config.beta2,
            config.weight_decay,
        )
    }
}

impl BuildOptimizer for AdamConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        validate_learning_rate(self.learning_rate)?;
        validate_beta("beta1", self.beta1)?;
        validate_beta("beta2", self.beta2)?;
        build_torch_optimizer(COptimizer::try_from(self), variables)
    }
}

#[allow(clippy::doc_markdown)]
/// Configuration for the AdamW optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamWConfig {
    /// Learning rate
    pub learning_rate: f64,
    /// Coefficient for the running average of the gradient
    pub beta1: f64,
    /// Coefficient for the running average of the square of the gradient
    pub beta2: f64,
    /// Decoupled weight decay
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            weight_decay: 0.0,
        }
    }
}

impl TryFrom<&AdamWConfig> for COptimizer {
    type Error = TchError;
    fn try_from(config: &AdamWConfig) -> Result<Self, Self::Error> {
        Self::adamw(
            config.learning_rate,
            config.beta1,
            config.beta2,
            config.weight_decay,
        )
    }
}

impl BuildOptimizer for AdamWConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        validate_learning_rate(self.learning_rate)?;
        validate_beta("beta1", self.beta1)?;
        validate_beta("beta2", self.beta2)?;
        build_torch_optimizer(COptimizer::try_from(self), variables)
    }
}
