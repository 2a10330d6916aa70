//! State-value baseline trained alongside the policy
use super::arguments::{names, Arguments, ArgumentsSpec, TensorSpec};
use super::mlp::{Mlp, MlpConfig};
use super::optimizers::{
    AdamConfig, BuildOptimizer, Optimizer, OptimizerConfig, OptimizerError, StepContext,
};
use super::utils::shape_size;
use super::variables::VariableSet;
use crate::error::{ConfigError, Error};
use crate::logging::{ScopedLogger, StatsLogger};
use serde::{Deserialize, Serialize};
use tch::{
    nn::{self, Module, VarStore},
    Device, Kind, Reduction, TchError, Tensor,
};

/// Configuration of a [`Baseline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    pub network: MlpConfig,
    /// Optimizer tree over the baseline variables.
    pub optimizer: OptimizerConfig,
    /// Number of optimizer steps per update.
    pub steps_per_update: u64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            network: MlpConfig::default(),
            optimizer: OptimizerConfig::Adam(AdamConfig::default()),
            steps_per_update: 10,
        }
    }
}

impl BaselineConfig {
    /// Build a baseline for states described by `state_spec`.
    pub fn build(&self, state_spec: TensorSpec, device: Device) -> Result<Baseline, ConfigError> {
        if self.steps_per_update == 0 {
            return Err(ConfigError::out_of_range("steps_per_update", 0.0, ">= 1"));
        }
        let vs = VarStore::new(device);
        let num_state_features = shape_size(&state_spec.shape);
        let network = Mlp::new(&(&vs.root() / "network"), num_state_features, &self.network);
        let head = nn::linear(&vs.root() / "value", network.out_dim(), 1, Default::default());
        let variables = VariableSet::from_var_store(&vs);
        let optimizer = self.optimizer.build_optimizer(&variables)?;
        let arguments_spec = ArgumentsSpec::new()
            .with(names::STATES, state_spec)
            .with(names::RETURNS, TensorSpec::scalar(Kind::Float));
        Ok(Baseline {
            vs,
            value_fn: StateValueFn {
                network,
                head,
                num_state_features,
            },
            variables,
            optimizer,
            arguments_spec,
            steps_per_update: self.steps_per_update,
        })
    }
}

#[derive(Debug)]
struct StateValueFn {
    network: Mlp,
    head: nn::Linear,
    num_state_features: i64,
}

impl StateValueFn {
    fn values(&self, states: &Tensor) -> Result<Tensor, TchError> {
        let features = states
            .f_reshape(&[-1, self.num_state_features])?
            .f_to_kind(Kind::Float)?;
        self.head.forward(&self.network.forward(&features)).f_squeeze_dim(-1)
    }
}

/// State-value function fit to observed returns.
///
/// Owns its variables and optimizer tree, separate from the policy.
/// Subtracting its estimates from the returns gives lower variance advantages.
pub struct Baseline {
    vs: VarStore,
    value_fn: StateValueFn,
    variables: VariableSet,
    optimizer: Box<dyn Optimizer>,
    arguments_spec: ArgumentsSpec,
    steps_per_update: u64,
}

impl Baseline {
    pub const fn var_store(&self) -> &VarStore {
        &self.vs
    }

    /// Estimated value of each state in a batch.
    pub fn state_values(&self, states: &Tensor) -> Result<Tensor, TchError> {
        tch::no_grad(|| self.value_fn.values(states))
    }

    /// Fit the state values to a batch of returns.
    ///
    /// Returns the mean squared error after the update.
    pub fn update(
        &mut self,
        states: &Tensor,
        returns: &Tensor,
        logger: &mut dyn StatsLogger,
    ) -> Result<f64, Error> {
        let arguments = self.arguments_spec.build([
            (names::STATES, states.shallow_clone()),
            (names::RETURNS, returns.f_to_kind(Kind::Float)?),
        ])?;
        let value_fn = &self.value_fn;
        let fn_loss = |arguments: &Arguments| -> Result<Tensor, OptimizerError> {
            let values = value_fn.values(arguments.get(names::STATES)?)?;
            Ok(values.f_mse_loss(arguments.get(names::RETURNS)?, Reduction::Mean)?)
        };
        let context = StepContext::new(&fn_loss);

        let mut logger = ScopedLogger::new(logger, "baseline");
        for _ in 0..self.steps_per_update {
            let delta = self
                .optimizer
                .step(&self.variables, &arguments, &context, &mut logger)?;
            self.variables.f_apply(&delta)?;
        }
        let loss = f64::from(tch::no_grad(|| fn_loss(&arguments))?);
        logger.log_scalar("mse", loss);
        Ok(loss)
    }
}
