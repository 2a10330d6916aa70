//! Backtracking line search over the direction of another optimizer.
use super::{
    ensure, BuildOptimizer, NaturalGradientConfig, Optimizer, OptimizerConfig, OptimizerError,
    StepContext,
};
use crate::error::ConfigError;
use crate::logging::{ScopedLogger, StatsLogger};
use crate::torch::arguments::Arguments;
use crate::torch::variables::{Delta, ShapeMismatch, VariableSet};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Schedule of line search scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSearchMode {
    /// `s_i = parameter^i`
    Exponential,
    /// `s_i = 1 - i * parameter`
    Linear,
}

impl Default for LineSearchMode {
    fn default() -> Self {
        Self::Exponential
    }
}

impl LineSearchMode {
    /// The decreasing sequence of positive scales to try.
    pub fn scales(self, parameter: f64, max_iterations: u32) -> impl Iterator<Item = f64> {
        (0..max_iterations)
            .map(move |i| match self {
                Self::Exponential => parameter.powf(f64::from(i)),
                Self::Linear => f64::from(i).mul_add(-parameter, 1.0),
            })
            .take_while(|&scale| scale > 0.0)
    }

    fn validate_parameter(self, parameter: f64) -> Result<(), ConfigError> {
        match self {
            Self::Exponential => ensure(
                parameter > 0.0 && parameter < 1.0,
                "ls_parameter",
                parameter,
                "in (0, 1) for exponential mode",
            ),
            Self::Linear => ensure(
                parameter > 0.0 && parameter <= 1.0,
                "ls_parameter",
                parameter,
                "in (0, 1] for linear mode",
            ),
        }
    }
}

/// Configuration of an [`OptimizedStep`] line search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizedStepConfig {
    /// Optimizer proposing the search direction.
    pub optimizer: Box<OptimizerConfig>,
    /// Maximum number of scales to try.
    pub ls_max_iterations: u32,
    /// Minimum ratio of realized to predicted loss improvement.
    pub ls_accept_ratio: f64,
    pub ls_mode: LineSearchMode,
    /// Decay parameter of `ls_mode`.
    pub ls_parameter: f64,
    /// Reject scales where the policy KL divergence exceeds this bound.
    pub ls_max_kl_divergence: Option<f64>,
}

impl Default for OptimizedStepConfig {
    fn default() -> Self {
        Self {
            optimizer: Box::new(OptimizerConfig::NaturalGradient(
                NaturalGradientConfig::default(),
            )),
            ls_max_iterations: 10,
            ls_accept_ratio: 0.9,
            ls_mode: LineSearchMode::Exponential,
            ls_parameter: 0.5,
            ls_max_kl_divergence: None,
        }
    }
}

impl OptimizedStepConfig {
    /// Validate the line search hyperparameters (not those of the inner optimizer).
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.ls_max_iterations > 0,
            "ls_max_iterations",
            self.ls_max_iterations.into(),
            ">= 1",
        )?;
        ensure(
            (0.0..=1.0).contains(&self.ls_accept_ratio),
            "ls_accept_ratio",
            self.ls_accept_ratio,
            "in [0, 1]",
        )?;
        self.ls_mode.validate_parameter(self.ls_parameter)?;
        if let Some(max_kl) = self.ls_max_kl_divergence {
            ensure(
                max_kl.is_finite() && max_kl > 0.0,
                "ls_max_kl_divergence",
                max_kl,
                "> 0",
            )?;
        }
        Ok(())
    }
}

impl BuildOptimizer for OptimizedStepConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        self.validate()?;
        let optimizer = self.optimizer.build_optimizer(variables)?;
        Ok(Box::new(OptimizedStep::new(optimizer, self)?))
    }
}

/// Line search optimizer.
///
/// Takes the delta `d` proposed by the inner optimizer as a search direction and returns
/// `s * d` for the first scale `s` in a decreasing schedule such that
/// * the realized loss improvement is at least `accept_ratio` times the improvement
///     `-s * d'g` predicted by the linear model of the loss, and
/// * the KL divergence from the policy at the start of the step is within the bound (if any).
///
/// Returns the zero delta if no scale is accepted or if `d` is not a descent direction
/// (including a zero slope at a stationary point).
pub struct OptimizedStep {
    optimizer: Box<dyn Optimizer>,
    max_iterations: u32,
    accept_ratio: f64,
    mode: LineSearchMode,
    parameter: f64,
    max_kl_divergence: Option<f64>,
}

impl OptimizedStep {
    /// Wrap an optimizer in a line search.
    pub fn new(
        optimizer: Box<dyn Optimizer>,
        config: &OptimizedStepConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            optimizer,
            max_iterations: config.ls_max_iterations,
            accept_ratio: config.ls_accept_ratio,
            mode: config.ls_mode,
            parameter: config.ls_parameter,
            max_kl_divergence: config.ls_max_kl_divergence,
        })
    }

    fn accepts(&self, improvement: f64, predicted_improvement: f64, kl: Option<f64>) -> bool {
        let within_trust_region = match (kl, self.max_kl_divergence) {
            (Some(kl), Some(max_kl)) => kl <= max_kl,
            _ => true,
        };
        improvement >= self.accept_ratio * predicted_improvement && within_trust_region
    }
}

impl Optimizer for OptimizedStep {
    fn shapes(&self) -> &[Vec<i64>] {
        self.optimizer.shapes()
    }

    fn step(
        &mut self,
        variables: &VariableSet,
        arguments: &Arguments,
        context: &StepContext,
        logger: &mut dyn StatsLogger,
    ) -> Result<Delta, OptimizerError> {
        if self.max_kl_divergence.is_some() {
            context.kl_divergence_fn()?;
        }

        let loss = context.loss(arguments)?;
        let loss_before = f64::from(&loss);
        let gradient = variables.gradients(&loss);
        drop(loss);

        let direction = self
            .optimizer
            .step(variables, arguments, context, &mut *logger)?;
        ShapeMismatch::check(variables.shapes(), &direction.shapes())?;

        let mut logger = ScopedLogger::new(logger, "line_search");
        let slope = direction.f_dot(&gradient)?;
        if slope == 0.0 {
            debug!("line search direction has zero slope");
            logger.log_counter_increment("stationary", 1);
            return Ok(Delta::zeros_like(variables));
        }
        if slope.is_nan() || slope > 0.0 {
            warn!("line search direction is not a descent direction (slope {})", slope);
            logger.log_counter_increment("non_descent", 1);
            return Ok(Delta::zeros_like(variables));
        }

        let scales = self.mode.scales(self.parameter, self.max_iterations);
        for (iterations, scale) in (1_u32..).zip(scales) {
            let step = direction.scale(scale);
            let (loss_after, kl) = {
                let _guard = variables.f_trial(&step)?;
                tch::no_grad(|| -> Result<_, OptimizerError> {
                    let loss_after = f64::from((context.fn_loss)(arguments)?);
                    let kl = match context.fn_kl_divergence {
                        Some(fn_kl_divergence) => Some(f64::from(fn_kl_divergence(arguments)?)),
                        None => None,
                    };
                    Ok((loss_after, kl))
                })?
            };

            let improvement = loss_before - loss_after;
            let predicted_improvement = -scale * slope;
            if self.accepts(improvement, predicted_improvement, kl) {
                logger.log_scalar("scale", scale);
                logger.log_scalar("loss_before", loss_before);
                logger.log_scalar("loss_after", loss_after);
                if let Some(kl) = kl {
                    logger.log_scalar("kl_divergence", kl);
                }
                logger.log_scalar("iterations", iterations.into());
                return Ok(step);
            }
            debug!(
                "line search rejected scale {}: improvement {} of predicted {}, kl {:?}",
                scale, improvement, predicted_improvement, kl
            );
        }

        warn!("line search exhausted");
        logger.log_counter_increment("exhausted", 1);
        Ok(Delta::zeros_like(variables))
    }
}
