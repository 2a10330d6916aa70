//! Sum of two optimizers.
use super::{BuildOptimizer, Optimizer, OptimizerConfig, OptimizerError, StepContext};
use crate::error::ConfigError;
use crate::logging::{ScopedLogger, StatsLogger};
use crate::torch::arguments::Arguments;
use crate::torch::variables::{Delta, ShapeMismatch, VariableSet};
use serde::{Deserialize, Serialize};

/// Configuration of a [`Plus`] optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlusConfig {
    pub optimizer1: Box<OptimizerConfig>,
    pub optimizer2: Box<OptimizerConfig>,
}

impl BuildOptimizer for PlusConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        Ok(Box::new(Plus::new(
            self.optimizer1.build_optimizer(variables)?,
            self.optimizer2.build_optimizer(variables)?,
        )?))
    }
}

/// Applies two optimizers in sequence and sums their deltas.
///
/// `optimizer2` steps on the variables as updated by the delta of `optimizer1`.
/// The variables are restored before returning `delta1 + delta2`.
pub struct Plus {
    optimizer1: Box<dyn Optimizer>,
    optimizer2: Box<dyn Optimizer>,
}

impl Plus {
    /// Combine two optimizers built for the same variables.
    ///
    /// # Errors
    /// [`ConfigError::ShapeMismatch`] if the optimizers disagree on the variable shapes.
    pub fn new(
        optimizer1: Box<dyn Optimizer>,
        optimizer2: Box<dyn Optimizer>,
    ) -> Result<Self, ConfigError> {
        ShapeMismatch::check(optimizer1.shapes(), optimizer2.shapes())?;
        Ok(Self {
            optimizer1,
            optimizer2,
        })
    }
}

impl Optimizer for Plus {
    fn shapes(&self) -> &[Vec<i64>] {
        self.optimizer1.shapes()
    }

    fn step(
        &mut self,
        variables: &VariableSet,
        arguments: &Arguments,
        context: &StepContext,
        logger: &mut dyn StatsLogger,
    ) -> Result<Delta, OptimizerError> {
        ShapeMismatch::check(self.shapes(), variables.shapes())?;
        let delta1 = self.optimizer1.step(
            variables,
            arguments,
            context,
            &mut ScopedLogger::new(logger, "optimizer1"),
        )?;
        let delta2 = {
            let _guard = variables.f_trial(&delta1)?;
            self.optimizer2.step(
                variables,
                arguments,
                context,
                &mut ScopedLogger::new(logger, "optimizer2"),
            )?
        };
        Ok(delta1.f_add(&delta2)?)
    }
}
