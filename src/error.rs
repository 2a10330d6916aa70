//! Error type
use crate::torch::arguments::ArgumentsError;
use crate::torch::distributions::DistributionError;
use crate::torch::objectives::ObjectiveError;
use crate::torch::optimizers::OptimizerError;
use crate::torch::variables::{ShapeMismatch, VariablesError};
use tch::{Kind, TchError};
use thiserror::Error;

/// Invalid configuration, detected while building a component.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{name} = {value} is out of range, expected {expected}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("distribution input must be floating-point, not {0:?}")]
    NonFloatInput(Kind),
    #[error("optimizers of a plus pair disagree on variables: {0}")]
    ShapeMismatch(#[from] ShapeMismatch),
    #[error("no trainable variables")]
    NoVariables,
    #[error(transparent)]
    Torch(#[from] TchError),
}

impl ConfigError {
    pub const fn out_of_range(name: &'static str, value: f64, expected: &'static str) -> Self {
        Self::OutOfRange {
            name,
            value,
            expected,
        }
    }
}

/// Error from the trust region optimization crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration")]
    Config(#[from] ConfigError),
    #[error("invalid arguments")]
    Arguments(#[from] ArgumentsError),
    #[error("distribution error")]
    Distribution(#[from] DistributionError),
    #[error("objective error")]
    Objective(#[from] ObjectiveError),
    #[error("optimizer error")]
    Optimizer(#[from] OptimizerError),
    #[error("variables error")]
    Variables(#[from] VariablesError),
    #[error(transparent)]
    Torch(#[from] TchError),
}
