//! Torch policy distributions
//!
//! A [`Distribution`] is a distribution head: it maps an upstream representation to a set of
//! [`DistributionParameters`] and evaluates statistics of the distributions those parameters
//! describe. All statistics are batched; each returns one value per batch instance.
mod bernoulli;
mod beta;
mod categorical;
mod gaussian;

pub use bernoulli::Bernoulli;
pub use beta::Beta;
pub use categorical::Categorical;
pub use gaussian::Gaussian;

use super::arguments::TensorSpec;
use super::utils::{is_float_kind, shape_size};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use tch::{nn, Kind, TchError, Tensor};
use thiserror::Error;

/// Error evaluating a distribution.
#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("{operation} is not supported by the {distribution} distribution")]
    NotSupported {
        distribution: &'static str,
        operation: &'static str,
    },
    #[error("cannot compare {0} parameters with {1} parameters")]
    Incomparable(String, String),
    #[error("missing distribution parameter {0:?}")]
    MissingParameter(String),
    #[error("invalid distribution parameter: {0}")]
    InvalidParameter(String),
    #[error("distribution parameters must be floats, not {0:?}")]
    NonFloatParameter(Kind),
    #[error(transparent)]
    Torch(#[from] TchError),
}

impl DistributionError {
    pub const fn not_supported(distribution: &'static str, operation: &'static str) -> Self {
        Self::NotSupported {
            distribution,
            operation,
        }
    }
}

/// Named tensors fully describing a batch of distributions.
///
/// Parameters are values: a forward pass always produces new parameters
/// and existing parameters are never modified.
#[derive(Debug, PartialEq)]
pub struct DistributionParameters {
    distribution: &'static str,
    action_shape: Vec<i64>,
    tensors: BTreeMap<&'static str, Tensor>,
}

impl DistributionParameters {
    pub fn new<I>(distribution: &'static str, action_shape: Vec<i64>, tensors: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, Tensor)>,
    {
        Self {
            distribution,
            action_shape,
            tensors: tensors.into_iter().collect(),
        }
    }

    /// Name of the distribution variant that produced these parameters.
    pub const fn distribution(&self) -> &'static str {
        self.distribution
    }

    pub fn action_shape(&self) -> &[i64] {
        &self.action_shape
    }

    pub fn get(&self, name: &str) -> Result<&Tensor, DistributionError> {
        self.tensors
            .get(name)
            .ok_or_else(|| DistributionError::MissingParameter(name.into()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Tensor)> {
        self.tensors.iter().map(|(k, v)| (*k, v))
    }

    /// A copy of the parameters that does not propagate gradients.
    #[must_use]
    pub fn detach(&self) -> Self {
        Self {
            distribution: self.distribution,
            action_shape: self.action_shape.clone(),
            tensors: self.tensors.iter().map(|(k, v)| (*k, v.detach())).collect(),
        }
    }

    /// Check that two parameter sets describe the same kind of distribution.
    pub fn check_comparable(&self, other: &Self) -> Result<(), DistributionError> {
        if self.distribution == other.distribution && self.action_shape == other.action_shape {
            Ok(())
        } else {
            Err(DistributionError::Incomparable(
                self.to_string(),
                other.to_string(),
            ))
        }
    }
}

impl fmt::Display for DistributionParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{:?}", self.distribution, self.action_shape)
    }
}

/// A distribution head over an action space.
pub trait Distribution: fmt::Debug {
    /// Name of this distribution variant.
    fn name(&self) -> &'static str;

    /// Element kind and per-instance shape of actions.
    fn action_spec(&self) -> TensorSpec;

    /// Names and per-instance specs of the tensors returned by [`parametrize`](Self::parametrize).
    fn parameter_specs(&self) -> Vec<(&'static str, TensorSpec)>;

    /// Map a batch of inputs to distribution parameters.
    fn parametrize(&self, input: &Tensor) -> Result<DistributionParameters, DistributionError>;

    /// Draw a batch of actions.
    ///
    /// A temperature of `0` selects actions deterministically.
    fn sample(
        &self,
        parameters: &DistributionParameters,
        temperature: f64,
    ) -> Result<Tensor, DistributionError>;

    /// Log probability (density) of each action.
    fn log_probability(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError>;

    fn entropy(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError>;

    /// KL divergence `KL(parameters1 || parameters2)`; never negative.
    fn kl_divergence(
        &self,
        parameters1: &DistributionParameters,
        parameters2: &DistributionParameters,
    ) -> Result<Tensor, DistributionError>;

    /// Deterministic value estimate of taking each action.
    fn action_value(
        &self,
        _parameters: &DistributionParameters,
        _actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        Err(DistributionError::not_supported(self.name(), "action_value"))
    }

    /// Deterministic value estimate of each state.
    fn states_value(&self, _parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        Err(DistributionError::not_supported(self.name(), "states_value"))
    }
}

/// Reshape a batch of inputs into `f32` feature vectors of size `num_features`.
///
/// Head variables are `f32` regardless of the input kind.
fn flatten_input(input: &Tensor, num_features: i64) -> Result<Tensor, TchError> {
    input.f_reshape(&[-1, num_features])?.f_to_kind(Kind::Float)
}

/// Clamp values to be non-negative while passing gradients through unchanged.
///
/// Rounding can make a divergence slightly negative near zero,
/// where its curvature is still needed.
fn non_negative(x: &Tensor) -> Tensor {
    (x - x.detach()).where_self(&x.lt(0.0), x)
}

/// Sum over the trailing action dimension.
fn sum_action_dim(x: &Tensor) -> Tensor {
    x.sum_dim_intlist(&[-1], false, x.kind())
}

/// Configuration of a distribution head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistributionConfig {
    Categorical {
        num_actions: i64,
    },
    Gaussian {
        action_dim: i64,
    },
    Beta {
        action_dim: i64,
        #[serde(default)]
        min_value: f64,
        #[serde(default = "one")]
        max_value: f64,
        #[serde(default)]
        seed: u64,
    },
    Bernoulli {
        action_dim: i64,
    },
}

const fn one() -> f64 {
    1.0
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self::Categorical { num_actions: 2 }
    }
}

impl DistributionConfig {
    /// Build a distribution head for inputs described by `input`.
    ///
    /// Head variables are created under `path`.
    pub fn build(
        &self,
        path: &nn::Path,
        input: &TensorSpec,
    ) -> Result<Box<dyn Distribution>, ConfigError> {
        if !is_float_kind(input.kind) {
            return Err(ConfigError::NonFloatInput(input.kind));
        }
        let num_features = shape_size(&input.shape);
        let positive = |name: &'static str, value: i64| {
            if value > 0 {
                Ok(())
            } else {
                Err(ConfigError::out_of_range(name, value as f64, "> 0"))
            }
        };
        Ok(match *self {
            Self::Categorical { num_actions } => {
                positive("num_actions", num_actions)?;
                Box::new(Categorical::new(path, num_features, num_actions))
            }
            Self::Gaussian { action_dim } => {
                positive("action_dim", action_dim)?;
                Box::new(Gaussian::new(path, num_features, action_dim))
            }
            Self::Beta {
                action_dim,
                min_value,
                max_value,
                seed,
            } => {
                positive("action_dim", action_dim)?;
                if min_value.partial_cmp(&max_value) != Some(Ordering::Less) {
                    return Err(ConfigError::out_of_range(
                        "max_value",
                        max_value,
                        "> min_value",
                    ));
                }
                Box::new(Beta::new(
                    path,
                    num_features,
                    action_dim,
                    (min_value, max_value),
                    seed,
                ))
            }
            Self::Bernoulli { action_dim } => {
                positive("action_dim", action_dim)?;
                Box::new(Bernoulli::new(path, num_features, action_dim))
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tch::{nn::VarStore, Device};

    /// Build a distribution and a batch of random inputs for it.
    pub fn build(config: &DistributionConfig, batch_size: i64) -> (VarStore, Box<dyn Distribution>, Tensor) {
        tch::manual_seed(7);
        let vs = VarStore::new(Device::Cpu);
        let distribution = config
            .build(&vs.root(), &TensorSpec::new(Kind::Float, vec![4]))
            .unwrap();
        let input = Tensor::randn(&[batch_size, 4], (Kind::Float, Device::Cpu)) * 2.0;
        (vs, distribution, input)
    }

    /// Check the distribution properties shared by all variants.
    pub fn check_divergences(config: &DistributionConfig) {
        let (_vs, distribution, input) = build(config, 16);
        let p = distribution.parametrize(&input).unwrap();
        let q = distribution
            .parametrize(&(Tensor::randn_like(&input) * 2.0))
            .unwrap();

        let kl_pp = distribution.kl_divergence(&p, &p).unwrap();
        assert_eq!(kl_pp.size(), [16]);
        assert!(
            f64::from(kl_pp.abs().max()) < 1e-5,
            "KL(p, p) = {:?}",
            kl_pp
        );

        // Strictly positive: a divergence formula with a sign error would be clamped to zero.
        let kl_pq = distribution.kl_divergence(&p, &q).unwrap();
        assert_eq!(kl_pq.size(), [16]);
        assert!(f64::from(kl_pq.min()) > 0.0, "KL(p, q) = {:?}", kl_pq);
        let kl_qp = distribution.kl_divergence(&q, &p).unwrap();
        assert!(f64::from(kl_qp.min()) > 0.0, "KL(q, p) = {:?}", kl_qp);
    }

    /// Check that samples have the action spec and finite log probabilities.
    pub fn check_samples(config: &DistributionConfig) {
        let (_vs, distribution, input) = build(config, 8);
        let params = distribution.parametrize(&input).unwrap();
        let spec = distribution.action_spec();
        for &temperature in &[0.0, 0.5, 1.0] {
            let actions = distribution.sample(&params, temperature).unwrap();
            assert_eq!(actions.kind(), spec.kind);
            let mut expected_shape = vec![8];
            expected_shape.extend(&spec.shape);
            assert_eq!(actions.size(), expected_shape);

            let log_probs = distribution.log_probability(&params, &actions).unwrap();
            assert_eq!(log_probs.size(), [8]);
            assert!(bool::from(log_probs.isfinite().all()));
        }
        let entropy = distribution.entropy(&params).unwrap();
        assert_eq!(entropy.size(), [8]);
    }

    /// Temperature zero sampling is deterministic.
    pub fn check_deterministic_at_zero_temperature(config: &DistributionConfig) {
        let (_vs, distribution, input) = build(config, 8);
        let params = distribution.parametrize(&input).unwrap();
        let a = distribution.sample(&params, 0.0).unwrap();
        let b = distribution.sample(&params, 0.0).unwrap();
        assert_eq!(a, b);
    }
}
