//! Policy-gradient objective
use super::arguments::{names, Arguments, ArgumentsError};
use super::distributions::{Distribution, DistributionError, DistributionParameters};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};
use thiserror::Error;

/// Error evaluating an objective.
#[derive(Error, Debug)]
pub enum ObjectiveError {
    #[error(transparent)]
    Arguments(#[from] ArgumentsError),
    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

/// Policy-gradient loss with optional probability-ratio clipping.
///
/// With `ratio_based`, the loss of each instance is `-min(r * A, clip(r, 1 - e, 1 + e) * A)`
/// where `r` is the ratio of the action probability under the current policy
/// to its probability under the policy that collected the data, `A` is the advantage and
/// `e` is `clipping_value`. A `clipping_value` of zero disables clipping: `-r * A`.
///
/// Without `ratio_based`, the loss of each instance is the score-function surrogate
/// `-log_prob * A`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyGradientObjective {
    pub ratio_based: bool,
    pub clipping_value: f64,
    /// Coefficient of the mean policy entropy subtracted from the loss.
    pub entropy_regularization: f64,
}

impl Default for PolicyGradientObjective {
    fn default() -> Self {
        Self {
            ratio_based: true,
            clipping_value: 0.2,
            entropy_regularization: 0.0,
        }
    }
}

impl PolicyGradientObjective {
    /// Check that all hyperparameters are within range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.clipping_value) {
            return Err(ConfigError::out_of_range(
                "clipping_value",
                self.clipping_value,
                "in [0, 1)",
            ));
        }
        if self.entropy_regularization.is_nan() || self.entropy_regularization < 0.0 {
            return Err(ConfigError::out_of_range(
                "entropy_regularization",
                self.entropy_regularization,
                ">= 0",
            ));
        }
        Ok(())
    }

    /// Loss of each batch instance.
    ///
    /// # Args
    /// * `log_probs` - Log probability of each action under the current policy.
    /// * `old_log_probs` - Log probability of each action under the data-collecting policy.
    /// * `advantages` - Advantage of each action.
    pub fn instance_losses(
        &self,
        log_probs: &Tensor,
        old_log_probs: &Tensor,
        advantages: &Tensor,
    ) -> Tensor {
        if !self.ratio_based {
            return -(log_probs * advantages);
        }
        let ratio = (log_probs - old_log_probs).exp();
        let unclipped = &ratio * advantages;
        if self.clipping_value > 0.0 {
            let clipped =
                ratio.clamp(1.0 - self.clipping_value, 1.0 + self.clipping_value) * advantages;
            -unclipped.min_other(&clipped)
        } else {
            -unclipped
        }
    }

    /// Scalar loss: the batch mean of the instance losses, less any entropy regularization.
    pub fn loss(
        &self,
        distribution: &dyn Distribution,
        parameters: &DistributionParameters,
        arguments: &Arguments,
    ) -> Result<Tensor, ObjectiveError> {
        let actions = arguments.get(names::ACTIONS)?;
        let advantages = arguments.get(names::ADVANTAGES)?;
        let old_log_probs = arguments.get(names::OLD_LOG_PROBS)?;

        let log_probs = distribution.log_probability(parameters, actions)?;
        let kind = log_probs.kind();
        let mut loss = self
            .instance_losses(&log_probs, old_log_probs, advantages)
            .mean(kind);
        if self.entropy_regularization > 0.0 {
            let entropy = distribution.entropy(parameters)?.mean(kind);
            loss = loss - self.entropy_regularization * entropy;
        }
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    /// Gradient of the loss of a single instance with respect to its log probability.
    fn loss_gradient(objective: &PolicyGradientObjective, ratio: f64, advantage: f64) -> f64 {
        let log_prob = Tensor::of_slice(&[ratio.ln()]).set_requires_grad(true);
        let loss = objective
            .instance_losses(
                &log_prob,
                &Tensor::of_slice(&[0.0]),
                &Tensor::of_slice(&[advantage]),
            )
            .sum(Kind::Double);
        let grads = Tensor::run_backward(&[&loss], &[&log_prob], false, false);
        f64::from(&grads[0])
    }

    const CLIPPED: PolicyGradientObjective = PolicyGradientObjective {
        ratio_based: true,
        clipping_value: 0.2,
        entropy_regularization: 0.0,
    };
    const UNCLIPPED: PolicyGradientObjective = PolicyGradientObjective {
        ratio_based: true,
        clipping_value: 0.0,
        entropy_regularization: 0.0,
    };

    #[rstest]
    #[case::above_upper_bound(1.5)]
    #[case::far_above_upper_bound(3.0)]
    fn clipped_gradient_vanishes_beyond_bound(#[case] ratio: f64) {
        assert_eq!(loss_gradient(&CLIPPED, ratio, 1.0), 0.0);
        // d(-r A)/d(log r) = -r A
        assert!((loss_gradient(&UNCLIPPED, ratio, 1.0) + ratio).abs() < 1e-9);
    }

    #[rstest]
    #[case::inside(1.1)]
    #[case::below_lower_bound(0.5)]
    fn clipped_gradient_within_bound(#[case] ratio: f64) {
        assert!((loss_gradient(&CLIPPED, ratio, 1.0) + ratio).abs() < 1e-9);
    }

    #[test]
    fn clipped_loss_stops_decreasing() {
        let losses: Vec<f64> = [1.1, 1.2, 1.5, 2.0]
            .iter()
            .map(|&r: &f64| {
                f64::from(CLIPPED.instance_losses(
                    &Tensor::of_slice(&[r.ln()]),
                    &Tensor::of_slice(&[0.0]),
                    &Tensor::of_slice(&[1.0]),
                ))
            })
            .collect();
        assert!(losses[0] > losses[1]);
        assert!((losses[1] - losses[2]).abs() < 1e-9);
        assert!((losses[2] - losses[3]).abs() < 1e-9);
    }

    #[test]
    fn score_function_surrogate() {
        let objective = PolicyGradientObjective {
            ratio_based: false,
            ..PolicyGradientObjective::default()
        };
        let losses = objective.instance_losses(
            &Tensor::of_slice(&[-1.0, -2.0]),
            &Tensor::of_slice(&[0.0, 0.0]),
            &Tensor::of_slice(&[2.0, -1.0]),
        );
        assert_eq!(losses, Tensor::of_slice(&[2.0, -2.0]));
    }

    #[rstest]
    #[case::negative_clipping(-0.1, 0.0)]
    #[case::clipping_one(1.0, 0.0)]
    #[case::negative_entropy(0.2, -1.0)]
    #[case::nan_entropy(0.2, f64::NAN)]
    fn validate_rejects(#[case] clipping_value: f64, #[case] entropy_regularization: f64) {
        let objective = PolicyGradientObjective {
            ratio_based: true,
            clipping_value,
            entropy_regularization,
        };
        assert!(matches!(
            objective.validate(),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn default_is_valid() {
        assert!(PolicyGradientObjective::default().validate().is_ok());
    }
}
