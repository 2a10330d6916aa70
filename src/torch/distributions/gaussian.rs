//! Diagonal Gaussian distribution
use super::{
    flatten_input, non_negative, sum_action_dim, Distribution, DistributionError,
    DistributionParameters,
};
use crate::torch::arguments::TensorSpec;
use std::f64::consts::PI;
use tch::{nn, nn::Module, Kind, Tensor};

const NAME: &str = "gaussian";
const MEAN: &str = "mean";
const LOG_STDDEV: &str = "log_stddev";

/// Bounds on the log standard deviation produced by the head.
const LOG_STDDEV_MIN: f64 = -20.0;
const LOG_STDDEV_MAX: f64 = 2.0;

/// Gaussian distribution head with independent action dimensions.
#[derive(Debug)]
pub struct Gaussian {
    mean_head: nn::Linear,
    log_stddev_head: nn::Linear,
    num_features: i64,
    action_dim: i64,
}

impl Gaussian {
    pub fn new(path: &nn::Path, num_features: i64, action_dim: i64) -> Self {
        let path = path / NAME;
        Self {
            mean_head: nn::linear(&path / MEAN, num_features, action_dim, Default::default()),
            log_stddev_head: nn::linear(
                &path / LOG_STDDEV,
                num_features,
                action_dim,
                Default::default(),
            ),
            num_features,
            action_dim,
        }
    }

    /// Parameters with the given means and (unclamped) log standard deviations.
    pub fn parameters(mean: Tensor, log_stddev: &Tensor) -> DistributionParameters {
        let action_shape = mean.size().last().map(|&d| vec![d]).unwrap_or_default();
        DistributionParameters::new(
            NAME,
            action_shape,
            [
                (MEAN, mean),
                (LOG_STDDEV, log_stddev.clamp(LOG_STDDEV_MIN, LOG_STDDEV_MAX)),
            ],
        )
    }
}

impl Distribution for Gaussian {
    fn name(&self) -> &'static str {
        NAME
    }

    fn action_spec(&self) -> TensorSpec {
        TensorSpec::new(Kind::Float, vec![self.action_dim])
    }

    fn parameter_specs(&self) -> Vec<(&'static str, TensorSpec)> {
        vec![(MEAN, self.action_spec()), (LOG_STDDEV, self.action_spec())]
    }

    fn parametrize(&self, input: &Tensor) -> Result<DistributionParameters, DistributionError> {
        let features = flatten_input(input, self.num_features)?;
        Ok(Self::parameters(
            self.mean_head.forward(&features),
            &self.log_stddev_head.forward(&features),
        ))
    }

    fn sample(
        &self,
        parameters: &DistributionParameters,
        temperature: f64,
    ) -> Result<Tensor, DistributionError> {
        let mean = parameters.get(MEAN)?;
        if temperature <= 0.0 {
            return Ok(mean.shallow_clone());
        }
        let stddev = parameters.get(LOG_STDDEV)?.exp();
        Ok(mean + temperature * stddev * mean.randn_like())
    }

    fn log_probability(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        let mean = parameters.get(MEAN)?;
        let log_stddev = parameters.get(LOG_STDDEV)?;
        let z = (actions - mean) / log_stddev.exp();
        Ok(sum_action_dim(
            &(-0.5 * z.square() - log_stddev - 0.5 * (2.0 * PI).ln()),
        ))
    }

    fn entropy(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        let log_stddev = parameters.get(LOG_STDDEV)?;
        Ok(sum_action_dim(&(log_stddev + 0.5 * (1.0 + (2.0 * PI).ln()))))
    }

    fn kl_divergence(
        &self,
        parameters1: &DistributionParameters,
        parameters2: &DistributionParameters,
    ) -> Result<Tensor, DistributionError> {
        parameters1.check_comparable(parameters2)?;
        let mean1 = parameters1.get(MEAN)?;
        let log_stddev1 = parameters1.get(LOG_STDDEV)?;
        let mean2 = parameters2.get(MEAN)?;
        let log_stddev2 = parameters2.get(LOG_STDDEV)?;

        // log(s2/s1) + (s1^2 + (m1 - m2)^2) / (2 s2^2) - 1/2
        let variance_ratio = (2.0_f64 * (log_stddev1 - log_stddev2)).exp();
        let scaled_mean_diff = ((mean1 - mean2) / log_stddev2.exp()).square();
        let kl = log_stddev2 - log_stddev1 + 0.5 * (variance_ratio + scaled_mean_diff) - 0.5;
        Ok(non_negative(&sum_action_dim(&kl)))
    }

    /// Log density of each action.
    fn action_value(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        self.log_probability(parameters, actions)
    }

    /// Log density at the mean.
    fn states_value(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        let log_stddev = parameters.get(LOG_STDDEV)?;
        Ok(sum_action_dim(&(-log_stddev - 0.5 * (2.0 * PI).ln())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    fn gaussian() -> (VarStore, Gaussian) {
        let vs = VarStore::new(Device::Cpu);
        let distribution = Gaussian::new(&vs.root(), 3, 2);
        (vs, distribution)
    }

    fn assert_close(expected: &Tensor, actual: &Tensor) {
        assert!(
            bool::from(expected.isclose(actual, 1e-5, 1e-5, false).all()),
            "expected: {:?}\nactual: {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn standard_normal_log_probability() {
        let (_vs, distribution) = gaussian();
        let params = Gaussian::parameters(
            Tensor::zeros(&[2, 2], (Kind::Float, Device::Cpu)),
            &Tensor::zeros(&[2, 2], (Kind::Float, Device::Cpu)),
        );
        let actions = Tensor::of_slice(&[0.0_f32, 0.0, 1.0, -1.0]).reshape(&[2, 2]);
        let log_2pi = (2.0 * std::f32::consts::PI).ln();
        let expected = Tensor::of_slice(&[-log_2pi, -1.0 - log_2pi]);
        assert_close(
            &expected,
            &distribution.log_probability(&params, &actions).unwrap(),
        );
        assert_close(
            &Tensor::of_slice(&[-log_2pi, -log_2pi]),
            &distribution.states_value(&params).unwrap(),
        );
    }

    #[test]
    fn entropy_of_scaled_normal() {
        let (_vs, distribution) = gaussian();
        let params = Gaussian::parameters(
            Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu)),
            &Tensor::of_slice(&[0.0_f32, 1.0]).reshape(&[1, 2]),
        );
        let per_dim = 0.5 * (1.0 + (2.0 * std::f32::consts::PI).ln());
        assert_close(
            &Tensor::of_slice(&[2.0 * per_dim + 1.0]),
            &distribution.entropy(&params).unwrap(),
        );
    }

    #[test]
    fn kl_divergence_known_value() {
        let (_vs, distribution) = gaussian();
        // KL(N(0, 1) || N(1, e^2)) per dimension = 1 + (1 + 1) / (2 e^2) - 1/2
        let params1 = Gaussian::parameters(
            Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu)),
            &Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu)),
        );
        let params2 = Gaussian::parameters(
            Tensor::ones(&[1, 2], (Kind::Float, Device::Cpu)),
            &Tensor::ones(&[1, 2], (Kind::Float, Device::Cpu)),
        );
        let per_dim = 0.5 + (-2.0_f32).exp();
        assert_close(
            &Tensor::of_slice(&[2.0 * per_dim]),
            &distribution.kl_divergence(&params1, &params2).unwrap(),
        );
    }

    #[test]
    fn log_stddev_clamped() {
        let params = Gaussian::parameters(
            Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu)),
            &Tensor::of_slice(&[-100.0_f32, 100.0]).reshape(&[1, 2]),
        );
        assert_eq!(
            params.get(LOG_STDDEV).unwrap(),
            &Tensor::of_slice(&[-20.0_f32, 2.0]).reshape(&[1, 2])
        );
    }

    #[test]
    fn zero_temperature_is_mean() {
        let (_vs, distribution) = gaussian();
        let mean = Tensor::of_slice(&[0.5_f32, -2.0]).reshape(&[1, 2]);
        let params = Gaussian::parameters(
            mean.copy(),
            &Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu)),
        );
        assert_eq!(distribution.sample(&params, 0.0).unwrap(), mean);
    }

    #[test]
    fn kl_hessian_in_mean_is_inverse_variance() {
        // Fisher information of a unit variance Gaussian in its mean is the identity
        let (_vs, distribution) = gaussian();
        let mean = Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu)).set_requires_grad(true);
        let log_stddev = Tensor::zeros(&[1, 2], (Kind::Float, Device::Cpu));
        let params = Gaussian::parameters(mean.shallow_clone(), &log_stddev);
        let kl = distribution
            .kl_divergence(&params.detach(), &params)
            .unwrap()
            .sum(Kind::Float);
        let grads = Tensor::run_backward(&[&kl], &[&mean], true, true);
        let v = Tensor::of_slice(&[1.0_f32, -3.0]).reshape(&[1, 2]);
        let grad_v = (&grads[0] * &v).sum(Kind::Float);
        let hvp = Tensor::run_backward(&[&grad_v], &[&mean], false, false);
        assert_close(&v, &hvp[0]);
    }
}
