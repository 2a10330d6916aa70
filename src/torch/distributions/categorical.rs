//! Categorical distribution
use super::{flatten_input, non_negative, Distribution, DistributionError, DistributionParameters};
use crate::torch::arguments::TensorSpec;
use crate::torch::utils::clamp_float_min;
use tch::{nn, nn::Module, Kind, Tensor};

const NAME: &str = "categorical";
const ACTION_VALUES: &str = "action_values";
const LOGITS: &str = "logits";

/// Categorical distribution head over `num_actions` discrete actions.
///
/// Parameters:
/// * `action_values` - Unnormalized head outputs, shape `[BATCH, NUM_ACTIONS]`.
/// * `logits` - Normalized log probability of each action, shape `[BATCH, NUM_ACTIONS]`.
#[derive(Debug)]
pub struct Categorical {
    head: nn::Linear,
    num_features: i64,
    num_actions: i64,
}

impl Categorical {
    pub fn new(path: &nn::Path, num_features: i64, num_actions: i64) -> Self {
        Self {
            head: nn::linear(path / NAME, num_features, num_actions, Default::default()),
            num_features,
            num_actions,
        }
    }

    /// Parameters for the given unnormalized action values.
    pub fn parameters(action_values: Tensor) -> DistributionParameters {
        let logits = action_values.log_softmax(-1, action_values.kind());
        DistributionParameters::new(
            NAME,
            Vec::new(),
            [(ACTION_VALUES, action_values), (LOGITS, logits)],
        )
    }
}

fn float_min(x: &Tensor) -> Result<Tensor, DistributionError> {
    clamp_float_min(x).map_err(DistributionError::NonFloatParameter)
}

impl Distribution for Categorical {
    fn name(&self) -> &'static str {
        NAME
    }

    fn action_spec(&self) -> TensorSpec {
        TensorSpec::scalar(Kind::Int64)
    }

    fn parameter_specs(&self) -> Vec<(&'static str, TensorSpec)> {
        let spec = TensorSpec::new(Kind::Float, vec![self.num_actions]);
        vec![(ACTION_VALUES, spec.clone()), (LOGITS, spec)]
    }

    fn parametrize(&self, input: &Tensor) -> Result<DistributionParameters, DistributionError> {
        let features = flatten_input(input, self.num_features)?;
        Ok(Self::parameters(self.head.forward(&features)))
    }

    fn sample(
        &self,
        parameters: &DistributionParameters,
        temperature: f64,
    ) -> Result<Tensor, DistributionError> {
        let action_values = parameters.get(ACTION_VALUES)?;
        if temperature <= 0.0 {
            return Ok(action_values.f_argmax(-1, false)?);
        }
        let probs = (action_values / temperature).f_softmax(-1, action_values.kind())?;
        Ok(probs.f_multinomial(1, true)?.f_select(-1, 0)?)
    }

    fn log_probability(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        Ok(parameters
            .get(LOGITS)?
            .f_gather(-1, &actions.f_unsqueeze(-1)?, false)?
            .f_select(-1, 0)?)
    }

    fn entropy(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        let logits = parameters.get(LOGITS)?;
        let clamped_logits = float_min(logits)?;
        Ok(-(clamped_logits * logits.exp()).sum_dim_intlist(&[-1], false, logits.kind()))
    }

    fn kl_divergence(
        &self,
        parameters1: &DistributionParameters,
        parameters2: &DistributionParameters,
    ) -> Result<Tensor, DistributionError> {
        parameters1.check_comparable(parameters2)?;
        let logits1 = parameters1.get(LOGITS)?;
        let logits2 = parameters2.get(LOGITS)?;
        let clamped_rel_logits = float_min(&(logits1 - logits2))?;
        Ok(non_negative(
            &(clamped_rel_logits * logits1.exp()).sum_dim_intlist(&[-1], false, logits1.kind()),
        ))
    }

    fn action_value(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        Ok(parameters
            .get(ACTION_VALUES)?
            .f_gather(-1, &actions.f_unsqueeze(-1)?, false)?
            .f_select(-1, 0)?)
    }

    fn states_value(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        Ok(parameters.get(ACTION_VALUES)?.f_logsumexp(&[-1], false)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn::VarStore, Device};

    fn categorical(num_actions: i64) -> (VarStore, Categorical) {
        let vs = VarStore::new(Device::Cpu);
        let distribution = Categorical::new(&vs.root(), 4, num_actions);
        (vs, distribution)
    }

    fn assert_close(expected: &Tensor, actual: &Tensor) {
        assert!(
            bool::from(expected.isclose(actual, 1e-6, 1e-6, false).all()),
            "expected: {:?}\nactual: {:?}",
            expected,
            actual
        );
    }

    #[test]
    fn log_probs() {
        let (_vs, distribution) = categorical(3);
        let params = Categorical::parameters(
            Tensor::of_slice(&[
                -1.0_f32, 0.0, 1.0, //
                -1.0, 0.0, 1.0, //
                -1.0, 0.0, 1.0, //
                0.0, 0.0, 0.0, //
            ])
            .reshape(&[-1, 3]),
        );
        let actions = Tensor::of_slice(&[0_i64, 1, 2, 0]);

        // Log normalizing constant for the [-1, 0.0, 1] distribution
        let log_normalizer = f32::ln(f32::exp(-1.0) + 1.0 + f32::exp(1.0));
        let expected = Tensor::of_slice(&[
            -1.0 - log_normalizer,
            -log_normalizer,
            1.0 - log_normalizer,
            f32::ln(3.0_f32.recip()),
        ]);
        assert_close(
            &expected,
            &distribution.log_probability(&params, &actions).unwrap(),
        );
    }

    #[test]
    fn entropies() {
        let (_vs, distribution) = categorical(3);
        let params = Categorical::parameters(
            Tensor::of_slice(&[
                f32::NEG_INFINITY,
                0.0,
                f32::NEG_INFINITY,
                //
                f32::NEG_INFINITY,
                0.0,
                0.0,
                //
                0.0,
                0.0,
                0.0,
                //
                0.1_f32.ln(),
                0.3_f32.ln(),
                0.6_f32.ln(),
            ])
            .reshape(&[-1, 3]),
        );
        let expected = Tensor::of_slice(&[
            0.0,
            -(0.5_f32.ln()),
            -(3.0_f32.recip().ln()),
            -0.1 * 0.1_f32.ln() - 0.3 * 0.3_f32.ln() - 0.6 * 0.6_f32.ln(),
        ]);
        assert_close(&expected, &distribution.entropy(&params).unwrap());
    }

    #[test]
    fn kl_divergence() {
        let (_vs, distribution) = categorical(3);
        let params_a = Categorical::parameters(
            Tensor::of_slice(&[
                0.2_f32, 0.3, 0.5, //
                0.2, 0.3, 0.5, //
                0.0, 1.0, 0.0, //
            ])
            .reshape(&[3, 3])
            .log(),
        );
        let params_b = Categorical::parameters(
            Tensor::of_slice(&[
                0.2_f32, 0.3, 0.5, //
                0.7, 0.2, 0.1, //
                0.2, 0.3, 0.5, //
            ])
            .reshape(&[3, 3])
            .log(),
        );
        let expected = Tensor::of_slice(&[
            0.0_f32,
            0.2 * (0.2_f32 / 0.7).ln() + 0.3 * (0.3_f32 / 0.2).ln() + 0.5 * (0.5_f32 / 0.1).ln(),
            (1.0_f32 / 0.3).ln(),
        ]);
        assert_close(
            &expected,
            &distribution.kl_divergence(&params_a, &params_b).unwrap(),
        );
    }

    #[test]
    fn zero_temperature_is_argmax() {
        let (_vs, distribution) = categorical(3);
        let params = Categorical::parameters(
            Tensor::of_slice(&[0.0_f32, 2.0, 1.0, 5.0, -1.0, 0.0]).reshape(&[2, 3]),
        );
        assert_eq!(
            distribution.sample(&params, 0.0).unwrap(),
            Tensor::of_slice(&[1_i64, 0])
        );
    }

    #[test]
    fn values() {
        let (_vs, distribution) = categorical(2);
        let params = Categorical::parameters(Tensor::of_slice(&[1.0_f32, 3.0]).reshape(&[1, 2]));
        assert_eq!(
            distribution
                .action_value(&params, &Tensor::of_slice(&[1_i64]))
                .unwrap(),
            Tensor::of_slice(&[3.0_f32])
        );
        assert_close(
            &Tensor::of_slice(&[(1.0_f32.exp() + 3.0_f32.exp()).ln()]),
            &distribution.states_value(&params).unwrap(),
        );
    }

    #[test]
    fn parametrize_shapes() {
        let (_vs, distribution) = categorical(5);
        let params = distribution
            .parametrize(&Tensor::zeros(&[6, 4], (Kind::Double, Device::Cpu)))
            .unwrap();
        assert_eq!(params.get(LOGITS).unwrap().size(), [6, 5]);
        assert_eq!(params.get(ACTION_VALUES).unwrap().size(), [6, 5]);
        assert_eq!(distribution.parameter_specs().len(), 2);
    }
}
