//! Bernoulli distribution
use super::{
    flatten_input, non_negative, sum_action_dim, Distribution, DistributionError,
    DistributionParameters,
};
use crate::torch::arguments::TensorSpec;
use crate::torch::utils::{clamp_float_finite, clamp_float_min};
use tch::{nn, nn::Module, Kind, Reduction, Tensor};

const NAME: &str = "bernoulli";
const LOGITS: &str = "logits";

/// Head of independent Bernoulli distributions over `action_dim` boolean actions.
///
/// Parameter `logits` is `log(p / (1 - p))` where `p` is the probability of `true`.
#[derive(Debug)]
pub struct Bernoulli {
    head: nn::Linear,
    num_features: i64,
    action_dim: i64,
}

impl Bernoulli {
    pub fn new(path: &nn::Path, num_features: i64, action_dim: i64) -> Self {
        Self {
            head: nn::linear(path / NAME, num_features, action_dim, Default::default()),
            num_features,
            action_dim,
        }
    }

    pub fn parameters(logits: Tensor) -> DistributionParameters {
        let action_shape = logits.size().last().map(|&d| vec![d]).unwrap_or_default();
        DistributionParameters::new(NAME, action_shape, [(LOGITS, logits)])
    }
}

fn float_finite(x: &Tensor) -> Result<Tensor, DistributionError> {
    clamp_float_finite(x).map_err(DistributionError::NonFloatParameter)
}

/// Elementwise binary cross entropy of `target` probabilities relative to `logits`.
fn cross_entropy(logits: &Tensor, target: &Tensor) -> Tensor {
    logits.binary_cross_entropy_with_logits::<&Tensor>(target, None, None, Reduction::None)
}

impl Distribution for Bernoulli {
    fn name(&self) -> &'static str {
        NAME
    }

    fn action_spec(&self) -> TensorSpec {
        TensorSpec::new(Kind::Bool, vec![self.action_dim])
    }

    fn parameter_specs(&self) -> Vec<(&'static str, TensorSpec)> {
        vec![(LOGITS, TensorSpec::new(Kind::Float, vec![self.action_dim]))]
    }

    fn parametrize(&self, input: &Tensor) -> Result<DistributionParameters, DistributionError> {
        let features = flatten_input(input, self.num_features)?;
        Ok(Self::parameters(self.head.forward(&features)))
    }

    /// Samples are boolean tensors
    fn sample(
        &self,
        parameters: &DistributionParameters,
        temperature: f64,
    ) -> Result<Tensor, DistributionError> {
        let logits = parameters.get(LOGITS)?;
        if temperature <= 0.0 {
            return Ok(logits.f_gt(0.0)?);
        }
        // bernoulli() samples are float 0.0 or 1.0
        Ok((logits / temperature).sigmoid().f_bernoulli()?.f_gt(0.5)?)
    }

    fn log_probability(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        let logits = parameters.get(LOGITS)?;
        let targets = actions.f_to_kind(logits.kind())?;
        Ok(-sum_action_dim(&cross_entropy(&float_finite(logits)?, &targets)))
    }

    fn entropy(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        let logits = parameters.get(LOGITS)?;
        Ok(sum_action_dim(&cross_entropy(
            &float_finite(logits)?,
            &logits.sigmoid(),
        )))
    }

    fn kl_divergence(
        &self,
        parameters1: &DistributionParameters,
        parameters2: &DistributionParameters,
    ) -> Result<Tensor, DistributionError> {
        parameters1.check_comparable(parameters2)?;
        let logits1 = parameters1.get(LOGITS)?;
        let logits2 = parameters2.get(LOGITS)?;
        let probs1 = logits1.sigmoid();
        let clamped_logits2 =
            clamp_float_min(logits2).map_err(DistributionError::NonFloatParameter)?;
        let kl = cross_entropy(&clamped_logits2, &probs1)
            - cross_entropy(&float_finite(logits1)?, &probs1);
        Ok(non_negative(&sum_action_dim(&kl)))
    }

    /// The logit of each `true` action and zero for each `false` action.
    fn action_value(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        let logits = parameters.get(LOGITS)?;
        Ok(sum_action_dim(&(logits * actions.f_to_kind(logits.kind())?)))
    }

    /// Log of the sum over `{false, true}` of exponentiated action values.
    fn states_value(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        Ok(sum_action_dim(&parameters.get(LOGITS)?.softplus()))
    }
}
