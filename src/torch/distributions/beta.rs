//! Beta distribution over a bounded interval
use super::{
    flatten_input, non_negative, sum_action_dim, Distribution, DistributionError,
    DistributionParameters,
};
use crate::torch::arguments::TensorSpec;
use crate::Prng;
use rand::SeedableRng;
use rand_distr::Distribution as _;
use std::cell::RefCell;
use tch::{nn, nn::Module, Kind, Tensor};

const NAME: &str = "beta";
const ALPHA: &str = "alpha";
const BETA: &str = "beta";

/// Margin keeping actions away from the interval bounds where the log density diverges.
const EPSILON: f64 = 1e-6;

/// Beta distribution head with independent action dimensions.
///
/// Actions lie in the interval `[min_value, max_value]`.
/// Both concentration parameters are at least one so the density is unimodal.
#[derive(Debug)]
pub struct Beta {
    alpha_head: nn::Linear,
    beta_head: nn::Linear,
    num_features: i64,
    action_dim: i64,
    min_value: f64,
    max_value: f64,
    rng: RefCell<Prng>,
}

impl Beta {
    pub fn new(
        path: &nn::Path,
        num_features: i64,
        action_dim: i64,
        (min_value, max_value): (f64, f64),
        seed: u64,
    ) -> Self {
        let path = path / NAME;
        Self {
            alpha_head: nn::linear(&path / ALPHA, num_features, action_dim, Default::default()),
            beta_head: nn::linear(&path / BETA, num_features, action_dim, Default::default()),
            num_features,
            action_dim,
            min_value,
            max_value,
            rng: RefCell::new(Prng::seed_from_u64(seed)),
        }
    }

    /// Parameters with the given concentrations (each greater than zero).
    pub fn parameters(alpha: Tensor, beta: Tensor) -> DistributionParameters {
        let action_shape = alpha.size().last().map(|&d| vec![d]).unwrap_or_default();
        DistributionParameters::new(NAME, action_shape, [(ALPHA, alpha), (BETA, beta)])
    }

    fn width(&self) -> f64 {
        self.max_value - self.min_value
    }

    fn concentrations<'a>(
        parameters: &'a DistributionParameters,
    ) -> Result<(&'a Tensor, &'a Tensor), DistributionError> {
        Ok((parameters.get(ALPHA)?, parameters.get(BETA)?))
    }
}

/// Log of the beta function.
fn log_beta_fn(alpha: &Tensor, beta: &Tensor) -> Tensor {
    alpha.lgamma() + beta.lgamma() - (alpha + beta).lgamma()
}

/// `KL(Beta(alpha1, beta1) || Beta(alpha2, beta2))` of each action dimension.
///
/// Independent of the interval since both distributions share it.
fn kl_by_dimension(
    (alpha1, beta1): (&Tensor, &Tensor),
    (alpha2, beta2): (&Tensor, &Tensor),
) -> Tensor {
    log_beta_fn(alpha2, beta2) - log_beta_fn(alpha1, beta1)
        + (alpha1 - alpha2) * alpha1.digamma()
        + (beta1 - beta2) * beta1.digamma()
        + (alpha2 - alpha1 + beta2 - beta1) * (alpha1 + beta1).digamma()
}

impl Distribution for Beta {
    fn name(&self) -> &'static str {
        NAME
    }

    fn action_spec(&self) -> TensorSpec {
        TensorSpec::new(Kind::Float, vec![self.action_dim])
    }

    fn parameter_specs(&self) -> Vec<(&'static str, TensorSpec)> {
        vec![(ALPHA, self.action_spec()), (BETA, self.action_spec())]
    }

    fn parametrize(&self, input: &Tensor) -> Result<DistributionParameters, DistributionError> {
        let features = flatten_input(input, self.num_features)?;
        Ok(Self::parameters(
            self.alpha_head.forward(&features).softplus() + 1.0,
            self.beta_head.forward(&features).softplus() + 1.0,
        ))
    }

    fn sample(
        &self,
        parameters: &DistributionParameters,
        temperature: f64,
    ) -> Result<Tensor, DistributionError> {
        let (alpha, beta) = Self::concentrations(parameters)?;
        let mean = tch::no_grad(|| alpha / (alpha + beta));
        let unit = if temperature <= 0.0 {
            mean
        } else {
            let alphas: Vec<f64> = alpha.detach().to_kind(Kind::Double).flatten(0, -1).into();
            let betas: Vec<f64> = beta.detach().to_kind(Kind::Double).flatten(0, -1).into();
            let mut rng = self.rng.borrow_mut();
            let mut draws = Vec::with_capacity(alphas.len());
            for (a, b) in alphas.into_iter().zip(betas) {
                let beta_dist = rand_distr::Beta::new(a, b)
                    .map_err(|err| DistributionError::InvalidParameter(err.to_string()))?;
                draws.push(beta_dist.sample(&mut *rng));
            }
            let draws = Tensor::of_slice(&draws)
                .f_reshape(&alpha.size())?
                .f_to_kind(alpha.kind())?;
            &mean + temperature * (draws - &mean)
        };
        Ok(unit * self.width() + self.min_value)
    }

    fn log_probability(
        &self,
        parameters: &DistributionParameters,
        actions: &Tensor,
    ) -> Result<Tensor, DistributionError> {
        let (alpha, beta) = Self::concentrations(parameters)?;
        let x = ((actions - self.min_value) / self.width()).clamp(EPSILON, 1.0 - EPSILON);
        let log_density = (alpha - 1.0) * x.log() + (beta - 1.0) * (-&x).log1p()
            - log_beta_fn(alpha, beta)
            - self.width().ln();
        Ok(sum_action_dim(&log_density))
    }

    fn entropy(&self, parameters: &DistributionParameters) -> Result<Tensor, DistributionError> {
        let (alpha, beta) = Self::concentrations(parameters)?;
        let total = alpha + beta;
        let entropy = log_beta_fn(alpha, beta)
            - (alpha - 1.0) * alpha.digamma()
            - (beta - 1.0) * beta.digamma()
            + (&total - 2.0) * total.digamma()
            + self.width().ln();
        Ok(sum_action_dim(&entropy))
    }

    fn kl_divergence(
        &self,
        parameters1: &DistributionParameters,
        parameters2: &DistributionParameters,
    ) -> Result<Tensor, DistributionError> {
        parameters1.check_comparable(parameters2)?;
        let (alpha1, beta1) = Self::concentrations(parameters1)?;
        let (alpha2, beta2) = Self::concentrations(parameters2)?;
        let kl = kl_by_dimension((alpha1, beta1), (alpha2, beta2));
        Ok(non_negative(&sum_action_dim(&kl)))
    }
}
