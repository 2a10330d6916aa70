//! Policy model: owns the policy variables and applies the updates of an optimizer tree.
use super::arguments::{names, Arguments, ArgumentsSpec, TensorSpec};
use super::baseline::{Baseline, BaselineConfig};
use super::distributions::{
    Distribution, DistributionConfig, DistributionError, DistributionParameters,
};
use super::mlp::{Mlp, MlpConfig};
use super::objectives::PolicyGradientObjective;
use super::optimizers::{BuildOptimizer, Optimizer, OptimizerConfig, OptimizerError, StepContext};
use super::utils::shape_size;
use super::variables::VariableSet;
use crate::error::{ConfigError, Error};
use crate::logging::StatsLogger;
use log::debug;
use serde::{Deserialize, Serialize};
use tch::{
    nn::{Module, VarStore},
    Device, Kind, TchError, Tensor,
};

/// Configuration of a [`PolicyModel`].
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyModelConfig {
    pub network: MlpConfig,
    pub distribution: DistributionConfig,
    pub objective: PolicyGradientObjective,
    /// Coefficient of the squared norm of the policy variables added to the loss.
    pub l2_regularization: f64,
    pub optimizer: OptimizerConfig,
    /// Optional state-value baseline with its own variables and optimizer.
    pub baseline: Option<BaselineConfig>,
}

impl PolicyModelConfig {
    /// Build a model for states described by `state_spec`.
    pub fn build(&self, state_spec: TensorSpec, device: Device) -> Result<PolicyModel, ConfigError> {
        self.objective.validate()?;
        if self.l2_regularization.is_nan() || self.l2_regularization < 0.0 {
            return Err(ConfigError::out_of_range(
                "l2_regularization",
                self.l2_regularization,
                ">= 0",
            ));
        }
        let vs = VarStore::new(device);
        let num_state_features = shape_size(&state_spec.shape);
        let network = Mlp::new(&(&vs.root() / "network"), num_state_features, &self.network);
        let distribution = self.distribution.build(
            &vs.root(),
            &TensorSpec::new(Kind::Float, vec![network.out_dim()]),
        )?;
        let policy = Policy {
            network,
            distribution,
            num_state_features,
        };
        let variables = VariableSet::from_var_store(&vs);
        let optimizer = self.optimizer.build_optimizer(&variables)?;
        let baseline = match &self.baseline {
            Some(config) => Some(config.build(state_spec.clone(), device)?),
            None => None,
        };
        debug!(
            "built policy model with {} variables ({} elements)",
            variables.len(),
            variables.num_elements()
        );
        Ok(PolicyModel {
            vs,
            policy,
            objective: self.objective,
            l2_regularization: self.l2_regularization,
            optimizer,
            variables,
            baseline,
            state_spec,
            global_step: 0,
        })
    }
}

/// Statistics of one policy update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateStats {
    /// Loss before the update.
    pub loss_before: f64,
    /// Loss after the update.
    pub loss_after: f64,
    /// Mean KL divergence of the updated policy from the policy before the update.
    pub kl_divergence: f64,
    /// Mean entropy of the updated policy.
    pub entropy: f64,
}

/// Network and distribution head: maps states to distribution parameters.
#[derive(Debug)]
struct Policy {
    network: Mlp,
    distribution: Box<dyn Distribution>,
    num_state_features: i64,
}

impl Policy {
    fn parametrize(&self, states: &Tensor) -> Result<DistributionParameters, DistributionError> {
        let features = states
            .f_reshape(&[-1, self.num_state_features])?
            .f_to_kind(Kind::Float)?;
        self.distribution.parametrize(&self.network.forward(&features))
    }
}

/// Policy trained by a tree of optimizers.
///
/// The model owns the policy variables. Each update builds the loss and KL divergence closures
/// over an [`Arguments`] bundle, asks the optimizer tree for a delta and applies it.
pub struct PolicyModel {
    vs: VarStore,
    policy: Policy,
    objective: PolicyGradientObjective,
    l2_regularization: f64,
    optimizer: Box<dyn Optimizer>,
    variables: VariableSet,
    baseline: Option<Baseline>,
    state_spec: TensorSpec,
    global_step: u64,
}

impl PolicyModel {
    pub const fn var_store(&self) -> &VarStore {
        &self.vs
    }

    pub const fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn distribution(&self) -> &dyn Distribution {
        self.policy.distribution.as_ref()
    }

    /// Number of updates applied so far.
    pub const fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Distribution parameters of the current policy for a batch of states.
    pub fn parametrize(&self, states: &Tensor) -> Result<DistributionParameters, DistributionError> {
        self.policy.parametrize(states)
    }

    /// Sample a batch of actions from the current policy.
    ///
    /// A temperature of `0` selects actions deterministically.
    pub fn act(&self, states: &Tensor, temperature: f64) -> Result<Tensor, DistributionError> {
        tch::no_grad(|| {
            let parameters = self.policy.parametrize(states)?;
            self.policy.distribution.sample(&parameters, temperature)
        })
    }

    pub const fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    /// Advantages of a batch of returns: the returns less the baseline state values.
    ///
    /// Without a baseline the advantages are the returns.
    pub fn advantages(&self, states: &Tensor, returns: &Tensor) -> Result<Tensor, Error> {
        let returns = returns.f_to_kind(Kind::Float)?;
        Ok(match &self.baseline {
            Some(baseline) => returns.f_sub(&baseline.state_values(states)?)?,
            None => returns,
        })
    }

    /// Fit the baseline to a batch of returns.
    ///
    /// Returns the mean squared error after the update, or `None` without a baseline.
    pub fn update_baseline(
        &mut self,
        states: &Tensor,
        returns: &Tensor,
        logger: &mut dyn StatsLogger,
    ) -> Result<Option<f64>, Error> {
        match &mut self.baseline {
            Some(baseline) => Ok(Some(baseline.update(states, returns, logger)?)),
            None => Ok(None),
        }
    }

    /// Specification of the argument bundles accepted by [`update`](Self::update).
    pub fn arguments_spec(&self) -> ArgumentsSpec {
        let mut spec = ArgumentsSpec::new()
            .with(names::STATES, self.state_spec.clone())
            .with(names::ACTIONS, self.policy.distribution.action_spec())
            .with(names::ADVANTAGES, TensorSpec::scalar(Kind::Float))
            .with(names::OLD_LOG_PROBS, TensorSpec::scalar(Kind::Float));
        for (name, parameter_spec) in self.policy.distribution.parameter_specs() {
            spec.insert(old_parameter_name(name), parameter_spec);
        }
        spec
    }

    /// Build the argument bundle for an update from a batch of experience.
    ///
    /// Records the log probabilities and distribution parameters of the current policy.
    pub fn arguments(
        &self,
        states: &Tensor,
        actions: &Tensor,
        advantages: &Tensor,
    ) -> Result<Arguments, Error> {
        let mut entries = vec![
            (names::STATES.to_string(), states.shallow_clone()),
            (names::ACTIONS.to_string(), actions.shallow_clone()),
            (
                names::ADVANTAGES.to_string(),
                advantages.f_to_kind(Kind::Float)?,
            ),
        ];
        tch::no_grad(|| -> Result<(), Error> {
            let parameters = self.policy.parametrize(states)?;
            let log_probs = self
                .policy
                .distribution
                .log_probability(&parameters, actions)?;
            entries.push((names::OLD_LOG_PROBS.to_string(), log_probs));
            for (name, tensor) in parameters.detach().iter() {
                entries.push((old_parameter_name(name), tensor.shallow_clone()));
            }
            Ok(())
        })?;
        Ok(self.arguments_spec().build(entries)?)
    }

    /// Distribution parameters of the policy that built an argument bundle.
    fn old_parameters(&self, arguments: &Arguments) -> Result<DistributionParameters, Error> {
        let distribution = &self.policy.distribution;
        let tensors = distribution
            .parameter_specs()
            .into_iter()
            .map(|(name, _)| -> Result<_, Error> {
                Ok((name, arguments.get(&old_parameter_name(name))?.shallow_clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DistributionParameters::new(
            distribution.name(),
            distribution.action_spec().shape,
            tensors,
        ))
    }

    /// Update the policy with one step of the optimizer tree.
    pub fn update(
        &mut self,
        arguments: &Arguments,
        logger: &mut dyn StatsLogger,
    ) -> Result<UpdateStats, Error> {
        let old_parameters = self.old_parameters(arguments)?;
        let policy = &self.policy;
        let objective = &self.objective;
        let variables = &self.variables;
        let l2_regularization = self.l2_regularization;

        let fn_loss = |arguments: &Arguments| -> Result<Tensor, OptimizerError> {
            let parameters = policy.parametrize(arguments.get(names::STATES)?)?;
            let loss = objective.loss(policy.distribution.as_ref(), &parameters, arguments)?;
            if l2_regularization > 0.0 {
                Ok(loss + l2_regularization * squared_norm(variables)?)
            } else {
                Ok(loss)
            }
        };
        let fn_kl_divergence = |arguments: &Arguments| -> Result<Tensor, OptimizerError> {
            let parameters = policy.parametrize(arguments.get(names::STATES)?)?;
            Ok(policy
                .distribution
                .kl_divergence(&old_parameters, &parameters)?
                .mean(Kind::Float))
        };
        let context = StepContext::new(&fn_loss).with_kl_divergence(&fn_kl_divergence);

        let loss_before = tch::no_grad(|| fn_loss(arguments))?;
        let delta = self
            .optimizer
            .step(variables, arguments, &context, logger)?;
        variables.f_apply(&delta)?;
        self.global_step += 1;

        let stats = tch::no_grad(|| -> Result<UpdateStats, OptimizerError> {
            let parameters = policy.parametrize(arguments.get(names::STATES)?)?;
            Ok(UpdateStats {
                loss_before: f64::from(&loss_before),
                loss_after: f64::from(fn_loss(arguments)?),
                kl_divergence: f64::from(
                    policy
                        .distribution
                        .kl_divergence(&old_parameters, &parameters)?
                        .mean(Kind::Float),
                ),
                entropy: f64::from(policy.distribution.entropy(&parameters)?.mean(Kind::Float)),
            })
        })?;
        logger.log_scalar("loss", stats.loss_after);
        logger.log_scalar("kl_divergence", stats.kl_divergence);
        logger.log_scalar("entropy", stats.entropy);
        logger.log_counter_increment("global_step", 1);
        Ok(stats)
    }
}

/// Sum of the squares of every variable element.
fn squared_norm(variables: &VariableSet) -> Result<Tensor, TchError> {
    let squares = variables
        .tensors()
        .iter()
        .map(|t| t.f_square()?.f_sum(Kind::Float))
        .collect::<Result<Vec<_>, _>>()?;
    Tensor::f_stack(&squares, 0)?.f_sum(Kind::Float)
}

fn old_parameter_name(name: &str) -> String {
    format!("{}{}", names::OLD_PREFIX, name)
}

#[cfg(test)]
mod tests {
    use super::super::arguments::ArgumentsError;
    use super::super::optimizers::{AdamConfig, OptimizedStepConfig, SgdConfig};
    use super::*;
    use crate::logging::testing::RecordingLogger;
    use rstest::rstest;

    const NUM_STATE_FEATURES: i64 = 3;
    const BATCH_SIZE: i64 = 64;

    fn model(distribution: DistributionConfig) -> PolicyModel {
        tch::manual_seed(1);
        let optimizer = match OptimizerConfig::trpo(1.0) {
            OptimizerConfig::OptimizedStep(config) => {
                OptimizerConfig::OptimizedStep(OptimizedStepConfig {
                    ls_max_kl_divergence: Some(0.01),
                    ..config
                })
            }
            config => config,
        };
        PolicyModelConfig {
            network: MlpConfig {
                hidden_sizes: vec![16],
                ..MlpConfig::default()
            },
            distribution,
            optimizer,
            ..PolicyModelConfig::default()
        }
        .build(
            TensorSpec::new(Kind::Float, vec![NUM_STATE_FEATURES]),
            Device::Cpu,
        )
        .unwrap()
    }

    fn states() -> Tensor {
        Tensor::randn(&[BATCH_SIZE, NUM_STATE_FEATURES], (Kind::Float, Device::Cpu))
    }

    fn categorical() -> DistributionConfig {
        DistributionConfig::Categorical { num_actions: 3 }
    }

    #[test]
    fn arguments_record_old_policy() {
        let model = model(categorical());
        let states = states();
        let actions = model.act(&states, 1.0).unwrap();
        let advantages = Tensor::ones(&[BATCH_SIZE], (Kind::Float, Device::Cpu));
        let arguments = model.arguments(&states, &actions, &advantages).unwrap();

        assert_eq!(arguments.batch_size(), BATCH_SIZE);
        let names: Vec<_> = arguments.names().collect();
        assert_eq!(
            names,
            [
                "actions",
                "advantages",
                "old/action_values",
                "old/logits",
                "old_log_probs",
                "states"
            ]
        );
        let parameters = model.parametrize(&states).unwrap();
        assert_eq!(
            arguments.get("old/logits").unwrap(),
            parameters.get("logits").unwrap()
        );
        assert!(!arguments.get("old/logits").unwrap().requires_grad());
    }

    #[test]
    fn arguments_reject_wrong_action_kind() {
        let model = model(categorical());
        let states = states();
        let actions = Tensor::zeros(&[BATCH_SIZE], (Kind::Float, Device::Cpu));
        let advantages = Tensor::ones(&[BATCH_SIZE], (Kind::Float, Device::Cpu));
        assert!(matches!(
            model.arguments(&states, &actions, &advantages),
            Err(Error::Distribution(_)) | Err(Error::Arguments(ArgumentsError::KindMismatch { .. }))
        ));
    }

    #[test]
    fn act_at_zero_temperature_is_deterministic() {
        let model = model(categorical());
        let states = states();
        assert_eq!(
            model.act(&states, 0.0).unwrap(),
            model.act(&states, 0.0).unwrap()
        );
    }

    #[rstest]
    #[case::categorical(categorical())]
    #[case::gaussian(DistributionConfig::Gaussian { action_dim: 2 })]
    #[case::bernoulli(DistributionConfig::Bernoulli { action_dim: 2 })]
    #[case::beta(DistributionConfig::Beta { action_dim: 2, min_value: -1.0, max_value: 1.0, seed: 3 })]
    fn update_does_not_increase_loss(#[case] distribution: DistributionConfig) {
        let mut model = model(distribution);
        let states = states();
        let actions = model.act(&states, 1.0).unwrap();
        let advantages = Tensor::randn(&[BATCH_SIZE], (Kind::Float, Device::Cpu));
        let mut logger = RecordingLogger::default();
        for step in 1..=3 {
            let arguments = model.arguments(&states, &actions, &advantages).unwrap();
            let stats = model.update(&arguments, &mut logger).unwrap();
            assert!(stats.loss_after <= stats.loss_before, "{:?}", stats);
            assert!(stats.kl_divergence >= 0.0);
            assert!(stats.kl_divergence <= 0.01 + 1e-6, "{:?}", stats);
            assert!(stats.entropy.is_finite());
            assert_eq!(model.global_step(), step);
        }
        assert_eq!(logger.scalars("loss").len(), 3);
    }

    #[test]
    fn updates_favour_advantageous_action() {
        let mut model = model(categorical());
        let states = states();
        let actions = Tensor::arange(BATCH_SIZE, (Kind::Int64, Device::Cpu)).remainder(3);
        // action 0 is good, the others are bad
        let advantages = actions.eq(0).to_kind(Kind::Float) * 2 - 1;

        let probability_of_good_action = |model: &PolicyModel| {
            let parameters = model.parametrize(&states).unwrap();
            f64::from(
                parameters
                    .get("logits")
                    .unwrap()
                    .exp()
                    .select(-1, 0)
                    .mean(Kind::Float),
            )
        };
        let initial = probability_of_good_action(&model);
        for _ in 0..5 {
            let arguments = model.arguments(&states, &actions, &advantages).unwrap();
            model.update(&arguments, &mut ()).unwrap();
        }
        assert!(probability_of_good_action(&model) > initial);
    }

    #[test]
    fn l2_regularization_shrinks_variables() {
        tch::manual_seed(2);
        let l2_regularization = 0.5;
        let mut model = PolicyModelConfig {
            distribution: categorical(),
            l2_regularization,
            optimizer: OptimizerConfig::Sgd(SgdConfig {
                learning_rate: 0.1,
                ..SgdConfig::default()
            }),
            ..PolicyModelConfig::default()
        }
        .build(
            TensorSpec::new(Kind::Float, vec![NUM_STATE_FEATURES]),
            Device::Cpu,
        )
        .unwrap();
        let states = states();
        let actions = model.act(&states, 1.0).unwrap();
        // Without advantages the loss is only the regularization.
        let advantages = Tensor::zeros(&[BATCH_SIZE], (Kind::Float, Device::Cpu));
        let norm = |model: &PolicyModel| f64::from(squared_norm(model.variables()).unwrap());

        let before = norm(&model);
        let arguments = model.arguments(&states, &actions, &advantages).unwrap();
        let stats = model.update(&arguments, &mut ()).unwrap();
        let after = norm(&model);

        assert!((stats.loss_before - l2_regularization * before).abs() < 1e-4 * before);
        assert!((stats.loss_after - l2_regularization * after).abs() < 1e-4 * before);
        // gradient descent on l2 |x|^2 scales x by 1 - 2 l2 lr
        assert!((after - 0.81 * before).abs() < 1e-3 * before, "{} -> {}", before, after);
    }

    #[rstest]
    #[case::negative(-0.1)]
    #[case::nan(f64::NAN)]
    fn invalid_l2_regularization(#[case] l2_regularization: f64) {
        let config = PolicyModelConfig {
            l2_regularization,
            ..PolicyModelConfig::default()
        };
        assert!(matches!(
            config.build(TensorSpec::new(Kind::Float, vec![2]), Device::Cpu),
            Err(ConfigError::OutOfRange {
                name: "l2_regularization",
                ..
            })
        ));
    }

    #[test]
    fn advantages_without_baseline_are_returns() {
        let mut model = model(categorical());
        let states = states();
        let returns = Tensor::randn(&[BATCH_SIZE], (Kind::Float, Device::Cpu));
        assert_eq!(model.advantages(&states, &returns).unwrap(), returns);
        assert_eq!(
            model.update_baseline(&states, &returns, &mut ()).unwrap(),
            None
        );
    }

    #[test]
    fn baseline_trains_separately_from_policy() {
        tch::manual_seed(4);
        let mut model = PolicyModelConfig {
            distribution: DistributionConfig::Gaussian { action_dim: 1 },
            baseline: Some(BaselineConfig {
                optimizer: OptimizerConfig::Adam(AdamConfig {
                    learning_rate: 1e-2,
                    ..AdamConfig::default()
                }),
                ..BaselineConfig::default()
            }),
            ..PolicyModelConfig::default()
        }
        .build(
            TensorSpec::new(Kind::Float, vec![NUM_STATE_FEATURES]),
            Device::Cpu,
        )
        .unwrap();
        let states = states();
        let returns = states.sum_dim_intlist(&[-1], false, Kind::Float);

        let values = model.baseline().unwrap().state_values(&states).unwrap();
        assert_eq!(
            model.advantages(&states, &returns).unwrap(),
            &returns - &values
        );

        let policy_before = model.parametrize(&states).unwrap().get("mean").unwrap().copy();
        let mut logger = RecordingLogger::default();
        let first = model
            .update_baseline(&states, &returns, &mut logger)
            .unwrap()
            .unwrap();
        let second = model
            .update_baseline(&states, &returns, &mut logger)
            .unwrap()
            .unwrap();
        assert!(second < first, "{} then {}", first, second);
        assert_eq!(logger.scalars("baseline/mse"), vec![first, second]);
        // the policy variables are untouched
        assert_eq!(
            model.parametrize(&states).unwrap().get("mean").unwrap(),
            &policy_before
        );
    }

    #[test]
    fn invalid_objective_is_config_error() {
        let config = PolicyModelConfig {
            objective: PolicyGradientObjective {
                clipping_value: 1.5,
                ..PolicyGradientObjective::default()
            },
            ..PolicyModelConfig::default()
        };
        assert!(matches!(
            config.build(TensorSpec::new(Kind::Float, vec![2]), Device::Cpu),
            Err(ConfigError::OutOfRange { .. })
        ));
    }
}
