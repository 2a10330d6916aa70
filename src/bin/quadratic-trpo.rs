//! Train a Gaussian policy to place its actions at a state-dependent target.
//!
//! The reward is the negative squared distance between the action and `W s` so the
//! optimal policy mean is linear in the state. A state-value baseline is fit to the
//! rewards and subtracted from them to form the advantages. Optionally reads a
//! `PolicyModelConfig` from the JSON file named by the first argument.
use log::{debug, info};
use std::env;
use std::error::Error;
use std::fs;
use tch::{Device, Kind, Tensor};
use trpo_core::logging::{DisplayLogger, StatsLogger};
use trpo_core::torch::{BaselineConfig, DistributionConfig, PolicyModelConfig, TensorSpec};

const STATE_DIM: i64 = 3;
const ACTION_DIM: i64 = 2;
const BATCH_SIZE: i64 = 1024;
const NUM_UPDATES: u64 = 200;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    tch::manual_seed(0);

    let config: PolicyModelConfig = match env::args().nth(1) {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => PolicyModelConfig {
            distribution: DistributionConfig::Gaussian {
                action_dim: ACTION_DIM,
            },
            baseline: Some(BaselineConfig::default()),
            ..PolicyModelConfig::default()
        },
    };
    info!("config: {}", serde_json::to_string(&config)?);

    let mut model = config.build(
        TensorSpec::new(Kind::Float, vec![STATE_DIM]),
        Device::Cpu,
    )?;
    let weights = Tensor::randn(&[STATE_DIM, ACTION_DIM], (Kind::Float, Device::Cpu));
    let mut logger = DisplayLogger::default();

    for _ in 0..NUM_UPDATES {
        let states = Tensor::randn(&[BATCH_SIZE, STATE_DIM], (Kind::Float, Device::Cpu));
        let actions = model.act(&states, 1.0)?;
        let targets = states.matmul(&weights);
        let rewards = -(&actions - &targets)
            .square()
            .sum_dim_intlist(&[-1], false, Kind::Float);
        let advantages = model.advantages(&states, &rewards)?;
        let advantages =
            (&advantages - advantages.mean(Kind::Float)) / (advantages.std(true) + 1e-8);

        let arguments = model.arguments(&states, &actions, &advantages)?;
        let stats = model.update(&arguments, &mut logger)?;
        model.update_baseline(&states, &rewards, &mut logger)?;
        logger.log_scalar("reward", f64::from(rewards.mean(Kind::Float)));
        debug!("step {}: {:?}", model.global_step(), stats);
    }
    logger.flush();
    Ok(())
}
