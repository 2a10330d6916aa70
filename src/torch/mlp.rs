//! Multi-layer perceptron policy body
use serde::{Deserialize, Serialize};
use std::iter;
use tch::{
    nn::{self, Linear, Module, Path},
    Tensor,
};

/// Activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// No transformation
    Identity,
    /// Rectified linear
    Relu,
    /// Hyperbolic tangent
    Tanh,
}

impl Activation {
    /// The activation function, if not the identity.
    pub fn maybe_function(self) -> Option<fn(&Tensor) -> Tensor> {
        match self {
            Self::Identity => None,
            Self::Relu => Some(Tensor::relu),
            Self::Tanh => Some(Tensor::tanh),
        }
    }
}

/// Configuration for the [`Mlp`] module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    /// Sizes of the hidden layers
    pub hidden_sizes: Vec<i64>,
    /// Activation function applied after every hidden layer.
    pub activation: Activation,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_sizes: vec![64, 64],
            activation: Activation::Tanh,
        }
    }
}

/// Multi-layer perceptron mapping flat state features to hidden features.
///
/// With no hidden layers the module is the identity.
#[derive(Debug)]
pub struct Mlp {
    layers: Vec<Linear>,
    activation: Option<fn(&Tensor) -> Tensor>,
    out_dim: i64,
}

impl Mlp {
    pub fn new(vs: &Path, in_dim: i64, config: &MlpConfig) -> Self {
        let in_dims = iter::once(&in_dim).chain(&config.hidden_sizes);
        let layers = in_dims
            .zip(&config.hidden_sizes)
            .enumerate()
            .map(|(i, (&in_, &out_))| {
                nn::linear(vs / format!("layer_{}", i), in_, out_, Default::default())
            })
            .collect();
        Self {
            layers,
            activation: config.activation.maybe_function(),
            out_dim: config.hidden_sizes.last().copied().unwrap_or(in_dim),
        }
    }

    /// Number of output features.
    pub const fn out_dim(&self) -> i64 {
        self.out_dim
    }
}

impl Module for Mlp {
    fn forward(&self, input: &Tensor) -> Tensor {
        let mut hidden = input.shallow_clone();
        for layer in &self.layers {
            hidden = layer.forward(&hidden);
            if let Some(activation) = self.activation {
                hidden = activation(&hidden);
            }
        }
        hidden
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tch::{nn::VarStore, Device, Kind};

    #[rstest]
    #[case::default(MlpConfig::default(), 64)]
    #[case::identity(MlpConfig { hidden_sizes: Vec::new(), activation: Activation::Relu }, 3)]
    fn forward_batch_shape(#[case] config: MlpConfig, #[case] out_dim: i64) {
        let vs = VarStore::new(Device::Cpu);
        let mlp = Mlp::new(&vs.root(), 3, &config);
        assert_eq!(mlp.out_dim(), out_dim);
        let output = mlp.forward(&Tensor::ones(&[4, 3], (Kind::Float, Device::Cpu)));
        assert_eq!(output.size(), vec![4, out_dim]);
    }

    #[test]
    fn tanh_output_is_bounded() {
        let vs = VarStore::new(Device::Cpu);
        let mlp = Mlp::new(&vs.root(), 2, &MlpConfig::default());
        let output = mlp.forward(&(Tensor::randn(&[8, 2], (Kind::Float, Device::Cpu)) * 100));
        assert!(f64::from(output.abs().max()) <= 1.0);
    }

    #[test]
    fn activation_from_json() {
        let config: MlpConfig =
            serde_json::from_str(r#"{"hidden_sizes": [32], "activation": "relu"}"#).unwrap();
        assert_eq!(
            config,
            MlpConfig {
                hidden_sizes: vec![32],
                activation: Activation::Relu
            }
        );
    }
}
