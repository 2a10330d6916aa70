//! Torch components
pub mod arguments;
pub mod baseline;
pub mod distributions;
pub mod mlp;
pub mod model;
pub mod objectives;
pub mod optimizers;
pub mod utils;
pub mod variables;

pub use arguments::{Arguments, ArgumentsSpec, TensorSpec};
pub use baseline::{Baseline, BaselineConfig};
pub use distributions::{Distribution, DistributionConfig, DistributionParameters};
pub use model::{PolicyModel, PolicyModelConfig, UpdateStats};
pub use objectives::PolicyGradientObjective;
pub use optimizers::{BuildOptimizer, Optimizer, OptimizerConfig, StepContext};
pub use variables::{Delta, VariableSet};
