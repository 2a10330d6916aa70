//! Trust region policy optimization core.
//!
//! Optimizers propose updates to the variables of a policy; a line search accepts them only when
//! they improve the loss and keep the policy within a KL divergence trust region.
#![warn(clippy::cast_lossless)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::doc_markdown)]
#![warn(clippy::explicit_iter_loop)]
#![warn(clippy::missing_const_for_fn)] // has some false positives
#![warn(clippy::needless_borrow)]
#![warn(clippy::needless_pass_by_value)]
#![warn(clippy::redundant_closure_for_method_calls)]
#![warn(clippy::use_self)] // also triggered by macro expansions
mod error;
pub mod logging;
pub mod torch;

pub use error::{ConfigError, Error};

/// Pseudo-random number generator type used by this crate.
pub type Prng = rand_chacha::ChaCha8Rng;
