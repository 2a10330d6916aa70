//! Named tensor arguments threaded through optimizer steps.
use std::collections::BTreeMap;
use std::fmt;
use tch::{Kind, Tensor};
use thiserror::Error;

/// Names of the standard arguments built by [`PolicyModel`](super::model::PolicyModel).
pub mod names {
    pub const STATES: &str = "states";
    pub const ACTIONS: &str = "actions";
    pub const ADVANTAGES: &str = "advantages";
    pub const OLD_LOG_PROBS: &str = "old_log_probs";
    /// Observed returns; the regression targets of a state-value baseline.
    pub const RETURNS: &str = "returns";
    /// Prefix of the previous policy's distribution parameters: `old/<parameter>`.
    pub const OLD_PREFIX: &str = "old/";
}

/// Element kind and per-instance shape of an argument tensor.
///
/// The shape excludes the leading batch dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub kind: Kind,
    pub shape: Vec<i64>,
}

impl TensorSpec {
    pub fn new(kind: Kind, shape: Vec<i64>) -> Self {
        Self { kind, shape }
    }

    /// One scalar per batch instance.
    pub const fn scalar(kind: Kind) -> Self {
        Self {
            kind,
            shape: Vec::new(),
        }
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}[batch, ", self.kind)?;
        for (i, dim) in self.shape.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", dim)?;
        }
        write!(f, "]")
    }
}

/// Error building or reading an [`Arguments`] bundle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArgumentsError {
    #[error("missing argument {0:?}")]
    Missing(String),
    #[error("unexpected argument {0:?}")]
    Unexpected(String),
    #[error("argument {name:?} has kind {actual:?}, expected {expected:?}")]
    KindMismatch {
        name: String,
        expected: Kind,
        actual: Kind,
    },
    #[error("argument {name:?} has shape {actual:?}, expected [batch] + {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },
    #[error("argument {name:?} has batch size {actual}, expected {expected}")]
    BatchSizeMismatch {
        name: String,
        expected: i64,
        actual: i64,
    },
}

/// Declares the arguments that optimizer closures expect.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ArgumentsSpec {
    entries: BTreeMap<String, TensorSpec>,
}

impl ArgumentsSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an argument, replacing any previous declaration with the same name.
    #[must_use]
    pub fn with<S: Into<String>>(mut self, name: S, spec: TensorSpec) -> Self {
        self.insert(name, spec);
        self
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, spec: TensorSpec) {
        self.entries.insert(name.into(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&TensorSpec> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build an arguments bundle, checking names, shapes and kinds against these entries.
    ///
    /// Every declared argument must be present with the declared kind and per-instance shape,
    /// no undeclared argument may be present, and all arguments must share one batch size.
    pub fn build<I, S>(&self, entries: I) -> Result<Arguments, ArgumentsError>
    where
        I: IntoIterator<Item = (S, Tensor)>,
        S: Into<String>,
    {
        let tensors: BTreeMap<String, Tensor> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();

        if let Some(name) = tensors.keys().find(|k| !self.entries.contains_key(*k)) {
            return Err(ArgumentsError::Unexpected(name.clone()));
        }

        let mut batch_size = None;
        for (name, spec) in &self.entries {
            let tensor = tensors
                .get(name)
                .ok_or_else(|| ArgumentsError::Missing(name.clone()))?;
            if tensor.kind() != spec.kind {
                return Err(ArgumentsError::KindMismatch {
                    name: name.clone(),
                    expected: spec.kind,
                    actual: tensor.kind(),
                });
            }
            let size = tensor.size();
            match size.split_first() {
                Some((&n, rest)) if rest == spec.shape.as_slice() => match batch_size {
                    None => batch_size = Some(n),
                    Some(expected) if expected != n => {
                        return Err(ArgumentsError::BatchSizeMismatch {
                            name: name.clone(),
                            expected,
                            actual: n,
                        })
                    }
                    Some(_) => {}
                },
                _ => {
                    return Err(ArgumentsError::ShapeMismatch {
                        name: name.clone(),
                        expected: spec.shape.clone(),
                        actual: size,
                    })
                }
            }
        }

        Ok(Arguments {
            tensors,
            batch_size: batch_size.unwrap_or(0),
        })
    }
}

/// Immutable bundle of named argument tensors for one optimization step.
///
/// Only constructed through [`ArgumentsSpec::build`] so a bundle is always complete.
#[derive(Debug)]
pub struct Arguments {
    tensors: BTreeMap<String, Tensor>,
    batch_size: i64,
}

impl Arguments {
    /// Look up an argument by name.
    pub fn get(&self, name: &str) -> Result<&Tensor, ArgumentsError> {
        self.tensors
            .get(name)
            .ok_or_else(|| ArgumentsError::Missing(name.into()))
    }

    /// The number of instances in the batch shared by all arguments.
    pub const fn batch_size(&self) -> i64 {
        self.batch_size
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }
}
