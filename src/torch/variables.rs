//! Trainable variables and proposed additive updates to them.
use super::utils::{f_flat_dot, f_flatten_tensors, f_unflatten_tensors};
use tch::{nn::VarStore, Kind, TchError, Tensor};
use thiserror::Error;

/// A list of tensor shapes did not match the shapes of a [`VariableSet`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("shape mismatch: expected {expected:?} but got {actual:?}")]
pub struct ShapeMismatch {
    pub expected: Vec<Vec<i64>>,
    pub actual: Vec<Vec<i64>>,
}

impl ShapeMismatch {
    /// Check that two shape lists are identical.
    pub fn check(expected: &[Vec<i64>], actual: &[Vec<i64>]) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            })
        }
    }
}

/// Error modifying the variables of a [`VariableSet`].
#[derive(Error, Debug)]
pub enum VariablesError {
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatch),
    #[error(transparent)]
    Torch(#[from] TchError),
}

/// Ordered collection of named trainable tensors.
///
/// The tensors share storage with the variables of the owning model
/// (e.g. a [`VarStore`]) so modifications made through a `VariableSet` are visible to the owner.
/// Optimizers only ever modify variables tentatively, through [`VariableSet::f_trial`].
#[derive(Debug)]
pub struct VariableSet {
    names: Vec<String>,
    tensors: Vec<Tensor>,
    shapes: Vec<Vec<i64>>,
}

impl VariableSet {
    /// Create from a list of named variable tensors, kept in the given order.
    pub fn new<I>(variables: I) -> Self
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        let (names, tensors): (Vec<_>, Vec<_>) = variables.into_iter().unzip();
        let shapes = tensors.iter().map(Tensor::size).collect();
        Self {
            names,
            tensors,
            shapes,
        }
    }

    /// Collect the trainable variables of a variable store, ordered by name.
    pub fn from_var_store(vs: &VarStore) -> Self {
        let mut variables: Vec<_> = vs
            .variables()
            .into_iter()
            .filter(|(_, tensor)| tensor.requires_grad())
            .collect();
        variables.sort_by(|(a, _), (b, _)| a.cmp(b));
        Self::new(variables)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.tensors
    }

    pub fn shapes(&self) -> &[Vec<i64>] {
        &self.shapes
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar elements over all variables.
    pub fn num_elements(&self) -> i64 {
        self.shapes.iter().map(|s| s.iter().product::<i64>()).sum()
    }

    /// Gradient of a scalar loss with respect to each variable.
    ///
    /// Every variable must contribute to `loss`.
    pub fn gradients(&self, loss: &Tensor) -> Delta {
        Delta::new(Tensor::run_backward(&[loss], &self.tensors, false, false))
    }

    /// Add a delta to the variables in place.
    pub fn f_apply(&self, delta: &Delta) -> Result<(), VariablesError> {
        ShapeMismatch::check(&self.shapes, &delta.shapes())?;
        tch::no_grad(|| -> Result<(), TchError> {
            for (variable, step) in self.tensors.iter().zip(delta.tensors()) {
                let _ = variable.shallow_clone().f_add_(step)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Snapshot the variables, restoring them when the returned guard is dropped.
    pub fn restore_guard(&self) -> RestoreGuard {
        let snapshot = tch::no_grad(|| self.tensors.iter().map(|t| t.detach().copy()).collect());
        RestoreGuard {
            variables: self,
            snapshot,
        }
    }

    /// Tentatively apply a delta.
    ///
    /// The variables are restored to their current values when the returned guard is dropped,
    /// including when the caller returns early with an error.
    pub fn f_trial(&self, delta: &Delta) -> Result<RestoreGuard, VariablesError> {
        ShapeMismatch::check(&self.shapes, &delta.shapes())?;
        let guard = self.restore_guard();
        self.f_apply(delta)?;
        Ok(guard)
    }

    fn restore(&self, snapshot: &[Tensor]) {
        tch::no_grad(|| {
            for (variable, value) in self.tensors.iter().zip(snapshot) {
                variable.shallow_clone().copy_(value);
            }
        })
    }
}

/// Restores a [`VariableSet`] to a snapshot of its values when dropped.
pub struct RestoreGuard<'a> {
    variables: &'a VariableSet,
    snapshot: Vec<Tensor>,
}

impl RestoreGuard<'_> {
    /// The change of the variables since the snapshot was taken.
    pub fn f_difference(&self) -> Result<Delta, TchError> {
        let tensors = tch::no_grad(|| {
            self.variables
                .tensors()
                .iter()
                .zip(&self.snapshot)
                .map(|(current, initial)| current.f_sub(initial))
                .collect::<Result<Vec<_>, _>>()
        })?;
        Ok(Delta::new(tensors))
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.variables.restore(&self.snapshot);
    }
}

/// A proposed additive update to every variable of a [`VariableSet`].
///
/// Holds one tensor per variable with the same shape, detached from any autograd graph.
#[derive(Debug, PartialEq)]
pub struct Delta(Vec<Tensor>);

impl Delta {
    pub fn new<I: IntoIterator<Item = Tensor>>(tensors: I) -> Self {
        Self(tensors.into_iter().map(|t| t.detach()).collect())
    }

    /// The zero update for a set of variables.
    pub fn zeros_like(variables: &VariableSet) -> Self {
        Self::new(variables.tensors().iter().map(Tensor::zeros_like))
    }

    /// Split a flat vector into a delta with the given shapes.
    pub fn f_unflatten(vector: &Tensor, shapes: &[Vec<i64>]) -> Result<Self, TchError> {
        Ok(Self::new(f_unflatten_tensors(vector, shapes)?))
    }

    /// Concatenate all elements into a single flat vector.
    pub fn f_flatten(&self) -> Result<Tensor, TchError> {
        f_flatten_tensors(&self.0)
    }

    pub fn tensors(&self) -> &[Tensor] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn shapes(&self) -> Vec<Vec<i64>> {
        self.0.iter().map(Tensor::size).collect()
    }

    /// A deep copy.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self(self.0.iter().map(Tensor::copy).collect())
    }

    /// Element-wise sum of two deltas with identical shapes.
    pub fn f_add(&self, other: &Self) -> Result<Self, ShapeMismatch> {
        ShapeMismatch::check(&self.shapes(), &other.shapes())?;
        Ok(Self(
            self.0.iter().zip(&other.0).map(|(a, b)| a + b).collect(),
        ))
    }

    /// Multiply every element by a scalar.
    #[must_use]
    pub fn scale(&self, factor: f64) -> Self {
        Self(self.0.iter().map(|t| t * factor).collect())
    }

    /// Sum of the element-wise products of two deltas.
    pub fn f_dot(&self, other: &Self) -> Result<f64, VariablesError> {
        ShapeMismatch::check(&self.shapes(), &other.shapes())?;
        let mut total = 0.0;
        for (a, b) in self.0.iter().zip(&other.0) {
            total += f64::from(f_flat_dot(a, b)?);
        }
        Ok(total)
    }

    /// Euclidean norm over all elements.
    pub fn norm(&self) -> f64 {
        self.0
            .iter()
            .map(|t| f64::from(t.square().sum(Kind::Double)))
            .sum::<f64>()
            .sqrt()
    }

    /// Whether every element is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0
            .iter()
            .all(|t| f64::from(t.abs().sum(Kind::Double)) == 0.0)
    }
}
