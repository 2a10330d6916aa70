//! Tensor helpers shared by the distributions and optimizers.
use std::borrow::Borrow;
use tch::{Kind, TchError, Tensor};

/// Whether the kind is a real floating-point kind.
pub const fn is_float_kind(kind: Kind) -> bool {
    matches!(
        kind,
        Kind::Half | Kind::BFloat16 | Kind::Float | Kind::Double
    )
}

/// Number of elements in a tensor of the given shape.
///
/// Negative dimensions count as empty.
pub fn shape_size(shape: &[i64]) -> i64 {
    shape.iter().map(|&dim| dim.max(0)).product()
}

/// Concatenate the elements of every tensor into one flat vector.
pub fn f_flatten_tensors<I>(tensors: I) -> Result<Tensor, TchError>
where
    I: IntoIterator,
    I::Item: Borrow<Tensor>,
{
    let mut parts = Vec::new();
    for tensor in tensors {
        parts.push(tensor.borrow().f_reshape(&[-1])?);
    }
    Tensor::f_cat(&parts, 0)
}

/// Split a flat vector into tensors of the given shapes.
///
/// Fails unless the vector has exactly as many elements as the shapes in total.
pub fn f_unflatten_tensors(vector: &Tensor, shapes: &[Vec<i64>]) -> Result<Vec<Tensor>, TchError> {
    let sizes: Vec<i64> = shapes.iter().map(|shape| shape_size(shape)).collect();
    let chunks = vector.f_split_with_sizes(&sizes, 0)?;
    chunks
        .iter()
        .zip(shapes)
        .map(|(chunk, shape)| chunk.f_reshape(shape))
        .collect()
}

/// Inner product of two tensors with the same number of elements, ignoring their shapes.
pub fn f_flat_dot(a: &Tensor, b: &Tensor) -> Result<Tensor, TchError> {
    a.f_reshape(&[-1])?.f_dot(&b.f_reshape(&[-1])?)
}

/// Most negative and most positive finite value of a float kind.
fn finite_range(kind: Kind) -> Result<(f64, f64), Kind> {
    match kind {
        Kind::Float => Ok((f64::from(f32::MIN), f64::from(f32::MAX))),
        Kind::Double => Ok((f64::MIN, f64::MAX)),
        kind => Err(kind),
    }
}

/// Replace infinities with the nearest finite value of the tensor's kind.
///
/// Fails with the tensor kind if it is not `Float` or `Double`.
pub fn clamp_float_finite(x: &Tensor) -> Result<Tensor, Kind> {
    let (lowest, highest) = finite_range(x.kind())?;
    Ok(x.clamp(lowest, highest))
}

/// Replace negative infinity with the lowest finite value of the tensor's kind.
///
/// Log-probabilities of impossible outcomes stay finite so that `0 * logp` is zero.
pub fn clamp_float_min(x: &Tensor) -> Result<Tensor, Kind> {
    let (lowest, _) = finite_range(x.kind())?;
    Ok(x.clamp_min(lowest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::float(Kind::Float, true)]
    #[case::double(Kind::Double, true)]
    #[case::half(Kind::Half, true)]
    #[case::int(Kind::Int64, false)]
    #[case::bool(Kind::Bool, false)]
    fn float_kinds(#[case] kind: Kind, #[case] expected: bool) {
        assert_eq!(is_float_kind(kind), expected);
    }

    #[rstest]
    #[case::scalar(&[], 1)]
    #[case::matrix(&[2, 3], 6)]
    #[case::empty(&[4, 0], 0)]
    fn sizes(#[case] shape: &[i64], #[case] expected: i64) {
        assert_eq!(shape_size(shape), expected);
    }

    #[test]
    fn flatten_then_split_restores_shapes() {
        let a = Tensor::of_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).reshape(&[2, 3]);
        let b = Tensor::of_slice(&[7.0, 8.0]).reshape(&[2, 1]);
        let flat = f_flatten_tensors(&[a.shallow_clone(), b.shallow_clone()]).unwrap();
        assert_eq!(flat.size(), vec![8]);

        let parts = f_unflatten_tensors(&flat, &[vec![2, 3], vec![2, 1]]).unwrap();
        assert_eq!(parts, vec![a, b]);
    }

    #[test]
    fn split_with_wrong_total_fails() {
        let flat = Tensor::of_slice(&[1.0, 2.0, 3.0]);
        assert!(f_unflatten_tensors(&flat, &[vec![2, 2]]).is_err());
    }

    #[test]
    fn flat_dot_ignores_shape() {
        let a = Tensor::of_slice(&[1.0, 2.0, 3.0, 4.0]).reshape(&[2, 2]);
        let b = Tensor::of_slice(&[1.0, 1.0, 2.0, 0.5]);
        assert_eq!(f64::from(f_flat_dot(&a, &b).unwrap()), 9.0);
    }

    #[test]
    fn clamp_keeps_infinities_finite() {
        let x = Tensor::of_slice(&[f32::NEG_INFINITY, 0.0, f32::INFINITY]);
        let lower = clamp_float_min(&x).unwrap();
        assert_eq!(f64::from(lower.get(0)), f64::from(f32::MIN));
        assert!(f64::from(lower.get(2)).is_infinite());

        let both = clamp_float_finite(&x).unwrap();
        assert_eq!(f64::from(both.get(2)), f64::from(f32::MAX));
    }

    #[test]
    fn clamp_rejects_integer_kind() {
        let x = Tensor::of_slice(&[1_i64, 2]);
        assert_eq!(clamp_float_min(&x).err(), Some(Kind::Int64));
    }
}
