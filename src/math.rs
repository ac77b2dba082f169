use ndarray::{Array, ArrayBase, Data, DataMut, Dimension, NdFloat, Zip};

/// Computes the logistic sigmoid for a scalar input.
///
/// Uses the sign-split formulation so that `exp` is only ever evaluated on a
/// non-positive argument, which keeps the result finite for any input.
///
/// # Examples
/// ```rust
/// use rnn_oracle::math::sigmoid;
///
/// assert!((sigmoid(0.0f32) - 0.5).abs() < 1e-6);
/// assert_eq!(sigmoid(1000.0f32), 1.0);
/// assert_eq!(sigmoid(-1000.0f32), 0.0);
/// ```
#[inline]
pub fn sigmoid<A: NdFloat>(x: A) -> A {
    if x >= A::zero() {
        A::one() / (A::one() + (-x).exp())
    } else {
        let e = x.exp();
        e / (A::one() + e)
    }
}

/// ReLU for a scalar input
#[inline]
pub fn relu<A: NdFloat>(x: A) -> A {
    if x > A::zero() { x } else { A::zero() }
}

/// Applies the sigmoid to every element in place
#[inline]
pub fn sigmoid_inplace<A, S, D>(arr: &mut ArrayBase<S, D>)
where
    A: NdFloat,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    arr.mapv_inplace(sigmoid);
}

/// Applies `tanh` to every element in place
#[inline]
pub fn tanh_inplace<A, S, D>(arr: &mut ArrayBase<S, D>)
where
    A: NdFloat,
    S: DataMut<Elem = A>,
    D: Dimension,
{
    arr.mapv_inplace(|x| x.tanh());
}

/// Scales `grad` by the sigmoid derivative expressed through the sigmoid output `s`: `grad * s * (1 - s)`
#[inline]
pub fn sigmoid_backward<A, S1, S2, D>(grad: &mut ArrayBase<S1, D>, output: &ArrayBase<S2, D>)
where
    A: NdFloat,
    S1: DataMut<Elem = A>,
    S2: Data<Elem = A>,
    D: Dimension,
{
    Zip::from(grad)
        .and(output)
        .for_each(|g, &s| *g = *g * s * (A::one() - s));
}

/// Returns `grad * (1 - y^2)`, the tanh derivative expressed through the tanh output `y`
#[inline]
pub fn tanh_backward<A, S1, S2, D>(grad: &ArrayBase<S1, D>, output: &ArrayBase<S2, D>) -> Array<A, D>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D: Dimension,
{
    Zip::from(grad)
        .and(output)
        .map_collect(|&g, &y| g * (A::one() - y * y))
}

/// Returns `grad * 1[output > 0]`.
///
/// For ReLU the output is positive exactly where the pre-activation is, so the
/// mask can be taken from either.
#[inline]
pub fn relu_backward<A, S1, S2, D>(grad: &ArrayBase<S1, D>, output: &ArrayBase<S2, D>) -> Array<A, D>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D: Dimension,
{
    Zip::from(grad)
        .and(output)
        .map_collect(|&g, &y| if y > A::zero() { g } else { A::zero() })
}
