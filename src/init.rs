use crate::RnnError;
use crate::config::{RnnConfig, RnnMode};
use crate::params::LayerParams;
use ndarray::{Array, Array3, Dimension, NdFloat, ShapeBuilder};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::Rng;
use ndarray_rand::rand::distributions::uniform::SampleUniform;
use ndarray_rand::rand_distr::{Distribution, StandardNormal, Uniform};

pub use ndarray_rand::rand::SeedableRng;
pub use ndarray_rand::rand::rngs::StdRng;

/// Creates a deterministic random number generator from a seed
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Draws random parameters for one pseudo-layer.
///
/// Every matrix and bias is drawn from `U(-k, k)` with `k = 1 / sqrt(hidden_size)`,
/// the usual initialisation of recurrent layers.
///
/// # Parameters
///
/// - `mode` - Recurrence variant
/// - `input_width` - Width of the input projection
/// - `hidden_size` - Width of the hidden state
/// - `rng` - Random number generator
pub fn random_layer_params<A, R>(
    mode: RnnMode,
    input_width: usize,
    hidden_size: usize,
    rng: &mut R,
) -> LayerParams<A>
where
    A: NdFloat + SampleUniform,
    R: Rng,
{
    let limit = num_traits::cast::<usize, A>(hidden_size).map_or(A::one(), |h| h.sqrt().recip());
    let dist = Uniform::new(-limit, limit);

    let mut params = LayerParams::zeros(mode, input_width, hidden_size);
    for gate in params.gates_mut() {
        gate.input_kernel = Array::random_using(gate.input_kernel.raw_dim(), &dist, rng);
        gate.recurrent_kernel = Array::random_using(gate.recurrent_kernel.raw_dim(), &dist, rng);
        gate.input_bias = Array::random_using(gate.input_bias.raw_dim(), &dist, rng);
        gate.recurrent_bias = Array::random_using(gate.recurrent_bias.raw_dim(), &dist, rng);
    }
    params
}

/// Draws random parameters for every pseudo-layer of `config`, in pseudo-layer order.
///
/// # Errors
///
/// - `RnnError::InvalidConfiguration` - If the configuration is invalid
pub fn random_stack_params<A, R>(config: &RnnConfig, rng: &mut R) -> Result<Vec<LayerParams<A>>, RnnError>
where
    A: NdFloat + SampleUniform,
    R: Rng,
{
    config.validate()?;
    Ok((0..config.pseudo_layers())
        .map(|p| {
            random_layer_params(
                config.mode(),
                config.pseudo_layer_input_size(p),
                config.hidden_size(),
                rng,
            )
        })
        .collect())
}

/// Draws a tensor of any shape with standard normal entries
pub fn random_normal<A, Sh, D, R>(shape: Sh, rng: &mut R) -> Array<A, D>
where
    A: NdFloat,
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
    R: Rng,
    StandardNormal: Distribution<A>,
{
    Array::random_using(shape, StandardNormal, rng)
}

/// Draws a time-major sequence with shape (seq_len, batch, features)
pub fn random_sequence<A, R>(seq_len: usize, batch: usize, features: usize, rng: &mut R) -> Array3<A>
where
    A: NdFloat,
    R: Rng,
    StandardNormal: Distribution<A>,
{
    random_normal((seq_len, batch, features), rng)
}
