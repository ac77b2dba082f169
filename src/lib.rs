//! Host-side reference oracle for cuDNN-style recurrent layers.
//!
//! The crate replays ReLU, Tanh, LSTM and GRU recurrences (uni- or bidirectional,
//! stacked) on ordinary memory and differentiates them, so that the results of an
//! accelerated engine can be checked numerically.
//!
//! # Example
//! ```rust
//! use ndarray::Array3;
//! use rnn_oracle::prelude::*;
//!
//! let config = RnnConfig::new(4, 3, RnnMode::Lstm).unwrap().with_layers(2);
//! let mut rng = seeded_rng(7);
//! let params = random_stack_params::<f64, _>(&config, &mut rng).unwrap();
//! let inputs = Array3::<f64>::ones((6, 2, 4));
//!
//! let forward = stack_forward(&config, inputs.view(), &params, None, None).unwrap();
//! assert_eq!(forward.outputs.shape(), &[6, 2, 3]);
//!
//! let grads = stack_backward(&config, forward.outputs.view(), &params, &forward).unwrap();
//! assert_eq!(grads.input.shape(), inputs.shape());
//! ```

/// Error type shared by every module
pub mod error;
/// Typed engine configuration: variant, direction, dimensions and dtype
pub mod config;
/// Scalar activations and their derivatives
pub mod math;
/// Typed per-gate weight sets
pub mod params;
/// Single-layer forward/backward per variant and their stacked composition
pub mod oracle;
/// Flat weight buffer layouts
pub mod layout;
/// Seeded random parameters and sequences
pub mod init;
/// Engine contract and the host reference engine
pub mod engine;
/// Tolerance model and the engine-versus-oracle harness
pub mod verification;
/// Re-exports of the commonly used items
pub mod prelude;

pub use error::RnnError;

#[cfg(test)]
mod test;
