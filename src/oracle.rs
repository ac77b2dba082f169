use crate::RnnError;
use crate::config::RnnMode;
use crate::math::{relu_backward, sigmoid_backward, sigmoid_inplace, tanh_backward, tanh_inplace};
use crate::params::{GateParams, GruGate, GruParams, LayerParams, LstmGate, LstmParams};
use log::debug;
use ndarray::{
    Array1, Array2, Array3, ArrayBase, ArrayView2, ArrayView3, Axis, Data, Ix2, NdFloat, Zip, s,
};

/// GRU recurrence (reset, update and split candidate gates)
pub mod gru;
/// LSTM recurrence (candidate, input, forget and output gates with a cell state)
pub mod lstm;
/// Plain ReLU / tanh recurrence
pub mod native;
/// Multi-layer and bidirectional composition of single-layer recurrences
pub mod stack;
/// Input validation functions for the oracle
mod validation;

pub use native::NativeActivation;
pub use stack::{StackForward, StackGradients, stack_backward, stack_forward};

use validation::*;

/// Everything a forward pass of one layer in one direction produces, and
/// everything its backward pass needs.
///
/// All tensors are time-major.
///
/// # Fields
///
/// - `hidden` - Hidden trace with shape (seq_len + 1, batch, hidden_size); index 0 is the initial state
/// - `gates` - Gate buffer with shape (seq_len, batch, gate_blocks * hidden_size)
/// - `cells` - LSTM cell trace with shape (seq_len + 1, batch, hidden_size), `None` for other variants
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardTrace<A> {
    pub hidden: Array3<A>,
    pub gates: Array3<A>,
    pub cells: Option<Array3<A>>,
}

impl<A: NdFloat> ForwardTrace<A> {
    /// Per-step outputs with shape (seq_len, batch, hidden_size)
    pub fn outputs(&self) -> ArrayView3<'_, A> {
        self.hidden.slice(s![1.., .., ..])
    }

    /// Hidden state after the last step
    pub fn final_hidden(&self) -> ArrayView2<'_, A> {
        self.hidden.index_axis(Axis(0), self.seq_len())
    }

    /// Cell state after the last step (LSTM only)
    pub fn final_cell(&self) -> Option<ArrayView2<'_, A>> {
        let seq_len = self.seq_len();
        self.cells.as_ref().map(|c| c.index_axis(Axis(0), seq_len))
    }

    pub fn seq_len(&self) -> usize {
        self.gates.len_of(Axis(0))
    }
}

/// Gradients produced by a backward pass of one layer in one direction.
///
/// # Fields
///
/// - `input` - Gradient w.r.t. the input sequence, shape (seq_len, batch, input_width)
/// - `params` - Gradient w.r.t. every parameter, same variant and shapes as the parameters
/// - `initial_hidden` - Gradient w.r.t. the initial hidden state, shape (batch, hidden_size)
/// - `initial_cell` - Gradient w.r.t. the initial cell state (LSTM only)
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients<A> {
    pub input: Array3<A>,
    pub params: LayerParams<A>,
    pub initial_hidden: Array2<A>,
    pub initial_cell: Option<Array2<A>>,
}

/// A recurrence that can be replayed forward over a sequence and differentiated backward.
///
/// Implementations are pure: no state survives between calls and identical
/// arguments give bit-identical results.
pub trait Recurrence<A: NdFloat> {
    /// Runs the recurrence over `inputs` (seq_len, batch, input_width).
    ///
    /// Absent initial states are treated as zeros.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If the sequence is empty or any tensor does not match the parameters
    fn forward(
        &self,
        inputs: ArrayView3<A>,
        initial_hidden: Option<ArrayView2<A>>,
        initial_cell: Option<ArrayView2<A>>,
    ) -> Result<ForwardTrace<A>, RnnError>;

    /// Backpropagates `output_grad` (seq_len, batch, hidden_size) through a trace
    /// produced by [`Recurrence::forward`] on the same `inputs`.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If the gradient, inputs or trace do not match each other or the parameters
    fn backward(
        &self,
        output_grad: ArrayView3<A>,
        inputs: ArrayView3<A>,
        trace: &ForwardTrace<A>,
    ) -> Result<Gradients<A>, RnnError>;
}

impl<A: NdFloat> Recurrence<A> for LayerParams<A> {
    fn forward(
        &self,
        inputs: ArrayView3<A>,
        initial_hidden: Option<ArrayView2<A>>,
        initial_cell: Option<ArrayView2<A>>,
    ) -> Result<ForwardTrace<A>, RnnError> {
        debug!(
            "{} forward: inputs {:?}, hidden_size {}",
            self.mode(),
            inputs.shape(),
            self.hidden_size()
        );
        if initial_cell.is_some() && !self.mode().has_cell() {
            return Err(RnnError::InvalidShape(format!(
                "{} has no cell state but an initial cell state was supplied",
                self.mode()
            )));
        }
        match self {
            LayerParams::Relu(gate) => native::forward(gate, NativeActivation::Relu, inputs, initial_hidden),
            LayerParams::Tanh(gate) => native::forward(gate, NativeActivation::Tanh, inputs, initial_hidden),
            LayerParams::Lstm(params) => params.forward(inputs, initial_hidden, initial_cell),
            LayerParams::Gru(params) => params.forward(inputs, initial_hidden, None),
        }
    }

    fn backward(
        &self,
        output_grad: ArrayView3<A>,
        inputs: ArrayView3<A>,
        trace: &ForwardTrace<A>,
    ) -> Result<Gradients<A>, RnnError> {
        debug!(
            "{} backward: output_grad {:?}",
            self.mode(),
            output_grad.shape()
        );
        match self {
            LayerParams::Relu(gate) => native::backward(gate, NativeActivation::Relu, output_grad, inputs, trace),
            LayerParams::Tanh(gate) => native::backward(gate, NativeActivation::Tanh, output_grad, inputs, trace),
            LayerParams::Lstm(params) => params.backward(output_grad, inputs, trace),
            LayerParams::Gru(params) => params.backward(output_grad, inputs, trace),
        }
    }
}

/// Runs the forward pass of `params` over `inputs`.
///
/// Convenience wrapper over [`Recurrence::forward`].
///
/// # Example
/// ```rust
/// use ndarray::Array3;
/// use rnn_oracle::config::RnnMode;
/// use rnn_oracle::oracle;
/// use rnn_oracle::params::LayerParams;
///
/// // seq_len=3, batch=2, input_width=4, hidden_size=5
/// let params = LayerParams::<f64>::zeros(RnnMode::Tanh, 4, 5);
/// let inputs = Array3::<f64>::ones((3, 2, 4));
///
/// let trace = oracle::forward(&params, inputs.view(), None, None).unwrap();
/// assert_eq!(trace.outputs().shape(), &[3, 2, 5]);
/// ```
pub fn forward<A: NdFloat>(
    params: &LayerParams<A>,
    inputs: ArrayView3<A>,
    initial_hidden: Option<ArrayView2<A>>,
    initial_cell: Option<ArrayView2<A>>,
) -> Result<ForwardTrace<A>, RnnError> {
    params.forward(inputs, initial_hidden, initial_cell)
}

/// Runs the backward pass of `params` for a trace produced by [`forward`].
///
/// Convenience wrapper over [`Recurrence::backward`].
pub fn backward<A: NdFloat>(
    params: &LayerParams<A>,
    output_grad: ArrayView3<A>,
    inputs: ArrayView3<A>,
    trace: &ForwardTrace<A>,
) -> Result<Gradients<A>, RnnError> {
    params.backward(output_grad, inputs, trace)
}

/// Columns of gate block `block` in a (batch, blocks * hidden_size) buffer
#[inline]
pub(crate) fn gate_block<A, S>(buffer: &ArrayBase<S, Ix2>, block: usize, hidden_size: usize) -> ArrayView2<'_, A>
where
    S: Data<Elem = A>,
{
    buffer.slice(s![.., block * hidden_size..(block + 1) * hidden_size])
}

/// Concatenates the step input and the previous hidden state along the feature axis
#[inline]
pub(crate) fn join_features<'a, A: NdFloat>(
    x_t: ArrayView2<'a, A>,
    h_prev: ArrayView2<'a, A>,
) -> Result<Array2<A>, RnnError> {
    ndarray::concatenate(Axis(1), &[x_t, h_prev])
        .map_err(|e| RnnError::InvalidShape(format!("cannot join input and hidden state: {}", e)))
}
