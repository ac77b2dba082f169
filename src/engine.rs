use crate::RnnError;
use crate::config::RnnConfig;
use crate::layout::{PackedLayout, WeightLayout};
use crate::oracle::{StackForward, StackGradients, stack_backward, stack_forward};
use log::debug;
use ndarray::{Array1, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, NdFloat};
use std::marker::PhantomData;

/// Result of an engine forward pass.
///
/// # Fields
///
/// - `output` - Output sequence with shape (seq_len, batch, hidden_size * directions)
/// - `final_hidden` - Final hidden states (layers * directions, batch, hidden_size)
/// - `final_cell` - Final cell states, LSTM only
/// - `reserve` - Opaque training state the backward passes need
#[derive(Debug, Clone)]
pub struct EngineForward<A, R> {
    pub output: Array3<A>,
    pub final_hidden: Array3<A>,
    pub final_cell: Option<Array3<A>>,
    pub reserve: R,
}

/// Gradients produced by [`RnnEngine::backward_data`].
///
/// # Fields
///
/// - `input` - Gradient w.r.t. the input sequence
/// - `initial_hidden` - Gradient w.r.t. the initial hidden states
/// - `initial_cell` - Gradient w.r.t. the initial cell states, LSTM only
#[derive(Debug, Clone, PartialEq)]
pub struct DataGradients<A> {
    pub input: Array3<A>,
    pub initial_hidden: Array3<A>,
    pub initial_cell: Option<Array3<A>>,
}

/// Contract of an RNN engine whose results are checked against the oracle.
///
/// The call sequence mirrors a cuDNN training step: `forward` produces a reserve,
/// `backward_data` consumes the output gradient and updates the reserve,
/// `backward_params` reads the reserve and returns the flat weight gradient laid
/// out like the flat weights.
///
/// Flat weights and weight gradients are read and written through the engine's
/// own [`WeightLayout`], so a backend with a different memory layout only has to
/// describe where each linear layer lives.
pub trait RnnEngine {
    /// Element type the engine computes in
    type Elem: NdFloat;
    /// Training state carried from forward to the backward passes
    type Reserve;
    /// Layout of the flat weight and weight-gradient buffers
    type Layout: WeightLayout;

    /// Configuration the engine was created with
    fn config(&self) -> &RnnConfig;

    /// Layout the engine expects its flat weights in
    fn layout(&self) -> &Self::Layout;

    /// Runs the training forward pass.
    ///
    /// # Parameters
    ///
    /// - `input` - Input sequence (seq_len, batch, input_size)
    /// - `weights` - Flat weight buffer
    /// - `initial_hidden` - Optional initial hidden states (layers * directions, batch, hidden_size)
    /// - `initial_cell` - Optional initial cell states, LSTM only
    fn forward(
        &self,
        input: ArrayView3<Self::Elem>,
        weights: ArrayView1<Self::Elem>,
        initial_hidden: Option<ArrayView3<Self::Elem>>,
        initial_cell: Option<ArrayView3<Self::Elem>>,
    ) -> Result<EngineForward<Self::Elem, Self::Reserve>, RnnError>;

    /// Backpropagates `output_grad` to the input and the initial states.
    ///
    /// The initial states must be the ones the forward pass ran with.
    fn backward_data(
        &self,
        output_grad: ArrayView3<Self::Elem>,
        output: ArrayView3<Self::Elem>,
        weights: ArrayView1<Self::Elem>,
        reserve: &mut Self::Reserve,
        initial_hidden: Option<ArrayView3<Self::Elem>>,
        initial_cell: Option<ArrayView3<Self::Elem>>,
    ) -> Result<DataGradients<Self::Elem>, RnnError>;

    /// Returns the flat weight gradient of the step recorded in `reserve`.
    fn backward_params(
        &self,
        input: ArrayView3<Self::Elem>,
        output: ArrayView3<Self::Elem>,
        reserve: &Self::Reserve,
        initial_hidden: Option<ArrayView3<Self::Elem>>,
    ) -> Result<Array1<Self::Elem>, RnnError>;
}

/// Reserve of the [`ReferenceEngine`]: the stacked forward trace, plus the
/// gradients once `backward_data` has run.
#[derive(Debug, Clone)]
pub struct ReferenceReserve<A> {
    forward: StackForward<A>,
    gradients: Option<StackGradients<A>>,
}

impl<A: NdFloat> ReferenceReserve<A> {
    /// Checks that a supplied initial hidden state is the one the forward pass started from.
    ///
    /// An absent state stands for zeros, as it does in the forward pass.
    fn check_initial_hidden(&self, initial_hidden: Option<ArrayView3<A>>) -> Result<(), RnnError> {
        let recorded: Vec<ArrayView2<A>> = self
            .forward
            .traces
            .iter()
            .map(|t| t.hidden.index_axis(Axis(0), 0))
            .collect();
        check_recorded_state(initial_hidden, &recorded, "initial hidden state")
    }

    /// Same as [`ReferenceReserve::check_initial_hidden`] for the cell state
    fn check_initial_cell(&self, initial_cell: Option<ArrayView3<A>>) -> Result<(), RnnError> {
        if self.forward.final_cell.is_some() {
            let recorded: Vec<ArrayView2<A>> = self
                .forward
                .traces
                .iter()
                .filter_map(|t| t.cells.as_ref())
                .map(|c| c.index_axis(Axis(0), 0))
                .collect();
            check_recorded_state(initial_cell, &recorded, "initial cell state")?;
        } else if initial_cell.is_some() {
            return Err(RnnError::InvalidShape(
                "an initial cell state was supplied but the forward pass has no cell state".to_string(),
            ));
        }
        Ok(())
    }
}

/// Compares a stacked state with the per-pseudo-layer states recorded by forward
fn check_recorded_state<A: NdFloat>(
    supplied: Option<ArrayView3<A>>,
    recorded: &[ArrayView2<A>],
    name: &str,
) -> Result<(), RnnError> {
    let Some(state) = supplied else {
        if recorded.iter().all(|r| r.iter().all(|&v| v == A::zero())) {
            return Ok(());
        }
        return Err(RnnError::InvalidConfiguration(format!(
            "{} is absent but the forward pass started from a non-zero one",
            name
        )));
    };

    let (batch, hidden_size) = recorded.first().map_or((0, 0), |r| r.dim());
    if state.dim() != (recorded.len(), batch, hidden_size) {
        return Err(RnnError::InvalidShape(format!(
            "{} must have shape ({}, {}, {}), got {:?}",
            name,
            recorded.len(),
            batch,
            hidden_size,
            state.shape()
        )));
    }
    if state.outer_iter().zip(recorded).any(|(s, r)| s != *r) {
        return Err(RnnError::InvalidConfiguration(format!(
            "{} differs from the one the forward pass ran with",
            name
        )));
    }
    Ok(())
}

/// Host engine computing everything with the oracle and the packed layout.
///
/// It is the engine a verification run trusts by construction, and the template
/// for wrapping a real accelerated library.
///
/// # Example
/// ```rust
/// use rnn_oracle::config::{RnnConfig, RnnMode};
/// use rnn_oracle::engine::{ReferenceEngine, RnnEngine};
/// use rnn_oracle::layout::WeightLayout;
/// use ndarray::{Array1, Array3};
///
/// let config = RnnConfig::new(3, 2, RnnMode::Lstm).unwrap();
/// let engine = ReferenceEngine::<f64>::new(&config).unwrap();
/// let weights = Array1::<f64>::zeros(engine.layout().param_count());
/// let input = Array3::<f64>::ones((5, 1, 3));
///
/// let result = engine.forward(input.view(), weights.view(), None, None).unwrap();
/// assert_eq!(result.output.shape(), &[5, 1, 2]);
/// ```
#[derive(Debug, Clone)]
pub struct ReferenceEngine<A> {
    config: RnnConfig,
    layout: PackedLayout,
    _elem: PhantomData<A>,
}

impl<A: NdFloat> ReferenceEngine<A> {
    /// Creates an engine for `config`.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidConfiguration` - If the configuration is invalid or uses dropout between layers
    pub fn new(config: &RnnConfig) -> Result<Self, RnnError> {
        if config.dropout() > 0.0 && config.layers() > 1 {
            return Err(RnnError::InvalidConfiguration(format!(
                "reference engine cannot reproduce dropout {} between layers",
                config.dropout()
            )));
        }
        Ok(Self {
            config: config.clone(),
            layout: PackedLayout::new(config)?,
            _elem: PhantomData,
        })
    }

    fn check_batch(&self, batch: usize) -> Result<(), RnnError> {
        let max = self.config.batch_size();
        if max > 0 && batch > max {
            return Err(RnnError::InvalidShape(format!(
                "batch {} exceeds the configured maximum {}",
                batch, max
            )));
        }
        Ok(())
    }
}

impl<A: NdFloat> RnnEngine for ReferenceEngine<A> {
    type Elem = A;
    type Reserve = ReferenceReserve<A>;
    type Layout = PackedLayout;

    fn config(&self) -> &RnnConfig {
        &self.config
    }

    fn layout(&self) -> &PackedLayout {
        &self.layout
    }

    fn forward(
        &self,
        input: ArrayView3<A>,
        weights: ArrayView1<A>,
        initial_hidden: Option<ArrayView3<A>>,
        initial_cell: Option<ArrayView3<A>>,
    ) -> Result<EngineForward<A, ReferenceReserve<A>>, RnnError> {
        self.check_batch(input.len_of(ndarray::Axis(1)))?;
        let params = self.layout.unpack(weights)?;
        let forward = stack_forward(&self.config, input, &params, initial_hidden, initial_cell)?;
        debug!("reference forward: output {:?}", forward.outputs.shape());

        Ok(EngineForward {
            output: forward.outputs.clone(),
            final_hidden: forward.final_hidden.clone(),
            final_cell: forward.final_cell.clone(),
            reserve: ReferenceReserve {
                forward,
                gradients: None,
            },
        })
    }

    fn backward_data(
        &self,
        output_grad: ArrayView3<A>,
        output: ArrayView3<A>,
        weights: ArrayView1<A>,
        reserve: &mut ReferenceReserve<A>,
        initial_hidden: Option<ArrayView3<A>>,
        initial_cell: Option<ArrayView3<A>>,
    ) -> Result<DataGradients<A>, RnnError> {
        if output.dim() != reserve.forward.outputs.dim() {
            return Err(RnnError::InvalidShape(format!(
                "output {:?} does not match the reserve {:?}",
                output.shape(),
                reserve.forward.outputs.shape()
            )));
        }
        reserve.check_initial_hidden(initial_hidden)?;
        reserve.check_initial_cell(initial_cell)?;
        let params = self.layout.unpack(weights)?;
        let gradients = stack_backward(&self.config, output_grad, &params, &reserve.forward)?;

        let data = DataGradients {
            input: gradients.input.clone(),
            initial_hidden: gradients.initial_hidden.clone(),
            initial_cell: gradients.initial_cell.clone(),
        };
        reserve.gradients = Some(gradients);
        Ok(data)
    }

    fn backward_params(
        &self,
        input: ArrayView3<A>,
        _output: ArrayView3<A>,
        reserve: &ReferenceReserve<A>,
        initial_hidden: Option<ArrayView3<A>>,
    ) -> Result<Array1<A>, RnnError> {
        let gradients = reserve.gradients.as_ref().ok_or_else(|| {
            RnnError::InvalidConfiguration("backward_params called before backward_data".to_string())
        })?;
        match reserve.forward.layer_inputs.first() {
            Some(recorded) if recorded.dim() == input.dim() => {}
            _ => {
                return Err(RnnError::InvalidShape(format!(
                    "input {:?} does not match the sequence recorded in the reserve",
                    input.shape()
                )));
            }
        }
        reserve.check_initial_hidden(initial_hidden)?;
        self.layout.pack(&gradients.params)
    }
}
