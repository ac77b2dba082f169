use super::*;
use crate::config::RnnConfig;

/// Threshold for running the two directions of a layer in parallel (batch * hidden_size)
const STACK_PARALLEL_THRESHOLD: usize = 1024;

/// Result of a forward pass through every layer and direction of a configuration.
///
/// # Fields
///
/// - `outputs` - Output sequence of the top layer, shape (seq_len, batch, hidden_size * directions)
/// - `layer_inputs` - Input sequence seen by each layer, bottom first
/// - `traces` - One trace per pseudo-layer (`layer * directions + direction`); the
///   backward-time direction's trace is in its own processing order
/// - `final_hidden` - Final hidden state per pseudo-layer, shape (layers * directions, batch, hidden_size)
/// - `final_cell` - Final cell state per pseudo-layer (LSTM only)
#[derive(Debug, Clone, PartialEq)]
pub struct StackForward<A> {
    pub outputs: Array3<A>,
    pub layer_inputs: Vec<Array3<A>>,
    pub traces: Vec<ForwardTrace<A>>,
    pub final_hidden: Array3<A>,
    pub final_cell: Option<Array3<A>>,
}

/// Gradients of a stacked backward pass.
///
/// # Fields
///
/// - `input` - Gradient w.r.t. the external input sequence
/// - `params` - Parameter gradients per pseudo-layer
/// - `initial_hidden` - Gradient w.r.t. the initial hidden states, shape (layers * directions, batch, hidden_size)
/// - `initial_cell` - Gradient w.r.t. the initial cell states (LSTM only)
#[derive(Debug, Clone, PartialEq)]
pub struct StackGradients<A> {
    pub input: Array3<A>,
    pub params: Vec<LayerParams<A>>,
    pub initial_hidden: Array3<A>,
    pub initial_cell: Option<Array3<A>>,
}

/// Runs the forward pass of every layer and direction described by `config`.
///
/// Layer `l > 0` reads the concatenated outputs of all directions of layer `l - 1`.
/// The backward-time direction sees the sequence reversed and its outputs are
/// flipped back before concatenation, so output step `t` of both directions
/// refers to input step `t`.
///
/// # Parameters
///
/// - `config` - Layer count, direction and dimensions
/// - `inputs` - External input sequence with shape (seq_len, batch, input_size)
/// - `params` - One parameter set per pseudo-layer, indexed `layer * directions + direction`
/// - `initial_hidden` - Optional initial hidden states (layers * directions, batch, hidden_size)
/// - `initial_cell` - Optional initial cell states, LSTM only
///
/// # Errors
///
/// - `RnnError::InvalidConfiguration` - If the configuration is invalid or asks for dropout between layers
/// - `RnnError::UnsupportedVariant` - If a parameter set is not of the configured variant
/// - `RnnError::InvalidShape` - If any tensor does not match the configuration
pub fn stack_forward<A: NdFloat>(
    config: &RnnConfig,
    inputs: ArrayView3<A>,
    params: &[LayerParams<A>],
    initial_hidden: Option<ArrayView3<A>>,
    initial_cell: Option<ArrayView3<A>>,
) -> Result<StackForward<A>, RnnError> {
    validate_stack(config, params)?;
    let (_, batch) = validate_sequence(&inputs, config.input_size())?;
    let h = config.hidden_size();
    let pseudo_layers = config.pseudo_layers();
    let directions = config.directions();

    let h0 = stacked_state(initial_hidden, pseudo_layers, batch, h, "initial hidden state")?;
    let c0 = match (initial_cell, config.mode().has_cell()) {
        (cell, true) => Some(stacked_state(cell, pseudo_layers, batch, h, "initial cell state")?),
        (None, false) => None,
        (Some(_), false) => {
            return Err(RnnError::InvalidShape(format!(
                "{} has no cell state but an initial cell state was supplied",
                config.mode()
            )));
        }
    };

    let use_parallel = directions == 2 && batch * h >= STACK_PARALLEL_THRESHOLD;
    debug!(
        "stack forward: {} layers x {} directions, parallel: {}",
        config.layers(),
        directions,
        use_parallel
    );

    let mut layer_input = inputs.to_owned();
    let mut layer_inputs = Vec::with_capacity(config.layers());
    let mut traces = Vec::with_capacity(pseudo_layers);
    let mut final_hidden = Array3::zeros((pseudo_layers, batch, h));
    let mut final_cell = c0.as_ref().map(|_| Array3::zeros((pseudo_layers, batch, h)));

    for layer in 0..config.layers() {
        let base = layer * directions;
        let run = |direction: usize| {
            let p = base + direction;
            params[p].forward(
                in_time_order(layer_input.view(), direction == 1),
                Some(h0.index_axis(Axis(0), p)),
                c0.as_ref().map(|c| c.index_axis(Axis(0), p)),
            )
        };

        let layer_traces = if directions == 2 {
            let (fwd, bwd) = if use_parallel {
                rayon::join(|| run(0), || run(1))
            } else {
                (run(0), run(1))
            };
            vec![fwd?, bwd?]
        } else {
            vec![run(0)?]
        };

        let next = {
            let outputs: Vec<ArrayView3<A>> = layer_traces
                .iter()
                .enumerate()
                .map(|(direction, trace)| in_time_order(trace.outputs(), direction == 1))
                .collect();
            ndarray::concatenate(Axis(2), &outputs)
                .map_err(|e| RnnError::InvalidShape(format!("cannot join direction outputs: {}", e)))?
        };

        for (direction, trace) in layer_traces.iter().enumerate() {
            let p = base + direction;
            final_hidden
                .index_axis_mut(Axis(0), p)
                .assign(&trace.final_hidden());
            if let (Some(cells), Some(c_t)) = (final_cell.as_mut(), trace.final_cell()) {
                cells.index_axis_mut(Axis(0), p).assign(&c_t);
            }
        }

        layer_inputs.push(std::mem::replace(&mut layer_input, next));
        traces.extend(layer_traces);
    }

    Ok(StackForward {
        outputs: layer_input,
        layer_inputs,
        traces,
        final_hidden,
        final_cell,
    })
}

/// Backpropagates `output_grad` through a stack produced by [`stack_forward`].
///
/// Layers are walked top to bottom; each layer's input gradient, summed over its
/// directions, becomes the output gradient of the layer below.
///
/// # Parameters
///
/// - `config` - The configuration `forward` was produced with
/// - `output_grad` - Gradient w.r.t. the top layer output, shape (seq_len, batch, hidden_size * directions)
/// - `params` - The parameter sets `forward` was produced with
/// - `forward` - Result of [`stack_forward`]
///
/// # Errors
///
/// Same as [`stack_forward`], plus `RnnError::InvalidShape` when `output_grad` or
/// `forward` does not match the configuration.
pub fn stack_backward<A: NdFloat>(
    config: &RnnConfig,
    output_grad: ArrayView3<A>,
    params: &[LayerParams<A>],
    forward: &StackForward<A>,
) -> Result<StackGradients<A>, RnnError> {
    validate_stack(config, params)?;
    let pseudo_layers = config.pseudo_layers();
    let directions = config.directions();
    let h = config.hidden_size();

    if forward.traces.len() != pseudo_layers || forward.layer_inputs.len() != config.layers() {
        return Err(RnnError::InvalidShape(format!(
            "forward result holds {} traces and {} layer inputs, configuration needs {} and {}",
            forward.traces.len(),
            forward.layer_inputs.len(),
            pseudo_layers,
            config.layers()
        )));
    }
    let (seq_len, batch, _) = forward.outputs.dim();
    validate_output_grad(&output_grad, seq_len, batch, config.output_size())?;

    let use_parallel = directions == 2 && batch * h >= STACK_PARALLEL_THRESHOLD;
    debug!(
        "stack backward: {} layers x {} directions, parallel: {}",
        config.layers(),
        directions,
        use_parallel
    );

    let mut param_grads: Vec<LayerParams<A>> = params
        .iter()
        .map(|p| LayerParams::zeros(p.mode(), p.input_width(), p.hidden_size()))
        .collect();
    let mut initial_hidden = Array3::zeros((pseudo_layers, batch, h));
    let mut initial_cell = config
        .mode()
        .has_cell()
        .then(|| Array3::zeros((pseudo_layers, batch, h)));
    let mut grad = output_grad.to_owned();

    for layer in (0..config.layers()).rev() {
        let base = layer * directions;
        let layer_input = &forward.layer_inputs[layer];
        let back = |direction: usize| {
            let p = base + direction;
            let reverse = direction == 1;
            params[p].backward(
                in_time_order(grad.slice(s![.., .., direction * h..(direction + 1) * h]), reverse),
                in_time_order(layer_input.view(), reverse),
                &forward.traces[p],
            )
        };

        let layer_grads = if directions == 2 {
            let (fwd, bwd) = if use_parallel {
                rayon::join(|| back(0), || back(1))
            } else {
                (back(0), back(1))
            };
            vec![fwd?, bwd?]
        } else {
            vec![back(0)?]
        };

        let mut input_grad = Array3::zeros(layer_input.raw_dim());
        for (direction, grads) in layer_grads.into_iter().enumerate() {
            let p = base + direction;
            input_grad += &in_time_order(grads.input.view(), direction == 1);
            initial_hidden
                .index_axis_mut(Axis(0), p)
                .assign(&grads.initial_hidden);
            if let (Some(cells), Some(dc)) = (initial_cell.as_mut(), grads.initial_cell.as_ref()) {
                cells.index_axis_mut(Axis(0), p).assign(dc);
            }
            param_grads[p] = grads.params;
        }
        grad = input_grad;
    }

    Ok(StackGradients {
        input: grad,
        params: param_grads,
        initial_hidden,
        initial_cell,
    })
}

/// Checks the configuration and every parameter set against it
fn validate_stack<A: NdFloat>(config: &RnnConfig, params: &[LayerParams<A>]) -> Result<(), RnnError> {
    config.validate()?;
    if config.dropout() > 0.0 && config.layers() > 1 {
        return Err(RnnError::InvalidConfiguration(format!(
            "dropout {} between stacked layers is not reproducible on the host",
            config.dropout()
        )));
    }
    if params.len() != config.pseudo_layers() {
        return Err(RnnError::InvalidShape(format!(
            "expected {} parameter sets ({} layers x {} directions), got {}",
            config.pseudo_layers(),
            config.layers(),
            config.directions(),
            params.len()
        )));
    }
    for (p, layer_params) in params.iter().enumerate() {
        if layer_params.mode() != config.mode() {
            return Err(RnnError::UnsupportedVariant(format!(
                "pseudo-layer {} holds {} parameters, configuration is {}",
                p,
                layer_params.mode(),
                config.mode()
            )));
        }
        layer_params.validate(config.pseudo_layer_input_size(p), config.hidden_size())?;
    }
    Ok(())
}

/// Returns the supplied per-pseudo-layer state, or zeros when it is absent
fn stacked_state<A: NdFloat>(
    state: Option<ArrayView3<A>>,
    pseudo_layers: usize,
    batch: usize,
    hidden_size: usize,
    name: &str,
) -> Result<Array3<A>, RnnError> {
    match state {
        None => Ok(Array3::zeros((pseudo_layers, batch, hidden_size))),
        Some(s) if s.dim() == (pseudo_layers, batch, hidden_size) => Ok(s.to_owned()),
        Some(s) => Err(RnnError::InvalidShape(format!(
            "{} must have shape ({}, {}, {}), got {:?}",
            name,
            pseudo_layers,
            batch,
            hidden_size,
            s.shape()
        ))),
    }
}

/// Reverses the time axis for the backward-time direction
fn in_time_order<A>(sequence: ArrayView3<'_, A>, reverse: bool) -> ArrayView3<'_, A> {
    if reverse {
        sequence.slice_move(s![..;-1, .., ..])
    } else {
        sequence
    }
}
