use super::*;

/// Activation of a plain (non-gated) recurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeActivation {
    Relu,
    Tanh,
}

impl NativeActivation {
    fn mode(self) -> RnnMode {
        match self {
            NativeActivation::Relu => RnnMode::Relu,
            NativeActivation::Tanh => RnnMode::Tanh,
        }
    }
}

/// Forward pass of a plain recurrence.
///
/// For each timestep t:
/// 1. pre_t = x_t · Wiᵀ + h_{t-1} · Riᵀ + bWi + bRi
/// 2. h_t = act(pre_t)
///
/// The gate buffer stores `pre_t`.
///
/// # Parameters
///
/// - `params` - The single gate of the layer
/// - `activation` - ReLU or tanh
/// - `inputs` - Input sequence with shape (seq_len, batch, input_width)
/// - `initial_hidden` - Optional initial hidden state (batch, hidden_size), zeros when absent
pub fn forward<A: NdFloat>(
    params: &GateParams<A>,
    activation: NativeActivation,
    inputs: ArrayView3<A>,
    initial_hidden: Option<ArrayView2<A>>,
) -> Result<ForwardTrace<A>, RnnError> {
    let (input_width, hidden_size) = validate_layer_dims(std::slice::from_ref(params), &['i'])?;
    let (seq_len, batch) = validate_sequence(&inputs, input_width)?;
    let h0 = initial_state(initial_hidden, batch, hidden_size, "initial hidden state")?;

    let bias = params.summed_bias();
    let mut hidden = Array3::zeros((seq_len + 1, batch, hidden_size));
    let mut gates = Array3::zeros((seq_len, batch, hidden_size));
    hidden.index_axis_mut(Axis(0), 0).assign(&h0);

    for t in 0..seq_len {
        let x_t = inputs.index_axis(Axis(0), t);
        let h_prev = hidden.index_axis(Axis(0), t);

        let pre = x_t.dot(&params.input_kernel.t()) + h_prev.dot(&params.recurrent_kernel.t()) + &bias;
        let h_t = match activation {
            NativeActivation::Relu => pre.mapv(crate::math::relu),
            NativeActivation::Tanh => pre.mapv(|x| x.tanh()),
        };

        gates.index_axis_mut(Axis(0), t).assign(&pre);
        hidden.index_axis_mut(Axis(0), t + 1).assign(&h_t);
    }

    Ok(ForwardTrace {
        hidden,
        gates,
        cells: None,
    })
}

/// Backward pass of a plain recurrence.
///
/// Walking time in reverse, with `acc_{T} = 0`:
/// - acc_t = (dy_t + acc_{t+1} · Ri) ⊙ act'(t)
/// - dx_t = acc_t · Wi
/// - dWi += acc_tᵀ · x_t, dRi += acc_tᵀ · h_{t-1}
/// - dbWi = dbRi += Σ_batch acc_t
///
/// The initial hidden gradient is acc_0 · Ri.
pub fn backward<A: NdFloat>(
    params: &GateParams<A>,
    activation: NativeActivation,
    output_grad: ArrayView3<A>,
    inputs: ArrayView3<A>,
    trace: &ForwardTrace<A>,
) -> Result<Gradients<A>, RnnError> {
    let (input_width, hidden_size) = validate_layer_dims(std::slice::from_ref(params), &['i'])?;
    let (seq_len, batch) = validate_sequence(&inputs, input_width)?;
    validate_output_grad(&output_grad, seq_len, batch, hidden_size)?;
    validate_trace(trace, seq_len, batch, hidden_size, activation.mode())?;

    let mut grads = GateParams::zeros(input_width, hidden_size);
    let mut input_grad = Array3::zeros((seq_len, batch, input_width));
    let mut acc_next = Array2::<A>::zeros((batch, hidden_size));

    for t in (0..seq_len).rev() {
        let h_t = trace.hidden.index_axis(Axis(0), t + 1);
        let h_prev = trace.hidden.index_axis(Axis(0), t);

        let upstream = &output_grad.index_axis(Axis(0), t) + &acc_next.dot(&params.recurrent_kernel);
        let acc = match activation {
            NativeActivation::Relu => relu_backward(&upstream, &trace.gates.index_axis(Axis(0), t)),
            NativeActivation::Tanh => tanh_backward(&upstream, &h_t),
        };

        input_grad
            .index_axis_mut(Axis(0), t)
            .assign(&acc.dot(&params.input_kernel));

        grads.input_kernel += &acc.t().dot(&inputs.index_axis(Axis(0), t));
        grads.recurrent_kernel += &acc.t().dot(&h_prev);

        // Both biases feed the same pre-activation, so each receives the full sum
        let bias_grad = acc.sum_axis(Axis(0));
        grads.input_bias += &bias_grad;
        grads.recurrent_bias += &bias_grad;

        acc_next = acc;
    }

    let initial_hidden = acc_next.dot(&params.recurrent_kernel);
    let params = match activation {
        NativeActivation::Relu => LayerParams::Relu(grads),
        NativeActivation::Tanh => LayerParams::Tanh(grads),
    };

    Ok(Gradients {
        input: input_grad,
        params,
        initial_hidden,
        initial_cell: None,
    })
}
