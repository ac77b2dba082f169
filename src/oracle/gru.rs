use super::*;

/// Gate-buffer block holding the recurrent-side candidate pre-activation `rh`
pub const RECURRENT_CANDIDATE_BLOCK: usize = 0;
/// Gate-buffer block holding the input-side candidate pre-activation `wh`
pub const INPUT_CANDIDATE_BLOCK: usize = 1;
/// Gate-buffer block holding the reset gate `r` (sigmoid applied)
pub const RESET_BLOCK: usize = 2;
/// Gate-buffer block holding the update gate `i` (sigmoid applied)
pub const UPDATE_BLOCK: usize = 3;

/// Builds the combined projection and bias of a GRU layer.
///
/// The candidate is split over two blocks because the reset gate only scales its
/// recurrent-side contribution: the `rh` block has zero input rows and bias `bRh`,
/// the `wh` block has zero recurrent rows and bias `bWh`. The reset and update
/// blocks carry both projections and the sum of both biases.
///
/// # Returns
///
/// - `(Array2<A>, Array1<A>)` - Combined weights with shape (input_width + hidden_size, 4 * hidden_size)
///   and combined bias of length 4 * hidden_size
pub fn combined_weights<A: NdFloat>(params: &GruParams<A>, input_width: usize, hidden_size: usize) -> (Array2<A>, Array1<A>) {
    let h = hidden_size;
    let cols = |block: usize| block * h..(block + 1) * h;
    let mut weights = Array2::zeros((input_width + h, 4 * h));
    let mut bias = Array1::zeros(4 * h);

    let candidate = &params[GruGate::Hidden];
    weights
        .slice_mut(s![input_width.., cols(RECURRENT_CANDIDATE_BLOCK)])
        .assign(&candidate.recurrent_kernel.t());
    bias.slice_mut(s![cols(RECURRENT_CANDIDATE_BLOCK)])
        .assign(&candidate.recurrent_bias);
    weights
        .slice_mut(s![..input_width, cols(INPUT_CANDIDATE_BLOCK)])
        .assign(&candidate.input_kernel.t());
    bias.slice_mut(s![cols(INPUT_CANDIDATE_BLOCK)])
        .assign(&candidate.input_bias);

    for (gate, block) in [(GruGate::Reset, RESET_BLOCK), (GruGate::Update, UPDATE_BLOCK)] {
        let gate_params = &params[gate];
        weights
            .slice_mut(s![..input_width, cols(block)])
            .assign(&gate_params.input_kernel.t());
        weights
            .slice_mut(s![input_width.., cols(block)])
            .assign(&gate_params.recurrent_kernel.t());
        bias.slice_mut(s![cols(block)]).assign(&gate_params.summed_bias());
    }

    (weights, bias)
}

/// Candidate state h̃ = tanh(wh + r ⊙ rh) recovered from one step of the gate buffer
pub fn candidate<A, S>(gates_t: &ArrayBase<S, Ix2>, hidden_size: usize) -> Array2<A>
where
    A: NdFloat,
    S: Data<Elem = A>,
{
    let rh = gate_block(gates_t, RECURRENT_CANDIDATE_BLOCK, hidden_size);
    let wh = gate_block(gates_t, INPUT_CANDIDATE_BLOCK, hidden_size);
    let r = gate_block(gates_t, RESET_BLOCK, hidden_size);
    Zip::from(&wh)
        .and(&r)
        .and(&rh)
        .map_collect(|&wh, &r, &rh| (wh + r * rh).tanh())
}

/// Splits a combined gradient into per-gate gradients, the inverse of [`combined_weights`].
///
/// The reset and update gates give the same block of the bias gradient to both
/// biases. The candidate gate's input-side bias takes the `wh` block and its
/// recurrent-side bias the `rh` block.
fn split_gradients<A: NdFloat>(
    weights_grad: &Array2<A>,
    bias_grad: &Array1<A>,
    input_width: usize,
    hidden_size: usize,
) -> GruParams<A> {
    let h = hidden_size;
    let cols = |block: usize| block * h..(block + 1) * h;
    let mut grads = GruParams::zeros(input_width, h);

    {
        let candidate = &mut grads[GruGate::Hidden];
        candidate
            .input_kernel
            .assign(&weights_grad.slice(s![..input_width, cols(INPUT_CANDIDATE_BLOCK)]).t());
        candidate
            .recurrent_kernel
            .assign(&weights_grad.slice(s![input_width.., cols(RECURRENT_CANDIDATE_BLOCK)]).t());
        candidate
            .input_bias
            .assign(&bias_grad.slice(s![cols(INPUT_CANDIDATE_BLOCK)]));
        candidate
            .recurrent_bias
            .assign(&bias_grad.slice(s![cols(RECURRENT_CANDIDATE_BLOCK)]));
    }

    for (gate, block) in [(GruGate::Reset, RESET_BLOCK), (GruGate::Update, UPDATE_BLOCK)] {
        let gate_grads = &mut grads[gate];
        gate_grads
            .input_kernel
            .assign(&weights_grad.slice(s![..input_width, cols(block)]).t());
        gate_grads
            .recurrent_kernel
            .assign(&weights_grad.slice(s![input_width.., cols(block)]).t());
        gate_grads.input_bias.assign(&bias_grad.slice(s![cols(block)]));
        gate_grads.recurrent_bias.assign(&bias_grad.slice(s![cols(block)]));
    }

    grads
}

impl<A: NdFloat> Recurrence<A> for GruParams<A> {
    /// For each timestep t:
    /// 1. [rh, wh, r, i] = [x_t, h_{t-1}] · W + b, sigmoid on r and i
    /// 2. h̃ = tanh(wh + r ⊙ rh)
    /// 3. h_t = (1 - i) ⊙ h̃ + i ⊙ h_{t-1}
    ///
    /// GRU has no cell state; `initial_cell` must be `None`.
    fn forward(
        &self,
        inputs: ArrayView3<A>,
        initial_hidden: Option<ArrayView2<A>>,
        initial_cell: Option<ArrayView2<A>>,
    ) -> Result<ForwardTrace<A>, RnnError> {
        if initial_cell.is_some() {
            return Err(RnnError::InvalidShape(
                "gru has no cell state but an initial cell state was supplied".to_string(),
            ));
        }
        let (input_width, hidden_size) = validate_layer_dims(self.as_slice(), &['r', 'i', 'h'])?;
        let (seq_len, batch) = validate_sequence(&inputs, input_width)?;
        let h0 = initial_state(initial_hidden, batch, hidden_size, "initial hidden state")?;

        let (weights, bias) = combined_weights(self, input_width, hidden_size);
        let h = hidden_size;

        let mut hidden = Array3::zeros((seq_len + 1, batch, h));
        let mut gates = Array3::zeros((seq_len, batch, 4 * h));
        hidden.index_axis_mut(Axis(0), 0).assign(&h0);

        for t in 0..seq_len {
            let h_prev = hidden.index_axis(Axis(0), t);
            let joined = join_features(inputs.index_axis(Axis(0), t), h_prev)?;

            let mut act = joined.dot(&weights) + &bias;
            sigmoid_inplace(&mut act.slice_mut(s![.., RESET_BLOCK * h..]));

            let h_cand = candidate(&act, h);
            let update = gate_block(&act, UPDATE_BLOCK, h);
            let h_t = Zip::from(&h_cand)
                .and(&update)
                .and(&h_prev)
                .map_collect(|&c, &z, &hp| (A::one() - z) * c + z * hp);

            gates.index_axis_mut(Axis(0), t).assign(&act);
            hidden.index_axis_mut(Axis(0), t + 1).assign(&h_t);
        }

        Ok(ForwardTrace {
            hidden,
            gates,
            cells: None,
        })
    }

    /// Walking time in reverse with a zero terminal gradient:
    /// - dh = dy_t + dh_carried
    /// - dh̃ = dh ⊙ (1 - i) ⊙ (1 - h̃²)
    /// - [d rh, d wh, d r, d i] = [dh̃ ⊙ r, dh̃, dh̃ ⊙ rh, dh ⊙ (h_{t-1} - h̃)], sigmoid derivative on r and i
    /// - [dx_t, carried] = layer_grad · Wᵀ, dh_carried = dh ⊙ i + carried
    fn backward(
        &self,
        output_grad: ArrayView3<A>,
        inputs: ArrayView3<A>,
        trace: &ForwardTrace<A>,
    ) -> Result<Gradients<A>, RnnError> {
        let (input_width, hidden_size) = validate_layer_dims(self.as_slice(), &['r', 'i', 'h'])?;
        let (seq_len, batch) = validate_sequence(&inputs, input_width)?;
        validate_output_grad(&output_grad, seq_len, batch, hidden_size)?;
        validate_trace(trace, seq_len, batch, hidden_size, RnnMode::Gru)?;

        let (weights, _) = combined_weights(self, input_width, hidden_size);
        let h = hidden_size;
        let cols = |block: usize| block * h..(block + 1) * h;

        let mut weights_grad = Array2::<A>::zeros((input_width + h, 4 * h));
        let mut bias_grad = Array1::<A>::zeros(4 * h);
        let mut input_grad = Array3::zeros((seq_len, batch, input_width));
        let mut acc = Array2::<A>::zeros((batch, h));

        for t in (0..seq_len).rev() {
            let act = trace.gates.index_axis(Axis(0), t);
            let rh = gate_block(&act, RECURRENT_CANDIDATE_BLOCK, h);
            let reset = gate_block(&act, RESET_BLOCK, h);
            let update = gate_block(&act, UPDATE_BLOCK, h);
            let h_prev = trace.hidden.index_axis(Axis(0), t);
            let h_cand = candidate(&act, h);

            let dh = &output_grad.index_axis(Axis(0), t) + &acc;
            let d_cand = Zip::from(&dh)
                .and(&update)
                .and(&h_cand)
                .map_collect(|&g, &z, &c| g * (A::one() - z) * (A::one() - c * c));

            let mut layer_grad = Array2::<A>::zeros((batch, 4 * h));
            layer_grad
                .slice_mut(s![.., cols(RECURRENT_CANDIDATE_BLOCK)])
                .assign(&(&d_cand * &reset));
            layer_grad
                .slice_mut(s![.., cols(INPUT_CANDIDATE_BLOCK)])
                .assign(&d_cand);
            {
                let mut slot = layer_grad.slice_mut(s![.., cols(RESET_BLOCK)]);
                slot.assign(&(&d_cand * &rh));
                sigmoid_backward(&mut slot, &reset);
            }
            {
                let mut slot = layer_grad.slice_mut(s![.., cols(UPDATE_BLOCK)]);
                slot.assign(&(&dh * &(&h_prev - &h_cand)));
                sigmoid_backward(&mut slot, &update);
            }

            let joined_grad = layer_grad.dot(&weights.t());
            input_grad
                .index_axis_mut(Axis(0), t)
                .assign(&joined_grad.slice(s![.., ..input_width]));

            let joined = join_features(inputs.index_axis(Axis(0), t), h_prev)?;
            weights_grad += &joined.t().dot(&layer_grad);
            bias_grad += &layer_grad.sum_axis(Axis(0));

            acc = &dh * &update + &joined_grad.slice(s![.., input_width..]);
        }

        let params = LayerParams::Gru(split_gradients(&weights_grad, &bias_grad, input_width, h));

        Ok(Gradients {
            input: input_grad,
            params,
            initial_hidden: acc,
            initial_cell: None,
        })
    }
}
