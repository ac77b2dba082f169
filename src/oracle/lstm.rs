use super::*;

/// Builds the combined projection and bias of an LSTM layer.
///
/// Rows `0..input_width` hold the transposed input projections, the remaining
/// rows the transposed recurrent projections. Columns are grouped in
/// [`LstmGate::BLOCK_ORDER`] blocks of `hidden_size`. Each bias block is the sum
/// of the gate's two biases.
///
/// # Returns
///
/// - `(Array2<A>, Array1<A>)` - Combined weights with shape (input_width + hidden_size, 4 * hidden_size)
///   and combined bias of length 4 * hidden_size
pub fn combined_weights<A: NdFloat>(params: &LstmParams<A>, input_width: usize, hidden_size: usize) -> (Array2<A>, Array1<A>) {
    let mut weights = Array2::zeros((input_width + hidden_size, 4 * hidden_size));
    let mut bias = Array1::zeros(4 * hidden_size);

    for gate in LstmGate::BLOCK_ORDER {
        let cols = gate.block() * hidden_size..(gate.block() + 1) * hidden_size;
        let gate_params = &params[gate];

        weights
            .slice_mut(s![..input_width, cols.clone()])
            .assign(&gate_params.input_kernel.t());
        weights
            .slice_mut(s![input_width.., cols.clone()])
            .assign(&gate_params.recurrent_kernel.t());
        bias.slice_mut(s![cols]).assign(&gate_params.summed_bias());
    }

    (weights, bias)
}

/// Splits a combined weight/bias gradient back into per-gate gradients.
///
/// Both biases of a gate receive the full block of the bias gradient.
fn split_gradients<A: NdFloat>(
    weights_grad: &Array2<A>,
    bias_grad: &Array1<A>,
    input_width: usize,
    hidden_size: usize,
) -> LstmParams<A> {
    let mut grads = LstmParams::zeros(input_width, hidden_size);

    for gate in LstmGate::ALL {
        let cols = gate.block() * hidden_size..(gate.block() + 1) * hidden_size;
        let gate_grads = &mut grads[gate];

        gate_grads
            .input_kernel
            .assign(&weights_grad.slice(s![..input_width, cols.clone()]).t());
        gate_grads
            .recurrent_kernel
            .assign(&weights_grad.slice(s![input_width.., cols.clone()]).t());
        gate_grads.input_bias.assign(&bias_grad.slice(s![cols.clone()]));
        gate_grads.recurrent_bias.assign(&bias_grad.slice(s![cols]));
    }

    grads
}

impl<A: NdFloat> Recurrence<A> for LstmParams<A> {
    /// For each timestep t:
    /// 1. [c̃, i, f, o] = act([x_t, h_{t-1}] · W + b), tanh on c̃ and sigmoid on i, f, o
    /// 2. c_t = f ⊙ c_{t-1} + i ⊙ c̃
    /// 3. h_t = o ⊙ tanh(c_t)
    ///
    /// The gate buffer stores the activated blocks.
    fn forward(
        &self,
        inputs: ArrayView3<A>,
        initial_hidden: Option<ArrayView2<A>>,
        initial_cell: Option<ArrayView2<A>>,
    ) -> Result<ForwardTrace<A>, RnnError> {
        let (input_width, hidden_size) = validate_layer_dims(self.as_slice(), &['i', 'f', 'c', 'o'])?;
        let (seq_len, batch) = validate_sequence(&inputs, input_width)?;
        let h0 = initial_state(initial_hidden, batch, hidden_size, "initial hidden state")?;
        let c0 = initial_state(initial_cell, batch, hidden_size, "initial cell state")?;

        let (weights, bias) = combined_weights(self, input_width, hidden_size);
        let h = hidden_size;

        let mut hidden = Array3::zeros((seq_len + 1, batch, h));
        let mut cells = Array3::zeros((seq_len + 1, batch, h));
        let mut gates = Array3::zeros((seq_len, batch, 4 * h));
        hidden.index_axis_mut(Axis(0), 0).assign(&h0);
        cells.index_axis_mut(Axis(0), 0).assign(&c0);

        for t in 0..seq_len {
            let joined = join_features(inputs.index_axis(Axis(0), t), hidden.index_axis(Axis(0), t))?;

            let mut act = joined.dot(&weights) + &bias;
            tanh_inplace(&mut act.slice_mut(s![.., ..h]));
            sigmoid_inplace(&mut act.slice_mut(s![.., h..]));

            let candidate = gate_block(&act, LstmGate::Cell.block(), h);
            let input_gate = gate_block(&act, LstmGate::Input.block(), h);
            let forget_gate = gate_block(&act, LstmGate::Forget.block(), h);
            let output_gate = gate_block(&act, LstmGate::Output.block(), h);

            let c_t = &forget_gate * &cells.index_axis(Axis(0), t) + &input_gate * &candidate;
            let h_t = &output_gate * &c_t.mapv(|x| x.tanh());

            gates.index_axis_mut(Axis(0), t).assign(&act);
            cells.index_axis_mut(Axis(0), t + 1).assign(&c_t);
            hidden.index_axis_mut(Axis(0), t + 1).assign(&h_t);
        }

        Ok(ForwardTrace {
            hidden,
            gates,
            cells: Some(cells),
        })
    }

    /// Walking time in reverse with zero terminal gradients:
    /// - dh = dy_t + dh_carried
    /// - dc = dh ⊙ o ⊙ (1 - tanh²(c_t)) + dc_carried ⊙ f_{t+1}
    /// - gate gradients [dc ⊙ i, dc ⊙ c̃, dc ⊙ c_{t-1}, dh ⊙ tanh(c_t)] through their activation derivatives
    /// - [dx_t, dh_carried] = layer_grad · Wᵀ
    fn backward(
        &self,
        output_grad: ArrayView3<A>,
        inputs: ArrayView3<A>,
        trace: &ForwardTrace<A>,
    ) -> Result<Gradients<A>, RnnError> {
        let (input_width, hidden_size) = validate_layer_dims(self.as_slice(), &['i', 'f', 'c', 'o'])?;
        let (seq_len, batch) = validate_sequence(&inputs, input_width)?;
        validate_output_grad(&output_grad, seq_len, batch, hidden_size)?;
        validate_trace(trace, seq_len, batch, hidden_size, RnnMode::Lstm)?;
        let cells = trace
            .cells
            .as_ref()
            .ok_or_else(|| RnnError::InvalidShape("trace has no cell trace".to_string()))?;

        let (weights, _) = combined_weights(self, input_width, hidden_size);
        let h = hidden_size;

        let mut weights_grad = Array2::<A>::zeros((input_width + h, 4 * h));
        let mut bias_grad = Array1::<A>::zeros(4 * h);
        let mut input_grad = Array3::zeros((seq_len, batch, input_width));

        let mut acc_hidden = Array2::<A>::zeros((batch, h));
        let mut acc_cell = Array2::<A>::zeros((batch, h));
        let mut next_forget = Array2::<A>::zeros((batch, h));

        for t in (0..seq_len).rev() {
            let act = trace.gates.index_axis(Axis(0), t);
            let candidate = gate_block(&act, LstmGate::Cell.block(), h);
            let input_gate = gate_block(&act, LstmGate::Input.block(), h);
            let forget_gate = gate_block(&act, LstmGate::Forget.block(), h);
            let output_gate = gate_block(&act, LstmGate::Output.block(), h);

            let c_prev = cells.index_axis(Axis(0), t);
            let tanh_c = cells.index_axis(Axis(0), t + 1).mapv(|x| x.tanh());

            let dh = &output_grad.index_axis(Axis(0), t) + &acc_hidden;
            let dc = tanh_backward(&(&dh * &output_gate), &tanh_c) + &(&acc_cell * &next_forget);

            let mut layer_grad = Array2::<A>::zeros((batch, 4 * h));
            {
                let block = LstmGate::Cell.block();
                layer_grad
                    .slice_mut(s![.., block * h..(block + 1) * h])
                    .assign(&tanh_backward(&(&dc * &input_gate), &candidate));
            }
            for (gate, grad, output) in [
                (LstmGate::Input, &dc * &candidate, input_gate),
                (LstmGate::Forget, &dc * &c_prev, forget_gate),
                (LstmGate::Output, &dh * &tanh_c, output_gate),
            ] {
                let block = gate.block();
                let mut slot = layer_grad.slice_mut(s![.., block * h..(block + 1) * h]);
                slot.assign(&grad);
                sigmoid_backward(&mut slot, &output);
            }

            let joined_grad = layer_grad.dot(&weights.t());
            input_grad
                .index_axis_mut(Axis(0), t)
                .assign(&joined_grad.slice(s![.., ..input_width]));

            let joined = join_features(inputs.index_axis(Axis(0), t), trace.hidden.index_axis(Axis(0), t))?;
            weights_grad += &joined.t().dot(&layer_grad);
            bias_grad += &layer_grad.sum_axis(Axis(0));

            acc_hidden = joined_grad.slice(s![.., input_width..]).to_owned();
            acc_cell = dc;
            next_forget = forget_gate.to_owned();
        }

        let initial_cell = &acc_cell * &next_forget;
        let params = LayerParams::Lstm(split_gradients(&weights_grad, &bias_grad, input_width, h));

        Ok(Gradients {
            input: input_grad,
            params,
            initial_hidden: acc_hidden,
            initial_cell: Some(initial_cell),
        })
    }
}
