use super::*;

/// Validates that a dimension value is greater than 0
///
/// # Parameters
///
/// - `value` - The dimension value to validate
/// - `name` - The name of the dimension for error messages
///
/// # Returns
///
/// * `Ok(())` if validation passes
/// * `Err(RnnError)` if validation fails
pub(crate) fn validate_dimension_greater_than_zero(value: usize, name: &str) -> Result<(), RnnError> {
    if value == 0 {
        return Err(RnnError::InvalidShape(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(())
}

/// Validates the gates of one layer against each other and returns `(input_width, hidden_size)`
///
/// # Parameters
///
/// - `gates` - Gates in linear-layer order
/// - `labels` - One-letter gate labels for error messages, same order as `gates`
pub(crate) fn validate_layer_dims<A: NdFloat>(
    gates: &[GateParams<A>],
    labels: &[char],
) -> Result<(usize, usize), RnnError> {
    let first = gates
        .first()
        .ok_or_else(|| RnnError::InvalidShape("layer has no gates".to_string()))?;
    let input_width = first.input_kernel.ncols();
    let hidden_size = first.input_kernel.nrows();
    validate_dimension_greater_than_zero(input_width, "input_width")?;
    validate_dimension_greater_than_zero(hidden_size, "hidden_size")?;

    for (gate, label) in gates.iter().zip(labels) {
        gate.validate(input_width, hidden_size, *label)?;
    }
    Ok((input_width, hidden_size))
}

/// Validates an input sequence and returns `(seq_len, batch)`
///
/// # Parameters
///
/// - `inputs` - Sequence with shape (seq_len, batch, features)
/// - `input_width` - The feature width the layer expects
pub(crate) fn validate_sequence<A>(inputs: &ArrayView3<A>, input_width: usize) -> Result<(usize, usize), RnnError> {
    let (seq_len, batch, features) = inputs.dim();
    validate_dimension_greater_than_zero(seq_len, "sequence length")?;
    validate_dimension_greater_than_zero(batch, "batch size")?;
    if features != input_width {
        return Err(RnnError::InvalidShape(format!(
            "input sequence has {} features, layer expects {}",
            features, input_width
        )));
    }
    Ok((seq_len, batch))
}

/// Validates an output gradient against the sequence it belongs to
pub(crate) fn validate_output_grad<A>(
    output_grad: &ArrayView3<A>,
    seq_len: usize,
    batch: usize,
    hidden_size: usize,
) -> Result<(), RnnError> {
    if output_grad.dim() != (seq_len, batch, hidden_size) {
        return Err(RnnError::InvalidShape(format!(
            "output gradient must have shape ({}, {}, {}), got {:?}",
            seq_len,
            batch,
            hidden_size,
            output_grad.shape()
        )));
    }
    Ok(())
}

/// Returns the supplied initial state, or zeros when it is absent.
///
/// # Errors
///
/// - `RnnError::InvalidShape` - If the supplied state is not (batch, hidden_size)
pub(crate) fn initial_state<A: NdFloat>(
    state: Option<ArrayView2<A>>,
    batch: usize,
    hidden_size: usize,
    name: &str,
) -> Result<Array2<A>, RnnError> {
    match state {
        None => Ok(Array2::zeros((batch, hidden_size))),
        Some(s) if s.dim() == (batch, hidden_size) => Ok(s.to_owned()),
        Some(s) => Err(RnnError::InvalidShape(format!(
            "{} must have shape ({}, {}), got {:?}",
            name,
            batch,
            hidden_size,
            s.shape()
        ))),
    }
}

/// Validates a forward trace against the sequence and layer it is replayed with
pub(crate) fn validate_trace<A>(
    trace: &ForwardTrace<A>,
    seq_len: usize,
    batch: usize,
    hidden_size: usize,
    mode: RnnMode,
) -> Result<(), RnnError> {
    if trace.hidden.dim() != (seq_len + 1, batch, hidden_size) {
        return Err(RnnError::InvalidShape(format!(
            "hidden trace must have shape ({}, {}, {}), got {:?}",
            seq_len + 1,
            batch,
            hidden_size,
            trace.hidden.shape()
        )));
    }
    let gate_width = mode.gate_blocks() * hidden_size;
    if trace.gates.dim() != (seq_len, batch, gate_width) {
        return Err(RnnError::InvalidShape(format!(
            "gate buffer must have shape ({}, {}, {}), got {:?}",
            seq_len,
            batch,
            gate_width,
            trace.gates.shape()
        )));
    }
    match (&trace.cells, mode.has_cell()) {
        (Some(cells), true) if cells.dim() == (seq_len + 1, batch, hidden_size) => Ok(()),
        (None, false) => Ok(()),
        (Some(cells), true) => Err(RnnError::InvalidShape(format!(
            "cell trace must have shape ({}, {}, {}), got {:?}",
            seq_len + 1,
            batch,
            hidden_size,
            cells.shape()
        ))),
        (None, true) => Err(RnnError::InvalidShape(
            "trace has no cell trace".to_string(),
        )),
        (Some(_), false) => Err(RnnError::InvalidShape(format!(
            "{} trace must not carry a cell trace",
            mode
        ))),
    }
}
