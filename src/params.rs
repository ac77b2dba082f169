use crate::RnnError;
use crate::config::RnnMode;
use ndarray::{Array1, Array2, NdFloat};
use std::ops::{Index, IndexMut};

/// Which projection of a gate a matrix or bias belongs to.
///
/// cuDNN keeps separate biases for the input projection (`w` side) and the
/// recurrent projection (`r` side); both are summed before the gate nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateSide {
    Input,
    Recurrent,
}

impl GateSide {
    /// Single-letter tag used in parameter names (`w` or `r`)
    pub fn tag(self) -> char {
        match self {
            GateSide::Input => 'w',
            GateSide::Recurrent => 'r',
        }
    }
}

/// LSTM gates, in cuDNN linear-layer order (`i`, `f`, `c`, `o`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LstmGate {
    Input,
    Forget,
    Cell,
    Output,
}

impl LstmGate {
    /// Linear-layer order of the flat weight buffer
    pub const ALL: [LstmGate; 4] = [
        LstmGate::Input,
        LstmGate::Forget,
        LstmGate::Cell,
        LstmGate::Output,
    ];

    /// Order of the `hidden_size`-wide blocks in the gate buffer: candidate, input, forget, output
    pub const BLOCK_ORDER: [LstmGate; 4] = [
        LstmGate::Cell,
        LstmGate::Input,
        LstmGate::Forget,
        LstmGate::Output,
    ];

    pub fn label(self) -> char {
        match self {
            LstmGate::Input => 'i',
            LstmGate::Forget => 'f',
            LstmGate::Cell => 'c',
            LstmGate::Output => 'o',
        }
    }

    /// Position of this gate's block in the gate buffer
    pub fn block(self) -> usize {
        match self {
            LstmGate::Cell => 0,
            LstmGate::Input => 1,
            LstmGate::Forget => 2,
            LstmGate::Output => 3,
        }
    }

    fn slot(self) -> usize {
        match self {
            LstmGate::Input => 0,
            LstmGate::Forget => 1,
            LstmGate::Cell => 2,
            LstmGate::Output => 3,
        }
    }
}

/// GRU gates, in cuDNN linear-layer order (`r`, `i`, `h`).
///
/// `Update` is cuDNN's "input" gate `i`; `Hidden` is the candidate state `h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GruGate {
    Reset,
    Update,
    Hidden,
}

impl GruGate {
    /// Linear-layer order of the flat weight buffer
    pub const ALL: [GruGate; 3] = [GruGate::Reset, GruGate::Update, GruGate::Hidden];

    pub fn label(self) -> char {
        match self {
            GruGate::Reset => 'r',
            GruGate::Update => 'i',
            GruGate::Hidden => 'h',
        }
    }

    fn slot(self) -> usize {
        match self {
            GruGate::Reset => 0,
            GruGate::Update => 1,
            GruGate::Hidden => 2,
        }
    }
}

/// Parameters of one gate: both projections and both biases.
///
/// # Fields
///
/// - `input_kernel` - Input projection `Wx` with shape (hidden_size, input_width)
/// - `recurrent_kernel` - Recurrent projection `Rx` with shape (hidden_size, hidden_size)
/// - `input_bias` - Bias attached to the input projection, length hidden_size
/// - `recurrent_bias` - Bias attached to the recurrent projection, length hidden_size
#[derive(Debug, Clone, PartialEq)]
pub struct GateParams<A> {
    pub input_kernel: Array2<A>,
    pub recurrent_kernel: Array2<A>,
    pub input_bias: Array1<A>,
    pub recurrent_bias: Array1<A>,
}

impl<A: NdFloat> GateParams<A> {
    /// Creates a gate with every parameter set to zero
    pub fn zeros(input_width: usize, hidden_size: usize) -> Self {
        Self {
            input_kernel: Array2::zeros((hidden_size, input_width)),
            recurrent_kernel: Array2::zeros((hidden_size, hidden_size)),
            input_bias: Array1::zeros(hidden_size),
            recurrent_bias: Array1::zeros(hidden_size),
        }
    }

    pub fn kernel(&self, side: GateSide) -> &Array2<A> {
        match side {
            GateSide::Input => &self.input_kernel,
            GateSide::Recurrent => &self.recurrent_kernel,
        }
    }

    pub fn kernel_mut(&mut self, side: GateSide) -> &mut Array2<A> {
        match side {
            GateSide::Input => &mut self.input_kernel,
            GateSide::Recurrent => &mut self.recurrent_kernel,
        }
    }

    pub fn bias(&self, side: GateSide) -> &Array1<A> {
        match side {
            GateSide::Input => &self.input_bias,
            GateSide::Recurrent => &self.recurrent_bias,
        }
    }

    pub fn bias_mut(&mut self, side: GateSide) -> &mut Array1<A> {
        match side {
            GateSide::Input => &mut self.input_bias,
            GateSide::Recurrent => &mut self.recurrent_bias,
        }
    }

    /// Sum of both biases, the effective bias of the gate pre-activation
    pub fn summed_bias(&self) -> Array1<A> {
        &self.input_bias + &self.recurrent_bias
    }

    /// Checks all four tensors against the expected layer dimensions.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If any tensor has the wrong shape; the message names the gate
    pub fn validate(&self, input_width: usize, hidden_size: usize, gate: char) -> Result<(), RnnError> {
        let expect_matrix = |m: &Array2<A>, side: GateSide, cols: usize| {
            if m.dim() != (hidden_size, cols) {
                return Err(RnnError::InvalidShape(format!(
                    "{}{} must have shape ({}, {}), got {:?}",
                    side.tag(),
                    gate,
                    hidden_size,
                    cols,
                    m.shape()
                )));
            }
            Ok(())
        };
        let expect_bias = |b: &Array1<A>, side: GateSide| {
            if b.len() != hidden_size {
                return Err(RnnError::InvalidShape(format!(
                    "b{}{} must have length {}, got {}",
                    side.tag(),
                    gate,
                    hidden_size,
                    b.len()
                )));
            }
            Ok(())
        };

        expect_matrix(&self.input_kernel, GateSide::Input, input_width)?;
        expect_matrix(&self.recurrent_kernel, GateSide::Recurrent, hidden_size)?;
        expect_bias(&self.input_bias, GateSide::Input)?;
        expect_bias(&self.recurrent_bias, GateSide::Recurrent)?;
        Ok(())
    }
}

/// The four LSTM gates, indexed by [`LstmGate`]
#[derive(Debug, Clone, PartialEq)]
pub struct LstmParams<A> {
    gates: [GateParams<A>; 4],
}

impl<A: NdFloat> LstmParams<A> {
    /// Builds the parameter set from gates given in linear-layer order (`i`, `f`, `c`, `o`)
    pub fn new(input: GateParams<A>, forget: GateParams<A>, cell: GateParams<A>, output: GateParams<A>) -> Self {
        Self {
            gates: [input, forget, cell, output],
        }
    }

    pub fn zeros(input_width: usize, hidden_size: usize) -> Self {
        Self {
            gates: std::array::from_fn(|_| GateParams::zeros(input_width, hidden_size)),
        }
    }

    /// Gates in linear-layer order
    pub fn as_slice(&self) -> &[GateParams<A>] {
        &self.gates
    }
}

impl<A> Index<LstmGate> for LstmParams<A> {
    type Output = GateParams<A>;

    fn index(&self, gate: LstmGate) -> &GateParams<A> {
        &self.gates[gate.slot()]
    }
}

impl<A> IndexMut<LstmGate> for LstmParams<A> {
    fn index_mut(&mut self, gate: LstmGate) -> &mut GateParams<A> {
        &mut self.gates[gate.slot()]
    }
}

/// The three GRU gates, indexed by [`GruGate`]
#[derive(Debug, Clone, PartialEq)]
pub struct GruParams<A> {
    gates: [GateParams<A>; 3],
}

impl<A: NdFloat> GruParams<A> {
    /// Builds the parameter set from gates given in linear-layer order (`r`, `i`, `h`)
    pub fn new(reset: GateParams<A>, update: GateParams<A>, hidden: GateParams<A>) -> Self {
        Self {
            gates: [reset, update, hidden],
        }
    }

    pub fn zeros(input_width: usize, hidden_size: usize) -> Self {
        Self {
            gates: std::array::from_fn(|_| GateParams::zeros(input_width, hidden_size)),
        }
    }

    /// Gates in linear-layer order
    pub fn as_slice(&self) -> &[GateParams<A>] {
        &self.gates
    }
}

impl<A> Index<GruGate> for GruParams<A> {
    type Output = GateParams<A>;

    fn index(&self, gate: GruGate) -> &GateParams<A> {
        &self.gates[gate.slot()]
    }
}

impl<A> IndexMut<GruGate> for GruParams<A> {
    fn index_mut(&mut self, gate: GruGate) -> &mut GateParams<A> {
        &mut self.gates[gate.slot()]
    }
}

/// Name of one parameter tensor, formatted the way cuDNN wrappers usually key them:
/// `wi`, `rf`, `bwc`, `brh`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamName {
    pub side: GateSide,
    pub gate: char,
    pub bias: bool,
}

impl std::fmt::Display for ParamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.bias {
            write!(f, "b{}{}", self.side.tag(), self.gate)
        } else {
            write!(f, "{}{}", self.side.tag(), self.gate)
        }
    }
}

/// Parameters of one (layer, direction) pair for any recurrence variant.
///
/// The same type carries weight gradients: a gradient has exactly the shapes of
/// the parameters it belongs to.
///
/// # Variants
///
/// - `Relu` - Single gate, ReLU activation
/// - `Tanh` - Single gate, tanh activation
/// - `Lstm` - Four gates
/// - `Gru` - Three gates
#[derive(Debug, Clone, PartialEq)]
pub enum LayerParams<A> {
    Relu(GateParams<A>),
    Tanh(GateParams<A>),
    Lstm(LstmParams<A>),
    Gru(GruParams<A>),
}

impl<A: NdFloat> LayerParams<A> {
    /// Creates zero parameters of the given variant and dimensions
    pub fn zeros(mode: RnnMode, input_width: usize, hidden_size: usize) -> Self {
        match mode {
            RnnMode::Relu => LayerParams::Relu(GateParams::zeros(input_width, hidden_size)),
            RnnMode::Tanh => LayerParams::Tanh(GateParams::zeros(input_width, hidden_size)),
            RnnMode::Lstm => LayerParams::Lstm(LstmParams::zeros(input_width, hidden_size)),
            RnnMode::Gru => LayerParams::Gru(GruParams::zeros(input_width, hidden_size)),
        }
    }

    pub fn mode(&self) -> RnnMode {
        match self {
            LayerParams::Relu(_) => RnnMode::Relu,
            LayerParams::Tanh(_) => RnnMode::Tanh,
            LayerParams::Lstm(_) => RnnMode::Lstm,
            LayerParams::Gru(_) => RnnMode::Gru,
        }
    }

    /// Gates in linear-layer order
    pub fn gates(&self) -> &[GateParams<A>] {
        match self {
            LayerParams::Relu(g) | LayerParams::Tanh(g) => std::slice::from_ref(g),
            LayerParams::Lstm(p) => &p.gates[..],
            LayerParams::Gru(p) => &p.gates[..],
        }
    }

    pub fn gates_mut(&mut self) -> &mut [GateParams<A>] {
        match self {
            LayerParams::Relu(g) | LayerParams::Tanh(g) => std::slice::from_mut(g),
            LayerParams::Lstm(p) => &mut p.gates[..],
            LayerParams::Gru(p) => &mut p.gates[..],
        }
    }

    /// Width of the input projection
    pub fn input_width(&self) -> usize {
        self.gates()[0].input_kernel.ncols()
    }

    pub fn hidden_size(&self) -> usize {
        self.gates()[0].recurrent_kernel.nrows()
    }

    /// Checks every gate against the expected dimensions.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If any tensor of any gate has the wrong shape
    pub fn validate(&self, input_width: usize, hidden_size: usize) -> Result<(), RnnError> {
        let mode = self.mode();
        for (slot, gate) in self.gates().iter().enumerate() {
            gate.validate(input_width, hidden_size, gate_label(mode, slot))?;
        }
        Ok(())
    }

    /// Matrix and bias stored under cuDNN linear-layer index `linear_layer`.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If the index is past the variant's linear-layer count
    pub fn linear_layer(&self, linear_layer: usize) -> Result<(&Array2<A>, &Array1<A>), RnnError> {
        let (side, slot) = linear_layer_slot(self.mode(), linear_layer)?;
        let gate = &self.gates()[slot];
        Ok((gate.kernel(side), gate.bias(side)))
    }

    pub fn linear_layer_mut(
        &mut self,
        linear_layer: usize,
    ) -> Result<(&mut Array2<A>, &mut Array1<A>), RnnError> {
        let (side, slot) = linear_layer_slot(self.mode(), linear_layer)?;
        let gate = &mut self.gates_mut()[slot];
        match side {
            GateSide::Input => Ok((&mut gate.input_kernel, &mut gate.input_bias)),
            GateSide::Recurrent => Ok((&mut gate.recurrent_kernel, &mut gate.recurrent_bias)),
        }
    }

    /// Total number of scalar parameters
    pub fn param_count(&self) -> usize {
        self.gates()
            .iter()
            .map(|g| {
                g.input_kernel.len() + g.recurrent_kernel.len() + g.input_bias.len() + g.recurrent_bias.len()
            })
            .sum()
    }
}

/// Names of the matrix and bias stored under linear layer `linear_layer` of `mode`
///
/// # Errors
///
/// - `RnnError::InvalidShape` - If the index is past the variant's linear-layer count
pub fn linear_layer_names(mode: RnnMode, linear_layer: usize) -> Result<(ParamName, ParamName), RnnError> {
    let (side, slot) = linear_layer_slot(mode, linear_layer)?;
    let gate = gate_label(mode, slot);
    Ok((
        ParamName {
            side,
            gate,
            bias: false,
        },
        ParamName {
            side,
            gate,
            bias: true,
        },
    ))
}

/// Maps a cuDNN linear-layer index to the projection side and the gate slot.
///
/// Input-side projections come first for every gate, then the recurrent ones.
fn linear_layer_slot(mode: RnnMode, linear_layer: usize) -> Result<(GateSide, usize), RnnError> {
    let count = mode.linear_layers();
    if linear_layer >= count {
        return Err(RnnError::InvalidShape(format!(
            "linear layer {} out of range for {} ({} linear layers)",
            linear_layer, mode, count
        )));
    }
    let per_side = count / 2;
    if linear_layer < per_side {
        Ok((GateSide::Input, linear_layer))
    } else {
        Ok((GateSide::Recurrent, linear_layer - per_side))
    }
}

fn gate_label(mode: RnnMode, slot: usize) -> char {
    match mode {
        RnnMode::Relu | RnnMode::Tanh => 'i',
        RnnMode::Lstm => LstmGate::ALL[slot].label(),
        RnnMode::Gru => GruGate::ALL[slot].label(),
    }
}
