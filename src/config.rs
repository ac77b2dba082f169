use crate::RnnError;

/// Recurrence variant executed by a layer.
///
/// The discriminants follow the cuDNN `cudnnRNNMode_t` codes so that a mode read
/// back from an engine can be mapped with [`RnnMode::from_code`].
///
/// # Variants
///
/// - `Relu` - Plain recurrence with `max(x, 0)` activation
/// - `Tanh` - Plain recurrence with `tanh` activation
/// - `Lstm` - Long short-term memory with input, forget, cell and output gates
/// - `Gru` - Gated recurrent unit with reset, update and candidate gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RnnMode {
    Relu,
    Tanh,
    Lstm,
    Gru,
}

impl RnnMode {
    /// Maps a cuDNN mode code (0..=3) to a variant.
    ///
    /// # Errors
    ///
    /// - `RnnError::UnsupportedVariant` - If the code is not one of the four known modes
    pub fn from_code(code: i32) -> Result<Self, RnnError> {
        match code {
            0 => Ok(RnnMode::Relu),
            1 => Ok(RnnMode::Tanh),
            2 => Ok(RnnMode::Lstm),
            3 => Ok(RnnMode::Gru),
            other => Err(RnnError::UnsupportedVariant(format!(
                "mode code {} is not one of relu(0), tanh(1), lstm(2), gru(3)",
                other
            ))),
        }
    }

    /// Returns the cuDNN mode code of this variant
    pub fn code(self) -> i32 {
        match self {
            RnnMode::Relu => 0,
            RnnMode::Tanh => 1,
            RnnMode::Lstm => 2,
            RnnMode::Gru => 3,
        }
    }

    /// Number of `hidden_size`-wide blocks in the per-step gate buffer
    pub fn gate_blocks(self) -> usize {
        match self {
            RnnMode::Relu | RnnMode::Tanh => 1,
            RnnMode::Lstm | RnnMode::Gru => 4,
        }
    }

    /// Number of linear layers (matrix + bias pairs) per pseudo-layer in the flat weight buffer
    pub fn linear_layers(self) -> usize {
        match self {
            RnnMode::Relu | RnnMode::Tanh => 2,
            RnnMode::Lstm => 8,
            RnnMode::Gru => 6,
        }
    }

    /// Whether the variant carries a cell state next to the hidden state
    pub fn has_cell(self) -> bool {
        self == RnnMode::Lstm
    }
}

impl std::fmt::Display for RnnMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RnnMode::Relu => "relu",
            RnnMode::Tanh => "tanh",
            RnnMode::Lstm => "lstm",
            RnnMode::Gru => "gru",
        };
        write!(f, "{}", name)
    }
}

/// Whether a layer runs over time in one direction or in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectionMode {
    Unidirectional,
    Bidirectional,
}

impl DirectionMode {
    /// Maps a cuDNN direction code (0 = unidirectional, 1 = bidirectional)
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidConfiguration` - If the code is neither 0 nor 1
    pub fn from_code(code: i32) -> Result<Self, RnnError> {
        match code {
            0 => Ok(DirectionMode::Unidirectional),
            1 => Ok(DirectionMode::Bidirectional),
            other => Err(RnnError::InvalidConfiguration(format!(
                "direction code {} is not one of unidirectional(0), bidirectional(1)",
                other
            ))),
        }
    }

    /// Number of independent directions per layer (1 or 2)
    pub fn count(self) -> usize {
        match self {
            DirectionMode::Unidirectional => 1,
            DirectionMode::Bidirectional => 2,
        }
    }
}

/// Kernel selection hint forwarded to the accelerated engine.
///
/// The oracle computes the same math regardless of the algorithm; it only travels
/// with the configuration so that engines receive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RnnAlgo {
    #[default]
    Standard,
    PersistStatic,
    PersistDynamic,
}

impl RnnAlgo {
    /// Maps a cuDNN algorithm code (0..=2)
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidConfiguration` - If the code is unknown
    pub fn from_code(code: i32) -> Result<Self, RnnError> {
        match code {
            0 => Ok(RnnAlgo::Standard),
            1 => Ok(RnnAlgo::PersistStatic),
            2 => Ok(RnnAlgo::PersistDynamic),
            other => Err(RnnError::InvalidConfiguration(format!(
                "algorithm code {} is unknown",
                other
            ))),
        }
    }
}

/// Floating point type an engine computes in. Drives the comparison tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DType {
    Float16,
    #[default]
    Float32,
    Float64,
}

/// Configuration shared by an accelerated engine, its weight layout and the oracle.
///
/// Built once with [`RnnConfig::new`] and refined with the consuming `with_*` setters.
/// Every consumer calls [`RnnConfig::validate`] before using it, so an invalid
/// combination produced by the setters is still rejected before any computation.
///
/// # Fields
///
/// - `input_size` - Feature width of the external input sequence
/// - `hidden_size` - Width of the hidden (and cell) state
/// - `layers` - Number of stacked layers
/// - `mode` - Recurrence variant
/// - `direction` - Uni- or bidirectional
/// - `algo` - Kernel selection hint for the engine
/// - `dtype` - Element type the engine computes in
/// - `dropout` - Dropout probability between stacked layers, in `[0, 1)`
/// - `seed` - Seed for the engine's dropout state
/// - `batch_size` - Maximum batch size the engine plans for (0 = unbounded)
///
/// # Example
/// ```rust
/// use rnn_oracle::config::{DirectionMode, RnnConfig, RnnMode};
///
/// let config = RnnConfig::new(4, 3, RnnMode::Tanh)
///     .unwrap()
///     .with_direction(DirectionMode::Bidirectional)
///     .with_layers(2);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.pseudo_layers(), 4);
/// assert_eq!(config.layer_input_size(1), 6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RnnConfig {
    input_size: usize,
    hidden_size: usize,
    layers: usize,
    mode: RnnMode,
    direction: DirectionMode,
    algo: RnnAlgo,
    dtype: DType,
    dropout: f32,
    seed: u64,
    batch_size: usize,
}

impl RnnConfig {
    /// Creates a single-layer unidirectional configuration.
    ///
    /// # Parameters
    ///
    /// - `input_size` - Feature width of the input sequence
    /// - `hidden_size` - Width of the hidden state
    /// - `mode` - Recurrence variant
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidConfiguration` - If `input_size` or `hidden_size` is 0
    pub fn new(input_size: usize, hidden_size: usize, mode: RnnMode) -> Result<Self, RnnError> {
        let config = Self {
            input_size,
            hidden_size,
            layers: 1,
            mode,
            direction: DirectionMode::Unidirectional,
            algo: RnnAlgo::default(),
            dtype: DType::default(),
            dropout: 0.0,
            seed: 0,
            batch_size: 0,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_layers(mut self, layers: usize) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_direction(mut self, direction: DirectionMode) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_algo(mut self, algo: RnnAlgo) -> Self {
        self.algo = algo;
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_dropout(mut self, dropout: f32, seed: u64) -> Self {
        self.dropout = dropout;
        self.seed = seed;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidConfiguration` - If a size or the layer count is 0, or dropout is outside `[0, 1)`
    pub fn validate(&self) -> Result<(), RnnError> {
        if self.input_size == 0 {
            return Err(RnnError::InvalidConfiguration(
                "input_size must be greater than 0".to_string(),
            ));
        }
        if self.hidden_size == 0 {
            return Err(RnnError::InvalidConfiguration(
                "hidden_size must be greater than 0".to_string(),
            ));
        }
        if self.layers == 0 {
            return Err(RnnError::InvalidConfiguration(
                "layers must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(RnnError::InvalidConfiguration(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn layers(&self) -> usize {
        self.layers
    }

    pub fn mode(&self) -> RnnMode {
        self.mode
    }

    pub fn direction(&self) -> DirectionMode {
        self.direction
    }

    pub fn algo(&self) -> RnnAlgo {
        self.algo
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dropout(&self) -> f32 {
        self.dropout
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of directions per layer
    pub fn directions(&self) -> usize {
        self.direction.count()
    }

    /// Number of (layer, direction) pairs, i.e. independent parameter sets
    pub fn pseudo_layers(&self) -> usize {
        self.layers * self.directions()
    }

    /// Width of the output sequence (hidden size times directions)
    pub fn output_size(&self) -> usize {
        self.hidden_size * self.directions()
    }

    /// Input width seen by stacked layer `layer`.
    ///
    /// Layer 0 reads the external input; every later layer reads the concatenated
    /// outputs of all directions of the layer below.
    pub fn layer_input_size(&self, layer: usize) -> usize {
        if layer == 0 {
            self.input_size
        } else {
            self.output_size()
        }
    }

    /// Input width of pseudo-layer `pseudo_layer` (indexed `layer * directions + direction`)
    pub fn pseudo_layer_input_size(&self, pseudo_layer: usize) -> usize {
        self.layer_input_size(pseudo_layer / self.directions())
    }
}
