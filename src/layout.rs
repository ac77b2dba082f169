use crate::RnnError;
use crate::config::RnnConfig;
use crate::params::LayerParams;
use ndarray::{Array1, Array2, ArrayView1, NdFloat, s};
use std::ops::Range;

/// Position of one linear layer (a projection matrix and its bias) inside a flat weight buffer.
///
/// # Fields
///
/// - `matrix_offset` - Index of the first matrix element
/// - `matrix_shape` - Shape of the matrix, (hidden_size, input_width) or (hidden_size, hidden_size), stored row-major
/// - `bias_offset` - Index of the first bias element
/// - `bias_len` - Length of the bias (hidden_size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSlot {
    pub matrix_offset: usize,
    pub matrix_shape: (usize, usize),
    pub bias_offset: usize,
    pub bias_len: usize,
}

impl ParamSlot {
    pub fn matrix_len(&self) -> usize {
        self.matrix_shape.0 * self.matrix_shape.1
    }

    pub fn matrix_range(&self) -> Range<usize> {
        self.matrix_offset..self.matrix_offset + self.matrix_len()
    }

    pub fn bias_range(&self) -> Range<usize> {
        self.bias_offset..self.bias_offset + self.bias_len
    }
}

/// Maps a flat weight buffer to typed per-gate parameters and back.
///
/// An implementation only has to place every linear layer with [`WeightLayout::slot`];
/// unpacking and packing are derived from it. Linear layers are indexed the cuDNN way:
///
/// - ReLU / Tanh: `0` input side, `1` recurrent side
/// - LSTM: `0..=3` input side of `i`, `f`, `c`, `o`, then `4..=7` recurrent side
/// - GRU: `0..=2` input side of `r`, `i`, `h`, then `3..=5` recurrent side
///
/// The same layout applies to a flat weight-gradient buffer.
pub trait WeightLayout {
    /// The configuration the layout was built for
    fn config(&self) -> &RnnConfig;

    /// Total number of scalars in the flat buffer
    fn param_count(&self) -> usize;

    /// Locates linear layer `linear_layer` of pseudo-layer `pseudo_layer`.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If either index is out of range
    fn slot(&self, pseudo_layer: usize, linear_layer: usize) -> Result<ParamSlot, RnnError>;

    /// Splits a flat buffer into one parameter set per pseudo-layer.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If `flat` does not hold exactly [`WeightLayout::param_count`] elements
    fn unpack<A: NdFloat>(&self, flat: ArrayView1<A>) -> Result<Vec<LayerParams<A>>, RnnError> {
        let config = self.config();
        if flat.len() != self.param_count() {
            return Err(RnnError::InvalidShape(format!(
                "flat weight buffer has {} elements, layout needs {}",
                flat.len(),
                self.param_count()
            )));
        }

        (0..config.pseudo_layers())
            .map(|p| {
                let mut params = LayerParams::zeros(
                    config.mode(),
                    config.pseudo_layer_input_size(p),
                    config.hidden_size(),
                );
                for lin in 0..config.mode().linear_layers() {
                    let slot = self.slot(p, lin)?;
                    let (matrix, bias) = params.linear_layer_mut(lin)?;
                    let values = Array2::from_shape_vec(slot.matrix_shape, flat.slice(s![slot.matrix_range()]).to_vec())
                        .map_err(|e| RnnError::InvalidShape(format!("linear layer {} of pseudo-layer {}: {}", lin, p, e)))?;
                    matrix.assign(&values);
                    bias.assign(&flat.slice(s![slot.bias_range()]));
                }
                Ok(params)
            })
            .collect()
    }

    /// Writes one parameter set per pseudo-layer into a new flat buffer.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidShape` - If the number of parameter sets or any tensor shape does not match
    /// - `RnnError::UnsupportedVariant` - If a parameter set is not of the configured variant
    fn pack<A: NdFloat>(&self, params: &[LayerParams<A>]) -> Result<Array1<A>, RnnError> {
        let config = self.config();
        if params.len() != config.pseudo_layers() {
            return Err(RnnError::InvalidShape(format!(
                "expected {} parameter sets, got {}",
                config.pseudo_layers(),
                params.len()
            )));
        }

        let mut flat = Array1::zeros(self.param_count());
        for (p, layer_params) in params.iter().enumerate() {
            if layer_params.mode() != config.mode() {
                return Err(RnnError::UnsupportedVariant(format!(
                    "pseudo-layer {} holds {} parameters, layout is {}",
                    p,
                    layer_params.mode(),
                    config.mode()
                )));
            }
            layer_params.validate(config.pseudo_layer_input_size(p), config.hidden_size())?;

            for lin in 0..config.mode().linear_layers() {
                let slot = self.slot(p, lin)?;
                let (matrix, bias) = layer_params.linear_layer(lin)?;
                flat.slice_mut(s![slot.matrix_range()])
                    .iter_mut()
                    .zip(matrix.iter())
                    .for_each(|(dst, &src)| *dst = src);
                flat.slice_mut(s![slot.bias_range()]).assign(bias);
            }
        }
        Ok(flat)
    }
}

/// Host-side layout: pseudo-layers follow each other; inside one pseudo-layer all
/// matrices come first in linear-layer order, then all biases in the same order.
///
/// # Example
/// ```rust
/// use rnn_oracle::config::{RnnConfig, RnnMode};
/// use rnn_oracle::layout::{PackedLayout, WeightLayout};
///
/// let config = RnnConfig::new(3, 2, RnnMode::Gru).unwrap();
/// let layout = PackedLayout::new(&config).unwrap();
///
/// // 3 gates * (2x3 + 2x2) matrices + 6 biases of 2
/// assert_eq!(layout.param_count(), 3 * (6 + 4) + 6 * 2);
/// assert_eq!(layout.slot(0, 3).unwrap().matrix_offset, 3 * 6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PackedLayout {
    config: RnnConfig,
    /// Start of every pseudo-layer, plus the total length as the last entry
    offsets: Vec<usize>,
}

impl PackedLayout {
    /// Builds the layout of `config`.
    ///
    /// # Errors
    ///
    /// - `RnnError::InvalidConfiguration` - If the configuration is invalid
    pub fn new(config: &RnnConfig) -> Result<Self, RnnError> {
        config.validate()?;
        let mut offsets = Vec::with_capacity(config.pseudo_layers() + 1);
        let mut offset = 0;
        offsets.push(offset);
        for p in 0..config.pseudo_layers() {
            offset += pseudo_layer_len(config, p);
            offsets.push(offset);
        }
        Ok(Self {
            config: config.clone(),
            offsets,
        })
    }
}

impl WeightLayout for PackedLayout {
    fn config(&self) -> &RnnConfig {
        &self.config
    }

    fn param_count(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    fn slot(&self, pseudo_layer: usize, linear_layer: usize) -> Result<ParamSlot, RnnError> {
        let config = &self.config;
        let linear_layers = config.mode().linear_layers();
        if pseudo_layer >= config.pseudo_layers() {
            return Err(RnnError::InvalidShape(format!(
                "pseudo-layer {} out of range ({} pseudo-layers)",
                pseudo_layer,
                config.pseudo_layers()
            )));
        }
        if linear_layer >= linear_layers {
            return Err(RnnError::InvalidShape(format!(
                "linear layer {} out of range for {} ({} linear layers)",
                linear_layer,
                config.mode(),
                linear_layers
            )));
        }

        let h = config.hidden_size();
        let input_width = config.pseudo_layer_input_size(pseudo_layer);
        let per_side = linear_layers / 2;
        let matrix_shape = |lin: usize| if lin < per_side { (h, input_width) } else { (h, h) };

        let base = self.offsets[pseudo_layer];
        let matrix_offset = base
            + (0..linear_layer)
                .map(|lin| {
                    let (rows, cols) = matrix_shape(lin);
                    rows * cols
                })
                .sum::<usize>();
        let matrices_len = per_side * h * (input_width + h);

        Ok(ParamSlot {
            matrix_offset,
            matrix_shape: matrix_shape(linear_layer),
            bias_offset: base + matrices_len + linear_layer * h,
            bias_len: h,
        })
    }
}

/// Number of scalars owned by pseudo-layer `p`
fn pseudo_layer_len(config: &RnnConfig, p: usize) -> usize {
    let h = config.hidden_size();
    let linear_layers = config.mode().linear_layers();
    let per_side = linear_layers / 2;
    per_side * h * (config.pseudo_layer_input_size(p) + h) + linear_layers * h
}
