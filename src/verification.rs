use crate::RnnError;
use crate::config::DType;
use crate::engine::RnnEngine;
use crate::init::{random_sequence, random_stack_params, seeded_rng};
use crate::layout::WeightLayout;
use crate::oracle::{stack_backward, stack_forward};
use crate::params::linear_layer_names;
use log::{info, warn};
use ndarray::{Array, ArrayBase, Data, Dimension, NdFloat, Zip};
use ndarray_rand::rand::distributions::uniform::SampleUniform;
use ndarray_rand::rand_distr::{Distribution, StandardNormal};
use num_traits::ToPrimitive;
use std::fmt;

/// Element-wise tolerance `|a - b| <= atol + rtol * |b|`, `b` being the oracle value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Tolerance {
    /// Tolerance for results computed in `dtype`: `atol` is 1e-2, 1e-4 and 1e-9 for
    /// half, single and double precision, `rtol` is 1e-5
    pub fn for_dtype(dtype: DType) -> Self {
        let atol = match dtype {
            DType::Float16 => 1e-2,
            DType::Float32 => 1e-4,
            DType::Float64 => 1e-9,
        };
        Self { atol, rtol: 1e-5 }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::for_dtype(DType::default())
    }
}

/// Returns `true` when both arrays have the same shape and every pair of elements
/// is within `tolerance`. Equal values, infinities included, are close; NaN is
/// never close to anything.
///
/// # Example
/// ```rust
/// use ndarray::array;
/// use rnn_oracle::verification::{Tolerance, all_close};
///
/// let tol = Tolerance { atol: 1e-4, rtol: 1e-5 };
/// assert!(all_close(&array![1.0, 2.0], &array![1.00005, 2.0], tol));
/// assert!(!all_close(&array![1.0, 2.0], &array![1.001, 2.0], tol));
/// ```
pub fn all_close<A, S1, S2, D>(actual: &ArrayBase<S1, D>, expected: &ArrayBase<S2, D>, tolerance: Tolerance) -> bool
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D: Dimension,
{
    if actual.shape() != expected.shape() {
        return false;
    }
    Zip::from(actual).and(expected).all(|&a, &b| {
        match (a.to_f64(), b.to_f64()) {
            (Some(a), Some(b)) => a == b || (a - b).abs() <= tolerance.atol + tolerance.rtol * b.abs(),
            _ => false,
        }
    })
}

/// Largest element-wise absolute difference, infinite on shape mismatch or NaN
pub fn max_abs_diff<A, S1, S2, D>(actual: &ArrayBase<S1, D>, expected: &ArrayBase<S2, D>) -> f64
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data<Elem = A>,
    D: Dimension,
{
    if actual.shape() != expected.shape() {
        return f64::INFINITY;
    }
    Zip::from(actual)
        .and(expected)
        .fold(0.0f64, |worst, &a, &b| {
            if a == b {
                return worst;
            }
            let diff = (a - b).abs().to_f64().unwrap_or(f64::INFINITY);
            if diff.is_nan() { f64::INFINITY } else { worst.max(diff) }
        })
}

/// Outcome of comparing one engine tensor against the oracle.
///
/// # Fields
///
/// - `name` - What was compared, e.g. `output` or `dwi (layer 0, direction 1)`
/// - `max_abs_diff` - Largest absolute difference
/// - `passed` - Whether every element was within tolerance
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub name: String,
    pub max_abs_diff: f64,
    pub passed: bool,
}

impl Comparison {
    pub fn new<A, S1, S2, D>(
        name: impl Into<String>,
        actual: &ArrayBase<S1, D>,
        expected: &ArrayBase<S2, D>,
        tolerance: Tolerance,
    ) -> Self
    where
        A: NdFloat,
        S1: Data<Elem = A>,
        S2: Data<Elem = A>,
        D: Dimension,
    {
        Self {
            name: name.into(),
            max_abs_diff: max_abs_diff(actual, expected),
            passed: all_close(actual, expected, tolerance),
        }
    }

    /// A failed comparison for a tensor the engine did not return
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_abs_diff: f64::INFINITY,
            passed: false,
        }
    }

    /// Compares an optional result; a tensor present on only one side fails
    fn optional<A, D>(
        name: &str,
        actual: Option<&Array<A, D>>,
        expected: Option<&Array<A, D>>,
        tolerance: Tolerance,
    ) -> Option<Self>
    where
        A: NdFloat,
        D: Dimension,
    {
        match (actual, expected) {
            (Some(actual), Some(expected)) => Some(Self::new(name, actual, expected, tolerance)),
            (None, None) => None,
            _ => Some(Self::missing(name)),
        }
    }
}

/// Every comparison of one verification run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VerificationReport {
    pub comparisons: Vec<Comparison>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.comparisons.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Comparison> {
        self.comparisons.iter().filter(|c| !c.passed)
    }

    /// Looks a comparison up by name
    pub fn get(&self, name: &str) -> Option<&Comparison> {
        self.comparisons.iter().find(|c| c.name == name)
    }

    fn push(&mut self, comparison: Comparison) {
        if !comparison.passed {
            warn!(
                "{} differs from the oracle (max abs diff {:e})",
                comparison.name, comparison.max_abs_diff
            );
        }
        self.comparisons.push(comparison);
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.comparisons {
            writeln!(
                f,
                "{:<40} {:>12.3e}  {}",
                c.name,
                c.max_abs_diff,
                if c.passed { "ok" } else { "FAILED" }
            )?;
        }
        let failed = self.failures().count();
        write!(f, "{} comparisons, {} failed", self.comparisons.len(), failed)
    }
}

/// Runs one seeded training step through an engine and the oracle and compares them.
///
/// Weights, inputs, initial states and the output gradient are drawn from a
/// generator seeded with `seed`, so a run is reproducible.
///
/// # Example
/// ```rust
/// use rnn_oracle::config::{DirectionMode, RnnConfig, RnnMode};
/// use rnn_oracle::engine::ReferenceEngine;
/// use rnn_oracle::verification::Verifier;
///
/// let config = RnnConfig::new(3, 4, RnnMode::Gru)
///     .unwrap()
///     .with_direction(DirectionMode::Bidirectional);
/// let engine = ReferenceEngine::<f64>::new(&config).unwrap();
///
/// let report = Verifier::new(5, 2, 42).verify(&engine).unwrap();
/// assert!(report.passed());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Verifier {
    seq_len: usize,
    batch_size: usize,
    seed: u64,
    tolerance: Option<Tolerance>,
}

impl Verifier {
    /// Creates a verifier; the tolerance defaults to the engine's dtype
    pub fn new(seq_len: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            seq_len,
            batch_size,
            seed,
            tolerance: None,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Verifies `engine` against the oracle.
    ///
    /// Compares the output, the final states, the input gradient, the initial
    /// state gradients and every matrix and bias of the weight gradient. Weights
    /// are packed and the weight gradient unpacked with the engine's own layout.
    /// A cell result the engine omits for LSTM is a failed comparison.
    ///
    /// # Returns
    ///
    /// - `Ok(VerificationReport)` - The comparisons; numeric disagreement shows up here, not as an error
    /// - `Err(RnnError)` - If the run itself could not be set up, or the engine or oracle rejected it
    pub fn verify<E>(&self, engine: &E) -> Result<VerificationReport, RnnError>
    where
        E: RnnEngine,
        E::Elem: SampleUniform,
        StandardNormal: Distribution<E::Elem>,
    {
        let config = engine.config().clone();
        config.validate()?;
        if self.seq_len == 0 || self.batch_size == 0 {
            return Err(RnnError::InvalidConfiguration(format!(
                "verification needs seq_len and batch_size > 0, got {} and {}",
                self.seq_len, self.batch_size
            )));
        }
        if config.batch_size() > 0 && self.batch_size > config.batch_size() {
            return Err(RnnError::InvalidConfiguration(format!(
                "batch_size {} exceeds the engine maximum {}",
                self.batch_size,
                config.batch_size()
            )));
        }
        let tolerance = self
            .tolerance
            .unwrap_or_else(|| Tolerance::for_dtype(config.dtype()));
        let layout = engine.layout();
        if layout.config() != &config {
            return Err(RnnError::InvalidConfiguration(
                "engine layout was built for a different configuration".to_string(),
            ));
        }

        let mut rng = seeded_rng(self.seed);
        let params = random_stack_params::<E::Elem, _>(&config, &mut rng)?;
        let weights = layout.pack(&params)?;
        let (t, b, h, p) = (self.seq_len, self.batch_size, config.hidden_size(), config.pseudo_layers());
        let inputs = random_sequence::<E::Elem, _>(t, b, config.input_size(), &mut rng);
        let h0 = random_sequence::<E::Elem, _>(p, b, h, &mut rng);
        let c0 = config
            .mode()
            .has_cell()
            .then(|| random_sequence::<E::Elem, _>(p, b, h, &mut rng));
        let output_grad = random_sequence::<E::Elem, _>(t, b, config.output_size(), &mut rng);

        let mut run = engine.forward(
            inputs.view(),
            weights.view(),
            Some(h0.view()),
            c0.as_ref().map(|c| c.view()),
        )?;
        let data = engine.backward_data(
            output_grad.view(),
            run.output.view(),
            weights.view(),
            &mut run.reserve,
            Some(h0.view()),
            c0.as_ref().map(|c| c.view()),
        )?;
        let weight_grad = engine.backward_params(inputs.view(), run.output.view(), &run.reserve, Some(h0.view()))?;

        let expected = stack_forward(
            &config,
            inputs.view(),
            &params,
            Some(h0.view()),
            c0.as_ref().map(|c| c.view()),
        )?;
        let expected_grads = stack_backward(&config, output_grad.view(), &params, &expected)?;

        let mut report = VerificationReport::default();
        report.push(Comparison::new("output", &run.output, &expected.outputs, tolerance));
        report.push(Comparison::new(
            "final hidden",
            &run.final_hidden,
            &expected.final_hidden,
            tolerance,
        ));
        if let Some(c) = Comparison::optional(
            "final cell",
            run.final_cell.as_ref(),
            expected.final_cell.as_ref(),
            tolerance,
        ) {
            report.push(c);
        }
        report.push(Comparison::new(
            "input gradient",
            &data.input,
            &expected_grads.input,
            tolerance,
        ));
        report.push(Comparison::new(
            "initial hidden gradient",
            &data.initial_hidden,
            &expected_grads.initial_hidden,
            tolerance,
        ));
        if let Some(c) = Comparison::optional(
            "initial cell gradient",
            data.initial_cell.as_ref(),
            expected_grads.initial_cell.as_ref(),
            tolerance,
        ) {
            report.push(c);
        }

        let actual_params = layout.unpack(weight_grad.view())?;
        let directions = config.directions();
        for (pseudo_layer, (actual, oracle)) in actual_params.iter().zip(&expected_grads.params).enumerate() {
            let (layer, direction) = (pseudo_layer / directions, pseudo_layer % directions);
            for lin in 0..config.mode().linear_layers() {
                let (matrix_name, bias_name) = linear_layer_names(config.mode(), lin)?;
                let (actual_matrix, actual_bias) = actual.linear_layer(lin)?;
                let (oracle_matrix, oracle_bias) = oracle.linear_layer(lin)?;
                report.push(Comparison::new(
                    format!("d{} (layer {}, direction {})", matrix_name, layer, direction),
                    actual_matrix,
                    oracle_matrix,
                    tolerance,
                ));
                report.push(Comparison::new(
                    format!("d{} (layer {}, direction {})", bias_name, layer, direction),
                    actual_bias,
                    oracle_bias,
                    tolerance,
                ));
            }
        }

        info!(
            "{} {} layer(s) x {} direction(s): {} of {} comparisons passed",
            config.mode(),
            config.layers(),
            directions,
            report.comparisons.len() - report.failures().count(),
            report.comparisons.len()
        );
        Ok(report)
    }
}
