use ndarray::{Array1, ArrayView1, ArrayView3};
use rnn_oracle::engine::ReferenceReserve;
use rnn_oracle::prelude::*;
use rnn_oracle::verification::{Comparison, max_abs_diff};
use rstest::rstest;

/// Wraps the reference engine and damages one of its results
#[derive(Default)]
struct Damage {
    output: bool,
    weight_grad: Option<usize>,
    cell_results: bool,
}

struct CorruptedEngine {
    inner: ReferenceEngine<f64>,
    damage: Damage,
}

impl CorruptedEngine {
    fn new(config: &RnnConfig, damage: Damage) -> Self {
        Self {
            inner: ReferenceEngine::new(config).unwrap(),
            damage,
        }
    }
}

impl RnnEngine for CorruptedEngine {
    type Elem = f64;
    type Reserve = ReferenceReserve<f64>;
    type Layout = PackedLayout;

    fn config(&self) -> &RnnConfig {
        self.inner.config()
    }

    fn layout(&self) -> &PackedLayout {
        self.inner.layout()
    }

    fn forward(
        &self,
        input: ArrayView3<f64>,
        weights: ArrayView1<f64>,
        initial_hidden: Option<ArrayView3<f64>>,
        initial_cell: Option<ArrayView3<f64>>,
    ) -> Result<EngineForward<f64, Self::Reserve>, RnnError> {
        let mut result = self.inner.forward(input, weights, initial_hidden, initial_cell)?;
        if self.damage.output {
            result.output[[0, 0, 0]] += 0.1;
        }
        if self.damage.cell_results {
            result.final_cell = None;
        }
        Ok(result)
    }

    fn backward_data(
        &self,
        output_grad: ArrayView3<f64>,
        output: ArrayView3<f64>,
        weights: ArrayView1<f64>,
        reserve: &mut Self::Reserve,
        initial_hidden: Option<ArrayView3<f64>>,
        initial_cell: Option<ArrayView3<f64>>,
    ) -> Result<DataGradients<f64>, RnnError> {
        let mut grads = self
            .inner
            .backward_data(output_grad, output, weights, reserve, initial_hidden, initial_cell)?;
        if self.damage.cell_results {
            grads.initial_cell = None;
        }
        Ok(grads)
    }

    fn backward_params(
        &self,
        input: ArrayView3<f64>,
        output: ArrayView3<f64>,
        reserve: &Self::Reserve,
        initial_hidden: Option<ArrayView3<f64>>,
    ) -> Result<Array1<f64>, RnnError> {
        let mut grad = self.inner.backward_params(input, output, reserve, initial_hidden)?;
        if let Some(index) = self.damage.weight_grad {
            grad[index] += 1.0;
        }
        Ok(grad)
    }
}

/// Stores every bias of a pseudo-layer before its matrices
struct BiasFirstLayout {
    packed: PackedLayout,
}

impl WeightLayout for BiasFirstLayout {
    fn config(&self) -> &RnnConfig {
        self.packed.config()
    }

    fn param_count(&self) -> usize {
        self.packed.param_count()
    }

    fn slot(&self, pseudo_layer: usize, linear_layer: usize) -> Result<ParamSlot, RnnError> {
        let slot = self.packed.slot(pseudo_layer, linear_layer)?;
        let base = self.packed.slot(pseudo_layer, 0)?.matrix_offset;
        let biases_len = self.config().mode().linear_layers() * slot.bias_len;
        Ok(ParamSlot {
            matrix_offset: slot.matrix_offset + biases_len,
            matrix_shape: slot.matrix_shape,
            bias_offset: base + linear_layer * slot.bias_len,
            bias_len: slot.bias_len,
        })
    }
}

/// Reference engine that exchanges flat buffers in the bias-first layout
struct BiasFirstEngine {
    inner: ReferenceEngine<f64>,
    layout: BiasFirstLayout,
}

impl BiasFirstEngine {
    fn new(config: &RnnConfig) -> Self {
        Self {
            inner: ReferenceEngine::new(config).unwrap(),
            layout: BiasFirstLayout {
                packed: PackedLayout::new(config).unwrap(),
            },
        }
    }

    fn to_packed(&self, weights: ArrayView1<f64>) -> Result<Array1<f64>, RnnError> {
        self.inner.layout().pack(&self.layout.unpack(weights)?)
    }
}

impl RnnEngine for BiasFirstEngine {
    type Elem = f64;
    type Reserve = ReferenceReserve<f64>;
    type Layout = BiasFirstLayout;

    fn config(&self) -> &RnnConfig {
        self.inner.config()
    }

    fn layout(&self) -> &BiasFirstLayout {
        &self.layout
    }

    fn forward(
        &self,
        input: ArrayView3<f64>,
        weights: ArrayView1<f64>,
        initial_hidden: Option<ArrayView3<f64>>,
        initial_cell: Option<ArrayView3<f64>>,
    ) -> Result<EngineForward<f64, Self::Reserve>, RnnError> {
        let packed = self.to_packed(weights)?;
        self.inner.forward(input, packed.view(), initial_hidden, initial_cell)
    }

    fn backward_data(
        &self,
        output_grad: ArrayView3<f64>,
        output: ArrayView3<f64>,
        weights: ArrayView1<f64>,
        reserve: &mut Self::Reserve,
        initial_hidden: Option<ArrayView3<f64>>,
        initial_cell: Option<ArrayView3<f64>>,
    ) -> Result<DataGradients<f64>, RnnError> {
        let packed = self.to_packed(weights)?;
        self.inner
            .backward_data(output_grad, output, packed.view(), reserve, initial_hidden, initial_cell)
    }

    fn backward_params(
        &self,
        input: ArrayView3<f64>,
        output: ArrayView3<f64>,
        reserve: &Self::Reserve,
        initial_hidden: Option<ArrayView3<f64>>,
    ) -> Result<Array1<f64>, RnnError> {
        let grad = self.inner.backward_params(input, output, reserve, initial_hidden)?;
        self.layout.pack(&self.inner.layout().unpack(grad.view())?)
    }
}

#[rstest]
#[case(RnnMode::Relu, DirectionMode::Unidirectional, 1)]
#[case(RnnMode::Tanh, DirectionMode::Bidirectional, 2)]
#[case(RnnMode::Lstm, DirectionMode::Unidirectional, 2)]
#[case(RnnMode::Lstm, DirectionMode::Bidirectional, 1)]
#[case(RnnMode::Gru, DirectionMode::Bidirectional, 2)]
fn test_reference_engine_passes(#[case] mode: RnnMode, #[case] direction: DirectionMode, #[case] layers: usize) {
    let config = RnnConfig::new(3, 4, mode)
        .unwrap()
        .with_direction(direction)
        .with_layers(layers)
        .with_dtype(DType::Float64);
    let engine = ReferenceEngine::<f64>::new(&config).unwrap();

    let report = Verifier::new(5, 2, 17).verify(&engine).unwrap();
    assert!(report.passed(), "{}", report);
    assert!(report.get("output").is_some());
    assert!(report.get("input gradient").is_some());
    assert_eq!(report.get("final cell").is_some(), mode.has_cell());
    assert_eq!(report.get("initial cell gradient").is_some(), mode.has_cell());
}

#[test]
fn test_reference_engine_passes_in_single_precision() {
    let config = RnnConfig::new(3, 4, RnnMode::Lstm).unwrap();
    let engine = ReferenceEngine::<f32>::new(&config).unwrap();

    let report = Verifier::new(4, 3, 1).verify(&engine).unwrap();
    assert!(report.passed(), "{}", report);
}

#[test]
fn test_every_weight_gradient_is_compared() {
    let config = RnnConfig::new(3, 2, RnnMode::Gru)
        .unwrap()
        .with_layers(2)
        .with_direction(DirectionMode::Bidirectional);
    let engine = ReferenceEngine::<f64>::new(&config).unwrap();

    let report = Verifier::new(3, 2, 4).verify(&engine).unwrap();
    // 4 pseudo-layers x 6 linear layers x (matrix + bias)
    let weight_comparisons = report
        .comparisons
        .iter()
        .filter(|c| c.name.starts_with('d'))
        .count();
    assert_eq!(weight_comparisons, 4 * 6 * 2);
    assert!(report.get("dbrh (layer 1, direction 1)").is_some());
}

#[test]
fn test_corrupted_output_fails_with_its_name() {
    let config = RnnConfig::new(3, 4, RnnMode::Tanh).unwrap();
    let engine = CorruptedEngine::new(
        &config,
        Damage {
            output: true,
            ..Damage::default()
        },
    );

    let report = Verifier::new(4, 2, 3).verify(&engine).unwrap();
    assert!(!report.passed());
    let failed: Vec<&str> = report.failures().map(|c| c.name.as_str()).collect();
    assert_eq!(failed, ["output"]);
    assert!((report.get("output").unwrap().max_abs_diff - 0.1).abs() < 1e-9);
}

#[test]
fn test_corrupted_weight_gradient_names_the_tensor() {
    let config = RnnConfig::new(3, 4, RnnMode::Lstm).unwrap();
    // First element of the recurrent-side forget gate bias
    let index = PackedLayout::new(&config).unwrap().slot(0, 5).unwrap().bias_offset;
    let engine = CorruptedEngine::new(
        &config,
        Damage {
            weight_grad: Some(index),
            ..Damage::default()
        },
    );

    let report = Verifier::new(4, 2, 3).verify(&engine).unwrap();
    let failed: Vec<&str> = report.failures().map(|c| c.name.as_str()).collect();
    assert_eq!(failed, ["dbrf (layer 0, direction 0)"]);
}

#[test]
fn test_missing_cell_results_fail() {
    let config = RnnConfig::new(3, 4, RnnMode::Lstm).unwrap();
    let engine = CorruptedEngine::new(
        &config,
        Damage {
            cell_results: true,
            ..Damage::default()
        },
    );

    let report = Verifier::new(4, 2, 1).verify(&engine).unwrap();
    assert!(!report.passed());
    let failed: Vec<&str> = report.failures().map(|c| c.name.as_str()).collect();
    assert_eq!(failed, ["final cell", "initial cell gradient"]);
    assert_eq!(report.get("final cell").unwrap().max_abs_diff, f64::INFINITY);
}

#[rstest]
#[case(RnnMode::Tanh, DirectionMode::Unidirectional, 1)]
#[case(RnnMode::Lstm, DirectionMode::Bidirectional, 2)]
#[case(RnnMode::Gru, DirectionMode::Bidirectional, 1)]
fn test_engine_layout_is_used(#[case] mode: RnnMode, #[case] direction: DirectionMode, #[case] layers: usize) {
    let config = RnnConfig::new(3, 2, mode)
        .unwrap()
        .with_direction(direction)
        .with_layers(layers)
        .with_dtype(DType::Float64);
    let engine = BiasFirstEngine::new(&config);

    let mut rng = seeded_rng(2);
    let params: Vec<LayerParams<f64>> = random_stack_params(&config, &mut rng).unwrap();
    assert_ne!(
        engine.layout().pack(&params).unwrap(),
        engine.inner.layout().pack(&params).unwrap()
    );

    let report = Verifier::new(4, 2, 11).verify(&engine).unwrap();
    assert!(report.passed(), "{}", report);
}

#[test]
fn test_layout_for_another_configuration() {
    let config = RnnConfig::new(3, 2, RnnMode::Gru).unwrap();
    let mut engine = BiasFirstEngine::new(&config);
    engine.layout = BiasFirstLayout {
        packed: PackedLayout::new(&config.clone().with_layers(2)).unwrap(),
    };
    assert!(matches!(
        Verifier::new(4, 2, 0).verify(&engine),
        Err(RnnError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_verifier_setup_errors() {
    let config = RnnConfig::new(3, 4, RnnMode::Gru).unwrap().with_batch_size(2);
    let engine = ReferenceEngine::<f64>::new(&config).unwrap();

    assert!(matches!(
        Verifier::new(4, 3, 0).verify(&engine),
        Err(RnnError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        Verifier::new(0, 2, 0).verify(&engine),
        Err(RnnError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_dropout_between_layers_is_not_reproducible() {
    let config = RnnConfig::new(3, 4, RnnMode::Tanh)
        .unwrap()
        .with_layers(2)
        .with_dropout(0.2, 5);
    assert!(matches!(
        ReferenceEngine::<f64>::new(&config),
        Err(RnnError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_tolerance_per_dtype() {
    assert_eq!(Tolerance::for_dtype(DType::Float16).atol, 1e-2);
    assert_eq!(Tolerance::for_dtype(DType::Float32).atol, 1e-4);
    assert_eq!(Tolerance::for_dtype(DType::Float64).atol, 1e-9);
    assert_eq!(Tolerance::default().rtol, 1e-5);
}

#[test]
fn test_closeness_rules() {
    let tol = Tolerance { atol: 1e-4, rtol: 1e-5 };
    let expected = Array1::from(vec![1000.0f64, 0.0]);

    // atol + rtol * |b| = 1e-4 + 1e-2 for the first element
    assert!(all_close(&Array1::from(vec![1000.01f64, 0.0]), &expected, tol));
    assert!(!all_close(&Array1::from(vec![1000.02f64, 0.0]), &expected, tol));
    assert!(!all_close(&Array1::from(vec![f64::NAN, 0.0]), &expected, tol));
    assert!(!all_close(&Array1::from(vec![1000.0f64]), &expected, tol));

    assert_eq!(max_abs_diff(&Array1::from(vec![1.0f64]), &expected), f64::INFINITY);

    let infinite = Array1::from(vec![f64::INFINITY, f64::NEG_INFINITY]);
    assert!(all_close(&infinite, &infinite, tol));
    assert_eq!(max_abs_diff(&infinite, &infinite), 0.0);
    assert!(!all_close(&Array1::from(vec![f64::INFINITY, f64::INFINITY]), &infinite, tol));
    let c = Comparison::new("x", &expected, &expected, tol);
    assert!(c.passed);
    assert_eq!(c.max_abs_diff, 0.0);
}
