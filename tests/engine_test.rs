use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array3};
use rnn_oracle::prelude::*;

fn engine(mode: RnnMode) -> ReferenceEngine<f64> {
    let config = RnnConfig::new(2, 3, mode)
        .unwrap()
        .with_direction(DirectionMode::Bidirectional)
        .with_batch_size(4);
    ReferenceEngine::new(&config).unwrap()
}

#[test]
fn test_training_step_round_trip() {
    let engine = engine(RnnMode::Lstm);
    let config = engine.config().clone();
    let mut rng = seeded_rng(100);
    let params: Vec<LayerParams<f64>> = random_stack_params(&config, &mut rng).unwrap();
    let weights = engine.layout().pack(&params).unwrap();
    let x: Array3<f64> = random_sequence(3, 4, 2, &mut rng);
    let dy: Array3<f64> = random_sequence(3, 4, 6, &mut rng);

    let mut run = engine.forward(x.view(), weights.view(), None, None).unwrap();
    assert_eq!(run.output.dim(), (3, 4, 6));
    assert_eq!(run.final_hidden.dim(), (2, 4, 3));
    assert_eq!(run.final_cell.as_ref().unwrap().dim(), (2, 4, 3));

    let data = engine
        .backward_data(dy.view(), run.output.view(), weights.view(), &mut run.reserve, None, None)
        .unwrap();
    let weight_grad = engine
        .backward_params(x.view(), run.output.view(), &run.reserve, None)
        .unwrap();
    assert_eq!(weight_grad.len(), engine.layout().param_count());

    let expected = stack_forward(&config, x.view(), &params, None, None).unwrap();
    let expected_grads = stack_backward(&config, dy.view(), &params, &expected).unwrap();
    assert_abs_diff_eq!(run.output, expected.outputs, epsilon = 1e-12);
    assert_abs_diff_eq!(data.input, expected_grads.input, epsilon = 1e-12);
    assert_eq!(engine.layout().unpack(weight_grad.view()).unwrap(), expected_grads.params);
}

#[test]
fn test_backward_params_needs_backward_data() {
    let engine = engine(RnnMode::Gru);
    let weights = Array1::<f64>::zeros(engine.layout().param_count());
    let x = Array3::<f64>::ones((2, 1, 2));

    let run = engine.forward(x.view(), weights.view(), None, None).unwrap();
    assert!(matches!(
        engine.backward_params(x.view(), run.output.view(), &run.reserve, None),
        Err(RnnError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_batch_above_the_configured_maximum() {
    let engine = engine(RnnMode::Tanh);
    let weights = Array1::<f64>::zeros(engine.layout().param_count());
    let x = Array3::<f64>::ones((2, 5, 2));
    assert!(matches!(
        engine.forward(x.view(), weights.view(), None, None),
        Err(RnnError::InvalidShape(_))
    ));
}

#[test]
fn test_wrong_weight_length() {
    let engine = engine(RnnMode::Relu);
    let weights = Array1::<f64>::zeros(engine.layout().param_count() + 1);
    let x = Array3::<f64>::ones((2, 1, 2));
    assert!(matches!(
        engine.forward(x.view(), weights.view(), None, None),
        Err(RnnError::InvalidShape(_))
    ));
}

#[test]
fn test_backward_states_must_match_forward() {
    let engine = engine(RnnMode::Lstm);
    let config = engine.config().clone();
    let mut rng = seeded_rng(101);
    let params: Vec<LayerParams<f64>> = random_stack_params(&config, &mut rng).unwrap();
    let weights = engine.layout().pack(&params).unwrap();
    let x: Array3<f64> = random_sequence(3, 2, 2, &mut rng);
    let h0: Array3<f64> = random_sequence(2, 2, 3, &mut rng);
    let c0: Array3<f64> = random_sequence(2, 2, 3, &mut rng);
    let dy = Array3::<f64>::ones((3, 2, 6));

    let mut run = engine
        .forward(x.view(), weights.view(), Some(h0.view()), Some(c0.view()))
        .unwrap();

    let mut other_h0 = h0.clone();
    other_h0[[1, 0, 2]] += 0.5;
    assert!(matches!(
        engine.backward_data(
            dy.view(),
            run.output.view(),
            weights.view(),
            &mut run.reserve,
            Some(other_h0.view()),
            Some(c0.view())
        ),
        Err(RnnError::InvalidConfiguration(_))
    ));
    // Absent means zeros, which is not what forward started from
    assert!(matches!(
        engine.backward_data(dy.view(), run.output.view(), weights.view(), &mut run.reserve, Some(h0.view()), None),
        Err(RnnError::InvalidConfiguration(_))
    ));
    let short_c0 = Array3::<f64>::zeros((1, 2, 3));
    assert!(matches!(
        engine.backward_data(
            dy.view(),
            run.output.view(),
            weights.view(),
            &mut run.reserve,
            Some(h0.view()),
            Some(short_c0.view())
        ),
        Err(RnnError::InvalidShape(_))
    ));

    let data = engine
        .backward_data(
            dy.view(),
            run.output.view(),
            weights.view(),
            &mut run.reserve,
            Some(h0.view()),
            Some(c0.view()),
        )
        .unwrap();
    assert!(data.initial_cell.is_some());

    assert!(matches!(
        engine.backward_params(x.view(), run.output.view(), &run.reserve, Some(other_h0.view())),
        Err(RnnError::InvalidConfiguration(_))
    ));
    assert!(
        engine
            .backward_params(x.view(), run.output.view(), &run.reserve, Some(h0.view()))
            .is_ok()
    );
}

#[test]
fn test_cell_state_rejected_without_cell() {
    let engine = engine(RnnMode::Gru);
    let weights = Array1::<f64>::zeros(engine.layout().param_count());
    let x = Array3::<f64>::ones((2, 1, 2));
    let dy = Array3::<f64>::ones((2, 1, 6));
    let c0 = Array3::<f64>::zeros((2, 1, 3));

    let mut run = engine.forward(x.view(), weights.view(), None, None).unwrap();
    assert!(matches!(
        engine.backward_data(dy.view(), run.output.view(), weights.view(), &mut run.reserve, None, Some(c0.view())),
        Err(RnnError::InvalidShape(_))
    ));
}
