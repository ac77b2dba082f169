use super::*;
use crate::params::linear_layer_names;

fn names(mode: RnnMode) -> Vec<String> {
    (0..mode.linear_layers())
        .map(|lin| linear_layer_names(mode, lin).unwrap().0.to_string())
        .collect()
}

#[test]
fn test_linear_layer_order_follows_cudnn() {
    assert_eq!(names(RnnMode::Tanh), ["wi", "ri"]);
    assert_eq!(names(RnnMode::Lstm), ["wi", "wf", "wc", "wo", "ri", "rf", "rc", "ro"]);
    assert_eq!(names(RnnMode::Gru), ["wr", "wi", "wh", "rr", "ri", "rh"]);

    let (_, bias) = linear_layer_names(RnnMode::Gru, 5).unwrap();
    assert_eq!(bias.to_string(), "brh");
}

#[test]
fn test_linear_layer_out_of_range() {
    assert!(matches!(
        linear_layer_names(RnnMode::Gru, 6),
        Err(RnnError::InvalidShape(_))
    ));
    let params = LayerParams::<f64>::zeros(RnnMode::Relu, 2, 2);
    assert!(matches!(params.linear_layer(2), Err(RnnError::InvalidShape(_))));
}

#[test]
fn test_linear_layer_addresses_the_right_tensor() {
    let mut lstm = LstmParams::<f64>::zeros(3, 2);
    lstm[LstmGate::Cell].input_kernel.fill(1.0);
    lstm[LstmGate::Forget].recurrent_bias.fill(2.0);
    let params = LayerParams::Lstm(lstm);

    let (wc, _) = params.linear_layer(2).unwrap();
    assert_eq!(wc.dim(), (2, 3));
    assert!(wc.iter().all(|&v| v == 1.0));

    let (rf, brf) = params.linear_layer(5).unwrap();
    assert_eq!(rf.dim(), (2, 2));
    assert!(brf.iter().all(|&v| v == 2.0));
}

#[test]
fn test_gate_indexing() {
    let mut gru = GruParams::<f64>::zeros(1, 1);
    gru[GruGate::Update].input_bias[0] = 3.0;
    assert_eq!(gru.as_slice()[1].input_bias[0], 3.0);
    assert_eq!(gru[GruGate::Update].bias(GateSide::Input)[0], 3.0);

    let mut lstm = LstmParams::<f64>::zeros(1, 1);
    lstm[LstmGate::Output].recurrent_kernel[[0, 0]] = -1.0;
    assert_eq!(lstm.as_slice()[3].recurrent_kernel[[0, 0]], -1.0);
}

#[test]
fn test_validate_names_the_offending_tensor() {
    let mut gru = GruParams::<f64>::zeros(3, 2);
    gru[GruGate::Update].recurrent_kernel = Array2::zeros((2, 3));
    let err = LayerParams::Gru(gru).validate(3, 2).unwrap_err();
    match err {
        RnnError::InvalidShape(msg) => assert!(msg.starts_with("ri"), "{}", msg),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_param_count_per_variant() {
    // gates * (h * in + h * h + 2h)
    assert_eq!(LayerParams::<f32>::zeros(RnnMode::Tanh, 3, 2).param_count(), 2 * 3 + 4 + 4);
    assert_eq!(LayerParams::<f32>::zeros(RnnMode::Lstm, 3, 2).param_count(), 4 * 14);
    assert_eq!(LayerParams::<f32>::zeros(RnnMode::Gru, 3, 2).param_count(), 3 * 14);
    assert_eq!(LayerParams::<f32>::zeros(RnnMode::Gru, 3, 2).input_width(), 3);
    assert_eq!(LayerParams::<f32>::zeros(RnnMode::Gru, 3, 2).hidden_size(), 2);
}
