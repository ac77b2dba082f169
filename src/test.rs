use crate::init::random_normal;
use crate::prelude::*;
use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::prelude::*;

mod params_test;

/// Step of the central differences
const EPS: f64 = 1e-6;

/// Compares a central-difference estimate with an analytic gradient
fn assert_grad_close(name: &str, index: usize, numeric: f64, analytic: f64) {
    let scale = 1f64.max(numeric.abs()).max(analytic.abs());
    assert!(
        (numeric - analytic).abs() <= 1e-5 * scale,
        "{}[{}]: numeric {} vs analytic {}",
        name,
        index,
        numeric,
        analytic
    );
}

/// Checks every element of `analytic` against the central difference of
/// `loss_at(i, delta)`, the loss with element `i` shifted by `delta`
fn check_gradient(name: &str, analytic: &[f64], mut loss_at: impl FnMut(usize, f64) -> f64) {
    for (i, &a) in analytic.iter().enumerate() {
        let numeric = (loss_at(i, EPS) - loss_at(i, -EPS)) / (2.0 * EPS);
        assert_grad_close(name, i, numeric, a);
    }
}

/// Projects outputs on a fixed direction, so that d loss / d outputs = `direction`
fn projected_loss(outputs: ArrayView3<f64>, direction: &Array3<f64>) -> f64 {
    (&outputs * direction).sum()
}

/// Runs a finite-difference check of every gradient a single layer produces
fn check_layer_gradients(mode: RnnMode, seed: u64) {
    let (seq_len, batch, input_width, hidden_size) = (3, 2, 3, 2);
    let mut rng = seeded_rng(seed);
    let params: LayerParams<f64> = random_layer_params(mode, input_width, hidden_size, &mut rng);
    let x: Array3<f64> = random_sequence(seq_len, batch, input_width, &mut rng);
    let h0: Array2<f64> = random_normal((batch, hidden_size), &mut rng);
    let c0: Option<Array2<f64>> = mode
        .has_cell()
        .then(|| random_normal((batch, hidden_size), &mut rng));
    let dy: Array3<f64> = random_sequence(seq_len, batch, hidden_size, &mut rng);

    let loss = |p: &LayerParams<f64>, x: &Array3<f64>, h0: &Array2<f64>, c0: Option<&Array2<f64>>| {
        let trace = p
            .forward(x.view(), Some(h0.view()), c0.map(|c| c.view()))
            .unwrap();
        projected_loss(trace.outputs(), &dy)
    };

    let trace = params
        .forward(x.view(), Some(h0.view()), c0.as_ref().map(|c| c.view()))
        .unwrap();
    let grads = params.backward(dy.view(), x.view(), &trace).unwrap();

    check_gradient("input", grads.input.as_slice().unwrap(), |i, delta| {
        let mut x = x.clone();
        x.as_slice_mut().unwrap()[i] += delta;
        loss(&params, &x, &h0, c0.as_ref())
    });
    check_gradient("initial hidden", grads.initial_hidden.as_slice().unwrap(), |i, delta| {
        let mut h0 = h0.clone();
        h0.as_slice_mut().unwrap()[i] += delta;
        loss(&params, &x, &h0, c0.as_ref())
    });
    if let (Some(c0), Some(dc0)) = (c0.as_ref(), grads.initial_cell.as_ref()) {
        check_gradient("initial cell", dc0.as_slice().unwrap(), |i, delta| {
            let mut c0 = c0.clone();
            c0.as_slice_mut().unwrap()[i] += delta;
            loss(&params, &x, &h0, Some(&c0))
        });
    }

    for (g, gate_grads) in grads.params.gates().iter().enumerate() {
        for side in [GateSide::Input, GateSide::Recurrent] {
            check_gradient(
                &format!("{} gate {} {:?} kernel", mode, g, side),
                gate_grads.kernel(side).as_slice().unwrap(),
                |i, delta| {
                    let mut p = params.clone();
                    p.gates_mut()[g].kernel_mut(side).as_slice_mut().unwrap()[i] += delta;
                    loss(&p, &x, &h0, c0.as_ref())
                },
            );
            check_gradient(
                &format!("{} gate {} {:?} bias", mode, g, side),
                gate_grads.bias(side).as_slice().unwrap(),
                |i, delta| {
                    let mut p = params.clone();
                    p.gates_mut()[g].bias_mut(side).as_slice_mut().unwrap()[i] += delta;
                    loss(&p, &x, &h0, c0.as_ref())
                },
            );
        }
    }
}
