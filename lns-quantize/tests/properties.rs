//! Property tests for the quantization pipeline.

use candle_core::{Device, Tensor, Var};
use lns_quantize::{
    clamp_range, lns_quantize, quantize_backward, quantize_forward, select_tiers, LnsParams,
    ModuleOutput,
};
use proptest::prelude::*;

fn row(values: &[f32]) -> Tensor {
    Tensor::from_vec(values.to_vec(), (1, values.len()), &Device::Cpu).unwrap()
}

fn to_vec(t: &Tensor) -> Vec<f32> {
    t.flatten_all().unwrap().to_vec1().unwrap()
}

/// Activation-like values: mostly moderate, some huge, tiny, or zero.
fn activation() -> impl Strategy<Value = f32> {
    prop_oneof![
        6 => -10.0f32..10.0,
        1 => -1e8f32..1e8,
        1 => -1e-6f32..1e-6,
        1 => Just(0.0f32),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Nonzero signs survive; zeros stay zero.
    #[test]
    fn prop_sign_and_zero_preserved(values in prop::collection::vec(activation(), 1..48)) {
        let params = LnsParams::default();
        let output = to_vec(&lns_quantize(&row(&values), &params).unwrap());

        for (x, q) in values.iter().zip(output.iter()) {
            if *x == 0.0 {
                prop_assert_eq!(*q, 0.0);
            } else {
                prop_assert_eq!(x.is_sign_negative(), q.is_sign_negative());
                prop_assert!(*q != 0.0);
            }
        }
    }

    /// Nonzero outputs stay inside the representable range.
    #[test]
    fn prop_range_bound(values in prop::collection::vec(activation(), 1..48)) {
        let params = LnsParams::default();
        let output = to_vec(&lns_quantize(&row(&values), &params).unwrap());

        for q in output.into_iter().filter(|q| *q != 0.0) {
            let magnitude = f64::from(q.abs());
            prop_assert!(magnitude >= params.threshold_down, "{} below range", q);
            prop_assert!(magnitude <= params.threshold_up, "{} above range", q);
        }
    }

    /// log2 of each output magnitude is a multiple of 1/scale of its tier.
    #[test]
    fn prop_outputs_on_tier_grid(values in prop::collection::vec(activation(), 1..48)) {
        let params = LnsParams::default();
        let input = row(&values);

        let tiers = select_tiers(&clamp_range(&input, &params).unwrap(), &params).unwrap();
        let output = to_vec(&lns_quantize(&input, &params).unwrap());

        for (q, tier) in output.iter().zip(tiers.tiers.iter()) {
            if let Some(tier) = tier {
                let steps = f64::from(q.abs()).log2() * params.tier(*tier).scale;
                prop_assert!((steps - steps.round()).abs() < 1e-3, "{} off {} grid", q, tier);
            }
        }
    }

    /// Values already on the coarsest grid are fixed points.
    #[test]
    fn prop_representable_values_are_fixed(
        exponents in prop::collection::vec((-60i32..60, any::<bool>()), 1..32),
    ) {
        let params = LnsParams::default();
        let values: Vec<f32> = exponents
            .iter()
            .map(|&(k, negative)| {
                let magnitude = (f64::from(k) / params.low.scale).exp2() as f32;
                if negative { -magnitude } else { magnitude }
            })
            .collect();

        let once = lns_quantize(&row(&values), &params).unwrap();
        let twice = lns_quantize(&once, &params).unwrap();

        prop_assert_eq!(to_vec(&once), values);
        prop_assert_eq!(to_vec(&twice), to_vec(&once));
    }

    /// Gradients through the quantized forward equal the upstream gradient.
    #[test]
    fn prop_backward_identity(
        values in prop::collection::vec(activation(), 1..32),
        weights in prop::collection::vec(-4.0f32..4.0, 32),
    ) {
        let params = LnsParams::default();
        let n = values.len();
        let var = Var::from_tensor(&row(&values)).unwrap();
        let upstream = Tensor::from_vec(weights[..n].to_vec(), (1, n), &Device::Cpu).unwrap();

        let output = quantize_forward(ModuleOutput::Single(var.as_tensor().clone()), &params)
            .unwrap()
            .into_single()
            .unwrap();
        let loss = output.mul(&upstream).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        prop_assert_eq!(to_vec(grads.get(var.as_tensor()).unwrap()), to_vec(&upstream));
        prop_assert_eq!(to_vec(&quantize_backward(&upstream)), to_vec(&upstream));
    }
}
