//! Instrument a small MLP with LNS activation quantization.
//!
//! Run with: `cargo run --example instrument_mlp`

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{Activation, Linear};
use lns_quantize::hooks::{ActivationKind, ModuleNode};
use lns_quantize::{register_hooks, select_tiers, LnsConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== lns-quantize MLP Example ===\n");

    let device = Device::Cpu;

    println!("1. Configuration");
    let config = LnsConfig::default();
    let params = config.params()?;
    println!("   Mantissa bits: {}", config.mantissa_bits);
    println!(
        "   Clamp range: [{:e}, {:e}]",
        params.threshold_down, params.threshold_up
    );
    for spec in params.tiers() {
        println!("   Tier {:<8} scale {}", spec.tier, spec.scale);
    }

    println!("\n2. Registering hooks");
    let graph = ModuleNode::container("")
        .with_child(ModuleNode::linear("fc1"))
        .with_child(ModuleNode::activation("act", ActivationKind::Gelu))
        .with_child(ModuleNode::dropout("drop"))
        .with_child(ModuleNode::linear("fc2"));
    let registry = register_hooks(&graph, &config)?;
    for path in registry.paths() {
        println!("   hooked: {path}");
    }

    let w1 = Var::randn(0.0f32, 0.5, (128, 64), &device)?;
    let w2 = Var::randn(0.0f32, 0.5, (16, 128), &device)?;
    let fc1 = registry.attach_strict("fc1", Linear::new(w1.as_tensor().clone(), None))?;
    let act = registry.attach_strict("act", Activation::Gelu)?;
    let fc2 = registry.attach_strict("fc2", Linear::new(w2.as_tensor().clone(), None))?;

    println!("\n3. Forward pass");
    let input = Tensor::randn(0.0f32, 1.0, (2, 8, 64), &device)?;
    let hidden = fc1.forward(&input)?;
    let output = fc2.forward(&act.forward(&hidden)?)?;
    println!("   Input shape: {:?}", input.shape());
    println!("   Output shape: {:?}", output.shape());

    let counts = select_tiers(&hidden, &params)?.counts();
    println!(
        "   fc1 tiers: low={} high={} highest={} zero={}",
        counts.low, counts.high, counts.highest, counts.zero
    );

    println!("\n4. Backward pass");
    let loss = output.sqr()?.mean_all()?;
    let grads = loss.backward()?;
    for (name, var) in [("fc1", &w1), ("fc2", &w2)] {
        let grad = grads
            .get(var.as_tensor())
            .ok_or("missing gradient")?
            .to_dtype(DType::F32)?;
        let norm = grad.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()?;
        println!("   {name} grad norm: {norm:.4}");
    }

    println!("\nDone!");
    Ok(())
}
