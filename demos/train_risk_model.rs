//! Offline training job for the risk classifier.
//!
//! Usage:
//!   cargo run --example train_risk_model -- --samples 5000 --trees 100 --depth 6 --seed 42 --out risk_model.json

use anyhow::Result;
use credit_decisioning_engine::{synthetic_examples, ForestConfig, ForestTrainer};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let samples = parse_arg(&args, "--samples", 5_000usize);
    let seed = parse_arg(&args, "--seed", 42u64);
    let config = ForestConfig {
        n_trees: parse_arg(&args, "--trees", 100usize),
        max_depth: parse_arg(&args, "--depth", 6usize),
        min_samples_leaf: parse_arg(&args, "--min-leaf", 5usize),
        seed,
    };
    let out = args
        .windows(2)
        .find(|w| w[0] == "--out")
        .map(|w| w[1].as_str())
        .unwrap_or("risk_model.json");

    println!("Training risk model");
    println!("  samples:   {samples}");
    println!("  trees:     {}", config.n_trees);
    println!("  depth:     {}", config.max_depth);
    println!("  seed:      {seed}");

    let examples = synthetic_examples(samples, seed)?;
    let positives = examples.iter().filter(|e| e.label).count();
    println!(
        "  positives: {positives} ({:.1}%)",
        positives as f64 / samples.max(1) as f64 * 100.0
    );

    let model = ForestTrainer::new(config).train(&examples)?;
    model.save(out)?;

    println!();
    println!("Model {} written to {out}", model.model_id);
    println!("  training accuracy: {:.3}", model.training.training_accuracy);
    println!("  baseline default probability: {:.3}", model.baseline());
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
