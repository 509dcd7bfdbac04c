//! Builds a profile from raw source records and runs it through the pipeline.
//!
//! Usage:
//!   cargo run --example score_entity -- --months 30 --seed 7
//!   cargo run --example score_entity -- --model risk_model.json --json
//!   cargo run --example score_entity -- --features

use anyhow::{Context, Result};
use credit_decisioning_engine::*;
use std::collections::BTreeMap;
use std::env;

fn raw_records(months: usize) -> Result<Vec<RawSourceRecord>> {
    let mut records = Vec::new();
    let start = PeriodKey::new(2022, 1)?;
    for m in 0..months {
        let period = start.add_months(m as i32);
        // Mild seasonality on top of steady growth, with one festive-season spike.
        let season = 1.0 + 0.15 * ((m % 12) as f64 / 12.0 * std::f64::consts::TAU).sin();
        let mut sales = (400_000.0 + 6_000.0 * m as f64) * season;
        if m == months.saturating_sub(3) {
            sales *= 6.0;
        }

        for (k, share) in [0.5, 0.3, 0.2].iter().enumerate() {
            records.push(bank(
                &format!("cr-{m}-{k}"),
                &format!("{:02}/{:02}/{}", 5 + 9 * k, period.month(), period.year()),
                sales * share,
                "credit",
                "sales",
            ));
        }
        for (tag, day, amount, category) in [
            ("rent", 1, 60_000.0, "rent"),
            ("pay", 28, 180_000.0, "payroll"),
            ("inv", 15, sales * 0.35, "inventory"),
        ] {
            let date = format!("{period}-{day:02}");
            records.push(bank(&format!("dr-{m}-{tag}"), &date, amount, "debit", category));
        }

        for return_type in ["GSTR-1", "GSTR-3B"] {
            records.push(RawSourceRecord {
                source: SourceKind::TaxFiling,
                record_id: format!("{return_type}-{period}"),
                date: period.to_string(),
                amount: sales * 0.97,
                fields: BTreeMap::from([("return_type".to_string(), return_type.to_string())]),
            });
        }
        records.push(RawSourceRecord {
            source: SourceKind::Marketplace,
            record_id: format!("mp-{period}"),
            date: period.to_string(),
            amount: sales * 0.4,
            fields: BTreeMap::from([("platform".to_string(), "storefront".to_string())]),
        });
    }
    Ok(records)
}

fn bank(id: &str, date: &str, amount: f64, txn_type: &str, category: &str) -> RawSourceRecord {
    RawSourceRecord {
        source: SourceKind::BankLedger,
        record_id: id.to_string(),
        date: date.to_string(),
        amount,
        fields: BTreeMap::from([
            ("txn_type".to_string(), txn_type.to_string()),
            ("category".to_string(), category.to_string()),
            ("payment_mode".to_string(), "neft".to_string()),
        ]),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let months = parse_arg(&args, "--months", 30usize);
    let seed = parse_arg(&args, "--seed", 42u64);
    let as_json = args.iter().any(|a| a == "--json");
    let show_features = args.iter().any(|a| a == "--features");
    let model_path = args.windows(2).find(|w| w[0] == "--model").map(|w| w[1].clone());

    let (mut profile, rejected) =
        NormalizerRegistry::with_defaults().build_profile("demo-traders", &raw_records(months)?);
    profile.business_name = Some("Demo Traders".to_string());
    profile.cash_balance = Some(350_000.0);
    profile.bureau = Some(BureauReport {
        score: 742,
        dpd_30_count: 1,
        dpd_90_count: 0,
        enquiries_last_6m: 2,
    });
    profile.debt_obligations = vec![DebtObligation {
        lender: "City Bank".to_string(),
        product: "cash credit".to_string(),
        sanctioned_amount: 800_000.0,
        outstanding: 420_000.0,
        monthly_emi: 25_000.0,
        payments_due: 18,
        payments_on_time: 17,
        is_revolving: true,
    }];
    profile.credit_history = Some(CreditHistory {
        applications: 3,
        approvals: 2,
    });

    let config = EngineConfig {
        seed,
        ..EngineConfig::default()
    };
    let mut pipeline = DecisionPipeline::new(config)?;
    if let Some(path) = model_path {
        pipeline = pipeline.with_model(RiskModel::load(&path)?)?;
    }
    let run = pipeline.run(&profile)?;

    if as_json {
        println!("{}", run.to_json()?);
        return Ok(());
    }

    println!(
        "Entity {} ({} months, {} raw records rejected)",
        run.entity_id,
        profile.monthly.len(),
        rejected.len()
    );
    for stage in &run.stages {
        println!("  {:?}: {:?}", stage.stage, stage.status);
    }

    let metrics = run.metrics.as_ref().context("metrics stage did not complete")?;
    println!();
    println!("Metrics");
    for metric in metrics.metrics.values() {
        match metric.value() {
            Some(v) => println!("  {:<36} {:>14.2}  [{}]", metric.name, v, metric.method_used),
            None => println!("  {:<36} {:>14}  [{}]", metric.name, "undefined", metric.method_used),
        }
    }

    if let Some(forecast) = &run.forecast {
        println!();
        println!("Forecast ({})", forecast.method);
        for result in forecast.scenarios.values() {
            let runway = result
                .runway_days
                .map(|d| format!("{d:.0} days"))
                .unwrap_or_else(|| "sustained".to_string());
            println!("  {:?}: runway {runway}, risk {:?}", result.scenario, result.risk_level);
        }
    }

    if let Some(anomalies) = &run.anomalies {
        println!();
        println!("Anomalies ({} / {})", anomalies.transaction_method, anomalies.period_method);
        for a in &anomalies.period_anomalies {
            println!(
                "  {} {:?} {:?}: {:.0} vs median {:.0} ({:+.1}%)",
                a.period,
                a.series,
                a.direction,
                a.observed_value,
                a.baseline_median,
                a.deviation_from_median_pct
            );
        }
    }

    if let Some(rate) = run.reconciliation.as_ref().and_then(|r| r.reconciliation_rate()) {
        println!();
        println!("Reconciliation rate: {rate:.1}%");
    }

    if let Some(risk) = &run.risk {
        println!();
        println!("Risk: {}", risk.explanation);
        for driver in &risk.top_feature_drivers {
            println!(
                "  {:<36} {:+.4} ({:?})",
                driver.feature, driver.contribution, driver.direction
            );
        }
        if show_features {
            println!("  features:");
            for (name, value) in risk.features.named() {
                println!("    {:<34} {:>14.4}", name, value);
            }
        }
    }

    if let Some(rec) = &run.recommendation {
        println!();
        println!("Recommendation: {:?}", rec.tier);
        for p in &rec.products {
            println!(
                "  {:?}: up to {:.0} over {} months at {:.2}% (EMI {:.0})",
                p.product, p.max_amount, p.tenor_months, p.interest_rate, p.monthly_emi
            );
        }
        for d in &rec.declined {
            println!("  {:?} declined: {}", d.product, d.reason);
        }
    }
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
