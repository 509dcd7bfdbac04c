mod common;

use anyhow::{Context, Result};
use common::*;
use credit_decisioning_engine::anomaly::{Direction, SeriesKind};
use credit_decisioning_engine::metrics::keys;
use credit_decisioning_engine::*;

#[test]
fn test_linear_growth_reports_three_year_cagr() -> Result<()> {
    init_logging();
    let inflows: Vec<f64> = (0..36).map(|i| 100.0 + 200.0 * i as f64 / 35.0).collect();
    let profile = bare_profile("linear", &inflows, &vec![50.0; 36]);

    let run = run_pipeline(&profile, EngineConfig::default())?;
    let metrics = run.metrics.as_ref().context("metrics stage missing")?;
    let growth = metrics.get(keys::GROWTH_RATE).context("growth metric missing")?;

    assert_eq!(growth.method_used, "CAGR (3y)");
    let value = growth.value().context("growth should be defined")?;
    assert!((value - 44.225).abs() < 0.01, "CAGR was {}", value);
    assert_eq!(growth.breakdown.get("years"), Some(&3.0));
    assert_eq!(growth.breakdown.get("start_value"), Some(&100.0));
    Ok(())
}

#[test]
fn test_single_zero_month_is_undefined_not_a_decline() -> Result<()> {
    init_logging();
    let profile = bare_profile("zero", &[0.0], &[1_000.0]);

    let run = run_pipeline(&profile, EngineConfig::default())?;
    assert!(run.is_complete());
    let metrics = run.metrics.as_ref().context("metrics stage missing")?;

    for key in [keys::INCOME_CV, keys::INCOME_CONFIDENCE, keys::GROWTH_RATE, keys::PROFIT_MARGIN] {
        let metric = metrics.get(key).context("metric missing")?;
        assert!(metric.is_undefined(), "{} should be undefined", key);
        assert!(!metric.method_used.is_empty());
        assert!(!metric.explanation.is_empty());
    }
    assert!(metrics.undefined_metrics().contains(&keys::GROWTH_RATE));
    Ok(())
}

#[test]
fn test_zero_starting_month_does_not_produce_minus_100_percent() -> Result<()> {
    let mut inflows = vec![0.0];
    inflows.extend((1..36).map(|i| 1_000.0 + i as f64));
    let profile = bare_profile("zero-start", &inflows, &vec![500.0; 36]);

    let run = run_pipeline(&profile, EngineConfig::default())?;
    let growth = run
        .metrics
        .as_ref()
        .and_then(|m| m.get(keys::GROWTH_RATE))
        .context("growth metric missing")?;
    assert_eq!(growth.method_used, "CAGR (3y)");
    assert!(growth.is_undefined());
    Ok(())
}

#[test]
fn test_duplicate_filings_do_not_inflate_reconciliation() -> Result<()> {
    init_logging();
    let bank_month = 1_000_000_000.0 / 12.0;
    let declared_month = 2.0 * bank_month;
    let mut profile = bare_profile("recon", &vec![bank_month; 12], &vec![bank_month * 0.9; 12]);

    // Ten revisions of two return types per month: 40B if naively summed.
    for m in 0..12 {
        for return_type in ["GSTR-1", "GSTR-3B"] {
            for revision in 0..10 {
                profile.tax_filings.push(filing(
                    &format!("{}-{}-{}", m, return_type, revision),
                    &period(m),
                    return_type,
                    declared_month,
                    revision,
                ));
            }
        }
    }
    let raw_total: f64 = profile.tax_filings.iter().map(|f| f.declared_turnover).sum();
    assert!((raw_total - 40_000_000_000.0).abs() < 1.0);

    let run = run_pipeline(&profile, EngineConfig::default())?;
    let recon = run.reconciliation.as_ref().context("reconciliation stage missing")?;
    let declared_total: f64 = recon.declared_turnover.values().sum();
    assert!((declared_total - 2_000_000_000.0).abs() < 1.0);

    let primary = recon.primary.as_ref().context("primary view missing")?;
    assert!(primary.reconciliation_rate.is_finite());
    assert!((0.0..=100.0).contains(&primary.reconciliation_rate));
    assert!((primary.reconciliation_rate - 50.0).abs() < 1e-6);
    assert_eq!(primary.matched_count, 12);
    assert!(!recon.notes.is_empty());
    Ok(())
}

#[test]
fn test_multi_million_spike_is_flagged_with_statistical_method() -> Result<()> {
    init_logging();
    let mut inflows = vec![
        372_000.0, 388_000.0, 380_000.0, 376_000.0, 384_000.0, 380_000.0, 378_000.0, 382_000.0,
        380_000.0, 374_000.0, 386_000.0,
    ];
    inflows.push(30_900_000.0);
    let profile = bare_profile("spike", &inflows, &vec![300_000.0; 12]);

    let run = run_pipeline(&profile, EngineConfig::default())?;
    let anomalies = run.anomalies.as_ref().context("anomaly stage missing")?;

    assert_eq!(anomalies.period_method, STATISTICAL_METHOD);
    assert!(!anomalies.fallback_reasons.is_empty());
    assert_eq!(anomalies.period_anomalies.len(), 1);

    let spike = &anomalies.period_anomalies[0];
    assert_eq!(spike.period.to_string(), "2021-12");
    assert_eq!(spike.series, SeriesKind::Inflow);
    assert_eq!(spike.direction, Direction::Spike);
    assert_eq!(spike.baseline_median, 380_000.0);
    assert!(spike.deviation_from_median_pct > 8000.0);
    assert!((spike.deviation_from_median_pct - 8031.578947).abs() < 1e-4);
    assert_eq!(spike.detection_method, STATISTICAL_METHOD);
    Ok(())
}

#[test]
fn test_strong_entity_is_strongly_approved_with_several_products() -> Result<()> {
    init_logging();
    let profile = healthy_profile("strong");
    let run = run_pipeline(&profile, EngineConfig::default())?;
    assert!(run.is_complete());

    let risk = run.risk.as_ref().context("risk stage missing")?;
    assert!(risk.composite_score >= 75.0, "composite {}", risk.composite_score);
    assert_eq!(risk.category, RiskCategory::Approve);
    assert!(risk.fallback_reason.is_some());
    assert!(risk.top_feature_drivers.len() <= 5);

    let recommendation = run.recommendation.as_ref().context("recommendation stage missing")?;
    assert_eq!(recommendation.tier, DecisionTier::StronglyApprove);
    assert!(recommendation.products.len() >= 2);
    for pair in recommendation.products.windows(2) {
        assert!(pair[0].interest_rate <= pair[1].interest_rate);
    }
    for product in &recommendation.products {
        assert!(product.max_amount >= 50_000.0);
        assert!(product.monthly_emi <= recommendation.affordability.available_emi + 1.0);
    }

    let decision = run.decision.as_ref().context("decision stage missing")?;
    assert_eq!(decision.tier, DecisionTier::StronglyApprove);
    assert_eq!(decision.products_offered, recommendation.products.len());
    Ok(())
}

#[test]
fn test_score_of_82_offers_multiple_products() -> Result<()> {
    let profile = healthy_profile("score-82");
    let run = run_pipeline(&profile, EngineConfig::default())?;
    let view = ProfileView::from_profile(&profile)?;
    let metrics = run.metrics.as_ref().context("metrics stage missing")?;
    let mut risk = run.risk.clone().context("risk stage missing")?;
    risk.composite_score = 82.0;

    let set = RecommendationEngine::default().recommend(&view, metrics, &risk);
    assert_eq!(set.tier, DecisionTier::StronglyApprove);
    assert!(set.products.len() >= 2);
    assert!(set.products.iter().all(|p| p.tier == DecisionTier::StronglyApprove));
    Ok(())
}

#[test]
fn test_low_score_is_referred_without_offers() -> Result<()> {
    let profile = healthy_profile("weak");
    let run = run_pipeline(&profile, EngineConfig::default())?;
    let view = ProfileView::from_profile(&profile)?;
    let metrics = run.metrics.as_ref().context("metrics stage missing")?;
    let mut risk = run.risk.clone().context("risk stage missing")?;

    risk.composite_score = 50.0;
    let conditional = RecommendationEngine::default().recommend(&view, metrics, &risk);
    assert_eq!(conditional.tier, DecisionTier::ConditionalApproval);
    assert!(conditional
        .products
        .iter()
        .all(|p| p.conditions.iter().any(|c| c.contains("Collateral"))));

    risk.composite_score = 30.0;
    let referred = RecommendationEngine::default().recommend(&view, metrics, &risk);
    assert_eq!(referred.tier, DecisionTier::ReferToUnderwriter);
    assert!(referred.products.is_empty());
    Ok(())
}

#[test]
fn test_forecast_scenarios_are_ordered_and_tagged() -> Result<()> {
    let profile = healthy_profile("forecast");
    let run = run_pipeline(&profile, EngineConfig::default())?;
    let forecast = run.forecast.as_ref().context("forecast stage missing")?;

    assert!(forecast.method.starts_with("Holt-Winters"));
    assert!(forecast.fallback_reason.is_none());
    let base = forecast.scenario(Scenario::Base).context("base")?;
    let optimistic = forecast.scenario(Scenario::Optimistic).context("optimistic")?;
    let pessimistic = forecast.scenario(Scenario::Pessimistic).context("pessimistic")?;
    assert_eq!(base.periods.len(), 6);
    for ((o, b), p) in optimistic.periods.iter().zip(&base.periods).zip(&pessimistic.periods) {
        assert!(o.surplus >= b.surplus);
        assert!(b.surplus >= p.surplus);
    }
    Ok(())
}

#[test]
fn test_profile_built_from_raw_sources() -> Result<()> {
    let mut records = Vec::new();
    for m in 0..6 {
        records.push(RawSourceRecord {
            source: SourceKind::BankLedger,
            record_id: format!("b{}", m),
            date: format!("15/{:02}/2024", m + 1),
            amount: 120_000.0,
            fields: [("txn_type".to_string(), "CR".to_string())].into_iter().collect(),
        });
        records.push(RawSourceRecord {
            source: SourceKind::BankLedger,
            record_id: format!("d{}", m),
            date: format!("2024-{:02}-20", m + 1),
            amount: -80_000.0,
            fields: Default::default(),
        });
        records.push(RawSourceRecord {
            source: SourceKind::TaxFiling,
            record_id: format!("t{}", m),
            date: format!("2024-{:02}", m + 1),
            amount: 118_000.0,
            fields: Default::default(),
        });
    }
    records.push(RawSourceRecord {
        source: SourceKind::BankLedger,
        record_id: "bad".to_string(),
        date: "not a date".to_string(),
        amount: 1.0,
        fields: Default::default(),
    });

    let (profile, rejected) = NormalizerRegistry::with_defaults().build_profile("raw", &records);
    assert_eq!(rejected.len(), 1);
    assert_eq!(profile.monthly.len(), 6);

    let run = run_pipeline(&profile, EngineConfig::default())?;
    let rate = run
        .reconciliation
        .as_ref()
        .and_then(|r| r.reconciliation_rate())
        .context("primary reconciliation missing")?;
    assert!(rate > 95.0);
    Ok(())
}
