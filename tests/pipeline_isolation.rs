mod common;

use anyhow::{Context, Result};
use common::*;
use credit_decisioning_engine::pipeline::StageRecord;
use credit_decisioning_engine::*;

fn scaled_profile(entity_id: &str, scale: f64) -> FinancialProfile {
    let mut profile = healthy_profile(entity_id);
    for month in &mut profile.monthly {
        month.total_inflow *= scale;
        month.total_outflow *= scale;
    }
    for filing in &mut profile.tax_filings {
        filing.declared_turnover *= scale;
    }
    profile.transactions = transactions(36);
    profile
}

#[test]
fn test_identical_input_gives_byte_identical_artifacts() -> Result<()> {
    init_logging();
    let profile = scaled_profile("idempotent", 1.0);

    let first = DecisionPipeline::new(EngineConfig::default())?.run(&profile)?;
    let second = DecisionPipeline::new(EngineConfig::default())?.run(&profile)?;
    assert!(first.is_complete());

    // The learned layers ran, so the seeded paths are covered too.
    let anomalies = first.anomalies.as_ref().context("anomaly stage missing")?;
    assert!(anomalies.transaction_method.starts_with("Isolation Forest"));
    assert!(anomalies.period_method.starts_with("Isolation Forest"));

    assert_eq!(first.to_json()?, second.to_json()?);
    Ok(())
}

#[test]
fn test_batch_runs_are_isolated_per_entity() -> Result<()> {
    init_logging();
    let profiles: Vec<FinancialProfile> = (0..8)
        .map(|i| scaled_profile(&format!("entity-{}", i), 1.0 + i as f64 * 0.5))
        .collect();

    let pipeline = DecisionPipeline::new(EngineConfig::default())?;
    let results = pipeline.run_batch(&profiles);
    assert_eq!(results.len(), profiles.len());

    for (profile, (entity_id, result)) in profiles.iter().zip(&results) {
        assert_eq!(entity_id, &profile.entity_id);
        let run = result.as_ref().map_err(|e| anyhow::anyhow!("{}", e))?;
        assert_eq!(run.entity_id, profile.entity_id);
        let metrics = run.metrics.as_ref().context("metrics stage missing")?;
        assert_eq!(metrics.entity_id, profile.entity_id);

        // Same artifacts as a run in a pipeline of its own.
        let alone = DecisionPipeline::new(EngineConfig::default())?.run(profile)?;
        assert_eq!(run.to_json()?, alone.to_json()?);

        let history: Vec<StageRecord> = pipeline.store().history(&profile.entity_id);
        assert_eq!(history.len(), PipelineStage::ALL.len());
        assert!(history.iter().all(|r| r.status == StageStatus::Completed));
    }
    assert_eq!(pipeline.store().entities().len(), profiles.len());
    Ok(())
}

#[test]
fn test_entity_with_active_run_is_rejected() -> Result<()> {
    let pipeline = DecisionPipeline::new(EngineConfig::default())?;
    let profile = healthy_profile("busy");

    {
        let _lease = pipeline.leases().acquire("busy")?;
        let err = pipeline.run(&profile).err().context("run should be rejected")?;
        assert!(matches!(err, DecisioningError::EntityBusy(_)));
        assert!(pipeline.store().history("busy").is_empty());

        // Other entities are unaffected.
        assert!(pipeline.run(&healthy_profile("other"))?.is_complete());
    }

    assert!(pipeline.run(&profile)?.is_complete());
    Ok(())
}

#[test]
fn test_repeated_runs_append_artifacts() -> Result<()> {
    let pipeline = DecisionPipeline::new(EngineConfig::default())?;
    let profile = healthy_profile("repeat");
    pipeline.run(&profile)?;
    pipeline.run(&profile)?;

    let history = pipeline.store().history("repeat");
    assert_eq!(history.len(), 2 * PipelineStage::ALL.len());
    assert!(history[..7].iter().all(|r| r.run == 1));
    assert!(history[7..].iter().all(|r| r.run == 2));
    assert!(pipeline
        .store()
        .latest("repeat", PipelineStage::DecisionRecorded)
        .is_some());
    Ok(())
}

#[test]
fn test_duplicate_entity_in_batch_never_interleaves() -> Result<()> {
    let pipeline = DecisionPipeline::new(EngineConfig::default())?;
    let profiles = vec![healthy_profile("dup"), healthy_profile("dup")];
    let results = pipeline.run_batch(&profiles);

    let completed = results.iter().filter(|(_, r)| r.is_ok()).count();
    assert!(completed >= 1);
    for (_, result) in &results {
        if let Err(e) = result {
            assert!(matches!(e, DecisioningError::EntityBusy(_)));
        }
    }
    assert_eq!(
        pipeline.store().history("dup").len(),
        completed * PipelineStage::ALL.len()
    );
    Ok(())
}

#[test]
fn test_pipelines_can_share_one_store() -> Result<()> {
    let store = std::sync::Arc::new(ArtifactStore::new());
    let first = DecisionPipeline::new(EngineConfig::default())?.with_store(store.clone());
    let second = DecisionPipeline::new(EngineConfig::default())?.with_store(store.clone());
    first.run(&healthy_profile("shared-a"))?;
    second.run(&healthy_profile("shared-b"))?;
    second.run(&healthy_profile("shared-a"))?;

    assert_eq!(store.entities(), vec!["shared-a".to_string(), "shared-b".to_string()]);
    let history = store.history("shared-a");
    assert_eq!(history.len(), 2 * PipelineStage::ALL.len());
    assert_eq!(history.last().map(|r| r.run), Some(2));
    Ok(())
}
