//! Per-entity decision pipeline.
//!
//! A run moves through the stages in order. Each completed stage appends its
//! artifact to the entity's slot in the [`ArtifactStore`]; a failed stage is
//! recorded and stops the run, leaving earlier artifacts in place. Entities
//! share nothing mutable apart from the keyed store and the lease registry,
//! which allows one active run per entity id.

use crate::anomaly::{AnomalyDetector, AnomalyReport};
use crate::config::EngineConfig;
use crate::error::{DecisioningError, Result};
use crate::features::ScoringInputs;
use crate::forecast::{ForecastBundle, ForecastEngine};
use crate::ingestion::ProfileView;
use crate::metrics::{keys, MetricsCalculator, MetricsReport};
use crate::model::RiskModel;
use crate::recommendation::{DecisionTier, RecommendationEngine, RecommendationSet};
use crate::reconciliation::{ReconciliationMatcher, ReconciliationReport};
use crate::risk::{RiskAssessment, RiskCategory, RiskScorer};
use crate::schema::FinancialProfile;
use crate::utils::{derive_seed, stable_hash};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    MetricsComputed,
    Forecasted,
    AnomaliesScanned,
    Reconciled,
    Scored,
    Recommended,
    DecisionRecorded,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 7] = [
        Self::MetricsComputed,
        Self::Forecasted,
        Self::AnomaliesScanned,
        Self::Reconciled,
        Self::Scored,
        Self::Recommended,
        Self::DecisionRecorded,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub error: Option<String>,
}

/// One stored artifact. Records are only ever appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub run: u64,
    pub stage: PipelineStage,
    pub status: StageStatus,
    pub artifact: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Summary written by the final stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub entity_id: String,
    pub composite_score: f64,
    pub category: RiskCategory,
    pub tier: DecisionTier,
    pub probability: f64,
    pub products_offered: usize,
    pub model_id: Option<String>,
    /// Algorithmic path each stage took.
    pub methods: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub entity_id: String,
    pub seed: u64,
    pub stages: Vec<StageOutcome>,
    pub failed_stage: Option<PipelineStage>,
    pub excluded_records: usize,
    pub metrics: Option<MetricsReport>,
    pub forecast: Option<ForecastBundle>,
    pub anomalies: Option<AnomalyReport>,
    pub reconciliation: Option<ReconciliationReport>,
    pub risk: Option<RiskAssessment>,
    pub recommendation: Option<RecommendationSet>,
    pub decision: Option<DecisionRecord>,
}

impl PipelineRun {
    fn new(entity_id: &str, seed: u64, excluded_records: usize) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            seed,
            stages: Vec::new(),
            failed_stage: None,
            excluded_records,
            metrics: None,
            forecast: None,
            anomalies: None,
            reconciliation: None,
            risk: None,
            recommendation: None,
            decision: None,
        }
    }

    /// Last stage that completed.
    pub fn reached(&self) -> Option<PipelineStage> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Completed)
            .map(|s| s.stage)
            .last()
    }

    pub fn is_complete(&self) -> bool {
        self.reached() == Some(PipelineStage::DecisionRecorded)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Artifacts addressed by entity id.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    records: DashMap<String, Vec<StageRecord>>,
    runs: DashMap<String, u64>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_run(&self, entity_id: &str) -> u64 {
        let mut counter = self.runs.entry(entity_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn append(&self, entity_id: &str, record: StageRecord) {
        self.records
            .entry(entity_id.to_string())
            .or_default()
            .push(record);
    }

    pub fn history(&self, entity_id: &str) -> Vec<StageRecord> {
        self.records
            .get(entity_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Most recent completed artifact for `stage`.
    pub fn latest(&self, entity_id: &str, stage: PipelineStage) -> Option<serde_json::Value> {
        let records = self.records.get(entity_id)?;
        let found = records
            .value()
            .iter()
            .rev()
            .find(|r| r.stage == stage && r.status == StageStatus::Completed)
            .and_then(|r| r.artifact.clone());
        found
    }

    pub fn entities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[derive(Debug, Default)]
pub struct LeaseRegistry {
    active: DashMap<String, ()>,
}

/// Held for the duration of one run; releases the entity on drop.
#[derive(Debug)]
pub struct Lease<'a> {
    registry: &'a LeaseRegistry,
    entity_id: String,
}

impl LeaseRegistry {
    pub fn acquire(&self, entity_id: &str) -> Result<Lease<'_>> {
        match self.active.entry(entity_id.to_string()) {
            Entry::Occupied(_) => Err(DecisioningError::EntityBusy(entity_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Lease {
                    registry: self,
                    entity_id: entity_id.to_string(),
                })
            }
        }
    }

    pub fn is_active(&self, entity_id: &str) -> bool {
        self.active.contains_key(entity_id)
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.registry.active.remove(&self.entity_id);
    }
}

pub struct DecisionPipeline {
    config: EngineConfig,
    model: Option<Arc<RiskModel>>,
    store: Arc<ArtifactStore>,
    leases: LeaseRegistry,
}

impl DecisionPipeline {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            model: None,
            store: Arc::new(ArtifactStore::new()),
            leases: LeaseRegistry::default(),
        })
    }

    /// Attaches a pre-trained classifier. The artifact is validated here, not per run.
    pub fn with_model(mut self, model: RiskModel) -> Result<Self> {
        model.validate()?;
        self.model = Some(Arc::new(model));
        Ok(self)
    }

    pub fn with_store(mut self, store: Arc<ArtifactStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn entity_seed(&self, entity_id: &str) -> u64 {
        derive_seed(self.config.seed, stable_hash(entity_id))
    }

    pub fn run(&self, profile: &FinancialProfile) -> Result<PipelineRun> {
        let _lease = self.leases.acquire(&profile.entity_id)?;
        // Structural problems abort before anything is stored.
        let view = ProfileView::from_profile(profile)?;
        let seed = self.entity_seed(&view.entity_id);
        let run_id = self.store.next_run(&view.entity_id);
        info!(
            "Pipeline run {} for '{}' over {} month(s)",
            run_id,
            view.entity_id,
            view.months.len()
        );

        let mut run = PipelineRun::new(&view.entity_id, seed, view.excluded.len());
        let mut stage = StageRunner {
            store: &self.store,
            run_id,
            run: &mut run,
        };

        let c = &self.config;
        let mut done = StageArtifacts::default();
        let outcome = (|| {
            let m = &*done.metrics.insert(stage.complete(PipelineStage::MetricsComputed, || {
                Ok(MetricsCalculator::new(c.metrics.clone()).calculate(&view))
            })?);
            let f = &*done.forecast.insert(stage.complete(PipelineStage::Forecasted, || {
                ForecastEngine::new(c.forecast.clone()).forecast(&view)
            })?);
            let a = &*done.anomalies.insert(stage.complete(PipelineStage::AnomaliesScanned, || {
                Ok(AnomalyDetector::new(c.anomaly.clone(), seed).detect(&view))
            })?);
            let r = &*done.reconciliation.insert(stage.complete(PipelineStage::Reconciled, || {
                Ok(ReconciliationMatcher::new(c.reconciliation.clone()).reconcile_profile(&view))
            })?);
            let inputs = ScoringInputs {
                view: &view,
                metrics: m,
                forecast: f,
                anomalies: a,
                reconciliation: r,
            };
            let scored = &*done.risk.insert(stage.complete(PipelineStage::Scored, || {
                Ok(RiskScorer::new(c.risk.clone()).assess(&inputs, self.model.as_deref()))
            })?);
            let recommendation = stage.complete(PipelineStage::Recommended, || {
                Ok(RecommendationEngine::new(c.recommendation.clone()).recommend(&view, m, scored))
            })?;
            let recommended = &*done.recommendation.insert(recommendation);
            done.decision = Some(stage.complete(PipelineStage::DecisionRecorded, || {
                Ok(decision_record(m, f, a, r, scored, recommended))
            })?);
            Some(())
        })();
        done.attach_to(&mut run);

        if outcome.is_none() {
            warn!(
                "Pipeline for '{}' stopped at {:?}",
                run.entity_id, run.failed_stage
            );
        } else {
            info!("Pipeline for '{}' recorded a decision", run.entity_id);
        }
        Ok(run)
    }

    /// Runs every profile in parallel. A profile whose entity already has a run
    /// in flight, including a duplicate within the batch, gets `EntityBusy`.
    pub fn run_batch(&self, profiles: &[FinancialProfile]) -> Vec<(String, Result<PipelineRun>)> {
        profiles
            .par_iter()
            .map(|p| (p.entity_id.clone(), self.run(p)))
            .collect()
    }
}

/// Artifacts of the stages that completed. They go back to the caller even
/// when a later stage fails.
#[derive(Default)]
struct StageArtifacts {
    metrics: Option<MetricsReport>,
    forecast: Option<ForecastBundle>,
    anomalies: Option<AnomalyReport>,
    reconciliation: Option<ReconciliationReport>,
    risk: Option<RiskAssessment>,
    recommendation: Option<RecommendationSet>,
    decision: Option<DecisionRecord>,
}

impl StageArtifacts {
    fn attach_to(self, run: &mut PipelineRun) {
        run.metrics = self.metrics;
        run.forecast = self.forecast;
        run.anomalies = self.anomalies;
        run.reconciliation = self.reconciliation;
        run.risk = self.risk;
        run.recommendation = self.recommendation;
        run.decision = self.decision;
    }
}

struct StageRunner<'a> {
    store: &'a ArtifactStore,
    run_id: u64,
    run: &'a mut PipelineRun,
}

impl StageRunner<'_> {
    /// Runs one stage, stores its artifact and records the outcome. Returns
    /// `None` once a stage has failed.
    fn complete<T: Serialize>(
        &mut self,
        stage: PipelineStage,
        work: impl FnOnce() -> Result<T>,
    ) -> Option<T> {
        let outcome = work().and_then(|artifact| {
            let value = serde_json::to_value(&artifact).map_err(|e| DecisioningError::StageFailed {
                stage: format!("{:?}", stage),
                details: e.to_string(),
            })?;
            Ok((artifact, value))
        });

        match outcome {
            Ok((artifact, value)) => {
                self.store.append(
                    &self.run.entity_id,
                    StageRecord {
                        run: self.run_id,
                        stage,
                        status: StageStatus::Completed,
                        artifact: Some(value),
                        error: None,
                    },
                );
                self.run.stages.push(StageOutcome {
                    stage,
                    status: StageStatus::Completed,
                    error: None,
                });
                Some(artifact)
            }
            Err(e) => {
                warn!("Entity '{}': stage {:?} failed: {}", self.run.entity_id, stage, e);
                self.store.append(
                    &self.run.entity_id,
                    StageRecord {
                        run: self.run_id,
                        stage,
                        status: StageStatus::Failed,
                        artifact: None,
                        error: Some(e.to_string()),
                    },
                );
                self.run.stages.push(StageOutcome {
                    stage,
                    status: StageStatus::Failed,
                    error: Some(e.to_string()),
                });
                self.run.failed_stage = Some(stage);
                None
            }
        }
    }
}

fn decision_record(
    metrics: &MetricsReport,
    forecast: &ForecastBundle,
    anomalies: &AnomalyReport,
    reconciliation: &ReconciliationReport,
    risk: &RiskAssessment,
    recommendation: &RecommendationSet,
) -> DecisionRecord {
    let mut methods = BTreeMap::new();
    if let Some(growth) = metrics.get(keys::GROWTH_RATE) {
        methods.insert("growth".to_string(), growth.method_used.clone());
    }
    methods.insert("forecast".to_string(), forecast.method.clone());
    methods.insert("transaction_anomalies".to_string(), anomalies.transaction_method.clone());
    methods.insert("period_anomalies".to_string(), anomalies.period_method.clone());
    if let Some(primary) = &reconciliation.primary {
        methods.insert("reconciliation".to_string(), primary.method.clone());
    }
    methods.insert("risk".to_string(), risk.method.clone());
    methods.insert("recommendation".to_string(), recommendation.method.clone());

    DecisionRecord {
        entity_id: risk.entity_id.clone(),
        composite_score: risk.composite_score,
        category: risk.category,
        tier: recommendation.tier,
        probability: risk.probability,
        products_offered: recommendation.products.len(),
        model_id: risk.model_id.clone(),
        methods,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_is_exclusive_and_released_on_drop() {
        let registry = LeaseRegistry::default();
        {
            let _lease = registry.acquire("a").unwrap();
            assert!(registry.is_active("a"));
            assert!(matches!(
                registry.acquire("a"),
                Err(DecisioningError::EntityBusy(_))
            ));
            assert!(registry.acquire("b").is_ok());
        }
        assert!(!registry.is_active("a"));
        assert!(registry.acquire("a").is_ok());
    }

    #[test]
    fn test_store_appends_per_entity() {
        let store = ArtifactStore::new();
        assert_eq!(store.next_run("a"), 1);
        assert_eq!(store.next_run("a"), 2);
        assert_eq!(store.next_run("b"), 1);
        for run in 1..=2 {
            store.append(
                "a",
                StageRecord {
                    run,
                    stage: PipelineStage::MetricsComputed,
                    status: StageStatus::Completed,
                    artifact: Some(serde_json::json!({ "run": run })),
                    error: None,
                },
            );
        }
        assert_eq!(store.history("a").len(), 2);
        assert!(store.history("b").is_empty());
        assert_eq!(
            store.latest("a", PipelineStage::MetricsComputed),
            Some(serde_json::json!({ "run": 2 }))
        );
        assert_eq!(store.latest("a", PipelineStage::Scored), None);
    }

    #[test]
    fn test_failed_stage_stops_run_and_keeps_earlier_artifacts() {
        let store = ArtifactStore::new();
        let mut run = PipelineRun::new("e", 1, 0);
        let mut stage = StageRunner {
            store: &store,
            run_id: 1,
            run: &mut run,
        };
        assert_eq!(stage.complete(PipelineStage::MetricsComputed, || Ok(1)), Some(1));
        let failed: Option<u32> = stage.complete(PipelineStage::Forecasted, || {
            Err(DecisioningError::StageFailed {
                stage: "Forecasted".to_string(),
                details: "boom".to_string(),
            })
        });
        assert_eq!(failed, None);

        assert_eq!(run.failed_stage, Some(PipelineStage::Forecasted));
        assert_eq!(run.reached(), Some(PipelineStage::MetricsComputed));
        let history = store.history("e");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].artifact, Some(serde_json::json!(1)));
        assert_eq!(history[1].status, StageStatus::Failed);
    }

    #[test]
    fn test_failed_run_still_returns_completed_artifacts() {
        let profile = FinancialProfile {
            entity_id: "partial".to_string(),
            business_name: None,
            monthly: (1..=6)
                .map(|m| crate::schema::MonthlyAggregate {
                    period: format!("2024-{:02}", m),
                    total_inflow: 1000.0,
                    total_outflow: 800.0,
                    category_breakdown: BTreeMap::new(),
                })
                .collect(),
            bureau: None,
            tax_filings: vec![],
            marketplace_orders: vec![],
            debt_obligations: vec![],
            transactions: vec![],
            credit_history: None,
            cash_balance: None,
        };
        let view = ProfileView::from_profile(&profile).unwrap();
        let store = ArtifactStore::new();
        let mut run = PipelineRun::new("partial", 1, 0);
        let mut stage = StageRunner {
            store: &store,
            run_id: 1,
            run: &mut run,
        };

        let mut done = StageArtifacts::default();
        let outcome = (|| {
            done.metrics = Some(stage.complete(PipelineStage::MetricsComputed, || {
                Ok(MetricsCalculator::default().calculate(&view))
            })?);
            done.forecast = Some(stage.complete(PipelineStage::Forecasted, || {
                Err(DecisioningError::validation("partial", "no monthly history to project"))
            })?);
            Some(())
        })();
        done.attach_to(&mut run);

        assert!(outcome.is_none());
        assert_eq!(run.failed_stage, Some(PipelineStage::Forecasted));
        assert_eq!(run.metrics.as_ref().map(|m| m.months_observed), Some(6));
        assert!(run.forecast.is_none());
        assert!(run.decision.is_none());
        assert!(!run.is_complete());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.forecast.horizon_days = 10;
        assert!(DecisionPipeline::new(config).is_err());
    }
}
