//! # Credit Decisioning Engine
//!
//! Per-entity analytics and credit decisioning over a cleaned financial profile
//! (monthly bank inflow/outflow, tax-filing turnover, marketplace orders, bureau
//! and debt data).
//!
//! ## Core Concepts
//!
//! - **Explainable metrics**: every derived indicator is a [`MetricResult`] carrying
//!   its method, formula and numeric breakdown, or an explicit undefined sentinel
//! - **Scenario forecasts**: Holt-Winters projections (linear trend on short
//!   history) with base, optimistic and pessimistic runway
//! - **Two-layer anomaly detection**: transaction outliers and monthly change
//!   points, each tagged with the method that actually ran
//! - **Cross-source reconciliation**: declared turnover against bank credits and
//!   marketplace orders, bounded to [0, 100]
//! - **Risk and recommendation**: a weighted composite score, attribution from an
//!   offline-trained forest, and affordability-capped product offers
//! - **Pipeline**: stages run in order per entity with append-only artifacts and a
//!   per-entity lease; entities run in parallel
//!
//! ## Example
//!
//! ```rust,ignore
//! use credit_decisioning_engine::*;
//!
//! let profile: FinancialProfile = serde_json::from_str(&json)?;
//! let run = run_pipeline(&profile, EngineConfig::default())?;
//! if let Some(decision) = &run.decision {
//!     println!("{} -> {:?} ({:.1})", decision.entity_id, decision.tier, decision.composite_score);
//! }
//! ```

pub mod anomaly;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod ingestion;
pub mod isolation;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod recommendation;
pub mod reconciliation;
pub mod risk;
pub mod schema;
pub mod seasonality;
pub mod stats;
pub mod timeseries;
pub mod training;
pub mod utils;

pub use anomaly::{
    AnomalyDetector, AnomalyReport, PeriodAnomaly, TransactionAnomaly, STATISTICAL_METHOD,
};
pub use config::*;
pub use error::{DecisioningError, Result};
pub use features::{FeatureVector, ScoringInputs, FEATURE_COUNT, FEATURE_NAMES};
pub use forecast::{ForecastBundle, ForecastEngine, ForecastResult, RunwayRisk, Scenario};
pub use ingestion::*;
pub use metrics::{
    confidence_from_cv, ConfidenceBand, MetricResult, MetricValue, MetricsCalculator, MetricsReport,
};
pub use model::RiskModel;
pub use pipeline::{
    ArtifactStore, DecisionPipeline, DecisionRecord, PipelineRun, PipelineStage, StageStatus,
};
pub use recommendation::{
    DecisionTier, Product, Recommendation, RecommendationEngine, RecommendationSet,
};
pub use reconciliation::{ReconciliationMatcher, ReconciliationReport, ReconciliationSummary};
pub use risk::{RiskAssessment, RiskCategory, RiskScorer};
pub use schema::*;
pub use training::{synthetic_examples, ForestConfig, ForestTrainer, TrainingExample};
pub use utils::PeriodKey;

use log::info;

/// Runs one entity through every stage with the deterministic composite only.
pub fn run_pipeline(profile: &FinancialProfile, config: EngineConfig) -> Result<PipelineRun> {
    DecisionPipeline::new(config)?.run(profile)
}

/// Runs one entity with a pre-trained risk model loaded from `model_path`.
pub fn run_pipeline_with_model(
    profile: &FinancialProfile,
    config: EngineConfig,
    model_path: impl AsRef<std::path::Path>,
) -> Result<PipelineRun> {
    let model = RiskModel::load(model_path)?;
    info!("Loaded risk model '{}'", model.model_id);
    DecisionPipeline::new(config)?.with_model(model)?.run(profile)
}
