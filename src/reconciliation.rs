//! Cross-source reconciliation.
//!
//! Declared tax turnover, bank ledger credits and marketplace order values
//! describe the same activity. Each pair is matched period by period with a
//! one-month timing tolerance; the primary verdict is tax against bank.

use crate::config::ReconciliationConfig;
use crate::error::DecisioningError;
use crate::ingestion::{CanonicalTaxFiling, ProfileView, SourceKind};
use crate::utils::PeriodKey;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

fn source_label(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::TaxFiling => "tax filing",
        SourceKind::BankLedger => "bank ledger",
        SourceKind::Marketplace => "marketplace",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationMatch {
    /// Period of the declared (source A) value.
    pub period: PeriodKey,
    pub counterpart_period: PeriodKey,
    pub source_a_amount: f64,
    pub source_b_amount: f64,
    pub month_similarity: f64,
    pub amount_similarity: f64,
    pub match_score: f64,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmatchedItem {
    pub source: SourceKind,
    pub period: PeriodKey,
    pub amount: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub source_a: SourceKind,
    pub source_b: SourceKind,
    pub matched_count: usize,
    pub total_declared: f64,
    pub total_observed: f64,
    pub matched_value: f64,
    /// matched_value / total_declared * 100, always within [0, 100].
    pub reconciliation_rate: f64,
    /// |total_declared - total_observed| / max(total_declared, total_observed) * 100
    pub discrepancy_pct: f64,
    pub risk_flag: bool,
    pub matches: Vec<ReconciliationMatch>,
    pub unmatched: Vec<UnmatchedItem>,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub entity_id: String,
    /// Declared turnover per period after revision handling.
    pub declared_turnover: BTreeMap<PeriodKey, f64>,
    /// Tax filings against bank credits. `None` when there is nothing to reconcile.
    pub primary: Option<ReconciliationSummary>,
    pub marketplace_vs_bank: Option<ReconciliationSummary>,
    pub tax_vs_marketplace: Option<ReconciliationSummary>,
    pub notes: Vec<String>,
}

impl ReconciliationReport {
    pub fn reconciliation_rate(&self) -> Option<f64> {
        self.primary.as_ref().map(|s| s.reconciliation_rate)
    }
}

/// Collapses filings to one declared value per period.
///
/// Within a return type only the highest revision counts (latest `filed_on`
/// breaks ties). Different return types restate the same turnover, so the
/// period takes their maximum rather than their sum.
pub fn aggregate_filings(filings: &[CanonicalTaxFiling]) -> BTreeMap<PeriodKey, f64> {
    let mut latest: BTreeMap<(PeriodKey, &str), &CanonicalTaxFiling> = BTreeMap::new();
    for filing in filings {
        latest
            .entry((filing.period, filing.return_type.as_str()))
            .and_modify(|current| {
                let newer = filing
                    .revision
                    .cmp(&current.revision)
                    .then_with(|| filing.filed_on.cmp(&current.filed_on))
                    .then_with(|| filing.filing_id.cmp(&current.filing_id));
                if newer == Ordering::Greater {
                    *current = filing;
                }
            })
            .or_insert(filing);
    }

    let mut per_period: BTreeMap<PeriodKey, f64> = BTreeMap::new();
    for ((period, _), filing) in latest {
        let slot = per_period.entry(period).or_insert(0.0);
        *slot = slot.max(filing.declared_turnover);
    }
    per_period
}

pub struct ReconciliationMatcher {
    config: ReconciliationConfig,
}

impl Default for ReconciliationMatcher {
    fn default() -> Self {
        Self::new(ReconciliationConfig::default())
    }
}

impl ReconciliationMatcher {
    pub fn new(config: ReconciliationConfig) -> Self {
        Self { config }
    }

    pub fn reconcile_profile(&self, view: &ProfileView) -> ReconciliationReport {
        let declared = aggregate_filings(&view.tax_filings);
        let bank = view.bank_credits();
        let mut notes = Vec::new();

        if view.tax_filings.len() > declared.len() {
            notes.push(format!(
                "{} filings collapsed to {} declared periods (latest revision per return type, max across return types)",
                view.tax_filings.len(),
                declared.len()
            ));
        }

        let mut view_of = |a: &BTreeMap<PeriodKey, f64>,
                           ka: SourceKind,
                           b: &BTreeMap<PeriodKey, f64>,
                           kb: SourceKind| {
            let summary = self.reconcile(a, ka, b, kb);
            if summary.is_none() {
                notes.push(format!(
                    "{} vs {}: no declared value to reconcile",
                    source_label(ka),
                    source_label(kb)
                ));
            }
            summary
        };

        let primary = view_of(&declared, SourceKind::TaxFiling, &bank, SourceKind::BankLedger);
        let marketplace_vs_bank = view_of(
            &view.marketplace,
            SourceKind::Marketplace,
            &bank,
            SourceKind::BankLedger,
        );
        let tax_vs_marketplace = if view.marketplace.is_empty() {
            None
        } else {
            view_of(&declared, SourceKind::TaxFiling, &view.marketplace, SourceKind::Marketplace)
        };

        if let Some(p) = &primary {
            if p.risk_flag {
                warn!(
                    "Entity '{}': only {:.1}% of declared turnover confirmed by bank credits",
                    view.entity_id, p.reconciliation_rate
                );
            }
        }

        ReconciliationReport {
            entity_id: view.entity_id.clone(),
            declared_turnover: declared,
            primary,
            marketplace_vs_bank,
            tax_vs_marketplace,
            notes,
        }
    }

    fn month_similarity(&self, distance: u32) -> f64 {
        1.0 - distance as f64 / (self.config.month_tolerance as f64 + 1.0)
    }

    /// 1 - clip(|a - b| / max(a, b), 0, 1)
    pub fn amount_similarity(a: f64, b: f64) -> f64 {
        let scale = a.abs().max(b.abs());
        if scale <= f64::EPSILON {
            return 1.0;
        }
        1.0 - ((a - b).abs() / scale).clamp(0.0, 1.0)
    }

    /// Matches `declared` (source A) against `observed` (source B) one-to-one.
    /// Returns `None` when nothing was declared.
    pub fn reconcile(
        &self,
        declared: &BTreeMap<PeriodKey, f64>,
        kind_a: SourceKind,
        observed: &BTreeMap<PeriodKey, f64>,
        kind_b: SourceKind,
    ) -> Option<ReconciliationSummary> {
        let total_declared: f64 = declared.values().sum();
        let total_observed: f64 = observed.values().sum();
        if declared.is_empty() || total_declared <= 0.0 {
            return None;
        }

        let tol = self.config.month_tolerance;
        let mut candidates: Vec<ReconciliationMatch> = Vec::new();
        for (pa, va) in declared {
            for (pb, vb) in observed {
                let distance = pa.months_until(pb).unsigned_abs();
                if distance > tol {
                    continue;
                }
                let month_similarity = self.month_similarity(distance);
                let amount_similarity = Self::amount_similarity(*va, *vb);
                let match_score = self.config.month_weight * month_similarity
                    + self.config.amount_weight * amount_similarity;
                candidates.push(ReconciliationMatch {
                    period: *pa,
                    counterpart_period: *pb,
                    source_a_amount: *va,
                    source_b_amount: *vb,
                    month_similarity,
                    amount_similarity,
                    match_score,
                    matched: false,
                });
            }
        }
        candidates.sort_by(|x, y| {
            y.match_score
                .total_cmp(&x.match_score)
                .then_with(|| x.period.cmp(&y.period))
                .then_with(|| x.counterpart_period.cmp(&y.counterpart_period))
        });

        let mut used_a: BTreeSet<PeriodKey> = BTreeSet::new();
        let mut used_b: BTreeSet<PeriodKey> = BTreeSet::new();
        let mut best_rejected: BTreeMap<PeriodKey, ReconciliationMatch> = BTreeMap::new();
        let mut matches = Vec::new();

        for mut c in candidates {
            if used_a.contains(&c.period) || used_b.contains(&c.counterpart_period) {
                continue;
            }
            if c.match_score >= self.config.match_threshold {
                used_a.insert(c.period);
                used_b.insert(c.counterpart_period);
                c.matched = true;
                matches.push(c);
            } else {
                best_rejected.entry(c.period).or_insert(c);
            }
        }

        let mut unmatched = Vec::new();
        for (period, amount) in declared.iter().filter(|(p, _)| !used_a.contains(p)) {
            unmatched.push(UnmatchedItem {
                source: kind_a,
                period: *period,
                amount: *amount,
                reason: DecisioningError::SourceMismatch {
                    period: period.to_string(),
                    source_name: source_label(kind_b).to_string(),
                }
                .to_string(),
            });
            if let Some(best) = best_rejected.remove(period) {
                matches.push(best);
            }
        }
        for (period, amount) in observed.iter().filter(|(p, _)| !used_b.contains(p)) {
            unmatched.push(UnmatchedItem {
                source: kind_b,
                period: *period,
                amount: *amount,
                reason: DecisioningError::SourceMismatch {
                    period: period.to_string(),
                    source_name: source_label(kind_a).to_string(),
                }
                .to_string(),
            });
        }
        matches.sort_by(|x, y| x.period.cmp(&y.period));

        let matched_value: f64 = matches
            .iter()
            .filter(|m| m.matched)
            .map(|m| m.source_a_amount.min(m.source_b_amount))
            .sum();
        let reconciliation_rate = (matched_value / total_declared * 100.0).clamp(0.0, 100.0);
        let scale = total_declared.max(total_observed);
        let discrepancy_pct = if scale > 0.0 {
            ((total_declared - total_observed).abs() / scale * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        let matched_count = matches.iter().filter(|m| m.matched).count();

        debug!(
            "{} vs {}: {} of {} periods matched, rate {:.1}%, discrepancy {:.1}%",
            source_label(kind_a),
            source_label(kind_b),
            matched_count,
            declared.len(),
            reconciliation_rate,
            discrepancy_pct
        );

        Some(ReconciliationSummary {
            source_a: kind_a,
            source_b: kind_b,
            matched_count,
            total_declared,
            total_observed,
            matched_value,
            reconciliation_rate,
            discrepancy_pct,
            risk_flag: reconciliation_rate < self.config.risk_rate_threshold,
            matches,
            unmatched,
            method: format!(
                "Greedy one-to-one ({:.1} x month + {:.1} x amount >= {:.2}, +/-{} month)",
                self.config.month_weight,
                self.config.amount_weight,
                self.config.match_threshold,
                tol
            ),
        })
    }
}
