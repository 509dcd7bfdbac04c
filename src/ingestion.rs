//! The typed ingestion boundary.
//!
//! [`ProfileView::from_profile`] turns a [`FinancialProfile`] into canonical,
//! validated records that every downstream component works on. Structural
//! problems abort with `ValidationError`; unparseable dates on individual
//! records are logged and the record is excluded.
//!
//! Raw per-source records can be folded into a profile through the
//! [`SourceNormalizer`] capability, one implementation per source, composed by
//! [`NormalizerRegistry`].

use crate::error::{DecisioningError, Result};
use crate::schema::{
    BureauReport, CreditHistory, DebtObligation, FinancialProfile, MarketplaceOrderTotal,
    MonthlyAggregate, PaymentMode, TaxFiling, Transaction, TransactionType,
};
use crate::utils::{parse_date, PeriodKey};
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPoint {
    pub period: PeriodKey,
    pub inflow: f64,
    pub outflow: f64,
    pub categories: BTreeMap<String, f64>,
}

impl MonthlyPoint {
    pub fn surplus(&self) -> f64 {
        self.inflow - self.outflow
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTaxFiling {
    pub filing_id: String,
    pub period: PeriodKey,
    pub return_type: String,
    pub declared_turnover: f64,
    pub revision: u32,
    pub filed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    pub id: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub txn_type: TransactionType,
    pub category: String,
    pub payment_mode: PaymentMode,
}

/// A record dropped at the boundary, kept so callers can audit what was excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedRecord {
    pub source: String,
    pub reference: String,
    pub reason: String,
}

/// Validated, canonical view of one entity's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileView {
    pub entity_id: String,
    /// Chronological, unique periods. Gaps are possible.
    pub months: Vec<MonthlyPoint>,
    pub tax_filings: Vec<CanonicalTaxFiling>,
    /// Marketplace order value per period, summed across platforms.
    pub marketplace: BTreeMap<PeriodKey, f64>,
    pub transactions: Vec<CanonicalTransaction>,
    pub bureau: Option<BureauReport>,
    pub debt_obligations: Vec<DebtObligation>,
    pub credit_history: Option<CreditHistory>,
    pub cash_balance: Option<f64>,
    pub excluded: Vec<ExcludedRecord>,
}

impl ProfileView {
    pub fn from_profile(profile: &FinancialProfile) -> Result<Self> {
        let entity = profile.entity_id.trim();
        if entity.is_empty() {
            return Err(DecisioningError::validation(
                "<unknown>",
                "entity_id must not be empty",
            ));
        }
        if profile.monthly.is_empty() {
            return Err(DecisioningError::validation(
                entity,
                "missing required monthly cashflow series",
            ));
        }

        let mut excluded = Vec::new();
        let months = canonical_months(entity, &profile.monthly, &mut excluded)?;
        if months.is_empty() {
            return Err(DecisioningError::validation(
                entity,
                "no monthly aggregate has a parseable period",
            ));
        }

        if let Some(bureau) = &profile.bureau {
            if !(300..=900).contains(&bureau.score) {
                return Err(DecisioningError::validation(
                    entity,
                    format!("bureau score {} outside 300-900", bureau.score),
                ));
            }
        }

        for debt in &profile.debt_obligations {
            let amounts = [debt.sanctioned_amount, debt.outstanding, debt.monthly_emi];
            if amounts.iter().any(|v| !v.is_finite() || *v < 0.0) {
                return Err(DecisioningError::validation(
                    entity,
                    format!("debt obligation from '{}' has invalid amounts", debt.lender),
                ));
            }
            if debt.payments_on_time > debt.payments_due {
                return Err(DecisioningError::validation(
                    entity,
                    format!(
                        "debt obligation from '{}' reports more on-time payments than payments due",
                        debt.lender
                    ),
                ));
            }
        }

        if let Some(cash) = profile.cash_balance {
            if !cash.is_finite() {
                return Err(DecisioningError::validation(entity, "cash_balance is not finite"));
            }
        }

        let tax_filings = canonical_tax_filings(entity, &profile.tax_filings, &mut excluded)?;
        let marketplace =
            canonical_marketplace(entity, &profile.marketplace_orders, &mut excluded)?;
        let transactions = canonical_transactions(entity, &profile.transactions, &mut excluded)?;

        debug!(
            "Profile '{}' normalised: {} months, {} filings, {} marketplace periods, {} transactions, {} excluded",
            entity,
            months.len(),
            tax_filings.len(),
            marketplace.len(),
            transactions.len(),
            excluded.len()
        );

        Ok(Self {
            entity_id: entity.to_string(),
            months,
            tax_filings,
            marketplace,
            transactions,
            bureau: profile.bureau.clone(),
            debt_obligations: profile.debt_obligations.clone(),
            credit_history: profile.credit_history.clone(),
            cash_balance: profile.cash_balance,
            excluded,
        })
    }

    pub fn first_period(&self) -> PeriodKey {
        self.months[0].period
    }

    pub fn last_period(&self) -> PeriodKey {
        self.months[self.months.len() - 1].period
    }

    pub fn inflows(&self) -> Vec<f64> {
        self.months.iter().map(|m| m.inflow).collect()
    }

    pub fn outflows(&self) -> Vec<f64> {
        self.months.iter().map(|m| m.outflow).collect()
    }

    pub fn bank_credits(&self) -> BTreeMap<PeriodKey, f64> {
        self.months.iter().map(|m| (m.period, m.inflow)).collect()
    }

    pub fn monthly_debt_service(&self) -> f64 {
        self.debt_obligations.iter().map(|d| d.monthly_emi).sum()
    }
}

fn check_amount(entity: &str, what: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(DecisioningError::validation(
            entity,
            format!("{} is not a finite number", what),
        ));
    }
    Ok(())
}

fn canonical_months(
    entity: &str,
    monthly: &[MonthlyAggregate],
    excluded: &mut Vec<ExcludedRecord>,
) -> Result<Vec<MonthlyPoint>> {
    let mut by_period: BTreeMap<PeriodKey, MonthlyPoint> = BTreeMap::new();

    for agg in monthly {
        check_amount(entity, &format!("inflow for '{}'", agg.period), agg.total_inflow)?;
        check_amount(entity, &format!("outflow for '{}'", agg.period), agg.total_outflow)?;
        if agg.total_inflow < 0.0 || agg.total_outflow < 0.0 {
            return Err(DecisioningError::validation(
                entity,
                format!("negative monthly totals for '{}'", agg.period),
            ));
        }

        let period = match PeriodKey::parse(&agg.period) {
            Ok(p) => p,
            Err(e) => {
                warn!("Entity '{}': excluding monthly aggregate: {}", entity, e);
                excluded.push(ExcludedRecord {
                    source: "monthly".to_string(),
                    reference: agg.period.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if by_period.contains_key(&period) {
            return Err(DecisioningError::validation(
                entity,
                format!(
                    "duplicate monthly aggregate for period {} (raw '{}')",
                    period, agg.period
                ),
            ));
        }

        by_period.insert(
            period,
            MonthlyPoint {
                period,
                inflow: agg.total_inflow,
                outflow: agg.total_outflow,
                categories: agg.category_breakdown.clone(),
            },
        );
    }

    Ok(by_period.into_values().collect())
}

fn canonical_tax_filings(
    entity: &str,
    filings: &[TaxFiling],
    excluded: &mut Vec<ExcludedRecord>,
) -> Result<Vec<CanonicalTaxFiling>> {
    let mut out = Vec::with_capacity(filings.len());
    for filing in filings {
        check_amount(
            entity,
            &format!("turnover on filing '{}'", filing.filing_id),
            filing.declared_turnover,
        )?;
        if filing.declared_turnover < 0.0 {
            warn!(
                "Entity '{}': excluding filing '{}' with negative turnover",
                entity, filing.filing_id
            );
            excluded.push(ExcludedRecord {
                source: "tax_filing".to_string(),
                reference: filing.filing_id.clone(),
                reason: "negative declared turnover".to_string(),
            });
            continue;
        }
        match PeriodKey::parse(&filing.period) {
            Ok(period) => out.push(CanonicalTaxFiling {
                filing_id: filing.filing_id.clone(),
                period,
                return_type: filing.return_type.trim().to_uppercase(),
                declared_turnover: filing.declared_turnover,
                revision: filing.revision,
                filed_on: filing.filed_on,
            }),
            Err(e) => {
                warn!(
                    "Entity '{}': excluding filing '{}': {}",
                    entity, filing.filing_id, e
                );
                excluded.push(ExcludedRecord {
                    source: "tax_filing".to_string(),
                    reference: filing.filing_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    out.sort_by(|a, b| a.period.cmp(&b.period).then_with(|| a.filing_id.cmp(&b.filing_id)));
    Ok(out)
}

fn canonical_marketplace(
    entity: &str,
    orders: &[MarketplaceOrderTotal],
    excluded: &mut Vec<ExcludedRecord>,
) -> Result<BTreeMap<PeriodKey, f64>> {
    let mut out = BTreeMap::new();
    for order in orders {
        check_amount(
            entity,
            &format!("order value for '{}' on {}", order.period, order.platform),
            order.order_value,
        )?;
        if order.order_value < 0.0 {
            excluded.push(ExcludedRecord {
                source: "marketplace".to_string(),
                reference: format!("{}:{}", order.platform, order.period),
                reason: "negative order value".to_string(),
            });
            continue;
        }
        match PeriodKey::parse(&order.period) {
            // Platforms are independent sales channels, so their totals add up.
            Ok(period) => *out.entry(period).or_insert(0.0) += order.order_value,
            Err(e) => {
                warn!("Entity '{}': excluding marketplace total: {}", entity, e);
                excluded.push(ExcludedRecord {
                    source: "marketplace".to_string(),
                    reference: format!("{}:{}", order.platform, order.period),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(out)
}

fn canonical_transactions(
    entity: &str,
    transactions: &[Transaction],
    excluded: &mut Vec<ExcludedRecord>,
) -> Result<Vec<CanonicalTransaction>> {
    let mut out = Vec::with_capacity(transactions.len());
    for txn in transactions {
        check_amount(entity, &format!("amount on transaction '{}'", txn.id), txn.amount)?;
        match parse_date(&txn.date) {
            Some(date) => out.push(CanonicalTransaction {
                id: txn.id.clone(),
                date,
                amount: txn.amount.abs(),
                txn_type: txn.txn_type,
                category: txn.category.trim().to_lowercase(),
                payment_mode: txn.payment_mode,
            }),
            None => {
                warn!(
                    "Entity '{}': excluding transaction '{}' with unparseable date '{}'",
                    entity, txn.id, txn.date
                );
                excluded.push(ExcludedRecord {
                    source: "transaction".to_string(),
                    reference: txn.id.clone(),
                    reason: format!("unparseable date '{}'", txn.date),
                });
            }
        }
    }
    out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    Ok(out)
}

// ── Source normalizers ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    TaxFiling,
    BankLedger,
    Marketplace,
}

/// One record as delivered by a source system, before normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSourceRecord {
    pub source: SourceKind,
    pub record_id: String,
    pub date: String,
    pub amount: f64,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl RawSourceRecord {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.trim()).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone)]
pub enum CanonicalRecord {
    TaxFiling(TaxFiling),
    BankEntry {
        period: PeriodKey,
        transaction: Transaction,
    },
    Marketplace(MarketplaceOrderTotal),
}

pub trait SourceNormalizer: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn normalize(&self, raw: &RawSourceRecord) -> Result<CanonicalRecord>;
}

pub struct TaxFilingNormalizer;

impl SourceNormalizer for TaxFilingNormalizer {
    fn kind(&self) -> SourceKind {
        SourceKind::TaxFiling
    }

    fn normalize(&self, raw: &RawSourceRecord) -> Result<CanonicalRecord> {
        let period = PeriodKey::parse(raw.field("tax_period").unwrap_or(raw.date.as_str()))?;
        let revision = match raw.field("revision") {
            Some(r) => r.parse().map_err(|_| {
                DecisioningError::DateError(format!(
                    "filing '{}' has non-numeric revision '{}'",
                    raw.record_id, r
                ))
            })?,
            None => 0,
        };
        Ok(CanonicalRecord::TaxFiling(TaxFiling {
            filing_id: raw.record_id.clone(),
            period: period.to_string(),
            return_type: raw.field("return_type").unwrap_or("GSTR-3B").to_uppercase(),
            declared_turnover: raw.amount,
            revision,
            filed_on: raw.field("filed_on").and_then(parse_date),
        }))
    }
}

pub struct BankLedgerNormalizer;

impl SourceNormalizer for BankLedgerNormalizer {
    fn kind(&self) -> SourceKind {
        SourceKind::BankLedger
    }

    fn normalize(&self, raw: &RawSourceRecord) -> Result<CanonicalRecord> {
        let date = parse_date(&raw.date).ok_or_else(|| {
            DecisioningError::DateError(format!(
                "bank entry '{}' has unparseable date '{}'",
                raw.record_id, raw.date
            ))
        })?;
        let txn_type = match raw.field("txn_type").map(|t| t.to_lowercase()) {
            Some(t) if t == "credit" || t == "cr" => TransactionType::Credit,
            Some(t) if t == "debit" || t == "dr" => TransactionType::Debit,
            _ if raw.amount < 0.0 => TransactionType::Debit,
            _ => TransactionType::Credit,
        };
        let payment_mode = match raw.field("payment_mode").map(|m| m.to_lowercase()).as_deref() {
            Some("upi") => PaymentMode::Upi,
            Some("neft") => PaymentMode::Neft,
            Some("rtgs") => PaymentMode::Rtgs,
            Some("imps") => PaymentMode::Imps,
            Some("card") => PaymentMode::Card,
            Some("cheque") | Some("check") => PaymentMode::Cheque,
            Some("cash") => PaymentMode::Cash,
            _ => PaymentMode::Other,
        };
        Ok(CanonicalRecord::BankEntry {
            period: PeriodKey::from_date(date),
            transaction: Transaction {
                id: raw.record_id.clone(),
                date: date.format("%Y-%m-%d").to_string(),
                amount: raw.amount.abs(),
                txn_type,
                category: raw.field("category").unwrap_or("uncategorized").to_lowercase(),
                payment_mode,
            },
        })
    }
}

pub struct MarketplaceNormalizer;

impl SourceNormalizer for MarketplaceNormalizer {
    fn kind(&self) -> SourceKind {
        SourceKind::Marketplace
    }

    fn normalize(&self, raw: &RawSourceRecord) -> Result<CanonicalRecord> {
        let period = PeriodKey::parse(&raw.date)?;
        Ok(CanonicalRecord::Marketplace(MarketplaceOrderTotal {
            period: period.to_string(),
            platform: raw.field("platform").unwrap_or("unknown").to_string(),
            order_value: raw.amount,
            order_count: raw.field("order_count").and_then(|c| c.parse().ok()).unwrap_or(1),
        }))
    }
}

/// Dispatches raw records to the normalizer registered for their source.
pub struct NormalizerRegistry {
    normalizers: BTreeMap<SourceKind, Box<dyn SourceNormalizer>>,
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl NormalizerRegistry {
    pub fn empty() -> Self {
        Self {
            normalizers: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(TaxFilingNormalizer));
        registry.register(Box::new(BankLedgerNormalizer));
        registry.register(Box::new(MarketplaceNormalizer));
        registry
    }

    /// Registers (or replaces) the normalizer for its source kind.
    pub fn register(&mut self, normalizer: Box<dyn SourceNormalizer>) {
        self.normalizers.insert(normalizer.kind(), normalizer);
    }

    pub fn normalize(&self, raw: &RawSourceRecord) -> Result<CanonicalRecord> {
        let normalizer = self.normalizers.get(&raw.source).ok_or_else(|| {
            DecisioningError::InvalidConfig(format!(
                "no normalizer registered for {:?}",
                raw.source
            ))
        })?;
        normalizer.normalize(raw)
    }

    /// Folds raw records into a profile. Records that fail to normalise are
    /// logged and returned alongside the profile instead of aborting.
    pub fn build_profile(
        &self,
        entity_id: &str,
        records: &[RawSourceRecord],
    ) -> (FinancialProfile, Vec<ExcludedRecord>) {
        let mut monthly: BTreeMap<PeriodKey, MonthlyAggregate> = BTreeMap::new();
        let mut tax_filings = Vec::new();
        let mut marketplace: BTreeMap<(PeriodKey, String), MarketplaceOrderTotal> = BTreeMap::new();
        let mut transactions = Vec::new();
        let mut rejected = Vec::new();

        for raw in records {
            match self.normalize(raw) {
                Ok(CanonicalRecord::TaxFiling(filing)) => tax_filings.push(filing),
                Ok(CanonicalRecord::BankEntry {
                    period,
                    transaction,
                }) => {
                    let agg = monthly.entry(period).or_insert_with(|| MonthlyAggregate {
                        period: period.to_string(),
                        total_inflow: 0.0,
                        total_outflow: 0.0,
                        category_breakdown: BTreeMap::new(),
                    });
                    let signed = match transaction.txn_type {
                        TransactionType::Credit => {
                            agg.total_inflow += transaction.amount;
                            transaction.amount
                        }
                        TransactionType::Debit => {
                            agg.total_outflow += transaction.amount;
                            -transaction.amount
                        }
                    };
                    *agg
                        .category_breakdown
                        .entry(transaction.category.clone())
                        .or_insert(0.0) += signed;
                    transactions.push(transaction);
                }
                Ok(CanonicalRecord::Marketplace(order)) => {
                    let period = PeriodKey::parse(&order.period);
                    if let Ok(period) = period {
                        marketplace
                            .entry((period, order.platform.clone()))
                            .and_modify(|o| {
                                o.order_value += order.order_value;
                                o.order_count += order.order_count;
                            })
                            .or_insert(order);
                    }
                }
                Err(e) => {
                    warn!(
                        "Entity '{}': rejecting {:?} record '{}': {}",
                        entity_id, raw.source, raw.record_id, e
                    );
                    rejected.push(ExcludedRecord {
                        source: format!("{:?}", raw.source),
                        reference: raw.record_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let profile = FinancialProfile {
            entity_id: entity_id.to_string(),
            business_name: None,
            monthly: monthly.into_values().collect(),
            bureau: None,
            tax_filings,
            marketplace_orders: marketplace.into_values().collect(),
            debt_obligations: Vec::new(),
            transactions,
            credit_history: None,
            cash_balance: None,
        };

        (profile, rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(period: &str, inflow: f64, outflow: f64) -> MonthlyAggregate {
        MonthlyAggregate {
            period: period.to_string(),
            total_inflow: inflow,
            total_outflow: outflow,
            category_breakdown: BTreeMap::new(),
        }
    }

    fn profile(monthly: Vec<MonthlyAggregate>) -> FinancialProfile {
        FinancialProfile {
            entity_id: "biz-1".to_string(),
            business_name: None,
            monthly,
            bureau: None,
            tax_filings: vec![],
            marketplace_orders: vec![],
            debt_obligations: vec![],
            transactions: vec![],
            credit_history: None,
            cash_balance: None,
        }
    }

    #[test]
    fn test_months_are_canonicalised_and_sorted() {
        let p = profile(vec![
            month("Mar 2024", 3.0, 1.0),
            month("2024-01-15", 1.0, 1.0),
            month("02/2024", 2.0, 1.0),
        ]);
        let view = ProfileView::from_profile(&p).unwrap();
        let periods: Vec<String> = view.months.iter().map(|m| m.period.to_string()).collect();
        assert_eq!(periods, vec!["2024-01", "2024-02", "2024-03"]);
    }

    #[test]
    fn test_unparseable_period_is_excluded_not_fatal() {
        let p = profile(vec![month("2024-01", 1.0, 1.0), month("someday", 2.0, 1.0)]);
        let view = ProfileView::from_profile(&p).unwrap();
        assert_eq!(view.months.len(), 1);
        assert_eq!(view.excluded.len(), 1);
        assert_eq!(view.excluded[0].reference, "someday");
    }

    #[test]
    fn test_structural_problems_are_validation_errors() {
        let empty = profile(vec![]);
        assert!(matches!(
            ProfileView::from_profile(&empty),
            Err(DecisioningError::ValidationError { .. })
        ));

        let dup = profile(vec![month("2024-01", 1.0, 1.0), month("Jan 2024", 2.0, 1.0)]);
        assert!(matches!(
            ProfileView::from_profile(&dup),
            Err(DecisioningError::ValidationError { .. })
        ));

        let nan = profile(vec![month("2024-01", f64::NAN, 1.0)]);
        assert!(ProfileView::from_profile(&nan).is_err());

        let negative = profile(vec![month("2024-01", -5.0, 1.0)]);
        assert!(ProfileView::from_profile(&negative).is_err());

        let mut bad_bureau = profile(vec![month("2024-01", 1.0, 1.0)]);
        bad_bureau.bureau = Some(BureauReport {
            score: 1200,
            dpd_30_count: 0,
            dpd_90_count: 0,
            enquiries_last_6m: 0,
        });
        assert!(ProfileView::from_profile(&bad_bureau).is_err());
    }

    #[test]
    fn test_marketplace_platforms_are_summed_per_period() {
        let mut p = profile(vec![month("2024-01", 1.0, 1.0)]);
        p.marketplace_orders = vec![
            MarketplaceOrderTotal {
                period: "2024-01".into(),
                platform: "A".into(),
                order_value: 100.0,
                order_count: 3,
            },
            MarketplaceOrderTotal {
                period: "Jan 2024".into(),
                platform: "B".into(),
                order_value: 50.0,
                order_count: 1,
            },
        ];
        let view = ProfileView::from_profile(&p).unwrap();
        let key = PeriodKey::new(2024, 1).unwrap();
        assert_eq!(view.marketplace.get(&key), Some(&150.0));
    }

    fn raw(
        source: SourceKind,
        id: &str,
        date: &str,
        amount: f64,
        fields: &[(&str, &str)],
    ) -> RawSourceRecord {
        RawSourceRecord {
            source,
            record_id: id.to_string(),
            date: date.to_string(),
            amount,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_registry_builds_profile_from_raw_records() {
        let registry = NormalizerRegistry::with_defaults();
        let records = vec![
            raw(
                SourceKind::BankLedger,
                "b1",
                "05/01/2024",
                1000.0,
                &[("txn_type", "credit"), ("category", "Sales")],
            ),
            raw(SourceKind::BankLedger, "b2", "2024-01-20", -400.0, &[("category", "rent")]),
            raw(SourceKind::BankLedger, "b3", "2024-02-03", 900.0, &[("payment_mode", "UPI")]),
            raw(SourceKind::BankLedger, "b4", "garbage", 900.0, &[]),
            raw(SourceKind::TaxFiling, "g1", "Jan 2024", 1100.0, &[("return_type", "gstr-3b")]),
            raw(SourceKind::Marketplace, "m1", "2024-01", 300.0, &[("platform", "shop")]),
            raw(SourceKind::Marketplace, "m2", "2024-01", 200.0, &[("platform", "shop")]),
        ];

        let (profile, rejected) = registry.build_profile("biz-9", &records);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].reference, "b4");
        assert_eq!(profile.monthly.len(), 2);
        assert_eq!(profile.monthly[0].period, "2024-01");
        assert_eq!(profile.monthly[0].total_inflow, 1000.0);
        assert_eq!(profile.monthly[0].total_outflow, 400.0);
        assert_eq!(profile.monthly[0].category_breakdown.get("rent"), Some(&-400.0));
        assert_eq!(profile.tax_filings[0].return_type, "GSTR-3B");
        assert_eq!(profile.marketplace_orders.len(), 1);
        assert_eq!(profile.marketplace_orders[0].order_value, 500.0);
        assert_eq!(profile.transactions.len(), 3);

        let view = ProfileView::from_profile(&profile).unwrap();
        assert_eq!(view.months.len(), 2);
    }

    #[test]
    fn test_missing_normalizer_is_reported() {
        let registry = NormalizerRegistry::empty();
        let r = raw(SourceKind::Marketplace, "m1", "2024-01", 1.0, &[]);
        assert!(registry.normalize(&r).is_err());
    }
}
