//! Credit product recommendations.
//!
//! The decision tier follows from the composite risk score alone. Amounts are
//! bounded by what the entity can service: the monthly instalment available for
//! new debt is the tighter of the DSCR cap and the DTI cap, and each product's
//! maximum amount is the principal that instalment amortises over its tenor.

use crate::config::RecommendationConfig;
use crate::ingestion::ProfileView;
use crate::metrics::{keys, MetricsReport};
use crate::risk::RiskAssessment;
use log::{debug, info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionTier {
    StronglyApprove,
    Approve,
    ConditionalApproval,
    ReferToUnderwriter,
}

impl DecisionTier {
    /// Tier at the default thresholds.
    pub fn from_score(score: f64) -> Self {
        Self::classify(score, &RecommendationConfig::default())
    }

    pub fn classify(score: f64, config: &RecommendationConfig) -> Self {
        if score >= config.strongly_approve_threshold {
            Self::StronglyApprove
        } else if score >= config.approve_threshold {
            Self::Approve
        } else if score >= config.conditional_threshold {
            Self::ConditionalApproval
        } else {
            Self::ReferToUnderwriter
        }
    }

    pub fn eligible_products(self) -> &'static [Product] {
        match self {
            Self::StronglyApprove => &[
                Product::WorkingCapitalLoan,
                Product::TermLoan,
                Product::InvoiceFinancing,
                Product::OverdraftLine,
            ],
            Self::Approve => &[Product::WorkingCapitalLoan, Product::InvoiceFinancing],
            Self::ConditionalApproval => &[Product::SecuredBusinessLoan],
            Self::ReferToUnderwriter => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    WorkingCapitalLoan,
    TermLoan,
    InvoiceFinancing,
    OverdraftLine,
    SecuredBusinessLoan,
}

impl Product {
    /// Annual base rate in percent.
    pub fn base_rate(self) -> f64 {
        match self {
            Self::WorkingCapitalLoan => 12.0,
            Self::TermLoan => 13.0,
            Self::InvoiceFinancing => 11.0,
            Self::OverdraftLine => 14.0,
            Self::SecuredBusinessLoan => 12.5,
        }
    }

    pub fn tenor_months(self) -> u32 {
        match self {
            Self::WorkingCapitalLoan => 12,
            Self::TermLoan => 36,
            Self::InvoiceFinancing => 6,
            Self::OverdraftLine => 12,
            Self::SecuredBusinessLoan => 24,
        }
    }

    fn conditions(self, tier: DecisionTier) -> Vec<String> {
        let mut conditions = Vec::new();
        match self {
            Self::InvoiceFinancing => {
                conditions.push("Advance limited to verified receivables".to_string())
            }
            Self::OverdraftLine => conditions.push("Limit reviewed annually".to_string()),
            Self::SecuredBusinessLoan => conditions.push(
                "Collateral or personal guarantee covering at least 100% of the amount".to_string(),
            ),
            _ => {}
        }
        if tier == DecisionTier::ConditionalApproval {
            conditions
                .push("Six months of bank statements re-verified before disbursal".to_string());
        }
        conditions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub product: Product,
    pub max_amount: f64,
    pub tenor_months: u32,
    /// Annual rate in percent.
    pub interest_rate: f64,
    pub monthly_emi: f64,
    pub conditions: Vec<String>,
    pub tier: DecisionTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclinedProduct {
    pub product: Product,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affordability {
    pub monthly_income: f64,
    pub average_monthly_surplus: f64,
    pub existing_debt_service: f64,
    /// Surplus before existing debt service.
    pub net_operating_income: f64,
    pub emi_cap_from_dscr: f64,
    pub emi_cap_from_dti: f64,
    pub available_emi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub entity_id: String,
    pub tier: DecisionTier,
    pub score: f64,
    pub method: String,
    /// Ranked by interest rate, cheapest first.
    pub products: Vec<Recommendation>,
    pub declined: Vec<DeclinedProduct>,
    pub affordability: Affordability,
    pub rationale: String,
}

/// Principal repaid by `emi` over `months` at `annual_rate_pct`.
pub fn principal_for_emi(emi: f64, annual_rate_pct: f64, months: u32) -> f64 {
    if emi <= 0.0 || months == 0 {
        return 0.0;
    }
    let r = annual_rate_pct / 1200.0;
    if r.abs() < 1e-12 {
        return emi * months as f64;
    }
    emi * (1.0 - (1.0 + r).powi(-(months as i32))) / r
}

pub fn emi_for_principal(principal: f64, annual_rate_pct: f64, months: u32) -> f64 {
    if principal <= 0.0 || months == 0 {
        return 0.0;
    }
    let r = annual_rate_pct / 1200.0;
    if r.abs() < 1e-12 {
        return principal / months as f64;
    }
    principal * r / (1.0 - (1.0 + r).powi(-(months as i32)))
}

pub struct RecommendationEngine {
    config: RecommendationConfig,
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new(RecommendationConfig::default())
    }
}

impl RecommendationEngine {
    pub fn new(config: RecommendationConfig) -> Self {
        Self { config }
    }

    /// Base rate plus a premium inversely proportional to the score.
    pub fn interest_rate(&self, product: Product, score: f64) -> f64 {
        let score = score.clamp(1.0, 100.0);
        let premium = self.config.risk_premium_factor * (100.0 - score) / score;
        round2(product.base_rate() + premium)
    }

    pub fn affordability(&self, view: &ProfileView, metrics: &MetricsReport) -> Affordability {
        let monthly_income = metrics.value(keys::AVG_INFLOW).unwrap_or(0.0).max(0.0);
        let average_monthly_surplus = metrics.value(keys::AVG_SURPLUS).unwrap_or(0.0);
        let existing_debt_service = view.monthly_debt_service();
        let net_operating_income = average_monthly_surplus + existing_debt_service;

        let emi_cap_from_dscr = net_operating_income / self.config.min_dscr - existing_debt_service;
        let emi_cap_from_dti =
            self.config.max_dti_pct / 100.0 * monthly_income - existing_debt_service;
        let available_emi = emi_cap_from_dscr.min(emi_cap_from_dti).max(0.0);

        debug!(
            "Affordability for '{}': NOI {:.2}, DSCR cap {:.2}, DTI cap {:.2}",
            view.entity_id, net_operating_income, emi_cap_from_dscr, emi_cap_from_dti
        );

        Affordability {
            monthly_income,
            average_monthly_surplus,
            existing_debt_service,
            net_operating_income,
            emi_cap_from_dscr,
            emi_cap_from_dti,
            available_emi,
        }
    }

    pub fn recommend(
        &self,
        view: &ProfileView,
        metrics: &MetricsReport,
        risk: &RiskAssessment,
    ) -> RecommendationSet {
        let score = risk.composite_score;
        let tier = DecisionTier::classify(score, &self.config);
        let affordability = self.affordability(view, metrics);

        let mut products = Vec::new();
        let mut declined = Vec::new();
        for &product in tier.eligible_products() {
            let rate = self.interest_rate(product, score);
            let tenor = product.tenor_months();
            // Rounded down to the nearest thousand.
            let emi = affordability.available_emi;
            let amount = (principal_for_emi(emi, rate, tenor) / 1000.0).floor() * 1000.0;
            if amount < self.config.min_ticket {
                declined.push(DeclinedProduct {
                    product,
                    reason: format!(
                        "Serviceable amount {:.0} is below the minimum ticket {:.0}",
                        amount, self.config.min_ticket
                    ),
                });
                continue;
            }
            products.push(Recommendation {
                product,
                max_amount: amount,
                tenor_months: tenor,
                interest_rate: rate,
                monthly_emi: round2(emi_for_principal(amount, rate, tenor)),
                conditions: product.conditions(tier),
                tier,
            });
        }
        products.sort_by(|a, b| {
            a.interest_rate
                .total_cmp(&b.interest_rate)
                .then_with(|| a.product.cmp(&b.product))
        });

        let rationale = match tier {
            DecisionTier::ReferToUnderwriter => format!(
                "Score {:.1} is below {:.0}; referred to an underwriter with no automatic offer",
                score, self.config.conditional_threshold
            ),
            _ => format!(
                "Score {:.1} places the entity in {:?}; {} of {} eligible products are serviceable within DSCR >= {:.2} and DTI <= {:.0}% (available EMI {:.2})",
                score,
                tier,
                products.len(),
                tier.eligible_products().len(),
                self.config.min_dscr,
                self.config.max_dti_pct,
                affordability.available_emi
            ),
        };

        info!(
            "Recommendation for '{}': {:?} with {} product(s)",
            view.entity_id,
            tier,
            products.len()
        );

        RecommendationSet {
            entity_id: view.entity_id.clone(),
            tier,
            score,
            method: "Tiered policy with DSCR/DTI affordability caps".to_string(),
            products,
            declined,
            affordability,
            rationale,
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(DecisionTier::from_score(75.0), DecisionTier::StronglyApprove);
        assert_eq!(DecisionTier::from_score(74.99), DecisionTier::Approve);
        assert_eq!(DecisionTier::from_score(60.0), DecisionTier::Approve);
        assert_eq!(DecisionTier::from_score(59.99), DecisionTier::ConditionalApproval);
        assert_eq!(DecisionTier::from_score(45.0), DecisionTier::ConditionalApproval);
        assert_eq!(DecisionTier::from_score(44.9), DecisionTier::ReferToUnderwriter);
        assert!(DecisionTier::ReferToUnderwriter.eligible_products().is_empty());
        assert!(DecisionTier::StronglyApprove.eligible_products().len() >= 2);
    }

    #[test]
    fn test_rate_premium_falls_with_score() {
        let engine = RecommendationEngine::default();
        assert_eq!(engine.interest_rate(Product::TermLoan, 100.0), 13.0);
        assert_eq!(engine.interest_rate(Product::TermLoan, 80.0), 14.0);
        assert_eq!(engine.interest_rate(Product::TermLoan, 50.0), 17.0);
        assert!(engine.interest_rate(Product::TermLoan, 0.0).is_finite());
    }

    #[test]
    fn test_annuity_inverse() {
        let p = principal_for_emi(10_000.0, 12.0, 12);
        assert!((p - 112_550.77).abs() < 0.5, "got {}", p);
        assert!((emi_for_principal(p, 12.0, 12) - 10_000.0).abs() < 1e-6);
        assert_eq!(principal_for_emi(500.0, 0.0, 10), 5_000.0);
        assert_eq!(principal_for_emi(-1.0, 12.0, 12), 0.0);
    }
}
