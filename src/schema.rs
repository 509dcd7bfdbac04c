use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum TransactionType {
    #[schemars(description = "Money received into the business bank account")]
    Credit,

    #[schemars(description = "Money paid out of the business bank account")]
    Debit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum PaymentMode {
    Upi,
    Neft,
    Rtgs,
    Imps,
    Card,
    Cheque,
    Cash,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyAggregate {
    #[schemars(
        description = "The calendar month this aggregate covers. Canonical form is YYYY-MM; other date representations are accepted and normalised."
    )]
    pub period: String,

    #[schemars(description = "Total bank credits for the month")]
    pub total_inflow: f64,

    #[schemars(
        description = "Total bank debits for the month, including debt service payments"
    )]
    pub total_outflow: f64,

    #[serde(default)]
    #[schemars(description = "Net amount per standardised category (e.g. 'sales', 'payroll', 'rent')")]
    pub category_breakdown: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaxFiling {
    #[schemars(description = "Identifier of the filed return")]
    pub filing_id: String,

    #[schemars(description = "The tax period the return declares turnover for")]
    pub period: String,

    #[schemars(
        description = "Return form (e.g. 'GSTR-1', 'GSTR-3B'). Different forms for the same period declare the same turnover and must not be summed."
    )]
    pub return_type: String,

    #[schemars(description = "Turnover declared on the return")]
    pub declared_turnover: f64,

    #[serde(default)]
    #[schemars(description = "Revision number; a higher revision supersedes earlier filings of the same form")]
    pub revision: u32,

    #[serde(default)]
    #[schemars(description = "Date the return was filed, if known")]
    pub filed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MarketplaceOrderTotal {
    #[schemars(description = "The calendar month of the orders")]
    pub period: String,

    #[schemars(description = "Marketplace or storefront name")]
    pub platform: String,

    #[schemars(description = "Gross order value for the month on this platform")]
    pub order_value: f64,

    #[serde(default)]
    pub order_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BureauReport {
    #[schemars(description = "Commercial bureau score, 300-900")]
    pub score: u32,

    #[serde(default)]
    #[schemars(description = "Number of 30+ days-past-due events in the last 24 months")]
    pub dpd_30_count: u32,

    #[serde(default)]
    #[schemars(description = "Number of 90+ days-past-due events in the last 24 months")]
    pub dpd_90_count: u32,

    #[serde(default)]
    pub enquiries_last_6m: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DebtObligation {
    pub lender: String,

    pub product: String,

    #[schemars(description = "Sanctioned limit or original principal")]
    pub sanctioned_amount: f64,

    #[schemars(description = "Currently outstanding balance")]
    pub outstanding: f64,

    #[schemars(description = "Monthly instalment currently being serviced")]
    pub monthly_emi: f64,

    #[serde(default)]
    pub payments_due: u32,

    #[serde(default)]
    pub payments_on_time: u32,

    #[serde(default)]
    #[schemars(description = "True for revolving lines (overdraft, cash credit, cards)")]
    pub is_revolving: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CreditHistory {
    pub applications: u32,
    pub approvals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Transaction {
    pub id: String,

    #[schemars(description = "Transaction date in any common date format")]
    pub date: String,

    #[schemars(description = "Absolute transaction amount")]
    pub amount: f64,

    pub txn_type: TransactionType,

    #[schemars(description = "Standardised category (e.g. 'sales', 'inventory', 'payroll')")]
    pub category: String,

    pub payment_mode: PaymentMode,
}

/// The normalised per-entity input. Produced by an external cleaning step (or
/// by [`crate::ingestion::NormalizerRegistry`]) and never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FinancialProfile {
    #[schemars(description = "Stable identifier of the business entity")]
    pub entity_id: String,

    #[serde(default)]
    pub business_name: Option<String>,

    #[schemars(description = "One aggregate per calendar month. Required: at least one month.")]
    pub monthly: Vec<MonthlyAggregate>,

    #[serde(default)]
    pub bureau: Option<BureauReport>,

    #[serde(default)]
    pub tax_filings: Vec<TaxFiling>,

    #[serde(default)]
    pub marketplace_orders: Vec<MarketplaceOrderTotal>,

    #[serde(default)]
    pub debt_obligations: Vec<DebtObligation>,

    #[serde(default)]
    pub transactions: Vec<Transaction>,

    #[serde(default)]
    pub credit_history: Option<CreditHistory>,

    #[serde(default)]
    #[schemars(description = "Cash on hand at the end of the latest month; used as the runway starting point")]
    pub cash_balance: Option<f64>,
}

impl FinancialProfile {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(FinancialProfile)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_generation() {
        let schema_json = FinancialProfile::schema_as_json().unwrap();
        assert!(schema_json.contains("entity_id"));
        assert!(schema_json.contains("monthly"));
        assert!(schema_json.contains("tax_filings"));
        assert!(schema_json.contains("declared_turnover"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "entity_id": "biz-001",
            "monthly": [
                { "period": "2024-01", "total_inflow": 100000.0, "total_outflow": 80000.0 }
            ]
        }"#;

        let profile: FinancialProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.entity_id, "biz-001");
        assert_eq!(profile.monthly.len(), 1);
        assert!(profile.tax_filings.is_empty());
        assert!(profile.bureau.is_none());
        assert!(profile.monthly[0].category_breakdown.is_empty());
    }

    #[test]
    fn test_enum_representation() {
        let txn = Transaction {
            id: "t1".to_string(),
            date: "2024-01-05".to_string(),
            amount: 1200.0,
            txn_type: TransactionType::Credit,
            category: "sales".to_string(),
            payment_mode: PaymentMode::Upi,
        };
        let json = serde_json::to_string(&txn).unwrap();
        assert!(json.contains("\"Credit\""));
        assert!(json.contains("\"Upi\""));
    }
}
