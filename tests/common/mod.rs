#![allow(dead_code)]

use credit_decisioning_engine::*;
use std::collections::BTreeMap;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn period(index: usize) -> String {
    format!("{:04}-{:02}", 2021 + index / 12, index % 12 + 1)
}

pub fn monthly(inflows: &[f64], outflows: &[f64]) -> Vec<MonthlyAggregate> {
    inflows
        .iter()
        .zip(outflows)
        .enumerate()
        .map(|(i, (inflow, outflow))| MonthlyAggregate {
            period: period(i),
            total_inflow: *inflow,
            total_outflow: *outflow,
            category_breakdown: BTreeMap::new(),
        })
        .collect()
}

pub fn bare_profile(entity_id: &str, inflows: &[f64], outflows: &[f64]) -> FinancialProfile {
    FinancialProfile {
        entity_id: entity_id.to_string(),
        business_name: None,
        monthly: monthly(inflows, outflows),
        bureau: None,
        tax_filings: vec![],
        marketplace_orders: vec![],
        debt_obligations: vec![],
        transactions: vec![],
        credit_history: None,
        cash_balance: None,
    }
}

pub fn filing(id: &str, period: &str, return_type: &str, amount: f64, revision: u32) -> TaxFiling {
    TaxFiling {
        filing_id: id.to_string(),
        period: period.to_string(),
        return_type: return_type.to_string(),
        declared_turnover: amount,
        revision,
        filed_on: None,
    }
}

/// A steadily growing, well-documented business with light, well-serviced debt.
pub fn healthy_profile(entity_id: &str) -> FinancialProfile {
    let inflows: Vec<f64> = (0..36).map(|i| 1_000_000.0 + 10_000.0 * i as f64).collect();
    let outflows = vec![700_000.0; 36];
    let mut profile = bare_profile(entity_id, &inflows, &outflows);

    profile.business_name = Some("Healthy Traders".to_string());
    profile.tax_filings = inflows
        .iter()
        .enumerate()
        .map(|(i, v)| filing(&format!("gst-{}", i), &period(i), "GSTR-3B", *v, 0))
        .collect();
    profile.bureau = Some(BureauReport {
        score: 780,
        dpd_30_count: 0,
        dpd_90_count: 0,
        enquiries_last_6m: 1,
    });
    profile.debt_obligations = vec![
        DebtObligation {
            lender: "Bank A".to_string(),
            product: "cash credit".to_string(),
            sanctioned_amount: 1_000_000.0,
            outstanding: 300_000.0,
            monthly_emi: 0.0,
            payments_due: 12,
            payments_on_time: 12,
            is_revolving: true,
        },
        DebtObligation {
            lender: "Bank B".to_string(),
            product: "term loan".to_string(),
            sanctioned_amount: 1_500_000.0,
            outstanding: 900_000.0,
            monthly_emi: 50_000.0,
            payments_due: 24,
            payments_on_time: 24,
            is_revolving: false,
        },
    ];
    profile.credit_history = Some(CreditHistory {
        applications: 2,
        approvals: 2,
    });
    profile.cash_balance = Some(1_500_000.0);
    profile
}

/// Bank entries for `months` months, enough for the learned transaction layer.
pub fn transactions(months: usize) -> Vec<Transaction> {
    (0..months)
        .flat_map(|m| {
            (0..3).map(move |k| Transaction {
                id: format!("txn-{}-{}", m, k),
                date: format!("{}-{:02}", period(m), 5 + 7 * k),
                amount: 100_000.0 + 1_000.0 * ((m * 3 + k) % 7) as f64,
                txn_type: TransactionType::Credit,
                category: "sales".to_string(),
                payment_mode: PaymentMode::Neft,
            })
        })
        .collect()
}
