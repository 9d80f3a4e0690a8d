//! Sales (CRM deals) attached to customers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{CustomerId, DealId, OwnerId, StageId};
use super::status::DealStatus;

/// One CRM deal, keyed by its deal id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub deal_id: DealId,
    pub customer_id: CustomerId,
    pub owner_id: Option<OwnerId>,
    pub stage_id: Option<StageId>,
    pub title: Option<String>,
    pub deal_value: Decimal,
    pub status: DealStatus,
    pub deal_created_at: Option<DateTime<Utc>>,
    pub deal_updated_at: Option<DateTime<Utc>>,
}

/// Totals over a customer's sales history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalesSummary {
    pub deals: usize,
    pub won: usize,
    pub total_value: Decimal,
    pub won_value: Decimal,
}

impl SalesSummary {
    #[must_use]
    pub fn from_sales(sales: &[Sale]) -> Self {
        sales.iter().fold(Self::default(), |mut acc, sale| {
            acc.deals += 1;
            acc.total_value += sale.deal_value;
            if sale.status == DealStatus::Won {
                acc.won += 1;
                acc.won_value += sale.deal_value;
            }
            acc
        })
    }
}
