//! # Analytics
//!
//! Pure aggregation over the cached catalog and sale buckets.
//!
//! ## Recompute, Don't Maintain
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  cache snapshot (Arc<[SaleRecord]>, Arc<[Product]>)                     │
//! │        │                                                                │
//! │        ├──► today_revenue      Σ saleQuantity × price                   │
//! │        ├──► items_sold_today   Σ saleQuantity                           │
//! │        ├──► low_stock_items    quantity ≤ 5                             │
//! │        ├──► top_products       group by barcode, revenue desc, take n   │
//! │        └──► daily_series       trailing days, zero-filled               │
//! │                                                                         │
//! │  Every read recomputes from the latest snapshot. Nothing here keeps     │
//! │  state between calls, so a new snapshot can never disagree with a       │
//! │  stale running total.                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{Product, SaleRecord, StoreProfile};
use crate::validation::validate_search_query;

// =============================================================================
// Result Types
// =============================================================================

/// One row of the "top products" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TopProduct {
    pub barcode: String,
    pub name: String,
    pub quantity: i64,
    pub revenue: Money,
}

/// Revenue for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DailyRevenue {
    #[ts(as = "String")]
    pub date: NaiveDate,
    pub revenue: Money,
}

// =============================================================================
// Today
// =============================================================================

/// Σ (saleQuantity × price) over the given sales.
pub fn today_revenue(sales: &[SaleRecord]) -> Money {
    sales.iter().map(SaleRecord::line_total).sum()
}

/// Σ saleQuantity over the given sales.
pub fn items_sold_today(sales: &[SaleRecord]) -> i64 {
    sales.iter().map(|sale| sale.sale_quantity).sum()
}

/// Products at or below the low-stock threshold, in catalog order.
pub fn low_stock_items(catalog: &[Product]) -> Vec<&Product> {
    catalog.iter().filter(|p| p.is_low_stock()).collect()
}

/// Best sellers by revenue.
///
/// Sales are grouped by barcode in first-seen order; the name comes from the
/// first sale of each barcode. The sort is stable, so equal revenues keep
/// that order.
///
/// ## Example
/// ```text
/// [A qty 2 @10, B qty 1 @50, A qty 1 @10]  →  [B 50, A 30]
/// ```
pub fn top_products(sales: &[SaleRecord], n: usize) -> Vec<TopProduct> {
    let mut order: Vec<TopProduct> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for sale in sales {
        match index.get(sale.barcode.as_str()) {
            Some(&i) => {
                order[i].quantity += sale.sale_quantity;
                order[i].revenue += sale.line_total();
            }
            None => {
                index.insert(sale.barcode.as_str(), order.len());
                order.push(TopProduct {
                    barcode: sale.barcode.clone(),
                    name: sale.name.clone(),
                    quantity: sale.sale_quantity,
                    revenue: sale.line_total(),
                });
            }
        }
    }

    // sort_by is stable
    order.sort_by(|a, b| b.revenue.cmp(&a.revenue));
    order.truncate(n);
    order
}

// =============================================================================
// Multi-day
// =============================================================================

/// The trailing `days` calendar dates ending at `today`, oldest first.
pub fn trailing_days(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days)
        .rev()
        .map(|back| today - Duration::days(i64::from(back)))
        .collect()
}

/// Revenue per day over the trailing window.
///
/// `buckets` holds whatever day buckets the caller has loaded. Days without
/// a bucket count as zero, so a caller that only has today's bucket gets a
/// series that is zero everywhere else.
pub fn daily_series(
    days: u32,
    today: NaiveDate,
    buckets: &BTreeMap<NaiveDate, Vec<SaleRecord>>,
) -> Vec<DailyRevenue> {
    trailing_days(today, days)
        .into_iter()
        .map(|date| DailyRevenue {
            date,
            revenue: buckets
                .get(&date)
                .map(|sales| today_revenue(sales))
                .unwrap_or_default(),
        })
        .collect()
}

/// Total revenue across a series.
pub fn period_revenue(series: &[DailyRevenue]) -> Money {
    series.iter().map(|day| day.revenue).sum()
}

// =============================================================================
// Catalog Filter
// =============================================================================

/// Stock page filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Lowercased search term matched against name and barcode.
    query: String,
    pub low_stock_only: bool,
    /// Only products written within the last 24 hours.
    pub recently_updated: bool,
}

impl CatalogFilter {
    pub fn search(query: &str) -> Result<Self, ValidationError> {
        Ok(CatalogFilter {
            query: validate_search_query(query)?,
            ..CatalogFilter::default()
        })
    }

    pub fn low_stock(mut self) -> Self {
        self.low_stock_only = true;
        self
    }

    pub fn recent(mut self) -> Self {
        self.recently_updated = true;
        self
    }

    /// Products without a timestamp are kept by the recency filter.
    pub fn matches(&self, product: &Product, now: DateTime<Utc>) -> bool {
        let matches_search = self.query.is_empty()
            || product.name.to_lowercase().contains(&self.query)
            || product.barcode.to_lowercase().contains(&self.query);

        if !matches_search {
            return false;
        }

        if self.low_stock_only && !product.is_low_stock() {
            return false;
        }

        if self.recently_updated {
            if let Some(updated_at) = product.updated_at {
                if updated_at < now - Duration::days(1) {
                    return false;
                }
            }
        }

        true
    }
}

pub fn filter_catalog<'a>(
    catalog: &'a [Product],
    filter: &CatalogFilter,
    now: DateTime<Utc>,
) -> Vec<&'a Product> {
    catalog.iter().filter(|p| filter.matches(p, now)).collect()
}

// =============================================================================
// Receipt
// =============================================================================

/// Plain-text receipt for sharing through a messaging app.
///
/// Returns `None` for an empty receipt.
///
/// ```text
/// *RECEIPT*
/// Corner Shop
///
/// 1. Cola
///    2 x $1.50 = $3.00
///
/// -----------------------
/// *TOTAL: $3.00*
///
/// Date: 2024-03-09 10:30 UTC
/// Thank you for your purchase!
/// ```
pub fn format_receipt(
    store: &StoreProfile,
    sales: &[SaleRecord],
    at: DateTime<Utc>,
) -> Option<String> {
    if sales.is_empty() {
        return None;
    }

    let mut text = String::from("*RECEIPT*\n");
    if !store.name.trim().is_empty() {
        text.push_str(store.name.trim());
        text.push('\n');
    }
    text.push('\n');

    // writing to a String cannot fail
    for (i, sale) in sales.iter().enumerate() {
        let _ = writeln!(text, "{}. {}", i + 1, sale.name);
        let _ = writeln!(
            text,
            "   {} x {} = {}",
            sale.sale_quantity,
            sale.price(),
            sale.line_total()
        );
    }

    text.push_str("\n-----------------------\n");
    let _ = writeln!(text, "*TOTAL: {}*\n", today_revenue(sales));
    let _ = writeln!(text, "Date: {}", at.format("%Y-%m-%d %H:%M UTC"));
    text.push_str("Thank you for your purchase!");

    Some(text)
}

// =============================================================================
// Unit Tests
// =============================================================================
