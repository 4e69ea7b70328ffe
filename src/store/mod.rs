//! Order store: persisted order history, scanned symbols and fetch cursors

pub mod cache;
pub mod memory;
pub mod sqlite;

pub use cache::{CandidateList, GroupKey, OrderCache};
pub use memory::InMemoryOrderStore;
pub use sqlite::SqliteOrderStore;

use chrono::{FixedOffset, NaiveDate};

use crate::common::errors::{ReconcileError, Result};
use crate::common::traits::OrderStore;

/// Load one trader's orders grouped by (symbol, position side), each group
/// ascending by creation time
pub async fn load_grouped<S: OrderStore + ?Sized>(store: &S, trader: &str) -> Result<OrderCache> {
    let orders = store.query_orders(trader).await?;
    Ok(OrderCache::from_orders(orders))
}

/// Epoch-millisecond bounds `[start, end]` of one calendar day at a fixed
/// UTC offset
pub fn day_range_ms(date: NaiveDate, offset_hours: i32) -> Result<(i64, i64)> {
    let offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
        ReconcileError::Configuration(format!("invalid UTC offset: {}", offset_hours))
    })?;
    let start = date
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(offset).single())
        .ok_or_else(|| ReconcileError::Internal(format!("no start of day for {}", date)))?
        .timestamp_millis();
    Ok((start, start + 24 * 60 * 60 * 1000 - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_range_in_utc_plus_eight() {
        let date = NaiveDate::from_ymd_opt(2025, 11, 9).unwrap();
        let (start, end) = day_range_ms(date, 8).unwrap();
        // 2025-11-08 16:00:00 UTC
        assert_eq!(start, 1_762_617_600_000);
        assert_eq!(end - start, 86_399_999);
        assert!(day_range_ms(date, 30).is_err());
    }
}
