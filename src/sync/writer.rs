//! Availability writer
//!
//! Merges scraped rows into the store keyed by `(property_id, date)`.

use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::database::Database;
use crate::error::DbError;
use crate::models::{dedup_rows, AvailabilityRow, Platform};

/// Idempotent upsert of scraped calendar rows
#[derive(Clone)]
pub struct AvailabilityWriter {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl AvailabilityWriter {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Upsert rows for a property in one transaction
    ///
    /// Duplicate dates collapse to the last occurrence. Stored dates absent
    /// from `rows` are kept. Returns the number of rows written.
    pub async fn write(
        &self,
        property_id: i64,
        platform: Platform,
        rows: Vec<AvailabilityRow>,
    ) -> Result<u64, DbError> {
        let rows = dedup_rows(rows);
        if rows.is_empty() {
            return Ok(0);
        }

        let written = self
            .db
            .upsert_availability(property_id, platform, &rows, self.clock.now())
            .await?;

        debug!(
            property_id = property_id,
            platform = %platform,
            rows = written,
            "Availability written"
        );
        Ok(written)
    }
}
