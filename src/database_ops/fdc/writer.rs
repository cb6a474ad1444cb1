use std::ops::AddAssign;

use serde::Serialize;
use tracing::{debug, warn};

use super::normalize::ValidRecord;
use crate::database_ops::store::{CatalogStore, PageWriter};
use crate::error::{IngestError, IngestResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteCounts {
    pub foods_written: u64,
    /// Foods already present; insert ignored.
    pub foods_skipped: u64,
    pub nutrients_written: u64,
    pub links_written: u64,
    pub links_skipped: u64,
}

impl AddAssign for WriteCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.foods_written += rhs.foods_written;
        self.foods_skipped += rhs.foods_skipped;
        self.nutrients_written += rhs.nutrients_written;
        self.links_written += rhs.links_written;
        self.links_skipped += rhs.links_skipped;
    }
}

/// Write one page of records inside a single transaction.
///
/// The handle is acquired here and released before returning, whether the
/// page commits or not. Any failure rolls back the whole page.
pub async fn write_batch(
    store: &dyn CatalogStore,
    records: &[ValidRecord],
) -> IngestResult<WriteCounts> {
    if records.is_empty() {
        return Ok(WriteCounts::default());
    }

    let mut page = store.begin_page().await?;
    match write_records(page.as_mut(), records).await {
        Ok(counts) => {
            page.commit().await?;
            Ok(counts)
        }
        Err(err) => {
            if let Err(rollback_err) = page.rollback().await {
                warn!(error = %rollback_err, "rollback after failed page write also failed");
            }
            Err(err)
        }
    }
}

async fn write_records(
    page: &mut dyn PageWriter,
    records: &[ValidRecord],
) -> IngestResult<WriteCounts> {
    let mut counts = WriteCounts::default();

    for record in records {
        let food = &record.food;
        if page.insert_food(food).await? {
            counts.foods_written += 1;
        } else {
            counts.foods_skipped += 1;
        }
        let food_id = page
            .food_id(food.fdc_id)
            .await?
            .ok_or_else(|| IngestError::MissingRow {
                table: "food",
                key: food.fdc_id.to_string(),
            })?;

        if record.no_attributes {
            debug!(fdc_id = food.fdc_id, "food has no nutrients; no links written");
            continue;
        }

        for nutrient in &record.nutrients {
            if page.insert_nutrient(nutrient).await? {
                counts.nutrients_written += 1;
            }
            let nutrient_id =
                page.nutrient_id(&nutrient.number)
                    .await?
                    .ok_or_else(|| IngestError::MissingRow {
                        table: "nutrient",
                        key: nutrient.number.clone(),
                    })?;

            if page
                .insert_food_nutrient(
                    food_id,
                    nutrient_id,
                    nutrient.amount,
                    nutrient.unit_name.as_deref(),
                )
                .await?
            {
                counts.links_written += 1;
            } else {
                counts.links_skipped += 1;
            }
        }
    }

    Ok(counts)
}
