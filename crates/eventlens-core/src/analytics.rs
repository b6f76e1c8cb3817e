use polars::df;
use polars::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::normalize::{EVENT_TYPE, TIMESTAMP, USER_ID};

pub const EVENT_DATE: &str = "event_date";
pub const EVENT_COUNT: &str = "event_count";
pub const TOTAL_ACTIVE_USERS: &str = "total_active_users";

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

/// The three summary tables derived from the cleaned events.
#[derive(Debug, Clone)]
pub struct Analytics {
    pub daily_event_counts: DataFrame,
    pub total_active_users: DataFrame,
    pub most_active_user: DataFrame,
}

impl Analytics {
    pub fn active_user_count(&self) -> Result<i64, AnalyticsError> {
        Ok(self
            .total_active_users
            .column(TOTAL_ACTIVE_USERS)?
            .i64()?
            .get(0)
            .unwrap_or(0))
    }

    pub fn top_user(&self) -> Result<Option<(String, i64)>, AnalyticsError> {
        if self.most_active_user.height() == 0 {
            return Ok(None);
        }
        let user = self.most_active_user.column(USER_ID)?.str()?.get(0);
        let count = self.most_active_user.column(EVENT_COUNT)?.i64()?.get(0);
        Ok(user.zip(count).map(|(user, count)| (user.to_string(), count)))
    }
}

/// Expects `user_id`, `timestamp` (a `Datetime`) and `event_type` columns unless the frame is empty.
pub fn compute_analytics(events: &DataFrame) -> Result<Analytics, AnalyticsError> {
    let analytics = Analytics {
        daily_event_counts: daily_event_counts(events)?,
        total_active_users: total_active_users(events)?,
        most_active_user: most_active_user(events)?,
    };
    info!(
        daily_rows = analytics.daily_event_counts.height(),
        active_users = analytics.active_user_count()?,
        "computed analytics"
    );
    Ok(analytics)
}

/// Event counts per (UTC calendar date, event type), ordered by date ascending, count
/// descending, then event type so the ordering is total.
pub fn daily_event_counts(events: &DataFrame) -> Result<DataFrame, AnalyticsError> {
    if events.height() == 0 {
        return Ok(empty_frame(&[
            (EVENT_DATE, DataType::Date),
            (EVENT_TYPE, DataType::String),
            (EVENT_COUNT, DataType::Int64),
        ])?);
    }

    let counts = events
        .clone()
        .lazy()
        .filter(col(EVENT_TYPE).is_not_null())
        .with_column(col(TIMESTAMP).dt().date().alias(EVENT_DATE))
        .group_by([col(EVENT_DATE), col(EVENT_TYPE)])
        .agg([len().cast(DataType::Int64).alias(EVENT_COUNT)])
        .sort(
            [EVENT_DATE, EVENT_COUNT, EVENT_TYPE],
            SortMultipleOptions::default().with_order_descending_multi([false, true, false]),
        )
        .collect()?;

    Ok(counts)
}

/// A single-row frame holding the number of distinct users.
pub fn total_active_users(events: &DataFrame) -> Result<DataFrame, AnalyticsError> {
    let count = if events.height() == 0 {
        0
    } else {
        events
            .column(USER_ID)?
            .as_materialized_series()
            .drop_nulls()
            .n_unique()?
    };

    Ok(df![TOTAL_ACTIVE_USERS => [count as i64]]?)
}

/// The user with the most events; equal counts go to the lexicographically smallest id.
pub fn most_active_user(events: &DataFrame) -> Result<DataFrame, AnalyticsError> {
    if events.height() == 0 {
        return Ok(empty_frame(&[
            (USER_ID, DataType::String),
            (EVENT_COUNT, DataType::Int64),
        ])?);
    }

    let top = events
        .clone()
        .lazy()
        .filter(col(USER_ID).is_not_null())
        .group_by([col(USER_ID)])
        .agg([len().cast(DataType::Int64).alias(EVENT_COUNT)])
        .sort(
            [EVENT_COUNT, USER_ID],
            SortMultipleOptions::default().with_order_descending_multi([true, false]),
        )
        .limit(1)
        .collect()?;

    Ok(top)
}

fn empty_frame(schema: &[(&str, DataType)]) -> PolarsResult<DataFrame> {
    let columns = schema
        .iter()
        .map(|(name, dtype)| Series::new_empty((*name).into(), dtype).into())
        .collect::<Vec<Column>>();
    DataFrame::new(columns)
}
