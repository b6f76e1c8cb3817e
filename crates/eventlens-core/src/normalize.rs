use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use polars::prelude::{Column, DataFrame, DataType, NamedFrom, PolarsResult, Series, TimeUnit};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::extract::ValidEvent;

pub const USER_ID: &str = "user_id";
pub const TIMESTAMP: &str = "timestamp";
pub const EVENT_TYPE: &str = "event_type";
pub const METADATA_AMOUNT: &str = "metadata_amount";

const FLATTEN_SEPARATOR: &str = "_";

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
];

const NAIVE_FORMATS: [&str; 7] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%MZ",
    "%Y-%m-%d %H:%MZ",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// A flattened attribute value. `Null` is the "no value" marker.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(flag) => FieldValue::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => FieldValue::Int(int),
                None => number
                    .as_f64()
                    .map(FieldValue::Float)
                    .unwrap_or(FieldValue::Null),
            },
            Value::String(text) => FieldValue::Text(text.clone()),
            // Arrays (and objects reaching here) are kept as their JSON text.
            other => FieldValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(int) => Some(*int as f64),
            FieldValue::Float(float) => Some(*float),
            _ => None,
        }
    }

    fn render(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Bool(flag) => Some(flag.to_string()),
            FieldValue::Int(int) => Some(int.to_string()),
            FieldValue::Float(float) => Some(float.to_string()),
            FieldValue::Text(text) => Some(text.clone()),
        }
    }
}

/// One cleaned event. The fixed columns are always populated; everything else
/// lives in `attributes`, keyed by its flattened column name.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub attributes: BTreeMap<String, FieldValue>,
}

impl NormalizedRow {
    /// Missing and explicitly-null attributes both read as [`FieldValue::Null`].
    pub fn attribute(&self, column: &str) -> &FieldValue {
        self.attributes.get(column).unwrap_or(&FieldValue::Null)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    rows: Vec<NormalizedRow>,
    attribute_columns: BTreeSet<String>,
}

impl EventTable {
    pub fn rows(&self) -> &[NormalizedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Fixed columns first, then the union of flattened attribute columns in name order.
    pub fn columns(&self) -> Vec<&str> {
        [USER_ID, TIMESTAMP, EVENT_TYPE]
            .into_iter()
            .chain(self.attribute_columns.iter().map(String::as_str))
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        matches!(name, USER_ID | TIMESTAMP | EVENT_TYPE) || self.attribute_columns.contains(name)
    }

    /// Builds the polars frame written to `cleaned_events.parquet` and fed to the aggregator.
    /// `timestamp` becomes a microsecond `Datetime` in UTC.
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns: Vec<Column> = Vec::with_capacity(3 + self.attribute_columns.len());

        let user_ids: Vec<&str> = self.rows.iter().map(|row| row.user_id.as_str()).collect();
        columns.push(Series::new(USER_ID.into(), user_ids).into());

        let micros: Vec<i64> = self
            .rows
            .iter()
            .map(|row| row.timestamp.timestamp_micros())
            .collect();
        let timestamps = Series::new(TIMESTAMP.into(), micros).cast(&DataType::Datetime(
            TimeUnit::Microseconds,
            Some(polars::prelude::TimeZone::UTC),
        ))?;
        columns.push(timestamps.into());

        let event_types: Vec<&str> = self.rows.iter().map(|row| row.event_type.as_str()).collect();
        columns.push(Series::new(EVENT_TYPE.into(), event_types).into());

        for name in &self.attribute_columns {
            columns.push(self.attribute_series(name)?.into());
        }

        DataFrame::new(columns)
    }

    fn attribute_series(&self, name: &str) -> PolarsResult<Series> {
        let values: Vec<&FieldValue> = self.rows.iter().map(|row| row.attribute(name)).collect();

        let series = match column_kind(&values) {
            ColumnKind::Bool => {
                let data: Vec<Option<bool>> = values
                    .iter()
                    .map(|value| match value {
                        FieldValue::Bool(flag) => Some(*flag),
                        _ => None,
                    })
                    .collect();
                Series::new(name.into(), data)
            }
            ColumnKind::Int => {
                let data: Vec<Option<i64>> = values
                    .iter()
                    .map(|value| match value {
                        FieldValue::Int(int) => Some(*int),
                        _ => None,
                    })
                    .collect();
                Series::new(name.into(), data)
            }
            ColumnKind::Float => {
                let data: Vec<Option<f64>> = values.iter().map(|value| value.as_f64()).collect();
                Series::new(name.into(), data)
            }
            ColumnKind::Text => {
                let rendered: Vec<Option<String>> =
                    values.iter().map(|value| value.render()).collect();
                Series::new(
                    name.into(),
                    rendered
                        .iter()
                        .map(|opt| opt.as_deref())
                        .collect::<Vec<Option<&str>>>(),
                )
            }
        };

        if name == METADATA_AMOUNT && series.dtype() != &DataType::Float64 {
            return series.cast(&DataType::Float64);
        }
        Ok(series)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int,
    Float,
    Text,
}

/// Narrowest column type that holds every non-null value; mixed kinds fall back to text.
fn column_kind(values: &[&FieldValue]) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for value in values {
        let next = match value {
            FieldValue::Null => continue,
            FieldValue::Bool(_) => ColumnKind::Bool,
            FieldValue::Int(_) => ColumnKind::Int,
            FieldValue::Float(_) => ColumnKind::Float,
            FieldValue::Text(_) => ColumnKind::Text,
        };
        kind = Some(match (kind, next) {
            (None, next) => next,
            (Some(current), next) if current == next => current,
            (Some(ColumnKind::Int), ColumnKind::Float)
            | (Some(ColumnKind::Float), ColumnKind::Int) => ColumnKind::Float,
            _ => return ColumnKind::Text,
        });
    }
    kind.unwrap_or(ColumnKind::Text)
}

/// Flattens, coerces and filters validated events into an [`EventTable`].
///
/// Rows whose `timestamp` is not a parseable ISO-8601 string are dropped without a report;
/// an unparseable `metadata_amount` only loses that field.
pub fn normalize_events(events: Vec<ValidEvent>) -> EventTable {
    let input = events.len();
    let mut table = EventTable::default();

    for event in events {
        let Some(row) = normalize_event(event.into_fields()) else {
            continue;
        };
        table
            .attribute_columns
            .extend(row.attributes.keys().cloned());
        table.rows.push(row);
    }

    let dropped = input - table.rows.len();
    if dropped > 0 {
        debug!(dropped, "dropped events with unparseable timestamps");
    }
    info!(
        rows = table.rows.len(),
        columns = table.columns().len(),
        "normalized events"
    );
    table
}

fn normalize_event(mut fields: Map<String, Value>) -> Option<NormalizedRow> {
    let timestamp = fields
        .remove(TIMESTAMP)
        .as_ref()
        .and_then(Value::as_str)
        .and_then(parse_timestamp)?;
    let user_id = fields.remove(USER_ID).map(scalar_text).unwrap_or_default();
    let event_type = fields.remove(EVENT_TYPE).map(scalar_text).unwrap_or_default();

    let mut attributes = BTreeMap::new();
    for (key, value) in &fields {
        flatten_into(key, value, &user_id, &mut attributes);
    }

    if let Some(amount) = attributes.get_mut(METADATA_AMOUNT) {
        *amount = coerce_float(amount);
    }

    Some(NormalizedRow {
        user_id,
        timestamp,
        event_type,
        attributes,
    })
}

/// When two paths flatten to the same column the first one visited wins. Names that
/// shadow a fixed column are never emitted.
fn flatten_into(
    prefix: &str,
    value: &Value,
    user_id: &str,
    out: &mut BTreeMap<String, FieldValue>,
) {
    match value {
        Value::Object(children) => {
            for (key, child) in children {
                let name = format!("{prefix}{FLATTEN_SEPARATOR}{key}");
                flatten_into(&name, child, user_id, out);
            }
        }
        leaf => {
            if matches!(prefix, USER_ID | TIMESTAMP | EVENT_TYPE) {
                warn!(user_id, column = prefix, "skipping attribute that shadows a fixed column");
                return;
            }
            match out.entry(prefix.to_string()) {
                Entry::Vacant(slot) => {
                    slot.insert(FieldValue::from_json(leaf));
                }
                Entry::Occupied(_) => {
                    warn!(user_id, column = prefix, "skipping duplicate flattened attribute");
                }
            }
        }
    }
}

fn scalar_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Best-effort float conversion; anything that does not read as a number becomes `Null`.
pub fn coerce_float(value: &FieldValue) -> FieldValue {
    let parsed = match value {
        FieldValue::Null => None,
        FieldValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        FieldValue::Int(int) => Some(*int as f64),
        FieldValue::Float(float) => Some(*float),
        FieldValue::Text(text) => text.trim().parse::<f64>().ok(),
    };
    match parsed {
        Some(float) if !float.is_nan() => FieldValue::Float(float),
        _ => FieldValue::Null,
    }
}

/// Parses an ISO-8601 date-time (or bare date) into UTC. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }

    // Hour-only values such as `2025-03-01T10`.
    if let Ok(parsed) = NaiveDateTime::parse_from_str(&format!("{raw}:00"), "%Y-%m-%dT%H:%M") {
        return Some(parsed.and_utc());
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_common_iso_shapes() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-01-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T12:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01 10:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T10:00:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T10:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T12:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T10"), Some(expected));
        assert_eq!(
            parse_timestamp("2025-01-01"),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn rejects_garbage_timestamps() {
        assert_eq!(parse_timestamp("invalid-date"), None);
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("2025-13-40T10:00:00Z"), None);
    }

    #[test]
    fn float_coercion() {
        assert_eq!(
            coerce_float(&FieldValue::Text("10.50".into())),
            FieldValue::Float(10.5)
        );
        assert_eq!(coerce_float(&FieldValue::Int(3)), FieldValue::Float(3.0));
        assert_eq!(
            coerce_float(&FieldValue::Text("not_a_number".into())),
            FieldValue::Null
        );
        assert_eq!(coerce_float(&FieldValue::Text("NaN".into())), FieldValue::Null);
    }

    #[test]
    fn mixed_columns_fall_back_to_text() {
        let int = FieldValue::Int(1);
        let float = FieldValue::Float(2.5);
        let text = FieldValue::Text("x".into());
        let null = FieldValue::Null;
        assert_eq!(column_kind(&[&int, &null, &float]), ColumnKind::Float);
        assert_eq!(column_kind(&[&int, &text]), ColumnKind::Text);
        assert_eq!(column_kind(&[&null]), ColumnKind::Text);
    }
}
