//! Persisted state of ratings and series.
//!
//! Records are plain serde types; converting a record back into a rating
//! runs the same validation as building the rating in code.

use super::context::RatingContext;
use super::ids::{RatingSpecId, UnitsId};
use super::metadata::RatingMetadata;
use super::method::RatingMethodSet;
use super::set_data_units;
use crate::error::{RatingError, RatingResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed rating record: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Rating(#[from] RatingError),
}

fn default_active() -> bool {
    true
}

/// One table row: the independent values, outermost first, then the
/// dependent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub office_id: String,
    pub spec_id: RatingSpecId,
    pub units_id: UnitsId,
    pub effective_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_start_date: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_units: Option<Vec<String>>,
}

impl From<&RatingMetadata> for MetadataRecord {
    fn from(meta: &RatingMetadata) -> Self {
        Self {
            office_id: meta.office_id.clone(),
            spec_id: meta.spec_id.clone(),
            units_id: meta.units_id.clone(),
            effective_date: meta.effective_date,
            create_date: meta.create_date,
            transition_start_date: meta.transition_start_date,
            active: meta.active,
            description: meta.description.clone(),
            data_units: meta.data_units.clone(),
        }
    }
}

impl MetadataRecord {
    pub fn into_metadata(self, ctx: &RatingContext) -> RatingResult<RatingMetadata> {
        let mut meta = RatingMetadata::new(self.office_id, self.spec_id, self.units_id, self.effective_date)?;
        meta.create_date = self.create_date;
        meta.transition_start_date = self.transition_start_date;
        meta.active = self.active;
        meta.description = self.description;
        set_data_units(&mut meta, ctx, self.data_units)?;
        Ok(meta)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    #[serde(flatten)]
    pub meta: MetadataRecord,
    /// One method set per independent parameter, outermost first.
    pub methods: Vec<RatingMethodSet>,
    pub points: Vec<PointRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_points: Vec<PointRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftRecord {
    pub effective_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    /// `[stage, shift]` rows.
    pub points: Vec<PointRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsgsRecord {
    #[serde(flatten)]
    pub meta: MetadataRecord,
    pub methods: RatingMethodSet,
    pub points: Vec<PointRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension_points: Vec<PointRecord>,
    #[serde(default)]
    pub shifts: Vec<ShiftRecord>,
    /// `[stage, offset]` rows for logarithmic interpolation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offsets: Vec<PointRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionRecord {
    #[serde(flatten)]
    pub meta: MetadataRecord,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceRatingRecord {
    Series {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        units: Option<Vec<String>>,
        series: SeriesRecord,
    },
    Expression {
        expression: String,
        units: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualRecord {
    #[serde(flatten)]
    pub meta: MetadataRecord,
    pub connections: String,
    pub sources: Vec<SourceRatingRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionalRecord {
    #[serde(flatten)]
    pub meta: MetadataRecord,
    #[serde(default)]
    pub conditions: Vec<String>,
    pub evaluations: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceRatingRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RatingRecord {
    Table(TableRecord),
    Usgs(UsgsRecord),
    Expression(ExpressionRecord),
    Virtual(VirtualRecord),
    Transitional(TransitionalRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub office_id: String,
    pub spec_id: RatingSpecId,
    pub units_id: UnitsId,
    #[serde(default = "RatingMethodSet::series_default")]
    pub methods: RatingMethodSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_units: Option<Vec<String>>,
    pub ratings: Vec<RatingRecord>,
}

impl SeriesRecord {
    pub fn from_json(text: &str) -> Result<Self, RecordError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, RecordError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::method::RatingMethod;
    use crate::ratings::series::RatingSeries;
    use crate::ratings::Rate;
    use chrono::TimeZone;

    const SERIES_JSON: &str = r#"{
        "office_id": "SWT",
        "spec_id": "COLU.Stage;Flow.Linear.Production",
        "units_id": "ft;cfs",
        "ratings": [
            {
                "kind": "table",
                "office_id": "SWT",
                "spec_id": "COLU.Stage;Flow.Linear.Production",
                "units_id": "ft;cfs",
                "effective_date": "2020-01-01T00:00:00Z",
                "methods": [{"in_range": "LINEAR", "out_range_low": "NULL", "out_range_high": "LINEAR"}],
                "points": [{"values": [0.0, 0.0]}, {"values": [10.0, 100.0], "note": "bankfull"}]
            },
            {
                "kind": "expression",
                "office_id": "SWT",
                "spec_id": "COLU.Stage;Flow.Linear.Production",
                "units_id": "ft;cfs",
                "effective_date": "2021-01-01T00:00:00Z",
                "active": false,
                "expression": "20 * I1"
            }
        ]
    }"#;

    #[test]
    fn parses_a_series_document() {
        let record = SeriesRecord::from_json(SERIES_JSON).expect("valid json");
        assert_eq!(record.methods, RatingMethodSet::series_default());
        assert_eq!(record.ratings.len(), 2);
        match &record.ratings[0] {
            RatingRecord::Table(table) => {
                assert!(table.meta.active);
                assert_eq!(table.methods[0].out_range_low, RatingMethod::Null);
                assert_eq!(table.points[1].note.as_deref(), Some("bankfull"));
            }
            other => panic!("expected table record, got {other:?}"),
        }

        let series = RatingSeries::from_record(record, &RatingContext::standard()).expect("valid series");
        let at = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).single().expect("valid date");
        assert_eq!(series.rate(at, &[5.0]).expect("rates"), 50.0);
    }

    #[test]
    fn series_survive_a_json_round_trip() {
        let ctx = RatingContext::standard();
        let record = SeriesRecord::from_json(SERIES_JSON).expect("valid json");
        let series = RatingSeries::from_record(record, &ctx).expect("valid series");
        let json = series.to_record().to_json().expect("serializes");
        let restored = RatingSeries::from_record(SeriesRecord::from_json(&json).expect("parses"), &ctx)
            .expect("valid series");
        assert_eq!(restored.to_record(), series.to_record());
    }

    #[test]
    fn invalid_records_fail_validation() {
        let broken = SERIES_JSON.replace("[10.0, 100.0]", "[0.0, 100.0]");
        let record = SeriesRecord::from_json(&broken).expect("valid json");
        match RatingSeries::from_record(record, &RatingContext::standard()) {
            Err(RatingError::Configuration(_)) => {}
            other => panic!("expected configuration error, got {other:?}"),
        }
        match SeriesRecord::from_json("{\"office_id\": 3}") {
            Err(RecordError::Json(_)) => {}
            other => panic!("expected json error, got {other:?}"),
        }
    }
}
