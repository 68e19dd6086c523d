use super::ids::{RatingSpecId, UnitsId};
use crate::error::{RatingError, RatingResult};
use chrono::{DateTime, Utc};

/// Identity shared by every rating variant.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingMetadata {
    pub office_id: String,
    pub spec_id: RatingSpecId,
    pub units_id: UnitsId,
    pub effective_date: DateTime<Utc>,
    pub create_date: Option<DateTime<Utc>>,
    pub transition_start_date: Option<DateTime<Utc>>,
    pub active: bool,
    pub description: Option<String>,
    /// Units callers supply and receive values in, when they differ from the rating units.
    pub data_units: Option<Vec<String>>,
}

impl RatingMetadata {
    pub fn new(
        office_id: impl Into<String>,
        spec_id: RatingSpecId,
        units_id: UnitsId,
        effective_date: DateTime<Utc>,
    ) -> RatingResult<Self> {
        let office_id = office_id.into();
        if office_id.trim().is_empty() {
            return Err(RatingError::configuration("office id must not be empty"));
        }
        if units_id.ind_param_count() != spec_id.ind_param_count() {
            return Err(RatingError::configuration(format!(
                "units id \"{units_id}\" has {} independent unit(s) but spec \"{spec_id}\" has {} independent parameter(s)",
                units_id.ind_param_count(),
                spec_id.ind_param_count()
            )));
        }

        Ok(Self {
            office_id,
            spec_id,
            units_id,
            effective_date,
            create_date: None,
            transition_start_date: None,
            active: true,
            description: None,
            data_units: None,
        })
    }

    /// Parses both identifiers before building the metadata.
    pub fn parse(
        office_id: impl Into<String>,
        spec_id: &str,
        units_id: &str,
        effective_date: DateTime<Utc>,
    ) -> RatingResult<Self> {
        Self::new(office_id, spec_id.parse()?, units_id.parse()?, effective_date)
    }

    pub fn with_create_date(mut self, create_date: DateTime<Utc>) -> Self {
        self.create_date = Some(create_date);
        self
    }

    pub fn with_transition_start_date(mut self, start: DateTime<Utc>) -> Self {
        self.transition_start_date = Some(start);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn ind_param_count(&self) -> usize {
        self.spec_id.ind_param_count()
    }

    /// `office/spec-id`, the identity used for cycle detection.
    pub fn key(&self) -> String {
        format!("{}/{}", self.office_id, self.spec_id)
    }

    /// Units in parameter order with the dependent unit last.
    pub fn rating_units(&self) -> Vec<String> {
        self.units_id.all()
    }

    /// Units values are exchanged in: the data units if set, else the rating units.
    pub fn data_units(&self) -> Vec<String> {
        self.data_units
            .clone()
            .unwrap_or_else(|| self.rating_units())
    }

    /// Whether the rating belongs in an active view cut off at `rating_time`.
    /// A missing create date counts as created at the beginning of time.
    pub fn is_active_at(&self, rating_time: Option<DateTime<Utc>>) -> bool {
        if !self.active {
            return false;
        }
        match (rating_time, self.create_date) {
            (Some(cutoff), Some(created)) => created <= cutoff,
            _ => true,
        }
    }
}
