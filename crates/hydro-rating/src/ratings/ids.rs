use crate::error::{RatingError, RatingResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parameter list shared by spec and units identifiers: `ind1,ind2;dep`.
fn split_parameters(text: &str, what: &str) -> RatingResult<(Vec<String>, String)> {
    let mut halves = text.split(';');
    let (Some(independent), Some(dependent), None) = (halves.next(), halves.next(), halves.next())
    else {
        return Err(RatingError::configuration(format!(
            "{what} \"{text}\" must contain exactly one ';'"
        )));
    };

    let independent: Vec<String> = independent.split(',').map(|p| p.trim().to_string()).collect();
    if independent.iter().any(String::is_empty) || dependent.trim().is_empty() {
        return Err(RatingError::configuration(format!(
            "{what} \"{text}\" has an empty parameter"
        )));
    }

    Ok((independent, dependent.trim().to_string()))
}

/// Rating specification identifier: `location.ind1,ind2;dep.template-version.spec-version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RatingSpecId {
    location: String,
    independent: Vec<String>,
    dependent: String,
    template_version: String,
    version: String,
}

impl RatingSpecId {
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn independent_parameters(&self) -> &[String] {
        &self.independent
    }

    pub fn dependent_parameter(&self) -> &str {
        &self.dependent
    }

    pub fn ind_param_count(&self) -> usize {
        self.independent.len()
    }

    pub fn template_version(&self) -> &str {
        &self.template_version
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Template portion of the id: `ind1,ind2;dep.template-version`.
    pub fn template_id(&self) -> String {
        format!(
            "{};{}.{}",
            self.independent.join(","),
            self.dependent,
            self.template_version
        )
    }
}

impl FromStr for RatingSpecId {
    type Err = RatingError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = text.trim().split('.').collect();
        if parts.len() != 4 || parts.iter().any(|part| part.trim().is_empty()) {
            return Err(RatingError::configuration(format!(
                "rating spec id \"{text}\" must have four non-empty '.'-separated parts"
            )));
        }
        let (independent, dependent) = split_parameters(parts[1], "rating spec id parameters")?;

        Ok(Self {
            location: parts[0].trim().to_string(),
            independent,
            dependent,
            template_version: parts[2].trim().to_string(),
            version: parts[3].trim().to_string(),
        })
    }
}

impl fmt::Display for RatingSpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{};{}.{}.{}",
            self.location,
            self.independent.join(","),
            self.dependent,
            self.template_version,
            self.version
        )
    }
}

impl TryFrom<String> for RatingSpecId {
    type Error = RatingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RatingSpecId> for String {
    fn from(value: RatingSpecId) -> Self {
        value.to_string()
    }
}

/// Units identifier: `unit1,unit2;dep-unit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitsId {
    independent: Vec<String>,
    dependent: String,
}

impl UnitsId {
    pub fn new(independent: Vec<String>, dependent: impl Into<String>) -> RatingResult<Self> {
        let text = format!("{};{}", independent.join(","), dependent.into());
        text.parse()
    }

    pub fn independent_units(&self) -> &[String] {
        &self.independent
    }

    pub fn dependent_unit(&self) -> &str {
        &self.dependent
    }

    pub fn ind_param_count(&self) -> usize {
        self.independent.len()
    }

    /// All units in parameter order, dependent last.
    pub fn all(&self) -> Vec<String> {
        let mut units = self.independent.clone();
        units.push(self.dependent.clone());
        units
    }
}

impl FromStr for UnitsId {
    type Err = RatingError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (independent, dependent) = split_parameters(text.trim(), "units id")?;
        Ok(Self {
            independent,
            dependent,
        })
    }
}

impl fmt::Display for UnitsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{}", self.independent.join(","), self.dependent)
    }
}

impl TryFrom<String> for UnitsId {
    type Error = RatingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UnitsId> for String {
    fn from(value: UnitsId) -> Self {
        value.to_string()
    }
}
