//! FHIR resource kinds exposed by the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Encounter,
    Location,
    Patient,
    Practitioner,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Encounter,
        ResourceKind::Location,
        ResourceKind::Patient,
        ResourceKind::Practitioner,
    ];

    /// Lowercase name used in routes, audit entries and the mirror.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Encounter => "encounter",
            ResourceKind::Location => "location",
            ResourceKind::Patient => "patient",
            ResourceKind::Practitioner => "practitioner",
        }
    }

    /// Resource type segment in upstream FHIR URLs.
    pub fn fhir_type(&self) -> &'static str {
        match self {
            ResourceKind::Encounter => "Encounter",
            ResourceKind::Location => "Location",
            ResourceKind::Patient => "Patient",
            ResourceKind::Practitioner => "Practitioner",
        }
    }

    /// Patient and Practitioner are read-through only.
    pub fn supports_mutation(&self) -> bool {
        matches!(self, ResourceKind::Encounter | ResourceKind::Location)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq)]
pub struct UnknownResourceKind(pub String);

impl fmt::Display for UnknownResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown resource kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownResourceKind {}

impl FromStr for ResourceKind {
    type Err = UnknownResourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownResourceKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!("location".parse(), Ok(ResourceKind::Location));
        assert_eq!("Patient".parse(), Ok(ResourceKind::Patient));
        assert_eq!(
            "observation".parse::<ResourceKind>(),
            Err(UnknownResourceKind("observation".to_string()))
        );
    }

    #[test]
    fn test_mutation_support() {
        assert!(ResourceKind::Encounter.supports_mutation());
        assert!(ResourceKind::Location.supports_mutation());
        assert!(!ResourceKind::Patient.supports_mutation());
        assert!(!ResourceKind::Practitioner.supports_mutation());
    }

    #[test]
    fn test_names() {
        assert_eq!(ResourceKind::Location.to_string(), "location");
        assert_eq!(ResourceKind::Practitioner.fhir_type(), "Practitioner");
    }
}
