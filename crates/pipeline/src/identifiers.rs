//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging — for example —
//! an [`AssetId`] with a [`RequirementId`] even though both are `String` under
//! the hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers — UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single analysis run (one invocation of the orchestrator).
///
/// Generated fresh for every CLI invocation; propagated through spans and
/// report headers so all activity from a single run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisRunId(Uuid);

impl AnalysisRunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an [`AnalysisRunId`] from an existing UUID (e.g. deserialised
    /// from a report).
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for AnalysisRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers — String-backed (input data / generator-assigned labels)
// ---------------------------------------------------------------------------

string_id! {
    /// Identifies an asset as declared in the input inventory (e.g. `"A-017"`).
    ///
    /// Assigned by the analysis owner; taraflow never generates or rewrites it.
    AssetId
}

string_id! {
    /// A generator-assigned label for one dynamically-keyed collection entry
    /// (e.g. `"damage_scenario_2"` or `"attack_path1"`).
    ///
    /// Labels are preserved verbatim for traceability back to the raw
    /// response; ordering between labels carries no meaning.
    ScenarioLabel
}

string_id! {
    /// Identifies a cybersecurity requirement (e.g. `"CSR-4f9a01bc"`).
    RequirementId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_id_rejects_empty() {
        assert!(AssetId::new("").is_none());
        assert!(ScenarioLabel::new("").is_none());
    }

    #[test]
    fn string_id_roundtrip() {
        let id = AssetId::new("A-017").unwrap();
        assert_eq!(id.as_str(), "A-017");
        assert_eq!(id.to_string(), "A-017");
    }

    #[test]
    fn run_id_is_unique() {
        assert_ne!(AnalysisRunId::new_random(), AnalysisRunId::new_random());
    }
}
