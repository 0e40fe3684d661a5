//! Shared value types for the taraflow analysis domain.
//!
//! Almost every rated quantity in a threat analysis is drawn from a small,
//! closed vocabulary that arrives as free text from the generation endpoint.
//! Each vocabulary is a tagged enum wired through one generic, fail-closed
//! string parser ([`Tagged::parse`]): an unknown tag is an error, never a
//! silent default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Tagged vocabulary machinery
// ---------------------------------------------------------------------------

/// Raised when a string does not name any variant of a tagged vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownTag {
    /// Vocabulary name, e.g. `"severity"`.
    pub kind: &'static str,
    /// The offending input, preserved verbatim for diagnostics.
    pub value: String,
}

/// A finite vocabulary parsed from endpoint-supplied strings.
///
/// `VARIANTS` lists every accepted tag (canonical spellings first, wire
/// aliases after); matching is case-insensitive and trims surrounding
/// whitespace. Parsing fails closed: anything outside the table is an
/// [`UnknownTag`].
pub trait Tagged: Sized + Copy + 'static {
    /// Vocabulary name used in error messages.
    const KIND: &'static str;
    /// Accepted `(tag, variant)` pairs, including aliases.
    const VARIANTS: &'static [(&'static str, Self)];

    /// Returns the canonical tag for this variant.
    fn label(self) -> &'static str;

    /// Parses a tag, fail-closed on unknown input.
    fn parse(raw: &str) -> Result<Self, UnknownTag> {
        let wanted = raw.trim();
        Self::VARIANTS
            .iter()
            .find(|(tag, _)| tag.eq_ignore_ascii_case(wanted))
            .map(|(_, variant)| *variant)
            .ok_or_else(|| UnknownTag {
                kind: Self::KIND,
                value: raw.to_owned(),
            })
    }
}

// Generates a tagged vocabulary enum: serde renames to the canonical tag,
// `Tagged` impl with alias table, and `Display` via the canonical tag.
macro_rules! tagged_enum {
    (
        $(#[$attr:meta])*
        $name:ident, $kind:literal {
            $(
                $(#[$vattr:meta])*
                $variant:ident => $canon:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                $(#[$vattr])*
                #[serde(rename = $canon)]
                $variant,
            )+
        }

        impl Tagged for $name {
            const KIND: &'static str = $kind;
            const VARIANTS: &'static [(&'static str, Self)] = &[
                $(
                    ($canon, Self::$variant),
                    $( ($alias, Self::$variant), )*
                )+
            ];

            fn label(self) -> &'static str {
                match self {
                    $( Self::$variant => $canon, )+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Asset vocabularies
// ---------------------------------------------------------------------------

tagged_enum! {
    /// Category of an asset in the input inventory.
    AssetKind, "asset kind" {
        Hardware => "Hardware",
        Software => "Software",
        Data => "Data",
        Communication => "Communication",
    }
}

tagged_enum! {
    /// Cybersecurity property a branch analyses the asset against.
    ///
    /// The seeding stage scores all seven; each property scoring above the
    /// relevance threshold seeds one branch.
    SecurityProperty, "security property" {
        Authenticity => "Authenticity",
        Integrity => "Integrity",
        NonRepudiation => "Non-repudiation",
        Confidentiality => "Confidentiality",
        Availability => "Availability",
        Authorization => "Authorization",
        Privacy => "Privacy",
    }
}

impl SecurityProperty {
    /// All seven properties, in the order the seeding stage scores them.
    pub const ALL: [SecurityProperty; 7] = [
        SecurityProperty::Authenticity,
        SecurityProperty::Integrity,
        SecurityProperty::NonRepudiation,
        SecurityProperty::Confidentiality,
        SecurityProperty::Availability,
        SecurityProperty::Authorization,
        SecurityProperty::Privacy,
    ];
}

// ---------------------------------------------------------------------------
// Impact vocabularies
// ---------------------------------------------------------------------------

tagged_enum! {
    /// Severity of one impact dimension of a damage scenario.
    Severity, "severity" {
        Negligible => "Negligible",
        Moderate => "Moderate",
        Major => "Major",
        Severe => "Severe",
    }
}

impl Severity {
    /// Ordinal rank: Negligible = 0 … Severe = 3.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Negligible => 0,
            Severity::Moderate => 1,
            Severity::Major => 2,
            Severity::Severe => 3,
        }
    }

    /// Returns the more severe of two levels.
    pub fn worst(self, other: Severity) -> Severity {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

// ---------------------------------------------------------------------------
// Attack-feasibility factor vocabularies
//
// Wire aliases cover the spellings the generation endpoint is instructed to
// use, which differ from the canonical report spellings.
// ---------------------------------------------------------------------------

tagged_enum! {
    /// Elapsed time an attacker needs for the attack path.
    TimeCost, "time cost" {
        NoMoreThanOneDay => "<=1d" | "no_more_than_1d",
        NoMoreThanOneWeek => "<=1w" | "no_more_than_1w",
        NoMoreThanOneMonth => "<=1m" | "no_more_than_1m",
        NoMoreThanSixMonths => "<=6m" | "no_more_than_6m",
        MoreThanSixMonths => ">6m" | "more_than_6m",
    }
}

tagged_enum! {
    /// Expertise the attacker must hold.
    Expertise, "expertise" {
        Layman => "layman",
        Proficient => "proficient",
        Expert => "expert",
        MultipleExpert => "multiple expert" | "multiple_expert",
    }
}

tagged_enum! {
    /// Knowledge about the target of evaluation the attack path requires.
    ToeKnowledge, "TOE knowledge" {
        Public => "public",
        Restricted => "restricted",
        Confidential => "confidential",
        StrictlyConfidential => "strictly confidential" | "strictly_confidential",
    }
}

tagged_enum! {
    /// Window of opportunity available to the attacker.
    OpportunityWindow, "window of opportunity" {
        Unlimited => "unlimited",
        Easy => "easy",
        Moderate => "moderate",
        Difficult => "difficult",
    }
}

tagged_enum! {
    /// Equipment the attack path requires.
    Equipment, "equipment" {
        Standard => "standard",
        Specialized => "specialized" | "specialised",
        Bespoke => "bespoke",
        MultipleBespoke => "multiple bespoke" | "multiple_bespoke",
    }
}

tagged_enum! {
    /// Overall attack-feasibility rating derived from the factor scores.
    Feasibility, "attack feasibility" {
        VeryLow => "verylow" | "very low" | "very_low",
        Low => "low",
        Medium => "medium",
        High => "high",
    }
}

// ---------------------------------------------------------------------------
// Risk-treatment vocabularies
// ---------------------------------------------------------------------------

tagged_enum! {
    /// Risk-treatment option chosen for a fully rated threat.
    Treatment, "risk treatment" {
        Avoid => "Avoid",
        Reduce => "Reduce",
        Share => "Share",
        Retain => "Retain",
    }
}

tagged_enum! {
    /// Whether a cybersecurity control is allocated to the device itself
    /// (as opposed to its operational environment).
    DeviceAllocation, "device allocation" {
        Yes => "yes",
        No => "no",
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        assert_eq!(Treatment::parse("  reduce ").unwrap(), Treatment::Reduce);
        assert_eq!(Severity::parse("SEVERE").unwrap(), Severity::Severe);
    }

    #[test]
    fn parse_accepts_wire_aliases() {
        assert_eq!(
            TimeCost::parse("no_more_than_1w").unwrap(),
            TimeCost::NoMoreThanOneWeek
        );
        assert_eq!(
            Expertise::parse("multiple expert").unwrap(),
            Expertise::MultipleExpert
        );
        assert_eq!(Feasibility::parse("verylow").unwrap(), Feasibility::VeryLow);
    }

    #[test]
    fn parse_fails_closed() {
        let err = Severity::parse("catastrophic").unwrap_err();
        assert_eq!(err.kind, "severity");
        assert_eq!(err.value, "catastrophic");
        assert!(Treatment::parse("ignore").is_err());
    }

    #[test]
    fn display_uses_canonical_tag() {
        assert_eq!(TimeCost::NoMoreThanOneDay.to_string(), "<=1d");
        assert_eq!(SecurityProperty::NonRepudiation.to_string(), "Non-repudiation");
    }

    #[test]
    fn severity_worst_picks_higher_rank() {
        assert_eq!(
            Severity::Moderate.worst(Severity::Severe),
            Severity::Severe
        );
        assert_eq!(
            Severity::Major.worst(Severity::Negligible),
            Severity::Major
        );
    }

    #[test]
    fn serde_uses_canonical_tags() {
        let json = serde_json::to_string(&Equipment::MultipleBespoke).unwrap();
        assert_eq!(json, "\"multiple bespoke\"");
        let back: Equipment = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Equipment::MultipleBespoke);
    }
}
