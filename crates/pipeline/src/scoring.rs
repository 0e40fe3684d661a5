//! Deterministic scoring rules: attack-difficulty weights, the feasibility
//! thresholds derived from them, and the canonical risk matrix.
//!
//! These tables are fixed by the assessment method, not by configuration;
//! the generation endpoint only ever supplies the factor *levels*, never the
//! numeric scores derived from them.

use crate::types::{
    Equipment, Expertise, Feasibility, OpportunityWindow, Severity, TimeCost, ToeKnowledge,
};

/// Property-relevance scores range over 0..=5; only properties scoring above
/// this threshold seed a branch.
pub const PROPERTY_RELEVANCE_THRESHOLD: u8 = 2;

/// Upper bound of the property-relevance scale.
pub const PROPERTY_SCORE_MAX: u8 = 5;

impl TimeCost {
    /// Attack-potential weight of this time-cost level.
    pub fn weight(self) -> u8 {
        match self {
            TimeCost::NoMoreThanOneDay => 0,
            TimeCost::NoMoreThanOneWeek => 1,
            TimeCost::NoMoreThanOneMonth => 4,
            TimeCost::NoMoreThanSixMonths => 17,
            TimeCost::MoreThanSixMonths => 19,
        }
    }
}

impl Expertise {
    /// Attack-potential weight of this expertise level.
    pub fn weight(self) -> u8 {
        match self {
            Expertise::Layman => 0,
            Expertise::Proficient => 3,
            Expertise::Expert => 6,
            Expertise::MultipleExpert => 8,
        }
    }
}

impl ToeKnowledge {
    /// Attack-potential weight of this knowledge level.
    pub fn weight(self) -> u8 {
        match self {
            ToeKnowledge::Public => 0,
            ToeKnowledge::Restricted => 3,
            ToeKnowledge::Confidential => 7,
            ToeKnowledge::StrictlyConfidential => 11,
        }
    }
}

impl OpportunityWindow {
    /// Attack-potential weight of this opportunity level.
    pub fn weight(self) -> u8 {
        match self {
            OpportunityWindow::Unlimited => 0,
            OpportunityWindow::Easy => 1,
            OpportunityWindow::Moderate => 4,
            OpportunityWindow::Difficult => 10,
        }
    }
}

impl Equipment {
    /// Attack-potential weight of this equipment level.
    pub fn weight(self) -> u8 {
        match self {
            Equipment::Standard => 0,
            Equipment::Specialized => 4,
            Equipment::Bespoke => 7,
            Equipment::MultipleBespoke => 9,
        }
    }
}

/// Sums the five factor weights into the attack-difficulty score (0..=57).
pub fn attack_difficulty(
    time: TimeCost,
    expertise: Expertise,
    knowledge: ToeKnowledge,
    window: OpportunityWindow,
    equipment: Equipment,
) -> u8 {
    time.weight() + expertise.weight() + knowledge.weight() + window.weight() + equipment.weight()
}

/// Maps an attack-difficulty score to its feasibility rating.
///
/// Higher difficulty means a less feasible attack.
pub fn feasibility_for_difficulty(difficulty: u8) -> Feasibility {
    match difficulty {
        25.. => Feasibility::VeryLow,
        20..=24 => Feasibility::Low,
        14..=19 => Feasibility::Medium,
        _ => Feasibility::High,
    }
}

// Canonical risk matrix: rows by feasibility (Very Low → High), columns by
// overall severity (Negligible → Severe). The method documentation carries
// this table in two orientations; this is the single lookup used everywhere.
const RISK_MATRIX: [[u8; 4]; 4] = [
    [1, 1, 1, 2], // very low
    [1, 2, 2, 3], // low
    [1, 2, 3, 4], // medium
    [1, 3, 4, 5], // high
];

/// Looks up the risk value (1..=5) for a feasibility/severity pair.
pub fn risk_value(feasibility: Feasibility, severity: Severity) -> u8 {
    let row = match feasibility {
        Feasibility::VeryLow => 0,
        Feasibility::Low => 1,
        Feasibility::Medium => 2,
        Feasibility::High => 3,
    };
    RISK_MATRIX[row][severity.rank() as usize]
}
