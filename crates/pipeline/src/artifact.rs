//! Pipeline artifacts: the value types one analysis branch accumulates.
//!
//! A [`TaraRecord`] carries the *full* ancestry of its branch — asset,
//! assigned security property, and every section a completed stage attached.
//! Records are plain owned values: fanning out clones the record, so sibling
//! branches can never observe each other's stage-local state. Sections are
//! attached with consuming `with_*` builders and never mutated afterwards.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identifiers::{AssetId, RequirementId, ScenarioLabel};
use crate::types::{
    AssetKind, DeviceAllocation, Equipment, Expertise, Feasibility, OpportunityWindow,
    SecurityProperty, Severity, TimeCost, ToeKnowledge, Treatment,
};

// ---------------------------------------------------------------------------
// Root input
// ---------------------------------------------------------------------------

/// One asset from the input inventory: the root item that seeds a fan-out
/// tree of analysis branches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Inventory identifier, assigned by the analysis owner.
    #[serde(rename = "asset_id")]
    pub id: AssetId,
    /// Human-readable asset name.
    #[serde(rename = "asset_name")]
    pub name: String,
    /// Asset category.
    #[serde(rename = "asset_type")]
    pub kind: AssetKind,
    /// Protocols the asset communicates over (free text).
    #[serde(rename = "communication_protocol", default)]
    pub protocol: String,
    /// Analysis-owner notes on security concerns (free text).
    #[serde(default)]
    pub remarks: String,
}

// ---------------------------------------------------------------------------
// Stage sections
// ---------------------------------------------------------------------------

/// A damage scenario produced by the first branching stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageScenario {
    /// Generator-assigned entry label (e.g. `"damage_scenario_2"`).
    pub label: ScenarioLabel,
    /// Scenario description.
    pub description: String,
}

/// Severity appraisal of a damage scenario across the four impact
/// dimensions. The overall level is the worst dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpactAppraisal {
    pub safety: Severity,
    pub financial: Severity,
    pub operational: Severity,
    pub privacy: Severity,
    /// Worst of the four dimensions; derived, never supplied by the endpoint.
    pub overall: Severity,
}

impl ImpactAppraisal {
    /// Builds an appraisal, deriving the overall level as the maximum of the
    /// four dimensions.
    pub fn new(
        safety: Severity,
        financial: Severity,
        operational: Severity,
        privacy: Severity,
    ) -> Self {
        let overall = safety.worst(financial).worst(operational).worst(privacy);
        Self {
            safety,
            financial,
            operational,
            privacy,
            overall,
        }
    }
}

/// A threat scenario that could realise the damage scenario upstream of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatScenario {
    /// Generator-assigned entry label.
    pub label: ScenarioLabel,
    /// Scenario description.
    pub description: String,
}

/// One concrete attack path realising the threat scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackPath {
    /// Generator-assigned entry label.
    pub label: ScenarioLabel,
    /// Step-by-step path description.
    pub description: String,
}

/// Attack-feasibility appraisal of one attack path.
///
/// The five factor levels come from the endpoint; the difficulty score and
/// the rating are derived locally from the scoring tables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityAppraisal {
    pub time_cost: TimeCost,
    pub expertise: Expertise,
    pub knowledge: ToeKnowledge,
    pub window: OpportunityWindow,
    pub equipment: Equipment,
    /// Summed factor weights (0..=57).
    pub difficulty: u8,
    /// Rating derived from the difficulty thresholds.
    pub rating: Feasibility,
}

impl FeasibilityAppraisal {
    /// Rates a factor combination, deriving difficulty and rating.
    pub fn rate(
        time_cost: TimeCost,
        expertise: Expertise,
        knowledge: ToeKnowledge,
        window: OpportunityWindow,
        equipment: Equipment,
    ) -> Self {
        let difficulty =
            crate::scoring::attack_difficulty(time_cost, expertise, knowledge, window, equipment);
        Self {
            time_cost,
            expertise,
            knowledge,
            window,
            equipment,
            difficulty,
            rating: crate::scoring::feasibility_for_difficulty(difficulty),
        }
    }
}

/// Risk-treatment decision for a fully rated threat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentDecision {
    /// Risk value from the canonical matrix (1..=5), computed before the
    /// decision request is issued.
    pub risk_value: u8,
    pub treatment: Treatment,
    /// Rationale when the treatment is Avoid.
    #[serde(default)]
    pub item_change: String,
    /// Rationale when the treatment is Reduce.
    #[serde(default)]
    pub cybersecurity_goal: String,
    /// Rationale when the treatment is Share or Retain.
    #[serde(default)]
    pub cybersecurity_claim: String,
}

/// Cybersecurity control and the requirement derived from it.
///
/// Attached empty when the control stage is skipped (treatment other than
/// Reduce), so every completed record carries the section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequirement {
    #[serde(default)]
    pub control: String,
    pub allocated_to_device: DeviceAllocation,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub requirement_id: Option<RequirementId>,
    #[serde(default)]
    pub requirement: String,
}

impl ControlRequirement {
    /// The pass-through section attached when no control is derived.
    pub fn skipped() -> Self {
        Self {
            control: String::new(),
            allocated_to_device: DeviceAllocation::No,
            requirement_id: None,
            requirement: String::new(),
        }
    }

    /// Generates a fresh requirement identifier (`CSR-` plus a short random
    /// hex suffix).
    pub fn fresh_requirement_id() -> RequirementId {
        let hex = Uuid::new_v4().simple().to_string();
        RequirementId::new(format!("CSR-{}", &hex[..8]))
            .unwrap_or_else(|| unreachable!("generated identifier is never empty"))
    }
}

// ---------------------------------------------------------------------------
// The ancestry-carrying record
// ---------------------------------------------------------------------------

/// The artifact threaded through one analysis branch.
///
/// Each stage attaches exactly one section; sections already attached are
/// never modified. [`TaraRecord::payload_json`] serialises only the attached
/// sections, so the request payload grows with the branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaraRecord {
    pub asset: Asset,
    #[serde(rename = "security_property")]
    pub property: SecurityProperty,
    #[serde(rename = "damage_scenario", skip_serializing_if = "Option::is_none", default)]
    pub damage: Option<DamageScenario>,
    #[serde(rename = "impact", skip_serializing_if = "Option::is_none", default)]
    pub impact: Option<ImpactAppraisal>,
    #[serde(rename = "threat_scenario", skip_serializing_if = "Option::is_none", default)]
    pub threat: Option<ThreatScenario>,
    #[serde(rename = "attack_path", skip_serializing_if = "Option::is_none", default)]
    pub attack_path: Option<AttackPath>,
    #[serde(rename = "attack_feasibility", skip_serializing_if = "Option::is_none", default)]
    pub feasibility: Option<FeasibilityAppraisal>,
    #[serde(rename = "risk_treatment", skip_serializing_if = "Option::is_none", default)]
    pub treatment: Option<TreatmentDecision>,
    #[serde(rename = "control_requirement", skip_serializing_if = "Option::is_none", default)]
    pub control: Option<ControlRequirement>,
}

impl TaraRecord {
    /// Seeds a branch record from an asset and one assigned property.
    pub fn seed(asset: Asset, property: SecurityProperty) -> Self {
        Self {
            asset,
            property,
            damage: None,
            impact: None,
            threat: None,
            attack_path: None,
            feasibility: None,
            treatment: None,
            control: None,
        }
    }

    pub fn with_damage(mut self, damage: DamageScenario) -> Self {
        self.damage = Some(damage);
        self
    }

    pub fn with_impact(mut self, impact: ImpactAppraisal) -> Self {
        self.impact = Some(impact);
        self
    }

    pub fn with_threat(mut self, threat: ThreatScenario) -> Self {
        self.threat = Some(threat);
        self
    }

    pub fn with_attack_path(mut self, path: AttackPath) -> Self {
        self.attack_path = Some(path);
        self
    }

    pub fn with_feasibility(mut self, feasibility: FeasibilityAppraisal) -> Self {
        self.feasibility = Some(feasibility);
        self
    }

    pub fn with_treatment(mut self, treatment: TreatmentDecision) -> Self {
        self.treatment = Some(treatment);
        self
    }

    pub fn with_control(mut self, control: ControlRequirement) -> Self {
        self.control = Some(control);
        self
    }

    /// Compact JSON of the accumulated state, used as the request payload.
    pub fn payload_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Projects the record onto the flat key/value row consumed by the
    /// export layer. Multi-line free text is flattened to single lines; the
    /// export layer owns file format, delimiter, and column ordering beyond
    /// the order given here.
    pub fn flat_row(&self) -> Vec<(&'static str, String)> {
        fn clean(text: &str) -> String {
            text.split_whitespace().collect::<Vec<_>>().join(" ")
        }

        let mut row: Vec<(&'static str, String)> = vec![
            ("asset_id", self.asset.id.to_string()),
            ("asset_name", clean(&self.asset.name)),
            ("security_property", self.property.to_string()),
        ];
        let blank = || String::new();

        match &self.damage {
            Some(d) => {
                row.push(("damage_scenario_id", d.label.to_string()));
                row.push(("damage_scenario", clean(&d.description)));
            }
            None => {
                row.push(("damage_scenario_id", blank()));
                row.push(("damage_scenario", blank()));
            }
        }
        match &self.impact {
            Some(i) => {
                row.push(("safety", i.safety.to_string()));
                row.push(("financial", i.financial.to_string()));
                row.push(("operational", i.operational.to_string()));
                row.push(("privacy", i.privacy.to_string()));
                row.push(("impact_level", i.overall.to_string()));
            }
            None => {
                for key in ["safety", "financial", "operational", "privacy", "impact_level"] {
                    row.push((key, blank()));
                }
            }
        }
        match &self.threat {
            Some(t) => {
                row.push(("threat_scenario_id", t.label.to_string()));
                row.push(("threat_scenario", clean(&t.description)));
            }
            None => {
                row.push(("threat_scenario_id", blank()));
                row.push(("threat_scenario", blank()));
            }
        }
        row.push((
            "attack_path",
            self.attack_path
                .as_ref()
                .map(|p| clean(&p.description))
                .unwrap_or_default(),
        ));
        match &self.feasibility {
            Some(f) => {
                row.push(("time_cost", f.time_cost.to_string()));
                row.push(("expertise", f.expertise.to_string()));
                row.push(("toe_knowledge", f.knowledge.to_string()));
                row.push(("window_of_opportunity", f.window.to_string()));
                row.push(("equipment", f.equipment.to_string()));
                row.push(("difficulty", f.difficulty.to_string()));
                row.push(("attack_feasibility", f.rating.to_string()));
            }
            None => {
                for key in [
                    "time_cost",
                    "expertise",
                    "toe_knowledge",
                    "window_of_opportunity",
                    "equipment",
                    "difficulty",
                    "attack_feasibility",
                ] {
                    row.push((key, blank()));
                }
            }
        }
        match &self.treatment {
            Some(t) => {
                row.push(("risk_value", t.risk_value.to_string()));
                row.push(("risk_treatment", t.treatment.to_string()));
                row.push(("item_change", clean(&t.item_change)));
                row.push(("cybersecurity_goal", clean(&t.cybersecurity_goal)));
                row.push(("cybersecurity_claim", clean(&t.cybersecurity_claim)));
            }
            None => {
                for key in [
                    "risk_value",
                    "risk_treatment",
                    "item_change",
                    "cybersecurity_goal",
                    "cybersecurity_claim",
                ] {
                    row.push((key, blank()));
                }
            }
        }
        match &self.control {
            Some(c) => {
                row.push(("cybersecurity_control", clean(&c.control)));
                row.push(("allocated_to_device", c.allocated_to_device.to_string()));
                row.push((
                    "cybersecurity_requirement_id",
                    c.requirement_id
                        .as_ref()
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                ));
                row.push(("cybersecurity_requirement", clean(&c.requirement)));
            }
            None => {
                for key in [
                    "cybersecurity_control",
                    "allocated_to_device",
                    "cybersecurity_requirement_id",
                    "cybersecurity_requirement",
                ] {
                    row.push((key, blank()));
                }
            }
        }
        row
    }
}

// ---------------------------------------------------------------------------
// Per-root summarisation output
// ---------------------------------------------------------------------------

/// One atomised cybersecurity requirement from the per-root summarisation
/// step: the device-allocated requirements of all completed branches,
/// deduplicated and split into verifiable units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementDigest {
    pub asset_id: AssetId,
    pub asset_name: String,
    pub requirement_id: String,
    pub csr_id: String,
    pub title: String,
    #[serde(default)]
    pub sub_title: String,
    pub requirement: String,
}

impl RequirementDigest {
    /// Flat key/value row for the export layer.
    pub fn flat_row(&self) -> Vec<(&'static str, String)> {
        vec![
            ("asset_id", self.asset_id.to_string()),
            ("asset_name", self.asset_name.clone()),
            ("requirement_id", self.requirement_id.clone()),
            ("csr_id", self.csr_id.clone()),
            ("title", self.title.clone()),
            ("sub_title", self.sub_title.clone()),
            ("requirement", self.requirement.clone()),
        ]
    }
}
