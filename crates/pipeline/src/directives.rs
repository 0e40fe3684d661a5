//! Stage directives and expected-shape templates.
//!
//! Each pipeline stage sends the endpoint three texts — the system persona,
//! the record's accumulated payload, and a stage directive — and checks the
//! reply against a [`ShapeTemplate`]. This module is the single home for the
//! directive wording, the template samples, and the wire keys the stage
//! processors read back.

use serde_json::json;

use crate::shape::ShapeTemplate;

/// Default system persona sent with every request. Overridable through
/// configuration when the item under analysis differs.
pub const DEFAULT_SYSTEM_PERSONA: &str = "You are an experienced automotive cybersecurity \
analyst performing an ISO 21434 threat analysis and risk assessment of a vehicle ECU. \
Reply with exactly one JSON object: no markdown fences, no commentary, no text outside \
the object.";

/// Wire key of the damage-scenario collection.
pub const DAMAGE_LIST_KEY: &str = "possible_damage_scenario_list";
/// Wire key of the impact-appraisal object.
pub const IMPACT_KEY: &str = "possible_damage_scenario_impact_level";
/// Wire key of the threat-scenario collection.
pub const THREAT_LIST_KEY: &str = "possible_threat_scenario_list";
/// Wire key of the attack-path collection.
pub const ATTACK_PATH_LIST_KEY: &str = "possible_attack_path_list";
/// Wire key of the summarised requirement collection.
pub const REQUIREMENT_LIST_KEY: &str = "asset_requirement_list";

/// The pipeline stages that consult the generation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Root seeding: score the seven security properties for relevance.
    PropertySelection,
    /// Fan-out: enumerate damage scenarios for one property.
    DamageScenarios,
    /// In-place: rate one damage scenario across the impact dimensions.
    ImpactAppraisal,
    /// Fan-out: enumerate threat scenarios for one damage scenario.
    ThreatScenarios,
    /// Fan-out: enumerate attack paths for one threat scenario.
    AttackPaths,
    /// In-place: rate one attack path's feasibility factors.
    FeasibilityAppraisal,
    /// In-place: decide the risk treatment for a fully rated threat.
    TreatmentDecision,
    /// Conditional: derive a control and requirement when treatment is Reduce.
    ControlRequirement,
    /// Per-root fan-in: deduplicate and atomise accumulated requirements.
    RequirementSummary,
}

impl Stage {
    /// Short stage name used in spans and log events.
    pub fn name(self) -> &'static str {
        match self {
            Stage::PropertySelection => "property_selection",
            Stage::DamageScenarios => "damage_scenarios",
            Stage::ImpactAppraisal => "impact_appraisal",
            Stage::ThreatScenarios => "threat_scenarios",
            Stage::AttackPaths => "attack_paths",
            Stage::FeasibilityAppraisal => "feasibility_appraisal",
            Stage::TreatmentDecision => "treatment_decision",
            Stage::ControlRequirement => "control_requirement",
            Stage::RequirementSummary => "requirement_summary",
        }
    }

    /// Directive text appended after the record payload.
    pub fn directive(self) -> &'static str {
        match self {
            Stage::PropertySelection => {
                "Given the asset's asset_id, asset_name, asset_type, communication_protocol \
                 and remarks, score how relevant each cybersecurity property is for this \
                 asset: Authenticity, Integrity, Non-repudiation, Confidentiality, \
                 Availability, Authorization, Privacy. Use an integer 0-5 per property \
                 (0 = irrelevant, 5 = essential). \
                 Return JSON of the form: {\"Authenticity\": 4, \"Integrity\": 3, \
                 \"Non-repudiation\": 1, \"Confidentiality\": 1, \"Availability\": 1, \
                 \"Authorization\": 1, \"Privacy\": 5}"
            }
            Stage::DamageScenarios => {
                "Identify every plausible damage scenario for the asset and its assigned \
                 security property. Describe each scenario as one coherent sentence that \
                 names the attack entry point, ties the compromised security property to \
                 the damage, traces the causal chain from asset function to adverse \
                 outcome, and states the kind of harm to road users. \
                 Return JSON of the form: {\"possible_damage_scenario_list\": \
                 [{\"damage_scenario_1\": \"...\"}, {\"damage_scenario_2\": \"...\"}]}"
            }
            Stage::ImpactAppraisal => {
                "Rate the damage scenario on four dimensions, each one of Negligible, \
                 Moderate, Major or Severe: safety (physical harm to road users), \
                 financial (value lost by the owner or third parties), operational \
                 (degradation of intended vehicle functions), privacy (exposure of \
                 personal data). \
                 Return JSON of the form: {\"possible_damage_scenario_impact_level\": \
                 {\"safety\": \"Negligible\", \"financial\": \"Moderate\", \
                 \"operational\": \"Major\", \"privacy\": \"Severe\"}}"
            }
            Stage::ThreatScenarios => {
                "Identify the threat scenarios that could realise the damage scenario. \
                 Write each as one coherent sentence naming the targeted asset, the \
                 compromised security property, the concrete attack cause (entry point \
                 and technique or missing safeguard), and how it leads to the damage \
                 scenario. \
                 Return JSON of the form: {\"possible_threat_scenario_list\": \
                 [{\"threat_scenario_1\": \"...\"}, {\"threat_scenario_2\": \"...\"}]}"
            }
            Stage::AttackPaths => {
                "Derive concrete attack paths for the threat scenario. Consider entry \
                 point, attack technique (known automotive attack classes or CVEs), the \
                 components involved, prerequisites, and required attacker capability, \
                 then write each path as an ordered sequence of steps in one entry. \
                 Return JSON of the form: {\"possible_attack_path_list\": \
                 [{\"attack_path1\": \"...\"}, {\"attack_path2\": \"...\"}]}"
            }
            Stage::FeasibilityAppraisal => {
                "Rate the attack path on the five feasibility factors. Allowed values: \
                 time_cost one of <=1d, <=1w, <=1m, <=6m, >6m; expertise one of layman, \
                 proficient, expert, multiple expert; toe_knowledge one of public, \
                 restricted, confidential, strictly confidential; window_of_opportunity \
                 one of unlimited, easy, moderate, difficult; equipment one of standard, \
                 specialized, bespoke, multiple bespoke. \
                 Return JSON of the form: {\"time_cost\": \"<=1d\", \"expertise\": \
                 \"layman\", \"toe_knowledge\": \"public\", \"window_of_opportunity\": \
                 \"unlimited\", \"equipment\": \"standard\"}"
            }
            Stage::TreatmentDecision => {
                "Decide the risk treatment for this rated threat, considering the \
                 computed risk_value. Options: Avoid (change or withdraw the item so the \
                 scenario cannot occur), Reduce (apply cybersecurity controls), Share \
                 (transfer the risk to another component or party), Retain (accept the \
                 residual risk). Provide the matching rationale field: item_change for \
                 Avoid, cybersecurity_goal for Reduce, cybersecurity_claim for Share or \
                 Retain; leave the other rationale fields empty. \
                 Return JSON of the form: {\"risk_treatment\": \"Avoid\", \
                 \"item_change\": \"...\", \"cybersecurity_goal\": \"\", \
                 \"cybersecurity_claim\": \"\"}"
            }
            Stage::ControlRequirement => {
                "The risk treatment is Reduce. Specify one cybersecurity control: state \
                 whether it is technical or operational, give the concrete mechanism \
                 (e.g. message authentication with freshness, secure boot anchored in an \
                 HSM, mutually authenticated OTA), its role against the threat \
                 (prevent, detect, respond, recover or reduce severity), and its \
                 dependencies on item functions or other controls. Set \
                 allocated_to_device to yes when the control is implemented on the \
                 device itself, no when it lives in the operational environment. When \
                 allocated_to_device is yes, also write one verifiable cybersecurity \
                 requirement implementing the control; otherwise leave it empty. \
                 Return JSON of the form: {\"cybersecurity_control\": \"...\", \
                 \"allocated_to_device\": \"yes\", \"cybersecurity_requirement\": \"...\"}"
            }
            Stage::RequirementSummary => {
                "The payload lists every device-allocated cybersecurity requirement \
                 produced for one asset. Deduplicate them and split compound \
                 requirements into atomic, individually verifiable entries. Give each \
                 entry a stable csr_id (CSR-001, CSR-002, ...), a short title, a short \
                 sub_title, and the requirement text, all non-empty. \
                 Return JSON of the form: {\"asset_requirement_list\": [{\"csr_id\": \
                 \"CSR-001\", \"title\": \"...\", \"sub_title\": \"...\", \
                 \"requirement\": \"...\"}]}"
            }
        }
    }

    /// Expected-shape template the response must satisfy.
    pub fn template(self) -> ShapeTemplate {
        let sample = match self {
            Stage::PropertySelection => json!({
                "Authenticity": 4,
                "Integrity": 3,
                "Non-repudiation": 1,
                "Confidentiality": 1,
                "Availability": 1,
                "Authorization": 1,
                "Privacy": 5,
            }),
            Stage::DamageScenarios => json!({
                DAMAGE_LIST_KEY: [{"damage_scenario_1": "unauthorised actor disables the asset"}],
            }),
            Stage::ImpactAppraisal => json!({
                IMPACT_KEY: {
                    "safety": "Negligible",
                    "financial": "Moderate",
                    "operational": "Major",
                    "privacy": "Severe",
                },
            }),
            Stage::ThreatScenarios => json!({
                THREAT_LIST_KEY: [{"threat_scenario_1": "spoofed diagnostics session"}],
            }),
            Stage::AttackPaths => json!({
                ATTACK_PATH_LIST_KEY: [{"attack_path1": "attach to OBD port, replay session"}],
            }),
            Stage::FeasibilityAppraisal => json!({
                "time_cost": "<=1d",
                "expertise": "layman",
                "toe_knowledge": "public",
                "window_of_opportunity": "unlimited",
                "equipment": "standard",
            }),
            Stage::TreatmentDecision => json!({
                "risk_treatment": "Avoid",
                "item_change": "",
                "cybersecurity_goal": "",
                "cybersecurity_claim": "",
            }),
            Stage::ControlRequirement => json!({
                "cybersecurity_control": "",
                "allocated_to_device": "yes",
                "cybersecurity_requirement": "",
            }),
            Stage::RequirementSummary => json!({
                REQUIREMENT_LIST_KEY: [{
                    "csr_id": "CSR-001",
                    "title": "secured diagnostics",
                    "sub_title": "",
                    "requirement": "diagnostic sessions shall be authenticated",
                }],
            }),
        };
        ShapeTemplate::new(sample)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
