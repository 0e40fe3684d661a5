//! Stage processors: each turns one upstream record into its downstream
//! record(s) through exactly one generation-endpoint request.
//!
//! Fan-out stages normalise the endpoint's dynamically-keyed collections
//! into ordered (label, text) pairs right at the boundary; nothing
//! downstream ever re-inspects raw key names. Scoring stages parse the
//! returned vocabulary tags fail-closed and attach derived scores locally.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use pipeline::artifact::{
    Asset, AttackPath, ControlRequirement, DamageScenario, FeasibilityAppraisal, ImpactAppraisal,
    RequirementDigest, TaraRecord, ThreatScenario, TreatmentDecision,
};
use pipeline::directives::{
    Stage, ATTACK_PATH_LIST_KEY, DAMAGE_LIST_KEY, IMPACT_KEY, REQUIREMENT_LIST_KEY,
    THREAT_LIST_KEY,
};
use pipeline::provider::{LlmError, LlmProvider, SamplingOptions, StructuredRequest};
use pipeline::scoring::{risk_value, PROPERTY_RELEVANCE_THRESHOLD, PROPERTY_SCORE_MAX};
use pipeline::types::{
    DeviceAllocation, Equipment, Expertise, OpportunityWindow, SecurityProperty, Severity, Tagged,
    TimeCost, ToeKnowledge, Treatment,
};
use pipeline::ScenarioLabel;

/// Request context shared by every stage invocation of one run.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// System persona sent with every request.
    pub system: String,
    /// Sampling options sent with every request.
    pub sampling: SamplingOptions,
}

/// Failure of one stage invocation.
#[derive(Debug, Error)]
pub enum StageError {
    /// The request layer gave up on the stage's request.
    #[error("stage {stage} request failed: {source}")]
    Request {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    /// The validated response still could not be turned into domain values
    /// (unknown vocabulary tag, missing field, out-of-range score).
    #[error("stage {stage} returned an unusable payload: {detail}")]
    Response { stage: Stage, detail: String },

    /// The record is missing a section an earlier stage should have
    /// attached.
    #[error("stage {stage} needs an upstream {missing} section")]
    Incomplete { stage: Stage, missing: &'static str },

    /// Record serialisation failed while building the request payload.
    #[error("record serialisation failed: {0}")]
    Serialise(#[from] serde_json::Error),
}

fn response_error(stage: Stage, detail: impl Into<String>) -> StageError {
    StageError::Response {
        stage,
        detail: detail.into(),
    }
}

async fn consult(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    stage: Stage,
    payload: String,
) -> Result<Value, StageError> {
    debug!(stage = %stage, "consulting generation endpoint");
    let request = StructuredRequest {
        system: ctx.system.clone(),
        payload,
        directive: stage.directive().to_owned(),
        options: ctx.sampling,
    };
    provider
        .complete_structured(&request, &stage.template())
        .await
        .map_err(|source| StageError::Request { stage, source })
}

/// Normalises a dynamically-keyed collection into ordered (label, text)
/// pairs, dropping entries without usable text.
pub(crate) fn keyed_entries(response: &Value, list_key: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    if let Some(items) = response.get(list_key).and_then(Value::as_array) {
        for item in items {
            if let Some(fields) = item.as_object() {
                for (label, text) in fields {
                    if let Some(text) = text.as_str() {
                        let text = text.trim();
                        if !label.is_empty() && !text.is_empty() {
                            entries.push((label.clone(), text.to_owned()));
                        }
                    }
                }
            }
        }
    }
    entries
}

fn text_field<'a>(response: &'a Value, stage: Stage, name: &str) -> Result<&'a str, StageError> {
    response
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| response_error(stage, format!("missing string field '{name}'")))
}

fn optional_text(response: &Value, name: &str) -> String {
    response
        .get(name)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_owned())
        .unwrap_or_default()
}

fn parse_tag<T: Tagged>(stage: Stage, raw: &str) -> Result<T, StageError> {
    T::parse(raw).map_err(|e| response_error(stage, e.to_string()))
}

// ---------------------------------------------------------------------------
// Root seeding
// ---------------------------------------------------------------------------

/// Scores the seven security properties for the asset and seeds one branch
/// record per property above the relevance threshold.
///
/// An empty result is a valid outcome: no property is relevant enough to
/// analyse.
pub async fn select_properties(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    asset: &Asset,
) -> Result<Vec<TaraRecord>, StageError> {
    let stage = Stage::PropertySelection;
    let payload = serde_json::to_string(asset)?;
    let response = consult(provider, ctx, stage, payload).await?;

    let mut seeds = Vec::new();
    for property in SecurityProperty::ALL {
        let score = response
            .get(property.label())
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                response_error(stage, format!("missing or non-integer score for {property}"))
            })?;
        if score > u64::from(PROPERTY_SCORE_MAX) {
            return Err(response_error(
                stage,
                format!("score {score} for {property} is outside 0..=5"),
            ));
        }
        if score > u64::from(PROPERTY_RELEVANCE_THRESHOLD) {
            debug!(property = %property, score, "property selected for analysis");
            seeds.push(TaraRecord::seed(asset.clone(), property));
        }
    }
    Ok(seeds)
}

// ---------------------------------------------------------------------------
// Branch chain
// ---------------------------------------------------------------------------

/// Fan-out: one child record per damage scenario the endpoint enumerates.
pub async fn expand_damage_scenarios(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    record: &TaraRecord,
) -> Result<Vec<TaraRecord>, StageError> {
    let response = consult(
        provider,
        ctx,
        Stage::DamageScenarios,
        record.payload_json()?,
    )
    .await?;
    let children = keyed_entries(&response, DAMAGE_LIST_KEY)
        .into_iter()
        .filter_map(|(label, description)| {
            let label = ScenarioLabel::new(label)?;
            Some(record.clone().with_damage(DamageScenario { label, description }))
        })
        .collect();
    Ok(children)
}

/// In-place: rates the damage scenario across the four impact dimensions.
pub async fn appraise_impact(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    record: &TaraRecord,
) -> Result<TaraRecord, StageError> {
    let stage = Stage::ImpactAppraisal;
    if record.damage.is_none() {
        return Err(StageError::Incomplete {
            stage,
            missing: "damage scenario",
        });
    }
    let response = consult(provider, ctx, stage, record.payload_json()?).await?;
    let levels = response
        .get(IMPACT_KEY)
        .ok_or_else(|| response_error(stage, format!("missing '{IMPACT_KEY}' object")))?;

    let dimension = |name: &str| -> Result<Severity, StageError> {
        parse_tag(stage, text_field(levels, stage, name)?)
    };
    let impact = ImpactAppraisal::new(
        dimension("safety")?,
        dimension("financial")?,
        dimension("operational")?,
        dimension("privacy")?,
    );
    Ok(record.clone().with_impact(impact))
}

/// Fan-out: one child record per threat scenario.
pub async fn expand_threat_scenarios(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    record: &TaraRecord,
) -> Result<Vec<TaraRecord>, StageError> {
    let response = consult(
        provider,
        ctx,
        Stage::ThreatScenarios,
        record.payload_json()?,
    )
    .await?;
    let children = keyed_entries(&response, THREAT_LIST_KEY)
        .into_iter()
        .filter_map(|(label, description)| {
            let label = ScenarioLabel::new(label)?;
            Some(record.clone().with_threat(ThreatScenario { label, description }))
        })
        .collect();
    Ok(children)
}

/// Fan-out: one child record per concrete attack path.
pub async fn expand_attack_paths(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    record: &TaraRecord,
) -> Result<Vec<TaraRecord>, StageError> {
    let response = consult(provider, ctx, Stage::AttackPaths, record.payload_json()?).await?;
    let children = keyed_entries(&response, ATTACK_PATH_LIST_KEY)
        .into_iter()
        .filter_map(|(label, description)| {
            let label = ScenarioLabel::new(label)?;
            Some(
                record
                    .clone()
                    .with_attack_path(AttackPath { label, description }),
            )
        })
        .collect();
    Ok(children)
}

/// In-place: rates the attack path's five feasibility factors; difficulty
/// and the feasibility rating are derived locally.
pub async fn appraise_feasibility(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    record: &TaraRecord,
) -> Result<TaraRecord, StageError> {
    let stage = Stage::FeasibilityAppraisal;
    if record.attack_path.is_none() {
        return Err(StageError::Incomplete {
            stage,
            missing: "attack path",
        });
    }
    let response = consult(provider, ctx, stage, record.payload_json()?).await?;

    let appraisal = FeasibilityAppraisal::rate(
        parse_tag::<TimeCost>(stage, text_field(&response, stage, "time_cost")?)?,
        parse_tag::<Expertise>(stage, text_field(&response, stage, "expertise")?)?,
        parse_tag::<ToeKnowledge>(stage, text_field(&response, stage, "toe_knowledge")?)?,
        parse_tag::<OpportunityWindow>(
            stage,
            text_field(&response, stage, "window_of_opportunity")?,
        )?,
        parse_tag::<Equipment>(stage, text_field(&response, stage, "equipment")?)?,
    );
    Ok(record.clone().with_feasibility(appraisal))
}

/// In-place: computes the risk value from the canonical matrix, then asks
/// the endpoint for the treatment decision and its rationale.
pub async fn decide_treatment(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    record: &TaraRecord,
) -> Result<TaraRecord, StageError> {
    let stage = Stage::TreatmentDecision;
    let impact = record.impact.ok_or(StageError::Incomplete {
        stage,
        missing: "impact appraisal",
    })?;
    let feasibility = record.feasibility.ok_or(StageError::Incomplete {
        stage,
        missing: "feasibility appraisal",
    })?;
    let risk = risk_value(feasibility.rating, impact.overall);

    // The decision request sees the computed risk value alongside the record.
    let mut payload = serde_json::to_value(record)?;
    payload["computed_risk_value"] = json!(risk);
    let response = consult(provider, ctx, stage, payload.to_string()).await?;

    let treatment: Treatment = parse_tag(stage, text_field(&response, stage, "risk_treatment")?)?;
    let decision = TreatmentDecision {
        risk_value: risk,
        treatment,
        item_change: optional_text(&response, "item_change"),
        cybersecurity_goal: optional_text(&response, "cybersecurity_goal"),
        cybersecurity_claim: optional_text(&response, "cybersecurity_claim"),
    };
    Ok(record.clone().with_treatment(decision))
}

/// Conditional: derives a control and requirement only when the treatment
/// is Reduce; otherwise the record passes through with an empty
/// requirement attached and no request is issued.
pub async fn derive_control(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    record: &TaraRecord,
) -> Result<TaraRecord, StageError> {
    let stage = Stage::ControlRequirement;
    let treatment = record.treatment.as_ref().ok_or(StageError::Incomplete {
        stage,
        missing: "treatment decision",
    })?;
    if treatment.treatment != Treatment::Reduce {
        debug!(treatment = %treatment.treatment, "treatment is not Reduce, skipping control derivation");
        return Ok(record.clone().with_control(ControlRequirement::skipped()));
    }

    let response = consult(provider, ctx, stage, record.payload_json()?).await?;
    let allocated: DeviceAllocation =
        parse_tag(stage, text_field(&response, stage, "allocated_to_device")?)?;
    let requirement = optional_text(&response, "cybersecurity_requirement");
    let requirement_id = (allocated == DeviceAllocation::Yes && !requirement.is_empty())
        .then(ControlRequirement::fresh_requirement_id);

    Ok(record.clone().with_control(ControlRequirement {
        control: optional_text(&response, "cybersecurity_control"),
        allocated_to_device: allocated,
        requirement_id,
        requirement,
    }))
}

// ---------------------------------------------------------------------------
// Per-root fan-in
// ---------------------------------------------------------------------------

/// Many-to-one reduction: deduplicates and atomises the device-allocated
/// requirements accumulated by one asset's completed branches.
///
/// Skipped (returns no digests) when no completed branch carries a
/// device-allocated requirement.
pub async fn summarise_requirements(
    provider: &dyn LlmProvider,
    ctx: &StageContext,
    asset: &Asset,
    completed: &[TaraRecord],
) -> Result<Vec<RequirementDigest>, StageError> {
    let stage = Stage::RequirementSummary;
    let allocated: Vec<Value> = completed
        .iter()
        .filter_map(|record| record.control.as_ref())
        .filter(|control| {
            control.allocated_to_device == DeviceAllocation::Yes && !control.requirement.is_empty()
        })
        .map(|control| {
            json!({
                "requirement_id": control.requirement_id.as_ref().map(|id| id.to_string()),
                "requirement": control.requirement,
            })
        })
        .collect();
    if allocated.is_empty() {
        debug!(asset = %asset.id, "no device-allocated requirements, skipping summarisation");
        return Ok(Vec::new());
    }

    let payload = json!({
        "asset": asset,
        "device_allocated_requirements": allocated,
    })
    .to_string();
    let response = consult(provider, ctx, stage, payload).await?;
    let items = response
        .get(REQUIREMENT_LIST_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| response_error(stage, format!("missing '{REQUIREMENT_LIST_KEY}' sequence")))?;

    let mut digests = Vec::new();
    for item in items {
        digests.push(RequirementDigest {
            asset_id: asset.id.clone(),
            asset_name: asset.name.clone(),
            requirement_id: ControlRequirement::fresh_requirement_id().to_string(),
            csr_id: text_field(item, stage, "csr_id")?.to_owned(),
            title: text_field(item, stage, "title")?.to_owned(),
            sub_title: optional_text(item, "sub_title"),
            requirement: text_field(item, stage, "requirement")?.to_owned(),
        });
    }
    Ok(digests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyed_entries_preserves_order_and_labels() {
        let response = json!({
            "possible_damage_scenario_list": [
                {"damage_scenario_1": "first"},
                {"damage_scenario_2": "second"},
                {"damage_scenario_3": "third"},
            ]
        });
        let entries = keyed_entries(&response, DAMAGE_LIST_KEY);
        assert_eq!(
            entries,
            vec![
                ("damage_scenario_1".to_owned(), "first".to_owned()),
                ("damage_scenario_2".to_owned(), "second".to_owned()),
                ("damage_scenario_3".to_owned(), "third".to_owned()),
            ]
        );
    }

    #[test]
    fn keyed_entries_drops_unusable_values() {
        let response = json!({
            "list": [
                {"a": "  "},
                {"b": 42},
                {"c": "kept"},
                "not an object",
            ]
        });
        assert_eq!(
            keyed_entries(&response, "list"),
            vec![("c".to_owned(), "kept".to_owned())]
        );
    }

    #[test]
    fn keyed_entries_handles_missing_key() {
        assert!(keyed_entries(&json!({}), "list").is_empty());
    }
}
