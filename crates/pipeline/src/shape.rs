//! Structural shape validation for generation-endpoint responses.
//!
//! A [`ShapeTemplate`] is a nested key/value *sample* of the expected
//! response, not a schema language. Validation checks presence and
//! non-blankness, never types or formats beyond that: the upstream producer
//! is a best-effort text generator, so minor content variation must pass
//! while structurally incomplete responses must be rejected.

use serde_json::Value;
use tracing::warn;

/// Expected-shape template for one stage's response.
///
/// Matching rules:
/// - a template key mapping to a non-empty sequence requires the payload key
///   to be a non-empty sequence whose every element is a non-empty object
///   with no blank string fields; when the template's example element has
///   more than one key, those keys are required verbatim (a single-key
///   example stands for dynamically-keyed entries);
/// - a template key mapping to an object requires every nested key name to
///   be present in the corresponding payload object (values unchecked);
/// - a template key mapping to a scalar requires presence only.
#[derive(Debug, Clone)]
pub struct ShapeTemplate {
    template: Value,
}

impl ShapeTemplate {
    /// Wraps a template sample value.
    pub fn new(template: Value) -> Self {
        Self { template }
    }

    /// Returns the template sample.
    pub fn sample(&self) -> &Value {
        &self.template
    }

    /// Collects every violation path. Empty means the payload matches.
    ///
    /// Pure and deterministic: the result depends only on the
    /// (payload, template) pair.
    pub fn violations(&self, payload: &Value) -> Vec<String> {
        let mut found = Vec::new();
        let Some(template) = self.template.as_object() else {
            return found;
        };
        let Some(body) = payload.as_object() else {
            found.push("$: not a JSON object".to_owned());
            return found;
        };

        for (key, expected) in template {
            match expected {
                Value::Array(sample) => {
                    check_sequence(key, sample, body.get(key), &mut found);
                }
                Value::Object(nested) => match body.get(key).and_then(Value::as_object) {
                    Some(actual) => {
                        for nested_key in nested.keys() {
                            if !actual.contains_key(nested_key) {
                                found.push(format!("{key}.{nested_key}: missing"));
                            }
                        }
                    }
                    None => found.push(format!("{key}: missing or not an object")),
                },
                _ => {
                    if !body.contains_key(key) {
                        found.push(format!("{key}: missing"));
                    }
                }
            }
        }
        found
    }

    /// Returns `true` when the payload satisfies the template, logging every
    /// violation path first.
    pub fn matches(&self, payload: &Value) -> bool {
        let violations = self.violations(payload);
        for path in &violations {
            warn!(path = %path, "response shape violation");
        }
        violations.is_empty()
    }
}

impl From<Value> for ShapeTemplate {
    fn from(template: Value) -> Self {
        Self::new(template)
    }
}

fn check_sequence(key: &str, sample: &[Value], actual: Option<&Value>, found: &mut Vec<String>) {
    let Some(items) = actual.and_then(Value::as_array) else {
        found.push(format!("{key}: missing or not a sequence"));
        return;
    };
    if items.is_empty() {
        found.push(format!("{key}: empty sequence"));
        return;
    }

    // Keys of the example element are required verbatim only for
    // fixed-schema lists; a single-key example stands for dynamic labels.
    let required_keys: Vec<&String> = match sample.first().and_then(Value::as_object) {
        Some(example) if example.len() > 1 => example.keys().collect(),
        _ => Vec::new(),
    };

    for (index, item) in items.iter().enumerate() {
        let Some(fields) = item.as_object() else {
            found.push(format!("{key}[{index}]: not an object"));
            continue;
        };
        if fields.is_empty() {
            found.push(format!("{key}[{index}]: empty object"));
            continue;
        }
        for required in &required_keys {
            if !fields.contains_key(*required) {
                found.push(format!("{key}[{index}].{required}: missing"));
            }
        }
        for (field, value) in fields {
            if let Some(text) = value.as_str() {
                if text.trim().is_empty() {
                    found.push(format!("{key}[{index}].{field}: blank"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list_template() -> ShapeTemplate {
        ShapeTemplate::new(json!({"list_key": [{"a": "x"}]}))
    }

    #[test]
    fn accepts_well_formed_sequence() {
        let payload = json!({"list_key": [{"a": "1"}]});
        assert!(list_template().matches(&payload));
    }

    #[test]
    fn rejects_blank_field_in_sequence_element() {
        let payload = json!({"list_key": [{"a": "1"}, {"a": ""}]});
        let violations = list_template().violations(&payload);
        assert_eq!(violations, vec!["list_key[1].a: blank".to_owned()]);
        assert!(!list_template().matches(&payload));
    }

    #[test]
    fn rejects_missing_sequence_key() {
        let payload = json!({"other": 1});
        assert!(!list_template().matches(&payload));
    }

    #[test]
    fn rejects_empty_sequence() {
        let payload = json!({"list_key": []});
        let violations = list_template().violations(&payload);
        assert_eq!(violations, vec!["list_key: empty sequence".to_owned()]);
    }

    #[test]
    fn dynamic_labels_do_not_need_the_example_key() {
        // The example element has a single key; differently-labelled entries
        // still match as long as their values are non-blank.
        let template = ShapeTemplate::new(json!({
            "possible_damage_scenario_list": [{"damage_scenario_1": "sample"}]
        }));
        let payload = json!({
            "possible_damage_scenario_list": [
                {"damage_scenario_1": "battery drained"},
                {"damage_scenario_2": "telemetry spoofed"},
            ]
        });
        assert!(template.matches(&payload));
    }

    #[test]
    fn fixed_schema_lists_require_all_example_keys() {
        let template = ShapeTemplate::new(json!({
            "entries": [{"id": "x", "text": "y"}]
        }));
        let payload = json!({"entries": [{"id": "1"}]});
        let violations = template.violations(&payload);
        assert_eq!(violations, vec!["entries[0].text: missing".to_owned()]);
    }

    #[test]
    fn nested_object_requires_key_names_only() {
        let template = ShapeTemplate::new(json!({
            "impact": {"safety": "Negligible", "privacy": "Severe"}
        }));
        // Values are not content-checked; the blank is accepted here.
        let ok = json!({"impact": {"safety": "", "privacy": 3}});
        assert!(template.matches(&ok));

        let missing = json!({"impact": {"safety": "Major"}});
        let violations = template.violations(&missing);
        assert_eq!(violations, vec!["impact.privacy: missing".to_owned()]);
    }

    #[test]
    fn scalar_template_requires_presence_only() {
        let template = ShapeTemplate::new(json!({
            "expertise": "layman",
            "equipment": "standard"
        }));
        assert!(template.matches(&json!({"expertise": 3, "equipment": null})));
        assert!(!template.matches(&json!({"expertise": "expert"})));
    }

    #[test]
    fn revalidation_is_deterministic() {
        let template = list_template();
        let payload = json!({"list_key": [{"a": ""}]});
        let first = template.violations(&payload);
        let second = template.violations(&payload);
        assert_eq!(first, second);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(!list_template().matches(&json!(["not", "an", "object"])));
    }
}
