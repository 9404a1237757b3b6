//! JSON Schema conformance for oracle payloads.

use jsonschema::Draft;
use serde_json::Value;

use crate::error::ValidationError;

pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
pub const ACTIONS_SCHEMA: &str = include_str!("../../schemas/actions.schema.json");

/// Validate a JSON instance against a JSON Schema (Draft 2020-12).
pub fn validate_schema(instance: &Value, schema_raw: &str) -> Result<(), ValidationError> {
    let schema: Value = serde_json::from_str(schema_raw)
        .map_err(|err| ValidationError::new(format!("parse schema json: {err}")))?;
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| ValidationError::new(format!("compile json schema: {err}")))?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ValidationError::new(format!(
            "schema validation failed:\n- {}",
            messages.join("\n- ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_schema_requires_phase_fields() {
        let plan = json!({"phases": [{"name": "A", "description": "a"}]});
        let err = validate_schema(&plan, PLAN_SCHEMA).expect_err("missing depends_on");
        assert!(err.message().contains("depends_on"));
    }

    #[test]
    fn plan_schema_accepts_null_dependencies() {
        let plan = json!({"phases": [{"name": "A", "description": "a", "depends_on": null}]});
        validate_schema(&plan, PLAN_SCHEMA).expect("valid");
    }

    #[test]
    fn actions_schema_rejects_empty_batch() {
        let payload = json!({"actions": []});
        validate_schema(&payload, ACTIONS_SCHEMA).expect_err("empty");
    }
}
