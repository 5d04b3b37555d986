//! Turns free-form model output into a validated [`QuestionResponse`].
//!
//! Models are told to answer with a single JSON object but routinely wrap it
//! in prose or code fences. Normalization runs in three stages:
//!
//! 1. **Extraction**: fenced block, else outermost `{ ... }` span, else the
//!    whole text. Whichever strategy is selected must parse; there is no
//!    further fallback.
//! 2. **Transformation**: a total defaulting pass (key backfill, array and
//!    object coercions) so validation always sees a well-typed shape.
//! 3. **Validation**: structural checks that report every violation at once.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::core::types::{QuestionResponse, QuestionType};
use crate::error::{ConsiliumError, Result, SchemaViolation};

/// Longest key produced by [`derive_key`]
pub const MAX_KEY_LENGTH: usize = 50;

const REQUIRED_FIELDS: [&str; 4] = ["key", "question", "type", "satisfied"];

/// Which extraction strategy located the JSON payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    FencedBlock,
    BraceSpan,
    WholeText,
}

pub struct ResponseNormalizer {
    fence_regex: Regex,
    non_slug_regex: Regex,
    whitespace_regex: Regex,
}

impl ResponseNormalizer {
    pub fn new() -> Self {
        Self {
            fence_regex: Regex::new(r"```(?i:json)?\s*([\s\S]*?)```").expect("Invalid fence regex"),
            non_slug_regex: Regex::new(r"[^a-z0-9\s]").expect("Invalid slug regex"),
            whitespace_regex: Regex::new(r"\s+").expect("Invalid whitespace regex"),
        }
    }

    /// Extract, transform and validate a structured reply
    pub fn normalize(&self, raw: &str) -> Result<QuestionResponse> {
        let parsed = self.extract_json(raw)?;
        let transformed = self.transform(parsed);
        validate(&transformed)?;

        serde_json::from_value(transformed)
            .map_err(|e| ConsiliumError::Schema(vec![SchemaViolation::invalid("response", e.to_string(), None)]))
    }

    /// Pick the extraction strategy for `raw` and the slice it selects
    pub fn locate<'a>(&self, raw: &'a str) -> (ExtractionStrategy, &'a str) {
        let trimmed = raw.trim();

        if let Some(inner) = self.fence_regex.captures(trimmed).and_then(|caps| caps.get(1)) {
            return (ExtractionStrategy::FencedBlock, inner.as_str().trim());
        }

        if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
            if end > start {
                return (ExtractionStrategy::BraceSpan, &trimmed[start..=end]);
            }
        }

        (ExtractionStrategy::WholeText, trimmed)
    }

    /// Parse the JSON payload embedded in model output
    pub fn extract_json(&self, raw: &str) -> Result<Value> {
        let (strategy, candidate) = self.locate(raw);

        serde_json::from_str(candidate).map_err(|e| {
            warn!("Failed to parse JSON ({:?}): {}", strategy, e);
            warn!("Raw content: {}", raw.trim());
            ConsiliumError::Parse {
                message: e.to_string(),
                raw: raw.to_string(),
            }
        })
    }

    /// Total defaulting pass; never fails and is idempotent
    pub fn transform(&self, parsed: Value) -> Value {
        let mut source = match parsed {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let mut out = Map::new();

        let key = match source.remove("key") {
            Some(value) if is_truthy(&value) => Some(value),
            _ => source
                .get("question")
                .and_then(Value::as_str)
                .map(|question| self.derive_key(question))
                .filter(|key| !key.is_empty())
                .map(Value::String),
        };
        if let Some(key) = key {
            out.insert("key".to_string(), key);
        }

        if let Some(question) = source.remove("question") {
            out.insert("question".to_string(), question);
        }
        if let Some(question_type) = source.remove("type") {
            out.insert("type".to_string(), question_type);
        }

        let options = match source.remove("options") {
            Some(Value::Array(items)) => Value::Array(items),
            _ => Value::Array(Vec::new()),
        };
        out.insert("options".to_string(), options);

        let satisfied = source.remove("satisfied").map(|v| is_truthy(&v)).unwrap_or(false);
        out.insert("satisfied".to_string(), Value::Bool(satisfied));

        let documents = match source.remove("documents") {
            Some(Value::Array(items)) => Value::Array(items),
            _ => Value::Array(Vec::new()),
        };
        out.insert("documents".to_string(), documents);

        // A single prerequisite is often sent as a bare string
        let dependencies = match source.remove("dependencies") {
            Some(Value::Object(map)) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| match value {
                        Value::String(prerequisite) => (key, Value::Array(vec![Value::String(prerequisite)])),
                        other => (key, other),
                    })
                    .collect(),
            ),
            _ => Value::Object(Map::new()),
        };
        out.insert("dependencies".to_string(), dependencies);

        Value::Object(out)
    }

    /// Deterministic slug for a question that arrived without a key
    pub fn derive_key(&self, question: &str) -> String {
        let lowered = question.to_lowercase();
        let stripped = self.non_slug_regex.replace_all(&lowered, "");
        let collapsed = self.whitespace_regex.replace_all(stripped.trim(), "_");
        collapsed.chars().take(MAX_KEY_LENGTH).collect()
    }
}

impl Default for ResponseNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON truthiness as loosely-typed model output intends it
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Structural validation of a (transformed) reply, reporting all violations
pub fn validate(value: &Value) -> Result<()> {
    let Some(object) = value.as_object() else {
        return Err(ConsiliumError::Schema(vec![SchemaViolation::invalid(
            "response",
            "must be a JSON object",
            Some(value),
        )]));
    };

    let mut violations: Vec<SchemaViolation> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !object.contains_key(**field))
        .map(|field| SchemaViolation::missing(field))
        .collect();

    for field in ["key", "question"] {
        if let Some(value) = object.get(field).filter(|v| !v.is_string()) {
            violations.push(SchemaViolation::invalid(field, "must be a string", Some(value)));
        }
    }
    if let Some(value) = object.get("satisfied").filter(|v| !v.is_boolean()) {
        violations.push(SchemaViolation::invalid("satisfied", "must be a boolean", Some(value)));
    }

    let question_type = match object.get("type") {
        None => None,
        Some(raw) => match raw.as_str().and_then(QuestionType::parse) {
            Some(parsed) => Some(parsed),
            None => {
                violations.push(SchemaViolation::invalid(
                    "type",
                    format!("must be one of {}", QuestionType::ALL.join(", ")),
                    Some(raw),
                ));
                None
            }
        },
    };

    if let Some(question_type) = question_type.filter(QuestionType::needs_options) {
        match object.get("options") {
            Some(Value::Array(items)) if !items.is_empty() => {}
            Some(Value::Array(_)) => violations.push(SchemaViolation::invalid(
                "options",
                format!("cannot be empty for {} questions", question_type),
                None,
            )),
            other => violations.push(SchemaViolation::invalid(
                "options",
                format!("must be an array for {} questions", question_type),
                other,
            )),
        }
    }

    if let Some(Value::Array(items)) = object.get("options") {
        for (i, item) in items.iter().enumerate().filter(|(_, item)| !item.is_string()) {
            violations.push(SchemaViolation::invalid(&format!("options[{}]", i), "must be a string", Some(item)));
        }
    }

    match object.get("dependencies") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, prerequisites) in map {
                let well_typed = prerequisites
                    .as_array()
                    .is_some_and(|items| items.iter().all(Value::is_string));
                if !well_typed {
                    violations.push(SchemaViolation::invalid(
                        &format!("dependencies.{}", key),
                        "must be an array of question keys",
                        Some(prerequisites),
                    ));
                }
            }
        }
        Some(other) => violations.push(SchemaViolation::invalid("dependencies", "must be an object", Some(other))),
    }

    match object.get("documents") {
        Some(Value::Array(_)) => {}
        other => violations.push(SchemaViolation::invalid("documents", "must be an array", other)),
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ConsiliumError::Schema(violations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROJECT_TYPE: &str = r#"{"key":"project_type","question":"What type of project are you building?","type":"list","options":["API","Web App"],"satisfied":false,"documents":[],"dependencies":{}}"#;

    fn violated_fields(err: ConsiliumError) -> Vec<String> {
        match err {
            ConsiliumError::Schema(violations) => violations.into_iter().map(|v| v.field).collect(),
            other => panic!("expected schema error, got {other}"),
        }
    }

    #[test]
    fn fenced_block_with_commentary_is_extracted_exactly() {
        let normalizer = ResponseNormalizer::new();
        let raw = format!("Sure! Here is the next question:\n\n```json\n{}\n```\nLet me know.", PROJECT_TYPE);

        assert_eq!(normalizer.locate(&raw).0, ExtractionStrategy::FencedBlock);
        let response = normalizer.normalize(&raw).unwrap();

        assert_eq!(response.key, "project_type");
        assert_eq!(response.question_type, QuestionType::List);
        assert_eq!(response.options, vec!["API".to_string(), "Web App".to_string()]);
        assert!(!response.satisfied);
        assert!(response.documents.is_empty());
        assert!(response.dependencies.is_empty());
    }

    #[test]
    fn raw_and_prose_wrapped_payloads_recover_the_same_record() {
        let normalizer = ResponseNormalizer::new();
        let bare = normalizer.normalize(PROJECT_TYPE).unwrap();
        let wrapped = normalizer
            .normalize(&format!("I think this is next: {} -- hope that helps", PROJECT_TYPE))
            .unwrap();
        let untagged_fence = normalizer.normalize(&format!("```\n{}\n```", PROJECT_TYPE)).unwrap();

        assert_eq!(bare, wrapped);
        assert_eq!(bare, untagged_fence);
        assert_eq!(normalizer.locate(PROJECT_TYPE).0, ExtractionStrategy::BraceSpan);
    }

    #[test]
    fn invalid_json_in_selected_strategy_is_fatal() {
        let normalizer = ResponseNormalizer::new();
        // Valid JSON after the fence must not rescue a broken fenced block
        let raw = format!("```json\n{{ broken\n```\n{}", PROJECT_TYPE);

        match normalizer.normalize(&raw) {
            Err(ConsiliumError::Parse { raw: surfaced, .. }) => assert_eq!(surfaced, raw),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn text_without_json_is_a_parse_error() {
        let normalizer = ResponseNormalizer::new();
        assert!(matches!(
            normalizer.normalize("I'm not sure what to ask next."),
            Err(ConsiliumError::Parse { .. })
        ));
    }

    #[test]
    fn missing_key_is_derived_from_question() {
        let normalizer = ResponseNormalizer::new();
        let response = normalizer
            .normalize(r#"{"question":"Which Cloud Provider do you prefer?","type":"text","satisfied":false}"#)
            .unwrap();

        assert_eq!(response.key, "which_cloud_provider_do_you_prefer");
    }

    #[test]
    fn derived_keys_are_deterministic_slugs() {
        let normalizer = ResponseNormalizer::new();
        let question = "  What's   your DEPLOYMENT model (e.g. Kubernetes, serverless, VMs, bare-metal, edge)?  ";

        let first = normalizer.derive_key(question);
        assert_eq!(first, normalizer.derive_key(question));
        assert!(first.len() <= MAX_KEY_LENGTH);
        assert!(first.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        assert!(first.starts_with("whats_your_deployment_model_eg_kubernetes"));

        assert_eq!(normalizer.derive_key("Café ünïcode?"), "caf_ncode");
    }

    #[test]
    fn transform_coerces_loose_fields() {
        let normalizer = ResponseNormalizer::new();
        let transformed = normalizer.transform(json!({
            "key": "auth_service",
            "question": "Auth?",
            "type": "text",
            "options": "none",
            "satisfied": "yes",
            "documents": null,
            "dependencies": ["not", "an", "object"]
        }));

        assert_eq!(transformed["options"], json!([]));
        assert_eq!(transformed["satisfied"], json!(true));
        assert_eq!(transformed["documents"], json!([]));
        assert_eq!(transformed["dependencies"], json!({}));
    }

    #[test]
    fn transform_is_idempotent() {
        let normalizer = ResponseNormalizer::new();
        let inputs = [
            json!({"question": "Which DB?", "type": "list", "options": ["Postgres"], "satisfied": 1}),
            json!({"key": "", "question": "Region", "type": "text", "satisfied": 0, "documents": "x"}),
            json!({"type": "multiple"}),
            json!("not an object"),
        ];

        for input in inputs {
            let once = normalizer.transform(input);
            let twice = normalizer.transform(once.clone());
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn validation_names_all_missing_fields_at_once() {
        let err = validate(&json!({"options": [], "documents": []})).unwrap_err();
        assert_eq!(violated_fields(err), vec!["key", "question", "type", "satisfied"]);
    }

    #[test]
    fn validation_rejects_unknown_type_with_value() {
        let err = validate(&json!({
            "key": "k", "question": "q", "type": "radio", "satisfied": false, "documents": []
        }))
        .unwrap_err();

        assert!(err.to_string().contains("\"radio\""));
        assert_eq!(violated_fields(err), vec!["type"]);
    }

    #[test]
    fn validation_requires_options_for_choice_questions() {
        let empty = json!({
            "key": "k", "question": "q", "type": "multiple", "options": [], "satisfied": false, "documents": []
        });
        assert_eq!(violated_fields(validate(&empty).unwrap_err()), vec!["options"]);

        let not_array = json!({
            "key": "k", "question": "q", "type": "list", "options": "API", "satisfied": false, "documents": []
        });
        assert_eq!(violated_fields(validate(&not_array).unwrap_err()), vec!["options"]);

        let text = json!({"key": "k", "question": "q", "type": "text", "satisfied": false, "documents": []});
        assert!(validate(&text).is_ok());
    }

    #[test]
    fn validation_rejects_non_object_dependencies_and_non_array_documents() {
        let err = validate(&json!({
            "key": "k", "question": "q", "type": "text", "satisfied": false,
            "dependencies": "project_type", "documents": {}
        }))
        .unwrap_err();

        assert_eq!(violated_fields(err), vec!["dependencies", "documents"]);
    }

    #[test]
    fn wrongly_typed_fields_are_schema_errors_naming_the_field() {
        let normalizer = ResponseNormalizer::new();

        let err = normalizer
            .normalize(r#"{"key":7,"question":"Which database?","type":"text","satisfied":false}"#)
            .unwrap_err();
        assert!(err.to_string().contains("key: must be a string (got 7)"));
        assert_eq!(violated_fields(err), vec!["key"]);

        let err = normalizer
            .normalize(r#"{"key":"db","question":"Which database?","type":"list","options":[1,"Postgres",3],"satisfied":false}"#)
            .unwrap_err();
        assert_eq!(violated_fields(err), vec!["options[0]", "options[2]"]);

        let err = normalizer
            .normalize(r#"{"key":"db","question":"Which database?","type":"text","satisfied":false,"dependencies":{"db":[1],"auth":{"x":1}}}"#)
            .unwrap_err();
        assert_eq!(violated_fields(err), vec!["dependencies.auth", "dependencies.db"]);
    }

    #[test]
    fn bare_string_dependency_becomes_single_prerequisite() {
        let normalizer = ResponseNormalizer::new();
        let response = normalizer
            .normalize(r#"{"key":"database_service","question":"Which database?","type":"text","satisfied":false,"dependencies":{"database_service":"cloud_provider"}}"#)
            .unwrap();

        assert_eq!(response.dependencies["database_service"], vec!["cloud_provider".to_string()]);

        let once = normalizer.transform(json!({"dependencies": {"a": "b"}}));
        assert_eq!(normalizer.transform(once.clone()), once);
    }

    #[test]
    fn normalize_reports_schema_errors_after_defaulting() {
        let normalizer = ResponseNormalizer::new();
        let err = normalizer
            .normalize(r#"{"key":"db","question":"Which database?","type":"list","satisfied":false}"#)
            .unwrap_err();

        assert_eq!(violated_fields(err), vec!["options"]);
    }
}
