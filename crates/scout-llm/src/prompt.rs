//! Prompt construction, keyed on the detector label.
//!
//! The person label gets its own prompt variant: no brand/model/pricing
//! speculation about a person, just clothing and context. Everything else
//! uses the generic object prompt. Same response schema either way.

/// Labels routed to the person-aware prompt.
const PERSON_LABELS: &[&str] = &["person", "man", "woman", "child", "pedestrian"];

const SCHEMA_INSTRUCTIONS: &str = r#"Respond with ONLY a JSON object, no prose and no code fences, matching exactly:
{
  "identification": {
    "name": string,
    "brand": string or null,
    "model": string or null,
    "color": string,
    "category": string,
    "description": string (one sentence)
  },
  "enrichment": {
    "summary": string,
    "price_estimate": {"range_low": string, "range_high": string, "currency": string, "note": string},
    "specs": {string: string, ...},
    "search_query": string
  }
}"#;

/// Build the enrichment prompt for a crop classified as `label`.
pub fn prompt_for_label(label: &str) -> String {
    if is_person_label(label) {
        format!(
            "This image is a cropped detection of a person (detector label: \"{label}\"). \
             Describe what they are wearing and what they appear to be doing. Do not \
             attempt to identify who they are. Use null for brand and model, leave \
             price fields as empty strings, and describe visible clothing in specs.\n\n\
             {SCHEMA_INSTRUCTIONS}"
        )
    } else {
        format!(
            "This image is a cropped detection of an object. An object detector \
             classified it as \"{label}\", which may be imprecise. Identify the object \
             as specifically as you can (brand and model if visible), estimate a \
             realistic secondhand price range, and list notable specs.\n\n\
             {SCHEMA_INSTRUCTIONS}"
        )
    }
}

fn is_person_label(label: &str) -> bool {
    let lowered = label.trim().to_ascii_lowercase();
    PERSON_LABELS.contains(&lowered.as_str())
}
