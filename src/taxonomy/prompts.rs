//! System prompt builders for the LLM workers.
//!
//! Prompts embed a generated textual rendering of the taxonomy or the
//! selected type schema; the taxonomy is closed so the renderings are
//! deterministic.

use super::{all_types, render_schema, TypeSchema, IRRELEVANT, UNCLASSIFIED};

/// Classification system prompt: the full taxonomy plus the strict JSON
/// contract the classifier must honor.
pub fn classification_prompt() -> String {
    let mut catalog = String::new();
    for t in all_types() {
        catalog.push_str(&format!("- {}: {} ({})\n", t.id, t.label, t.description));
    }
    catalog.push_str(&format!(
        "- {}: a document with no relevance to personal administration\n",
        IRRELEVANT
    ));

    format!(
        r#"You are a document classifier for personal administrative documents.

Classify the document into exactly one of these types:
{catalog}
Respond with a single JSON object:
{{
  "documentType": "<one of the ids above>",
  "extractionConfidence": <number between 0 and 1>,
  "language": "<ISO 639-1 code of the document language>",
  "explanation": "<one short sentence>",
  "documentSummary": "<two sentences summarizing the content>"
}}

Use "{unclassified}" when the document is administrative but fits no listed type.
Use "{irrelevant}" for photos, memes, drafts, or anything non-administrative.
Return only the JSON object, no other text."#,
        catalog = catalog,
        unclassified = UNCLASSIFIED,
        irrelevant = IRRELEVANT,
    )
}

/// Normalization system prompt for one document type.
pub fn normalization_prompt(schema: &TypeSchema) -> String {
    format!(
        r#"You are a document data extractor.

The document has been classified as: {label} ({id}).
Extract the following fields from the document content:

{fields}
Respond with a single JSON object:
{{
  "template": "{id}",
  "fields": {{ <the fields above> }}
}}

Rules:
- Dates must be formatted YYYY-MM-DD. Use YYYY-MM or YYYY when the day or month is not printed.
- Omit optional fields that are not present in the document. Never invent values.
- Numbers must be plain JSON numbers without currency symbols or thousands separators.
Return only the JSON object, no other text."#,
        label = schema.label,
        id = schema.id,
        fields = render_schema(schema),
    )
}

/// OCR system prompt used with vision-capable chat providers.
pub fn ocr_prompt() -> String {
    r#"You are an OCR engine. Read the supplied document image and transcribe it.

Respond with a single JSON object:
{
  "documentDescription": "<one sentence describing the document>",
  "language": "<ISO 639-1 code>",
  "extractedText": {
    "contentType": "structured" or "raw",
    "content": <an object mirroring the document structure, or the full text as a string>
  }
}

Use "structured" with an object when the document has tabular or form-like
layout; use "raw" with a string otherwise. Transcribe every legible
character. Return only the JSON object, no other text."#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::schema_for;

    #[test]
    fn test_classification_prompt_lists_all_types() {
        let prompt = classification_prompt();
        for t in all_types() {
            assert!(prompt.contains(t.id), "missing {}", t.id);
        }
        assert!(prompt.contains(IRRELEVANT));
    }

    #[test]
    fn test_normalization_prompt_embeds_schema() {
        let schema = schema_for("income.payslip").unwrap();
        let prompt = normalization_prompt(schema);
        assert!(prompt.contains("income.payslip"));
        assert!(prompt.contains("payPeriod"));
        assert!(prompt.contains("netSalary"));
    }
}
