//! Closed set of document-type definitions with per-type structured
//! schemas.
//!
//! The schemas drive both prompt generation (a textual rendering embedded
//! into the classification and normalization system prompts) and strict
//! validation of LLM responses. The set is closed: membership gates
//! structured normalization.

mod prompts;
mod schemas;

pub use prompts::{classification_prompt, normalization_prompt, ocr_prompt};
pub use schemas::{all_types, schema_for};

/// Pseudo-type for documents the classifier could not place.
pub const UNCLASSIFIED: &str = "other.unclassified";
/// Pseudo-type for documents with no relevance to the product.
pub const IRRELEVANT: &str = "other.irrelevant";
/// Pseudo-type recorded on a parent document that was split into children.
pub const SPLITTED: &str = "splitted";

/// Field type in a document-type schema.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    String,
    /// ISO date string (`YYYY-MM-DD`, `YYYY-MM`, `YYYY` accepted downstream).
    Date,
    Number,
    Boolean,
    /// Nested object with its own field specs.
    Object(&'static [FieldSpec]),
    /// Array of free-form strings.
    StringArray,
}

/// One field in a document-type schema.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
}

/// A document type with its structured extraction schema.
#[derive(Debug, Clone, Copy)]
pub struct TypeSchema {
    /// Taxonomy id, e.g. `income.payslip`.
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub fields: &'static [FieldSpec],
}

/// Whether `id` is a valid classification outcome: a taxonomy member or
/// one of the pseudo-types.
pub fn is_valid_classification(id: &str) -> bool {
    id == UNCLASSIFIED || id == IRRELEVANT || id == SPLITTED || schema_for(id).is_some()
}

/// Strictly validate normalized `fields` against a type schema.
///
/// Required fields must be present and non-null; present fields must match
/// their declared kind; top-level keys outside the schema are rejected.
pub fn validate_fields(schema: &TypeSchema, fields: &serde_json::Value) -> Result<(), String> {
    let obj = fields
        .as_object()
        .ok_or_else(|| "fields must be an object".to_string())?;

    for key in obj.keys() {
        if !schema.fields.iter().any(|f| f.name == key) {
            return Err(format!("unknown field '{}' for {}", key, schema.id));
        }
    }
    validate_object(schema.fields, obj, schema.id)
}

fn validate_object(
    specs: &[FieldSpec],
    obj: &serde_json::Map<String, serde_json::Value>,
    context: &str,
) -> Result<(), String> {
    for spec in specs {
        match obj.get(spec.name) {
            None | Some(serde_json::Value::Null) => {
                if spec.required {
                    return Err(format!("missing required field '{}.{}'", context, spec.name));
                }
            }
            Some(value) => validate_value(spec, value, context)?,
        }
    }
    Ok(())
}

fn validate_value(spec: &FieldSpec, value: &serde_json::Value, context: &str) -> Result<(), String> {
    let ok = match spec.kind {
        FieldKind::String | FieldKind::Date => value.is_string(),
        FieldKind::Number => value.is_number(),
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::StringArray => value
            .as_array()
            .is_some_and(|a| a.iter().all(|v| v.is_string())),
        FieldKind::Object(inner) => {
            let nested = value
                .as_object()
                .ok_or_else(|| format!("field '{}.{}' must be an object", context, spec.name))?;
            validate_object(inner, nested, spec.name)?;
            true
        }
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "field '{}.{}' has the wrong type",
            context, spec.name
        ))
    }
}

/// Render a schema as the textual form embedded into prompts.
pub fn render_schema(schema: &TypeSchema) -> String {
    let mut out = String::new();
    render_fields(schema.fields, 0, &mut out);
    out
}

fn render_fields(specs: &[FieldSpec], indent: usize, out: &mut String) {
    for spec in specs {
        let pad = "  ".repeat(indent);
        let kind = match spec.kind {
            FieldKind::String => "string",
            FieldKind::Date => "date (YYYY-MM-DD)",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::StringArray => "array of strings",
            FieldKind::Object(_) => "object",
        };
        let req = if spec.required { "required" } else { "optional" };
        out.push_str(&format!(
            "{}- {} ({}, {}): {}\n",
            pad, spec.name, kind, req, spec.description
        ));
        if let FieldKind::Object(inner) = spec.kind {
            render_fields(inner, indent + 1, out);
        }
    }
}

/// JSON Schema rendering used for `response_format: json_schema` requests.
pub fn json_schema(schema: &TypeSchema) -> serde_json::Value {
    fn kind_to_json(kind: &FieldKind) -> serde_json::Value {
        match kind {
            FieldKind::String | FieldKind::Date => serde_json::json!({"type": "string"}),
            FieldKind::Number => serde_json::json!({"type": "number"}),
            FieldKind::Boolean => serde_json::json!({"type": "boolean"}),
            FieldKind::StringArray => {
                serde_json::json!({"type": "array", "items": {"type": "string"}})
            }
            FieldKind::Object(inner) => specs_to_json(inner),
        }
    }
    fn specs_to_json(specs: &[FieldSpec]) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for spec in specs {
            properties.insert(spec.name.to_string(), kind_to_json(&spec.kind));
            if spec.required {
                required.push(serde_json::Value::String(spec.name.to_string()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
    specs_to_json(schema.fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_taxonomy_membership() {
        assert!(is_valid_classification("income.payslip"));
        assert!(is_valid_classification(UNCLASSIFIED));
        assert!(is_valid_classification(SPLITTED));
        assert!(!is_valid_classification("income.lottery_win"));
    }

    #[test]
    fn test_validate_payslip_fields() {
        let schema = schema_for("income.payslip").unwrap();
        let ok = json!({
            "employerName": "ACME",
            "netSalary": 2000.0,
            "payPeriod": {"startDate": "2024-01-01", "endDate": "2024-01-31"},
        });
        assert!(validate_fields(schema, &ok).is_ok());

        // Unknown top-level field rejected.
        let unknown = json!({"employerName": "ACME", "netSalary": 1.0, "color": "blue"});
        assert!(validate_fields(schema, &unknown).is_err());

        // Wrong nested type rejected.
        let bad = json!({
            "employerName": "ACME",
            "netSalary": 2000.0,
            "payPeriod": {"startDate": 20240101, "endDate": "2024-01-31"},
        });
        assert!(validate_fields(schema, &bad).is_err());
    }

    #[test]
    fn test_missing_required_field() {
        let schema = schema_for("housing.utility_bill").unwrap();
        let missing = json!({"providerName": "EDF"});
        let err = validate_fields(schema, &missing).unwrap_err();
        assert!(err.contains("billDate"), "{err}");
    }

    #[test]
    fn test_render_schema_lists_fields() {
        let schema = schema_for("income.payslip").unwrap();
        let rendered = render_schema(schema);
        assert!(rendered.contains("payPeriod"));
        assert!(rendered.contains("startDate"));
    }

    #[test]
    fn test_json_schema_shape() {
        let schema = schema_for("income.tax_notice").unwrap();
        let js = json_schema(schema);
        assert_eq!(js["type"], "object");
        assert_eq!(js["additionalProperties"], false);
        assert!(js["properties"]["fiscalYear"].is_object());
    }
}
