//! Deterministic date inference over normalized fields.
//!
//! Derives `(document_date, valid_from, valid_until)` from the structured
//! extraction so downstream validity queries never re-read the payload.

use chrono::NaiveDate;

/// Period-shaped fields, checked in order; the first present one seeds
/// the validity range.
const PERIOD_FIELDS: &[&str] = &[
    "period",
    "payPeriod",
    "bankStatementPeriod",
    "coveragePeriod",
    "probationPeriod",
];

/// Single-date fields that override the document date.
const DOCUMENT_DATE_FIELDS: &[&str] = &["billDate", "receiptDate"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferredDates {
    pub document_date: Option<NaiveDate>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

/// Parse `YYYY-MM-DD`, `YYYY-MM` (first of month), or `YYYY` (first of
/// year). Anything else is `None`.
pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date);
    }
    if s.len() == 7 {
        if let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d") {
            return Some(date);
        }
    }
    if s.len() == 4 {
        if let Ok(year) = s.parse::<i32>() {
            return NaiveDate::from_ymd_opt(year, 1, 1);
        }
    }
    None
}

fn field_date(fields: &serde_json::Value, pointer: &str) -> Option<NaiveDate> {
    fields
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .and_then(parse_flexible_date)
}

/// Run the inference over normalized `fields`.
pub fn infer_dates(fields: &serde_json::Value) -> InferredDates {
    let mut inferred = InferredDates::default();

    // Seed from the first period-shaped field.
    for period in PERIOD_FIELDS {
        let start = field_date(fields, &format!("/{}/startDate", period));
        let end = field_date(fields, &format!("/{}/endDate", period));
        if start.is_some() || end.is_some() {
            inferred.valid_from = start;
            inferred.valid_until = end;
            inferred.document_date = end;
            break;
        }
    }

    // Specific single-date fields override the document date.
    for field in DOCUMENT_DATE_FIELDS {
        if let Some(date) = field_date(fields, &format!("/{}", field)) {
            inferred.document_date = Some(date);
        }
    }

    if let Some(start) = field_date(fields, "/startDate") {
        inferred.valid_from = Some(start);
        inferred.document_date.get_or_insert(start);
    }

    if let Some(year) = fields
        .get("fiscalYear")
        .and_then(|v| v.as_str())
        .and_then(|s| s.trim().parse::<i32>().ok())
    {
        inferred.valid_from = NaiveDate::from_ymd_opt(year, 1, 1);
        inferred.valid_until = NaiveDate::from_ymd_opt(year, 12, 31);
    }

    // Academic years run September through August.
    if let Some(academic) = fields.get("academicYear").and_then(|v| v.as_str()) {
        if let Some((first, _)) = academic.split_once('/') {
            if let Ok(year) = first.trim().parse::<i32>() {
                inferred.valid_from = NaiveDate::from_ymd_opt(year, 9, 1);
                inferred.valid_until = NaiveDate::from_ymd_opt(year + 1, 8, 31);
            }
        }
    }

    if let Some(issue) = field_date(fields, "/dates/issueDate") {
        inferred.document_date.get_or_insert(issue);
        inferred.valid_from.get_or_insert(issue);
    }
    if let Some(expiry) = field_date(fields, "/dates/expiryDate") {
        inferred.valid_until.get_or_insert(expiry);
    }

    inferred
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_flexible_date() {
        assert_eq!(parse_flexible_date("2024-01-31"), Some(date(2024, 1, 31)));
        assert_eq!(parse_flexible_date("2024-01"), Some(date(2024, 1, 1)));
        assert_eq!(parse_flexible_date("2024"), Some(date(2024, 1, 1)));
        assert_eq!(parse_flexible_date("31/01/2024"), None);
        assert_eq!(parse_flexible_date("soon"), None);
    }

    #[test]
    fn test_pay_period_seeds_everything() {
        let fields = json!({
            "payPeriod": {"startDate": "2024-01-01", "endDate": "2024-01-31"},
        });
        let inferred = infer_dates(&fields);
        assert_eq!(inferred.valid_from, Some(date(2024, 1, 1)));
        assert_eq!(inferred.valid_until, Some(date(2024, 1, 31)));
        assert_eq!(inferred.document_date, Some(date(2024, 1, 31)));
    }

    #[test]
    fn test_bill_date_overrides_document_date() {
        let fields = json!({
            "coveragePeriod": {"startDate": "2024-01-01", "endDate": "2024-12-31"},
            "billDate": "2024-02-15",
        });
        let inferred = infer_dates(&fields);
        assert_eq!(inferred.document_date, Some(date(2024, 2, 15)));
        assert_eq!(inferred.valid_until, Some(date(2024, 12, 31)));
    }

    #[test]
    fn test_start_date_sets_valid_from() {
        let fields = json!({"startDate": "2023-09-01"});
        let inferred = infer_dates(&fields);
        assert_eq!(inferred.valid_from, Some(date(2023, 9, 1)));
        assert_eq!(inferred.document_date, Some(date(2023, 9, 1)));
        assert_eq!(inferred.valid_until, None);
    }

    #[test]
    fn test_fiscal_year() {
        let fields = json!({"fiscalYear": "2023"});
        let inferred = infer_dates(&fields);
        assert_eq!(inferred.valid_from, Some(date(2023, 1, 1)));
        assert_eq!(inferred.valid_until, Some(date(2023, 12, 31)));
    }

    #[test]
    fn test_academic_year() {
        let fields = json!({"academicYear": "2024/2025"});
        let inferred = infer_dates(&fields);
        assert_eq!(inferred.valid_from, Some(date(2024, 9, 1)));
        assert_eq!(inferred.valid_until, Some(date(2025, 8, 31)));
    }

    #[test]
    fn test_issue_and_expiry_fallback() {
        let fields = json!({
            "dates": {"issueDate": "2020-05-10", "expiryDate": "2030-05-10"},
        });
        let inferred = infer_dates(&fields);
        assert_eq!(inferred.document_date, Some(date(2020, 5, 10)));
        assert_eq!(inferred.valid_from, Some(date(2020, 5, 10)));
        assert_eq!(inferred.valid_until, Some(date(2030, 5, 10)));
    }

    #[test]
    fn test_fallback_does_not_override_period() {
        let fields = json!({
            "payPeriod": {"startDate": "2024-01-01", "endDate": "2024-01-31"},
            "dates": {"issueDate": "2024-02-05"},
        });
        let inferred = infer_dates(&fields);
        // The period already set these; the fallback must not clobber.
        assert_eq!(inferred.document_date, Some(date(2024, 1, 31)));
        assert_eq!(inferred.valid_from, Some(date(2024, 1, 1)));
    }

    #[test]
    fn test_partial_month_dates() {
        let fields = json!({"receiptDate": "2024-06"});
        let inferred = infer_dates(&fields);
        assert_eq!(inferred.document_date, Some(date(2024, 6, 1)));
    }

    #[test]
    fn test_empty_fields() {
        assert_eq!(infer_dates(&json!({})), InferredDates::default());
    }
}
