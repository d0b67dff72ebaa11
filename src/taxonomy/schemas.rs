//! Per-type structured extraction schemas.

use super::{FieldKind, FieldSpec, TypeSchema};

const PERIOD: &[FieldSpec] = &[
    FieldSpec {
        name: "startDate",
        kind: FieldKind::Date,
        required: true,
        description: "First day of the period",
    },
    FieldSpec {
        name: "endDate",
        kind: FieldKind::Date,
        required: true,
        description: "Last day of the period",
    },
];

const DATES: &[FieldSpec] = &[
    FieldSpec {
        name: "issueDate",
        kind: FieldKind::Date,
        required: false,
        description: "Date the document was issued",
    },
    FieldSpec {
        name: "expiryDate",
        kind: FieldKind::Date,
        required: false,
        description: "Date the document expires",
    },
];

const PAYSLIP: &[FieldSpec] = &[
    FieldSpec {
        name: "employerName",
        kind: FieldKind::String,
        required: true,
        description: "Legal name of the employer",
    },
    FieldSpec {
        name: "employeeName",
        kind: FieldKind::String,
        required: false,
        description: "Full name of the employee",
    },
    FieldSpec {
        name: "grossSalary",
        kind: FieldKind::Number,
        required: false,
        description: "Gross salary for the period",
    },
    FieldSpec {
        name: "netSalary",
        kind: FieldKind::Number,
        required: true,
        description: "Net salary paid for the period",
    },
    FieldSpec {
        name: "currency",
        kind: FieldKind::String,
        required: false,
        description: "ISO currency code",
    },
    FieldSpec {
        name: "payPeriod",
        kind: FieldKind::Object(PERIOD),
        required: true,
        description: "Period the payslip covers",
    },
];

const TAX_NOTICE: &[FieldSpec] = &[
    FieldSpec {
        name: "authority",
        kind: FieldKind::String,
        required: false,
        description: "Issuing tax authority",
    },
    FieldSpec {
        name: "fiscalYear",
        kind: FieldKind::String,
        required: true,
        description: "Fiscal year the notice covers (YYYY)",
    },
    FieldSpec {
        name: "referenceNumber",
        kind: FieldKind::String,
        required: false,
        description: "Notice reference number",
    },
    FieldSpec {
        name: "taxableIncome",
        kind: FieldKind::Number,
        required: false,
        description: "Declared taxable income",
    },
    FieldSpec {
        name: "taxAmount",
        kind: FieldKind::Number,
        required: false,
        description: "Total tax due",
    },
];

const BANK_STATEMENT: &[FieldSpec] = &[
    FieldSpec {
        name: "bankName",
        kind: FieldKind::String,
        required: true,
        description: "Name of the bank",
    },
    FieldSpec {
        name: "accountHolder",
        kind: FieldKind::String,
        required: false,
        description: "Account holder name",
    },
    FieldSpec {
        name: "iban",
        kind: FieldKind::String,
        required: false,
        description: "IBAN, if printed",
    },
    FieldSpec {
        name: "closingBalance",
        kind: FieldKind::Number,
        required: false,
        description: "Balance at the end of the period",
    },
    FieldSpec {
        name: "bankStatementPeriod",
        kind: FieldKind::Object(PERIOD),
        required: true,
        description: "Period the statement covers",
    },
];

const RIB: &[FieldSpec] = &[
    FieldSpec {
        name: "bankName",
        kind: FieldKind::String,
        required: true,
        description: "Name of the bank",
    },
    FieldSpec {
        name: "accountHolder",
        kind: FieldKind::String,
        required: true,
        description: "Account holder name",
    },
    FieldSpec {
        name: "iban",
        kind: FieldKind::String,
        required: true,
        description: "IBAN",
    },
    FieldSpec {
        name: "bic",
        kind: FieldKind::String,
        required: false,
        description: "BIC/SWIFT code",
    },
];

const LEASE: &[FieldSpec] = &[
    FieldSpec {
        name: "landlordName",
        kind: FieldKind::String,
        required: false,
        description: "Landlord or agency name",
    },
    FieldSpec {
        name: "tenantNames",
        kind: FieldKind::StringArray,
        required: false,
        description: "All tenants named on the lease",
    },
    FieldSpec {
        name: "propertyAddress",
        kind: FieldKind::String,
        required: true,
        description: "Address of the leased property",
    },
    FieldSpec {
        name: "monthlyRent",
        kind: FieldKind::Number,
        required: false,
        description: "Monthly rent excluding charges",
    },
    FieldSpec {
        name: "startDate",
        kind: FieldKind::Date,
        required: true,
        description: "Lease start date",
    },
];

const UTILITY_BILL: &[FieldSpec] = &[
    FieldSpec {
        name: "providerName",
        kind: FieldKind::String,
        required: true,
        description: "Utility provider",
    },
    FieldSpec {
        name: "serviceAddress",
        kind: FieldKind::String,
        required: false,
        description: "Address the service is billed for",
    },
    FieldSpec {
        name: "amountDue",
        kind: FieldKind::Number,
        required: false,
        description: "Total amount due",
    },
    FieldSpec {
        name: "billDate",
        kind: FieldKind::Date,
        required: true,
        description: "Date the bill was issued",
    },
];

const INSURANCE_CERT: &[FieldSpec] = &[
    FieldSpec {
        name: "insurerName",
        kind: FieldKind::String,
        required: true,
        description: "Insurance company",
    },
    FieldSpec {
        name: "policyNumber",
        kind: FieldKind::String,
        required: false,
        description: "Policy number",
    },
    FieldSpec {
        name: "insuredName",
        kind: FieldKind::String,
        required: false,
        description: "Insured person or entity",
    },
    FieldSpec {
        name: "coveragePeriod",
        kind: FieldKind::Object(PERIOD),
        required: true,
        description: "Period the certificate covers",
    },
];

const EMPLOYMENT_CONTRACT: &[FieldSpec] = &[
    FieldSpec {
        name: "employerName",
        kind: FieldKind::String,
        required: true,
        description: "Legal name of the employer",
    },
    FieldSpec {
        name: "employeeName",
        kind: FieldKind::String,
        required: false,
        description: "Full name of the employee",
    },
    FieldSpec {
        name: "position",
        kind: FieldKind::String,
        required: false,
        description: "Job title",
    },
    FieldSpec {
        name: "contractType",
        kind: FieldKind::String,
        required: false,
        description: "Permanent, fixed-term, apprenticeship...",
    },
    FieldSpec {
        name: "startDate",
        kind: FieldKind::Date,
        required: true,
        description: "First day of employment",
    },
    FieldSpec {
        name: "probationPeriod",
        kind: FieldKind::Object(PERIOD),
        required: false,
        description: "Probation period, when stated",
    },
];

const ENROLLMENT: &[FieldSpec] = &[
    FieldSpec {
        name: "institutionName",
        kind: FieldKind::String,
        required: true,
        description: "School or university",
    },
    FieldSpec {
        name: "studentName",
        kind: FieldKind::String,
        required: false,
        description: "Enrolled student",
    },
    FieldSpec {
        name: "program",
        kind: FieldKind::String,
        required: false,
        description: "Program or grade",
    },
    FieldSpec {
        name: "academicYear",
        kind: FieldKind::String,
        required: true,
        description: "Academic year as YYYY/YYYY",
    },
];

const ID_CARD: &[FieldSpec] = &[
    FieldSpec {
        name: "fullName",
        kind: FieldKind::String,
        required: true,
        description: "Full name as printed",
    },
    FieldSpec {
        name: "documentNumber",
        kind: FieldKind::String,
        required: false,
        description: "Card number",
    },
    FieldSpec {
        name: "nationality",
        kind: FieldKind::String,
        required: false,
        description: "Nationality",
    },
    FieldSpec {
        name: "birthDate",
        kind: FieldKind::Date,
        required: false,
        description: "Date of birth",
    },
    FieldSpec {
        name: "dates",
        kind: FieldKind::Object(DATES),
        required: false,
        description: "Issue and expiry dates",
    },
];

const PASSPORT: &[FieldSpec] = &[
    FieldSpec {
        name: "fullName",
        kind: FieldKind::String,
        required: true,
        description: "Full name as printed",
    },
    FieldSpec {
        name: "passportNumber",
        kind: FieldKind::String,
        required: false,
        description: "Passport number",
    },
    FieldSpec {
        name: "nationality",
        kind: FieldKind::String,
        required: false,
        description: "Nationality",
    },
    FieldSpec {
        name: "birthDate",
        kind: FieldKind::Date,
        required: false,
        description: "Date of birth",
    },
    FieldSpec {
        name: "dates",
        kind: FieldKind::Object(DATES),
        required: false,
        description: "Issue and expiry dates",
    },
];

const VEHICLE_REGISTRATION: &[FieldSpec] = &[
    FieldSpec {
        name: "registrationNumber",
        kind: FieldKind::String,
        required: true,
        description: "License plate number",
    },
    FieldSpec {
        name: "ownerName",
        kind: FieldKind::String,
        required: false,
        description: "Registered owner",
    },
    FieldSpec {
        name: "make",
        kind: FieldKind::String,
        required: false,
        description: "Vehicle make",
    },
    FieldSpec {
        name: "model",
        kind: FieldKind::String,
        required: false,
        description: "Vehicle model",
    },
    FieldSpec {
        name: "dates",
        kind: FieldKind::Object(DATES),
        required: false,
        description: "First registration and validity dates",
    },
];

const RECEIPT: &[FieldSpec] = &[
    FieldSpec {
        name: "merchantName",
        kind: FieldKind::String,
        required: true,
        description: "Merchant or vendor",
    },
    FieldSpec {
        name: "totalAmount",
        kind: FieldKind::Number,
        required: false,
        description: "Total amount paid",
    },
    FieldSpec {
        name: "currency",
        kind: FieldKind::String,
        required: false,
        description: "ISO currency code",
    },
    FieldSpec {
        name: "receiptDate",
        kind: FieldKind::Date,
        required: true,
        description: "Date of purchase",
    },
];

const UNCLASSIFIED_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        name: "summary",
        kind: FieldKind::String,
        required: false,
        description: "Short free-form summary of the document",
    },
    FieldSpec {
        name: "dates",
        kind: FieldKind::Object(DATES),
        required: false,
        description: "Any issue/expiry dates found",
    },
];

static TYPES: &[TypeSchema] = &[
    TypeSchema {
        id: "income.payslip",
        label: "Payslip",
        description: "Salary statement issued by an employer for a pay period",
        fields: PAYSLIP,
    },
    TypeSchema {
        id: "income.tax_notice",
        label: "Tax notice",
        description: "Income tax assessment issued by a tax authority",
        fields: TAX_NOTICE,
    },
    TypeSchema {
        id: "banking.bank_statement",
        label: "Bank statement",
        description: "Account statement covering a period",
        fields: BANK_STATEMENT,
    },
    TypeSchema {
        id: "banking.rib",
        label: "Bank account details",
        description: "Bank account identity document (RIB) with IBAN",
        fields: RIB,
    },
    TypeSchema {
        id: "housing.lease_agreement",
        label: "Lease agreement",
        description: "Residential lease contract",
        fields: LEASE,
    },
    TypeSchema {
        id: "housing.utility_bill",
        label: "Utility bill",
        description: "Electricity, gas, water or internet bill",
        fields: UTILITY_BILL,
    },
    TypeSchema {
        id: "insurance.insurance_certificate",
        label: "Insurance certificate",
        description: "Proof of insurance coverage for a period",
        fields: INSURANCE_CERT,
    },
    TypeSchema {
        id: "employment.employment_contract",
        label: "Employment contract",
        description: "Contract between employer and employee",
        fields: EMPLOYMENT_CONTRACT,
    },
    TypeSchema {
        id: "education.enrollment_certificate",
        label: "Enrollment certificate",
        description: "Proof of enrollment for an academic year",
        fields: ENROLLMENT,
    },
    TypeSchema {
        id: "identity.id_card",
        label: "Identity card",
        description: "National identity card",
        fields: ID_CARD,
    },
    TypeSchema {
        id: "identity.passport",
        label: "Passport",
        description: "Passport identity pages",
        fields: PASSPORT,
    },
    TypeSchema {
        id: "vehicle.registration",
        label: "Vehicle registration",
        description: "Vehicle registration certificate",
        fields: VEHICLE_REGISTRATION,
    },
    TypeSchema {
        id: "receipts.receipt",
        label: "Receipt",
        description: "Proof of purchase from a merchant",
        fields: RECEIPT,
    },
    TypeSchema {
        id: "other.unclassified",
        label: "Unclassified",
        description: "Recognizable document that fits no known type",
        fields: UNCLASSIFIED_FIELDS,
    },
];

/// All registered document types, pseudo-type `other.unclassified`
/// included (it carries a minimal schema so normalization always has a
/// fallback template).
pub fn all_types() -> &'static [TypeSchema] {
    TYPES
}

/// Look up a type schema by taxonomy id.
pub fn schema_for(id: &str) -> Option<&'static TypeSchema> {
    TYPES.iter().find(|t| t.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let mut ids: Vec<_> = TYPES.iter().map(|t| t.id).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn test_unclassified_has_schema() {
        assert!(schema_for("other.unclassified").is_some());
    }

    #[test]
    fn test_date_inference_fields_are_covered() {
        // Every period/date field the write-back date inference consumes
        // exists in at least one schema.
        let field_names: Vec<&str> = TYPES
            .iter()
            .flat_map(|t| t.fields.iter().map(|f| f.name))
            .collect();
        for needle in [
            "payPeriod",
            "bankStatementPeriod",
            "coveragePeriod",
            "probationPeriod",
            "billDate",
            "receiptDate",
            "startDate",
            "fiscalYear",
            "academicYear",
            "dates",
        ] {
            assert!(field_names.contains(&needle), "missing {needle}");
        }
    }
}
