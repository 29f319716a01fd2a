use std::collections::HashSet;
use std::io::Read;

use serde::{Deserialize, Serialize};

use super::domain::{ProgramId, RequiredFields, NOTES_SECTION};
use super::extension::ExtensionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramCategory {
    ResidentialNoo,
    Commercial,
    Industrial,
    Sba,
    Equipment,
    Land,
    Mobilization,
}

impl ProgramCategory {
    pub const fn label(self) -> &'static str {
        match self {
            Self::ResidentialNoo => "Residential (Non-Owner Occupied)",
            Self::Commercial => "Commercial",
            Self::Industrial => "Industrial",
            Self::Sba => "SBA",
            Self::Equipment => "Equipment",
            Self::Land => "Land",
            Self::Mobilization => "Mobilization",
        }
    }
}

/// What kind of data a section holds; drives who may edit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Personal,
    Financial,
    Business,
    Property,
    Loan,
}

impl SectionKind {
    /// Personal and financial data may only be edited by the borrower or their broker.
    pub const fn is_borrower_private(self) -> bool {
        matches!(self, Self::Personal | Self::Financial)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub key: String,
    pub label: String,
    pub kind: SectionKind,
    /// Optional groups are scored but never block submission.
    #[serde(default)]
    pub optional: bool,
    pub required_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub document_type: String,
    pub label: String,
    pub required: bool,
}

/// How far required documents must have progressed before an application may be submitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentGate {
    #[default]
    NotRequired,
    RequiredUploaded,
    RequiredApproved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPolicy {
    #[serde(default)]
    pub documents: DocumentGate,
}

/// Catalog entry. Never mutated after the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanProgram {
    pub id: ProgramId,
    pub name: String,
    pub category: ProgramCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<ExtensionKind>,
    pub field_groups: Vec<FieldGroup>,
    pub checklist: Vec<ChecklistItem>,
    #[serde(default)]
    pub submission: SubmissionPolicy,
    #[serde(default)]
    pub retired: bool,
}

impl LoanProgram {
    pub fn field_group(&self, key: &str) -> Option<&FieldGroup> {
        self.field_groups.iter().find(|group| group.key == key)
    }

    /// Field groups plus the freeform notes section.
    pub fn accepts_section(&self, key: &str) -> bool {
        key == NOTES_SECTION || self.field_group(key).is_some()
    }

    pub fn checklist_item(&self, document_type: &str) -> Option<&ChecklistItem> {
        self.checklist
            .iter()
            .find(|item| item.document_type == document_type)
    }

    pub fn required_field_count(&self) -> usize {
        self.field_groups
            .iter()
            .map(|group| group.required_fields.len())
            .sum()
    }

    /// Required fields of every non-optional group, keyed by section.
    pub fn submission_fields(&self) -> RequiredFields {
        self.field_groups
            .iter()
            .filter(|group| !group.optional)
            .map(|group| (group.key.clone(), group.required_fields.clone()))
            .collect()
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: &str| CatalogError::InvalidProgram {
            program_id: self.id.0.clone(),
            reason: reason.to_string(),
        };

        if self.id.0.trim().is_empty() {
            return Err(invalid("program id is empty"));
        }
        if self.field_groups.is_empty() {
            return Err(invalid("program declares no field groups"));
        }
        if self.checklist.is_empty() {
            return Err(invalid("program declares no document checklist"));
        }

        let mut sections = HashSet::new();
        for group in &self.field_groups {
            if group.key == NOTES_SECTION {
                return Err(invalid("the notes section cannot be a field group"));
            }
            if !sections.insert(group.key.as_str()) {
                return Err(invalid(&format!("duplicate section {}", group.key)));
            }
            let mut fields = HashSet::new();
            for field in &group.required_fields {
                if !fields.insert(field.as_str()) {
                    return Err(invalid(&format!(
                        "duplicate field {field} in section {}",
                        group.key
                    )));
                }
            }
        }

        let mut documents = HashSet::new();
        for item in &self.checklist {
            if !documents.insert(item.document_type.as_str()) {
                return Err(invalid(&format!(
                    "duplicate checklist document {}",
                    item.document_type
                )));
            }
        }

        if let Some(extension) = self.extension {
            if self.field_group(extension.section_key()).is_none() {
                return Err(invalid(&format!(
                    "extension section {} is not a field group",
                    extension.section_key()
                )));
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("loan program {0} not found")]
    NotFound(String),
    #[error("loan program {program_id} is invalid: {reason}")]
    InvalidProgram { program_id: String, reason: String },
    #[error("duplicate loan program {0}")]
    DuplicateProgram(String),
    #[error("unable to parse program catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Process-wide registry of loan programs, loaded once at boot.
#[derive(Debug, Clone)]
pub struct ProgramCatalog {
    programs: Vec<LoanProgram>,
}

impl ProgramCatalog {
    pub fn standard() -> Self {
        Self {
            programs: standard_programs(),
        }
    }

    pub fn from_programs(programs: Vec<LoanProgram>) -> Result<Self, CatalogError> {
        let mut ids = HashSet::new();
        for program in &programs {
            program.validate()?;
            if !ids.insert(program.id.clone()) {
                return Err(CatalogError::DuplicateProgram(program.id.0.clone()));
            }
        }

        Ok(Self { programs })
    }

    /// Reads a JSON array of programs.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let programs: Vec<LoanProgram> = serde_json::from_reader(reader)?;
        Self::from_programs(programs)
    }

    /// Active program lookup used when starting a new application.
    pub fn get(&self, program_id: &ProgramId) -> Result<&LoanProgram, CatalogError> {
        self.resolve(program_id)
            .filter(|program| !program.retired)
            .ok_or_else(|| CatalogError::NotFound(program_id.0.clone()))
    }

    /// Lookup that also sees retired programs, so in-flight applications keep working.
    pub fn resolve(&self, program_id: &ProgramId) -> Option<&LoanProgram> {
        self.programs
            .iter()
            .find(|program| &program.id == program_id)
    }

    pub fn active(&self) -> impl Iterator<Item = &LoanProgram> {
        self.programs.iter().filter(|program| !program.retired)
    }

    pub fn programs(&self) -> &[LoanProgram] {
        &self.programs
    }
}

impl Default for ProgramCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn group(key: &str, label: &str, kind: SectionKind, required: &[&str]) -> FieldGroup {
    FieldGroup {
        key: key.to_string(),
        label: label.to_string(),
        kind,
        optional: false,
        required_fields: required.iter().map(|field| field.to_string()).collect(),
    }
}

fn optional_group(key: &str, label: &str, kind: SectionKind) -> FieldGroup {
    FieldGroup {
        optional: true,
        ..group(key, label, kind, &[])
    }
}

fn item(document_type: &str, label: &str, required: bool) -> ChecklistItem {
    ChecklistItem {
        document_type: document_type.to_string(),
        label: label.to_string(),
        required,
    }
}

fn personal_contact() -> FieldGroup {
    group(
        "personalContact",
        "Personal Contact",
        SectionKind::Personal,
        &["fullName", "email"],
    )
}

fn personal_financials() -> FieldGroup {
    group(
        "personalFinancials",
        "Assets & Liabilities",
        SectionKind::Financial,
        &["liquidAssets", "totalLiabilities", "creditScore"],
    )
}

fn property_info() -> FieldGroup {
    group(
        "propertyInfo",
        "Property Information",
        SectionKind::Property,
        &["propertyAddress", "propertyType", "estimatedValue"],
    )
}

fn business_info() -> FieldGroup {
    group(
        "businessInfo",
        "Business Information",
        SectionKind::Business,
        &["businessName", "entityType", "ein", "yearsInBusiness"],
    )
}

fn business_financials() -> FieldGroup {
    group(
        "businessFinancials",
        "Business Financials",
        SectionKind::Financial,
        &["annualRevenue", "netIncome"],
    )
}

fn loan_request() -> FieldGroup {
    group(
        "loanRequest",
        "Loan Request",
        SectionKind::Loan,
        &["loanAmount", "loanPurpose"],
    )
}

fn government_id() -> ChecklistItem {
    item("government_id", "Government-issued photo ID", true)
}

fn standard_programs() -> Vec<LoanProgram> {
    vec![
        LoanProgram {
            id: ProgramId::new("DSCR"),
            name: "DSCR Rental".to_string(),
            category: ProgramCategory::ResidentialNoo,
            extension: Some(ExtensionKind::Dscr),
            field_groups: vec![
                personal_contact(),
                property_info(),
                group(
                    "dscrInfo",
                    "Rental Income",
                    SectionKind::Loan,
                    &["monthlyRent", "loanAmount"],
                ),
            ],
            checklist: vec![
                government_id(),
                item("purchase_contract", "Executed purchase contract", true),
                item("lease_agreements", "Current lease agreements", true),
                item("insurance_quote", "Hazard insurance quote", false),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::NotRequired,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("FIX_AND_FLIP"),
            name: "Fix and Flip".to_string(),
            category: ProgramCategory::ResidentialNoo,
            extension: Some(ExtensionKind::FixAndFlip),
            field_groups: vec![
                personal_contact(),
                personal_financials(),
                property_info(),
                group(
                    "fixAndFlipInfo",
                    "Rehab Plan",
                    SectionKind::Loan,
                    &[
                        "purchasePrice",
                        "rehabBudget",
                        "afterRepairValue",
                        "exitStrategy",
                    ],
                ),
            ],
            checklist: vec![
                government_id(),
                item("bank_statements", "Two months of bank statements", true),
                item("purchase_contract", "Executed purchase contract", true),
                item("scope_of_work", "Scope of work", true),
                item("track_record", "Prior flip track record", false),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::RequiredUploaded,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("GROUND_UP_CONSTRUCTION"),
            name: "Ground-Up Construction".to_string(),
            category: ProgramCategory::ResidentialNoo,
            extension: Some(ExtensionKind::GroundUpConstruction),
            field_groups: vec![
                personal_contact(),
                personal_financials(),
                property_info(),
                group(
                    "groundUpConstructionInfo",
                    "Construction Plan",
                    SectionKind::Loan,
                    &[
                        "landCost",
                        "constructionBudget",
                        "drawSchedule",
                        "builderName",
                        "projectedCompletion",
                    ],
                ),
            ],
            checklist: vec![
                government_id(),
                item("bank_statements", "Two months of bank statements", true),
                item("construction_budget", "Line-item construction budget", true),
                item("draw_schedule", "Draw schedule", true),
                item("building_plans", "Approved building plans", true),
                item("builder_license", "General contractor license", false),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::RequiredUploaded,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("BRIDGE"),
            name: "Commercial Bridge".to_string(),
            category: ProgramCategory::Commercial,
            extension: Some(ExtensionKind::Bridge),
            field_groups: vec![
                personal_contact(),
                business_info(),
                property_info(),
                group(
                    "bridgeInfo",
                    "Bridge Terms",
                    SectionKind::Loan,
                    &["loanAmount", "termMonths", "exitStrategy"],
                ),
            ],
            checklist: vec![
                government_id(),
                item("entity_documents", "Entity formation documents", true),
                item("rent_roll", "Current rent roll", false),
                item("appraisal", "Recent appraisal", false),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::NotRequired,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("SBA_7A"),
            name: "SBA 7(a)".to_string(),
            category: ProgramCategory::Sba,
            extension: None,
            field_groups: vec![
                personal_contact(),
                personal_financials(),
                group(
                    "personalIncome",
                    "Personal Income",
                    SectionKind::Financial,
                    &["employer", "annualIncome"],
                ),
                business_info(),
                business_financials(),
                loan_request(),
            ],
            checklist: vec![
                government_id(),
                item("personal_tax_returns", "Personal tax returns (3 years)", true),
                item("business_tax_returns", "Business tax returns (3 years)", true),
                item(
                    "personal_financial_statement",
                    "SBA Form 413 personal financial statement",
                    true,
                ),
                item("business_debt_schedule", "Business debt schedule", true),
                item("sba_form_1919", "SBA Form 1919", true),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::RequiredApproved,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("EQUIPMENT"),
            name: "Equipment Financing".to_string(),
            category: ProgramCategory::Equipment,
            extension: Some(ExtensionKind::Equipment),
            field_groups: vec![
                personal_contact(),
                business_info(),
                group(
                    "equipmentInfo",
                    "Equipment Details",
                    SectionKind::Loan,
                    &["vendorName", "equipmentDescription", "purchasePrice"],
                ),
            ],
            checklist: vec![
                government_id(),
                item("equipment_quote", "Vendor equipment quote", true),
                item("bank_statements", "Three months of business bank statements", true),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::RequiredUploaded,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("INDUSTRIAL"),
            name: "Industrial Property".to_string(),
            category: ProgramCategory::Industrial,
            extension: None,
            field_groups: vec![
                personal_contact(),
                business_info(),
                business_financials(),
                property_info(),
                loan_request(),
            ],
            checklist: vec![
                government_id(),
                item("entity_documents", "Entity formation documents", true),
                item("business_tax_returns", "Business tax returns (2 years)", true),
                item("environmental_report", "Phase I environmental report", false),
                item("rent_roll", "Current rent roll", false),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::RequiredUploaded,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("LAND"),
            name: "Land Acquisition".to_string(),
            category: ProgramCategory::Land,
            extension: None,
            field_groups: vec![
                personal_contact(),
                property_info(),
                group(
                    "landInfo",
                    "Land Details",
                    SectionKind::Property,
                    &["acreage", "zoning", "intendedUse"],
                ),
                optional_group("siteHistory", "Site History", SectionKind::Property),
            ],
            checklist: vec![
                government_id(),
                item("purchase_contract", "Executed purchase contract", true),
                item("survey", "Boundary survey", false),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::NotRequired,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("MOBILIZATION"),
            name: "Contract Mobilization".to_string(),
            category: ProgramCategory::Mobilization,
            extension: Some(ExtensionKind::Mobilization),
            field_groups: vec![
                personal_contact(),
                business_info(),
                group(
                    "mobilizationInfo",
                    "Contract Details",
                    SectionKind::Loan,
                    &["contractAmount", "awardingAgency", "mobilizationAmount"],
                ),
                optional_group("projectSchedule", "Project Schedule", SectionKind::Loan),
            ],
            checklist: vec![
                government_id(),
                item("contract_award", "Contract award letter", true),
                item(
                    "business_bank_statements",
                    "Three months of business bank statements",
                    true,
                ),
                item(
                    "payment_and_performance_bond",
                    "Payment and performance bond",
                    false,
                ),
            ],
            submission: SubmissionPolicy {
                documents: DocumentGate::RequiredUploaded,
            },
            retired: false,
        },
        LoanProgram {
            id: ProgramId::new("STATED_INCOME"),
            name: "Stated Income (retired)".to_string(),
            category: ProgramCategory::ResidentialNoo,
            extension: None,
            field_groups: vec![personal_contact(), property_info(), loan_request()],
            checklist: vec![government_id()],
            submission: SubmissionPolicy::default(),
            retired: true,
        },
    ]
}
