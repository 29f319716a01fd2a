use serde::Serialize;
use serde_json::Value;

use super::catalog::{FieldGroup, LoanProgram};
use super::domain::ApplicationRecord;

/// Completion state of one field group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionProgress {
    pub section: String,
    pub label: String,
    pub optional: bool,
    pub required: usize,
    pub filled: usize,
    pub percent: f64,
    pub missing_fields: Vec<String>,
}

impl SectionProgress {
    pub fn is_complete(&self) -> bool {
        self.filled == self.required
    }
}

/// Derived completion view. Recomputed on every read, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub overall_percent: f64,
    pub sections: Vec<SectionProgress>,
    pub next_incomplete_section: Option<String>,
    /// Every non-optional group is fully filled.
    pub required_sections_complete: bool,
}

impl ProgressSnapshot {
    pub fn percent_for(&self, section: &str) -> Option<f64> {
        self.sections
            .iter()
            .find(|progress| progress.section == section)
            .map(|progress| progress.percent)
    }

    pub fn is_complete(&self) -> bool {
        self.next_incomplete_section.is_none()
    }
}

/// Scores `application` against the program's required field groups.
///
/// The overall percentage is weighted by required-field count, so it equals filled fields over
/// required fields across all groups. Groups with no required fields score 100.
pub fn compute_progress(application: &ApplicationRecord, program: &LoanProgram) -> ProgressSnapshot {
    let sections: Vec<SectionProgress> = program
        .field_groups
        .iter()
        .map(|group| score_group(group, application.section(&group.key)))
        .collect();

    let required: usize = sections.iter().map(|section| section.required).sum();
    let filled: usize = sections.iter().map(|section| section.filled).sum();
    let overall_percent = percent(filled, required);

    let next_incomplete_section = sections
        .iter()
        .find(|section| !section.is_complete())
        .map(|section| section.section.clone());

    let required_sections_complete = sections
        .iter()
        .filter(|section| !section.optional)
        .all(SectionProgress::is_complete);

    ProgressSnapshot {
        overall_percent,
        sections,
        next_incomplete_section,
        required_sections_complete,
    }
}

fn score_group(group: &FieldGroup, payload: Option<&Value>) -> SectionProgress {
    let missing_fields: Vec<String> = group
        .required_fields
        .iter()
        .filter(|field| !is_present(payload.and_then(|value| value.get(field.as_str()))))
        .cloned()
        .collect();

    let required = group.required_fields.len();
    let filled = required - missing_fields.len();

    SectionProgress {
        section: group.key.clone(),
        label: group.label.clone(),
        optional: group.optional,
        required,
        filled,
        percent: percent(filled, required),
        missing_fields,
    }
}

fn percent(filled: usize, required: usize) -> f64 {
    if required == 0 {
        return 100.0;
    }
    filled as f64 * 100.0 / required as f64
}

/// Absent: missing, `null`, blank strings, and empty lists or objects. Zero and `false` count.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(text)) => !text.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => true,
    }
}
