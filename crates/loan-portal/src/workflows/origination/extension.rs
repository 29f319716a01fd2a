//! Program-specific section payloads.
//!
//! Progress scoring only ever looks at required field keys; these types add shape checks for
//! the one section a program reserves for its own terms.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionKind {
    Dscr,
    FixAndFlip,
    GroundUpConstruction,
    Bridge,
    Equipment,
    Mobilization,
}

impl ExtensionKind {
    pub const fn section_key(self) -> &'static str {
        match self {
            Self::Dscr => "dscrInfo",
            Self::FixAndFlip => "fixAndFlipInfo",
            Self::GroundUpConstruction => "groundUpConstructionInfo",
            Self::Bridge => "bridgeInfo",
            Self::Equipment => "equipmentInfo",
            Self::Mobilization => "mobilizationInfo",
        }
    }

    /// Parses and cross-checks a section payload for this extension.
    pub fn parse(self, payload: &Value) -> Result<ProgramExtension, ExtensionError> {
        let extension = match self {
            Self::Dscr => ProgramExtension::Dscr(decode(payload)?),
            Self::FixAndFlip => ProgramExtension::FixAndFlip(decode(payload)?),
            Self::GroundUpConstruction => ProgramExtension::GroundUpConstruction(decode(payload)?),
            Self::Bridge => ProgramExtension::Bridge(decode(payload)?),
            Self::Equipment => ProgramExtension::Equipment(decode(payload)?),
            Self::Mobilization => ProgramExtension::Mobilization(decode(payload)?),
        };
        extension.check()?;
        Ok(extension)
    }
}

fn decode<T: DeserializeOwned>(payload: &Value) -> Result<T, ExtensionError> {
    T::deserialize(payload).map_err(|source| ExtensionError::Shape(source.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    #[error("payload shape rejected: {0}")]
    Shape(String),
    #[error("{0}")]
    Inconsistent(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum ProgramExtension {
    Dscr(DscrInfo),
    FixAndFlip(FixAndFlipInfo),
    GroundUpConstruction(GroundUpConstructionInfo),
    Bridge(BridgeInfo),
    Equipment(EquipmentInfo),
    Mobilization(MobilizationInfo),
}

impl ProgramExtension {
    pub const fn kind(&self) -> ExtensionKind {
        match self {
            Self::Dscr(_) => ExtensionKind::Dscr,
            Self::FixAndFlip(_) => ExtensionKind::FixAndFlip,
            Self::GroundUpConstruction(_) => ExtensionKind::GroundUpConstruction,
            Self::Bridge(_) => ExtensionKind::Bridge,
            Self::Equipment(_) => ExtensionKind::Equipment,
            Self::Mobilization(_) => ExtensionKind::Mobilization,
        }
    }

    fn check(&self) -> Result<(), ExtensionError> {
        match self {
            Self::GroundUpConstruction(info) => {
                if let (Some(budget), Some(draws)) = (info.construction_budget, &info.draw_schedule)
                {
                    let scheduled: f64 = draws.iter().map(|draw| draw.amount).sum();
                    if scheduled > budget + f64::EPSILON {
                        return Err(ExtensionError::Inconsistent(format!(
                            "draw schedule totals {scheduled:.2} but construction budget is {budget:.2}"
                        )));
                    }
                }
            }
            Self::Mobilization(info) => {
                if let (Some(contract), Some(mobilization)) =
                    (info.contract_amount, info.mobilization_amount)
                {
                    if mobilization > contract {
                        return Err(ExtensionError::Inconsistent(format!(
                            "mobilization amount {mobilization:.2} exceeds contract amount {contract:.2}"
                        )));
                    }
                }
            }
            Self::Dscr(_) | Self::FixAndFlip(_) | Self::Bridge(_) | Self::Equipment(_) => {}
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStrategy {
    Sale,
    Refinance,
    Hold,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DscrInfo {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub monthly_rent: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub loan_amount: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub annual_taxes: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub annual_insurance: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub monthly_hoa: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FixAndFlipInfo {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub purchase_price: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub rehab_budget: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub after_repair_value: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub exit_strategy: Option<ExitStrategy>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub completed_flips: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawMilestone {
    pub description: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroundUpConstructionInfo {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub land_cost: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub construction_budget: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub draw_schedule: Option<Vec<DrawMilestone>>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub builder_name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub projected_completion: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BridgeInfo {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub loan_amount: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub term_months: Option<u32>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub exit_strategy: Option<ExitStrategy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EquipmentInfo {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub vendor_name: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub equipment_description: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub purchase_price: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub equipment_age_years: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MobilizationInfo {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub contract_amount: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub awarding_agency: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub mobilization_amount: Option<f64>,
}

/// Wizard forms post `""` for untouched inputs; treat those like `null`.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(value) => T::deserialize(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
