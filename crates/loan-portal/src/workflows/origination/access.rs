use super::catalog::{LoanProgram, SectionKind};
use super::domain::{Actor, ActorRole, ApplicationRecord, ApplicationStatus};

/// Operation an actor is attempting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    CreateApplication,
    ViewApplication,
    /// `kind` is `None` for the freeform notes section.
    EditSection {
        section: &'a str,
        kind: Option<SectionKind>,
    },
    UploadDocument {
        document_type: &'a str,
    },
    ReviewDocument {
        document_type: &'a str,
    },
    TransitionStatus {
        to: ApplicationStatus,
    },
    ExportReport,
}

/// What the action targets.
#[derive(Debug, Clone, Copy)]
pub enum Resource<'a> {
    Program(&'a LoanProgram),
    Application(&'a ApplicationRecord),
    Portfolio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Authorization collaborator consulted before every mutation.
pub trait AccessPolicy: Send + Sync {
    fn authorize(&self, actor: &Actor, action: &Action<'_>, resource: &Resource<'_>)
        -> AccessDecision;
}

/// Default office rules.
///
/// Borrowers act on applications they own and brokers on applications they broker. Workforce and
/// admin actors act on everything except personal and financial sections, and are the only
/// actors who review documents or move an application past submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfficeAccessPolicy;

impl AccessPolicy for OfficeAccessPolicy {
    fn authorize(
        &self,
        actor: &Actor,
        action: &Action<'_>,
        resource: &Resource<'_>,
    ) -> AccessDecision {
        if actor.office_context != actor.role.home_office() {
            return AccessDecision::Deny(format!(
                "{} actors cannot act from the {} office",
                actor.role.label(),
                actor.office_context.label()
            ));
        }

        let staff = actor.role.is_staff();

        match (action, resource) {
            (Action::CreateApplication, Resource::Program(_)) => AccessDecision::Allow,
            (Action::ExportReport, Resource::Portfolio) => allow_if(staff, "only staff export reports"),
            (action, Resource::Application(record)) => {
                let participant = is_participant(actor, record);
                match action {
                    Action::ViewApplication | Action::UploadDocument { .. } => allow_if(
                        participant || staff,
                        "actor is not a participant on this application",
                    ),
                    Action::EditSection { section, kind } => {
                        if participant {
                            AccessDecision::Allow
                        } else if staff {
                            match kind {
                                Some(kind) if kind.is_borrower_private() => {
                                    AccessDecision::Deny(format!(
                                        "section {section} may only be edited by the borrower or their broker"
                                    ))
                                }
                                _ => AccessDecision::Allow,
                            }
                        } else {
                            AccessDecision::Deny(
                                "actor is not a participant on this application".to_string(),
                            )
                        }
                    }
                    Action::ReviewDocument { document_type } => allow_if(
                        staff,
                        &format!("only workforce or admin actors may review {document_type}"),
                    ),
                    Action::TransitionStatus { to } => match to {
                        ApplicationStatus::Submitted | ApplicationStatus::Cancelled => allow_if(
                            participant || staff,
                            "actor is not a participant on this application",
                        ),
                        ApplicationStatus::Draft => {
                            AccessDecision::Deny("applications cannot return to draft".to_string())
                        }
                        _ => allow_if(
                            staff,
                            &format!("only workforce or admin actors may mark {}", to.label()),
                        ),
                    },
                    Action::CreateApplication | Action::ExportReport => {
                        AccessDecision::Deny("action does not target an application".to_string())
                    }
                }
            }
            _ => AccessDecision::Deny("action does not apply to this resource".to_string()),
        }
    }
}

fn is_participant(actor: &Actor, record: &ApplicationRecord) -> bool {
    match actor.role {
        ActorRole::Borrower => record.is_owned_by(&actor.id),
        ActorRole::Broker => record.is_brokered_by(&actor.id),
        _ => false,
    }
}

fn allow_if(condition: bool, reason: &str) -> AccessDecision {
    if condition {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny(reason.to_string())
    }
}
