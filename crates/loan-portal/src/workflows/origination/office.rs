use serde::Serialize;

use super::domain::{Actor, ApplicationId, OfficeContext};

impl OfficeContext {
    pub const fn base_path(self) -> &'static str {
        match self {
            Self::Borrower => "/dashboard",
            Self::Broker => "/broker-office",
            Self::Workforce => "/workforce-office",
        }
    }

    /// Matches a request path against the office base paths on segment boundaries.
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim();
        Self::ordered().into_iter().find(|office| {
            path.strip_prefix(office.base_path())
                .map(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
                .unwrap_or(false)
        })
    }
}

/// What the router needs to resolve navigation.
#[derive(Debug, Clone, Copy)]
pub enum RouteSource<'a> {
    Path(&'a str),
    Actor(&'a Actor),
}

/// Navigation context for a wizard step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfficeRoute {
    pub office_context: OfficeContext,
    pub base_path: &'static str,
    /// Where control returns when the wizard exits.
    pub return_path: String,
}

impl OfficeRoute {
    pub fn for_office(office_context: OfficeContext) -> Self {
        let base_path = office_context.base_path();
        Self {
            office_context,
            base_path,
            return_path: format!("{base_path}/applications"),
        }
    }

    pub fn for_application(office_context: OfficeContext, application_id: &ApplicationId) -> Self {
        Self {
            return_path: application_path(office_context, application_id),
            ..Self::for_office(office_context)
        }
    }

    pub fn wizard_path(&self, application_id: &ApplicationId, section: &str) -> String {
        format!(
            "{}/{section}",
            application_path(self.office_context, application_id)
        )
    }
}

fn application_path(office_context: OfficeContext, application_id: &ApplicationId) -> String {
    format!(
        "{}/applications/{}",
        office_context.base_path(),
        application_id.0
    )
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("path {0} is outside every office")]
    UnknownPath(String),
}

/// Derives the office context, base path and return path for a path or actor.
///
/// Paths inside an application (`<base>/applications/<id>/...`) return to that application;
/// anything else returns to the office's application list.
pub fn resolve_context(source: RouteSource<'_>) -> Result<OfficeRoute, RoutingError> {
    match source {
        RouteSource::Actor(actor) => Ok(OfficeRoute::for_office(actor.office_context)),
        RouteSource::Path(path) => {
            let path = path.trim();
            let office = OfficeContext::from_path(path)
                .ok_or_else(|| RoutingError::UnknownPath(path.to_string()))?;

            let path = path.split('?').next().unwrap_or_default();
            let mut segments = path[office.base_path().len()..]
                .split('/')
                .filter(|segment| !segment.is_empty());

            match (segments.next(), segments.next()) {
                (Some("applications"), Some(id)) => Ok(OfficeRoute::for_application(
                    office,
                    &ApplicationId(id.to_string()),
                )),
                _ => Ok(OfficeRoute::for_office(office)),
            }
        }
    }
}
