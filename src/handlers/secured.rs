// Constraint-checked page handler
use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::{debug, warn};

use super::{pages, AppState};
use crate::authenticator::AuthOutcome;
use crate::login_service::satisfies;
use crate::session::session_id_from_request;
use crate::utils::ResponseBuilder;

/// Serve a page after enforcing the constraint that covers its path
///
/// Unconstrained paths render directly (showing the user when a session
/// happens to exist). Constrained paths go through the authenticator and
/// then through the role check.
///
/// # Errors
/// Never fails; authentication problems become redirects or a 403
pub async fn secured_page(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let path = req.path();
    let session_id = session_id_from_request(&req);

    let Some(mapping) = state
        .constraints
        .resolve(path)
        .filter(|mapping| mapping.requires_authentication())
    else {
        let identity = state.authenticator.current_identity(session_id.as_deref()).await;
        return Ok(pages::render(path, identity.as_deref(), &state));
    };
    debug!("Request for {path} matched constraint {}", mapping.path_spec);

    let request_uri = req
        .uri()
        .path_and_query()
        .map_or(path, |path_and_query| path_and_query.as_str());

    match state
        .authenticator
        .validate_request(session_id.as_deref(), request_uri)
        .await
    {
        AuthOutcome::Authenticated { identity, .. } => {
            if satisfies(&identity.roles, &mapping.requirement) {
                Ok(pages::render(path, Some(identity.as_ref()), &state))
            } else {
                warn!(
                    "Principal {} lacks the role required for {path} (has {:?})",
                    identity.principal, identity.roles
                );
                Ok(ResponseBuilder::forbidden())
            }
        }
        outcome => Ok(state
            .redirect_for(&outcome)
            .unwrap_or_else(ResponseBuilder::internal_server_error)),
    }
}
