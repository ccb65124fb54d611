// Authentication handlers: provider callback and logout
use actix_web::{web, HttpRequest, HttpResponse, Result};
use log::debug;

use super::AppState;
use crate::authenticator::CallbackParams;
use crate::session::session_id_from_request;
use crate::utils::ResponseBuilder;

/// Redirect target of the identity provider
///
/// Accepts the parameters as a query string or, for `response_mode=form_post`,
/// as a form body.
///
/// # Errors
/// Never fails; every outcome is rendered as a redirect
pub async fn callback(
    query: web::Query<CallbackParams>,
    form: Option<web::Form<CallbackParams>>,
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let params = extract_callback_params(query, form);
    let session_id = session_id_from_request(&req);

    let outcome = state
        .authenticator
        .handle_callback(session_id.as_deref(), &params)
        .await;

    Ok(state
        .redirect_for(&outcome)
        .unwrap_or_else(|| ResponseBuilder::redirect(&state.authenticator.options().landing_page).build()))
}

/// Extract callback parameters from either the query string or a form post
fn extract_callback_params(
    query: web::Query<CallbackParams>,
    form: Option<web::Form<CallbackParams>>,
) -> CallbackParams {
    if let Some(form_data) = form {
        debug!(
            "Callback received via form_post (code: {}, state: {})",
            form_data.code.is_some(),
            form_data.state.is_some()
        );
        form_data.into_inner()
    } else {
        debug!(
            "Callback received via query (code: {}, state: {})",
            query.code.is_some(),
            query.state.is_some()
        );
        query.into_inner()
    }
}

/// Sign out locally and, when the provider supports it, at the provider
///
/// # Errors
/// Never fails; the browser is always redirected
pub async fn logout(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    let session_id = session_id_from_request(&req);
    let outcome = state.authenticator.logout(session_id.as_deref()).await;

    Ok(state
        .redirect_for(&outcome)
        .unwrap_or_else(|| ResponseBuilder::redirect("/").with_cookie(state.cookies.create_expired_cookie()).build()))
}
