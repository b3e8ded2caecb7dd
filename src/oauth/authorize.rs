//! Authorization endpoint (§4.8, first leg of the authorization-code
//! grant). `/authorize` itself is a thin route; this module owns the
//! validation and the "what happens next" decision the route turns into
//! an HTTP redirect.

use url::Url;

use super::{generate_code, store_code, AuthorizationCode};
use crate::db::models::{OauthClient, OauthConsent, User};
use crate::db::DbConn;
use crate::error::Error;

pub struct AuthorizeRequest {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

pub enum AuthorizeOutcome {
    /// No authenticated session: the route should redirect to the login
    /// collaborator with a return-to pointing back at this request.
    RequiresLogin,
    /// Authenticated but has not consented to this exact scope set.
    RequiresConsent {
        client_name: String,
        scope: Vec<String>,
    },
    /// Consent satisfied (fresh or standing): redirect here with the code.
    Redirect(String),
}

fn redirect_with(redirect_uri: &str, pairs: &[(&str, &str)]) -> Result<String, Error> {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        return Err(Error::Internal("malformed redirect_uri passed validation".into(), "Internal".into()));
    };
    {
        let mut q = url.query_pairs_mut();
        for (k, v) in pairs {
            q.append_pair(k, v);
        }
    }
    Ok(url.to_string())
}

/// Validates an `/authorize` request and, if the caller is both
/// authenticated and has already consented to the exact scope set, mints
/// the code and returns the redirect target. An unregistered or
/// mismatched `redirect_uri` is the one failure that must never redirect
/// (§4.8 shared rule) — everything else reports via the client's own
/// callback per the OAuth error convention.
pub async fn authorize(req: AuthorizeRequest, user: Option<&User>, conn: &DbConn) -> Result<AuthorizeOutcome, Error> {
    let Some(client) = OauthClient::find_by_id(&req.client_id, conn).await else {
        return Err(Error::OAuthError("invalid_client".into(), "Unknown OAuth client".into()));
    };
    if !client.redirect_uri_allowed(&req.redirect_uri) {
        return Err(Error::OAuthError("invalid_request".into(), "redirect_uri is not registered for this client".into()));
    }

    let state = req.state.clone().unwrap_or_default();

    if req.response_type != "code" {
        let url = redirect_with(&req.redirect_uri, &[("error", "unsupported_response_type"), ("state", &state)])?;
        return Ok(AuthorizeOutcome::Redirect(url));
    }

    for scope in &req.scope {
        if !client.scope_allowed(scope) {
            let url = redirect_with(&req.redirect_uri, &[("error", "invalid_scope"), ("state", &state)])?;
            return Ok(AuthorizeOutcome::Redirect(url));
        }
    }

    if client.is_confidential && req.code_challenge.is_none() {
        // PKCE is mandatory for public clients only; confidential clients
        // may omit it, matching §4.8's "required for public clients".
    } else if req.code_challenge.is_none() {
        let url = redirect_with(&req.redirect_uri, &[("error", "invalid_request"), ("error_description", "PKCE is required for public clients"), ("state", &state)])?;
        return Ok(AuthorizeOutcome::Redirect(url));
    }

    let Some(user) = user else {
        return Ok(AuthorizeOutcome::RequiresLogin);
    };

    let consented = match OauthConsent::find(&user.id, &client.id, conn).await {
        Some(consent) => consent.covers(&req.scope),
        None => false,
    };
    if !consented {
        return Ok(AuthorizeOutcome::RequiresConsent {
            client_name: client.name.clone(),
            scope: req.scope.clone(),
        });
    }

    let code = generate_code();
    store_code(
        code.clone(),
        AuthorizationCode {
            client_id: client.id.clone(),
            user_id: user.id.clone(),
            redirect_uri: req.redirect_uri.clone(),
            scopes: req.scope.clone(),
            code_challenge: req.code_challenge.clone(),
            code_challenge_method: req.code_challenge_method.clone(),
            nonce: req.nonce.clone(),
        },
    );

    let url = redirect_with(&req.redirect_uri, &[("code", &code), ("state", &state)])?;
    Ok(AuthorizeOutcome::Redirect(url))
}

/// Records consent after the consent collaborator confirms it, so a
/// repeat authorization request with the same (or a subset) scope set
/// skips straight to minting a code (§4.8).
pub async fn record_consent(user_id: &str, client_id: &str, scope: &[String], conn: &DbConn) -> Result<(), Error> {
    let consent = OauthConsent::new(user_id.to_string(), client_id.to_string(), scope);
    consent.save(conn).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_with_appends_query_pairs() {
        let url = redirect_with("https://client.example/callback", &[("code", "abc123"), ("state", "xyz")]).unwrap();
        assert!(url.starts_with("https://client.example/callback?"));
        assert!(url.contains("code=abc123"));
        assert!(url.contains("state=xyz"));
    }

    #[test]
    fn redirect_with_preserves_existing_query() {
        let url = redirect_with("https://client.example/callback?already=here", &[("code", "abc")]).unwrap();
        assert!(url.contains("already=here"));
        assert!(url.contains("code=abc"));
    }

    #[test]
    fn redirect_with_rejects_malformed_uri() {
        assert!(redirect_with("not a url", &[("code", "abc")]).is_err());
    }
}
