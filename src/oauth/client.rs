//! Client authentication (§4.8 "client auth via HTTP Basic or form POST
//! for confidential clients"). Grounded on the teacher's `src/auth.rs`
//! bearer-token extraction pattern (`bearer_token`), generalized from one
//! header scheme to the two OAuth client-auth schemes.

use rocket::Request;

use crate::db::models::OauthClient;
use crate::db::DbConn;
use crate::error::Error;

/// Credentials presented for a confidential client, from whichever
/// transport carried them.
pub struct PresentedCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?.trim();
    let decoded = data_encoding::BASE64.decode(encoded.as_bytes()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((
        percent_encoding::percent_decode_str(id).decode_utf8().ok()?.into_owned(),
        percent_encoding::percent_decode_str(secret).decode_utf8().ok()?.into_owned(),
    ))
}

/// Pulls client credentials from the `Authorization: Basic` header if
/// present, else falls back to the `client_id`/`client_secret` form
/// fields a caller already parsed from the body.
pub fn from_request_and_form(request: &Request<'_>, form_client_id: Option<&str>, form_client_secret: Option<&str>) -> Option<PresentedCredentials> {
    if let Some(auth) = request.headers().get_one("Authorization") {
        if let Some((id, secret)) = decode_basic(auth) {
            return Some(PresentedCredentials {
                client_id: id,
                client_secret: Some(secret),
            });
        }
    }
    form_client_id.map(|id| PresentedCredentials {
        client_id: id.to_string(),
        client_secret: form_client_secret.map(str::to_string),
    })
}

/// Authenticates a client for a confidential-only operation (token
/// exchange, introspection, revocation). Public clients never reach this
/// path — PKCE is their proof of possession instead.
pub async fn authenticate(presented: &PresentedCredentials, conn: &DbConn) -> Result<OauthClient, Error> {
    let Some(client) = OauthClient::find_by_id(&presented.client_id, conn).await else {
        return Err(Error::OAuthError("invalid_client".into(), "Unknown OAuth client".into()));
    };
    if !client.is_confidential {
        return Err(Error::OAuthError("invalid_client".into(), "Client is not confidential".into()));
    }
    let Some(secret) = &presented.client_secret else {
        return Err(Error::OAuthError("invalid_client".into(), "Missing client secret".into()));
    };
    if !client.check_secret(secret) {
        return Err(Error::OAuthError("invalid_client".into(), "Bad client secret".into()));
    }
    Ok(client)
}

/// Resolves a client for a public-client-eligible operation (authorize,
/// authorization-code/device-code/refresh exchange): confidential clients
/// must still authenticate, public clients are resolved by id alone.
pub async fn resolve(presented: &PresentedCredentials, conn: &DbConn) -> Result<OauthClient, Error> {
    let Some(client) = OauthClient::find_by_id(&presented.client_id, conn).await else {
        return Err(Error::OAuthError("invalid_client".into(), "Unknown OAuth client".into()));
    };
    if client.is_confidential {
        return authenticate(presented, conn).await;
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_basic_round_trips_id_and_secret() {
        let encoded = data_encoding::BASE64.encode(b"my-client:s3cret");
        let (id, secret) = decode_basic(&format!("Basic {encoded}")).unwrap();
        assert_eq!(id, "my-client");
        assert_eq!(secret, "s3cret");
    }

    #[test]
    fn decode_basic_rejects_missing_prefix() {
        let encoded = data_encoding::BASE64.encode(b"id:secret");
        assert!(decode_basic(&encoded).is_none());
    }

    #[test]
    fn decode_basic_rejects_non_base64() {
        assert!(decode_basic("Basic not-base64!!!").is_none());
    }

    #[test]
    fn decode_basic_rejects_missing_colon() {
        let encoded = data_encoding::BASE64.encode(b"no-colon-here");
        assert!(decode_basic(&format!("Basic {encoded}")).is_none());
    }

    #[test]
    fn decode_basic_percent_decodes_components() {
        let encoded = data_encoding::BASE64.encode(b"client%3Aid:sec%20ret");
        let (id, secret) = decode_basic(&format!("Basic {encoded}")).unwrap();
        assert_eq!(id, "client:id");
        assert_eq!(secret, "sec ret");
    }
}
