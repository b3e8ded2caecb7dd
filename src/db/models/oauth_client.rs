use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::crypto;
use crate::db::schema::oauth_clients;
use crate::db::DbConn;
use crate::error::{EmptyResult, MapResult};

/// A registered OAuth/OIDC client (§3 OAuth client, §4.7). Grounded on the
/// teacher's `src/db/models/organization.rs` registration-record shape
/// (id + name + a small set of policy flags), generalized to the client
/// metadata the authorization server needs to validate a request before
/// it ever touches a user.
#[derive(Debug, Clone, Identifiable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = oauth_clients)]
#[diesel(treat_none_as_null = true)]
#[diesel(primary_key(id))]
pub struct OauthClient {
    pub id: String,
    pub created_at: NaiveDateTime,
    /// `None` for public clients (native/SPA, PKCE-only per §4.7).
    pub client_secret_hash: Option<String>,
    pub name: String,
    /// Space-separated allow-list, validated exactly (no prefix match).
    pub redirect_uris: String,
    pub grant_types: String,
    pub scopes: String,
    pub is_confidential: bool,
}

impl OauthClient {
    pub fn register(
        name: String,
        redirect_uris: &[String],
        grant_types: &[String],
        scopes: &[String],
        confidential: bool,
    ) -> (Self, Option<String>) {
        let (secret_hash, plaintext) = if confidential {
            let secret = crypto::generate_opaque_token();
            (Some(crypto::sha256_hex(secret.as_bytes())), Some(secret))
        } else {
            (None, None)
        };
        let client = Self {
            id: crate::util::get_uuid(),
            created_at: Utc::now().naive_utc(),
            client_secret_hash: secret_hash,
            name,
            redirect_uris: redirect_uris.join(" "),
            grant_types: grant_types.join(" "),
            scopes: scopes.join(" "),
            is_confidential: confidential,
        };
        (client, plaintext)
    }

    pub fn redirect_uri_allowed(&self, candidate: &str) -> bool {
        self.redirect_uris.split(' ').any(|u| u == candidate)
    }

    pub fn grant_type_allowed(&self, grant: &str) -> bool {
        self.grant_types.split(' ').any(|g| g == grant)
    }

    pub fn scope_allowed(&self, scope: &str) -> bool {
        self.scopes.split(' ').any(|s| s == scope)
    }

    pub fn check_secret(&self, presented: &str) -> bool {
        match &self.client_secret_hash {
            Some(hash) => crypto::ct_eq(hash, &crypto::sha256_hex(presented.as_bytes())),
            None => false,
        }
    }
}

impl OauthClient {
    pub async fn save(&self, conn: &DbConn) -> EmptyResult {
        db_run! {conn:
            sqlite, mysql {
                diesel::replace_into(oauth_clients::table)
                    .values(self.clone())
                    .execute(conn)
                    .map_res("Error saving oauth client")
            }
            postgresql {
                diesel::insert_into(oauth_clients::table)
                    .values(self.clone())
                    .on_conflict(oauth_clients::id)
                    .do_update()
                    .set(self.clone())
                    .execute(conn)
                    .map_res("Error saving oauth client")
            }
        }
    }

    pub async fn find_by_id(id: &str, conn: &DbConn) -> Option<Self> {
        let id = id.to_string();
        db_run! {conn: {
            oauth_clients::table.filter(oauth_clients::id.eq(id)).first::<Self>(conn).ok()
        }}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_client_has_no_secret() {
        let (client, secret) = OauthClient::register(
            "cli".into(),
            &["https://example.com/cb".to_string()],
            &["authorization_code".to_string()],
            &["openid".to_string()],
            false,
        );
        assert!(secret.is_none());
        assert!(!client.check_secret("anything"));
        assert!(client.redirect_uri_allowed("https://example.com/cb"));
        assert!(!client.redirect_uri_allowed("https://evil.example/cb"));
    }

    #[test]
    fn confidential_client_secret_round_trips() {
        let (client, secret) = OauthClient::register(
            "svc".into(),
            &["https://example.com/cb".to_string()],
            &["client_credentials".to_string()],
            &["api".to_string()],
            true,
        );
        let secret = secret.expect("confidential client must receive a secret");
        assert!(client.check_secret(&secret));
        assert!(!client.check_secret("wrong"));
    }
}
