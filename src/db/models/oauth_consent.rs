use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::oauth_consents;
use crate::db::DbConn;
use crate::error::{EmptyResult, MapResult};

/// A user's standing grant of scopes to a client (§3 OAuth client
/// consent, §4.7). Grounded on the teacher's `src/db/models/
/// emergency_access.rs` one-row-per-(grantor, grantee) relationship
/// shape, generalized from a vault-sharing grant to a scope grant so a
/// repeat authorization request with already-granted scopes can skip the
/// interactive consent screen.
#[derive(Debug, Clone, Identifiable, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = oauth_consents)]
#[diesel(primary_key(id))]
pub struct OauthConsent {
    pub id: String,
    pub user_id: String,
    pub client_id: String,
    pub scopes: String,
    pub created_at: NaiveDateTime,
}

impl OauthConsent {
    pub fn new(user_id: String, client_id: String, scopes: &[String]) -> Self {
        Self {
            id: crate::util::get_uuid(),
            user_id,
            client_id,
            scopes: scopes.join(" "),
            created_at: Utc::now().naive_utc(),
        }
    }

    pub fn covers(&self, requested: &[String]) -> bool {
        let granted: std::collections::HashSet<&str> = self.scopes.split(' ').collect();
        requested.iter().all(|s| granted.contains(s.as_str()))
    }
}

impl OauthConsent {
    pub async fn save(&self, conn: &DbConn) -> EmptyResult {
        db_run! {conn:
            sqlite, mysql {
                diesel::replace_into(oauth_consents::table)
                    .values(self.clone())
                    .execute(conn)
                    .map_res("Error saving oauth consent")
            }
            postgresql {
                diesel::insert_into(oauth_consents::table)
                    .values(self.clone())
                    .on_conflict(oauth_consents::id)
                    .do_update()
                    .set(self.clone())
                    .execute(conn)
                    .map_res("Error saving oauth consent")
            }
        }
    }

    pub async fn find(user_id: &str, client_id: &str, conn: &DbConn) -> Option<Self> {
        let user_id = user_id.to_string();
        let client_id = client_id.to_string();
        db_run! {conn: {
            oauth_consents::table
                .filter(oauth_consents::user_id.eq(user_id))
                .filter(oauth_consents::client_id.eq(client_id))
                .first::<Self>(conn)
                .ok()
        }}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_checks_subset() {
        let consent =
            OauthConsent::new("u".into(), "c".into(), &["openid".to_string(), "profile".to_string()]);
        assert!(consent.covers(&["openid".to_string()]));
        assert!(!consent.covers(&["openid".to_string(), "email".to_string()]));
    }
}
