use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::db::schema::users;
use crate::db::DbConn;
use crate::error::{EmptyResult, MapResult};
use crate::CONFIG;

/// The Principal store (§3 User): durable credential record. Grounded on
/// the teacher's `src/db/models/user.rs` `User` struct, generalized from a
/// vault-unlock profile (kdf/akey/private_key) to a credential-kind-
/// agnostic principal (password hash, TOTP secret, backup codes, lockout
/// counter) that the six credential kinds all materialize against.
#[derive(Debug, Clone, Identifiable, Queryable, Insertable, AsChangeset, Serialize, Deserialize)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
#[diesel(primary_key(id))]
pub struct User {
    pub id: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,

    pub email: Option<String>,
    pub email_verified: bool,
    pub phone: Option<String>,
    pub phone_verified: bool,
    pub username: Option<String>,
    pub full_name: Option<String>,

    #[serde(skip_serializing)]
    pub password_hash: Option<String>,

    pub security_stamp: String,
    pub disabled: bool,

    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    #[serde(skip_serializing)]
    pub backup_codes: Option<String>,

    /// Space-separated role list (§3 "role set"), the same convention
    /// `ApiKey::scopes` uses for its space-separated scope list.
    pub roles: String,

    pub failed_login_count: i32,

    /// Tokens issued before this instant are never valid, regardless of
    /// their own `exp` (§5 ordering guarantee: a token minted after a
    /// `RevokeAllForUser` call must survive it).
    pub invalidated_before: NaiveDateTime,
}

impl User {
    /// At least one of `email`/`phone`/`username` must be present (§3
    /// invariant); the caller is expected to have already normalized each
    /// (lowercased/trimmed email, E.164 phone, trimmed username).
    pub fn new(email: Option<String>, phone: Option<String>, username: Option<String>) -> Result<Self, crate::error::Error> {
        if email.is_none() && phone.is_none() && username.is_none() {
            err!(InvalidRequest, "At least one of email, phone, or username is required")
        }
        let now = Utc::now().naive_utc();
        Ok(Self {
            id: crate::util::get_uuid(),
            created_at: now,
            updated_at: now,
            email,
            email_verified: false,
            phone,
            phone_verified: false,
            username,
            full_name: None,
            password_hash: None,
            security_stamp: crate::util::get_uuid(),
            disabled: false,
            totp_secret: None,
            totp_enabled: false,
            backup_codes: None,
            roles: String::new(),
            failed_login_count: 0,
            invalidated_before: now,
        })
    }

    pub fn role_list(&self) -> Vec<&str> {
        self.roles.split(' ').filter(|s| !s.is_empty()).collect()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role_list().contains(&role)
    }

    pub fn set_roles(&mut self, roles: &[String]) {
        self.roles = roles.join(" ");
    }

    /// Invalidates every access token issued up to now, without touching
    /// any session row. Used by `RevokeAllForUser` alongside revoking the
    /// session ledger rows themselves.
    pub fn invalidate_tokens_before_now(&mut self) {
        self.invalidated_before = Utc::now().naive_utc();
    }

    pub fn set_password(&mut self, password: &str) -> Result<(), crate::error::Error> {
        self.password_hash = Some(crypto::hash_password(password.as_bytes(), CONFIG.password_cost())?);
        self.reset_security_stamp();
        Ok(())
    }

    pub fn check_valid_password(&self, password: &str) -> bool {
        match &self.password_hash {
            Some(hash) => crypto::verify_password_hash(password.as_bytes(), hash),
            // Still run a dummy hash so a nonexistent password hash takes
            // about as long as a real check (enumeration resistance).
            None => {
                crypto::verify_dummy_password_hash(password.as_bytes());
                false
            }
        }
    }

    pub fn reset_security_stamp(&mut self) {
        self.security_stamp = crate::util::get_uuid();
    }

    /// Consumes one backup code if it matches; returns whether it matched.
    /// The code list is rewritten without the consumed entry so it can
    /// never be reused (§4.5 single-use invariant).
    pub fn consume_backup_code(&mut self, code: &str) -> bool {
        let Some(stored) = &self.backup_codes else {
            return false;
        };
        let Ok(mut hashes) = serde_json::from_str::<Vec<String>>(stored) else {
            return false;
        };
        let normalized = code.trim().to_lowercase();
        let code_hash = crypto::sha256_hex(normalized.as_bytes());

        if let Some(pos) = hashes.iter().position(|h| crypto::ct_eq(h, &code_hash)) {
            hashes.remove(pos);
            self.backup_codes = Some(serde_json::to_string(&hashes).unwrap_or_default());
            true
        } else {
            false
        }
    }

    pub fn set_backup_codes(&mut self, codes: &[String]) {
        let hashes: Vec<String> = codes.iter().map(|c| crypto::sha256_hex(c.to_lowercase().as_bytes())).collect();
        self.backup_codes = Some(serde_json::to_string(&hashes).unwrap_or_default());
    }
}

impl User {
    pub async fn save(&mut self, conn: &DbConn) -> EmptyResult {
        if self.email.is_none() && self.phone.is_none() && self.username.is_none() {
            err!(InvalidRequest, "User must have at least one of email, phone, or username")
        }
        self.updated_at = Utc::now().naive_utc();

        db_run! {conn:
            sqlite, mysql {
                match diesel::replace_into(users::table)
                    .values(self.clone())
                    .execute(conn)
                {
                    Ok(_) => Ok(()),
                    Err(diesel::result::Error::DatabaseError(diesel::result::DatabaseErrorKind::ForeignKeyViolation, _)) => {
                        diesel::update(users::table)
                            .filter(users::id.eq(&self.id))
                            .set(self.clone())
                            .execute(conn)
                            .map_res("Error saving user")
                    }
                    Err(e) => Err(e.into()),
                }.map_res("Error saving user")
            }
            postgresql {
                diesel::insert_into(users::table)
                    .values(self.clone())
                    .on_conflict(users::id)
                    .do_update()
                    .set(self.clone())
                    .execute(conn)
                    .map_res("Error saving user")
            }
        }
    }

    pub async fn find_by_email(email: &str, conn: &DbConn) -> Option<Self> {
        let email = email.to_lowercase();
        db_run! {conn: {
            users::table.filter(users::email.eq(email)).first::<Self>(conn).ok()
        }}
    }

    pub async fn find_by_id(id: &str, conn: &DbConn) -> Option<Self> {
        let id = id.to_string();
        db_run! {conn: {
            users::table.filter(users::id.eq(id)).first::<Self>(conn).ok()
        }}
    }

    pub async fn find_by_phone(phone: &str, conn: &DbConn) -> Option<Self> {
        let phone = phone.to_string();
        db_run! {conn: {
            users::table.filter(users::phone.eq(phone)).first::<Self>(conn).ok()
        }}
    }

    pub async fn find_by_username(username: &str, conn: &DbConn) -> Option<Self> {
        let username = username.to_string();
        db_run! {conn: {
            users::table.filter(users::username.eq(username)).first::<Self>(conn).ok()
        }}
    }

    /// §4.6.2 sign-in lookup: tries email, then phone, then username, so a
    /// single `identifier` field can resolve against whichever attribute
    /// the account actually has set.
    pub async fn find_by_identifier(identifier: &str, conn: &DbConn) -> Option<Self> {
        if let Some(user) = Self::find_by_email(identifier, conn).await {
            return Some(user);
        }
        if let Some(user) = Self::find_by_phone(identifier, conn).await {
            return Some(user);
        }
        Self::find_by_username(identifier, conn).await
    }

    pub async fn delete(self, conn: &DbConn) -> EmptyResult {
        use crate::db::schema::{api_keys, oauth_consents, sessions};

        db_run! {conn: {
            diesel::delete(sessions::table.filter(sessions::user_id.eq(&self.id))).execute(conn).ok();
            diesel::delete(api_keys::table.filter(api_keys::user_id.eq(&self.id))).execute(conn).ok();
            diesel::delete(oauth_consents::table.filter(oauth_consents::user_id.eq(&self.id))).execute(conn).ok();
            diesel::delete(users::table.filter(users::id.eq(self.id)))
                .execute(conn)
                .map_res("Error deleting user")
        }}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_code_round_trips() {
        let mut user = User::new(Some("user@example.com".to_string()), None, None).unwrap();
        user.set_backup_codes(&["ABCD1234".to_string(), "EFGH5678".to_string()]);
        assert!(user.consume_backup_code("abcd1234"));
        assert!(!user.consume_backup_code("abcd1234"));
        assert!(user.consume_backup_code("EFGH5678"));
    }

    #[test]
    fn new_rejects_a_user_with_no_identifier() {
        assert!(User::new(None, None, None).is_err());
    }

    #[test]
    fn new_accepts_phone_only_or_username_only() {
        assert!(User::new(None, Some("+15555550123".to_string()), None).is_ok());
        assert!(User::new(None, None, Some("someone".to_string())).is_ok());
    }

    #[test]
    fn role_list_reflects_set_roles() {
        let mut user = User::new(Some("user@example.com".to_string()), None, None).unwrap();
        assert!(user.role_list().is_empty());
        user.set_roles(&["admin".to_string(), "operator".to_string()]);
        assert!(user.has_role("admin"));
        assert!(user.has_role("operator"));
        assert!(!user.has_role("superuser"));
        assert_eq!(user.role_list(), vec!["admin", "operator"]);
    }
}
