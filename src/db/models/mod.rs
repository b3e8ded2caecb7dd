mod api_key;
mod audit_entry;
mod oauth_client;
mod oauth_consent;
mod session;
mod user;

pub use self::api_key::ApiKey;
pub use self::audit_entry::AuditLogRow;
pub use self::oauth_client::OauthClient;
pub use self::oauth_consent::OauthConsent;
pub use self::session::{RefreshTokenMatch, Session};
pub use self::user::User;
