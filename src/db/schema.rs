// Diesel table definitions for the durable stores (§3.1). Ephemeral
// entities (OTP challenge, Two-factor ticket, Authorization code,
// Device-flow record, Rate counter, Revocation entry) live only in the
// cache layer and have no table here.

diesel::table! {
    users (id) {
        id -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        email -> Nullable<Text>,
        email_verified -> Bool,
        phone -> Nullable<Text>,
        phone_verified -> Bool,
        username -> Nullable<Text>,
        full_name -> Nullable<Text>,
        password_hash -> Nullable<Text>,
        security_stamp -> Text,
        disabled -> Bool,
        totp_secret -> Nullable<Text>,
        totp_enabled -> Bool,
        backup_codes -> Nullable<Text>,
        roles -> Text,
        failed_login_count -> Integer,
        invalidated_before -> Timestamp,
    }
}

diesel::table! {
    sessions (id) {
        id -> Text,
        user_id -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
        device_name -> Nullable<Text>,
        device_identifier -> Text,
        refresh_token_hash -> Text,
        refresh_token_expires_at -> Timestamp,
        previous_refresh_token_hash -> Nullable<Text>,
        previous_refresh_token_expires_at -> Nullable<Timestamp>,
        revoked -> Bool,
    }
}

diesel::table! {
    api_keys (id) {
        id -> Text,
        user_id -> Text,
        created_at -> Timestamp,
        name -> Text,
        key_hash -> Text,
        scopes -> Text,
        expires_at -> Nullable<Timestamp>,
        last_used_at -> Nullable<Timestamp>,
        revoked -> Bool,
    }
}

diesel::table! {
    oauth_clients (id) {
        id -> Text,
        created_at -> Timestamp,
        client_secret_hash -> Nullable<Text>,
        name -> Text,
        redirect_uris -> Text,
        grant_types -> Text,
        scopes -> Text,
        is_confidential -> Bool,
    }
}

diesel::table! {
    oauth_consents (id) {
        id -> Text,
        user_id -> Text,
        client_id -> Text,
        scopes -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    audit_logs (id) {
        id -> Text,
        principal_id -> Nullable<Text>,
        event -> Text,
        ip -> Nullable<Text>,
        detail -> Text,
        occurred_at -> Timestamp,
    }
}

diesel::joinable!(sessions -> users (user_id));
diesel::joinable!(api_keys -> users (user_id));
diesel::joinable!(oauth_consents -> users (user_id));
diesel::joinable!(oauth_consents -> oauth_clients (client_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    sessions,
    api_keys,
    oauth_clients,
    oauth_consents,
    audit_logs,
);
