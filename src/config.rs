use std::process::exit;
use std::sync::{LazyLock, RwLock};

use crate::{
    error::Error,
    util::{get_env, get_env_bool},
};

static CONFIG_FILE: LazyLock<String> = LazyLock::new(|| {
    let data_folder = get_env("DATA_FOLDER").unwrap_or_else(|| String::from("data"));
    get_env("CONFIG_FILE").unwrap_or_else(|| format!("{data_folder}/config.json"))
});

pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| {
        println!("Error loading config:\n  {e:?}\n");
        exit(1)
    })
});

pub type Pass = String;

/// Generates the `Config`/`ConfigBuilder`/`ConfigItems` triad from a list of
/// groups, each holding typed fields with a `none_action` describing what
/// happens when the field is absent from both the environment and
/// `config.json`: `def` (fall back to a default), `auto` (derive from other
/// fields), or `option` (stays an `Option`).
macro_rules! make_config {
    ($(
        $(#[doc = $groupdoc:literal])?
        $group:ident {
        $(
            $(#[doc = $doc:literal])*
            $name:ident : $ty:ident, $none_action:ident $(, $default:expr)?;
        )+},
    )+) => {
        pub struct Config { inner: RwLock<Inner> }

        struct Inner {
            config: ConfigItems,
            _env: ConfigBuilder,
            _overrides: Vec<String>,
        }

        #[derive(Clone, Default, serde::Deserialize, serde::Serialize)]
        pub struct ConfigBuilder {
            $($(
                #[serde(skip_serializing_if = "Option::is_none")]
                $name: Option<$ty>,
            )+)+
        }

        impl ConfigBuilder {
            fn from_env() -> Self {
                let env_file = get_env("ENV_FILE").unwrap_or_else(|| String::from(".env"));
                match dotenvy::from_path(&env_file) {
                    Ok(_) => println!("[INFO] Using environment file `{env_file}` for configuration.\n"),
                    Err(dotenvy::Error::Io(ioerr)) if ioerr.kind() == std::io::ErrorKind::NotFound => {
                        if let Some(env_file) = get_env::<String>("ENV_FILE") {
                            println!("[ERROR] The configured ENV_FILE `{env_file}` was not found!\n");
                            exit(1);
                        }
                    }
                    Err(e) => {
                        println!("[ERROR] Reading environment file `{env_file}` failed:\n{e:?}\n");
                        exit(1);
                    }
                };

                let mut builder = ConfigBuilder::default();
                $($(
                    builder.$name = make_config! { @getenv pastey::paste!(stringify!([<$name:upper>])), $name, $ty };
                )+)+
                builder
            }

            fn from_file(path: &str) -> Result<Self, Error> {
                let config_str = std::fs::read_to_string(path)?;
                println!("[INFO] Using saved config from `{path}` for configuration.\n");
                serde_json::from_str(&config_str).map_err(Into::into)
            }

            /// Merges the values of both builders into a new builder. If both
            /// have the same element, `other` wins.
            fn merge(&self, other: &Self, show_overrides: bool, overrides: &mut Vec<String>) -> Self {
                let mut builder = self.clone();
                $($(
                    if let v @ Some(_) = &other.$name {
                        builder.$name = v.clone();
                        if self.$name.is_some() {
                            overrides.push(stringify!($name).to_uppercase());
                        }
                    }
                )+)+

                if show_overrides && !overrides.is_empty() {
                    println!("[WARNING] The following environment variables are being overridden by config.json:");
                    println!("[WARNING] {}\n", overrides.join(", "));
                }

                builder
            }

            fn build(&self) -> ConfigItems {
                let mut config = ConfigItems::default();
                $($(
                    config.$name = make_config!{ @build self.$name.clone(), &config, $none_action, $($default)? };
                )+)+
                config
            }
        }

        #[derive(Clone, Default)]
        struct ConfigItems { $($( $name: make_config!{@type $ty, $none_action}, )+)+ }

        #[allow(unused)]
        impl Config {
            $($(
                $(#[doc = $doc])*
                pub fn $name(&self) -> make_config!{@type $ty, $none_action} {
                    self.inner.read().unwrap().config.$name.clone()
                }
            )+)+

            pub fn get_overrides(&self) -> Vec<String> {
                self.inner.read().unwrap()._overrides.clone()
            }
        }
    };

    ( @type $ty:ty, option) => { Option<$ty> };
    ( @type $ty:ty, $id:ident) => { $ty };

    ( @build $value:expr, $config:expr, option, ) => { $value };
    ( @build $value:expr, $config:expr, def, $default:expr ) => { $value.unwrap_or($default) };
    ( @build $value:expr, $config:expr, auto, $default_fn:expr ) => {{
        match $value {
            Some(v) => v,
            None => {
                let f: &dyn Fn(&ConfigItems) -> _ = &$default_fn;
                f($config)
            }
        }
    }};

    ( @getenv $name:expr, $field:ident, bool ) => { get_env_bool($name) };
    ( @getenv $name:expr, $field:ident, $ty:ident ) => { get_env($name) };
}

make_config! {
    /// General
    core {
        /// Data folder |> Main data folder
        data_folder: String, def, "data".to_string();
        /// Database URL
        database_url: String, auto, |c| format!("{}/{}", c.data_folder, "db.sqlite3");
        database_max_conns: u32, def, 10;
        database_min_conns: u32, def, 2;
        database_timeout: u64, def, 30;
        database_idle_timeout: u64, def, 600;
        /// Public-facing origin, used for JWT issuer and OAuth discovery document
        domain: String, def, "http://localhost".to_string();
    },
    logging {
        /// Log file |> Path to write logs to, in addition to stdout. Unset disables file logging
        log_file: String, option,;
        /// Log level |> One of off/error/warn/info/debug/trace
        log_level: String, def, "Info".to_string();
        /// Enables full request/response logging at debug level, which is noisy enough to keep separate from `log_level=debug`
        extended_logging: bool, def, true;
        /// Forward logs to syslog instead of stdout/file (unix only, requires the `enable_syslog` feature)
        use_syslog: bool, def, false;
    },
    token {
        /// Access token signing key (RS256 private key, PEM)
        access_signing_key_path: String, auto, |c| format!("{}/{}", c.data_folder, "rsa_key.pem");
        /// Access token verification key (RS256 public key, PEM)
        access_verify_key_path: String, auto, |c| format!("{}/{}", c.data_folder, "rsa_key.pub.pem");
        /// Previously-used signing keys, kept registered for verification only
        access_signing_key_previous_paths: String, def, String::new();
        access_token_ttl_secs: i64, def, 900;
        refresh_token_ttl_secs: i64, def, 604_800;
        /// Grace window during which a just-rotated refresh token is still
        /// accepted once (covers client retries racing the rotation).
        refresh_grace_secs: i64, def, 30;
        /// §4.1: an access token's active-flag snapshot is trusted for this
        /// long before the next verification re-checks the durable
        /// principal store. Zero would defeat the point of caching it, so
        /// this is clamped to at least one second.
        invalidated_before_grace_seconds: u64, def, 60;
    },
    password {
        password_memory_kib: u32, def, 19_456;
        password_iterations: u32, def, 2;
        password_parallelism: u32, def, 1;
        /// Lockout threshold |> consecutive failed attempts before a principal is locked
        lockout_threshold: u32, def, 10;
        lockout_window_secs: u64, def, 900;
        /// §4.6.6: a password change revokes every other session for the
        /// user, keeping the one that just authenticated the change.
        password_change_revokes_other_sessions: bool, def, true;
    },
    rate {
        /// Login cap |> per-IP, §4.3: 10 attempts per 15-minute window
        rate_login_window_secs: u64, def, 900;
        rate_login_max: u32, def, 10;
        /// Signup cap |> per-IP, §4.3: 5 signups per hour
        rate_signup_window_secs: u64, def, 3600;
        rate_signup_max: u32, def, 5;
        /// OTP caps are three simultaneous tiers per destination (§4.3):
        /// a short burst window, an hourly cap, and a daily cap, tracked
        /// separately for phone and email destinations.
        rate_otp_phone_window_secs: u64, def, 600;
        rate_otp_phone_max: u32, def, 3;
        rate_otp_phone_hourly_max: u32, def, 5;
        rate_otp_phone_daily_max: u32, def, 10;
        rate_otp_email_window_secs: u64, def, 600;
        rate_otp_email_max: u32, def, 3;
        rate_otp_email_hourly_max: u32, def, 5;
        rate_otp_email_daily_max: u32, def, 10;
        /// API cap |> per authenticated subject, §4.3: 100 calls per minute
        rate_api_window_secs: u64, def, 60;
        rate_api_max: u32, def, 100;
    },
    otp {
        otp_ttl_secs: i64, def, 300;
        otp_code_length: u32, def, 6;
    },
    twofactor {
        twofactor_ticket_ttl_secs: i64, def, 300;
        backup_code_count: u32, def, 10;
    },
    oauth {
        oauth_code_ttl_secs: i64, def, 60;
        device_code_ttl_secs: i64, def, 600;
        device_code_interval_secs: i64, def, 5;
    },
    network {
        cors_allowed_origins: String, def, String::new();
        ip_header: String, def, "X-Real-IP".to_string();
        ip_header_enabled: bool, def, true;
    },
    mail {
        mail_enabled: bool, def, false;
        smtp_host: String, option,;
        smtp_from: String, def, String::new();
    },
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        let _env = ConfigBuilder::from_env();
        let mut _overrides = Vec::new();
        let builder = if std::path::Path::new(&*CONFIG_FILE).exists() {
            let usr = ConfigBuilder::from_file(&CONFIG_FILE)?;
            _env.merge(&usr, true, &mut _overrides)
        } else {
            _env.clone()
        };

        Ok(Config {
            inner: RwLock::new(Inner {
                config: builder.build(),
                _env,
                _overrides,
            }),
        })
    }

    pub fn password_cost(&self) -> crate::crypto::PasswordCost {
        crate::crypto::PasswordCost {
            memory_kib: self.password_memory_kib(),
            iterations: self.password_iterations(),
            parallelism: self.password_parallelism(),
        }
    }
}
