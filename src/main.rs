#[macro_use]
extern crate log;

use std::process::exit;
use std::sync::LazyLock;

use auth_gateway_core::{audit, auth, build_rocket, db, init_logging, CONFIG};

#[rocket::main]
async fn main() {
    // Force the lazy config load now, so a bad env/config.json fails
    // loudly at startup rather than on the first request that touches it.
    LazyLock::force(&CONFIG);

    if let Err(e) = init_logging() {
        println!("Error initializing logging: {e}");
        exit(1);
    }

    info!("Starting auth-gateway-core");

    // Forces the signing/verification keys to load now instead of lazily
    // on the first request, so a missing or unreadable key file fails
    // startup instead of the first sign-in.
    auth::load_keys();

    let pool = match db::DbPool::from_config() {
        Ok(pool) => pool,
        Err(e) => {
            error!("Error creating database pool: {e:?}");
            exit(1);
        }
    };

    let audit = audit::AuditSink::spawn(pool.clone());

    let result = build_rocket(pool, audit).launch().await;

    if let Err(e) = result {
        error!("Rocket failed to launch: {e}");
        exit(1);
    }
}
