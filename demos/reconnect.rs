//! Watch a connection heal itself
//!
//! Run with: RUST_LOG=sqlx_format_bind=debug cargo run --example reconnect
//!
//! Restart the MySQL server while this runs; statements issued while it is
//! down fail once the retry bound is spent, and later ones reconnect.
//! export DB_USER=root DB_PASSWORD=root DB_NAME=test_db DB_RECONNECT_DELAY_MS=1000

use sqlx_format_bind::prelude::*;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = Options::from_env()?;
    println!(
        "Retry bound: {} attempt(s), delay {:?}",
        options.max_reconnect_attempts, options.reconnect_delay
    );

    let mut db = Database::connect_mysql(
        ConnectionConfig::from_env()?,
        options,
        Authorizer::new(Principal::new("admin"), AllowAll),
    )?;

    for tick in 1..=30 {
        match db.execute("SELECT %d AS tick, NOW() AS at", &values![tick]) {
            Ok(result) => println!(
                "tick {tick}: server time {}",
                result.rows.first().and_then(|r| r.get(1).cloned().flatten()).unwrap_or_default()
            ),
            Err(e) => {
                println!("tick {tick}: {e}");
                println!(
                    "  state={:?} attempts={}/{}",
                    db.connection_state(),
                    db.retry_state().attempts(),
                    db.retry_state().max_attempts()
                );
                if matches!(e, Error::Connection(_)) {
                    println!("Connection gave up for good; build a new Database to try again");
                    break;
                }
            }
        }
        thread::sleep(Duration::from_secs(2));
    }

    db.close();
    Ok(())
}
