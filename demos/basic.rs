//! Basic example compiling and running format-style statements
//!
//! Run with: cargo run --example basic
//!
//! Make sure you have a MySQL database running and set the connection variables:
//! export DB_USER=root DB_PASSWORD=root DB_NAME=test_db DB_HOST=localhost:3306

use sqlx_format_bind::accessor::FieldValue;
use sqlx_format_bind::prelude::*;
use tracing_subscriber::EnvFilter;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Connecting to database...");
    let mut db = Database::connect_mysql(
        ConnectionConfig::from_env()?,
        Options::from_env()?,
        Authorizer::new(Principal::new("admin"), AllowAll),
    )?;
    println!(
        "Connected with {} client, charset {}",
        db.client_kind(),
        db.charset_profile().charset
    );
    if db.is_reduced_trust() {
        println!("Warning: server SQL modes {:?} weaken escaping", db.sql_modes().incompatible);
    }

    println!("\nCreating users table...");
    db.query(
        "CREATE TABLE IF NOT EXISTS users (
            id INT PRIMARY KEY AUTO_INCREMENT,
            user VARCHAR(100) NOT NULL UNIQUE,
            surname VARCHAR(100) NOT NULL DEFAULT '',
            password VARCHAR(255) NOT NULL DEFAULT '',
            score DOUBLE NOT NULL DEFAULT 0
        )",
    )?;

    // Example 1: Insert with typed placeholders
    println!("\n--- Example 1: Inserting users ---");
    let users_to_insert = [("alice", 9.5), ("bob", 7.25), ("o'brien", 8.0)];

    for (user, score) in users_to_insert {
        db.execute(
            "INSERT INTO users (user, score) VALUES (%s, %f)
             ON DUPLICATE KEY UPDATE score = VALUES(score)",
            &values![user, score],
        )?;
        println!("Inserted user '{}': insert_id={}", user, db.insert_id());
    }

    // Example 2: Look at the compiled statement before running it
    println!("\n--- Example 2: Compiling a statement ---");
    let sql = db.prepare(
        "SELECT id, user, score FROM users WHERE score >= %f AND user <> %s ORDER BY id",
        &values![8, "bob"],
    )?;
    println!("Compiled: {sql}");

    let result = db.query(sql.as_str())?;
    println!("Found {} users:", result.rows.len());
    for row in &result.rows {
        let cell = |i: usize| row.get(i).cloned().flatten().unwrap_or_default();
        println!("  - {} (id={}, score={})", cell(1), cell(0), cell(2));
    }

    // Example 3: Column metadata is built on first read
    println!("\n--- Example 3: Column info ---");
    if let Some(FieldValue::Columns(columns)) = db.get("col_info") {
        for column in columns {
            println!("  - {}: {}", column.name, column.type_name);
        }
    }

    // Example 4: Type errors stop the statement before it is sent
    println!("\n--- Example 4: Rejected value ---");
    match db.execute("DELETE FROM users WHERE id = %d", &values!["12abc"]) {
        Ok(_) => println!("Unexpectedly succeeded"),
        Err(e) => println!("Rejected: {e}"),
    }

    // Example 5: Capability-gated helpers
    println!("\n--- Example 5: Updating a surname ---");
    let result = db.set_surname("o'brien", "O'Brien")?;
    println!("Updated {} row(s)", result.rows_affected);
    println!("Statements run so far: {}", db.num_queries());

    // Cleanup
    println!("\nCleaning up...");
    db.query("DROP TABLE IF EXISTS users")?;
    db.close();

    println!("\nExample completed successfully!");
    Ok(())
}
