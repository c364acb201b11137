//! Creates (or promotes) an administrator account.
//!
//! Usage: `create_admin <email> <password> [full name]`
//! Reads DATABASE_URL from the environment or `.env`.

use anyhow::{Context, bail};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};
use sqlx::postgres::PgPoolOptions;

const ADMIN_ROLE: i16 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let (Some(email), Some(password)) = (args.next(), args.next()) else {
        bail!("Usage: create_admin <email> <password> [full name]");
    };
    let full_name = {
        let rest: Vec<String> = args.collect();
        if rest.is_empty() { "Administrator".to_string() } else { rest.join(" ") }
    };

    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        bail!("invalid email: {email}");
    }
    if password.chars().count() < 6 {
        bail!("password must be at least 6 characters");
    }

    let salt = SaltString::generate(&mut OsRng);
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash failed: {e}"))?
        .to_string();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let id: uuid::Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (email, password_hash, full_name, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
          SET password_hash = EXCLUDED.password_hash,
              role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(&email)
    .bind(&phc)
    .bind(&full_name)
    .bind(ADMIN_ROLE)
    .fetch_one(&pool)
    .await?;

    println!("admin ready: {email} ({id})");
    Ok(())
}
