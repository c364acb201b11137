use std::env;

use anyhow::{Context, anyhow};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub jwt_expire_hours: i64,
    /// Allowed CORS origin. `None` lets any origin through (local dev).
    pub frontend_url: Option<String>,
    pub db_max_connections: u32,
    pub run_migrations: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("JWT_SECRET must be set"))?;
        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:5000".to_string());
        let jwt_expire_hours = lookup("JWT_EXPIRE_HOURS")
            .and_then(|s| s.parse::<i64>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(24 * 7);
        let frontend_url = lookup("FRONTEND_URL").filter(|s| !s.trim().is_empty());
        let db_max_connections = lookup("DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(20);
        let run_migrations = lookup("RUN_MIGRATIONS")
            .map(|s| !matches!(s.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Ok(Self {
            database_url,
            bind_addr,
            jwt_secret,
            jwt_expire_hours,
            frontend_url,
            db_max_connections,
            run_migrations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/medical"),
            ("JWT_SECRET", "s3cret"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr, "127.0.0.1:5000");
        assert_eq!(cfg.jwt_expire_hours, 168);
        assert_eq!(cfg.db_max_connections, 20);
        assert!(cfg.frontend_url.is_none());
        assert!(cfg.run_migrations);
    }

    #[test]
    fn required_vars_are_enforced() {
        assert!(Config::from_lookup(lookup_from(&[("JWT_SECRET", "x")])).is_err());
        assert!(
            Config::from_lookup(lookup_from(&[("DATABASE_URL", "postgres://x"), ("JWT_SECRET", "  ")]))
                .is_err()
        );
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/medical"),
            ("JWT_SECRET", "k"),
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("JWT_EXPIRE_HOURS", "12"),
            ("FRONTEND_URL", "http://localhost:3000"),
            ("DB_MAX_CONNECTIONS", "5"),
            ("RUN_MIGRATIONS", "false"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert_eq!(cfg.jwt_expire_hours, 12);
        assert_eq!(cfg.frontend_url.as_deref(), Some("http://localhost:3000"));
        assert_eq!(cfg.db_max_connections, 5);
        assert!(!cfg.run_migrations);
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db/medical"),
            ("JWT_SECRET", "k"),
            ("JWT_EXPIRE_HOURS", "-3"),
            ("DB_MAX_CONNECTIONS", "many"),
        ]))
        .unwrap();

        assert_eq!(cfg.jwt_expire_hours, 168);
        assert_eq!(cfg.db_max_connections, 20);
    }
}
