use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwksConfig {
    pub url: String,
    pub issuer: String,
    pub audience: String,
    pub org_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub acquire_timeout: Duration,
    pub transaction_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub consent_portal_url: String,
    pub jwks: JwksConfig,
    pub db: DbConfig,
    /// `None` disables audit emission entirely.
    pub audit_service_url: Option<String>,
    pub health_check_interval: Duration,
    pub expiry_sweep_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env_parse("PORT", 8080)?;

        let consent_portal_url = std::env::var("CONSENT_PORTAL_URL")
            .unwrap_or_else(|_| "http://localhost:3000/consents".into());

        let jwks = JwksConfig {
            url: std::env::var("JWKS_URL").expect("JWKS_URL must be set"),
            issuer: std::env::var("ISSUER").expect("ISSUER must be set"),
            audience: std::env::var("AUDIENCE").expect("AUDIENCE must be set"),
            org_name: std::env::var("ORG_NAME").ok().filter(|s| !s.is_empty()),
        };

        let db = DbConfig {
            url: std::env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            max_connections: env_parse("DB_MAX_OPEN", 10)?,
            min_connections: env_parse("DB_MAX_IDLE", 2)?,
            connect_timeout: Duration::from_secs(env_parse("DB_CONNECT_TIMEOUT_SECS", 10)?),
            acquire_timeout: Duration::from_secs(env_parse("DB_QUERY_TIMEOUT_SECS", 30)?),
            transaction_timeout: Duration::from_secs(env_parse("DB_TRANSACTION_TIMEOUT_SECS", 60)?),
            idle_timeout: Duration::from_secs(env_parse("DB_CONN_MAX_IDLE_TIME_SECS", 600)?),
            max_lifetime: Duration::from_secs(env_parse("DB_CONN_MAX_LIFETIME_SECS", 3600)?),
        };

        let audit_service_url = std::env::var("AUDIT_SERVICE_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let health_check_interval =
            Duration::from_secs(env_parse("HEALTH_CHECK_INTERVAL", 30)?);
        let expiry_sweep_interval =
            Duration::from_secs(env_parse("EXPIRY_SWEEP_INTERVAL_SECS", 30)?);

        Ok(Self {
            port,
            consent_portal_url,
            jwks,
            db,
            audit_service_url,
            health_check_interval,
            expiry_sweep_interval,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{key} is not a valid value")),
        Err(_) => Ok(default),
    }
}
