use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub fcm_endpoint: String,
    pub fcm_server_key: String,
    pub public_rps: u32,
    pub client_rps: u32,
    pub otp_ttl_seconds: u64,
    pub queue_poll_ms: u64,
    pub attempt_grace_minutes: i64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            fcm_endpoint: env::var("FCM_ENDPOINT")
                .unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".to_string()),
            fcm_server_key: get_env("FCM_SERVER_KEY")?,
            public_rps: get_env_parse("PUBLIC_RPS")?,
            client_rps: get_env_parse("CLIENT_RPS")?,
            otp_ttl_seconds: env::var("OTP_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            queue_poll_ms: env::var("QUEUE_POLL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(750),
            attempt_grace_minutes: env::var("ATTEMPT_GRACE_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse<T>(name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(name)?;
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
