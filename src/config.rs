use std::env;
use std::net::SocketAddr;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone)]
pub struct Config {
    /// Management endpoint bind address
    pub bind_addr: SocketAddr,

    /// Log filter level for the turnstile target
    pub log_level: String,

    /// Generate demo traffic so the endpoint has something to report
    pub demo_traffic: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let bind_addr = lookup("TURNSTILE_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8719".to_string());
        let bind_addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| format!("invalid TURNSTILE_BIND_ADDR '{}': {}", bind_addr, e))?;

        let log_level = lookup("TURNSTILE_LOG").unwrap_or_else(|| "info".to_string());
        if !LOG_LEVELS.contains(&log_level.as_str()) {
            return Err(format!(
                "invalid TURNSTILE_LOG '{}': expected one of {}",
                log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        let demo_traffic = match lookup("TURNSTILE_DEMO") {
            Some(value) => parse_bool("TURNSTILE_DEMO", &value)?,
            None => false,
        };

        Ok(Self { bind_addr, log_level, demo_traffic })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, String> {
    match value {
        "1" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(format!("invalid {} '{}': expected a boolean", name, other)),
    }
}
