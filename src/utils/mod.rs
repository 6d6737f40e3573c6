//! Common utilities and helper functions
//!
//! Tracing initialization, local host identity and retry helpers.

pub mod retry;

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.level`. Fails if a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("shardkeeper={},warn", config.level))
    });

    match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Best-effort detection of the outbound IPv4 address
///
/// Connecting a UDP socket sends no packets; it only selects the route.
/// Falls back to the loopback address when no route exists.
pub fn local_ip() -> String {
    detect_ip()
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .to_string()
}

fn detect_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("192.0.2.1:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Host name of the local machine, falling back to `fallback`
pub fn local_host_name(fallback: &str) -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ip_is_parseable() {
        let ip = local_ip();
        assert!(ip.parse::<IpAddr>().is_ok());
    }

    #[test]
    fn test_local_host_name_is_not_empty() {
        assert!(!local_host_name("fallback-host").is_empty());
    }

    #[test]
    fn test_init_tracing_twice_fails_second_time() {
        let config = LoggingConfig {
            level: String::from("debug"),
            format: String::from("json"),
        };
        let first = init_tracing(&config);
        let second = init_tracing(&config);

        // Another test may have installed a subscriber first
        assert!(first.is_ok() || second.is_err());
        assert!(second.is_err());
    }
}
