use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service: where to listen.
///
/// Read from an optional `configuration` file and `APP__*` environment
/// variables, after loading `.env`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// HTTP port. The gRPC server listens on the next port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.grpc_port()?;
        Ok(config)
    }

    /// gRPC port; 0 (ephemeral) stays ephemeral.
    pub fn grpc_port(&self) -> Result<u16, AppError> {
        if self.port == 0 {
            return Ok(0);
        }
        self.port.checked_add(1).ok_or_else(|| {
            AppError::ConfigError(anyhow::anyhow!(
                "port {} leaves no room for the gRPC port",
                self.port
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_port_follows_http_port() {
        assert_eq!(Config { port: 8080 }.grpc_port().unwrap(), 8081);
        assert_eq!(Config { port: 0 }.grpc_port().unwrap(), 0);
    }

    #[test]
    fn highest_port_is_rejected() {
        assert_eq!(Config { port: 65534 }.grpc_port().unwrap(), 65535);
        assert!(matches!(
            Config { port: u16::MAX }.grpc_port(),
            Err(AppError::ConfigError(_))
        ));
    }
}
