use log::{info, warn};
use serde::Deserialize;
use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

/// Runtime configuration. Read from a TOML file (path in `AIOT_CONFIG`,
/// default `config.toml`), every section optional; `MONGODB_URI`,
/// `JWT_SECRET` and `PORT` environment variables win over the file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub websocket: WebsocketConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 5000,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    pub server: SocketAddr,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        WebsocketConfig {
            server: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 5001),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub uri: String,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            uri: "mongodb://localhost:27017".to_string(),
            name: "aiot-monitor".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            jwt_secret: "aiot_monitor_secret_key_change_in_production".to_string(),
            // Issued tokens stay valid for 8 hours; role and active flag are
            // re-checked against the store on every request.
            token_ttl_secs: 8 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig { timeout_secs: 30 }
    }
}

impl Config {
    pub fn load() -> Config {
        let path = env::var("AIOT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let mut config = match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str::<Config>(&raw) {
                Ok(config) => {
                    info!("loaded configuration from {}", path);
                    config
                }
                Err(err) => {
                    warn!("invalid config file {}: {}; using defaults", path, err);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };

        if let Ok(uri) = env::var("MONGODB_URI") {
            config.database.uri = uri;
        }
        if let Ok(secret) = env::var("JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(port) = env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.auth.token_ttl_secs, 8 * 3600);
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.database.name, "aiot-monitor");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [remote]
            timeout_secs = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.remote.timeout_secs, 10);
        assert_eq!(config.database.uri, "mongodb://localhost:27017");
    }
}
