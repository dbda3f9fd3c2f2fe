//! Connection configuration.

use crate::proto::Consistency;

/// Default native protocol port.
pub const DEFAULT_PORT: u16 = 9042;

/// Username and password for the plain-text authentication exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Create a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Settings for opening a [`crate::client::Connection`].
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Keyspace selected with one `USE` query right after the handshake.
    pub keyspace: Option<String>,
    /// Credentials, required only if the server demands authentication.
    pub credentials: Option<Credentials>,
    /// Wrap the TCP stream in TLS against `host`.
    pub tls: bool,
    /// Consistency level sent with every query.
    pub consistency: Consistency,
}

impl ConnectConfig {
    /// Configuration for the given host with all defaults.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            keyspace: None,
            credentials: None,
            tls: false,
            consistency: Consistency::default(),
        }
    }

    /// Start building a configuration.
    pub fn builder(host: impl Into<String>) -> ConnectConfigBuilder {
        ConnectConfigBuilder {
            config: Self::new(host),
        }
    }

    /// `host:port` for connecting and log messages.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`ConnectConfig`].
#[derive(Debug, Clone)]
pub struct ConnectConfigBuilder {
    config: ConnectConfig,
}

impl ConnectConfigBuilder {
    /// Server port (default 9042).
    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Keyspace to select after the handshake.
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.config.keyspace = Some(keyspace.into());
        self
    }

    /// Credentials for servers that demand authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Enable TLS.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.config.tls = tls;
        self
    }

    /// Consistency level for queries (default ONE).
    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.config.consistency = consistency;
        self
    }

    /// Finish building.
    pub fn build(self) -> ConnectConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::new("db.example.com");
        assert_eq!(config.port, 9042);
        assert_eq!(config.keyspace, None);
        assert_eq!(config.credentials, None);
        assert!(!config.tls);
        assert_eq!(config.consistency, Consistency::One);
        assert_eq!(config.address(), "db.example.com:9042");
    }

    #[test]
    fn test_builder() {
        let config = ConnectConfig::builder("localhost")
            .with_port(9043)
            .with_keyspace("ks")
            .with_credentials("user", "pass")
            .with_tls(true)
            .with_consistency(Consistency::Quorum)
            .build();

        assert_eq!(config.address(), "localhost:9043");
        assert_eq!(config.keyspace.as_deref(), Some("ks"));
        assert_eq!(config.credentials, Some(Credentials::new("user", "pass")));
        assert!(config.tls);
        assert_eq!(config.consistency, Consistency::Quorum);
    }
}
