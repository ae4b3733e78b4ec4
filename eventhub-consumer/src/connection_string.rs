//! Event Hubs namespace connection strings.
//!
//! A connection string looks like
//! `Endpoint=sb://<namespace>.servicebus.windows.net/;SharedAccessKeyName=<name>;SharedAccessKey=<key>`,
//! optionally followed by `;EntityPath=<event hub>`. The same string doubles as the
//! SASL PLAIN password on the namespace's Kafka endpoint.
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Port of the Kafka protocol surface on an Event Hubs namespace.
pub const KAFKA_PORT: u16 = 9093;

/// SASL user name the Kafka endpoint expects when authenticating with a connection string.
pub const KAFKA_SASL_USERNAME: &str = "$ConnectionString";

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    host: String,
    shared_access_key_name: Option<String>,
    shared_access_key: Option<String>,
    shared_access_signature: Option<String>,
    entity_path: Option<String>,
}

impl ConnectionString {
    /// Fully qualified namespace host, e.g. `ns.servicebus.windows.net`.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn shared_access_key_name(&self) -> Option<&str> {
        self.shared_access_key_name.as_deref()
    }

    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }

    /// The connection string as given, used as the SASL password.
    pub fn as_secret(&self) -> &str {
        &self.raw
    }

    pub fn kafka_bootstrap_server(&self) -> String {
        format!("{}:{}", self.host, KAFKA_PORT)
    }

    /// Pick the event hub name from configuration and the connection string.
    /// Either source is enough, but when both are present they must agree.
    pub fn resolve_event_hub_name(&self, configured: Option<&str>) -> Result<String, ConfigError> {
        match (configured, self.entity_path.as_deref()) {
            (Some(configured), Some(entity_path)) if configured != entity_path => {
                Err(ConfigError::EventHubNameMismatch {
                    configured: configured.to_owned(),
                    entity_path: entity_path.to_owned(),
                })
            }
            (Some(name), _) | (None, Some(name)) => Ok(name.to_owned()),
            (None, None) => Err(ConfigError::MissingEventHubName),
        }
    }
}

impl FromStr for ConnectionString {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(ConfigError::EmptyConnectionString);
        }

        let mut endpoint = None;
        let mut shared_access_key_name = None;
        let mut shared_access_key = None;
        let mut shared_access_signature = None;
        let mut entity_path = None;

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            // Keys are base64 and may end in '=', so only split on the first one.
            let (key, value) = segment
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedSegment(segment.to_owned()))?;
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.to_owned()),
                "sharedaccesskeyname" => shared_access_key_name = Some(value.to_owned()),
                "sharedaccesskey" => shared_access_key = Some(value.to_owned()),
                "sharedaccesssignature" => shared_access_signature = Some(value.to_owned()),
                "entitypath" => entity_path = Some(value.to_owned()),
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or(ConfigError::MissingEndpoint)?;
        let host = parse_host(&endpoint)?;

        let has_key = shared_access_key_name.is_some() && shared_access_key.is_some();
        if !has_key && shared_access_signature.is_none() {
            return Err(ConfigError::MissingCredentials);
        }

        Ok(ConnectionString {
            raw: raw.to_owned(),
            host,
            shared_access_key_name,
            shared_access_key,
            shared_access_signature,
            entity_path,
        })
    }
}

fn parse_host(endpoint: &str) -> Result<String, ConfigError> {
    let invalid = || ConfigError::InvalidEndpoint(endpoint.to_owned());

    let (scheme, rest) = endpoint.split_once("://").ok_or_else(invalid)?;
    if !matches!(
        scheme.to_ascii_lowercase().as_str(),
        "sb" | "amqps" | "https"
    ) {
        return Err(invalid());
    }

    let authority = rest.split('/').next().unwrap_or_default();
    let host = authority
        .rsplit_once(':')
        .map_or(authority, |(host, _port)| host);
    if host.is_empty() {
        return Err(invalid());
    }

    Ok(host.to_ascii_lowercase())
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host", &self.host)
            .field("shared_access_key_name", &self.shared_access_key_name)
            .field(
                "shared_access_key",
                &self.shared_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "shared_access_signature",
                &self.shared_access_signature.as_ref().map(|_| "<redacted>"),
            )
            .field("entity_path", &self.entity_path)
            .finish()
    }
}
