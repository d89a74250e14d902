use crate::error::Result;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Manager configuration, usually loaded from `midi-manager.toml`.
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Name the manager registers with the native MIDI subsystem.
    pub client_name: String,
    /// DNS-SD service type browsed for network MIDI peers.
    pub service_type: String,
    /// Upper bound on waiting for a discovered service to resolve.
    pub resolve_timeout_ms: u64,
    /// Upper bound on each step of the session invitation handshake.
    pub invitation_timeout_ms: u64,
    /// Name announced to peers for the local network session.
    pub local_session_name: String,
    /// Control port of the local network session (data port is +1).
    pub local_port: u16,
    /// Advertise the local session while it is enabled.
    pub advertise_session: bool,
    /// Address published with the advertisement. When unset, the address of
    /// the interface that routes to the internet is used.
    pub advertise_address: Option<IpAddr>,
    /// How often the hardware endpoint list is polled for changes.
    pub poll_interval_ms: u64,
    pub log_level: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            client_name: "midi-manager".to_string(),
            service_type: "_apple-midi._udp.local.".to_string(),
            resolve_timeout_ms: 5000,
            invitation_timeout_ms: 2000,
            local_session_name: "midi-manager".to_string(),
            local_port: 5004,
            advertise_session: true,
            advertise_address: None,
            poll_interval_ms: 500,
            log_level: None,
        }
    }
}

impl ManagerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ManagerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn invitation_timeout(&self) -> Duration {
        Duration::from_millis(self.invitation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_partial_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "client_name = \"studio-rig\"\nresolve_timeout_ms = 1500\nlocal_port = 5100\nlog_level = \"debug\""
        )
        .unwrap();
        let config = ManagerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.client_name, "studio-rig");
        assert_eq!(config.resolve_timeout(), Duration::from_millis(1500));
        assert_eq!(config.local_port, 5100);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.service_type, "_apple-midi._udp.local.");
        assert!(config.advertise_session);
        assert_eq!(config.advertise_address, None);
    }

    #[test]
    fn test_advertise_address() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "advertise_address = \"192.168.1.40\"").unwrap();
        let config = ManagerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.advertise_address, Some(IpAddr::from([192, 168, 1, 40])));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "advertise_address = \"studio.local\"").unwrap();
        assert!(matches!(
            ManagerConfig::load_from_file(file.path()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let file = NamedTempFile::new().unwrap();
        let config = ManagerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config, ManagerConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let res = ManagerConfig::load_from_file("/nonexistent/path/to/midi-manager.toml");
        assert!(matches!(res, Err(Error::Io(_))));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "local_port = \"not a port\"").unwrap();
        let res = ManagerConfig::load_from_file(file.path());
        assert!(matches!(res, Err(Error::Config(_))));
    }
}
