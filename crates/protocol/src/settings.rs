use serde::Deserialize;

/// Top-level configuration, loaded from a TOML file with an environment
/// overlay (see `janvlog_core::settings::load`).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub janus: JanusSettings,
    pub mail: MailSettings,
    pub stt: SttSettings,
    #[serde(default)]
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JanusSettings {
    /// Host (no scheme, no port) of the Janus gateway's WebSocket endpoint.
    pub host: String,
    #[serde(default = "default_janus_port")]
    pub port: u16,
    #[serde(default = "default_admin_key")]
    pub admin_key: String,
}

impl JanusSettings {
    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }
}

fn default_janus_port() -> u16 {
    8188
}

fn default_admin_key() -> String {
    "janusoverlord".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailSettings {
    pub host: String,
    #[serde(default = "default_mail_port")]
    pub port: u16,
    pub from: String,
    pub username: String,
    /// Fixed recipient cc'd on every generated report.
    pub operator_address: String,
}

fn default_mail_port() -> u16 {
    587
}

#[derive(Debug, Clone, Deserialize)]
pub struct SttSettings {
    /// Base URL of the speech-to-text HTTP endpoint.
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_log_root")]
    pub log_root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            log_root: default_log_root(),
        }
    }
}

fn default_log_root() -> String {
    "logs".to_string()
}
