//! Configuration loading: a TOML file (see `config.example.toml` at the
//! workspace root) plus the one environment overlay the spec calls for.
//!
//! Grounded on the teacher's `crates/server/src/config.rs` (load-from-path,
//! `anyhow::Context` on every fallible step), swapped from `toml::from_str`
//! to the `config` crate so the same loader also understands environment
//! overrides, the way the pack's `selkies-core` and `ivnc` configs layer a
//! file under CLI/env overrides.

use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use janvlog_protocol::Settings;

/// Environment variable carrying the SMTP password. Never stored in the
/// TOML file; injected at load time so it never ends up on disk.
const SMTP_PASSWORD_ENV: &str = "YAPASSWORD";

/// Prefix/separator for the one environment overlay the spec calls for
/// beyond the SMTP password, e.g. `JANVLOG__JANUS__HOST=...` overrides
/// `[janus] host` from the file.
const ENV_PREFIX: &str = "JANVLOG";

/// Settings plus the SMTP password, which the spec insists lives only in
/// the environment and nowhere else.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub smtp_password: String,
}

/// Loads `path` as TOML, layers a `JANVLOG__<SECTION>__<KEY>` environment
/// overlay on top, and pulls the SMTP password out of its own variable.
pub fn load(path: &Path) -> Result<LoadedSettings> {
    let config = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .with_context(|| format!("loading settings from {}", path.display()))?;

    let settings: Settings = config
        .try_deserialize()
        .with_context(|| format!("parsing settings from {}", path.display()))?;

    let smtp_password = std::env::var(SMTP_PASSWORD_ENV)
        .with_context(|| format!("{SMTP_PASSWORD_ENV} is not set"))?;

    Ok(LoadedSettings {
        settings,
        smtp_password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_settings_and_password_from_env() {
        let mut file = tempfile_with_contents(
            r#"
            [janus]
            host = "localhost"

            [mail]
            host = "smtp.example.com"
            from = "reports@example.com"
            username = "reports@example.com"
            operator_address = "ops@example.com"

            [stt]
            endpoint = "http://localhost:9000"
            "#,
        );
        std::env::set_var(SMTP_PASSWORD_ENV, "hunter2");
        let loaded = load(file.path()).unwrap();
        assert_eq!(loaded.settings.janus.port, 8188);
        assert_eq!(loaded.smtp_password, "hunter2");
        std::env::remove_var(SMTP_PASSWORD_ENV);
        file.flush().unwrap();
    }

    fn tempfile_with_contents(contents: &str) -> NamedTempFileLike {
        let path = std::env::temp_dir().join(format!(
            "janvlog-settings-test-{}.toml",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::write(&path, contents).unwrap();
        NamedTempFileLike { path }
    }

    struct NamedTempFileLike {
        path: std::path::PathBuf,
    }

    impl NamedTempFileLike {
        fn path(&self) -> &Path {
            &self.path
        }
        fn flush(&self) -> std::io::Result<()> {
            std::fs::remove_file(&self.path)
        }
    }
}
