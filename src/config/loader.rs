//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "ARDUINO_RELAY";

/// Config file name
const CONFIG_FILE_NAME: &str = "arduino-relay.toml";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "ARDUINO_RELAY_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using the standard resolution order, then apply
    /// environment overrides.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path. The file must exist.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Built-in defaults plus environment overrides; no file is read.
    pub fn with_defaults() -> ConfigResult<Self> {
        let mut config = Config::default();
        apply_env_overrides(&mut config)?;

        Ok(Self {
            config_path: None,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. Platform config directory
    if let Some(dir) = get_default_config_dir() {
        let app_config = dir.join(CONFIG_FILE_NAME);
        if app_config.exists() {
            return Some(app_config);
        }
    }

    None
}

/// Platform-specific directory holding the config file.
pub fn get_default_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "arduino-relay").map(|dirs| dirs.config_dir().to_path_buf())
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Read `ARDUINO_RELAY_<key>`, parsed. Unset is `None`; unparsable is an error.
fn env_value<T: FromStr>(key: &str, what: &str) -> ConfigResult<Option<T>> {
    let var = format!("{}_{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env_parse(var, format!("Invalid {what}: '{val}'"))),
        Err(_) => Ok(None),
    }
}

fn env_flag(key: &str) -> ConfigResult<Option<bool>> {
    let var = format!("{}_{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "on" | "yes" => Ok(Some(true)),
            "false" | "0" | "off" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::env_parse(var, format!("Invalid boolean: '{val}'"))),
        },
        Err(_) => Ok(None),
    }
}

/// Apply `ARDUINO_RELAY_<SECTION>_<KEY>` overrides.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Relay overrides
    if let Some(val) = env_value("RELAY_MODE", "mode")? {
        config.relay.mode = val;
    }
    if let Some(val) = env_value("RELAY_SERIAL_INTERFACE", "serial interface")? {
        config.relay.serial_interface = val;
    }
    if let Some(val) = env_value("RELAY_REMOTE_URL", "URL")? {
        config.relay.remote_url = val;
    }
    if let Some(val) = env_flag("RELAY_REPORT_WEBSOCKET_CLOSE")? {
        config.relay.report_websocket_close = val;
    }
    if let Some(val) = env_flag("RELAY_ECHO_TO_CLIENTS")? {
        config.relay.echo_to_clients = val;
    }

    // Server overrides
    if let Some(val) = env_flag("SERVER_ENABLED")? {
        config.server.enabled = val;
    }
    if let Some(val) = env_value("SERVER_PORT", "port number")? {
        config.server.port = val;
    }

    // Logging overrides
    if let Some(val) = env_value("LOGGING_LEVEL", "log level")? {
        config.logging.level = val;
    }
    if let Some(val) = env_value("LOGGING_FORMAT", "log format")? {
        config.logging.format = val;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().server.port, 55777);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("ARDUINO_RELAY_SERVER_PORT", "9999");
        env::set_var("ARDUINO_RELAY_SERVER_ENABLED", "on");
        env::set_var("ARDUINO_RELAY_LOGGING_FORMAT", "json");

        let loader = ConfigLoader::with_defaults().unwrap();
        assert_eq!(loader.config().server.port, 9999);
        assert!(loader.config().server.enabled);
        assert_eq!(loader.config().logging.format, LogFormat::Json);

        env::remove_var("ARDUINO_RELAY_SERVER_PORT");
        env::remove_var("ARDUINO_RELAY_SERVER_ENABLED");
        env::remove_var("ARDUINO_RELAY_LOGGING_FORMAT");
    }

    #[test]
    #[serial]
    fn test_bad_env_value_is_an_error() {
        env::set_var("ARDUINO_RELAY_SERVER_PORT", "not-a-port");

        let err = ConfigLoader::with_defaults().unwrap_err();
        assert!(
            matches!(err, ConfigError::EnvParse { ref var, .. } if var == "ARDUINO_RELAY_SERVER_PORT")
        );

        env::remove_var("ARDUINO_RELAY_SERVER_PORT");
    }

    #[test]
    #[serial]
    fn test_load_from_file_with_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[relay]\nmode = \"serial\"\nserial_interface = \"/dev/ttyACM1\"\n\n[server]\nport = 6000"
        )
        .unwrap();
        env::set_var("ARDUINO_RELAY_RELAY_SERIAL_INTERFACE", "/dev/ttyACM0");

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        assert_eq!(loader.config().relay.mode, "serial");
        assert_eq!(loader.config().relay.serial_interface, "/dev/ttyACM0");
        assert_eq!(loader.config().server.port, 6000);
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));

        env::remove_var("ARDUINO_RELAY_RELAY_SERIAL_INTERFACE");
    }

    #[test]
    #[serial]
    fn test_config_env_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[server]\nenabled = true\n").unwrap();
        env::set_var("ARDUINO_RELAY_CONFIG", &path);

        assert_eq!(resolve_config_path(), Some(path));
        let loader = ConfigLoader::load().unwrap();
        assert!(loader.config().server.enabled);

        env::remove_var("ARDUINO_RELAY_CONFIG");
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_from(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"high\"").unwrap();

        let err = ConfigLoader::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
