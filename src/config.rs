//! Settings file and command-line overrides
//!
//! Settings are read from a YAML file (by default
//! `<config dir>/stretchguard/config.yaml`), then the password is taken from
//! `STRETCHGUARD_PASSWORD` when set, then command-line flags win.

use crate::error::{Result, StretchError};
use crate::platform::RestSettings;
use crate::policy::FaultTolerance;
use crate::runner::{PassOptions, RunOptions, DEFAULT_CATEGORY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the platform password
pub const PASSWORD_ENV: &str = "STRETCHGUARD_PASSWORD";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Persistent settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Management endpoint base URL
    pub endpoint: Option<String>,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
    pub timeout_secs: u64,
    /// Tag category holding the fault-domain tags
    pub category: String,
    /// Cluster filter: `*`, a name, or a wildcard pattern
    pub cluster: String,
    pub fault_tolerance: FaultTolerance,
    pub passthru: bool,
    pub parallel: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: None,
            username: None,
            password: None,
            insecure: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            category: DEFAULT_CATEGORY.to_string(),
            cluster: "*".to_string(),
            fault_tolerance: FaultTolerance::Default,
            passthru: false,
            parallel: false,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stretchguard").join("config.yaml"))
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_yaml::from_str(&content)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Load an explicit file, or the default file if it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Take the password from the environment when it is set
    pub fn with_env(mut self) -> Self {
        if let Ok(password) = std::env::var(PASSWORD_ENV) {
            if !password.is_empty() {
                self.password = Some(password);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(StretchError::InvalidConfig(
                "category must not be empty".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(StretchError::InvalidConfig(
                "timeout_secs must be positive".to_string(),
            ));
        }
        self.fault_tolerance.resolve()?;
        Ok(())
    }

    /// Connection settings; endpoint and username are required
    pub fn rest_settings(&self) -> Result<RestSettings> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| StretchError::InvalidConfig("no endpoint configured".to_string()))?;
        let username = self
            .username
            .clone()
            .ok_or_else(|| StretchError::InvalidConfig("no username configured".to_string()))?;

        Ok(RestSettings {
            endpoint,
            username,
            password: self.password.clone().unwrap_or_default(),
            insecure: self.insecure,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            cluster_filter: self.cluster.clone(),
            fault_tolerance: self.fault_tolerance,
            pass: PassOptions {
                category: self.category.clone(),
                passthru: self.passthru,
            },
            parallel: self.parallel,
        }
    }
}

/// Values given on the command line; `None` and `false` keep the setting
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub insecure: bool,
    pub category: Option<String>,
    pub cluster: Option<String>,
    pub fault_tolerance: Option<FaultTolerance>,
    pub passthru: bool,
    pub parallel: bool,
}

impl Overrides {
    pub fn apply(self, mut settings: Settings) -> Settings {
        if let Some(endpoint) = self.endpoint {
            settings.endpoint = Some(endpoint);
        }
        if let Some(username) = self.username {
            settings.username = Some(username);
        }
        if let Some(category) = self.category {
            settings.category = category;
        }
        if let Some(cluster) = self.cluster {
            settings.cluster = cluster;
        }
        if let Some(tolerance) = self.fault_tolerance {
            settings.fault_tolerance = tolerance;
        }
        settings.insecure |= self.insecure;
        settings.passthru |= self.passthru;
        settings.parallel |= self.parallel;
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.category, "AZ");
        assert_eq!(settings.cluster, "*");
        assert_eq!(settings.timeout_secs, 60);
        assert_eq!(settings.fault_tolerance, FaultTolerance::Default);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "endpoint: https://vc.example.com\nusername: admin\nfault_tolerance:\n  mode: raid6\n"
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.endpoint.as_deref(), Some("https://vc.example.com"));
        assert_eq!(settings.fault_tolerance, FaultTolerance::Raid6);
        assert_eq!(settings.category, "AZ");

        let rest = settings.rest_settings().unwrap();
        assert_eq!(rest.timeout, Duration::from_secs(60));
        assert_eq!(rest.password, "");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            Settings::load_or_default(Some(&missing)),
            Err(StretchError::Io(_))
        ));
    }

    #[test]
    fn test_overrides_win() {
        let settings = Settings {
            category: "Sites".to_string(),
            cluster: "prod-*".to_string(),
            ..Default::default()
        };
        let overrides = Overrides {
            cluster: Some("stretch-01".to_string()),
            fault_tolerance: Some(FaultTolerance::Mirror { failures: 2 }),
            passthru: true,
            ..Default::default()
        };

        let merged = overrides.apply(settings);
        assert_eq!(merged.category, "Sites");
        assert_eq!(merged.cluster, "stretch-01");
        assert!(merged.passthru);
        assert!(!merged.parallel);

        let options = merged.run_options();
        assert_eq!(options.cluster_filter, "stretch-01");
        assert_eq!(options.pass.category, "Sites");
        assert_eq!(options.fault_tolerance, FaultTolerance::Mirror { failures: 2 });
    }

    #[test]
    fn test_validate_rejects_out_of_range_failures() {
        let settings = Settings {
            fault_tolerance: FaultTolerance::Mirror { failures: 4 },
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(StretchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rest_settings_require_endpoint() {
        let settings = Settings {
            username: Some("admin".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            settings.rest_settings(),
            Err(StretchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_password_is_not_written_back() {
        let settings = Settings {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(!yaml.contains("hunter2"));
    }
}
