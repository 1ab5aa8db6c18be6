//! TOML configuration: applications and the collaborators that serve them

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::diff::DiffOptions;
use crate::error::{Result, SyncError};
use crate::executor::{CommandExecutor, LocalFsExecutor, LocalFsExecutorOptions, SyncExecutor};
use crate::operation::validate_root;
use crate::orchestrator::SyncSession;
use crate::provider::{CommandProvider, LocalFsOptions, LocalFsProvider, TreeProvider};

/// A named pair of roots kept in sync
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    #[serde(alias = "primaryPath")]
    pub primary_path: String,
    #[serde(alias = "drPath")]
    pub dr_path: String,
}

impl Application {
    pub fn new(
        name: impl Into<String>,
        primary_path: impl Into<String>,
        dr_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            primary_path: primary_path.into(),
            dr_path: dr_path.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrSyncConfig {
    #[serde(default)]
    pub applications: Vec<Application>,
    #[serde(default)]
    pub compare: DiffOptions,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Local {
        #[serde(default)]
        follow_links: bool,
        #[serde(default = "default_include_hidden")]
        include_hidden: bool,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutorConfig {
    Local {
        #[serde(default)]
        dry_run: bool,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DrSyncConfig {
    fn default() -> Self {
        Self {
            applications: vec![Self::default_application()],
            compare: DiffOptions::default(),
            provider: ProviderConfig::default(),
            executor: ExecutorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Local {
            follow_links: false,
            include_hidden: default_include_hidden(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::Local { dry_run: false }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ProviderConfig {
    pub fn build(&self) -> Box<dyn TreeProvider> {
        match self {
            Self::Local {
                follow_links,
                include_hidden,
            } => Box::new(LocalFsProvider::new(LocalFsOptions {
                follow_links: *follow_links,
                include_hidden: *include_hidden,
            })),
            Self::Command { program, args } => {
                Box::new(CommandProvider::new(program.clone(), args.clone()))
            }
        }
    }
}

impl ExecutorConfig {
    pub fn build(&self) -> Box<dyn SyncExecutor> {
        match self {
            Self::Local { dry_run } => Box::new(LocalFsExecutor::new(LocalFsExecutorOptions {
                dry_run: *dry_run,
            })),
            Self::Command { program, args } => {
                Box::new(CommandExecutor::new(program.clone(), args.clone()))
            }
        }
    }
}

impl DrSyncConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SyncError::path_error(path, format!("Failed to read config: {}", e))
        })?;
        let config: DrSyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// `<config dir>/drsync/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("drsync")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for app in &self.applications {
            if app.name.trim().is_empty() {
                return Err(SyncError::config("Application name cannot be empty"));
            }
            if !names.insert(app.name.as_str()) {
                return Err(SyncError::config(format!(
                    "Duplicate application name: {}",
                    app.name
                )));
            }
            validate_root(&app.primary_path)
                .and_then(|_| validate_root(&app.dr_path))
                .map_err(|e| SyncError::config(format!("Application '{}': {}", app.name, e)))?;
            if app.primary_path == app.dr_path {
                return Err(SyncError::config(format!(
                    "Application '{}' uses the same path for primary and DR",
                    app.name
                )));
            }
        }

        if let ProviderConfig::Command { program, .. } = &self.provider {
            if program.trim().is_empty() {
                return Err(SyncError::config("Provider program cannot be empty"));
            }
        }
        if let ExecutorConfig::Command { program, .. } = &self.executor {
            if program.trim().is_empty() {
                return Err(SyncError::config("Executor program cannot be empty"));
            }
        }

        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(SyncError::config(format!(
                "Unknown log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn application(&self, name: &str) -> Result<&Application> {
        self.applications
            .iter()
            .find(|app| app.name == name)
            .ok_or_else(|| SyncError::config(format!("Unknown application: {}", name)))
    }

    /// Build a session for the named application with the configured collaborators
    pub fn session(
        &self,
        name: &str,
    ) -> Result<SyncSession<Box<dyn TreeProvider>, Box<dyn SyncExecutor>>> {
        let app = self.application(name)?.clone();
        Ok(SyncSession::new(
            app,
            self.provider.build(),
            self.executor.build(),
            self.compare.clone(),
        ))
    }

    fn default_application() -> Application {
        Application::new("example", "./primary", "./dr")
    }
}

// Default value functions
fn default_include_hidden() -> bool { true }
fn default_log_level() -> String { "info".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DrNewerPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = DrSyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.applications.len(), 1);
        assert_eq!(config.compare.dr_newer, DrNewerPolicy::Ignore);
    }

    #[test]
    fn test_parse_command_collaborators() {
        let config: DrSyncConfig = toml::from_str(
            r#"
            [[applications]]
            name = "payroll"
            primaryPath = 'C:\apps\payroll'
            drPath = 'D:\mirror\payroll'

            [compare]
            dr_newer = "overwrite"

            [provider]
            type = "command"
            program = "pwsh"
            args = ["-File", "list.ps1"]

            [executor]
            type = "command"
            program = "pwsh"
            args = ["-File", "sync.ps1"]

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.application("payroll").unwrap().dr_path, "D:\\mirror\\payroll");
        assert_eq!(config.compare.dr_newer, DrNewerPolicy::Overwrite);
        assert!(matches!(config.provider, ProviderConfig::Command { ref args, .. } if args.len() == 2));
        assert!(config.application("missing").is_err());
    }

    #[test]
    fn test_sections_default_when_missing() {
        let config: DrSyncConfig = toml::from_str("").unwrap();
        assert!(config.applications.is_empty());
        assert_eq!(config.provider, ProviderConfig::default());
        assert_eq!(config.executor, ExecutorConfig::Local { dry_run: false });
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = DrSyncConfig::default();
        config.applications.push(config.applications[0].clone());
        assert!(config.validate().is_err());

        let mut config = DrSyncConfig::default();
        config.applications[0].dr_path = "/srv/../etc".to_string();
        assert!(config.validate().is_err());

        let mut config = DrSyncConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = DrSyncConfig::default();
        config.executor = ExecutorConfig::Command {
            program: " ".to_string(),
            args: vec![],
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = DrSyncConfig::default();
        config.executor = ExecutorConfig::Local { dry_run: true };
        config.save(&path).await.unwrap();

        let loaded = DrSyncConfig::load(&path).await.unwrap();
        assert_eq!(loaded.applications, config.applications);
        assert_eq!(loaded.executor, ExecutorConfig::Local { dry_run: true });
    }

    #[test]
    fn test_session_for_application() {
        let config = DrSyncConfig::default();
        let session = config.session("example").unwrap();
        assert_eq!(session.application().primary_path, "./primary");
        assert!(config.session("nope").is_err());
    }
}
