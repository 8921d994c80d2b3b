// Engine configuration: limits, isolation backend, per-language container settings
use anyhow::{bail, Context, Result};
use quizrun_common::config::env_or;
use quizrun_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_LANGUAGES_CONFIG: &str = "config/languages.json";

/// Where child processes run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    /// Directly on the host, in a fresh process group
    Host,
    /// In a throwaway container per step, one image per language
    Docker,
}

impl FromStr for Isolation {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" => Ok(Isolation::Host),
            "docker" => Ok(Isolation::Docker),
            other => bail!("Unknown isolation mode '{}' (expected host or docker)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parent of every job's private directory. Always absolute.
    pub workspace_root: PathBuf,
    pub run_timeout: Duration,
    pub compile_timeout: Duration,
    pub isolation: Isolation,
    /// Cap per captured stream; the rest is drained and discarded
    pub max_output_bytes: usize,
    pub languages_config: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir().join("quizrun"),
            run_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            compile_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            isolation: Isolation::Host,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            languages_config: PathBuf::from(DEFAULT_LANGUAGES_CONFIG),
        }
    }
}

impl EngineConfig {
    /// Build from `QUIZRUN_*` environment variables, defaulting anything unset
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let workspace_root = match std::env::var("QUIZRUN_WORKSPACE_ROOT") {
            Ok(raw) => PathBuf::from(raw),
            Err(_) => defaults.workspace_root,
        };
        let isolation = match std::env::var("QUIZRUN_ISOLATION") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.isolation,
        };
        let run_timeout_ms = env_or("QUIZRUN_RUN_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        let compile_timeout_ms = env_or("QUIZRUN_COMPILE_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        let max_output_bytes = env_or("QUIZRUN_MAX_OUTPUT_BYTES", DEFAULT_MAX_OUTPUT_BYTES)?;
        let languages_config = std::env::var("QUIZRUN_LANGUAGES_CONFIG")
            .map(PathBuf::from)
            .unwrap_or(defaults.languages_config);

        if run_timeout_ms == 0 || compile_timeout_ms == 0 {
            bail!("Timeouts must be greater than zero");
        }

        Ok(Self {
            workspace_root: absolutize(workspace_root)?,
            run_timeout: Duration::from_millis(run_timeout_ms),
            compile_timeout: Duration::from_millis(compile_timeout_ms),
            isolation,
            max_output_bytes,
            languages_config,
        })
    }
}

/// Container bind mounts need absolute host paths
fn absolutize(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(path))
}

/// Container settings for one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageSettings {
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
}

impl LanguageSettings {
    fn builtin(language: Language) -> Self {
        let image = match language {
            Language::Python => "python:3.11-slim",
            Language::Javascript => "node:20-slim",
            Language::Cpp => "gcc:13",
            Language::Java => "eclipse-temurin:17-jdk",
        };
        Self {
            image: image.to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
struct LanguageOverride {
    name: String,
    image: Option<String>,
    memory_limit_mb: Option<u32>,
    cpu_limit: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageOverride>,
}

/// Per-language container settings, built-in defaults overlaid with
/// whatever `languages.json` specifies
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageSettings>,
}

impl Default for LanguageConfigManager {
    fn default() -> Self {
        let configs = Language::ALL
            .iter()
            .map(|&lang| (lang, LanguageSettings::builtin(lang)))
            .collect();
        Self { configs }
    }
}

impl LanguageConfigManager {
    /// Load overrides from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    }

    /// Like [`load`](Self::load), but a missing file just means defaults
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let parsed: LanguagesJson = serde_json::from_str(content)?;
        let mut manager = Self::default();

        for entry in parsed.languages {
            let language: Language = entry.name.parse()?;
            let settings = manager
                .configs
                .entry(language)
                .or_insert_with(|| LanguageSettings::builtin(language));
            if let Some(image) = entry.image {
                settings.image = image;
            }
            if let Some(memory) = entry.memory_limit_mb {
                if memory == 0 {
                    bail!("memory_limit_mb for {} must be positive", language);
                }
                settings.memory_limit_mb = memory;
            }
            if let Some(cpu) = entry.cpu_limit {
                if cpu <= 0.0 {
                    bail!("cpu_limit for {} must be positive", language);
                }
                settings.cpu_limit = cpu;
            }
        }

        Ok(manager)
    }

    pub fn get(&self, language: Language) -> LanguageSettings {
        self.configs
            .get(&language)
            .cloned()
            .unwrap_or_else(|| LanguageSettings::builtin(language))
    }

    pub fn image(&self, language: Language) -> String {
        self.get(language).image
    }

    /// Memory limit in bytes, as Docker expects it
    pub fn memory_limit_bytes(&self, language: Language) -> i64 {
        self.get(language).memory_limit_mb as i64 * 1024 * 1024
    }

    /// CPU limit in nano-CPUs, as Docker expects it
    pub fn nano_cpus(&self, language: Language) -> i64 {
        (self.get(language).cpu_limit as f64 * 1_000_000_000.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.run_timeout, Duration::from_secs(5));
        assert_eq!(config.compile_timeout, Duration::from_secs(5));
        assert_eq!(config.isolation, Isolation::Host);
        assert!(config.workspace_root.is_absolute());
    }

    #[test]
    fn test_isolation_parse() {
        assert_eq!("Docker".parse::<Isolation>().unwrap(), Isolation::Docker);
        assert_eq!(" host".parse::<Isolation>().unwrap(), Isolation::Host);
        assert!("vm".parse::<Isolation>().is_err());
    }

    #[test]
    fn test_language_defaults() {
        let manager = LanguageConfigManager::default();
        assert_eq!(manager.image(Language::Cpp), "gcc:13");
        assert_eq!(manager.memory_limit_bytes(Language::Python), 256 * 1024 * 1024);
        assert_eq!(manager.nano_cpus(Language::Java), 500_000_000);
    }

    #[test]
    fn test_language_overrides() {
        let manager = LanguageConfigManager::from_json(
            r#"{"languages":[{"name":"java","image":"quizrun-java:17","memory_limit_mb":512}]}"#,
        )
        .unwrap();
        let java = manager.get(Language::Java);
        assert_eq!(java.image, "quizrun-java:17");
        assert_eq!(java.memory_limit_mb, 512);
        assert_eq!(java.cpu_limit, 0.5);
        assert_eq!(manager.image(Language::Python), "python:3.11-slim");
    }

    #[test]
    fn test_language_overrides_reject_unknown() {
        let result =
            LanguageConfigManager::from_json(r#"{"languages":[{"name":"cobol","image":"x"}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let manager =
            LanguageConfigManager::load_or_default(Path::new("/nonexistent/languages.json"))
                .unwrap();
        assert_eq!(manager.image(Language::Javascript), "node:20-slim");
        assert!(LanguageConfigManager::load(Path::new("/nonexistent/languages.json")).is_err());
    }
}
