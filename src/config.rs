//! Verifier configuration.
//!
//! Defaults are layered under an optional JSON config file and CLI overrides,
//! then validated once before any document is touched.
use crate::pairing::PairingRules;
use crate::sandbox::toolchain::{default_toolchains, ToolchainSpec};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;
pub const CONFIG_FILE_NAME: &str = "snipcheck.json";
const DEFAULT_TIMEOUT_SECONDS: f64 = 10.0;
/// Longest accepted per-snippet timeout (one day).
pub const MAX_TIMEOUT_SECONDS: f64 = 86_400.0;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// How captured and expected output are normalized before comparison.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    Exact,
    /// Whitespace trimmed per line; leading/trailing blank lines ignored.
    #[default]
    Trimmed,
    /// Trimmed, then compared as a sorted set of lines.
    OrderedLines,
}

impl Normalization {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Self::Exact),
            "trimmed" => Some(Self::Trimmed),
            "ordered-lines" => Some(Self::OrderedLines),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Trimmed => "trimmed",
            Self::OrderedLines => "ordered-lines",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VerifyConfig {
    pub schema_version: u32,
    #[serde(default = "default_executable_languages")]
    pub executable_languages: BTreeSet<String>,
    #[serde(default = "default_output_languages")]
    pub output_languages: BTreeSet<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Worker threads; `None` means available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub normalization: Normalization,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_env_passthrough")]
    pub env_passthrough: Vec<String>,
    /// Merged over the built-in toolchains; a file entry replaces the built-in
    /// one for the same language.
    #[serde(default)]
    pub toolchains: BTreeMap<String, ToolchainSpec>,
}

/// CLI-provided values layered over the file config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub timeout_seconds: Option<f64>,
    pub workers: Option<usize>,
    pub normalization: Option<Normalization>,
    pub executable_languages: Vec<String>,
    pub output_languages: Vec<String>,
}

fn default_executable_languages() -> BTreeSet<String> {
    BTreeSet::from(["java".to_string()])
}

fn default_output_languages() -> BTreeSet<String> {
    ["yaml", "sql", "css", "less", "makefile", "text"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_timeout_seconds() -> f64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_env_passthrough() -> Vec<String> {
    ["PATH", "JAVA_HOME", "LANG"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Build the config used when no file is present.
pub fn default_config() -> VerifyConfig {
    VerifyConfig {
        schema_version: CONFIG_SCHEMA_VERSION,
        executable_languages: default_executable_languages(),
        output_languages: default_output_languages(),
        timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        workers: None,
        normalization: Normalization::default(),
        max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        env_passthrough: default_env_passthrough(),
        toolchains: default_toolchains(),
    }
}

/// Render a pretty JSON config stub.
pub fn config_stub() -> Result<String> {
    serde_json::to_string_pretty(&default_config()).context("serialize default config")
}

/// Pick the config file to load: explicit path, then `./snipcheck.json`, then
/// the user config dir.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("snipcheck").join("config.json"))
        .filter(|path| path.is_file())
}

pub fn load_config(path: &Path) -> Result<VerifyConfig> {
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let mut config: VerifyConfig = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    for (language, spec) in default_toolchains() {
        config.toolchains.entry(language).or_insert(spec);
    }
    Ok(config)
}

/// Load, override and validate the config for one run.
pub fn load_effective_config(
    explicit: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<VerifyConfig> {
    let mut config = match resolve_config_path(explicit) {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config(&path)?
        }
        None => default_config(),
    };
    apply_overrides(&mut config, overrides);
    normalize_languages(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn apply_overrides(config: &mut VerifyConfig, overrides: &ConfigOverrides) {
    if let Some(timeout_seconds) = overrides.timeout_seconds {
        config.timeout_seconds = timeout_seconds;
    }
    if let Some(workers) = overrides.workers {
        config.workers = Some(workers);
    }
    if let Some(normalization) = overrides.normalization {
        config.normalization = normalization;
    }
    if !overrides.executable_languages.is_empty() {
        config.executable_languages = overrides.executable_languages.iter().cloned().collect();
    }
    if !overrides.output_languages.is_empty() {
        config.output_languages = overrides.output_languages.iter().cloned().collect();
    }
}

fn normalize_languages(config: &mut VerifyConfig) {
    let lower = |set: &BTreeSet<String>| -> BTreeSet<String> {
        set.iter()
            .map(|tag| tag.trim().to_ascii_lowercase())
            .collect()
    };
    config.executable_languages = lower(&config.executable_languages);
    config.output_languages = lower(&config.output_languages);
    config.toolchains = std::mem::take(&mut config.toolchains)
        .into_iter()
        .map(|(language, spec)| (language.trim().to_ascii_lowercase(), spec))
        .collect();
}

/// Reject option values that would make a run meaningless.
pub fn validate_config(config: &VerifyConfig) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }
    if config.executable_languages.is_empty() {
        return Err(anyhow!("executable_languages must be non-empty"));
    }
    if config
        .executable_languages
        .iter()
        .chain(config.output_languages.iter())
        .any(|tag| tag.is_empty())
    {
        return Err(anyhow!("language tags must be non-empty"));
    }
    let overlap: Vec<_> = config
        .executable_languages
        .intersection(&config.output_languages)
        .cloned()
        .collect();
    if !overlap.is_empty() {
        return Err(anyhow!(
            "languages cannot be both executable and output: {}",
            overlap.join(", ")
        ));
    }
    let timeout_ok = config.timeout_seconds > 0.0
        && config.timeout_seconds <= MAX_TIMEOUT_SECONDS
        && Duration::try_from_secs_f64(config.timeout_seconds).is_ok();
    if !timeout_ok {
        return Err(anyhow!(
            "timeout_seconds must be > 0 and <= {MAX_TIMEOUT_SECONDS} (got {})",
            config.timeout_seconds
        ));
    }
    if config.workers == Some(0) {
        return Err(anyhow!("workers must be >= 1"));
    }
    if config.max_output_bytes == 0 {
        return Err(anyhow!("max_output_bytes must be >= 1"));
    }
    for language in &config.executable_languages {
        let spec = config
            .toolchains
            .get(language)
            .ok_or_else(|| {
                anyhow!("no toolchain configured for executable language {language:?}")
            })?;
        spec.validate(language)?;
    }
    Ok(())
}

impl VerifyConfig {
    /// Clamped to `MAX_TIMEOUT_SECONDS`; validation rejects anything outside it.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds.min(MAX_TIMEOUT_SECONDS))
            .unwrap_or_else(|_| Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS))
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1)
        })
    }

    pub fn pairing_rules(&self) -> PairingRules {
        PairingRules {
            executable: self.executable_languages.clone(),
            output: self.output_languages.clone(),
            normalization: self.normalization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = default_config();
        validate_config(&config).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(config.toolchains.contains_key("java"));
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn stub_round_trips_through_loader() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, config_stub().unwrap()).unwrap();
        assert_eq!(load_config(&path).unwrap(), default_config());
    }

    #[test]
    fn minimal_file_gets_defaults_and_builtin_toolchains() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "schema_version": 1,
                "executable_languages": ["sh"],
                "toolchains": {"sh": {"source_file": "snippet.sh", "run": "sh {source}"}}
            }"#,
        )
        .unwrap();
        let config = load_effective_config(Some(&path), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(config.normalization, Normalization::Trimmed);
        assert!(config.toolchains.contains_key("java"));
        assert!(config.toolchains.contains_key("sh"));
        assert!(config.output_languages.contains("text"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.json");
        fs::write(&path, r#"{"schema_version": 1, "timeout": 3}"#).unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn overrides_take_precedence_and_are_lowercased() {
        let overrides = ConfigOverrides {
            timeout_seconds: Some(2.5),
            workers: Some(3),
            normalization: Some(Normalization::Exact),
            executable_languages: vec!["JAVA".to_string()],
            output_languages: vec!["Output".to_string()],
        };
        let mut config = default_config();
        apply_overrides(&mut config, &overrides);
        normalize_languages(&mut config);
        validate_config(&config).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(2500));
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.normalization, Normalization::Exact);
        assert!(config.executable_languages.contains("java"));
        assert_eq!(
            config.output_languages,
            BTreeSet::from(["output".to_string()])
        );
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        let mut config = default_config();
        config.timeout_seconds = 0.0;
        assert!(validate_config(&config).is_err());

        for timeout_seconds in [f64::NAN, f64::INFINITY, -1.0, 1e19, 1e300] {
            let mut config = default_config();
            config.timeout_seconds = timeout_seconds;
            let err = validate_config(&config).unwrap_err();
            assert!(err.to_string().contains("timeout_seconds"));
            assert!(config.timeout() <= Duration::from_secs_f64(MAX_TIMEOUT_SECONDS));
        }

        let mut config = default_config();
        config.timeout_seconds = MAX_TIMEOUT_SECONDS;
        assert!(validate_config(&config).is_ok());

        let mut config = default_config();
        config.workers = Some(0);
        assert!(validate_config(&config).is_err());

        let mut config = default_config();
        config.output_languages.insert("java".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("both executable and output"));

        let mut config = default_config();
        config.executable_languages.insert("kotlin".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("kotlin"));

        let mut config = default_config();
        config.schema_version = 2;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn normalization_names_match_serde() {
        for mode in [
            Normalization::Exact,
            Normalization::Trimmed,
            Normalization::OrderedLines,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
            assert_eq!(Normalization::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Normalization::parse("fuzzy"), None);
    }
}
