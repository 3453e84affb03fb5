use anyhow::{anyhow, bail, Context, Result};
use facegate_core::{Metric, ResolverConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: optional TOML file, then `FACEGATE_*` environment
/// variables, then command-line flags, each overriding the previous.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Distance metric used for enrollment prototypes and matching.
    pub metric: Metric,
    /// Maximum accepted distance. `None` means the metric's default.
    pub threshold: Option<f32>,
    /// Number of embedding files considered per verify attempt.
    pub frames_per_verify: usize,
}

/// Keys accepted in the TOML config file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    metric: Option<Metric>,
    threshold: Option<f32>,
    frames_per_verify: Option<usize>,
}

impl Config {
    /// Load `path` if given (or `FACEGATE_CONFIG`), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACEGATE_CONFIG").ok().map(PathBuf::from));

        let file = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                parse_file(&text).with_context(|| format!("parsing config {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let mut config = Self::from_file(file);
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: FileConfig) -> Self {
        Self {
            db_path: file.db_path.unwrap_or_else(default_db_path),
            metric: file.metric.unwrap_or_default(),
            threshold: file.threshold,
            frames_per_verify: file.frames_per_verify.unwrap_or(3),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(metric) = std::env::var("FACEGATE_METRIC") {
            self.metric = metric.parse::<Metric>().context("FACEGATE_METRIC")?;
        }
        if let Some(threshold) = env_parse("FACEGATE_THRESHOLD")? {
            self.threshold = Some(threshold);
        }
        if let Some(frames) = env_parse("FACEGATE_FRAMES_PER_VERIFY")? {
            self.frames_per_verify = frames;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.frames_per_verify == 0 {
            bail!("frames_per_verify must be at least 1");
        }
        Ok(())
    }

    /// Resolver settings, validating the threshold.
    pub fn resolver_config(&self) -> Result<ResolverConfig> {
        let threshold = self
            .threshold
            .unwrap_or_else(|| self.metric.default_threshold());
        Ok(ResolverConfig::new(self.metric, threshold)?)
    }
}

fn parse_file(text: &str) -> Result<FileConfig> {
    Ok(toml::from_str(text)?)
}

/// `$XDG_DATA_HOME/facegate/faces.db`, falling back to `~/.local/share`.
fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
        .join("faces.db")
}

/// Unset is `None`; set but unparsable is an error rather than a silent default.
fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => parse_env_value(key, &value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_env_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid {key}: {value:?}"))
}
