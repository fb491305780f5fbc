//! Scan configuration files.
//!
//! Resolution order: an explicit path (`--config` or
//! `PROBESCAN_CONFIG_PATH`), inline JSON in `PROBESCAN_CONFIG_JSON`, the
//! first default candidate file that exists, then built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use probescan_core::config::{RetryPolicy, ScanSettings};
use probescan_core::ids::codec::{CodecPart, MixedRadixCodec};
use probescan_core::ids::{Identifier, IdentifierSet};
use probescan_core::probe::KeyFormat;
use probescan_core::store::schema::SchemaConfig;
use serde::{Deserialize, Serialize};

pub const CONFIG_JSON_ENV: &str = "PROBESCAN_CONFIG_JSON";

const CANDIDATES: &[&str] = &[
    "probescan.toml",
    "probescan.json",
    "config/probescan.toml",
    "config/probescan.json",
];

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbescanConfig {
    pub database: DatabaseConfig,
    pub scan: ScanSettings,
    pub identifiers: IdentifierConfig,
    pub probe: ProbeConfig,
    pub schema: SchemaConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("probescan.sqlite"),
        }
    }
}

/// The identifiers a `scan` visits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierConfig {
    /// First identifier of the implicit range. Defaults to the lower bound
    /// of `scan.range`.
    pub start: Option<Identifier>,
    /// Exclusive end. Falls back to `scan.range.max + 1`, then to the key
    /// codec's capacity.
    pub end: Option<Identifier>,
    /// Explicit identifiers; replaces the implicit range when set.
    pub list: Option<Vec<Identifier>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// URL template containing a `{key}` placeholder.
    pub endpoint: Option<String>,
    pub retry: RetryPolicy,
    /// Mixed-radix key layout. Empty means decimal keys.
    pub codec: Vec<CodecPart>,
}

impl ProbeConfig {
    pub fn codec(&self) -> anyhow::Result<Option<MixedRadixCodec>> {
        if self.codec.is_empty() {
            return Ok(None);
        }
        MixedRadixCodec::new(&self.codec)
            .map(Some)
            .context("invalid probe.codec layout")
    }

    pub fn key_format(&self) -> anyhow::Result<KeyFormat> {
        Ok(match self.codec()? {
            Some(codec) => KeyFormat::Codec(Arc::new(codec)),
            None => KeyFormat::Decimal,
        })
    }
}

/// Where the active configuration came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Path(PathBuf),
    EnvInline,
    File(PathBuf),
    Default,
}

impl ProbescanConfig {
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, ConfigSource)> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            return Ok((config, ConfigSource::Path(path.to_path_buf())));
        }

        if let Ok(raw) = env::var(CONFIG_JSON_ENV)
            && !raw.trim().is_empty()
        {
            let config = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file() {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((Self::default(), ConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read probescan config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid probescan config {}", path.display())
            }),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid probescan config {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse probescan config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid probescan config json: {err}"))
    }

    fn find_default_file() -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    /// Identifier set for a fresh scan.
    pub fn identifier_set(&self) -> anyhow::Result<IdentifierSet> {
        if let Some(list) = &self.identifiers.list {
            return Ok(IdentifierSet::List(list.clone()));
        }

        let start = self.identifiers.start.unwrap_or(self.scan.range.min);
        let end = match self.identifiers.end {
            Some(end) => end,
            None => match (self.scan.range.max, self.probe.codec()?) {
                (Some(max), _) => max.saturating_add(1),
                (None, Some(codec)) => codec.max_identifier().saturating_add(1),
                (None, None) => bail!(
                    "no identifier end configured; set identifiers.end, \
                     scan.range.max, or a probe.codec"
                ),
            },
        };
        if end < start {
            bail!("identifier range is inverted: start {start} > end {end}");
        }
        Ok(IdentifierSet::range(start, end))
    }
}
