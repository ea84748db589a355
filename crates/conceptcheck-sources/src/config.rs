//! Configuration loading and engine factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use conceptcheck_core::cache::{DiskCache, InMemoryCache, NoopCache};
use conceptcheck_core::engine::{ConceptEngine, InputLimits};
use conceptcheck_core::knowledge::KnowledgeStore;
use conceptcheck_core::resolver::{DisambiguationPolicy, ResolverConfig};
use conceptcheck_core::scoring::ScoringWeights;
use conceptcheck_core::traits::{EmbeddingModel, ReferenceCache, ReferenceSource};

use crate::error::ConfigError;
use crate::ollama::{self, OllamaEmbedder};
use crate::wikipedia::{self, WikipediaSource};

const CONFIG_FILE: &str = "conceptcheck.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Wikipedia,
    None,
}

/// `[source]`: where external reference content comes from.
///
/// Note: Custom Debug impl masks the access token to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub base_url: String,
    pub user_agent: String,
    pub access_token: Option<String>,
    pub timeout_secs: u64,
    pub max_candidates: usize,
    pub search_limit: usize,
    pub disambiguation: DisambiguationPolicy,
    pub retry_delay_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Wikipedia,
            base_url: wikipedia::DEFAULT_API_URL.to_string(),
            user_agent: wikipedia::DEFAULT_USER_AGENT.to_string(),
            access_token: None,
            timeout_secs: 5,
            max_candidates: 3,
            search_limit: 5,
            disambiguation: DisambiguationPolicy::First,
            retry_delay_ms: 200,
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("user_agent", &self.user_agent)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_candidates", &self.max_candidates)
            .field("search_limit", &self.search_limit)
            .field("disambiguation", &self.disambiguation)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

impl SourceConfig {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_candidates: self.max_candidates,
            search_limit: self.search_limit,
            disambiguation: self.disambiguation,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// `[embedding]`: optional dense similarity backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmbeddingConfig {
    Ollama {
        #[serde(default = "default_ollama_url")]
        base_url: String,
        #[serde(default = "default_embedding_model")]
        model: String,
    },
    #[default]
    None,
}

fn default_ollama_url() -> String {
    ollama::DEFAULT_BASE_URL.to_string()
}

fn default_embedding_model() -> String {
    ollama::DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Memory,
    Disk,
    None,
}

/// `[cache]`: where resolved reference content is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(rename = "type")]
    pub kind: CacheKind,
    /// Disk cache directory; defaults to `~/.cache/conceptcheck`.
    pub dir: Option<PathBuf>,
    pub ttl_secs: Option<u64>,
}

/// `[knowledge]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Extra concept definitions merged with the built-in set.
    pub extra_file: Option<PathBuf>,
}

/// `[evaluation]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub parallelism: usize,
    pub output_dir: PathBuf,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            parallelism: 4,
            output_dir: PathBuf::from("./conceptcheck-results"),
        }
    }
}

/// Top-level conceptcheck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConceptcheckConfig {
    pub source: SourceConfig,
    pub embedding: EmbeddingConfig,
    pub cache: CacheConfig,
    pub scoring: ScoringWeights,
    pub knowledge: KnowledgeConfig,
    pub limits: InputLimits,
    pub evaluation: EvaluationSettings,
}

impl ConceptcheckConfig {
    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.kind == SourceKind::Wikipedia && self.source.max_candidates == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source.max_candidates",
                message: "must be at least 1".into(),
            });
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "source.timeout_secs",
                message: "must be at least 1".into(),
            });
        }
        if let EmbeddingConfig::Ollama { model, .. } = &self.embedding {
            if model.trim().is_empty() {
                return Err(ConfigError::MissingModel);
            }
        }
        let w = &self.scoring;
        for (field, value) in [
            ("scoring.semantic", w.semantic),
            ("scoring.structural", w.structural),
            ("scoring.misconception", w.misconception),
            ("scoring.misconception_decay", w.misconception_decay),
            ("scoring.confidence_base", w.confidence_base),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: format!("{value} is not a non-negative number"),
                });
            }
        }
        if self.limits.min_explanation_chars > self.limits.max_explanation_chars {
            return Err(ConfigError::InvalidValue {
                field: "limits.min_explanation_chars",
                message: "exceeds limits.max_explanation_chars".into(),
            });
        }
        if self.evaluation.parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "evaluation.parallelism",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_path(path: &Path) -> PathBuf {
    PathBuf::from(resolve_env_vars(&path.to_string_lossy()))
}

/// Expand `${VAR}` references in every string-valued setting.
fn resolve_config_env_vars(config: &mut ConceptcheckConfig) {
    config.source.base_url = resolve_env_vars(&config.source.base_url);
    config.source.user_agent = resolve_env_vars(&config.source.user_agent);
    config.source.access_token = config
        .source
        .access_token
        .as_deref()
        .map(resolve_env_vars)
        .filter(|t| !t.is_empty());
    if let EmbeddingConfig::Ollama { base_url, model } = &mut config.embedding {
        *base_url = resolve_env_vars(base_url);
        *model = resolve_env_vars(model);
    }
    config.cache.dir = config.cache.dir.as_deref().map(resolve_path);
    config.knowledge.extra_file = config.knowledge.extra_file.as_deref().map(resolve_path);
    config.evaluation.output_dir = resolve_path(&config.evaluation.output_dir);
}

/// Apply `CONCEPTCHECK_*` overrides, reading variables through `lookup`.
fn apply_env_overrides(config: &mut ConceptcheckConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("CONCEPTCHECK_WIKIPEDIA_URL") {
        config.source.kind = SourceKind::Wikipedia;
        config.source.base_url = url;
    }

    if let Some(url) = lookup("CONCEPTCHECK_OLLAMA_URL") {
        let model = match &config.embedding {
            EmbeddingConfig::Ollama { model, .. } => model.clone(),
            EmbeddingConfig::None => default_embedding_model(),
        };
        config.embedding = EmbeddingConfig::Ollama {
            base_url: url,
            model,
        };
    }

    if let Some(dir) = lookup("CONCEPTCHECK_CACHE_DIR") {
        config.cache.kind = CacheKind::Disk;
        config.cache.dir = Some(PathBuf::from(dir));
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `conceptcheck.toml` in the current directory
/// 2. `~/.config/conceptcheck/config.toml`
///
/// Environment variable overrides: `CONCEPTCHECK_WIKIPEDIA_URL`,
/// `CONCEPTCHECK_OLLAMA_URL`, `CONCEPTCHECK_CACHE_DIR`.
pub fn load_config() -> Result<ConceptcheckConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ConceptcheckConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match &config_path {
        Some(path) => parse_config_file(path)?,
        None => ConceptcheckConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    resolve_config_env_vars(&mut config);
    config.validate().with_context(|| match &config_path {
        Some(path) => format!("invalid config: {}", path.display()),
        None => "invalid config".to_string(),
    })?;

    tracing::debug!(path = ?config_path, ?config, "configuration loaded");
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<ConceptcheckConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    toml::from_str::<ConceptcheckConfig>(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("conceptcheck"))
}

fn default_cache_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".cache").join("conceptcheck"))
}

/// Create the external reference source, if one is configured.
pub fn create_source(config: &SourceConfig) -> Result<Option<Arc<dyn ReferenceSource>>> {
    match config.kind {
        SourceKind::None => Ok(None),
        SourceKind::Wikipedia => {
            let source = WikipediaSource::with_timeout(
                &config.base_url,
                &config.user_agent,
                config.timeout_secs,
            )?
            .with_access_token(config.access_token.clone());
            Ok(Some(Arc::new(source)))
        }
    }
}

/// Create the embedding backend, if one is configured.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingModel>>> {
    match config {
        EmbeddingConfig::None => Ok(None),
        EmbeddingConfig::Ollama { base_url, model } => {
            Ok(Some(Arc::new(OllamaEmbedder::new(base_url, model)?)))
        }
    }
}

/// Create the reference cache.
pub fn create_cache(config: &CacheConfig) -> Result<Arc<dyn ReferenceCache>> {
    let ttl = config.ttl_secs.map(Duration::from_secs);
    match config.kind {
        CacheKind::None => Ok(Arc::new(NoopCache)),
        CacheKind::Memory => Ok(Arc::new(match ttl {
            Some(ttl) => InMemoryCache::with_ttl(ttl),
            None => InMemoryCache::new(),
        })),
        CacheKind::Disk => {
            let dir = config
                .dir
                .clone()
                .or_else(default_cache_dir)
                .ok_or(ConfigError::MissingCacheDir)?;
            let mut cache = DiskCache::new(dir)?;
            if let Some(ttl) = ttl {
                cache = cache.with_ttl(ttl);
            }
            Ok(Arc::new(cache))
        }
    }
}

/// Build a ready-to-use engine. `offline` skips the external source and the
/// embedding backend so only the built-in and extra knowledge is consulted.
pub fn build_engine(config: &ConceptcheckConfig, offline: bool) -> Result<ConceptEngine> {
    let knowledge = KnowledgeStore::load(config.knowledge.extra_file.as_deref())
        .context("failed to load knowledge base")?;

    let mut builder = ConceptEngine::builder(Arc::new(knowledge))
        .cache(create_cache(&config.cache)?)
        .resolver_config(config.source.resolver_config())
        .weights(config.scoring.clone())
        .limits(config.limits.clone());

    if !offline {
        if let Some(source) = create_source(&config.source)? {
            builder = builder.source(source);
        }
        if let Some(embedder) = create_embedder(&config.embedding)? {
            builder = builder.embedder(embedder);
        }
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_CONCEPTCHECK_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_CONCEPTCHECK_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_CONCEPTCHECK_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("unterminated ${"), "unterminated ${");
        std::env::remove_var("_CONCEPTCHECK_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = ConceptcheckConfig::default();
        assert_eq!(config.source.kind, SourceKind::Wikipedia);
        assert_eq!(config.source.max_candidates, 3);
        assert_eq!(config.cache.kind, CacheKind::Memory);
        assert!(matches!(config.embedding, EmbeddingConfig::None));
        assert_eq!(config.limits.min_explanation_chars, 10);
        assert_eq!(config.limits.max_explanation_chars, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[source]
type = "wikipedia"
timeout_secs = 8
disambiguation = "skip"
access_token = "tok"

[embedding]
type = "ollama"
model = "mxbai-embed-large"

[cache]
type = "disk"
dir = "/tmp/conceptcheck-cache"
ttl_secs = 3600

[scoring]
semantic = 0.7
structural = 0.3

[limits]
min_explanation_chars = 20
"#;
        let config: ConceptcheckConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.source.timeout_secs, 8);
        assert_eq!(config.source.disambiguation, DisambiguationPolicy::Skip);
        assert_eq!(config.source.max_candidates, 3);
        match &config.embedding {
            EmbeddingConfig::Ollama { base_url, model } => {
                assert_eq!(base_url, "http://localhost:11434");
                assert_eq!(model, "mxbai-embed-large");
            }
            EmbeddingConfig::None => panic!("expected ollama"),
        }
        assert_eq!(config.cache.kind, CacheKind::Disk);
        assert_eq!(config.scoring.semantic, 0.7);
        assert_eq!(config.scoring.misconception, 0.25);
        assert_eq!(config.limits.min_explanation_chars, 20);
        assert_eq!(config.limits.max_explanation_chars, 5000);

        let rc = config.source.resolver_config();
        assert_eq!(rc.timeout, Duration::from_secs(8));
    }

    #[test]
    fn debug_masks_access_token() {
        let config = SourceConfig {
            access_token: Some("very-secret".into()),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("CONCEPTCHECK_WIKIPEDIA_URL", "http://wiki.local/w/api.php"),
            ("CONCEPTCHECK_OLLAMA_URL", "http://gpu-box:11434"),
            ("CONCEPTCHECK_CACHE_DIR", "/var/cache/cc"),
        ]
        .into_iter()
        .collect();
        let mut config = ConceptcheckConfig {
            source: SourceConfig {
                kind: SourceKind::None,
                ..Default::default()
            },
            ..Default::default()
        };
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.source.kind, SourceKind::Wikipedia);
        assert_eq!(config.source.base_url, "http://wiki.local/w/api.php");
        assert!(matches!(
            &config.embedding,
            EmbeddingConfig::Ollama { base_url, model }
                if base_url == "http://gpu-box:11434" && model == "nomic-embed-text"
        ));
        assert_eq!(config.cache.kind, CacheKind::Disk);
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/cc")));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = ConceptcheckConfig::default();
        config.source.max_candidates = 0;
        assert!(config.validate().is_err());

        let mut config = ConceptcheckConfig::default();
        config.scoring.semantic = -1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scoring.semantic"));

        let mut config = ConceptcheckConfig::default();
        config.limits.min_explanation_chars = 9000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_path_fails() {
        let err = load_config_from(Some(Path::new("/nonexistent/conceptcheck.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conceptcheck.toml");
        std::fs::write(&path, "[source]\ntype = \"none\"\n\n[cache]\ntype = \"none\"\n").unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.cache.kind, CacheKind::None);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[source]\ntimeout_secs = 0\n").unwrap();
        let err = load_config_from(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("source.timeout_secs"));
    }

    #[tokio::test]
    async fn offline_engine_uses_knowledge_only() {
        let config = ConceptcheckConfig::default();
        let engine = build_engine(&config, true).unwrap();
        let overview = engine.resolve_overview("ACID").await.unwrap();
        assert_eq!(overview.title, "ACID Properties");
    }

    #[test]
    fn disk_cache_factory_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache = create_cache(&CacheConfig {
            kind: CacheKind::Disk,
            dir: Some(dir.path().join("refs")),
            ttl_secs: Some(60),
        })
        .unwrap();
        assert!(cache.is_empty());
        assert!(dir.path().join("refs").is_dir());
    }
}
