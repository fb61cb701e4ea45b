//! Agent options and logging setup.
//!
//! The options string is what follows `=` in `-agentpath:libagent.so=<options>`:
//!
//! ```text
//! log=debug,transformers=field-write+wrap-return,target=com/example/Counter,
//! method=increment,increment=2,factory=com/example/Factory.create,path=/opt/app/classes
//! ```
//!
//! A single bare token such as `debug` is read as the log level.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::class_path::ClassPath;
use crate::transform::{FieldWriteRewrite, ReplaceNewRewrite, TransformerChain, WrapReturnRewrite};

const DEFAULT_INCREMENT: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown agent option '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for agent option '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("unknown transformer '{0}'")]
    UnknownTransformer(String),

    #[error("transformer '{transformer}' requires the '{key}' option")]
    Missing { transformer: &'static str, key: &'static str },
}

/// The rewrites an agent can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformerKind {
    FieldWrite,
    ReplaceNew,
    WrapReturn,
}

impl TransformerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransformerKind::FieldWrite => "field-write",
            TransformerKind::ReplaceNew => "replace-new",
            TransformerKind::WrapReturn => "wrap-return",
        }
    }
}

impl FromStr for TransformerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "field-write" => Ok(TransformerKind::FieldWrite),
            "replace-new" => Ok(TransformerKind::ReplaceNew),
            "wrap-return" => Ok(TransformerKind::WrapReturn),
            other => Err(ConfigError::UnknownTransformer(other.to_owned())),
        }
    }
}

/// Parsed agent options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub log_level: LevelFilter,
    pub transformers: Vec<TransformerKind>,
    pub target: Option<String>,
    pub method: Option<String>,
    pub increment: i32,
    pub replace: Option<String>,
    /// `(class, method)` of the static factory.
    pub factory: Option<(String, String)>,
    pub paths: Vec<PathBuf>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::INFO,
            transformers: Vec::new(),
            target: None,
            method: None,
            increment: DEFAULT_INCREMENT,
            replace: None,
            factory: None,
            paths: Vec::new(),
        }
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_owned(), value: value.to_owned() }
}

impl FromStr for AgentOptions {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = AgentOptions::default();
        let s = s.trim();
        if s.is_empty() {
            return Ok(options);
        }
        if !s.contains('=') && !s.contains(',') {
            options.log_level = s.parse().map_err(|_| invalid("log", s))?;
            return Ok(options);
        }

        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::UnknownKey(pair.to_owned()))?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "log" => options.log_level = value.parse().map_err(|_| invalid(key, value))?,
                "transformers" => {
                    options.transformers =
                        value.split('+').filter(|t| !t.is_empty()).map(str::parse).collect::<Result<_, _>>()?;
                }
                "target" => options.target = Some(value.to_owned()),
                "method" => options.method = Some(value.to_owned()),
                "increment" => options.increment = value.parse().map_err(|_| invalid(key, value))?,
                "replace" => options.replace = Some(value.to_owned()),
                "factory" => {
                    let (class, method) = value
                        .rsplit_once('.')
                        .filter(|(c, m)| !c.is_empty() && !m.is_empty())
                        .ok_or_else(|| invalid(key, value))?;
                    options.factory = Some((class.to_owned(), method.to_owned()));
                }
                "path" => options.paths.push(PathBuf::from(value)),
                _ => return Err(ConfigError::UnknownKey(key.to_owned())),
            }
        }
        Ok(options)
    }
}

impl AgentOptions {
    fn require<'a>(
        value: &'a Option<String>,
        kind: TransformerKind,
        key: &'static str,
    ) -> Result<&'a str, ConfigError> {
        value.as_deref().ok_or(ConfigError::Missing { transformer: kind.as_str(), key })
    }

    fn require_factory(&self, kind: TransformerKind) -> Result<(&str, &str), ConfigError> {
        self.factory
            .as_ref()
            .map(|(class, method)| (class.as_str(), method.as_str()))
            .ok_or(ConfigError::Missing { transformer: kind.as_str(), key: "factory" })
    }

    /// Builds the configured transformers, in the order they were listed.
    pub fn build_chain(&self) -> Result<TransformerChain, ConfigError> {
        let mut chain = TransformerChain::new();
        for &kind in &self.transformers {
            let target = Self::require(&self.target, kind, "target")?;
            match kind {
                TransformerKind::FieldWrite => {
                    let method = Self::require(&self.method, kind, "method")?;
                    chain.push(Box::new(FieldWriteRewrite::new(target, method, self.increment)));
                }
                TransformerKind::ReplaceNew => {
                    let replaced = Self::require(&self.replace, kind, "replace")?;
                    let (class, method) = self.require_factory(kind)?;
                    chain.push(Box::new(ReplaceNewRewrite::new(target, replaced, class, method)));
                }
                TransformerKind::WrapReturn => {
                    let method = Self::require(&self.method, kind, "method")?;
                    let (class, factory) = self.require_factory(kind)?;
                    chain.push(Box::new(WrapReturnRewrite::new(target, method, class, factory)));
                }
            }
        }
        Ok(chain)
    }

    pub fn search_path(&self) -> Vec<ClassPath> {
        self.paths.iter().cloned().map(ClassPath::from_path).collect()
    }
}

/// Installs the global `fmt` subscriber at `level`; `RUST_LOG` takes precedence.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(level: LevelFilter) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::builder().with_default_directive(level.into()).parse_lossy(""));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}
