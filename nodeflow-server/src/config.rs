//! Command line configuration.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use nodeflow::backends::{EchoModelBackend, InMemorySessionStore, ModelBackend};
use nodeflow::nodes::NodeFactory;
use nodeflow::observability::LogFormat;
use nodeflow::pipeline::{ConfigLoader, DEFAULT_CONFIG_DIR};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Format of the pipeline definition files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ConfigType {
    /// YAML files (`*.yml`, `*.yaml`).
    #[default]
    Yaml,
}

/// Server arguments.
#[derive(Debug, Clone, Parser)]
#[command(name = "nodeflow-server")]
#[command(about = "Serves nodeflow pipelines over HTTP", long_about = None)]
pub struct Args {
    /// Bind host
    #[arg(long, env = "NODEFLOW_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Bind port
    #[arg(long, env = "NODEFLOW_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Definition files to load; when empty, every file in `--config-dir` is loaded
    #[arg(long, num_args = 1..)]
    pub configs: Vec<PathBuf>,

    /// Directory scanned when no `--configs` are given
    #[arg(long, env = "NODEFLOW_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Definition file format
    #[arg(long, value_enum, default_value_t = ConfigType::Yaml)]
    pub config_type: ConfigType,

    /// Log output format (pretty or json)
    #[arg(long, env = "NODEFLOW_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Model backend URL; the offline echo backend is used when absent
    #[arg(long, env = "NODEFLOW_MODEL_ENDPOINT")]
    pub model_endpoint: Option<String>,

    /// Model backend request timeout in seconds
    #[arg(long, env = "NODEFLOW_MODEL_TIMEOUT", default_value_t = 60)]
    pub model_timeout: u64,
}

impl Args {
    /// Returns the bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the definition loader.
    #[must_use]
    pub fn loader(&self) -> ConfigLoader {
        match self.config_type {
            ConfigType::Yaml => {
                ConfigLoader::new(&self.config_dir).with_files(self.configs.iter().cloned())
            }
        }
    }

    /// Builds the node factory with the configured model backend and an
    /// in-memory session store.
    pub fn node_factory(&self) -> Result<NodeFactory> {
        Ok(NodeFactory::new()
            .with_model_backend(self.model_backend()?)
            .with_session_store(Arc::new(InMemorySessionStore::new())))
    }

    #[cfg(feature = "http-backend")]
    fn model_backend(&self) -> Result<Arc<dyn ModelBackend>> {
        use nodeflow::backends::HttpModelBackend;
        use std::time::Duration;

        match &self.model_endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "Using HTTP model backend");
                let backend =
                    HttpModelBackend::new(endpoint, Duration::from_secs(self.model_timeout))?;
                Ok(Arc::new(backend))
            }
            None => Ok(echo_backend()),
        }
    }

    #[cfg(not(feature = "http-backend"))]
    fn model_backend(&self) -> Result<Arc<dyn ModelBackend>> {
        if self.model_endpoint.is_some() {
            anyhow::bail!("--model-endpoint requires the `http-backend` feature");
        }
        Ok(echo_backend())
    }
}

fn echo_backend() -> Arc<dyn ModelBackend> {
    info!("Using offline echo model backend");
    Arc::new(EchoModelBackend::new())
}
