//! Application state wiring the engine to its concrete adapters.
//!
//! `AppState` is shared by CLI commands and REST handlers. The engine is
//! generic over its repositories; here both are pinned to SQLite.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stepflow_core::workflow::{ExecutorPorts, StepRegistry, WorkflowEngine};
use stepflow_infra::agent::HttpAgentGateway;
use stepflow_infra::config::{load_engine_config, resolve_data_dir};
use stepflow_infra::http::ReqwestHttpClient;
use stepflow_infra::notify::LogNotifier;
use stepflow_infra::sqlite::pool::{DatabasePool, database_url};
use stepflow_infra::sqlite::workflow::SqliteWorkflowRepository;
use stepflow_types::config::EngineConfig;

/// The engine pinned to the SQLite repositories.
pub type Engine = WorkflowEngine<SqliteWorkflowRepository, SqliteWorkflowRepository>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub repo: Arc<SqliteWorkflowRepository>,
    pub config: Arc<EngineConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize from the resolved data directory.
    pub async fn init() -> anyhow::Result<Self> {
        Self::open(&resolve_data_dir()).await
    }

    /// Open (creating if needed) the data directory, load `config.toml`,
    /// connect to the database and wire the engine.
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(data_dir).await;

        let pool = DatabasePool::new(&database_url(data_dir))
            .await
            .context("failed to open workflow database")?;
        let repo = Arc::new(SqliteWorkflowRepository::new(pool));

        let http_timeout = Duration::from_secs(config.http_timeout_secs);
        let ports = ExecutorPorts {
            http: Arc::new(
                ReqwestHttpClient::new(http_timeout).context("failed to build HTTP client")?,
            ),
            agents: Arc::new(
                HttpAgentGateway::new(config.agent_gateway_url.clone(), http_timeout)
                    .context("failed to build agent gateway client")?,
            ),
            notifier: Arc::new(LogNotifier),
        };
        let registry = StepRegistry::builtin(
            ports,
            Duration::from_millis(config.default_step_timeout_ms),
        );
        let engine = WorkflowEngine::new(Arc::clone(&repo), Arc::clone(&repo), registry, &config);

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");

        Ok(Self {
            engine,
            repo,
            config: Arc::new(config),
            data_dir: data_dir.to_path_buf(),
        })
    }
}
