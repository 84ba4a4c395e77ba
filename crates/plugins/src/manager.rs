//! The public facade: catalog listing, transactional install/uninstall,
//! installed-state queries and content access.

use std::{path::Path, sync::Arc};

use {
    pluginhub_config::PluginsConfig,
    tokio::fs,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::{
    Error, Result,
    agents::{AgentDirectory, FileAgentDirectory, InMemoryAgentDirectory},
    cache::PluginCacheStore,
    catalog::CatalogScanner,
    reconcile::reconcile,
    transaction::{TransactionEngine, existing_workdir},
    types::{AvailablePlugins, InstallOptions, InstalledPlugin, PluginType, UninstallOptions},
};

#[cfg(feature = "metrics")]
mod metric_names {
    pub const INSTALLS_TOTAL: &str = "pluginhub_plugin_installs_total";
    pub const INSTALL_FAILURES_TOTAL: &str = "pluginhub_plugin_install_failures_total";
    pub const UNINSTALLS_TOTAL: &str = "pluginhub_plugin_uninstalls_total";
    pub const UNINSTALL_FAILURES_TOTAL: &str = "pluginhub_plugin_uninstall_failures_total";
}

pub struct PluginManager {
    config: PluginsConfig,
    catalog: CatalogScanner,
    engine: TransactionEngine,
}

impl PluginManager {
    pub fn new(config: PluginsConfig, agents: Arc<dyn AgentDirectory>) -> Self {
        Self::with_cancellation(config, agents, CancellationToken::new())
    }

    /// Like [`PluginManager::new`]; cancelling `cancel` aborts in-flight
    /// recursive copies and deletes, which then roll back.
    pub fn with_cancellation(
        config: PluginsConfig,
        agents: Arc<dyn AgentDirectory>,
        cancel: CancellationToken,
    ) -> Self {
        let catalog = CatalogScanner::new(config.catalog_dir.clone(), config.scan_cache_ttl());
        let engine = TransactionEngine::new(
            config.catalog_dir.clone(),
            config.max_file_size,
            agents,
            cancel,
        );
        Self {
            config,
            catalog,
            engine,
        }
    }

    /// Build a manager backed by `config.agents_file`, or by an empty
    /// in-memory directory when none is configured.
    pub fn from_config(config: PluginsConfig) -> Self {
        let agents: Arc<dyn AgentDirectory> = match &config.agents_file {
            Some(path) => Arc::new(FileAgentDirectory::new(path.clone())),
            None => Arc::new(InMemoryAgentDirectory::new()),
        };
        Self::new(config, agents)
    }

    pub fn config(&self) -> &PluginsConfig {
        &self.config
    }

    pub fn agents(&self) -> &Arc<dyn AgentDirectory> {
        self.engine.agents()
    }

    pub async fn list_available(&self) -> Arc<AvailablePlugins> {
        self.catalog.list_available().await
    }

    pub fn invalidate_cache(&self) {
        self.catalog.invalidate_cache();
    }

    pub async fn install(&self, options: InstallOptions) -> Result<InstalledPlugin> {
        match self.engine.install(&options).await {
            Ok((record, workdir)) => {
                #[cfg(feature = "metrics")]
                counter!(metric_names::INSTALLS_TOTAL, "type" => options.plugin_type.as_str())
                    .increment(1);
                self.refresh_cache(&workdir).await;
                Ok(record)
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(
                    metric_names::INSTALL_FAILURES_TOTAL,
                    "type" => options.plugin_type.as_str()
                )
                .increment(1);
                Err(e)
            },
        }
    }

    pub async fn uninstall(&self, options: UninstallOptions) -> Result<()> {
        match self.engine.uninstall(&options).await {
            Ok(workdir) => {
                #[cfg(feature = "metrics")]
                counter!(metric_names::UNINSTALLS_TOTAL, "type" => options.plugin_type.as_str())
                    .increment(1);
                self.refresh_cache(&workdir).await;
                Ok(())
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(
                    metric_names::UNINSTALL_FAILURES_TOTAL,
                    "type" => options.plugin_type.as_str()
                )
                .increment(1);
                Err(e)
            },
        }
    }

    /// Stored plugins whose artifact still exists. Missing artifacts are
    /// dropped from the result; content drift is logged but kept.
    pub async fn list_installed(&self, agent_id: &str) -> Result<Vec<InstalledPlugin>> {
        let agent = self.engine.resolve_agent(agent_id).await?;
        let workdir = existing_workdir(&agent).await?;
        let result = reconcile(&workdir, agent.installed_plugins()).await;
        if !result.missing.is_empty() {
            debug!(
                agent = agent_id,
                missing = result.missing.len(),
                "dropped missing plugins from listing"
            );
        }
        Ok(result.present)
    }

    /// Installed plugins from `workdir`'s snapshot, rebuilt from disk when
    /// absent or stale. Needs no agent record.
    pub async fn list_installed_from_cache(&self, workdir: &Path) -> Result<Vec<InstalledPlugin>> {
        if !fs::metadata(workdir).await.is_ok_and(|m| m.is_dir()) {
            return Err(Error::WorkdirNotFound {
                path: workdir.to_path_buf(),
            });
        }
        Ok(PluginCacheStore::for_workdir(workdir).list().await)
    }

    pub async fn read_content(&self, source_path: &str) -> Result<String> {
        self.engine.read_content(source_path).await
    }

    pub async fn write_content(
        &self,
        agent_id: &str,
        filename: &str,
        plugin_type: PluginType,
        content: &str,
    ) -> Result<InstalledPlugin> {
        let (record, workdir) = self
            .engine
            .write_content(agent_id, filename, plugin_type, content.as_bytes())
            .await?;
        self.refresh_cache(&workdir).await;
        Ok(record)
    }

    /// Rebuild the snapshot after a change. Write failures are logged by
    /// the store and never fail the operation.
    async fn refresh_cache(&self, workdir: &Path) {
        PluginCacheStore::for_workdir(workdir).rebuild().await;
    }
}
