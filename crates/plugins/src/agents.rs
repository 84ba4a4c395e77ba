//! Agent directory: persistence of per-agent plugin configuration.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::fs,
    tracing::debug,
};

use crate::{
    Error, Result,
    types::{Agent, AgentUpdate},
};

/// Persistence backend for agent records.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;
    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<()>;
}

fn apply_update(agent: &mut Agent, update: AgentUpdate) {
    if let Some(workdir) = update.workdir {
        agent.workdir = Some(workdir);
    }
    if let Some(plugins) = update.installed_plugins {
        agent.configuration.installed_plugins = plugins;
    }
    for change in update.plugin_changes {
        change.apply(&mut agent.configuration.installed_plugins);
    }
}

fn agent_not_found(id: &str) -> Error {
    Error::invalid_workdir(id, "agent not found")
}

// ── JSON file-backed implementation ──────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
struct AgentsFile {
    #[serde(default)]
    agents: Vec<Agent>,
}

/// Stores all agents in one JSON file, rewritten atomically on update.
pub struct FileAgentDirectory {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileAgentDirectory {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace an agent record.
    pub async fn upsert(&self, agent: Agent) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        match file.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => *existing = agent,
            None => file.agents.push(agent),
        }
        self.write_file(&file).await
    }

    async fn read_file(&self) -> Result<AgentsFile> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(AgentsFile::default());
        }
        let data = fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::read(&self.path, e))?;
        serde_json::from_str(&data)
            .map_err(|e| Error::agent_store(format!("parse {}", self.path.display()), e))
    }

    /// Atomic write: temp file in the same directory, then rename.
    async fn write_file(&self, file: &AgentsFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::write(parent, e))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(file)?;
        fs::write(&tmp, data)
            .await
            .map_err(|e| Error::write(&tmp, e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::write(&self.path, e))?;
        debug!(path = %self.path.display(), agents = file.agents.len(), "saved agent directory");
        Ok(())
    }
}

#[async_trait]
impl AgentDirectory for FileAgentDirectory {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.read_file().await?.agents.into_iter().find(|a| a.id == id))
    }

    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        let agent = file
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| agent_not_found(id))?;
        apply_update(agent, update);
        self.write_file(&file).await
    }
}

// ── In-memory implementation ─────────────────────────────────────────

/// `HashMap`-backed directory. No persistence.
#[derive(Default)]
pub struct InMemoryAgentDirectory {
    agents: Mutex<HashMap<String, Agent>>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let dir = Self::new();
        for agent in agents {
            dir.insert(agent);
        }
        dir
    }

    pub fn insert(&self, agent: Agent) {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        agents.insert(agent.id.clone(), agent);
    }
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        Ok(agents.get(id).cloned())
    }

    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<()> {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        let agent = agents.get_mut(id).ok_or_else(|| agent_not_found(id))?;
        apply_update(agent, update);
        Ok(())
    }
}
