use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Current on-disk version of `plugins.json`.
pub const CACHE_VERSION: u32 = 1;

/// Dotted subtree of a working directory where plugins are materialized.
pub const INSTALL_ROOT: &str = ".claude";

/// Cache snapshot file name, under [`INSTALL_ROOT`].
pub const CACHE_FILE: &str = "plugins.json";

/// Manifest file that marks a skill directory.
pub const SKILL_MANIFEST: &str = "SKILL.md";

// ── Plugin kinds ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Agent,
    Command,
    Skill,
}

impl PluginType {
    pub const ALL: [PluginType; 3] = [Self::Agent, Self::Command, Self::Skill];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Command => "command",
            Self::Skill => "skill",
        }
    }

    /// Subdirectory name used both in the catalog and under `.claude/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Agent => "agents",
            Self::Command => "commands",
            Self::Skill => "skills",
        }
    }

    /// Agents and commands are single markdown files; skills are directories.
    pub fn is_file_based(self) -> bool {
        !matches!(self, Self::Skill)
    }

    /// `<workdir>/.claude/<agents|commands|skills>`
    pub fn install_dir(self, workdir: &Path) -> PathBuf {
        workdir.join(INSTALL_ROOT).join(self.dir_name())
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metadata ─────────────────────────────────────────────────────────────────

/// Structured description of a plugin, produced by the metadata parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    /// Path relative to the catalog (or to `.claude/` for rebuilt entries).
    pub source_path: String,
    /// Sanitized file name (agent/command) or folder name (skill).
    pub filename: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub category: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "allowed_tools")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Hex SHA-256 of the file bytes. File-based plugins only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
}

/// A plugin recorded as installed for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPlugin {
    pub filename: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub metadata: PluginMetadata,
}

impl InstalledPlugin {
    pub fn new(metadata: PluginMetadata) -> Self {
        Self {
            filename: metadata.filename.clone(),
            plugin_type: metadata.plugin_type,
            metadata,
        }
    }

    pub fn matches(&self, filename: &str, plugin_type: PluginType) -> bool {
        self.filename == filename && self.plugin_type == plugin_type
    }

    /// Where this plugin lives inside `workdir`.
    pub fn artifact_path(&self, workdir: &Path) -> PathBuf {
        self.plugin_type.install_dir(workdir).join(&self.filename)
    }
}

/// Serialized form of `<workdir>/.claude/plugins.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPluginsData {
    pub version: u32,
    pub last_updated: u64,
    pub plugins: Vec<InstalledPlugin>,
}

/// Result of a catalog scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailablePlugins {
    pub agents: Vec<PluginMetadata>,
    pub commands: Vec<PluginMetadata>,
    pub skills: Vec<PluginMetadata>,
    pub total: usize,
}

// ── Operation inputs ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOptions {
    /// Catalog-relative path of the plugin file or skill folder.
    pub source_path: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallOptions {
    pub agent_id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
}

// ── Agents ───────────────────────────────────────────────────────────────────

/// Persisted per-agent configuration relevant to plugins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfiguration {
    #[serde(default)]
    pub installed_plugins: Vec<InstalledPlugin>,
}

/// An agent record as held by the agent directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Active working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Legacy list of paths; the first entry was the working directory.
    #[serde(default)]
    pub accessible_paths: Vec<PathBuf>,
    #[serde(default)]
    pub configuration: AgentConfiguration,
}

impl Agent {
    pub fn new(id: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            workdir: Some(workdir.into()),
            accessible_paths: Vec::new(),
            configuration: AgentConfiguration::default(),
        }
    }

    /// The configured working directory, falling back to the first
    /// accessible path for records written before `workdir` existed.
    pub fn working_directory(&self) -> Option<&Path> {
        self.workdir
            .as_deref()
            .or_else(|| self.accessible_paths.first().map(PathBuf::as_path))
            .filter(|p| !p.as_os_str().is_empty())
    }

    pub fn installed_plugins(&self) -> &[InstalledPlugin] {
        &self.configuration.installed_plugins
    }

    pub fn find_installed(
        &self,
        filename: &str,
        plugin_type: PluginType,
    ) -> Option<&InstalledPlugin> {
        self.installed_plugins()
            .iter()
            .find(|p| p.matches(filename, plugin_type))
    }
}

/// One keyed change to an agent's installed plugin list, applied by the
/// directory while it holds its own lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginChange {
    /// Replace the entry with the same `(filename, type)` in place, or append.
    Upsert(InstalledPlugin),
    Remove {
        filename: String,
        plugin_type: PluginType,
    },
}

impl PluginChange {
    pub fn apply(self, plugins: &mut Vec<InstalledPlugin>) {
        match self {
            Self::Upsert(plugin) => {
                match plugins
                    .iter_mut()
                    .find(|p| p.matches(&plugin.filename, plugin.plugin_type))
                {
                    Some(existing) => *existing = plugin,
                    None => plugins.push(plugin),
                }
            },
            Self::Remove {
                filename,
                plugin_type,
            } => plugins.retain(|p| !p.matches(&filename, plugin_type)),
        }
    }
}

/// Partial update applied by [`crate::agents::AgentDirectory::update_agent`].
/// `None` fields are left untouched. `installed_plugins` replaces the whole
/// list before `plugin_changes` are applied in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentUpdate {
    pub workdir: Option<PathBuf>,
    pub installed_plugins: Option<Vec<InstalledPlugin>>,
    pub plugin_changes: Vec<PluginChange>,
}

impl AgentUpdate {
    pub fn installed_plugins(plugins: Vec<InstalledPlugin>) -> Self {
        Self {
            installed_plugins: Some(plugins),
            ..Self::default()
        }
    }

    pub fn upsert_plugin(plugin: InstalledPlugin) -> Self {
        Self {
            plugin_changes: vec![PluginChange::Upsert(plugin)],
            ..Self::default()
        }
    }

    pub fn remove_plugin(filename: impl Into<String>, plugin_type: PluginType) -> Self {
        Self {
            plugin_changes: vec![PluginChange::Remove {
                filename: filename.into(),
                plugin_type,
            }],
            ..Self::default()
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
