//! Two-phase install and uninstall over the agent directory and the
//! filesystem.
//!
//! Every operation walks `Validate → Stage → Persist → Commit → Done`.
//! A failure once staging has begun rolls back what was done so far and
//! surfaces as [`Error::TransactionFailed`] carrying the cause; validation
//! failures are returned as-is, before any side effect.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    tokio::fs,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    agents::AgentDirectory,
    catalog::category_for,
    fs_ops::{self, staging_path},
    lock::{KeyedLocks, PluginKey},
    parse,
    path_guard::{relative_to, validate_entry_name, validate_source_path},
    sanitize::has_markdown_extension,
    types::{
        Agent, AgentUpdate, InstallOptions, InstalledPlugin, PluginMetadata, PluginType,
        SKILL_MANIFEST, UninstallOptions, now_ms,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Stage,
    Persist,
    Commit,
    Done,
    Rollback,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::Stage => "stage",
            Self::Persist => "persist",
            Self::Commit => "commit",
            Self::Done => "done",
            Self::Rollback => "rollback",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks where a single operation is, for logging and rollback decisions.
struct Transaction<'a> {
    operation: &'static str,
    agent_id: &'a str,
    target: String,
    phase: Phase,
}

impl<'a> Transaction<'a> {
    fn begin(operation: &'static str, agent_id: &'a str, target: impl Into<String>) -> Self {
        let tx = Self {
            operation,
            agent_id,
            target: target.into(),
            phase: Phase::Validate,
        };
        debug!(op = operation, agent = agent_id, target = %tx.target, "transaction started");
        tx
    }

    fn advance(&mut self, phase: Phase) {
        debug!(
            op = self.operation,
            agent = self.agent_id,
            target = %self.target,
            from = %self.phase,
            to = %phase,
            "transaction phase"
        );
        self.phase = phase;
    }

    /// Move through `Rollback` to `Failed` and wrap the cause.
    fn fail(&mut self, cause: Error) -> Error {
        warn!(
            op = self.operation,
            agent = self.agent_id,
            target = %self.target,
            phase = %self.phase,
            error = %cause,
            "transaction failed, rolling back"
        );
        self.advance(Phase::Rollback);
        self.advance(Phase::Failed);
        Error::transaction(self.operation, cause)
    }
}

/// A validated install source.
struct Candidate {
    source: PathBuf,
    metadata: PluginMetadata,
}

/// What staging produced: content hash and size for file plugins.
struct Staged {
    content_hash: Option<String>,
    size: Option<u64>,
}

pub struct TransactionEngine {
    catalog_base: PathBuf,
    max_file_size: u64,
    agents: Arc<dyn AgentDirectory>,
    locks: KeyedLocks,
    cancel: CancellationToken,
}

impl TransactionEngine {
    pub fn new(
        catalog_base: PathBuf,
        max_file_size: u64,
        agents: Arc<dyn AgentDirectory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog_base,
            max_file_size,
            agents,
            locks: KeyedLocks::new(),
            cancel,
        }
    }

    pub fn agents(&self) -> &Arc<dyn AgentDirectory> {
        &self.agents
    }

    // ── Install ──────────────────────────────────────────────────────────

    /// Install a catalog plugin into the agent's working directory,
    /// replacing an installed plugin with the same `(filename, type)`.
    ///
    /// Returns the installed record and the working directory it went to.
    pub async fn install(&self, options: &InstallOptions) -> Result<(InstalledPlugin, PathBuf)> {
        let mut tx = Transaction::begin("install", &options.agent_id, &options.source_path);

        let source = validate_source_path(&self.catalog_base, &options.source_path)?;
        let agent = self.resolve_agent(&options.agent_id).await?;
        let workdir = existing_workdir(&agent).await?;
        let candidate = if options.plugin_type.is_file_based() {
            self.validate_plugin_file(source, &options.source_path, options.plugin_type)
                .await?
        } else {
            self.validate_skill_dir(source).await?
        };
        let plugin_type = options.plugin_type;
        let filename = candidate.metadata.filename.clone();
        tx.target = format!("{plugin_type}:{filename}");

        let _guard = self
            .locks
            .lock(PluginKey::new(&options.agent_id, &filename, plugin_type))
            .await;

        // Re-read under the lock so duplicate detection sees the latest state.
        let agent = self.resolve_agent(&options.agent_id).await?;
        if agent.find_installed(&filename, plugin_type).is_some() {
            info!(agent = %agent.id, %filename, %plugin_type, "replacing installed plugin");
            self.uninstall_locked(&options.agent_id, &filename, plugin_type)
                .await?;
        }

        let dest_dir = plugin_type.install_dir(&workdir);
        fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| Error::write(&dest_dir, e))?;
        let dest = dest_dir.join(&filename);
        let staging = staging_path(&dest);

        tx.advance(Phase::Stage);
        let staged = match self.stage(&candidate.source, &staging, plugin_type).await {
            Ok(staged) => staged,
            Err(e) => {
                fs_ops::discard_staging(&staging, !plugin_type.is_file_based()).await;
                return Err(tx.fail(e));
            },
        };

        tx.advance(Phase::Persist);
        let now = now_ms();
        let mut metadata = candidate.metadata;
        metadata.content_hash = staged.content_hash;
        metadata.size = staged.size.or(metadata.size);
        metadata.installed_at = Some(now);
        metadata.updated_at = Some(now);
        let record = InstalledPlugin::new(metadata);

        if let Err(e) = self
            .agents
            .update_agent(&options.agent_id, AgentUpdate::upsert_plugin(record.clone()))
            .await
        {
            fs_ops::discard_staging(&staging, !plugin_type.is_file_based()).await;
            return Err(tx.fail(e));
        }

        tx.advance(Phase::Commit);
        if let Err(e) = self.commit(&staging, &dest, plugin_type).await {
            fs_ops::discard_staging(&staging, !plugin_type.is_file_based()).await;
            self.compensate(
                &options.agent_id,
                AgentUpdate::remove_plugin(&filename, plugin_type),
            )
            .await;
            return Err(tx.fail(e));
        }

        tx.advance(Phase::Done);
        info!(
            agent = %options.agent_id,
            %filename,
            %plugin_type,
            dest = %dest.display(),
            "installed plugin"
        );
        Ok((record, workdir))
    }

    async fn validate_plugin_file(
        &self,
        source: PathBuf,
        source_path: &str,
        plugin_type: PluginType,
    ) -> Result<Candidate> {
        let meta = fs::metadata(&source)
            .await
            .map_err(|e| Error::read(&source, e))?;
        if !meta.is_file() {
            return Err(Error::file_not_found(&source));
        }
        self.check_size(&source, meta.len())?;
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !has_markdown_extension(&file_name) {
            return Err(Error::invalid_file_type(&source));
        }

        let source_path = relative_to(&self.catalog_base, &source);
        let category = category_for(&source_path);
        let metadata = parse::parse_metadata(&source, &source_path, &category, plugin_type).await?;
        Ok(Candidate { source, metadata })
    }

    async fn validate_skill_dir(&self, source: PathBuf) -> Result<Candidate> {
        let meta = fs::metadata(&source)
            .await
            .map_err(|e| Error::read(&source, e))?;
        // Pointing at the manifest itself selects its folder.
        let folder = if meta.is_file() && source.file_name().is_some_and(|n| n == SKILL_MANIFEST) {
            source
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| Error::file_not_found(&source))?
        } else if meta.is_dir() {
            source
        } else {
            return Err(Error::invalid_file_type(&source));
        };

        let manifest = folder.join(SKILL_MANIFEST);
        let manifest_meta = fs::metadata(&manifest)
            .await
            .map_err(|e| Error::read(&manifest, e))?;
        self.check_size(&manifest, manifest_meta.len())?;

        let source_path = relative_to(&self.catalog_base, &folder);
        let category = category_for(&source_path);
        let metadata = parse::parse_skill_metadata(&folder, &source_path, &category).await?;
        Ok(Candidate {
            source: folder,
            metadata,
        })
    }

    fn check_size(&self, path: &Path, size: u64) -> Result<()> {
        if size > self.max_file_size {
            return Err(Error::FileTooLarge {
                path: path.to_path_buf(),
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    async fn stage(
        &self,
        source: &Path,
        staging: &Path,
        plugin_type: PluginType,
    ) -> Result<Staged> {
        if plugin_type.is_file_based() {
            fs_ops::copy_file(source, staging).await?;
            let bytes = fs::read(staging)
                .await
                .map_err(|e| Error::read(staging, e))?;
            return Ok(Staged {
                content_hash: Some(parse::content_hash(&bytes)),
                size: Some(bytes.len() as u64),
            });
        }

        // Leftovers from an interrupted run would otherwise be merged in.
        fs_ops::remove_dir_recursive(staging, &self.cancel).await?;
        fs_ops::copy_dir_recursive(source, staging, &self.cancel).await?;
        Ok(Staged {
            content_hash: None,
            size: None,
        })
    }

    async fn commit(&self, staging: &Path, dest: &Path, plugin_type: PluginType) -> Result<()> {
        if !plugin_type.is_file_based() {
            // Overwrite, never merge.
            fs_ops::remove_dir_recursive(dest, &self.cancel).await?;
        }
        fs::rename(staging, dest)
            .await
            .map_err(|e| Error::write(dest, e))
    }

    /// Compensating store write after a failed commit. Failures are logged only.
    async fn compensate(&self, agent_id: &str, update: AgentUpdate) {
        if let Err(e) = self.agents.update_agent(agent_id, update).await {
            warn!(agent = agent_id, error = %e, "failed to restore installed plugin entry");
        }
    }

    // ── Uninstall ────────────────────────────────────────────────────────

    /// Remove a plugin's store entry and artifact. Removing a plugin that
    /// is not installed succeeds without changes.
    pub async fn uninstall(&self, options: &UninstallOptions) -> Result<PathBuf> {
        validate_entry_name(&options.filename)?;
        let _guard = self
            .locks
            .lock(PluginKey::new(
                &options.agent_id,
                &options.filename,
                options.plugin_type,
            ))
            .await;
        self.uninstall_locked(&options.agent_id, &options.filename, options.plugin_type)
            .await
    }

    async fn uninstall_locked(
        &self,
        agent_id: &str,
        filename: &str,
        plugin_type: PluginType,
    ) -> Result<PathBuf> {
        let target = format!("{plugin_type}:{filename}");
        let mut tx = Transaction::begin("uninstall", agent_id, target);

        let agent = self.resolve_agent(agent_id).await?;
        let workdir = workdir_of(&agent)?;
        let artifact = plugin_type.install_dir(&workdir).join(filename);
        let removed_entry = agent.find_installed(filename, plugin_type).cloned();

        tx.advance(Phase::Persist);
        if removed_entry.is_some()
            && let Err(e) = self
                .agents
                .update_agent(agent_id, AgentUpdate::remove_plugin(filename, plugin_type))
                .await
        {
            return Err(tx.fail(e));
        }

        tx.advance(Phase::Commit);
        let removed = if plugin_type.is_file_based() {
            fs_ops::remove_file_if_exists(&artifact).await
        } else {
            fs_ops::remove_dir_recursive(&artifact, &self.cancel).await
        };
        if let Err(e) = removed {
            if let Some(entry) = removed_entry {
                self.compensate(agent_id, AgentUpdate::upsert_plugin(entry))
                    .await;
            }
            return Err(tx.fail(e));
        }

        tx.advance(Phase::Done);
        if removed_entry.is_some() {
            info!(agent = agent_id, %filename, %plugin_type, "uninstalled plugin");
        } else {
            debug!(agent = agent_id, %filename, %plugin_type, "plugin was not installed");
        }
        Ok(workdir)
    }

    // ── Content writes ───────────────────────────────────────────────────

    /// Overwrite an installed agent or command and refresh its hash.
    pub async fn write_content(
        &self,
        agent_id: &str,
        filename: &str,
        plugin_type: PluginType,
        content: &[u8],
    ) -> Result<(InstalledPlugin, PathBuf)> {
        if !plugin_type.is_file_based() {
            return Err(Error::invalid_file_type(Path::new(filename)));
        }
        validate_entry_name(filename)?;

        let _guard = self
            .locks
            .lock(PluginKey::new(agent_id, filename, plugin_type))
            .await;
        let target = format!("{plugin_type}:{filename}");
        let mut tx = Transaction::begin("write content", agent_id, target);

        let agent = self.resolve_agent(agent_id).await?;
        let workdir = existing_workdir(&agent).await?;
        let Some(existing) = agent.find_installed(filename, plugin_type) else {
            return Err(Error::plugin_not_installed(agent_id, filename, plugin_type));
        };
        let path = existing.artifact_path(&workdir);
        if !fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            return Err(Error::file_not_found(&path));
        }
        self.check_size(&path, content.len() as u64)?;

        tx.advance(Phase::Commit);
        fs_ops::write_atomic(&path, content).await?;

        tx.advance(Phase::Persist);
        let mut updated = existing.clone();
        updated.metadata.content_hash = Some(parse::content_hash(content));
        updated.metadata.size = Some(content.len() as u64);
        updated.metadata.updated_at = Some(now_ms());

        if let Err(e) = self
            .agents
            .update_agent(agent_id, AgentUpdate::upsert_plugin(updated.clone()))
            .await
        {
            // The bytes are on disk; the stale stored hash will show up as drift.
            return Err(tx.fail(e));
        }

        tx.advance(Phase::Done);
        info!(
            agent = agent_id,
            %filename,
            %plugin_type,
            bytes = content.len(),
            "wrote plugin content"
        );
        Ok((updated, workdir))
    }

    // ── Reads ────────────────────────────────────────────────────────────

    /// Raw content of a catalog entry; skill folders yield their `SKILL.md`.
    pub async fn read_content(&self, source_path: &str) -> Result<String> {
        let mut path = validate_source_path(&self.catalog_base, source_path)?;
        let mut meta = fs::metadata(&path)
            .await
            .map_err(|e| Error::read(&path, e))?;
        if meta.is_dir() {
            path = path.join(SKILL_MANIFEST);
            meta = fs::metadata(&path)
                .await
                .map_err(|e| Error::read(&path, e))?;
        }
        self.check_size(&path, meta.len())?;
        fs::read_to_string(&path)
            .await
            .map_err(|e| Error::read(&path, e))
    }

    pub async fn resolve_agent(&self, agent_id: &str) -> Result<Agent> {
        self.agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| Error::invalid_workdir(agent_id, "agent not found"))
    }
}

/// The agent's working directory reference, which must be absolute.
pub fn workdir_of(agent: &Agent) -> Result<PathBuf> {
    let workdir = agent
        .working_directory()
        .ok_or_else(|| Error::invalid_workdir(&agent.id, "no working directory configured"))?;
    if !workdir.is_absolute() {
        return Err(Error::invalid_workdir(
            &agent.id,
            format!("working directory must be absolute: {}", workdir.display()),
        ));
    }
    Ok(workdir.to_path_buf())
}

/// Like [`workdir_of`], additionally requiring the directory to exist.
pub async fn existing_workdir(agent: &Agent) -> Result<PathBuf> {
    let workdir = workdir_of(agent)?;
    if !fs::metadata(&workdir).await.is_ok_and(|m| m.is_dir()) {
        return Err(Error::WorkdirNotFound { path: workdir });
    }
    Ok(workdir)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{ErrorKind, agents::InMemoryAgentDirectory},
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        catalog: PathBuf,
        workdir: PathBuf,
        engine: TransactionEngine,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = tmp.path().join("catalog");
        let workdir = tmp.path().join("ws");
        std::fs::create_dir_all(catalog.join("agents/writer")).unwrap();
        std::fs::create_dir_all(catalog.join("skills/tools/lint/scripts")).unwrap();
        std::fs::create_dir_all(&workdir).unwrap();
        std::fs::write(
            catalog.join("agents/writer/blogger.md"),
            "---\nname: Blogger\nversion: \"1.0\"\n---\nWrites posts.\n",
        )
        .unwrap();
        std::fs::write(
            catalog.join("skills/tools/lint/SKILL.md"),
            "---\nname: lint\n---\nLint code.\n",
        )
        .unwrap();
        std::fs::write(catalog.join("skills/tools/lint/scripts/run.sh"), "echo lint").unwrap();

        let agents = Arc::new(InMemoryAgentDirectory::with_agents([Agent::new(
            "a1", &workdir,
        )]));
        let engine = TransactionEngine::new(
            catalog.clone(),
            1024 * 1024,
            agents,
            CancellationToken::new(),
        );
        Fixture {
            _tmp: tmp,
            catalog,
            workdir,
            engine,
        }
    }

    fn install_opts(source_path: &str, plugin_type: PluginType) -> InstallOptions {
        InstallOptions {
            source_path: source_path.into(),
            plugin_type,
            agent_id: "a1".into(),
        }
    }

    #[tokio::test]
    async fn installs_file_plugin() {
        let fx = fixture();
        let (record, workdir) = fx
            .engine
            .install(&install_opts("agents/writer/blogger.md", PluginType::Agent))
            .await
            .unwrap();

        assert_eq!(workdir, fx.workdir);
        let dest = fx.workdir.join(".claude/agents/blogger.md");
        let bytes = std::fs::read(&dest).unwrap();
        assert_eq!(record.filename, "blogger.md");
        assert_eq!(record.metadata.content_hash, Some(parse::content_hash(&bytes)));
        assert_eq!(record.metadata.category, "writer");
        assert!(!staging_path(&dest).exists());

        let agent = fx.engine.resolve_agent("a1").await.unwrap();
        assert_eq!(agent.installed_plugins(), &[record]);
    }

    #[tokio::test]
    async fn installs_skill_directory() {
        let fx = fixture();
        let (record, _) = fx
            .engine
            .install(&install_opts("skills/tools/lint", PluginType::Skill))
            .await
            .unwrap();

        assert_eq!(record.filename, "lint");
        assert!(record.metadata.content_hash.is_none());
        let dest = fx.workdir.join(".claude/skills/lint");
        assert!(dest.join("SKILL.md").is_file());
        assert!(dest.join("scripts/run.sh").is_file());
        assert!(!fx.workdir.join(".claude/skills/lint.tmp").exists());
    }

    #[tokio::test]
    async fn skill_reinstall_overwrites_instead_of_merging() {
        let fx = fixture();
        let opts = install_opts("skills/tools/lint", PluginType::Skill);
        fx.engine.install(&opts).await.unwrap();
        let stray = fx.workdir.join(".claude/skills/lint/stray.txt");
        std::fs::write(&stray, "left behind").unwrap();

        fx.engine.install(&opts).await.unwrap();
        assert!(!stray.exists());
        let agent = fx.engine.resolve_agent("a1").await.unwrap();
        assert_eq!(agent.installed_plugins().len(), 1);
    }

    #[tokio::test]
    async fn failed_file_commit_removes_store_entry() {
        let fx = fixture();
        // A non-empty directory in the way makes the final rename fail.
        let blocker = fx.workdir.join(".claude/agents/blogger.md");
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), "x").unwrap();

        let err = fx
            .engine
            .install(&install_opts("agents/writer/blogger.md", PluginType::Agent))
            .await
            .unwrap_err();
        match &err {
            Error::TransactionFailed {
                source: Some(cause),
                ..
            } => assert_eq!(cause.kind(), ErrorKind::WriteFailed),
            other => panic!("unexpected error: {other:?}"),
        }
        let agent = fx.engine.resolve_agent("a1").await.unwrap();
        assert!(agent.installed_plugins().is_empty());
        assert!(!staging_path(&blocker).exists());
        assert!(blocker.join("keep").is_file());
    }

    #[tokio::test]
    async fn validation_errors_have_no_side_effects() {
        let fx = fixture();
        std::fs::write(fx.catalog.join("agents/writer/notes.txt"), "x").unwrap();
        std::fs::write(
            fx.catalog.join("agents/writer/bad.md"),
            "---\nname: [oops\n---\n",
        )
        .unwrap();

        let cases = [
            ("../../etc/passwd", ErrorKind::PathTraversal),
            ("agents/writer/missing.md", ErrorKind::FileNotFound),
            ("agents/writer/notes.txt", ErrorKind::InvalidFileType),
            ("agents/writer/bad.md", ErrorKind::InvalidMetadata),
        ];
        for (source, kind) in cases {
            let err = fx
                .engine
                .install(&install_opts(source, PluginType::Agent))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), kind, "{source}");
        }
        assert!(!fx.workdir.join(".claude").exists());
    }

    #[tokio::test]
    async fn oversized_file_rejected() {
        let mut fx = fixture();
        fx.engine.max_file_size = 8;
        let err = fx
            .engine
            .install(&install_opts("agents/writer/blogger.md", PluginType::Agent))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooLarge);
    }

    #[tokio::test]
    async fn unknown_agent_and_missing_workdir() {
        let fx = fixture();
        let mut opts = install_opts("agents/writer/blogger.md", PluginType::Agent);
        opts.agent_id = "ghost".into();
        let err = fx.engine.install(&opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidWorkdir);

        std::fs::remove_dir_all(&fx.workdir).unwrap();
        let err = fx
            .engine
            .install(&install_opts("agents/writer/blogger.md", PluginType::Agent))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkdirNotFound);
    }

    #[tokio::test]
    async fn uninstall_is_idempotent() {
        let fx = fixture();
        fx.engine
            .install(&install_opts("agents/writer/blogger.md", PluginType::Agent))
            .await
            .unwrap();
        let opts = UninstallOptions {
            agent_id: "a1".into(),
            filename: "blogger.md".into(),
            plugin_type: PluginType::Agent,
        };

        fx.engine.uninstall(&opts).await.unwrap();
        assert!(!fx.workdir.join(".claude/agents/blogger.md").exists());
        assert!(fx
            .engine
            .resolve_agent("a1")
            .await
            .unwrap()
            .installed_plugins()
            .is_empty());

        fx.engine.uninstall(&opts).await.unwrap();
    }

    #[tokio::test]
    async fn uninstall_rejects_traversal_names() {
        let fx = fixture();
        let err = fx
            .engine
            .uninstall(&UninstallOptions {
                agent_id: "a1".into(),
                filename: "../../secret.md".into(),
                plugin_type: PluginType::Agent,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathTraversal);
    }

    #[tokio::test]
    async fn cancelled_skill_install_rolls_back() {
        let fx = fixture();
        fx.engine.cancel.cancel();
        let err = fx
            .engine
            .install(&install_opts("skills/tools/lint", PluginType::Skill))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert!(!fx.workdir.join(".claude/skills/lint").exists());
        assert!(!fx.workdir.join(".claude/skills/lint.tmp").exists());
        assert!(fx
            .engine
            .resolve_agent("a1")
            .await
            .unwrap()
            .installed_plugins()
            .is_empty());
    }

    #[tokio::test]
    async fn read_content_of_file_and_skill() {
        let fx = fixture();
        let text = fx
            .engine
            .read_content("agents/writer/blogger.md")
            .await
            .unwrap();
        assert!(text.contains("Blogger"));
        let skill = fx.engine.read_content("skills/tools/lint").await.unwrap();
        assert!(skill.contains("Lint code."));
        let err = fx.engine.read_content("../outside.md").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathTraversal);
    }

    #[tokio::test]
    async fn write_content_refreshes_hash() {
        let fx = fixture();
        fx.engine
            .install(&install_opts("agents/writer/blogger.md", PluginType::Agent))
            .await
            .unwrap();

        let (updated, _) = fx
            .engine
            .write_content("a1", "blogger.md", PluginType::Agent, b"new body")
            .await
            .unwrap();
        assert_eq!(updated.metadata.content_hash, Some(parse::content_hash(b"new body")));
        assert_eq!(
            std::fs::read(fx.workdir.join(".claude/agents/blogger.md")).unwrap(),
            b"new body"
        );

        let err = fx
            .engine
            .write_content("a1", "other.md", PluginType::Agent, b"x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PluginNotInstalled);

        let err = fx
            .engine
            .write_content("a1", "lint", PluginType::Skill, b"x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFileType);
    }
}
