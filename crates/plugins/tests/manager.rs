#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    async_trait::async_trait,
    pluginhub_plugins::{
        Agent, AgentDirectory, AgentUpdate, Error, ErrorKind, FileAgentDirectory,
        InMemoryAgentDirectory, InstallOptions, PluginManager, PluginType, PluginsConfig, Result,
        UninstallOptions,
    },
    sha2::{Digest, Sha256},
};

type Hook = Box<dyn FnOnce() + Send>;

/// Wraps an in-memory directory with fault injection.
#[derive(Default)]
struct FlakyDirectory {
    inner: InMemoryAgentDirectory,
    gets: AtomicUsize,
    updates: AtomicUsize,
    /// Runs once, right before the n-th `get_agent` call (1-based).
    on_get: Mutex<Option<(usize, Hook)>>,
    /// The n-th `update_agent` call (1-based) fails.
    fail_update: Mutex<Option<usize>>,
    /// Runs once, right after the n-th `update_agent` call succeeds.
    on_update: Mutex<Option<(usize, Hook)>>,
}

fn take_hook(slot: &Mutex<Option<(usize, Hook)>>, n: usize) -> Option<Hook> {
    let mut slot = slot.lock().unwrap();
    match slot.take() {
        Some((at, hook)) if at == n => Some(hook),
        other => {
            *slot = other;
            None
        },
    }
}

#[async_trait]
impl AgentDirectory for FlakyDirectory {
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        let n = self.gets.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = take_hook(&self.on_get, n) {
            hook();
        }
        self.inner.get_agent(id).await
    }

    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<()> {
        let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        let fail = *self.fail_update.lock().unwrap() == Some(n);
        if fail {
            return Err(Error::agent_store(
                "update agent",
                std::io::Error::other("store offline"),
            ));
        }
        self.inner.update_agent(id, update).await?;
        if let Some(hook) = take_hook(&self.on_update, n) {
            hook();
        }
        Ok(())
    }
}

struct Harness {
    _tmp: tempfile::TempDir,
    catalog: PathBuf,
    workdir: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = tmp.path().join("catalog");
        let workdir = tmp.path().join("ws");
        std::fs::create_dir_all(catalog.join("agents/writer")).unwrap();
        std::fs::create_dir_all(catalog.join("commands")).unwrap();
        std::fs::create_dir_all(catalog.join("skills/dev/review/templates")).unwrap();
        std::fs::create_dir_all(&workdir).unwrap();

        std::fs::write(
            catalog.join("agents/writer/blogger.md"),
            "---\nname: Blogger\nversion: \"1.0\"\n---\nWrites blog posts.\n",
        )
        .unwrap();
        std::fs::write(
            catalog.join("commands/commit.md"),
            "---\ndescription: Write a commit message\n---\nLook at the diff.\n",
        )
        .unwrap();
        std::fs::write(
            catalog.join("skills/dev/review/SKILL.md"),
            "---\nname: review\ndescription: Review a change\n---\nSteps.\n",
        )
        .unwrap();
        std::fs::write(
            catalog.join("skills/dev/review/templates/report.md"),
            "# Report\n",
        )
        .unwrap();
        // Outside the catalog.
        std::fs::write(tmp.path().join("secret.md"), "---\nname: secret\n---\n").unwrap();

        Self {
            _tmp: tmp,
            catalog,
            workdir,
        }
    }

    fn config(&self) -> PluginsConfig {
        PluginsConfig::with_catalog_dir(&self.catalog)
    }

    /// Agent `a1` using the legacy accessible-paths form.
    fn legacy_agent(&self) -> Agent {
        Agent {
            id: "a1".into(),
            name: "Writer".into(),
            workdir: None,
            accessible_paths: vec![self.workdir.clone()],
            configuration: Default::default(),
        }
    }

    fn manager(&self) -> PluginManager {
        let agents = Arc::new(InMemoryAgentDirectory::with_agents([self.legacy_agent()]));
        PluginManager::new(self.config(), agents)
    }

    fn flaky(&self) -> (PluginManager, Arc<FlakyDirectory>) {
        let agents = Arc::new(FlakyDirectory::default());
        agents.inner.insert(self.legacy_agent());
        let directory = Arc::clone(&agents) as Arc<dyn AgentDirectory>;
        let manager = PluginManager::new(self.config(), directory);
        (manager, agents)
    }

    fn installed(&self, rel: &str) -> PathBuf {
        self.workdir.join(".claude").join(rel)
    }
}

fn install_agent(source_path: &str) -> InstallOptions {
    InstallOptions {
        source_path: source_path.into(),
        plugin_type: PluginType::Agent,
        agent_id: "a1".into(),
    }
}

fn uninstall_agent(filename: &str) -> UninstallOptions {
    UninstallOptions {
        agent_id: "a1".into(),
        filename: filename.into(),
        plugin_type: PluginType::Agent,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

async fn stored(agents: &dyn AgentDirectory) -> Vec<(String, PluginType)> {
    agents
        .get_agent("a1")
        .await
        .unwrap()
        .unwrap()
        .installed_plugins()
        .iter()
        .map(|p| (p.filename.clone(), p.plugin_type))
        .collect()
}

fn no_staging_left(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .all(|e| !e.file_name().to_string_lossy().ends_with(".tmp"))
        })
        .unwrap_or(true)
}

#[tokio::test]
async fn install_then_uninstall_agent() {
    let h = Harness::new();
    let manager = h.manager();

    let record = manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();
    let dest = h.installed("agents/blogger.md");
    let bytes = std::fs::read(&dest).unwrap();
    assert_eq!(record.filename, "blogger.md");
    assert_eq!(record.plugin_type, PluginType::Agent);
    assert_eq!(record.metadata.name, "Blogger");
    assert_eq!(record.metadata.version.as_deref(), Some("1.0"));
    assert_eq!(record.metadata.content_hash, Some(sha256_hex(&bytes)));
    assert!(no_staging_left(&h.installed("agents")));
    assert_eq!(stored(manager.agents().as_ref()).await, vec![(
        "blogger.md".to_string(),
        PluginType::Agent
    )]);

    manager.uninstall(uninstall_agent("blogger.md")).await.unwrap();
    assert!(!dest.exists());
    assert!(stored(manager.agents().as_ref()).await.is_empty());

    // Repeating is a no-op.
    manager.uninstall(uninstall_agent("blogger.md")).await.unwrap();
    assert!(manager.list_installed("a1").await.unwrap().is_empty());
}

#[tokio::test]
async fn reinstall_upgrades_in_place() {
    let h = Harness::new();
    let manager = h.manager();
    manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();

    let updated = "---\nname: Blogger\nversion: \"2.0\"\n---\nWrites longer posts.\n";
    std::fs::write(h.catalog.join("agents/writer/blogger.md"), updated).unwrap();
    let record = manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();

    assert_eq!(record.metadata.version.as_deref(), Some("2.0"));
    assert_eq!(record.metadata.content_hash, Some(sha256_hex(updated.as_bytes())));
    assert_eq!(
        std::fs::read_to_string(h.installed("agents/blogger.md")).unwrap(),
        updated
    );
    assert_eq!(manager.list_installed("a1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn traversal_rejected_before_any_write() {
    let h = Harness::new();
    let manager = h.manager();
    for source in ["../secret.md", "agents/../../secret.md", "/etc/passwd"] {
        let err = manager.install(install_agent(source)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathTraversal, "{source}");
    }
    assert!(!h.workdir.join(".claude").exists());
    assert!(stored(manager.agents().as_ref()).await.is_empty());

    let err = manager
        .uninstall(uninstall_agent("../outside.md"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathTraversal);
}

#[tokio::test]
async fn source_vanishing_mid_install_rolls_back() {
    let h = Harness::new();
    let (manager, agents) = h.flaky();
    let source = h.catalog.join("agents/writer/blogger.md");
    // The second lookup happens under the plugin lock, after validation.
    let hook: Hook = Box::new(move || std::fs::remove_file(&source).unwrap());
    *agents.on_get.lock().unwrap() = Some((2, hook));

    let err = manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap_err();
    match &err {
        Error::TransactionFailed {
            source: Some(cause),
            ..
        } => assert_eq!(cause.kind(), ErrorKind::FileNotFound),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!h.installed("agents/blogger.md").exists());
    assert!(no_staging_left(&h.installed("agents")));
    assert!(stored(agents.as_ref()).await.is_empty());
}

#[tokio::test]
async fn store_failure_discards_staged_copy() {
    let h = Harness::new();
    let (manager, agents) = h.flaky();
    *agents.fail_update.lock().unwrap() = Some(1);

    let err = manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionFailed);
    assert!(!h.installed("agents/blogger.md").exists());
    assert!(no_staging_left(&h.installed("agents")));
    assert!(stored(agents.as_ref()).await.is_empty());
}

#[tokio::test]
async fn failed_delete_restores_store_entry() {
    let h = Harness::new();
    let manager = h.manager();
    manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();

    // A directory where the file should be cannot be unlinked.
    let dest = h.installed("agents/blogger.md");
    std::fs::remove_file(&dest).unwrap();
    std::fs::create_dir(&dest).unwrap();
    std::fs::write(dest.join("keep"), "x").unwrap();

    let err = manager
        .uninstall(uninstall_agent("blogger.md"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransactionFailed);
    assert_eq!(stored(manager.agents().as_ref()).await, vec![(
        "blogger.md".to_string(),
        PluginType::Agent
    )]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_installs_of_same_plugin_leave_one_entry() {
    let h = Harness::new();
    let manager = Arc::new(h.manager());

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager
                .install(install_agent("agents/writer/blogger.md"))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(stored(manager.agents().as_ref()).await.len(), 1);
    assert!(h.installed("agents/blogger.md").is_file());
    assert!(no_staging_left(&h.installed("agents")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_installs_of_distinct_plugins_keep_every_entry() {
    let h = Harness::new();
    for i in 0..12 {
        std::fs::write(
            h.catalog.join(format!("agents/writer/a{i}.md")),
            format!("---\nname: Writer {i}\n---\nBody {i}.\n"),
        )
        .unwrap();
    }
    let manager = Arc::new(h.manager());

    let mut tasks = Vec::new();
    for i in 0..12 {
        let manager = Arc::clone(&manager);
        tasks.push(tokio::spawn(async move {
            manager
                .install(install_agent(&format!("agents/writer/a{i}.md")))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut names: Vec<String> = stored(manager.agents().as_ref())
        .await
        .into_iter()
        .map(|(filename, _)| filename)
        .collect();
    names.sort();
    let mut expected: Vec<String> = (0..12).map(|i| format!("a{i}.md")).collect();
    expected.sort();
    assert_eq!(names, expected);
    for name in &expected {
        assert!(h.installed(&format!("agents/{name}")).is_file(), "{name}");
    }
    assert!(no_staging_left(&h.installed("agents")));
    assert_eq!(manager.list_installed("a1").await.unwrap().len(), 12);
}

#[tokio::test]
async fn failed_skill_commit_removes_store_entry() {
    let h = Harness::new();
    let (manager, agents) = h.flaky();
    let options = InstallOptions {
        source_path: "skills/dev/review".into(),
        plugin_type: PluginType::Skill,
        agent_id: "a1".into(),
    };
    manager.install(options.clone()).await.unwrap();

    // Reinstalling writes the store twice: removal of the old entry, then
    // the new one. Losing the staged folder after that second write makes
    // the final rename fail.
    let staging = h.installed("skills/review.tmp");
    let hook: Hook = Box::new(move || std::fs::remove_dir_all(&staging).unwrap());
    *agents.on_update.lock().unwrap() = Some((3, hook));

    let err = manager.install(options).await.unwrap_err();
    match &err {
        Error::TransactionFailed {
            source: Some(cause),
            ..
        } => assert_eq!(cause.kind(), ErrorKind::WriteFailed),
        other => panic!("unexpected error: {other:?}"),
    }
    // The compensating write removed the entry the failed commit had added.
    assert_eq!(agents.updates.load(Ordering::SeqCst), 4);
    assert!(stored(agents.as_ref()).await.is_empty());
    assert!(!h.installed("skills/review").exists());
    assert!(!h.installed("skills/review.tmp").exists());
}

#[tokio::test]
async fn listing_drops_missing_and_keeps_drifted() {
    let h = Harness::new();
    let manager = h.manager();
    manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();
    manager
        .install(InstallOptions {
            source_path: "commands/commit.md".into(),
            plugin_type: PluginType::Command,
            agent_id: "a1".into(),
        })
        .await
        .unwrap();

    std::fs::write(h.installed("agents/blogger.md"), "edited by hand").unwrap();
    std::fs::remove_file(h.installed("commands/commit.md")).unwrap();

    let listed = manager.list_installed("a1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].filename, "blogger.md");
}

#[tokio::test]
async fn cache_snapshot_survives_corruption() {
    let h = Harness::new();
    let manager = h.manager();
    manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();
    let snapshot = h.installed("plugins.json");
    assert!(snapshot.is_file());

    std::fs::write(&snapshot, "not json at all").unwrap();
    let listed = manager.list_installed_from_cache(&h.workdir).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].filename, "blogger.md");
    let raw = std::fs::read_to_string(&snapshot).unwrap();
    assert!(raw.contains("\"version\": 1"));
}

#[tokio::test]
async fn skill_install_copies_folder_and_overwrites() {
    let h = Harness::new();
    let manager = h.manager();
    let options = InstallOptions {
        source_path: "skills/dev/review".into(),
        plugin_type: PluginType::Skill,
        agent_id: "a1".into(),
    };
    let record = manager.install(options.clone()).await.unwrap();
    assert_eq!(record.filename, "review");
    assert_eq!(record.metadata.category, "dev");

    let dest = h.installed("skills/review");
    assert!(dest.join("templates/report.md").is_file());
    std::fs::write(dest.join("extra.md"), "stray").unwrap();

    manager.install(options).await.unwrap();
    assert!(!dest.join("extra.md").exists());
    assert!(no_staging_left(&h.installed("skills")));

    let cached = manager.list_installed_from_cache(&h.workdir).await.unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].plugin_type, PluginType::Skill);

    manager
        .uninstall(UninstallOptions {
            agent_id: "a1".into(),
            filename: "review".into(),
            plugin_type: PluginType::Skill,
        })
        .await
        .unwrap();
    assert!(!dest.exists());
}

#[tokio::test]
async fn write_content_updates_file_and_hash() {
    let h = Harness::new();
    let manager = h.manager();
    manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();

    let body = "---\nname: Blogger\n---\nRewritten.\n";
    let record = manager
        .write_content("a1", "blogger.md", PluginType::Agent, body)
        .await
        .unwrap();
    assert_eq!(record.metadata.content_hash, Some(sha256_hex(body.as_bytes())));
    assert_eq!(std::fs::read_to_string(h.installed("agents/blogger.md")).unwrap(), body);

    let listed = manager.list_installed("a1").await.unwrap();
    assert_eq!(listed[0].metadata.content_hash, record.metadata.content_hash);

    let err = manager
        .write_content("a1", "missing.md", PluginType::Agent, "x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PluginNotInstalled);
}

#[tokio::test]
async fn read_content_serves_catalog_files() {
    let h = Harness::new();
    let manager = h.manager();
    let text = manager.read_content("commands/commit.md").await.unwrap();
    assert!(text.contains("Look at the diff."));
    let err = manager.read_content("commands/nope.md").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileNotFound);
}

#[tokio::test]
async fn catalog_lists_every_type() {
    let h = Harness::new();
    let manager = h.manager();
    let available = manager.list_available().await;
    assert_eq!(available.total, 3);
    assert_eq!(available.agents[0].category, "writer");
    assert_eq!(available.commands[0].category, "general");
    assert_eq!(available.skills[0].name, "review");
}

#[tokio::test]
async fn agent_without_workdir_is_rejected() {
    let h = Harness::new();
    let agents = Arc::new(InMemoryAgentDirectory::with_agents([Agent {
        id: "a1".into(),
        name: "Empty".into(),
        workdir: None,
        accessible_paths: vec![],
        configuration: Default::default(),
    }]));
    let manager = PluginManager::new(h.config(), agents);
    let err = manager
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidWorkdir);
}

#[tokio::test]
async fn file_backed_directory_persists_installs() {
    let h = Harness::new();
    let agents_file = h.workdir.parent().unwrap().join("agents.json");
    let directory = FileAgentDirectory::new(agents_file.clone());
    directory.upsert(Agent::new("a1", &h.workdir)).await.unwrap();

    let mut config = h.config();
    config.agents_file = Some(agents_file.clone());
    PluginManager::from_config(config.clone())
        .install(install_agent("agents/writer/blogger.md"))
        .await
        .unwrap();

    let reopened = PluginManager::from_config(config);
    let listed = reopened.list_installed("a1").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].filename, "blogger.md");
}
