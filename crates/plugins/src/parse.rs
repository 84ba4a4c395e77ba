//! Metadata parsing for plugin files and skill folders.
//!
//! Agents and commands are markdown files with optional YAML frontmatter:
//! ```text
//! ---
//! name: Blogger
//! description: Writes blog posts
//! tags: [writing, content]
//! version: "1.0"
//! tools: Read, Write
//! ---
//!
//! You are a blogger...
//! ```
//! Skills are directories whose `SKILL.md` carries the same frontmatter,
//! which is mandatory there.

use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Deserializer},
    sha2::{Digest, Sha256},
    tracing::debug,
};

use crate::{
    Error, Result,
    path_guard::relative_to,
    sanitize::{sanitize_file_name, sanitize_folder_name},
    types::{PluginMetadata, PluginType, SKILL_MANIFEST},
};

const MAX_DESCRIPTION_CHARS: usize = 200;

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    #[serde(default, deserialize_with = "scalar")]
    name: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    description: Option<String>,
    #[serde(default, deserialize_with = "string_list")]
    tags: Vec<String>,
    #[serde(default, deserialize_with = "scalar")]
    version: Option<String>,
    #[serde(default, deserialize_with = "scalar")]
    author: Option<String>,
    #[serde(default, alias = "allowed-tools", deserialize_with = "string_list")]
    allowed_tools: Vec<String>,
    #[serde(default, deserialize_with = "string_list")]
    tools: Vec<String>,
}

/// A skill folder found in a tree, with its path relative to the scan base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillDirectory {
    pub folder_path: PathBuf,
    pub source_path: String,
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Read and parse an agent or command file.
///
/// `source_path` is recorded verbatim; the content hash and size are taken
/// from the bytes read.
pub async fn parse_metadata(
    path: &Path,
    source_path: &str,
    category: &str,
    plugin_type: PluginType,
) -> Result<PluginMetadata> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Error::read(path, e))?;
    parse_metadata_bytes(&bytes, path, source_path, category, plugin_type)
}

/// Parse already-read agent or command bytes.
pub fn parse_metadata_bytes(
    bytes: &[u8],
    path: &Path,
    source_path: &str,
    category: &str,
    plugin_type: PluginType,
) -> Result<PluginMetadata> {
    let content = std::str::from_utf8(bytes)
        .map_err(|e| Error::invalid_metadata(path, format!("not valid UTF-8: {e}")))?;
    let (front, body) = split_frontmatter(content).map_err(|r| Error::invalid_metadata(path, r))?;
    let front = parse_frontmatter(front, path)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut meta = build_metadata(front, body, &stem, source_path, category, plugin_type);
    meta.filename = sanitize_file_name(&file_name);
    meta.content_hash = Some(content_hash(bytes));
    meta.size = Some(bytes.len() as u64);
    Ok(meta)
}

/// Read and parse a skill folder's `SKILL.md`.
pub async fn parse_skill_metadata(
    folder_path: &Path,
    source_path: &str,
    category: &str,
) -> Result<PluginMetadata> {
    let manifest = folder_path.join(SKILL_MANIFEST);
    let bytes = tokio::fs::read(&manifest)
        .await
        .map_err(|e| Error::read(&manifest, e))?;
    let content = std::str::from_utf8(&bytes)
        .map_err(|e| Error::invalid_metadata(&manifest, format!("not valid UTF-8: {e}")))?;

    let (front, body) =
        split_frontmatter(content).map_err(|r| Error::invalid_metadata(&manifest, r))?;
    let Some(front) = front else {
        return Err(Error::invalid_metadata(
            &manifest,
            "SKILL.md must start with YAML frontmatter delimited by ---",
        ));
    };
    let front = parse_frontmatter(Some(front), &manifest)?;

    let folder_name = folder_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut meta = build_metadata(
        front,
        body,
        &folder_name,
        source_path,
        category,
        PluginType::Skill,
    );
    meta.filename = sanitize_folder_name(&folder_name);
    meta.size = Some(bytes.len() as u64);
    Ok(meta)
}

/// Recursively find every directory under `root` that contains `SKILL.md`.
///
/// A skill folder is not descended into further. Unreadable directories are
/// skipped. Results are sorted by source path.
pub async fn find_all_skill_directories(root: &Path, base: &Path) -> Vec<SkillDirectory> {
    let mut found = Vec::new();
    let mut dirs_to_scan = vec![root.to_path_buf()];

    while let Some(dir) = dirs_to_scan.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) => {
                debug!(?dir, %e, "skipping unreadable directory");
                continue;
            },
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let subdir = entry.path();
            if tokio::fs::try_exists(subdir.join(SKILL_MANIFEST))
                .await
                .unwrap_or(false)
            {
                found.push(SkillDirectory {
                    source_path: relative_to(base, &subdir),
                    folder_path: subdir,
                });
            } else {
                dirs_to_scan.push(subdir);
            }
        }
    }

    found.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    found
}

fn build_metadata(
    front: FrontMatter,
    body: &str,
    fallback_name: &str,
    source_path: &str,
    category: &str,
    plugin_type: PluginType,
) -> PluginMetadata {
    PluginMetadata {
        source_path: source_path.to_string(),
        filename: String::new(),
        plugin_type,
        category: category.to_string(),
        name: front
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| fallback_name.to_string()),
        description: front
            .description
            .unwrap_or_else(|| description_from_body(body)),
        tags: front.tags,
        version: front.version,
        author: front.author,
        allowed_tools: front.allowed_tools,
        tools: front.tools,
        content_hash: None,
        size: None,
        installed_at: None,
        updated_at: None,
    }
}

fn parse_frontmatter(front: Option<&str>, path: &Path) -> Result<FrontMatter> {
    match front {
        Some(raw) if !raw.trim().is_empty() => serde_yaml::from_str(raw)
            .map_err(|e| Error::invalid_metadata(path, format!("invalid frontmatter: {e}"))),
        _ => Ok(FrontMatter::default()),
    }
}

/// Split markdown at `---` delimiters into (frontmatter, body).
///
/// Content that does not start with `---` has no frontmatter. An opening
/// delimiter without a closing one is an error.
fn split_frontmatter(content: &str) -> std::result::Result<(Option<&str>, &str), String> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    let Some(after_open) = trimmed.strip_prefix("---") else {
        return Ok((None, content));
    };
    let Some(close_pos) = after_open.find("\n---") else {
        return Err("missing closing --- for frontmatter".to_string());
    };
    let front = after_open[..close_pos].trim();
    let rest = &after_open[close_pos + 4..];
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
    Ok((Some(front), body))
}

fn description_from_body(body: &str) -> String {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.chars().take(MAX_DESCRIPTION_CHARS).collect())
        .unwrap_or_default()
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accept strings, numbers (e.g. `version: 1.0`) and booleans.
fn scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(yaml_scalar_to_string))
}

/// Accept a YAML list or a comma/space separated string.
fn string_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_yaml::Value::Sequence(items)) => {
            items.iter().filter_map(yaml_scalar_to_string).collect()
        },
        Some(serde_yaml::Value::String(s)) => split_list(&s),
        Some(other) => yaml_scalar_to_string(&other).into_iter().collect(),
        None => Vec::new(),
    })
}

fn split_list(raw: &str) -> Vec<String> {
    let parts: Vec<&str> = if raw.contains(',') {
        raw.split(',').collect()
    } else {
        raw.split_whitespace().collect()
    };
    parts
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
