//! Document source: the raw files the engine indexes.
//!
//! [`DocumentSource`] is the seam between the engine and wherever raw
//! documents live. [`FsDocumentSource`] keeps them under
//! `[documents].root`, walking the tree with `walkdir` and filtering
//! relative paths through include/exclude `globset` patterns.
//!
//! Document names are `/`-separated paths relative to the root. Names
//! containing `..`, absolute paths or empty segments are rejected so that
//! no operation can reach outside the root.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;

/// A document available from the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub name: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Every document matching the include/exclude filters, sorted by name.
    async fn list(&self) -> Result<Vec<DocumentInfo>>;

    async fn read(&self, name: &str) -> Result<String>;

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn write(&self, name: &str, content: &str) -> Result<()>;

    /// Delete a document. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// Documents stored as files under a root directory.
pub struct FsDocumentSource {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl FsDocumentSource {
    pub fn new(config: &DocumentsConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
        excludes.extend(config.exclude_globs.clone());
        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn accepts(&self, name: &str) -> bool {
        self.include.is_match(name) && !self.exclude.is_match(name)
    }
}

/// Reject names that could resolve outside the document root.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("document name must not be empty");
    }
    if name.contains('\\') || name.contains('\0') {
        bail!("invalid document name: {}", name);
    }
    let path = Path::new(name);
    for component in path.components() {
        match component {
            Component::Normal(_) => {}
            _ => bail!("invalid document name: {}", name),
        }
    }
    // components() silently drops interior "." and repeated separators
    if name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        bail!("invalid document name: {}", name);
    }
    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn list(&self) -> Result<Vec<DocumentInfo>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut docs = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path());
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !self.accepts(&name) {
                continue;
            }

            let metadata = entry.metadata()?;
            let modified_at = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            docs.push(DocumentInfo {
                name,
                size: metadata.len(),
                modified_at,
            });
        }

        docs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(docs)
    }

    async fn read(&self, name: &str) -> Result<String> {
        let path = self.path_for(name)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read document: {}", name))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn write(&self, name: &str, content: &str) -> Result<()> {
        let path = self.path_for(name)?;
        if !self.accepts(name) {
            bail!("document type not accepted: {}", name);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write document: {}", name))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete document: {}", name)),
        }
    }
}
