//! Document storage used by the ledger.
//!
//! A store maps a document name to its text content. The ledger only ever
//! loads and saves whole documents.

use std::{
    collections::BTreeMap,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::sync::Mutex;

use crate::{EngineError, ResultEngine};

pub trait Store: Send + Sync {
    /// Content of `name`, `None` when the document does not exist.
    fn load(&self, name: &str) -> impl Future<Output = ResultEngine<Option<String>>> + Send;

    fn save(&self, name: &str, content: String) -> impl Future<Output = ResultEngine<()>> + Send;
}

/// Keeps documents in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents<I, K, V>(documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            documents: Mutex::new(
                documents
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Names of the stored documents, sorted.
    pub async fn names(&self) -> Vec<String> {
        self.documents.lock().await.keys().cloned().collect()
    }
}

impl Store for MemoryStore {
    async fn load(&self, name: &str) -> ResultEngine<Option<String>> {
        Ok(self.documents.lock().await.get(name).cloned())
    }

    async fn save(&self, name: &str, content: String) -> ResultEngine<()> {
        self.documents.lock().await.insert(name.to_string(), content);
        Ok(())
    }
}

/// Keeps one file per document under a root directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> ResultEngine<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(EngineError::Storage(format!("invalid document name: {name}")));
        }
        Ok(self.root.join(name))
    }
}

impl Store for FsStore {
    async fn load(&self, name: &str) -> ResultEngine<Option<String>> {
        let path = self.path(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, name: &str, content: String) -> ResultEngine<()> {
        let path = self.path(name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        // Staged write, then rename over the document.
        let staging = self.root.join(format!(".{name}.tmp"));
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }
}
