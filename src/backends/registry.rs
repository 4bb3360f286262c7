//! Name → handler registry with lazy loading.
//!
//! Handlers registered with [`BackendRegistry::register_lazy`] are
//! placeholders until the first [`BackendRegistry::get_or_load`] for their
//! name. Concurrent lookups of the same name share a single load; once it
//! completes the placeholder is replaced by the loaded handler.

use crate::error::Result;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::info;

type Loader<H> = Arc<dyn Fn() -> BoxFuture<'static, Result<Arc<H>>> + Send + Sync>;

enum Entry<H: ?Sized> {
    Ready(Arc<H>),
    Lazy {
        loader: Loader<H>,
        cell: Arc<OnceCell<Arc<H>>>,
    },
}

/// Registry of named handlers of one backend family.
pub struct BackendRegistry<H: ?Sized> {
    kind: &'static str,
    entries: Mutex<HashMap<String, Entry<H>>>,
}

impl<H: ?Sized + Send + Sync + 'static> BackendRegistry<H> {
    /// Create an empty registry. `kind` is used in logs (`"llm"`, `"tts"`).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Backend family name.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register a ready handler. Replaces any existing entry with the same name.
    pub fn register(&self, name: impl Into<String>, handler: Arc<H>) {
        self.lock().insert(name.into(), Entry::Ready(handler));
    }

    /// Register a placeholder loaded on first use.
    pub fn register_lazy<F, Fut>(&self, name: impl Into<String>, loader: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<H>>> + Send + 'static,
    {
        let loader: Loader<H> = Arc::new(move || loader().boxed());
        self.lock().insert(
            name.into(),
            Entry::Lazy {
                loader,
                cell: Arc::new(OnceCell::new()),
            },
        );
    }

    /// Whether `name` is registered (loaded or not).
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Whether `name` is registered and already loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        matches!(self.lock().get(name), Some(Entry::Ready(_)))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Resolve `name`, loading a lazy placeholder if needed.
    ///
    /// Returns `Ok(None)` for unknown names.
    ///
    /// # Errors
    ///
    /// Returns the loader's error. The placeholder stays registered, so a
    /// later call attempts the load again.
    pub async fn get_or_load(&self, name: &str) -> Result<Option<Arc<H>>> {
        let (loader, cell) = match self.lock().get(name) {
            None => return Ok(None),
            Some(Entry::Ready(handler)) => return Ok(Some(Arc::clone(handler))),
            Some(Entry::Lazy { loader, cell }) => (Arc::clone(loader), Arc::clone(cell)),
        };

        let handler = Arc::clone(cell.get_or_try_init(|| loader()).await?);

        let mut entries = self.lock();
        // Skip the swap if the name was re-registered while loading.
        let still_placeholder = matches!(
            entries.get(name),
            Some(Entry::Lazy { cell: current, .. }) if Arc::ptr_eq(current, &cell)
        );
        if still_placeholder {
            entries.insert(name.to_owned(), Entry::Ready(Arc::clone(&handler)));
            info!(kind = self.kind, backend = name, "lazy backend loaded");
        }
        Ok(Some(handler))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry<H>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
