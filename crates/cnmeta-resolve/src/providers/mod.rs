//! Metadata providers and the registry the orchestrator dispatches through.

pub mod cnki;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use cnmeta_core::{
    CandidateSet, ConversionEngine, ConvertOptions, Page, Record, RecordStore, RequestSpec,
};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use tracing::{debug, warn};

use crate::error::{ResolveError, Result};
use crate::http::Transport;
use crate::query::QueryInput;

pub use cnki::CnkiProvider;

/// One external metadata source.
///
/// Providers are stateless: everything they need per call comes in as
/// arguments, so a single instance serves the whole process.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique registry key.
    fn name(&self) -> &str;

    /// Identifier of the host converter that understands this provider's
    /// detail pages.
    fn converter_id(&self) -> &str;

    fn build_query(&self, input: &QueryInput, oversea: bool) -> Result<RequestSpec>;

    fn parse_results(&self, page: &Page) -> Result<CandidateSet>;

    /// The native snapshot attachment of `record`, if `record` is a webpage
    /// saved from this provider's site.
    async fn find_snapshot(&self, record: &Record, store: &dyn RecordStore)
    -> Result<Option<Record>>;

    /// Amend a page before it is converted with its snapshot retained.
    fn prepare_snapshot(&self, _page: &mut Page) -> Result<()> {
        Ok(())
    }

    /// Fetch the detail page at `url` and convert it.
    async fn fetch_and_convert(
        &self,
        url: &str,
        refer: &Record,
        retain_snapshot: bool,
        transport: &dyn Transport,
        engine: &dyn ConversionEngine,
    ) -> Result<Record> {
        let page = transport.fetch_document(&RequestSpec::get(url)).await?;
        self.convert_page(page, refer, retain_snapshot, engine).await
    }

    /// Run the host converter over `page` and copy `refer`'s collections onto
    /// the result. The returned record still needs saving.
    async fn convert_page(
        &self,
        mut page: Page,
        refer: &Record,
        retain_snapshot: bool,
        engine: &dyn ConversionEngine,
    ) -> Result<Record> {
        if retain_snapshot {
            self.prepare_snapshot(&mut page)?;
        }
        let options = ConvertOptions {
            library_id: refer.library_id,
            retain_attachments: retain_snapshot,
        };
        let records = engine
            .convert(self.converter_id(), &page, &options)
            .await
            .map_err(|e| ResolveError::Conversion {
                converter: self.converter_id().to_string(),
                message: e.to_string(),
            })?;
        let mut record = records
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::Conversion {
                converter: self.converter_id().to_string(),
                message: format!("no record produced for {}", page.url),
            })?;
        debug!("converted {} into record {}", page.url, record.id);
        record.collections.extend(refer.collections.iter().copied());
        Ok(record)
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

type Loaded = std::result::Result<Arc<dyn Provider>, String>;
type PendingProvider = Shared<BoxFuture<'static, Loaded>>;

enum Slot {
    Ready(Arc<dyn Provider>),
    Pending(PendingProvider),
}

struct Entry {
    name: String,
    slot: Slot,
}

/// Handle on a provider that is still loading.
pub struct Readiness {
    name: String,
    pending: PendingProvider,
}

impl Readiness {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn wait(self) -> Result<Arc<dyn Provider>> {
        self.pending
            .await
            .map_err(|message| ResolveError::ProviderUnavailable(self.name, message))
    }
}

/// Providers in registration order. Names are unique and entries are never
/// removed.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<Entry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in provider.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.entries.push(Entry {
            name: cnki::NAME.to_string(),
            slot: Slot::Ready(Arc::new(CnkiProvider::new())),
        });
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Result<()> {
        let name = provider.name().to_string();
        self.ensure_unique(&name)?;
        self.entries.push(Entry {
            name,
            slot: Slot::Ready(provider),
        });
        Ok(())
    }

    /// Reserve `name` for a provider produced by `loader`. The loader runs the
    /// first time anyone awaits the returned handle or the registry.
    pub fn register_deferred<F>(&mut self, name: &str, loader: F) -> Result<Readiness>
    where
        F: Future<Output = Result<Arc<dyn Provider>>> + Send + 'static,
    {
        self.ensure_unique(name)?;
        let expected = name.to_string();
        let pending = async move {
            let provider = loader.await.map_err(|e| e.to_string())?;
            if provider.name() != expected {
                return Err(format!(
                    "loader produced provider {:?} instead",
                    provider.name()
                ));
            }
            Ok(provider)
        }
        .boxed()
        .shared();

        self.entries.push(Entry {
            name: name.to_string(),
            slot: Slot::Pending(pending.clone()),
        });
        Ok(Readiness {
            name: name.to_string(),
            pending,
        })
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        if self.entries.iter().any(|e| e.name == name) {
            return Err(ResolveError::DuplicateProvider(name.to_string()));
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up one provider, waiting for it if it is still loading.
    pub async fn get(&self, name: &str) -> Result<Option<Arc<dyn Provider>>> {
        let Some(entry) = self.entries.iter().find(|e| e.name == name) else {
            return Ok(None);
        };
        match &entry.slot {
            Slot::Ready(provider) => Ok(Some(Arc::clone(provider))),
            Slot::Pending(pending) => pending
                .clone()
                .await
                .map(Some)
                .map_err(|message| ResolveError::ProviderUnavailable(name.to_string(), message)),
        }
    }

    /// Every provider that finished loading, in registration order. Providers
    /// whose loader failed are logged and left out.
    pub async fn ready(&self) -> Vec<Arc<dyn Provider>> {
        let loads = self.entries.iter().map(|entry| async move {
            match &entry.slot {
                Slot::Ready(provider) => Some(Arc::clone(provider)),
                Slot::Pending(pending) => match pending.clone().await {
                    Ok(provider) => Some(provider),
                    Err(message) => {
                        warn!("provider {} unavailable: {message}", entry.name);
                        None
                    }
                },
            }
        });
        join_all(loads).await.into_iter().flatten().collect()
    }
}
