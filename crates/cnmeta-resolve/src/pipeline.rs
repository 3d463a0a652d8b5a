//! Batch metadata retrieval across every registered provider.
//!
//! Each record is tried against each provider in registry order. Eligible
//! attachments go through search, selection and conversion; webpages that a
//! provider recognises as its own are re-translated from their stored
//! snapshot. A provider failing for one record never stops the batch.

use std::fmt;
use std::sync::Arc;

use cnmeta_core::{
    CandidateSelector, CandidateSet, ConversionEngine, CoreError, Page, PrefKey,
    PreferenceStore, Record, RecordId, RecordStore, ResolverConfig,
};
use tracing::{debug, info, warn};

use crate::disambiguate::{Selection, disambiguate};
use crate::error::{ResolveError, Result};
use crate::http::Transport;
use crate::providers::{Provider, ProviderRegistry};
use crate::query::QueryInput;
use crate::title::{PdfTitleExtractor, TitleExtractor};

// ─── Outcomes ─────────────────────────────────────────────────────────────────

/// What one provider did for one record.
#[derive(Debug)]
pub enum ProviderOutcome {
    /// The record is neither an eligible attachment nor this provider's
    /// webpage.
    Skipped,
    NoCandidates,
    Declined,
    /// The attachment now hangs under `record`.
    Attached { record: RecordId },
    /// New records linked to the attachment as related items.
    Related { records: Vec<RecordId> },
    /// `superseded` was replaced by `record` and soft-deleted.
    Retranslated { record: RecordId, superseded: RecordId },
    Failed(ResolveError),
}

impl ProviderOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Attached { .. } | Self::Related { .. } | Self::Retranslated { .. }
        )
    }

    pub fn created(&self) -> Vec<RecordId> {
        match self {
            Self::Attached { record } | Self::Retranslated { record, .. } => vec![*record],
            Self::Related { records } => records.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for ProviderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::NoCandidates => write!(f, "no candidates"),
            Self::Declined => write!(f, "selection declined"),
            Self::Attached { record } => write!(f, "attached to record {record}"),
            Self::Related { records } => write!(f, "{} related records created", records.len()),
            Self::Retranslated { record, superseded } => {
                write!(f, "record {superseded} re-translated into {record}")
            }
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

#[derive(Debug)]
pub struct ProviderReport {
    pub provider: String,
    pub outcome: ProviderOutcome,
}

#[derive(Debug)]
pub struct ItemReport {
    pub record: RecordId,
    pub providers: Vec<ProviderReport>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub items: Vec<ItemReport>,
}

impl BatchReport {
    /// Records created across the whole batch, in processing order.
    pub fn created_records(&self) -> Vec<RecordId> {
        self.items
            .iter()
            .flat_map(|item| item.providers.iter())
            .flat_map(|p| p.outcome.created())
            .collect()
    }

    pub fn failures(&self) -> usize {
        self.items
            .iter()
            .flat_map(|item| item.providers.iter())
            .filter(|p| matches!(p.outcome, ProviderOutcome::Failed(_)))
            .count()
    }
}

/// Progress notifications emitted while a batch runs.
#[derive(Debug)]
pub enum ResolveEvent<'a> {
    ItemStarted {
        record: RecordId,
        index: usize,
        total: usize,
    },
    ProviderFinished {
        record: RecordId,
        provider: &'a str,
        outcome: &'a ProviderOutcome,
    },
    BatchFinished {
        report: &'a BatchReport,
    },
}

pub type ProgressFn = Arc<dyn Fn(&ResolveEvent<'_>) + Send + Sync>;

// ─── Context ──────────────────────────────────────────────────────────────────

/// Everything a retrieval run needs, built once at startup.
pub struct ResolverContext {
    registry: ProviderRegistry,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn ConversionEngine>,
    store: Arc<dyn RecordStore>,
    selector: Arc<dyn CandidateSelector>,
    prefs: Arc<dyn PreferenceStore>,
    titles: Arc<dyn TitleExtractor>,
    config: ResolverConfig,
    progress: Option<ProgressFn>,
}

impl ResolverContext {
    pub fn new(
        registry: ProviderRegistry,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn ConversionEngine>,
        store: Arc<dyn RecordStore>,
        selector: Arc<dyn CandidateSelector>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            registry,
            transport,
            engine,
            store,
            selector,
            prefs,
            titles: Arc::new(PdfTitleExtractor),
            config: ResolverConfig::default(),
            progress: None,
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_title_extractor(mut self, titles: Arc<dyn TitleExtractor>) -> Self {
        self.titles = titles;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Region flag: the `isOversea` preference, else the configured default.
    pub fn is_oversea(&self) -> bool {
        self.prefs
            .get_bool(PrefKey::IsOversea)
            .unwrap_or(self.config.is_oversea)
    }

    fn emit(&self, event: &ResolveEvent<'_>) {
        if let Some(progress) = &self.progress {
            progress(event);
        }
    }

    /// Whether `record` is something a retrieval run would act on.
    pub async fn can_retrieve(&self, record: &Record) -> bool {
        if record.is_chinese_top_attachment() {
            return true;
        }
        for provider in self.registry.ready().await {
            match provider.find_snapshot(record, self.store.as_ref()).await {
                Ok(Some(_)) => return true,
                Ok(None) => {}
                Err(err) => debug!("snapshot lookup by {} failed: {err}", provider.name()),
            }
        }
        false
    }

    pub async fn retrieve_metadata(&self, ids: &[RecordId]) -> BatchReport {
        let providers = self.registry.ready().await;
        let mut report = BatchReport::default();

        for (index, &id) in ids.iter().enumerate() {
            self.emit(&ResolveEvent::ItemStarted {
                record: id,
                index,
                total: ids.len(),
            });
            info!("retrieve metadata for record {id}");

            let mut item = ItemReport {
                record: id,
                providers: Vec::with_capacity(providers.len()),
            };
            for provider in &providers {
                info!("use provider: {}", provider.name());
                let outcome = match self.resolve_with(provider.as_ref(), id).await {
                    Ok(outcome) => outcome,
                    Err(err) => ProviderOutcome::Failed(err),
                };
                match &outcome {
                    ProviderOutcome::Skipped => debug!("record {id} not handled by {}", provider.name()),
                    ProviderOutcome::Failed(err) => {
                        warn!("provider {} failed for record {id}: {err}", provider.name())
                    }
                    other => info!("record {id}: {other}"),
                }
                self.emit(&ResolveEvent::ProviderFinished {
                    record: id,
                    provider: provider.name(),
                    outcome: &outcome,
                });
                item.providers.push(ProviderReport {
                    provider: provider.name().to_string(),
                    outcome,
                });
            }
            report.items.push(item);
        }

        self.emit(&ResolveEvent::BatchFinished { report: &report });
        report
    }

    /// One (record, provider) pair. The record is re-read so that changes
    /// made by earlier providers are visible.
    async fn resolve_with(&self, provider: &dyn Provider, id: RecordId) -> Result<ProviderOutcome> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| CoreError::RecordNotFound(id.to_string()))?;
        if record.deleted {
            return Ok(ProviderOutcome::Skipped);
        }
        if record.is_chinese_top_attachment() {
            return self.search(provider, &record).await;
        }
        match provider.find_snapshot(&record, self.store.as_ref()).await? {
            Some(snapshot) => self.retranslate(provider, &record, &snapshot).await,
            None => Ok(ProviderOutcome::Skipped),
        }
    }

    async fn search(&self, provider: &dyn Provider, attachment: &Record) -> Result<ProviderOutcome> {
        let title = self.titles.extract_title(attachment).await;
        if let Some(title) = &title {
            debug!("extracted title {title:?} from record {}", attachment.id);
        }
        let input = QueryInput::new(attachment.attachment_filename().unwrap_or_default())
            .with_title(title);
        let candidates =
            search_candidates(provider, self.transport.as_ref(), &input, self.is_oversea()).await?;

        let urls = match disambiguate(&candidates, self.selector.as_ref()).await {
            Selection::NoCandidates => return Ok(ProviderOutcome::NoCandidates),
            Selection::Declined => return Ok(ProviderOutcome::Declined),
            Selection::Chosen(urls) => urls,
        };
        let retain = self.config.retain_snapshot_on_search;

        if let [url] = urls.as_slice() {
            let record = provider
                .fetch_and_convert(url, attachment, retain, self.transport.as_ref(), self.engine.as_ref())
                .await?;
            self.store.save(&record).await?;

            let mut reparented = attachment.clone();
            reparented.parent_id = Some(record.id);
            self.store.save(&reparented).await?;
            self.store.rename_attachment_from_parent(reparented.id).await?;
            return Ok(ProviderOutcome::Attached { record: record.id });
        }

        let mut created = Vec::with_capacity(urls.len());
        for url in &urls {
            let record = provider
                .fetch_and_convert(url, attachment, retain, self.transport.as_ref(), self.engine.as_ref())
                .await?;
            self.store.save(&record).await?;
            self.store.add_related(record.id, attachment.id).await?;
            created.push(record.id);
        }
        Ok(ProviderOutcome::Related { records: created })
    }

    async fn retranslate(
        &self,
        provider: &dyn Provider,
        webpage: &Record,
        snapshot: &Record,
    ) -> Result<ProviderOutcome> {
        let path = snapshot
            .attachment
            .as_ref()
            .and_then(|a| a.path.clone())
            .ok_or_else(|| {
                ResolveError::Parse(format!("snapshot {} has no stored file", snapshot.id))
            })?;
        let html = tokio::fs::read_to_string(&path).await?;
        let page = Page::new(snapshot.url.clone().unwrap_or_default(), html);

        let mut record = provider
            .convert_page(page, snapshot, true, self.engine.as_ref())
            .await?;
        record.collections.extend(webpage.collections.iter().copied());
        self.store.save(&record).await?;

        self.relink_and_supersede(webpage, record.id).await?;
        Ok(ProviderOutcome::Retranslated {
            record: record.id,
            superseded: webpage.id,
        })
    }

    /// Move every note and attachment of `webpage` under `target`, then
    /// soft-delete `webpage`. On failure the children already moved go back.
    async fn relink_and_supersede(&self, webpage: &Record, target: RecordId) -> Result<()> {
        let children = self.store.children(webpage.id).await?;
        let mut moved: Vec<Record> = Vec::with_capacity(children.len());

        for child in children {
            let mut relinked = child.clone();
            relinked.parent_id = Some(target);
            if let Err(err) = self.store.save(&relinked).await {
                self.roll_back(&moved).await;
                return Err(err.into());
            }
            moved.push(child);
        }

        let mut superseded = webpage.clone();
        superseded.deleted = true;
        if let Err(err) = self.store.save(&superseded).await {
            self.roll_back(&moved).await;
            return Err(err.into());
        }
        info!(
            "moved {} children to record {target}, deleted record {}",
            moved.len(),
            webpage.id
        );
        Ok(())
    }

    async fn roll_back(&self, moved: &[Record]) {
        for original in moved.iter().rev() {
            if let Err(err) = self.store.save(original).await {
                warn!("could not return record {} to its parent: {err}", original.id);
            }
        }
    }
}

/// Build the provider's query, fetch the results page and parse it.
pub async fn search_candidates(
    provider: &dyn Provider,
    transport: &dyn Transport,
    input: &QueryInput,
    oversea: bool,
) -> Result<CandidateSet> {
    let request = provider.build_query(input, oversea)?;
    let page = transport.fetch_document(&request).await?;
    let candidates = provider.parse_results(&page)?;
    info!("get search result: {} candidates", candidates.len());
    Ok(candidates)
}
