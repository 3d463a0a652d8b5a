use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cnmeta_core::{
    AttachmentInfo, CandidateSelector, CandidateSet, CollectionId, ConversionEngine,
    ConvertOptions, CoreError, HttpConfig, LinkMode, MemoryPreferences, MemoryRecordStore, Page,
    PrefKey, PrefValue, PreferenceStore, Record, RecordId, RecordKind, RecordStore, RequestSpec,
};
use cnmeta_resolve::providers::cnki::CONVERTER_ID;
use cnmeta_resolve::{
    CnkiProvider, HttpTransport, NoTitles, Provider, ProviderOutcome, ProviderRegistry,
    QueryInput, ResolveError, ResolveEvent, ResolverContext, dom,
};
use mockito::{Mock, Server, ServerGuard};
use tempfile::TempDir;

// ─── Host fakes ───────────────────────────────────────────────────────────────

/// Converts a page into a journal article titled after its `<h1>`.
struct FakeEngine {
    store: Arc<MemoryRecordStore>,
    seen: Mutex<Vec<(String, Page, ConvertOptions)>>,
}

impl FakeEngine {
    fn new(store: Arc<MemoryRecordStore>) -> Self {
        Self {
            store,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<(String, Page, ConvertOptions)> {
        self.seen.lock().unwrap().clone()
    }
}

fn heading(html: &str) -> Option<String> {
    let doc = dom::parse_document(html);
    let selector = dom::parse_selector("h1").ok()?;
    doc.select(&selector).next().map(|h| dom::element_text(&h))
}

#[async_trait]
impl ConversionEngine for FakeEngine {
    async fn convert(
        &self,
        converter_id: &str,
        page: &Page,
        options: &ConvertOptions,
    ) -> cnmeta_core::Result<Vec<Record>> {
        self.seen
            .lock()
            .unwrap()
            .push((converter_id.to_string(), page.clone(), *options));
        let title = heading(&page.html).ok_or_else(|| CoreError::Store("no heading".into()))?;
        let mut record = self
            .store
            .create(RecordKind::Regular("journalArticle".into()), title);
        record.library_id = options.library_id;
        record.url = Some(page.url.clone());
        self.store.insert(record.clone());
        Ok(vec![record])
    }
}

struct Scripted {
    answer: Option<Vec<String>>,
    prompts: Mutex<Vec<CandidateSet>>,
}

impl Scripted {
    fn answering(answer: Option<Vec<String>>) -> Self {
        Self {
            answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<CandidateSet> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CandidateSelector for Scripted {
    async fn prompt_selection(&self, candidates: &CandidateSet) -> Option<Vec<String>> {
        self.prompts.lock().unwrap().push(candidates.clone());
        self.answer.clone()
    }
}

/// Memory store whose `save` fails for one record.
struct FailingStore {
    inner: Arc<MemoryRecordStore>,
    poisoned: RecordId,
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn get(&self, id: RecordId) -> cnmeta_core::Result<Option<Record>> {
        self.inner.get(id).await
    }

    async fn save(&self, record: &Record) -> cnmeta_core::Result<()> {
        if record.id == self.poisoned {
            return Err(CoreError::Store("disk full".into()));
        }
        self.inner.save(record).await
    }

    async fn children(&self, id: RecordId) -> cnmeta_core::Result<Vec<Record>> {
        self.inner.children(id).await
    }

    async fn add_related(&self, a: RecordId, b: RecordId) -> cnmeta_core::Result<()> {
        self.inner.add_related(a, b).await
    }

    async fn rename_attachment_from_parent(&self, attachment: RecordId) -> cnmeta_core::Result<()> {
        self.inner.rename_attachment_from_parent(attachment).await
    }
}

/// Provider whose every search fails.
struct Broken;

#[async_trait]
impl Provider for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn converter_id(&self) -> &str {
        "none"
    }

    fn build_query(&self, _input: &QueryInput, _oversea: bool) -> cnmeta_resolve::Result<RequestSpec> {
        Err(ResolveError::Parse("search form changed".into()))
    }

    fn parse_results(&self, _page: &Page) -> cnmeta_resolve::Result<CandidateSet> {
        Ok(CandidateSet::new())
    }

    async fn find_snapshot(
        &self,
        _record: &Record,
        _store: &dyn RecordStore,
    ) -> cnmeta_resolve::Result<Option<Record>> {
        Ok(None)
    }
}

// ─── Fixtures ─────────────────────────────────────────────────────────────────

struct Harness {
    server: ServerGuard,
    store: Arc<MemoryRecordStore>,
    engine: Arc<FakeEngine>,
    prefs: Arc<MemoryPreferences>,
}

impl Harness {
    async fn new() -> Self {
        let store = Arc::new(MemoryRecordStore::new());
        Self {
            server: Server::new_async().await,
            engine: Arc::new(FakeEngine::new(Arc::clone(&store))),
            store,
            prefs: Arc::new(MemoryPreferences::new()),
        }
    }

    fn cnki(&self) -> Arc<dyn Provider> {
        Arc::new(CnkiProvider::with_endpoints(
            &format!("{}/grid", self.server.url()),
            &format!("{}/oversea", self.server.url()),
        ))
    }

    fn context_with(&self, registry: ProviderRegistry, selector: Arc<Scripted>) -> ResolverContext {
        self.context_on(registry, selector, self.store.clone())
    }

    fn context_on(
        &self,
        registry: ProviderRegistry,
        selector: Arc<Scripted>,
        store: Arc<dyn RecordStore>,
    ) -> ResolverContext {
        let http = HttpConfig {
            min_interval_ms: 0,
            ..HttpConfig::default()
        };
        ResolverContext::new(
            registry,
            Arc::new(HttpTransport::new(&http).unwrap()),
            self.engine.clone(),
            store,
            selector,
            self.prefs.clone(),
        )
        .with_title_extractor(Arc::new(NoTitles))
    }

    fn context(&self, selector: Arc<Scripted>) -> ResolverContext {
        let mut registry = ProviderRegistry::new();
        registry.register(self.cnki()).unwrap();
        self.context_with(registry, selector)
    }

    fn detail_url(&self, id: &str) -> String {
        format!("{}/detail/{id}", self.server.url())
    }

    async fn mock_results(&mut self, path: &str, ids: &[&str]) -> Mock {
        let rows: String = ids
            .iter()
            .map(|id| {
                format!(
                    r#"<tr><td class="name"><a href="{}">论文{id}</a></td><td class="author">张三</td><td class="source">计算机学报</td><td class="date">2023-01-01</td></tr>"#,
                    self.detail_url(id)
                )
            })
            .collect();
        let body = format!(
            r#"<table class="result-table-list"><tbody>{rows}</tbody></table>"#
        );
        self.server
            .mock("POST", path)
            .with_body(body)
            .create_async()
            .await
    }

    async fn mock_detail(&mut self, id: &str, title: &str) -> Mock {
        self.server
            .mock("GET", format!("/detail/{id}").as_str())
            .with_body(format!("<html><body><h1>{title}</h1></body></html>"))
            .create_async()
            .await
    }
}

fn only_outcome(report: &cnmeta_resolve::BatchReport) -> &ProviderOutcome {
    assert_eq!(report.items.len(), 1);
    assert_eq!(report.items[0].providers.len(), 1);
    &report.items[0].providers[0].outcome
}

// ─── Search path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_candidate_reparents_and_renames_the_attachment() {
    let mut h = Harness::new().await;
    let search = h.mock_results("/grid", &["a"]).await;
    let detail = h.mock_detail("a", "基于深度学习的图像识别").await;

    let mut attachment = h.store.create_attachment("基于深度学习的图像识别_张三.pdf");
    attachment.collections.insert(CollectionId(7));
    h.store.insert(attachment.clone());

    let selector = Arc::new(Scripted::answering(None));
    let report = h.context(selector.clone()).retrieve_metadata(&[attachment.id]).await;

    let ProviderOutcome::Attached { record } = only_outcome(&report) else {
        panic!("unexpected outcome {:?}", only_outcome(&report));
    };
    let attachment = h.store.snapshot(attachment.id).unwrap();
    assert_eq!(attachment.parent_id, Some(*record));
    assert!(attachment.related.is_empty());
    assert_eq!(attachment.attachment_filename(), Some("基于深度学习的图像识别.pdf"));

    let created = h.store.snapshot(*record).unwrap();
    assert!(created.collections.contains(&CollectionId(7)));
    assert!(created.related.is_empty());
    assert!(selector.prompts().is_empty());

    let seen = h.engine.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, CONVERTER_ID);
    assert!(!seen[0].2.retain_attachments);
    search.assert_async().await;
    detail.assert_async().await;
}

#[tokio::test]
async fn several_chosen_candidates_become_related_records() {
    let mut h = Harness::new().await;
    let _search = h.mock_results("/grid", &["a", "b", "c"]).await;
    let _a = h.mock_detail("a", "论文甲").await;
    let b = h.server.mock("GET", "/detail/b").expect(0).create_async().await;
    let _c = h.mock_detail("c", "论文丙").await;

    let attachment = h.store.create_attachment("人工智能综述.pdf");
    let selector = Arc::new(Scripted::answering(Some(vec![
        h.detail_url("a"),
        h.detail_url("c"),
    ])));
    let report = h.context(selector.clone()).retrieve_metadata(&[attachment.id]).await;

    let ProviderOutcome::Related { records } = only_outcome(&report) else {
        panic!("unexpected outcome {:?}", only_outcome(&report));
    };
    assert_eq!(records.len(), 2);

    let attachment = h.store.snapshot(attachment.id).unwrap();
    assert_eq!(attachment.parent_id, None);
    assert_eq!(attachment.attachment_filename(), Some("人工智能综述.pdf"));
    for id in records {
        assert!(attachment.related.contains(id));
        assert!(h.store.snapshot(*id).unwrap().related.contains(&attachment.id));
    }

    let prompts = selector.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].len(), 3);
    b.assert_async().await;
}

#[tokio::test]
async fn single_choice_among_many_takes_the_attach_path() {
    let mut h = Harness::new().await;
    let _search = h.mock_results("/grid", &["a", "b"]).await;
    let _b = h.mock_detail("b", "论文乙").await;

    let attachment = h.store.create_attachment("人工智能综述.pdf");
    let selector = Arc::new(Scripted::answering(Some(vec![h.detail_url("b")])));
    let report = h.context(selector).retrieve_metadata(&[attachment.id]).await;

    assert!(matches!(only_outcome(&report), ProviderOutcome::Attached { .. }));
}

#[tokio::test]
async fn empty_results_and_declined_prompts_create_nothing() {
    let mut h = Harness::new().await;
    let _search = h.mock_results("/grid", &[]).await;
    let attachment = h.store.create_attachment("人工智能综述.pdf");
    let before = h.store.len();

    let report = h
        .context(Arc::new(Scripted::answering(None)))
        .retrieve_metadata(&[attachment.id])
        .await;
    assert!(matches!(only_outcome(&report), ProviderOutcome::NoCandidates));
    assert_eq!(h.store.len(), before);

    let mut h = Harness::new().await;
    let _search = h.mock_results("/grid", &["a", "b"]).await;
    let attachment = h.store.create_attachment("人工智能综述.pdf");
    let report = h
        .context(Arc::new(Scripted::answering(None)))
        .retrieve_metadata(&[attachment.id])
        .await;
    assert!(matches!(only_outcome(&report), ProviderOutcome::Declined));
    assert_eq!(h.store.len(), 1);
    assert!(h.engine.seen().is_empty());
}

#[tokio::test]
async fn ineligible_records_are_skipped_without_requests() {
    let mut h = Harness::new().await;
    let search = h.server.mock("POST", "/grid").expect(0).create_async().await;

    let english = h.store.create_attachment("deep learning.pdf");
    let mut child = h.store.create_attachment("深度学习.pdf");
    child.parent_id = Some(english.id);
    h.store.insert(child.clone());
    let note = h.store.create(RecordKind::Note, "笔记");

    let report = h
        .context(Arc::new(Scripted::answering(None)))
        .retrieve_metadata(&[english.id, child.id, note.id])
        .await;

    assert_eq!(report.items.len(), 3);
    for item in &report.items {
        assert!(matches!(item.providers[0].outcome, ProviderOutcome::Skipped));
    }
    search.assert_async().await;
}

#[tokio::test]
async fn a_failing_provider_does_not_stop_the_next_one() {
    let mut h = Harness::new().await;
    let _search = h.mock_results("/grid", &["a"]).await;
    let _a = h.mock_detail("a", "论文甲").await;

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(Broken)).unwrap();
    registry.register(h.cnki()).unwrap();
    let attachment = h.store.create_attachment("人工智能综述.pdf");
    let missing = RecordId(999);

    let report = h
        .context_with(registry, Arc::new(Scripted::answering(None)))
        .retrieve_metadata(&[missing, attachment.id])
        .await;

    assert_eq!(report.items.len(), 2);
    assert!(report.items[0]
        .providers
        .iter()
        .all(|p| matches!(p.outcome, ProviderOutcome::Failed(ResolveError::Store(_)))));

    let providers = &report.items[1].providers;
    assert_eq!(providers[0].provider, "broken");
    assert!(matches!(
        providers[0].outcome,
        ProviderOutcome::Failed(ResolveError::Parse(_))
    ));
    assert_eq!(providers[1].provider, "cnki");
    assert!(matches!(providers[1].outcome, ProviderOutcome::Attached { .. }));
    assert_eq!(report.failures(), 3);
    assert_eq!(report.created_records().len(), 1);
}

#[tokio::test]
async fn http_errors_fail_only_that_provider() {
    let mut h = Harness::new().await;
    let _search = h
        .server
        .mock("POST", "/grid")
        .with_status(503)
        .create_async()
        .await;
    let attachment = h.store.create_attachment("人工智能综述.pdf");

    let report = h
        .context(Arc::new(Scripted::answering(None)))
        .retrieve_metadata(&[attachment.id])
        .await;

    match only_outcome(&report) {
        ProviderOutcome::Failed(err) => assert!(err.is_transport()),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.store.snapshot(attachment.id).unwrap().parent_id, None);
}

#[tokio::test]
async fn oversea_preference_switches_endpoint() {
    let mut h = Harness::new().await;
    let domestic = h.server.mock("POST", "/grid").expect(0).create_async().await;
    let oversea = h.mock_results("/oversea", &[]).await;
    h.prefs.set(PrefKey::IsOversea, PrefValue::Bool(true)).unwrap();

    let attachment = h.store.create_attachment("人工智能综述.caj");
    let context = h.context(Arc::new(Scripted::answering(None)));
    assert!(context.is_oversea());
    context.retrieve_metadata(&[attachment.id]).await;

    domestic.assert_async().await;
    oversea.assert_async().await;
}

#[tokio::test]
async fn progress_events_cover_the_batch() {
    let mut h = Harness::new().await;
    let _search = h.mock_results("/grid", &[]).await;
    let attachment = h.store.create_attachment("人工智能综述.pdf");

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let context = h
        .context(Arc::new(Scripted::answering(None)))
        .with_progress(Arc::new(move |event: &ResolveEvent<'_>| {
            let line = match event {
                ResolveEvent::ItemStarted { index, total, .. } => format!("start {index}/{total}"),
                ResolveEvent::ProviderFinished { provider, outcome, .. } => {
                    format!("{provider}: {outcome}")
                }
                ResolveEvent::BatchFinished { report } => format!("done {}", report.items.len()),
            };
            sink.lock().unwrap().push(line);
        }));
    context.retrieve_metadata(&[attachment.id]).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["start 0/1", "cnki: no candidates", "done 1"]
    );
}

#[tokio::test]
async fn deferred_provider_is_awaited_before_the_batch() {
    let mut h = Harness::new().await;
    let _search = h.mock_results("/grid", &["a"]).await;
    let _a = h.mock_detail("a", "论文甲").await;

    let cnki = h.cnki();
    let mut registry = ProviderRegistry::new();
    let readiness = registry
        .register_deferred("cnki", async move {
            tokio::task::yield_now().await;
            Ok::<_, ResolveError>(cnki)
        })
        .unwrap();
    assert_eq!(readiness.name(), "cnki");

    let attachment = h.store.create_attachment("人工智能综述.pdf");
    let report = h
        .context_with(registry, Arc::new(Scripted::answering(None)))
        .retrieve_metadata(&[attachment.id])
        .await;

    assert!(matches!(only_outcome(&report), ProviderOutcome::Attached { .. }));
    assert_eq!(readiness.wait().await.unwrap().name(), "cnki");
}

// ─── Re-translate path ────────────────────────────────────────────────────────

const DETAIL_URL: &str = "https://kns.cnki.net/kcms2/article/abstract?v=abc";

struct SavedWebpage {
    webpage: Record,
    snapshot: Record,
    note: Record,
    _dir: TempDir,
}

fn saved_webpage(store: &MemoryRecordStore) -> SavedWebpage {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.html");
    std::fs::write(
        &path,
        r#"<html><body><h1>基于深度学习的图像识别</h1>
<input class="infocheckbox" type="checkbox" dbcode="CJFQ" value="CJFD2023!JSJX202301001">
</body></html>"#,
    )
    .unwrap();

    let mut webpage = store.create(RecordKind::Webpage, "知网页面");
    webpage.url = Some(DETAIL_URL.into());
    webpage.collections.insert(CollectionId(3));
    store.insert(webpage.clone());

    let mut snapshot = store.create(RecordKind::Attachment, "Snapshot");
    snapshot.parent_id = Some(webpage.id);
    snapshot.url = Some(DETAIL_URL.into());
    snapshot.attachment = Some(AttachmentInfo {
        filename: "snapshot.html".into(),
        content_type: Some("text/html".into()),
        link_mode: LinkMode::ImportedUrl,
        path: Some(path),
    });
    store.insert(snapshot.clone());

    let mut note = store.create(RecordKind::Note, "读书笔记");
    note.parent_id = Some(webpage.id);
    store.insert(note.clone());

    SavedWebpage {
        webpage,
        snapshot,
        note,
        _dir: dir,
    }
}

#[tokio::test]
async fn webpage_snapshot_is_retranslated_and_superseded() {
    let h = Harness::new().await;
    let saved = saved_webpage(&h.store);
    let context = h.context(Arc::new(Scripted::answering(None)));

    assert!(context.can_retrieve(&saved.webpage).await);
    let report = context.retrieve_metadata(&[saved.webpage.id]).await;

    let ProviderOutcome::Retranslated { record, superseded } = only_outcome(&report) else {
        panic!("unexpected outcome {:?}", only_outcome(&report));
    };
    assert_eq!(*superseded, saved.webpage.id);

    let seen = h.engine.seen();
    assert_eq!(seen.len(), 1);
    let (converter, page, options) = &seen[0];
    assert_eq!(converter, CONVERTER_ID);
    assert_eq!(page.url, DETAIL_URL);
    assert!(options.retain_attachments);
    assert!(page.html.contains(r#"id="paramdbname" value="CLASTJFD2023""#));
    assert!(page.html.contains(r#"id="paramfilename" value="JSJX202301001""#));
    assert!(page.html.contains(r#"id="paramdbcode" value="CJFQ""#));

    for child in [&saved.snapshot, &saved.note] {
        assert_eq!(h.store.snapshot(child.id).unwrap().parent_id, Some(*record));
    }
    assert!(h.store.snapshot(saved.webpage.id).unwrap().deleted);
    assert!(h.store.snapshot(*record).unwrap().collections.contains(&CollectionId(3)));

    // Nothing is left to re-translate.
    let again = context.retrieve_metadata(&[saved.webpage.id]).await;
    assert!(matches!(only_outcome(&again), ProviderOutcome::Skipped));
}

#[tokio::test]
async fn failed_relink_moves_children_back() {
    let h = Harness::new().await;
    let saved = saved_webpage(&h.store);
    let store = Arc::new(FailingStore {
        inner: h.store.clone(),
        poisoned: saved.note.id,
    });
    let mut registry = ProviderRegistry::new();
    registry.register(h.cnki()).unwrap();
    let context = h.context_on(registry, Arc::new(Scripted::answering(None)), store);

    let report = context.retrieve_metadata(&[saved.webpage.id]).await;

    assert!(matches!(
        only_outcome(&report),
        ProviderOutcome::Failed(ResolveError::Store(_))
    ));
    assert_eq!(
        h.store.snapshot(saved.snapshot.id).unwrap().parent_id,
        Some(saved.webpage.id)
    );
    assert_eq!(
        h.store.snapshot(saved.note.id).unwrap().parent_id,
        Some(saved.webpage.id)
    );
    assert!(!h.store.snapshot(saved.webpage.id).unwrap().deleted);
}

#[tokio::test]
async fn snapshot_without_file_fails_cleanly() {
    let h = Harness::new().await;
    let saved = saved_webpage(&h.store);
    let mut snapshot = saved.snapshot.clone();
    if let Some(info) = snapshot.attachment.as_mut() {
        info.path = None;
    }
    h.store.insert(snapshot);

    let report = h
        .context(Arc::new(Scripted::answering(None)))
        .retrieve_metadata(&[saved.webpage.id])
        .await;

    assert!(matches!(
        only_outcome(&report),
        ProviderOutcome::Failed(ResolveError::Parse(_))
    ));
    assert!(!h.store.snapshot(saved.webpage.id).unwrap().deleted);
    assert!(h.engine.seen().is_empty());
}

#[tokio::test]
async fn can_retrieve_matches_menu_rules() {
    let h = Harness::new().await;
    let context = h.context(Arc::new(Scripted::answering(None)));

    let attachment = h.store.create_attachment("人工智能综述.caj");
    assert!(context.can_retrieve(&attachment).await);

    let note = h.store.create(RecordKind::Note, "笔记");
    assert!(!context.can_retrieve(&note).await);

    let mut foreign = h.store.create(RecordKind::Webpage, "page");
    foreign.url = Some("https://example.org/".into());
    assert!(!context.can_retrieve(&foreign).await);
}
