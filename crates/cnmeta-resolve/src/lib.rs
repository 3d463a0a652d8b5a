//! cnmeta resolve: search, selection and conversion of Chinese document
//! metadata, plus translator synchronisation.

pub mod disambiguate;
pub mod dom;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod providers;
pub mod query;
pub mod title;
pub mod translators;

pub use disambiguate::{Selection, disambiguate};
pub use error::{ResolveError, Result};
pub use http::{HttpTransport, Transport, encode_form};
pub use pipeline::{
    BatchReport, ItemReport, ProgressFn, ProviderOutcome, ProviderReport, ResolveEvent,
    ResolverContext, search_candidates,
};
pub use providers::{CnkiProvider, Provider, ProviderRegistry, Readiness};
pub use query::{QueryInput, derive_search_term};
pub use title::{NoTitles, PdfTitleExtractor, TitleExtractor};
pub use translators::{
    DownloadSummary, SyncEvent, TranslatorCache, TranslatorCacheEntry, TranslatorSync,
};
