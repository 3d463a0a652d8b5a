pub mod candidate;
pub mod page;
pub mod record;
pub mod request;

pub use candidate::{Candidate, CandidateSet};
pub use page::Page;
pub use record::{
    AttachmentInfo, CollectionId, LinkMode, Record, RecordId, RecordKind,
    is_chinese_document_filename,
};
pub use request::{HttpMethod, RequestSpec};
