//! One end-to-end run per replicated object.

pub mod orchestrator;
pub mod streams;

pub use orchestrator::{SyncOptions, SyncOrchestrator};
pub use streams::{ContentDocumentLinkStream, ContentVersionStream, SyncStream};
