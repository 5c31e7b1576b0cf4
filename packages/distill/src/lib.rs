//! Transcript Knowledge Distillation Library
//!
//! A resumable, checkpoint-driven pipeline that turns timestamped
//! transcripts into knowledge-graph content: entities, relationships,
//! quotes, and insights.
//!
//! # Design Philosophy
//!
//! **"Checkpoint before advance"**
//!
//! - Every stage boundary is persisted before the state machine moves on
//! - A crashed or cancelled run resumes from the last completed stage
//! - Extraction is per-unit isolated; one bad unit never sinks a batch
//! - Quota-limited credentials rotate round-robin and survive restarts
//! - Library handles mechanics, collaborators handle prompts and storage
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use distill::{
//!     CompletionClient, CredentialPool, ExtractionWorkerPool,
//!     MemoryCheckpointStore, MemoryGraphStore, Pipeline, PoolConfig,
//! };
//! use distill::testing::{MockCompletionService, MockSegmenter, MockUnitExtractor};
//!
//! let pool = Arc::new(
//!     CredentialPool::new(PoolConfig::default())
//!         .with_key("primary", "sk-...", [("fast-model".to_string(), 5_000)]),
//! );
//! let client = Arc::new(CompletionClient::new(MockCompletionService::new(), pool));
//! let workers = ExtractionWorkerPool::new(client, Arc::new(MockUnitExtractor::new()));
//!
//! let pipeline = Pipeline::new(
//!     Arc::new(MockSegmenter::new()),
//!     workers,
//!     Arc::new(MemoryCheckpointStore::new()),
//!     Arc::new(MemoryGraphStore::new()),
//! );
//! let outcome = pipeline.run("transcript text").await;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator abstractions (Segmenter, CompletionService, stores)
//! - [`types`] - Episode, stage, unit, and knowledge data types
//! - [`pipeline`] - The stage-ordered executor and shutdown signaling
//! - [`credentials`] - Quota-aware credential pool
//! - [`client`] - Retrying completion client
//! - [`workers`] - Bounded-concurrency extraction worker pool
//! - [`resolver`] - Entity deduplication
//! - [`stores`] - Store implementations (memory)
//! - [`service`] - Completion service implementations (HTTP)
//! - [`testing`] - Mock implementations for testing

pub mod client;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod retry;
pub mod service;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod workers;

// Re-export core types at crate root
pub use error::{
    CompletionError, PipelineError, Result, ServiceError, ServiceErrorKind, ServiceResult,
};
pub use traits::{
    checkpoint::CheckpointStore, completion::CompletionService, extractor::MalformedOutput,
    extractor::UnitExtractor, graph::GraphStore, segmenter::Segmenter,
};
pub use types::{
    checkpoint::{CheckpointRecord, StagePayload},
    config::{
        ClientConfig, PipelineConfig, PoolConfig, ResolverConfig, RetryConfig, WorkerPoolConfig,
    },
    episode::{Episode, RunOutcome, Stage},
    knowledge::{
        Entity, ExtractionResult, Insight, KnowledgeBundle, Quote, RawEntity, Relationship,
        UnitFailure,
    },
    unit::{Segment, Speaker, StructureOutline, StructureSection, TimeRange, Unit},
};

// Re-export pipeline components
pub use client::CompletionClient;
pub use credentials::{CredentialLease, CredentialPool, PoolSnapshot, SecretString};
pub use pipeline::{Pipeline, ShutdownSignal};
pub use resolver::EntityResolver;
pub use workers::{BatchOutcome, ExtractionWorkerPool};

// Re-export stores and services
pub use service::HttpCompletionService;
pub use stores::{MemoryCheckpointStore, MemoryGraphStore};
