//! Chunk download engine.
//!
//! This module provides functionality for downloading a shard's chunk
//! objects, including:
//! - Whole-chunk resume by size comparison (`size`)
//! - Single chunk streaming downloads (`http`)
//! - Bounded worker pool per shard (`coordinator`)
//! - Download event stream types (`events`)
//! - Per-shard outcome tracking (`state`)
//!
//! # Architecture
//!
//! ```text
//! ShardDownloadCoordinator
//!         │
//!         ├── N workers draining a closed job queue
//!         │       └── ChunkFetcher (trait)
//!         │               └── HttpChunkFetcher
//!         │                       └── check_resume (RemoteSize)
//!         │
//!         └── ProgressSender<DownloadEvent> (shared by all workers)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use snapdown::download::ShardDownloadCoordinator;
//! use snapdown::progress;
//!
//! let coordinator = ShardDownloadCoordinator::from_config(&config)?;
//! let (events, rx) = progress::channel(1000);
//!
//! let report = coordinator.run(0, &manifest, &events)?;
//! println!("{} of {} chunks", report.completed, report.total_chunks);
//! ```

mod coordinator;
mod events;
mod http;
mod size;
mod state;

pub use coordinator::ShardDownloadCoordinator;
pub use events::{ChunkFailure, ChunkProgress, DownloadEvent};
pub use http::{ChunkFetcher, FetchOutcome, HttpChunkFetcher};
pub use size::{check_resume, RemoteSize, ResumeCheck};
pub use state::ShardDownloadReport;
