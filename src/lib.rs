//! # caskkv
//!
//! A Bitcask-style, log-structured key-value storage engine with:
//! - Append-only segments with CRC32-checked records
//! - An in-memory keydir giving single-seek reads
//! - Merge compaction that drops overwritten and deleted data
//! - Hint files for fast keydir recovery, with scan fallback
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │        get / put / delete / list_keys / fold / merge         │
//! └──────────┬───────────────────────┬──────────────────────────┘
//!            │                       │
//!            ▼                       ▼
//!     ┌─────────────┐         ┌─────────────┐
//!     │   Keydir    │         │  Segments   │
//!     │  (RwLock)   │         │ active + N  │
//!     └─────────────┘         │   sealed    │
//!            ▲                └──────┬──────┘
//!            │                       │
//!     ┌──────┴──────┐         ┌──────▼──────┐
//!     │  Recovery   │◄────────│ Hint files  │
//!     │   Loader    │         │  (per seg)  │
//!     └─────────────┘         └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use caskkv::{Engine, Lookup};
//!
//! # fn main() -> caskkv::Result<()> {
//! let cask = Engine::open_path("./my_cask")?;
//! cask.put(b"hello", b"world")?;
//! assert_eq!(cask.get(b"hello")?, Lookup::Value(b"world".to_vec()));
//! cask.delete(b"hello")?;
//! cask.close()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod segment;
pub mod keydir;
pub mod hint;
pub mod recovery;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::{Config, SyncStrategy};
pub use engine::{CaskState, Engine, EngineStats, Lookup, MergeStats};
pub use recovery::{RecoveryLoader, RecoveryResult};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of caskkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
