//! dossier — per-user durable memory for AI agents.
//!
//! Facts learned about a user live in an embedded SQLite file (with an FTS5
//! text index) plus a per-user vector collection, retrieved through a
//! deliberately narrow, progressively-disclosing surface: search returns a
//! compact index, timeline returns bounded chronological context, and only
//! an explicit capped batch-get returns full records.
//!
//! Every operation is a synchronous, blocking call. Hosts running an async
//! runtime must wrap calls in their blocking-task primitive (e.g. tokio's
//! `spawn_blocking`); the crate makes no scheduling decisions and spawns no
//! background work. Concurrent writes to the same user should be serialized
//! by the caller; SQLite's single-writer locking plus the pool's busy
//! timeout is the only coordination provided.

pub mod db;
pub mod error;
pub mod manager;
pub mod search;
pub mod store;
pub mod timeline;
pub mod tools;
pub mod util;
pub mod vec;

pub use error::DossierError;
pub use manager::StoreManager;
pub use store::Store;
pub use vec::Embedder;
