//! Content-addressed object storage for DFS nodes.
//!
//! Objects are addressed by a logical key. A [`PathTransform`] maps each key
//! to a [`Location`] below the store root; the default [`CasTransform`]
//! shards objects across a directory tree derived from the SHA-1 digest of
//! the key.
//!
//! # Layout
//!
//! ```text
//! <root>/753ba/205f2/11917/3e905/f67d5/4ea62/37418/3ca04/753ba205f2119173e905f67d54ea62374183ca04
//! ```
//!
//! # Rules
//!
//! 1. The transform is a pure function of the key.
//! 2. Writes replace any previous content under the same key.
//! 3. Deletion works at shard granularity: the whole first-level directory goes.
//! 4. The store never interprets object contents.

pub mod error;
pub mod path;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use path::{CasTransform, IdentityTransform, Location, PathTransform, TransformKind};
pub use store::{Store, DEFAULT_ROOT};
