//! Content-hash cache coherence.
//!
//! - **Hasher**: canonical SHA-256 digest of a typed calculation input.
//! - **Stores**: one persisted `EntityId -> (result, input hash)` map per
//!   calculation kind, built by [`CacheStoreFactory`].
//! - **Coherence middleware**: keeps the `cacheHash` query parameter of a
//!   calculation route equal to the hash its store records for the entity.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! directory = "var/cache"
//! flush_debounce_ms = 250   # 0 flushes inside every write
//! ```

mod config;
mod error;
mod hasher;
mod lock;
mod middleware;
mod persist;
mod store;

pub use config::CacheConfig;
pub use error::CacheError;
pub use hasher::{
    CalculationInput, HashError, InputHash, canonical_json, hash_input, hash_untyped, hash_value,
};
pub use middleware::{
    CACHE_HASH_PARAM, Coherence, CoherenceError, CoherenceLayer, IdExtractor, NavigationParams,
    RouteMatcher, StoreAccessor, cache_hash_of, coherence_layer, is_speculative, location_of,
    navigation_url, reconcile, with_cache_hash,
};
pub use persist::{FileBackend, FlushPolicy, MemoryBackend, PersistenceBackend};
pub use store::{CacheStore, CacheStoreFactory, CachedEntry, CachedResult};
