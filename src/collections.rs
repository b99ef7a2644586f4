//! Hash collection aliases used by the tag index, the mirror arena and the
//! history store.
//!
//! With the `gxhash` feature the maps use gxhash's hasher; without it they
//! fall back to std's `RandomState`, so the crate still builds on CPUs
//! lacking AES-NI/SSE2. Construct through `Default::default()` so call sites
//! compile the same way under both configurations.

#[cfg(feature = "gxhash")]
pub use gxhash::{HashMap as GxHashMap, HashSet as GxHashSet};

#[cfg(not(feature = "gxhash"))]
use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};

/// Type alias for HashMap that uses gxhash when available, std otherwise
#[cfg(feature = "gxhash")]
pub type HashMap<K, V> = GxHashMap<K, V>;

/// Type alias for HashMap that uses gxhash when available, std otherwise
#[cfg(not(feature = "gxhash"))]
pub type HashMap<K, V> = StdHashMap<K, V>;

/// Type alias for HashSet that uses gxhash when available, std otherwise
#[cfg(feature = "gxhash")]
pub type HashSet<T> = GxHashSet<T>;

/// Type alias for HashSet that uses gxhash when available, std otherwise
#[cfg(not(feature = "gxhash"))]
pub type HashSet<T> = StdHashSet<T>;
