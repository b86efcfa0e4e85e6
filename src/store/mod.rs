// Stores and references
//
// A store owns a backend and turns resources into refs: pack, hash,
// persist, hand back `(digest, cached value)`. Committed entries are
// immutable; `modify` never touches them, it commits a new version and
// rebinds the ref it was called on.

pub mod backend;
pub mod file;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;

use crate::context;
use crate::digest::Digest;
use crate::error::{Error, RegistryError, Result, StorageError};
use crate::pack;
use crate::registry::Registry;
use crate::resource::{FieldValue, Resource};
use crate::value::{RefValue, ResourceDict, Value};

pub use backend::{FileBackendConfig, StorageBackend};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

/// A reference to a committed resource: its digest plus an optional cached
/// copy of the value. Identity, equality and ordering are digest-only.
pub struct Ref<T> {
    digest: Digest,
    cached: Option<Box<T>>,
}

impl<T> Ref<T> {
    /// A bare reference to a digest, with nothing cached.
    pub fn from_digest(digest: Digest) -> Self {
        Self {
            digest,
            cached: None,
        }
    }

    /// The digest of the referenced resource.
    pub fn digest(&self) -> Digest {
        self.digest
    }

    /// The untyped form embedded in field values.
    pub fn untyped(&self) -> RefValue {
        RefValue::new(self.digest)
    }

    /// View the same digest as a reference to a different resource type.
    /// The digest is the identity; the type parameter is only a reading.
    pub fn retype<U>(&self) -> Ref<U> {
        Ref {
            digest: self.digest,
            cached: None,
        }
    }
}

impl<T: Resource> Ref<T> {
    /// Fetch the referenced resource from the cache or the current store.
    pub fn checkout(&self) -> Result<T> {
        if let Some(cached) = &self.cached {
            return Ok(cached.as_ref().clone());
        }
        Store::current()?.checkout(self)
    }

    /// Fetch from an explicit store, bypassing the ambient scope.
    pub fn checkout_in(&self, store: &Store) -> Result<T> {
        if let Some(cached) = &self.cached {
            return Ok(cached.as_ref().clone());
        }
        store.checkout(self)
    }

    /// Check out a mutable clone, run `f` on it, commit the result and
    /// rebind this ref to the new digest. The old version stays in the
    /// store untouched; copies of this ref taken earlier still resolve to
    /// it.
    pub fn modify<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let store = Store::current()?;
        let mut value = self.checkout_in(&store)?;
        let result = f(&mut value);
        *self = store.commit(&value)?;
        Ok(result)
    }

    /// An independent reference with the same digest.
    pub fn deepcopy(&self) -> Self {
        self.clone()
    }
}

impl<T: Clone> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            digest: self.digest,
            cached: self.cached.clone(),
        }
    }
}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl<T> Eq for Ref<T> {}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({})", self.digest)
    }
}

impl<T: Resource> FieldValue for Ref<T> {
    fn into_value(self) -> Value {
        Value::Ref(self.untyped())
    }

    fn from_value(value: Value) -> std::result::Result<Self, crate::error::ResourceError> {
        match value {
            Value::Ref(RefValue { digest }) => Ok(Ref::from_digest(digest)),
            other => Err(crate::error::ResourceError::UnexpectedKind {
                expected: "ref",
                found: other.kind(),
            }),
        }
    }
}

struct StoreInner {
    backend: Box<dyn StorageBackend>,
}

/// A keyed repository of packed resources. Cheap to clone; clones share
/// the backend.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// A store over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::with_backend(InMemoryBackend::new())
    }

    /// A store over a filesystem backend rooted at `root`.
    pub fn file(root: impl Into<std::path::PathBuf>) -> Result<Self> {
        Ok(Self::with_backend(FileBackend::open(root).map_err(Error::Storage)?))
    }

    /// A store over an arbitrary backend.
    pub fn with_backend(backend: impl StorageBackend + 'static) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(backend),
            }),
        }
    }

    /// The store active in the current scope.
    pub fn current() -> Result<Store> {
        context::current_store().ok_or(Error::NoActiveStore)
    }

    /// Run `f` with this store as the current store.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        context::with_store(self.clone(), f)
    }

    /// Drive `fut` with this store as the current store for every poll.
    pub fn scope_async<F: Future>(&self, fut: F) -> impl Future<Output = F::Output> {
        context::TASK_STORE.scope(self.clone(), fut)
    }

    /// Pack, hash and persist a resource; returns a cached reference.
    pub fn commit<T: Resource>(&self, value: &T) -> Result<Ref<T>> {
        let digest = self.commit_dict(&value.to_dict())?;
        Ok(Ref {
            digest,
            cached: Some(Box::new(value.clone())),
        })
    }

    /// Commit the dict form directly, returning the digest.
    pub fn commit_dict(&self, dict: &ResourceDict) -> Result<Digest> {
        let packed = pack::pack(dict)?;
        self.inner.backend.commit(&packed.digest, &packed.bytes)?;
        debug!(digest = %packed.digest, type_key = %dict.type_key(), "committed resource");
        Ok(packed.digest)
    }

    /// Whether the backend holds a digest.
    pub fn has(&self, digest: &Digest) -> Result<bool> {
        Ok(self.inner.backend.has(digest)?)
    }

    /// Retrieve and rebuild a typed resource.
    pub fn checkout<T: Resource>(&self, r: &Ref<T>) -> Result<T> {
        let dict = self.checkout_dict(&r.digest())?;
        Ok(T::from_dict(dict)?)
    }

    /// Retrieve the dict form of a stored resource, verifying integrity
    /// and that every embedded type is known to the registry.
    pub fn checkout_dict(&self, digest: &Digest) -> Result<ResourceDict> {
        let bytes = self
            .inner
            .backend
            .get(digest)?
            .ok_or(Error::NotFound(*digest))?;
        if Digest::of(&bytes) != *digest {
            return Err(StorageError::Corrupt(format!(
                "stored bytes do not hash to {}",
                digest
            ))
            .into());
        }
        let dict = pack::unpack(&bytes)?;
        validate_types(&dict)?;
        Ok(dict)
    }

    /// Async variant of [`commit`](Self::commit) for async backends.
    pub async fn commit_async<T: Resource>(&self, value: &T) -> Result<Ref<T>> {
        let dict = value.to_dict();
        let packed = pack::pack(&dict)?;
        self.inner
            .backend
            .commit_async(&packed.digest, &packed.bytes)
            .await?;
        debug!(digest = %packed.digest, type_key = %dict.type_key(), "committed resource");
        Ok(Ref {
            digest: packed.digest,
            cached: Some(Box::new(value.clone())),
        })
    }

    /// Async variant of [`checkout`](Self::checkout).
    pub async fn checkout_async<T: Resource>(&self, r: &Ref<T>) -> Result<T> {
        let digest = r.digest();
        let bytes = self
            .inner
            .backend
            .get_async(&digest)
            .await?
            .ok_or(Error::NotFound(digest))?;
        if Digest::of(&bytes) != digest {
            return Err(StorageError::Corrupt(format!(
                "stored bytes do not hash to {}",
                digest
            ))
            .into());
        }
        let dict = pack::unpack(&bytes)?;
        validate_types(&dict)?;
        Ok(T::from_dict(dict)?)
    }

    /// The direct-dependency graph of the given roots, breadth-first up to
    /// `max_depth`. A digest maps to `None` when the backend cannot
    /// resolve it.
    pub fn dependency_graph(
        &self,
        roots: &[Digest],
        max_depth: Option<usize>,
    ) -> Result<BTreeMap<Digest, Option<BTreeSet<Digest>>>> {
        let mut graph: BTreeMap<Digest, Option<BTreeSet<Digest>>> = BTreeMap::new();
        let mut queue: VecDeque<(Digest, usize)> = roots.iter().map(|d| (*d, 0)).collect();
        while let Some((digest, depth)) = queue.pop_front() {
            if graph.contains_key(&digest) {
                continue;
            }
            let links = match self.inner.backend.get(&digest)? {
                None => {
                    graph.insert(digest, None);
                    continue;
                }
                Some(bytes) => {
                    let dict = pack::unpack(&bytes)?;
                    let mut links = BTreeSet::new();
                    for (_, value) in dict.fields() {
                        collect_links(value, &mut links);
                    }
                    links
                }
            };
            if max_depth.map_or(true, |limit| depth < limit) {
                for link in &links {
                    queue.push_back((*link, depth + 1));
                }
            }
            graph.insert(digest, Some(links));
        }
        Ok(graph)
    }
}

fn collect_links(value: &Value, out: &mut BTreeSet<Digest>) {
    match value {
        Value::Ref(RefValue { digest }) => {
            out.insert(*digest);
        }
        Value::List(items) => {
            for item in items {
                collect_links(item, out);
            }
        }
        Value::Map(entries) => {
            for entry in entries.values() {
                collect_links(entry, out);
            }
        }
        Value::Resource(dict) => {
            for (_, field) in dict.fields() {
                collect_links(field, out);
            }
        }
        _ => {}
    }
}

/// Check every resource node in a dict against the registry.
fn validate_types(dict: &ResourceDict) -> std::result::Result<(), RegistryError> {
    let type_id = dict.type_key().type_id();
    if !Registry::global().is_registered(&type_id) {
        return Err(RegistryError::UnknownTypeId(type_id.into_string()));
    }
    for (_, value) in dict.fields() {
        validate_value_types(value)?;
    }
    Ok(())
}

fn validate_value_types(value: &Value) -> std::result::Result<(), RegistryError> {
    match value {
        Value::Resource(dict) => validate_types(dict),
        Value::List(items) => items.iter().try_for_each(validate_value_types),
        Value::Map(entries) => entries.values().try_for_each(validate_value_types),
        _ => Ok(()),
    }
}

/// Commit a resource to the current store.
pub fn commit<T: Resource>(value: &T) -> Result<Ref<T>> {
    Store::current()?.commit(value)
}

/// Fetch a reference from the current store.
pub fn checkout<T: Resource>(r: &Ref<T>) -> Result<T> {
    r.checkout()
}
