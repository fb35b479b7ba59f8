//! Prepared statement handles and the per connection statement cache.
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use crate::{
    common::{ByteStr, debug, verbose},
    config::Config,
    postgres::Oid,
};

type AtomicId = AtomicU64;

/// Server side object name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Id(ByteStr);

impl Id {
    pub(crate) fn unnamed() -> Self {
        Self(ByteStr::from_static(""))
    }

    pub(crate) fn next(prefix: &'static str, atomic: &AtomicId) -> Self {
        let id = atomic.fetch_add(1, Ordering::Relaxed);

        let mut b = itoa::Buffer::new();
        let id = b.format(id);
        let mut name = String::with_capacity(prefix.len() + id.len());
        name.push_str(prefix);
        name.push_str(id);

        Self(ByteStr::from(name))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_unnamed(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Id").field(&self.as_str()).finish()
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

macro_rules! delegate {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, PartialEq, Eq, Hash)]
        pub struct $name(Id);

        impl $name {
            pub(crate) fn next() -> Self {
                static ID: AtomicId = AtomicId::new(0);
                Self(Id::next($prefix, &ID))
            }

            pub(crate) fn to_bytestr(&self) -> ByteStr {
                (self.0).0.clone()
            }
        }

        impl std::ops::Deref for $name {
            type Target = Id;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.as_str()).finish()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

delegate!(StatementName, "s");
delegate!(PortalName, "p");

impl PortalName {
    /// The unnamed portal, replaced by the next `Bind`.
    pub(crate) fn unnamed() -> Self {
        Self(Id::unnamed())
    }
}

/// Handle of a server side prepared statement.
///
/// Shared between every execution of the same sql text on one connection.
#[derive(Debug)]
pub struct PreparedStatement {
    sql: ByteStr,
    name: StatementName,
    cached: bool,
    parsed: AtomicBool,
    oids: Mutex<Vec<Oid>>,
}

impl PreparedStatement {
    pub(crate) fn new(sql: ByteStr, cached: bool) -> Self {
        Self {
            sql,
            name: StatementName::next(),
            cached,
            parsed: AtomicBool::new(false),
            oids: Mutex::new(vec![]),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn name(&self) -> &StatementName {
        &self.name
    }

    /// Returns `true` if the handle lives in a [`StatementCache`].
    ///
    /// Non cached statements are closed on the server after use.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Returns `true` if the server is known to have parsed the statement.
    pub fn is_parsed(&self) -> bool {
        self.parsed.load(Ordering::Acquire)
    }

    /// Mark the statement parsed, returns `true` if it was not.
    pub(crate) fn take_parse(&self) -> bool {
        !self.parsed.swap(true, Ordering::AcqRel)
    }

    /// Force the next execution to parse again.
    pub(crate) fn reset_parsed(&self) {
        self.parsed.store(false, Ordering::Release);
    }

    /// Parameter types sent with the last parse.
    pub fn param_oids(&self) -> Vec<Oid> {
        self.oids.lock().clone()
    }

    pub(crate) fn set_param_oids(&self, oids: impl IntoIterator<Item = Oid>) {
        let mut lock = self.oids.lock();
        lock.clear();
        lock.extend(oids);
    }
}

/// Prepared statements of one connection keyed by exact sql text.
///
/// There is no eviction, entries live until [`clear`][StatementCache::clear].
#[derive(Debug)]
pub struct StatementCache {
    enabled: bool,
    statements: RwLock<HashMap<ByteStr, Arc<PreparedStatement>>>,
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StatementCache {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, statements: RwLock::new(HashMap::new()) }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_statements())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the statement handle for `sql`.
    ///
    /// Concurrent calls with the same text observe exactly one handle. When
    /// caching is disabled, every call returns a fresh non cached handle.
    pub fn prepare(&self, sql: &str) -> Arc<PreparedStatement> {
        if !self.enabled {
            return Arc::new(PreparedStatement::new(ByteStr::copy_from_str(sql), false));
        }

        if let Some(stmt) = self.statements.read().get(sql) {
            verbose!(name = %stmt.name, "statement cache hit");
            return stmt.clone();
        }

        let mut lock = self.statements.write();
        lock.entry(ByteStr::copy_from_str(sql))
            .or_insert_with_key(|sql| {
                let stmt = PreparedStatement::new(sql.clone(), true);
                debug!("new prepared statement {}", stmt.name);
                Arc::new(stmt)
            })
            .clone()
    }

    /// Returns the cached handle for `sql` if any.
    pub fn get(&self, sql: &str) -> Option<Arc<PreparedStatement>> {
        self.statements.read().get(sql).cloned()
    }

    pub fn len(&self) -> usize {
        self.statements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.read().is_empty()
    }

    /// Drop every handle, used when the connection closes.
    pub fn clear(&self) {
        self.statements.write().clear();
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Barrier, thread};

    use super::*;

    #[test]
    fn statement_names() {
        let a = StatementName::next();
        let b = StatementName::next();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with('s'));
        assert!(PortalName::next().as_str().starts_with('p'));
        assert!(PortalName::unnamed().is_unnamed());
        assert_eq!(PortalName::unnamed().as_str(), "");
    }

    #[test]
    fn cache_hit() {
        let cache = StatementCache::new(true);
        let a = cache.prepare("SELECT 1");
        let b = cache.prepare("SELECT 1");
        let c = cache.prepare("SELECT 2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert!(a.is_cached());
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
        assert!(!Arc::ptr_eq(&a, &cache.prepare("SELECT 1")));
    }

    #[test]
    fn cache_disabled() {
        let cache = StatementCache::new(false);
        let a = cache.prepare("SELECT 1");
        let b = cache.prepare("SELECT 1");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.name(), b.name());
        assert!(!a.is_cached());
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_prepare() {
        const THREADS: usize = 8;

        let cache = Arc::new(StatementCache::new(true));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles = (0..THREADS)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.prepare("SELECT * FROM foo WHERE id = $1")
                })
            })
            .collect::<Vec<_>>();

        let stmts = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
        assert!(stmts.iter().all(|e| Arc::ptr_eq(e, &stmts[0])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn parse_flag() {
        let stmt = PreparedStatement::new(ByteStr::from_static("SELECT 1"), true);
        assert!(stmt.take_parse());
        assert!(!stmt.take_parse());
        assert!(stmt.is_parsed());
        stmt.reset_parsed();
        assert!(!stmt.is_parsed());
    }
}
