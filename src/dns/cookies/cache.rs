//! Bounded cache from upstream address to the last accepted COOKIE option.
//!
//! The cache never validates on its own: every reuse re-validates the
//! client-cookie portion under the current (then recent) secret before the
//! cached option is trusted. A hit here only avoids recomputing an
//! identical outbound option and remembers that the peer has already
//! issued us a valid server cookie.

use std::net::SocketAddr;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::CookieError;

/// Maximum total size of a COOKIE option value: 8-octet client cookie plus
/// up to 32 octets of server cookie.
const MAX_COOKIE_OPTION_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey(SocketAddr);

impl From<SocketAddr> for CacheKey {
    fn from(addr: SocketAddr) -> CacheKey {
        CacheKey(addr)
    }
}

pub struct CookieCache {
    inner: Mutex<LruCache<CacheKey, Vec<u8>>>,
    capacity: usize,
}

impl CookieCache {
    pub fn new(capacity: usize) -> CookieCache {
        let capped = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        CookieCache {
            inner: Mutex::new(LruCache::new(capped)),
            capacity: capped.get(),
        }
    }

    /// The capacity this cache was constructed with.
    pub fn capacity_hint(&self) -> usize {
        self.capacity
    }

    /// Latest accepted COOKIE option bytes for this upstream, if any.
    pub fn get(&self, addr: SocketAddr) -> Option<Vec<u8>> {
        self.inner.lock().get(&CacheKey::from(addr)).cloned()
    }

    /// Insert or replace the entry for this upstream.
    pub fn put(&self, addr: SocketAddr, option_bytes: Vec<u8>) -> Result<(), CookieError> {
        if option_bytes.len() > MAX_COOKIE_OPTION_LEN {
            return Err(CookieError::Malformed);
        }
        self.inner.lock().put(CacheKey::from(addr), option_bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("198.51.100.1:{}", port).parse().unwrap()
    }

    #[test]
    fn get_after_put_returns_last_value() {
        let cache = CookieCache::new(4);
        cache.put(addr(53), vec![1; 8]).unwrap();
        cache.put(addr(53), vec![2; 8]).unwrap();
        assert_eq!(cache.get(addr(53)), Some(vec![2; 8]));
    }

    #[test]
    fn put_is_idempotent() {
        let cache = CookieCache::new(4);
        cache.put(addr(53), vec![9; 8]).unwrap();
        cache.put(addr(53), vec![9; 8]).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(addr(53)), Some(vec![9; 8]));
    }

    #[test]
    fn rejects_oversized_option() {
        let cache = CookieCache::new(4);
        assert!(matches!(
            cache.put(addr(53), vec![0; 41]),
            Err(CookieError::Malformed)
        ));
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = CookieCache::new(2);
        cache.put(addr(1), vec![1; 8]).unwrap();
        cache.put(addr(2), vec![2; 8]).unwrap();
        cache.put(addr(3), vec![3; 8]).unwrap();

        assert_eq!(cache.get(addr(1)), None);
        assert_eq!(cache.get(addr(2)), Some(vec![2; 8]));
        assert_eq!(cache.get(addr(3)), Some(vec![3; 8]));
    }

    #[test]
    fn distinct_ports_key_separately() {
        let cache = CookieCache::new(4);
        cache.put(addr(53), vec![1; 8]).unwrap();
        assert_eq!(cache.get(addr(54)), None);
    }
}
