//! DNS Cookies (RFC 7873)
//!
//! Makes the resolver a cookie-bearing client toward upstream authoritative
//! servers and a cookie-validating server toward downstream clients. This
//! module covers the cookie engine only: wire codec (`wire`), hash
//! algorithms (`algorithms`), the per-upstream cache (`cache`), secret
//! rotation (`secrets`), and the client/server pipeline hooks (`client`,
//! `server`).
//!
//! EDNS negotiation, long-term key derivation, persistence across restarts,
//! and on-path defenses are all out of scope; those live in the message
//! parser, the resolver iterator and the configuration loader, consumed
//! here only through the small seams below.

pub mod algorithms;
pub mod cache;
pub mod client;
pub mod secrets;
pub mod server;
pub mod wire;

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

pub use algorithms::AlgorithmId;
pub use cache::CookieCache;
pub use client::ClientCookieLayer;
pub use secrets::{Secret, SecretSlot, SecretStore};
pub use server::ServerCookieLayer;
pub use wire::CookieOptionValue;

/// Extended RCODE for BADCOOKIE (RFC 7873 section 8).
pub const BADCOOKIE: u16 = 23;

#[derive(Debug, Display, From, Error)]
pub enum CookieError {
    Malformed,
    CookieMismatch,
    CookieExpected,
    NoSecret,
    OutOfCapacity,
}

type Result<T> = std::result::Result<T, CookieError>;

/// Serialize an address the way the hash constructions in §4.B expect it:
/// 4 octets for IPv4, 16 network-order octets for IPv6. No family tag, no
/// port.
pub(crate) fn ip_addr_bytes(ip: std::net::IpAddr) -> Vec<u8> {
    match ip {
        std::net::IpAddr::V4(v4) => v4.octets().to_vec(),
        std::net::IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Per-query flags the resolver-pipeline iterator exposes to the cookie
/// engine; named exactly as the source tracks them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryFlag {
    BadCookieAgain,
    UseReliableTransport,
}

/// The resolver's retry/transport bookkeeping for the query currently being
/// processed. Implemented by whatever in `crate::dns::resolve` drives
/// retries; the cookie engine never owns this state itself.
pub trait QueryPlan {
    fn enqueue_repeat(&mut self);
    fn is_flag_set(&self, flag: QueryFlag) -> bool;
    fn set_flag(&mut self, flag: QueryFlag);
    fn clear_flag(&mut self, flag: QueryFlag);
}

/// The slice of a DNS message the cookie engine needs to read and mutate:
/// the raw COOKIE option bytes, the extended RCODE, and the question
/// count. Raw bytes rather than a decoded `CookieOptionValue` so the
/// layers own the `Malformed` decision themselves, per the wire codec.
/// Implemented for `crate::dns::edns0::EdnsRecord` paired with the owning
/// packet's header, via the adapters in `crate::dns::edns0`.
pub trait CookieMessage {
    fn cookie_option_bytes(&self) -> Option<Vec<u8>>;
    fn set_cookie_option_bytes(&mut self, bytes: Vec<u8>);
    fn remove_cookie_option(&mut self);
    fn question_count(&self) -> usize;
    fn ext_rcode(&self) -> u16;
    fn set_ext_rcode(&mut self, code: u16);
    fn set_rcode_formerr(&mut self);
}

/// Source of cryptographically-uninteresting randomness for nonces. A
/// trait rather than a bare function so tests can supply deterministic
/// sequences.
pub trait CookieRandom {
    fn u32_uniform(&self) -> u32;
}

/// Wall-clock source for the server-cookie timestamp.
pub trait CookieClock {
    fn now_seconds(&self) -> u32;
}

/// Production randomness: `rand::random`, the same source already used
/// elsewhere in this crate for cookie and transaction id generation.
pub struct SystemRandom;

impl CookieRandom for SystemRandom {
    fn u32_uniform(&self) -> u32 {
        rand::random()
    }
}

/// Production clock: wall-clock seconds since the Unix epoch.
pub struct SystemClock;

impl CookieClock for SystemClock {
    fn now_seconds(&self) -> u32 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

/// One role's (client or server) typed configuration, as consumed from the
/// configuration-document codec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub enabled: bool,
    #[serde(with = "algorithm_id_serde")]
    pub current_alg: AlgorithmId,
    #[serde(with = "serde_bytes_vec")]
    pub current_secret: Vec<u8>,
    #[serde(default, with = "algorithm_id_serde_opt")]
    pub recent_alg: Option<AlgorithmId>,
    #[serde(default, with = "serde_bytes_vec_opt")]
    pub recent_secret: Option<Vec<u8>>,
}

/// The configuration snapshot the core consumes. Produced by an outer
/// layer (JSON config loader, admin RPC); the core never parses a config
/// file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    pub client: RoleConfig,
    pub server: RoleConfig,
    pub cache_capacity: u32,
}

mod algorithm_id_serde {
    use super::AlgorithmId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(alg: &AlgorithmId, s: S) -> Result<S::Ok, S::Error> {
        alg.name().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<AlgorithmId, D::Error> {
        let name = String::deserialize(d)?;
        AlgorithmId::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown cookie algorithm: {name}")))
    }
}

mod algorithm_id_serde_opt {
    use super::AlgorithmId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(alg: &Option<AlgorithmId>, s: S) -> Result<S::Ok, S::Error> {
        alg.map(|a| a.name()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<AlgorithmId>, D::Error> {
        let name: Option<String> = Option::deserialize(d)?;
        match name {
            None => Ok(None),
            Some(name) => AlgorithmId::from_name(&name)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown cookie algorithm: {name}"))),
        }
    }
}

mod serde_bytes_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

mod serde_bytes_vec_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| hex::decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Default per-role state: cookies on, a freshly generated HMAC-SHA256-64
/// secret. Gives the resolver a working cookie engine out of the box,
/// without requiring the admin RPC / config file to run first.
fn default_secret() -> Vec<u8> {
    (0..16).map(|_| rand::random::<u8>()).collect()
}

const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// All per-role state the client and server cookie layers need, held by
/// the resolver engine and passed by reference into every layer callback.
pub struct CookieContext {
    pub client_enabled: std::sync::atomic::AtomicBool,
    pub server_enabled: std::sync::atomic::AtomicBool,
    pub client_secrets: SecretStore,
    pub server_secrets: SecretStore,
    pub cache: CookieCache,
    pub random: SystemRandom,
    pub clock: SystemClock,
}

impl CookieContext {
    pub fn new() -> CookieContext {
        CookieContext {
            client_enabled: std::sync::atomic::AtomicBool::new(true),
            server_enabled: std::sync::atomic::AtomicBool::new(true),
            client_secrets: SecretStore::new(AlgorithmId::HmacSha256_64, default_secret()),
            server_secrets: SecretStore::new(AlgorithmId::HmacSha256_64, default_secret()),
            cache: CookieCache::new(DEFAULT_CACHE_CAPACITY),
            random: SystemRandom,
            clock: SystemClock,
        }
    }

    pub fn client_enabled(&self) -> bool {
        self.client_enabled.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn server_enabled(&self) -> bool {
        self.server_enabled.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Apply a configuration snapshot: install secrets and enable/disable
    /// each role. Cache capacity can only be set at construction time by
    /// the `lru` crate, so a changed `cache_capacity` here is logged and
    /// otherwise ignored rather than silently dropping cached entries.
    pub fn apply_config(&self, config: &CookieConfig) {
        self.client_enabled
            .store(config.client.enabled, std::sync::atomic::Ordering::Release);
        self.server_enabled
            .store(config.server.enabled, std::sync::atomic::Ordering::Release);

        self.client_secrets.install(
            config.client.current_alg,
            config.client.current_secret.clone(),
        );
        self.server_secrets.install(
            config.server.current_alg,
            config.server.current_secret.clone(),
        );

        if config.cache_capacity as usize != self.cache.capacity_hint() {
            log::warn!(
                "cookie cache_capacity change to {} requires a restart to take effect",
                config.cache_capacity
            );
        }
    }
}

impl Default for CookieContext {
    fn default() -> Self {
        CookieContext::new()
    }
}

#[cfg(test)]
pub mod test_support {
    //! Deterministic collaborator stand-ins for unit tests.

    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    pub struct FakeMessage {
        pub cookie: Option<Vec<u8>>,
        pub question_count: usize,
        pub ext_rcode: u16,
        pub formerr: bool,
    }

    impl CookieMessage for FakeMessage {
        fn cookie_option_bytes(&self) -> Option<Vec<u8>> {
            self.cookie.clone()
        }

        fn set_cookie_option_bytes(&mut self, bytes: Vec<u8>) {
            self.cookie = Some(bytes);
        }

        fn remove_cookie_option(&mut self) {
            self.cookie = None;
        }

        fn question_count(&self) -> usize {
            self.question_count
        }

        fn ext_rcode(&self) -> u16 {
            self.ext_rcode
        }

        fn set_ext_rcode(&mut self, code: u16) {
            self.ext_rcode = code;
        }

        fn set_rcode_formerr(&mut self) {
            self.formerr = true;
        }
    }

    #[derive(Default)]
    pub struct FakePlan {
        pub repeats: usize,
        pub flags: HashSet<QueryFlag>,
    }

    impl QueryPlan for FakePlan {
        fn enqueue_repeat(&mut self) {
            self.repeats += 1;
        }

        fn is_flag_set(&self, flag: QueryFlag) -> bool {
            self.flags.contains(&flag)
        }

        fn set_flag(&mut self, flag: QueryFlag) {
            self.flags.insert(flag);
        }

        fn clear_flag(&mut self, flag: QueryFlag) {
            self.flags.remove(&flag);
        }
    }

    pub struct FixedRandom(pub u32);

    impl CookieRandom for FixedRandom {
        fn u32_uniform(&self) -> u32 {
            self.0
        }
    }

    pub struct FixedClock(pub u32);

    impl CookieClock for FixedClock {
        fn now_seconds(&self) -> u32 {
            self.0
        }
    }
}
