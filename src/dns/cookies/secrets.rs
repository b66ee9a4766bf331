//! Two-slot secret rotation for a single role (client or server).
//!
//! `install` keeps at most two secrets alive per role: `current` and
//! `recent`. Rotating drops whatever was in `recent`, demotes `current`
//! into it, and installs the new secret as `current`. This gives cookies
//! minted just before a rollover one more rotation's worth of validity.

use parking_lot::RwLock;
use ring::constant_time::verify_slices_are_equal;

use super::algorithms::AlgorithmId;

/// An opaque secret with constant-time equality.
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Secret {
        Secret(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && verify_slices_are_equal(&self.0, &other.0).is_ok()
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({} bytes)", self.0.len())
    }
}

/// A secret paired with the algorithm it was installed to be used with.
#[derive(Clone, Debug)]
pub struct SecretSlot {
    pub algorithm_id: AlgorithmId,
    pub secret: Secret,
}

struct SecretPair {
    current: SecretSlot,
    recent: Option<SecretSlot>,
}

/// Atomically-rotated {current, recent} secret pair for one role.
pub struct SecretStore {
    inner: RwLock<SecretPair>,
}

impl SecretStore {
    pub fn new(algorithm_id: AlgorithmId, secret: Vec<u8>) -> SecretStore {
        SecretStore {
            inner: RwLock::new(SecretPair {
                current: SecretSlot {
                    algorithm_id,
                    secret: Secret::new(secret),
                },
                recent: None,
            }),
        }
    }

    /// Install a new secret. If it is identical (by algorithm and bytes) to
    /// the current secret, this is a no-op; otherwise `current` is demoted
    /// to `recent` and the new secret takes its place.
    pub fn install(&self, algorithm_id: AlgorithmId, secret: Vec<u8>) {
        let new_secret = Secret::new(secret);

        let mut pair = self.inner.write();
        if pair.current.algorithm_id == algorithm_id && pair.current.secret == new_secret {
            return;
        }

        let previous_current = std::mem::replace(
            &mut pair.current,
            SecretSlot {
                algorithm_id,
                secret: new_secret,
            },
        );
        pair.recent = Some(previous_current);
    }

    pub fn with_current<R>(&self, f: impl FnOnce(&SecretSlot) -> R) -> R {
        let pair = self.inner.read();
        f(&pair.current)
    }

    pub fn with_recent<R>(&self, f: impl FnOnce(Option<&SecretSlot>) -> R) -> R {
        let pair = self.inner.read();
        f(pair.recent.as_ref())
    }
}
