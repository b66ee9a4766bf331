//! Hash algorithms and registry for client and server cookie construction.
//!
//! Two families are supported, each producing an 8-octet output: a
//! hand-rolled FNV-1a 64 and a HMAC-SHA256 truncated to its leading 8
//! octets. Dispatch is a closed tagged enum rather than a function-pointer
//! table, since there are exactly two algorithms and they are unlikely to
//! grow without a wire-format change anyway.

use hmac::{Hmac, Mac};
use ring::constant_time::verify_slices_are_equal;
use sha2::Sha256;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Identifies one of the two cookie hash algorithm families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmId {
    Fnv64,
    HmacSha256_64,
}

impl AlgorithmId {
    pub fn name(&self) -> &'static str {
        match self {
            AlgorithmId::Fnv64 => "FNV-64",
            AlgorithmId::HmacSha256_64 => "HMAC-SHA256-64",
        }
    }

    pub fn from_name(name: &str) -> Option<AlgorithmId> {
        match name {
            "FNV-64" => Some(AlgorithmId::Fnv64),
            "HMAC-SHA256-64" => Some(AlgorithmId::HmacSha256_64),
            _ => None,
        }
    }

    /// All algorithms known to the registry, by id.
    pub fn all() -> &'static [AlgorithmId] {
        &[AlgorithmId::Fnv64, AlgorithmId::HmacSha256_64]
    }
}

fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn truncate8(digest: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn hmac_sha256(secret: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(data);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

/// Compute a client cookie. At least one of `client_addr`/`server_addr` must
/// be present; the caller is responsible for supplying at least one.
pub fn compute_client_cookie(
    alg: AlgorithmId,
    client_addr: Option<&[u8]>,
    server_addr: Option<&[u8]>,
    secret: &[u8],
) -> [u8; 8] {
    debug_assert!(client_addr.is_some() || server_addr.is_some());

    match alg {
        AlgorithmId::Fnv64 => {
            let mut input = Vec::with_capacity(32 + secret.len());
            if let Some(a) = client_addr {
                input.extend_from_slice(a);
            }
            if let Some(a) = server_addr {
                input.extend_from_slice(a);
            }
            input.extend_from_slice(secret);
            fnv1a_64(&input).to_be_bytes()
        }
        AlgorithmId::HmacSha256_64 => {
            let mut input = Vec::with_capacity(32);
            if let Some(a) = client_addr {
                input.extend_from_slice(a);
            }
            if let Some(a) = server_addr {
                input.extend_from_slice(a);
            }
            truncate8(&hmac_sha256(secret, &input))
        }
    }
}

pub fn verify_client_cookie(
    alg: AlgorithmId,
    expected: &[u8; 8],
    client_addr: Option<&[u8]>,
    server_addr: Option<&[u8]>,
    secret: &[u8],
) -> bool {
    let computed = compute_client_cookie(alg, client_addr, server_addr, secret);
    verify_slices_are_equal(expected, &computed).is_ok()
}

/// Compute a server cookie hash. `nonce_time` is `Some` for the "full" shape
/// (required for every hash this resolver emits as a server) and `None` for
/// the "simple" shape used only when verifying certain peer replies.
pub fn compute_server_cookie_hash(
    alg: AlgorithmId,
    client_addr: &[u8],
    client_cookie: &[u8; 8],
    nonce_time: Option<(u32, u32)>,
    secret: &[u8],
) -> [u8; 8] {
    match alg {
        AlgorithmId::Fnv64 => {
            let mut input = Vec::with_capacity(16 + client_addr.len() + secret.len());
            input.extend_from_slice(client_addr);
            if let Some((nonce, time)) = nonce_time {
                input.extend_from_slice(&nonce.to_be_bytes());
                input.extend_from_slice(&time.to_be_bytes());
            }
            input.extend_from_slice(client_cookie);
            input.extend_from_slice(secret);
            fnv1a_64(&input).to_be_bytes()
        }
        AlgorithmId::HmacSha256_64 => {
            let mut input = Vec::with_capacity(16 + client_addr.len());
            input.extend_from_slice(client_cookie);
            if let Some((nonce, time)) = nonce_time {
                input.extend_from_slice(&nonce.to_be_bytes());
                input.extend_from_slice(&time.to_be_bytes());
            }
            input.extend_from_slice(client_addr);
            truncate8(&hmac_sha256(secret, &input))
        }
    }
}

pub fn verify_server_cookie_hash(
    alg: AlgorithmId,
    expected: &[u8],
    client_addr: &[u8],
    client_cookie: &[u8; 8],
    nonce_time: Option<(u32, u32)>,
    secret: &[u8],
) -> bool {
    if expected.len() != 8 {
        return false;
    }
    let computed = compute_server_cookie_hash(alg, client_addr, client_cookie, nonce_time, secret);
    verify_slices_are_equal(expected, &computed).is_ok()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn round_trip_holds_for_any_input(
            addr in prop::collection::vec(any::<u8>(), 4..=16),
            secret in prop::collection::vec(any::<u8>(), 1..=64),
        ) {
            for alg in AlgorithmId::all() {
                let cc = compute_client_cookie(*alg, None, Some(&addr), &secret);
                prop_assert!(verify_client_cookie(*alg, &cc, None, Some(&addr), &secret));
            }
        }

        #[test]
        fn distinct_addresses_usually_differ(
            addr_a in prop::collection::vec(any::<u8>(), 4..=16),
            addr_b in prop::collection::vec(any::<u8>(), 4..=16),
            secret in prop::collection::vec(any::<u8>(), 1..=64),
        ) {
            prop_assume!(addr_a != addr_b);
            for alg in AlgorithmId::all() {
                let cc_a = compute_client_cookie(*alg, None, Some(&addr_a), &secret);
                let cc_b = compute_client_cookie(*alg, None, Some(&addr_b), &secret);
                prop_assert_ne!(cc_a, cc_b);
            }
        }

        #[test]
        fn codec_symmetry(
            cc in prop::array::uniform8(any::<u8>()),
            sc_len in prop::sample::select(vec![0usize, 8, 16, 24, 32]),
        ) {
            let sc = if sc_len == 0 { None } else { Some(vec![0xABu8; sc_len]) };
            let encoded = super::super::wire::encode_option(&cc, sc.as_deref()).unwrap();
            let decoded = super::super::wire::decode_option(&encoded).unwrap();
            prop_assert_eq!(decoded.client_cookie, cc);
            prop_assert_eq!(decoded.server_cookie, sc);
        }
    }
}
