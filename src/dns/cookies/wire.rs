//! Wire codec for the EDNS COOKIE option value and its nonce block.
//!
//! The option value is always 8, 16, 24 or 32 octets: 8 octets of client
//! cookie optionally followed by 8-32 octets of server cookie. Everything
//! else is `Malformed`.

use super::CookieError;

pub const CLIENT_COOKIE_LEN: usize = 8;
pub const NONCE_BLOCK_LEN: usize = 8;
const VALID_SERVER_COOKIE_LENS: [usize; 4] = [8, 16, 24, 32];

/// A decoded COOKIE option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptionValue {
    pub client_cookie: [u8; CLIENT_COOKIE_LEN],
    pub server_cookie: Option<Vec<u8>>,
}

fn is_valid_server_cookie_len(len: usize) -> bool {
    VALID_SERVER_COOKIE_LENS.contains(&len)
}

/// Encode a COOKIE option value from its parts.
pub fn encode_option(
    client_cookie: &[u8; CLIENT_COOKIE_LEN],
    server_cookie: Option<&[u8]>,
) -> Result<Vec<u8>, CookieError> {
    if let Some(sc) = server_cookie {
        if !is_valid_server_cookie_len(sc.len()) {
            return Err(CookieError::Malformed);
        }
    }

    let mut out = Vec::with_capacity(CLIENT_COOKIE_LEN + server_cookie.map_or(0, <[u8]>::len));
    out.extend_from_slice(client_cookie);
    if let Some(sc) = server_cookie {
        out.extend_from_slice(sc);
    }
    Ok(out)
}

/// Decode a COOKIE option value into its parts.
pub fn decode_option(bytes: &[u8]) -> Result<CookieOptionValue, CookieError> {
    let total = bytes.len();
    if total != CLIENT_COOKIE_LEN && !is_valid_server_cookie_len(total) {
        return Err(CookieError::Malformed);
    }

    let mut client_cookie = [0u8; CLIENT_COOKIE_LEN];
    client_cookie.copy_from_slice(&bytes[..CLIENT_COOKIE_LEN]);

    let server_cookie = if total > CLIENT_COOKIE_LEN {
        Some(bytes[CLIENT_COOKIE_LEN..].to_vec())
    } else {
        None
    };

    Ok(CookieOptionValue {
        client_cookie,
        server_cookie,
    })
}

/// Encode the 4-octet nonce + 4-octet timestamp block of a full-shape server cookie.
pub fn encode_nonce_block(rand: u32, time: u32) -> [u8; NONCE_BLOCK_LEN] {
    let mut block = [0u8; NONCE_BLOCK_LEN];
    block[0..4].copy_from_slice(&rand.to_be_bytes());
    block[4..8].copy_from_slice(&time.to_be_bytes());
    block
}

/// Decode a nonce+timestamp block.
pub fn decode_nonce_block(bytes: &[u8]) -> Result<(u32, u32), CookieError> {
    if bytes.len() != NONCE_BLOCK_LEN {
        return Err(CookieError::Malformed);
    }
    let rand = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let time = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Ok((rand, time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_client_only() {
        let cc = [1, 2, 3, 4, 5, 6, 7, 8];
        let encoded = encode_option(&cc, None).unwrap();
        assert_eq!(encoded.len(), 8);

        let decoded = decode_option(&encoded).unwrap();
        assert_eq!(decoded.client_cookie, cc);
        assert_eq!(decoded.server_cookie, None);
    }

    #[test]
    fn encode_decode_with_server_cookie() {
        let cc = [0u8; 8];
        for len in [8usize, 16, 24, 32] {
            let sc = vec![0xAAu8; len];
            let encoded = encode_option(&cc, Some(&sc)).unwrap();
            assert_eq!(encoded.len(), 8 + len);

            let decoded = decode_option(&encoded).unwrap();
            assert_eq!(decoded.server_cookie.as_deref(), Some(sc.as_slice()));
        }
    }

    #[test]
    fn rejects_invalid_server_cookie_length() {
        let cc = [0u8; 8];
        assert!(matches!(
            encode_option(&cc, Some(&[0u8; 10])),
            Err(CookieError::Malformed)
        ));
        assert!(matches!(
            decode_option(&[0u8; 10]),
            Err(CookieError::Malformed)
        ));
    }

    #[test]
    fn nonce_block_roundtrip() {
        let block = encode_nonce_block(0xdead_beef, 0x0102_0304);
        let (rand, time) = decode_nonce_block(&block).unwrap();
        assert_eq!(rand, 0xdead_beef);
        assert_eq!(time, 0x0102_0304);
    }

    #[test]
    fn nonce_block_rejects_wrong_length() {
        assert!(matches!(
            decode_nonce_block(&[0u8; 7]),
            Err(CookieError::Malformed)
        ));
    }
}
