//! Server-side cookie layer: validates an inbound server cookie and
//! attaches a freshly minted one to the response.

use std::net::IpAddr;

use super::algorithms::verify_server_cookie_hash;
use super::wire::{self, NONCE_BLOCK_LEN};
use super::{ip_addr_bytes, CookieContext, CookieMessage, BADCOOKIE};

/// What `on_request` decided, for callers that want to branch on it
/// (metrics, logging) beyond what the mutated response already encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOutcome {
    /// Server cookies are disabled; any COOKIE option was stripped.
    Disabled,
    /// The request carried no COOKIE option at all; nothing changed.
    NoOption,
    /// The COOKIE option was malformed; response RCODE set to FORMERR.
    RejectFormErr,
    /// Accepted (with or without a prior server cookie) and a fresh one
    /// was attached to the response.
    AcceptAndAttach,
    /// The supplied server cookie did not verify; extended RCODE set to
    /// BADCOOKIE and a fresh server cookie was still attached so the
    /// client can retry.
    RejectBadCookie,
}

pub struct ServerCookieLayer;

impl ServerCookieLayer {
    pub fn on_request<Req: CookieMessage, Resp: CookieMessage>(
        ctx: &CookieContext,
        request: &Req,
        response: &mut Resp,
        client_addr: IpAddr,
    ) -> ServerOutcome {
        if !ctx.server_enabled() {
            response.remove_cookie_option();
            return ServerOutcome::Disabled;
        }

        let option_bytes = match request.cookie_option_bytes() {
            None => return ServerOutcome::NoOption,
            Some(bytes) => bytes,
        };

        let decoded = match wire::decode_option(&option_bytes) {
            Ok(decoded) => decoded,
            Err(_) => {
                response.set_rcode_formerr();
                return ServerOutcome::RejectFormErr;
            }
        };

        let client_addr_bytes = ip_addr_bytes(client_addr);
        let mut bad_cookie = false;

        if let Some(supplied) = decoded.server_cookie.as_deref() {
            let verified = Self::verify_against(
                ctx,
                supplied,
                &client_addr_bytes,
                &decoded.client_cookie,
            );
            if !verified {
                bad_cookie = true;
            }
        }
        // Absent server cookie (client-only option, or a pure EDNS-cookie
        // probe per RFC 7873 section 5.4) is accepted unconditionally: the
        // question-count=0 and question-count>0 branches both fall through
        // to attaching a fresh cookie under the default policy.

        Self::attach_fresh_cookie(ctx, response, &client_addr_bytes, &decoded.client_cookie);

        if bad_cookie {
            response.set_ext_rcode(BADCOOKIE);
            ServerOutcome::RejectBadCookie
        } else {
            ServerOutcome::AcceptAndAttach
        }
    }

    fn verify_against(
        ctx: &CookieContext,
        supplied: &[u8],
        client_addr: &[u8],
        client_cookie: &[u8; wire::CLIENT_COOKIE_LEN],
    ) -> bool {
        if supplied.len() != NONCE_BLOCK_LEN + 8 {
            return false;
        }
        let (nonce, time) = match wire::decode_nonce_block(&supplied[..NONCE_BLOCK_LEN]) {
            Ok(parts) => parts,
            Err(_) => return false,
        };
        let hash = &supplied[NONCE_BLOCK_LEN..];

        let matched_current = ctx.server_secrets.with_current(|slot| {
            verify_server_cookie_hash(
                slot.algorithm_id,
                hash,
                client_addr,
                client_cookie,
                Some((nonce, time)),
                slot.secret.as_bytes(),
            )
        });
        if matched_current {
            return true;
        }

        ctx.server_secrets.with_recent(|recent| {
            recent.is_some_and(|slot| {
                verify_server_cookie_hash(
                    slot.algorithm_id,
                    hash,
                    client_addr,
                    client_cookie,
                    Some((nonce, time)),
                    slot.secret.as_bytes(),
                )
            })
        })
    }

    fn attach_fresh_cookie<Resp: CookieMessage>(
        ctx: &CookieContext,
        response: &mut Resp,
        client_addr: &[u8],
        client_cookie: &[u8; wire::CLIENT_COOKIE_LEN],
    ) {
        let nonce = ctx.random.u32_uniform();
        let time = ctx.clock.now_seconds();

        let hash = ctx.server_secrets.with_current(|slot| {
            super::algorithms::compute_server_cookie_hash(
                slot.algorithm_id,
                client_addr,
                client_cookie,
                Some((nonce, time)),
                slot.secret.as_bytes(),
            )
        });

        let mut server_cookie = Vec::with_capacity(NONCE_BLOCK_LEN + 8);
        server_cookie.extend_from_slice(&wire::encode_nonce_block(nonce, time));
        server_cookie.extend_from_slice(&hash);

        if let Ok(option_bytes) = wire::encode_option(client_cookie, Some(&server_cookie)) {
            response.set_cookie_option_bytes(option_bytes);
        }
    }
}
