//! Client-side cookie layer: attaches a client cookie to outbound queries
//! and validates, caches, and reacts to the cookie on the matching inbound
//! response.

use std::net::SocketAddr;

use super::algorithms::verify_client_cookie;
use super::wire::{self, CLIENT_COOKIE_LEN};
use super::{ip_addr_bytes, CookieContext, CookieError, CookieMessage, QueryFlag, QueryPlan, BADCOOKIE};

/// What the caller should do after `on_inbound` ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Nothing cookie-related happened; handle the response normally.
    Continue,
    /// A BADCOOKIE recovery step ran (repeat enqueued or transport
    /// downgraded); the iterator should not also treat this as a normal
    /// answer.
    Consume,
}

pub struct ClientCookieLayer;

impl ClientCookieLayer {
    /// Attach a client cookie (and, if we have one cached, the upstream's
    /// last known server cookie) to an outbound request's COOKIE option.
    ///
    /// No-op if client cookies are disabled, the transport is already
    /// reliable, or the outbound message has no OPT record to attach to
    /// (the latter is the caller's responsibility — this layer only ever
    /// replaces an existing COOKIE option).
    pub fn on_outbound<M: CookieMessage>(
        ctx: &CookieContext,
        request: &mut M,
        upstream_addr: SocketAddr,
        transport_is_reliable: bool,
    ) {
        if !ctx.client_enabled() || transport_is_reliable {
            return;
        }

        let server_addr = ip_addr_bytes(upstream_addr.ip());

        let cc = ctx.client_secrets.with_current(|slot| {
            super::algorithms::compute_client_cookie(
                slot.algorithm_id,
                None,
                Some(&server_addr),
                slot.secret.as_bytes(),
            )
        });

        if let Some(cached) = ctx.cache.get(upstream_addr) {
            if cached.len() >= CLIENT_COOKIE_LEN && cached[..CLIENT_COOKIE_LEN] == cc[..] {
                request.set_cookie_option_bytes(cached);
                return;
            }
        }

        match wire::encode_option(&cc, None) {
            Ok(bytes) => request.set_cookie_option_bytes(bytes),
            Err(_) => request.remove_cookie_option(),
        }
    }

    /// Validate the matching response's cookie, update the per-upstream
    /// cache, and drive the BADCOOKIE recovery state machine.
    pub fn on_inbound<M: CookieMessage, P: QueryPlan>(
        ctx: &CookieContext,
        response: &M,
        upstream_addr: SocketAddr,
        plan: &mut P,
        transport_is_reliable: bool,
    ) -> Result<InboundOutcome, CookieError> {
        if !ctx.client_enabled() || transport_is_reliable {
            return Ok(InboundOutcome::Continue);
        }

        let option_bytes = match response.cookie_option_bytes() {
            None => {
                if ctx.cache.get(upstream_addr).is_some() {
                    return Err(CookieError::CookieExpected);
                }
                return Ok(InboundOutcome::Continue);
            }
            Some(bytes) => bytes,
        };

        let decoded = wire::decode_option(&option_bytes)?;
        let server_addr = ip_addr_bytes(upstream_addr.ip());

        let matched_current = ctx.client_secrets.with_current(|slot| {
            verify_client_cookie(
                slot.algorithm_id,
                &decoded.client_cookie,
                None,
                Some(&server_addr),
                slot.secret.as_bytes(),
            )
        });

        let matched_recent = !matched_current
            && ctx.client_secrets.with_recent(|recent| {
                recent.is_some_and(|slot| {
                    verify_client_cookie(
                        slot.algorithm_id,
                        &decoded.client_cookie,
                        None,
                        Some(&server_addr),
                        slot.secret.as_bytes(),
                    )
                })
            });

        if !matched_current && !matched_recent {
            return Err(CookieError::CookieMismatch);
        }

        if matched_current {
            ctx.cache.put(upstream_addr, option_bytes)?;
        }

        if response.ext_rcode() == BADCOOKIE {
            if !plan.is_flag_set(QueryFlag::BadCookieAgain) {
                plan.enqueue_repeat();
                plan.set_flag(QueryFlag::BadCookieAgain);
            } else {
                plan.clear_flag(QueryFlag::BadCookieAgain);
                plan.set_flag(QueryFlag::UseReliableTransport);
            }
            return Ok(InboundOutcome::Consume);
        }

        Ok(InboundOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::cookies::test_support::{FakeMessage, FakePlan};
    use crate::dns::cookies::CookieContext;

    fn upstream() -> SocketAddr {
        "198.51.100.1:53".parse().unwrap()
    }

    #[test]
    fn on_outbound_sets_client_only_cookie_when_cache_empty() {
        let ctx = CookieContext::new();
        let mut request = FakeMessage::default();
        ClientCookieLayer::on_outbound(&ctx, &mut request, upstream(), false);

        let bytes = request.cookie.expect("cookie set");
        assert_eq!(bytes.len(), CLIENT_COOKIE_LEN);
    }

    #[test]
    fn on_outbound_is_noop_over_reliable_transport() {
        let ctx = CookieContext::new();
        let mut request = FakeMessage::default();
        ClientCookieLayer::on_outbound(&ctx, &mut request, upstream(), true);
        assert!(request.cookie.is_none());
    }

    #[test]
    fn on_outbound_reuses_cached_option_when_client_cookie_matches() {
        let ctx = CookieContext::new();
        let server_addr = ip_addr_bytes(upstream().ip());
        let cc = ctx.client_secrets.with_current(|slot| {
            super::super::algorithms::compute_client_cookie(
                slot.algorithm_id,
                None,
                Some(&server_addr),
                slot.secret.as_bytes(),
            )
        });
        let cached = wire::encode_option(&cc, Some(&[7u8; 8])).unwrap();
        ctx.cache.put(upstream(), cached.clone()).unwrap();

        let mut request = FakeMessage::default();
        ClientCookieLayer::on_outbound(&ctx, &mut request, upstream(), false);
        assert_eq!(request.cookie, Some(cached));
    }

    #[test]
    fn on_inbound_matching_cookie_populates_cache() {
        let ctx = CookieContext::new();
        let server_addr = ip_addr_bytes(upstream().ip());
        let cc = ctx.client_secrets.with_current(|slot| {
            super::super::algorithms::compute_client_cookie(
                slot.algorithm_id,
                None,
                Some(&server_addr),
                slot.secret.as_bytes(),
            )
        });
        let option = wire::encode_option(&cc, Some(&[1u8; 16])).unwrap();

        let mut response = FakeMessage::default();
        response.cookie = Some(option.clone());

        let mut plan = FakePlan::default();
        let outcome =
            ClientCookieLayer::on_inbound(&ctx, &response, upstream(), &mut plan, false).unwrap();

        assert_eq!(outcome, InboundOutcome::Continue);
        assert_eq!(ctx.cache.get(upstream()), Some(option));
        assert_eq!(plan.repeats, 0);
    }

    #[test]
    fn on_inbound_missing_cookie_when_cache_populated_fails() {
        let ctx = CookieContext::new();
        ctx.cache.put(upstream(), vec![9u8; 24]).unwrap();

        let response = FakeMessage::default();
        let mut plan = FakePlan::default();
        let result = ClientCookieLayer::on_inbound(&ctx, &response, upstream(), &mut plan, false);
        assert!(matches!(result, Err(CookieError::CookieExpected)));
    }

    #[test]
    fn on_inbound_bad_cookie_first_time_enqueues_repeat() {
        let ctx = CookieContext::new();
        let server_addr = ip_addr_bytes(upstream().ip());
        let cc = ctx.client_secrets.with_current(|slot| {
            super::super::algorithms::compute_client_cookie(
                slot.algorithm_id,
                None,
                Some(&server_addr),
                slot.secret.as_bytes(),
            )
        });
        let option = wire::encode_option(&cc, Some(&[2u8; 16])).unwrap();

        let mut response = FakeMessage::default();
        response.cookie = Some(option);
        response.ext_rcode = BADCOOKIE;

        let mut plan = FakePlan::default();
        let outcome =
            ClientCookieLayer::on_inbound(&ctx, &response, upstream(), &mut plan, false).unwrap();

        assert_eq!(outcome, InboundOutcome::Consume);
        assert_eq!(plan.repeats, 1);
        assert!(plan.is_flag_set(QueryFlag::BadCookieAgain));
        assert!(!plan.is_flag_set(QueryFlag::UseReliableTransport));
    }

    #[test]
    fn on_inbound_bad_cookie_second_time_downgrades_transport() {
        let ctx = CookieContext::new();
        let server_addr = ip_addr_bytes(upstream().ip());
        let cc = ctx.client_secrets.with_current(|slot| {
            super::super::algorithms::compute_client_cookie(
                slot.algorithm_id,
                None,
                Some(&server_addr),
                slot.secret.as_bytes(),
            )
        });
        let option = wire::encode_option(&cc, Some(&[3u8; 16])).unwrap();

        let mut response = FakeMessage::default();
        response.cookie = Some(option);
        response.ext_rcode = BADCOOKIE;

        let mut plan = FakePlan::default();
        plan.set_flag(QueryFlag::BadCookieAgain);

        let outcome =
            ClientCookieLayer::on_inbound(&ctx, &response, upstream(), &mut plan, false).unwrap();

        assert_eq!(outcome, InboundOutcome::Consume);
        assert_eq!(plan.repeats, 0);
        assert!(!plan.is_flag_set(QueryFlag::BadCookieAgain));
        assert!(plan.is_flag_set(QueryFlag::UseReliableTransport));
    }

    #[test]
    fn on_inbound_wrong_cookie_is_a_mismatch() {
        let ctx = CookieContext::new();
        let option = wire::encode_option(&[0xFFu8; 8], Some(&[4u8; 16])).unwrap();

        let mut response = FakeMessage::default();
        response.cookie = Some(option);

        let mut plan = FakePlan::default();
        let result = ClientCookieLayer::on_inbound(&ctx, &response, upstream(), &mut plan, false);
        assert!(matches!(result, Err(CookieError::CookieMismatch)));
    }
}
