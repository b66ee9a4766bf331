//! Atlas DNS Server
//!
//! A high-performance, authoritative DNS server implementation in Rust with
//! RFC 7873 DNS Cookies support.
//!
//! # Features
//!
//! * Full DNS protocol support (UDP and TCP)
//! * Recursive and forwarding resolution strategies
//! * Built-in caching with TTL support
//! * Zone file management
//! * Support for common DNS record types (A, AAAA, NS, CNAME, MX, TXT, etc.)
//! * DNS Cookies (RFC 7873): client/server cookie exchange, BADCOOKIE
//!   recovery, per-upstream cookie cache

/// DNS server implementation and protocol handling
pub mod dns;
