use std::env;
use std::net::Ipv4Addr;
use std::sync::Arc;

use getopts::Options;

use atlas::dns::context::{ResolveStrategy, ServerContext};
use atlas::dns::protocol::{DnsRecord, TransientTtl};
use atlas::dns::server::{DnsServer, DnsTcpServer, DnsUdpServer};

fn print_usage(program: &str, opts: Options) {
    let brief = format!("Usage: {} [options]", program);
    print!("{}", opts.usage(&brief));
}

/// Main entry point for the Atlas DNS server
fn main() {
    // Error reporting is opt-in: sentry::init with an empty DSN is a no-op,
    // so deployments that don't set SENTRY_DSN still run normally.
    let _guard = sentry::init(env::var("SENTRY_DSN").unwrap_or_default());

    simple_logger::init().expect("Failed to initialize logger");

    log::info!("Atlas DNS Server starting");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "f",
        "forward-address",
        "Upstream DNS server for forwarding (e.g. 8.8.8.8)",
        "FORWARDIP",
    );
    opts.optopt(
        "j",
        "zones-dir",
        "The directory for the zone files",
        "DIRECTORY",
    );

    let opt_matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(f) => panic!("{}", f.to_string()),
    };

    if opt_matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let mut context = Arc::new(ServerContext::new().expect("Failed to initialize DNS server context"));

    if let Some(ctx) = Arc::get_mut(&mut context) {
        let mut index_rootservers = true;
        if opt_matches.opt_present("f") {
            match opt_matches
                .opt_str("f")
                .and_then(|x| x.parse::<Ipv4Addr>().ok())
            {
                Some(addr) => {
                    ctx.resolve_strategy = ResolveStrategy::Forward {
                        host: addr.to_string(),
                        port: 53,
                    };
                    index_rootservers = false;
                }
                None => {
                    log::info!("Forward address is not a valid IP - disabling forwarding");
                }
            }
        }

        if opt_matches.opt_present("j") {
            log::info!("Zones dir override not supported; using default: {}", ctx.zones_dir);
        }

        match ctx.initialize() {
            Ok(_) => {}
            Err(e) => {
                log::info!("Server failed to initialize: {:?}", e);
                return;
            }
        }

        if index_rootservers {
            let _ = ctx.cache.store(&get_rootservers());
        }
    }

    log::info!("Listening on port {}", context.dns_port);

    // Start DNS servers
    if context.enable_udp {
        let udp_server = DnsUdpServer::new(context.clone(), 20);
        if let Err(e) = udp_server.run_server() {
            log::info!("Failed to bind UDP listener: {:?}", e);
        }
    }

    if context.enable_tcp {
        let tcp_server = DnsTcpServer::new(context.clone(), 20);
        if let Err(e) = tcp_server.run_server() {
            log::info!("Failed to bind TCP listener: {:?}", e);
        }
    }
}

/// Returns the DNS records for all 13 root nameservers
///
/// This function creates NS, A, and AAAA records for the 13 root servers (a-m.root-servers.net)
/// as defined by IANA. These records are essential for DNS resolution when starting from scratch.
fn get_rootservers() -> Vec<DnsRecord> {
    // Root server data: (letter, IPv4, IPv6)
    const ROOT_SERVERS: &[(&str, &str, Option<&str>)] = &[
        ("a", "198.41.0.4", Some("2001:503:ba3e::2:30")),
        ("b", "192.228.79.201", Some("2001:500:84::b")),
        ("c", "192.33.4.12", Some("2001:500:2::c")),
        ("d", "199.7.91.13", Some("2001:500:2d::d")),
        ("e", "192.203.230.10", Some("2001:500:a8::e")),
        ("f", "192.5.5.241", Some("2001:500:2f::f")),
        ("g", "192.112.36.4", None),  // No IPv6 for g.root-servers.net
        ("h", "128.63.2.53", Some("2001:500:1::803f:235")),
        ("i", "192.36.148.17", Some("2001:7fe::53")),
        ("j", "192.58.128.30", Some("2001:503:c27::2:30")),
        ("k", "193.0.14.129", Some("2001:7fd::1")),
        ("l", "199.7.83.42", Some("2001:500:3::42")),
        ("m", "202.12.27.33", Some("2001:dc3::35")),
    ];

    const ROOT_TTL: u32 = 3600000; // 1000 hours
    let mut rootservers = Vec::with_capacity(ROOT_SERVERS.len() * 3);

    for &(letter, ipv4, ipv6_opt) in ROOT_SERVERS {
        let hostname = format!("{}.root-servers.net", letter);

        // Add NS record pointing to this root server
        rootservers.push(DnsRecord::Ns {
            domain: String::new(), // Root domain
            host: hostname.clone(),
            ttl: TransientTtl(ROOT_TTL),
        });

        // Add A (IPv4) record
        rootservers.push(DnsRecord::A {
            domain: hostname.clone(),
            addr: ipv4.parse().expect("Invalid IPv4 address for root server"),
            ttl: TransientTtl(ROOT_TTL),
        });

        // Add AAAA (IPv6) record if available
        if let Some(ipv6) = ipv6_opt {
            rootservers.push(DnsRecord::Aaaa {
                domain: hostname,
                addr: ipv6.parse().expect("Invalid IPv6 address for root server"),
                ttl: TransientTtl(ROOT_TTL),
            });
        }
    }

    rootservers
}
