//! Parses and replays a text fixture of NFQUEUE/conntrack/NFLOG events
//! against a [`Dispatcher`], implementing the warehouse-playback contract.
//!
//! Fixture syntax, one event per line, `#` comments and blank lines
//! ignored:
//!
//! ```text
//! PKT ctid=5 mark=0x10000001 proto=6 src=10.0.0.5:54321 dst=93.184.216.34:443 payload_len=40
//! CT NEW ctid=5 mark=0 orig=6|10.0.0.5:54321->93.184.216.34:443 nat=6|10.0.0.5:54321->93.184.216.34:443 c2s=0 s2c=0
//! CT UPDATE ctid=5 mark=16 c2s=120 s2c=340
//! CT DELETE ctid=5 orig=6|10.0.0.5:54321->93.184.216.34:443
//! NETLOG version=4 protocol=6 src=10.0.0.5:1 dst=10.0.0.2:2 mark=0 prefix=test
//! ```

use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::sync::Arc;

use packetd_core::dispatch::conntrack::ConntrackEventKind;
use packetd_core::dispatch::netlogger::NetLogEvent;
use packetd_core::kernel::WarehousePlayback;
use packetd_core::packet::Family;
use packetd_core::tuple::Tuple;
use packetd_core::Dispatcher;

pub struct FixtureDriver {
    dispatcher: Arc<Dispatcher>,
    runtime: Arc<tokio::runtime::Runtime>,
    nf_ctids: std::sync::Mutex<HashSet<u32>>,
    ct_ctids: std::sync::Mutex<HashSet<u32>>,
}

impl FixtureDriver {
    pub fn new(dispatcher: Arc<Dispatcher>, runtime: Arc<tokio::runtime::Runtime>) -> Self {
        FixtureDriver {
            dispatcher,
            runtime,
            nf_ctids: std::sync::Mutex::new(HashSet::new()),
            ct_ctids: std::sync::Mutex::new(HashSet::new()),
        }
    }
}

impl WarehousePlayback for FixtureDriver {
    fn playback_file(&self, path: &str) -> std::io::Result<(HashSet<u32>, HashSet<u32>)> {
        let contents = fs::read_to_string(path)?;
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(e) = self.apply_line(line) {
                log::warn!("fixture line {}: {e}", line_no + 1);
            }
        }
        Ok((
            self.nf_ctids.lock().unwrap().clone(),
            self.ct_ctids.lock().unwrap().clone(),
        ))
    }

    fn cleanup(&self) {
        self.nf_ctids.lock().unwrap().clear();
        self.ct_ctids.lock().unwrap().clear();
    }
}

impl FixtureDriver {
    fn apply_line(&self, line: &str) -> anyhow::Result<()> {
        let mut words = line.split_whitespace();
        let kind = words.next().unwrap_or("");
        match kind {
            "PKT" => self.apply_packet(words),
            "CT" => self.apply_conntrack(words),
            "NETLOG" => self.apply_netlog(words),
            other => anyhow::bail!("unrecognized event kind '{other}'"),
        }
    }

    fn apply_packet<'a>(&self, words: impl Iterator<Item = &'a str>) -> anyhow::Result<()> {
        let fields = parse_fields(words);
        let ctid: u32 = fields.get("ctid").unwrap().parse()?;
        let mark = parse_u32(fields.get("mark").unwrap())?;
        let proto: u8 = fields.get("proto").unwrap().parse()?;
        let (src, sport) = parse_sockaddr(fields.get("src").unwrap())?;
        let (dst, dport) = parse_sockaddr(fields.get("dst").unwrap())?;
        let payload_len: usize = fields.get("payload_len").map(|s| s.parse()).transpose()?.unwrap_or(0);

        let buf = build_ipv4_tcp_packet(src, dst, sport, dport, proto, payload_len);

        self.nf_ctids.lock().unwrap().insert(ctid);
        self.runtime
            .block_on(self.dispatcher.on_packet(ctid, Family::V4, &buf, mark));
        Ok(())
    }

    fn apply_conntrack<'a>(&self, mut words: impl Iterator<Item = &'a str>) -> anyhow::Result<()> {
        let verb = words.next().unwrap_or("");
        let fields = parse_fields(words);
        let ctid: u32 = fields.get("ctid").unwrap().parse()?;

        let event = match verb {
            "NEW" => ConntrackEventKind::New,
            "UPDATE" => ConntrackEventKind::Update,
            "DELETE" => ConntrackEventKind::Delete,
            other => anyhow::bail!("unrecognized conntrack verb '{other}'"),
        };
        let mark = fields.get("mark").map(|s| parse_u32(s)).transpose()?.unwrap_or(0);
        let orig = fields.get("orig").map(|s| parse_tuple(s)).transpose()?.unwrap_or_else(empty_tuple);
        let nat = fields.get("nat").map(|s| parse_tuple(s)).transpose()?.unwrap_or(orig);
        let c2s: u64 = fields.get("c2s").map(|s| s.parse()).transpose()?.unwrap_or(0);
        let s2c: u64 = fields.get("s2c").map(|s| s.parse()).transpose()?.unwrap_or(0);

        self.ct_ctids.lock().unwrap().insert(ctid);
        let result = self
            .runtime
            .block_on(self.dispatcher.on_conntrack(ctid, mark, Family::V4, event, orig, nat, c2s, s2c));
        if let Err(e) = result {
            log::warn!("ctid {ctid}: conntrack {verb} rejected: {e}");
        }
        Ok(())
    }

    fn apply_netlog<'a>(&self, words: impl Iterator<Item = &'a str>) -> anyhow::Result<()> {
        let fields = parse_fields(words);
        let (src_addr, src_port) = parse_sockaddr(fields.get("src").unwrap())?;
        let (dst_addr, dst_port) = parse_sockaddr(fields.get("dst").unwrap())?;
        let event = NetLogEvent {
            version: fields.get("version").unwrap().parse()?,
            protocol: fields.get("protocol").unwrap().parse()?,
            icmp_type: None,
            src_interface: 0,
            dst_interface: 0,
            src_addr: src_addr.into(),
            dst_addr: dst_addr.into(),
            src_port,
            dst_port,
            mark: fields.get("mark").map(|s| parse_u32(s)).transpose()?.unwrap_or(0),
            prefix: fields.get("prefix").cloned().unwrap_or_default(),
        };
        self.runtime.block_on(self.dispatcher.on_netlog(event));
        Ok(())
    }
}

fn parse_fields<'a>(words: impl Iterator<Item = &'a str>) -> std::collections::HashMap<&'a str, String> {
    words
        .filter_map(|w| w.split_once('='))
        .map(|(k, v)| (k, v.to_string()))
        .collect()
}

fn parse_u32(s: &str) -> anyhow::Result<u32> {
    if let Some(hex) = s.strip_prefix("0x") {
        Ok(u32::from_str_radix(hex, 16)?)
    } else {
        Ok(s.parse()?)
    }
}

fn parse_sockaddr(s: &str) -> anyhow::Result<(Ipv4Addr, u16)> {
    let (addr, port) = s.rsplit_once(':').ok_or_else(|| anyhow::anyhow!("expected ip:port, got '{s}'"))?;
    Ok((addr.parse()?, port.parse()?))
}

/// Parses the canonical `proto|cip:cport->sip:sport` form, the same one
/// `Tuple`'s `Display` impl produces.
fn parse_tuple(s: &str) -> anyhow::Result<Tuple> {
    let (proto, rest) = s.split_once('|').ok_or_else(|| anyhow::anyhow!("expected 'proto|...', got '{s}'"))?;
    let (client, server) = rest.split_once("->").ok_or_else(|| anyhow::anyhow!("expected '...->...' , got '{rest}'"))?;
    let (c_addr, c_port) = parse_sockaddr(client)?;
    let (s_addr, s_port) = parse_sockaddr(server)?;
    Ok(Tuple::new(proto.parse()?, c_addr.into(), c_port, s_addr.into(), s_port))
}

fn empty_tuple() -> Tuple {
    Tuple::new(0, Ipv4Addr::UNSPECIFIED.into(), 0, Ipv4Addr::UNSPECIFIED.into(), 0)
}

/// Builds a minimal, well-formed IPv4 TCP packet for replay: valid header,
/// zeroed payload of the requested length.
fn build_ipv4_tcp_packet(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, proto: u8, payload_len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; 40 + payload_len];
    buf[0] = 0x45;
    buf[9] = proto;
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());
    buf[20..22].copy_from_slice(&sport.to_be_bytes());
    buf[22..24].copy_from_slice(&dport.to_be_bytes());
    buf[32] = 5 << 4;
    buf
}
