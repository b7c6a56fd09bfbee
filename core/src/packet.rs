//! Layer-3/layer-4 header parsing.
//!
//! NFQUEUE delivers packets as a raw byte slice beginning at the IP header
//! (no Ethernet framing). Fixed header field offsets are read directly off
//! `&[u8]`; IP option bytes and IPv6 extension headers are skipped by length
//! rather than walked.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

pub const TCP_PROTOCOL: u8 = 6;
pub const UDP_PROTOCOL: u8 = 17;

/// Address family, decoded by the kernel shim and passed alongside the raw
/// packet bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// The result of parsing a raw packet's layer-3/layer-4 headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket<'a> {
    pub family: Family,
    pub protocol: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    /// `0` for non-TCP/UDP protocols.
    pub src_port: u16,
    /// `0` for non-TCP/UDP protocols.
    pub dst_port: u16,
    /// `None` for non-TCP protocols.
    pub tcp_flags: Option<u8>,
    pub payload: &'a [u8],
    /// The whole packet as delivered (IP header onward), kept so a
    /// subscriber can build a reoriented copy without re-parsing.
    raw: &'a [u8],
    addr_offset: usize,
    addr_len: usize,
    l4_offset: usize,
    has_l4_ports: bool,
}

impl<'a> ParsedPacket<'a> {
    /// Returns a copy of the raw packet with the source/destination
    /// addresses and ports swapped so the flow always reads client-to-server,
    /// regardless of which direction this particular packet travelled.
    /// `client_to_server` is the direction of `self` as observed; a `false`
    /// packet is swapped into client-side orientation, a `true` packet is
    /// copied unchanged.
    pub fn client_oriented_copy(&self, client_to_server: bool) -> Vec<u8> {
        let mut buf = self.raw.to_vec();
        if client_to_server {
            return buf;
        }
        let (a, b) = (self.addr_offset, self.addr_offset + self.addr_len);
        let (c, d) = (b, b + self.addr_len);
        swap_ranges(&mut buf, a, b, c, d);
        if self.has_l4_ports {
            let (a, b) = (self.l4_offset, self.l4_offset + 2);
            let (c, d) = (b, b + 2);
            swap_ranges(&mut buf, a, b, c, d);
        }
        buf
    }
}

/// Swaps the two equal-length, non-overlapping byte ranges `[a, b)` and
/// `[c, d)` of `buf` in place.
fn swap_ranges(buf: &mut [u8], a: usize, b: usize, c: usize, d: usize) {
    debug_assert_eq!(b - a, d - c);
    let (left, right) = buf.split_at_mut(c);
    left[a..b].swap_with_slice(&mut right[..d - c]);
}

pub const TCP_FLAG_FIN: u8 = 0x01;
pub const TCP_FLAG_RST: u8 = 0x04;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketParseError {
    #[error("buffer too short for {0} header")]
    TooShort(&'static str),
    #[error("unsupported IP version {0} for declared family")]
    VersionMismatch(u8),
    #[error("source or destination address is loopback")]
    Loopback,
}

/// Parses `buf` as an IPv4 or IPv6 packet per `family`. Loopback addresses
/// are rejected; callers log a warning and accept the packet unprocessed.
pub fn parse_layers(buf: &[u8], family: Family) -> Result<ParsedPacket<'_>, PacketParseError> {
    let (protocol, src, dst, l4_offset) = match family {
        Family::V4 => parse_ipv4(buf)?,
        Family::V6 => parse_ipv6(buf)?,
    };

    if src.is_loopback() || dst.is_loopback() {
        return Err(PacketParseError::Loopback);
    }

    let l4 = buf.get(l4_offset..).unwrap_or(&[]);
    let has_l4_ports = matches!(protocol, TCP_PROTOCOL | UDP_PROTOCOL);
    let (src_port, dst_port, tcp_flags, payload) = match protocol {
        TCP_PROTOCOL => {
            let (sp, dp, flags, payload) = parse_tcp_ports(l4)?;
            (sp, dp, Some(flags), payload)
        }
        UDP_PROTOCOL => {
            let (sp, dp, payload) = parse_udp_ports(l4)?;
            (sp, dp, None, payload)
        }
        _ => (0, 0, None, l4),
    };

    let (addr_offset, addr_len) = match family {
        Family::V4 => (12, 4),
        Family::V6 => (8, 16),
    };

    Ok(ParsedPacket {
        family,
        protocol,
        src,
        dst,
        src_port,
        dst_port,
        tcp_flags,
        payload,
        raw: buf,
        addr_offset,
        addr_len,
        l4_offset,
        has_l4_ports,
    })
}

fn parse_ipv4(buf: &[u8]) -> Result<(u8, IpAddr, IpAddr, usize), PacketParseError> {
    if buf.len() < 20 {
        return Err(PacketParseError::TooShort("ipv4"));
    }
    let version = buf[0] >> 4;
    if version != 4 {
        return Err(PacketParseError::VersionMismatch(version));
    }
    let ihl = (buf[0] & 0x0f) as usize * 4;
    if buf.len() < ihl {
        return Err(PacketParseError::TooShort("ipv4 options"));
    }
    let protocol = buf[9];
    let src = Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]);
    let dst = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);
    Ok((protocol, IpAddr::V4(src), IpAddr::V4(dst), ihl.max(20)))
}

fn parse_ipv6(buf: &[u8]) -> Result<(u8, IpAddr, IpAddr, usize), PacketParseError> {
    const FIXED_HEADER_LEN: usize = 40;
    if buf.len() < FIXED_HEADER_LEN {
        return Err(PacketParseError::TooShort("ipv6"));
    }
    let version = buf[0] >> 4;
    if version != 6 {
        return Err(PacketParseError::VersionMismatch(version));
    }
    let next_header = buf[6];
    let mut src = [0u8; 16];
    src.copy_from_slice(&buf[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&buf[24..40]);
    Ok((
        next_header,
        IpAddr::V6(Ipv6Addr::from(src)),
        IpAddr::V6(Ipv6Addr::from(dst)),
        FIXED_HEADER_LEN,
    ))
}

fn parse_tcp_ports(buf: &[u8]) -> Result<(u16, u16, u8, &[u8]), PacketParseError> {
    if buf.len() < 20 {
        return Err(PacketParseError::TooShort("tcp"));
    }
    let src_port = u16::from_be_bytes([buf[0], buf[1]]);
    let dst_port = u16::from_be_bytes([buf[2], buf[3]]);
    let flags = buf[13];
    let data_offset = (buf[12] >> 4) as usize * 4;
    let payload = buf.get(data_offset.max(20)..).unwrap_or(&[]);
    Ok((src_port, dst_port, flags, payload))
}

fn parse_udp_ports(buf: &[u8]) -> Result<(u16, u16, &[u8]), PacketParseError> {
    if buf.len() < 8 {
        return Err(PacketParseError::TooShort("udp"));
    }
    let src_port = u16::from_be_bytes([buf[0], buf[1]]);
    let dst_port = u16::from_be_bytes([buf[2], buf[3]]);
    Ok((src_port, dst_port, &buf[8..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_tcp_packet(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> Vec<u8> {
        ipv4_tcp_packet_with_flags(src, dst, sport, dport, 0)
    }

    fn ipv4_tcp_packet_with_flags(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        flags: u8,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; 40];
        buf[0] = 0x45; // version 4, ihl 5
        buf[9] = TCP_PROTOCOL;
        buf[12..16].copy_from_slice(&src);
        buf[16..20].copy_from_slice(&dst);
        buf[20..22].copy_from_slice(&sport.to_be_bytes());
        buf[22..24].copy_from_slice(&dport.to_be_bytes());
        buf[32] = 5 << 4; // data offset 5 words = 20 bytes
        buf[33] = flags;
        buf
    }

    #[test]
    fn parses_ipv4_tcp_tuple() {
        let buf = ipv4_tcp_packet([10, 0, 0, 5], [93, 184, 216, 34], 54321, 443);
        let parsed = parse_layers(&buf, Family::V4).unwrap();
        assert_eq!(parsed.protocol, TCP_PROTOCOL);
        assert_eq!(parsed.src, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(parsed.src_port, 54321);
        assert_eq!(parsed.dst_port, 443);
        assert_eq!(parsed.tcp_flags, Some(0));
    }

    #[test]
    fn captures_rst_flag() {
        let buf = ipv4_tcp_packet_with_flags([10, 0, 0, 5], [93, 184, 216, 34], 1, 2, TCP_FLAG_RST);
        let parsed = parse_layers(&buf, Family::V4).unwrap();
        assert_eq!(parsed.tcp_flags.unwrap() & TCP_FLAG_RST, TCP_FLAG_RST);
    }

    #[test]
    fn rejects_loopback() {
        let buf = ipv4_tcp_packet([127, 0, 0, 1], [93, 184, 216, 34], 1, 2);
        assert_eq!(parse_layers(&buf, Family::V4), Err(PacketParseError::Loopback));
    }

    #[test]
    fn too_short_buffer_is_rejected() {
        let buf = vec![0x45u8; 10];
        assert!(matches!(
            parse_layers(&buf, Family::V4),
            Err(PacketParseError::TooShort(_))
        ));
    }

    #[test]
    fn client_to_server_copy_is_unchanged() {
        let buf = ipv4_tcp_packet([10, 0, 0, 5], [93, 184, 216, 34], 54321, 443);
        let parsed = parse_layers(&buf, Family::V4).unwrap();
        assert_eq!(parsed.client_oriented_copy(true), buf);
    }

    #[test]
    fn server_to_client_copy_is_reoriented() {
        // The packet as captured travels server -> client; the reoriented
        // copy must read as if it were client -> server.
        let buf = ipv4_tcp_packet([93, 184, 216, 34], [10, 0, 0, 5], 443, 54321);
        let parsed = parse_layers(&buf, Family::V4).unwrap();
        let oriented = parsed.client_oriented_copy(false);

        let reparsed = parse_layers(&oriented, Family::V4).unwrap();
        assert_eq!(reparsed.src, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(reparsed.dst, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
        assert_eq!(reparsed.src_port, 54321);
        assert_eq!(reparsed.dst_port, 443);
        // The copy is independent; the original packet is untouched.
        assert_eq!(parsed.src, IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)));
    }
}
