use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// Header fields of an IP packet, enough for a callback to make a decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpView {
    pub version: u8,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: u8,
    /// Offset of the transport header within the payload.
    pub header_len: usize,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl IpView {
    pub fn protocol_name(&self) -> &'static str {
        protocol_name(self.protocol)
    }
}

pub fn protocol_name(protocol: u8) -> &'static str {
    match protocol {
        IPPROTO_ICMP => "ICMP",
        2 => "IGMP",
        IPPROTO_TCP => "TCP",
        IPPROTO_UDP => "UDP",
        47 => "GRE",
        50 => "ESP",
        IPPROTO_ICMPV6 => "ICMPv6",
        132 => "SCTP",
        _ => "Unknown",
    }
}

/// Turns raw payload bytes into a structured view. Advisory only: the queue
/// never consults it.
pub trait PacketDecoder {
    fn decode(&self, payload: &[u8], offset: usize) -> Option<IpView>;
}

// ==========================================
// IPv4 / IPv6 header decoder
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct IpHeaderDecoder;

impl IpHeaderDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_v4(packet: &[u8]) -> Option<IpView> {
        // 1. IPv4 header is at least 20 bytes
        if packet.len() < 20 {
            return None;
        }

        // 2. IHL in 32-bit words
        let ihl = (packet[0] & 0x0F) as usize * 4;
        if ihl < 20 || packet.len() < ihl {
            return None;
        }

        let src = Ipv4Addr::from_bits(u32::from_be_bytes([
            packet[12], packet[13], packet[14], packet[15],
        ]));
        let dst = Ipv4Addr::from_bits(u32::from_be_bytes([
            packet[16], packet[17], packet[18], packet[19],
        ]));

        Some(Self::with_ports(4, src.into(), dst.into(), packet[9], ihl, packet))
    }

    fn decode_v6(packet: &[u8]) -> Option<IpView> {
        // Fixed header only, extension headers are not walked
        if packet.len() < 40 {
            return None;
        }

        let src: [u8; 16] = packet[8..24].try_into().ok()?;
        let dst: [u8; 16] = packet[24..40].try_into().ok()?;

        Some(Self::with_ports(
            6,
            Ipv6Addr::from(src).into(),
            Ipv6Addr::from(dst).into(),
            packet[6],
            40,
            packet,
        ))
    }

    fn with_ports(
        version: u8,
        src: IpAddr,
        dst: IpAddr,
        protocol: u8,
        header_len: usize,
        packet: &[u8],
    ) -> IpView {
        let mut view = IpView {
            version,
            src,
            dst,
            protocol,
            header_len,
            src_port: None,
            dst_port: None,
        };

        // Ports only for TCP and UDP, and only if both fit
        if (protocol == IPPROTO_TCP || protocol == IPPROTO_UDP) && packet.len() >= header_len + 4 {
            view.src_port = Some(u16::from_be_bytes([packet[header_len], packet[header_len + 1]]));
            view.dst_port = Some(u16::from_be_bytes([
                packet[header_len + 2],
                packet[header_len + 3],
            ]));
        }

        view
    }
}

impl PacketDecoder for IpHeaderDecoder {
    fn decode(&self, payload: &[u8], offset: usize) -> Option<IpView> {
        let packet = payload.get(offset..)?;
        match *packet.first()? >> 4 {
            4 => Self::decode_v4(packet),
            6 => Self::decode_v6(packet),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_udp() -> Vec<u8> {
        let mut pkt = vec![
            0x45, 0x00, 0x00, 0x20, // version/ihl, tos, total length 32
            0x00, 0x01, 0x00, 0x00, // id, flags
            0x40, 0x11, 0x00, 0x00, // ttl, proto udp, checksum
            10, 0, 0, 1, // src
            192, 168, 1, 20, // dst
        ];
        pkt.extend_from_slice(&[0x30, 0x39, 0x00, 0x35, 0x00, 0x0c, 0x00, 0x00]);
        pkt.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        pkt
    }

    #[test]
    fn test_decodes_ipv4_udp() {
        let view = IpHeaderDecoder::new().decode(&ipv4_udp(), 0).unwrap();
        assert_eq!(view.version, 4);
        assert_eq!(view.src, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(view.dst, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(view.protocol_name(), "UDP");
        assert_eq!(view.header_len, 20);
        assert_eq!(view.src_port, Some(12345));
        assert_eq!(view.dst_port, Some(53));
    }

    #[test]
    fn test_honours_offset() {
        let mut framed = vec![0xff, 0xff];
        framed.extend(ipv4_udp());
        let view = IpHeaderDecoder::new().decode(&framed, 2).unwrap();
        assert_eq!(view.src, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(IpHeaderDecoder::new().decode(&framed, 100).is_none());
    }

    #[test]
    fn test_rejects_truncated_and_unknown() {
        let pkt = ipv4_udp();
        assert!(IpHeaderDecoder::new().decode(&pkt[..19], 0).is_none());
        assert!(IpHeaderDecoder::new().decode(&[0x20; 40], 0).is_none());
        assert!(IpHeaderDecoder::new().decode(&[], 0).is_none());
    }

    #[test]
    fn test_ports_absent_when_header_only() {
        let mut pkt = ipv4_udp();
        pkt[9] = IPPROTO_TCP;
        pkt.truncate(22);
        let view = IpHeaderDecoder::new().decode(&pkt, 0).unwrap();
        assert_eq!(view.protocol_name(), "TCP");
        assert_eq!(view.src_port, None);
    }

    #[test]
    fn test_decodes_ipv6() {
        let mut pkt = vec![0u8; 48];
        pkt[0] = 0x60;
        pkt[6] = IPPROTO_TCP;
        pkt[8..24].copy_from_slice(&Ipv6Addr::LOCALHOST.octets());
        pkt[24..40].copy_from_slice(&Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1).octets());
        pkt[40..44].copy_from_slice(&[0x01, 0xbb, 0xc3, 0x50]);

        let view = IpHeaderDecoder::new().decode(&pkt, 0).unwrap();
        assert_eq!(view.version, 6);
        assert_eq!(view.src, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(view.src_port, Some(443));
        assert_eq!(view.dst_port, Some(50000));
    }
}
