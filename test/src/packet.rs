use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::udp::MutableUdpPacket;
use pnet::packet::Packet;
use std::net::Ipv4Addr;

/// Offset of the protocol byte in an IPv4 header.
pub const PROTO_OFFSET: usize = 9;
/// Offset of the source address in an IPv4 header.
pub const SRC_OFFSET: usize = 12;
/// Offset of the destination address in an IPv4 header.
pub const DST_OFFSET: usize = 16;
/// Offset of the destination port right after an option-less IPv4 header.
pub const DPORT_OFFSET: usize = 22;

pub fn v4<'a>(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    proto: IpNextHeaderProtocol,
    payload: &[u8],
    data: &'a mut [u8],
) -> MutableIpv4Packet<'a> {
    data.fill(0);

    let mut pkt = MutableIpv4Packet::new(data).unwrap();
    pkt.set_version(4);
    pkt.set_header_length(5);
    pkt.set_ttl(64);
    pkt.set_next_level_protocol(proto);
    pkt.set_source(src);
    pkt.set_destination(dst);
    pkt.set_total_length(20 + payload.len() as u16);
    pkt.set_payload(payload);
    pkt
}

/// An IPv4/TCP packet with an empty TCP payload.
pub fn tcp(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16) -> Vec<u8> {
    let mut seg = [0u8; 20];
    let mut t = MutableTcpPacket::new(&mut seg).unwrap();
    t.set_source(sport);
    t.set_destination(dport);
    t.set_data_offset(5);

    let mut data = vec![0u8; 40];
    v4(src, dst, IpNextHeaderProtocols::Tcp, &seg, &mut data)
        .packet()
        .to_vec()
}

/// An IPv4/UDP packet carrying `payload`.
pub fn udp(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut dgram = vec![0u8; 8 + payload.len()];
    let mut u = MutableUdpPacket::new(&mut dgram).unwrap();
    u.set_source(sport);
    u.set_destination(dport);
    u.set_length(8 + payload.len() as u16);
    u.set_payload(payload);

    let mut data = vec![0u8; 20 + dgram.len()];
    v4(src, dst, IpNextHeaderProtocols::Udp, &dgram, &mut data)
        .packet()
        .to_vec()
}

/// An IPv4 packet carrying an all-zero 8 byte ICMP header.
pub fn icmp(src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
    let mut data = vec![0u8; 28];
    v4(src, dst, IpNextHeaderProtocols::Icmp, &[0u8; 8], &mut data)
        .packet()
        .to_vec()
}
