use crate::logger::test_logger;
use crate::packet::{self, DPORT_OFFSET, PROTO_OFFSET, SRC_OFFSET};
use flowrs::{
    AnnotatedPacket, FcbPool, FieldWidth, FlowClassificationTable, FlowLevel, FlowNodeData,
    LeafId, LeafPool, NodeId, TableConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slog::info;
use std::collections::HashMap;
use std::net::Ipv4Addr;

const PAYLOAD: usize = 16;

/// protocol (array) -> TCP source address (dynamic hash) -> new flow
fn proto_src_table(pool: FcbPool) -> anyhow::Result<(FlowClassificationTable, NodeId)> {
    let mut t = FlowClassificationTable::new(pool, test_logger());
    let root = t.new_node(FlowLevel::generic8(PROTO_OFFSET, 0xff));
    let src = t.new_node(FlowLevel::generic32(SRC_OFFSET, 0xffff_ffff).with_dynamic());
    let template = t.new_leaf(b"fresh")?;
    t.set_default(src, template.into())?;
    t.add_node(root, FlowNodeData(6), src)?;
    t.set_root(root)?;
    Ok((t, src))
}

fn tcp_from(src: Ipv4Addr) -> Vec<u8> {
    packet::tcp(src, Ipv4Addr::new(192, 168, 0, 1), 40000, 80)
}

#[test]
fn protocol_then_source_address() -> anyhow::Result<()> {
    let (mut t, src) = proto_src_table(FcbPool::new(PAYLOAD))?;
    let root = t.get_root().unwrap();
    assert_eq!(t.node(root).unwrap().name(), "ARRAY-256");
    assert_eq!(t.node(src).unwrap().name(), "HASH-256");

    let a = tcp_from(Ipv4Addr::new(10, 0, 0, 1));
    let b = tcp_from(Ipv4Addr::new(10, 0, 0, 2));

    let l1 = t.match_packet(&a, false).unwrap();
    let l2 = t.match_packet(&b, false).unwrap();
    let l3 = t.match_packet(&a, false).unwrap();
    assert_ne!(l1, l2);
    assert_eq!(l1, l3);
    assert_eq!(t.get_num(src), Some(2));
    assert_eq!(t.data_of(l1.into()), FlowNodeData(0x0a00_0001));
    assert_eq!(&t.leaf(l2).unwrap().payload()[..5], b"fresh");

    info!(t.log(), "{}", t.dump());
    assert!(t.check());
    Ok(())
}

#[test]
fn static_paths_are_deterministic() -> anyhow::Result<()> {
    let mut t = FlowClassificationTable::new(FcbPool::new(PAYLOAD), test_logger());
    let root = t.new_node(FlowLevel::generic8(PROTO_OFFSET, 0xff));
    let ports = t.new_node(FlowLevel::generic16(DPORT_OFFSET, 0xffff));
    let web = t.new_leaf(b"web")?;
    let rest = t.new_leaf(b"rest")?;
    t.add_leaf(ports, FlowNodeData(80), web)?;
    t.set_default(ports, rest.into())?;
    t.add_node(root, FlowNodeData(6), ports)?;
    t.set_root(root)?;

    // same keys at every level, everything else different
    let x = packet::tcp(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 9, 9, 9), 1234, 80);
    let y = packet::tcp(Ipv4Addr::new(172, 16, 0, 7), Ipv4Addr::new(8, 8, 8, 8), 5555, 80);
    assert_eq!(t.match_packet(&x, false), Some(web));
    assert_eq!(t.match_packet(&y, false), Some(web));

    // non-dynamic default is shared by every other port
    let s = packet::tcp(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 9, 9, 9), 1234, 22);
    let h = packet::tcp(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 9, 9, 9), 1234, 443);
    assert_eq!(t.match_packet(&s, false), Some(rest));
    assert_eq!(t.match_packet(&h, false), Some(rest));
    let live = t.pool().live();

    // unless every level is asked to duplicate
    let ds = t.match_packet(&s, true).unwrap();
    let dh = t.match_packet(&h, true).unwrap();
    assert_ne!(ds, rest);
    assert_ne!(ds, dh);
    assert_eq!(t.pool().live(), live + 2);
    assert_eq!(t.match_packet(&s, false), Some(ds));
    assert_eq!(&t.leaf(ds).unwrap().payload()[..4], b"rest");
    assert!(t.check());
    Ok(())
}

#[test]
fn no_default_fails_closed() -> anyhow::Result<()> {
    let (mut t, _) = proto_src_table(FcbPool::new(PAYLOAD))?;
    let live = t.pool().live();
    let u = packet::udp(
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
        53,
        53,
        b"query",
    );
    assert_eq!(t.match_packet(&u, false), None);
    assert_eq!(t.match_packet(&u, true), None);
    assert_eq!(t.pool().live(), live);

    let mut empty = FlowClassificationTable::new(FcbPool::new(0), test_logger());
    assert_eq!(empty.match_packet(&u, false), None);
    Ok(())
}

#[test]
fn reverse_match_agrees_with_match() -> anyhow::Result<()> {
    let (mut t, _) = proto_src_table(FcbPool::new(PAYLOAD))?;
    let mut rng = StdRng::seed_from_u64(7);
    let mut flows: Vec<(Vec<u8>, LeafId)> = Vec::new();
    for _ in 0..200 {
        let p = tcp_from(Ipv4Addr::from(rng.random::<u32>()));
        let l = t.match_packet(&p, false).unwrap();
        flows.push((p, l));
    }
    for (p, l) in &flows {
        assert!(t.reverse_match(*l, p));
        assert_eq!(t.match_packet(p, false), Some(*l));
    }

    let (p0, l0) = &flows[0];
    let (p1, l1) = &flows[1];
    if l0 != l1 {
        assert!(!t.reverse_match(*l0, p1));
        assert!(!t.reverse_match(*l1, p0));
    }

    // a packet that has no path matches no leaf
    let u = packet::udp(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), 1, 2, b"");
    assert!(!t.reverse_match(*l0, &u));

    // stale after teardown
    let l0 = *l0;
    t.release_flow(l0)?;
    assert!(!t.reverse_match(l0, p0));
    Ok(())
}

#[test]
fn reverse_match_on_shared_default() -> anyhow::Result<()> {
    let mut t = FlowClassificationTable::new(FcbPool::new(PAYLOAD), test_logger());
    let root = t.new_node(FlowLevel::generic16(DPORT_OFFSET, 0xffff));
    let web = t.new_leaf(b"web")?;
    let rest = t.new_leaf(b"rest")?;
    t.add_leaf(root, FlowNodeData(80), web)?;
    t.set_default(root, rest.into())?;
    t.set_root(root)?;

    let dst = Ipv4Addr::new(10, 0, 0, 2);
    let p80 = packet::tcp(Ipv4Addr::new(10, 0, 0, 1), dst, 1, 80);
    let p22 = packet::tcp(Ipv4Addr::new(10, 0, 0, 1), dst, 1, 22);
    assert_eq!(t.match_packet(&p22, false), Some(rest));
    assert!(t.reverse_match(rest, &p22));
    // port 80 has its own child, so it does not fall through
    assert!(!t.reverse_match(rest, &p80));
    assert!(t.reverse_match(web, &p80));
    Ok(())
}

#[test]
fn hash_level_grows_to_many_flows() -> anyhow::Result<()> {
    let (mut t, src) = proto_src_table(FcbPool::new(PAYLOAD))?;
    let mut rng = StdRng::seed_from_u64(0xf10f);
    let mut seen: HashMap<u32, LeafId> = HashMap::new();
    while seen.len() < 3000 {
        let addr: u32 = rng.random();
        let l = t.match_packet(&tcp_from(Ipv4Addr::from(addr)), false).unwrap();
        let prev = *seen.entry(addr).or_insert(l);
        assert_eq!(prev, l);
    }
    assert_eq!(t.get_num(src), Some(3000));
    let name = t.node(src).unwrap().name();
    assert_ne!(name, "HASH-256");
    info!(t.log(), "source level grew to {}", name);

    for (addr, l) in seen.iter().take(100) {
        let p = tcp_from(Ipv4Addr::from(*addr));
        assert_eq!(t.match_packet(&p, false), Some(*l));
        assert!(t.reverse_match(*l, &p));
    }
    assert!(t.check());
    Ok(())
}

#[test]
fn exhausted_pool_drops_flows_until_space_frees_up() -> anyhow::Result<()> {
    // template leaf plus two flows
    let (mut t, src) = proto_src_table(FcbPool::with_capacity(PAYLOAD, 3))?;
    let a = t.match_packet(&tcp_from(Ipv4Addr::new(10, 0, 0, 1)), false).unwrap();
    t.match_packet(&tcp_from(Ipv4Addr::new(10, 0, 0, 2)), false).unwrap();

    let c = tcp_from(Ipv4Addr::new(10, 0, 0, 3));
    assert_eq!(t.match_packet(&c, false), None);
    assert_eq!(t.get_num(src), Some(2));
    assert!(t.check());

    t.release_flow(a)?;
    assert!(t.match_packet(&c, false).is_some());
    assert_eq!(t.get_num(src), Some(2));
    Ok(())
}

#[test]
fn nested_dynamic_levels_from_config() -> anyhow::Result<()> {
    let config = TableConfig {
        payload_size: PAYLOAD,
        pool_capacity: None,
        levels: vec![
            FlowLevel::generic8(PROTO_OFFSET, 0xff),
            FlowLevel::field(FieldWidth::W32, SRC_OFFSET).with_dynamic(),
            FlowLevel::generic16(DPORT_OFFSET, 0xffff).with_dynamic(),
        ],
        leaf_payload: b"new".to_vec(),
    };
    let mut t = FlowClassificationTable::from_config(&config, test_logger())?;

    let s1 = Ipv4Addr::new(10, 0, 0, 1);
    let s2 = Ipv4Addr::new(10, 0, 0, 2);
    let d = Ipv4Addr::new(10, 0, 0, 9);
    let f1 = t.match_packet(&packet::tcp(s1, d, 1, 80), false).unwrap();
    let f2 = t.match_packet(&packet::tcp(s1, d, 1, 443), false).unwrap();
    let f3 = t.match_packet(&packet::tcp(s2, d, 1, 80), false).unwrap();
    assert_ne!(f1, f2);
    assert_ne!(f1, f3);
    assert_eq!(t.parent_of(f1.into()), t.parent_of(f2.into()));
    assert_ne!(t.parent_of(f1.into()), t.parent_of(f3.into()));
    assert_eq!(t.match_packet(&packet::tcp(s1, d, 1, 443), false), Some(f2));

    // the template chain itself never changes
    let root = t.get_root().unwrap();
    let src = t.default_of(root).unwrap().node().unwrap();
    let port = t.default_of(src).unwrap().node().unwrap();
    assert_eq!(t.get_num(src), Some(2));
    assert_eq!(t.get_num(port), Some(0));
    assert_eq!(&t.leaf(f3).unwrap().payload()[..3], b"new");
    assert!(t.check());
    Ok(())
}

#[test]
fn aggregate_annotation_selects_the_queue() -> anyhow::Result<()> {
    let mut t = FlowClassificationTable::new(FcbPool::new(PAYLOAD), test_logger());
    let root = t.new_node(FlowLevel::aggregate(0, 0x3).with_dynamic());
    let template = t.new_leaf(b"queue")?;
    t.set_default(root, template.into())?;
    t.set_root(root)?;
    assert_eq!(t.node(root).unwrap().name(), "ARRAY-4");

    let data = tcp_from(Ipv4Addr::new(10, 0, 0, 1));
    let q1 = t.match_packet(&AnnotatedPacket::new(&data, 1), false).unwrap();
    let q5 = t.match_packet(&AnnotatedPacket::new(&data, 5), false).unwrap();
    let q2 = t.match_packet(&AnnotatedPacket::new(&data, 2), false).unwrap();
    assert_eq!(q1, q5);
    assert_ne!(q1, q2);
    assert_eq!(t.data_of(q2.into()), FlowNodeData(2));
    // a bare packet carries no annotation
    let q0 = t.match_packet(&data, false).unwrap();
    assert_eq!(t.data_of(q0.into()), FlowNodeData(0));
    assert_eq!(t.get_num(root), Some(3));
    Ok(())
}
