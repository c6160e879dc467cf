use crate::logger::test_logger;
use crate::packet::{self, DPORT_OFFSET, PROTO_OFFSET, SRC_OFFSET};
use flowrs::{
    ConfigurationError, Error, FcbPool, FlowClassificationTable, FlowLevel,
    FlowNodeData, LeafId, LeafPool, NodeId,
};
use slog::info;
use std::collections::HashSet;
use std::net::Ipv4Addr;

const PAYLOAD: usize = 16;

const TCP: u8 = 6;
const UDP: u8 = 17;

fn ports(
    t: &mut FlowClassificationTable,
    rules: &[(u16, &str)],
) -> anyhow::Result<NodeId> {
    let n = t.new_node(FlowLevel::generic16(DPORT_OFFSET, 0xffff));
    for (port, name) in rules {
        let l = t.new_leaf(name.as_bytes())?;
        t.add_leaf(n, FlowNodeData::from(*port), l)?;
    }
    Ok(n)
}

fn protocols(
    t: &mut FlowClassificationTable,
    rules: &[(u8, NodeId)],
) -> anyhow::Result<NodeId> {
    let n = t.new_node(FlowLevel::generic8(PROTO_OFFSET, 0xff));
    for (proto, child) in rules {
        t.add_node(n, FlowNodeData::from(*proto), *child)?;
    }
    Ok(n)
}

/// Payload up to the first zero byte.
fn mark(t: &FlowClassificationTable, leaf: Option<LeafId>) -> Option<String> {
    let p = t.leaf(leaf?)?.payload();
    let end = p.iter().position(|b| *b == 0).unwrap_or(p.len());
    Some(String::from_utf8_lossy(&p[..end]).into_owned())
}

fn a(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

#[test]
fn rule_sets_merge_in_order() -> anyhow::Result<()> {
    let mut t = FlowClassificationTable::new(FcbPool::new(PAYLOAD), test_logger());
    let any = t.build_chain(&[], b"drop")?;
    t.set_root(any)?;

    let web = ports(&mut t, &[(80, "web"), (443, "tls")])?;
    let first = protocols(&mut t, &[(TCP, web)])?;
    let root = t.combine(any, first)?;
    assert_eq!(root, first);
    assert_eq!(t.get_root(), Some(first));

    let dns = ports(&mut t, &[(53, "dns")])?;
    let ssh = ports(&mut t, &[(22, "ssh")])?;
    let second = protocols(&mut t, &[(UDP, dns), (TCP, ssh)])?;
    assert_eq!(t.combine(root, second)?, root);
    assert_eq!(t.get_num(root), Some(2));
    assert_eq!(t.get_num(web), Some(3));
    assert_eq!(t.pool().live(), 5);

    let classify = |t: &mut FlowClassificationTable, p: Vec<u8>| {
        let l = t.match_packet(&p, false);
        mark(t, l)
    };
    assert_eq!(classify(&mut t, packet::tcp(a(1), a(2), 999, 80)).as_deref(), Some("web"));
    assert_eq!(classify(&mut t, packet::tcp(a(1), a(2), 999, 443)).as_deref(), Some("tls"));
    assert_eq!(classify(&mut t, packet::tcp(a(1), a(2), 999, 22)).as_deref(), Some("ssh"));
    assert_eq!(classify(&mut t, packet::udp(a(1), a(2), 999, 53, b"q")).as_deref(), Some("dns"));
    assert_eq!(classify(&mut t, packet::icmp(a(1), a(2))).as_deref(), Some("drop"));
    // explicit rules without a default of their own
    assert_eq!(classify(&mut t, packet::tcp(a(1), a(2), 999, 8080)), None);

    // a later rule for the same key takes over, the old leaf is freed
    let newer = ports(&mut t, &[(80, "web2")])?;
    let third = protocols(&mut t, &[(TCP, newer)])?;
    t.combine(root, third)?;
    assert_eq!(t.pool().live(), 5);
    assert_eq!(classify(&mut t, packet::tcp(a(1), a(2), 999, 80)).as_deref(), Some("web2"));
    assert_eq!(classify(&mut t, packet::tcp(a(1), a(2), 999, 443)).as_deref(), Some("tls"));

    info!(t.log(), "{}", t.dump());
    assert!(t.check());
    Ok(())
}

#[test]
fn optimized_tree_classifies_the_same() -> anyhow::Result<()> {
    let mut t = FlowClassificationTable::new(FcbPool::new(PAYLOAD), test_logger());
    let any = t.build_chain(&[], b"pass")?;
    t.set_root(any)?;

    let src = t.new_node(FlowLevel::generic32(SRC_OFFSET, 0xffff_ffff).with_dynamic());
    let template = t.new_leaf(b"flow")?;
    t.set_default(src, template.into())?;
    let tcp = protocols(&mut t, &[(TCP, src)])?;
    let root = t.combine(any, tcp)?;

    let dns = ports(&mut t, &[(53, "dns")])?;
    let udp = protocols(&mut t, &[(UDP, dns)])?;
    t.combine(root, udp)?;

    let probes = vec![
        packet::udp(a(1), a(2), 999, 53, b"q"),
        packet::udp(a(1), a(2), 999, 54, b"q"),
        packet::icmp(a(1), a(2)),
    ];
    let before: Vec<Option<String>> = probes
        .iter()
        .map(|p| {
            let l = t.match_packet(p, false);
            mark(&t, l)
        })
        .collect();

    t.optimize()?;
    assert_eq!(t.node(root).unwrap().name(), "THREECASE");
    assert_eq!(t.node(dns).unwrap().name(), "TWOCASE");
    assert_eq!(t.node(src).unwrap().name(), "HASH-256");

    let after: Vec<Option<String>> = probes
        .iter()
        .map(|p| {
            let l = t.match_packet(p, false);
            mark(&t, l)
        })
        .collect();
    assert_eq!(before, after);
    assert_eq!(after[0].as_deref(), Some("dns"));
    assert_eq!(after[1], None);
    assert_eq!(after[2].as_deref(), Some("pass"));

    // the dynamic level still hands out a flow per source
    let mut flows = HashSet::new();
    for i in 1..=3 {
        let l = t.match_packet(&packet::tcp(a(i), a(100), 999, 80), false).unwrap();
        assert_eq!(mark(&t, Some(l)).as_deref(), Some("flow"));
        flows.insert(l);
    }
    assert_eq!(flows.len(), 3);
    assert_eq!(t.get_num(src), Some(3));

    // the compacted root has no slot for a third protocol
    let icmp_rules = ports(&mut t, &[(0, "echo")])?;
    let icmp = protocols(&mut t, &[(1, icmp_rules)])?;
    assert!(matches!(
        t.combine(root, icmp),
        Err(Error::Configuration(ConfigurationError::UnaddressableKey { .. }))
    ));
    let l = t.match_packet(&packet::icmp(a(1), a(2)), false);
    assert_eq!(mark(&t, l).as_deref(), Some("pass"));
    assert_eq!(t.get_num(src), Some(3));
    assert!(t.check());
    Ok(())
}
