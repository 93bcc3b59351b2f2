//! Exercises the six testable properties against the fakes in `common`.

mod common;

use std::ffi::OsStr;
use std::time::Duration;

use common::*;
use vnodebridge::*;

const FILE: NodeId = NodeId(2);

fn entry_reply(node: NodeId, kind: VnodeType, size: u64, ttl: Duration) -> Reply {
    Reply::Entry {
        node,
        attr: sample_attr(kind, size),
        attr_valid: ttl,
        entry_valid: ttl,
        handle: None,
    }
}

/// Property 1: opens(v,m) = releases(v,m) across a vnode's lifetime.
#[test]
fn property_handle_accounting_opens_equal_releases() {
    let mount = new_mount(vec![
        exchange(Opcode::Lookup, Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_secs(1)))),
        exchange(Opcode::Open, Ok(Reply::Open { handle: 7, flags: 0 })),
        exchange(Opcode::Flush, Ok(Reply::Empty)),
        exchange(Opcode::Release, Ok(Reply::Empty)),
    ]);
    let root = FakeVnode(vnodebridge::ROOT_NODE_ID);
    let found = mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();
    assert!(matches!(found, LookupOutcome::Found(_)));

    mount
        .open(&FakeVnode(FILE), FILE, false, libc::O_RDONLY, creds())
        .unwrap();
    mount
        .close(FILE, false, HandleMode::Read, false, false, creds())
        .unwrap();

    assert_eq!(
        mount.transport.sent_count(Opcode::Open),
        mount.transport.sent_count(Opcode::Release)
    );
    assert!(mount.transport.is_exhausted());
}

/// Property 2: forgets emitted at teardown match lookup replies observed.
#[test]
fn property_forget_accounting_matches_lookup_replies() {
    let mount = new_mount(vec![
        exchange(Opcode::Lookup, Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_secs(1)))),
        exchange(Opcode::Forget, Ok(Reply::Empty)),
    ]);
    let root = FakeVnode(vnodebridge::ROOT_NODE_ID);
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();

    let fvnode = FakeVnode(FILE);
    mount.reclaim(&fvnode, FILE, creds());

    assert_eq!(mount.transport.sent_count(Opcode::Forget), 1);
    assert!(mount.transport.is_exhausted());
}

/// Property 3: an ENOSYS on an optional op stops further RPCs for it.
#[test]
fn property_capability_monotonicity_stops_further_rpcs() {
    let mount = new_mount(vec![exchange(Opcode::Ioctl, Err(enosys()))]);

    let first = mount.ioctl(FILE, 0x1234, 0, creds());
    assert_eq!(first, Err(VError::ENOTSUP));
    let second = mount.ioctl(FILE, 0x1234, 0, creds());
    assert_eq!(second, Err(VError::ENOTSUP));

    assert_eq!(mount.transport.sent_count(Opcode::Ioctl), 1);
    assert!(mount.transport.is_exhausted());
}

/// Property 4: a getattr within the cache deadline never RPCs; after
/// invalidation the next getattr always does.
#[test]
fn property_attr_cache_freshness() {
    let mount = new_mount(vec![
        exchange(
            Opcode::Lookup,
            Ok(entry_reply(FILE, VnodeType::RegularFile, 10, Duration::from_millis(60))),
        ),
        exchange(
            Opcode::Getattr,
            Ok(Reply::Attr {
                attr: sample_attr(VnodeType::RegularFile, 20),
                valid: Duration::from_millis(60),
            }),
        ),
    ]);
    let root = FakeVnode(vnodebridge::ROOT_NODE_ID);
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();
    let fvnode = FakeVnode(FILE);

    let fresh = mount.getattr(&fvnode, FILE, creds()).unwrap();
    assert_eq!(fresh.size, 10);
    assert_eq!(mount.transport.sent_count(Opcode::Getattr), 0);

    std::thread::sleep(Duration::from_millis(90));

    let refreshed = mount.getattr(&fvnode, FILE, creds()).unwrap();
    assert_eq!(refreshed.size, 20);
    assert_eq!(mount.transport.sent_count(Opcode::Getattr), 1);
    assert!(mount.transport.is_exhausted());
}

/// Property 5: once dead, non-root ops fail ENXIO; root access/close/mnomap
/// succeed and getattr fabricates, all without an RPC.
#[test]
fn property_dead_mount_short_circuit() {
    let mount = new_mount(vec![]);
    {
        let mut guard = mount.lock();
        guard.mark_dead();
    }

    let root = FakeVnode(vnodebridge::ROOT_NODE_ID);
    let err = mount.getattr(&FakeVnode(FILE), FILE, creds());
    assert_eq!(err, Err(VError::ENXIO));

    let root_attr = mount.getattr(&root, ROOT_NODE_ID, creds()).unwrap();
    assert_eq!(root_attr.kind, VnodeType::Directory);

    mount
        .close(ROOT_NODE_ID, false, HandleMode::Read, false, false, creds())
        .unwrap();
    mount.access(&root, ROOT_NODE_ID, VnodeType::Directory, AccessFlags::R_OK, creds()).unwrap();
    mount.mnomap(ROOT_NODE_ID, libc::PROT_READ, creds()).unwrap();

    assert!(mount.transport.is_exhausted());
}

/// Property 6: under direct I/O, the node's file-size field tracks the most
/// recent attribute reply's size.
#[test]
fn property_direct_io_size_truth() {
    let mount = new_mount(vec![
        exchange(
            Opcode::Lookup,
            Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_millis(1))),
        ),
        exchange(Opcode::Open, Ok(Reply::Open { handle: 9, flags: 1 })),
        exchange(
            Opcode::Getattr,
            Ok(Reply::Attr {
                attr: sample_attr(VnodeType::RegularFile, 4096),
                valid: Duration::from_millis(1),
            }),
        ),
    ]);
    let root = FakeVnode(vnodebridge::ROOT_NODE_ID);
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();
    let fvnode = FakeVnode(FILE);
    mount
        .open(&fvnode, FILE, false, libc::O_RDONLY, creds())
        .unwrap();

    std::thread::sleep(Duration::from_millis(5));
    let attr = mount.getattr(&fvnode, FILE, creds()).unwrap();

    let file_size = mount.lock().nodes.get(&FILE).unwrap().file_size;
    assert_eq!(file_size, attr.size);
    assert!(mount.transport.is_exhausted());
}
