//! End-to-end walks through the fakes in `common`, one per scenario.

mod common;

use std::ffi::OsStr;
use std::time::Duration;

use common::*;
use vnodebridge::*;

fn entry_reply(node: NodeId, kind: VnodeType, size: u64, ttl: Duration) -> Reply {
    Reply::Entry {
        node,
        attr: sample_attr(kind, size),
        attr_valid: ttl,
        entry_valid: ttl,
        handle: None,
    }
}

/// S1: create falls back to MKNOD+OPEN when CREATE is ENOSYS, installing a
/// read-write handle; a direct write goes out over that handle, and close
/// flushes and releases it. The CREATE capability bit stays cleared.
#[test]
fn scenario_s1_create_open_write_close() {
    const FILE: NodeId = NodeId(100);

    let mount = new_mount(vec![
        exchange(Opcode::Create, Err(enosys())),
        exchange(Opcode::Mknod, Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_secs(1)))),
        exchange(Opcode::Open, Ok(Reply::Open { handle: 1, flags: 0 })),
        exchange(Opcode::Write, Ok(Reply::Write { size: 8 })),
        exchange(Opcode::Flush, Ok(Reply::Empty)),
        exchange(Opcode::Release, Ok(Reply::Empty)),
    ]);

    let (node_id, _attr) = mount
        .create(ROOT_NODE_ID, OsStr::new("f"), 0o644, creds())
        .unwrap();
    assert_eq!(node_id, FILE);
    assert!(!mount.lock().capabilities.implemented(Opcode::Create));

    let mut uio = FakeUio::for_write(0, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    let n = mount.write_direct(FILE, &mut uio, creds()).unwrap();
    assert_eq!(n, 8);

    mount
        .close(FILE, false, HandleMode::ReadWrite, false, false, creds())
        .unwrap();

    assert_eq!(mount.transport.sent_count(Opcode::Release), 1);
    assert!(mount.transport.is_exhausted());
}

/// A daemon that actually implements CREATE returns the entry and the
/// handle in one round trip; the bundled handle must land in the
/// read-write slot so the impending OPEN claims it instead of leaking a
/// second daemon handle.
#[test]
fn scenario_create_single_round_trip_installs_bundled_handle() {
    const FILE: NodeId = NodeId(103);

    let mount = new_mount(vec![exchange(
        Opcode::Create,
        Ok(Reply::Entry {
            node: FILE,
            attr: sample_attr(VnodeType::RegularFile, 0),
            attr_valid: Duration::from_secs(1),
            entry_valid: Duration::from_secs(1),
            handle: Some(OpenHandle { daemon_handle: 9, open_flags: 0 }),
        }),
    )]);

    let (node_id, _attr) = mount
        .create(ROOT_NODE_ID, OsStr::new("f"), 0o644, creds())
        .unwrap();
    assert_eq!(node_id, FILE);
    assert!(mount.lock().capabilities.implemented(Opcode::Create));

    let handle = mount
        .lock()
        .nodes
        .get(&FILE)
        .unwrap()
        .handles
        .handle(HandleMode::ReadWrite)
        .unwrap();
    assert_eq!(handle.daemon_handle, 9);
    assert!(mount.transport.is_exhausted());
}

/// An OPEN reply carrying the direct-I/O bit must flush/invalidate the
/// host's UBC for that vnode, not just flip the node's internal flag.
#[test]
fn scenario_open_direct_io_invalidates_ubc() {
    const FILE: NodeId = NodeId(104);
    const FOPEN_DIRECT_IO: u32 = 1 << 0;

    let mount = new_mount(vec![
        exchange(Opcode::Lookup, Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_secs(1)))),
        exchange(Opcode::Open, Ok(Reply::Open { handle: 3, flags: FOPEN_DIRECT_IO })),
    ]);
    let root = FakeVnode(ROOT_NODE_ID);
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();

    let fvnode = FakeVnode(FILE);
    mount
        .open(&fvnode, FILE, false, libc::O_RDONLY, creds())
        .unwrap();

    assert!(mount
        .lock()
        .nodes
        .get(&FILE)
        .unwrap()
        .flags
        .contains(NodeFlags::DIRECT_IO));
    assert!(mount.hostvfs.ubc_invalidated().contains(&FILE));
    assert!(mount.transport.is_exhausted());
}

/// S2: two stats inside the entry's TTL cost one LOOKUP; a third past the
/// deadline costs a second.
#[test]
fn scenario_s2_lookup_caching_ttl() {
    const FILE: NodeId = NodeId(101);

    let mount = new_mount(vec![
        exchange(Opcode::Lookup, Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_millis(40)))),
        exchange(Opcode::Lookup, Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_millis(40)))),
    ]);
    let root = FakeVnode(ROOT_NODE_ID);

    let first = mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();
    assert!(matches!(first, LookupOutcome::Found(_)));

    let second = mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();
    assert!(matches!(second, LookupOutcome::Found(_)));
    assert_eq!(mount.transport.sent_count(Opcode::Lookup), 1);

    std::thread::sleep(Duration::from_millis(60));

    let third = mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();
    assert!(matches!(third, LookupOutcome::Found(_)));
    assert_eq!(mount.transport.sent_count(Opcode::Lookup), 2);
    assert!(mount.transport.is_exhausted());
}

/// S3: a zero-size probe reports the attribute's size; a buffer too small
/// for the daemon's data comes back ERANGE.
#[test]
fn scenario_s3_oversized_xattr() {
    const FILE: NodeId = NodeId(102);

    let mount = new_mount(vec![
        exchange(Opcode::Getxattr, Ok(Reply::Xattr { size: 8192, data: None })),
        exchange(
            Opcode::Getxattr,
            Ok(Reply::Xattr { size: 8192, data: Some(vec![7u8; 8192]) }),
        ),
    ]);

    let fvnode = FakeVnode(FILE);
    let probe = mount
        .getxattr(&fvnode, FILE, OsStr::new("user.big"), 0, creds())
        .unwrap();
    assert_eq!(probe.len(), 8192);

    let err = mount.getxattr(&fvnode, FILE, OsStr::new("user.big"), 4096, creds());
    assert_eq!(err, Err(VError::ERANGE));

    assert!(mount.transport.is_exhausted());
}

/// S4: renaming across directories purges the source (and, if present, the
/// clobbered target) from the name cache and invalidates both parents'
/// cached attributes.
#[test]
fn scenario_s4_rename_across_directories() {
    const D1: NodeId = NodeId(110);
    const D2: NodeId = NodeId(111);
    const OLD_FILE: NodeId = NodeId(120);
    const CLOBBERED: NodeId = NodeId(121);

    let mount = new_mount(vec![
        exchange(Opcode::Lookup, Ok(entry_reply(D1, VnodeType::Directory, 0, Duration::from_secs(60)))),
        exchange(Opcode::Lookup, Ok(entry_reply(D2, VnodeType::Directory, 0, Duration::from_secs(60)))),
        exchange(Opcode::Rename, Ok(Reply::Empty)),
        exchange(
            Opcode::Getattr,
            Ok(Reply::Attr { attr: sample_attr(VnodeType::Directory, 0), valid: Duration::from_secs(60) }),
        ),
    ]);
    mount.hostvfs.set_cached_kind(D1, VnodeType::Directory);
    mount.hostvfs.set_cached_kind(D2, VnodeType::Directory);

    let root = FakeVnode(ROOT_NODE_ID);
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("d1"), LookupIntent::Lookup, true, creds())
        .unwrap();
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("d2"), LookupIntent::Lookup, true, creds())
        .unwrap();

    mount
        .rename(
            D1,
            OsStr::new("a"),
            &FakeVnode(OLD_FILE),
            D2,
            OsStr::new("b"),
            Some(&FakeVnode(CLOBBERED)),
            creds(),
        )
        .unwrap();

    assert!(mount.hostvfs.purged_nodes().contains(&OLD_FILE));
    assert!(mount.hostvfs.purged_nodes().contains(&CLOBBERED));

    // d1's cached attribute was invalidated by the rename, so this getattr
    // must RPC again instead of serving the stale entry.
    mount.getattr(&FakeVnode(D1), D1, creds()).unwrap();
    assert!(mount.transport.is_exhausted());
}

/// S5: once the mount has died mid-flight, a read in progress fails ENXIO
/// without a further RPC, and reclaiming its vnode releases no handles and
/// sends no FORGET.
#[test]
fn scenario_s5_forced_unmount_mid_rpc() {
    const FILE: NodeId = NodeId(130);

    let mount = new_mount(vec![
        exchange(Opcode::Lookup, Ok(entry_reply(FILE, VnodeType::RegularFile, 0, Duration::from_secs(1)))),
        exchange(Opcode::Open, Ok(Reply::Open { handle: 55, flags: 0 })),
    ]);
    let root = FakeVnode(ROOT_NODE_ID);
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("f"), LookupIntent::Lookup, true, creds())
        .unwrap();
    mount
        .open(&FakeVnode(FILE), FILE, false, libc::O_RDONLY, creds())
        .unwrap();

    mount.lock().mark_dead();

    let mut uio = FakeUio::for_read(0, 16);
    let err = mount.read_direct(FILE, &mut uio, creds());
    assert_eq!(err, Err(VError::ENXIO));

    mount.reclaim(&FakeVnode(FILE), FILE, creds());

    assert!(mount.lock().nodes.get(&FILE).is_none());
    assert!(mount.transport.is_exhausted());
}

/// S6: the daemon reporting a regular file for a node the host still
/// believes is a directory purges the name cache and fails EIO; the next
/// lookup of the same name re-RPCs instead of serving the stale entry.
#[test]
fn scenario_s6_type_change_detection() {
    const NID: NodeId = NodeId(140);

    let mount = new_mount(vec![
        exchange(Opcode::Lookup, Ok(entry_reply(NID, VnodeType::Directory, 0, Duration::from_millis(1)))),
        exchange(
            Opcode::Getattr,
            Ok(Reply::Attr { attr: sample_attr(VnodeType::RegularFile, 12), valid: Duration::from_secs(1) }),
        ),
        exchange(Opcode::Lookup, Ok(entry_reply(NID, VnodeType::Directory, 0, Duration::from_secs(1)))),
    ]);
    mount.hostvfs.set_cached_kind(NID, VnodeType::Directory);

    let root = FakeVnode(ROOT_NODE_ID);
    mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("d"), LookupIntent::Lookup, true, creds())
        .unwrap();

    std::thread::sleep(Duration::from_millis(5));

    let err = mount.getattr(&FakeVnode(NID), NID, creds());
    assert_eq!(err, Err(VError::EIO));
    assert!(mount.hostvfs.purged_nodes().contains(&NID));

    let retried = mount
        .lookup(&root, ROOT_NODE_ID, OsStr::new("d"), LookupIntent::Lookup, true, creds())
        .unwrap();
    assert!(matches!(retried, LookupOutcome::Found(_)));
    assert_eq!(mount.transport.sent_count(Opcode::Lookup), 2);
    assert!(mount.transport.is_exhausted());
}
