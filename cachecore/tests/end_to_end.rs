use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cachecore::{
    Alternate, AlternateVector, CacheEventCode, CacheProcessor, CryptoKey, Doc, DirEntry,
    LruRamCache, ReadOutcome, Stripe, DIR_NIL,
};
use diskaio::{AioBackend, FaultInjector, IoFault, ThreadPoolAio};
use evcore::{Continuation, DispatchResult, Event, ProxyMutex};
use rustix::fd::{AsFd, OwnedFd};
use rustix::fs::{Mode, OFlags};

struct Recorder {
    mutex: Arc<ProxyMutex>,
    seen: Arc<AtomicUsize>,
}

impl Continuation for Recorder {
    fn mutex(&self) -> &Arc<ProxyMutex> {
        &self.mutex
    }
    fn handle(&self, _event: &Event) -> DispatchResult {
        self.seen.fetch_add(1, Ordering::SeqCst);
        DispatchResult::Done
    }
}

fn recorder() -> (Arc<dyn Continuation>, Arc<AtomicUsize>) {
    let seen = Arc::new(AtomicUsize::new(0));
    let cont: Arc<dyn Continuation> = Arc::new(Recorder {
        mutex: ProxyMutex::new(),
        seen: seen.clone(),
    });
    (cont, seen)
}

fn open_fd(path: &std::path::Path, len: usize, flags: OFlags) -> Arc<OwnedFd> {
    if !path.exists() {
        std::fs::write(path, vec![0u8; len]).unwrap();
    }
    Arc::new(rustix::fs::open(path, flags, Mode::empty()).unwrap())
}

fn wait_for(counter: &AtomicUsize, target: usize) {
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while counter.load(Ordering::SeqCst) < target && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Drives a VC already reporting `OpenReadSuccess` through to its body
/// bytes, whether the record resolved straight from the RAM cache or
/// needed a dispatched disk read.
fn drive_read(vc: &cachecore::CacheVC, continuation: Arc<dyn Continuation>, seen: &AtomicUsize) -> Vec<u8> {
    match vc.begin_read(continuation) {
        ReadOutcome::Hit(body) => body,
        ReadOutcome::Dispatched(request) => {
            wait_for(seen, 1);
            vc.finish_read(&request).expect("dispatched read should complete cleanly")
        }
        ReadOutcome::Miss => panic!("a VC that reported OpenReadSuccess must not then miss"),
    }
}

fn scratch_stripe(path: &std::path::Path, aio: Arc<dyn AioBackend>) -> Arc<Stripe> {
    let fd = open_fd(path, 4 << 20, OFlags::RDWR);
    Arc::new(Stripe::new(
        1,
        fd,
        0,
        4 << 20,
        aio,
        256,
        64,
        1 << 20,
        16,
        Box::new(LruRamCache::new(1 << 20)),
        2,
    ))
}

#[test]
fn write_then_read_single_fragment_10kib() {
    let dir = tempfile::tempdir().unwrap();
    let aio: Arc<dyn AioBackend> = Arc::new(ThreadPoolAio::spawn(2, None));
    let stripe = scratch_stripe(&dir.path().join("s.dat"), aio);
    let proc = CacheProcessor::new(vec![stripe.clone()]);

    let key = CryptoKey::from_bytes(0, b"http://www.scw00.com/object");
    let vc = proc.open_write_vc(key).expect("stripe should be available");
    let body = vec![0x5Au8; 10 * 1024];
    let doc = Doc::new(key, key, 1, 0, vec![], body.clone(), None);
    let (k, entry) = vc.do_io_write(&doc).unwrap();

    let (flush_cont, flush_seen) = recorder();
    vc.flush(vec![(k, entry)], flush_cont);
    wait_for(&flush_seen, 1);
    vc.do_io_close(None);

    let found = stripe.lookup(&key).expect("object should be present after commit");
    assert_eq!(found.approx_size, doc.len as u32);

    let read_vc = proc.open_read_vc(key).expect("stripe should be available");
    let (read_cont, read_seen) = recorder();
    assert_eq!(
        read_vc.open_read(1, read_cont.clone()),
        CacheEventCode::OpenReadSuccess
    );
    let fetched = drive_read(&read_vc, read_cont, &read_seen);
    assert_eq!(fetched, body, "read bytes must match the written body byte-for-byte");
}

#[test]
fn alternate_replacement_large_then_small_serves_the_newest_variant() {
    let dir = tempfile::tempdir().unwrap();
    let aio: Arc<dyn AioBackend> = Arc::new(ThreadPoolAio::spawn(2, None));
    let stripe = scratch_stripe(&dir.path().join("s.dat"), aio);
    let proc = CacheProcessor::new(vec![stripe.clone()]);
    let key = CryptoKey::from_bytes(0, b"http://example.com/variant-object");

    let large_body = vec![0xAAu8; 4096];
    let mut large_vector = AlternateVector::new();
    large_vector.add(Alternate {
        request_digest: 1,
        response_headers: b"Content-Length: 4096".to_vec(),
        object_key: key,
        frag_offsets: vec![0, 2048],
    });
    let writer = proc.open_write_vc(key).expect("stripe should be available");
    let doc = Doc::new(key, key, 1, 0, large_vector.to_bytes(), large_body.clone(), None);
    let (k, entry) = writer.do_io_write(&doc).unwrap();
    let (flush_cont, flush_seen) = recorder();
    writer.flush(vec![(k, entry)], flush_cont);
    wait_for(&flush_seen, 1);
    writer.do_io_close(None);

    let reader = proc.open_read_vc(key).unwrap();
    let (read_cont, read_seen) = recorder();
    assert_eq!(reader.open_read(1, read_cont.clone()), CacheEventCode::OpenReadSuccess);
    assert_eq!(drive_read(&reader, read_cont, &read_seen), large_body);

    // Replace the object under the same digest with a small alternate.
    let small_body = b"tiny".to_vec();
    let mut small_vector = AlternateVector::new();
    small_vector.add(Alternate {
        request_digest: 1,
        response_headers: b"Content-Length: 4".to_vec(),
        object_key: key,
        frag_offsets: vec![],
    });
    let writer2 = proc.open_write_vc(key).expect("stripe should be available");
    let doc2 = Doc::new(key, key, 2, 0, small_vector.to_bytes(), small_body.clone(), None);
    let (k2, entry2) = writer2.do_io_write(&doc2).unwrap();
    let (flush_cont2, flush_seen2) = recorder();
    writer2.flush(vec![(k2, entry2)], flush_cont2);
    wait_for(&flush_seen2, 1);
    writer2.do_io_close(None);

    let reader2 = proc.open_read_vc(key).unwrap();
    let (read_cont2, read_seen2) = recorder();
    assert_eq!(reader2.open_read(1, read_cont2.clone()), CacheEventCode::OpenReadSuccess);
    assert_eq!(
        drive_read(&reader2, read_cont2, &read_seen2),
        small_body,
        "a later write under the same digest must serve its own body, not the stale large one"
    );
}

#[test]
fn alternate_deletion_fails_removed_digest_while_retained_digest_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let aio: Arc<dyn AioBackend> = Arc::new(ThreadPoolAio::spawn(2, None));
    let stripe = scratch_stripe(&dir.path().join("s.dat"), aio);
    let proc = CacheProcessor::new(vec![stripe.clone()]);
    let key = CryptoKey::from_bytes(0, b"http://example.com/two-alternates");

    let mut vector = AlternateVector::new();
    vector.add(Alternate {
        request_digest: 1,
        response_headers: b"Content-Encoding: gzip".to_vec(),
        object_key: key,
        frag_offsets: vec![],
    });
    vector.add(Alternate {
        request_digest: 2,
        response_headers: b"Content-Encoding: identity".to_vec(),
        object_key: key,
        frag_offsets: vec![],
    });
    let writer = proc.open_write_vc(key).expect("stripe should be available");
    let doc = Doc::new(key, key, 1, 0, vector.to_bytes(), b"either-body".to_vec(), None);
    let (k, entry) = writer.do_io_write(&doc).unwrap();
    let (flush_cont, flush_seen) = recorder();
    writer.flush(vec![(k, entry)], flush_cont);
    wait_for(&flush_seen, 1);
    writer.do_io_close(None);

    let reader_gzip = proc.open_read_vc(key).unwrap();
    let (c1, _) = recorder();
    assert_eq!(reader_gzip.open_read(1, c1), CacheEventCode::OpenReadSuccess);
    let reader_identity = proc.open_read_vc(key).unwrap();
    let (c2, _) = recorder();
    assert_eq!(reader_identity.open_read(2, c2), CacheEventCode::OpenReadSuccess);

    // Rewrite the object's vector, dropping the gzip alternate entirely.
    let mut surviving_vector = AlternateVector::new();
    surviving_vector.add(Alternate {
        request_digest: 2,
        response_headers: b"Content-Encoding: identity".to_vec(),
        object_key: key,
        frag_offsets: vec![],
    });
    let writer2 = proc.open_write_vc(key).expect("stripe should be available");
    let doc2 = Doc::new(key, key, 2, 0, surviving_vector.to_bytes(), b"identity-body".to_vec(), None);
    let (k2, entry2) = writer2.do_io_write(&doc2).unwrap();
    let (flush_cont2, flush_seen2) = recorder();
    writer2.flush(vec![(k2, entry2)], flush_cont2);
    wait_for(&flush_seen2, 1);
    writer2.do_io_close(None);

    let reader_gzip2 = proc.open_read_vc(key).unwrap();
    let (c3, _) = recorder();
    assert_eq!(
        reader_gzip2.open_read(1, c3),
        CacheEventCode::OpenReadFailed,
        "a deleted alternate's digest must fail exactly as if the entry were never there"
    );
    let reader_identity2 = proc.open_read_vc(key).unwrap();
    let (c4, _) = recorder();
    assert_eq!(reader_identity2.open_read(2, c4), CacheEventCode::OpenReadSuccess);
}

#[test]
fn read_while_write_success_delivers_write_complete() {
    let dir = tempfile::tempdir().unwrap();
    let aio: Arc<dyn AioBackend> = Arc::new(ThreadPoolAio::spawn(1, None));
    let stripe = scratch_stripe(&dir.path().join("s.dat"), aio);
    let key = CryptoKey::from_bytes(0, b"http://example.com/rww");

    let (reader_cont, reader_seen) = recorder();
    stripe.attach_reader(key, reader_cont);

    let doc = Doc::new(key, key, 1, 0, vec![], b"streamed body".to_vec(), None);
    let entry = DirEntry {
        offset: stripe.current_write_pos(),
        approx_size: doc.len as u32,
        tag: key.tag(),
        phase: false,
        next: DIR_NIL,
    };
    let (flush_cont, flush_seen) = recorder();
    stripe.flush(vec![(key, entry)], flush_cont);
    wait_for(&flush_seen, 1);

    assert_eq!(reader_seen.load(Ordering::SeqCst), 1, "RWW reader should be woken on writer completion");
    assert!(stripe.lookup(&key).is_some());
}

#[test]
fn read_while_write_abort_before_any_fragment_delivers_eos() {
    let dir = tempfile::tempdir().unwrap();
    let aio: Arc<dyn AioBackend> = Arc::new(ThreadPoolAio::spawn(1, None));
    let stripe = scratch_stripe(&dir.path().join("s.dat"), aio);
    let key = CryptoKey::from_bytes(0, b"http://example.com/rww-abort");

    let (reader_cont, reader_seen) = recorder();
    stripe.attach_reader(key, reader_cont);

    // Writer aborts without ever flushing a fragment.
    stripe.abort_write(&key);

    assert_eq!(reader_seen.load(Ordering::SeqCst), 1, "RWW reader should be woken with EOS on abort");
    assert!(stripe.lookup(&key).is_none(), "aborted write must never produce a directory entry");
}

#[test]
fn stripe_init_fault_isolation_keeps_other_stripe_usable() {
    let dir = tempfile::tempdir().unwrap();
    let fault_injector = Arc::new(FaultInjector::new());
    let bad_path = dir.path().join("bad.dat");
    std::fs::write(&bad_path, vec![0u8; 4 << 20]).unwrap();
    fault_injector
        .inject_fault(&format!("{}$", regex::escape(bad_path.to_str().unwrap())), 0, IoFault { errno: libc_eio(), skip_io: true })
        .unwrap();

    let aio: Arc<dyn AioBackend> = Arc::new(ThreadPoolAio::spawn(2, Some(fault_injector.clone())));

    let bad_fd = fault_injector.open(&bad_path, OFlags::RDWR, Mode::empty()).unwrap();
    let bad_stripe = Arc::new(Stripe::new(
        1,
        Arc::new(bad_fd),
        0,
        4 << 20,
        aio.clone(),
        64,
        16,
        1 << 16,
        8,
        Box::new(LruRamCache::new(1 << 16)),
        2,
    ));
    let good_stripe = scratch_stripe(&dir.path().join("good.dat"), aio);

    let key = CryptoKey::from_bytes(0, b"http://example.com/x");
    let doc = Doc::new(key, key, 1, 0, vec![], b"ok".to_vec(), None);
    let entry = DirEntry { offset: 0, approx_size: doc.len as u32, tag: key.tag(), phase: false, next: DIR_NIL };

    let (bad_cont, bad_seen) = recorder();
    bad_stripe.flush(vec![(key, entry)], bad_cont);
    wait_for(&bad_seen, 1);
    bad_stripe.on_hard_io_error();

    let proc = CacheProcessor::new(vec![bad_stripe.clone(), good_stripe.clone()]);
    assert_eq!(
        proc.stripe_count(),
        2,
        "a degraded stripe is still counted; it's routed around, not removed"
    );
    assert!(bad_stripe.is_degraded());
    assert!(!good_stripe.is_degraded());

    let (write_cont, write_seen) = recorder();
    let staged = good_stripe
        .stage_write(&Doc::new(key, key, 2, 0, vec![], b"good".to_vec(), None), false)
        .unwrap();
    good_stripe.flush(
        vec![(key, DirEntry { offset: staged.offset, approx_size: 4, tag: key.tag(), phase: staged.phase, next: DIR_NIL })],
        write_cont,
    );
    wait_for(&write_seen, 1);
    assert!(good_stripe.lookup(&key).is_some());
}

#[test]
fn fault_determinism_across_transient_retry() {
    use diskaio::AioRequest;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flaky.dat");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();

    let fault_injector = Arc::new(FaultInjector::new());
    // Op index 1 sees a transient EINTR (the write still lands on disk,
    // since `skip_io: false`, but the call itself reports failure); op
    // index 3 sees a hard EIO. The worker's own retry-on-transient policy
    // must absorb the first without surfacing an error and without
    // disturbing which op index the later hard fault lands on.
    fault_injector
        .inject_fault(&format!("{}$", regex::escape(path.to_str().unwrap())), 1, IoFault { errno: libc_eintr(), skip_io: false })
        .unwrap();
    fault_injector
        .inject_fault(&format!("{}$", regex::escape(path.to_str().unwrap())), 3, IoFault { errno: libc_eio(), skip_io: true })
        .unwrap();

    let fd = Arc::new(fault_injector.open(&path, OFlags::RDWR, Mode::empty()).unwrap());
    let aio = ThreadPoolAio::spawn(1, Some(fault_injector));
    let (cont, seen) = recorder();

    // op index 0: clean write.
    let r1 = AioRequest::write(fd.clone(), 0, b"aaaa".to_vec());
    aio.submit(diskaio::AioVec::single(r1.clone(), cont.clone(), None));
    wait_for(&seen, 1);
    assert_eq!(r1.outcome().unwrap().result, Ok(4));

    // op index 1 (transient, absorbed by retry) + op index 2 (the retry
    // itself, clean): this write must complete successfully end to end.
    let r2 = AioRequest::write(fd.clone(), 4, b"bbbb".to_vec());
    aio.submit(diskaio::AioVec::single(r2.clone(), cont.clone(), None));
    wait_for(&seen, 2);
    assert_eq!(r2.outcome().unwrap().result, Ok(4), "a transient hiccup must not surface as a write failure");

    // op index 3: the hard fault, deterministically still there despite
    // the extra retry attempt consumed above.
    let r3 = AioRequest::write(fd, 8, b"cccc".to_vec());
    aio.submit(diskaio::AioVec::single(r3.clone(), cont, None));
    wait_for(&seen, 3);
    assert!(r3.outcome().unwrap().result.is_err(), "the hard fault must still fire deterministically");

    aio.shutdown();
}

fn libc_eio() -> i32 {
    rustix::io::Errno::IO.raw_os_error()
}

fn libc_eintr() -> i32 {
    rustix::io::Errno::INTR.raw_os_error()
}
