use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;

use crate::config::CoreConfig;
use crate::core::buffer::types::{
    HdrMetaData, HdrMetaDataType, HdrMetadataKey, PresentTimestamp, PresentTimestampType,
};
use crate::core::buffer::*;
use crate::core::context::CoreContext;
use crate::core::errors::GsError;
use crate::util::geometry::Rect;

#[derive(Default)]
struct CountingConsumer {
    available: AtomicU32,
    backgrounded: AtomicU32,
    cleaned: AtomicU32,
    tunnel_changes: AtomicU32,
}

impl ConsumerListener for CountingConsumer {
    fn on_buffer_available(&self) {
        self.available.fetch_add(1, Ordering::SeqCst);
    }

    fn on_go_background(&self) {
        self.backgrounded.fetch_add(1, Ordering::SeqCst);
    }

    fn on_clean_cache(&self) {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
    }

    fn on_tunnel_handle_change(&self) {
        self.tunnel_changes.fetch_add(1, Ordering::SeqCst);
    }
}

fn context() -> Arc<CoreContext> {
    CoreContext::simulated(CoreConfig::default()).0
}

fn queue_with_consumer(name: &str, shared: bool) -> (BufferQueue, Arc<CountingConsumer>) {
    let queue = BufferQueue::new(context(), name, shared);
    let consumer = Arc::new(CountingConsumer::default());
    queue.register_consumer_listener(consumer.clone());
    (queue, consumer)
}

fn request_config() -> BufferRequestConfig {
    BufferRequestConfig::new(64, 32)
}

fn flush_config() -> BufferFlushConfig {
    BufferFlushConfig::new(Rect::new(0, 0, 64, 32), 0)
}

fn flush(queue: &BufferQueue, sequence: u32) {
    queue
        .flush_buffer(sequence, ExtraData::new(), SyncFence::invalid(), &flush_config())
        .unwrap();
}

fn record_deletes(queue: &BufferQueue) -> Arc<Mutex<Vec<u32>>> {
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let sink = deleted.clone();
    queue.register_delete_buffer_listener(Arc::new(move |seq| sink.lock().push(seq)));
    deleted
}

#[test]
fn test_request_until_full_then_cancel() {
    let (queue, _consumer) = queue_with_consumer("full", false);
    assert_eq!(queue.queue_size(), 3);

    let first = queue.request_buffer(&request_config()).unwrap();
    let second = queue.request_buffer(&request_config()).unwrap();
    let third = queue.request_buffer(&request_config()).unwrap();
    assert!(!first.cache_hit);
    assert_ne!(first.sequence, second.sequence);
    assert_ne!(second.sequence, third.sequence);
    assert_eq!(queue.request_buffer(&request_config()).unwrap_err(), GsError::NoBuffer);

    queue.cancel_buffer(second.sequence, ExtraData::new()).unwrap();
    let again = queue.request_buffer(&request_config()).unwrap();
    assert_eq!(again.sequence, second.sequence);
    assert!(again.cache_hit);
    assert!(!again.fence.is_valid());
}

#[test]
fn test_cancel_requires_requested_state() {
    let (queue, _consumer) = queue_with_consumer("cancel", false);
    let ret = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, ret.sequence);
    assert!(matches!(
        queue.cancel_buffer(ret.sequence, ExtraData::new()),
        Err(GsError::InvalidArguments(_))
    ));
    assert!(matches!(queue.cancel_buffer(999, ExtraData::new()), Err(GsError::InvalidArguments(_))));
}

#[test]
fn test_acquire_is_fifo() {
    let (queue, consumer) = queue_with_consumer("fifo", false);
    let a = queue.request_buffer(&request_config()).unwrap();
    let b = queue.request_buffer(&request_config()).unwrap();

    let mut extra = ExtraData::new();
    extra.insert("frame".to_string(), "b".to_string());
    queue
        .flush_buffer(b.sequence, extra, SyncFence::invalid(), &BufferFlushConfig::new(Rect::new(1, 2, 3, 4), 77))
        .unwrap();
    flush(&queue, a.sequence);
    assert_eq!(consumer.available.load(Ordering::SeqCst), 2);

    let acquired = queue.acquire_buffer().unwrap();
    assert_eq!(acquired.sequence, b.sequence);
    assert_eq!(acquired.timestamp, 77);
    assert_eq!(acquired.damage, Rect::new(1, 2, 3, 4));
    assert_eq!(acquired.buffer.extra_data().get("frame").map(String::as_str), Some("b"));
    assert_eq!(queue.acquire_buffer().unwrap().sequence, a.sequence);
    assert_eq!(queue.acquire_buffer().unwrap_err(), GsError::NoBuffer);
}

#[test]
fn test_flush_stamps_missing_timestamp() {
    let (queue, _consumer) = queue_with_consumer("stamp", false);
    let ret = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, ret.sequence);
    assert!(queue.acquire_buffer().unwrap().timestamp > 0);
}

#[test]
fn test_release_before_acquire_is_rejected() {
    let (queue, _consumer) = queue_with_consumer("release", false);
    let ret = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, ret.sequence);
    assert!(matches!(
        queue.release_buffer(&ret.buffer, SyncFence::invalid()),
        Err(GsError::InvalidArguments(_))
    ));

    let acquired = queue.acquire_buffer().unwrap();
    let released = Arc::new(AtomicU32::new(0));
    let counter = released.clone();
    queue.register_release_listener(Arc::new(move |_buffer| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }));
    queue.release_buffer(&acquired.buffer, SyncFence::invalid()).unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shrink_keeps_busy_buffers_until_returned() {
    let (queue, _consumer) = queue_with_consumer("shrink", false);
    let deleted = record_deletes(&queue);
    let a = queue.request_buffer(&request_config()).unwrap();
    let b = queue.request_buffer(&request_config()).unwrap();
    let c = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, a.sequence);
    let acquired_a = queue.acquire_buffer().unwrap();
    flush(&queue, b.sequence);
    queue.cancel_buffer(c.sequence, ExtraData::new()).unwrap();

    queue.set_queue_size(1).unwrap();
    assert_eq!(*deleted.lock(), vec![c.sequence]);
    assert_eq!(queue.used_size(), 2);

    let acquired_b = queue.acquire_buffer().unwrap();
    assert_eq!(acquired_b.sequence, b.sequence);
    queue.release_buffer(&acquired_a.buffer, SyncFence::invalid()).unwrap();
    assert_eq!(*deleted.lock(), vec![c.sequence, a.sequence]);
    assert_eq!(queue.used_size(), 1);
    assert_eq!(queue.request_buffer(&request_config()).unwrap_err(), GsError::NoBuffer);

    queue.release_buffer(&acquired_b.buffer, SyncFence::invalid()).unwrap();
    let ret = queue.request_buffer(&request_config()).unwrap();
    assert_eq!(ret.sequence, b.sequence);
    assert_eq!(ret.deleting_buffers, vec![c.sequence, a.sequence]);
}

#[test]
fn test_queue_size_bounds() {
    let (queue, _consumer) = queue_with_consumer("bounds", false);
    assert!(matches!(queue.set_queue_size(0), Err(GsError::InvalidArguments(_))));
    assert!(matches!(queue.set_queue_size(33), Err(GsError::InvalidArguments(_))));
    queue.set_queue_size(32).unwrap();
    assert_eq!(queue.queue_size(), 32);
}

#[test]
fn test_no_consumer() {
    let queue = BufferQueue::new(context(), "lonely", false);
    assert_eq!(queue.request_buffer(&request_config()).unwrap_err(), GsError::NoConsumer);

    let consumer = Arc::new(CountingConsumer::default());
    queue.register_consumer_listener(consumer);
    let ret = queue.request_buffer(&request_config()).unwrap();

    queue.unregister_consumer_listener();
    assert_eq!(
        queue
            .flush_buffer(ret.sequence, ExtraData::new(), SyncFence::invalid(), &flush_config())
            .unwrap_err(),
        GsError::NoConsumer
    );
    queue.register_consumer_listener(Arc::new(CountingConsumer::default()));
    // the failed flush handed the buffer back
    assert!(queue.request_buffer(&request_config()).unwrap().cache_hit);

    queue.set_status(false);
    assert_eq!(queue.request_buffer(&request_config()).unwrap_err(), GsError::NoConsumer);
}

#[test]
fn test_config_change_reallocates() {
    let (queue, _consumer) = queue_with_consumer("realloc", false);
    let first = queue.request_buffer(&request_config()).unwrap();
    queue.cancel_buffer(first.sequence, ExtraData::new()).unwrap();

    let ret = queue.request_buffer(&BufferRequestConfig::new(128, 64)).unwrap();
    assert_ne!(ret.sequence, first.sequence);
    assert!(!ret.cache_hit);
    assert_eq!(ret.deleting_buffers, vec![first.sequence]);
    assert_eq!(ret.buffer.width(), 128);
    assert_eq!(queue.used_size(), 1);
}

#[test]
fn test_producer_cache_clean_forces_misses() {
    let (queue, _consumer) = queue_with_consumer("clean-flag", false);
    let ret = queue.request_buffer(&request_config()).unwrap();
    queue.cancel_buffer(ret.sequence, ExtraData::new()).unwrap();

    queue.set_producer_cache_clean_flag(true);
    let miss = queue.request_buffer(&request_config()).unwrap();
    assert!(!miss.cache_hit);
    queue.cancel_buffer(miss.sequence, ExtraData::new()).unwrap();
    assert!(queue.request_buffer(&request_config()).unwrap().cache_hit);
}

#[test]
fn test_invalid_request_config() {
    let (queue, _consumer) = queue_with_consumer("invalid", false);
    let mut config = request_config();
    config.stride_alignment = 6;
    assert!(matches!(queue.request_buffer(&config), Err(GsError::InvalidArguments(_))));
    config.stride_alignment = 64;
    assert!(matches!(queue.request_buffer(&config), Err(GsError::InvalidArguments(_))));
    assert_eq!(queue.used_size(), 0);
}

#[test]
fn test_detach_and_attach() {
    let (queue, _consumer) = queue_with_consumer("attach", false);
    let mut config = request_config();
    config.stride_alignment = 8;
    let ret = queue.request_buffer(&config).unwrap();

    queue.detach_buffer(&ret.buffer).unwrap();
    assert_eq!(queue.used_size(), 0);
    assert!(matches!(queue.detach_buffer(&ret.buffer), Err(GsError::InvalidArguments(_))));

    queue.attach_buffer(ret.buffer.clone()).unwrap();
    assert_eq!(queue.used_size(), 1);
    assert!(matches!(queue.attach_buffer(ret.buffer.clone()), Err(GsError::InvalidArguments(_))));
    // a free slot cannot be detached
    assert!(matches!(queue.detach_buffer(&ret.buffer), Err(GsError::InvalidArguments(_))));

    let again = queue.request_buffer(&config).unwrap();
    assert_eq!(again.sequence, ret.sequence);
    assert!(again.cache_hit);
}

#[test]
fn test_attach_to_full_queue_without_free_slots() {
    let (queue, _consumer) = queue_with_consumer("attach-full", false);
    queue.set_queue_size(1).unwrap();
    let held = queue.request_buffer(&request_config()).unwrap();
    let other = ShmAllocator.alloc(9999, &request_config()).unwrap();
    assert!(matches!(queue.attach_buffer(other), Err(GsError::OutOfRange(_))));
    assert_eq!(queue.used_size(), 1);
    assert!(queue.detach_buffer(&held.buffer).is_ok());
}

#[test]
fn test_metadata_and_present_timestamp() {
    let (queue, _consumer) = queue_with_consumer("meta", false);
    let seq = queue.request_buffer(&request_config()).unwrap().sequence;

    assert_eq!(queue.query_metadata_type(seq).unwrap(), HdrMetaDataType::NotUsed);
    assert!(matches!(queue.set_metadata(seq, &[]), Err(GsError::InvalidArguments(_))));
    let metadata = [HdrMetaData { key: HdrMetadataKey::MaxLuminance, value: 1000.0 }];
    queue.set_metadata(seq, &metadata).unwrap();
    assert_eq!(queue.query_metadata_type(seq).unwrap(), HdrMetaDataType::MetaData);
    assert_eq!(queue.get_metadata(seq).unwrap(), metadata.to_vec());

    assert!(matches!(queue.set_metadata_set(seq, 99, &[1]), Err(GsError::InvalidArguments(_))));
    queue.set_metadata_set(seq, 12, &[1, 2, 3]).unwrap();
    assert_eq!(queue.query_metadata_type(seq).unwrap(), HdrMetaDataType::MetaDataSet);
    assert_eq!(queue.get_metadata_set(seq).unwrap(), (HdrMetadataKey::Hdr10Plus, vec![1, 2, 3]));

    queue
        .set_present_timestamp(seq, PresentTimestamp { kind: PresentTimestampType::Delay, time: 5 })
        .unwrap();
    assert_eq!(queue.get_present_timestamp(seq, PresentTimestampType::Delay).unwrap(), 5);
    assert!(matches!(
        queue.get_present_timestamp(seq, PresentTimestampType::Timestamp),
        Err(GsError::NoEntry(_))
    ));
    assert!(matches!(queue.get_metadata(4242), Err(GsError::NoEntry(_))));
}

#[test]
fn test_tunnel_handle_changes() {
    let (queue, consumer) = queue_with_consumer("tunnel", false);
    assert!(matches!(queue.set_tunnel_handle(None), Err(GsError::InvalidArguments(_))));

    queue
        .set_tunnel_handle(Some(Arc::new(TunnelHandle::new(None, vec![1, 2]))))
        .unwrap();
    // identical handle is accepted without notifying
    queue
        .set_tunnel_handle(Some(Arc::new(TunnelHandle::new(None, vec![1, 2]))))
        .unwrap();
    queue
        .set_tunnel_handle(Some(Arc::new(TunnelHandle::new(None, vec![3]))))
        .unwrap();
    assert_eq!(consumer.tunnel_changes.load(Ordering::SeqCst), 2);
    assert_eq!(queue.get_tunnel_handle().unwrap().reserve(), &[3]);
}

#[test]
fn test_shared_queue_reuses_single_buffer() {
    let (queue, _consumer) = queue_with_consumer("shared", true);
    assert!(queue.is_shared());
    assert_eq!(queue.queue_size(), 1);
    assert!(matches!(queue.set_queue_size(2), Err(GsError::InvalidArguments(_))));

    let first = queue.request_buffer(&request_config()).unwrap();
    let second = queue.request_buffer(&request_config()).unwrap();
    assert_eq!(first.sequence, second.sequence);
    assert!(!second.cache_hit);
    assert!(matches!(
        queue.cancel_buffer(first.sequence, ExtraData::new()),
        Err(GsError::InvalidOperating(_))
    ));

    flush(&queue, first.sequence);
    assert_eq!(queue.acquire_buffer().unwrap().sequence, first.sequence);
    assert_eq!(queue.acquire_buffer().unwrap().sequence, first.sequence);
    assert!(matches!(queue.attach_buffer(first.buffer.clone()), Err(GsError::InvalidOperating(_))));
}

#[test]
fn test_first_delete_listener_wins() {
    let (queue, consumer) = queue_with_consumer("delete", false);
    let deleted = record_deletes(&queue);
    let ignored = Arc::new(AtomicU32::new(0));
    let counter = ignored.clone();
    queue.register_delete_buffer_listener(Arc::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let a = queue.request_buffer(&request_config()).unwrap();
    let b = queue.request_buffer(&request_config()).unwrap();
    queue.clean_cache();

    assert_eq!(consumer.cleaned.load(Ordering::SeqCst), 1);
    assert_eq!(*deleted.lock(), vec![a.sequence, b.sequence]);
    assert_eq!(ignored.load(Ordering::SeqCst), 0);
    assert_eq!(queue.used_size(), 0);
}

#[test]
fn test_dump_lists_cache() {
    let (queue, _consumer) = queue_with_consumer("dump-test", false);
    let ret = queue.request_buffer(&request_config()).unwrap();
    let dump = queue.dump();

    assert!(dump.starts_with("    BufferQueue:\n"));
    assert!(dump.contains("FIFO = 3"));
    assert!(dump.contains("name = dump-test"));
    assert!(dump.contains("usedBufferListLen = 1"));
    assert!(dump.contains(&format!("sequence = {}, state = 1 <requested>", ret.sequence)));
}

#[test]
fn test_flush_and_cancel_race_has_one_winner() {
    for _ in 0..200 {
        let (queue, _consumer) = queue_with_consumer("race", false);
        let seq = queue.request_buffer(&request_config()).unwrap().sequence;
        let barrier = Barrier::new(2);

        let (flushed, cancelled) = thread::scope(|s| {
            let flusher = s.spawn(|| {
                barrier.wait();
                queue.flush_buffer(seq, ExtraData::new(), SyncFence::invalid(), &flush_config())
            });
            let canceller = s.spawn(|| {
                barrier.wait();
                queue.cancel_buffer(seq, ExtraData::new())
            });
            (flusher.join().unwrap(), canceller.join().unwrap())
        });

        assert!(flushed.is_ok() != cancelled.is_ok(), "flush {flushed:?} cancel {cancelled:?}");
        if flushed.is_ok() {
            assert_eq!(queue.acquire_buffer().unwrap().sequence, seq);
            assert_ne!(queue.request_buffer(&request_config()).unwrap().sequence, seq);
        } else {
            assert_eq!(queue.acquire_buffer().unwrap_err(), GsError::NoBuffer);
            assert_eq!(queue.request_buffer(&request_config()).unwrap().sequence, seq);
        }
    }
}

#[test]
fn test_background_silences_flush_until_foreground() {
    let (queue, consumer) = queue_with_consumer("background", false);
    let deleted = record_deletes(&queue);
    let a = queue.request_buffer(&request_config()).unwrap();
    let b = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, b.sequence);
    assert_eq!(consumer.available.load(Ordering::SeqCst), 1);

    queue.go_background();
    assert!(queue.is_background());
    assert_eq!(consumer.backgrounded.load(Ordering::SeqCst), 1);
    assert_eq!(*deleted.lock(), vec![a.sequence, b.sequence]);
    assert_eq!(queue.used_size(), 0);

    let ret = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, ret.sequence);
    assert_eq!(consumer.available.load(Ordering::SeqCst), 1);
    // still queued for the consumer
    assert_eq!(queue.acquire_buffer().unwrap().sequence, ret.sequence);

    queue.go_foreground();
    assert!(!queue.is_background());
    let next = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, next.sequence);
    assert_eq!(consumer.available.load(Ordering::SeqCst), 2);
}

#[test]
fn test_go_background_resets_producer_cache_clean() {
    let (queue, _consumer) = queue_with_consumer("background-clean", false);
    let a = queue.request_buffer(&request_config()).unwrap();
    let b = queue.request_buffer(&request_config()).unwrap();
    queue.cancel_buffer(a.sequence, ExtraData::new()).unwrap();
    queue.cancel_buffer(b.sequence, ExtraData::new()).unwrap();

    queue.set_producer_cache_clean_flag(true);
    let miss = queue.request_buffer(&request_config()).unwrap();
    assert!(!miss.cache_hit);
    queue.cancel_buffer(miss.sequence, ExtraData::new()).unwrap();

    queue.go_background();
    let fresh = queue.request_buffer(&request_config()).unwrap();
    queue.cancel_buffer(fresh.sequence, ExtraData::new()).unwrap();
    let reused = queue.request_buffer(&request_config()).unwrap();
    assert_eq!(reused.sequence, fresh.sequence);
    assert!(reused.cache_hit);
}

#[test]
fn test_consumer_death_drops_cache() {
    let (queue, consumer) = queue_with_consumer("consumer-died", false);
    let deleted = record_deletes(&queue);
    let a = queue.request_buffer(&request_config()).unwrap();
    let b = queue.request_buffer(&request_config()).unwrap();
    flush(&queue, a.sequence);
    let acquired = queue.acquire_buffer().unwrap();

    queue.on_consumer_died();
    assert_eq!(*deleted.lock(), vec![a.sequence, b.sequence]);
    assert_eq!(queue.used_size(), 0);
    assert_eq!(consumer.backgrounded.load(Ordering::SeqCst), 0);
    assert_eq!(consumer.cleaned.load(Ordering::SeqCst), 0);
    assert!(matches!(
        queue.release_buffer(&acquired.buffer, SyncFence::invalid()),
        Err(GsError::InvalidArguments(_))
    ));
}
