//! Decoder instance pool
//!
//! Keeps a bounded, per-media-type cache of reusable hardware decoder
//! handles. Each media type owns its own lock-free bounded queue, so
//! `acquire`/`release`/`clear` and the warm-up task never contend on a
//! global lock. Handles move in and out of the pool by value: a handle
//! held by a session is never visible to the pool.

use crate::decoder::{DecoderFactory, HardwareDecoder, MediaType, StreamFormat};
use crate::utils::error::{PipelineError, Result};
use crossbeam::queue::ArrayQueue;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Target pool size per media type
pub type PoolCapacities = HashMap<MediaType, usize>;

/// A decoder handle owned by exactly one holder at a time
pub struct PooledDecoder {
    serial: u64,
    media_type: MediaType,
    decoder: Box<dyn HardwareDecoder>,
}

impl PooledDecoder {
    /// Pool-unique serial of this handle
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn decoder_mut(&mut self) -> &mut dyn HardwareDecoder {
        self.decoder.as_mut()
    }
}

impl std::fmt::Debug for PooledDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledDecoder")
            .field("serial", &self.serial)
            .field("media_type", &self.media_type)
            .finish()
    }
}

/// Snapshot of one media type's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct PoolStats {
    /// Handles waiting in the pool
    pub idle: usize,
    /// Handles currently held by sessions
    pub outstanding: usize,
    /// Maximum idle handles kept
    pub capacity: usize,
}

/// Outcome of a warm-up run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct WarmUpReport {
    pub created: usize,
    pub failed: usize,
}

/// Handle to the background warm-up task
pub struct WarmUpHandle {
    handle: thread::JoinHandle<WarmUpReport>,
}

impl WarmUpHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for warm-up to finish
    pub fn join(self) -> Result<WarmUpReport> {
        self.handle
            .join()
            .map_err(|_| PipelineError::Internal("decoder warm-up task panicked".to_string()))
    }
}

struct TypePool {
    idle: Option<ArrayQueue<PooledDecoder>>,
    outstanding: AtomicUsize,
}

impl TypePool {
    fn new(capacity: usize) -> Self {
        Self {
            idle: (capacity > 0).then(|| ArrayQueue::new(capacity)),
            outstanding: AtomicUsize::new(0),
        }
    }

    fn idle_len(&self) -> usize {
        self.idle.as_ref().map_or(0, |q| q.len())
    }

    fn capacity(&self) -> usize {
        self.idle.as_ref().map_or(0, |q| q.capacity())
    }
}

/// Bounded per-type cache of hardware decoder handles
pub struct DecoderPool {
    factory: Arc<dyn DecoderFactory>,
    pools: HashMap<MediaType, TypePool>,
    next_serial: AtomicU64,
}

impl DecoderPool {
    /// Create a pool; types missing from `capacities` are not pooled
    pub fn new(factory: Arc<dyn DecoderFactory>, capacities: &PoolCapacities) -> Self {
        let pools = [MediaType::Video, MediaType::Audio]
            .into_iter()
            .map(|media_type| {
                let capacity = capacities.get(&media_type).copied().unwrap_or(0);
                (media_type, TypePool::new(capacity))
            })
            .collect();

        Self {
            factory,
            pools,
            next_serial: AtomicU64::new(1),
        }
    }

    fn pool(&self, media_type: MediaType) -> &TypePool {
        // Every MediaType variant is inserted in `new`.
        &self.pools[&media_type]
    }

    fn create(&self, media_type: MediaType) -> Result<PooledDecoder> {
        let decoder = self.factory.create(media_type)?;
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        Ok(PooledDecoder {
            serial,
            media_type,
            decoder,
        })
    }

    /// Take a handle from the pool, creating one if the pool is empty
    ///
    /// Creation failure propagates to the caller.
    pub fn acquire(&self, media_type: MediaType) -> Result<PooledDecoder> {
        let pool = self.pool(media_type);

        let decoder = match pool.idle.as_ref().and_then(|q| q.pop()) {
            Some(decoder) => {
                debug!("Reusing pooled {} decoder #{}", media_type, decoder.serial);
                decoder
            }
            None => {
                let decoder = self.create(media_type)?;
                debug!("Created {} decoder #{}", media_type, decoder.serial);
                decoder
            }
        };

        pool.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(decoder)
    }

    /// Return a handle; it is destroyed if the pool is already full
    pub fn release(&self, decoder: PooledDecoder) {
        let media_type = decoder.media_type;
        let serial = decoder.serial;
        let pool = self.pool(media_type);

        let _ = pool
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        let rejected = match pool.idle.as_ref() {
            Some(queue) => queue.push(decoder).err(),
            None => Some(decoder),
        };

        match rejected {
            Some(decoder) => {
                debug!("{} pool full, destroying decoder #{}", media_type, serial);
                drop(decoder);
            }
            None => debug!("Returned {} decoder #{} to pool", media_type, serial),
        }
    }

    /// Destroy a handle that can no longer be reused (e.g. failed to configure)
    pub fn discard(&self, decoder: PooledDecoder) {
        let pool = self.pool(decoder.media_type);
        let _ = pool
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        warn!("Discarding {} decoder #{}", decoder.media_type, decoder.serial);
        drop(decoder);
    }

    /// Pre-create decoders up to each type's target on a background thread
    ///
    /// Targets are capped by the pool capacity. A creation or configuration
    /// failure only skips that slot.
    pub fn warm_up_async(self: &Arc<Self>, capacities: PoolCapacities) -> Result<WarmUpHandle> {
        let pool = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("decoder-warmup".to_string())
            .spawn(move || pool.warm_up(&capacities))?;

        Ok(WarmUpHandle { handle })
    }

    fn warm_up(&self, capacities: &PoolCapacities) -> WarmUpReport {
        let mut report = WarmUpReport::default();

        for media_type in [MediaType::Video, MediaType::Audio] {
            let Some(&target) = capacities.get(&media_type) else {
                continue;
            };
            let pool = self.pool(media_type);
            let Some(queue) = pool.idle.as_ref() else {
                continue;
            };
            let target = target.min(queue.capacity());
            let placeholder = StreamFormat::placeholder(media_type);

            for _ in queue.len()..target {
                let mut decoder = match self.create(media_type) {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        warn!("Warm-up: failed to create {} decoder: {}", media_type, e);
                        report.failed += 1;
                        continue;
                    }
                };

                if let Err(e) = decoder.decoder.configure(&placeholder, None) {
                    warn!("Warm-up: failed to configure {} decoder: {}", media_type, e);
                    report.failed += 1;
                    continue;
                }

                if queue.push(decoder).is_ok() {
                    report.created += 1;
                }
            }
        }

        info!(
            "Decoder warm-up finished: {} created, {} failed",
            report.created, report.failed
        );
        report
    }

    /// Destroy every idle handle; handles held by sessions are unaffected
    pub fn clear(&self) -> usize {
        let mut destroyed = 0;
        for (media_type, pool) in &self.pools {
            if let Some(queue) = pool.idle.as_ref() {
                while let Some(decoder) = queue.pop() {
                    debug!("Clearing {} decoder #{}", media_type, decoder.serial);
                    drop(decoder);
                    destroyed += 1;
                }
            }
        }
        if destroyed > 0 {
            info!("Decoder pool cleared, {} handles destroyed", destroyed);
        }
        destroyed
    }

    pub fn stats(&self, media_type: MediaType) -> PoolStats {
        let pool = self.pool(media_type);
        PoolStats {
            idle: pool.idle_len(),
            outstanding: pool.outstanding.load(Ordering::Acquire),
            capacity: pool.capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimDecoderFactory;
    use std::collections::HashSet;

    fn capacities(video: usize, audio: usize) -> PoolCapacities {
        let mut c = PoolCapacities::new();
        c.insert(MediaType::Video, video);
        c.insert(MediaType::Audio, audio);
        c
    }

    #[test]
    fn test_acquire_creates_when_empty() {
        let factory = Arc::new(SimDecoderFactory::new());
        let pool = DecoderPool::new(factory.clone(), &capacities(2, 2));

        let decoder = pool.acquire(MediaType::Video).unwrap();
        assert_eq!(factory.created(), 1);
        assert_eq!(pool.stats(MediaType::Video).outstanding, 1);

        pool.release(decoder);
        let stats = pool.stats(MediaType::Video);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.outstanding, 0);
    }

    #[test]
    fn test_release_reuses_handle() {
        let factory = Arc::new(SimDecoderFactory::new());
        let pool = DecoderPool::new(factory.clone(), &capacities(1, 1));

        let first = pool.acquire(MediaType::Audio).unwrap();
        let serial = first.serial();
        pool.release(first);

        let second = pool.acquire(MediaType::Audio).unwrap();
        assert_eq!(second.serial(), serial);
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn test_release_over_capacity_destroys() {
        let factory = Arc::new(SimDecoderFactory::new());
        let pool = DecoderPool::new(factory.clone(), &capacities(1, 0));

        let a = pool.acquire(MediaType::Video).unwrap();
        let b = pool.acquire(MediaType::Video).unwrap();
        pool.release(a);
        pool.release(b);

        assert_eq!(pool.stats(MediaType::Video).idle, 1);
        assert_eq!(factory.live(), 1);

        // Zero capacity means nothing is pooled
        let c = pool.acquire(MediaType::Audio).unwrap();
        pool.release(c);
        assert_eq!(pool.stats(MediaType::Audio).idle, 0);
        assert_eq!(factory.live(), 1);
    }

    #[test]
    fn test_acquire_failure_propagates() {
        let factory = Arc::new(SimDecoderFactory::new());
        factory.fail_next_creates(1);
        let pool = DecoderPool::new(factory, &capacities(2, 2));

        assert!(pool.acquire(MediaType::Video).is_err());
        assert_eq!(pool.stats(MediaType::Video).outstanding, 0);
        assert!(pool.acquire(MediaType::Video).is_ok());
    }

    #[test]
    fn test_warm_up_then_concurrent_acquire() {
        let factory = Arc::new(SimDecoderFactory::new());
        let pool = Arc::new(DecoderPool::new(factory.clone(), &capacities(2, 2)));

        let report = pool.warm_up_async(capacities(2, 2)).unwrap().join().unwrap();
        assert_eq!(report, WarmUpReport { created: 4, failed: 0 });
        assert_eq!(factory.created(), 4);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || pool.acquire(MediaType::Video).unwrap())
            })
            .collect();
        let decoders: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let serials: HashSet<_> = decoders.iter().map(|d| d.serial()).collect();
        assert_eq!(serials.len(), 2);
        assert_eq!(factory.created(), 4);
    }

    #[test]
    fn test_warm_up_failure_is_skipped() {
        let factory = Arc::new(SimDecoderFactory::new());
        factory.fail_next_creates(1);
        let pool = Arc::new(DecoderPool::new(factory.clone(), &capacities(2, 2)));

        let report = pool.warm_up_async(capacities(2, 2)).unwrap().join().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 3);
    }

    #[test]
    fn test_warm_up_capped_by_capacity() {
        let factory = Arc::new(SimDecoderFactory::new());
        let pool = Arc::new(DecoderPool::new(factory.clone(), &capacities(1, 1)));

        let report = pool.warm_up_async(capacities(5, 5)).unwrap().join().unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(pool.stats(MediaType::Video).idle, 1);
    }

    #[test]
    fn test_clear_leaves_outstanding_handles() {
        let factory = Arc::new(SimDecoderFactory::new());
        let pool = Arc::new(DecoderPool::new(factory.clone(), &capacities(2, 2)));
        pool.warm_up_async(capacities(2, 2)).unwrap().join().unwrap();

        let held = pool.acquire(MediaType::Video).unwrap();
        assert_eq!(pool.clear(), 3);
        assert_eq!(factory.live(), 1);

        pool.release(held);
        assert_eq!(pool.stats(MediaType::Video).idle, 1);
        assert_eq!(factory.live(), 1);
    }

    #[test]
    fn test_clear_during_concurrent_traffic_and_warm_up() {
        let factory = Arc::new(SimDecoderFactory::new());
        let pool = Arc::new(DecoderPool::new(factory.clone(), &capacities(3, 3)));
        let warm_up = pool.warm_up_async(capacities(3, 3)).unwrap();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let media_type = if worker % 2 == 0 { MediaType::Video } else { MediaType::Audio };
                    let mut held = Vec::new();
                    for i in 0..2_000 {
                        if i % 3 == 2 {
                            if let Some(decoder) = held.pop() {
                                pool.release(decoder);
                            }
                        } else {
                            held.push(pool.acquire(media_type).unwrap());
                        }
                        if held.len() > 4 {
                            pool.release(held.remove(0));
                        }
                    }
                    held
                })
            })
            .collect();

        let clearer = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..500 {
                    pool.clear();
                    thread::yield_now();
                }
            })
        };

        warm_up.join().unwrap();
        clearer.join().unwrap();
        let held: Vec<PooledDecoder> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();

        let video = pool.stats(MediaType::Video);
        let audio = pool.stats(MediaType::Audio);
        assert!(video.idle <= 3 && audio.idle <= 3);
        assert_eq!(video.outstanding + audio.outstanding, held.len());
        assert_eq!(factory.live(), video.idle + audio.idle + held.len());

        let serials: HashSet<_> = held.iter().map(|d| d.serial()).collect();
        assert_eq!(serials.len(), held.len());

        drop(held);
        pool.clear();
        assert_eq!(factory.live(), 0);
    }
}
