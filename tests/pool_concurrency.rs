//! Buffer pool accounting under concurrent producers and changing shapes.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::assertions::assert_pool_consistent;
use common::test_frames::{HD, VGA};
use frame_pipeline::{BufferPool, BufferShape, PixelLayout, PooledFrame};
use proptest::prelude::*;

#[test]
fn concurrent_allocate_release_stays_consistent() {
    const CAPACITY: usize = 6;
    let pool = BufferPool::shared(CAPACITY);

    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let shape = if worker % 2 == 0 { VGA } else { HD };
                let mut ok = 0u32;
                for i in 0..500u32 {
                    match pool.allocate(shape) {
                        Ok(mut frame) => {
                            assert_eq!(frame.shape(), shape);
                            assert!(frame.data().iter().take(64).all(|&b| b == 0));
                            frame.data_mut()[0] = (i & 0xFF) as u8 | 1;
                            pool.release(frame).unwrap();
                            ok += 1;
                        }
                        Err(err) => assert_eq!(err.category(), "resource_exhausted"),
                    }
                }
                ok
            })
        })
        .collect();

    let succeeded: u32 = workers.into_iter().map(|w| w.join().unwrap()).sum();
    assert!(succeeded > 0);

    let stats = pool.stats();
    assert_pool_consistent(&stats, CAPACITY);
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.allocations, 8 * 500);
}

#[test]
fn distinct_shapes_beyond_capacity_fail_without_evictable_buffers() {
    let pool = BufferPool::new(3);
    let held: Vec<_> = (1..=3)
        .map(|i| pool.allocate(BufferShape::new(16 * i, 16, PixelLayout::Nv12)).unwrap())
        .collect();

    let err = pool
        .allocate(BufferShape::new(128, 16, PixelLayout::Nv12))
        .unwrap_err();
    assert_eq!(err.category(), "resource_exhausted");
    assert_eq!(pool.stats().total, 3);

    for frame in held {
        pool.release(frame).unwrap();
    }
}

#[test]
fn resolution_switch_evicts_stale_buffers() {
    let pool = BufferPool::with_idle_eviction(2, Duration::from_millis(30));
    let a = pool.allocate(VGA).unwrap();
    let b = pool.allocate(VGA).unwrap();
    pool.release(a).unwrap();
    pool.release(b).unwrap();

    thread::sleep(Duration::from_millis(60));
    let hd = pool.allocate(HD).unwrap();
    assert_eq!(hd.shape(), HD);

    let stats = pool.stats();
    assert_pool_consistent(&stats, 2);
    assert_eq!(stats.in_use, 1);
    pool.release(hd).unwrap();
}

#[test]
fn guards_return_buffers_from_other_threads() {
    let pool = BufferPool::shared(4);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..100 {
                    let mut frame = loop {
                        match PooledFrame::allocate(&pool, VGA) {
                            Ok(frame) => break frame,
                            Err(_) => thread::yield_now(),
                        }
                    };
                    frame.data_mut()[1] = 9;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.total <= 4);
}

proptest! {
    #[test]
    fn allocate_release_cycles_create_one_buffer(
        capacity in 1usize..8,
        cycles in 1usize..50,
        width in 1u32..64,
        height in 1u32..64,
    ) {
        let pool = BufferPool::new(capacity);
        let shape = BufferShape::new(width, height, PixelLayout::Yuv420p);
        for _ in 0..cycles {
            let frame = pool.allocate(shape).unwrap();
            prop_assert_eq!(frame.data().len(), shape.byte_len());
            pool.release(frame).unwrap();
        }
        let stats = pool.stats();
        prop_assert_eq!(stats.total, 1);
        prop_assert_eq!(stats.peak, 1);
    }

    #[test]
    fn pool_never_exceeds_capacity(capacity in 1usize..6, requests in 1usize..20) {
        let pool = BufferPool::new(capacity);
        let mut held = Vec::new();
        for i in 0..requests {
            let shape = BufferShape::new(8 + i as u32, 8, PixelLayout::Rgb24);
            match pool.allocate(shape) {
                Ok(frame) => held.push(frame),
                Err(err) => prop_assert_eq!(err.category(), "resource_exhausted"),
            }
            prop_assert!(pool.stats().total <= capacity);
        }
        prop_assert_eq!(held.len(), requests.min(capacity));
    }
}
