/// Benchmark comparing pooled buffer reuse with fresh per-frame allocation, and
/// measuring hand-off throughput of the bounded channel between two threads.
///
/// Time complexity: O(bytes_per_frame * frames) for the allocation comparison, since
/// both paths touch every byte once per frame; O(frames) for the channel hand-off.
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use frame_pipeline::{BoundedChannel, BufferPool, BufferShape, PixelLayout};

fn main() {
    println!("Frame Pipeline Benchmark");
    println!("═══════════════════════════════════");

    let shape = BufferShape::new(1920, 1080, PixelLayout::Yuv420p);
    let frames = 300; // 10 seconds at 30fps

    println!(
        "Benchmarking: {} ({} bytes per frame), {} frames",
        shape,
        shape.byte_len(),
        frames
    );
    println!();

    println!("Running fresh allocation per frame...");
    let fresh_time = fresh_allocation(shape, frames);

    println!("Running pooled allocation with reuse...");
    let pooled_time = pooled_allocation(shape, frames);

    let improvement_ratio = fresh_time.as_secs_f64() / pooled_time.as_secs_f64().max(1e-9);

    println!();
    println!("Allocation Results:");
    println!("───────────");
    println!(
        "Fresh allocation: {:.3} ms per frame ({:.2} s total)",
        fresh_time.as_secs_f64() * 1000.0 / frames as f64,
        fresh_time.as_secs_f64()
    );
    println!(
        "Pooled buffers:   {:.3} ms per frame ({:.2} s total)",
        pooled_time.as_secs_f64() * 1000.0 / frames as f64,
        pooled_time.as_secs_f64()
    );
    println!("Pool speedup: {:.1}x", improvement_ratio);

    println!();
    println!("Channel Hand-off:");
    println!("─────────────────────");
    for capacity in [1, 4, 16, 64] {
        let items = 200_000;
        let elapsed = channel_throughput(capacity, items);
        println!(
            "capacity {:>3}: {:>10.0} items/s ({:.1} ns per item)",
            capacity,
            items as f64 / elapsed.as_secs_f64().max(1e-9),
            elapsed.as_nanos() as f64 / items as f64
        );
    }
}

fn fresh_allocation(shape: BufferShape, frames: usize) -> Duration {
    let start = Instant::now();
    for i in 0..frames {
        let mut buffer = vec![0u8; shape.byte_len()];
        buffer[i % shape.byte_len()] = i as u8;
        black_box(&buffer);
    }
    start.elapsed()
}

fn pooled_allocation(shape: BufferShape, frames: usize) -> Duration {
    let pool = BufferPool::new(4);
    let start = Instant::now();
    for i in 0..frames {
        let Ok(mut frame) = pool.allocate(shape) else {
            eprintln!("pool exhausted at frame {}", i);
            break;
        };
        frame.data_mut()[i % shape.byte_len()] = i as u8;
        black_box(frame.data());
        if let Err(e) = pool.release(frame) {
            eprintln!("release failed: {}", e);
        }
    }
    let elapsed = start.elapsed();
    let stats = pool.stats();
    println!(
        "  pool: {} buffer(s) created for {} allocations",
        stats.total, stats.allocations
    );
    elapsed
}

fn channel_throughput(capacity: usize, items: u64) -> Duration {
    let channel = Arc::new(BoundedChannel::new(capacity));
    let start = Instant::now();
    let consumer = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            let mut sum = 0u64;
            while let Ok(value) = channel.pop() {
                sum = sum.wrapping_add(value);
            }
            sum
        })
    };
    for i in 0..items {
        if channel.push(i).is_err() {
            break;
        }
    }
    channel.stop();
    let sum = consumer.join().unwrap_or_default();
    black_box(sum);
    start.elapsed()
}
