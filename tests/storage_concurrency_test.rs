//! Concurrency tests for the string pool and volumes

use attrstore::error::{Error, Result};
use attrstore::storage::{Compression, Mode, RowValue, Volume};
use attrstore::StringPool;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

#[test]
fn test_pool_concurrent_puts_agree() -> Result<()> {
    let pool = Arc::new(StringPool::new());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let pool = pool.clone();
            thread::spawn(move || -> Result<Vec<(String, u32)>> {
                let mut seen = Vec::new();
                for i in 0..2_000 {
                    // Threads overlap on half of their strings
                    let value = format!("s{}", (i + t * 1_000) % 9_000);
                    let id = pool.put(&value)?;
                    seen.push((value, id));
                }
                Ok(seen)
            })
        })
        .collect();

    let mut ids: HashMap<String, u32> = HashMap::new();
    for handle in handles {
        let seen = handle
            .join()
            .map_err(|_| Error::Usage("worker panicked".to_string()))??;
        for (value, id) in seen {
            assert_eq!(*ids.entry(value.clone()).or_insert(id), id, "{} got two ids", value);
            assert_eq!(pool.get_value(id).as_deref(), Some(value.as_str()));
        }
    }
    assert_eq!(pool.len(), ids.len());
    Ok(())
}

#[test]
fn test_bounded_pool_accepts_exactly_capacity() -> Result<()> {
    let pool = StringPool::with_capacity(100);
    for i in 0..100 {
        pool.put(&format!("v{}", i))?;
    }
    assert!(matches!(
        pool.put("one-too-many"),
        Err(Error::PoolExhausted { capacity: 100 })
    ));
    assert_eq!(pool.put("v42")?, pool.get_index("v42").unwrap_or(u32::MAX));
    Ok(())
}

#[test]
fn test_volume_concurrent_growth() -> Result<()> {
    const THREADS: u64 = 8;
    const WRITES: usize = 50_000;
    const ROWS: u64 = 1 << 16;

    let volume = Arc::new(Volume::new(Mode::Long, 4, 11, Compression::none()));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let volume = volume.clone();
            thread::spawn(move || -> Result<HashMap<u64, i64>> {
                let mut rng = rand::thread_rng();
                let mut written = HashMap::new();
                for _ in 0..WRITES {
                    // Each thread owns the rows congruent to t
                    let row = rng.gen_range(0..ROWS / THREADS) * THREADS + t;
                    let value: i64 = rng.gen();
                    volume.put_long(row, value, false)?;
                    written.insert(row, value);
                }
                Ok(written)
            })
        })
        .collect();

    for handle in handles {
        let written = handle
            .join()
            .map_err(|_| Error::Usage("writer panicked".to_string()))??;
        for (row, value) in written {
            assert_eq!(volume.get_long(row)?.map(|v| v.value), Some(value), "row {}", row);
        }
    }
    assert!(volume.block_count() >= (ROWS >> 11) as usize - 1);
    Ok(())
}

#[test]
fn test_compression_is_transparent() -> Result<()> {
    let volume = Volume::new(Mode::Int, 2, 8, Compression::default());
    let values: Vec<RowValue<i32>> = (0..2_000u64)
        .step_by(3)
        .map(|row| RowValue::new(row, (row as i32) % 17 - 8, row % 2 == 0))
        .collect();
    volume.put_ints(&values)?;

    volume.compress_storage()?;
    assert!(volume.stats().compressed_blocks > 0);
    volume.put_int(1, 99, false)?;
    volume.decompress_storage()?;

    for expected in &values {
        assert_eq!(volume.get_int(expected.row)?, Some(*expected));
    }
    assert_eq!(volume.get_int(1)?.map(|v| v.value), Some(99));
    assert!(!volume.has_value(2)?);
    Ok(())
}
