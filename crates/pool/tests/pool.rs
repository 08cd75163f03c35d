use anyhow::Result;
use rand::Rng;
use srtp_keydb_pool::{Error, Handle, ObjectPool, PoolOptions, PoolType};

#[test]
fn test_object_pool_random_churn() -> Result<()> {
    let mut rng = rand::rng();
    let mut pool = ObjectPool::new(PoolOptions {
        kind: PoolType::Dynamic,
        page_items: 8,
        max_items: 256,
        min_items: 8,
        free_level: 10,
    });

    let mut live: Vec<(Handle<u32>, u32)> = Vec::new();
    let mut released: Vec<Handle<u32>> = Vec::new();

    for value in 0..10_000u32 {
        if live.is_empty() || (live.len() < 256 && rng.random_bool(0.55)) {
            let handle = pool.alloc(value)?;
            live.push((handle, value));
        } else {
            let (handle, value) = live.swap_remove(rng.random_range(0..live.len()));
            assert_eq!(pool.release(handle), Some(value));
            released.push(handle);
        }

        assert_eq!(pool.len(), live.len());
        assert!(pool.capacity() >= 8);
        assert!(pool.capacity() <= 256);
    }

    for (handle, value) in &live {
        assert_eq!(pool.get(*handle), Some(value));
    }

    for handle in released {
        assert_eq!(pool.get(handle), None);
    }

    Ok(())
}

#[test]
fn test_object_pool_capped_growth() -> Result<()> {
    let mut pool = ObjectPool::new(PoolOptions {
        kind: PoolType::Expanding,
        page_items: 3,
        max_items: 5,
        min_items: 0,
        free_level: 0,
    });

    let handles = (0..5).map(|i| pool.alloc(i)).collect::<Result<Vec<_>, _>>()?;
    assert_eq!(pool.alloc(5), Err(Error::Exhausted));

    pool.release(handles[0]);
    assert_eq!(pool.capacity(), 5);
    assert!(pool.alloc(5).is_ok());

    let mut values = pool.iter().map(|(_, value)| *value).collect::<Vec<_>>();
    values.sort();
    assert_eq!(values, vec![1, 2, 3, 4, 5]);

    Ok(())
}

#[test]
fn test_exhausted_error_message() -> Result<()> {
    let mut pool = ObjectPool::new(PoolOptions::fixed(1));
    pool.alloc(())?;

    let error = pool.alloc(()).unwrap_err();
    assert_eq!(error, Error::Exhausted);
    assert_eq!(error.to_string(), "no free slot left");

    Ok(())
}
