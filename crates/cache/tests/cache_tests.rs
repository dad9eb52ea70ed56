use bourse_cache::mem::MemCache;
use bourse_core::cache::port::{Cache, CacheExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct TestItem {
    id: u32,
    name: String,
}

#[tokio::test]
async fn test_mem_cache_raw_ops() {
    let cache = MemCache::new();
    let key = "raw_key";
    let value = vec![1, 2, 3, 4];

    // 测试存取
    cache.set_raw(key, value.clone(), None).await.unwrap();
    let result = cache.get_raw(key).await.unwrap().unwrap();
    assert_eq!(result, value);

    // 测试删除
    cache.del(key).await.unwrap();
    let result = cache.get_raw(key).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_mem_cache_typed_ops() {
    let cache = MemCache::new();
    let key = "typed_key";
    let item = TestItem {
        id: 42,
        name: "AAPL".to_string(),
    };

    cache.set(key, &item, None).await.unwrap();

    let result: TestItem = cache.get(key).await.unwrap().unwrap();
    assert_eq!(result, item);
}

#[tokio::test]
async fn test_mem_cache_ttl_expiry() {
    let cache = MemCache::new();
    cache
        .set_raw("short", vec![9], Some(Duration::from_millis(20)))
        .await
        .unwrap();
    cache.set_raw("forever", vec![1], None).await.unwrap();

    assert_eq!(cache.get_raw("short").await.unwrap(), Some(vec![9]));

    tokio::time::sleep(Duration::from_millis(40)).await;

    // 过期条目表现为不存在，并在读取时被清除
    assert!(cache.get_raw("short").await.unwrap().is_none());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get_raw("forever").await.unwrap(), Some(vec![1]));
}

#[tokio::test]
async fn test_mem_cache_overwrite_resets_ttl() {
    let cache = MemCache::new();
    cache
        .set_raw("k", vec![1], Some(Duration::from_millis(10)))
        .await
        .unwrap();
    cache.set_raw("k", vec![2], None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(cache.get_raw("k").await.unwrap(), Some(vec![2]));
}

#[tokio::test]
async fn test_mem_cache_deserialize_error() {
    let cache = MemCache::new();
    cache.set_raw("bad", b"not json".to_vec(), None).await.unwrap();

    let result: Result<Option<TestItem>, _> = cache.get("bad").await;
    assert!(result.is_err());
}
