use super::*;
use crate::cache::EvictionCache;
use std::time::Duration;

fn layers() -> (Arc<EvictionCache<u32>>, Arc<EvictionCache<u32>>, MultiLayerCache<u32>) {
    let fast = Arc::new(EvictionCache::new(2, Duration::from_secs(60)));
    let slow = Arc::new(EvictionCache::new(100, Duration::from_secs(600)));
    let stack = MultiLayerCache::new(vec![
        Arc::clone(&fast) as Arc<dyn CacheLayer<u32>>,
        Arc::clone(&slow) as Arc<dyn CacheLayer<u32>>,
    ]);
    (fast, slow, stack)
}

#[tokio::test]
async fn set_fans_out_to_every_layer() {
    let (fast, slow, stack) = layers();
    stack.set("k", 7, SetOptions::default()).await;

    assert_eq!(fast.get("k").await, Some(7));
    assert_eq!(slow.get("k").await, Some(7));
    assert_eq!(stack.layer_count(), 2);
}

#[tokio::test]
async fn lower_layer_hit_is_promoted() {
    let (fast, slow, stack) = layers();
    slow.set("k", 1, SetOptions::default()).await;

    assert_eq!(stack.get("k").await, Some(1));
    assert!(fast.has("k").await);

    assert_eq!(stack.get("k").await, Some(1));
    let stats = stack.stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.layer_hits, vec![1, 1]);
}

#[tokio::test]
async fn miss_is_counted_once() {
    let (_, _, stack) = layers();
    assert_eq!(stack.get("absent").await, None);

    let stats = stack.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.layer_hits, vec![0, 0]);
    assert!(stats.hit_rate.abs() < f64::EPSILON);
}

#[tokio::test]
async fn size_reports_primary_layer() {
    let (_, slow, stack) = layers();
    for (i, key) in ["a", "b", "c", "d"].into_iter().enumerate() {
        stack.set(key, i as u32, SetOptions::default()).await;
    }

    assert_eq!(stack.size().await, 2);
    assert_eq!(slow.size().await, 4);
    assert!(stack.has("a").await);
}

#[tokio::test]
async fn delete_and_clear_fan_out() {
    let (fast, slow, stack) = layers();
    stack.set("k", 1, SetOptions::default()).await;
    stack.set("j", 2, SetOptions::default()).await;

    assert!(stack.delete("k").await);
    assert!(!fast.has("k").await);
    assert!(!slow.has("k").await);
    assert!(!stack.delete("k").await);

    stack.clear().await;
    assert_eq!(slow.size().await, 0);
}

#[tokio::test]
async fn empty_stack_is_always_a_miss() {
    let stack: MultiLayerCache<u32> = MultiLayerCache::new(Vec::new());
    stack.set("k", 1, SetOptions::default()).await;

    assert_eq!(stack.get("k").await, None);
    assert_eq!(stack.size().await, 0);
}
