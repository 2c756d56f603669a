/// A macro to simplify caching logic using Redis.
///
/// Checks whether a value is present in the cache. If found, the cached value
/// is returned. Otherwise the provided block computes the value, the result is
/// queued for a background cache write, and the computed value is returned.
/// Cache read failures are logged and treated as misses, so an unreachable
/// Redis never fails a lookup.
///
/// # Arguments
/// * `$cache`: Cache instance exposing `get_from_cache` and `set_in_background`.
/// * `$key`: The [`CacheKey`](crate::db::CacheKey) to cache the value under.
/// * `$ttl`: Time-to-live for the cached value, in seconds.
/// * `$block`: Async block executed on a cache miss.
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        let cached = match $cache.get_from_cache(&$key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(error = %e, key = %$key, "Cache read failed, treating as miss");
                None
            }
        };
        if let Some(value) = cached {
            Ok(value)
        } else {
            let value = $block.await?;
            $cache.set_in_background(&$key, &value, $ttl);
            Ok(value)
        }
    }};
}
