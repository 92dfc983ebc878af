/// Read-through caching of an optional JSON value.
///
/// Returns the cached value when present. Otherwise awaits `$block`, which
/// must yield `AppResult<Option<T>>`, and stores the value only when it is `Some`.
///
/// # Arguments
/// * `$cache`: a [`Cache`](crate::db::Cache)
/// * `$key`: the [`CacheKey`](crate::db::CacheKey)
/// * `$ttl`: time-to-live in seconds
/// * `$block`: the future computing the value on a miss
///
/// # Example
/// ```rust,ignore
/// let related: Option<Vec<TitleId>> = cached!(cache, CacheKey::Related(id), ttl, async {
///     provider.get_related_anime(id).await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(cached) = $cache.get_json(&$key).await {
            Ok(Some(cached))
        } else {
            match $block.await {
                Ok(Some(value)) => {
                    $cache.set_json(&$key, &value, $ttl).await;
                    Ok(Some(value))
                }
                other => other,
            }
        }
    }};
}

/// Same as [`cached!`] for title frames, stored in columnar form.
///
/// `$block` must yield `AppResult<Option<Vec<Title>>>`.
#[macro_export]
macro_rules! cached_frame {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        if let Some(rows) = $cache.get_dataframe(&$key).await {
            Ok(Some(rows))
        } else {
            match $block.await {
                Ok(Some(rows)) => {
                    $cache.set_dataframe(&$key, &rows, $ttl).await;
                    Ok(Some(rows))
                }
                other => other,
            }
        }
    }};
}
