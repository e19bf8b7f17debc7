//! Batch splitting helpers for the pipeline stages.

/// Split a vector into owned chunks of at most `size` elements.
pub(crate) fn split_chunks<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    debug_assert!(size > 0);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size.max(1)));
    let mut current = Vec::with_capacity(size.min(items.len()));

    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Split a batch so that the estimated bytes per chunk stay below
/// `max_memory`.
///
/// `multiplier` accounts for how many pipeline stages hold a copy of
/// the data at the same time. A single item larger than the budget
/// still forms its own chunk.
pub(crate) fn chunk_by_memory<T>(
    items: Vec<T>,
    max_memory: u64,
    multiplier: u64,
    size_of: impl Fn(&T) -> u64,
) -> Vec<Vec<T>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut used: u64 = 0;

    for item in items {
        let cost = size_of(&item).saturating_mul(multiplier);
        if !current.is_empty() && used.saturating_add(cost) >= max_memory {
            chunks.push(std::mem::take(&mut current));
            used = 0;
        }
        used = used.saturating_add(cost);
        current.push(item);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
