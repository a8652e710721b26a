//! Mutual-follow intersection and in-memory pagination

use follow_types::PageRequest;
use std::collections::HashSet;

/// Intersect two follow lists.
///
/// The membership set is built from the smaller list and the larger one is
/// scanned, so the cost is O(|a| + |b|) with memory bounded by the smaller
/// side. The result keeps the order of `a`.
pub fn intersect_follow_sets(a: &[String], b: &[String]) -> Vec<String> {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let members: HashSet<&str> = small.iter().map(String::as_str).collect();

    let common: HashSet<&str> = large
        .iter()
        .map(String::as_str)
        .filter(|id| members.contains(id))
        .collect();

    a.iter()
        .filter(|id| common.contains(id.as_str()))
        .cloned()
        .collect()
}

/// Cut one page out of a fully materialized result.
pub fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Vec<T> {
    items
        .iter()
        .skip(page.offset())
        .take(page.limit())
        .cloned()
        .collect()
}
