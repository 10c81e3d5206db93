//! Chunk sizing over segment word counts.
//!
//! Works on weights only, so the policy is independent of how segments were
//! produced. Every returned range is non-empty and ranges tile `0..n`.

use std::ops::Range;

/// Plan chunk boundaries for segments with the given word counts.
///
/// - total ≤ target: one chunk
/// - target < total < 2×target: two chunks split as evenly as the segment
///   boundaries allow
/// - otherwise fill chunks greedily; whenever the remaining tail drops below
///   2×target, that tail is split in two evenly instead
pub fn plan(weights: &[usize], target: usize) -> Vec<Range<usize>> {
    let n = weights.len();
    if n == 0 {
        return Vec::new();
    }

    let mut suffix = vec![0usize; n + 1];
    for i in (0..n).rev() {
        suffix[i] = suffix[i + 1] + weights[i];
    }

    let mut ranges = Vec::new();
    let mut start = 0;

    while start < n {
        let remaining = suffix[start];

        if remaining <= target {
            ranges.push(start..n);
            break;
        }

        if remaining < target.saturating_mul(2) {
            ranges.extend(split_in_two(weights, start..n));
            break;
        }

        let mut end = start;
        let mut filled = 0;
        while end < n {
            if end > start && filled + weights[end] > target {
                break;
            }
            filled += weights[end];
            end += 1;
        }

        ranges.push(start..end);
        start = end;
    }

    ranges
}

/// Split a range into two parts whose word counts differ as little as
/// possible. Both parts must carry words; otherwise the range is returned
/// whole.
pub fn split_in_two(weights: &[usize], range: Range<usize>) -> Vec<Range<usize>> {
    let total: usize = weights[range.clone()].iter().sum();

    let mut best: Option<(usize, usize)> = None;
    let mut prefix = 0;
    for k in range.start + 1..range.end {
        prefix += weights[k - 1];
        if prefix == 0 || prefix == total {
            continue;
        }
        let diff = (2 * prefix).abs_diff(total);
        if best.map_or(true, |(_, d)| diff < d) {
            best = Some((k, diff));
        }
    }

    match best {
        Some((k, _)) => vec![range.start..k, k..range.end],
        None => vec![range],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sums(weights: &[usize], ranges: &[Range<usize>]) -> Vec<usize> {
        ranges.iter().map(|r| weights[r.clone()].iter().sum()).collect()
    }

    #[test]
    fn test_single_chunk_when_under_target() {
        let weights = vec![10, 20, 30];
        assert_eq!(plan(&weights, 60), vec![0..3]);
    }

    #[test]
    fn test_two_balanced_chunks_between_target_and_double() {
        let weights = vec![10; 50];
        let ranges = plan(&weights, 320);
        assert_eq!(ranges, vec![0..25, 25..50]);
    }

    #[test]
    fn test_balanced_tail_instead_of_small_leftover() {
        let weights = vec![10; 100];
        let ranges = plan(&weights, 320);
        let totals = sums(&weights, &ranges);

        assert_eq!(totals, vec![320, 320, 180, 180]);
    }

    #[test]
    fn test_ranges_tile_input() {
        let weights: Vec<usize> = (0..200).map(|i| (i * 7) % 23 + 1).collect();
        let ranges = plan(&weights, 90);
        let mut expected_start = 0;
        for range in &ranges {
            assert_eq!(range.start, expected_start);
            assert!(range.end > range.start);
            expected_start = range.end;
        }
        assert_eq!(expected_start, weights.len());
    }

    #[test]
    fn test_oversized_segment_stays_whole() {
        let weights = vec![500];
        assert_eq!(plan(&weights, 100), vec![0..1]);

        let weights = vec![250, 30];
        let ranges = plan(&weights, 100);
        assert_eq!(ranges, vec![0..1, 1..2]);
    }

    #[test]
    fn test_split_in_two_never_leaves_wordless_side() {
        assert_eq!(split_in_two(&[100, 0], 0..2), vec![0..2]);
        assert_eq!(split_in_two(&[0, 40, 40, 0], 0..4), vec![0..2, 2..4]);
    }
}
