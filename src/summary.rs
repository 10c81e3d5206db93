//! Contiguous chunk ranges for range summaries.

use serde::{Deserialize, Serialize};

use crate::types::CachedChunk;
use crate::MIN_SUMMARY_GROUP_SIZE;

/// A contiguous run of chunk indices summarized together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryGroup {
    pub start_index: usize,
    /// Inclusive
    pub end_index: usize,
    pub chunk_indices: Vec<usize>,
}

impl SummaryGroup {
    pub fn contains(&self, index: usize) -> bool {
        (self.start_index..=self.end_index).contains(&index)
    }

    pub fn len(&self) -> usize {
        self.chunk_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_indices.is_empty()
    }
}

/// Summary text produced for one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group: SummaryGroup,
    pub summary: String,
    /// Group indices that had no cached record and were left out
    pub missing_indices: Vec<usize>,
}

/// Partition `[0, total_chunks)` into groups of `group_size` chunks.
///
/// The last group may be shorter. `group_size` is raised to the minimum if
/// smaller.
pub fn groups_for(total_chunks: usize, group_size: usize) -> Vec<SummaryGroup> {
    let size = group_size.max(MIN_SUMMARY_GROUP_SIZE);

    (0..total_chunks)
        .step_by(size)
        .map(|start| {
            let end = (start + size).min(total_chunks) - 1;
            SummaryGroup {
                start_index: start,
                end_index: end,
                chunk_indices: (start..=end).collect(),
            }
        })
        .collect()
}

/// Cached records that fall inside `group`, in index order.
pub fn records_in_group<'a>(
    records: &'a [CachedChunk],
    group: &SummaryGroup,
) -> Vec<&'a CachedChunk> {
    let mut selected: Vec<&CachedChunk> = records
        .iter()
        .filter(|r| group.contains(r.chunk_index))
        .collect();
    selected.sort_by_key(|r| r.chunk_index);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentIdentity;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn record(index: usize) -> CachedChunk {
        CachedChunk {
            content_identity: ContentIdentity::new("doc"),
            chunk_index: index,
            original_text: String::new(),
            enhanced_text: format!("chunk {}", index),
            word_count: 2,
            model_info: None,
            total_chunks: None,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn test_groups_cover_range_exactly() {
        let groups = groups_for(7, 3);
        let bounds: Vec<(usize, usize)> = groups.iter().map(|g| (g.start_index, g.end_index)).collect();
        assert_eq!(bounds, vec![(0, 2), (3, 5), (6, 6)]);

        let covered: Vec<usize> = groups.iter().flat_map(|g| g.chunk_indices.clone()).collect();
        assert_eq!(covered, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_exact_multiple() {
        let groups = groups_for(6, 3);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].chunk_indices, vec![3, 4, 5]);
    }

    #[test]
    fn test_zero_group_size_is_clamped() {
        let groups = groups_for(3, 0);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn test_no_chunks_no_groups() {
        assert!(groups_for(0, 10).is_empty());
    }

    #[test]
    fn test_records_in_group_skips_holes() {
        let records = vec![record(4), record(0), record(2), record(3)];
        let group = groups_for(6, 3).remove(0);

        let selected: Vec<usize> = records_in_group(&records, &group)
            .iter()
            .map(|r| r.chunk_index)
            .collect();
        assert_eq!(selected, vec![0, 2]);
    }
}
