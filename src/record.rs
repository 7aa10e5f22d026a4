//! Per-node records of the dynamic index.

use crate::support::{Pos, Run, RunMerger};

/// The record of one node: outgoing edges, aggregated incoming edges, and
/// a run-length encoded body over local ranks.
///
/// The body's alphabet is local ranks, indexes into `outgoing`; the run
/// `(r, n)` means the next `n` symbols of this node's BWT column all map
/// to the destination of edge `r`. Each incoming entry aggregates every
/// occurrence from one predecessor. The offset stored with an outgoing
/// edge is the number of symbols mapping to the same destination that
/// earlier records contribute, which makes it the base of the local LF
/// mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicRecord {
    pub(crate) body_size: usize,
    pub(crate) incoming: Vec<(usize, usize)>,
    pub(crate) outgoing: Vec<(usize, usize)>,
    pub(crate) body: Vec<Run>,
}

impl DynamicRecord {
    /// Number of outgoing edges; also the local alphabet size of the body.
    pub fn outdegree(&self) -> usize {
        self.outgoing.len()
    }

    /// Number of distinct predecessors.
    pub fn indegree(&self) -> usize {
        self.incoming.len()
    }

    /// Number of runs in the body.
    pub fn runs(&self) -> usize {
        self.body.len()
    }

    /// Number of symbols in the body, the height of this node's column.
    pub fn size(&self) -> usize {
        self.body_size
    }

    pub fn is_empty(&self) -> bool {
        self.body_size == 0
    }

    /// Destination node of the outgoing edge with the given local rank.
    pub fn successor(&self, outrank: usize) -> usize {
        self.outgoing[outrank].0
    }

    /// Cumulative count stored with the outgoing edge at `outrank`.
    pub fn offset(&self, outrank: usize) -> usize {
        self.outgoing[outrank].1
    }

    /// Predecessor node of the incoming edge with the given rank.
    pub fn predecessor(&self, inrank: usize) -> usize {
        self.incoming[inrank].0
    }

    /// Local rank of the edge to `to`, if one exists.
    pub fn edge_to(&self, to: usize) -> Option<usize> {
        self.outgoing.iter().position(|&(node, _)| node == to)
    }

    /// Rank of the first incoming edge whose predecessor is at least
    /// `from`, if any.
    pub fn find_first(&self, from: usize) -> Option<usize> {
        self.incoming.iter().position(|&(node, _)| node >= from)
    }

    /// Number of symbols in the body that map to `to`.
    pub fn count_to(&self, to: usize) -> usize {
        match self.edge_to(to) {
            Some(outrank) => self
                .body
                .iter()
                .filter(|run| run.value == outrank)
                .map(|run| run.len)
                .sum(),
            None => 0,
        }
    }

    pub fn outgoing(&self) -> &[(usize, usize)] {
        &self.outgoing
    }

    pub fn incoming(&self) -> &[(usize, usize)] {
        &self.incoming
    }

    pub fn body(&self) -> &[Run] {
        &self.body
    }

    /// Appends a new outgoing edge to `to` with a zero cumulative count
    /// and returns its rank.
    pub(crate) fn add_edge(&mut self, to: usize) -> usize {
        self.outgoing.push((to, 0));
        self.outgoing.len() - 1
    }

    /// Appends a new incoming entry without aggregation.
    pub(crate) fn add_incoming(&mut self, edge: (usize, usize)) {
        self.incoming.push(edge);
    }

    /// Counts one more occurrence coming from `from`, keeping the incoming
    /// list sorted by predecessor.
    pub(crate) fn increment(&mut self, from: usize) {
        for edge in self.incoming.iter_mut() {
            if edge.0 == from {
                edge.1 += 1;
                return;
            }
        }
        self.incoming.push((from, 1));
        self.incoming.sort_unstable();
    }

    /// Installs the body built by `merger`.
    pub(crate) fn replace_body(&mut self, merger: RunMerger) {
        let (runs, size) = merger.into_body();
        self.body = runs;
        self.body_size = size;
    }

    /// Normalizes the record after a batch of insertions: sorts the
    /// outgoing edges by destination, remaps the body ranks accordingly,
    /// coalesces adjacent runs that end up with the same rank, and sorts
    /// the incoming edges by predecessor.
    pub(crate) fn recode(&mut self) {
        self.incoming.sort_unstable();
        if self.outgoing.windows(2).all(|pair| pair[0].0 < pair[1].0) {
            return;
        }

        let mut order: Vec<usize> = (0..self.outdegree()).collect();
        order.sort_unstable_by_key(|&outrank| self.outgoing[outrank].0);
        let mut remap = vec![0; self.outdegree()];
        for (new_rank, &old_rank) in order.iter().enumerate() {
            remap[old_rank] = new_rank;
        }
        let reordered: Vec<(usize, usize)> =
            order.iter().map(|&old_rank| self.outgoing[old_rank]).collect();
        self.outgoing = reordered;

        let mut recoded: Vec<Run> = Vec::with_capacity(self.body.len());
        for mut run in self.body.drain(..) {
            run.value = remap[run.value];
            match recoded.last_mut() {
                Some(last) if last.value == run.value => last.len += run.len,
                _ => recoded.push(run),
            }
        }
        self.body = recoded;
    }

    /// Local LF into `to`: the number of symbols among the first `i`
    /// positions of this column that map to `to`, plus the cumulative
    /// count stored with the edge. Returns `None` when there is no edge
    /// to `to`.
    pub fn lf_to(&self, i: usize, to: usize) -> Option<usize> {
        let outrank = self.edge_to(to)?;
        let mut result = self.offset(outrank);
        let mut offset = 0;
        for run in &self.body {
            if offset >= i {
                break;
            }
            if run.value == outrank {
                result += run.len.min(i - offset);
            }
            offset += run.len;
        }
        Some(result)
    }

    /// Maps position `i` of this column to the corresponding position in
    /// the successor's column. Returns `None` when `i` is out of range.
    pub fn lf(&self, i: usize) -> Option<Pos> {
        if i >= self.size() {
            return None;
        }
        let mut counts = vec![0; self.outdegree()];
        let mut offset = 0;
        for run in &self.body {
            if i < offset + run.len {
                let rank_before = counts[run.value] + (i - offset);
                return Some(Pos::new(
                    self.successor(run.value),
                    self.offset(run.value) + rank_before,
                ));
            }
            counts[run.value] += run.len;
            offset += run.len;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A record for node 5 with columns mapping to nodes 3 and 8:
    // body 3 3 8 3 8, offsets 10 and 20 over the two edges.
    fn sample() -> DynamicRecord {
        DynamicRecord {
            body_size: 5,
            incoming: vec![(2, 3), (4, 2)],
            outgoing: vec![(3, 10), (8, 20)],
            body: vec![Run::new(0, 2), Run::new(1, 1), Run::new(0, 1), Run::new(1, 1)],
        }
    }

    #[test]
    fn basic_accessors() {
        let record = sample();
        assert_eq!(record.outdegree(), 2);
        assert_eq!(record.indegree(), 2);
        assert_eq!(record.runs(), 4);
        assert_eq!(record.size(), 5);
        assert_eq!(record.successor(1), 8);
        assert_eq!(record.offset(1), 20);
        assert_eq!(record.edge_to(3), Some(0));
        assert_eq!(record.edge_to(7), None);
        assert_eq!(record.count_to(3), 3);
        assert_eq!(record.count_to(8), 2);
        assert_eq!(record.count_to(7), 0);
    }

    #[test]
    fn find_first_scans_incoming() {
        let record = sample();
        assert_eq!(record.find_first(0), Some(0));
        assert_eq!(record.find_first(3), Some(1));
        assert_eq!(record.find_first(4), Some(1));
        assert_eq!(record.find_first(5), None);
    }

    #[test]
    fn increment_aggregates_and_sorts() {
        let mut record = DynamicRecord::default();
        record.increment(7);
        record.increment(2);
        record.increment(7);
        assert_eq!(record.incoming, vec![(2, 1), (7, 2)]);
    }

    #[test]
    fn lf_to_counts_prefix_occurrences() {
        let record = sample();
        assert_eq!(record.lf_to(0, 3), Some(10));
        assert_eq!(record.lf_to(1, 3), Some(11));
        assert_eq!(record.lf_to(3, 3), Some(12));
        assert_eq!(record.lf_to(5, 3), Some(13));
        assert_eq!(record.lf_to(3, 8), Some(21));
        assert_eq!(record.lf_to(2, 7), None);
    }

    #[test]
    fn lf_maps_each_position() {
        let record = sample();
        assert_eq!(record.lf(0), Some(Pos::new(3, 10)));
        assert_eq!(record.lf(1), Some(Pos::new(3, 11)));
        assert_eq!(record.lf(2), Some(Pos::new(8, 20)));
        assert_eq!(record.lf(3), Some(Pos::new(3, 12)));
        assert_eq!(record.lf(4), Some(Pos::new(8, 21)));
        assert_eq!(record.lf(5), None);
    }

    #[test]
    fn recode_sorts_and_remaps() {
        // Edges discovered out of order: 9 before 4.
        let mut record = DynamicRecord {
            body_size: 4,
            incoming: vec![(6, 2), (1, 2)],
            outgoing: vec![(9, 0), (4, 0)],
            body: vec![Run::new(0, 1), Run::new(1, 2), Run::new(0, 1)],
        };
        record.recode();
        assert_eq!(record.outgoing, vec![(4, 0), (9, 0)]);
        assert_eq!(record.incoming, vec![(1, 2), (6, 2)]);
        assert_eq!(
            record.body,
            vec![Run::new(1, 1), Run::new(0, 2), Run::new(1, 1)]
        );
        assert_eq!(record.size(), 4);
    }

    #[test]
    fn recode_noop_when_sorted() {
        let mut record = sample();
        let before = record.clone();
        record.recode();
        assert_eq!(record, before);
    }
}
