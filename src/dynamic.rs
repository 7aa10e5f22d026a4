//! The dynamic GBWT: a mutable multi-string BWT over graph node ids with
//! batched insertion, merging, LF navigation, and a stable on-disk format.

use std::io::{self, Read, Write};
use std::mem;

use rayon::prelude::*;
use simple_sds::ops::{BitVec, Select};
use simple_sds::serialize::Serialize;
use simple_sds::sparse_vector::{SparseBuilder, SparseVector};

use crate::bytecode::{self, RunCoder};
use crate::headers::GbwtHeader;
use crate::record::DynamicRecord;
use crate::support::{Pos, Run, RunMerger, ENDMARKER};

/// A dynamic multi-string BWT indexed by graph node id.
///
/// Records live in a dense table indexed by the compacted id
/// `node - offset` (the endmarker always compacts to 0), so the logically
/// cyclic graph is stored as a flat table with node ids as the only
/// cross-references. Insertion is single-writer; queries are read-only
/// and may run concurrently once mutation has stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicGBWT {
    header: GbwtHeader,
    bwt: Vec<DynamicRecord>,
}

/// One sequence being threaded through the index by the insertion engine.
#[derive(Clone, Copy, Debug)]
struct Sequence {
    id: usize,
    /// Node whose record the next symbol is spliced into.
    curr: usize,
    /// The symbol about to be written.
    next: usize,
    /// Position within `curr`'s body where `next` belongs.
    offset: usize,
    /// Position within the source: text index, or offset in the source
    /// record when inserting from another index.
    pos: usize,
}

/// Uniform view over the two kinds of insertion input: a raw text of node
/// ids, or the sequences of another index read in BWT order.
trait InsertionSource {
    /// Updates each sequence's source position for the symbol that was
    /// just inserted.
    fn next_position(&self, seqs: &mut [Sequence]);

    /// Rotates each sequence to its next column and reads the following
    /// symbol from the source.
    fn advance_position(&self, seqs: &mut [Sequence]);
}

impl InsertionSource for [usize] {
    fn next_position(&self, seqs: &mut [Sequence]) {
        for seq in seqs.iter_mut() {
            seq.pos += 1;
        }
    }

    fn advance_position(&self, seqs: &mut [Sequence]) {
        for seq in seqs.iter_mut() {
            seq.curr = seq.next;
            seq.next = self[seq.pos];
        }
    }
}

impl InsertionSource for DynamicGBWT {
    // Both sweeps rely on the engine's sort order: sequences sharing a
    // record appear in ascending body position, so one forward walk of
    // the record serves the whole cluster.

    fn next_position(&self, seqs: &mut [Sequence]) {
        let mut i = 0;
        while i < seqs.len() {
            let curr = seqs[i].curr;
            let record = self.record(curr);
            let mut result: Vec<(usize, usize)> = record.outgoing().to_vec();
            let mut runs = record.body().iter();
            let mut run = runs.next().unwrap();
            let mut offset = run.len;
            result[run.value].1 += run.len;
            while i < seqs.len() && seqs[i].curr == curr {
                while offset <= seqs[i].pos {
                    run = runs.next().unwrap();
                    offset += run.len;
                    result[run.value].1 += run.len;
                }
                seqs[i].pos = result[run.value].1 - (offset - seqs[i].pos);
                i += 1;
            }
        }
    }

    fn advance_position(&self, seqs: &mut [Sequence]) {
        let mut i = 0;
        while i < seqs.len() {
            let curr = seqs[i].next;
            let record = self.record(curr);
            let mut runs = record.body().iter();
            let mut run = runs.next().unwrap();
            let mut offset = run.len;
            while i < seqs.len() && seqs[i].next == curr {
                seqs[i].curr = seqs[i].next;
                while offset <= seqs[i].pos {
                    run = runs.next().unwrap();
                    offset += run.len;
                }
                seqs[i].next = record.successor(run.value);
                i += 1;
            }
        }
    }
}

/// Inserts the given sequences into the index, one column per iteration,
/// and returns the number of iterations. On entry and between iterations
/// `seqs` is sorted by `(curr, offset)` with ids as the tiebreak.
fn insert_batch<S: InsertionSource + ?Sized>(
    gbwt: &mut DynamicGBWT,
    seqs: &mut Vec<Sequence>,
    source: &S,
) -> usize {
    let mut iterations = 0;
    loop {
        iterations += 1;

        // Splice sweep: for each cluster of sequences sharing a record,
        // rebuild the body once, splicing every new symbol in at its
        // offset. Offsets become ranks of the new symbol within the
        // record. Incoming edges of the endmarker are never maintained:
        // they are expensive and searching with the endmarker is
        // undefined in a multi-string BWT.
        let mut i = 0;
        while i < seqs.len() {
            let curr = seqs[i].curr;
            let comp = gbwt.to_comp(curr);
            let mut merger = RunMerger::new(gbwt.bwt[comp].outdegree());
            let old_body = mem::take(&mut gbwt.bwt[comp].body);
            let mut old_runs = old_body.into_iter();
            let mut pending: Option<Run> = None;
            while i < seqs.len() && seqs[i].curr == curr {
                let next = seqs[i].next;
                let outrank = match gbwt.bwt[comp].edge_to(next) {
                    Some(outrank) => outrank,
                    None => {
                        merger.add_edge();
                        gbwt.bwt[comp].add_edge(next)
                    }
                };
                while merger.size() < seqs[i].offset {
                    let mut run = pending.take().or_else(|| old_runs.next()).unwrap();
                    let gap = seqs[i].offset - merger.size();
                    if run.len <= gap {
                        merger.insert_run(run);
                    } else {
                        merger.insert_run(Run::new(run.value, gap));
                        run.len -= gap;
                        pending = Some(run);
                    }
                }
                seqs[i].offset = merger.counts[outrank];
                merger.insert(outrank);
                if next != ENDMARKER {
                    let next_comp = gbwt.to_comp(next);
                    gbwt.bwt[next_comp].increment(curr);
                }
                i += 1;
            }
            if let Some(run) = pending {
                merger.insert_run(run);
            }
            for run in old_runs {
                merger.insert_run(run);
            }
            gbwt.bwt[comp].replace_body(merger);
        }
        gbwt.header.size += seqs.len();
        source.next_position(seqs);

        // Sorting by (next, curr, offset) here is sorting by
        // (curr, offset) for the next iteration. The id tiebreak makes
        // the order total, so identical inputs build identical indexes.
        seqs.sort_unstable_by_key(|seq| (seq.next, seq.curr, seq.offset, seq.id));
        let finished = seqs.iter().take_while(|seq| seq.next == ENDMARKER).count();
        seqs.drain(..finished);
        if seqs.is_empty() {
            return iterations;
        }

        // Rebuild the cumulative counts on the outgoing edges into each
        // node that receives insertions next iteration. Walking the
        // incoming list in predecessor order reproduces the global
        // contributor order.
        let mut prev = gbwt.sigma();
        for i in 0..seqs.len() {
            let next = seqs[i].next;
            if next == prev {
                continue;
            }
            prev = next;
            let mut offset = 0;
            for inrank in 0..gbwt.record(next).indegree() {
                let (predecessor, count) = gbwt.record(next).incoming[inrank];
                let pred_comp = gbwt.to_comp(predecessor);
                let outrank = gbwt.bwt[pred_comp].edge_to(next).unwrap();
                gbwt.bwt[pred_comp].outgoing[outrank].1 = offset;
                offset += count;
            }
        }

        // Turn within-record ranks into positions in the next record.
        for seq in seqs.iter_mut() {
            let current = gbwt.record(seq.curr);
            seq.offset += current.offset(current.edge_to(seq.next).unwrap());
        }
        source.advance_position(seqs);
    }
}

impl DynamicGBWT {
    /// Canonical file extension.
    pub const EXTENSION: &'static str = ".gbwt";

    pub fn new() -> Self {
        Self::default()
    }

    /// Alphabet size: largest node id plus one.
    pub fn sigma(&self) -> usize {
        self.header.alphabet_size
    }

    /// Size of the stored effective alphabet `[offset, sigma)`.
    pub fn effective(&self) -> usize {
        self.header.alphabet_size - self.header.offset
    }

    /// Number of indexed sequences.
    pub fn sequences(&self) -> usize {
        self.header.sequences
    }

    /// Total length of the indexed sequences, endmarkers included.
    pub fn size(&self) -> usize {
        self.header.size
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Total number of body runs across all records.
    pub fn runs(&self) -> usize {
        self.bwt.iter().map(|record| record.runs()).sum()
    }

    pub fn header(&self) -> &GbwtHeader {
        &self.header
    }

    /// Returns true when `node` has a record: the endmarker, or a node in
    /// the effective alphabet `(offset, sigma)`.
    pub fn contains(&self, node: usize) -> bool {
        node < self.sigma() && (node == ENDMARKER || node > self.header.offset)
    }

    fn to_comp(&self, node: usize) -> usize {
        if node == ENDMARKER {
            node
        } else {
            node - self.header.offset
        }
    }

    fn to_node(&self, comp: usize) -> usize {
        if comp == 0 {
            ENDMARKER
        } else {
            comp + self.header.offset
        }
    }

    /// The record of `node`.
    ///
    /// # Panics
    ///
    /// Panics when `node` is not in the index (see [`contains`](Self::contains)).
    pub fn record(&self, node: usize) -> &DynamicRecord {
        assert!(
            self.contains(node),
            "DynamicGBWT::record(): node {} is not in the index",
            node
        );
        &self.bwt[self.to_comp(node)]
    }

    /// Number of occurrences of `node` over all sequences; 0 for nodes
    /// without a record.
    pub fn count(&self, node: usize) -> usize {
        if self.contains(node) {
            self.record(node).size()
        } else {
            0
        }
    }

    /// Maps position `i` in the column of `from` to the corresponding
    /// position in the successor's column. Returns `None` when `from` has
    /// no record or `i` is out of range.
    pub fn lf(&self, from: usize, i: usize) -> Option<Pos> {
        if !self.contains(from) {
            return None;
        }
        self.record(from).lf(i)
    }

    /// Position in the column of `to` reached by following symbol `to`
    /// from position `i` in the column of `from`.
    ///
    /// When `from` is at least the alphabet size, the result is the full
    /// column height `count(to)`. When the edge `(from, to)` has never
    /// been observed, the result comes from the first incoming edge of
    /// `to` whose predecessor is at least `from`, or `count(to)` when
    /// every predecessor is smaller. Returns `None` when `to` has no
    /// record.
    pub fn lf_to(&self, from: usize, i: usize, to: usize) -> Option<usize> {
        if !self.contains(to) {
            return None;
        }
        if from >= self.sigma() {
            return Some(self.count(to));
        }
        if self.contains(from) {
            if let Some(result) = self.record(from).lf_to(i, to) {
                return Some(result);
            }
        }
        let to_record = self.record(to);
        match to_record.find_first(from) {
            None => Some(self.count(to)),
            Some(inrank) => {
                let predecessor = self.record(to_record.predecessor(inrank));
                Some(predecessor.offset(predecessor.edge_to(to).unwrap()))
            }
        }
    }

    /// The node trajectory of sequence `id`, without the terminating
    /// endmarker. Out-of-range ids yield an empty vector.
    pub fn extract(&self, id: usize) -> Vec<usize> {
        let mut result = Vec::new();
        if id >= self.sequences() {
            return result;
        }
        let mut pos = match self.record(ENDMARKER).lf(id) {
            Some(pos) => pos,
            None => return result,
        };
        while pos.node != ENDMARKER {
            result.push(pos.node);
            pos = match self.lf(pos.node, pos.offset) {
                Some(next) => next,
                None => break,
            };
        }
        result
    }

    /// Grows the stored alphabet to cover `[new_offset, new_sigma)`,
    /// relocating existing records. The offset only ever shrinks and the
    /// alphabet size only ever grows; degenerate requests
    /// (`new_sigma <= 1`) keep the current offset.
    ///
    /// # Panics
    ///
    /// Panics when a nonzero `new_offset` is not below `new_sigma`.
    fn resize(&mut self, mut new_offset: usize, mut new_sigma: usize) {
        if (self.sigma() > 1 && new_offset > self.header.offset) || new_sigma <= 1 {
            new_offset = self.header.offset;
        }
        if self.sigma() > new_sigma {
            new_sigma = self.sigma();
        }
        assert!(
            new_offset == 0 || new_offset < new_sigma,
            "DynamicGBWT::resize(): cannot set offset {} with alphabet size {}",
            new_offset,
            new_sigma
        );

        if new_offset != self.header.offset || new_sigma != self.sigma() {
            let mut new_bwt: Vec<DynamicRecord> = vec![DynamicRecord::default(); new_sigma - new_offset];
            if self.effective() > 0 {
                mem::swap(&mut new_bwt[0], &mut self.bwt[0]);
            }
            for comp in 1..self.effective() {
                let target = comp + self.header.offset - new_offset;
                mem::swap(&mut new_bwt[target], &mut self.bwt[comp]);
            }
            self.bwt = new_bwt;
            self.header.offset = new_offset;
            self.header.alphabet_size = new_sigma;
        }
    }

    /// Sorts every record's outgoing edges by destination and remaps the
    /// bodies. Records are independent, so the pass is data-parallel.
    fn recode(&mut self) {
        self.bwt.par_iter_mut().for_each(|record| record.recode());
    }

    /// Inserts the sequences of `text` into the index. Each run of node
    /// ids between endmarkers is one sequence; an empty text is a no-op.
    ///
    /// # Panics
    ///
    /// Panics when a nonempty `text` does not end with the endmarker.
    pub fn insert(&mut self, text: &[usize]) {
        if text.is_empty() {
            return;
        }
        assert!(
            *text.last().unwrap() == ENDMARKER,
            "DynamicGBWT::insert(): the text must end with an endmarker"
        );

        // Find the start of each sequence and the node id range, then
        // make room in the alphabet before threading anything.
        let mut min_node = if self.is_empty() { usize::MAX } else { self.header.offset + 1 };
        let mut max_node = if self.is_empty() { 0 } else { self.sigma() - 1 };
        let mut seqs: Vec<Sequence> = Vec::new();
        let mut seq_start = true;
        for (i, &node) in text.iter().enumerate() {
            if seq_start {
                seqs.push(Sequence {
                    id: self.sequences(),
                    curr: ENDMARKER,
                    next: node,
                    offset: self.sequences(),
                    pos: i,
                });
                seq_start = false;
                self.header.sequences += 1;
            }
            if node == ENDMARKER {
                seq_start = true;
            } else {
                min_node = min_node.min(node);
            }
            max_node = max_node.max(node);
        }
        if max_node == 0 {
            min_node = 1;
        }
        self.resize(min_node - 1, max_node + 1);

        insert_batch(self, &mut seqs, text);
        self.recode();
    }

    /// Inserts every sequence of `other` into this index, in batches of
    /// `batch_size` sequences taken in BWT order. A `batch_size` of 0
    /// inserts everything in a single batch.
    pub fn merge(&mut self, other: &DynamicGBWT, batch_size: usize) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        let batch_size = if batch_size == 0 { other.sequences() } else { batch_size };
        self.resize(other.header.offset, other.sigma());

        // The endmarker body of the source lists its sequences in BWT
        // order; walk it run by run to seed each batch.
        let endmarker = other.record(ENDMARKER);
        let mut run_index = 0;
        let mut run_offset = 0;
        let mut source_offset = 0;
        while source_offset < other.sequences() {
            let limit = (source_offset + batch_size).min(other.sequences());
            let mut seqs: Vec<Sequence> = Vec::with_capacity(limit - source_offset);
            while source_offset < limit {
                if run_offset >= endmarker.body()[run_index].len {
                    run_index += 1;
                    run_offset = 0;
                } else {
                    seqs.push(Sequence {
                        id: self.sequences(),
                        curr: ENDMARKER,
                        next: endmarker.successor(endmarker.body()[run_index].value),
                        offset: self.sequences(),
                        pos: source_offset,
                    });
                    self.header.sequences += 1;
                    source_offset += 1;
                    run_offset += 1;
                }
            }
            insert_batch(self, &mut seqs, other);
        }
        self.recode();
    }

    /// Writes the index: header, then a sparse bitvector marking each
    /// record's starting offset in the concatenated byte body, then the
    /// byte body itself. Per record the encoding is the outdegree, the
    /// outgoing edges as varint pairs, and the run-coded body.
    pub fn serialize<W: Write>(&self, out: &mut W) -> io::Result<()> {
        self.header.serialize(out)?;

        let mut data: Vec<u8> = Vec::new();
        let mut offsets: Vec<usize> = Vec::with_capacity(self.effective());
        for record in &self.bwt {
            offsets.push(data.len());
            bytecode::write(&mut data, record.outdegree());
            for &(node, offset) in record.outgoing() {
                bytecode::write(&mut data, node);
                bytecode::write(&mut data, offset);
            }
            if record.outdegree() > 0 {
                let coder = RunCoder::new(record.outdegree());
                for &run in record.body() {
                    coder.write(&mut data, run);
                }
            }
        }

        let mut builder = SparseBuilder::new(data.len(), offsets.len())
            .map_err(|message| io::Error::new(io::ErrorKind::Other, message))?;
        for offset in offsets {
            builder.set(offset);
        }
        let index = SparseVector::try_from(builder)
            .map_err(|message| io::Error::new(io::ErrorKind::Other, message))?;
        index.serialize(out)?;
        data.serialize(out)?;
        Ok(())
    }

    /// Reads an index written by [`serialize`](Self::serialize) and
    /// rebuilds the incoming edges from the record bodies. Corrupt input
    /// surfaces as `InvalidData`.
    pub fn load<R: Read>(input: &mut R) -> io::Result<Self> {
        let header = GbwtHeader::load(input)?;
        if !header.check() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid header: {}", header),
            ));
        }
        let effective = header.alphabet_size - header.offset;

        let index = SparseVector::load(input)?;
        let data = Vec::<u8>::load(input)?;
        if index.len() != data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "node index / byte body length mismatch",
            ));
        }
        let offsets: Vec<usize> = index.select_iter(0).map(|(_, offset)| offset).collect();
        if offsets.len() != effective {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected {} records, node index has {}", effective, offsets.len()),
            ));
        }

        let mut bwt: Vec<DynamicRecord> = Vec::with_capacity(effective);
        for comp in 0..effective {
            let start = offsets[comp];
            let limit = if comp + 1 < effective { offsets[comp + 1] } else { data.len() };
            bwt.push(decode_record(&data[start..limit])?);
        }

        let mut result = DynamicGBWT { header, bwt };
        result.rebuild_incoming();
        Ok(result)
    }

    /// Recomputes every record's incoming edges from the bodies.
    fn rebuild_incoming(&mut self) {
        for comp in 0..self.bwt.len() {
            let node = self.to_node(comp);
            let counts: Vec<usize> = {
                let record = &self.bwt[comp];
                let mut counts = vec![0; record.outdegree()];
                for run in record.body() {
                    counts[run.value] += run.len;
                }
                counts
            };
            for outrank in 0..self.bwt[comp].outdegree() {
                let successor = self.bwt[comp].successor(outrank);
                if successor != ENDMARKER {
                    let successor_comp = self.to_comp(successor);
                    self.bwt[successor_comp].add_incoming((node, counts[outrank]));
                }
            }
        }
    }

    /// Field-by-field comparison, writing a report of the first
    /// difference to `out`. Returns whether the indexes are identical.
    pub fn compare<W: Write>(&self, other: &DynamicGBWT, out: &mut W) -> io::Result<bool> {
        if self.header != other.header {
            writeln!(out, "headers differ:")?;
            writeln!(out, "  left:  {}", self.header)?;
            writeln!(out, "  right: {}", other.header)?;
            return Ok(false);
        }
        for comp in 0..self.effective() {
            if self.bwt[comp] != other.bwt[comp] {
                writeln!(out, "records at compacted index {} differ:", comp)?;
                writeln!(out, "  left:  {:?}", self.bwt[comp])?;
                writeln!(out, "  right: {:?}", other.bwt[comp])?;
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn decode_record(bytes: &[u8]) -> io::Result<DynamicRecord> {
    fn malformed() -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, "record encoding ends mid-value")
    }

    let mut offset = 0;
    let outdegree = bytecode::read(bytes, &mut offset).ok_or_else(malformed)?;
    let mut outgoing: Vec<(usize, usize)> = Vec::with_capacity(outdegree);
    for _ in 0..outdegree {
        let node = bytecode::read(bytes, &mut offset).ok_or_else(malformed)?;
        let edge_offset = bytecode::read(bytes, &mut offset).ok_or_else(malformed)?;
        outgoing.push((node, edge_offset));
    }

    let mut body: Vec<Run> = Vec::new();
    let mut body_size = 0;
    if outdegree > 0 {
        let coder = RunCoder::new(outdegree);
        while offset < bytes.len() {
            let run = coder.read(bytes, &mut offset).ok_or_else(malformed)?;
            if run.value >= outdegree {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "run rank outside the outgoing edges",
                ));
            }
            body_size += run.len;
            body.push(run);
        }
    }

    Ok(DynamicRecord {
        body_size,
        incoming: Vec::new(),
        outgoing,
        body,
    })
}
