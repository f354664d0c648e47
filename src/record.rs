//! [`Record`], the per-position unit of work, plus the run-scoped [`Frontier`] and
//! de-duplication tracker that the mining pipeline threads through every wave.

use std::collections::HashSet;

use crate::analysis::Analysis;
use crate::filter::Filter;
use crate::output::OutputPaths;
use crate::position::Position;

/// One candidate position plus, once analysed, its engine Analysis.
#[derive(Debug, Clone)]
pub struct Record {
    pub parent: Option<Position>,
    pub position: Position,
    pub tags: Vec<String>,
    pub engine: String,
    pub description: String,
    pub created_ms: i64,
    pub analysis: Analysis,
}

impl Record {
    pub fn new(position: Position, parent: Option<Position>, engine: String, created_ms: i64) -> Self {
        Self {
            parent,
            position,
            tags: Vec::new(),
            engine,
            description: String::new(),
            created_ms,
            analysis: Analysis::default(),
        }
    }

    /// The canonical key used for seen/analyzed de-duplication: `position`'s dedup key, ignoring
    /// move counters.
    pub fn dedup_key(&self) -> String {
        self.position.dedup_key()
    }
}

/// The bounded, ordered set of Records awaiting analysis in the current wave.
#[derive(Debug, Default)]
pub struct Frontier {
    records: Vec<Record>,
}

impl Frontier {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Drops any record whose dedup key has already been queued or analysed in this run, and any
    /// later duplicate within this wave, preserving the first occurrence's position in order.
    pub fn dedup_against(self, tracker: &mut DedupTracker) -> Self {
        let mut kept = Vec::with_capacity(self.records.len());
        let mut seen_this_wave = HashSet::new();

        for record in self.records {
            let key = record.dedup_key();
            if tracker.is_analyzed(&key) {
                continue;
            }
            if !seen_this_wave.insert(key.clone()) {
                continue;
            }
            tracker.mark_seen(&key);
            kept.push(record);
        }

        Self { records: kept }
    }

    /// Truncates to `max_frontier`, keeping the earliest entries.
    pub fn cap(mut self, max_frontier: u32) -> Self {
        self.records.truncate(max_frontier as usize);
        self
    }

    pub fn into_vec(self) -> Vec<Record> {
        self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }
}

/// Tracks canonical position keys across an entire mining run: `seen` for every key ever queued,
/// `analyzed` for every key a worker has finished analysing. `analyzed ⊆ seen` by construction,
/// since a key only enters `analyzed` after having passed through `seen`.
#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: HashSet<String>,
    analyzed: HashSet<String>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `key` as seen. Returns whether it was newly inserted.
    pub fn mark_seen(&mut self, key: &str) -> bool {
        self.seen.insert(key.to_owned())
    }

    pub fn is_seen(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn is_analyzed(&self, key: &str) -> bool {
        self.analyzed.contains(key)
    }

    pub fn mark_analyzed(&mut self, key: &str) {
        self.seen.insert(key.to_owned());
        self.analyzed.insert(key.to_owned());
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn analyzed_len(&self) -> usize {
        self.analyzed.len()
    }
}

/// Immutable configuration for one mining run, validated from raw CLI/config input.
#[derive(Debug, Clone)]
pub struct MiningConfig {
    pub accelerate: Filter,
    pub verify: Filter,
    pub outputs: OutputPaths,
    pub nodes_cap: u32,
    pub duration_cap_ms: u32,
    pub chess960: bool,
    pub infinite: bool,
    pub random_seeds: u32,
    pub max_frontier: u32,
    pub max_waves: u32,
    pub max_total: u64,
}

impl MiningConfig {
    /// Builds a validated config, lower-bounding every numeric cap at 1 as required by §4.3.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accelerate: Filter,
        verify: Filter,
        outputs: OutputPaths,
        nodes_cap: u32,
        duration_cap_ms: u32,
        chess960: bool,
        infinite: bool,
        random_seeds: u32,
        max_frontier: u32,
        max_waves: u32,
        max_total: u64,
    ) -> Self {
        Self {
            accelerate,
            verify,
            outputs,
            nodes_cap: nodes_cap.max(1),
            duration_cap_ms: duration_cap_ms.max(1),
            chess960,
            infinite,
            random_seeds: random_seeds.max(1),
            max_frontier: max_frontier.max(1),
            max_waves: max_waves.max(1),
            max_total: max_total.max(1),
        }
    }
}
