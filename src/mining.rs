//! The wave loop (§4.3): refill, de-duplicate, cap, analyse, partition, expand, flush, repeat.

use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::output;
use crate::pool::EnginePool;
use crate::record::{DedupTracker, Frontier, MiningConfig, Record};
use crate::seeds;

#[derive(Debug, Default, Clone, Copy)]
pub struct MiningStats {
    pub waves: u32,
    pub processed: u64,
    pub puzzles: u64,
    pub nonpuzzles: u64,
}

/// Drives the frontier loop to completion, flushing each wave's puzzles and non-puzzles as they
/// are produced.
#[instrument(skip_all)]
pub fn run(pool: &EnginePool, initial_frontier: Vec<Record>, config: &MiningConfig) -> Result<MiningStats> {
    let mut tracker = DedupTracker::new();
    let mut frontier = Frontier::new(initial_frontier);
    let mut stats = MiningStats::default();

    loop {
        while frontier.is_empty()
            && config.infinite
            && stats.waves < config.max_waves
            && stats.processed < config.max_total
        {
            let seeds = seeds::random(config.random_seeds, config.chess960, now_ms());
            for seed in seeds {
                frontier.push(seed);
            }
            frontier = frontier.dedup_against(&mut tracker);
        }

        frontier = frontier.dedup_against(&mut tracker);

        if frontier.is_empty() || stats.waves >= config.max_waves || stats.processed >= config.max_total {
            break;
        }

        frontier = frontier.cap(config.max_frontier);

        debug!(wave = stats.waves, size = frontier.len(), "analysing wave");
        let analysed = pool.analyse_all(
            frontier.into_vec(),
            &config.accelerate,
            config.nodes_cap,
            config.duration_cap_ms,
        );

        let mut puzzles = Vec::new();
        let mut nonpuzzles = Vec::new();
        let mut next_frontier = Frontier::new(Vec::new());

        for record in analysed {
            if stats.processed >= config.max_total {
                break;
            }
            stats.processed += 1;
            tracker.mark_analyzed(&record.dedup_key());

            if config.verify.evaluate(&record.analysis) {
                expand(&record, &mut tracker, &mut next_frontier, stats.processed, config.max_total);
                puzzles.push(record);
            } else {
                nonpuzzles.push(record);
            }
        }

        // A flush failure is logged, not fatal: the records buffered for this wave are lost, but
        // the pipeline keeps mining rather than aborting the whole run over one write hiccup.
        if let Err(err) = output::append(&config.outputs.puzzles, &puzzles) {
            warn!(%err, path = %config.outputs.puzzles.display(), "failed to flush puzzles");
        }
        if let Err(err) = output::append(&config.outputs.nonpuzzles, &nonpuzzles) {
            warn!(%err, path = %config.outputs.nonpuzzles.display(), "failed to flush nonpuzzles");
        }
        stats.puzzles += puzzles.len() as u64;
        stats.nonpuzzles += nonpuzzles.len() as u64;

        info!(
            wave = stats.waves,
            puzzles = puzzles.len(),
            nonpuzzles = nonpuzzles.len(),
            processed = stats.processed,
            "wave flushed"
        );

        frontier = next_frontier;
        stats.waves += 1;
    }

    Ok(stats)
}

/// Plays PV1's best move from `record.position`, then enqueues every legal reply not already
/// analysed, stopping once `processed + next_frontier.len() >= max_total`.
fn expand(record: &Record, tracker: &mut DedupTracker, next_frontier: &mut Frontier, processed: u64, max_total: u64) {
    let Some(best_move) = record.analysis.best_move() else {
        return;
    };
    let Ok(intermediate) = record.position.apply_uci(best_move) else {
        return;
    };

    for (_uci, successor) in intermediate.legal_successors() {
        if processed + next_frontier.len() as u64 >= max_total {
            break;
        }

        let key = successor.dedup_key();
        if tracker.is_analyzed(&key) {
            continue;
        }
        if tracker.mark_seen(&key) {
            next_frontier.push(Record::new(
                successor,
                Some(intermediate.clone()),
                String::new(),
                record.created_ms,
            ));
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analysis, Bound, Eval, PvOutput};
    use crate::position::Position;

    fn mated_record() -> Record {
        let position = Position::startpos();
        let mut analysis = Analysis::default();
        analysis.record_pv(
            PvOutput {
                multipv: 1,
                eval: Eval::Centipawn(50),
                wdl: None,
                depth: 10,
                seldepth: 10,
                nodes: 1,
                nps: 1,
                time_ms: 1,
                hashfull_permille: 0,
                tbhits: 0,
                bound: Bound::Exact,
                pv_moves: vec!["e2e4".into()],
            },
            "info ...".into(),
        );
        let mut record = Record::new(position, None, "test".into(), 0);
        record.analysis = analysis;
        record
    }

    #[test]
    fn expand_enqueues_every_opponent_reply() {
        let mut tracker = DedupTracker::new();
        let mut next = Frontier::new(Vec::new());
        let record = mated_record();

        expand(&record, &mut tracker, &mut next, 1, 1_000);
        assert_eq!(next.len(), 20); // every black reply to 1.e4
    }

    #[test]
    fn expand_stops_at_max_total() {
        let mut tracker = DedupTracker::new();
        let mut next = Frontier::new(Vec::new());
        let record = mated_record();

        expand(&record, &mut tracker, &mut next, 995, 1_000);
        assert_eq!(next.len(), 5);
    }

    #[test]
    fn expand_skips_already_analyzed_successors() {
        let mut tracker = DedupTracker::new();
        let record = mated_record();
        let intermediate = record.position.apply_uci("e2e4").unwrap();
        let (_uci, first_reply) = intermediate.legal_successors().into_iter().next().unwrap();
        tracker.mark_analyzed(&first_reply.dedup_key());

        let mut next = Frontier::new(Vec::new());
        expand(&record, &mut tracker, &mut next, 1, 1_000);
        assert_eq!(next.len(), 19);
    }

    #[test]
    fn expand_is_noop_without_a_best_move() {
        let mut tracker = DedupTracker::new();
        let mut next = Frontier::new(Vec::new());
        let record = Record::new(Position::startpos(), None, "test".into(), 0);

        expand(&record, &mut tracker, &mut next, 1, 1_000);
        assert!(next.is_empty());
    }
}
