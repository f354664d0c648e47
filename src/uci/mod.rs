//! One UCI engine worker: a single child process, its handshake, and its search state machine.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command as ProcCommand, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use derivative::Derivative;
use tracing::{debug, info, instrument, warn};

use crate::analysis::Analysis;
use crate::error::{MiningError, Result};
use crate::filter::Filter;
use crate::position::Position;
use crate::protocol_config::EngineProtocolConfig;

mod proto;

pub use proto::{Command, Msg};

/// Grace period added on top of `duration_cap_ms` before a stalled search is treated as broken.
const TIMEOUT_GRACE: Duration = Duration::from_millis(2_000);

/// Whatever a worker's process handle needs to support: liveness, killing, and reaping. Lets
/// tests substitute an in-memory stand-in for a real child process.
pub trait EngineProcess {
    fn is_running(&mut self) -> bool;
    fn kill(&mut self);
    fn wait(&mut self);
}

impl EngineProcess for Child {
    fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    fn kill(&mut self) {
        let _ = Child::kill(self);
    }

    fn wait(&mut self) {
        let _ = Child::wait(self);
    }
}

/// Produces a fresh process and wire protocol pair, called once at [`Worker::spawn`] and again
/// on every [`Worker::revive`]. The real implementation ([`ChildSpawner`]) starts a child
/// process; tests substitute a spawner backed by in-memory buffers so the handshake, search, and
/// revival logic run deterministically without an actual engine binary.
pub trait EngineSpawner {
    type Process: EngineProcess;
    type Stdin: Write;
    type Stdout: BufRead;

    fn spawn(
        &self,
        config: &EngineProtocolConfig,
    ) -> Result<(Self::Process, proto::Protocol<Self::Stdin, Self::Stdout>)>;
}

/// The production spawner: one real child process per worker.
pub struct ChildSpawner;

impl EngineSpawner for ChildSpawner {
    type Process = Child;
    type Stdin = ChildStdin;
    type Stdout = BufReader<ChildStdout>;

    fn spawn(
        &self,
        config: &EngineProtocolConfig,
    ) -> Result<(Child, proto::Protocol<ChildStdin, BufReader<ChildStdout>>)> {
        spawn_child(config)
    }
}

/// One long-lived UCI engine process plus the handshake and search logic needed to drive it.
/// Generic over how its process and wire I/O are produced; defaults to a real child process.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct Worker<S: EngineSpawner = ChildSpawner> {
    id: usize,
    config: Arc<EngineProtocolConfig>,
    chess960: bool,
    #[derivative(Debug = "ignore")]
    spawner: S,
    #[derivative(Debug = "ignore")]
    process: S::Process,
    #[derivative(Debug = "ignore")]
    proto: proto::Protocol<S::Stdin, S::Stdout>,
    name: String,
    consecutive_revival_failures: u32,
}

impl<S: EngineSpawner> Drop for Worker<S> {
    fn drop(&mut self) {
        let _ = self.proto.send(&Command::Quit);
        if self.process.is_running() {
            // Give the engine a moment to exit cleanly before forcing the issue.
            thread::sleep(Duration::from_millis(200));
        }
        if self.process.is_running() {
            self.process.kill();
        }
        self.process.wait();
    }
}

impl<S: EngineSpawner> Worker<S> {
    #[instrument(skip(config, spawner), fields(path = %config.path), err)]
    pub fn spawn(id: usize, spawner: S, config: Arc<EngineProtocolConfig>, chess960: bool) -> Result<Self> {
        let (process, proto) = spawner.spawn(&config)?;

        let mut worker = Self {
            id,
            config,
            chess960,
            spawner,
            process,
            proto,
            name: String::new(),
            consecutive_revival_failures: 0,
        };
        worker.handshake()?;
        info!(worker = worker.id, name = %worker.name, "engine worker ready");
        Ok(worker)
    }

    fn handshake(&mut self) -> Result<()> {
        self.proto.send(&Command::Uci)?;
        loop {
            match self.proto.recv()? {
                Msg::Id { name: Some(name) } => self.name = name,
                Msg::UciOk => break,
                _ => (),
            }
        }

        for line in self.config.setup.clone() {
            self.proto.send(&Command::Literal(line))?;
            self.wait_ready()?;
        }

        if let Some(line) = self.config.render_set_chess960(self.chess960) {
            self.proto.send(&Command::Literal(line))?;
            self.wait_ready()?;
        }

        if let Some(line) = self.config.render_wdl_option() {
            self.proto.send(&Command::Literal(line))?;
            self.wait_ready()?;
        }

        // Only PV1 is ever read back, but some engines default MultiPV > 1 via their own config
        // files, so pin it explicitly rather than trust the engine's default.
        self.proto
            .send(&Command::Literal(self.config.render_multipv_option(1)))?;
        self.wait_ready()?;

        Ok(())
    }

    fn wait_ready(&mut self) -> Result<()> {
        self.proto.send(&Command::Literal(self.config.isready.clone()))?;
        loop {
            if self.proto.recv_line()? == self.config.readyok {
                return Ok(());
            }
        }
    }

    /// Kills the current process (if still alive) and spawns + re-handshakes a fresh one in its
    /// place. Returns an error without mutating `self` on failure, so the caller can tell a
    /// revival attempt failed.
    fn revive(&mut self) -> Result<()> {
        warn!(worker = self.id, "reviving engine worker");
        self.process.kill();
        self.process.wait();

        let (process, proto) = self.spawner.spawn(&self.config)?;
        self.process = process;
        self.proto = proto;
        self.name.clear();
        self.handshake()
    }

    /// Runs one full search, synchronously from the caller's perspective.
    ///
    /// On worker breakage this performs one automatic revival and retries the search once; a
    /// second failure is surfaced to the pool, which accounts for it as an empty analysis.
    #[instrument(skip(self, position, accelerate), fields(worker = self.id, pos = %position), err)]
    pub fn analyze(
        &mut self,
        position: &Position,
        accelerate: &Filter,
        nodes_cap: u32,
        duration_cap_ms: u32,
    ) -> Result<Analysis> {
        match self.run_search(position, accelerate, nodes_cap, duration_cap_ms) {
            Ok(analysis) => {
                self.consecutive_revival_failures = 0;
                Ok(analysis)
            }
            Err(err) => {
                warn!(worker = self.id, %err, "search failed, attempting revival");
                match self.revive() {
                    Ok(()) => {
                        self.consecutive_revival_failures = 0;
                        self.run_search(position, accelerate, nodes_cap, duration_cap_ms)
                    }
                    Err(revive_err) => {
                        self.consecutive_revival_failures += 1;
                        if self.consecutive_revival_failures >= 2 {
                            return Err(MiningError::WorkerSpawn(format!(
                                "worker {} failed to revive twice in a row: {revive_err}",
                                self.id
                            )));
                        }
                        Err(revive_err)
                    }
                }
            }
        }
    }

    fn run_search(
        &mut self,
        position: &Position,
        accelerate: &Filter,
        nodes_cap: u32,
        duration_cap_ms: u32,
    ) -> Result<Analysis> {
        self.proto.send(&Command::NewGame)?;
        self.wait_ready()?;
        self.proto.send(&Command::Position {
            fen: self.config.render_set_position(&position.canonical_fen()),
        })?;

        let suffix = self.config.render_go_suffix(nodes_cap, duration_cap_ms);
        self.proto.send(&Command::Go { suffix })?;

        let deadline = Instant::now() + Duration::from_millis(duration_cap_ms as u64) + TIMEOUT_GRACE;
        let mut analysis = Analysis::default();
        let mut stopped = false;

        loop {
            if !stopped && Instant::now() >= deadline {
                debug!(worker = self.id, "duration cap exceeded, sending stop");
                self.proto.send(&Command::Stop)?;
                stopped = true;
            }

            match self.proto.recv()? {
                Msg::Info(raw) => {
                    analysis.record_pv(raw.pv, format!("info {}", raw_info_display(&raw)));

                    if !stopped && !accelerate.evaluate(&analysis) {
                        debug!(worker = self.id, "accelerate rejected, sending stop");
                        self.proto.send(&Command::Stop)?;
                        stopped = true;
                    }
                }
                Msg::BestMove(mv) => {
                    analysis.record_raw(format!("bestmove {mv}"));
                    break;
                }
                _ => (),
            }
        }

        if analysis.is_empty() {
            return Err(MiningError::WorkerBroken(
                "search produced no info lines".into(),
            ));
        }

        Ok(analysis)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Renders a raw `info` line's analysis fields back into roughly the wire form, for embedding
/// into the record's `analysis` array. This is a best-effort reconstruction, not a verbatim
/// echo of engine bytes, since the wire parser does not retain the original line.
fn raw_info_display(raw: &proto::RawInfo) -> String {
    let pv = &raw.pv;
    let mut parts = vec![
        format!("depth {}", pv.depth),
        format!("seldepth {}", pv.seldepth),
        format!("multipv {}", pv.multipv),
    ];
    match pv.eval {
        crate::analysis::Eval::Centipawn(cp) => parts.push(format!("score cp {cp}")),
        crate::analysis::Eval::Mate(m) => parts.push(format!("score mate {m}")),
        crate::analysis::Eval::Invalid => (),
    }
    if let Some(wdl) = &pv.wdl {
        parts.push(format!("wdl {} {} {}", wdl.win, wdl.draw, wdl.loss));
    }
    parts.push(format!("nodes {}", pv.nodes));
    parts.push(format!("nps {}", pv.nps));
    parts.push(format!("time {}", pv.time_ms));
    parts.push(format!("hashfull {}", pv.hashfull_permille));
    parts.push(format!("tbhits {}", pv.tbhits));
    if !pv.pv_moves.is_empty() {
        parts.push(format!("pv {}", pv.pv_moves.join(" ")));
    }
    parts.join(" ")
}

fn spawn_child(
    config: &EngineProtocolConfig,
) -> Result<(Child, proto::Protocol<ChildStdin, BufReader<ChildStdout>>)> {
    let mut child = ProcCommand::new(&config.path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            MiningError::WorkerSpawn(format!("failed to start '{}': {err}", config.path))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| MiningError::WorkerSpawn("engine stdin not piped".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| MiningError::WorkerSpawn("engine stdout not piped".into()))?;

    if let Some(stderr) = child.stderr.take() {
        thread::Builder::new()
            .name("engine-stderr".into())
            .spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    warn!(stderr = %line, "engine stderr");
                }
            })
            .map_err(|err| {
                MiningError::WorkerSpawn(format!("failed to spawn stderr reader: {err}"))
            })?;
    }

    let proto = proto::Protocol::new(stdin, BufReader::new(stdout));
    Ok((child, proto))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    use super::*;
    use crate::filter::Filter;

    /// A process handle with no real backing process: always reports itself as exited, so
    /// `Drop`/`revive` never block on sleeps or signals.
    struct FakeProcess;

    impl EngineProcess for FakeProcess {
        fn is_running(&mut self) -> bool {
            false
        }

        fn kill(&mut self) {}

        fn wait(&mut self) {}
    }

    /// One scripted engine session: the full text it will emit on stdout, in response to
    /// whatever the worker writes to stdin (which this spawner discards).
    enum Session {
        Text(&'static str),
        SpawnFailure,
    }

    /// Hands out scripted sessions in order, one per call to `spawn` (so a handshake followed by
    /// a revival each gets their own canned transcript).
    struct ScriptedSpawner {
        sessions: Mutex<VecDeque<Session>>,
    }

    impl ScriptedSpawner {
        fn new(sessions: Vec<Session>) -> Self {
            Self {
                sessions: Mutex::new(sessions.into_iter().collect()),
            }
        }
    }

    impl EngineSpawner for ScriptedSpawner {
        type Process = FakeProcess;
        type Stdin = Vec<u8>;
        type Stdout = Cursor<Vec<u8>>;

        fn spawn(
            &self,
            _config: &EngineProtocolConfig,
        ) -> Result<(FakeProcess, proto::Protocol<Vec<u8>, Cursor<Vec<u8>>>)> {
            match self.sessions.lock().expect("sessions mutex poisoned").pop_front() {
                Some(Session::Text(text)) => Ok((
                    FakeProcess,
                    proto::Protocol::new(Vec::new(), Cursor::new(text.as_bytes().to_vec())),
                )),
                Some(Session::SpawnFailure) | None => {
                    Err(MiningError::WorkerSpawn("scripted spawn failure".into()))
                }
            }
        }
    }

    const HANDSHAKE: &str = "id name Fake\nuciok\nreadyok\n";

    fn config() -> Arc<EngineProtocolConfig> {
        Arc::new(EngineProtocolConfig::from_toml_str(r#"path = "fake-engine""#).unwrap())
    }

    #[test]
    fn accelerate_rejection_sends_stop_before_bestmove() {
        // Leading `readyok` answers `run_search`'s `ucinewgame`/`isready` round trip; the info
        // lines and `bestmove` are the search transcript itself.
        let search = "readyok\n\
                       info depth 1 score cp 10 pv e2e4\n\
                       info depth 2 score cp 20 pv e2e4\n\
                       bestmove e2e4\n";
        let spawner = ScriptedSpawner::new(vec![Session::Text(HANDSHAKE)]);
        let mut worker = Worker::spawn(0, spawner, config(), false).unwrap();

        // Rejects as soon as depth reaches 2, so `stop` must appear right after the second
        // info line is recorded and before any further traffic is sent.
        let accelerate = Filter::parse("gate=AND;depth<2;").unwrap();

        // Swap in a fresh scripted session carrying the search transcript.
        worker.proto = proto::Protocol::new(Vec::new(), Cursor::new(search.as_bytes().to_vec()));

        let analysis = worker
            .analyze(&Position::startpos(), &accelerate, 1_000_000, 2_000)
            .unwrap();
        assert_eq!(analysis.pv(1).unwrap().depth, 2);

        let sent = String::from_utf8(worker.proto.stdin_bytes().to_vec()).unwrap();
        let stop_idx = sent.find("stop\n").expect("stop must have been sent");
        let go_idx = sent.find("go ").expect("go must have been sent");
        assert!(stop_idx > go_idx, "stop must be sent after go: {sent}");
    }

    #[test]
    fn revival_recovers_after_a_broken_search() {
        // `revive()` re-runs the full handshake over the new session, and the retried
        // `run_search` that follows it reuses that same session, so the revival session's
        // transcript must carry both: handshake tokens, then the NewGame readyok, then the
        // search itself.
        let revival_session = "id name Fake\nuciok\nreadyok\nreadyok\ninfo depth 5 score cp 40 pv e2e4\nbestmove e2e4\n";
        let spawner = ScriptedSpawner::new(vec![Session::Text(HANDSHAKE), Session::Text(revival_session)]);
        let mut worker = Worker::spawn(0, spawner, config(), false).unwrap();
        // Simulate the live session breaking: the next read hits EOF immediately.
        worker.proto = proto::Protocol::new(Vec::new(), Cursor::new(Vec::new()));

        let accelerate = Filter::always_true();
        let analysis = worker
            .analyze(&Position::startpos(), &accelerate, 1_000_000, 2_000)
            .unwrap();
        assert_eq!(analysis.pv(1).unwrap().eval, crate::analysis::Eval::Centipawn(40));
        assert_eq!(worker.consecutive_revival_failures, 0);
    }

    #[test]
    fn two_consecutive_revival_failures_surface_as_worker_spawn_error() {
        let spawner = ScriptedSpawner::new(vec![Session::Text(HANDSHAKE)]);
        let mut worker = Worker::spawn(0, spawner, config(), false).unwrap();
        // Break the live session and make every future spawn attempt (i.e. every revival) fail.
        worker.proto = proto::Protocol::new(Vec::new(), Cursor::new(Vec::new()));
        worker.spawner = ScriptedSpawner::new(vec![]);

        let accelerate = Filter::always_true();
        let first = worker.analyze(&Position::startpos(), &accelerate, 1_000_000, 2_000);
        assert!(first.is_err());
        assert_eq!(worker.consecutive_revival_failures, 1);

        let second = worker.analyze(&Position::startpos(), &accelerate, 1_000_000, 2_000);
        assert!(matches!(second, Err(MiningError::WorkerSpawn(_))));
    }
}
