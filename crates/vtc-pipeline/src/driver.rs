//! Single-threaded pipeline driver.
//!
//! A [`Pipeline`] owns its tasks and the links between their ports. Each
//! call to [`Pipeline::step`] is one *cycle*:
//!
//! 1. Every port of every task is cleared, releasing the tokens of the
//!    previous cycle (and with them decode pool slots).
//! 2. Tasks run once each in topological order. A task's inputs are copied
//!    from the outputs its upstream tasks published earlier in the cycle.
//! 3. A task whose wired producers all published nothing is skipped, unless
//!    every one of them has ended. It then runs with empty inputs, which is
//!    how exhaustion propagates downstream.
//!
//! The run ends when every task has returned `EndOfStream`, and stops at the
//! first `Fail` with [`EngineError::TaskFailed`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use vtc_core::buffer::Token;
use vtc_core::context::{ExecutionContext, HealthSnapshot};
use vtc_core::error::{EngineError, Result};
use vtc_core::host_copy_audit;
use vtc_core::task::{Task, TaskExecStatus, TaskStats};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Driver knobs. Every field has a usable default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Turn recorded host copies into hard failures for this run.
    ///
    /// Requires feature `audit-no-host-copies` on this crate.
    pub strict_no_host_copies: bool,
    /// Cycles between progress log lines. 0 disables them.
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strict_no_host_copies: false,
            progress_interval: 100,
        }
    }
}

// ─── Metrics ────────────────────────────────────────────────────────────────

/// Atomic counters, readable while a pipeline runs on another thread.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Completed cycles.
    pub cycles: AtomicU64,
    /// `execute` calls across all tasks.
    pub executions: AtomicU64,
    /// Tasks skipped because their producers published nothing.
    pub skipped: AtomicU64,
    /// Tasks that returned `Fail`.
    pub failures: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub executions: u64,
    pub skipped: u64,
    pub failures: u64,
}

// ─── Report ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize)]
pub struct TaskReport {
    pub id: String,
    pub name: String,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub stats: TaskStats,
}

/// JSON-serializable summary of one run.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub backend: String,
    pub finished: bool,
    pub elapsed_us: u64,
    pub metrics: MetricsSnapshot,
    pub tasks: Vec<TaskReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSnapshot>,
    pub host_copy_violations: u64,
}

// ─── Topology ───────────────────────────────────────────────────────────────

/// Kahn's algorithm; ties go to the lowest index so the order is stable.
/// `None` when the edges contain a cycle.
pub(crate) fn topological_order(
    count: usize,
    edges: impl IntoIterator<Item = (usize, usize)>,
) -> Option<Vec<usize>> {
    let mut indegree = vec![0usize; count];
    let mut next: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (from, to) in edges {
        indegree[to] += 1;
        next[from].push(to);
    }
    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &next[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }
    (order.len() == count).then_some(order)
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

struct Node {
    id: String,
    task: Box<dyn Task>,
    ended: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Link {
    from: (usize, usize),
    to: (usize, usize),
}

/// A set of tasks wired output → input, driven cycle by cycle.
pub struct Pipeline {
    ctx: Option<Arc<ExecutionContext>>,
    config: PipelineConfig,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    links: Vec<Link>,
    order: Option<Vec<usize>>,
    metrics: Arc<PipelineMetrics>,
    started: Option<Instant>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            ctx: None,
            config,
            nodes: Vec::new(),
            index: HashMap::new(),
            links: Vec::new(),
            order: None,
            metrics: PipelineMetrics::new(),
            started: None,
        }
    }

    /// A pipeline whose report includes the health of `ctx`.
    pub fn with_context(ctx: &Arc<ExecutionContext>, config: PipelineConfig) -> Self {
        Self {
            ctx: Some(Arc::clone(ctx)),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn add_task(&mut self, id: impl Into<String>, task: Box<dyn Task>) -> Result<()> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(EngineError::Wiring("task id must not be empty".into()));
        }
        if self.index.contains_key(&id) {
            return Err(EngineError::Wiring(format!("duplicate task id `{id}`")));
        }
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(Node {
            id,
            task,
            ended: false,
        });
        self.order = None;
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| EngineError::Wiring(format!("unknown task `{id}`")))
    }

    /// Link output `from.1` of task `from.0` to input `to.1` of task `to.0`.
    pub fn connect(&mut self, from: (&str, usize), to: (&str, usize)) -> Result<()> {
        let link = Link {
            from: (self.lookup(from.0)?, from.1),
            to: (self.lookup(to.0)?, to.1),
        };
        self.links.push(link);
        self.order = None;
        Ok(())
    }

    /// Check port ranges, producers and acyclicity; fixes the execution order.
    pub fn validate(&mut self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(EngineError::Wiring("pipeline has no tasks".into()));
        }
        let mut producers: HashMap<(usize, usize), usize> = HashMap::new();
        for link in &self.links {
            let (src, out) = link.from;
            let (dst, inp) = link.to;
            let (src_node, dst_node) = (&self.nodes[src], &self.nodes[dst]);
            if out >= src_node.task.num_outputs() {
                return Err(EngineError::Wiring(format!(
                    "`{}` has {} outputs, cannot link from port {out}",
                    src_node.id,
                    src_node.task.num_outputs()
                )));
            }
            if inp >= dst_node.task.num_inputs() {
                return Err(EngineError::Wiring(format!(
                    "`{}` has {} inputs, cannot link to port {inp}",
                    dst_node.id,
                    dst_node.task.num_inputs()
                )));
            }
            if let Some(prev) = producers.insert(link.to, src) {
                return Err(EngineError::Wiring(format!(
                    "input {inp} of `{}` is fed by both `{}` and `{}`",
                    dst_node.id, self.nodes[prev].id, src_node.id
                )));
            }
        }
        for (i, node) in self.nodes.iter().enumerate() {
            for port in 0..node.task.num_inputs() {
                if node.task.input_required(port) && !producers.contains_key(&(i, port)) {
                    return Err(EngineError::Wiring(format!(
                        "required input {port} of `{}` is not connected",
                        node.id
                    )));
                }
            }
        }
        let order = topological_order(
            self.nodes.len(),
            self.links.iter().map(|l| (l.from.0, l.to.0)),
        )
        .ok_or_else(|| EngineError::Wiring("pipeline links contain a cycle".into()))?;
        debug!(
            order = ?order.iter().map(|&i| self.nodes[i].id.as_str()).collect::<Vec<_>>(),
            "pipeline validated"
        );
        self.order = Some(order);
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<&dyn Task> {
        self.index.get(id).map(|&i| self.nodes[i].task.as_ref())
    }

    /// Token published on `port` of task `id` during the last cycle.
    pub fn output(&self, id: &str, port: usize) -> Option<&Token> {
        self.task(id).and_then(|t| t.output(port))
    }

    /// Whether every task has reached end of stream.
    pub fn is_finished(&self) -> bool {
        !self.nodes.is_empty() && self.nodes.iter().all(|n| n.ended)
    }

    /// Run one cycle. `Ok(false)` once every task has ended.
    pub fn step(&mut self) -> Result<bool> {
        if self.order.is_none() {
            self.validate()?;
        }
        let order = self.order.clone().unwrap_or_default();
        self.started.get_or_insert_with(Instant::now);

        for node in &mut self.nodes {
            node.task.clear_inputs();
            node.task.clear_outputs();
        }

        let mut executed = 0u64;
        for &i in &order {
            if self.nodes[i].ended {
                continue;
            }
            let mut wired = false;
            let mut fed = false;
            let mut producers_ended = true;
            for link in self.links.iter().filter(|l| l.to.0 == i) {
                wired = true;
                let (src, port) = link.from;
                producers_ended &= self.nodes[src].ended;
                let token = self.nodes[src].task.output(port).cloned();
                if let Some(token) = token {
                    self.nodes[i].task.set_input(link.to.1, token)?;
                    fed = true;
                }
            }
            if wired && !fed && !producers_ended {
                self.metrics.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let node = &mut self.nodes[i];
            let status = node.task.execute();
            executed += 1;
            self.metrics.executions.fetch_add(1, Ordering::Relaxed);
            match status {
                TaskExecStatus::Success => {}
                TaskExecStatus::EndOfStream => {
                    node.ended = true;
                    info!(task = %node.id, "task reached end of stream");
                }
                TaskExecStatus::Fail => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    let code = node.task.last_error().map_or(0, EngineError::error_code);
                    error!(task = %node.id, code, "pipeline stopped");
                    return Err(EngineError::TaskFailed {
                        task: node.id.clone(),
                        code,
                    });
                }
            }
        }

        let cycles = self.metrics.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.progress_interval > 0 && cycles.is_multiple_of(self.config.progress_interval)
        {
            info!(cycles, executions = executed, "pipeline progress");
        }
        if executed == 0 && !self.is_finished() {
            return Err(EngineError::InvariantViolation(
                "pipeline cycle executed no task".into(),
            ));
        }
        Ok(!self.is_finished())
    }

    /// Run to completion.
    pub fn run(&mut self) -> Result<PipelineReport> {
        self.run_until_cancelled(&CancellationToken::new())
    }

    /// Run to completion, checking `cancel` between cycles.
    #[instrument(skip_all, name = "pipeline")]
    pub fn run_until_cancelled(&mut self, cancel: &CancellationToken) -> Result<PipelineReport> {
        if self.config.strict_no_host_copies && !cfg!(feature = "audit-no-host-copies") {
            return Err(EngineError::Config(
                "strict_no_host_copies requires feature `audit-no-host-copies`".into(),
            ));
        }
        let _audit_guard = host_copy_audit::push_strict_mode(self.config.strict_no_host_copies);

        self.validate()?;
        info!(tasks = self.nodes.len(), links = self.links.len(), "pipeline started");
        while self.step()? {
            if cancel.is_cancelled() {
                info!(
                    cycles = self.metrics.cycles.load(Ordering::Relaxed),
                    "pipeline cancelled"
                );
                return Err(EngineError::Cancelled);
            }
        }
        if let Some(ctx) = &self.ctx {
            ctx.synchronize()?;
            ctx.device().report_pool_stats();
        }
        let report = self.report();
        info!(
            cycles = report.metrics.cycles,
            executions = report.metrics.executions,
            elapsed_ms = report.elapsed_us / 1000,
            "pipeline finished"
        );
        Ok(report)
    }

    /// Summary of the run so far.
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            backend: self
                .ctx
                .as_ref()
                .map_or_else(|| "none".to_string(), |c| c.backend().name().to_string()),
            finished: self.is_finished(),
            elapsed_us: self
                .started
                .map_or(0, |t| t.elapsed().as_micros() as u64),
            metrics: self.metrics.snapshot(),
            tasks: self
                .nodes
                .iter()
                .map(|n| TaskReport {
                    id: n.id.clone(),
                    name: n.task.name().to_string(),
                    num_inputs: n.task.num_inputs(),
                    num_outputs: n.task.num_outputs(),
                    stats: n.task.stats(),
                })
                .collect(),
            health: self.ctx.as_ref().map(|c| c.device().health_snapshot()),
            host_copy_violations: host_copy_audit::violation_count(),
        }
    }
}

/// Run several pipelines at once, each on its own blocking worker.
///
/// Results come back in input order. `cancel` stops every pipeline between
/// cycles; one pipeline failing does not stop the others.
pub async fn run_concurrent(
    pipelines: Vec<Pipeline>,
    cancel: CancellationToken,
) -> Vec<Result<PipelineReport>> {
    let count = pipelines.len();
    let mut workers = JoinSet::new();
    for (slot, mut pipeline) in pipelines.into_iter().enumerate() {
        let cancel = cancel.clone();
        workers.spawn_blocking(move || (slot, pipeline.run_until_cancelled(&cancel)));
    }

    let mut results: Vec<Option<Result<PipelineReport>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((slot, result)) => {
                if let Err(e) = &result {
                    error!(pipeline = slot, error = %e, "pipeline failed");
                }
                results[slot] = Some(result);
            }
            Err(join_err) => error!(%join_err, "pipeline worker panicked"),
        }
    }
    results
        .into_iter()
        .map(|r| {
            r.unwrap_or_else(|| {
                Err(EngineError::InvariantViolation(
                    "pipeline worker panicked".into(),
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use vtc_core::buffer::Packet;
    use vtc_core::task::{Stage, Step, TaskCore};

    use super::*;

    /// Emits `count` packets, one per execute.
    struct Source {
        core: TaskCore,
        left: u32,
    }

    impl Source {
        fn boxed(count: u32) -> Box<dyn Task> {
            Box::new(Self {
                core: TaskCore::new("source", 0, 1),
                left: count,
            })
        }
    }

    impl Stage for Source {
        fn core(&self) -> &TaskCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut TaskCore {
            &mut self.core
        }
        fn step(&mut self) -> Result<Step> {
            if self.left == 0 {
                return Ok(Step::Exhausted);
            }
            self.left -= 1;
            self.core.publish(
                0,
                Token::Packet(Packet {
                    pts: i64::from(self.left),
                    ..Packet::default()
                }),
            )?;
            Ok(Step::Done)
        }
    }

    /// Counts packets; publishes only every other one; fails past `limit`.
    struct Filter {
        core: TaskCore,
        seen: u32,
        limit: u32,
    }

    impl Filter {
        fn boxed(limit: u32) -> Box<dyn Task> {
            Box::new(Self {
                core: TaskCore::new("filter", 1, 1),
                seen: 0,
                limit,
            })
        }
    }

    impl Stage for Filter {
        fn core(&self) -> &TaskCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut TaskCore {
            &mut self.core
        }
        fn step(&mut self) -> Result<Step> {
            let Some(token) = self.core.take_input(0) else {
                return Ok(Step::Exhausted);
            };
            self.seen += 1;
            if self.seen > self.limit {
                return Err(EngineError::Decode("limit reached".into()));
            }
            if self.seen % 2 == 0 {
                self.core.publish(0, token)?;
            }
            Ok(Step::Done)
        }
    }

    /// Consumes anything; ends on empty input.
    struct Sink {
        core: TaskCore,
    }

    impl Sink {
        fn boxed() -> Box<dyn Task> {
            Box::new(Self {
                core: TaskCore::new("sink", 1, 0),
            })
        }
    }

    impl Stage for Sink {
        fn core(&self) -> &TaskCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut TaskCore {
            &mut self.core
        }
        fn step(&mut self) -> Result<Step> {
            match self.core.take_input(0) {
                Some(_) => Ok(Step::Done),
                None => Ok(Step::Exhausted),
            }
        }
    }

    fn chain(count: u32, limit: u32) -> Pipeline {
        let mut p = Pipeline::new(PipelineConfig::default());
        p.add_task("sink", Sink::boxed()).expect("add");
        p.add_task("filter", Filter::boxed(limit)).expect("add");
        p.add_task("src", Source::boxed(count)).expect("add");
        p.connect(("src", 0), ("filter", 0)).expect("link");
        p.connect(("filter", 0), ("sink", 0)).expect("link");
        p
    }

    #[test]
    fn idle_producers_do_not_end_consumers() {
        let mut p = chain(6, 100);
        let report = p.run().expect("run");
        assert!(report.finished);
        let by_id = |id: &str| {
            report
                .tasks
                .iter()
                .find(|t| t.id == id)
                .expect("task")
                .stats
                .clone()
        };
        // 6 packets + the exhausting call.
        assert_eq!(by_id("filter").executions, 7);
        assert_eq!(by_id("sink").executions, 4);
        assert_eq!(by_id("sink").status, Some(TaskExecStatus::EndOfStream));
        assert_eq!(report.metrics.skipped, 3);
        assert_eq!(report.backend, "none");
    }

    #[test]
    fn first_failure_stops_the_run() {
        let mut p = chain(6, 3);
        let err = p.run().expect_err("filter fails on packet 4");
        assert!(matches!(
            &err,
            EngineError::TaskFailed { task, code: 300 } if task == "filter"
        ));
        assert!(err.to_string().contains("`filter` failed with error code 300"));
        assert!(!p.report().finished);
    }

    #[test]
    fn wiring_is_validated_before_running() {
        let mut p = Pipeline::new(PipelineConfig::default());
        p.add_task("src", Source::boxed(1)).expect("add");
        p.add_task("sink", Sink::boxed()).expect("add");
        let err = p.validate().expect_err("sink input unwired");
        assert!(err.to_string().contains("required input 0 of `sink`"));

        p.connect(("src", 1), ("sink", 0)).expect("ids exist");
        let err = p.validate().expect_err("no output 1");
        assert!(err.to_string().contains("cannot link from port 1"));

        let mut p = chain(1, 1);
        p.add_task("src2", Source::boxed(1)).expect("add");
        p.connect(("src2", 0), ("filter", 0)).expect("link");
        let err = p.validate().expect_err("two producers");
        assert!(err.to_string().contains("fed by both"));

        let mut p = Pipeline::new(PipelineConfig::default());
        p.add_task("a", Filter::boxed(1)).expect("add");
        p.add_task("b", Filter::boxed(1)).expect("add");
        p.connect(("a", 0), ("b", 0)).expect("link");
        p.connect(("b", 0), ("a", 0)).expect("link");
        let err = p.validate().expect_err("cycle");
        assert!(err.to_string().contains("cycle"));

        let mut p = Pipeline::new(PipelineConfig::default());
        p.add_task("a", Sink::boxed()).expect("add");
        let err = p.add_task("a", Sink::boxed()).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate task id"));
        let err = p.connect(("a", 0), ("zz", 0)).expect_err("unknown");
        assert!(err.to_string().contains("unknown task `zz`"));
    }

    #[test]
    fn cancellation_stops_between_cycles() {
        let mut p = chain(1000, 10_000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = p.run_until_cancelled(&cancel).expect_err("cancelled");
        assert_eq!(err.error_code(), 402);
        assert_eq!(p.metrics().snapshot().cycles, 1);
    }

    #[test]
    fn topological_order_is_stable() {
        assert_eq!(
            topological_order(4, [(3, 1), (1, 0), (2, 0)]),
            Some(vec![2, 3, 1, 0])
        );
        assert_eq!(topological_order(2, [(0, 1), (1, 0)]), None);
    }

    #[test]
    fn report_serializes_to_json() {
        let mut p = chain(2, 10);
        let report = p.run().expect("run");
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["finished"], true);
        assert_eq!(json["tasks"].as_array().map(Vec::len), Some(3));
        assert!(json.get("health").is_none());
    }

    #[cfg(not(feature = "audit-no-host-copies"))]
    #[test]
    fn strict_mode_needs_the_audit_feature() {
        let mut p = chain(1, 1);
        p.config.strict_no_host_copies = true;
        let err = p.run().expect_err("feature missing");
        assert_eq!(err.error_code(), 403);
        assert!(err.to_string().contains("audit-no-host-copies"));
    }

    #[tokio::test]
    async fn concurrent_runs_report_in_order() {
        let results = run_concurrent(
            vec![chain(3, 10), chain(4, 1), chain(5, 10)],
            CancellationToken::new(),
        )
        .await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(
            results[2].as_ref().map(|r| r.tasks.len()).ok(),
            Some(3)
        );
    }
}
