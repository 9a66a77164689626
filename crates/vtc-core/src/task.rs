//! The task contract shared by every pipeline stage.
//!
//! A [`Task`] has a fixed number of input and output ports, decided by its
//! `make` factory and never changed afterwards. The driver places [`Token`]s
//! on input ports, calls [`Task::execute`], and reads output ports after a
//! [`TaskExecStatus::Success`].
//!
//! Concrete stages implement the smaller [`Stage`] trait and embed a
//! [`TaskCore`]; the blanket `impl<S: Stage> Task for S` supplies port
//! handling, status latching and logging:
//!
//! - `EndOfStream` is sticky: once returned, every later call returns it.
//! - `Fail` is sticky: a failed task is poisoned and outputs are cleared so
//!   nothing partial flows downstream.

use serde::Serialize;
use tracing::{debug, error, trace};

use crate::buffer::Token;
use crate::error::{EngineError, Result};

/// Result of one [`Task::execute`] call. Carries no payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExecStatus {
    Success,
    EndOfStream,
    Fail,
}

/// What a stage did during one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Work done; outputs published (possibly none, e.g. encoder lookahead).
    Done,
    /// Input exhausted and all buffered work drained.
    Exhausted,
}

/// Per-task execution counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub executions: u64,
    pub successes: u64,
    /// Successful executions that published at least one output.
    pub outputs: u64,
    pub status: Option<TaskExecStatus>,
    pub last_error_code: Option<u32>,
}

/// The uniform interface the driver uses for every stage.
pub trait Task: Send {
    /// Stable stage name used in logs and reports.
    fn name(&self) -> &str;

    fn num_inputs(&self) -> usize;

    fn num_outputs(&self) -> usize;

    /// Whether input `index` must be wired for the task to be usable.
    fn input_required(&self, index: usize) -> bool;

    /// Place a token on input port `index`.
    fn set_input(&mut self, index: usize, token: Token) -> Result<()>;

    /// Token published on output port `index` by the last successful call.
    fn output(&self, index: usize) -> Option<&Token>;

    fn clear_inputs(&mut self);

    fn clear_outputs(&mut self);

    /// Perform one unit of work.
    fn execute(&mut self) -> TaskExecStatus;

    /// The error behind the last `Fail`, if any.
    fn last_error(&self) -> Option<&EngineError>;

    fn stats(&self) -> TaskStats;
}

/// Port storage and status latch embedded in every stage.
#[derive(Debug)]
pub struct TaskCore {
    name: String,
    inputs: Box<[Option<Token>]>,
    outputs: Box<[Option<Token>]>,
    latched: Option<TaskExecStatus>,
    last_error: Option<EngineError>,
    stats: TaskStats,
}

impl TaskCore {
    pub fn new(name: impl Into<String>, num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            name: name.into(),
            inputs: vec![None; num_inputs].into_boxed_slice(),
            outputs: vec![None; num_outputs].into_boxed_slice(),
            latched: None,
            last_error: None,
            stats: TaskStats::default(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Borrow input `index` without consuming it.
    pub fn input(&self, index: usize) -> Option<&Token> {
        self.inputs.get(index).and_then(Option::as_ref)
    }

    /// Move input `index` out of its port.
    pub fn take_input(&mut self, index: usize) -> Option<Token> {
        self.inputs.get_mut(index).and_then(Option::take)
    }

    /// Publish `token` on output `index`.
    pub fn publish(&mut self, index: usize, token: Token) -> Result<()> {
        let arity = self.outputs.len();
        let slot = self.outputs.get_mut(index).ok_or_else(|| {
            EngineError::InvariantViolation(format!(
                "{} has {arity} outputs, cannot publish on port {index}",
                self.name
            ))
        })?;
        *slot = Some(token);
        Ok(())
    }

    fn has_outputs(&self) -> bool {
        self.outputs.iter().any(Option::is_some)
    }

    fn finish(&mut self, result: Result<Step>) -> TaskExecStatus {
        let status = match result {
            Ok(Step::Done) => {
                self.stats.successes += 1;
                if self.has_outputs() {
                    self.stats.outputs += 1;
                }
                trace!(task = %self.name, "execute: success");
                TaskExecStatus::Success
            }
            Ok(Step::Exhausted) => {
                self.clear_outputs();
                debug!(task = %self.name, executions = self.stats.executions, "end of stream");
                self.latched = Some(TaskExecStatus::EndOfStream);
                TaskExecStatus::EndOfStream
            }
            Err(err) => {
                self.clear_outputs();
                error!(
                    task = %self.name,
                    code = err.error_code(),
                    category = ?err.category(),
                    error = %err,
                    "task failed"
                );
                self.stats.last_error_code = Some(err.error_code());
                self.last_error = Some(err);
                self.latched = Some(TaskExecStatus::Fail);
                TaskExecStatus::Fail
            }
        };
        self.stats.status = Some(status);
        status
    }

    fn clear_outputs(&mut self) {
        self.outputs.iter_mut().for_each(|o| *o = None);
    }
}

/// Implementation side of a stage. See the module docs.
pub trait Stage: Send {
    fn core(&self) -> &TaskCore;

    fn core_mut(&mut self) -> &mut TaskCore;

    /// Do one unit of work. Empty required inputs mean upstream is exhausted.
    fn step(&mut self) -> Result<Step>;

    /// Whether input `index` must be wired. Backs [`Task::input_required`].
    fn port_required(&self, index: usize) -> bool {
        index < self.core().inputs.len()
    }
}

impl<S: Stage> Task for S {
    fn name(&self) -> &str {
        self.core().name()
    }

    fn num_inputs(&self) -> usize {
        self.core().inputs.len()
    }

    fn num_outputs(&self) -> usize {
        self.core().outputs.len()
    }

    fn input_required(&self, index: usize) -> bool {
        self.port_required(index)
    }

    fn set_input(&mut self, index: usize, token: Token) -> Result<()> {
        let core = self.core_mut();
        let arity = core.inputs.len();
        let slot = core.inputs.get_mut(index).ok_or_else(|| {
            EngineError::Wiring(format!(
                "{} has {arity} inputs, cannot set port {index}",
                core.name
            ))
        })?;
        *slot = Some(token);
        Ok(())
    }

    fn output(&self, index: usize) -> Option<&Token> {
        self.core().outputs.get(index).and_then(Option::as_ref)
    }

    fn clear_inputs(&mut self) {
        self.core_mut().inputs.iter_mut().for_each(|i| *i = None);
    }

    fn clear_outputs(&mut self) {
        self.core_mut().clear_outputs();
    }

    fn execute(&mut self) -> TaskExecStatus {
        if let Some(status) = self.core().latched {
            return status;
        }
        let core = self.core_mut();
        core.stats.executions += 1;
        core.clear_outputs();
        let result = self.step();
        self.core_mut().finish(result)
    }

    fn last_error(&self) -> Option<&EngineError> {
        self.core().last_error.as_ref()
    }

    fn stats(&self) -> TaskStats {
        self.core().stats.clone()
    }
}
