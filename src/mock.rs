//! Scripted mock driver for unit tests.
//!
//! Records every driver call and replays scripted outcomes, so tests can
//! assert on exactly which begin/prepare/execute/finish sequence the engine
//! issued and inject conflicts or failures at chosen points.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::driver::{Driver, DriverConnection, ExecOutcome, RawRow, RowBatchSource};
use crate::error::{Error, Result};
use crate::types::{RawValue, TypeOid};

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    Prepare {
        conn: usize,
        handle: String,
        text: String,
    },
    Execute {
        conn: usize,
        handle: String,
    },
    Begin {
        conn: usize,
        write_access: bool,
    },
    Finish {
        conn: usize,
        commit: bool,
    },
    Close {
        conn: usize,
    },
}

/// Scripted response for the next `execute` call. When the script runs dry,
/// executes report `Affected(1)`.
pub enum Scripted {
    Affected(u64),
    Rows(Vec<Vec<RawRow>>),
    Fail(Error),
}

#[derive(Default)]
pub struct MockState {
    pub calls: Mutex<Vec<Call>>,
    pub execute_script: Mutex<VecDeque<Scripted>>,
    pub finish_script: Mutex<VecDeque<Result<()>>>,
    pub connect_script: Mutex<VecDeque<Error>>,
    pub open_connections: AtomicUsize,
    pub max_open_connections: AtomicUsize,
    next_conn: AtomicUsize,
}

#[derive(Default, Clone)]
pub struct MockDriver {
    pub state: Arc<MockState>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_execute(&self, scripted: Scripted) {
        self.state.execute_script.lock().push_back(scripted);
    }

    pub fn script_finish(&self, result: Result<()>) {
        self.state.finish_script.lock().push_back(result);
    }

    pub fn script_connect_failure(&self, error: Error) {
        self.state.connect_script.lock().push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state.calls.lock().iter().filter(|c| matches(c)).count()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>> {
        if let Some(error) = self.state.connect_script.lock().pop_front() {
            return Err(error);
        }
        let id = self.state.next_conn.fetch_add(1, Ordering::SeqCst);
        let open = self.state.open_connections.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_open_connections
            .fetch_max(open, Ordering::SeqCst);
        self.state.calls.lock().push(Call::Connect);
        Ok(Box::new(MockConnection {
            id,
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MockConnection {
    id: usize,
    state: Arc<MockState>,
    closed: bool,
}

#[async_trait]
impl DriverConnection for MockConnection {
    async fn prepare(&mut self, handle: &str, text: &str, _param_types: &[TypeOid]) -> Result<()> {
        self.state.calls.lock().push(Call::Prepare {
            conn: self.id,
            handle: handle.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn execute(&mut self, handle: &str, _params: &[RawValue]) -> Result<ExecOutcome> {
        self.state.calls.lock().push(Call::Execute {
            conn: self.id,
            handle: handle.to_string(),
        });
        match self.state.execute_script.lock().pop_front() {
            Some(Scripted::Affected(count)) => Ok(ExecOutcome::Affected(count)),
            Some(Scripted::Rows(batches)) => {
                Ok(ExecOutcome::Rows(Box::new(MockBatchSource::new(batches))))
            }
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok(ExecOutcome::Affected(1)),
        }
    }

    async fn begin(&mut self, write_access: bool) -> Result<()> {
        self.state.calls.lock().push(Call::Begin {
            conn: self.id,
            write_access,
        });
        Ok(())
    }

    async fn finish(&mut self, commit: bool) -> Result<()> {
        self.state.calls.lock().push(Call::Finish {
            conn: self.id,
            commit,
        });
        match self.state.finish_script.lock().pop_front() {
            Some(result) => result,
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
            self.state.calls.lock().push(Call::Close { conn: self.id });
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if !self.closed {
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Scripted batch source; counts fetches so tests can assert laziness.
pub struct MockBatchSource {
    batches: VecDeque<Vec<RawRow>>,
    fetches: Arc<AtomicUsize>,
}

impl MockBatchSource {
    pub fn new(batches: Vec<Vec<RawRow>>) -> Self {
        Self {
            batches: batches.into(),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fetches(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.fetches)
    }
}

#[async_trait]
impl RowBatchSource for MockBatchSource {
    async fn next_batch(&mut self) -> Result<Option<Vec<RawRow>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.batches.pop_front())
    }
}
