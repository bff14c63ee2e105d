//! Scripted in-memory backend for orchestration tests.
//!
//! Every statement a [`MockConnection`] receives is recorded. Queries return
//! the rows of the first registered responder whose pattern occurs in the
//! SQL, or nothing. Statements matching a failure pattern return an error.

use crate::error::{LanternError, Result};
use crate::params::Param;
use crate::pool::{Connection, ManageConnection, Row};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    Begin,
    Commit,
    Rollback,
    Batch(String),
    Execute(String, Vec<Param>),
    Query(String, Vec<Param>),
    Copy(String, Vec<u8>),
}

impl Event {
    /// SQL text of a statement event.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Event::Batch(sql)
            | Event::Execute(sql, _)
            | Event::Query(sql, _)
            | Event::Copy(sql, _) => Some(sql),
            _ => None,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Event::Begin => Some("BEGIN"),
            Event::Commit => Some("COMMIT"),
            Event::Rollback => Some("ROLLBACK"),
            other => other.sql(),
        }
    }
}

type Responder = Arc<dyn Fn(&str, &[Param]) -> Vec<Row> + Send + Sync>;

#[derive(Default)]
struct Script {
    events: Vec<Event>,
    responders: Vec<(String, Responder)>,
    failures: Vec<String>,
    fail_connect: bool,
    connections: usize,
}

#[derive(Clone, Default)]
pub struct MockManager {
    script: Arc<Mutex<Script>>,
}

impl MockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries whose SQL contains `pattern` return `rows`.
    pub fn on_query(&self, pattern: &str, rows: Vec<Row>) {
        self.respond(pattern, move |_, _| rows.clone());
    }

    pub fn respond(
        &self,
        pattern: &str,
        responder: impl Fn(&str, &[Param]) -> Vec<Row> + Send + Sync + 'static,
    ) {
        self.script
            .lock()
            .responders
            .push((pattern.to_string(), Arc::new(responder)));
    }

    /// Any statement whose SQL contains `pattern` fails, transaction
    /// control included.
    pub fn fail_on(&self, pattern: &str) {
        self.script.lock().failures.push(pattern.to_string());
    }

    pub fn fail_connect(&self, fail: bool) {
        self.script.lock().fail_connect = fail;
    }

    pub fn events(&self) -> Vec<Event> {
        self.script.lock().events.clone()
    }

    /// SQL of every recorded statement, transaction control excluded.
    pub fn statements(&self) -> Vec<String> {
        self.script
            .lock()
            .events
            .iter()
            .filter_map(Event::sql)
            .map(str::to_string)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.script.lock().connections
    }

    pub fn clear_events(&self) {
        self.script.lock().events.clear();
    }
}

impl ManageConnection for MockManager {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        let mut script = self.script.lock();
        if script.fail_connect {
            return Err(failure("connect"));
        }
        script.connections += 1;
        script.events.push(Event::Connect);
        Ok(Box::new(MockConnection {
            script: self.script.clone(),
        }))
    }
}

pub struct MockConnection {
    script: Arc<Mutex<Script>>,
}

fn failure(what: &str) -> LanternError {
    LanternError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("mock failure: {what}"),
    ))
}

impl MockConnection {
    fn record(&self, event: Event) -> Result<()> {
        let mut script = self.script.lock();
        let failed = event.text().and_then(|sql| {
            script
                .failures
                .iter()
                .find(|pattern| sql.contains(pattern.as_str()))
                .cloned()
        });
        script.events.push(event);
        match failed {
            Some(pattern) => Err(failure(&pattern)),
            None => Ok(()),
        }
    }
}

impl Connection for MockConnection {
    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        self.record(Event::Execute(sql.to_string(), params.to_vec()))?;
        Ok(1)
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Row>> {
        self.record(Event::Query(sql.to_string(), params.to_vec()))?;
        let responder = self
            .script
            .lock()
            .responders
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, responder)| responder.clone());
        Ok(responder.map(|r| r(sql, params)).unwrap_or_default())
    }

    fn batch_execute(&mut self, sql: &str) -> Result<()> {
        let event = match sql {
            "BEGIN" => Event::Begin,
            "COMMIT" => Event::Commit,
            "ROLLBACK" => Event::Rollback,
            _ => Event::Batch(sql.to_string()),
        };
        self.record(event)
    }

    fn copy_in(&mut self, sql: &str, data: &[u8]) -> Result<u64> {
        self.record(Event::Copy(sql.to_string(), data.to_vec()))?;
        Ok(data.split(|b| *b == b'\n').count() as u64)
    }
}
