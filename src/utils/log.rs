// src/utils/log.rs

//! Structured run events and the sinks that consume them.
//!
//! Pipeline components never log free text directly. They emit a
//! [`RunEvent`] carrying the phase, source and (optionally) record key, and
//! the injected [`EventSink`] decides where it goes: [`LogSink`] forwards to
//! the `log` facade, [`MemorySink`] keeps events for assertions.

use std::sync::Mutex;

use chrono::Local;
use log::Level;

use crate::models::{Phase, RecordKey};

/// A single structured pipeline event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEvent {
    pub level: Level,
    pub phase: Phase,
    pub source: String,
    pub key: Option<RecordKey>,
    pub message: String,
}

impl RunEvent {
    pub fn new(level: Level, phase: Phase, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            phase,
            source: source.into(),
            key: None,
            message: message.into(),
        }
    }

    /// Attach the record key the event is about.
    pub fn with_key(mut self, key: &RecordKey) -> Self {
        self.key = Some(key.clone());
        self
    }

    /// `phase=… source=… [key=…] message`
    pub fn render(&self) -> String {
        match &self.key {
            Some(key) => format!(
                "phase={} source={} key={} {}",
                self.phase, self.source, key, self.message
            ),
            None => format!("phase={} source={} {}", self.phase, self.source, self.message),
        }
    }
}

/// Destination for run events, shared by every pipeline component.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);

    fn info(&self, phase: Phase, source: &str, message: &str) {
        self.emit(RunEvent::new(Level::Info, phase, source, message));
    }

    fn warn(&self, phase: Phase, source: &str, message: &str) {
        self.emit(RunEvent::new(Level::Warn, phase, source, message));
    }

    fn error(&self, phase: Phase, source: &str, message: &str) {
        self.emit(RunEvent::new(Level::Error, phase, source, message));
    }

    fn debug(&self, phase: Phase, source: &str, message: &str) {
        self.emit(RunEvent::new(Level::Debug, phase, source, message));
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: RunEvent) {
        log::log!(target: "regwatch", event.level, "{}", event.render());
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events emitted so far.
    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events for one phase and source.
    pub fn filter(&self, phase: Phase, source: &str) -> Vec<RunEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.phase == phase && e.source == source)
            .collect()
    }

    /// Whether any event at `level` or more severe was emitted for `source`.
    pub fn has_level(&self, level: Level, source: &str) -> bool {
        self.events()
            .iter()
            .any(|e| e.level <= level && e.source == source)
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Render a boxed header line block.
pub fn header(title: &str) -> String {
    let border = "═".repeat(60);
    format!("{border}\n  {title}\n{border}")
}

/// Render a summary section with aligned key/value lines.
pub fn summary(title: &str, items: &[(&str, String)]) -> String {
    let mut out = format!("[{}] [SUMMARY] {}", Local::now().format("%H:%M:%S"), title);
    for (key, value) in items {
        out.push_str(&format!("\n    {key}: {value}"));
    }
    out
}
