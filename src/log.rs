//! Consumed logging interface.
//!
//! The engine reports noteworthy events through a [`LogSink`]: a leveled
//! sink taking a format string with named `{placeholder}` tokens and
//! positional arguments. The default sink routes onto `tracing`, so a host
//! that already installs a `tracing` subscriber needs no configuration.
//!
//! Placeholder binding is positional by *first distinct occurrence*:
//! arguments are bound left-to-right to placeholders in the order each
//! distinct name first appears. Repeated placeholders reuse the
//! first-bound value, placeholders with no matching argument are left
//! literally in the text, and extra arguments beyond the placeholder count
//! are ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A leveled log sink consumed by the store.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Default sink: routes each level onto the matching `tracing` macro.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("{}", message),
            LogLevel::Info => tracing::info!("{}", message),
            LogLevel::Warn => tracing::warn!("{}", message),
            LogLevel::Error => tracing::error!("{}", message),
        }
    }
}

/// Substitutes named `{placeholder}` tokens with positional arguments.
///
/// Distinct placeholders are bound to arguments left-to-right in order of
/// first occurrence; repeated placeholders reuse the first-bound value.
/// Unmatched placeholders stay literal; extra arguments are ignored.
pub fn format_template(template: &str, args: &[&dyn fmt::Display]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut bound: HashMap<&str, String> = HashMap::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if !bound.contains_key(name) && bound.len() < args.len() {
                    bound.insert(name, args[bound.len()].to_string());
                }
                match bound.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                // Unclosed brace: keep the remainder literal.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Thin handle pairing a sink with the template formatter.
#[derive(Clone)]
pub struct StoreLogger {
    sink: Arc<dyn LogSink>,
}

impl StoreLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn debug(&self, template: &str, args: &[&dyn fmt::Display]) {
        self.sink.log(LogLevel::Debug, &format_template(template, args));
    }

    pub fn info(&self, template: &str, args: &[&dyn fmt::Display]) {
        self.sink.log(LogLevel::Info, &format_template(template, args));
    }

    pub fn warn(&self, template: &str, args: &[&dyn fmt::Display]) {
        self.sink.log(LogLevel::Warn, &format_template(template, args));
    }

    pub fn error(&self, template: &str, args: &[&dyn fmt::Display]) {
        self.sink.log(LogLevel::Error, &format_template(template, args));
    }
}

impl Default for StoreLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

impl fmt::Debug for StoreLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreLogger").finish_non_exhaustive()
    }
}
