//! Logging statistics from optimization steps
//!
//! Diagnostic notices (e.g. an exhausted line search) go through the [`log`] facade.
//! Numeric step statistics go through a [`StatsLogger`].
mod display;
mod summary;

pub use display::{ByTime, DisplayLogger};

use log::warn;
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// A value that can be logged.
#[derive(Debug, Clone, PartialEq)]
pub enum Loggable {
    /// Nothing. No data to log.
    ///
    /// Logging `Nothing` may still produce a placeholder entry for the name.
    Nothing,
    /// A scalar value. Aggregated by taking means.
    Scalar(f64),
    /// Increment a counter.
    CounterIncrement(u64),
    /// A message. Aggregated by counting occurrences.
    Message(Cow<'static, str>),
}

impl Loggable {
    /// The name of this variant
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::Nothing => "Nothing",
            Self::Scalar(_) => "Scalar",
            Self::CounterIncrement(_) => "CounterIncrement",
            Self::Message(_) => "Message",
        }
    }
}

impl From<f64> for Loggable {
    #[inline]
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl From<f32> for Loggable {
    #[inline]
    fn from(value: f32) -> Self {
        Self::Scalar(value.into())
    }
}

/// Logging error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    #[error("incompatible value type; previously {prev} but now {now}")]
    IncompatibleValue {
        prev: &'static str,
        now: &'static str,
    },
}

/// Identifier of a logged value: a name inside a (possibly empty) stack of scopes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    namespace: Vec<&'static str>,
    name: &'static str,
}

impl Id {
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        Self {
            namespace: Vec::new(),
            name,
        }
    }

    /// Place this id inside an outer scope.
    #[must_use]
    pub fn with_prefix(mut self, scope: &'static str) -> Self {
        self.namespace.insert(0, scope);
        self
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for scope in &self.namespace {
            write!(f, "{}/", scope)?;
        }
        f.write_str(self.name)
    }
}

/// Log statistics of optimization steps.
///
/// Values logged within a group (between [`group_start`](StatsLogger::group_start) and
/// [`group_end`](StatsLogger::group_end)) are never split across summaries.
pub trait StatsLogger {
    /// Start a group of values logged together.
    fn group_start(&mut self) {}

    /// Log a value as part of the current group.
    ///
    /// # Errors
    /// If the value is structurally incompatible with previous values logged under `id`.
    fn group_log(&mut self, id: Id, value: Loggable) -> Result<(), LogError>;

    /// End the current group.
    fn group_end(&mut self) {}

    /// Write out any pending summaries.
    fn flush(&mut self) {}

    /// Log a single value in its own group.
    ///
    /// # Errors
    /// If the value is structurally incompatible with previous values logged under `name`.
    fn log(&mut self, name: &'static str, value: Loggable) -> Result<(), LogError> {
        self.group_start();
        let result = self.group_log(Id::new(name), value);
        self.group_end();
        result
    }

    /// Log a scalar value, reporting (not propagating) incompatibilities.
    fn log_scalar(&mut self, name: &'static str, value: f64) {
        if let Err(err) = self.log(name, Loggable::Scalar(value)) {
            warn!("failed to log {:?}: {}", name, err);
        }
    }

    /// Increment a counter, reporting (not propagating) incompatibilities.
    fn log_counter_increment(&mut self, name: &'static str, increment: u64) {
        if let Err(err) = self.log(name, Loggable::CounterIncrement(increment)) {
            warn!("failed to log {:?}: {}", name, err);
        }
    }

    /// Log a message, reporting (not propagating) incompatibilities.
    fn log_message(&mut self, name: &'static str, message: &'static str) {
        if let Err(err) = self.log(name, Loggable::Message(message.into())) {
            warn!("failed to log {:?}: {}", name, err);
        }
    }
}

/// Logger that does nothing
impl StatsLogger for () {
    #[inline]
    fn group_log(&mut self, _: Id, _: Loggable) -> Result<(), LogError> {
        Ok(())
    }
}

impl<L: StatsLogger + ?Sized> StatsLogger for &mut L {
    #[inline]
    fn group_start(&mut self) {
        L::group_start(self)
    }
    #[inline]
    fn group_log(&mut self, id: Id, value: Loggable) -> Result<(), LogError> {
        L::group_log(self, id, value)
    }
    #[inline]
    fn group_end(&mut self) {
        L::group_end(self)
    }
    #[inline]
    fn flush(&mut self) {
        L::flush(self)
    }
}

impl<L: StatsLogger + ?Sized> StatsLogger for Box<L> {
    #[inline]
    fn group_start(&mut self) {
        L::group_start(self)
    }
    #[inline]
    fn group_log(&mut self, id: Id, value: Loggable) -> Result<(), LogError> {
        L::group_log(self, id, value)
    }
    #[inline]
    fn group_end(&mut self) {
        L::group_end(self)
    }
    #[inline]
    fn flush(&mut self) {
        L::flush(self)
    }
}

/// Logger that places all ids inside a scope before forwarding them.
pub struct ScopedLogger<'a> {
    logger: &'a mut dyn StatsLogger,
    scope: &'static str,
}

impl<'a> ScopedLogger<'a> {
    #[inline]
    pub fn new(logger: &'a mut dyn StatsLogger, scope: &'static str) -> Self {
        Self { logger, scope }
    }
}

impl StatsLogger for ScopedLogger<'_> {
    #[inline]
    fn group_start(&mut self) {
        self.logger.group_start()
    }
    #[inline]
    fn group_log(&mut self, id: Id, value: Loggable) -> Result<(), LogError> {
        self.logger.group_log(id.with_prefix(self.scope), value)
    }
    #[inline]
    fn group_end(&mut self) {
        self.logger.group_end()
    }
    #[inline]
    fn flush(&mut self) {
        self.logger.flush()
    }
}
