//! Command-line summary logger
use super::{Id, LogError, Loggable, StatsLogger};
use super::summary::{Num, ScalarSummary};
use coarsetime::{Duration as CDuration, Instant as CInstant};
use log::warn;
use std::borrow::Cow;
use std::collections::{btree_map::Entry, BTreeMap};
use std::fmt;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use yansi::Paint;

/// Chunk summaries at fixed time intervals.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ByTime {
    // Coarse time is used because the time is checked at the start of every log group.
    // Clock accuracy (~1ms) is irrelevant compared to the chunk duration (~1s).
    pub chunk_duration: CDuration,
    coarse_chunk_start: CInstant,
}

impl ByTime {
    pub fn new(chunk_duration: Duration) -> Self {
        Self {
            chunk_duration: CDuration::new(chunk_duration.as_secs(), chunk_duration.subsec_nanos()),
            coarse_chunk_start: CInstant::now(),
        }
    }

    /// Whether the current chunk has run for its full duration.
    fn elapsed(&self) -> bool {
        self.coarse_chunk_start.elapsed() > self.chunk_duration
    }

    fn reset(&mut self) {
        self.coarse_chunk_start = CInstant::now();
    }
}

impl Default for ByTime {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Logger that displays chunked summaries of the logged values.
///
/// Values are aggregated by id. Whenever a group starts after the chunk duration has
/// elapsed, the summaries of the chunk are written out and reset.
#[derive(Debug)]
pub struct DisplayLogger<W: Write = io::Stdout> {
    chunker: ByTime,
    writer: W,
    // Binary tree so that ids are displayed in sorted order
    summaries: BTreeMap<Id, Node>,
    chunk_start: Instant,
}

impl DisplayLogger<io::Stdout> {
    /// Display summaries on standard output.
    pub fn new(chunk_duration: Duration) -> Self {
        Self::with_writer(chunk_duration, io::stdout())
    }
}

impl Default for DisplayLogger<io::Stdout> {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl<W: Write> DisplayLogger<W> {
    /// Display summaries on the given writer.
    pub fn with_writer(chunk_duration: Duration, writer: W) -> Self {
        Self {
            chunker: ByTime::new(chunk_duration),
            writer,
            summaries: BTreeMap::new(),
            chunk_start: Instant::now(),
        }
    }

    /// The underlying writer.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    fn write_summaries(&mut self) -> io::Result<()> {
        let elapsed = self.chunk_start.elapsed();
        writeln!(self.writer)?;
        for (id, node) in self.summaries.iter().filter(|(_, node)| node.dirty) {
            writeln!(
                self.writer,
                "{:<32} {}",
                Paint::fixed(35, id),
                DisplaySummary {
                    summary: &node.summary,
                    elapsed: &elapsed
                }
            )?;
        }
        self.writer.flush()
    }
}

impl<W: Write> StatsLogger for DisplayLogger<W> {
    fn group_start(&mut self) {
        if self.chunker.elapsed() {
            self.flush();
        }
    }

    fn group_log(&mut self, id: Id, value: Loggable) -> Result<(), LogError> {
        match self.summaries.entry(id) {
            Entry::Vacant(e) => {
                e.insert(Node::new(value.into()));
            }
            Entry::Occupied(e) => e.into_mut().push(value)?,
        };
        Ok(())
    }

    fn flush(&mut self) {
        if self.summaries.values().any(|node| node.dirty) {
            if let Err(err) = self.write_summaries() {
                warn!("failed to write log summaries: {}", err);
            }
        }
        for node in self.summaries.values_mut() {
            node.reset();
        }
        self.chunk_start = Instant::now();
        self.chunker.reset();
    }
}

/// Flush when dropped
impl<W: Write> Drop for DisplayLogger<W> {
    fn drop(&mut self) {
        self.flush();
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    summary: Summary,
    /// Whether the summary has been updated in this chunk
    dirty: bool,
}

impl Node {
    const fn new(summary: Summary) -> Self {
        Self {
            summary,
            dirty: true,
        }
    }

    fn push(&mut self, value: Loggable) -> Result<(), LogError> {
        self.summary.push(value)?;
        self.dirty = true;
        Ok(())
    }

    fn reset(&mut self) {
        self.dirty = false;
        self.summary.reset()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Summary {
    Nothing,
    Scalar(ScalarSummary),
    Counter { increment: u64, initial_value: u64 },
    Message(BTreeMap<Cow<'static, str>, usize>),
}

impl From<Loggable> for Summary {
    fn from(value: Loggable) -> Self {
        match value {
            Loggable::Nothing => Self::Nothing,
            Loggable::Scalar(v) => {
                let mut stats = ScalarSummary::default();
                stats.push(v);
                Self::Scalar(stats)
            }
            Loggable::CounterIncrement(i) => Self::Counter {
                increment: i,
                initial_value: 0,
            },
            Loggable::Message(s) => {
                let mut counts = BTreeMap::new();
                counts.insert(s, 1);
                Self::Message(counts)
            }
        }
    }
}

impl Summary {
    /// Add a value to the summary.
    ///
    /// The value is rejected if it was created from a different loggable variant.
    fn push(&mut self, value: Loggable) -> Result<(), LogError> {
        match (self, value) {
            (Self::Nothing, Loggable::Nothing) => {}
            (Self::Scalar(stats), Loggable::Scalar(v)) => stats.push(v),
            (Self::Counter { increment, .. }, Loggable::CounterIncrement(i)) => *increment += i,
            (Self::Message(counts), Loggable::Message(s)) => *counts.entry(s).or_insert(0) += 1,
            (summary, value) => {
                return Err(LogError::IncompatibleValue {
                    prev: summary.loggable_variant_name(),
                    now: value.variant_name(),
                })
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        match self {
            Self::Nothing => {}
            Self::Scalar(stats) => *stats = ScalarSummary::default(),
            Self::Counter {
                increment,
                initial_value,
            } => {
                *initial_value += *increment;
                *increment = 0;
            }
            Self::Message(counts) => counts.clear(),
        }
    }

    const fn loggable_variant_name(&self) -> &'static str {
        match self {
            Self::Nothing => "Nothing",
            Self::Scalar(_) => "Scalar",
            Self::Counter { .. } => "CounterIncrement",
            Self::Message(_) => "Message",
        }
    }
}

struct DisplaySummary<'a> {
    summary: &'a Summary,
    elapsed: &'a Duration,
}

impl fmt::Display for DisplaySummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.summary {
            Summary::Nothing => Ok(()),
            Summary::Scalar(stats) => {
                write!(f, "{:.3}", Num(stats.mean()))?;
                if let Some((min, max)) = stats.range().filter(|_| stats.count() > 1) {
                    let spread = format!(
                        "(σ {:.3}, range {:.3} .. {:.3})",
                        Num(stats.stddev()),
                        Num(min),
                        Num(max)
                    );
                    write!(f, " {}", Paint::fixed(8, spread))?;
                }
                Ok(())
            }
            Summary::Counter {
                increment,
                initial_value,
            } => {
                write!(
                    f,
                    "{}  (+{})",
                    initial_value + increment,
                    Paint::fixed(253, increment)
                )?;
                if *increment > 0 {
                    let rate = *increment as f64 / self.elapsed.as_secs_f64();
                    write!(f, "  {}", Paint::fixed(111, format!("{:.2}/s", rate)))?;
                }
                Ok(())
            }
            Summary::Message(counts) => {
                let mut first = true;
                for (message, count) in counts {
                    if !first {
                        f.write_str("; ")?;
                    }
                    first = false;
                    write!(f, "{} (×{})", message, count)?;
                }
                Ok(())
            }
        }
    }
}
