//! Presentation sinks
//!
//! A sink receives the script's output lines in order, then exactly one
//! outcome. Sinks run on the job's worker thread, so they must be `Send`
//! and should hand work off rather than block.

use crate::supervisor::RunOutcome;
use std::sync::mpsc::{self, Receiver, Sender};

/// Receiver of script output and the final outcome
pub trait OutputSink: Send {
    /// One line of script output, without its line terminator
    fn on_line(&mut self, line: &str);

    /// Final outcome, delivered once after every line
    fn on_outcome(&mut self, outcome: &RunOutcome);
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn on_line(&mut self, line: &str) {
        (**self).on_line(line)
    }

    fn on_outcome(&mut self, outcome: &RunOutcome) {
        (**self).on_outcome(outcome)
    }
}

/// Event forwarded by a [`ChannelSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// A line of script output
    Line(String),
    /// The job's outcome; always the last event of a job
    Outcome(RunOutcome),
}

/// Sink that forwards everything over a channel
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on
    pub fn channel() -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    /// Wrap an existing sender
    pub fn new(tx: Sender<SinkEvent>) -> Self {
        Self { tx }
    }
}

impl OutputSink for ChannelSink {
    fn on_line(&mut self, line: &str) {
        let _ = self.tx.send(SinkEvent::Line(line.to_string()));
    }

    fn on_outcome(&mut self, outcome: &RunOutcome) {
        let _ = self.tx.send(SinkEvent::Outcome(outcome.clone()));
    }
}

/// Sink that writes script output to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn on_line(&mut self, line: &str) {
        log::info!(target: "imxflash::script", "{}", line);
    }

    fn on_outcome(&mut self, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Success => log::info!("{}", outcome),
            _ => log::warn!("{}", outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_order() {
        let (mut sink, rx) = ChannelSink::channel();
        sink.on_line("one");
        sink.on_line("two");
        sink.on_outcome(&RunOutcome::Success);

        let events: Vec<SinkEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SinkEvent::Line("one".to_string()),
                SinkEvent::Line("two".to_string()),
                SinkEvent::Outcome(RunOutcome::Success),
            ]
        );
    }

    #[test]
    fn test_channel_sink_without_receiver() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        let mut boxed: Box<dyn OutputSink> = Box::new(sink);
        boxed.on_line("nobody listening");
        boxed.on_outcome(&RunOutcome::Cancelled);
    }
}
