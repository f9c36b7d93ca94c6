use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

/// Percent-complete reporting for one operation. Values are clamped to
/// `0..=100` and only increases are forwarded, so a subscriber sees a
/// non-decreasing stream. Reporters derived with [`scaled`](Self::scaled)
/// share that guarantee with their parent.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<u8>>,
    last: Arc<AtomicU8>,
    offset: u8,
    weight: u8,
}

impl ProgressReporter {
    /// A reporter together with the receiving end of its stream.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u8>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
                last: Arc::new(AtomicU8::new(0)),
                offset: 0,
                weight: 100,
            },
            receiver,
        )
    }

    /// A reporter nobody listens to.
    #[must_use]
    pub fn silent() -> Self {
        Self {
            sender: None,
            last: Arc::new(AtomicU8::new(0)),
            offset: 0,
            weight: 100,
        }
    }

    /// Map this reporter's `0..=100` onto `offset..offset + weight` of the
    /// parent's range.
    #[must_use]
    pub fn scaled(&self, offset: u8, weight: u8) -> Self {
        let offset = offset.min(100);
        let end = offset.saturating_add(weight).min(100);
        let start = self.project(offset);
        Self {
            sender: self.sender.clone(),
            last: Arc::clone(&self.last),
            offset: start,
            weight: self.project(end) - start,
        }
    }

    pub fn report(&self, percent: u8) {
        let value = self.project(percent.min(100));
        let previous = self.last.fetch_max(value, Ordering::AcqRel);
        if value > previous
            && let Some(sender) = &self.sender
        {
            let _ = sender.send(value);
        }
    }

    /// The highest value reported so far across this reporter's family.
    #[must_use]
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::Acquire)
    }

    fn project(&self, percent: u8) -> u8 {
        self.offset.saturating_add(scale(percent, self.weight)).min(100)
    }
}

fn scale(value: u8, weight: u8) -> u8 {
    u8::try_from(u16::from(value) * u16::from(weight) / 100).unwrap_or(100)
}
