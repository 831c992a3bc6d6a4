use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use displaydoc::Display;
use thiserror::Error;

/// Receives overall run progress in percent.
pub type ProgressCallback<'a> = dyn Fn(u8) + Send + Sync + 'a;

/// run was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Display)]
pub struct Cancelled;

/// Token for cooperative cancellation, shared between a run and its owner.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Forwards progress to a callback only when the value increases.
pub struct Progress<'a> {
    inner: &'a ProgressCallback<'a>,
    last: Cell<Option<u8>>,
}

impl<'a> Progress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last: Cell::new(None),
        }
    }

    pub fn report(&self, value: u8) {
        let value = value.min(100);
        if self.last.get().is_some_and(|last| value <= last) {
            return;
        }
        self.last.set(Some(value));
        (self.inner)(value);
    }

    pub fn last(&self) -> Option<u8> {
        self.last.get()
    }
}

/// Map `done / total` into the percent range `[low, high]`.
pub(crate) fn scale(low: u8, high: u8, done: u64, total: u64) -> u8 {
    if total == 0 {
        return high;
    }
    let span = u64::from(high - low);
    let step = (done.min(total) * span / total) as u8;
    low + step
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn token_cancel() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(Cancelled));
    }

    #[test]
    fn progress_only_increases() {
        let seen = Mutex::new(Vec::new());
        let callback = |value: u8| seen.lock().unwrap().push(value);
        let progress = Progress::new(&callback);
        for value in [2, 2, 10, 5, 70, 70, 98, 120] {
            progress.report(value);
        }
        assert_eq!(*seen.lock().unwrap(), vec![2, 10, 70, 98, 100]);
        assert_eq!(progress.last(), Some(100));
    }

    #[test]
    fn scale_ranges() {
        assert_eq!(scale(2, 70, 0, 100), 2);
        assert_eq!(scale(2, 70, 50, 100), 36);
        assert_eq!(scale(2, 70, 150, 100), 70);
        assert_eq!(scale(70, 98, 1, 1), 98);
        assert_eq!(scale(70, 98, 0, 0), 98);
    }
}
