/// The phases of one programming operation, in the order they run.
///
/// Filling and analyzing only read from the device. Every phase after them
/// modifies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, docsplay::Display)]
pub enum FlashPhase {
    /// reading the bytes to preserve
    Filling,
    /// analyzing the flash contents
    Analyzing,
    /// erasing
    Erasing,
    /// programming
    Programming,
    /// verifying
    Verifying,
}

/// Receives progress reports of a programming operation.
///
/// Reports are delivered synchronously from the thread doing the work. Within
/// one operation the reported values never decrease, and `1.0` is reported
/// exactly once, when the operation succeeded.
///
/// Every `FnMut(f32)` closure is an observer.
///
/// # Example
///
/// ```
/// use smartflash::flashing::ProgressObserver;
///
/// let mut print = |progress: f32| println!("{:3.0}%", progress * 100.0);
/// let observer: &mut dyn ProgressObserver = &mut print;
/// observer.report(0.5);
/// ```
pub trait ProgressObserver {
    /// Called with the completed fraction of the operation, between `0.0` and `1.0`.
    fn report(&mut self, progress: f32);

    /// Called when the operation enters a new phase.
    fn phase(&mut self, phase: FlashPhase) {
        let _ = phase;
    }
}

impl<F: FnMut(f32)> ProgressObserver for F {
    fn report(&mut self, progress: f32) {
        self(progress)
    }
}

/// What an observer has seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressState {
    /// The last reported value.
    pub prev: f32,
    /// Whether `1.0` was reported.
    pub done: bool,
}

/// Forwards progress to an optional observer, keeping the reports monotonic.
pub(super) struct ProgressReporter<'a> {
    observer: Option<&'a mut dyn ProgressObserver>,
    state: ProgressState,
    total: f64,
    completed: f64,
}

impl<'a> ProgressReporter<'a> {
    pub(super) fn new(observer: Option<&'a mut dyn ProgressObserver>) -> Self {
        Self {
            observer,
            state: ProgressState::default(),
            total: 0.0,
            completed: 0.0,
        }
    }

    /// Signalize that the work started.
    pub(super) fn started(&mut self) {
        self.emit(0.0);
    }

    /// Sets the total weight of the work that will be reported with [`Self::advance`].
    pub(super) fn set_total(&mut self, total: f64) {
        self.total = total;
        self.completed = 0.0;
    }

    /// Signalize that a piece of work with the given weight completed.
    pub(super) fn advance(&mut self, weight: f64) {
        self.completed += weight;
        if self.total > 0.0 {
            self.emit((self.completed / self.total) as f32);
        }
    }

    pub(super) fn phase(&mut self, phase: FlashPhase) {
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.phase(phase);
        }
    }

    /// Signalize that the whole operation completed successfully.
    pub(super) fn finished(&mut self) {
        if self.state.done {
            return;
        }
        self.state.done = true;
        self.state.prev = 1.0;
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.report(1.0);
        }
    }

    pub(super) fn state(&self) -> ProgressState {
        self.state
    }

    // Values at or beyond completion are held back until `finished`, so a late
    // failure never follows a reported 1.0.
    fn emit(&mut self, progress: f32) {
        if self.state.done || !(progress >= self.state.prev) || progress >= 1.0 {
            return;
        }
        if progress == self.state.prev && progress != 0.0 {
            return;
        }
        self.state.prev = progress;
        if let Some(observer) = self.observer.as_deref_mut() {
            observer.report(progress);
        }
    }
}
