// ── Debounced parameter input ──
//
// Raw descriptors (one per keystroke) go in; a descriptor comes out only
// after the input has been quiet for the configured period.

use std::time::Duration;

use tokio::sync::watch;

use crate::query::QueryDescriptor;

/// Coalesces rapid descriptor edits.
///
/// Feed every raw edit to [`set`](Self::set) and hand the values from
/// [`settled`](Self::settled) to
/// [`QuerySubscription::update_params`](super::QuerySubscription::update_params).
pub struct ParamDebouncer {
    input: watch::Sender<QueryDescriptor>,
    output: watch::Receiver<QueryDescriptor>,
}

impl ParamDebouncer {
    /// Spawn the debounce task. Must be called from within a runtime.
    pub fn new(initial: QueryDescriptor, quiet: Duration) -> Self {
        let (input, input_rx) = watch::channel(initial.clone());
        let (output_tx, output) = watch::channel(initial);
        tokio::spawn(debounce_task(input_rx, output_tx, quiet));
        Self { input, output }
    }

    /// Record a raw edit. Restarts the quiet period.
    pub fn set(&self, descriptor: QueryDescriptor) {
        self.input.send_replace(descriptor);
    }

    /// Last published descriptor.
    pub fn current(&self) -> QueryDescriptor {
        self.output.borrow().clone()
    }

    /// Raw input is ahead of the published descriptor.
    pub fn is_settling(&self) -> bool {
        self.input.borrow().canonical() != self.output.borrow().canonical()
    }

    /// Wait for the next published descriptor.
    /// Returns `None` once the debounce task has stopped.
    pub async fn settled(&mut self) -> Option<QueryDescriptor> {
        self.output.changed().await.ok()?;
        Some(self.output.borrow_and_update().clone())
    }
}

async fn debounce_task(
    mut input: watch::Receiver<QueryDescriptor>,
    output: watch::Sender<QueryDescriptor>,
    quiet: Duration,
) {
    while input.changed().await.is_ok() {
        // Every further edit restarts the timer.
        loop {
            tokio::select! {
                changed = input.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                () = tokio::time::sleep(quiet) => break,
            }
        }

        let latest = input.borrow_and_update().clone();
        output.send_if_modified(|published| {
            if published.canonical() == latest.canonical() {
                return false;
            }
            *published = latest;
            true
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;

    const QUIET: Duration = Duration::from_millis(350);

    #[tokio::test(start_paused = true)]
    async fn publishes_only_the_last_edit() {
        let mut debouncer = ParamDebouncer::new(QueryDescriptor::new(), QUIET);
        let start = Instant::now();

        debouncer.set(QueryDescriptor::new().with_text("s"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.set(QueryDescriptor::new().with_text("ss"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.set(QueryDescriptor::new().with_text("ssh"));
        assert!(debouncer.is_settling());

        let published = debouncer.settled().await.unwrap();
        assert_eq!(published, QueryDescriptor::new().with_text("ssh"));
        assert!(start.elapsed() >= Duration::from_millis(200) + QUIET);
        assert!(!debouncer.is_settling());
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_only_edits_are_not_republished() {
        let mut debouncer = ParamDebouncer::new(QueryDescriptor::new().with_text("ssh"), QUIET);

        debouncer.set(QueryDescriptor::new().with_text("ssh "));
        assert!(!debouncer.is_settling());
        tokio::time::sleep(QUIET * 2).await;

        assert_eq!(debouncer.current(), QueryDescriptor::new().with_text("ssh"));
        debouncer.set(QueryDescriptor::new().with_text("dns"));
        assert_eq!(
            debouncer.settled().await.unwrap(),
            QueryDescriptor::new().with_text("dns")
        );
    }
}
