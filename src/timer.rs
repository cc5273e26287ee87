use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures_util::future::LocalBoxFuture;
use tokio::task::JoinHandle;

/// One-shot, cancellable delay owned by a single component.
///
/// At most one task is pending: scheduling replaces (and cancels) the
/// previous one. Once the delay elapses the task is handed off to its own
/// local task, so cancelling afterwards never interrupts it. Dropping the
/// timer cancels whatever is still pending.
///
/// Must be used from inside a `tokio::task::LocalSet`.
#[derive(Default)]
pub struct DelayTimer {
    handle: RefCell<Option<JoinHandle<()>>>,
    running: Rc<Cell<usize>>,
}

/// Counts a fired task as running until it completes or is dropped.
struct RunningGuard(Rc<Cell<usize>>);

impl RunningGuard {
    fn enter(count: &Rc<Cell<usize>>) -> Self {
        count.set(count.get() + 1);
        Self(count.clone())
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl DelayTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, replacing any pending task.
    pub fn schedule(&self, delay: Duration, task: LocalBoxFuture<'static, ()>) {
        self.cancel();
        let running = self.running.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            // counted before this task finishes so there is no idle gap
            let guard = RunningGuard::enter(&running);
            tokio::task::spawn_local(async move {
                let _guard = guard;
                task.await;
            });
        });
        *self.handle.borrow_mut() = Some(handle);
    }

    /// Cancel the pending task. Returns whether one was still waiting.
    pub fn cancel(&self) -> bool {
        match self.handle.borrow_mut().take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// A task is waiting for its delay to elapse.
    pub fn is_pending(&self) -> bool {
        self.handle
            .borrow()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// A task is waiting, or has fired and not yet completed.
    pub fn is_active(&self) -> bool {
        self.is_pending() || self.running.get() > 0
    }
}

impl Drop for DelayTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::cell::Cell;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_the_delay() {
        LocalSet::new()
            .run_until(async {
                let timer = DelayTimer::new();
                let fired = Rc::new(Cell::new(0));
                let f = fired.clone();
                timer.schedule(
                    Duration::from_millis(4000),
                    async move { f.set(f.get() + 1) }.boxed_local(),
                );
                assert!(timer.is_pending());

                tokio::time::sleep(Duration::from_millis(3999)).await;
                assert_eq!(fired.get(), 0);

                tokio::time::sleep(Duration::from_millis(2)).await;
                tokio::task::yield_now().await;
                assert_eq!(fired.get(), 1);
                assert!(!timer.is_pending());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn fired_task_stays_active_until_it_completes() {
        LocalSet::new()
            .run_until(async {
                let timer = DelayTimer::new();
                let (tx, rx) = async_channel::bounded::<()>(1);
                timer.schedule(
                    Duration::from_secs(1),
                    async move {
                        let _ = rx.recv().await;
                    }
                    .boxed_local(),
                );

                tokio::time::sleep(Duration::from_millis(1010)).await;
                assert!(!timer.is_pending());
                assert!(timer.is_active());
                // cancelling a fired task leaves it running
                assert!(!timer.cancel());
                assert!(timer.is_active());

                tx.send(()).await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
                assert!(!timer.is_active());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_pending_task() {
        LocalSet::new()
            .run_until(async {
                let timer = DelayTimer::new();
                let fired = Rc::new(Cell::new(0));
                for _ in 0..3 {
                    let f = fired.clone();
                    timer.schedule(
                        Duration::from_secs(1),
                        async move { f.set(f.get() + 1) }.boxed_local(),
                    );
                }
                tokio::time::sleep(Duration::from_secs(5)).await;
                assert_eq!(fired.get(), 1);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_prevent_firing() {
        LocalSet::new()
            .run_until(async {
                let fired = Rc::new(Cell::new(false));

                let timer = DelayTimer::new();
                let f = fired.clone();
                timer.schedule(Duration::from_secs(1), async move { f.set(true) }.boxed_local());
                assert!(timer.cancel());
                assert!(!timer.cancel());

                let dropped = DelayTimer::new();
                let f = fired.clone();
                dropped.schedule(Duration::from_secs(1), async move { f.set(true) }.boxed_local());
                drop(dropped);

                tokio::time::sleep(Duration::from_secs(5)).await;
                assert!(!fired.get());
            })
            .await;
    }
}
