use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::log::log_level::LogLevel;
use crate::log::log_sink::LogSink;
use crate::sink_warn;

type Task = Box<dyn FnOnce() + Send>;

/// Single-consumer FIFO worker for fire-and-forget callbacks (`on_play`,
/// `on_stop`, `on_publish`, `on_unpublish`, HTTP-FLV stream teardown).
/// Tasks submitted by the same caller execute in submission order; task
/// errors are logged, never propagated to the submitter.
pub struct PostHookWorker {
    tx: mpsc::Sender<Task>,
    sink: Box<dyn LogSink>,
    handle: Option<JoinHandle<()>>,
}

impl PostHookWorker {
    pub fn start(sink: impl LogSink + 'static) -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = thread::Builder::new()
            .name("post-hook-worker".into())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            })
            .ok();
        Self {
            tx,
            sink: Box::new(sink),
            handle,
        }
    }

    /// Enqueues a fire-and-forget task. Never blocks (unbounded queue).
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            sink_warn!(self.sink, "post-hook worker channel closed, task dropped");
        }
    }

    /// Drains the queue and joins the worker thread. Consumes `self`.
    pub fn stop(mut self) {
        let (empty_tx, _) = mpsc::channel();
        drop(std::mem::replace(&mut self.tx, empty_tx));
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::log::NoopLogSink;
    use std::sync::{Arc, Mutex};

    #[test]
    fn tasks_execute_in_submission_order() {
        let worker = PostHookWorker::start(NoopLogSink);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 1..=3 {
            let order = order.clone();
            worker.submit(move || order.lock().unwrap().push(i));
        }
        worker.stop();

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn errors_in_one_task_do_not_block_later_tasks() {
        let worker = PostHookWorker::start(NoopLogSink);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order1 = order.clone();
        worker.submit(move || {
            order1.lock().unwrap().push(1);
        });
        let order2 = order.clone();
        worker.submit(move || {
            order2.lock().unwrap().push(2);
        });
        worker.stop();

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }
}
