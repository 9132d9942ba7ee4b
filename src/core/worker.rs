//! Serial task worker.
//!
//! One named thread drains a FIFO of boxed closures. Tasks posted from one
//! thread run in posting order; nothing runs concurrently with anything
//! else on the same worker.

use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel as channel;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::util::logging::WORKER;

/// A unit of work for the worker thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Task),
    Barrier(channel::Sender<()>),
    Shutdown,
}

pub struct SerialWorker {
    name: String,
    tx: channel::Sender<Message>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SerialWorker {
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let (tx, rx) = channel::unbounded::<Message>();
        let thread_name = name.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            debug!("worker {} started", thread_name);
            for message in rx.iter() {
                match message {
                    Message::Run(task) => task(),
                    Message::Barrier(done) => {
                        let _ = done.send(());
                    }
                    Message::Shutdown => break,
                }
            }
            debug!("worker {} stopped", thread_name);
        })?;
        Ok(Self {
            name,
            tx,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Message::Run(Box::new(task))).is_err() {
            error!("worker {} is gone, task dropped", self.name);
        }
    }

    /// Post `task` after `delay`. The delay does not hold up other tasks.
    pub fn post_delayed<F>(&self, task: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.tx.clone();
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-timer", self.name))
            .spawn(move || {
                thread::sleep(delay);
                if tx.send(Message::Run(Box::new(task))).is_err() {
                    trace!("worker {} stopped before delayed task", name);
                }
            });
        if let Err(err) = spawned {
            crate::dlog!(WORKER, "failed to spawn timer for {}: {}", self.name, err);
        }
    }

    /// Block until every task posted before this call has run.
    ///
    /// A no-op when called from the worker thread itself.
    pub fn flush(&self) {
        if self.is_worker_thread() {
            return;
        }
        let (done_tx, done_rx) = channel::bounded(1);
        if self.tx.send(Message::Barrier(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.recv();
    }
}

impl Drop for SerialWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if self.is_worker_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                crate::dlog!(WORKER, "worker {} panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_order() {
        let worker = SerialWorker::new("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let seen = seen.clone();
            worker.post(move || seen.lock().push(i));
        }
        worker.flush();
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_delayed_task_runs() {
        let worker = SerialWorker::new("test-delay").unwrap();
        let (tx, rx) = channel::bounded(1);
        worker.post_delayed(move || tx.send(7).unwrap(), Duration::from_millis(10));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
    }

    #[test]
    fn test_flush_from_worker_does_not_block() {
        let worker = Arc::new(SerialWorker::new("test-reentrant").unwrap());
        let (tx, rx) = channel::bounded(1);
        let inner = worker.clone();
        worker.post(move || {
            inner.flush();
            tx.send(inner.is_worker_thread()).unwrap();
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
    }
}
