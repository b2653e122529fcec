// jobs.rs — pollable units of work on the rayon thread pool
//
// The baker drives everything from one coordinating thread and never
// blocks on in-flight work; it polls. A JobHandle carries the result
// of a spawned closure back over a bounded(1) crossbeam channel, so
// poll() is a non-blocking channel probe and join() is the one brief
// synchronous hand-off when the result is consumed.

use crossbeam::channel::{bounded, Receiver, TryRecvError};

pub struct JobHandle<T> {
    rx: Receiver<T>,
    ready: Option<T>,
}

/// Schedules `f` on the global rayon pool.
pub fn spawn<T, F>(f: F) -> JobHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = bounded(1);
    rayon::spawn(move || {
        let _ = tx.send(f());
    });
    JobHandle { rx, ready: None }
}

impl<T> JobHandle<T> {
    /// True once the job has delivered (or can never deliver) its
    /// result. Never blocks.
    pub fn poll(&mut self) -> bool {
        if self.ready.is_some() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(value) => {
                self.ready = Some(value);
                true
            }
            Err(TryRecvError::Empty) => false,
            // sender dropped without sending; join() reports it
            Err(TryRecvError::Disconnected) => true,
        }
    }

    /// Consumes the result, blocking if it has not arrived yet.
    pub fn join(mut self) -> Result<T, String> {
        if let Some(value) = self.ready.take() {
            return Ok(value);
        }
        self.rx
            .recv()
            .map_err(|_| "job worker died before delivering a result".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_spawn_and_join() {
        let job = spawn(|| 21 * 2);
        assert_eq!(job.join().unwrap(), 42);
    }

    #[test]
    fn test_poll_eventually_ready() {
        let mut job = spawn(|| {
            std::thread::sleep(Duration::from_millis(20));
            "done"
        });
        let mut spins = 0u32;
        while !job.poll() {
            std::thread::yield_now();
            spins += 1;
            assert!(spins < 10_000_000, "job never completed");
        }
        assert_eq!(job.join().unwrap(), "done");
    }

    #[test]
    fn test_poll_is_sticky() {
        let mut job = spawn(|| 7);
        while !job.poll() {
            std::thread::yield_now();
        }
        assert!(job.poll());
        assert!(job.poll());
        assert_eq!(job.join().unwrap(), 7);
    }
}
