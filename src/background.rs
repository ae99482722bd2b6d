use std::{
    io,
    panic::resume_unwind,
    thread::{self, JoinHandle},
};

use crate::drop::lifecycle;

/// A named run-to-completion thread owned by the code that spawned it.
///
/// Created with [`spawn`]. Calling [`Background::join`] or dropping a [`Background`] joins the
/// thread; if the thread panicked, the panic is propagated to the owner (unless the owner is
/// already unwinding).
///
/// The producer and the deadline watcher of a run are [`Background`] threads, and so is every
/// worker of a [`WorkerPool`].
///
/// [`WorkerPool`]: crate::WorkerPool
pub(crate) struct Background<R> {
    handle: Option<JoinHandle<R>>,
}

impl<R> Drop for Background<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl<R> Background<R> {
    /// Blocks on the thread and returns its result, propagating its panic.
    pub(crate) fn join(self) -> R {
        match self.try_join() {
            Ok(r) => r,
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Blocks on the thread and returns its result, or the panic payload if it panicked.
    ///
    /// Lets an owner of several threads join all of them before deciding which panic to forward.
    pub(crate) fn try_join(mut self) -> thread::Result<R> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            // `join` and `try_join` consume `self`, and only they and `drop` take the handle.
            None => unreachable!("background thread joined twice"),
        }
    }
}

/// Spawns a [`Background`] thread called `name` that runs `f` to completion.
pub(crate) fn spawn<R, F>(name: String, f: F) -> io::Result<Background<R>>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let handle = thread::Builder::new().name(name.clone()).spawn(move || {
        let _guard = lifecycle(&name);
        f()
    })?;
    Ok(Background {
        handle: Some(handle),
    })
}
