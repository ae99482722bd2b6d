//! Utilities related to destructors and drop.

/// Drop guard returned by [`defer`].
#[must_use = "`Defer` should be assigned to a variable, or it will be dropped immediately"]
pub struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

/// Returns a value that runs `cb` when dropped.
pub fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer(Some(cb))
}

/// Logs that the thread `name` is starting, and returns a guard that logs its exit.
///
/// The exit is logged on unwinding, too, so a trace of a panicking thread still shows where it
/// stopped.
pub fn lifecycle(name: &str) -> Defer<impl FnOnce()> {
    log::trace!("'{name}' starting");
    let name = name.to_owned();
    defer(move || log::trace!("'{name}' exiting"))
}
