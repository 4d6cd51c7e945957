//! Observer Callbacks

use super::sink::ResultSink;

/// User code invoked once per collection cycle to report values.
///
/// Implemented for any `Fn(&mut ResultSink<T>) -> anyhow::Result<()>`.
/// Callbacks run synchronously on the collecting thread and are expected to
/// be short and non-blocking. Returning an error or panicking marks the
/// cycle as failed; values put before that point are still exported.
pub trait ObserverCallback<T>: Send + Sync {
    fn update(&self, result: &mut ResultSink<T>) -> anyhow::Result<()>;
}

impl<T, F> ObserverCallback<T> for F
where
    F: Fn(&mut ResultSink<T>) -> anyhow::Result<()> + Send + Sync,
{
    fn update(&self, result: &mut ResultSink<T>) -> anyhow::Result<()> {
        self(result)
    }
}
