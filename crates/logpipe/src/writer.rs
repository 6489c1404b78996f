use crate::error::WriteError;
use std::future::Future;
use std::pin::Pin;

/// Destination strategy: encodes a batch and performs the I/O.
///
/// Uses native async fn in traits instead of `#[async_trait]`.
///
/// The export manager calls `write` once per popped batch, in arrival order,
/// and logs any `Err`. Entries are released after the call returns whatever
/// the outcome, so a writer that wants retries must perform them itself
/// (see [`RetryingWriter`](crate::writers::RetryingWriter)).
///
/// # Note on Object Safety
///
/// This trait uses `impl Future` return types which are not object-safe.
/// For dynamic dispatch, use `Arc<dyn WriterBoxed<T>>`.
pub trait Writer<T>: Send + Sync {
    /// Delivers one batch.
    fn write(&self, batch: &[T]) -> impl Future<Output = Result<(), WriteError>> + Send;

    /// Returns the writer name for diagnostics.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Writer`] for dynamic dispatch.
pub trait WriterBoxed<T>: Send + Sync {
    /// Delivers one batch (boxed future for object safety).
    fn write_boxed<'a>(
        &'a self,
        batch: &'a [T],
    ) -> Pin<Box<dyn Future<Output = Result<(), WriteError>> + Send + 'a>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Writer can be used as WriterBoxed
impl<T, W: Writer<T>> WriterBoxed<T> for W {
    fn write_boxed<'a>(
        &'a self,
        batch: &'a [T],
    ) -> Pin<Box<dyn Future<Output = Result<(), WriteError>> + Send + 'a>> {
        Box::pin(self.write(batch))
    }

    fn name(&self) -> &str {
        Writer::name(self)
    }
}

/// Writer that discards every batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWriter;

impl<T: Sync> Writer<T> for NullWriter {
    async fn write(&self, _batch: &[T]) -> Result<(), WriteError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
