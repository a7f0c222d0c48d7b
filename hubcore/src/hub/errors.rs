use super::Hub;
use crate::error::{Error, Result};

use std::io::Write;

impl Hub {
    /// Reports an error that surfaced outside of any task: from a loop
    /// callback, a signal handler or the poller.
    ///
    /// Errors other than cancellation and graceful exit are printed to the
    /// exception stream and logged. An error without `context`, or a
    /// system error, is then escalated through
    /// [`handle_system_error`](Hub::handle_system_error).
    ///
    /// # Errors
    ///
    /// Returns the escalated error if the hub is not running.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// hub.handle_error(Some("cleanup"), Error::other("disk full"))?;
    /// ```
    pub fn handle_error(&self, context: Option<&str>, error: Error) -> Result<()> {
        if !error.is_not_error() {
            self.print_exception(context, &error);
        }

        if context.is_none() || error.is_system_error() {
            return self.handle_system_error(error);
        }
        Ok(())
    }

    /// Hands a fatal error to the root context of the hub's thread.
    ///
    /// While the loop runs, the error is parked: the run stops once the
    /// current callback returns and the root's `block_on` or `join` fails
    /// with it. When the loop is not running there is no task to unwind
    /// and the error is returned right away.
    ///
    /// # Errors
    ///
    /// Returns `error` when the hub is not running.
    pub fn handle_system_error(&self, error: Error) -> Result<()> {
        if !self.is_running() {
            return Err(error);
        }

        let mut parked = self.inner.system_error.borrow_mut();
        if parked.is_none() {
            tracing::debug!(hub = self.inner.ident, %error, "system error escalated");
            *parked = Some(error);
        }
        Ok(())
    }

    /// Writes `error` to the exception stream and logs it.
    pub fn print_exception(&self, context: Option<&str>, error: &Error) {
        tracing::error!(
            hub = self.inner.ident,
            context = context.unwrap_or("<none>"),
            %error,
            "unhandled error"
        );

        let mut stream = self.inner.exception_stream.borrow_mut();
        if let Some(stream) = stream.as_mut() {
            let _ = match context {
                Some(context) => writeln!(stream, "{context} failed with {error}"),
                None => writeln!(stream, "hub {} failed with {error}", self.inner.ident),
            };
            let _ = stream.flush();
        }
    }

    /// Replaces the exception stream. `None` silences printed errors; they
    /// are still logged.
    pub fn set_exception_stream(&self, stream: Option<Box<dyn Write>>) -> Option<Box<dyn Write>> {
        self.inner.exception_stream.replace(stream)
    }
}
