//! Host name resolution.
//!
//! A hub owns one [`Resolver`], created on first use according to
//! [`Config::resolver`](crate::Config::resolver) unless one was provided
//! explicitly. [`ThreadResolver`] resolves on the hub's thread pool and
//! keeps the loop responsive; [`BlockingResolver`] resolves inline.

mod blocking;
mod thread;

pub use blocking::BlockingResolver;
pub use thread::ThreadResolver;

use crate::config::ResolverKind;
use crate::error::{Error, Result};
use crate::hub::{Hub, get_hub};

use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::rc::Rc;

/// Boxed future returned by [`Resolver::resolve`].
pub type ResolveFuture = Pin<Box<dyn Future<Output = Result<Vec<SocketAddr>>>>>;

/// Turns a host name and port into socket addresses.
pub trait Resolver {
    fn resolve(&self, hub: &Hub, host: &str, port: u16) -> ResolveFuture;

    /// Releases the resolver's resources. Called when the hub is destroyed
    /// or the resolver is cleared.
    fn close(&self) {}

    /// Called in the child after a fork.
    fn on_fork(&self) {}
}

/// Resolves `host:port` with the system resolver, blocking the calling
/// thread.
pub(crate) fn resolve_blocking(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|err| Error::Resolve(format!("{host}:{port}: {err}")))?
        .collect();

    if addrs.is_empty() {
        return Err(Error::Resolve(format!("{host}:{port}: no address found")));
    }
    Ok(addrs)
}

impl Hub {
    /// The hub's resolver, created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HubDestroyed`] if the hub was destroyed.
    pub fn resolver(&self) -> Result<Rc<dyn Resolver>> {
        if self.is_destroyed() {
            return Err(Error::HubDestroyed);
        }

        if let Some(resolver) = self.inner.resolver.borrow().clone() {
            return Ok(resolver);
        }

        let kind = self.inner.config.resolver;
        let resolver: Rc<dyn Resolver> = match kind {
            ResolverKind::Thread => Rc::new(ThreadResolver::new()),
            ResolverKind::Blocking => Rc::new(BlockingResolver::new()),
        };
        tracing::debug!(hub = self.inner.ident, ?kind, "resolver created");

        *self.inner.resolver.borrow_mut() = Some(resolver.clone());
        Ok(resolver)
    }

    /// Replaces the resolver, returning the previous one untouched.
    pub fn set_resolver(&self, resolver: Rc<dyn Resolver>) -> Option<Rc<dyn Resolver>> {
        self.inner.resolver.replace(Some(resolver))
    }

    /// Closes and forgets the resolver; the next use creates a new one.
    pub fn clear_resolver(&self) {
        let resolver = self.inner.resolver.borrow_mut().take();
        if let Some(resolver) = resolver {
            resolver.close();
        }
    }
}

/// Resolves `host:port` with the current hub's resolver.
///
/// # Examples
///
/// ```rust,ignore
/// let addrs = hubcore::resolver::resolve("localhost", 80).await?;
/// ```
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let hub = get_hub()?;
    let resolver = hub.resolver()?;
    resolver.resolve(&hub, host, port).await
}
