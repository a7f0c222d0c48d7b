use super::{ResolveFuture, Resolver, resolve_blocking};
use crate::error::Error;
use crate::hub::Hub;

use std::cell::Cell;

/// Resolves on the hub's thread pool.
#[derive(Debug, Default)]
pub struct ThreadResolver {
    closed: Cell<bool>,
}

impl ThreadResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Resolver for ThreadResolver {
    fn resolve(&self, hub: &Hub, host: &str, port: u16) -> ResolveFuture {
        if self.closed.get() {
            return Box::pin(async { Err(Error::Resolve("resolver closed".into())) });
        }

        let host = host.to_owned();
        let job = hub.apply(move || resolve_blocking(&host, port));

        Box::pin(async move { job?.await? })
    }

    fn close(&self) {
        self.closed.set(true);
    }
}
