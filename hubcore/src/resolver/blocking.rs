use super::{ResolveFuture, Resolver, resolve_blocking};
use crate::hub::Hub;

/// Resolves inline on the hub's thread. Every other task of the hub waits
/// until the lookup returns.
#[derive(Debug, Default)]
pub struct BlockingResolver;

impl BlockingResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Resolver for BlockingResolver {
    fn resolve(&self, _hub: &Hub, host: &str, port: u16) -> ResolveFuture {
        let result = resolve_blocking(host, port);
        Box::pin(async move { result })
    }
}
