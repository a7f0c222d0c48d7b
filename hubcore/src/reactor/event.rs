/// An I/O event reported by the poller.
///
/// An `Event` carries readiness information for a registered file
/// descriptor. It is produced by the poller and consumed by the reactor to
/// wake the tasks waiting on that descriptor.
pub(crate) struct Event {
    /// Token the descriptor was registered with (a packed slab key).
    pub(crate) token: u64,

    /// The descriptor is readable, hung up, or in error.
    pub(crate) readable: bool,

    /// The descriptor is writable, or in error.
    pub(crate) writable: bool,
}
