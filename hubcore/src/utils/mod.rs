//! Utilities for memory-efficient data structures.
//!
//! This module provides low-level utilities used internally by the runtime.
//! In particular, it exposes a [`Slab`] allocator with generation-checked
//! keys, used for every arena of the hub.

pub(crate) mod slab;

pub(crate) use slab::Slab;
