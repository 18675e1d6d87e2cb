//! Background work for combiners and groups: the per-combiner decision task
//! and the janitor threads that drive eviction sweeps.

pub(crate) mod decision;
pub(crate) mod janitor;
