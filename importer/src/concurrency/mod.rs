//! Coordination between the scheduler and the process hosting it.

pub mod shutdown;
