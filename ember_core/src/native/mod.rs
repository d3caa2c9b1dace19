// Native implementations

pub mod storage_impl;
pub mod timers;

pub use storage_impl::FileStorage;
pub use timers::{TokioScheduler, TokioSleeper};
