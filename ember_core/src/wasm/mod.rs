// Browser-extension implementations
pub mod storage_impl;
pub mod timers;

pub use storage_impl::ExtensionStorage;
pub use timers::{BrowserScheduler, BrowserSleeper};
