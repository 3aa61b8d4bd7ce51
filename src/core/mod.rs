pub mod backoff;
pub mod engine;
pub mod entry;
pub mod handler;
pub mod key;
