pub mod cli;
pub mod config;
pub mod emitter;
pub mod logging;
pub mod server;
pub mod shutdown;
pub mod ssh;
pub mod utils;
