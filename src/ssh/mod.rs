pub mod capture;
pub mod handler;
pub mod keys;
pub mod supervisor;
pub mod transport;
