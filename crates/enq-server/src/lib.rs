//! Shared plumbing for the `enq-api-server` and `enq-scheduler` binaries:
//! environment configuration and a common tracing setup. The protocol and
//! storage logic itself lives in `enq-core`/`enq-postgres`/`enq-redis`;
//! this crate only wires them to a process.

pub mod config;
pub mod telemetry;

pub use config::ServerConfig;
