//! Backend workers: one long-lived child session per model family,
//! started on demand and stopped when idle.

pub mod client;
pub mod error;
pub mod runtime;
pub mod session;
pub mod worker;

pub use client::{
    backend, config, run_drex, run_drex_on, run_idyom, run_idyom_on, run_ppm, run_ppm_on,
    shutdown_all,
};
pub use error::{BackendError, Result};
pub use runtime::serve;
pub use session::Session;
pub use worker::{BackendKind, Worker, WorkerConfig, WorkerState};
