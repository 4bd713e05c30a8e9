//! Unified compute and graphics on GPUs and the host CPU.
//!
//! `prism` re-exports the object model of [`prism_core`] and puts the backends behind one
//! entry point: [`create_context`] builds a `wgpu` context (Vulkan or Metal devices) or the
//! host backend, as a [`ContextConfig`] asks. Programs are loaded from universal binaries
//! that may carry one entry per backend, so the same program file serves both.
//!
//! ```no_run
//! use prism::{create_context, ContextConfig, QueueType};
//!
//! let config = ContextConfig::from_env()?;
//! prism::init_logging_from(&config);
//! let context = create_context(&config)?;
//! let device = config.device(&*context)?;
//! let queue = context.create_queue(&device, QueueType::All)?;
//! # let _ = queue;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod config;
mod logging;

pub use config::{
    create_context, BackendPreference, ConfigError, ContextConfig, BACKEND_ENV, DEVICE_ENV, LOG_ENV,
};
pub use logging::{init_logging, init_logging_from};

pub use prism_core::*;

pub use prism_host as host;
pub use prism_wgpu as wgpu;
