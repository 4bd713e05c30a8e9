use std::str::FromStr;
use std::sync::Arc;

use prism_core::{Context, Device, Error, ErrorKind, Result};
use prism_host::{HostContext, HostModuleRegistry};
use prism_types::ContextFlags;
use prism_wgpu::{Backends, WgpuContext};

pub const BACKEND_ENV: &str = "PRISM_BACKEND";
pub const DEVICE_ENV: &str = "PRISM_DEVICE";
pub const LOG_ENV: &str = "PRISM_LOG";

/// Which backend [`create_context`] builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackendPreference {
    /// A GPU through `wgpu` when an adapter exists, the host backend otherwise.
    #[default]
    Auto,
    Host,
    /// Any `wgpu` adapter of the platform's primary APIs.
    Wgpu,
    Vulkan,
    Metal,
}

impl FromStr for BackendPreference {
    type Err = ConfigError;

    fn from_str(raw: &str) -> std::result::Result<Self, ConfigError> {
        let raw = raw.trim();
        [
            ("auto", Self::Auto),
            ("host", Self::Host),
            ("wgpu", Self::Wgpu),
            ("vulkan", Self::Vulkan),
            ("metal", Self::Metal),
        ]
        .into_iter()
        .find(|(name, _)| raw.eq_ignore_ascii_case(name))
        .map(|(_, preference)| preference)
        .ok_or_else(|| ConfigError::InvalidEnv(BACKEND_ENV, raw.to_owned()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {1:?} for env var {0}")]
    InvalidEnv(&'static str, String),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::invalid_argument(err.to_string())
    }
}

fn truthy(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on")
}

fn falsy(v: &str) -> bool {
    v == "0" || v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") || v.eq_ignore_ascii_case("off")
}

/// Log level named by `PRISM_LOG`: a level name, a truthy switch (debug) or a falsy one (off).
fn parse_log_level(raw: &str) -> std::result::Result<Option<tracing::Level>, ConfigError> {
    let v = raw.trim();
    if v.is_empty() || falsy(v) {
        return Ok(None);
    }
    if truthy(v) {
        return Ok(Some(tracing::Level::DEBUG));
    }
    tracing::Level::from_str(v)
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv(LOG_ENV, v.to_owned()))
}

/// How to build a context: backend, device and logging.
#[derive(Clone, Debug, Default)]
pub struct ContextConfig {
    pub backend: BackendPreference,
    /// Index into [`Context::devices`]; the first device when unset.
    pub device_index: Option<usize>,
    /// Max level for [`crate::init_logging`]; logging stays off when unset.
    pub log_level: Option<tracing::Level>,
    pub flags: ContextFlags,
    /// Kernels the host backend resolves host binary entries against.
    pub host_registry: Arc<HostModuleRegistry>,
}

impl ContextConfig {
    /// Reads `PRISM_BACKEND`, `PRISM_DEVICE` and `PRISM_LOG`. None of them is required.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ContextConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> std::result::Result<Self, ConfigError> {
        let backend = match lookup(BACKEND_ENV) {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => BackendPreference::Auto,
        };
        let device_index = match lookup(DEVICE_ENV) {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidEnv(DEVICE_ENV, raw.clone()))?,
            ),
            _ => None,
        };
        let log_level = match lookup(LOG_ENV) {
            Some(raw) => parse_log_level(&raw)?,
            None => None,
        };
        Ok(Self {
            backend,
            device_index,
            log_level,
            ..Self::default()
        })
    }

    pub fn backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    pub fn flags(mut self, flags: ContextFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn host_registry(mut self, registry: Arc<HostModuleRegistry>) -> Self {
        self.host_registry = registry;
        self
    }

    /// The configured device of `context`.
    pub fn device(&self, context: &dyn Context) -> Result<Arc<Device>> {
        let index = self.device_index.unwrap_or(0);
        context.devices().get(index).cloned().ok_or_else(|| {
            Error::invalid_argument(format!(
                "device #{index} requested, the {:?} context has {}",
                context.backend(),
                context.devices().len()
            ))
        })
    }
}

fn wgpu_context(config: &ContextConfig, backends: Option<Backends>) -> Result<Arc<dyn Context>> {
    let mut builder = WgpuContext::builder().flags(config.flags);
    if let Some(backends) = backends {
        builder = builder.backends(backends);
    }
    Ok(Arc::new(builder.build()?))
}

fn host_context(config: &ContextConfig) -> Result<Arc<dyn Context>> {
    let context = HostContext::builder()
        .flags(config.flags)
        .registry(Arc::clone(&config.host_registry))
        .build()?;
    Ok(Arc::new(context))
}

/// Builds the context `config` asks for.
///
/// `Auto` falls back to the host backend when no `wgpu` adapter can be opened; every other
/// preference fails instead.
pub fn create_context(config: &ContextConfig) -> Result<Arc<dyn Context>> {
    let context = match config.backend {
        BackendPreference::Host => host_context(config)?,
        BackendPreference::Wgpu => wgpu_context(config, None)?,
        BackendPreference::Vulkan => wgpu_context(config, Some(Backends::VULKAN))?,
        BackendPreference::Metal => wgpu_context(config, Some(Backends::METAL))?,
        BackendPreference::Auto => match wgpu_context(config, None) {
            Ok(context) => context,
            Err(err) if err.kind() == ErrorKind::CapabilityMissing => {
                tracing::info!(%err, "no GPU adapter, using the host backend");
                host_context(config)?
            }
            Err(err) => return Err(err),
        },
    };
    if let Some(index) = config.device_index {
        if index >= context.devices().len() {
            return Err(Error::invalid_argument(format!(
                "{DEVICE_ENV}={index} but the {:?} context has {} devices",
                context.backend(),
                context.devices().len()
            )));
        }
    }
    tracing::debug!(backend = ?context.backend(), devices = context.devices().len(), "context created");
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_means_auto() {
        let config = ContextConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.backend, BackendPreference::Auto);
        assert_eq!(config.device_index, None);
        assert_eq!(config.log_level, None);
    }

    #[test]
    fn variables_are_parsed() {
        let config =
            ContextConfig::from_lookup(lookup(&[(BACKEND_ENV, "Host"), (DEVICE_ENV, " 2 "), (LOG_ENV, "trace")]))
                .unwrap();
        assert_eq!(config.backend, BackendPreference::Host);
        assert_eq!(config.device_index, Some(2));
        assert_eq!(config.log_level, Some(tracing::Level::TRACE));
    }

    #[test]
    fn log_switches() {
        assert_eq!(parse_log_level("yes").unwrap(), Some(tracing::Level::DEBUG));
        assert_eq!(parse_log_level("ON").unwrap(), Some(tracing::Level::DEBUG));
        assert_eq!(parse_log_level("off").unwrap(), None);
        assert_eq!(parse_log_level("warn").unwrap(), Some(tracing::Level::WARN));
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = ContextConfig::from_lookup(lookup(&[(BACKEND_ENV, "opencl")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidEnv(BACKEND_ENV, "opencl".into()));
        let err = ContextConfig::from_lookup(lookup(&[(DEVICE_ENV, "first")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidEnv(DEVICE_ENV, "first".into()));
        assert!(ContextConfig::from_lookup(lookup(&[(LOG_ENV, "loud")])).is_err());
    }

    #[test]
    fn host_preference_builds_a_host_context() {
        let config = ContextConfig::default().backend(BackendPreference::Host);
        let context = create_context(&config).unwrap();
        assert_eq!(context.backend(), prism_types::Backend::Host);
        let device = config.device(&*context).unwrap();
        assert_eq!(device.id, context.devices()[0].id);
    }

    #[test]
    fn out_of_range_device_is_rejected() {
        let mut config = ContextConfig::default().backend(BackendPreference::Host);
        config.device_index = Some(64);
        let Err(err) = create_context(&config) else {
            panic!("device #64 of a single-device context was accepted");
        };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
