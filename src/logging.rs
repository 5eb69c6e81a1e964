//! Inicialização do logging estruturado

use tracing_subscriber::EnvFilter;
use crate::config::{LogFormat, ObservabilityConfig};
use crate::error::{ConfigError, ETLError, Result};

/// Instala o subscriber global de `tracing`
///
/// `RUST_LOG`, se definido, tem precedência sobre `log_level`. Chamadas
/// repetidas falham com erro de configuração em vez de entrar em pânico.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| ConfigError::InvalidValue {
            param: "log_level".to_string(),
            value: format!("{} ({})", config.log_level, e),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(true);

    let installed = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    installed.map_err(|e| ETLError::Config(ConfigError::InvalidConfig(e.to_string())))
}
