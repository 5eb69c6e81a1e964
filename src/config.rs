use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{ConfigError, ETLError};
use crate::record::pool::MIN_CLASS_SIZE;
use crate::schema::{SchemaBuilder, DEFAULT_STRING_WIDTH};

/// Configuração principal do ETL
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ETLConfig {
    pub pipeline: PipelineConfig,
    pub pool: PoolConfig,
    pub schema: SchemaConfig,
    pub observability: ObservabilityConfig,
}

/// Configuração do pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacidade das filas entre estágios; 0 seleciona filas sem limite
    pub queue_capacity: usize,
    /// A cada quantas linhas cada estágio publica progresso
    pub progress_interval: u64,
    /// Registros por chamada de `Loader::load_batch`
    pub load_batch_size: usize,
    /// Workers de carga; acima de 1 a ordem só é garantida até a fronteira da carga
    pub load_workers: usize,
    /// Tempo limite da execução em segundos; 0 desativa
    pub timeout_seconds: u64,
}

/// Configuração do pool de buffers
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maior buffer que o pool aluga, em bytes
    pub max_buffer_size: usize,
    /// Buffers livres mantidos por classe de tamanho
    pub buffers_per_class: usize,
    /// Buffers pré-alocados para o schema de extração no início da execução
    pub prewarm_buffers: usize,
}

/// Padrões para construção de schemas
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub default_string_width: usize,
}

/// Configuração de observabilidade
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    /// Anexa um `LoggingEventEmitter` aos observadores do pipeline
    pub enable_event_logging: bool,
}

/// Formato de log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            progress_interval: 1000,
            load_batch_size: 1000,
            load_workers: 1,
            timeout_seconds: 0,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 1024 * 1024,
            buffers_per_class: 1024,
            prewarm_buffers: 0,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            default_string_width: DEFAULT_STRING_WIDTH,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            enable_event_logging: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}

impl ETLConfig {
    /// Cria um novo builder para configuração
    pub fn builder() -> ETLConfigBuilder {
        ETLConfigBuilder::default()
    }

    /// Carrega configuração do ambiente (variáveis `ETL_*`)
    pub fn from_env() -> Result<Self, ETLError> {
        let mut builder = Self::builder();

        if let Some(capacity) = env_parse::<usize>("ETL_QUEUE_CAPACITY") {
            builder = builder.queue_capacity(capacity);
        }

        if let Some(interval) = env_parse::<u64>("ETL_PROGRESS_INTERVAL") {
            builder = builder.progress_interval(interval);
        }

        if let Some(size) = env_parse::<usize>("ETL_LOAD_BATCH_SIZE") {
            builder = builder.load_batch_size(size);
        }

        if let Some(workers) = env_parse::<usize>("ETL_LOAD_WORKERS") {
            builder = builder.load_workers(workers);
        }

        if let Some(timeout) = env_parse::<u64>("ETL_TIMEOUT_SECONDS") {
            builder = builder.timeout_seconds(timeout);
        }

        if let Some(size) = env_parse::<usize>("ETL_MAX_BUFFER_SIZE") {
            builder = builder.max_buffer_size(size);
        }

        if let Some(count) = env_parse::<usize>("ETL_BUFFERS_PER_CLASS") {
            builder = builder.buffers_per_class(count);
        }

        if let Ok(level) = std::env::var("ETL_LOG_LEVEL") {
            builder = builder.log_level(level);
        }

        if let Some(enable) = env_parse::<bool>("ETL_ENABLE_EVENT_LOGGING") {
            builder = builder.enable_event_logging(enable);
        }

        builder.build()
    }

    /// Carrega configuração de arquivo
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ETLError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Carrega configuração de string TOML
    pub fn from_toml(toml_str: &str) -> Result<Self, ETLError> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml_str, config::FileFormat::Toml))
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Builder de schema com a largura de String configurada
    pub fn schema_builder(&self) -> SchemaBuilder {
        SchemaBuilder::new().default_string_width(self.schema.default_string_width)
    }

    /// Valida a configuração
    pub fn validate(&self) -> Result<(), ETLError> {
        let invalid = |param: &str, value: String| {
            ETLError::Config(ConfigError::InvalidValue {
                param: param.to_string(),
                value,
            })
        };

        if self.pipeline.progress_interval == 0 {
            return Err(invalid("progress_interval", "0".to_string()));
        }

        if self.pipeline.load_batch_size == 0 {
            return Err(invalid("load_batch_size", "0".to_string()));
        }

        if self.pipeline.load_workers == 0 {
            return Err(invalid("load_workers", "0".to_string()));
        }

        if self.pool.max_buffer_size < MIN_CLASS_SIZE {
            return Err(invalid("max_buffer_size", self.pool.max_buffer_size.to_string()));
        }

        if self.pool.buffers_per_class == 0 {
            return Err(invalid("buffers_per_class", "0".to_string()));
        }

        if self.schema.default_string_width > u16::MAX as usize {
            return Err(invalid(
                "default_string_width",
                self.schema.default_string_width.to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder para configuração ETL
#[derive(Default)]
pub struct ETLConfigBuilder {
    config: ETLConfig,
}

impl ETLConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.pipeline.queue_capacity = capacity;
        self
    }

    pub fn progress_interval(mut self, interval: u64) -> Self {
        self.config.pipeline.progress_interval = interval;
        self
    }

    pub fn load_batch_size(mut self, size: usize) -> Self {
        self.config.pipeline.load_batch_size = size;
        self
    }

    pub fn load_workers(mut self, workers: usize) -> Self {
        self.config.pipeline.load_workers = workers;
        self
    }

    pub fn timeout_seconds(mut self, timeout: u64) -> Self {
        self.config.pipeline.timeout_seconds = timeout;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.config.pool.max_buffer_size = size;
        self
    }

    pub fn buffers_per_class(mut self, count: usize) -> Self {
        self.config.pool.buffers_per_class = count;
        self
    }

    pub fn prewarm_buffers(mut self, count: usize) -> Self {
        self.config.pool.prewarm_buffers = count;
        self
    }

    pub fn default_string_width(mut self, width: usize) -> Self {
        self.config.schema.default_string_width = width;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.observability.log_level = level.into();
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.observability.log_format = format;
        self
    }

    pub fn enable_event_logging(mut self, enable: bool) -> Self {
        self.config.observability.enable_event_logging = enable;
        self
    }

    pub fn build(self) -> Result<ETLConfig, ETLError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ETLConfig::default();
        assert_eq!(config.pipeline.queue_capacity, 1000);
        assert_eq!(config.pipeline.load_workers, 1);
        assert_eq!(config.pool.max_buffer_size, 1024 * 1024);
        assert_eq!(config.observability.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ETLConfig::builder()
            .queue_capacity(0)
            .progress_interval(10)
            .load_batch_size(50)
            .load_workers(4)
            .log_level("debug")
            .build()
            .unwrap();

        assert_eq!(config.pipeline.queue_capacity, 0);
        assert_eq!(config.pipeline.progress_interval, 10);
        assert_eq!(config.pipeline.load_batch_size, 50);
        assert_eq!(config.pipeline.load_workers, 4);
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn test_config_validation() {
        let mut config = ETLConfig::default();
        config.pipeline.load_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = ETLConfig::default();
        config.pool.max_buffer_size = 16;
        assert!(config.validate().is_err());

        assert!(ETLConfig::builder().load_workers(0).build().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
        [pipeline]
        queue_capacity = 16
        progress_interval = 100
        load_batch_size = 8
        load_workers = 2

        [pool]
        max_buffer_size = 65536

        [observability]
        log_level = "warn"
        log_format = "json"
        "#;

        let config = ETLConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.pipeline.queue_capacity, 16);
        assert_eq!(config.pipeline.load_workers, 2);
        assert_eq!(config.pipeline.timeout_seconds, 0);
        assert_eq!(config.pool.max_buffer_size, 65536);
        assert_eq!(config.pool.buffers_per_class, 1024);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.schema.default_string_width, DEFAULT_STRING_WIDTH);
    }

    #[test]
    fn test_schema_builder_uses_configured_width() {
        let config = ETLConfig::builder().default_string_width(24).build().unwrap();
        let schema = config
            .schema_builder()
            .field("name", crate::types::FieldType::String)
            .build()
            .unwrap();
        assert_eq!(schema.fields()[0].max_length, 24);
    }

    #[test]
    fn test_config_from_toml_rejects_invalid() {
        let toml_str = r#"
        [pipeline]
        progress_interval = 0
        "#;
        assert!(ETLConfig::from_toml(toml_str).is_err());
    }
}
