use std::sync::Arc;
use thiserror::Error;
use crate::types::{FieldType, StageId};

/// Tipo Result principal da biblioteca
pub type Result<T> = std::result::Result<T, ETLError>;

/// Erro principal da biblioteca
#[derive(Error, Debug)]
pub enum ETLError {
    #[error("Erro de schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("Tipo incompatível: esperado {expected}, encontrado {found}")]
    TypeMismatch { expected: FieldType, found: FieldType },

    #[error("Erro de registro: {0}")]
    Record(#[from] RecordError),

    #[error("Erro no pool de buffers: {0}")]
    Pool(#[from] PoolError),

    #[error("Erro de extração: {0}")]
    Extract(#[from] ExtractError),

    #[error("Erro de transformação: {0}")]
    Transform(#[from] TransformError),

    #[error("Erro de carga: {0}")]
    Load(#[from] LoadError),

    #[error("Erro de configuração: {0}")]
    Config(#[from] ConfigError),

    #[error("Erro de pipeline: {0}")]
    Pipeline(String),

    #[error("Execução cancelada")]
    Cancelled,

    #[error("Tempo limite de {0}s excedido")]
    Timeout(u64),

    #[error("Falha no estágio {stage}: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: Arc<ETLError>,
    },

    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro de serialização: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Erro genérico: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Erros de definição e compatibilidade de schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Campo duplicado: {0}")]
    DuplicateField(String),

    #[error("Largura inválida para o campo {field}: {width}")]
    InvalidWidth { field: String, width: usize },

    #[error("Schemas incompatíveis em {boundary}: {detail}")]
    Mismatch { boundary: String, detail: String },
}

/// Erros de acesso a registros
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    #[error("Campo desconhecido: {0}")]
    UnknownField(String),

    #[error("Índice {index} fora do schema ({len} campos)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Valor excede a largura do campo {field}: {len} > {max}")]
    FieldOverflow { field: String, len: usize, max: usize },

    #[error("Buffer muito pequeno: {actual} < {required}")]
    BufferTooSmall { required: usize, actual: usize },

    #[error("Dados corrompidos no campo {0}")]
    Corrupted(String),

    #[error("Valor inválido para o tipo {field_type}: '{value}'")]
    InvalidValue { field_type: FieldType, value: String },
}

/// Erros do pool de buffers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Tamanho solicitado {requested} excede o limite de {max} bytes")]
    BufferTooLarge { requested: usize, max: usize },

    #[error("Pool esgotado: {0}")]
    Exhausted(String),
}

/// Erros relacionados à extração de dados
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Erro de conexão: {0}")]
    Connection(String),

    #[error("Arquivo não encontrado: {0}")]
    FileNotFound(String),

    #[error("Formato inválido: {0}")]
    InvalidFormat(String),

    #[error("Erro de parsing: {0}")]
    ParseError(String),

    #[error("Falha na fonte: {0}")]
    SourceFault(String),
}

/// Erros relacionados à transformação de dados
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Transformação inválida: {0}")]
    InvalidTransformation(String),

    #[error("Validação falhou: {0}")]
    ValidationFailed(String),

    #[error("Erro de processamento: {0}")]
    ProcessingError(String),
}

/// Erros relacionados ao carregamento de dados
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Erro de conexão de destino: {0}")]
    DestinationConnection(String),

    #[error("Erro de escrita: {0}")]
    WriteError(String),

    #[error("Falha no destino: {0}")]
    SinkFault(String),

    #[error("Destino indisponível: {0}")]
    Unavailable(String),

    #[error("Falha no registro {offset} do lote: {source}")]
    BatchRecord { offset: usize, source: Box<ETLError> },
}

/// Erros relacionados à configuração
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuração inválida: {0}")]
    InvalidConfig(String),

    #[error("Valor inválido para {param}: {value}")]
    InvalidValue { param: String, value: String },

    #[error("Erro de parsing de configuração: {0}")]
    ParseError(String),
}

impl ETLError {
    /// Verifica se o erro é recuperável
    pub fn is_recoverable(&self) -> bool {
        match self {
            ETLError::Extract(ExtractError::Connection(_)) => true,
            ETLError::Load(LoadError::DestinationConnection(_)) => true,
            ETLError::Load(LoadError::BatchRecord { source, .. }) => source.is_recoverable(),
            ETLError::Stage { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Indica um encerramento cooperativo, que não é falha para o chamador
    pub fn is_cancelled(&self) -> bool {
        match self {
            ETLError::Cancelled => true,
            ETLError::Load(LoadError::BatchRecord { source, .. }) => source.is_cancelled(),
            ETLError::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Retorna o código de erro
    pub fn error_code(&self) -> &'static str {
        match self {
            ETLError::Schema(_) => "SCHEMA_ERROR",
            ETLError::TypeMismatch { .. } => "TYPE_MISMATCH",
            ETLError::Record(_) => "RECORD_ERROR",
            ETLError::Pool(_) => "POOL_ERROR",
            ETLError::Extract(_) => "SOURCE_FAULT",
            ETLError::Transform(_) => "TRANSFORM_ERROR",
            ETLError::Load(LoadError::BatchRecord { source, .. }) => source.error_code(),
            ETLError::Load(_) => "SINK_FAULT",
            ETLError::Config(_) => "CONFIG_ERROR",
            ETLError::Pipeline(_) => "PIPELINE_ERROR",
            ETLError::Cancelled => "CANCELLED",
            ETLError::Timeout(_) => "TIMEOUT",
            ETLError::Stage { source, .. } => source.error_code(),
            ETLError::Io(_) => "IO_ERROR",
            ETLError::Serialization(_) => "SERIALIZATION_ERROR",
            ETLError::Generic(_) => "GENERIC_ERROR",
        }
    }

    /// Erro raiz, sem o envelope de estágio
    pub fn root(&self) -> &ETLError {
        match self {
            ETLError::Stage { source, .. } => source.root(),
            ETLError::Load(LoadError::BatchRecord { source, .. }) => source.root(),
            other => other,
        }
    }

    /// Marca a falha como ocorrida no registro `offset` de um lote
    ///
    /// Se a posição já foi informada, mantém a original.
    pub fn at_batch_offset(self, offset: usize) -> ETLError {
        match self {
            ETLError::Load(LoadError::BatchRecord { offset, source }) => {
                LoadError::BatchRecord { offset, source }.into()
            }
            other => LoadError::BatchRecord { offset, source: Box::new(other) }.into(),
        }
    }

    /// Separa a posição no lote informada por `at_batch_offset`
    pub fn split_batch_offset(self) -> (Option<usize>, ETLError) {
        match self {
            ETLError::Load(LoadError::BatchRecord { offset, source }) => (Some(offset), *source),
            other => (None, other),
        }
    }
}

impl From<config::ConfigError> for ETLError {
    fn from(err: config::ConfigError) -> Self {
        ETLError::Config(ConfigError::ParseError(err.to_string()))
    }
}

#[cfg(feature = "csv")]
impl From<csv::Error> for ETLError {
    fn from(err: csv::Error) -> Self {
        match err.kind() {
            csv::ErrorKind::Io(io_err) => ETLError::Io(std::io::Error::new(io_err.kind(), io_err.to_string())),
            csv::ErrorKind::Utf8 { .. } => {
                ETLError::Extract(ExtractError::InvalidFormat("UTF-8 inválido".to_string()))
            }
            _ => ETLError::Extract(ExtractError::ParseError(err.to_string())),
        }
    }
}
