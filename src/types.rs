use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;
use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};
use uuid::Uuid;
use crate::error::{ETLError, RecordError, Result};
use crate::telemetry::StageProgress;

/// Tipos escalares suportados por um campo de schema
///
/// Conjunto fechado: um novo tipo exige atualizar todas as conversões
/// (largura no schema, codificação no registro, acessores e serialização).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
pub enum FieldType {
    Null,
    String,
    Int16,
    Int32,
    Int64,
    Byte,
    Float,
    Double,
    Decimal,
    Boolean,
    DateTime,
    Guid,
}

impl FieldType {
    /// Largura fixa do payload em bytes; `None` para String, cuja largura
    /// depende do tamanho máximo declarado no schema
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldType::Null => Some(0),
            FieldType::String => None,
            FieldType::Int16 => Some(2),
            FieldType::Int32 => Some(4),
            FieldType::Int64 => Some(8),
            FieldType::Byte => Some(1),
            FieldType::Float => Some(4),
            FieldType::Double => Some(8),
            FieldType::Decimal => Some(17),
            FieldType::Boolean => Some(1),
            FieldType::DateTime => Some(8),
            FieldType::Guid => Some(16),
        }
    }

    /// Nome do tipo para mensagens e formatação
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Null => "Null",
            FieldType::String => "String",
            FieldType::Int16 => "Int16",
            FieldType::Int32 => "Int32",
            FieldType::Int64 => "Int64",
            FieldType::Byte => "Byte",
            FieldType::Float => "Float",
            FieldType::Double => "Double",
            FieldType::Decimal => "Decimal",
            FieldType::Boolean => "Boolean",
            FieldType::DateTime => "DateTime",
            FieldType::Guid => "Guid",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decimal de largura fixa: `mantissa * 10^-scale`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    pub mantissa: i128,
    pub scale: u8,
}

impl Decimal {
    /// Maior escala representável em i128
    pub const MAX_SCALE: u8 = 38;

    pub fn new(mantissa: i128, scale: u8) -> Self {
        Self { mantissa, scale }
    }

    /// Converte para f64 (com perda de precisão)
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10f64.powi(self.scale as i32)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            write!(f, "{}{}.{}", sign, int_part, frac_part)
        } else {
            write!(f, "{}0.{}{}", sign, "0".repeat(scale - digits.len()), digits)
        }
    }
}

impl FromStr for Decimal {
    type Err = ETLError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || -> ETLError {
            RecordError::InvalidValue {
                field_type: FieldType::Decimal,
                value: s.to_string(),
            }
            .into()
        };
        let s = s.trim();
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac_part.len() > Decimal::MAX_SCALE as usize {
            return Err(invalid());
        }

        let mut mantissa: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let digit = (c as u8 - b'0') as i128;
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add(digit))
                .ok_or_else(invalid)?;
        }

        Ok(Decimal {
            mantissa: if negative { -mantissa } else { mantissa },
            scale: frac_part.len() as u8,
        })
    }
}

/// Valor escalar com tag de tipo
///
/// Strings lidas de um registro emprestam o buffer (`Cow::Borrowed`), os
/// demais payloads são escalares `Copy`; nenhuma variante aloca no caminho
/// de leitura. `Null` carrega o tipo declarado do campo.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    Null(FieldType),
    String(Cow<'a, str>),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Byte(u8),
    Float(f32),
    Double(f64),
    Decimal(Decimal),
    Boolean(bool),
    DateTime(NaiveDateTime),
    Guid(Uuid),
}

macro_rules! scalar_accessor {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&self) -> Result<Option<$ty>> {
            match self {
                FieldValue::$variant(v) => Ok(Some(*v)),
                FieldValue::Null(FieldType::$variant) => Ok(None),
                other => Err(ETLError::TypeMismatch {
                    expected: FieldType::$variant,
                    found: other.field_type(),
                }),
            }
        }
    };
}

impl<'a> FieldValue<'a> {
    pub fn from_string(value: impl Into<Cow<'a, str>>) -> Self {
        FieldValue::String(value.into())
    }

    pub fn from_int16(value: i16) -> Self {
        FieldValue::Int16(value)
    }

    pub fn from_int32(value: i32) -> Self {
        FieldValue::Int32(value)
    }

    pub fn from_int64(value: i64) -> Self {
        FieldValue::Int64(value)
    }

    pub fn from_byte(value: u8) -> Self {
        FieldValue::Byte(value)
    }

    pub fn from_float(value: f32) -> Self {
        FieldValue::Float(value)
    }

    pub fn from_double(value: f64) -> Self {
        FieldValue::Double(value)
    }

    pub fn from_decimal(value: Decimal) -> Self {
        FieldValue::Decimal(value)
    }

    pub fn from_boolean(value: bool) -> Self {
        FieldValue::Boolean(value)
    }

    pub fn from_datetime(value: NaiveDateTime) -> Self {
        FieldValue::DateTime(value)
    }

    pub fn from_guid(value: Uuid) -> Self {
        FieldValue::Guid(value)
    }

    /// Nulo de um tipo declarado
    pub fn null_of(kind: FieldType) -> Self {
        FieldValue::Null(kind)
    }

    /// Tag de tipo do valor (para `Null`, o tipo declarado)
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Null(kind) => *kind,
            FieldValue::String(_) => FieldType::String,
            FieldValue::Int16(_) => FieldType::Int16,
            FieldValue::Int32(_) => FieldType::Int32,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::Byte(_) => FieldType::Byte,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Double(_) => FieldType::Double,
            FieldValue::Decimal(_) => FieldType::Decimal,
            FieldValue::Boolean(_) => FieldType::Boolean,
            FieldValue::DateTime(_) => FieldType::DateTime,
            FieldValue::Guid(_) => FieldType::Guid,
        }
    }

    /// Verifica se é nulo
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null(_))
    }

    /// Acessa a string; falha com `TypeMismatch` para qualquer outro tipo
    pub fn as_string(&self) -> Result<Option<&str>> {
        match self {
            FieldValue::String(s) => Ok(Some(s.as_ref())),
            FieldValue::Null(FieldType::String) => Ok(None),
            other => Err(ETLError::TypeMismatch {
                expected: FieldType::String,
                found: other.field_type(),
            }),
        }
    }

    scalar_accessor!(as_int16, Int16, i16);
    scalar_accessor!(as_int32, Int32, i32);
    scalar_accessor!(as_int64, Int64, i64);
    scalar_accessor!(as_byte, Byte, u8);
    scalar_accessor!(as_float, Float, f32);
    scalar_accessor!(as_double, Double, f64);
    scalar_accessor!(as_decimal, Decimal, Decimal);
    scalar_accessor!(as_boolean, Boolean, bool);
    scalar_accessor!(as_datetime, DateTime, NaiveDateTime);
    scalar_accessor!(as_guid, Guid, Uuid);

    /// Desvincula o valor do buffer de origem
    pub fn into_owned(self) -> FieldValue<'static> {
        match self {
            FieldValue::Null(kind) => FieldValue::Null(kind),
            FieldValue::String(s) => FieldValue::String(Cow::Owned(s.into_owned())),
            FieldValue::Int16(v) => FieldValue::Int16(v),
            FieldValue::Int32(v) => FieldValue::Int32(v),
            FieldValue::Int64(v) => FieldValue::Int64(v),
            FieldValue::Byte(v) => FieldValue::Byte(v),
            FieldValue::Float(v) => FieldValue::Float(v),
            FieldValue::Double(v) => FieldValue::Double(v),
            FieldValue::Decimal(v) => FieldValue::Decimal(v),
            FieldValue::Boolean(v) => FieldValue::Boolean(v),
            FieldValue::DateTime(v) => FieldValue::DateTime(v),
            FieldValue::Guid(v) => FieldValue::Guid(v),
        }
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null(_) => f.write_str("null"),
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Int16(v) => write!(f, "{}", v),
            FieldValue::Int32(v) => write!(f, "{}", v),
            FieldValue::Int64(v) => write!(f, "{}", v),
            FieldValue::Byte(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Double(v) => write!(f, "{}", v),
            FieldValue::Decimal(v) => write!(f, "{}", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%d %H:%M:%S%.f")),
            FieldValue::Guid(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for FieldValue<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldValue::Null(_) => serializer.serialize_unit(),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Int16(v) => serializer.serialize_i16(*v),
            FieldValue::Int32(v) => serializer.serialize_i32(*v),
            FieldValue::Int64(v) => serializer.serialize_i64(*v),
            FieldValue::Byte(v) => serializer.serialize_u8(*v),
            FieldValue::Float(v) => serializer.serialize_f32(*v),
            FieldValue::Double(v) => serializer.serialize_f64(*v),
            FieldValue::Decimal(v) => serializer.collect_str(v),
            FieldValue::Boolean(v) => serializer.serialize_bool(*v),
            FieldValue::DateTime(v) => serializer.collect_str(&v.format("%Y-%m-%dT%H:%M:%S%.f")),
            FieldValue::Guid(v) => serializer.collect_str(v),
        }
    }
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(value: &'a str) -> Self {
        FieldValue::String(Cow::Borrowed(value))
    }
}

impl From<String> for FieldValue<'static> {
    fn from(value: String) -> Self {
        FieldValue::String(Cow::Owned(value))
    }
}

impl From<i16> for FieldValue<'_> {
    fn from(value: i16) -> Self {
        FieldValue::Int16(value)
    }
}

impl From<i32> for FieldValue<'_> {
    fn from(value: i32) -> Self {
        FieldValue::Int32(value)
    }
}

impl From<i64> for FieldValue<'_> {
    fn from(value: i64) -> Self {
        FieldValue::Int64(value)
    }
}

impl From<u8> for FieldValue<'_> {
    fn from(value: u8) -> Self {
        FieldValue::Byte(value)
    }
}

impl From<f32> for FieldValue<'_> {
    fn from(value: f32) -> Self {
        FieldValue::Float(value)
    }
}

impl From<f64> for FieldValue<'_> {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}

impl From<Decimal> for FieldValue<'_> {
    fn from(value: Decimal) -> Self {
        FieldValue::Decimal(value)
    }
}

impl From<bool> for FieldValue<'_> {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

impl From<NaiveDateTime> for FieldValue<'_> {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<Uuid> for FieldValue<'_> {
    fn from(value: Uuid) -> Self {
        FieldValue::Guid(value)
    }
}

/// Identificador de estágio do pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StageId {
    Extract,
    Transform,
    Load,
    Global,
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::Extract => write!(f, "Extração"),
            StageId::Transform => write!(f, "Transformação"),
            StageId::Load => write!(f, "Carga"),
            StageId::Global => write!(f, "Global"),
        }
    }
}

/// Estado de um estágio: `NotStarted → Running → {Completed | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum StageStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StageStatus {
    /// Estados finais não mudam mais durante a execução
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed | StageStatus::Cancelled)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::NotStarted => write!(f, "Não iniciado"),
            StageStatus::Running => write!(f, "Executando"),
            StageStatus::Completed => write!(f, "Concluído"),
            StageStatus::Failed => write!(f, "Falhou"),
            StageStatus::Cancelled => write!(f, "Cancelado"),
        }
    }
}

/// Resultado de uma execução do pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    pub rows_extracted: u64,
    pub rows_transformed: u64,
    pub rows_loaded: u64,
    pub execution_time_ms: u64,
    /// Snapshot final de cada estágio, incluindo o Global
    pub stages: Vec<StageProgress>,
}

impl PipelineResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Linhas carregadas por segundo
    pub fn throughput(&self) -> f64 {
        if self.execution_time_ms == 0 {
            0.0
        } else {
            self.rows_loaded as f64 * 1000.0 / self.execution_time_ms as f64
        }
    }

    /// Snapshot final de um estágio
    pub fn stage(&self, stage: StageId) -> Option<&StageProgress> {
        self.stages.iter().find(|p| p.stage == stage)
    }
}

/// Estado agregado do pipeline (conjunção dos estágios)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "Ocioso"),
            PipelineState::Running => write!(f, "Executando"),
            PipelineState::Completed => write!(f, "Concluído"),
            PipelineState::Failed(error) => write!(f, "Falhou: {}", error),
            PipelineState::Cancelled => write!(f, "Cancelado"),
        }
    }
}

/// Falha irrecuperável de um estágio, entregue uma única vez por execução
#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: StageId,
    pub error: Arc<ETLError>,
    /// Representação textual da linha em processamento, quando disponível
    pub row_context: Option<String>,
    /// Índice (base zero) da linha no estágio que falhou
    pub row_index: Option<u64>,
}

impl StageFailure {
    pub fn new(stage: StageId, error: ETLError) -> Self {
        Self {
            stage,
            error: Arc::new(error),
            row_context: None,
            row_index: None,
        }
    }

    pub fn with_row(mut self, row_index: u64, row_context: Option<String>) -> Self {
        self.row_index = Some(row_index);
        self.row_context = row_context;
        self
    }

    /// Converte em erro devolvido ao chamador de `execute`
    pub fn to_error(&self) -> ETLError {
        ETLError::Stage {
            stage: self.stage,
            source: Arc::clone(&self.error),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.error)?;
        if let Some(index) = self.row_index {
            write!(f, " (linha {})", index)?;
        }
        Ok(())
    }
}

/// Eventos do pipeline para monitoramento externo
///
/// Podem ser emitidos a partir da task de qualquer estágio; observadores não
/// devem assumir entrega em uma única thread.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Pipeline iniciado
    Started {
        pipeline_id: String,
        timestamp: SystemTime,
    },
    /// Estado de um estágio alterado
    StageStateChanged {
        pipeline_id: String,
        stage: StageId,
        old_status: StageStatus,
        new_status: StageStatus,
        timestamp: SystemTime,
    },
    /// Progresso periódico (OnRead / OnTransform / OnWrite, conforme o estágio)
    Progress {
        pipeline_id: String,
        progress: StageProgress,
        timestamp: SystemTime,
    },
    /// Estágio terminou sem erro (OnFinish)
    StageFinished {
        pipeline_id: String,
        progress: StageProgress,
        timestamp: SystemTime,
    },
    /// Falha irrecuperável (OnError), no máximo uma por execução
    Error {
        pipeline_id: String,
        failure: StageFailure,
        timestamp: SystemTime,
    },
    /// Execução cancelada pelo chamador ou por timeout
    Cancelled {
        pipeline_id: String,
        timestamp: SystemTime,
    },
    /// Pipeline concluído com sucesso (OnComplete)
    Completed {
        pipeline_id: String,
        result: PipelineResult,
        timestamp: SystemTime,
    },
}

impl PipelineEvent {
    /// Nome curto do evento
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Started { .. } => "started",
            PipelineEvent::StageStateChanged { .. } => "stage_state_changed",
            PipelineEvent::Progress { .. } => "progress",
            PipelineEvent::StageFinished { .. } => "stage_finished",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::Cancelled { .. } => "cancelled",
            PipelineEvent::Completed { .. } => "completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessor_matches_tag() {
        let value = FieldValue::from_int32(42);
        assert_eq!(value.as_int32().unwrap(), Some(42));
        assert_eq!(value.field_type(), FieldType::Int32);
    }

    #[test]
    fn test_accessor_mismatch_fails() {
        let value = FieldValue::from_int32(42);
        match value.as_string() {
            Err(ETLError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, FieldType::String);
                assert_eq!(found, FieldType::Int32);
            }
            other => panic!("esperado TypeMismatch, obtido {:?}", other),
        }
        assert!(value.as_int64().is_err());
    }

    #[test]
    fn test_null_keeps_declared_type() {
        let value = FieldValue::null_of(FieldType::Double);
        assert!(value.is_null());
        assert_eq!(value.field_type(), FieldType::Double);
        assert_eq!(value.as_double().unwrap(), None);
        assert!(value.as_int32().is_err());
    }

    #[test]
    fn test_decimal_display_and_parse() {
        let d: Decimal = "-12.345".parse().unwrap();
        assert_eq!(d, Decimal::new(-12345, 3));
        assert_eq!(d.to_string(), "-12.345");
        assert_eq!(Decimal::new(5, 3).to_string(), "0.005");
        assert_eq!(Decimal::new(100, 0).to_string(), "100");
        assert!("1.2.3".parse::<Decimal>().is_err());

        let err = "abc".parse::<Decimal>().unwrap_err();
        assert_eq!(err.error_code(), "RECORD_ERROR");
        assert!(matches!(
            err,
            ETLError::Record(RecordError::InvalidValue { field_type: FieldType::Decimal, .. })
        ));
    }

    #[test]
    fn test_into_owned_detaches_string() {
        let text = String::from("Alice");
        let owned = {
            let borrowed = FieldValue::from(text.as_str());
            borrowed.into_owned()
        };
        drop(text);
        assert_eq!(owned.as_string().unwrap(), Some("Alice"));
    }

    #[test]
    fn test_serialize_values() {
        let json = serde_json::to_string(&FieldValue::from_decimal(Decimal::new(1050, 2))).unwrap();
        assert_eq!(json, "\"10.50\"");
        let json = serde_json::to_string(&FieldValue::null_of(FieldType::Int32)).unwrap();
        assert_eq!(json, "null");
    }

    #[test]
    fn test_pipeline_state_display() {
        assert_eq!(PipelineState::Idle.to_string(), "Ocioso");
        assert_eq!(PipelineState::Failed("x".to_string()).to_string(), "Falhou: x");
    }
}
