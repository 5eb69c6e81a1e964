use async_trait::async_trait;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::error::{ExtractError, Result};
use crate::extract::parse_value;
use crate::record::Record;
use crate::schema::SchemaRef;
use crate::traits::Extractor;

/// Extrator para arquivos CSV
///
/// Lê uma linha por vez em um `StringRecord` reaproveitado e escreve os
/// valores convertidos direto no registro do pipeline. Com cabeçalho, as
/// colunas são associadas aos campos do schema pelo nome; sem cabeçalho,
/// pela posição.
pub struct CsvExtractor {
    file_path: PathBuf,
    schema: SchemaRef,
    delimiter: u8,
    has_headers: bool,
    quote_char: Option<u8>,
    escape_char: Option<u8>,
    reader: Option<csv::Reader<BufReader<File>>>,
    row: csv::StringRecord,
    columns: Vec<usize>,
    bytes_read: u64,
}

impl CsvExtractor {
    /// Cria um novo extrator CSV
    pub fn new<P: AsRef<Path>>(file_path: P, schema: SchemaRef) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            schema,
            delimiter: b',',
            has_headers: true,
            quote_char: Some(b'"'),
            escape_char: None,
            reader: None,
            row: csv::StringRecord::new(),
            columns: Vec::new(),
            bytes_read: 0,
        }
    }

    /// Define o delimitador
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Define se tem cabeçalhos
    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    /// Define o caractere de aspas
    pub fn with_quote_char(mut self, quote_char: u8) -> Self {
        self.quote_char = Some(quote_char);
        self
    }

    /// Define o caractere de escape
    pub fn with_escape_char(mut self, escape_char: u8) -> Self {
        self.escape_char = Some(escape_char);
        self
    }

    /// Remove aspas
    pub fn without_quotes(mut self) -> Self {
        self.quote_char = None;
        self
    }

    /// Associa cada campo do schema a uma coluna do arquivo
    fn map_columns(&self, headers: Option<&csv::StringRecord>) -> Result<Vec<usize>> {
        let Some(headers) = headers else {
            return Ok((0..self.schema.len()).collect());
        };

        self.schema
            .fields()
            .iter()
            .map(|field| {
                headers
                    .iter()
                    .position(|header| header.trim() == field.name)
                    .ok_or_else(|| {
                        ExtractError::InvalidFormat(format!(
                            "coluna '{}' ausente em {}",
                            field.name,
                            self.file_path.display()
                        ))
                        .into()
                    })
            })
            .collect()
    }
}

impl std::fmt::Debug for CsvExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvExtractor")
            .field("file_path", &self.file_path)
            .field("delimiter", &(self.delimiter as char))
            .field("has_headers", &self.has_headers)
            .field("open", &self.reader.is_some())
            .field("bytes_read", &self.bytes_read)
            .finish()
    }
}

#[async_trait]
impl Extractor for CsvExtractor {
    fn schema(&self) -> SchemaRef {
        SchemaRef::clone(&self.schema)
    }

    fn total_estimate(&self) -> Option<u64> {
        None
    }

    fn bytes_read(&self) -> Option<u64> {
        Some(self.bytes_read)
    }

    fn total_bytes(&self) -> Option<u64> {
        std::fs::metadata(&self.file_path).ok().map(|m| m.len())
    }

    async fn open(&mut self) -> Result<()> {
        let file = File::open(&self.file_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                ExtractError::FileNotFound(self.file_path.display().to_string()).into()
            }
            _ => crate::error::ETLError::Io(e),
        })?;

        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .has_headers(self.has_headers)
            .escape(self.escape_char);
        match self.quote_char {
            Some(quote) => builder.quote(quote),
            None => builder.quoting(false),
        };
        let mut reader = builder.from_reader(BufReader::new(file));

        self.columns = if self.has_headers {
            let headers = reader.headers()?.clone();
            self.map_columns(Some(&headers))?
        } else {
            self.map_columns(None)?
        };
        self.bytes_read = reader.position().byte();
        self.reader = Some(reader);

        debug!(file = %self.file_path.display(), columns = self.columns.len(), "CSV aberto");
        Ok(())
    }

    async fn next_row(&mut self, record: &mut Record<'_>) -> Result<bool> {
        let reader = self.reader.as_mut().ok_or_else(|| {
            ExtractError::SourceFault("leitor CSV não foi aberto".to_string())
        })?;

        if !reader.read_record(&mut self.row)? {
            return Ok(false);
        }
        self.bytes_read = reader.position().byte();

        for (index, field) in self.schema.fields().iter().enumerate() {
            let raw = self.row.get(self.columns[index]).ok_or_else(|| {
                ExtractError::ParseError(format!(
                    "linha {}: coluna {} ausente",
                    reader.position().line(),
                    self.columns[index]
                ))
            })?;
            let value = parse_value(raw, field.field_type).map_err(|e| {
                ExtractError::ParseError(format!(
                    "linha {}, campo '{}': {}",
                    reader.position().line(),
                    field.name,
                    e
                ))
            })?;
            record.set_value(index, value)?;
        }

        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        self.reader = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::error::ETLError;
    use crate::record::{PooledRecord, RecordBufferPool};
    use crate::schema::Schema;
    use crate::types::{FieldType, FieldValue};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn schema() -> SchemaRef {
        Schema::builder()
            .string_field("name", 16)
            .field("age", FieldType::Int32)
            .field("active", FieldType::Boolean)
            .build()
            .unwrap()
            .into_ref()
    }

    async fn read_all(extractor: &mut CsvExtractor) -> Result<Vec<Vec<FieldValue<'static>>>> {
        let pool = RecordBufferPool::new(&PoolConfig::default());
        extractor.open().await?;
        let mut rows = Vec::new();
        loop {
            let mut record = PooledRecord::rent(&pool, extractor.schema())?;
            if !extractor.next_row(&mut record.record()).await? {
                break;
            }
            rows.push(record.view().to_owned_values()?);
        }
        extractor.close().await?;
        Ok(rows)
    }

    #[tokio::test]
    async fn test_csv_extractor() {
        // Cria arquivo CSV temporário
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "name,age,active").unwrap();
        writeln!(temp_file, "Alice,30,true").unwrap();
        writeln!(temp_file, "Bob,,false").unwrap();

        let mut extractor = CsvExtractor::new(temp_file.path(), schema());
        let rows = read_all(&mut extractor).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0].as_string().unwrap(), Some("Alice"));
        assert_eq!(rows[0][1], FieldValue::Int32(30));
        assert_eq!(rows[0][2], FieldValue::Boolean(true));
        assert_eq!(rows[1][1], FieldValue::Null(FieldType::Int32));
        assert!(extractor.bytes_read().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_csv_extractor_without_headers() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "Alice,30,true").unwrap();
        writeln!(temp_file, "Bob,25,false").unwrap();

        let mut extractor = CsvExtractor::new(temp_file.path(), schema()).with_headers(false);
        let rows = read_all(&mut extractor).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0].as_string().unwrap(), Some("Bob"));
        assert_eq!(rows[1][1], FieldValue::Int32(25));
    }

    #[tokio::test]
    async fn test_csv_extractor_maps_columns_by_name() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "active;age;name;extra").unwrap();
        writeln!(temp_file, "false;41;Carla;x").unwrap();

        let mut extractor = CsvExtractor::new(temp_file.path(), schema()).with_delimiter(b';');
        let rows = read_all(&mut extractor).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0].as_string().unwrap(), Some("Carla"));
        assert_eq!(rows[0][1], FieldValue::Int32(41));
    }

    #[tokio::test]
    async fn test_csv_invalid_value_is_source_fault() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "name,age,active").unwrap();
        writeln!(temp_file, "Alice,trinta,true").unwrap();

        let mut extractor = CsvExtractor::new(temp_file.path(), schema());
        let result = read_all(&mut extractor).await;
        assert!(matches!(result, Err(ETLError::Extract(ExtractError::ParseError(_)))));
    }

    #[tokio::test]
    async fn test_csv_missing_column_and_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "name,age").unwrap();

        let mut extractor = CsvExtractor::new(temp_file.path(), schema());
        assert!(matches!(
            extractor.open().await,
            Err(ETLError::Extract(ExtractError::InvalidFormat(_)))
        ));

        let mut missing = CsvExtractor::new("/caminho/inexistente.csv", schema());
        assert!(matches!(
            missing.open().await,
            Err(ETLError::Extract(ExtractError::FileNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_csv_string_too_long() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "name,age,active").unwrap();
        writeln!(temp_file, "Maximiliano Alexandre,30,true").unwrap();

        let mut extractor = CsvExtractor::new(temp_file.path(), schema());
        assert!(matches!(read_all(&mut extractor).await, Err(ETLError::Record(_))));
    }
}
