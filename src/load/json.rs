//! # JSON Lines Loader
//!
//! Grava um objeto JSON por linha, no formato `campo: valor` na ordem do
//! schema.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::debug;
use crate::error::{LoadError, Result};
use crate::record::{PooledRecord, RecordView};
use crate::traits::Loader;

/// Carregador para arquivos JSONL
///
/// O arquivo é aberto no primeiro lote da execução e fechado em `finalize`.
/// Sem `with_append(true)`, cada execução reescreve o arquivo.
#[derive(Debug)]
pub struct JsonLinesLoader {
    file_path: PathBuf,
    append: bool,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonLinesLoader {
    /// Cria um novo JsonLinesLoader
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        Self {
            file_path: file_path.as_ref().to_path_buf(),
            append: false,
            writer: Mutex::new(None),
        }
    }

    /// Define se deve adicionar ao final do arquivo existente
    pub fn with_append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    async fn write_lines(&self, lines: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(self.append)
                .truncate(!self.append)
                .open(&self.file_path)
                .await
                .map_err(|e| write_error(&self.file_path, e))?;
            debug!(file = %self.file_path.display(), append = self.append, "JSONL aberto");
            *guard = Some(BufWriter::new(file));
        }

        match guard.as_mut() {
            Some(writer) => writer
                .write_all(lines)
                .await
                .map_err(|e| write_error(&self.file_path, e)),
            None => Err(LoadError::WriteError("arquivo de destino não aberto".to_string()).into()),
        }
    }
}

fn write_error(path: &Path, error: std::io::Error) -> crate::error::ETLError {
    LoadError::WriteError(format!("{}: {}", path.display(), error)).into()
}

fn append_line(buffer: &mut Vec<u8>, record: &RecordView<'_>) -> Result<()> {
    serde_json::to_writer(&mut *buffer, record)?;
    buffer.push(b'\n');
    Ok(())
}

#[async_trait]
impl Loader for JsonLinesLoader {
    async fn load(&self, record: &RecordView<'_>) -> Result<()> {
        let mut line = Vec::with_capacity(record.schema().buffer_size() * 2);
        append_line(&mut line, record)?;
        self.write_lines(&line).await
    }

    async fn load_batch(&self, batch: &[PooledRecord]) -> Result<()> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let mut lines = Vec::with_capacity(batch.len() * first.schema().buffer_size() * 2);
        for (offset, record) in batch.iter().enumerate() {
            append_line(&mut lines, &record.view()).map_err(|e| e.at_batch_offset(offset))?;
        }
        self.write_lines(&lines).await
    }

    async fn finalize(&self) -> Result<()> {
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            writer.flush().await.map_err(|e| write_error(&self.file_path, e))?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match self.file_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.is_dir()),
            _ => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::record::RecordBufferPool;
    use crate::schema::{Schema, SchemaRef};
    use crate::types::{FieldType, FieldValue};
    use tempfile::NamedTempFile;

    fn batch(pool: &RecordBufferPool, ids: &[i32]) -> Vec<PooledRecord> {
        let schema: SchemaRef = Schema::new([("id", FieldType::Int32), ("name", FieldType::String)])
            .unwrap()
            .into_ref();
        ids.iter()
            .map(|id| {
                let mut record = PooledRecord::rent(pool, SchemaRef::clone(&schema)).unwrap();
                record.set_value("id", FieldValue::from_int32(*id)).unwrap();
                if *id % 2 == 0 {
                    record.set_value("name", FieldValue::from("par")).unwrap();
                }
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn test_jsonl_loader() {
        let pool = RecordBufferPool::new(&PoolConfig::default());
        let temp_file = NamedTempFile::new().unwrap();
        let loader = JsonLinesLoader::new(temp_file.path());

        loader.load_batch(&batch(&pool, &[1, 2])).await.unwrap();
        loader.finalize().await.unwrap();

        // Verifica se o arquivo foi criado com formato JSONL
        let content = tokio::fs::read_to_string(temp_file.path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![r#"{"id":1,"name":null}"#, r#"{"id":2,"name":"par"}"#]);

        // Verifica se cada linha é um JSON válido
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed.is_object());
        }
    }

    #[tokio::test]
    async fn test_jsonl_append_mode() {
        let pool = RecordBufferPool::new(&PoolConfig::default());
        let temp_file = NamedTempFile::new().unwrap();
        let loader = JsonLinesLoader::new(temp_file.path()).with_append(true);

        // Primeira execução
        loader.load_batch(&batch(&pool, &[1])).await.unwrap();
        loader.finalize().await.unwrap();

        // Segunda execução (append)
        let records = batch(&pool, &[2]);
        loader.load(&records[0].view()).await.unwrap();
        loader.finalize().await.unwrap();

        let content = tokio::fs::read_to_string(temp_file.path()).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"id\":1"));
        assert!(lines[1].contains("\"id\":2"));
    }

    #[tokio::test]
    async fn test_jsonl_rewrites_without_append() {
        let pool = RecordBufferPool::new(&PoolConfig::default());
        let temp_file = NamedTempFile::new().unwrap();
        let loader = JsonLinesLoader::new(temp_file.path());

        loader.load_batch(&batch(&pool, &[1, 3])).await.unwrap();
        loader.finalize().await.unwrap();
        loader.load_batch(&batch(&pool, &[5])).await.unwrap();
        loader.finalize().await.unwrap();

        let content = tokio::fs::read_to_string(temp_file.path()).await.unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"id\":5"));
    }

    #[tokio::test]
    async fn test_health_check_missing_directory() {
        let loader = JsonLinesLoader::new("/diretorio/que/nao/existe/saida.jsonl");
        assert!(!loader.health_check().await.unwrap());
    }
}
