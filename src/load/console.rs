//! # Console Loader
//!
//! Carregamento em stdout, útil para debug, demonstrações e desenvolvimento.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use crate::error::{LoadError, Result};
use crate::load::common::DataFormatter;
use crate::record::{PooledRecord, RecordView};
use crate::traits::Loader;
use crate::types::FieldValue;

/// Carregador para output em console/stdout
///
/// No modo pretty cada registro ocupa um bloco numerado; caso contrário, uma
/// linha JSON compacta.
#[derive(Debug)]
pub struct ConsoleLoader {
    pretty: bool,
    printed: AtomicU64,
}

impl ConsoleLoader {
    /// Cria um novo ConsoleLoader, em modo pretty
    pub fn new() -> Self {
        Self {
            pretty: true,
            printed: AtomicU64::new(0),
        }
    }

    /// Se false, usa JSON compacto
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Registros impressos até agora
    pub fn printed(&self) -> u64 {
        self.printed.load(Ordering::Relaxed)
    }

    fn render(&self, number: u64, record: &RecordView<'_>, out: &mut String) -> Result<()> {
        if !self.pretty {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
            return Ok(());
        }

        let _ = writeln!(out, "Record {}: {{", number);
        for (descriptor, value) in record.values() {
            let _ = match value? {
                FieldValue::String(s) => writeln!(out, "  {}: \"{}\"", descriptor.name, s),
                other => writeln!(out, "  {}: {}", descriptor.name, DataFormatter::format_value(&other)),
            };
        }
        out.push_str("}\n");
        Ok(())
    }

    fn print(&self, text: &str) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(text.as_bytes())
            .map_err(|e| LoadError::WriteError(e.to_string()).into())
    }
}

impl Default for ConsoleLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Loader for ConsoleLoader {
    async fn load(&self, record: &RecordView<'_>) -> Result<()> {
        let number = self.printed.fetch_add(1, Ordering::Relaxed) + 1;
        let mut out = String::new();
        self.render(number, record, &mut out)?;
        self.print(&out)
    }

    async fn load_batch(&self, batch: &[PooledRecord]) -> Result<()> {
        let first = self.printed.fetch_add(batch.len() as u64, Ordering::Relaxed) + 1;
        let mut out = String::new();
        for (offset, record) in batch.iter().enumerate() {
            self.render(first + offset as u64, &record.view(), &mut out)
                .map_err(|e| e.at_batch_offset(offset))?;
        }
        self.print(&out)
    }
}
