use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use fb_core::attribute::DataAttribute;
use fb_core::value::Value;

// ---------------------------------------------------------------------------
// DataLogger
// ---------------------------------------------------------------------------

/// A consumer invoked whenever its bound source publishes a new value.
///
/// The runtime runs `log` with the source's read lock held and releases
/// the hold afterwards, on success or failure, so a broken logger can not
/// stall the producer forever.
#[async_trait]
pub trait DataLogger: Send + Sync {
    fn name(&self) -> &str;

    async fn log(&self, value: &Value, attr: &DataAttribute) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryLogger
// ---------------------------------------------------------------------------

/// Captures every published value in memory. Diagnostic helper, also the
/// workhorse of the pipeline tests.
#[derive(Default)]
pub struct MemoryLogger {
    name: String,
    records: Mutex<Vec<(Value, DataAttribute)>>,
}

impl MemoryLogger {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<(Value, DataAttribute)> {
        self.records.lock().expect("records lock poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("records lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DataLogger for MemoryLogger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn log(&self, value: &Value, attr: &DataAttribute) -> anyhow::Result<()> {
        self.records
            .lock()
            .expect("records lock poisoned")
            .push((value.clone(), attr.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlFileLogger
// ---------------------------------------------------------------------------

/// Appends one JSON record per published value to a file.
pub struct JsonlFileLogger {
    name: String,
    file: Mutex<File>,
}

impl JsonlFileLogger {
    pub fn open(name: &str, path: impl AsRef<Path>) -> anyhow::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(Self {
            name: name.to_string(),
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl DataLogger for JsonlFileLogger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn log(&self, value: &Value, attr: &DataAttribute) -> anyhow::Result<()> {
        let record = serde_json::json!({
            "type": value.value_type().name(),
            "value": value_to_json(value),
            "index": attr.index(),
            "sequences": attr.sequence_ids().collect::<Vec<_>>(),
        });
        let mut file = self.file.lock().expect("logger file lock poisoned");
        writeln!(file, "{record}")?;
        Ok(())
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::json;
    match value {
        Value::Int32(v) => json!(v),
        Value::UInt32(v) => json!(v),
        Value::Int64(v) => json!(v),
        Value::UInt64(v) => json!(v),
        Value::Float32(v) => json!(v),
        Value::Float64(v) => json!(v),
        Value::Str(v) => json!(v),
        Value::Mat(m) => json!({
            "rows": m.rows,
            "cols": m.cols,
            "channels": m.channels,
        }),
        Value::VecInt32(v) => json!(v),
        Value::VecUInt32(v) => json!(v),
        Value::VecInt64(v) => json!(v),
        Value::VecUInt64(v) => json!(v),
        Value::VecFloat32(v) => json!(v),
        Value::VecFloat64(v) => json!(v),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_logger_records() {
        let logger = MemoryLogger::new("mem");
        logger
            .log(&Value::Int64(7), &DataAttribute::new())
            .await
            .unwrap();
        assert_eq!(logger.len(), 1);
        assert_eq!(logger.records()[0].0, Value::Int64(7));
    }

    #[tokio::test]
    async fn jsonl_logger_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("values.jsonl");
        let logger = JsonlFileLogger::open("file", &path).unwrap();

        logger
            .log(
                &Value::Str("hello".into()),
                &DataAttribute::with_sequence(3, 0, true, false),
            )
            .await
            .unwrap();
        logger
            .log(&Value::VecInt64(vec![1, 2]), &DataAttribute::new())
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["value"], "hello");
        assert_eq!(first["sequences"][0], 3);
    }
}
