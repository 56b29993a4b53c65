use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs::{create_dir_all, read_to_string, remove_file, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::models::Registration;

pub const RECORD_COLUMNS: [&str; 6] = [
    "timestamp",
    "first_name",
    "last_name",
    "id_type",
    "front_filename",
    "back_filename",
];

/// Append-only store of registration records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one record, writing the header row first if the store was empty.
    async fn append(&self, record: &Registration) -> anyhow::Result<()>;

    /// All records in insertion order.
    async fn list_all(&self) -> anyhow::Result<Vec<Registration>>;
}

/// Store of uploaded binary files under generated names.
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()>;

    /// Best-effort removal, used to clean up after a failed record append.
    async fn remove(&self, name: &str) -> anyhow::Result<()>;
}

/// Record store backed by a flat CSV file.
pub struct FsRecordStore {
    path: PathBuf,
    // Serializes appends so the header row is written exactly once even
    // when the first two submissions race.
    appender: Mutex<()>,
}

impl FsRecordStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            appender: Mutex::new(()),
        }
    }
}

#[async_trait]
impl RecordStore for FsRecordStore {
    async fn append(&self, record: &Registration) -> anyhow::Result<()> {
        let _guard = self.appender.lock().await;
        let existed = self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("failed to open record file {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);
        if !existed {
            writer.write_all(csv_line(&RECORD_COLUMNS).as_bytes()).await?;
        }
        writer.write_all(csv_line(&record.columns()).as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Registration>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read record file {}", self.path.display()))?;
        let mut rows = parse_csv(&text).into_iter();
        // First row is the header.
        rows.next();
        // Rows with the wrong arity (e.g. a partially written trailing
        // line observed mid-append) are skipped rather than failing the
        // whole listing.
        Ok(rows
            .filter_map(|row| {
                let [timestamp, first_name, last_name, id_type, front_filename, back_filename]: [String; 6] =
                    row.try_into().ok()?;
                Some(Registration {
                    timestamp,
                    first_name,
                    last_name,
                    id_type,
                    front_filename,
                    back_filename,
                })
            })
            .collect())
    }
}

/// Upload store backed by a local directory.
pub struct FsUploadStore {
    dir: PathBuf,
}

impl FsUploadStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl UploadStore for FsUploadStore {
    async fn save(&self, name: &str, bytes: &[u8]) -> anyhow::Result<()> {
        create_dir_all(&self.dir).await?;
        let path = self.dir.join(name);
        let file = File::create(&path)
            .await
            .with_context(|| format!("failed to create upload {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> anyhow::Result<()> {
        remove_file(self.dir.join(name)).await?;
        Ok(())
    }
}

/// Encode one CSV row, terminated with a newline.
///
/// Fields containing a comma, quote or line break are quoted, with embedded
/// quotes doubled.
pub fn csv_line(fields: &[&str]) -> String {
    let mut line = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            line.push(',');
        }
        if field.contains(['"', ',', '\n', '\r']) {
            line.push('"');
            line.push_str(&field.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(field);
        }
    }
    line.push('\n');
    line
}

/// Parse CSV text into rows of fields, honoring quoted fields with embedded
/// separators, doubled quotes and line breaks.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(ch),
            }
            continue;
        }
        match ch {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }
    // Trailing row without a final newline.
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

/// Create the directories the server writes into.
pub async fn prepare_dirs(upload_dir: &Path) -> anyhow::Result<()> {
    create_dir_all(upload_dir)
        .await
        .with_context(|| format!("failed to create upload dir {}", upload_dir.display()))?;
    Ok(())
}
