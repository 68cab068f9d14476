//! CSV export of chunks (`filename,chunk_id,text`).

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::rag::Chunk;

/// Quotes a field when it holds a comma, quote, CR or LF; quotes are doubled.
pub fn csv_field(value: &str) -> Cow<'_, str> {
    if value.contains(&[',', '"', '\r', '\n'][..]) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn write_csv<W: Write>(writer: &mut W, chunks: &[Chunk]) -> io::Result<()> {
    writeln!(writer, "filename,chunk_id,text")?;
    for chunk in chunks {
        writeln!(
            writer,
            "{},{},{}",
            csv_field(&chunk.source_id),
            chunk.index,
            csv_field(&chunk.text)
        )?;
    }
    Ok(())
}

/// Writes `chunks` to a CSV file. A failed final flush is reported, not dropped.
pub fn export_csv(path: &Path, chunks: &[Chunk]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_csv(&mut writer, chunks)?;
    writer.flush()
}
