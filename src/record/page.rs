use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use super::error::{RecordError, RecordResult};
use super::record::RowId;
use super::value::read_u32;

/// Page sequence number, also stored as the header's page id
pub type PageId = u32;

/// Header stored at offset 0 of every page file:
/// `page_id | rows_count | free_count | free_count x row id`, all u32 LE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub page_id: PageId,
    /// Live rows only; freed slots are not counted
    pub rows_count: u32,
    /// Slots eligible for reuse, in reuse order
    pub free_rows: Vec<RowId>,
}

impl PageHeader {
    const FIXED_SIZE: usize = 12;

    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            rows_count: 0,
            free_rows: Vec::new(),
        }
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        Self::FIXED_SIZE + self.free_rows.len() * 4
    }

    /// Live rows plus freed slots still physically present
    pub fn physical_rows(&self) -> u32 {
        self.rows_count + self.free_rows.len() as u32
    }

    /// Id the next appended row receives
    pub fn next_append_id(&self) -> RowId {
        self.physical_rows()
    }

    pub fn is_free(&self, row_id: RowId) -> bool {
        self.free_rows.contains(&row_id)
    }

    /// Record a live row as deleted
    pub fn release(&mut self, row_id: RowId) {
        if !self.is_free(row_id) {
            self.free_rows.push(row_id);
            self.rows_count = self.rows_count.saturating_sub(1);
        }
    }

    /// Record a freed slot as live again
    pub fn reclaim(&mut self, row_id: RowId) -> bool {
        match self.free_rows.iter().position(|&id| id == row_id) {
            Some(pos) => {
                self.free_rows.remove(pos);
                self.rows_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.encoded_len());
        result.extend_from_slice(&self.page_id.to_le_bytes());
        result.extend_from_slice(&self.rows_count.to_le_bytes());
        result.extend_from_slice(&(self.free_rows.len() as u32).to_le_bytes());
        for id in &self.free_rows {
            result.extend_from_slice(&id.to_le_bytes());
        }
        result
    }

    /// Read a header; the reader must be positioned at offset 0.
    /// A free list longer than the rest of the stream is `Corrupted`.
    pub fn read<R: Read + Seek>(reader: &mut R) -> RecordResult<Self> {
        let page_id = read_u32(reader).map_err(truncated)?;
        let rows_count = read_u32(reader).map_err(truncated)?;
        let free_count = read_u32(reader).map_err(truncated)?;

        let position = reader.stream_position()?;
        let remaining = reader.seek(SeekFrom::End(0))?.saturating_sub(position);
        reader.seek(SeekFrom::Start(position))?;
        if free_count as u64 * 4 > remaining {
            return Err(RecordError::Corrupted(format!(
                "Free list of {} ids overruns the {} bytes left in the page",
                free_count, remaining
            )));
        }

        let mut free_rows = Vec::with_capacity(free_count as usize);
        for _ in 0..free_count {
            free_rows.push(read_u32(reader).map_err(truncated)?);
        }

        Ok(Self {
            page_id,
            rows_count,
            free_rows,
        })
    }

    /// Advance past a header without allocating its free list.
    /// Returns the header length.
    pub fn skip<S: Read + Seek>(stream: &mut S) -> RecordResult<u64> {
        stream.seek(SeekFrom::Current(8))?;
        let free_count = read_u32(stream).map_err(truncated)? as i64;
        stream.seek(SeekFrom::Current(free_count * 4))?;
        Ok(Self::FIXED_SIZE as u64 + free_count as u64 * 4)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> RecordResult<()> {
        writer.write_all(&self.serialize())?;
        Ok(())
    }

    /// Persist this header over one that occupied `old_len` bytes.
    ///
    /// The free list is variable-length, so a size change moves the row
    /// area to start right after the new header.
    pub fn rewrite(&self, file: &mut File, old_len: u64) -> RecordResult<()> {
        let new_len = self.encoded_len() as u64;
        if new_len == old_len {
            file.seek(SeekFrom::Start(0))?;
            return self.write(file);
        }

        file.seek(SeekFrom::Start(old_len))?;
        let mut rows = Vec::new();
        file.read_to_end(&mut rows)?;

        file.seek(SeekFrom::Start(0))?;
        self.write(file)?;
        file.write_all(&rows)?;
        file.set_len(new_len + rows.len() as u64)?;
        Ok(())
    }
}

fn truncated(err: RecordError) -> RecordError {
    match err {
        RecordError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            RecordError::Corrupted("Truncated page header".to_string())
        }
        other => other,
    }
}
