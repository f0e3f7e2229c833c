use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use log::trace;

use super::error::{RecordError, RecordResult};
use super::page::PageHeader;
use super::schema::TableScheme;
use super::value::{Value, read_u32};

/// Row identifier, stable within its page across slot reuse
pub type RowId = u32;

/// A decoded row: one optional value per column, `None` is SQL NULL
#[derive(Debug, Clone, PartialEq)]
pub struct PageRow {
    pub row_id: RowId,
    pub values: Vec<Option<Value>>,
}

impl PageRow {
    /// Create a new row
    pub fn new(row_id: RowId, values: Vec<Option<Value>>) -> Self {
        Self { row_id, values }
    }

    /// Get a value by index; `None` for NULL or out of range
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx).and_then(Option::as_ref)
    }

    /// Narrow and reorder values to the given column positions
    pub fn project(&self, indices: &[usize]) -> PageRow {
        let values = indices
            .iter()
            .map(|&idx| self.values.get(idx).cloned().flatten())
            .collect();
        PageRow::new(self.row_id, values)
    }

    /// Bytes this row occupies after its length field: id + bitmap + payload
    pub fn encoded_len(&self, scheme: &TableScheme) -> RecordResult<u32> {
        self.check_arity(scheme)?;
        let mut len = 4 + scheme.column_count();
        for (value, col) in self.values.iter().zip(scheme.columns()) {
            if let Some(value) = value {
                len += value.encoded_len(col.value_type)?;
            }
        }
        Ok(len as u32)
    }

    /// Serialize the row into a slot.
    /// Format: [capacity] [row id] [null bitmap, 1 byte per column] [non-null values] [slack]
    ///
    /// `capacity` keeps the size of a reused slot; the difference to the
    /// encoded row is zero-filled.
    pub fn serialize(&self, scheme: &TableScheme, capacity: Option<u32>) -> RecordResult<Vec<u8>> {
        let len = self.encoded_len(scheme)?;
        let capacity = capacity.unwrap_or(len);
        if len > capacity {
            return Err(RecordError::InvalidValue(format!(
                "Row of {} bytes does not fit a {} byte slot",
                len, capacity
            )));
        }

        let mut result = Vec::with_capacity(4 + capacity as usize);
        result.extend_from_slice(&capacity.to_le_bytes());
        result.extend_from_slice(&self.row_id.to_le_bytes());

        // 1. NULL bitmap
        result.extend(self.values.iter().map(|v| v.is_none() as u8));

        // 2. Non-null values in column order
        for (value, col) in self.values.iter().zip(scheme.columns()) {
            if let Some(value) = value {
                value.encode(col.value_type, &mut result)?;
            }
        }

        result.resize(4 + capacity as usize, 0);
        Ok(result)
    }

    /// Write the row at the writer's current position
    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
        scheme: &TableScheme,
        capacity: Option<u32>,
    ) -> RecordResult<()> {
        writer.write_all(&self.serialize(scheme, capacity)?)?;
        Ok(())
    }

    fn check_arity(&self, scheme: &TableScheme) -> RecordResult<()> {
        if self.values.len() != scheme.column_count() {
            return Err(RecordError::SchemaMismatch(format!(
                "Expected {} columns, got {}",
                scheme.column_count(),
                self.values.len()
            )));
        }
        Ok(())
    }
}

/// Physical location of a row slot inside a page file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSlot {
    pub row_id: RowId,
    /// Offset of the slot's length field
    pub offset: u64,
    /// Bytes available after the length field
    pub capacity: u32,
}

/// Forward-only navigation over a page's rows.
///
/// Rows are variable-length, so every step is driven by the scheme: fixed
/// columns advance by their width, variable columns by their length prefix.
pub struct RowCursor<'a, S> {
    stream: &'a mut S,
    scheme: &'a TableScheme,
}

impl<'a, S: Read + Seek> RowCursor<'a, S> {
    pub fn new(stream: &'a mut S, scheme: &'a TableScheme) -> Self {
        Self { stream, scheme }
    }

    /// Read the header from offset 0, leaving the cursor on the first row
    pub fn read_header(&mut self) -> RecordResult<PageHeader> {
        self.stream.seek(SeekFrom::Start(0))?;
        PageHeader::read(self.stream)
    }

    /// Position on the first row without decoding the header
    pub fn skip_header(&mut self) -> RecordResult<u64> {
        self.stream.seek(SeekFrom::Start(0))?;
        PageHeader::skip(self.stream)
    }

    /// Decode the next row, `None` at end of page
    pub fn read_row(&mut self) -> RecordResult<Option<PageRow>> {
        let capacity = match read_len_or_eof(self.stream)? {
            Some(capacity) => capacity,
            None => return Ok(None),
        };
        let row_id = read_u32(self.stream).map_err(truncated_row)?;
        let bitmap = self.read_null_bitmap()?;

        let mut consumed = 4 + bitmap.len();
        let mut values = Vec::with_capacity(bitmap.len());
        for (is_null, col) in bitmap.iter().zip(self.scheme.columns()) {
            if *is_null {
                values.push(None);
                continue;
            }
            let limit = (capacity as usize).saturating_sub(consumed);
            let value = Value::decode_within(self.stream, col.value_type, limit)
                .map_err(truncated_row)?;
            consumed += value.encoded_len(col.value_type)?;
            values.push(Some(value));
        }

        self.skip_slack(row_id, capacity, consumed)?;
        trace!("Read row {} ({} bytes)", row_id, capacity);
        Ok(Some(PageRow::new(row_id, values)))
    }

    /// Step over the next row without materialising values
    pub fn skip_row(&mut self) -> RecordResult<Option<RowSlot>> {
        let offset = self.stream.stream_position()?;
        let capacity = match read_len_or_eof(self.stream)? {
            Some(capacity) => capacity,
            None => return Ok(None),
        };
        let row_id = read_u32(self.stream).map_err(truncated_row)?;
        let bitmap = self.read_null_bitmap()?;

        let mut consumed = 4 + bitmap.len();
        for (is_null, col) in bitmap.iter().zip(self.scheme.columns()) {
            if !*is_null {
                consumed += Value::skip(self.stream, col.value_type).map_err(truncated_row)?;
            }
        }

        self.skip_slack(row_id, capacity, consumed)?;
        Ok(Some(RowSlot {
            row_id,
            offset,
            capacity,
        }))
    }

    /// Scan forward from the first row to the slot holding `row_id` and
    /// leave the stream positioned at its start
    pub fn seek_to_row(&mut self, row_id: RowId, header_already_read: bool) -> RecordResult<RowSlot> {
        if !header_already_read {
            self.skip_header()?;
        }

        while let Some(slot) = self.skip_row()? {
            if slot.row_id == row_id {
                self.stream.seek(SeekFrom::Start(slot.offset))?;
                return Ok(slot);
            }
        }

        Err(RecordError::RowNotFound { row_id })
    }

    /// Position at end of file for appends
    pub fn seek_to_end(&mut self) -> RecordResult<u64> {
        Ok(self.stream.seek(SeekFrom::End(0))?)
    }

    fn read_null_bitmap(&mut self) -> RecordResult<Vec<bool>> {
        let mut bitmap = vec![0u8; self.scheme.column_count()];
        self.stream.read_exact(&mut bitmap).map_err(|e| truncated_row(e.into()))?;
        bitmap
            .into_iter()
            .map(|flag| match flag {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(RecordError::Corrupted(format!("Invalid null flag {}", other))),
            })
            .collect()
    }

    fn skip_slack(&mut self, row_id: RowId, capacity: u32, consumed: usize) -> RecordResult<()> {
        let slack = (capacity as i64) - (consumed as i64);
        if slack < 0 {
            return Err(RecordError::Corrupted(format!(
                "Row {} payload of {} bytes overruns its {} byte slot",
                row_id, consumed, capacity
            )));
        }
        if slack > 0 {
            self.stream.seek(SeekFrom::Current(slack))?;
        }
        Ok(())
    }
}

/// Read a row's length field; a clean end of file yields `None`
fn read_len_or_eof<R: Read>(reader: &mut R) -> RecordResult<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    match filled {
        0 => Ok(None),
        4 => Ok(Some(u32::from_le_bytes(buf))),
        _ => Err(RecordError::Corrupted("Truncated row length".to_string())),
    }
}

fn truncated_row(err: RecordError) -> RecordError {
    match err {
        RecordError::Io(e) if e.kind() == ErrorKind::UnexpectedEof => {
            RecordError::Corrupted("Truncated row".to_string())
        }
        other => other,
    }
}
