//! Row codec: little-endian, column-major, fixed layout per schema.
//!
//! Layout: a 4-byte null bitmap (low bit = column 0), then each column in
//! schema order — INT as 4 bytes, FLOAT as 8 bytes, VARCHAR as a 4-byte
//! length prefix followed by exactly the declared capacity (bytes past the
//! length are zero padding).

use super::error::{RecordError, RecordResult};
use super::schema::{NULL_BITMAP_BYTES, TableSchema};
use super::value::{DataType, Value, truncate_to_capacity};

/// Serialize a row. Values must already be coerced to the column types;
/// over-long VARCHAR values are truncated.
pub fn encode_row(values: &[Value], schema: &TableSchema) -> RecordResult<Vec<u8>> {
    schema.validate_row(values)?;

    let mut buf = vec![0u8; schema.row_size()];

    let mut bitmap: u32 = 0;
    for (i, value) in values.iter().enumerate() {
        if value.is_null() && i < 32 {
            bitmap |= 1 << i;
        }
    }
    buf[..NULL_BITMAP_BYTES].copy_from_slice(&bitmap.to_le_bytes());

    let mut offset = NULL_BITMAP_BYTES;
    for (value, col) in values.iter().zip(&schema.columns) {
        match (&col.data_type, value) {
            (DataType::Int, Value::Int(v)) => {
                buf[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
            }
            (DataType::Float, Value::Float(v)) => {
                buf[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
            }
            (DataType::Varchar(cap), Value::String(s)) => {
                let text = truncate_to_capacity(s, *cap);
                buf[offset..offset + 4].copy_from_slice(&(text.len() as u32).to_le_bytes());
                buf[offset + 4..offset + 4 + text.len()].copy_from_slice(text.as_bytes());
            }
            (_, Value::Null) => {
                // nulls leave zeroed bytes in place
            }
            (dt, v) => {
                return Err(RecordError::Encoding(format!(
                    "value {:?} does not fit column type {}",
                    v, dt
                )));
            }
        }
        offset += col.size();
    }

    Ok(buf)
}

/// Deserialize a row. `bytes` may carry trailing padding past the schema's
/// row size (record spans are word-aligned on the page).
pub fn decode_row(bytes: &[u8], schema: &TableSchema) -> RecordResult<Vec<Value>> {
    if bytes.len() < schema.row_size() {
        return Err(RecordError::Decoding(format!(
            "expected at least {} bytes, got {}",
            schema.row_size(),
            bytes.len()
        )));
    }

    let bitmap = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);

    let mut values = Vec::with_capacity(schema.column_count());
    let mut offset = NULL_BITMAP_BYTES;
    for (i, col) in schema.columns.iter().enumerate() {
        let is_null = i < 32 && (bitmap >> i) & 1 == 1;
        if is_null {
            values.push(Value::Null);
            offset += col.size();
            continue;
        }

        let value = match &col.data_type {
            DataType::Int => Value::Int(i32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ])),
            DataType::Float => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[offset..offset + 8]);
                Value::Float(f64::from_le_bytes(raw))
            }
            DataType::Varchar(cap) => {
                let len = u32::from_le_bytes([
                    bytes[offset],
                    bytes[offset + 1],
                    bytes[offset + 2],
                    bytes[offset + 3],
                ]) as usize;
                if len > *cap {
                    return Err(RecordError::Decoding(format!(
                        "string length {} exceeds capacity {} in column {}",
                        len, cap, col.name
                    )));
                }
                let raw = &bytes[offset + 4..offset + 4 + len];
                let text = std::str::from_utf8(raw)
                    .map_err(|e| RecordError::Decoding(format!("invalid UTF-8: {}", e)))?;
                Value::String(text.to_string())
            }
        };
        values.push(value);
        offset += col.size();
    }

    Ok(values)
}
