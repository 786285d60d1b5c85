//! Block-count extraction from GGUF model files.
//!
//! The transformer layer count proxies the per-layer memory cost when
//! estimating how many layers fit on the GPU, and it has to be known before
//! the model is loaded. Extraction tries three strategies in order:
//! a structured walk of the GGUF key/value section, a raw scan of the file
//! prefix for known metadata keys, and finally inference from the largest
//! decimal number embedded in any tensor name.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Metadata keys that carry the layer count, in priority order.
const BLOCK_COUNT_KEYS: &[&str] = &[
    "llama.block_count",
    "llama.layer_count",
    "llama.n_layer",
    "qwen.block_count",
    "qwen2.block_count",
    "block_count",
];

/// The metadata section lives at the front of the file; 8 MiB is enough for
/// every model seen in the wild.
const SCAN_BYTES: usize = 8 * 1024 * 1024;

const GGUF_MAGIC: &[u8; 4] = b"GGUF";

// GGUF metadata value type tags.
const T_UINT8: u32 = 0;
const T_INT8: u32 = 1;
const T_UINT16: u32 = 2;
const T_INT16: u32 = 3;
const T_UINT32: u32 = 4;
const T_INT32: u32 = 5;
const T_FLOAT32: u32 = 6;
const T_BOOL: u32 = 7;
const T_STRING: u32 = 8;
const T_ARRAY: u32 = 9;
const T_UINT64: u32 = 10;
const T_INT64: u32 = 11;
const T_FLOAT64: u32 = 12;

/// Returns the model's transformer block count, or `None` when it cannot be
/// determined.
pub fn extract_block_count(model_path: &Path) -> Option<u32> {
    let prefix = read_prefix(model_path)?;

    if let Some(count) = parse_structured(&prefix) {
        return Some(count);
    }
    scan_prefix(&prefix)
}

fn read_prefix(model_path: &Path) -> Option<Vec<u8>> {
    let mut file = File::open(model_path).ok()?;
    let mut buffer = Vec::with_capacity(SCAN_BYTES.min(1024 * 1024));
    file.by_ref()
        .take(SCAN_BYTES as u64)
        .read_to_end(&mut buffer)
        .ok()?;
    if buffer.is_empty() {
        return None;
    }
    Some(buffer)
}

/// Byte cursor over the buffered file prefix. Every read is bounds-checked
/// because the prefix may truncate the metadata section.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        if end > self.data.len() {
            return None;
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Some(slice)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_string(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u64()?;
        self.take(usize::try_from(len).ok()?)
    }

    /// Reads a scalar value of the given type, returning a numeric value
    /// when the type is an integer.
    fn read_scalar(&mut self, value_type: u32) -> Option<Option<u64>> {
        match value_type {
            T_UINT8 | T_INT8 | T_BOOL => self.take(1).map(|b| Some(u64::from(b[0]))),
            T_UINT16 | T_INT16 => self
                .take(2)
                .map(|b| Some(u64::from(u16::from_le_bytes(b.try_into().unwrap())))),
            T_UINT32 | T_INT32 => self.read_u32().map(|v| Some(u64::from(v))),
            T_FLOAT32 => self.take(4).map(|_| None),
            T_UINT64 | T_INT64 => self.read_u64().map(Some),
            T_FLOAT64 => self.take(8).map(|_| None),
            T_STRING => self.read_string().map(|_| None),
            _ => None,
        }
    }

    /// Skips (or reads) any metadata value, returning the numeric payload
    /// for integer scalars.
    fn read_value(&mut self, value_type: u32) -> Option<Option<u64>> {
        if value_type != T_ARRAY {
            return self.read_scalar(value_type);
        }
        let elem_type = self.read_u32()?;
        let count = self.read_u64()?;
        for _ in 0..count {
            self.read_value(elem_type)?;
        }
        Some(None)
    }
}

/// Walks the GGUF header: magic, version, tensor count, key/value section,
/// then tensor descriptors. Returns the block count from metadata, or
/// infers it from tensor names.
fn parse_structured(data: &[u8]) -> Option<u32> {
    let mut cursor = Cursor::new(data);

    if cursor.take(4)? != GGUF_MAGIC.as_slice() {
        return None;
    }
    let version = cursor.read_u32()?;
    if !(2..=3).contains(&version) {
        return None;
    }
    let tensor_count = cursor.read_u64()?;
    let kv_count = cursor.read_u64()?;

    let mut found: Option<(usize, u64)> = None;
    for _ in 0..kv_count {
        let key = cursor.read_string()?;
        let value_type = cursor.read_u32()?;
        let value = cursor.read_value(value_type)?;

        if let Some(number) = value {
            if let Some(priority) = BLOCK_COUNT_KEYS.iter().position(|k| k.as_bytes() == key) {
                if found.map(|(p, _)| priority < p).unwrap_or(true) {
                    found = Some((priority, number));
                }
            }
        }
    }
    if let Some((_, number)) = found {
        return u32::try_from(number).ok().filter(|&n| n > 0);
    }

    infer_from_tensor_names(&mut cursor, tensor_count)
}

/// Tensor names look like `blk.31.attn_q.weight`; the largest embedded
/// number plus one is the layer count.
fn infer_from_tensor_names(cursor: &mut Cursor<'_>, tensor_count: u64) -> Option<u32> {
    let mut max_layer: Option<u32> = None;
    for _ in 0..tensor_count {
        let name = cursor.read_string()?;
        if let Some(layer) = max_number_in(name) {
            max_layer = Some(max_layer.map_or(layer, |current| current.max(layer)));
        }
        let n_dims = cursor.read_u32()?;
        for _ in 0..n_dims {
            cursor.read_u64()?;
        }
        cursor.read_u32()?; // tensor data type
        cursor.read_u64()?; // data offset
    }
    max_layer.map(|layer| layer + 1)
}

fn max_number_in(name: &[u8]) -> Option<u32> {
    let mut best: Option<u32> = None;
    let mut current: Option<u32> = None;
    for &byte in name {
        if byte.is_ascii_digit() {
            let digit = u32::from(byte - b'0');
            current = Some(current.unwrap_or(0).saturating_mul(10).saturating_add(digit));
        } else {
            if let Some(value) = current.take() {
                best = Some(best.map_or(value, |b| b.max(value)));
            }
        }
    }
    if let Some(value) = current {
        best = Some(best.map_or(value, |b| b.max(value)));
    }
    best
}

/// Fallback for files whose header does not parse: searches the raw prefix
/// for a known key laid out as a length-prefixed GGUF record (`u64` length,
/// key bytes, `u32` type tag, value).
fn scan_prefix(data: &[u8]) -> Option<u32> {
    for key in BLOCK_COUNT_KEYS {
        let key_bytes = key.as_bytes();
        let mut search_from = 0;
        while let Some(found) = find_from(data, key_bytes, search_from) {
            if let Some(value) = parse_record_at(data, found, key_bytes) {
                return Some(value);
            }
            search_from = found + 1;
        }
    }
    None
}

fn find_from(data: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() || needle.is_empty() {
        return None;
    }
    data[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| from + pos)
}

fn parse_record_at(data: &[u8], key_pos: usize, key: &[u8]) -> Option<u32> {
    if key_pos < 8 {
        return None;
    }
    let declared_len = u64::from_le_bytes(data[key_pos - 8..key_pos].try_into().unwrap());
    if declared_len != key.len() as u64 {
        return None;
    }

    let type_offset = key_pos + key.len();
    let value_offset = type_offset + 4;
    if value_offset > data.len() {
        return None;
    }
    let value_type = u32::from_le_bytes(data[type_offset..value_offset].try_into().unwrap());
    let available = &data[value_offset..];

    let number = match value_type {
        T_UINT32 | T_INT32 if available.len() >= 4 => {
            u64::from(u32::from_le_bytes(available[..4].try_into().unwrap()))
        }
        T_UINT64 | T_INT64 if available.len() >= 8 => {
            u64::from_le_bytes(available[..8].try_into().unwrap())
        }
        _ => return None,
    };
    u32::try_from(number).ok().filter(|&n| n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn push_string(out: &mut Vec<u8>, value: &str) {
        out.extend_from_slice(&(value.len() as u64).to_le_bytes());
        out.extend_from_slice(value.as_bytes());
    }

    fn push_u32_kv(out: &mut Vec<u8>, key: &str, value: u32) {
        push_string(out, key);
        out.extend_from_slice(&T_UINT32.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn push_string_kv(out: &mut Vec<u8>, key: &str, value: &str) {
        push_string(out, key);
        out.extend_from_slice(&T_STRING.to_le_bytes());
        push_string(out, value);
    }

    fn push_tensor(out: &mut Vec<u8>, name: &str) {
        push_string(out, name);
        out.extend_from_slice(&2u32.to_le_bytes()); // n_dims
        out.extend_from_slice(&16u64.to_le_bytes());
        out.extend_from_slice(&16u64.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // dtype
        out.extend_from_slice(&0u64.to_le_bytes()); // offset
    }

    fn gguf_header(tensor_count: u64, kv_count: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(GGUF_MAGIC);
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&tensor_count.to_le_bytes());
        out.extend_from_slice(&kv_count.to_le_bytes());
        out
    }

    fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_structured_block_count_key() {
        let mut bytes = gguf_header(0, 2);
        push_string_kv(&mut bytes, "general.architecture", "llama");
        push_u32_kv(&mut bytes, "llama.block_count", 32);

        let file = write_temp(&bytes);
        assert_eq!(extract_block_count(file.path()), Some(32));
    }

    #[test]
    fn test_structured_key_priority_order() {
        let mut bytes = gguf_header(0, 2);
        push_u32_kv(&mut bytes, "block_count", 99);
        push_u32_kv(&mut bytes, "llama.block_count", 24);

        let file = write_temp(&bytes);
        // llama.block_count wins even though the generic key comes first.
        assert_eq!(extract_block_count(file.path()), Some(24));
    }

    #[test]
    fn test_inferred_from_tensor_names() {
        let mut bytes = gguf_header(3, 1);
        push_string_kv(&mut bytes, "general.architecture", "llama");
        push_tensor(&mut bytes, "blk.0.attn_q.weight");
        push_tensor(&mut bytes, "blk.47.ffn_down.weight");
        push_tensor(&mut bytes, "output_norm.weight");

        let file = write_temp(&bytes);
        assert_eq!(extract_block_count(file.path()), Some(48));
    }

    #[test]
    fn test_prefix_scan_without_valid_header() {
        // No GGUF magic, but a well-formed length-prefixed record embedded
        // in the noise.
        let mut bytes = vec![0xAB; 64];
        let key = "qwen2.block_count";
        bytes.extend_from_slice(&(key.len() as u64).to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes.extend_from_slice(&T_UINT32.to_le_bytes());
        bytes.extend_from_slice(&28u32.to_le_bytes());

        let file = write_temp(&bytes);
        assert_eq!(extract_block_count(file.path()), Some(28));
    }

    #[test]
    fn test_array_values_are_skipped() {
        let mut bytes = gguf_header(0, 2);
        // An array kv before the interesting key must be skipped cleanly.
        push_string(&mut bytes, "tokenizer.ggml.tokens");
        bytes.extend_from_slice(&T_ARRAY.to_le_bytes());
        bytes.extend_from_slice(&T_STRING.to_le_bytes());
        bytes.extend_from_slice(&3u64.to_le_bytes());
        push_string(&mut bytes, "a");
        push_string(&mut bytes, "b");
        push_string(&mut bytes, "c");
        push_u32_kv(&mut bytes, "llama.n_layer", 16);

        let file = write_temp(&bytes);
        assert_eq!(extract_block_count(file.path()), Some(16));
    }

    #[test]
    fn test_unreadable_file_yields_none() {
        let file = write_temp(b"not a model");
        assert_eq!(extract_block_count(file.path()), None);
        assert_eq!(extract_block_count(Path::new("/nonexistent/model.gguf")), None);
    }
}
