//! Typed index keys. Every tree stores exactly one key kind, fixed at
//! creation; keys of different kinds are never compared.

use std::cmp::Ordering;

use crate::record::{DataType, Value, truncate_to_capacity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Int = 0,
    Float = 1,
    Varchar = 2,
}

impl KeyKind {
    pub fn as_word(self) -> u32 {
        self as u32
    }

    pub fn from_word(word: u32) -> Option<KeyKind> {
        match word {
            0 => Some(KeyKind::Int),
            1 => Some(KeyKind::Float),
            2 => Some(KeyKind::Varchar),
            _ => None,
        }
    }

    /// Key kind and VARCHAR key length for an indexed column type.
    pub fn from_data_type(data_type: &DataType) -> (KeyKind, usize) {
        match data_type {
            DataType::Int => (KeyKind::Int, 0),
            DataType::Float => (KeyKind::Float, 0),
            DataType::Varchar(n) => (KeyKind::Varchar, *n),
        }
    }
}

/// Word footprint of one key: 1 for INT/FLOAT, length word plus padded
/// bytes for VARCHAR.
pub fn key_word_footprint(kind: KeyKind, key_len: usize) -> usize {
    match kind {
        KeyKind::Int | KeyKind::Float => 1,
        KeyKind::Varchar => 1 + key_len.div_ceil(4),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexKey {
    Int(i32),
    Float(f32),
    Str(String),
}

impl IndexKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            IndexKey::Int(_) => KeyKind::Int,
            IndexKey::Float(_) => KeyKind::Float,
            IndexKey::Str(_) => KeyKind::Varchar,
        }
    }

    /// Build a key of the given kind from a row value. Null never produces
    /// a key; integers promote into FLOAT-keyed trees.
    pub fn from_value(value: &Value, kind: KeyKind, key_len: usize) -> Option<IndexKey> {
        match (value, kind) {
            (Value::Int(v), KeyKind::Int) => Some(IndexKey::Int(*v)),
            (Value::Float(v), KeyKind::Float) => Some(IndexKey::Float(*v as f32)),
            (Value::Int(v), KeyKind::Float) => Some(IndexKey::Float(*v as f32)),
            (Value::String(s), KeyKind::Varchar) => {
                Some(IndexKey::Str(truncate_to_capacity(s, key_len).to_string()))
            }
            _ => None,
        }
    }

    /// INT and FLOAT order numerically, VARCHAR byte-lexicographically.
    /// Keys within one tree always share a kind; the cross-kind arm exists
    /// only to keep the order total.
    pub fn compare(&self, other: &IndexKey) -> Ordering {
        match (self, other) {
            (IndexKey::Int(a), IndexKey::Int(b)) => a.cmp(b),
            (IndexKey::Float(a), IndexKey::Float(b)) => a.total_cmp(b),
            (IndexKey::Str(a), IndexKey::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => (self.kind() as u32).cmp(&(other.kind() as u32)),
        }
    }
}
