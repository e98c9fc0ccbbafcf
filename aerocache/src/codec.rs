//! Conversion between cached JSON values and record store bins.
//!
//! Values map onto native bin types where one exists. Numbers that do not fit
//! an `Int` or `Float` bin losslessly are stored as a `Blob` holding their
//! JSON encoding, and every `Blob` is decoded back through JSON.

use crate::domain::Bin;
use serde_json::{Map, Number, Value};
use shared::{Error, Result};

pub fn encode(value: &Value) -> Result<Bin> {
    Ok(match value {
        Value::Null => Bin::Nil,
        Value::Bool(b) => Bin::Bool(*b),
        Value::Number(n) => encode_number(n)?,
        Value::String(s) => Bin::Str(s.clone()),
        Value::Array(items) => Bin::List(items.iter().map(encode).collect::<Result<_>>()?),
        Value::Object(map) => Bin::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), encode(v)?)))
                .collect::<Result<_>>()?,
        ),
    })
}

fn encode_number(n: &Number) -> Result<Bin> {
    if let Some(i) = n.as_i64() {
        return Ok(Bin::Int(i));
    }
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            return Ok(Bin::Float(f));
        }
    }
    // u64 above i64::MAX
    serde_json::to_vec(n)
        .map(Bin::Blob)
        .map_err(|e| Error::Serialization(format!("Failed to encode number: {}", e)))
}

pub fn decode(bin: Bin) -> Result<Value> {
    Ok(match bin {
        Bin::Nil => Value::Null,
        Bin::Bool(b) => Value::Bool(b),
        Bin::Int(i) => Value::from(i),
        Bin::Float(f) => Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| Error::Serialization(format!("non-finite float bin: {}", f)))?,
        Bin::Str(s) => Value::String(s),
        Bin::Blob(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| Error::Serialization(format!("Failed to decode blob bin: {}", e)))?,
        Bin::List(items) => Value::Array(items.into_iter().map(decode).collect::<Result<_>>()?),
        Bin::Map(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| Ok((k, decode(v)?)))
                .collect::<Result<Map<String, Value>>>()?,
        ),
    })
}
