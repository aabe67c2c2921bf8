//! JSON dump codec
//!
//! ```json
//! {
//!   "format": "takeout-dump",
//!   "version": 1,
//!   "entries": [
//!     { "table": "Items", "columns": ["Id", "Name"], "values": [7, "lamp"] },
//!     { "comment": "Error exporting from Ratings: no such table: Ratings" }
//!   ]
//! }
//! ```
//!
//! Blobs are written as `{"blob": "<base64>"}` so they stay distinct from text.
//! Reals JSON numbers cannot hold become `{"real": "inf"}`, `"-inf"` or `"NaN"`.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Map, Number, json};

use crate::dump::{Dump, DumpEntry, DumpRecord};
use crate::error::{ProtoError, ProtoResult};
use crate::value::Value;

const FORMAT_TAG: &str = "takeout-dump";
const FORMAT_VERSION: u64 = 1;

pub fn to_json(dump: &Dump) -> ProtoResult<Vec<u8>> {
    let entries: Vec<serde_json::Value> = dump
        .entries
        .iter()
        .map(|entry| match entry {
            DumpEntry::Row(record) => json!({
                "table": record.table,
                "columns": record.columns,
                "values": record.values.iter().map(value_to_json).collect::<Vec<_>>(),
            }),
            DumpEntry::Comment(text) => json!({ "comment": text }),
        })
        .collect();

    let doc = json!({
        "format": FORMAT_TAG,
        "version": FORMAT_VERSION,
        "entries": entries,
    });

    let mut bytes = serde_json::to_vec_pretty(&doc)?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn parse_json(bytes: &[u8]) -> ProtoResult<Dump> {
    let doc: serde_json::Value = serde_json::from_slice(bytes)?;

    if doc.get("format").and_then(|f| f.as_str()) != Some(FORMAT_TAG) {
        return Err(ProtoError::InvalidFormat("not a takeout JSON dump".into()));
    }
    match doc.get("version").and_then(|v| v.as_u64()) {
        Some(FORMAT_VERSION) => {}
        other => {
            return Err(ProtoError::InvalidFormat(format!(
                "unsupported dump version {other:?}"
            )));
        }
    }

    let entries = doc
        .get("entries")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProtoError::InvalidFormat("missing entries".into()))?;

    let mut dump = Dump::new();
    for entry in entries {
        if let Some(comment) = entry.get("comment").and_then(|c| c.as_str()) {
            dump.push_comment(comment);
            continue;
        }
        dump.push_row(record_from_json(entry)?);
    }
    Ok(dump)
}

fn record_from_json(entry: &serde_json::Value) -> ProtoResult<DumpRecord> {
    let table = entry
        .get("table")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ProtoError::InvalidFormat("row entry without table".into()))?;
    let columns: Vec<String> = serde_json::from_value(
        entry
            .get("columns")
            .cloned()
            .ok_or_else(|| ProtoError::InvalidFormat(format!("{table}: missing columns")))?,
    )?;
    let values = entry
        .get("values")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProtoError::InvalidFormat(format!("{table}: missing values")))?
        .iter()
        .map(value_from_json)
        .collect::<ProtoResult<Vec<_>>>()?;

    if columns.len() != values.len() {
        return Err(ProtoError::InvalidFormat(format!(
            "{table}: {} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    Ok(DumpRecord::new(table, columns, values))
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(f) => match Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            None => json!({ "real": f.to_string() }),
        },
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Blob(bytes) => {
            let mut obj = Map::new();
            obj.insert("blob".into(), BASE64.encode(bytes).into());
            serde_json::Value::Object(obj)
        }
    }
}

fn value_from_json(value: &serde_json::Value) -> ProtoResult<Value> {
    match value {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                n.as_f64()
                    .map(Value::Real)
                    .ok_or_else(|| ProtoError::InvalidFormat(format!("unrepresentable number {n}")))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_json::Value::Object(obj) => {
            if let Some(real) = obj.get("real").and_then(|r| r.as_str()) {
                return real
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| ProtoError::InvalidFormat(format!("invalid real {real:?}")));
            }
            let b64 = obj
                .get("blob")
                .and_then(|b| b.as_str())
                .ok_or_else(|| ProtoError::InvalidFormat("object value without blob".into()))?;
            Ok(Value::Blob(BASE64.decode(b64)?))
        }
        other => Err(ProtoError::InvalidFormat(format!(
            "unsupported value {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_reparse_preserves_types() {
        let mut dump = Dump::new();
        dump.push_row(DumpRecord::new(
            "Items",
            vec!["a", "b", "c", "d", "e", "f", "g"]
                .into_iter()
                .map(String::from)
                .collect(),
            vec![
                Value::Integer(7),
                Value::Real(1.0),
                Value::Text("NULL".into()),
                Value::Null,
                Value::Blob(vec![0, 1, 2]),
                Value::Real(f64::INFINITY),
                Value::Real(f64::NEG_INFINITY),
            ],
        ));
        dump.push_comment("Error exporting from Ratings: boom");

        let bytes = to_json(&dump).unwrap();
        assert_eq!(parse_json(&bytes).unwrap(), dump);
    }

    #[test]
    fn test_non_finite_reals_are_tagged() {
        assert_eq!(value_to_json(&Value::Real(f64::INFINITY)), json!({ "real": "inf" }));
        assert_eq!(value_to_json(&Value::Real(f64::NEG_INFINITY)), json!({ "real": "-inf" }));
        assert_eq!(value_to_json(&Value::Real(f64::NAN)), json!({ "real": "NaN" }));

        let nan = value_from_json(&json!({ "real": "NaN" })).unwrap();
        assert!(matches!(nan, Value::Real(f) if f.is_nan()));
        assert!(value_from_json(&json!({ "real": "lots" })).is_err());
    }

    #[test]
    fn test_json_rejects_foreign_document() {
        let err = parse_json(br#"{"entries": []}"#).unwrap_err();
        assert!(matches!(err, ProtoError::InvalidFormat(_)));
    }
}
