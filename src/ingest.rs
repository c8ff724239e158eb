// Record ingestion from JSON arrays and JSON-lines files.
//
// Each record is parsed on its own. A line that isn't JSON, a record with a
// missing field, or a score outside 1..=5 rejects only that record; the rest
// of the file still goes to the batch.

use serde_json::Value;
use tracing::warn;

use crate::db::models::EvaluationRecord;
use crate::error::PipelineError;
use crate::pipeline::FailedRecord;

/// Score fields as they appear on the wire.
const SCORE_FIELDS: [&str; 4] = ["satisfaction", "contenu", "logistique", "applicabilite"];

/// Records that parsed, plus the ones rejected on the way in.
#[derive(Debug, Default)]
pub struct Ingested {
    pub records: Vec<EvaluationRecord>,
    pub rejected: Vec<FailedRecord>,
}

/// Parse a JSON array of records, or JSON lines when the input doesn't
/// start with `[`. Only a malformed top-level array fails as a whole.
pub fn parse_records(raw: &str) -> anyhow::Result<Ingested> {
    let mut ingested = Ingested::default();

    if raw.trim_start().starts_with('[') {
        let items: Vec<Value> = serde_json::from_str(raw)?;
        for (i, item) in items.into_iter().enumerate() {
            ingested.push(parse_value(item, &format!("item {}", i + 1)));
        }
        return Ok(ingested);
    }

    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let position = format!("line {}", i + 1);
        let parsed = serde_json::from_str::<Value>(line)
            .map_err(|e| FailedRecord {
                id: position.clone(),
                reason: format!("not valid JSON: {e}"),
            })
            .and_then(|value| parse_value(value, &position));
        ingested.push(parsed);
    }
    Ok(ingested)
}

impl Ingested {
    fn push(&mut self, parsed: Result<EvaluationRecord, FailedRecord>) {
        match parsed {
            Ok(record) => self.records.push(record),
            Err(failed) => {
                warn!(record_id = %failed.id, reason = %failed.reason, "Record rejected at ingestion");
                self.rejected.push(failed);
            }
        }
    }
}

/// Turn one JSON value into a record. Failures are named by the record id
/// when it has one, otherwise by its position in the input.
fn parse_value(value: Value, position: &str) -> Result<EvaluationRecord, FailedRecord> {
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .unwrap_or(position)
        .to_string();

    // Range-check scores before deserializing, so 300 is reported against
    // its field instead of as a u8 overflow.
    for field in SCORE_FIELDS {
        if let Some(score) = value.get(field).and_then(Value::as_i64) {
            if !(1..=5).contains(&score) {
                let err = PipelineError::validation(
                    &id,
                    field,
                    format!("must be between 1 and 5, got {score}"),
                );
                return Err(FailedRecord::new(&id, &err));
            }
        }
    }

    serde_json::from_value(value).map_err(|e| FailedRecord {
        reason: format!("invalid record: {e}"),
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, satisfaction: i64) -> String {
        format!(
            r#"{{"id":"{id}","formation_id":"F1","type_formation":"bureautique","formateur_id":"T1","satisfaction":{satisfaction},"contenu":4,"logistique":4,"applicabilite":4,"commentaire":"Formation utile","langue":"FR","date":"2025-03-10"}}"#
        )
    }

    #[test]
    fn test_json_lines_keep_going_after_bad_line() {
        let raw = format!("{}\nnot json at all\n\n{}\n", line("r1", 4), line("r3", 5));
        let ingested = parse_records(&raw).unwrap();

        let ids: Vec<&str> = ingested.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);
        assert_eq!(ingested.rejected.len(), 1);
        assert_eq!(ingested.rejected[0].id, "line 2");
    }

    #[test]
    fn test_out_of_range_score_names_its_field() {
        let raw = format!("{}\n{}\n", line("r1", 4), line("r2", 300));
        let ingested = parse_records(&raw).unwrap();

        assert_eq!(ingested.records.len(), 1);
        assert_eq!(ingested.rejected[0].id, "r2");
        assert!(ingested.rejected[0].reason.contains("satisfaction"));
        assert!(ingested.rejected[0].reason.contains("300"));
    }

    #[test]
    fn test_missing_field_rejects_only_that_record() {
        let raw = format!(
            "[{}, {{\"id\": \"r2\", \"satisfaction\": 3}}]",
            line("r1", 4)
        );
        let ingested = parse_records(&raw).unwrap();

        assert_eq!(ingested.records.len(), 1);
        assert_eq!(ingested.rejected[0].id, "r2");
        assert!(ingested.rejected[0].reason.contains("invalid record"));
    }

    #[test]
    fn test_array_item_without_id_is_named_by_position() {
        let raw = format!("[{}, {{\"satisfaction\": 3}}]", line("r1", 4));
        let ingested = parse_records(&raw).unwrap();
        assert_eq!(ingested.rejected[0].id, "item 2");
    }

    #[test]
    fn test_broken_array_fails_whole_file() {
        assert!(parse_records("[{\"id\": ").is_err());
    }
}
