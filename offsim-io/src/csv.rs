//! Event CSV format: header `slot,clientId,event,size,amount,recipients`.
//!
//! `Pull` rows leave `size`/`amount`/`recipients` empty; `new-tx` rows carry
//! all three, with `recipients` a space-separated list of client ids.

use crate::error::CsvError;
use offsim_types::ClientId;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvEvent {
    Pull { slot: u64, client_id: ClientId },
    NewTx { slot: u64, client_id: ClientId, size: u64, amount: i64, recipients: Vec<ClientId> },
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    slot: u64,
    #[serde(rename = "clientId")]
    client_id: u32,
    event: String,
    size: Option<u64>,
    amount: Option<i64>,
    recipients: Option<String>,
}

fn format_recipients(recipients: &[ClientId]) -> String {
    recipients.iter().map(|r| r.as_u32().to_string()).collect::<Vec<_>>().join(" ")
}

fn parse_recipients(row_number: u64, field: &str) -> Result<Vec<ClientId>, CsvError> {
    field
        .split_whitespace()
        .map(|tok| tok.parse::<u32>().map(ClientId::new).map_err(|_| CsvError::InvalidRecipient { row: row_number, value: tok.to_string() }))
        .collect()
}

impl CsvEvent {
    fn to_row(&self) -> CsvRow {
        match self {
            CsvEvent::Pull { slot, client_id } => {
                CsvRow { slot: *slot, client_id: client_id.as_u32(), event: "pull".to_string(), size: None, amount: None, recipients: None }
            }
            CsvEvent::NewTx { slot, client_id, size, amount, recipients } => CsvRow {
                slot: *slot,
                client_id: client_id.as_u32(),
                event: "new-tx".to_string(),
                size: Some(*size),
                amount: Some(*amount),
                recipients: Some(format_recipients(recipients)),
            },
        }
    }

    fn from_row(row_number: u64, row: CsvRow) -> Result<Self, CsvError> {
        match row.event.as_str() {
            "pull" => Ok(CsvEvent::Pull { slot: row.slot, client_id: ClientId::new(row.client_id) }),
            "new-tx" => {
                let size = row.size.ok_or(CsvError::MissingField { row: row_number, field: "size" })?;
                let amount = row.amount.ok_or(CsvError::MissingField { row: row_number, field: "amount" })?;
                let recipients = match row.recipients.as_deref() {
                    Some(field) if !field.is_empty() => parse_recipients(row_number, field)?,
                    _ => Vec::new(),
                };
                Ok(CsvEvent::NewTx { slot: row.slot, client_id: ClientId::new(row.client_id), size, amount, recipients })
            }
            other => Err(CsvError::UnknownEventKind { row: row_number, kind: other.to_string() }),
        }
    }
}

/// Formats a single event as one CSV line (no header), for the round-trip
/// property and for hand-inspecting individual events.
pub fn format_event(event: &CsvEvent) -> String {
    let mut writer = ::csv::WriterBuilder::new().has_headers(false).from_writer(vec![]);
    writer.serialize(event.to_row()).expect("a CsvRow always serializes");
    String::from_utf8(writer.into_inner().expect("writer buffer flushes")).expect("csv output is valid utf8")
}

/// Parses one CSV line (no header) back into an event.
pub fn parse_event(line: &str) -> Result<CsvEvent, CsvError> {
    let mut reader = ::csv::ReaderBuilder::new().has_headers(false).flexible(true).from_reader(line.as_bytes());
    let row: CsvRow = reader.deserialize().next().ok_or_else(|| CsvError::UnknownEventKind { row: 1, kind: "<empty row>".to_string() })??;
    CsvEvent::from_row(1, row)
}

pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<CsvEvent>, CsvError> {
    let mut reader = ::csv::ReaderBuilder::new().has_headers(true).flexible(true).from_path(path)?;
    reader.deserialize::<CsvRow>().enumerate().map(|(i, row)| CsvEvent::from_row(i as u64 + 1, row?)).collect()
}

pub fn write_events(path: impl AsRef<Path>, events: &[CsvEvent]) -> Result<(), CsvError> {
    let mut writer = ::csv::WriterBuilder::new().has_headers(true).from_path(path)?;
    for event in events {
        writer.serialize(event.to_row())?;
    }
    writer.flush().map_err(|e| CsvError::Csv(e.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_pull_event_round_trips_through_format_and_parse() {
        let event = CsvEvent::Pull { slot: 3, client_id: ClientId::new(7) };
        assert_eq!(parse_event(&format_event(&event)).unwrap(), event);
    }

    #[test]
    fn a_new_tx_event_round_trips_through_format_and_parse() {
        let event = CsvEvent::NewTx { slot: 12, client_id: ClientId::new(1), size: 512, amount: 4_000, recipients: vec![ClientId::new(2), ClientId::new(3)] };
        assert_eq!(parse_event(&format_event(&event)).unwrap(), event);
    }

    #[test]
    fn a_new_tx_event_with_no_recipients_round_trips() {
        let event = CsvEvent::NewTx { slot: 0, client_id: ClientId::new(0), size: 64, amount: 1, recipients: vec![] };
        assert_eq!(parse_event(&format_event(&event)).unwrap(), event);
    }

    #[test]
    fn reading_an_unknown_event_kind_is_a_parse_error() {
        let err = parse_event("0,0,frobnicate,,,\n");
        assert!(matches!(err, Err(CsvError::UnknownEventKind { .. })));
    }
}
