use crate::error::{InjectorError, Result};
use crate::types::{MotionRecord, RawMotionRecord};
use tracing::{debug, info, warn};

pub trait RecordParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<MotionRecord>>;
}

/// Parser for files holding a JSON array of motion records
/// (`appuserid`, `venueid`, `building`, `floor`, `lat`, `lon`, `devicedate`, `type`).
pub struct MotionRecordParser {
    pub format: &'static str,
}

impl MotionRecordParser {
    pub fn new(format: &'static str) -> Self {
        Self { format }
    }
}

impl RecordParser for MotionRecordParser {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<MotionRecord>> {
        debug!("MotionRecordParser[{}]: start bytes_len={}", self.format, bytes.len());
        let records = parse_records(bytes)?;
        info!("MotionRecordParser[{}]: parsed records count={}", self.format, records.len());
        Ok(records)
    }
}

/// Decodes a whole input file, keeping the records in file order.
///
/// Fails without returning any record as soon as one of them is invalid.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<MotionRecord>> {
    let raw: Vec<RawMotionRecord> =
        serde_json::from_slice(bytes).map_err(|e| InjectorError::MalformedInput(e.to_string()))?;
    raw.into_iter()
        .enumerate()
        .map(|(index, record)| {
            MotionRecord::try_from(record).map_err(|e| {
                let err = InjectorError::InvalidRecord {
                    index,
                    source: Box::new(e),
                };
                warn!("{}", err);
                err
            })
        })
        .collect()
}
