//! Compaction-log blobs (§4.3 step 6): a small JSON record pairing the set
//! of index blobs a compaction consumed with the one it produced, so a
//! concurrent reader can recognize and skip superseded inputs (the
//! visibility rule) without needing a lock.

use serde::{Deserialize, Serialize};

use pvault_api_types::{CoreError, ErrorKind};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CompactionLog {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl CompactionLog {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CompactionLog serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoreError::wrap(ErrorKind::Corrupted, "invalid compaction log json", e.into()))
    }

    /// Whether every output this log names is present in `available_ids`,
    /// i.e. the compaction it describes fully succeeded and its inputs may
    /// be treated as superseded.
    pub fn is_fully_applied(&self, available_ids: &std::collections::HashSet<String>) -> bool {
        self.outputs.iter().all(|id| available_ids.contains(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn round_trips_through_json() {
        let log = CompactionLog {
            inputs: vec!["n1".into(), "n2".into()],
            outputs: vec!["n3".into()],
        };
        let decoded = CompactionLog::decode(&log.encode()).unwrap();
        assert_eq!(decoded.inputs, log.inputs);
        assert_eq!(decoded.outputs, log.outputs);
    }

    #[test]
    fn fully_applied_requires_every_output_present() {
        let log = CompactionLog {
            inputs: vec!["n1".into()],
            outputs: vec!["n2".into(), "n3".into()],
        };
        let mut available: HashSet<String> = HashSet::new();
        available.insert("n2".to_string());
        assert!(!log.is_fully_applied(&available));
        available.insert("n3".to_string());
        assert!(log.is_fully_applied(&available));
    }
}
