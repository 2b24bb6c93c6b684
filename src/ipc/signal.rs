use serde::{Deserialize, Serialize};

use crate::ipc::SignalError;
use crate::matching::{BitSet, MatchKey};

/// Frame type discriminator, the byte following the length prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignalType {
    ClassMatchingRequest = 1,
    ClassMatchingResponse = 2,
    ClassMatchingRecord = 3,
    Ack = 4,
    Error = 5,
}

impl TryFrom<u8> for SignalType {
    type Error = SignalError;

    fn try_from(value: u8) -> Result<Self, SignalError> {
        match value {
            1 => Ok(SignalType::ClassMatchingRequest),
            2 => Ok(SignalType::ClassMatchingResponse),
            3 => Ok(SignalType::ClassMatchingRecord),
            4 => Ok(SignalType::Ack),
            5 => Ok(SignalType::Error),
            other => Err(SignalError::UnknownType(other)),
        }
    }
}

/// One matching decision: the instrumenter ids matching a class loaded from a class file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassMatchingEntry {
    pub class_name: String,
    pub class_file_url: String,
    pub ids: BitSet,
}

impl ClassMatchingEntry {
    pub fn new(class_name: &str, class_file_url: &str, ids: BitSet) -> Self {
        Self {
            class_name: class_name.to_string(),
            class_file_url: class_file_url.to_string(),
            ids,
        }
    }

    pub fn key(&self) -> MatchKey {
        MatchKey::new(&self.class_name, &self.class_file_url)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// Asks the coordinator for every decision it knows. Carries no payload.
    ClassMatchingRequest,
    ClassMatchingResponse(Vec<ClassMatchingEntry>),
    /// Decisions computed by a child, flushed once on shutdown.
    ClassMatchingRecord(Vec<ClassMatchingEntry>),
    Ack,
    Error(String),
}

impl Signal {
    pub fn signal_type(&self) -> SignalType {
        match self {
            Signal::ClassMatchingRequest => SignalType::ClassMatchingRequest,
            Signal::ClassMatchingResponse(_) => SignalType::ClassMatchingResponse,
            Signal::ClassMatchingRecord(_) => SignalType::ClassMatchingRecord,
            Signal::Ack => SignalType::Ack,
            Signal::Error(_) => SignalType::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_byte_round_trips() {
        for signal in [
            Signal::ClassMatchingRequest,
            Signal::ClassMatchingResponse(Vec::new()),
            Signal::ClassMatchingRecord(Vec::new()),
            Signal::Ack,
            Signal::Error("boom".to_string()),
        ] {
            let kind = signal.signal_type();
            assert_eq!(SignalType::try_from(kind as u8).expect("known type"), kind);
        }
        assert!(matches!(
            SignalType::try_from(0),
            Err(SignalError::UnknownType(0))
        ));
    }
}
