use std::collections::HashMap;
use std::fs;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::ipc::serializer::{read_signal, write_signal};
use crate::ipc::signal::{ClassMatchingEntry, Signal};
use crate::ipc::SignalError;
use crate::matching::{BitSet, MatchKey};

/// Store of matching decisions shared by the coordinator's connections.
#[derive(Clone, Debug, Default)]
pub struct MatchingStore {
    entries: Arc<Mutex<HashMap<MatchKey, BitSet>>>,
}

impl MatchingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later records for the same key replace earlier ones.
    pub fn record(&self, entries: Vec<ClassMatchingEntry>) {
        let mut store = self.entries.lock();
        for entry in entries {
            store.insert(entry.key(), entry.ids);
        }
    }

    /// Entries sorted by key, the seed handed to each new child.
    pub fn snapshot(&self) -> Vec<ClassMatchingEntry> {
        let store = self.entries.lock();
        let mut entries: Vec<ClassMatchingEntry> = store
            .iter()
            .map(|(key, ids)| {
                ClassMatchingEntry::new(&key.class_name, &key.class_file_url, ids.clone())
            })
            .collect();
        entries.sort_by(|left, right| {
            let left_key = (&left.class_name, &left.class_file_url);
            left_key.cmp(&(&right.class_name, &right.class_file_url))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn load(&self, path: &Path) -> Result<usize> {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let entries: Vec<ClassMatchingEntry> = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        let count = entries.len();
        self.record(entries);
        Ok(count)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.snapshot())
            .context("failed to serialize snapshot")?;
        fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Answers one signal received from a child.
    pub fn respond(&self, signal: Signal) -> Signal {
        match signal {
            Signal::ClassMatchingRequest => Signal::ClassMatchingResponse(self.snapshot()),
            Signal::ClassMatchingRecord(entries) => {
                debug!(count = entries.len(), "recorded class matching results");
                self.record(entries);
                Signal::Ack
            }
            other => Signal::Error(format!("unexpected signal {:?}", other.signal_type())),
        }
    }
}

/// Coordinator end of the protocol. Connections are served one at a time, each one being a
/// short exchange.
pub struct SignalServer {
    listener: TcpListener,
    store: MatchingStore,
}

impl SignalServer {
    pub fn bind(address: &str, store: MatchingStore) -> Result<Self, SignalError> {
        let listener = TcpListener::bind(address)?;
        Ok(Self { listener, store })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SignalError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn store(&self) -> &MatchingStore {
        &self.store
    }

    /// Serves `rounds` connections, or forever when `None`.
    pub fn serve(&self, rounds: Option<usize>) -> Result<(), SignalError> {
        info!(address = %self.local_addr()?, "signal server listening");
        let mut served = 0;
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(error) = self.handle(stream) {
                        warn!(error = %error, "signal connection failed");
                    }
                }
                Err(error) => warn!(error = %error, "failed to accept signal connection"),
            }
            served += 1;
            if rounds.is_some_and(|rounds| served >= rounds) {
                break;
            }
        }
        Ok(())
    }

    fn handle(&self, mut stream: TcpStream) -> Result<(), SignalError> {
        while let Some(signal) = read_signal(&mut stream)? {
            let response = self.store.respond(signal);
            write_signal(&mut stream, &response)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::ipc::{SignalClientFactory, TcpSignalClientFactory};

    fn entry(name: &str, url: &str, ids: &[usize]) -> ClassMatchingEntry {
        ClassMatchingEntry::new(name, url, ids.iter().copied().collect())
    }

    #[test]
    fn last_record_wins() {
        let store = MatchingStore::new();
        store.record(vec![entry("a.A", "file:/a.jar", &[1])]);
        store.record(vec![entry("a.A", "file:/a.jar", &[2]), entry("b.B", "file:/b.jar", &[])]);

        assert_eq!(
            store.respond(Signal::ClassMatchingRequest),
            Signal::ClassMatchingResponse(vec![
                entry("a.A", "file:/a.jar", &[2]),
                entry("b.B", "file:/b.jar", &[]),
            ])
        );
        assert!(matches!(store.respond(Signal::Ack), Signal::Error(_)));
    }

    #[test]
    fn snapshot_survives_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("matching.json");
        let store = MatchingStore::new();
        store.record(vec![entry("com.foo.Bar", "file:/app.jar", &[1, 3])]);
        store.save(&path).expect("save");

        let restored = MatchingStore::new();
        assert_eq!(restored.load(&path).expect("load"), 1);
        assert_eq!(restored.snapshot(), store.snapshot());
    }

    #[test]
    fn serves_requests_and_records_over_tcp() {
        let store = MatchingStore::new();
        store.record(vec![entry("com.foo.Bar", "file:/app.jar", &[1])]);
        let server = SignalServer::bind("127.0.0.1:0", store.clone()).expect("bind");
        let address = server.local_addr().expect("address").to_string();
        let handle = thread::spawn(move || server.serve(Some(2)));

        let factory = TcpSignalClientFactory::new(address);
        let response = factory
            .create()
            .expect("connect")
            .send(&Signal::ClassMatchingRequest)
            .expect("request");
        assert_eq!(
            response,
            Signal::ClassMatchingResponse(vec![entry("com.foo.Bar", "file:/app.jar", &[1])])
        );
        let ack = factory
            .create()
            .expect("connect")
            .send(&Signal::ClassMatchingRecord(vec![entry("x.Y", "file:/y.jar", &[4])]))
            .expect("record");
        assert_eq!(ack, Signal::Ack);

        handle.join().expect("server thread").expect("serve");
        assert_eq!(store.len(), 2);
    }
}
