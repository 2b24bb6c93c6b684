use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ipc::{ClassMatchingEntry, Signal, SignalClientFactory, SignalError};
use crate::matching::{BitSet, ClassMatchingCache, MatchKey};

/// How classes served from the JDK runtime image (`jrt:` URLs) are cached. Their URLs do not
/// change between JDK versions while their content does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JrtPolicy {
    /// Neither look up nor record runtime image classes.
    #[default]
    Skip,
    Cache,
}

impl JrtPolicy {
    fn accepts(self, class_file_url: &str) -> bool {
        self == JrtPolicy::Cache || !class_file_url.starts_with("jrt:")
    }
}

/// Matching cache of a child process. The seed fetched from the coordinator at start is
/// read-only; new results are queued and sent back in one batch on [`shutdown`].
///
/// [`shutdown`]: ClassMatchingCache::shutdown
pub struct ParentClassMatchingCache {
    factory: Arc<dyn SignalClientFactory>,
    seed: HashMap<MatchKey, BitSet>,
    records: SegQueue<ClassMatchingEntry>,
    jrt_policy: JrtPolicy,
}

impl ParentClassMatchingCache {
    pub fn new(factory: Arc<dyn SignalClientFactory>) -> Self {
        Self::with_jrt_policy(factory, JrtPolicy::default())
    }

    pub fn with_jrt_policy(factory: Arc<dyn SignalClientFactory>, jrt_policy: JrtPolicy) -> Self {
        let seed = match fetch_seed(factory.as_ref()) {
            Ok(seed) => seed,
            Err(error) => {
                debug!(error = %error, "failed to fetch class matching results");
                HashMap::new()
            }
        };
        debug!(entries = seed.len(), "seeded class matching cache");
        Self {
            factory,
            seed,
            records: SegQueue::new(),
            jrt_policy,
        }
    }

    pub fn seed_len(&self) -> usize {
        self.seed.len()
    }

    fn flush(&self, entries: Vec<ClassMatchingEntry>) -> Result<(), SignalError> {
        let mut client = self.factory.create()?;
        match client.send(&Signal::ClassMatchingRecord(entries))? {
            Signal::Ack => Ok(()),
            other => Err(SignalError::UnexpectedResponse(other.signal_type())),
        }
    }
}

fn fetch_seed(factory: &dyn SignalClientFactory) -> Result<HashMap<MatchKey, BitSet>, SignalError> {
    let mut client = factory.create()?;
    match client.send(&Signal::ClassMatchingRequest)? {
        Signal::ClassMatchingResponse(entries) => Ok(entries
            .into_iter()
            .map(|entry| (entry.key(), entry.ids))
            .collect()),
        other => Err(SignalError::UnexpectedResponse(other.signal_type())),
    }
}

impl ClassMatchingCache for ParentClassMatchingCache {
    fn get_recorded_matching_result(
        &self,
        class_name: &str,
        class_file_url: &str,
    ) -> Option<BitSet> {
        if !self.jrt_policy.accepts(class_file_url) {
            return None;
        }
        self.seed
            .get(&MatchKey::new(class_name, class_file_url))
            .cloned()
    }

    fn record_matching_result(&self, class_name: &str, class_file_url: &str, ids: &BitSet) {
        if !self.jrt_policy.accepts(class_file_url) {
            return;
        }
        self.records
            .push(ClassMatchingEntry::new(class_name, class_file_url, ids.clone()));
    }

    fn shutdown(&self) {
        let mut entries = Vec::with_capacity(self.records.len());
        while let Some(entry) = self.records.pop() {
            entries.push(entry);
        }
        if entries.is_empty() {
            return;
        }
        let count = entries.len();
        match self.flush(entries) {
            Ok(()) => debug!(count, "flushed class matching results"),
            Err(error) => debug!(error = %error, count, "failed to flush class matching results"),
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::ipc::SignalClient;

    #[derive(Default)]
    struct FakeCoordinator {
        seed: Vec<ClassMatchingEntry>,
        sent: Mutex<Vec<Signal>>,
        unreachable: bool,
    }

    struct FakeClient {
        coordinator: Arc<FakeCoordinator>,
    }

    impl SignalClient for FakeClient {
        fn send(&mut self, signal: &Signal) -> Result<Signal, SignalError> {
            self.coordinator.sent.lock().push(signal.clone());
            Ok(match signal {
                Signal::ClassMatchingRequest => {
                    Signal::ClassMatchingResponse(self.coordinator.seed.clone())
                }
                _ => Signal::Ack,
            })
        }
    }

    struct FakeFactory(Arc<FakeCoordinator>);

    impl SignalClientFactory for FakeFactory {
        fn create(&self) -> Result<Box<dyn SignalClient>, SignalError> {
            if self.0.unreachable {
                return Err(SignalError::ConnectionClosed);
            }
            Ok(Box::new(FakeClient {
                coordinator: self.0.clone(),
            }))
        }
    }

    fn cache_with(
        coordinator: FakeCoordinator,
    ) -> (ParentClassMatchingCache, Arc<FakeCoordinator>) {
        let coordinator = Arc::new(coordinator);
        let cache = ParentClassMatchingCache::new(Arc::new(FakeFactory(coordinator.clone())));
        (cache, coordinator)
    }

    fn ids(bits: &[usize]) -> BitSet {
        bits.iter().copied().collect()
    }

    fn flushed(coordinator: &FakeCoordinator) -> Vec<Signal> {
        coordinator
            .sent
            .lock()
            .iter()
            .filter(|signal| matches!(signal, Signal::ClassMatchingRecord(_)))
            .cloned()
            .collect()
    }

    #[test]
    fn seeded_key_is_found_only_with_its_url() {
        let (cache, _) = cache_with(FakeCoordinator {
            seed: vec![ClassMatchingEntry::new("com.foo.Bar", "file:/one.jar", ids(&[1, 3]))],
            ..FakeCoordinator::default()
        });

        assert_eq!(
            cache.get_recorded_matching_result("com.foo.Bar", "file:/one.jar"),
            Some(ids(&[1, 3]))
        );
        assert_eq!(
            cache.get_recorded_matching_result("com.foo.Bar", "file:/two.jar"),
            None
        );
    }

    #[test]
    fn records_are_not_visible_in_the_same_session() {
        let (cache, _) = cache_with(FakeCoordinator {
            seed: vec![ClassMatchingEntry::new("a.Seeded", "file:/a.jar", ids(&[2]))],
            ..FakeCoordinator::default()
        });

        cache.record_matching_result("a.Seeded", "file:/a.jar", &ids(&[5]));
        cache.record_matching_result("a.Fresh", "file:/a.jar", &ids(&[7]));

        assert_eq!(
            cache.get_recorded_matching_result("a.Seeded", "file:/a.jar"),
            Some(ids(&[2]))
        );
        assert_eq!(cache.get_recorded_matching_result("a.Fresh", "file:/a.jar"), None);
    }

    #[test]
    fn recording_copies_the_ids() {
        let (cache, coordinator) = cache_with(FakeCoordinator::default());
        let mut caller_ids = ids(&[1]);
        cache.record_matching_result("a.A", "file:/a.jar", &caller_ids);
        caller_ids.insert(9);

        cache.shutdown();

        assert_eq!(
            flushed(&coordinator),
            vec![Signal::ClassMatchingRecord(vec![ClassMatchingEntry::new(
                "a.A",
                "file:/a.jar",
                ids(&[1])
            )])]
        );
    }

    #[test]
    fn shutdown_flushes_one_record_with_every_entry() {
        let (cache, coordinator) = cache_with(FakeCoordinator::default());
        cache.record_matching_result("a.A", "file:/a.jar", &ids(&[1]));
        cache.record_matching_result("b.B", "file:/b.jar", &ids(&[2]));
        cache.record_matching_result("c.C", "file:/c.jar", &ids(&[]));

        cache.shutdown();

        let records = flushed(&coordinator);
        assert_eq!(records.len(), 1);
        let Signal::ClassMatchingRecord(entries) = &records[0] else {
            panic!("expected a record signal");
        };
        let mut names: Vec<&str> = entries.iter().map(|entry| entry.class_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a.A", "b.B", "c.C"]);

        cache.shutdown();
        assert_eq!(flushed(&coordinator).len(), 1);
    }

    #[test]
    fn unreachable_coordinator_yields_an_empty_cache() {
        let (cache, _) = cache_with(FakeCoordinator {
            unreachable: true,
            ..FakeCoordinator::default()
        });

        assert_eq!(cache.seed_len(), 0);
        assert_eq!(cache.get_recorded_matching_result("a.A", "file:/a.jar"), None);
        cache.record_matching_result("a.A", "file:/a.jar", &ids(&[1]));
        cache.shutdown();
    }

    #[test]
    fn runtime_image_classes_are_skipped_by_default() {
        let (cache, coordinator) = cache_with(FakeCoordinator {
            seed: vec![ClassMatchingEntry::new(
                "java.lang.String",
                "jrt:/java.base/java/lang/String.class",
                ids(&[1]),
            )],
            ..FakeCoordinator::default()
        });

        assert_eq!(
            cache.get_recorded_matching_result(
                "java.lang.String",
                "jrt:/java.base/java/lang/String.class"
            ),
            None
        );
        cache.record_matching_result(
            "java.lang.Thread",
            "jrt:/java.base/java/lang/Thread.class",
            &ids(&[1]),
        );
        cache.shutdown();
        assert!(flushed(&coordinator).is_empty());
    }

    #[test]
    fn concurrent_records_are_flushed_together() {
        const THREADS: usize = 8;
        const KEYS: usize = 250;
        let (cache, coordinator) = cache_with(FakeCoordinator::default());

        std::thread::scope(|scope| {
            for thread in 0..THREADS {
                let cache = &cache;
                scope.spawn(move || {
                    for key in 0..KEYS {
                        let class_name = format!("t{thread}.C{key}");
                        cache.record_matching_result(&class_name, "file:/a.jar", &ids(&[key]));
                    }
                });
            }
        });
        cache.shutdown();

        let records = flushed(&coordinator);
        assert_eq!(records.len(), 1);
        let Signal::ClassMatchingRecord(entries) = &records[0] else {
            panic!("expected a record signal");
        };
        assert_eq!(entries.len(), THREADS * KEYS);
        let distinct: std::collections::HashSet<&str> =
            entries.iter().map(|entry| entry.class_name.as_str()).collect();
        assert_eq!(distinct.len(), THREADS * KEYS);
        assert!(entries
            .iter()
            .any(|entry| entry.class_name == "t7.C249" && entry.ids == ids(&[249])));
    }

    #[test]
    fn shutdown_without_records_sends_nothing() {
        let (cache, coordinator) = cache_with(FakeCoordinator::default());

        cache.shutdown();

        let sent = coordinator.sent.lock();
        assert_eq!(*sent, vec![Signal::ClassMatchingRequest]);
    }
}
