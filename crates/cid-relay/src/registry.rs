//! Device registry and event log
//!
//! Both live behind one lock so a reader that looks at a device and at the
//! log always sees the same set of processed events.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cid_protocol::Event;
use tracing::debug;

use crate::state::Device;

struct StoreInner {
    devices: HashMap<String, Device>,
    log: VecDeque<Arc<Event>>,
}

/// Device registry plus bounded, arrival-ordered event log
pub struct EventStore {
    inner: RwLock<StoreInner>,
    history_capacity: usize,
    recent_limit: usize,
}

impl EventStore {
    /// Create a store keeping at most `history_capacity` events, serving at
    /// most `recent_limit` of them from [`recent_events`](Self::recent_events)
    pub fn new(history_capacity: usize, recent_limit: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                devices: HashMap::new(),
                log: VecDeque::with_capacity(history_capacity.min(1024)),
            }),
            history_capacity: history_capacity.max(1),
            recent_limit,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a decoded event
    ///
    /// Upserts the device and appends the event in one critical section.
    /// Returns the stored event and the updated device snapshot.
    pub fn update(&self, event: Event) -> (Arc<Event>, Device) {
        self.update_then(event, |_, _| {})
    }

    /// Record a decoded event and run `on_stored` before the lock is released
    ///
    /// Anything `on_stored` hands on (queue, live feeds) therefore sees
    /// events in the same order as the log. It must not block.
    pub fn update_then<F>(&self, event: Event, on_stored: F) -> (Arc<Event>, Device)
    where
        F: FnOnce(&Arc<Event>, &Device),
    {
        let mut inner = self.write();

        // Keep the log non-decreasing even if a concurrent connection stamped
        // its frame a moment earlier but reached the lock later.
        let event = match inner.log.back() {
            Some(last) if last.received_at() > event.received_at() => {
                let at = last.received_at();
                event.with_received_at(at)
            }
            _ => event,
        };
        let event = Arc::new(event);

        let device = match inner.devices.get_mut(event.account()) {
            Some(device) => {
                device.apply(&event);
                device.clone()
            }
            None => {
                let device = Device::from_event(&event);
                inner.devices.insert(device.id.clone(), device.clone());
                debug!("New device {}", device.id);
                device
            }
        };

        inner.log.push_back(Arc::clone(&event));
        while inner.log.len() > self.history_capacity {
            inner.log.pop_front();
        }

        on_stored(&event, &device);
        (event, device)
    }

    /// All known devices, sorted by id
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.read().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// A single device by id
    pub fn device(&self, id: &str) -> Option<Device> {
        self.read().devices.get(id).cloned()
    }

    /// The most recent events (at most the configured limit), oldest first
    pub fn recent_events(&self) -> Vec<Arc<Event>> {
        let inner = self.read();
        let skip = inner.log.len().saturating_sub(self.recent_limit);
        inner.log.iter().skip(skip).cloned().collect()
    }

    /// Every retained event, oldest first
    pub fn retained_events(&self) -> Vec<Arc<Event>> {
        self.read().log.iter().cloned().collect()
    }

    /// Every retained event for one device, oldest first
    pub fn device_events(&self, id: &str) -> Vec<Arc<Event>> {
        self.read()
            .log
            .iter()
            .filter(|event| event.account() == id)
            .cloned()
            .collect()
    }

    /// Devices and recent events taken under the same read lock
    pub fn snapshot(&self) -> (Vec<Device>, Vec<Arc<Event>>) {
        let inner = self.read();
        let mut devices: Vec<Device> = inner.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        let skip = inner.log.len().saturating_sub(self.recent_limit);
        let events = inner.log.iter().skip(skip).cloned().collect();
        (devices, events)
    }

    /// Number of retained events
    pub fn len(&self) -> usize {
        self.read().log.len()
    }

    /// Whether no events have been retained
    pub fn is_empty(&self) -> bool {
        self.read().log.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cid_protocol::decode_frame;

    fn frame(account: &str, code: &str) -> Vec<u8> {
        format!("0000000{account}{code}01002").into_bytes()
    }

    fn event_at(account: &str, code: &str, secs: i64) -> Event {
        let at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        decode_frame(&frame(account, code), at).unwrap()
    }

    #[test]
    fn test_device_reflects_last_event() {
        let store = EventStore::new(100, 50);
        for (i, code) in ["E130", "R130", "E401", "E602"].iter().enumerate() {
            store.update(event_at("1234", code, i as i64));
        }

        let devices = store.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].last_event_code, "E602");
        assert_eq!(devices[0].event_count, 4);
        assert_eq!(store.device_events("1234").len(), 4);
    }

    #[test]
    fn test_one_device_per_account() {
        let store = EventStore::new(100, 50);
        store.update(event_at("0002", "E130", 0));
        store.update(event_at("0001", "E130", 1));
        store.update(event_at("0002", "R130", 2));

        let ids: Vec<_> = store.devices().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["0001", "0002"]);
        assert_eq!(store.device_events("0002").len(), 2);
        assert!(store.device_events("9999").is_empty());
    }

    #[test]
    fn test_recent_events_bounded_and_ordered() {
        let store = EventStore::new(1_000, 5);
        for i in 0..12 {
            store.update(event_at("1234", "E130", i));
        }

        let recent = store.recent_events();
        assert_eq!(recent.len(), 5);
        assert!(recent
            .windows(2)
            .all(|w| w[0].received_at() <= w[1].received_at()));
        assert_eq!(
            recent[4].received_at(),
            Utc.timestamp_opt(1_700_000_011, 0).unwrap()
        );
        assert_eq!(store.device_events("1234").len(), 12);
    }

    #[test]
    fn test_history_capacity_evicts_oldest() {
        let store = EventStore::new(3, 3);
        for i in 0..5 {
            store.update(event_at("1234", "E130", i));
        }
        assert_eq!(store.len(), 3);
        assert_eq!(
            store.recent_events()[0].received_at(),
            Utc.timestamp_opt(1_700_000_002, 0).unwrap()
        );
        // The device still counts every event it produced
        assert_eq!(store.device("1234").unwrap().event_count, 5);
    }

    #[test]
    fn test_late_stamp_is_clamped_to_log_order() {
        let store = EventStore::new(10, 10);
        store.update(event_at("1234", "E130", 10));
        let (stored, device) = store.update(event_at("5678", "E130", 5));

        let expected = Utc.timestamp_opt(1_700_000_010, 0).unwrap();
        assert_eq!(stored.received_at(), expected);
        assert_eq!(device.last_event_at, expected);
    }

    #[test]
    fn test_snapshot_is_consistent_under_concurrent_writes() {
        let store = Arc::new(EventStore::new(10_000, 10_000));

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    store.update(event_at("1234", "E130", i));
                }
            })
        };

        for _ in 0..200 {
            let (devices, events) = store.snapshot();
            let count = devices.first().map(|d| d.event_count).unwrap_or(0);
            assert_eq!(count as usize, events.len());
        }

        writer.join().unwrap();
        assert_eq!(store.len(), 2_000);
        assert_eq!(store.retained_events().len(), 2_000);
    }

    #[test]
    fn test_update_then_runs_in_log_order() {
        let store = Arc::new(EventStore::new(10_000, 10_000));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        store.update_then(event_at("1234", "E130", i), |_, device| {
                            seen.lock().unwrap().push(device.event_count);
                        });
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        let expected: Vec<u64> = (1..=1_000).collect();
        assert_eq!(*seen, expected);
    }
}
