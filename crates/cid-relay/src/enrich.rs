//! Presentation-ready events
//!
//! Events whose code is not in the dictionary are still stored and relayed;
//! they are only left out here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cid_protocol::{DecodeError, Event, EventDictionary};
use serde::Serialize;
use tracing::debug;

use crate::publisher::Subscription;

/// An event joined with its dictionary entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrichedEvent {
    /// Arrival time
    pub time: DateTime<Utc>,
    /// Account / device identifier
    pub device: String,
    /// Qualifier + event code
    pub code: String,
    /// Event category from the dictionary
    #[serde(rename = "type")]
    pub event_type: String,
    /// Description from the dictionary
    #[serde(rename = "desc")]
    pub description: String,
    /// Zone and group label, e.g. `Zone 002|Group 01`
    pub zone: String,
    /// Display rank, see [`EventPriority`](cid_protocol::EventPriority)
    pub priority: u8,
}

impl EnrichedEvent {
    /// Join an event with its dictionary entry
    pub fn from_event(event: &Event, dictionary: &EventDictionary) -> Result<Self, DecodeError> {
        let entry = dictionary
            .lookup(event.code())
            .ok_or_else(|| DecodeError::UnknownCode(event.code().to_string()))?;

        Ok(Self {
            time: event.received_at(),
            device: event.account().to_string(),
            code: event.code().to_string(),
            event_type: entry.event_type.clone(),
            description: entry.description.clone(),
            zone: format!("Zone {}|Group {}", event.zone(), event.group()),
            priority: event.priority().rank(),
        })
    }
}

/// Enrich every event with a known code, keeping order
pub fn enrich_events<'a, I>(events: I, dictionary: &EventDictionary) -> Vec<EnrichedEvent>
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .filter_map(|event| EnrichedEvent::from_event(event, dictionary).ok())
        .collect()
}

/// Enrich the events with a known code and keep only the newest `limit`
///
/// Unknown codes are dropped before the limit is applied, so they never push
/// known events out of the result.
pub fn enrich_latest<'a, I>(events: I, dictionary: &EventDictionary, limit: usize) -> Vec<EnrichedEvent>
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut enriched = enrich_events(events, dictionary);
    let skip = enriched.len().saturating_sub(limit);
    enriched.drain(..skip);
    enriched
}

/// Live event feed joined with the dictionary
///
/// Events whose code is not in the dictionary are skipped.
pub struct EnrichedSubscription {
    events: Subscription<Arc<Event>>,
    dictionary: Arc<EventDictionary>,
}

impl EnrichedSubscription {
    /// Wrap an event-update subscription
    pub fn new(events: Subscription<Arc<Event>>, dictionary: Arc<EventDictionary>) -> Self {
        Self { events, dictionary }
    }

    /// Next event with a known code; `None` once the feed is closed
    pub async fn recv(&mut self) -> Option<EnrichedEvent> {
        loop {
            let event = self.events.recv().await?;
            match EnrichedEvent::from_event(&event, &self.dictionary) {
                Ok(enriched) => return Some(enriched),
                Err(e) => debug!("Skipping live event: {}", e),
            }
        }
    }

    /// Updates skipped because this subscriber fell behind
    pub fn lagged(&self) -> u64 {
        self.events.lagged()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::UpdatePublisher;
    use crate::state::Device;
    use cid_protocol::{decode_frame, EventDictionaryEntry};

    fn dictionary() -> EventDictionary {
        EventDictionary::from_entries([EventDictionaryEntry {
            code: "E130".into(),
            event_type: "Burglary".into(),
            description: "Zone alarm".into(),
        }])
        .unwrap()
    }

    #[test]
    fn test_known_code_is_enriched() {
        let event = decode_frame(b"00000001234E13001002", Utc::now()).unwrap();
        let enriched = EnrichedEvent::from_event(&event, &dictionary()).unwrap();

        assert_eq!(enriched.device, "1234");
        assert_eq!(enriched.event_type, "Burglary");
        assert_eq!(enriched.description, "Zone alarm");
        assert_eq!(enriched.zone, "Zone 002|Group 01");
        assert_eq!(enriched.priority, 3);
    }

    #[test]
    fn test_unknown_code_is_filtered() {
        let known = decode_frame(b"00000001234E13001002", Utc::now()).unwrap();
        let unknown = decode_frame(b"00000001234E99901002", Utc::now()).unwrap();

        assert!(matches!(
            EnrichedEvent::from_event(&unknown, &dictionary()),
            Err(DecodeError::UnknownCode(code)) if code == "E999"
        ));

        let enriched = enrich_events([&known, &unknown, &known], &dictionary());
        assert_eq!(enriched.len(), 2);
    }

    #[test]
    fn test_limit_applies_after_filtering() {
        let known = decode_frame(b"00000001234E13001002", Utc::now()).unwrap();
        let unknown = decode_frame(b"00000001234E99901002", Utc::now()).unwrap();

        // Known events first, then a burst of unknown codes
        let mut events = vec![&known; 5];
        events.extend(vec![&unknown; 5]);
        assert_eq!(enrich_latest(events.clone(), &dictionary(), 5).len(), 5);

        let interleaved = [&known, &unknown, &known, &unknown, &known, &unknown];
        let latest = enrich_latest(interleaved, &dictionary(), 2);
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|e| e.code == "E130"));
    }

    #[tokio::test]
    async fn test_enriched_feed_skips_unknown_codes() {
        let publisher = UpdatePublisher::new(16);
        let mut feed = EnrichedSubscription::new(publisher.subscribe_events(), Arc::new(dictionary()));

        for raw in [&b"00000001234E99901002"[..], &b"00000005678E13001003"[..]] {
            let event = Arc::new(decode_frame(raw, Utc::now()).unwrap());
            publisher.publish(Device::from_event(&event), event);
        }
        publisher.close();

        let enriched = feed.recv().await.unwrap();
        assert_eq!(enriched.device, "5678");
        assert_eq!(enriched.zone, "Zone 003|Group 01");
        assert!(feed.recv().await.is_none());
        assert_eq!(feed.lagged(), 0);
    }
}
