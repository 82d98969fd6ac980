// src/touch.rs - per-finger touch state machine turning observations into key events
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::config::{ContactPolicy, DetectionMode, TouchConfig};
use crate::keyboard::KeyboardLayout;
use crate::tracking::{FingerId, FingerObservation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    /// Touch followed by a qualifying lift.
    Tap(String),
    /// Key acquired (depth-crossing mode).
    Press(String),
    /// Contact on the key ended, for whatever reason.
    Release(String),
}

impl KeyEvent {
    pub fn key(&self) -> &str {
        match self {
            KeyEvent::Tap(key) | KeyEvent::Press(key) | KeyEvent::Release(key) => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KeyEvent::Tap(_) => "tap",
            KeyEvent::Press(_) => "press",
            KeyEvent::Release(_) => "release",
        }
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.key())
    }
}

/// A key event and the finger that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct TouchEvent {
    pub finger: FingerId,
    pub timestamp: f64,
    pub event: KeyEvent,
}

/// A finger holding a key.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveContact {
    pub key: String,
    /// Position of the held region in the layout.
    pub region: usize,
    pub since: f64,
}

#[derive(Debug, Clone, Copy)]
struct DepthReading {
    depth: f32,
    timestamp: f64,
}

/// Owns every `ActiveContact`, keyed by finger.
pub struct TouchStateMachine {
    config: TouchConfig,
    contacts: BTreeMap<FingerId, ActiveContact>,
    last_depth: HashMap<FingerId, DepthReading>,
    last_timestamp: f64,
}

impl TouchStateMachine {
    pub fn new(config: TouchConfig) -> Self {
        Self {
            config,
            contacts: BTreeMap::new(),
            last_depth: HashMap::new(),
            last_timestamp: 0.0,
        }
    }

    /// Advances every finger by one frame.
    ///
    /// `observations` must hold every finger seen this frame; a contact whose
    /// finger is missing is treated as a vanished hand. Fingers without a valid
    /// depth keep their state untouched.
    pub fn process(&mut self, observations: &[FingerObservation], layout: &KeyboardLayout) -> Vec<TouchEvent> {
        let mut events = Vec::new();
        let mut ordered: Vec<&FingerObservation> = observations.iter().collect();
        ordered.sort_by_key(|o| o.id);
        if let Some(last) = ordered.iter().map(|o| o.timestamp).reduce(f64::max) {
            self.last_timestamp = last;
        }

        let seen: BTreeSet<FingerId> = ordered.iter().map(|o| o.id).collect();
        self.release_vanished(&seen, &mut events);

        // existing contacts first, so a release frees the keyboard for new claims
        let mut released = BTreeSet::new();
        for obs in &ordered {
            let Some(depth) = obs.valid_depth() else {
                continue;
            };
            let Some(contact) = self.contacts.get(&obs.id) else {
                continue;
            };
            if layout.still_touching(contact.region, obs.position, depth) {
                continue;
            }

            let velocity = self.velocity(obs.id, depth, obs.timestamp);
            let Some(contact) = self.contacts.remove(&obs.id) else {
                continue;
            };
            tracing::debug!(
                finger = %obs.id,
                key = %contact.key,
                velocity,
                held_for = obs.timestamp - contact.since,
                "touching -> idle"
            );
            if self.config.mode == DetectionMode::TouchTap && velocity < self.config.tap_velocity_threshold {
                tracing::info!(finger = %obs.id, key = %contact.key, velocity, "tap");
                events.push(TouchEvent {
                    finger: obs.id,
                    timestamp: obs.timestamp,
                    event: KeyEvent::Tap(contact.key.clone()),
                });
            }
            events.push(TouchEvent {
                finger: obs.id,
                timestamp: obs.timestamp,
                event: KeyEvent::Release(contact.key),
            });
            released.insert(obs.id);
        }

        for obs in &ordered {
            let Some(depth) = obs.valid_depth() else {
                continue;
            };
            if self.contacts.contains_key(&obs.id) || released.contains(&obs.id) {
                continue;
            }
            if self.config.contact == ContactPolicy::Single && !self.contacts.is_empty() {
                continue;
            }
            let Some(index) = layout.hit_index(obs.position, depth) else {
                continue;
            };
            let region = &layout.regions()[index];

            tracing::debug!(finger = %obs.id, key = %region.name, depth, "idle -> touching");
            self.contacts.insert(
                obs.id,
                ActiveContact {
                    key: region.name.clone(),
                    region: index,
                    since: obs.timestamp,
                },
            );
            if self.config.mode == DetectionMode::DepthCrossing {
                events.push(TouchEvent {
                    finger: obs.id,
                    timestamp: obs.timestamp,
                    event: KeyEvent::Press(region.name.clone()),
                });
            }
        }

        for obs in &ordered {
            if let Some(depth) = obs.valid_depth() {
                self.last_depth.insert(
                    obs.id,
                    DepthReading {
                        depth,
                        timestamp: obs.timestamp,
                    },
                );
            }
        }
        events
    }

    fn release_vanished(&mut self, seen: &BTreeSet<FingerId>, events: &mut Vec<TouchEvent>) {
        self.last_depth.retain(|id, _| seen.contains(id));
        let vanished: Vec<FingerId> = self
            .contacts
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        for id in vanished {
            if let Some(contact) = self.contacts.remove(&id) {
                tracing::debug!(finger = %id, key = %contact.key, "hand lost, contact released");
                events.push(TouchEvent {
                    finger: id,
                    timestamp: self.last_timestamp,
                    event: KeyEvent::Release(contact.key),
                });
            }
        }
    }

    /// Depth change rate in m/s against the finger's previous valid reading.
    fn velocity(&self, id: FingerId, depth: f32, timestamp: f64) -> f32 {
        match self.last_depth.get(&id) {
            Some(prev) if timestamp > prev.timestamp => {
                ((depth - prev.depth) as f64 / (timestamp - prev.timestamp)) as f32
            }
            _ => 0.0,
        }
    }

    /// Ends every contact. Used on shutdown; never emits a tap.
    pub fn release_all(&mut self) -> Vec<TouchEvent> {
        self.last_depth.clear();
        let timestamp = self.last_timestamp;
        std::mem::take(&mut self.contacts)
            .into_iter()
            .map(|(finger, contact)| {
                tracing::info!(finger = %finger, key = %contact.key, "releasing held key");
                TouchEvent {
                    finger,
                    timestamp,
                    event: KeyEvent::Release(contact.key),
                }
            })
            .collect()
    }

    pub fn contact(&self, id: FingerId) -> Option<&ActiveContact> {
        self.contacts.get(&id)
    }

    pub fn contacts(&self) -> impl Iterator<Item = (&FingerId, &ActiveContact)> {
        self.contacts.iter()
    }

    /// Key held by the lowest (hand, finger), if any.
    pub fn active_key(&self) -> Option<&str> {
        self.contacts.values().next().map(|c| c.key.as_str())
    }

    pub fn is_touching(&self) -> bool {
        !self.contacts.is_empty()
    }
}
