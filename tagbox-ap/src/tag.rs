//! Tag reader interface and presence debouncing
//!
//! Payload decoding belongs to the reader implementation; the core only sees
//! a UID and an optional text record. [`TagPresenceMonitor`] turns raw polls
//! into presented/removed edges.

use tracing::{debug, info};

use crate::bus::{Armed, BusConfig, BusError, SharedBus};

/// One successful tag read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRead {
    pub uid: Vec<u8>,
    /// First text record, if the tag carries one
    pub text: Option<String>,
}

impl TagRead {
    pub fn uid_hex(&self) -> String {
        self.uid.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

/// A tag reader on the shared bus
pub trait TagReader: Send {
    /// Bring the reader up; returns its firmware version
    fn init(&mut self, bus: &mut Armed<'_>) -> Result<u32, BusError>;

    /// One detection attempt; `None` when no tag is in the field
    fn poll(&mut self, bus: &mut Armed<'_>) -> Result<Option<TagRead>, BusError>;
}

/// Poll once inside a tag reader bus transaction
pub fn poll_reader(bus: &SharedBus, reader: &mut dyn TagReader) -> Result<Option<TagRead>, BusError> {
    bus.with(&BusConfig::TAG_READER, |armed| reader.poll(armed))
}

/// Debounced presence change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagEvent {
    /// A tag has been seen on enough consecutive polls. Also raised when a
    /// different tag replaces the current one without a gap.
    Presented(TagRead),
    /// The current tag has been missing for enough consecutive polls
    Removed { uid: Vec<u8> },
}

/// Debounces raw polls into [`TagEvent`]s
#[derive(Debug)]
pub struct TagPresenceMonitor {
    present_reads: u32,
    absent_reads: u32,
    current: Option<TagRead>,
    candidate: Option<TagRead>,
    hits: u32,
    misses: u32,
}

impl TagPresenceMonitor {
    pub fn new(present_reads: u32, absent_reads: u32) -> Self {
        Self {
            present_reads: present_reads.max(1),
            absent_reads: absent_reads.max(1),
            current: None,
            candidate: None,
            hits: 0,
            misses: 0,
        }
    }

    /// Feed one poll result
    pub fn observe(&mut self, read: Option<TagRead>) -> Option<TagEvent> {
        match read {
            Some(tag) => {
                self.misses = 0;
                if self.current.as_ref().map(|c| &c.uid) == Some(&tag.uid) {
                    self.candidate = None;
                    self.hits = 0;
                    return None;
                }

                if self.candidate.as_ref().map(|c| &c.uid) == Some(&tag.uid) {
                    self.hits += 1;
                } else {
                    self.candidate = Some(tag);
                    self.hits = 1;
                }

                if self.hits >= self.present_reads {
                    let tag = self.candidate.take()?;
                    self.hits = 0;
                    info!("Tag {} presented", tag.uid_hex());
                    self.current = Some(tag.clone());
                    return Some(TagEvent::Presented(tag));
                }
                None
            }
            None => {
                self.candidate = None;
                self.hits = 0;
                let current = self.current.as_ref()?;
                self.misses += 1;
                debug!("Tag {} missing ({} polls)", current.uid_hex(), self.misses);
                if self.misses >= self.absent_reads {
                    self.misses = 0;
                    let tag = self.current.take()?;
                    info!("Tag {} removed", tag.uid_hex());
                    return Some(TagEvent::Removed { uid: tag.uid });
                }
                None
            }
        }
    }

    pub fn current(&self) -> Option<&TagRead> {
        self.current.as_ref()
    }
}
