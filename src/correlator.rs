//! Lifecycle correlation: raw begin/end events to lifetime records
//!
//! The correlator keeps one open record per live (container, address) pair
//! and moves records to an append-only completed list as they terminate.
//! Open records left at the end of a capture are treated as alive through
//! the end and drained without a destroy stamp.

use std::collections::HashMap;

use tracing::debug;

use crate::event::{DecodeError, DecodedEvent, RawEvent};
use crate::stack::StackRef;

/// One resource's existence interval plus identifying metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifetimeRecord {
    /// Owning process
    pub owner: u32,
    /// Grouping handle, e.g. a heap
    pub container: u64,
    /// Address, unique within the container while the record is open
    pub address: u64,
    /// Signed byte count (checked at decode time)
    pub size: i64,
    pub create_thread: u32,
    pub create_time: i64,
    /// Absent while the record is open or when the capture ended first
    pub destroy_thread: Option<u32>,
    pub destroy_time: Option<i64>,
    /// Lazy key for the creation call stack
    pub stack: StackRef,
}

impl LifetimeRecord {
    /// Whether the record was still open when observation ended.
    pub fn is_open(&self) -> bool {
        self.destroy_time.is_none()
    }
}

/// Correlates raw lifecycle events into discrete [`LifetimeRecord`]s.
#[derive(Debug, Default)]
pub struct LifetimeCorrelator {
    /// container -> address -> open record
    open: HashMap<u64, HashMap<u64, LifetimeRecord>>,
    completed: Vec<LifetimeRecord>,
    overwritten_creates: u64,
    unmatched_destroys: u64,
    dropped_events: u64,
}

impl LifetimeCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw event through decoding into the correlation state.
    ///
    /// A decode failure drops that event only: the error is returned for
    /// reporting, a counter is bumped, and correlation continues.
    pub fn feed(&mut self, event: &RawEvent) -> Result<(), DecodeError> {
        let decoded = match event.decode() {
            Ok(d) => d,
            Err(e) => {
                self.dropped_events += 1;
                debug!(id = event.id, error = %e, "dropping undecodable event");
                return Err(e);
            }
        };

        match decoded {
            DecodedEvent::Create(p) => self.record_create(
                p.container,
                p.address,
                p.size,
                event.process,
                event.thread,
                event.timestamp,
            ),
            DecodedEvent::Destroy(p) => {
                self.record_destroy(p.container, p.address, event.thread, event.timestamp)
            }
            DecodedEvent::Resize(p) => self.record_resize(
                p.container,
                p.old_address,
                p.new_address,
                p.new_size,
                event.process,
                event.thread,
                event.timestamp,
            ),
            DecodedEvent::Teardown(p) => {
                self.record_bulk_release(p.container, event.thread, event.timestamp)
            }
        }
        Ok(())
    }

    /// Install a new open record at (container, address).
    ///
    /// A create at an address already open for the container overwrites the
    /// open record; the earlier one is discarded without ever completing.
    /// Real captures do produce this (lost free events), so the loss is
    /// counted rather than silent.
    pub fn record_create(
        &mut self,
        container: u64,
        address: u64,
        size: i64,
        owner: u32,
        thread: u32,
        time: i64,
    ) {
        let record = LifetimeRecord {
            owner,
            container,
            address,
            size,
            create_thread: thread,
            create_time: time,
            destroy_thread: None,
            destroy_time: None,
            stack: StackRef {
                thread,
                timestamp: time,
            },
        };

        if let Some(previous) = self.open.entry(container).or_default().insert(address, record) {
            self.overwritten_creates += 1;
            debug!(
                container,
                address,
                size = previous.size,
                "duplicate create overwrote an open record"
            );
        }
    }

    /// Stamp and complete the open record at (container, address), if any.
    ///
    /// A destroy with no matching open create is invisible, e.g. the create
    /// predates a truncated capture.
    pub fn record_destroy(&mut self, container: u64, address: u64, thread: u32, time: i64) {
        let Some(record) = self
            .open
            .get_mut(&container)
            .and_then(|opens| opens.remove(&address))
        else {
            self.unmatched_destroys += 1;
            return;
        };

        self.completed.push(LifetimeRecord {
            destroy_thread: Some(thread),
            destroy_time: Some(time),
            ..record
        });
    }

    /// An in-place resize is a destroy immediately followed by a create at
    /// the same address and time. A relocating resize is a no-op here: the
    /// producer emits the relocation as a separate create/destroy pair.
    #[allow(clippy::too_many_arguments)]
    pub fn record_resize(
        &mut self,
        container: u64,
        old_address: u64,
        new_address: u64,
        new_size: i64,
        owner: u32,
        thread: u32,
        time: i64,
    ) {
        if old_address != new_address {
            return;
        }
        self.record_destroy(container, old_address, thread, time);
        self.record_create(container, new_address, new_size, owner, thread, time);
    }

    /// Container teardown: every open record of the container is stamped
    /// with the teardown thread/time and completed at once.
    pub fn record_bulk_release(&mut self, container: u64, thread: u32, time: i64) {
        let Some(opens) = self.open.remove(&container) else {
            return;
        };
        for record in opens.into_values() {
            self.completed.push(LifetimeRecord {
                destroy_thread: Some(thread),
                destroy_time: Some(time),
                ..record
            });
        }
    }

    /// Flush any remaining open records (unstamped, still alive at the end
    /// of the capture) into the completed list and return everything.
    ///
    /// The correlator holds no open state afterwards; feed more events
    /// before draining again.
    pub fn drain(&mut self) -> Vec<LifetimeRecord> {
        for opens in std::mem::take(&mut self.open).into_values() {
            self.completed.extend(opens.into_values());
        }
        std::mem::take(&mut self.completed)
    }

    /// Open records a duplicate create has discarded so far.
    pub fn overwritten_creates(&self) -> u64 {
        self.overwritten_creates
    }

    /// Destroy events that matched no open record.
    pub fn unmatched_destroys(&self) -> u64 {
        self.unmatched_destroys
    }

    /// Events dropped because their payload failed to decode.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }
}
