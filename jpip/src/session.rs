use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use jpc::{CodeblockContribution, CodestreamStructure};

use crate::cache::DatabinCache;
use crate::databin::{ByteRange, DatabinClass, DatabinId};
use crate::message::{Message, MessageDecoder};
use crate::precincts::{precinct_in_class_id, PrecinctPosition, Region};
use crate::tracker::{ProgressCallback, QualityLayers, Tracker, TrackerId};
use crate::SessionError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Cache size above which the session should be reset on the next reconnect.
    pub max_cache_bytes: Option<u64>,
    /// Quality layers a region is tracked up to when the caller does not say. All when `None`.
    pub default_quality_layers: Option<u16>,
}

/// Bytes of one databin as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival<'a> {
    pub class_id: u64,
    pub in_class_id: u64,
    /// Offset from the start of the databin.
    pub offset: u64,
    pub bytes: &'a [u8],
    pub is_last_byte: bool,
    pub codestream_index: u64,
}

/// A tracker that hit malformed data and was dropped.
#[derive(Debug)]
pub struct TrackerFailure {
    pub tracker: TrackerId,
    pub error: SessionError,
}

#[derive(Debug)]
pub struct DispatchReport {
    pub databin: DatabinId,
    /// The arrival completed the databin.
    pub completed: bool,
    pub failures: Vec<TrackerFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabinStatus {
    pub loaded_bytes: u64,
    pub is_fully_loaded: bool,
    pub existing_ranges: Vec<ByteRange>,
    pub declared_length: Option<u64>,
}

/// Routes transport arrivals into the databin cache and the trackers listening to them.
///
/// Tracker callbacks run while the session dispatches and must not call back into it.
pub struct Session {
    config: SessionConfig,
    cache: RwLock<Arc<DatabinCache>>,
    trackers: Mutex<BTreeMap<TrackerId, Tracker>>,
    next_tracker: AtomicU64,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            config,
            cache: RwLock::new(Arc::new(DatabinCache::new())),
            trackers: Mutex::new(BTreeMap::new()),
            next_tracker: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // The cache in use right now. A reset swaps it without touching this handle.
    fn cache(&self) -> Arc<DatabinCache> {
        self.cache.read().clone()
    }

    pub fn add_data(&self, arrival: Arrival) -> Result<DispatchReport, SessionError> {
        if arrival.codestream_index != 0 {
            return Err(SessionError::UnsupportedCodestream {
                index: arrival.codestream_index,
            });
        }
        let class = DatabinClass::from_class_id(arrival.class_id).ok_or(
            SessionError::UnknownClass {
                class_id: arrival.class_id,
            },
        )?;
        let id = DatabinId::new(class, arrival.in_class_id);

        let cache = self.cache();
        let outcome = cache.add_data(id, arrival.offset, arrival.bytes, arrival.is_last_byte)?;
        let mut report = DispatchReport {
            databin: id,
            completed: outcome.completed,
            failures: Vec::new(),
        };
        if outcome.listeners.is_empty() {
            return Ok(report);
        }

        // Trackers only exist once the main header was decoded.
        let structure = match cache.codestream_structure()? {
            Some(structure) => structure,
            None => return Ok(report),
        };
        let mut trackers = self.trackers.lock();
        for tracker_id in outcome.listeners {
            let tracker = match trackers.get_mut(&tracker_id) {
                Some(tracker) => tracker,
                None => continue,
            };
            if let Err(error) = tracker.refresh(id, &structure, &cache) {
                warn!("tracker {} failed on {}: {}", tracker_id, id, error);
                report.failures.push(TrackerFailure {
                    tracker: tracker_id,
                    error,
                });
            }
        }
        for failure in &report.failures {
            if let Some(tracker) = trackers.remove(&failure.tracker) {
                for databin in tracker.databins() {
                    cache.unsubscribe(databin, failure.tracker);
                }
            }
        }
        Ok(report)
    }

    /// Feeds every message of a JPP-stream, stopping at the first rejected one.
    pub fn add_jpp_stream<R: Read>(&self, mut reader: R) -> Result<Vec<DispatchReport>, SessionError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        let mut reports = Vec::new();
        for message in MessageDecoder::new(&bytes) {
            match message? {
                Message::Databin { arrival, .. } => reports.push(self.add_data(arrival)?),
                Message::EndOfResponse { reason, .. } => info!("end of response: {}", reason),
            }
        }
        debug!("{} messages from a {} byte stream", reports.len(), bytes.len());
        Ok(reports)
    }

    /// The decoded main header.
    pub fn structure(&self) -> Result<Arc<CodestreamStructure>, SessionError> {
        self.cache()
            .codestream_structure()?
            .ok_or(SessionError::MissingMainHeader)
    }

    /// Starts following the quality available over `region`, up to `quality_layers` layers.
    ///
    /// `callback` is called with every rise of the minimum over the region, possibly before this
    /// returns.
    pub fn track_region(
        &self,
        region: &Region,
        quality_layers: Option<u16>,
        callback: ProgressCallback,
    ) -> Result<TrackerId, SessionError> {
        let structure = self.structure()?;
        let target_layers = quality_layers
            .or(self.config.default_quality_layers)
            .unwrap_or(u16::MAX);
        let id = TrackerId(self.next_tracker.fetch_add(1, Ordering::Relaxed));
        let mut tracker = Tracker::new(id, region, target_layers, structure.clone(), callback)?;

        // Arrivals wait on the tracker map, so none slips between subscribing and evaluating.
        let cache = self.cache();
        let mut trackers = self.trackers.lock();
        for databin in tracker.databins() {
            cache.subscribe(databin, id);
        }
        if let Err(error) = tracker.refresh_all(&structure, &cache) {
            for databin in tracker.databins() {
                cache.unsubscribe(databin, id);
            }
            return Err(error);
        }
        info!(
            "tracker {} on {}x{} at ({}, {}) over {} precincts",
            id,
            region.width,
            region.height,
            region.x,
            region.y,
            tracker.num_precincts()
        );
        trackers.insert(id, tracker);
        Ok(id)
    }

    /// Stops a tracker. Returns false when it was not running.
    pub fn cancel(&self, id: TrackerId) -> bool {
        let tracker = match self.trackers.lock().remove(&id) {
            Some(tracker) => tracker,
            None => return false,
        };
        let cache = self.cache();
        for databin in tracker.databins() {
            cache.unsubscribe(databin, id);
        }
        debug!("tracker {} cancelled", id);
        true
    }

    pub fn tracker_minimum(&self, id: TrackerId) -> Result<QualityLayers, SessionError> {
        self.trackers
            .lock()
            .get(&id)
            .map(Tracker::minimum)
            .ok_or(SessionError::UnknownTracker { tracker: id })
    }

    pub fn num_trackers(&self) -> usize {
        self.trackers.lock().len()
    }

    /// Codeblock byte ranges of one precinct packet, once the packet fully arrived.
    pub fn codeblocks(
        &self,
        position: &PrecinctPosition,
        layer: u16,
    ) -> Result<Option<Vec<CodeblockContribution>>, SessionError> {
        let structure = self.structure()?;
        let cache = self.cache();
        let coding = match cache.tile_coding(&structure, position.tile)? {
            Some(coding) => coding,
            None => return Ok(None),
        };
        let precinct_structure = structure.tile_with(position.tile, coding)?.precinct_structure(
            position.component,
            position.resolution,
            position.precinct,
        )?;
        let id = DatabinId::precinct(precinct_in_class_id(&structure, position)?);
        Ok(cache
            .packet_layer(id, precinct_structure, layer)?
            .map(|packet| packet.codeblocks))
    }

    pub fn databin_status(&self, id: DatabinId) -> Option<DatabinStatus> {
        let databin = self.cache().get(id)?;
        let databin = databin.read();
        Some(DatabinStatus {
            loaded_bytes: databin.loaded_bytes(),
            is_fully_loaded: databin.is_fully_loaded(),
            existing_ranges: databin.existing_ranges(),
            declared_length: databin.declared_length(),
        })
    }

    pub fn databin_ids(&self) -> Vec<DatabinId> {
        self.cache().ids()
    }

    pub fn total_loaded_bytes(&self) -> u64 {
        self.cache().total_loaded_bytes()
    }

    pub fn is_over_budget(&self) -> bool {
        self.config
            .max_cache_bytes
            .is_some_and(|max| self.total_loaded_bytes() > max)
    }

    /// Drops every databin and tracker.
    pub fn reset(&self) {
        let mut trackers = self.trackers.lock();
        let cache = std::mem::replace(&mut *self.cache.write(), Arc::new(DatabinCache::new()));
        info!(
            "session reset: dropped {} databins, {} bytes and {} trackers",
            cache.len(),
            cache.total_loaded_bytes(),
            trackers.len()
        );
        trackers.clear();
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new(SessionConfig::default())
    }
}
