use log::{debug, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use jpc::{
    decode_main_header, decode_tile_header, ByteSource, CodestreamStructure, PacketError,
    PacketLayer, PrecinctStructure, QualityLayersCache, TileCoding,
};

use crate::databin::{CopyRange, Databin, DatabinId};
use crate::tracker::{QualityLayers, TrackerId};
use crate::{DatabinError, SessionError};

/// Outcome of merging one arrival into the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalOutcome {
    /// The arrival completed the databin.
    pub completed: bool,
    /// Trackers subscribed to the databin at the time of the arrival.
    pub listeners: Vec<TrackerId>,
}

/// Every databin of a session, created on first reference.
#[derive(Debug, Default)]
pub struct DatabinCache {
    databins: RwLock<HashMap<DatabinId, Arc<RwLock<Databin>>>>,
}

impl DatabinCache {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, id: DatabinId) -> Option<Arc<RwLock<Databin>>> {
        self.databins.read().get(&id).cloned()
    }

    pub fn get_or_create(&self, id: DatabinId) -> Arc<RwLock<Databin>> {
        if let Some(databin) = self.get(id) {
            return databin;
        }
        self.databins
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(RwLock::new(Databin::new(id))))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.databins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.databins.read().is_empty()
    }

    /// Identifiers of every databin, sorted.
    pub fn ids(&self) -> Vec<DatabinId> {
        let mut ids: Vec<DatabinId> = self.databins.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn total_loaded_bytes(&self) -> u64 {
        self.databins
            .read()
            .values()
            .map(|databin| databin.read().loaded_bytes())
            .sum()
    }

    pub fn add_data(
        &self,
        id: DatabinId,
        offset: u64,
        bytes: &[u8],
        is_last_byte: bool,
    ) -> Result<ArrivalOutcome, DatabinError> {
        let databin = self.get_or_create(id);
        let mut databin = databin.write();
        let completed = databin.add_data(offset, bytes, is_last_byte)?;
        Ok(ArrivalOutcome {
            completed,
            listeners: databin.listeners().collect(),
        })
    }

    pub fn subscribe(&self, id: DatabinId, listener: TrackerId) {
        self.get_or_create(id).write().subscribe(listener);
    }

    pub fn unsubscribe(&self, id: DatabinId, listener: TrackerId) {
        if let Some(databin) = self.get(id) {
            databin.write().unsubscribe(listener);
        }
    }

    // Whole content of a complete databin.
    fn contents(databin: &Databin) -> Option<Vec<u8>> {
        let length = databin.declared_length()?;
        let mut bytes = vec![0u8; length as usize];
        databin.copy_bytes(
            &mut bytes,
            0,
            CopyRange {
                start: 0,
                length: None,
            },
            true,
        )?;
        Some(bytes)
    }

    /// The decoded main header, once its databin is complete.
    pub fn codestream_structure(&self) -> Result<Option<Arc<CodestreamStructure>>, SessionError> {
        let id = DatabinId::main_header();
        let databin = match self.get(id) {
            Some(databin) => databin,
            None => return Ok(None),
        };
        let databin = databin.read();
        if let Some(structure) = databin.extensions().codestream_structure() {
            return Ok(Some(structure));
        }
        let bytes = match Self::contents(&databin) {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let structure = decode_main_header(&mut io::Cursor::new(bytes)).map_err(|e| {
            warn!("main header rejected: {}", e);
            SessionError::InvalidHeader {
                id,
                reason: e.to_string(),
            }
        })?;
        debug!(
            "main header: {} tiles, {} components, {} layers",
            structure.geometry.num_tiles(),
            structure.num_components(),
            structure.defaults.num_quality_layers
        );
        Ok(Some(
            databin
                .extensions()
                .set_codestream_structure(Arc::new(structure)),
        ))
    }

    /// Coding parameters of `tile`, once its tile header databin is complete.
    pub fn tile_coding(
        &self,
        structure: &CodestreamStructure,
        tile: u32,
    ) -> Result<Option<TileCoding>, SessionError> {
        let id = DatabinId::tile_header(tile);
        let databin = match self.get(id) {
            Some(databin) => databin,
            None => return Ok(None),
        };
        let databin = databin.read();
        if let Some(coding) = databin.extensions().tile_coding() {
            return Ok(Some(coding.clone()));
        }
        let bytes = match Self::contents(&databin) {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let coding = decode_tile_header(&mut io::Cursor::new(bytes), structure).map_err(|e| {
            warn!("tile header {} rejected: {}", tile, e);
            SessionError::InvalidHeader {
                id,
                reason: e.to_string(),
            }
        })?;
        Ok(Some(databin.extensions().set_tile_coding(coding).clone()))
    }

    /// Quality layers of a precinct databin that are usable, at most `max_layers`.
    ///
    /// A precinct with nothing more to offer is [`QualityLayers::Max`].
    pub fn precinct_layers(
        &self,
        id: DatabinId,
        structure: PrecinctStructure,
        max_layers: u16,
    ) -> Result<QualityLayers, SessionError> {
        let databin = self.get_or_create(id);
        let databin = databin.read();
        databin.check_identity(id)?;

        let num_quality_layers = structure.num_quality_layers;
        let cache = databin
            .extensions()
            .quality_layers(|| QualityLayersCache::new(structure));
        let complete = cache
            .lock()
            .end_offset_of_last_complete_layer(&*databin, max_layers)?;

        if databin.is_fully_loaded() || complete.layers >= num_quality_layers {
            Ok(QualityLayers::Max)
        } else {
            Ok(QualityLayers::Layers(complete.layers))
        }
    }

    /// The packet of `layer` in a precinct databin, once its header and body arrived.
    pub fn packet_layer(
        &self,
        id: DatabinId,
        structure: PrecinctStructure,
        layer: u16,
    ) -> Result<Option<PacketLayer>, SessionError> {
        if layer >= structure.num_quality_layers {
            return Err(PacketError::Usage {
                reason: "quality layer beyond the precinct's layers",
            }
            .into());
        }
        let databin = self.get_or_create(id);
        let databin = databin.read();
        databin.check_identity(id)?;

        let cache = databin
            .extensions()
            .quality_layers(|| QualityLayersCache::new(structure));
        let mut cache = cache.lock();
        match cache.layer(&*databin, layer) {
            Ok(packet) if databin.contains_range(packet.header_start, packet.end()) => {
                Ok(Some(packet.clone()))
            }
            Ok(_) | Err(PacketError::NeedMoreData) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
