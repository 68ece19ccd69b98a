use log::{debug, info, trace};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use jpc::CodestreamStructure;

use crate::cache::DatabinCache;
use crate::databin::{DatabinClass, DatabinId};
use crate::precincts::{precinct_in_class_id, PrecinctIterator, PrecinctPosition, Region};
use crate::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackerId(pub u64);

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Quality reached by a precinct or a whole region.
///
/// `Max` sorts above every layer count: nothing more can be gained by waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityLayers {
    Layers(u16),
    Max,
}

impl fmt::Display for QualityLayers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QualityLayers::Layers(layers) => write!(f, "{} layers", layers),
            QualityLayers::Max => write!(f, "all layers"),
        }
    }
}

pub type ProgressCallback = Box<dyn FnMut(QualityLayers) + Send>;

#[derive(Debug)]
struct TrackedPrecinct {
    position: PrecinctPosition,
    databin: DatabinId,
    layers: QualityLayers,
}

/// Follows the quality reachable over a region as data arrives.
///
/// The callback fires every time the minimum over the region's precincts rises, and never
/// reports a lower value than before.
pub struct Tracker {
    id: TrackerId,
    target_layers: u16,
    precincts: Vec<TrackedPrecinct>,
    // Databin to the precincts depending on it, tile headers included.
    dependents: HashMap<DatabinId, Vec<usize>>,
    // Number of precincts at each quality.
    histogram: BTreeMap<QualityLayers, usize>,
    minimum: QualityLayers,
    callback: ProgressCallback,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.id)
            .field("target_layers", &self.target_layers)
            .field("precincts", &self.precincts.len())
            .field("minimum", &self.minimum)
            .finish()
    }
}

impl Tracker {
    /// Enumerates the region's precincts. Nothing is evaluated until the first refresh.
    pub fn new(
        id: TrackerId,
        region: &Region,
        target_layers: u16,
        structure: Arc<CodestreamStructure>,
        callback: ProgressCallback,
    ) -> Result<Tracker, SessionError> {
        let mut precincts = Vec::new();
        let mut dependents: HashMap<DatabinId, Vec<usize>> = HashMap::new();
        for position in PrecinctIterator::new(structure.clone(), region) {
            let databin = DatabinId::precinct(precinct_in_class_id(&structure, &position)?);
            let index = precincts.len();
            dependents.entry(databin).or_default().push(index);
            dependents
                .entry(DatabinId::tile_header(position.tile))
                .or_default()
                .push(index);
            precincts.push(TrackedPrecinct {
                position,
                databin,
                layers: QualityLayers::Layers(0),
            });
        }
        debug!(
            "tracker {} follows {} precincts up to {} layers",
            id,
            precincts.len(),
            target_layers
        );

        let mut histogram = BTreeMap::new();
        if !precincts.is_empty() {
            histogram.insert(QualityLayers::Layers(0), precincts.len());
        }
        Ok(Tracker {
            id,
            target_layers,
            precincts,
            dependents,
            histogram,
            minimum: QualityLayers::Layers(0),
            callback,
        })
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    /// Lowest quality over the region reported so far.
    pub fn minimum(&self) -> QualityLayers {
        self.minimum
    }

    pub fn num_precincts(&self) -> usize {
        self.precincts.len()
    }

    /// Every databin the tracker listens to.
    pub fn databins(&self) -> impl Iterator<Item = DatabinId> + '_ {
        self.dependents.keys().copied()
    }

    /// Evaluates every precinct against what already arrived.
    ///
    /// Calls the callback right away when some quality is available, or when the region has no
    /// precincts at all.
    pub fn refresh_all(
        &mut self,
        structure: &CodestreamStructure,
        cache: &DatabinCache,
    ) -> Result<(), SessionError> {
        for index in 0..self.precincts.len() {
            self.evaluate(index, structure, cache)?;
        }
        self.publish();
        Ok(())
    }

    /// Re-evaluates the precincts depending on a databin that changed.
    pub fn refresh(
        &mut self,
        databin: DatabinId,
        structure: &CodestreamStructure,
        cache: &DatabinCache,
    ) -> Result<(), SessionError> {
        let indices = match self.dependents.get(&databin) {
            Some(indices) => indices.clone(),
            None => return Ok(()),
        };
        trace!(
            "tracker {} refreshing {} precincts for {}",
            self.id,
            indices.len(),
            databin
        );
        for index in indices {
            self.evaluate(index, structure, cache)?;
        }
        self.publish();
        Ok(())
    }

    fn evaluate(
        &mut self,
        index: usize,
        structure: &CodestreamStructure,
        cache: &DatabinCache,
    ) -> Result<(), SessionError> {
        let precinct = &self.precincts[index];
        if precinct.layers == QualityLayers::Max {
            return Ok(());
        }
        let position = precinct.position;
        let databin = precinct.databin;
        debug_assert_eq!(databin.class, DatabinClass::Precinct);

        let coding = match cache.tile_coding(structure, position.tile)? {
            Some(coding) => coding,
            None => return Ok(()),
        };
        let precinct_structure = structure.tile_with(position.tile, coding)?.precinct_structure(
            position.component,
            position.resolution,
            position.precinct,
        )?;
        let layers = cache.precinct_layers(databin, precinct_structure, self.target_layers)?;
        self.raise(index, layers);
        Ok(())
    }

    // Moves a precinct up the histogram. Qualities never go down.
    fn raise(&mut self, index: usize, layers: QualityLayers) {
        let previous = self.precincts[index].layers;
        if layers <= previous {
            return;
        }
        self.precincts[index].layers = layers;
        if let Some(count) = self.histogram.get_mut(&previous) {
            *count -= 1;
            if *count == 0 {
                self.histogram.remove(&previous);
            }
        }
        *self.histogram.entry(layers).or_insert(0) += 1;
    }

    fn publish(&mut self) {
        let minimum = self
            .histogram
            .keys()
            .next()
            .copied()
            .unwrap_or(QualityLayers::Max);
        let minimum = match minimum {
            QualityLayers::Layers(layers) if layers >= self.target_layers => QualityLayers::Max,
            minimum => minimum,
        };
        if minimum > self.minimum {
            info!("tracker {} reached {}", self.id, minimum);
            self.minimum = minimum;
            (self.callback)(minimum);
        }
    }
}
