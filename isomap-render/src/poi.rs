//! Points of interest discovered while rendering and the queues carrying them to the coordinator.

use std::fmt::{self, Display};

use anyhow::Result;
use glam::IVec3;
use isomap_core::{ChunkPos, Sign, TilePath};
use log::trace;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::RenderError;

/// Capacity of a bounded event queue.
pub const POI_QUEUE_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoiKind {
    Spawn,
    Sign,
}

/// A marker to be shown on top of the map.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub kind: PoiKind,
    /// chunk the marker was found in, in the rotated frame
    pub chunk: [i32; 2],
    /// block position in world coordinates
    pub position: [i32; 3],
    pub text: String,
}

impl PointOfInterest {
    /// Creates the marker for a sign found in the given chunk.
    #[must_use]
    pub fn sign(chunk: ChunkPos, sign: &Sign) -> Self {
        Self {
            kind: PoiKind::Sign,
            chunk: chunk.0.to_array(),
            position: sign.pos.to_array(),
            text: sign.text(),
        }
    }

    /// Creates the marker of a world's spawn point.
    #[must_use]
    pub fn spawn(position: IVec3) -> Self {
        let chunk = ChunkPos::new(position.x >> 4, position.z >> 4);
        Self {
            kind: PoiKind::Spawn,
            chunk: chunk.0.to_array(),
            position: position.to_array(),
            text: "Spawn".to_owned(),
        }
    }

    /// Check whether this marker was discovered in the given chunk while rendering.
    #[must_use]
    pub fn found_in(&self, chunk: ChunkPos) -> bool {
        self.kind != PoiKind::Spawn && self.chunk == chunk.0.to_array()
    }
}

/// Something a worker reports about a quadtree while rendering it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoiEvent {
    /// a marker has been found
    NewPoi(PointOfInterest),
    /// all markers of the chunk are about to be reported again
    RemovePoi(ChunkPos),
    /// the tile has been written
    Rendered(TilePath),
}

impl Display for PoiEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewPoi(poi) => write!(formatter, "new poi {:?} at {:?}", poi.text, poi.position),
            Self::RemovePoi(chunk) => write!(formatter, "remove pois of chunk {chunk}"),
            Self::Rendered(path) => write!(formatter, "rendered {path}"),
        }
    }
}

/// An event together with the index of the quadtree it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoiMessage {
    pub tree: usize,
    pub event: PoiEvent,
}

/// Sending half of a dimension's event queue.
#[derive(Clone, Debug)]
pub enum PoiSender {
    /// used by pooled workers; blocks while the queue is full
    Bounded(mpsc::Sender<PoiMessage>),
    /// used when rendering inline where nobody drains the queue during a batch
    Unbounded(mpsc::UnboundedSender<PoiMessage>),
}

impl PoiSender {
    /// Queues an event for the coordinator.
    ///
    /// Must not be called from within an async context.
    ///
    /// # Errors
    ///
    /// Fails if the coordinator has stopped listening.
    pub fn send(&self, tree: usize, event: PoiEvent) -> Result<()> {
        trace!("tree {tree}: {event}");
        let message = PoiMessage { tree, event };
        let sent = match self {
            Self::Bounded(sender) => sender.blocking_send(message).is_ok(),
            Self::Unbounded(sender) => sender.send(message).is_ok(),
        };
        if sent {
            Ok(())
        } else {
            Err(RenderError::WorkerTerminated.into())
        }
    }
}

/// Receiving half of a dimension's event queue.
#[derive(Debug)]
pub enum PoiReceiver {
    Bounded(mpsc::Receiver<PoiMessage>),
    Unbounded(mpsc::UnboundedReceiver<PoiMessage>),
}

impl PoiReceiver {
    /// Returns the next queued event without waiting.
    pub fn try_next(&mut self) -> Option<PoiMessage> {
        match self {
            Self::Bounded(receiver) => receiver.try_recv().ok(),
            Self::Unbounded(receiver) => receiver.try_recv().ok(),
        }
    }
}

/// Creates an event queue for one dimension.
#[must_use]
pub fn poi_queue(bounded: bool) -> (PoiSender, PoiReceiver) {
    if bounded {
        let (sender, receiver) = mpsc::channel(POI_QUEUE_CAPACITY);
        (PoiSender::Bounded(sender), PoiReceiver::Bounded(receiver))
    } else {
        let (sender, receiver) = mpsc::unbounded_channel();
        (PoiSender::Unbounded(sender), PoiReceiver::Unbounded(receiver))
    }
}

/// The markers of a quadtree plus the tiles rendered during the current run.
#[derive(Clone, Debug, Default)]
pub struct PoiCollection {
    points: Vec<PointOfInterest>,
    rendered: Vec<TilePath>,
    changed: bool,
}

impl PoiCollection {
    #[must_use]
    pub fn new(points: Vec<PointOfInterest>) -> Self {
        Self {
            points,
            rendered: Vec::new(),
            changed: false,
        }
    }

    /// Applies a single event.
    pub fn apply(&mut self, event: PoiEvent) {
        match event {
            PoiEvent::NewPoi(poi) => {
                if !self.points.contains(&poi) {
                    self.points.push(poi);
                    self.changed = true;
                }
            }
            PoiEvent::RemovePoi(chunk) => {
                let before = self.points.len();
                self.points.retain(|poi| !poi.found_in(chunk));
                self.changed |= self.points.len() != before;
            }
            PoiEvent::Rendered(path) => self.rendered.push(path),
        }
    }

    /// Adds a marker unless it's already known.
    pub fn insert(&mut self, poi: PointOfInterest) {
        self.apply(PoiEvent::NewPoi(poi));
    }

    #[must_use]
    pub fn points(&self) -> &[PointOfInterest] {
        &self.points
    }

    /// Tiles written during this run, in the order they were reported.
    #[must_use]
    pub fn rendered(&self) -> &[TilePath] {
        &self.rendered
    }

    /// Check whether the markers differ from the ones this collection was created with.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    /// Marks the current markers as persisted.
    pub fn mark_saved(&mut self) {
        self.changed = false;
    }
}
