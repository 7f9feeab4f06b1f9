//! Pipe element chains.
//!
//! A `Chain` owns every element of one pipeline in an arena. Elements refer to
//! their successor by `ElementId` only, so wiring never implies ownership.
//!
//! Sample flow is a plain synchronous call chain: an element handles its
//! sample and, through the `Next` handle it was given, calls straight into the
//! successor before returning. There is no queue between elements.

mod builder;
mod health;
mod server;

pub use builder::{build_pipeline, Pipeline, PipelineControl};
pub use health::{HealthChecker, Heartbeat};
pub use server::{HealthReport, PipelineServer};

use crate::detect::DetectionSample;
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::overlay::OverlaySample;

/// Payload travelling between elements. Its shape depends on the stage that
/// produced it.
///
/// A sample has exactly one owner as it moves down the chain:
///
/// ```compile_fail,E0599
/// use edge_pipeline::{Frame, Sample};
///
/// let sample = Sample::Image(Frame::from_rgb(vec![0u8; 3], 1, 1, 0).unwrap());
/// let _copy = sample.clone();
/// ```
#[derive(Debug)]
pub enum Sample {
    Image(Frame),
    Detections(DetectionSample),
    Overlay(OverlaySample),
}

impl Sample {
    pub fn kind(&self) -> &'static str {
        match self {
            Sample::Image(_) => "image",
            Sample::Detections(_) => "detections",
            Sample::Overlay(_) => "overlay",
        }
    }
}

/// One processing stage.
pub trait PipeElement: Send {
    /// Element name used in logs and errors.
    fn name(&self) -> &str;

    /// Handle one sample.
    ///
    /// Implementations forward their output with `next.forward(..)`. Without
    /// a successor `forward` is a no-op, so every element can act as a sink.
    fn receive_next_sample(&mut self, sample: Sample, next: Next<'_>) -> Result<()>;
}

/// Index of an element inside its chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementId(usize);

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "element#{}", self.0)
    }
}

struct Slot {
    name: String,
    /// `None` while the element is handling a sample.
    element: Option<Box<dyn PipeElement>>,
    next: Option<ElementId>,
}

/// Arena of elements plus their successor links.
#[derive(Default)]
pub struct Chain {
    slots: Vec<Slot>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an element. It starts unlinked.
    pub fn add(&mut self, element: Box<dyn PipeElement>) -> ElementId {
        let id = ElementId(self.slots.len());
        self.slots.push(Slot {
            name: element.name().to_string(),
            element: Some(element),
            next: None,
        });
        id
    }

    /// Point `from` at `to`. The last call wins; no cycle check is made here.
    pub fn set_next(&mut self, from: ElementId, to: ElementId) -> Result<()> {
        if to.0 >= self.slots.len() {
            return Err(Error::UnknownElement(to));
        }
        let slot = self.slots.get_mut(from.0).ok_or(Error::UnknownElement(from))?;
        slot.next = Some(to);
        Ok(())
    }

    /// Detach `from` from its successor, making it terminal.
    pub fn clear_next(&mut self, from: ElementId) -> Result<()> {
        let slot = self.slots.get_mut(from.0).ok_or(Error::UnknownElement(from))?;
        slot.next = None;
        Ok(())
    }

    pub fn next_of(&self, id: ElementId) -> Option<ElementId> {
        self.slots.get(id.0).and_then(|slot| slot.next)
    }

    pub fn name_of(&self, id: ElementId) -> Option<&str> {
        self.slots.get(id.0).map(|slot| slot.name.as_str())
    }

    /// First element added; where samples enter by default.
    pub fn entry(&self) -> Option<ElementId> {
        if self.slots.is_empty() {
            None
        } else {
            Some(ElementId(0))
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Link the given elements in order: `ids[0] -> ids[1] -> ...`.
    pub fn link(&mut self, ids: &[ElementId]) -> Result<()> {
        for pair in ids.windows(2) {
            self.set_next(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Deliver `sample` to element `id`. Returns once the whole downstream
    /// traversal has completed or failed.
    pub fn receive_next_sample(&mut self, id: ElementId, sample: Sample) -> Result<()> {
        dispatch(&mut self.slots, id, sample)
    }

    /// Deliver `sample` to the entry element. An empty chain drops it.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        match self.entry() {
            Some(id) => self.receive_next_sample(id, sample),
            None => Ok(()),
        }
    }
}

fn dispatch(slots: &mut [Slot], id: ElementId, sample: Sample) -> Result<()> {
    let slot = slots.get_mut(id.0).ok_or(Error::UnknownElement(id))?;
    let target = slot.next;
    let Some(mut element) = slot.element.take() else {
        return Err(Error::Reentrant {
            element: slot.name.clone(),
        });
    };
    let result = element.receive_next_sample(sample, Next { slots: &mut *slots, target });
    slots[id.0].element = Some(element);
    result
}

/// Handle to the downstream part of a chain, given to an element for the
/// duration of one `receive_next_sample` call.
pub struct Next<'a> {
    slots: &'a mut [Slot],
    target: Option<ElementId>,
}

impl Next<'_> {
    /// Whether a successor is attached.
    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    /// Hand `sample` to the successor, if any, and wait for it to finish.
    ///
    /// Consumes the handle, so an element forwards at most once per
    /// received sample:
    ///
    /// ```compile_fail,E0382
    /// use edge_pipeline::pipeline::Next;
    /// use edge_pipeline::{Frame, PipeElement, Result, Sample};
    ///
    /// struct Duplicate;
    ///
    /// impl PipeElement for Duplicate {
    ///     fn name(&self) -> &str {
    ///         "duplicate"
    ///     }
    ///
    ///     fn receive_next_sample(&mut self, sample: Sample, next: Next<'_>) -> Result<()> {
    ///         let extra = Sample::Image(Frame::from_rgb(vec![0u8; 3], 1, 1, 0)?);
    ///         next.forward(sample)?;
    ///         next.forward(extra)
    ///     }
    /// }
    /// ```
    pub fn forward(self, sample: Sample) -> Result<()> {
        match self.target {
            Some(id) => dispatch(self.slots, id, sample),
            None => Ok(()),
        }
    }
}
