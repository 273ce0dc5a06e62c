#![forbid(unsafe_code)]

//! Change pipelines: intake → delay-aware buffer → dedup → ref-counted multicast.
//!
//! # Design
//!
//! Each notifying object owns up to two pipelines ("changing" and
//! "changed"), built the first time someone asks for the stream. A pipeline
//! is:
//!
//! ```text
//! intake ──► buffer ──(boundary)──► dedup ──► flatten ──► RefCountStream
//!              ▲
//! boundary ────┘  fired on delay 0→1 and 1→0 transitions
//! ```
//!
//! While notifications are not delayed, a record closes its own batch the
//! moment it arrives, so it passes straight through. While delayed, records
//! accumulate until the boundary fires on the 1→0 transition, then the whole
//! batch is deduplicated and emitted.
//!
//! The buffer exists only while the stream has subscribers. Connecting builds
//! a fresh buffer attached to intake and boundary; disconnecting drops it,
//! together with anything still queued.
//!
//! # Invariants
//!
//! 1. The boundary fires once per delay transition, never per record.
//! 2. A delayed window delivers at most one record per property name, the
//!    last one raised, in the relative order of those last occurrences.
//! 3. Nothing is emitted while the stream is idle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ahash::AHashSet;

use super::record::PropertyChange;
use crate::stream::{BoxSource, Observer, RefCountStream, Source, SourceExt, Subject, Subscription};
use crate::sync::lock;

type Record = Arc<PropertyChange>;

/// Keep only the last record for each property name, preserving the
/// relative order of the kept records.
///
/// `[A, B, A, C, B]` becomes `[A, C, B]`. Batches of zero or one record are
/// returned untouched.
#[must_use]
pub fn dedup(batch: Vec<Record>) -> Vec<Record> {
    if batch.len() <= 1 {
        return batch;
    }
    let mut seen: AHashSet<Arc<str>> = AHashSet::with_capacity(batch.len());
    let mut kept = Vec::with_capacity(batch.len());
    for record in batch.into_iter().rev() {
        if seen.insert(Arc::clone(record.name_arc())) {
            kept.push(record);
        }
    }
    kept.reverse();
    kept
}

/// Per-connection buffering stage.
struct BufferStage {
    buffer: Mutex<Vec<Record>>,
    delayed: Arc<AtomicUsize>,
    output: Subject<Record>,
}

impl BufferStage {
    fn push(&self, record: Record) {
        lock(&self.buffer).push(record);
        if self.delayed.load(Ordering::Acquire) == 0 {
            self.flush();
        }
    }

    fn flush(&self) {
        let batch = std::mem::take(&mut *lock(&self.buffer));
        for record in dedup(batch) {
            self.output.next(record);
        }
    }
}

struct IntakeObserver(Arc<BufferStage>);

impl Observer<Record> for IntakeObserver {
    fn on_next(&self, record: Record) {
        self.0.push(record);
    }
}

struct BoundaryObserver(Arc<BufferStage>);

impl Observer<()> for BoundaryObserver {
    fn on_next(&self, (): ()) {
        self.0.flush();
    }
}

/// The stream of change records for one direction of one object.
///
/// Connected to the object only while at least one subscriber is attached.
/// Completes when the object is dropped.
#[derive(Clone, Debug)]
pub struct ChangeStream {
    stream: RefCountStream<Record>,
}

impl ChangeStream {
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.stream.subscriber_count()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    /// Number of times this stream has (re)connected to its object.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.stream.connect_count()
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.stream.is_completed()
    }

    /// Records for a single property only.
    #[must_use]
    pub fn for_property(&self, property_name: &str) -> BoxSource<Record> {
        let name: Arc<str> = Arc::from(property_name);
        self.clone()
            .filter(move |record: &Record| record.property_name() == &*name)
            .boxed()
    }
}

impl Source<Record> for ChangeStream {
    fn subscribe(&self, observer: Arc<dyn Observer<Record>>) -> Subscription {
        self.stream.subscribe(observer)
    }
}

pub(crate) struct ChangePipeline {
    intake: Subject<Record>,
    boundary: Subject<()>,
    stream: ChangeStream,
}

impl ChangePipeline {
    pub(crate) fn new(direction: &'static str, delayed: Arc<AtomicUsize>) -> Self {
        let intake: Subject<Record> = Subject::new();
        let boundary: Subject<()> = Subject::new();

        let connect_intake = intake.clone();
        let connect_boundary = boundary.clone();
        let stream = RefCountStream::new(move |output: &Subject<Record>| {
            tracing::debug!(message = "pipeline.connect", direction);
            let stage = Arc::new(BufferStage {
                buffer: Mutex::new(Vec::new()),
                delayed: Arc::clone(&delayed),
                output: output.clone(),
            });
            // Records before boundary: a record raised outside a delay window
            // is flushed by its own arrival.
            let records = connect_intake.subscribe(Arc::new(IntakeObserver(Arc::clone(&stage))));
            let edges = connect_boundary.subscribe(Arc::new(BoundaryObserver(stage)));
            Subscription::from_many(vec![records, edges])
        });

        Self {
            intake,
            boundary,
            stream: ChangeStream { stream },
        }
    }

    pub(crate) fn push(&self, record: Record) {
        self.intake.next(record);
    }

    pub(crate) fn signal_boundary(&self) {
        self.boundary.next(());
    }

    pub(crate) fn stream(&self) -> &ChangeStream {
        &self.stream
    }

    pub(crate) fn complete(&self) {
        self.stream.stream.complete();
        self.intake.complete();
        self.boundary.complete();
    }
}
