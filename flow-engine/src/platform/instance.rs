// Channel Instances
// Reference-counted runtime realization of a channel during one execution pass

use crate::error::SchedulingError;
use crate::execution::channel::ChannelId;
use crate::execution::task::TaskId;

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Data carried by a channel instance
pub type Payload = Arc<dyn Any + Send + Sync>;

struct Inner {
    channel: ChannelId,
    producer: TaskId,
    instrumented: bool,
    payload: Mutex<Option<Payload>>,
    cardinality: Mutex<Option<u64>>,
    references: AtomicUsize,
    obtained: AtomicUsize,
}

/// Handle to one channel instance; clones share the same instance.
///
/// An instance starts out holding one reference for the stage that produced
/// it. Every further holder calls [`ChannelInstance::obtain`] and later
/// [`ChannelInstance::release`]; the payload is dropped when the last
/// reference goes away.
#[derive(Clone)]
pub struct ChannelInstance {
    inner: Arc<Inner>,
}

impl ChannelInstance {
    pub fn new(channel: ChannelId, producer: TaskId, payload: Payload, instrumented: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                channel,
                producer,
                instrumented,
                payload: Mutex::new(Some(payload)),
                cardinality: Mutex::new(None),
                references: AtomicUsize::new(1),
                obtained: AtomicUsize::new(0),
            }),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.inner.channel
    }

    pub fn producer(&self) -> TaskId {
        self.inner.producer
    }

    pub fn is_marked_for_instrumentation(&self) -> bool {
        self.inner.instrumented
    }

    pub fn payload(&self) -> Result<Payload, SchedulingError> {
        self.inner
            .payload
            .lock()
            .clone()
            .ok_or(SchedulingError::UseAfterRelease {
                channel: self.inner.channel,
            })
    }

    pub fn measured_cardinality(&self) -> Option<u64> {
        *self.inner.cardinality.lock()
    }

    /// Annotate the measured cardinality; only the first annotation sticks
    pub fn set_measured_cardinality(&self, cardinality: u64) -> bool {
        let mut slot = self.inner.cardinality.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(cardinality);
        true
    }

    pub fn reference_count(&self) -> usize {
        self.inner.references.load(Ordering::Acquire)
    }

    /// Number of references taken on top of the producer's
    pub fn obtained_references(&self) -> usize {
        self.inner.obtained.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.reference_count() == 0
    }

    /// Take an additional reference
    pub fn obtain(&self) -> Result<(), SchedulingError> {
        self.inner
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then_some(count + 1)
            })
            .map_err(|_| SchedulingError::UseAfterRelease {
                channel: self.inner.channel,
            })?;
        self.inner.obtained.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Give back one reference; returns whether this disposed the instance
    pub fn release(&self) -> Result<bool, SchedulingError> {
        let previous = self
            .inner
            .references
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            })
            .map_err(|_| SchedulingError::DoubleRelease {
                channel: self.inner.channel,
            })?;

        if previous == 1 {
            self.inner.payload.lock().take();
            tracing::trace!(channel = %self.inner.channel, "channel instance disposed");
            return Ok(true);
        }
        Ok(false)
    }

    pub fn same_instance(&self, other: &ChannelInstance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ChannelInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelInstance")
            .field("channel", &self.inner.channel)
            .field("producer", &self.inner.producer)
            .field("references", &self.reference_count())
            .field("cardinality", &self.measured_cardinality())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::DropCounter;

    #[test]
    fn test_payload_dropped_on_last_release() {
        let drops = Arc::new(AtomicUsize::new(0));
        let instance = ChannelInstance::new(
            ChannelId(0),
            TaskId(0),
            Arc::new(DropCounter::new(&drops)),
            false,
        );

        instance.obtain().unwrap();
        assert_eq!(instance.reference_count(), 2);
        assert_eq!(instance.obtained_references(), 1);

        assert!(!instance.release().unwrap());
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert!(instance.release().unwrap());
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        assert_eq!(
            instance.release(),
            Err(SchedulingError::DoubleRelease {
                channel: ChannelId(0)
            })
        );
        assert!(instance.obtain().is_err());
        assert!(instance.payload().is_err());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cardinality_is_set_once() {
        let instance = ChannelInstance::new(ChannelId(1), TaskId(0), Arc::new(()), true);
        assert!(instance.is_marked_for_instrumentation());

        assert!(instance.set_measured_cardinality(10));
        assert!(!instance.set_measured_cardinality(20));
        assert_eq!(instance.measured_cardinality(), Some(10));

        let clone = instance.clone();
        assert!(clone.same_instance(&instance));
        instance.release().unwrap();
    }
}
