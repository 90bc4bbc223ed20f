//! Input/output processor.
//!
//! `start_io` validates the target channel module, marks the program in
//! progress and hands it off; submission never blocks on the transfer. The
//! worker drains completed trackers and raises a UPI interrupt back at each
//! program's source processor, and acknowledges incoming UPI traffic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use komodo_types::Upi;
use tracing::{debug, trace};

use crate::channel::{ChannelModule, ChannelProgram, ChannelStatus, CompletionQueue, Tracker};
use crate::consts::{MAX_CHANNEL_MODULE_INDEX, WORKER_POLL_MSECS};
use crate::upi::{UpiEndpoint, UpiFabric};

pub struct InputOutputProcessor {
    upi: Upi,
    name: String,
    fabric: Arc<UpiFabric>,
    endpoint: Arc<UpiEndpoint>,
    /// Shared with every attached channel module.
    completions: Arc<CompletionQueue>,
    channel_modules: Mutex<Vec<Option<Arc<ChannelModule>>>>,
    /// Trackers whose completion signal is still owed to the source.
    finalized: Mutex<VecDeque<Arc<Tracker>>>,
    terminate: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InputOutputProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputOutputProcessor")
            .field("upi", &self.upi)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl InputOutputProcessor {
    pub fn new(upi: Upi, name: impl Into<String>, fabric: Arc<UpiFabric>) -> Self {
        let endpoint = fabric.register(upi);
        InputOutputProcessor {
            upi,
            name: name.into(),
            fabric,
            endpoint,
            completions: Arc::new(CompletionQueue::new()),
            channel_modules: Mutex::new(vec![None; MAX_CHANNEL_MODULE_INDEX + 1]),
            finalized: Mutex::new(VecDeque::new()),
            terminate: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub const fn upi(&self) -> Upi {
        self.upi
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The completion queue channel modules created under this IOP share.
    pub fn completion_queue(&self) -> Arc<CompletionQueue> {
        Arc::clone(&self.completions)
    }

    pub(crate) fn attach_channel_module(&self, index: usize, module: Arc<ChannelModule>) {
        self.channel_modules.lock().expect("cm table poisoned")[index] = Some(module);
    }

    pub(crate) fn detach_channel_module(&self, index: usize) {
        self.channel_modules.lock().expect("cm table poisoned")[index] = None;
    }

    pub fn channel_module(&self, index: usize) -> Option<Arc<ChannelModule>> {
        self.channel_modules
            .lock()
            .expect("cm table poisoned")
            .get(index)
            .and_then(Clone::clone)
    }

    pub fn channel_module_indices(&self) -> Vec<usize> {
        self.channel_modules
            .lock()
            .expect("cm table poisoned")
            .iter()
            .enumerate()
            .filter_map(|(ix, slot)| slot.as_ref().map(|_| ix))
            .collect()
    }

    /// Schedule a channel program.
    ///
    /// On success the returned tracker is `InProgress` and the transfer is
    /// queued on the channel module. An unknown channel-module index
    /// resolves the tracker immediately and queues nothing.
    pub fn start_io(&self, source: Upi, mut program: ChannelProgram) -> Arc<Tracker> {
        program.iop_upi = self.upi;
        program.status = ChannelStatus::InProgress;

        let module = self.channel_module(program.cm_index);
        let tracker = Arc::new(Tracker::new(source, program));
        match module {
            Some(module) => {
                trace!(iop = self.upi, source, "channel program scheduled");
                module.submit(Arc::clone(&tracker));
            }
            None => tracker.finish(ChannelStatus::UnconfiguredChannelModule),
        }
        tracker
    }

    /// Spawn the worker thread.
    pub fn start(self: Arc<Self>) {
        let iop = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name(format!("iop-{}", self.name))
            .spawn(move || iop.run())
            .expect("iop worker spawn");
        *self.worker.lock().expect("worker handle poisoned") = Some(handle);
    }

    /// Ask the worker to exit and join it.
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.completions.notify();
        self.endpoint.notify();
        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        debug!(upi = self.upi, name = %self.name, "iop worker up");
        loop {
            if self.terminate.load(Ordering::SeqCst) {
                break;
            }
            self.cycle();
            self.completions.wait(Duration::from_millis(WORKER_POLL_MSECS));
        }
        debug!(upi = self.upi, "iop worker down");
    }

    /// One pass over owed completions and pending UPI traffic.
    ///
    /// Exposed to drive the IOP synchronously when no worker is running,
    /// as the test suites do.
    pub fn cycle(&self) {
        for tracker in self.completions.drain() {
            self.finalized.lock().expect("finalized queue poisoned").push_back(tracker);
        }

        // owed signals drain in order; an unknown source stays owed
        let mut finalized = self.finalized.lock().expect("finalized queue poisoned");
        while let Some(tracker) = finalized.front() {
            if self.fabric.send(self.upi, tracker.source()) {
                finalized.pop_front();
            } else {
                break;
            }
        }
        drop(finalized);

        // incoming signals only need acknowledging at this layer
        for source in self.endpoint.take_interrupts() {
            self.fabric.ack(self.upi, source);
        }
        self.endpoint.take_acknowledgements();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelKind;
    use crate::msp::AddressSpace;

    #[test]
    fn unknown_channel_module_is_rejected_synchronously() {
        let fabric = Arc::new(UpiFabric::new());
        let iop = InputOutputProcessor::new(5, "IOP0", fabric);
        let tracker = iop.start_io(
            7,
            ChannelProgram {
                cm_index: 3,
                ..Default::default()
            },
        );
        assert_eq!(tracker.status(), ChannelStatus::UnconfiguredChannelModule);
    }

    #[test]
    fn completion_raises_upi_at_source() {
        let fabric = Arc::new(UpiFabric::new());
        let source_endpoint = fabric.register(7);
        let iop = Arc::new(InputOutputProcessor::new(5, "IOP0", Arc::clone(&fabric)));

        let module = Arc::new(ChannelModule::new(
            ChannelKind::Byte,
            "CHM0",
            Arc::new(AddressSpace::new()),
            iop.completion_queue(),
        ));
        iop.attach_channel_module(0, Arc::clone(&module));

        // no device at index 0: the program finalizes as UnconfiguredDevice
        let tracker = iop.start_io(7, ChannelProgram::default());
        let submitted = {
            // drive the channel module synchronously
            module.service(&tracker);
            iop.completion_queue().push(Arc::clone(&tracker));
            tracker
        };
        iop.cycle();

        assert_eq!(submitted.status(), ChannelStatus::UnconfiguredDevice);
        let pending: Vec<Upi> = source_endpoint.take_interrupts().into_iter().collect();
        assert_eq!(pending, vec![5]);
    }
}
