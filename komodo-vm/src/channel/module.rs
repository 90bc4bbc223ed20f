//! The channel-module worker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use komodo_types::bytes::{byte_count_for, pack_words, unpack_words};
use komodo_types::Word36;
use tracing::{debug, trace};

use crate::consts::{MAX_DEVICE_INDEX, WORKER_POLL_MSECS};
use crate::device::{Device, IoFunction, IoPacket};
use crate::msp::AddressSpace;

use super::{acw_addresses, AcwModifier, ChannelProgram, ChannelStatus, CompletionQueue, Tracker, PAD_WORD};

/// Byte modules repack 36-bit words to and from 8-bit frames for the
/// byte-oriented peripherals; word modules present a native 36-bit channel
/// and so have no byte-oriented devices behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ChannelKind {
    Byte,
    Word,
}

type DeviceSlot = Option<Arc<Mutex<dyn Device>>>;

/// Translates channel programs into device transfers.
///
/// One worker thread per module drains the submission queue; completed
/// trackers go to the owning IOP's completion queue.
pub struct ChannelModule {
    kind: ChannelKind,
    name: String,
    address_space: Arc<AddressSpace>,
    completions: Arc<CompletionQueue>,
    devices: Mutex<Vec<DeviceSlot>>,
    queue: Mutex<VecDeque<Arc<Tracker>>>,
    pending: Condvar,
    terminate: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChannelModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelModule")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ChannelModule {
    pub fn new(
        kind: ChannelKind,
        name: impl Into<String>,
        address_space: Arc<AddressSpace>,
        completions: Arc<CompletionQueue>,
    ) -> Self {
        ChannelModule {
            kind,
            name: name.into(),
            address_space,
            completions,
            devices: Mutex::new(vec![None; MAX_DEVICE_INDEX + 1]),
            queue: Mutex::new(VecDeque::new()),
            pending: Condvar::new(),
            terminate: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a device at `index`; the inventory enforces legality.
    pub(crate) fn attach_device(&self, index: usize, device: Arc<Mutex<dyn Device>>) {
        self.devices.lock().expect("device table poisoned")[index] = Some(device);
    }

    pub(crate) fn detach_device(&self, index: usize) {
        self.devices.lock().expect("device table poisoned")[index] = None;
    }

    pub fn device_indices(&self) -> Vec<usize> {
        self.devices
            .lock()
            .expect("device table poisoned")
            .iter()
            .enumerate()
            .filter_map(|(ix, slot)| slot.as_ref().map(|_| ix))
            .collect()
    }

    /// Enqueue a tracker for the worker.
    pub fn submit(&self, tracker: Arc<Tracker>) {
        self.queue.lock().expect("submission queue poisoned").push_back(tracker);
        self.pending.notify_all();
    }

    /// Spawn the worker thread.
    pub fn start(self: Arc<Self>) {
        let module = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name(format!("cm-{}", self.name))
            .spawn(move || module.run())
            .expect("channel worker spawn");
        *self.worker.lock().expect("worker handle poisoned") = Some(handle);
    }

    /// Ask the worker to exit and join it. In-flight trackers are resolved
    /// as `Terminated`.
    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.pending.notify_all();
        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        for tracker in self.queue.lock().expect("submission queue poisoned").drain(..) {
            tracker.finish(ChannelStatus::Terminated);
        }
    }

    fn run(self: Arc<Self>) {
        debug!(name = %self.name, kind = %self.kind, "channel module worker up");
        loop {
            if self.terminate.load(Ordering::SeqCst) {
                break;
            }
            let tracker = {
                let mut queue = self.queue.lock().expect("submission queue poisoned");
                match queue.pop_front() {
                    Some(tracker) => Some(tracker),
                    None => {
                        let (mut queue, _) = self
                            .pending
                            .wait_timeout(queue, Duration::from_millis(WORKER_POLL_MSECS))
                            .expect("submission queue poisoned");
                        queue.pop_front()
                    }
                }
            };
            if let Some(tracker) = tracker {
                self.service(&tracker);
                self.completions.push(tracker);
                self.completions.notify();
            }
        }
        debug!(name = %self.name, "channel module worker down");
    }

    /// Execute one channel program end to end.
    pub(crate) fn service(&self, tracker: &Arc<Tracker>) {
        let program = tracker.program();
        trace!(name = %self.name, function = %program.function, device = program.device_index, "servicing");

        let device = {
            let devices = self.devices.lock().expect("device table poisoned");
            devices.get(program.device_index).and_then(Clone::clone)
        };
        let Some(device) = device else {
            tracker.finish(ChannelStatus::UnconfiguredDevice);
            return;
        };

        let status = match program.function {
            IoFunction::Write => self.service_write(&program, &device),
            IoFunction::Read | IoFunction::GetInfo => self.service_read(&program, &device),
            IoFunction::None | IoFunction::Reset | IoFunction::Unload => {
                let mut packet = IoPacket::of_function(program.function);
                packet.block_id = program.block_id;
                device.lock().expect("device poisoned").handle_io(&mut packet);
                if packet.status.is_successful() {
                    ChannelStatus::Successful
                } else {
                    ChannelStatus::DeviceError(packet.status)
                }
            }
        };

        if status == ChannelStatus::Successful {
            tracker.update(|p| p.words_transferred = program.word_count());
        }
        tracker.finish(status);
    }

    /// Gather the ACW regions into one contiguous buffer and write it.
    fn service_write(&self, program: &ChannelProgram, device: &Arc<Mutex<dyn Device>>) -> ChannelStatus {
        let words = match self.gather(program) {
            Ok(words) => words,
            Err(status) => return status,
        };
        if words.is_empty() {
            return ChannelStatus::InsufficientBuffers;
        }

        let bytes = self.pad_to_blocks(device, pack_words(&words));
        let mut packet = IoPacket::write(program.block_id, bytes);
        device.lock().expect("device poisoned").handle_io(&mut packet);

        if packet.status.is_successful() {
            ChannelStatus::Successful
        } else {
            ChannelStatus::DeviceError(packet.status)
        }
    }

    /// Read from the device and scatter into the ACW regions.
    fn service_read(&self, program: &ChannelProgram, device: &Arc<Mutex<dyn Device>>) -> ChannelStatus {
        let word_count = program.word_count();
        if word_count == 0 {
            return ChannelStatus::InsufficientBuffers;
        }

        let mut packet = if program.function == IoFunction::GetInfo {
            IoPacket::of_function(IoFunction::GetInfo)
        } else {
            let byte_count = byte_count_for(word_count as usize) as u64;
            let rounded = self.round_to_blocks(device, byte_count);
            IoPacket::read(program.block_id, rounded)
        };
        device.lock().expect("device poisoned").handle_io(&mut packet);
        if !packet.status.is_successful() {
            return ChannelStatus::DeviceError(packet.status);
        }

        let words = unpack_words(&packet.buffer, word_count as usize);
        if (words.len() as u64) < word_count && program.function != IoFunction::GetInfo {
            return ChannelStatus::InsufficientBuffers;
        }
        self.scatter(program, &words)
    }

    /// Collect the write data described by the ACW list, in ACW order.
    fn gather(&self, program: &ChannelProgram) -> Result<Vec<Word36>, ChannelStatus> {
        let mut words = Vec::with_capacity(program.word_count() as usize);
        for acw in &program.acws {
            match acw.modifier {
                AcwModifier::SkipData => {
                    words.extend(itertools::repeat_n(PAD_WORD, acw.count as usize));
                }
                _ => {
                    for address in acw_addresses(acw) {
                        let word = self
                            .address_space
                            .read(&address)
                            .map_err(|_| ChannelStatus::InvalidAccessControlWord)?;
                        words.push(word);
                    }
                }
            }
        }
        Ok(words)
    }

    /// Distribute read data over the ACW list, in ACW order.
    fn scatter(&self, program: &ChannelProgram, words: &[Word36]) -> ChannelStatus {
        let mut cursor = words.iter();
        for acw in &program.acws {
            match acw.modifier {
                AcwModifier::SkipData => {
                    // discard this region's share of the stream
                    for _ in 0..acw.count {
                        cursor.next();
                    }
                }
                _ => {
                    for address in acw_addresses(acw) {
                        let Some(word) = cursor.next() else {
                            return ChannelStatus::Successful;
                        };
                        if self.address_space.write(&address, *word).is_err() {
                            return ChannelStatus::InvalidAccessControlWord;
                        }
                    }
                }
            }
        }
        ChannelStatus::Successful
    }

    /// Round a byte length up to whole device blocks.
    fn round_to_blocks(&self, device: &Arc<Mutex<dyn Device>>, bytes: u64) -> u64 {
        let block_size = device
            .lock()
            .expect("device poisoned")
            .geometry()
            .map_or(0, |g| g.block_size);
        if block_size == 0 {
            bytes
        } else {
            bytes.div_ceil(block_size) * block_size
        }
    }

    /// Zero-pad a buffer out to whole device blocks.
    fn pad_to_blocks(&self, device: &Arc<Mutex<dyn Device>>, mut bytes: Vec<u8>) -> Vec<u8> {
        let target = self.round_to_blocks(device, bytes.len() as u64) as usize;
        bytes.resize(target, 0);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::AccessControlWord;
    use crate::device::ScratchDiskDevice;
    use crate::msp::MainStorageProcessor;
    use komodo_types::AbsoluteAddress;

    fn rig() -> (Arc<AddressSpace>, Arc<MainStorageProcessor>, Arc<ChannelModule>) {
        let space = Arc::new(AddressSpace::new());
        let msp = Arc::new(MainStorageProcessor::new(1, 4096));
        space.attach(Arc::clone(&msp));
        let module = Arc::new(ChannelModule::new(
            ChannelKind::Byte,
            "CHM0",
            Arc::clone(&space),
            Arc::new(CompletionQueue::new()),
        ));
        let mut disk = ScratchDiskDevice::new(128, 64).unwrap();
        disk.set_ready(true).unwrap();
        module.attach_device(0, Arc::new(Mutex::new(disk)));
        (space, msp, module)
    }

    fn run(module: &Arc<ChannelModule>, program: ChannelProgram) -> Arc<Tracker> {
        let tracker = Arc::new(Tracker::new(7, program));
        module.service(&tracker);
        tracker
    }

    #[test]
    fn write_read_round_trip() {
        let (_space, msp, module) = rig();
        let storage = msp.get_storage(0).unwrap();
        let data: Vec<Word36> = (0..128_u64).map(|v| Word36::new(v * 0o101)).collect();
        storage.load(0, &data).unwrap();

        let write = run(
            &module,
            ChannelProgram {
                iop_upi: 5,
                cm_index: 0,
                device_index: 0,
                function: IoFunction::Write,
                block_id: 2,
                acws: vec![AccessControlWord::increment(AbsoluteAddress::new(1, 0, 0), 128)],
                ..Default::default()
            },
        );
        assert_eq!(write.status(), ChannelStatus::Successful);
        assert_eq!(write.program().words_transferred, 128);

        let read = run(
            &module,
            ChannelProgram {
                iop_upi: 5,
                cm_index: 0,
                device_index: 0,
                function: IoFunction::Read,
                block_id: 2,
                acws: vec![AccessControlWord::increment(AbsoluteAddress::new(1, 0, 0o1000), 128)],
                ..Default::default()
            },
        );
        assert_eq!(read.status(), ChannelStatus::Successful);
        assert_eq!(storage.unload(0o1000, 128).unwrap(), data);
    }

    #[test]
    fn gather_concatenates_in_acw_order() {
        let (_space, msp, module) = rig();
        let storage = msp.get_storage(0).unwrap();
        for offset in 0..300_u64 {
            storage.set(offset, Word36::new(offset + 1)).unwrap();
        }

        let program = ChannelProgram {
            function: IoFunction::Write,
            acws: vec![
                AccessControlWord::increment(AbsoluteAddress::new(1, 0, 100), 10),
                AccessControlWord::increment(AbsoluteAddress::new(1, 0, 0), 5),
                AccessControlWord::new(AbsoluteAddress::new(1, 0, 200), 3, AcwModifier::NoChange),
            ],
            ..Default::default()
        };
        let words = module.gather(&program).unwrap();
        let expected: Vec<Word36> = (101..=110)
            .chain(1..=5)
            .chain([201, 201, 201])
            .map(Word36::new)
            .collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn decrement_walks_backward() {
        let (_space, msp, module) = rig();
        let storage = msp.get_storage(0).unwrap();
        for offset in 0..8_u64 {
            storage.set(offset, Word36::new(offset)).unwrap();
        }
        let program = ChannelProgram {
            function: IoFunction::Write,
            acws: vec![AccessControlWord::new(
                AbsoluteAddress::new(1, 0, 5),
                4,
                AcwModifier::Decrement,
            )],
            ..Default::default()
        };
        let words = module.gather(&program).unwrap();
        assert_eq!(words, vec![Word36::new(5), Word36::new(4), Word36::new(3), Word36::new(2)]);
    }

    #[test]
    fn skip_data_pads_and_discards() {
        let (_space, msp, module) = rig();
        let storage = msp.get_storage(0).unwrap();
        storage.set(0, Word36::new(0o7)).unwrap();

        let program = ChannelProgram {
            function: IoFunction::Write,
            acws: vec![
                AccessControlWord::increment(AbsoluteAddress::new(1, 0, 0), 1),
                AccessControlWord::new(AbsoluteAddress::default(), 3, AcwModifier::SkipData),
            ],
            ..Default::default()
        };
        let words = module.gather(&program).unwrap();
        assert_eq!(words, vec![Word36::new(0o7), PAD_WORD, PAD_WORD, PAD_WORD]);
    }

    #[test]
    fn unknown_device_is_unconfigured() {
        let (_space, _msp, module) = rig();
        let tracker = run(
            &module,
            ChannelProgram {
                device_index: 9,
                function: IoFunction::None,
                ..Default::default()
            },
        );
        assert_eq!(tracker.status(), ChannelStatus::UnconfiguredDevice);
    }

    #[test]
    fn bad_acw_address_is_reported() {
        let (_space, _msp, module) = rig();
        let tracker = run(
            &module,
            ChannelProgram {
                device_index: 0,
                function: IoFunction::Write,
                acws: vec![AccessControlWord::increment(AbsoluteAddress::new(3, 0, 0), 4)],
                ..Default::default()
            },
        );
        assert_eq!(tracker.status(), ChannelStatus::InvalidAccessControlWord);
    }
}
