//! Channel-program I/O through the inventory-built partition.

use std::sync::Arc;
use std::time::Duration;

use komodo_types::{AbsoluteAddress, Upi, Word36};
use komodo_vm::channel::{AccessControlWord, AcwModifier, ChannelKind, ChannelProgram, ChannelStatus};
use komodo_vm::device::IoFunction;
use komodo_vm::inventory::{InventoryManager, NodeRef};
use komodo_vm::iop::InputOutputProcessor;
use komodo_vm::msp::MainStorageProcessor;

use rand::{Rng, SeedableRng};

const SOURCE_UPI: Upi = 7;
const WAIT: Duration = Duration::from_secs(5);

struct Partition {
    inventory: InventoryManager,
    msp: Arc<MainStorageProcessor>,
    iop: Arc<InputOutputProcessor>,
}

/// IOP0 -> CHM0 (byte) -> DISK0 (scratch, 128-byte blocks), workers
/// running.
fn partition() -> Partition {
    let inventory = InventoryManager::new();
    let msp = inventory.create_main_storage_processor("MSP0", 1 << 16).unwrap();
    let iop = inventory.create_input_output_processor("IOP0").unwrap();
    inventory
        .create_channel_module(ChannelKind::Byte, "CHM0", "IOP0", 0)
        .unwrap();
    inventory.create_scratch_disk_device("DISK0", 128, 64).unwrap();
    inventory.connect("CHM0", 0, "DISK0").unwrap();

    if let NodeRef::Device(device) = inventory.node("DISK0").unwrap() {
        device.lock().unwrap().set_ready(true).unwrap();
    }
    if let NodeRef::ChannelModule(module) = inventory.node("CHM0").unwrap() {
        module.start();
    }
    Arc::clone(&iop).start();
    inventory.fabric().register(SOURCE_UPI);

    Partition { inventory, msp, iop }
}

fn write_program(block_id: u64, acws: Vec<AccessControlWord>) -> ChannelProgram {
    ChannelProgram {
        cm_index: 0,
        device_index: 0,
        function: IoFunction::Write,
        block_id,
        acws,
        ..Default::default()
    }
}

fn read_program(block_id: u64, acws: Vec<AccessControlWord>) -> ChannelProgram {
    ChannelProgram {
        function: IoFunction::Read,
        ..write_program(block_id, acws)
    }
}

fn addr(offset: u64) -> AbsoluteAddress {
    AbsoluteAddress::new(1, 0, offset)
}

#[test]
fn disk_write_read_round_trip() {
    let partition = partition();
    let storage = partition.msp.get_storage(0).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(0o1357);
    let content: Vec<Word36> = (0..128).map(|_| Word36::new(rng.gen())).collect();
    storage.load(0, &content).unwrap();

    let write = partition
        .iop
        .start_io(SOURCE_UPI, write_program(5, vec![AccessControlWord::increment(addr(0), 128)]));
    assert_eq!(write.wait(WAIT), ChannelStatus::Successful);

    let read = partition
        .iop
        .start_io(SOURCE_UPI, read_program(5, vec![AccessControlWord::increment(addr(0o1000), 128)]));
    assert_eq!(read.wait(WAIT), ChannelStatus::Successful);

    assert_eq!(storage.unload(0o1000, 128).unwrap(), content);
    partition.inventory.clear_configuration().unwrap();
}

#[test]
fn gather_write_concatenates_regions_in_order() {
    let partition = partition();
    let storage = partition.msp.get_storage(0).unwrap();

    // three disjoint source regions of 80, 100 and 44 words
    let regions = [(0o2000_u64, 80_u64), (0o4000, 100), (0o6000, 44)];
    let mut expected = Vec::new();
    for (rank, (base, len)) in regions.iter().enumerate() {
        for ix in 0..*len {
            let word = Word36::new(((rank as u64 + 1) << 18) | ix);
            storage.set(base + ix, word).unwrap();
            expected.push(word);
        }
    }

    let acws = regions
        .iter()
        .map(|(base, len)| AccessControlWord::increment(addr(*base), *len))
        .collect();
    let write = partition.iop.start_io(SOURCE_UPI, write_program(0, acws));
    assert_eq!(write.wait(WAIT), ChannelStatus::Successful);
    assert_eq!(write.program().words_transferred, 224);

    // reading the same blocks back contiguously shows the concatenation
    let read = partition
        .iop
        .start_io(SOURCE_UPI, read_program(0, vec![AccessControlWord::increment(addr(0o10000), 224)]));
    assert_eq!(read.wait(WAIT), ChannelStatus::Successful);
    assert_eq!(storage.unload(0o10000, 224).unwrap(), expected);
    partition.inventory.clear_configuration().unwrap();
}

#[test]
fn skip_data_pads_the_stream() {
    let partition = partition();
    let storage = partition.msp.get_storage(0).unwrap();
    storage.set(0, Word36::new(0o777)).unwrap();
    storage.set(1, Word36::new(0o111)).unwrap();

    let write = partition.iop.start_io(
        SOURCE_UPI,
        write_program(
            0,
            vec![
                AccessControlWord::increment(addr(0), 2),
                AccessControlWord::new(AbsoluteAddress::default(), 3, AcwModifier::SkipData),
            ],
        ),
    );
    assert_eq!(write.wait(WAIT), ChannelStatus::Successful);

    let read = partition
        .iop
        .start_io(SOURCE_UPI, read_program(0, vec![AccessControlWord::increment(addr(0o100), 5)]));
    assert_eq!(read.wait(WAIT), ChannelStatus::Successful);

    let tail = storage.unload(0o100, 5).unwrap();
    assert_eq!(tail[0], Word36::new(0o777));
    assert_eq!(tail[1], Word36::new(0o111));
    assert_eq!(&tail[2..], &[Word36::ZERO; 3]);
    partition.inventory.clear_configuration().unwrap();
}

#[test]
fn unconfigured_channel_module_rejects_synchronously() {
    let partition = partition();

    let program = ChannelProgram {
        cm_index: 1, // one past anything configured
        device_index: 0,
        function: IoFunction::Write,
        acws: vec![AccessControlWord::increment(addr(0), 1)],
        ..Default::default()
    };
    let tracker = partition.iop.start_io(SOURCE_UPI, program);
    assert_eq!(tracker.status(), ChannelStatus::UnconfiguredChannelModule);

    // the configured path still works afterwards
    let ok = partition
        .iop
        .start_io(SOURCE_UPI, write_program(0, vec![AccessControlWord::increment(addr(0), 1)]));
    assert_eq!(ok.wait(WAIT), ChannelStatus::Successful);
    partition.inventory.clear_configuration().unwrap();
}

#[test]
fn unconfigured_device_is_reported() {
    let partition = partition();
    let program = ChannelProgram {
        cm_index: 0,
        device_index: 7,
        function: IoFunction::None,
        ..Default::default()
    };
    let tracker = partition.iop.start_io(SOURCE_UPI, program);
    assert_eq!(tracker.wait(WAIT), ChannelStatus::UnconfiguredDevice);
    partition.inventory.clear_configuration().unwrap();
}

#[test]
fn prepped_file_disk_round_trips_through_the_channel() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("pack.disk");
    komodo_vm::device::FileSystemDiskDevice::prep(&image, 128, 32).unwrap();

    let inventory = InventoryManager::new();
    let msp = inventory.create_main_storage_processor("MSP0", 1 << 14).unwrap();
    let iop = inventory.create_input_output_processor("IOP0").unwrap();
    inventory
        .create_channel_module(ChannelKind::Byte, "CHM0", "IOP0", 0)
        .unwrap();
    inventory.create_file_system_disk_device("DISK0").unwrap();
    inventory.connect("CHM0", 0, "DISK0").unwrap();
    inventory.mount("DISK0", &image).unwrap();

    if let NodeRef::Device(device) = inventory.node("DISK0").unwrap() {
        let mut device = device.lock().unwrap();
        device.set_ready(true).unwrap();
        // a fresh mount raises unit attention; GetInfo clears it
        let mut probe = komodo_vm::device::IoPacket::of_function(IoFunction::GetInfo);
        device.handle_io(&mut probe);
        assert!(probe.status.is_successful());
    }
    if let NodeRef::ChannelModule(module) = inventory.node("CHM0").unwrap() {
        module.start();
    }
    Arc::clone(&iop).start();
    inventory.fabric().register(SOURCE_UPI);

    let storage = msp.get_storage(0).unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0o4242);
    let content: Vec<Word36> = (0..28).map(|_| Word36::new(rng.gen())).collect();
    storage.load(0, &content).unwrap();

    let write = partition_io(&iop, write_program(2, vec![AccessControlWord::increment(addr(0), 28)]));
    assert_eq!(write, ChannelStatus::Successful);
    let read = partition_io(&iop, read_program(2, vec![AccessControlWord::increment(addr(0o200), 28)]));
    assert_eq!(read, ChannelStatus::Successful);
    assert_eq!(storage.unload(0o200, 28).unwrap(), content);

    inventory.clear_configuration().unwrap();
}

fn partition_io(iop: &Arc<InputOutputProcessor>, program: ChannelProgram) -> ChannelStatus {
    iop.start_io(SOURCE_UPI, program).wait(WAIT)
}

#[test]
fn completion_signals_the_source_over_upi() {
    let partition = partition();
    let endpoint = partition.inventory.fabric().register(11);

    let tracker = partition
        .iop
        .start_io(11, write_program(1, vec![AccessControlWord::increment(addr(0), 1)]));
    assert_eq!(tracker.wait(WAIT), ChannelStatus::Successful);

    assert!(endpoint.wait(WAIT), "completion interrupt arrives");
    let sources: Vec<Upi> = endpoint.take_interrupts().into_iter().collect();
    assert_eq!(sources, vec![partition.iop.upi()]);
    partition.inventory.clear_configuration().unwrap();
}
