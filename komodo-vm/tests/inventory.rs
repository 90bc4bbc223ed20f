//! Inventory identity and topology invariants.

use komodo_vm::channel::ChannelKind;
use komodo_vm::consts::{FIRST_IP_UPI, MAX_IP_COUNT};
use komodo_vm::error::InventoryError;
use komodo_vm::inventory::{HardwareConfiguration, InventoryManager};

fn io_partition() -> InventoryManager {
    let inventory = InventoryManager::new();
    inventory.create_main_storage_processor("MSP0", 4096).unwrap();
    inventory.create_input_output_processor("IOP0").unwrap();
    inventory
        .create_channel_module(ChannelKind::Byte, "CHM0", "IOP0", 0)
        .unwrap();
    inventory.create_scratch_disk_device("DISK0", 128, 16).unwrap();
    inventory
}

fn dump_string(inventory: &InventoryManager) -> String {
    let mut bytes = Vec::new();
    inventory.dump(&mut bytes).unwrap();
    String::from_utf8(bytes).unwrap()
}

#[test]
fn node_names_fold_case_and_conflict() {
    let inventory = InventoryManager::new();
    inventory.create_input_output_processor("iop0").unwrap();
    let err = inventory.create_instruction_processor("IoP0").unwrap_err();
    assert!(matches!(err, InventoryError::NodeNameConflict(name) if name == "IOP0"));
    assert_eq!(inventory.node_names(), vec!["IOP0"]);
}

#[test]
fn connect_then_disconnect_restores_the_inventory() {
    let inventory = io_partition();
    let before = dump_string(&inventory);

    inventory.connect("CHM0", 3, "DISK0").unwrap();
    inventory.disconnect("CHM0", "DISK0").unwrap();

    assert_eq!(dump_string(&inventory), before);
}

#[test]
fn duplicate_edges_are_rejected() {
    let inventory = io_partition();
    inventory.connect("CHM0", 3, "DISK0").unwrap();

    // same pair again, any index
    assert!(matches!(
        inventory.connect("CHM0", 4, "DISK0"),
        Err(InventoryError::CannotConnect { .. })
    ));
    // same index, different device
    inventory.create_scratch_disk_device("DISK1", 128, 16).unwrap();
    assert!(matches!(
        inventory.connect("CHM0", 3, "DISK1"),
        Err(InventoryError::DeviceIndexConflict(3))
    ));
}

#[test]
fn illegal_edges_are_rejected() {
    let inventory = io_partition();
    inventory.create_instruction_processor("IP0").unwrap();

    assert!(matches!(
        inventory.connect("IOP0", 1, "DISK0"),
        Err(InventoryError::CannotConnect { .. })
    ));
    assert!(matches!(
        inventory.connect("IP0", 0, "CHM0"),
        Err(InventoryError::CannotConnect { .. })
    ));
    // word channel modules front no byte devices
    inventory
        .create_channel_module(ChannelKind::Word, "CHW0", "IOP0", 1)
        .unwrap();
    assert!(matches!(
        inventory.connect("CHW0", 0, "DISK0"),
        Err(InventoryError::CannotConnect { .. })
    ));
}

#[test]
fn channel_module_keeps_a_single_ancestor() {
    let inventory = io_partition();
    inventory.create_input_output_processor("IOP1").unwrap();
    assert!(matches!(
        inventory.connect("IOP1", 2, "CHM0"),
        Err(InventoryError::CannotConnect { .. })
    ));
}

#[test]
fn device_indices_are_bounded() {
    let inventory = io_partition();
    assert!(matches!(
        inventory.connect("CHM0", 16, "DISK0"),
        Err(InventoryError::DeviceIndexConflict(16))
    ));
    assert!(matches!(
        inventory.create_channel_module(ChannelKind::Byte, "CHM9", "IOP0", 7),
        Err(InventoryError::ChannelModuleIndexConflict(7))
    ));
}

#[test]
fn upi_allocation_reuses_the_lowest_freed_index() {
    let inventory = InventoryManager::new();
    let names: Vec<String> = (0..4).map(|ix| format!("IP{ix}")).collect();
    for name in &names {
        inventory.create_instruction_processor(name).unwrap();
    }
    // IP0..IP3 hold UPIs 7..=10
    assert_eq!(inventory.processor_upis(), vec![7, 8, 9, 10]);

    inventory.delete_node("IP1").unwrap();
    assert_eq!(inventory.processor_upis(), vec![7, 9, 10]);

    let replacement = inventory.create_instruction_processor("IP9").unwrap();
    assert_eq!(replacement.upi(), 8, "the freed index comes back first");
    assert_eq!(inventory.processor_upis(), vec![7, 8, 9, 10]);
}

#[test]
fn processor_classes_saturate() {
    let inventory = InventoryManager::new();
    for ix in 0..MAX_IP_COUNT {
        inventory.create_instruction_processor(&format!("IP{ix}")).unwrap();
    }
    assert!(matches!(
        inventory.create_instruction_processor("IPX"),
        Err(InventoryError::MaxNodes(_))
    ));
    let last = FIRST_IP_UPI + MAX_IP_COUNT as u16 - 1;
    assert!(inventory.processor_upis().contains(&last));

    inventory.create_system_processor("SP0").unwrap();
    assert!(matches!(
        inventory.create_system_processor("SP1"),
        Err(InventoryError::MaxNodes(_))
    ));
}

#[test]
fn clear_configuration_empties_the_registry() {
    let inventory = io_partition();
    inventory.connect("CHM0", 0, "DISK0").unwrap();
    inventory.create_instruction_processor("IP0").unwrap();

    inventory.clear_configuration().unwrap();
    assert!(inventory.node_names().is_empty());
    assert!(inventory.processor_upis().is_empty());

    // the registry is reusable afterwards
    inventory.create_input_output_processor("IOP0").unwrap();
}

#[test]
fn import_configuration_builds_the_tree_and_mail_slots() {
    let json = r#"{
        "system_processor": { "name": "SP0" },
        "main_storage_processors": [{ "name": "MSP0", "working_size": 65536 }],
        "instruction_processors": [{ "name": "IP0" }],
        "input_output_processors": [{
            "name": "IOP0",
            "channel_modules": [{
                "name": "CHM0",
                "index": 0,
                "devices": [
                    { "kind": "scratch_disk", "name": "DISK0", "index": 0,
                      "block_size": 128, "block_count": 16 }
                ]
            }]
        }]
    }"#;
    let config: HardwareConfiguration = serde_json::from_str(json).unwrap();

    let inventory = InventoryManager::new();
    inventory.import_configuration(&config).unwrap();

    let mut names = inventory.node_names();
    names.sort();
    assert_eq!(names, vec!["CHM0", "DISK0", "IOP0", "IP0", "MSP0", "SP0"]);
    assert_eq!(inventory.processor_upis(), vec![0, 1, 5, 7]);

    // mail slots cover every ordered pair of the four processors
    let slots = inventory.mail_slots().expect("mail slots installed");
    assert_eq!(slots.record_count().unwrap(), 12);
    assert!(slots.buffer_address(7, 5).unwrap().is_some());
    assert!(slots.buffer_address(7, 7).unwrap().is_none());

    inventory.clear_configuration().unwrap();
}
