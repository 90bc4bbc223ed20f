//! The partition inventory.
//!
//! A process-wide registry that creates, connects and tears down every
//! node of the partition. Nodes live in an arena keyed by stable handles;
//! the ancestor/descendant graph stores handles, never references, so
//! teardown is a plain walk. All mutation serializes on one mutex; the hot
//! I/O paths never touch it.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use komodo_types::Upi;
use tracing::info;

use crate::channel::{ChannelKind, ChannelModule};
use crate::consts::{
    FIRST_IOP_UPI, FIRST_IP_UPI, FIRST_MSP_UPI, MAX_CHANNEL_MODULE_INDEX, MAX_DEVICE_INDEX, MAX_IOP_COUNT,
    MAX_IP_COUNT, MAX_MSP_COUNT, SP_UPI,
};
use crate::device::{Device, DeviceKind, FileSystemDiskDevice, FileSystemTapeDevice, ScratchDiskDevice};
use crate::error::InventoryError;
use crate::iop::InputOutputProcessor;
use crate::ip::{InstructionProcessor, StopReason};
use crate::msp::{AddressSpace, MainStorageProcessor};
use crate::sp::SystemProcessor;
use crate::upi::{MailSlotTable, UpiFabric};

mod config;

pub use config::{
    ChannelModuleConfig, DeviceConfig, HardwareConfiguration, InstructionProcessorConfig,
    InputOutputProcessorConfig, MainStorageConfig, SystemProcessorConfig,
};

/// Stable identifier of a node in the arena.
pub type NodeHandle = u32;

/// Words of hidden storage reserved for the mail-slot table and the
/// partition communications area.
const HIDDEN_MSP_WORDS: u64 = 4096;

/// How long `delete_node` waits for an instruction processor to observe
/// its stop request.
const STOP_SPIN_LIMIT: Duration = Duration::from_secs(5);

/// The typed payload of an arena entry.
#[derive(Debug, Clone)]
pub enum NodeRef {
    SystemProcessor(Arc<SystemProcessor>),
    InstructionProcessor(Arc<InstructionProcessor>),
    InputOutputProcessor(Arc<InputOutputProcessor>),
    MainStorageProcessor(Arc<MainStorageProcessor>),
    ChannelModule(Arc<ChannelModule>),
    Device(Arc<Mutex<dyn Device>>),
}

/// Coarse node classification used by the connection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum NodeCategory {
    SystemProcessor,
    InstructionProcessor,
    InputOutputProcessor,
    MainStorageProcessor,
    ChannelModule,
    Device,
}

impl NodeRef {
    pub fn category(&self) -> NodeCategory {
        match self {
            Self::SystemProcessor(_) => NodeCategory::SystemProcessor,
            Self::InstructionProcessor(_) => NodeCategory::InstructionProcessor,
            Self::InputOutputProcessor(_) => NodeCategory::InputOutputProcessor,
            Self::MainStorageProcessor(_) => NodeCategory::MainStorageProcessor,
            Self::ChannelModule(_) => NodeCategory::ChannelModule,
            Self::Device(_) => NodeCategory::Device,
        }
    }
}

#[derive(Debug)]
struct NodeEntry {
    handle: NodeHandle,
    name: String,
    node: NodeRef,
    channel_kind: Option<ChannelKind>,
    device_kind: Option<DeviceKind>,
    /// Ancestor handle per edge, with the index this node occupies there.
    ancestors: BTreeMap<NodeHandle, usize>,
    /// Descendant handle per local index.
    descendants: BTreeMap<usize, NodeHandle>,
}

#[derive(Debug, Default)]
struct InventoryState {
    nodes: BTreeMap<NodeHandle, NodeEntry>,
    names: BTreeMap<String, NodeHandle>,
    upis: BTreeMap<Upi, NodeHandle>,
    next_handle: NodeHandle,
}

impl InventoryState {
    fn handle_by_name(&self, name: &str) -> Result<NodeHandle, InventoryError> {
        self.names
            .get(&name.to_uppercase())
            .copied()
            .ok_or_else(|| InventoryError::NodeNotFound(name.to_string()))
    }

    fn reserve_name(&self, name: &str) -> Result<String, InventoryError> {
        let canonical = name.to_uppercase();
        if self.names.contains_key(&canonical) {
            return Err(InventoryError::NodeNameConflict(canonical));
        }
        Ok(canonical)
    }

    /// The lowest free UPI in `[first, first+count)`.
    fn allocate_upi(&self, first: Upi, count: usize, class: &'static str) -> Result<Upi, InventoryError> {
        (first..first + count as Upi)
            .find(|upi| !self.upis.contains_key(upi))
            .ok_or(InventoryError::MaxNodes(class))
    }

    fn insert(&mut self, name: String, node: NodeRef, upi: Option<Upi>) -> NodeHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.names.insert(name.clone(), handle);
        if let Some(upi) = upi {
            self.upis.insert(upi, handle);
        }
        self.nodes.insert(
            handle,
            NodeEntry {
                handle,
                name,
                node,
                channel_kind: None,
                device_kind: None,
                ancestors: BTreeMap::new(),
                descendants: BTreeMap::new(),
            },
        );
        handle
    }
}

/// Process-wide creator and registry of partition hardware.
pub struct InventoryManager {
    fabric: Arc<UpiFabric>,
    address_space: Arc<AddressSpace>,
    hidden_msp: Arc<MainStorageProcessor>,
    mail_slots: Mutex<Option<MailSlotTable>>,
    state: Mutex<InventoryState>,
}

impl std::fmt::Debug for InventoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryManager").finish_non_exhaustive()
    }
}

impl Default for InventoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryManager {
    pub fn new() -> Self {
        let fabric = Arc::new(UpiFabric::new());
        let address_space = Arc::new(AddressSpace::new());
        let hidden_msp = Arc::new(MainStorageProcessor::new(
            komodo_types::HIDDEN_MSP_UPI,
            HIDDEN_MSP_WORDS,
        ));
        address_space.attach(Arc::clone(&hidden_msp));
        InventoryManager {
            fabric,
            address_space,
            hidden_msp,
            mail_slots: Mutex::new(None),
            state: Mutex::new(InventoryState::default()),
        }
    }

    pub fn fabric(&self) -> Arc<UpiFabric> {
        Arc::clone(&self.fabric)
    }

    pub fn address_space(&self) -> Arc<AddressSpace> {
        Arc::clone(&self.address_space)
    }

    /// The hidden configuration MSP at UPI −1.
    pub fn hidden_msp(&self) -> Arc<MainStorageProcessor> {
        Arc::clone(&self.hidden_msp)
    }

    /* node creation */

    pub fn create_system_processor(&self, name: &str) -> Result<Arc<SystemProcessor>, InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let canonical = state.reserve_name(name)?;
        if state.upis.contains_key(&SP_UPI) {
            return Err(InventoryError::MaxNodes("system processor"));
        }
        let sp = Arc::new(SystemProcessor::new(canonical.clone(), &self.fabric));
        state.insert(canonical, NodeRef::SystemProcessor(Arc::clone(&sp)), Some(SP_UPI));
        drop(state);

        // late-bound SYSC plumbing for processors created first
        self.for_each_ip(|ip| ip.attach_system_processor(Arc::clone(&sp)));
        info!(name, upi = SP_UPI, "system processor created");
        Ok(sp)
    }

    pub fn create_instruction_processor(&self, name: &str) -> Result<Arc<InstructionProcessor>, InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let canonical = state.reserve_name(name)?;
        let upi = state.allocate_upi(FIRST_IP_UPI, MAX_IP_COUNT, "instruction processor")?;
        let ip = Arc::new(InstructionProcessor::new(
            upi,
            canonical.clone(),
            Arc::clone(&self.address_space),
            Arc::clone(&self.fabric),
        ));
        if let Some(sp) = Self::system_processor_of(&state) {
            ip.attach_system_processor(sp);
        }
        state.insert(canonical, NodeRef::InstructionProcessor(Arc::clone(&ip)), Some(upi));
        info!(name, upi, "instruction processor created");
        Ok(ip)
    }

    pub fn create_input_output_processor(&self, name: &str) -> Result<Arc<InputOutputProcessor>, InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let canonical = state.reserve_name(name)?;
        let upi = state.allocate_upi(FIRST_IOP_UPI, MAX_IOP_COUNT, "input/output processor")?;
        let iop = Arc::new(InputOutputProcessor::new(upi, canonical.clone(), Arc::clone(&self.fabric)));
        state.insert(canonical, NodeRef::InputOutputProcessor(Arc::clone(&iop)), Some(upi));
        info!(name, upi, "input/output processor created");
        Ok(iop)
    }

    pub fn create_main_storage_processor(
        &self,
        name: &str,
        working_size: u64,
    ) -> Result<Arc<MainStorageProcessor>, InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let canonical = state.reserve_name(name)?;
        let upi = state.allocate_upi(FIRST_MSP_UPI, MAX_MSP_COUNT, "main storage processor")?;
        let msp = Arc::new(MainStorageProcessor::new(i16::try_from(upi).expect("upi fits"), working_size));
        self.address_space.attach(Arc::clone(&msp));
        state.insert(canonical, NodeRef::MainStorageProcessor(Arc::clone(&msp)), Some(upi));
        info!(name, upi, "main storage processor created");
        Ok(msp)
    }

    /// Create a channel module and connect it to its IOP in one step;
    /// channel modules never exist unparented.
    pub fn create_channel_module(
        &self,
        kind: ChannelKind,
        name: &str,
        iop_name: &str,
        cm_index: usize,
    ) -> Result<Arc<ChannelModule>, InventoryError> {
        if cm_index > MAX_CHANNEL_MODULE_INDEX {
            return Err(InventoryError::ChannelModuleIndexConflict(cm_index));
        }
        let mut state = self.state.lock().expect("inventory poisoned");
        let canonical = state.reserve_name(name)?;
        let iop_handle = state.handle_by_name(iop_name)?;
        let NodeRef::InputOutputProcessor(iop) = state.nodes[&iop_handle].node.clone() else {
            return Err(InventoryError::CannotConnect {
                ancestor: iop_name.to_uppercase(),
                descendant: canonical,
            });
        };
        if state.nodes[&iop_handle].descendants.contains_key(&cm_index) {
            return Err(InventoryError::ChannelModuleIndexConflict(cm_index));
        }

        let module = Arc::new(ChannelModule::new(
            kind,
            canonical.clone(),
            Arc::clone(&self.address_space),
            iop.completion_queue(),
        ));
        let handle = state.insert(canonical.clone(), NodeRef::ChannelModule(Arc::clone(&module)), None);
        state.nodes.get_mut(&handle).expect("just inserted").channel_kind = Some(kind);
        state
            .nodes
            .get_mut(&iop_handle)
            .expect("iop exists")
            .descendants
            .insert(cm_index, handle);
        state
            .nodes
            .get_mut(&handle)
            .expect("just inserted")
            .ancestors
            .insert(iop_handle, cm_index);
        iop.attach_channel_module(cm_index, Arc::clone(&module));
        info!(name, iop = iop_name, cm_index, "channel module created");
        Ok(module)
    }

    fn register_device(
        &self,
        name: &str,
        kind: DeviceKind,
        device: Arc<Mutex<dyn Device>>,
    ) -> Result<Arc<Mutex<dyn Device>>, InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let canonical = state.reserve_name(name)?;
        let handle = state.insert(canonical, NodeRef::Device(Arc::clone(&device)), None);
        state.nodes.get_mut(&handle).expect("just inserted").device_kind = Some(kind);
        info!(name, %kind, "device created");
        Ok(device)
    }

    pub fn create_file_system_disk_device(&self, name: &str) -> Result<Arc<Mutex<dyn Device>>, InventoryError> {
        self.register_device(name, DeviceKind::FileSystemDisk, Arc::new(Mutex::new(FileSystemDiskDevice::new())))
    }

    pub fn create_scratch_disk_device(
        &self,
        name: &str,
        block_size: u64,
        block_count: u64,
    ) -> Result<Arc<Mutex<dyn Device>>, InventoryError> {
        let device = ScratchDiskDevice::new(block_size, block_count)
            .map_err(|_| InventoryError::InvalidDeviceGeometry(block_size))?;
        self.register_device(name, DeviceKind::ScratchDisk, Arc::new(Mutex::new(device)))
    }

    pub fn create_file_system_tape_device(&self, name: &str) -> Result<Arc<Mutex<dyn Device>>, InventoryError> {
        self.register_device(name, DeviceKind::FileSystemTape, Arc::new(Mutex::new(FileSystemTapeDevice::new())))
    }

    /* topology */

    /// Whether the static connection rules admit the edge.
    fn edge_is_legal(ancestor: &NodeEntry, descendant: &NodeEntry) -> bool {
        match (ancestor.node.category(), descendant.node.category()) {
            (NodeCategory::InputOutputProcessor, NodeCategory::ChannelModule) => true,
            (NodeCategory::ChannelModule, NodeCategory::Device) => {
                ancestor.channel_kind == Some(ChannelKind::Byte)
                    && matches!(
                        descendant.device_kind,
                        Some(DeviceKind::FileSystemDisk | DeviceKind::ScratchDisk | DeviceKind::FileSystemTape)
                    )
            }
            _ => false,
        }
    }

    /// Connect `descendant` under `ancestor` at `node_index`.
    pub fn connect(&self, ancestor: &str, node_index: usize, descendant: &str) -> Result<(), InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let ancestor_handle = state.handle_by_name(ancestor)?;
        let descendant_handle = state.handle_by_name(descendant)?;

        let ancestor_entry = &state.nodes[&ancestor_handle];
        let descendant_entry = &state.nodes[&descendant_handle];
        if !Self::edge_is_legal(ancestor_entry, descendant_entry) {
            return Err(InventoryError::CannotConnect {
                ancestor: ancestor_entry.name.clone(),
                descendant: descendant_entry.name.clone(),
            });
        }

        let index_limit = match ancestor_entry.node.category() {
            NodeCategory::InputOutputProcessor => MAX_CHANNEL_MODULE_INDEX,
            _ => MAX_DEVICE_INDEX,
        };
        if node_index > index_limit {
            return Err(match ancestor_entry.node.category() {
                NodeCategory::InputOutputProcessor => InventoryError::ChannelModuleIndexConflict(node_index),
                _ => InventoryError::DeviceIndexConflict(node_index),
            });
        }
        if ancestor_entry.descendants.contains_key(&node_index) {
            return Err(InventoryError::DeviceIndexConflict(node_index));
        }
        if descendant_entry.ancestors.contains_key(&ancestor_handle) {
            return Err(InventoryError::CannotConnect {
                ancestor: ancestor_entry.name.clone(),
                descendant: descendant_entry.name.clone(),
            });
        }
        // a channel module serves exactly one IOP
        if descendant_entry.node.category() == NodeCategory::ChannelModule && !descendant_entry.ancestors.is_empty() {
            return Err(InventoryError::CannotConnect {
                ancestor: ancestor_entry.name.clone(),
                descendant: descendant_entry.name.clone(),
            });
        }

        let ancestor_node = ancestor_entry.node.clone();
        let descendant_node = descendant_entry.node.clone();
        state
            .nodes
            .get_mut(&ancestor_handle)
            .expect("ancestor exists")
            .descendants
            .insert(node_index, descendant_handle);
        state
            .nodes
            .get_mut(&descendant_handle)
            .expect("descendant exists")
            .ancestors
            .insert(ancestor_handle, node_index);
        drop(state);

        match (ancestor_node, descendant_node) {
            (NodeRef::InputOutputProcessor(iop), NodeRef::ChannelModule(module)) => {
                iop.attach_channel_module(node_index, module);
            }
            (NodeRef::ChannelModule(module), NodeRef::Device(device)) => {
                module.attach_device(node_index, device);
            }
            _ => unreachable!("edge legality checked above"),
        }
        info!(ancestor, node_index, descendant, "connected");
        Ok(())
    }

    /// Remove the edge between two nodes.
    pub fn disconnect(&self, ancestor: &str, descendant: &str) -> Result<(), InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let ancestor_handle = state.handle_by_name(ancestor)?;
        let descendant_handle = state.handle_by_name(descendant)?;
        Self::remove_edge(&mut state, ancestor_handle, descendant_handle)
    }

    fn remove_edge(
        state: &mut InventoryState,
        ancestor_handle: NodeHandle,
        descendant_handle: NodeHandle,
    ) -> Result<(), InventoryError> {
        let index = *state.nodes[&descendant_handle]
            .ancestors
            .get(&ancestor_handle)
            .ok_or(InventoryError::NotConnected)?;

        let ancestor_node = state.nodes[&ancestor_handle].node.clone();
        match &ancestor_node {
            NodeRef::InputOutputProcessor(iop) => iop.detach_channel_module(index),
            NodeRef::ChannelModule(module) => module.detach_device(index),
            _ => {}
        }
        state
            .nodes
            .get_mut(&ancestor_handle)
            .expect("ancestor exists")
            .descendants
            .remove(&index);
        state
            .nodes
            .get_mut(&descendant_handle)
            .expect("descendant exists")
            .ancestors
            .remove(&ancestor_handle);
        Ok(())
    }

    pub fn disconnect_ancestors(&self, name: &str) -> Result<(), InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let handle = state.handle_by_name(name)?;
        let ancestors: Vec<NodeHandle> = state.nodes[&handle].ancestors.keys().copied().collect();
        for ancestor in ancestors {
            Self::remove_edge(&mut state, ancestor, handle)?;
        }
        Ok(())
    }

    pub fn disconnect_descendants(&self, name: &str) -> Result<(), InventoryError> {
        let mut state = self.state.lock().expect("inventory poisoned");
        let handle = state.handle_by_name(name)?;
        let descendants: Vec<NodeHandle> = state.nodes[&handle].descendants.values().copied().collect();
        for descendant in descendants {
            Self::remove_edge(&mut state, handle, descendant)?;
        }
        Ok(())
    }

    /* teardown */

    /// Delete a node, detaching every edge first. Instruction processors
    /// are stopped and their workers joined before removal.
    pub fn delete_node(&self, name: &str) -> Result<(), InventoryError> {
        let handle = {
            let state = self.state.lock().expect("inventory poisoned");
            state.handle_by_name(name)?
        };

        // quiesce outside the inventory lock
        let node = {
            let state = self.state.lock().expect("inventory poisoned");
            state.nodes[&handle].node.clone()
        };
        match &node {
            NodeRef::InstructionProcessor(ip) => {
                ip.stop(StopReason::Cleared, 0);
                let deadline = Instant::now() + STOP_SPIN_LIMIT;
                while !ip.is_stopped() && Instant::now() < deadline {
                    std::thread::yield_now();
                }
                ip.terminate();
                self.fabric.deregister(ip.upi());
            }
            NodeRef::InputOutputProcessor(iop) => {
                iop.terminate();
                self.fabric.deregister(iop.upi());
            }
            NodeRef::ChannelModule(module) => module.terminate(),
            NodeRef::SystemProcessor(sp) => {
                sp.terminate();
                self.fabric.deregister(sp.upi());
            }
            NodeRef::MainStorageProcessor(msp) => self.address_space.detach(msp.upi()),
            NodeRef::Device(_) => {}
        }

        let mut state = self.state.lock().expect("inventory poisoned");
        let ancestors: Vec<NodeHandle> = state.nodes[&handle].ancestors.keys().copied().collect();
        for ancestor in ancestors {
            Self::remove_edge(&mut state, ancestor, handle)?;
        }
        let descendants: Vec<NodeHandle> = state.nodes[&handle].descendants.values().copied().collect();
        for descendant in descendants {
            Self::remove_edge(&mut state, handle, descendant)?;
        }

        let entry = state.nodes.remove(&handle).expect("node exists");
        state.names.remove(&entry.name);
        state.upis.retain(|_, h| *h != handle);
        info!(name = %entry.name, "node deleted");
        Ok(())
    }

    /// Tear down the whole configuration in dependency order: devices,
    /// then channel modules, then processors.
    pub fn clear_configuration(&self) -> Result<(), InventoryError> {
        for category in [
            NodeCategory::Device,
            NodeCategory::ChannelModule,
            NodeCategory::InstructionProcessor,
            NodeCategory::InputOutputProcessor,
            NodeCategory::MainStorageProcessor,
            NodeCategory::SystemProcessor,
        ] {
            loop {
                let next = {
                    let state = self.state.lock().expect("inventory poisoned");
                    state
                        .nodes
                        .values()
                        .find(|entry| entry.node.category() == category)
                        .map(|entry| entry.name.clone())
                };
                match next {
                    Some(name) => self.delete_node(&name)?,
                    None => break,
                }
            }
        }
        *self.mail_slots.lock().expect("mail slots poisoned") = None;
        Ok(())
    }

    /* lookups */

    pub fn node_names(&self) -> Vec<String> {
        let state = self.state.lock().expect("inventory poisoned");
        state.nodes.values().map(|entry| entry.name.clone()).collect()
    }

    pub fn node(&self, name: &str) -> Result<NodeRef, InventoryError> {
        let state = self.state.lock().expect("inventory poisoned");
        let handle = state.handle_by_name(name)?;
        Ok(state.nodes[&handle].node.clone())
    }

    pub fn processor_upis(&self) -> Vec<Upi> {
        let state = self.state.lock().expect("inventory poisoned");
        state.upis.keys().copied().collect()
    }

    pub fn instruction_processor(&self, name: &str) -> Result<Arc<InstructionProcessor>, InventoryError> {
        match self.node(name)? {
            NodeRef::InstructionProcessor(ip) => Ok(ip),
            _ => Err(InventoryError::NodeNotFound(name.to_string())),
        }
    }

    pub fn input_output_processor(&self, name: &str) -> Result<Arc<InputOutputProcessor>, InventoryError> {
        match self.node(name)? {
            NodeRef::InputOutputProcessor(iop) => Ok(iop),
            _ => Err(InventoryError::NodeNotFound(name.to_string())),
        }
    }

    fn system_processor_of(state: &InventoryState) -> Option<Arc<SystemProcessor>> {
        state.nodes.values().find_map(|entry| match &entry.node {
            NodeRef::SystemProcessor(sp) => Some(Arc::clone(sp)),
            _ => None,
        })
    }

    fn for_each_ip(&self, mut f: impl FnMut(&Arc<InstructionProcessor>)) {
        let ips: Vec<Arc<InstructionProcessor>> = {
            let state = self.state.lock().expect("inventory poisoned");
            state
                .nodes
                .values()
                .filter_map(|entry| match &entry.node {
                    NodeRef::InstructionProcessor(ip) => Some(Arc::clone(ip)),
                    _ => None,
                })
                .collect()
        };
        for ip in &ips {
            f(ip);
        }
    }

    /* mail slots */

    /// Install mail slots for every ordered pair of configured processors
    /// into the hidden MSP.
    pub fn setup_upi_communications(&self) -> Result<(), InventoryError> {
        let upis = self.processor_upis();
        let storage = self.hidden_msp.get_storage(0)?;
        let table = MailSlotTable::install(storage, &upis)?;
        *self.mail_slots.lock().expect("mail slots poisoned") = Some(table);
        Ok(())
    }

    pub fn mail_slots(&self) -> Option<MailSlotTable> {
        self.mail_slots.lock().expect("mail slots poisoned").clone()
    }

    /// Mount a volume image on a named device.
    pub fn mount(&self, device_name: &str, path: &Path) -> Result<(), InventoryError> {
        match self.node(device_name)? {
            NodeRef::Device(device) => {
                device
                    .lock()
                    .expect("device poisoned")
                    .mount(path)
                    .map_err(|e| InventoryError::Mount(e.to_string()))?;
                Ok(())
            }
            _ => Err(InventoryError::NodeNotFound(device_name.to_string())),
        }
    }

    /// Human-readable inventory snapshot.
    pub fn dump(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        let state = self.state.lock().expect("inventory poisoned");
        writeln!(writer, "inventory: {} nodes", state.nodes.len())?;
        for entry in state.nodes.values() {
            let upi = state
                .upis
                .iter()
                .find(|(_, h)| **h == entry.handle)
                .map(|(upi, _)| *upi);
            write!(writer, "  {} [{}]", entry.name, entry.node.category())?;
            if let Some(upi) = upi {
                write!(writer, " upi={upi}")?;
            }
            if !entry.descendants.is_empty() {
                let children: Vec<String> = entry
                    .descendants
                    .iter()
                    .map(|(ix, h)| format!("{}:{}", ix, state.nodes[h].name))
                    .collect();
                write!(writer, " -> {}", children.join(", "))?;
            }
            writeln!(writer)?;
        }
        Ok(())
    }
}
