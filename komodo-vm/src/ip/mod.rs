//! Instruction processor.
//!
//! All architectural state lives in [`IpCore`] behind one mutex owned by
//! the processor; the worker thread (or a synchronous driver such as the
//! test suites) takes the lock for exactly one instruction cycle at a
//! time. External observers read state only while the processor is
//! stopped, which is also when the dump protocol runs.

use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use komodo_types::{AccessInfo, Upi, Word36};
use tracing::{debug, trace};

use crate::consts::{BASE_REGISTER_COUNT, BR_ICS, DEFAULT_QUANTUM_CHARGE, ICS_FRAME_SIZE, INTERRUPT_VECTOR_ENTRIES};
use crate::error::{ExecutionError, ProcessorFault};
use crate::interrupt::{InterruptClass, MachineInterrupt};
use crate::msp::AddressSpace;
use crate::sp::SystemProcessor;
use crate::upi::{UpiEndpoint, UpiFabric};

mod activity;
mod bank;
mod bank_ops;
mod decode;
mod dispatch;
mod fixed_point;
mod jump;
mod load_store;
mod operand;
mod shift;
mod stack;
mod test_ops;

pub mod registers;

pub use bank::{BankDescriptor, BankType, BaseRegister};
pub use decode::{InstructionBuilder, InstructionWord, Opcode};
pub use registers::{
    ActiveBaseTableEntry, DesignatorRegister, GeneralRegisterSet, IndicatorKeyRegister, ProgramAddressRegister,
};

/// Why an instruction processor left its run loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StopReason {
    /// Never started.
    #[default]
    Initial,
    /// Stopped by an external clear request.
    Cleared,
    /// Stopped by a debug halt instruction.
    Debug,
    Development,
    Breakpoint,
    /// HLTJ executed; the program counter holds the jump target.
    HaltJump,
    IcsDoneOrOverflow,
    /// A fault was raised while entering an interrupt handler.
    InterruptHandlerFault,
    /// A hardware-fatal interrupt class was raised.
    HardwareCheck,
}

/// The architectural state plus the partition plumbing a cycle needs.
pub(crate) struct IpCore {
    pub(crate) upi: Upi,
    pub(crate) grs: GeneralRegisterSet,
    pub(crate) base_registers: Vec<BaseRegister>,
    pub(crate) active_base_table: Vec<ActiveBaseTableEntry>,
    pub(crate) dr: DesignatorRegister,
    pub(crate) ikr: IndicatorKeyRegister,
    pub(crate) par: ProgramAddressRegister,
    pub(crate) quantum_timer: i64,
    pub(crate) quantum_charge: u64,
    pub(crate) dayclock_comparator: Option<u64>,
    pub(crate) interrupts: BTreeSet<MachineInterrupt>,
    pub(crate) f0: InstructionWord,
    /// Set by a handler that loaded the program counter itself.
    pub(crate) jumped: bool,
    /// Set by a test instruction whose condition was met.
    pub(crate) skip: bool,
    pub(crate) stopped: bool,
    pub(crate) stop_reason: StopReason,
    pub(crate) stop_detail: u16,

    pub(crate) address_space: Arc<AddressSpace>,
    pub(crate) system_processor: Option<Arc<SystemProcessor>>,
}

impl IpCore {
    fn new(upi: Upi, address_space: Arc<AddressSpace>) -> Self {
        IpCore {
            upi,
            grs: GeneralRegisterSet::new(),
            base_registers: (0..BASE_REGISTER_COUNT).map(|_| BaseRegister::voided()).collect(),
            active_base_table: vec![ActiveBaseTableEntry::default(); BASE_REGISTER_COUNT],
            dr: DesignatorRegister::default(),
            ikr: IndicatorKeyRegister::default(),
            par: ProgramAddressRegister::default(),
            quantum_timer: 0,
            quantum_charge: DEFAULT_QUANTUM_CHARGE,
            dayclock_comparator: None,
            interrupts: BTreeSet::new(),
            f0: InstructionWord::default(),
            jumped: false,
            skip: false,
            stopped: true,
            stop_reason: StopReason::Initial,
            stop_detail: 0,
            address_space,
            system_processor: None,
        }
    }

    /// Whether the exec register banks are selected.
    pub(crate) fn exec_regs(&self) -> bool {
        self.dr.exec_register_set()
    }

    pub(crate) fn stop(&mut self, reason: StopReason, detail: u16) {
        debug!(upi = self.upi, %reason, detail, "processor stop");
        self.stopped = true;
        self.stop_reason = reason;
        self.stop_detail = detail & 0o7777;
    }

    /// Queue a machine interrupt for the next boundary.
    pub(crate) fn raise(&mut self, interrupt: MachineInterrupt) {
        self.interrupts.insert(interrupt);
    }

    /// The highest-priority interrupt that is not currently deferred.
    fn next_eligible_interrupt(&mut self) -> Option<MachineInterrupt> {
        let eligible = self
            .interrupts
            .iter()
            .find(|i| !i.class().is_deferrable() || self.dr.deferrable_interrupt_enabled())
            .copied()?;
        self.interrupts.remove(&eligible);
        Some(eligible)
    }

    /// Run the interrupt entry sequence.
    ///
    /// Faults here are hard errors: the processor stops with the class in
    /// the low bits of the detail code.
    fn enter_interrupt(&mut self, interrupt: MachineInterrupt) {
        let class = interrupt.class();
        let detail = 0o1000 | u16::from(class.code());
        trace!(upi = self.upi, class = %class, "interrupt entry");

        if class.is_hardware_fatal() {
            self.stop(StopReason::HardwareCheck, detail);
            return;
        }

        self.ikr.set_interrupt_class(class.code());
        self.ikr.set_short_status(interrupt.short_status());

        if self.push_ics_frame(&interrupt).is_err() {
            self.stop(StopReason::InterruptHandlerFault, detail);
            return;
        }

        match self.interrupt_vector_entry(class) {
            Ok(vector) => {
                // handler environment: extended mode, exec registers,
                // maximum privilege, deferrable classes held
                let (l_bdi, pc) = (vector.h1(), vector.h2());
                if self.base_on_bank(0, l_bdi).is_err() {
                    self.stop(StopReason::InterruptHandlerFault, detail);
                    return;
                }
                self.par.set_l_bdi(l_bdi);
                self.par.set_pc(pc);
                self.dr.set_basic_mode(false);
                self.dr.set_exec_register_set(true);
                self.dr.set_processor_privilege(0);
                self.dr.set_deferrable_interrupt_enabled(false);
            }
            Err(_) => self.stop(StopReason::InterruptHandlerFault, detail),
        }
    }

    /// Save PAR, DR, IKR and the status words to the interrupt control
    /// stack through B26; EX1 is the stack pointer.
    fn push_ics_frame(&mut self, interrupt: &MachineInterrupt) -> Result<(), ProcessorFault> {
        let ics = &self.base_registers[BR_ICS];
        if ics.void {
            return Err(ProcessorFault::IcsOverflow);
        }
        let pointer = self.grs.x(1, true);
        let new_top = pointer.h2().wrapping_sub(ICS_FRAME_SIZE) & 0o777777;
        if !ics.contains(new_top) || !ics.contains(new_top + ICS_FRAME_SIZE - 1) {
            return Err(ProcessorFault::IcsOverflow);
        }

        let frame = [
            self.par.word(),
            self.dr.word(),
            self.ikr.word(),
            interrupt.status_word_0(),
            interrupt.status_word_1(),
            Word36::ZERO,
        ];
        for (ix, word) in frame.iter().enumerate() {
            self.base_registers[BR_ICS]
                .write(new_top + ix as u64, *word)
                .map_err(|_| ProcessorFault::IcsOverflow)?;
        }
        self.grs.set_x(1, true, pointer.set_h2(new_top));
        Ok(())
    }

    /// The 64-word interrupt vector sits at the head of the level-0 BDT
    /// bank, described by B16.
    fn interrupt_vector_entry(&self, class: InterruptClass) -> Result<Word36, ExecutionError> {
        let bdt = &self.base_registers[crate::consts::BR_BDT_LEVEL_0];
        if bdt.void {
            return Err(ProcessorFault::InterruptEntry { class }.into());
        }
        let index = u64::from(class.code());
        debug_assert!(index < INTERRUPT_VECTOR_ENTRIES);
        bdt.read(bdt.lower_limit + index)
            .map_err(|_| ProcessorFault::InterruptEntry { class }.into())
    }

    /// Fold pending partition events into the interrupt queue.
    fn poll_asynchronous_events(&mut self) {
        if let Some(comparator) = self.dayclock_comparator {
            if let Some(sp) = &self.system_processor {
                if sp.dayclock_micros() >= comparator {
                    self.dayclock_comparator = None;
                    self.raise(MachineInterrupt::of_class(InterruptClass::Dayclock));
                }
            }
        }
    }

    /// Execute one instruction cycle, interrupts first.
    pub(crate) fn step(&mut self) {
        if self.stopped {
            return;
        }

        self.poll_asynchronous_events();
        if let Some(interrupt) = self.next_eligible_interrupt() {
            self.enter_interrupt(interrupt);
            return;
        }

        let word = match self.fetch_instruction() {
            Ok(word) => word,
            Err(error) => {
                self.absorb(error);
                return;
            }
        };
        self.f0 = InstructionWord::new(word);
        self.ikr.set_instruction_in_f0(true);
        self.jumped = false;
        self.skip = false;
        self.quantum_charge = DEFAULT_QUANTUM_CHARGE;

        let outcome = self.dispatch();
        self.ikr.set_instruction_in_f0(false);
        match outcome {
            Ok(()) => {
                if !self.jumped {
                    self.par.advance(1 + u64::from(self.skip));
                }
                self.charge_quantum();
            }
            Err(error) => self.absorb(error),
        }
    }

    /// Fold an execution error into the machine: recoverable faults queue,
    /// the rest stop the processor.
    fn absorb(&mut self, error: ExecutionError) {
        match error {
            ExecutionError::Interrupt(interrupt) => self.raise(interrupt),
            ExecutionError::Fault(fault) => {
                let reason = match fault {
                    ProcessorFault::IcsOverflow => StopReason::IcsDoneOrOverflow,
                    ProcessorFault::InterruptEntry { .. } => StopReason::InterruptHandlerFault,
                    _ => StopReason::HardwareCheck,
                };
                self.stop(reason, 0);
            }
        }
    }

    fn charge_quantum(&mut self) {
        if !self.dr.quantum_timer_enabled() {
            return;
        }
        let before = self.quantum_timer;
        self.quantum_timer -= self.quantum_charge as i64;
        if before > 0 && self.quantum_timer <= 0 {
            self.raise(MachineInterrupt::of_class(InterruptClass::QuantumTimer));
        }
    }

    /// The base register the next instruction fetch reads through.
    pub(crate) fn code_base_register(&self) -> Result<usize, ExecutionError> {
        if !self.dr.basic_mode() {
            return Ok(0);
        }
        let pc = self.par.pc();
        (12..16)
            .find(|br| self.base_registers[*br].contains(pc))
            .ok_or_else(|| InterruptClass::ReferenceViolation.into())
    }

    fn fetch_instruction(&mut self) -> Result<Word36, ExecutionError> {
        let br = self.code_base_register()?;
        self.base_registers[br]
            .read(self.par.pc())
            .map_err(|_| InterruptClass::ReferenceViolation.into())
    }

    /// Require processor privilege at most `ceiling`.
    pub(crate) fn require_privilege(&self, ceiling: u8) -> Result<(), ExecutionError> {
        if self.dr.processor_privilege() <= ceiling {
            Ok(())
        } else {
            Err(MachineInterrupt::new(InterruptClass::InvalidInstruction, 1, Word36::ZERO, Word36::ZERO).into())
        }
    }
}

/// The public face of an instruction processor.
pub struct InstructionProcessor {
    upi: Upi,
    name: String,
    core: Mutex<IpCore>,
    stopped_latch: AtomicBool,
    endpoint: Arc<UpiEndpoint>,
    terminate: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InstructionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionProcessor")
            .field("upi", &self.upi)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl InstructionProcessor {
    pub fn new(upi: Upi, name: impl Into<String>, address_space: Arc<AddressSpace>, fabric: Arc<UpiFabric>) -> Self {
        let endpoint = fabric.register(upi);
        InstructionProcessor {
            upi,
            name: name.into(),
            core: Mutex::new(IpCore::new(upi, address_space)),
            stopped_latch: AtomicBool::new(true),
            endpoint,
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

    /// Wire in the system processor the SYSC instruction talks to.
    pub fn attach_system_processor(&self, sp: Arc<SystemProcessor>) {
        self.core.lock().expect("ip core poisoned").system_processor = Some(sp);
    }

    fn with_core<R>(&self, f: impl FnOnce(&mut IpCore) -> R) -> R {
        let mut core = self.core.lock().expect("ip core poisoned");
        f(&mut core)
    }

    /* state access; meaningful only while the processor is stopped */

    pub fn read_grs(&self, index: usize) -> Word36 {
        self.with_core(|core| core.grs.get(index))
    }

    pub fn write_grs(&self, index: usize, value: Word36) {
        self.with_core(|core| core.grs.set(index, value));
    }

    pub fn designator(&self) -> DesignatorRegister {
        self.with_core(|core| core.dr)
    }

    pub fn update_designator(&self, f: impl FnOnce(&mut DesignatorRegister)) {
        self.with_core(|core| f(&mut core.dr));
    }

    pub fn indicator_key(&self) -> IndicatorKeyRegister {
        self.with_core(|core| core.ikr)
    }

    pub fn set_access_key(&self, key: AccessInfo) {
        self.with_core(|core| core.ikr.set_access_key(key));
    }

    pub fn program_address(&self) -> ProgramAddressRegister {
        self.with_core(|core| core.par)
    }

    pub fn update_program_address(&self, f: impl FnOnce(&mut ProgramAddressRegister)) {
        self.with_core(|core| f(&mut core.par));
    }

    pub fn base_register(&self, index: usize) -> BaseRegister {
        self.with_core(|core| core.base_registers[index].clone())
    }

    pub fn set_base_register(&self, index: usize, register: BaseRegister) {
        self.with_core(|core| core.base_registers[index] = register);
    }

    pub fn active_base_table_entry(&self, index: usize) -> ActiveBaseTableEntry {
        self.with_core(|core| core.active_base_table[index])
    }

    pub fn set_quantum_timer(&self, value: i64) {
        self.with_core(|core| core.quantum_timer = value);
    }

    pub fn set_dayclock_comparator(&self, micros: Option<u64>) {
        self.with_core(|core| core.dayclock_comparator = micros);
    }

    /* interrupts */

    pub fn raise(&self, interrupt: MachineInterrupt) {
        self.with_core(|core| core.raise(interrupt));
        self.endpoint.notify();
    }

    pub fn pending_interrupt_classes(&self) -> Vec<InterruptClass> {
        self.with_core(|core| core.interrupts.iter().map(|i| i.class()).collect())
    }

    /* run control */

    /// Execute one instruction cycle on the caller's thread.
    pub fn step(&self) {
        self.with_core(|core| {
            self.drain_upi_signals(core);
            core.step();
            self.stopped_latch.store(core.stopped, Ordering::SeqCst);
        });
    }

    /// Step until the processor stops, up to `max_cycles`. Returns true
    /// when the processor is stopped on return.
    pub fn run_sync(&self, max_cycles: usize) -> bool {
        for _ in 0..max_cycles {
            if self.is_stopped() {
                return true;
            }
            self.step();
        }
        self.is_stopped()
    }

    /// Clear the stop latch so the processor can run again.
    pub fn release(&self) {
        self.with_core(|core| {
            core.stopped = false;
        });
        self.stopped_latch.store(false, Ordering::SeqCst);
        self.endpoint.notify();
    }

    /// Request a stop at the next interrupt boundary. The caller observes
    /// completion through [`Self::is_stopped`].
    pub fn stop(&self, reason: StopReason, detail: u16) {
        self.with_core(|core| core.stop(reason, detail));
        self.stopped_latch.store(true, Ordering::SeqCst);
        self.endpoint.notify();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_latch.load(Ordering::SeqCst)
    }

    pub fn stop_reason(&self) -> StopReason {
        self.with_core(|core| core.stop_reason)
    }

    pub fn stop_detail(&self) -> u16 {
        self.with_core(|core| core.stop_detail)
    }

    /// Translate pending UPI traffic into machine interrupts.
    fn drain_upi_signals(&self, core: &mut IpCore) {
        for source in self.endpoint.take_interrupts() {
            core.raise(MachineInterrupt::new(
                InterruptClass::UpiNormal,
                0,
                Word36::new(u64::from(source)),
                Word36::ZERO,
            ));
        }
        self.endpoint.take_acknowledgements();
    }

    /* worker */

    pub fn start(self: Arc<Self>) {
        let ip = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name(format!("ip-{}", self.name))
            .spawn(move || ip.run())
            .expect("ip worker spawn");
        *self.worker.lock().expect("worker handle poisoned") = Some(handle);
    }

    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.endpoint.notify();
        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        debug!(upi = self.upi, name = %self.name, "ip worker up");
        loop {
            if self.terminate.load(Ordering::SeqCst) {
                break;
            }
            if self.is_stopped() {
                // parked; a release or UPI signal wakes us
                self.endpoint.wait(Duration::from_millis(crate::consts::WORKER_POLL_MSECS));
                continue;
            }
            self.step();
        }
        debug!(upi = self.upi, "ip worker down");
    }

    /// Human-readable state snapshot.
    pub fn dump(&self, writer: &mut dyn io::Write) -> io::Result<()> {
        self.with_core(|core| {
            writeln!(writer, "IP {} (upi {})", self.name, self.upi)?;
            writeln!(
                writer,
                "  stopped={} reason={} detail={:04o}",
                core.stopped, core.stop_reason, core.stop_detail
            )?;
            writeln!(
                writer,
                "  PAR={} DR={} IKR={}",
                core.par.word(),
                core.dr.word(),
                core.ikr.word()
            )?;
            for bank in 0..8 {
                let base = bank * 16;
                let row: Vec<String> = (0..16).map(|ix| core.grs.get(base + ix).to_string()).collect();
                writeln!(writer, "  GRS {:03o}: {}", base, row.join(" "))?;
            }
            for (ix, br) in core.base_registers.iter().enumerate() {
                if !br.void {
                    writeln!(
                        writer,
                        "  B{:02}: lower={:o} upper={:o} base={}",
                        ix, br.lower_limit, br.upper_limit, br.base
                    )?;
                }
            }
            let pending: Vec<String> = core.interrupts.iter().map(|i| i.class().to_string()).collect();
            if !pending.is_empty() {
                writeln!(writer, "  pending interrupts: {}", pending.join(", "))?;
            }
            Ok(())
        })
    }
}
