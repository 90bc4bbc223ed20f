//! Shared rig for the execution test suites.
#![allow(dead_code)]

use std::sync::Arc;

use komodo_types::Word36;
use komodo_vm::ip::{InstructionBuilder, InstructionProcessor, Opcode};
use komodo_vm::loader::{BankDeclaration, Loader};
use komodo_vm::msp::{AddressSpace, MainStorageProcessor};
use komodo_vm::upi::UpiFabric;

pub const CODE_BDI: u16 = 0o40;
pub const CODE_LOWER: u64 = 0o1000;

pub struct Rig {
    pub msp: Arc<MainStorageProcessor>,
    pub ip: Arc<InstructionProcessor>,
    pub fabric: Arc<UpiFabric>,
    pub loader: Loader,
}

/// One MSP, one IP, nothing based yet.
pub fn rig() -> Rig {
    let space = Arc::new(AddressSpace::new());
    let fabric = Arc::new(UpiFabric::new());
    let msp = Arc::new(MainStorageProcessor::new(1, 1 << 16));
    space.attach(Arc::clone(&msp));
    let ip = Arc::new(InstructionProcessor::new(7, "IP0", space, Arc::clone(&fabric)));
    let loader = Loader::new(Arc::clone(&msp), Arc::clone(&ip));
    Rig {
        msp,
        ip,
        fabric,
        loader,
    }
}

/// Stage `program` as the code bank on B0 and aim the program counter at
/// its first word.
pub fn load_program(rig: &mut Rig, program: Vec<Word36>) {
    rig.loader
        .load(&[BankDeclaration::code("CODE", 0, CODE_BDI, CODE_LOWER, program).based_on(0)])
        .expect("code bank stages");
    rig.ip.update_program_address(|par| par.set_pc(CODE_LOWER));
}

/// Run until the processor stops, failing the test if it does not.
pub fn run_to_stop(rig: &Rig) {
    rig.ip.release();
    assert!(rig.ip.run_sync(10_000), "processor failed to stop");
}

pub fn op(opcode: Opcode) -> InstructionBuilder {
    InstructionBuilder::new(opcode)
}

/// The debug halt every program ends with.
pub fn halt(detail: u64) -> Word36 {
    op(Opcode::IAR).bd(0, detail).build()
}
