//! Loadable-bank ingestion.
//!
//! The external linker produces banks: named word sequences with a bank
//! descriptor index, addressing limits and access attributes. The loader
//! carves working-segment regions for their content, synthesizes bank
//! descriptor tables, points the level registers B16..=B23 at them and
//! optionally bases an initial register, which is exactly the state an
//! instruction processor needs to start fetching.

use std::collections::BTreeMap;
use std::sync::Arc;

use komodo_types::{AbsoluteAddress, AccessInfo, AccessPermissions, Word36};

use crate::consts::{BANK_DESCRIPTOR_SIZE, BR_BDT_LEVEL_0, INTERRUPT_VECTOR_ENTRIES};
use crate::error::MspError;
use crate::interrupt::InterruptClass;
use crate::ip::registers::pack_l_bdi;
use crate::ip::{BankDescriptor, BankType, BaseRegister, InstructionProcessor};
use crate::msp::MainStorageProcessor;

/// One bank as the linker hands it over.
#[derive(Debug, Clone)]
pub struct BankDeclaration {
    pub name: String,
    pub level: u8,
    /// Bank descriptor index; 0..=31 of level 0 are reserved for the
    /// interrupt vector area.
    pub bdi: u16,
    /// Lower normalized addressing limit.
    pub lower: u64,
    pub content: Vec<Word36>,
    /// Base register to load with this bank after staging.
    pub initial_base_register: Option<usize>,
    pub access_lock: AccessInfo,
    pub general_permissions: AccessPermissions,
    pub special_permissions: AccessPermissions,
    pub extended_mode: bool,
}

impl BankDeclaration {
    /// A fully accessible extended-mode bank, the common test shape.
    pub fn code(name: impl Into<String>, level: u8, bdi: u16, lower: u64, content: Vec<Word36>) -> Self {
        BankDeclaration {
            name: name.into(),
            level,
            bdi,
            lower,
            content,
            initial_base_register: None,
            access_lock: AccessInfo::default(),
            general_permissions: AccessPermissions::ALL,
            special_permissions: AccessPermissions::ALL,
            extended_mode: true,
        }
    }

    pub fn based_on(mut self, register: usize) -> Self {
        self.initial_base_register = Some(register);
        self
    }
}

/// Stages banks into one MSP and one instruction processor.
pub struct Loader {
    msp: Arc<MainStorageProcessor>,
    ip: Arc<InstructionProcessor>,
    /// Level -> BDT segment index.
    bdt_segments: BTreeMap<u8, u32>,
}

impl Loader {
    pub fn new(msp: Arc<MainStorageProcessor>, ip: Arc<InstructionProcessor>) -> Self {
        Loader {
            msp,
            ip,
            bdt_segments: BTreeMap::new(),
        }
    }

    /// Ensure a bank descriptor table segment exists for `level` and that
    /// B(16+level) describes it.
    fn bdt_for_level(&mut self, level: u8, min_bdi: u16) -> Result<u32, MspError> {
        let needed = INTERRUPT_VECTOR_ENTRIES.max(u64::from(min_bdi + 1) * BANK_DESCRIPTOR_SIZE);
        if let Some(segment) = self.bdt_segments.get(&level) {
            if self.msp.segment_size(*segment)? < needed {
                self.msp.resize_segment(*segment, needed)?;
                self.rebase_level_register(level, *segment)?;
            }
            return Ok(*segment);
        }

        let segment = self.msp.create_segment(needed);
        self.bdt_segments.insert(level, segment);
        self.rebase_level_register(level, segment)?;
        Ok(segment)
    }

    fn rebase_level_register(&self, level: u8, segment: u32) -> Result<(), MspError> {
        let size = self.msp.segment_size(segment)?;
        let descriptor = BankDescriptor {
            bank_type: BankType::Extended,
            general_permissions: AccessPermissions::ALL,
            special_permissions: AccessPermissions::ALL,
            large: false,
            general_fault: false,
            upper_limit_suppression: false,
            void: false,
            access_lock: AccessInfo::default(),
            lower_limit: 0,
            upper_limit: size - 1,
            base: AbsoluteAddress::new(self.msp.upi(), segment, 0),
        };
        let storage = self.msp.get_storage(segment)?;
        self.ip.set_base_register(
            BR_BDT_LEVEL_0 + level as usize,
            BaseRegister::from_descriptor(&descriptor, Some(storage)),
        );
        Ok(())
    }

    /// Stage a set of banks.
    pub fn load(&mut self, banks: &[BankDeclaration]) -> Result<(), MspError> {
        for bank in banks {
            let region = self.msp.assign_region(bank.content.len() as u64)?;
            self.msp.get_storage(0)?.load(region.position(), &bank.content)?;

            let descriptor = BankDescriptor {
                bank_type: if bank.extended_mode { BankType::Extended } else { BankType::Basic },
                general_permissions: bank.general_permissions,
                special_permissions: bank.special_permissions,
                large: false,
                general_fault: false,
                upper_limit_suppression: false,
                void: bank.content.is_empty(),
                access_lock: bank.access_lock,
                lower_limit: bank.lower,
                upper_limit: bank.lower + (bank.content.len() as u64).max(1) - 1,
                base: AbsoluteAddress::new(self.msp.upi(), 0, region.position()),
            };

            let segment = self.bdt_for_level(bank.level, bank.bdi)?;
            let bdt = self.msp.get_storage(segment)?;
            let offset = u64::from(bank.bdi) * BANK_DESCRIPTOR_SIZE;
            bdt.load(offset, &descriptor.to_words())?;

            if let Some(register) = bank.initial_base_register {
                let storage = self.msp.get_storage(0)?.subset(region.position(), bank.content.len() as u64)?;
                self.ip
                    .set_base_register(register, BaseRegister::from_descriptor(&descriptor, Some(storage)));
                if register == 0 {
                    self.ip
                        .update_program_address(|par| par.set_bank(bank.level, bank.bdi));
                }
            }
        }
        Ok(())
    }

    /// Point an interrupt vector entry at a handler.
    pub fn set_interrupt_vector(&mut self, class: InterruptClass, level: u8, bdi: u16, pc: u64) -> Result<(), MspError> {
        let segment = self.bdt_for_level(0, 0)?;
        let word = Word36::ZERO.set_h1(pack_l_bdi(level, bdi)).set_h2(pc);
        self.msp.get_storage(segment)?.set(u64::from(class.code()), word)
    }

    /// Stage an absolute module and aim the processor at its entry point.
    pub fn load_module(&mut self, module: &AbsoluteModule) -> Result<(), MspError> {
        self.load(&module.banks)?;

        // expand the entry bank's descriptor out of its BDT and base B0
        let segment = self.bdt_for_level(module.entry_level, module.entry_bdi)?;
        let bdt = self.msp.get_storage(segment)?;
        let offset = u64::from(module.entry_bdi) * BANK_DESCRIPTOR_SIZE;
        let mut words = [Word36::ZERO; 8];
        for (ix, word) in words.iter_mut().enumerate() {
            *word = bdt.get(offset + ix as u64)?;
        }
        let descriptor = BankDescriptor::from_words(words);
        let storage = self
            .msp
            .get_storage(descriptor.base.segment)?
            .subset(descriptor.base.offset, descriptor.extent())?;
        self.ip
            .set_base_register(0, BaseRegister::from_descriptor(&descriptor, Some(storage)));

        self.ip.update_program_address(|par| {
            par.set_bank(module.entry_level, module.entry_bdi);
            par.set_pc(module.entry_address);
        });
        self.ip.update_designator(|dr| {
            dr.set_db(crate::ip::DesignatorRegister::DB_QUARTER_WORD_MODE, module.quarter_word_mode);
            dr.set_db(
                crate::ip::DesignatorRegister::DB_ARITHMETIC_EXCEPTION_ENABLED,
                module.arithmetic_exceptions_enabled,
            );
        });
        Ok(())
    }
}

/// The linker's absolute output: banks plus the entry point and the
/// starting mode hints.
#[derive(Debug, Clone)]
pub struct AbsoluteModule {
    pub banks: Vec<BankDeclaration>,
    pub entry_level: u8,
    pub entry_bdi: u16,
    pub entry_address: u64,
    pub quarter_word_mode: bool,
    pub arithmetic_exceptions_enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::{InstructionBuilder, Opcode};
    use crate::msp::AddressSpace;
    use crate::upi::UpiFabric;

    #[test]
    fn staged_bank_is_fetchable() {
        let space = Arc::new(AddressSpace::new());
        let msp = Arc::new(MainStorageProcessor::new(1, 4096));
        space.attach(Arc::clone(&msp));
        let ip = Arc::new(InstructionProcessor::new(
            7,
            "IP0",
            Arc::clone(&space),
            Arc::new(UpiFabric::new()),
        ));

        let content: Vec<Word36> = (1..=4).map(Word36::new).collect();
        let mut loader = Loader::new(Arc::clone(&msp), Arc::clone(&ip));
        loader
            .load(&[
                BankDeclaration::code("CODE", 0, 0o40, 0o1000, content).based_on(0)
            ])
            .unwrap();

        let register = ip.base_register(0);
        assert!(register.contains(0o1000));
        assert!(register.contains(0o1003));
        assert_eq!(register.read(0o1002).unwrap(), Word36::new(3));
        assert_eq!(ip.program_address().bdi(), 0o40);

        // the BDT entry reads back as the same descriptor
        let bdt = ip.base_register(BR_BDT_LEVEL_0);
        let mut words = [Word36::ZERO; 8];
        for (ix, word) in words.iter_mut().enumerate() {
            *word = bdt.read(0o40 * 8 + ix as u64).unwrap();
        }
        let descriptor = BankDescriptor::from_words(words);
        assert_eq!(descriptor.lower_limit, 0o1000);
        assert_eq!(descriptor.upper_limit, 0o1003);
    }

    #[test]
    fn absolute_module_transfers_control() {
        let space = Arc::new(AddressSpace::new());
        let msp = Arc::new(MainStorageProcessor::new(1, 4096));
        space.attach(Arc::clone(&msp));
        let ip = Arc::new(InstructionProcessor::new(
            7,
            "IP0",
            Arc::clone(&space),
            Arc::new(UpiFabric::new()),
        ));

        let halt = InstructionBuilder::new(Opcode::IAR).bd(0, 0o42).build();
        let module = AbsoluteModule {
            banks: vec![BankDeclaration::code("MAIN", 0, 0o40, 0o1000, vec![halt])],
            entry_level: 0,
            entry_bdi: 0o40,
            entry_address: 0o1000,
            quarter_word_mode: true,
            arithmetic_exceptions_enabled: false,
        };
        Loader::new(Arc::clone(&msp), Arc::clone(&ip)).load_module(&module).unwrap();

        assert!(ip.designator().quarter_word_mode());
        assert_eq!(ip.program_address().pc(), 0o1000);

        ip.release();
        assert!(ip.run_sync(10));
        assert_eq!(ip.stop_detail(), 0o42);
    }
}
