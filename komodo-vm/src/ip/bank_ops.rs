//! The bank manipulator: base-register loads, CALL/GOTO/RTN and the
//! basic-mode bank jumps.

use komodo_types::Word36;

use crate::consts::{BANK_DESCRIPTOR_SIZE, BR_BDT_LEVEL_0};
use crate::error::ExecutionError;
use crate::interrupt::InterruptClass;

use super::bank::{BankDescriptor, BaseRegister};
use super::registers::{unpack_l_bdi, ActiveBaseTableEntry};
use super::IpCore;

impl IpCore {
    /// Fetch the bank descriptor for a packed L,BDI through the level
    /// registers B16..=B23.
    ///
    /// L,BDI zero names the void bank. BDIs 1..=31 of level 0 are the
    /// interrupt vector area and are not legal bank names.
    pub(crate) fn fetch_bank_descriptor(&self, l_bdi: u64) -> Result<Option<BankDescriptor>, ExecutionError> {
        if l_bdi == 0 {
            return Ok(None);
        }
        let (level, bdi) = unpack_l_bdi(l_bdi);
        if level == 0 && bdi < 32 {
            return Err(InterruptClass::AddressingException.into());
        }

        let bdt = &self.base_registers[BR_BDT_LEVEL_0 + level as usize];
        if bdt.void {
            return Err(InterruptClass::AddressingException.into());
        }
        let base = bdt.lower_limit + u64::from(bdi) * BANK_DESCRIPTOR_SIZE;
        let mut words = [Word36::ZERO; 8];
        for (ix, word) in words.iter_mut().enumerate() {
            *word = bdt
                .read(base + ix as u64)
                .map_err(|_| ExecutionError::from(InterruptClass::AddressingException))?;
        }

        let descriptor = BankDescriptor::from_words(words);
        if !descriptor.is_addressable() {
            return Err(InterruptClass::AddressingException.into());
        }
        if descriptor.upper_limit + 1 < descriptor.lower_limit {
            return Err(InterruptClass::AddressingException.into());
        }
        Ok(Some(descriptor))
    }

    /// Expand a descriptor into a base register, attaching its storage
    /// view.
    fn expand_descriptor(&self, descriptor: &BankDescriptor) -> Result<BaseRegister, ExecutionError> {
        let segment = self
            .address_space
            .segment_storage(&descriptor.base)
            .map_err(|_| ExecutionError::from(InterruptClass::AddressingException))?;
        let storage = segment
            .subset(descriptor.base.offset, descriptor.extent())
            .map_err(|_| ExecutionError::from(InterruptClass::AddressingException))?;
        Ok(BaseRegister::from_descriptor(descriptor, Some(storage)))
    }

    /// Load base register `br` with the bank named by `l_bdi` and track it
    /// in the active base table.
    pub(crate) fn base_on_bank(&mut self, br: usize, l_bdi: u64) -> Result<(), ExecutionError> {
        match self.fetch_bank_descriptor(l_bdi)? {
            None => {
                self.base_registers[br] = BaseRegister::voided();
                self.active_base_table[br] = ActiveBaseTableEntry::default();
            }
            Some(descriptor) => {
                self.base_registers[br] = self.expand_descriptor(&descriptor)?;
                let (level, bdi) = unpack_l_bdi(l_bdi);
                self.active_base_table[br] = ActiveBaseTableEntry {
                    level,
                    bdi,
                    subset_offset: 0,
                };
            }
        }
        Ok(())
    }

    /// Check enter access before transferring control into a bank.
    fn check_enter(&self, l_bdi: u64) -> Result<(), ExecutionError> {
        if let Some(descriptor) = self.fetch_bank_descriptor(l_bdi)? {
            let permissions = descriptor.effective_permissions(&self.ikr.access_key());
            if !permissions.enter {
                return Err(InterruptClass::ReferenceViolation.into());
            }
        }
        Ok(())
    }

    /// LBU: load B(a) from the operand's bank word.
    pub(crate) fn load_base_user(&mut self) -> Result<(), ExecutionError> {
        let word = self.read_operand_word(true)?;
        let br = self.f0.a() as usize;
        self.base_on_bank(br, word.h1())
    }

    /// LBE: load the executive base register B(16+a).
    pub(crate) fn load_base_exec(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(1)?;
        let word = self.read_operand_word(true)?;
        let br = 16 + self.f0.a() as usize;
        self.base_on_bank(br, word.h1())
    }

    /// LBRX: load the base register named by X(x) from the operand's bank
    /// word.
    pub(crate) fn load_base_indexed(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(1)?;
        let br = (self.grs.x(self.f0.x() as usize, self.exec_regs()).bits() & 0o37) as usize;
        let word = self.read_operand_word(false)?;
        self.base_on_bank(br, word.h1())
    }

    /// LBED: load B(16+a) directly from an eight-word descriptor image at
    /// U, bypassing the BDTs.
    pub(crate) fn load_base_exec_direct(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(1)?;
        let (u, storage_br) = self.resolve_operand(true)?;
        let mut words = [Word36::ZERO; 8];
        for (ix, word) in words.iter_mut().enumerate() {
            *word = self.read_bank_word(storage_br, u + ix as u64)?;
        }
        let descriptor = BankDescriptor::from_words(words);
        let br = 16 + self.f0.a() as usize;
        if descriptor.void || !descriptor.is_addressable() {
            self.base_registers[br] = BaseRegister::voided();
        } else {
            self.base_registers[br] = self.expand_descriptor(&descriptor)?;
        }
        Ok(())
    }

    /// SBED: store B(16+a) as an eight-word descriptor image at U.
    pub(crate) fn store_base_exec_direct(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(1)?;
        let register = self.base_registers[16 + self.f0.a() as usize].clone();
        let descriptor = BankDescriptor {
            bank_type: super::bank::BankType::Extended,
            general_permissions: register.general_permissions,
            special_permissions: register.special_permissions,
            large: register.large,
            general_fault: false,
            upper_limit_suppression: false,
            void: register.void,
            access_lock: register.access_lock,
            lower_limit: register.lower_limit,
            upper_limit: register.upper_limit,
            base: register.base,
        };
        let (u, storage_br) = self.resolve_operand(true)?;
        for (ix, word) in descriptor.to_words().iter().enumerate() {
            self.write_bank_word(storage_br, u + ix as u64, *word)?;
        }
        Ok(())
    }

    /// SBU: store the active bank word for B(a) at U.
    pub(crate) fn store_base_user(&mut self) -> Result<(), ExecutionError> {
        let entry = self.active_base_table[self.f0.a() as usize];
        self.write_operand_word(true, entry.to_word())
    }

    /// LSBL: record a subset offset in the active base table entry for
    /// B(a).
    pub(crate) fn load_subset_limits(&mut self) -> Result<(), ExecutionError> {
        let word = self.read_operand_word(true)?;
        let entry = &mut self.active_base_table[self.f0.a() as usize];
        entry.subset_offset = word.h2();
        Ok(())
    }

    /// CALL/GOTO: push the return frame, then enter the bank named by the
    /// operand word (target L,BDI in H1, target address in H2).
    ///
    /// `push_frame` is false for nothing today; both forms push, and RTN
    /// pops exactly one frame.
    pub(crate) fn call_bank(&mut self, _push_frame: bool) -> Result<(), ExecutionError> {
        let word = self.read_operand_word(true)?;
        let (target_l_bdi, target_pc) = (word.h1(), word.h2());
        self.check_enter(target_l_bdi)?;

        let frame = self.rcs_frame();
        self.rcs_push(frame)?;

        self.base_on_bank(0, target_l_bdi)?;
        self.par.set_l_bdi(target_l_bdi);
        self.jump_to(target_pc);
        Ok(())
    }

    /// RTN: pop the return frame, restore the preserved designator bits
    /// and access key, and rebase B0 on the caller's bank.
    pub(crate) fn return_from_call(&mut self) -> Result<(), ExecutionError> {
        let frame = self.rcs_pop()?;
        let reentry = frame[0].bits();
        let environment = frame[1].bits();

        let l_bdi = reentry >> 18;
        let pc = reentry & 0o777777;
        self.base_on_bank(0, l_bdi)?;
        self.par.set_l_bdi(l_bdi);
        self.dr.restore_rcs_bits(environment);
        self.ikr.set_access_key_bits(environment & 0o777777);
        self.jump_to(pc);
        Ok(())
    }

    /// The common tail of the basic-mode bank jumps.
    fn bank_jump(&mut self, br: usize, l_bdi: u64) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        self.check_enter(l_bdi)?;

        // the departed bank, recorded for the return path
        let old_entry = self.active_base_table[self.code_base_register().unwrap_or(0)];
        let old_word = Word36::ZERO.set_h2(u64::from(old_entry.bdi) | (u64::from(old_entry.level) << 15));

        self.base_on_bank(br, l_bdi)?;
        self.par.set_l_bdi(l_bdi);
        self.dr.set_basic_mode(true);
        self.jump_to(target);

        let x_index = super::registers::GeneralRegisterSet::x_index(self.f0.a() as usize, self.exec_regs());
        let brsel = ((br as u64).saturating_sub(12) & 0o3) << 33;
        self.grs.set(x_index, Word36::new(brsel | old_word.bits()));
        Ok(())
    }

    /// LBJ: X(a) carries the base-register selection in bits 1..=2 and the
    /// target bank in H2.
    pub(crate) fn load_bank_and_jump(&mut self) -> Result<(), ExecutionError> {
        let xa = self.grs.x(self.f0.a() as usize, self.exec_regs());
        let br = 12 + ((xa.bits() >> 33) & 0o3) as usize;
        self.bank_jump(br, xa.h2())
    }

    /// LIJ: as LBJ into the instruction pair B12/B13 chosen by DB31.
    pub(crate) fn load_instruction_bank_and_jump(&mut self) -> Result<(), ExecutionError> {
        let xa = self.grs.x(self.f0.a() as usize, self.exec_regs());
        let br = 12 + self.dr.basic_base_selection() as usize;
        self.bank_jump(br, xa.h2())
    }

    /// LDJ: as LBJ with the selection bits of X(a) ignored; the data pair
    /// B14/B15 is chosen by DB31.
    pub(crate) fn load_data_bank_and_jump(&mut self) -> Result<(), ExecutionError> {
        let xa = self.grs.x(self.f0.a() as usize, self.exec_regs());
        let br = 14 + self.dr.basic_base_selection() as usize;
        self.bank_jump(br, xa.h2())
    }
}
