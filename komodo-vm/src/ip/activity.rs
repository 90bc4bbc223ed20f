//! Activity-control and system-call instructions.

use komodo_types::{DoubleWord36, Word36};

use crate::error::ExecutionError;
use crate::interrupt::InterruptClass;

use super::operand::OperandSite;
use super::registers::DesignatorRegister;
use super::IpCore;

/// SYSC subfunction codes, in S1 of the packet's first word.
mod sysc {
    pub const CONSOLE_SEND: u64 = 0o1;
    pub const CONSOLE_POLL: u64 = 0o2;
    pub const DAYCLOCK_READ: u64 = 0o3;
    pub const DAYCLOCK_SET: u64 = 0o4;
    pub const JUMP_KEYS_READ: u64 = 0o5;
    pub const JUMP_KEYS_SET: u64 = 0o6;

    /// Status codes reported in S2 of the packet's first word.
    pub const STATUS_OK: u64 = 0;
    pub const STATUS_NO_PROCESSOR: u64 = 1;
    pub const STATUS_BAD_SUBFUNCTION: u64 = 2;
    pub const STATUS_NO_INPUT: u64 = 3;
}

impl IpCore {
    /// KCHG: exchange the access key and raise the activity environment.
    pub(crate) fn key_change(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(1)?;
        let operand = self.read_operand_word(true)?;

        let saved = Word36::ZERO.set_h2(self.ikr.access_key_bits());
        let exec = self.exec_regs();
        self.grs.set_x(0, exec, saved);

        self.ikr.set_access_key_bits(operand.h2());
        self.dr.set_db(DesignatorRegister::DB_QUANTUM_TIMER_ENABLED, true);
        self.dr.set_db(DesignatorRegister::DB_DEFERRABLE_INTERRUPT_ENABLED, true);
        self.dr.set_exec_register_set(true);
        Ok(())
    }

    /// SKQT: store the access key at U and the quantum timer at U+1.
    pub(crate) fn store_key_and_quantum(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(2)?;
        let key = Word36::ZERO.set_h2(self.ikr.access_key_bits());
        let timer = Word36::from_i64(self.quantum_timer.clamp(-(1 << 34), 1 << 34));
        self.write_operand_pair(DoubleWord36::new(key, timer))
    }

    /// SPD: store the low nine designator bits at U.
    pub(crate) fn store_processor_designators(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(1)?;
        let value = Word36::new(self.dr.word().bits() & 0o777);
        self.write_operand_word(true, value)
    }

    /// LPD: load the low nine designator bits from U.
    pub(crate) fn load_processor_designators(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(1)?;
        let word = self.read_operand_word(true)?;
        let merged = (self.dr.word().bits() & !0o777) | (word.bits() & 0o777);
        self.dr.set_word(Word36::new(merged));
        Ok(())
    }

    /// SPID: store the processor identity at U.
    pub(crate) fn store_processor_id(&mut self) -> Result<(), ExecutionError> {
        let value = Word36::ZERO.set_s1(u64::from(self.upi));
        self.write_operand_word(true, value)
    }

    /// SYSC: service a system-control packet at U against the system
    /// processor.
    ///
    /// The packet's first word carries the subfunction in S1; the status
    /// of the call comes back in S2 of the same word. Payload words follow
    /// the header.
    pub(crate) fn system_call(&mut self) -> Result<(), ExecutionError> {
        let OperandSite::Storage(br, u) = self.operand_site(true)? else {
            // the packet must live in storage, not the register file
            return Err(InterruptClass::InvalidInstruction.into());
        };
        let header = self.read_bank_word(br, u)?;
        let subfunction = header.s1();

        let Some(sp) = self.system_processor.clone() else {
            return self.write_bank_word(br, u, header.set_s2(sysc::STATUS_NO_PROCESSOR));
        };

        let status = match subfunction {
            sysc::CONSOLE_SEND => {
                // H2 of the header counts payload words of ASCII text
                let count = header.h2().min(32);
                let mut text = String::new();
                for ix in 0..count {
                    text.push_str(&self.read_bank_word(br, u + 1 + ix)?.to_string_ascii());
                }
                sp.send_console_output(text.trim_end().to_string());
                sysc::STATUS_OK
            }
            sysc::CONSOLE_POLL => match sp.poll_console_input() {
                Some(line) => {
                    let words = Word36::string_to_words_ascii(&line);
                    let count = words.len().min(32);
                    for (ix, word) in words.iter().take(count).enumerate() {
                        self.write_bank_word(br, u + 2 + ix as u64, *word)?;
                    }
                    self.write_bank_word(br, u + 1, Word36::new(count as u64))?;
                    sysc::STATUS_OK
                }
                None => sysc::STATUS_NO_INPUT,
            },
            sysc::DAYCLOCK_READ => {
                let clock = sp.dayclock_words();
                self.write_bank_word(br, u + 1, clock[0])?;
                self.write_bank_word(br, u + 2, clock[1])?;
                sysc::STATUS_OK
            }
            sysc::DAYCLOCK_SET => {
                self.require_privilege(1)?;
                let high = self.read_bank_word(br, u + 1)?;
                let low = self.read_bank_word(br, u + 2)?;
                let micros = (((high.bits() as u128) << 36) | low.bits() as u128) as u64;
                sp.set_dayclock_micros(micros);
                sysc::STATUS_OK
            }
            sysc::JUMP_KEYS_READ => {
                self.write_bank_word(br, u + 1, sp.jump_keys_word())?;
                sysc::STATUS_OK
            }
            sysc::JUMP_KEYS_SET => {
                self.require_privilege(1)?;
                let word = self.read_bank_word(br, u + 1)?;
                sp.set_jump_keys_word(word);
                sysc::STATUS_OK
            }
            _ => sysc::STATUS_BAD_SUBFUNCTION,
        };

        self.write_bank_word(br, u, header.set_s2(status))
    }
}
