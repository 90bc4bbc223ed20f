//! Operand address resolution and partial-word transfer.

use komodo_types::{DoubleWord36, Word36};

use crate::consts::GRS_ADDRESSING_LIMIT;
use crate::error::ExecutionError;
use crate::interrupt::InterruptClass;

use super::registers::add_h2;
use super::IpCore;

/// j-field values claiming the operand is the resolved U itself.
pub(crate) const J_U: u64 = 0o16;
pub(crate) const J_XU: u64 = 0o17;

/// Longest indirect chain honored before the chase is abandoned.
const INDIRECT_LIMIT: usize = 64;

/// Where a resolved operand lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OperandSite {
    /// A general register, by flat GRS index.
    Grs(usize),
    /// Storage through a base register, by relative address.
    Storage(usize, u64),
}

/// Extract the j-selected field of a word as a 36-bit value.
///
/// XH1/XH2 sign-extend; everything else zero fills. With quarter-word mode
/// set, j codes 4..=7 select quarters instead of XH1/T fields.
pub(crate) fn extract_partial(word: Word36, j: u64, quarter_word_mode: bool) -> Word36 {
    let value = match j {
        0o0 => word.w(),
        0o1 => word.h2(),
        0o2 => word.h1(),
        0o3 => word.xh2(),
        0o4 if quarter_word_mode => word.q1(),
        0o4 => word.xh1(),
        0o5 if quarter_word_mode => word.q2(),
        0o5 => word.t3(),
        0o6 if quarter_word_mode => word.q3(),
        0o6 => word.t2(),
        0o7 if quarter_word_mode => word.q4(),
        0o7 => word.t1(),
        0o10 => word.s6(),
        0o11 => word.s5(),
        0o12 => word.s4(),
        0o13 => word.s3(),
        0o14 => word.s2(),
        0o15 => word.s1(),
        _ => word.w(),
    };
    Word36::new(value)
}

/// Replace the j-selected field of `original` with the low bits of
/// `value`, preserving the rest.
pub(crate) fn inject_partial(original: Word36, j: u64, quarter_word_mode: bool, value: Word36) -> Word36 {
    let v = value.bits();
    match j {
        0o0 => value,
        0o1 | 0o3 => original.set_h2(v),
        0o2 => original.set_h1(v),
        0o4 if quarter_word_mode => original.set_q1(v),
        0o4 => original.set_h1(v),
        0o5 if quarter_word_mode => original.set_q2(v),
        0o5 => original.set_t3(v),
        0o6 if quarter_word_mode => original.set_q3(v),
        0o6 => original.set_t2(v),
        0o7 if quarter_word_mode => original.set_q4(v),
        0o7 => original.set_t1(v),
        0o10 => original.set_s6(v),
        0o11 => original.set_s5(v),
        0o12 => original.set_s4(v),
        0o13 => original.set_s3(v),
        0o14 => original.set_s2(v),
        0o15 => original.set_s1(v),
        _ => value,
    }
}

/// True when the j field asks for twos-complement arithmetic on the
/// selected field.
///
/// Halves and sixths are unsigned storage fields; the full word and the
/// sign-extending halves stay in ones-complement; quarters versus thirds
/// follow quarter-word mode.
pub(crate) fn twos_complement_field(j: u64, quarter_word_mode: bool) -> bool {
    match j {
        0o1 | 0o2 | 0o10..=0o15 => true,
        0o0 | 0o3 => false,
        0o4..=0o7 => quarter_word_mode,
        _ => false,
    }
}

impl IpCore {
    /// Compute the operand address U.
    ///
    /// Applies index modification and incrementation when `apply_index`
    /// (instructions that claim the x field as a register operand pass
    /// false) and chases basic-mode indirect words. Returns U plus the
    /// base register the address selects.
    pub(crate) fn resolve_operand(&mut self, apply_index: bool) -> Result<(u64, usize), ExecutionError> {
        let f0 = self.f0;
        let exec = self.exec_regs();

        if self.dr.basic_mode() {
            let mut x = f0.x();
            let mut h = f0.h();
            let mut i = f0.i();
            let mut u = f0.u();

            for _ in 0..INDIRECT_LIMIT {
                if apply_index && x != 0 {
                    u = add_h2(u, self.grs.x(x as usize, exec).h2());
                    if h {
                        self.grs.increment_x(x as usize, exec);
                    }
                } else {
                    u &= 0o777777;
                }

                if !i {
                    let br = self.select_basic_bank(u)?;
                    return Ok((u, br));
                }

                // one more cycle through an indirect word
                let br = self.select_basic_bank(u)?;
                let word = self.base_registers[br]
                    .read(u)
                    .map_err(|_| ExecutionError::from(InterruptClass::ReferenceViolation))?;
                let bits = word.bits();
                x = (bits >> 18) & 0o17;
                h = (bits >> 17) & 1 != 0;
                i = (bits >> 16) & 1 != 0;
                u = bits & 0o177777;
            }
            Err(InterruptClass::AddressingException.into())
        } else {
            let mut u = f0.d();
            if apply_index && f0.x() != 0 {
                u = add_h2(u, self.grs.x(f0.x() as usize, exec).h2());
                if f0.h() {
                    self.grs.increment_x(f0.x() as usize, exec);
                }
            }
            let br = if f0.i() { f0.b() + 16 } else { f0.b() };
            Ok((u, br))
        }
    }

    /// The basic-mode bank whose limits contain `u`, searching B12..=B15.
    ///
    /// GRS-range addresses short-circuit before any bank is consulted, so
    /// a miss here is a reference violation.
    fn select_basic_bank(&self, u: u64) -> Result<usize, ExecutionError> {
        if u < GRS_ADDRESSING_LIMIT {
            // any bank answer will do; the GRS wins before storage access
            return Ok(12);
        }
        (12..16)
            .find(|br| self.base_registers[*br].contains(u))
            .ok_or_else(|| InterruptClass::ReferenceViolation.into())
    }

    /// Resolve the operand to its site, honoring GRS addressing.
    pub(crate) fn operand_site(&mut self, apply_index: bool) -> Result<OperandSite, ExecutionError> {
        let (u, br) = self.resolve_operand(apply_index)?;
        let grs_window = self.dr.basic_mode() || br == 0;
        if grs_window && u < GRS_ADDRESSING_LIMIT {
            Ok(OperandSite::Grs(u as usize))
        } else {
            Ok(OperandSite::Storage(br, u))
        }
    }

    /// The resolved U itself, for instructions that treat it as a value
    /// (shift counts, jump targets, immediate operands).
    pub(crate) fn operand_value_u(&mut self) -> Result<u64, ExecutionError> {
        Ok(self.resolve_operand(true)?.0)
    }

    /// Read the full operand word, ignoring the j field.
    pub(crate) fn read_operand_word(&mut self, apply_index: bool) -> Result<Word36, ExecutionError> {
        match self.operand_site(apply_index)? {
            OperandSite::Grs(index) => Ok(self.grs.get(index)),
            OperandSite::Storage(br, u) => self.read_bank_word(br, u),
        }
    }

    /// Write the full operand word, ignoring the j field.
    pub(crate) fn write_operand_word(&mut self, apply_index: bool, value: Word36) -> Result<(), ExecutionError> {
        match self.operand_site(apply_index)? {
            OperandSite::Grs(index) => {
                self.grs.set(index, value);
                Ok(())
            }
            OperandSite::Storage(br, u) => self.write_bank_word(br, u, value),
        }
    }

    /// Read-modify-write the operand word at one resolved site.
    pub(crate) fn update_operand_word(
        &mut self,
        apply_index: bool,
        f: impl FnOnce(&mut Self, Word36) -> Result<Word36, ExecutionError>,
    ) -> Result<(), ExecutionError> {
        match self.operand_site(apply_index)? {
            OperandSite::Grs(index) => {
                let word = self.grs.get(index);
                let updated = f(self, word)?;
                self.grs.set(index, updated);
                Ok(())
            }
            OperandSite::Storage(br, u) => {
                let word = self.read_bank_word(br, u)?;
                let updated = f(self, word)?;
                self.write_bank_word(br, u, updated)
            }
        }
    }

    /// Read the j-selected operand.
    pub(crate) fn read_operand(&mut self) -> Result<Word36, ExecutionError> {
        let j = self.f0.j();
        if self.f0_j_immediate() {
            let u = self.operand_value_u()?;
            return Ok(match j {
                J_XU => Word36::new(Word36::new(u).xh2()),
                _ => Word36::new(u),
            });
        }
        let qwm = self.dr.quarter_word_mode();
        let word = self.read_operand_word(true)?;
        Ok(extract_partial(word, j, qwm))
    }

    /// Write the j-selected operand field, read-modify-write for partial
    /// stores.
    pub(crate) fn write_operand(&mut self, value: Word36) -> Result<(), ExecutionError> {
        let j = self.f0.j();
        if self.f0_j_immediate() {
            return Err(InterruptClass::InvalidInstruction.into());
        }
        let qwm = self.dr.quarter_word_mode();
        match self.operand_site(true)? {
            OperandSite::Grs(index) => {
                let merged = inject_partial(self.grs.get(index), j, qwm, value);
                self.grs.set(index, merged);
                Ok(())
            }
            OperandSite::Storage(br, u) => {
                let original = if j == 0 { Word36::ZERO } else { self.read_bank_word(br, u)? };
                self.write_bank_word(br, u, inject_partial(original, j, qwm, value))
            }
        }
    }

    /// Read the double-word operand at U, U+1.
    pub(crate) fn read_operand_pair(&mut self) -> Result<DoubleWord36, ExecutionError> {
        match self.operand_site(true)? {
            OperandSite::Grs(index) => Ok(DoubleWord36::new(self.grs.get(index), self.grs.get(index + 1))),
            OperandSite::Storage(br, u) => {
                let high = self.read_bank_word(br, u)?;
                let low = self.read_bank_word(br, u + 1)?;
                Ok(DoubleWord36::new(high, low))
            }
        }
    }

    /// Write the double-word operand at U, U+1.
    pub(crate) fn write_operand_pair(&mut self, value: DoubleWord36) -> Result<(), ExecutionError> {
        match self.operand_site(true)? {
            OperandSite::Grs(index) => {
                self.grs.set(index, value.high());
                self.grs.set(index + 1, value.low());
                Ok(())
            }
            OperandSite::Storage(br, u) => {
                self.write_bank_word(br, u, value.high())?;
                self.write_bank_word(br, u + 1, value.low())
            }
        }
    }

    /// Whether F0's j field names an immediate operand.
    pub(crate) fn f0_j_immediate(&self) -> bool {
        let claims_partial = super::Opcode::decode(&self.f0).is_some_and(super::Opcode::j_is_partial_word);
        claims_partial && matches!(self.f0.j(), J_U | J_XU)
    }

    pub(crate) fn read_bank_word(&self, br: usize, u: u64) -> Result<Word36, ExecutionError> {
        let bank = &self.base_registers[br];
        if !bank.contains(u) {
            return Err(InterruptClass::ReferenceViolation.into());
        }
        if !bank.effective_permissions(&self.ikr.access_key()).read {
            return Err(InterruptClass::ReferenceViolation.into());
        }
        bank.read(u).map_err(|_| InterruptClass::ReferenceViolation.into())
    }

    pub(crate) fn write_bank_word(&mut self, br: usize, u: u64, value: Word36) -> Result<(), ExecutionError> {
        let bank = &self.base_registers[br];
        if !bank.contains(u) {
            return Err(InterruptClass::ReferenceViolation.into());
        }
        if !bank.effective_permissions(&self.ikr.access_key()).write {
            return Err(InterruptClass::ReferenceViolation.into());
        }
        bank.write(u, value).map_err(|_| InterruptClass::ReferenceViolation.into())
    }
}
