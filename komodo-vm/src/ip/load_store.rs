//! Load and store instruction family.

use komodo_types::{DoubleWord36, Word36};

use crate::error::ExecutionError;

use super::registers::GeneralRegisterSet;
use super::IpCore;

impl IpCore {
    /// The flat GRS index of A(F0.a).
    pub(crate) fn a_index(&self) -> usize {
        GeneralRegisterSet::a_index(self.f0.a() as usize, self.exec_regs())
    }

    pub(crate) fn x_index(&self) -> usize {
        GeneralRegisterSet::x_index(self.f0.a() as usize, self.exec_regs())
    }

    pub(crate) fn r_index(&self) -> usize {
        GeneralRegisterSet::r_index(self.f0.a() as usize, self.exec_regs())
    }

    pub(crate) fn load_a(&mut self, transform: fn(Word36) -> Word36) -> Result<(), ExecutionError> {
        let value = self.read_operand()?;
        let index = self.a_index();
        self.grs.set(index, transform(value));
        Ok(())
    }

    pub(crate) fn load_x(&mut self, transform: fn(Word36) -> Word36) -> Result<(), ExecutionError> {
        let value = self.read_operand()?;
        let index = self.x_index();
        self.grs.set(index, transform(value));
        Ok(())
    }

    pub(crate) fn load_r(&mut self) -> Result<(), ExecutionError> {
        let value = self.read_operand()?;
        let index = self.r_index();
        self.grs.set(index, value);
        Ok(())
    }

    /// LXI/LXM: replace one half of X(a) with the operand.
    pub(crate) fn load_x_half(&mut self, increment_half: bool) -> Result<(), ExecutionError> {
        let value = self.read_operand()?;
        let index = self.x_index();
        let current = self.grs.get(index);
        let updated = if increment_half {
            current.set_h1(value.bits())
        } else {
            current.set_h2(value.bits())
        };
        self.grs.set(index, updated);
        Ok(())
    }

    /// LXSI: X(a).XI from the upper half of the operand word.
    pub(crate) fn load_x_si(&mut self) -> Result<(), ExecutionError> {
        let word = self.read_operand_word(true)?;
        let index = self.x_index();
        let current = self.grs.get(index);
        self.grs.set(index, current.set_h1(word.h1()));
        Ok(())
    }

    /// LXLM: X(a).XM from the lower half of the operand word.
    pub(crate) fn load_x_lm(&mut self) -> Result<(), ExecutionError> {
        let word = self.read_operand_word(true)?;
        let index = self.x_index();
        let current = self.grs.get(index);
        self.grs.set(index, current.set_h2(word.h2()));
        Ok(())
    }

    pub(crate) fn store_register(&mut self, index: usize) -> Result<(), ExecutionError> {
        let value = self.grs.get(index);
        self.write_operand(value)
    }

    pub(crate) fn store_a_transformed(&mut self, transform: fn(Word36) -> Word36) -> Result<(), ExecutionError> {
        let value = transform(self.grs.get(self.a_index()));
        self.write_operand(value)
    }

    pub(crate) fn store_constant(&mut self, value: Word36) -> Result<(), ExecutionError> {
        self.write_operand(value)
    }

    /// LAQW: A(a) receives the quarter of U selected by X(x).S1.
    ///
    /// The x field names the selector register, so no index modification
    /// applies to U.
    pub(crate) fn load_a_quarter(&mut self) -> Result<(), ExecutionError> {
        let selector = self.quarter_selector();
        let word = self.read_operand_word(false)?;
        let index = self.a_index();
        self.grs.set(index, Word36::new(word.quarter(selector)));
        Ok(())
    }

    /// SAQW: the selected quarter of U receives A(a).Q4.
    pub(crate) fn store_a_quarter(&mut self) -> Result<(), ExecutionError> {
        let selector = self.quarter_selector();
        let value = self.grs.get(self.a_index());
        self.update_operand_word(false, |_, word| Ok(word.set_quarter(selector, value.bits())))
    }

    /// LSBO: A(a) receives the sixth of U selected by X(x).S1.
    pub(crate) fn load_a_sixth(&mut self) -> Result<(), ExecutionError> {
        let selector = (self.grs.x(self.f0.x() as usize, self.exec_regs()).s1() % 6) as usize;
        let word = self.read_operand_word(false)?;
        let index = self.a_index();
        self.grs.set(index, Word36::new(word.sixth(selector)));
        Ok(())
    }

    fn quarter_selector(&self) -> usize {
        (self.grs.x(self.f0.x() as usize, self.exec_regs()).s1() & 0o3) as usize
    }

    pub(crate) fn load_double(&mut self, transform: fn(DoubleWord36) -> DoubleWord36) -> Result<(), ExecutionError> {
        let pair = transform(self.read_operand_pair()?);
        let index = self.a_index();
        self.grs.set(index, pair.high());
        self.grs.set(index + 1, pair.low());
        Ok(())
    }

    pub(crate) fn store_double(&mut self) -> Result<(), ExecutionError> {
        let index = self.a_index();
        let pair = DoubleWord36::new(self.grs.get(index), self.grs.get(index + 1));
        self.write_operand_pair(pair)
    }
}
