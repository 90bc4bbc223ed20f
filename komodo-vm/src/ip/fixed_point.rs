//! Fixed-point arithmetic and logical instruction family.

use komodo_types::{DoubleWord36, Word36};

use crate::error::ExecutionError;
use crate::interrupt::{InterruptClass, MachineInterrupt};

use super::operand::{extract_partial, inject_partial, twos_complement_field};
use super::IpCore;

impl IpCore {
    /// Ones-complement add updating the carry and overflow designators.
    ///
    /// An overflow raises the operation trap when it is enabled; the
    /// result is stored either way.
    pub(crate) fn ones_add(&mut self, a: Word36, b: Word36) -> Word36 {
        let sum = a.add(b);
        self.dr.set_carry(sum.carry);
        self.dr.set_overflow(sum.overflow);
        if sum.overflow && self.dr.operation_trap_enabled() {
            self.raise(MachineInterrupt::of_class(InterruptClass::OperationTrap));
        }
        sum.value
    }

    fn twos_add(&mut self, a: Word36, b: Word36) -> Word36 {
        let sum = a.add_twos(b);
        self.dr.set_carry(sum.carry);
        self.dr.set_overflow(sum.overflow);
        if sum.overflow && self.dr.operation_trap_enabled() {
            self.raise(MachineInterrupt::of_class(InterruptClass::OperationTrap));
        }
        sum.value
    }

    /// AA/ANA/AMA/ANMA.
    pub(crate) fn add_to_a(&mut self, negate: bool, magnitude: bool) -> Result<(), ExecutionError> {
        let mut operand = self.read_operand()?;
        if magnitude {
            operand = operand.magnitude();
        }
        if negate {
            operand = operand.negate();
        }
        let index = self.a_index();
        let sum = self.ones_add(self.grs.get(index), operand);
        self.grs.set(index, sum);
        Ok(())
    }

    /// AU/ANU: the sum of A(a) and U lands in A(a+1).
    pub(crate) fn add_upper(&mut self, negate: bool) -> Result<(), ExecutionError> {
        let mut operand = self.read_operand()?;
        if negate {
            operand = operand.negate();
        }
        let index = self.a_index();
        let sum = self.ones_add(self.grs.get(index), operand);
        self.grs.set(index + 1, sum);
        Ok(())
    }

    pub(crate) fn add_to_x(&mut self, negate: bool) -> Result<(), ExecutionError> {
        let mut operand = self.read_operand()?;
        if negate {
            operand = operand.negate();
        }
        let index = self.x_index();
        let sum = self.ones_add(self.grs.get(index), operand);
        self.grs.set(index, sum);
        Ok(())
    }

    /// DA/DAN: 72-bit add of the operand pair into A(a),A(a+1).
    pub(crate) fn add_double(&mut self, negate: bool) -> Result<(), ExecutionError> {
        let mut operand = self.read_operand_pair()?;
        if negate {
            operand = operand.negate();
        }
        let index = self.a_index();
        let accumulator = DoubleWord36::new(self.grs.get(index), self.grs.get(index + 1));
        let (sum, carry, overflow) = accumulator.add(operand);
        self.dr.set_carry(carry);
        self.dr.set_overflow(overflow);
        if overflow && self.dr.operation_trap_enabled() {
            self.raise(MachineInterrupt::of_class(InterruptClass::OperationTrap));
        }
        self.grs.set(index, sum.high());
        self.grs.set(index + 1, sum.low());
        Ok(())
    }

    /// ADD1/SUB1/INC/INC2/DEC/DEC2: read-modify-write on the j-selected
    /// field of U.
    ///
    /// The complement discipline follows the field: halves and sixths add
    /// twos-complement, the full word and XH2 ones-complement, quarters
    /// versus thirds by quarter-word mode. The INC/DEC forms skip the next
    /// instruction when the result is nonzero.
    pub(crate) fn modify_storage(&mut self, delta: i64, skip_on_nonzero: bool) -> Result<(), ExecutionError> {
        let j = self.f0.j();
        let qwm = self.dr.quarter_word_mode();
        let mut result = Word36::ZERO;
        self.update_operand_word(true, |core, word| {
            let field = extract_partial(word, j, qwm);
            result = if twos_complement_field(j, qwm) {
                // twos encoding of the delta for unsigned fields
                let sum = field.add_twos(Word36::new(delta as u64 & komodo_types::WORD_MASK));
                core.dr.set_carry(sum.carry);
                core.dr.set_overflow(sum.overflow);
                sum.value
            } else {
                core.ones_add(field, Word36::from_i64(delta))
            };
            Ok(inject_partial(word, j, qwm, result))
        })?;
        if skip_on_nonzero && !result.is_zero() {
            self.skip = true;
        }
        Ok(())
    }

    /// ENZ: collapse a negative-zero operand to positive zero.
    pub(crate) fn eliminate_negative_zero(&mut self) -> Result<(), ExecutionError> {
        self.update_operand_word(true, |_, word| {
            Ok(if word.is_negative_zero() { Word36::ZERO } else { word })
        })
    }

    /// MI: 72-bit product of A(a) and U into A(a),A(a+1).
    pub(crate) fn multiply_integer(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let product = i128::from(self.grs.get(index).to_i64()) * i128::from(operand.to_i64());
        let pair = DoubleWord36::from_i128(product);
        self.grs.set(index, pair.high());
        self.grs.set(index + 1, pair.low());
        Ok(())
    }

    /// MSI: single-register product; overflow sets the designators.
    pub(crate) fn multiply_single(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let product = i128::from(self.grs.get(index).to_i64()) * i128::from(operand.to_i64());
        let overflow = product > i128::from(Word36::MAX.to_i64()) || product < -i128::from(Word36::MAX.to_i64());
        self.dr.set_overflow(overflow);
        if overflow && self.dr.operation_trap_enabled() {
            self.raise(MachineInterrupt::of_class(InterruptClass::OperationTrap));
        }
        self.grs.set(index, Word36::from_i64(product as i64));
        Ok(())
    }

    /// MF: fractional product, the 72-bit product shifted up one.
    pub(crate) fn multiply_fractional(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let product = i128::from(self.grs.get(index).to_i64()) * i128::from(operand.to_i64());
        let pair = DoubleWord36::from_i128(product << 1);
        self.grs.set(index, pair.high());
        self.grs.set(index + 1, pair.low());
        Ok(())
    }

    fn divide(&mut self, dividend: i128, divisor: i64) -> Result<(i64, i64), ExecutionError> {
        if divisor == 0 {
            self.dr.set_divide_check(true);
            return Err(InterruptClass::ArithmeticException.into());
        }
        let quotient = dividend / i128::from(divisor);
        if quotient > i128::from(Word36::MAX.to_i64()) || quotient < -i128::from(Word36::MAX.to_i64()) {
            self.dr.set_divide_check(true);
            return Err(InterruptClass::ArithmeticException.into());
        }
        Ok((quotient as i64, (dividend % i128::from(divisor)) as i64))
    }

    /// DI: divide A(a),A(a+1) by U; quotient to A(a), remainder to A(a+1).
    pub(crate) fn divide_integer(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let dividend = DoubleWord36::new(self.grs.get(index), self.grs.get(index + 1)).to_i128();
        let (quotient, remainder) = self.divide(dividend, operand.to_i64())?;
        self.grs.set(index, Word36::from_i64(quotient));
        self.grs.set(index + 1, Word36::from_i64(remainder));
        Ok(())
    }

    /// DSF: single fractional divide; quotient only, to A(a+1).
    pub(crate) fn divide_single_fractional(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let dividend = DoubleWord36::new(self.grs.get(index), self.grs.get(index + 1)).to_i128() >> 1;
        let (quotient, _) = self.divide(dividend, operand.to_i64())?;
        self.grs.set(index + 1, Word36::from_i64(quotient));
        Ok(())
    }

    /// DF: fractional divide of the halved dividend pair.
    pub(crate) fn divide_fractional(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let dividend = DoubleWord36::new(self.grs.get(index), self.grs.get(index + 1)).to_i128() >> 1;
        let (quotient, remainder) = self.divide(dividend, operand.to_i64())?;
        self.grs.set(index, Word36::from_i64(quotient));
        self.grs.set(index + 1, Word36::from_i64(remainder));
        Ok(())
    }

    /// OR/XOR/AND: the combination of A(a) and U lands in A(a+1).
    pub(crate) fn logical(&mut self, op: fn(u64, u64) -> u64) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let result = Word36::new(op(self.grs.get(index).bits(), operand.bits()));
        self.grs.set(index + 1, result);
        Ok(())
    }

    /// MLU: U under the R2 mask merged with A(a) outside it, into A(a+1).
    pub(crate) fn masked_load_upper(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let mask = self.grs.r(2, self.exec_regs()).bits();
        let index = self.a_index();
        let merged = (operand.bits() & mask) | (self.grs.get(index).bits() & !mask);
        self.grs.set(index + 1, Word36::new(merged & komodo_types::WORD_MASK));
        Ok(())
    }
}
