//! Test (conditional skip) instruction family.
//!
//! A met condition skips the next instruction.

use std::cmp::Ordering;

use komodo_types::Word36;

use crate::error::ExecutionError;

use super::IpCore;

impl IpCore {
    /// TNOP/TSKP: the operand is resolved for its side effects only.
    pub(crate) fn test_skip(&mut self, condition: fn(Word36) -> bool) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        if condition(operand) {
            self.skip = true;
        }
        Ok(())
    }

    /// TE/TNE/TLE/TG: compare U against A(a).
    ///
    /// The ordering handed to the predicate is `U.compare(A(a))`.
    pub(crate) fn test_against_a(&mut self, predicate: fn(Ordering, Word36) -> bool) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let register = self.grs.get(self.a_index());
        if predicate(operand.compare(&register), operand) {
            self.skip = true;
        }
        Ok(())
    }

    /// TGM: skip when |U| exceeds A(a).
    pub(crate) fn test_magnitude(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?.magnitude();
        let register = self.grs.get(self.a_index());
        if operand.compare(&register) == Ordering::Greater {
            self.skip = true;
        }
        Ok(())
    }

    /// TW/TNW: skip when A(a) < U <= A(a+1), or the complement.
    pub(crate) fn test_within(&mut self, invert: bool) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let index = self.a_index();
        let low = self.grs.get(index);
        let high = self.grs.get(index + 1);
        let within = low.compare(&operand) == Ordering::Less && operand.compare(&high) != Ordering::Greater;
        if within != invert {
            self.skip = true;
        }
        Ok(())
    }

    /// TEP/TOP: skip on even (odd) population of A(a) AND U.
    pub(crate) fn test_parity(&mut self, even: bool) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let register = self.grs.get(self.a_index());
        let ones = Word36::new(register.bits() & operand.bits()).ones_count();
        if (ones % 2 == 0) == even {
            self.skip = true;
        }
        Ok(())
    }

    /// TLEM: skip when U.H2 <= X(a).XM, then increment X(a).
    ///
    /// With F0.h set and F0.a naming the same register as F0.x, the
    /// resolution already incremented it; incrementing again would double
    /// the step.
    pub(crate) fn test_le_modifier(&mut self) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let f0 = self.f0;
        let exec = self.exec_regs();
        let subject = self.grs.x(f0.a() as usize, exec);
        if (operand.bits() & 0o777777) <= subject.h2() {
            self.skip = true;
        }
        let already_incremented = f0.h() && f0.a() == f0.x();
        if !already_incremented {
            self.grs.increment_x(f0.a() as usize, exec);
        }
        Ok(())
    }

    fn masked_compare(&mut self) -> Result<(Ordering, Word36, Word36), ExecutionError> {
        let operand = self.read_operand()?;
        let mask = self.grs.r(2, self.exec_regs()).bits();
        let register = Word36::new(self.grs.get(self.a_index()).bits() & mask);
        let masked_operand = Word36::new(operand.bits() & mask);
        Ok((masked_operand.compare(&register), masked_operand, register))
    }

    /// MTE/MTNE/MTLE/MTG: masked compares through R2.
    pub(crate) fn masked_test(&mut self, predicate: fn(Ordering) -> bool) -> Result<(), ExecutionError> {
        let (ordering, _, _) = self.masked_compare()?;
        if predicate(ordering) {
            self.skip = true;
        }
        Ok(())
    }

    /// MTW/MTNW: masked within test against A(a), A(a+1).
    pub(crate) fn masked_test_within(&mut self, invert: bool) -> Result<(), ExecutionError> {
        let operand = self.read_operand()?;
        let mask = self.grs.r(2, self.exec_regs()).bits();
        let index = self.a_index();
        let masked = Word36::new(operand.bits() & mask);
        let low = Word36::new(self.grs.get(index).bits() & mask);
        let high = Word36::new(self.grs.get(index + 1).bits() & mask);
        let within = low.compare(&masked) == Ordering::Less && masked.compare(&high) != Ordering::Greater;
        if within != invert {
            self.skip = true;
        }
        Ok(())
    }
}
