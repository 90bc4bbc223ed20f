//! Stack instructions and the return control stack discipline.
//!
//! BUY and SELL drive a downward-growing frame stack through an X
//! register: XI holds the frame size, XM the current top. The return
//! control stack through B25 uses the executive X0 the same way, with
//! fixed two-word frames pushed by CALL/GOTO and popped by RTN.

use komodo_types::Word36;

use crate::consts::{BR_RCS, RCS_FRAME_SIZE};
use crate::error::ExecutionError;
use crate::interrupt::{stack_status, InterruptClass, MachineInterrupt};

use super::registers::add_h2;
use super::IpCore;

/// 18-bit ones-complement negation.
const fn negate_h2(value: u64) -> u64 {
    (!value) & 0o777777
}

impl IpCore {
    fn stack_fault(&self, short_status: u8) -> ExecutionError {
        MachineInterrupt::new(
            InterruptClass::RcsGenericStackUnderflowOverflow,
            short_status,
            Word36::ZERO,
            Word36::ZERO,
        )
        .into()
    }

    /// The base register BUY/SELL frames live in: the b field in extended
    /// mode, the basic-mode data bank of the current top otherwise.
    fn stack_bank(&self, top: u64) -> Result<usize, ExecutionError> {
        if self.dr.basic_mode() {
            (12..16)
                .find(|br| self.base_registers[*br].contains(top))
                .ok_or_else(|| InterruptClass::ReferenceViolation.into())
        } else {
            Ok(self.f0.b())
        }
    }

    /// BUY: claim a frame below the current top and store the purchase
    /// value there.
    pub(crate) fn stack_buy(&mut self) -> Result<(), ExecutionError> {
        let exec = self.exec_regs();
        let x = self.f0.x() as usize;
        if x == 0 {
            return Err(InterruptClass::InvalidInstruction.into());
        }
        let pointer = self.grs.x(x, exec);
        let new_top = add_h2(pointer.h2(), negate_h2(pointer.h1()));

        let bank = self.stack_bank(new_top)?;
        let limits = &self.base_registers[bank];
        if limits.void || new_top < limits.lower_limit {
            return Err(self.stack_fault(stack_status::OVERFLOW));
        }

        self.write_bank_word(bank, new_top, Word36::new(self.f0.d()))?;
        self.grs.set_x(x, exec, pointer.set_h2(new_top));
        Ok(())
    }

    /// SELL: release the frame at the top, returning its first word to
    /// A(a).
    pub(crate) fn stack_sell(&mut self) -> Result<(), ExecutionError> {
        let exec = self.exec_regs();
        let x = self.f0.x() as usize;
        if x == 0 {
            return Err(InterruptClass::InvalidInstruction.into());
        }
        let pointer = self.grs.x(x, exec);
        let top = pointer.h2();
        let new_top = add_h2(top, pointer.h1());

        let bank = self.stack_bank(top).unwrap_or_else(|_| self.f0.b());
        let limits = &self.base_registers[bank];
        if limits.void || new_top > limits.upper_limit + 1 {
            return Err(self.stack_fault(stack_status::UNDERFLOW));
        }

        let released = self.read_bank_word(bank, top)?;
        let a_index = self.a_index();
        self.grs.set(a_index, released);
        self.grs.set_x(x, exec, pointer.set_h2(new_top));
        Ok(())
    }

    /* return control stack */

    /// Push a two-word frame through B25; the executive X0 is the stack
    /// pointer.
    pub(crate) fn rcs_push(&mut self, frame: [Word36; 2]) -> Result<(), ExecutionError> {
        let rcs = &self.base_registers[BR_RCS];
        if rcs.void {
            return Err(self.stack_fault(stack_status::OVERFLOW));
        }
        let pointer = self.grs.x(0, true);
        let new_top = pointer.h2().wrapping_sub(RCS_FRAME_SIZE) & 0o777777;
        if new_top < rcs.lower_limit || new_top > rcs.upper_limit {
            return Err(self.stack_fault(stack_status::OVERFLOW));
        }

        self.base_registers[BR_RCS]
            .write(new_top, frame[0])
            .and_then(|_| self.base_registers[BR_RCS].write(new_top + 1, frame[1]))
            .map_err(|_| self.stack_fault(stack_status::OVERFLOW))?;
        self.grs.set_x(0, true, pointer.set_h2(new_top));
        Ok(())
    }

    /// Pop a two-word frame pushed by [`Self::rcs_push`].
    pub(crate) fn rcs_pop(&mut self) -> Result<[Word36; 2], ExecutionError> {
        let rcs = &self.base_registers[BR_RCS];
        if rcs.void {
            return Err(self.stack_fault(stack_status::UNDERFLOW));
        }
        let pointer = self.grs.x(0, true);
        let top = pointer.h2();
        if top + RCS_FRAME_SIZE > rcs.upper_limit + 1 {
            return Err(self.stack_fault(stack_status::UNDERFLOW));
        }

        let frame = [
            self.base_registers[BR_RCS]
                .read(top)
                .map_err(|_| self.stack_fault(stack_status::UNDERFLOW))?,
            self.base_registers[BR_RCS]
                .read(top + 1)
                .map_err(|_| self.stack_fault(stack_status::UNDERFLOW))?,
        ];
        self.grs.set_x(0, true, pointer.set_h2(top + RCS_FRAME_SIZE));
        Ok(frame)
    }

    /// The frame CALL and GOTO push: the reentry address word and the
    /// environment word carrying the b field, the preserved designator
    /// bits and the access key.
    pub(crate) fn rcs_frame(&self) -> [Word36; 2] {
        let reentry = (self.par.l_bdi() << 18) | ((self.par.pc() + 1) & 0o777777);
        let environment = ((self.f0.b() as u64 & 0o3) << 24) | self.dr.rcs_preserved_bits() | self.ikr.access_key_bits();
        [Word36::new(reentry), Word36::new(environment)]
    }
}
