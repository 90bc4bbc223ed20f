//! Jump instruction family.

use komodo_types::Word36;

use crate::error::ExecutionError;

use super::{IpCore, StopReason};

impl IpCore {
    /// Load the program counter; the cycle will not advance it further.
    pub(crate) fn jump_to(&mut self, target: u64) {
        self.par.set_pc(target & 0o777777);
        self.jumped = true;
    }

    pub(crate) fn jump_unconditional(&mut self) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        self.jump_to(target);
        Ok(())
    }

    /// JK: jump when the jump key named by F0.a is set at the system
    /// processor. Without a system processor no key is ever set.
    pub(crate) fn jump_on_key(&mut self) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        let key = self.f0.a() as u8;
        let set = self
            .system_processor
            .as_ref()
            .is_some_and(|sp| sp.jump_key(key));
        if set {
            self.jump_to(target);
        }
        Ok(())
    }

    /// HLTJ: stop the processor with the target in the program counter.
    pub(crate) fn halt_jump(&mut self) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        self.jump_to(target);
        self.stop(StopReason::HaltJump, 0);
        Ok(())
    }

    /// SLJ: plant the return address in U.H2 and continue at U+1.
    pub(crate) fn store_location_and_jump(&mut self) -> Result<(), ExecutionError> {
        let return_address = (self.par.pc() + 1) & 0o777777;
        let target = match self.operand_site(true)? {
            super::operand::OperandSite::Grs(index) => {
                let word = self.grs.get(index);
                self.grs.set(index, word.set_h2(return_address));
                index as u64
            }
            super::operand::OperandSite::Storage(br, u) => {
                let word = self.read_bank_word(br, u)?;
                self.write_bank_word(br, u, word.set_h2(return_address))?;
                u
            }
        };
        self.jump_to(target + 1);
        Ok(())
    }

    /// LMJ: return address into X(a).H2, then jump.
    pub(crate) fn load_modifier_and_jump(&mut self) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        let index = self.x_index();
        let current = self.grs.get(index);
        self.grs.set(index, current.set_h2((self.par.pc() + 1) & 0o777777));
        self.jump_to(target);
        Ok(())
    }

    /// JZ/JNZ/JP/JN on A(a).
    pub(crate) fn jump_on_a(&mut self, condition: fn(Word36) -> bool) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        if condition(self.grs.get(self.a_index())) {
            self.jump_to(target);
        }
        Ok(())
    }

    /// JPS/JNS: conditionally jump on the sign of A(a), and circularly
    /// shift it up one either way.
    pub(crate) fn jump_and_shift(&mut self, on_positive: bool) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        let index = self.a_index();
        let register = self.grs.get(index);
        if register.is_positive() == on_positive {
            self.jump_to(target);
        }
        self.grs.set(index, register.left_shift_circular(1));
        Ok(())
    }

    /// JGD: the register named by j and a jumps while positive and
    /// nonzero, and is decremented afterwards either way.
    pub(crate) fn jump_greater_decrement(&mut self) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        let index = (((self.f0.j() & 0o7) << 4) | self.f0.a()) as usize;
        let register = self.grs.get(index);
        if register.is_positive() && !register.is_zero() {
            self.jump_to(target);
        }
        let decremented = self.ones_add(register, Word36::from_i64(-1));
        self.grs.set(index, decremented);
        Ok(())
    }

    /// JO/JNO/JC/JNC/JDF/JNDF: jump on a designator bit.
    pub(crate) fn jump_on_designator(&mut self, db: u32, wanted: bool) -> Result<(), ExecutionError> {
        let target = self.operand_value_u()?;
        if self.dr.get_db(db) == wanted {
            self.jump_to(target);
        }
        Ok(())
    }

    /// NOP still resolves its operand for the index side effects.
    pub(crate) fn no_operation(&mut self) -> Result<(), ExecutionError> {
        self.resolve_operand(true)?;
        Ok(())
    }

    /// IAR: store the detail code and stop for the debugger.
    pub(crate) fn initiate_auto_recovery(&mut self) -> Result<(), ExecutionError> {
        self.require_privilege(2)?;
        let detail = self.operand_value_u()? as u16;
        self.stop(StopReason::Debug, detail);
        Ok(())
    }
}
