//! Instruction dispatch.

use tracing::trace;

use crate::error::ExecutionError;
use crate::interrupt::InterruptClass;

use super::{IpCore, Opcode};

impl IpCore {
    /// Decode F0 and run the handler.
    pub(crate) fn dispatch(&mut self) -> Result<(), ExecutionError> {
        let Some(opcode) = Opcode::decode(&self.f0) else {
            return Err(InterruptClass::InvalidInstruction.into());
        };
        trace!(upi = self.upi, %opcode, pc = self.par.pc(), "execute");

        match opcode {
            /* loads and stores */
            Opcode::LA => self.load_a(|w| w),
            Opcode::LNA => self.load_a(|w| w.negate()),
            Opcode::LMA => self.load_a(|w| w.magnitude()),
            Opcode::LNMA => self.load_a(|w| w.magnitude().negate()),
            Opcode::LX => self.load_x(|w| w),
            Opcode::LXI => self.load_x_half(true),
            Opcode::LXM => self.load_x_half(false),
            Opcode::LXSI => self.load_x_si(),
            Opcode::LXLM => self.load_x_lm(),
            Opcode::LR => self.load_r(),
            Opcode::SA => self.store_register(super::registers::GeneralRegisterSet::a_index(
                self.f0.a() as usize,
                self.exec_regs(),
            )),
            Opcode::SNA => self.store_a_transformed(|w| w.negate()),
            Opcode::SMA => self.store_a_transformed(|w| w.magnitude()),
            Opcode::SX => self.store_register(super::registers::GeneralRegisterSet::x_index(
                self.f0.a() as usize,
                self.exec_regs(),
            )),
            Opcode::SR => self.store_register(super::registers::GeneralRegisterSet::r_index(
                self.f0.a() as usize,
                self.exec_regs(),
            )),
            Opcode::SZ => self.store_constant(komodo_types::Word36::ZERO),
            Opcode::SNZ => self.store_constant(komodo_types::Word36::NEG_ZERO),
            Opcode::SP1 => self.store_constant(komodo_types::Word36::from_i64(1)),
            Opcode::SN1 => self.store_constant(komodo_types::Word36::from_i64(-1)),
            Opcode::SFS => self.store_constant(komodo_types::Word36::from_str_fieldata("      ")),
            Opcode::SFZ => self.store_constant(komodo_types::Word36::from_str_fieldata("000000")),
            Opcode::SAS => self.store_constant(komodo_types::Word36::from_str_ascii("    ")),
            Opcode::SAZ => self.store_constant(komodo_types::Word36::from_str_ascii("0000")),
            Opcode::LAQW => self.load_a_quarter(),
            Opcode::SAQW => self.store_a_quarter(),
            Opcode::LSBO => self.load_a_sixth(),
            Opcode::DL => self.load_double(|d| d),
            Opcode::DLN => self.load_double(|d| d.negate()),
            Opcode::DLM => self.load_double(|d| if d.is_negative() { d.negate() } else { d }),
            Opcode::DS => self.store_double(),

            /* fixed point and logical */
            Opcode::AA => self.add_to_a(false, false),
            Opcode::ANA => self.add_to_a(true, false),
            Opcode::AMA => self.add_to_a(false, true),
            Opcode::ANMA => self.add_to_a(true, true),
            Opcode::AU => self.add_upper(false),
            Opcode::ANU => self.add_upper(true),
            Opcode::AX => self.add_to_x(false),
            Opcode::ANX => self.add_to_x(true),
            Opcode::DA => self.add_double(false),
            Opcode::DAN => self.add_double(true),
            Opcode::ADD1 => self.modify_storage(1, false),
            Opcode::SUB1 => self.modify_storage(-1, false),
            Opcode::INC => self.modify_storage(1, true),
            Opcode::INC2 => self.modify_storage(2, true),
            Opcode::DEC => self.modify_storage(-1, true),
            Opcode::DEC2 => self.modify_storage(-2, true),
            Opcode::ENZ => self.eliminate_negative_zero(),
            Opcode::MI => self.multiply_integer(),
            Opcode::MSI => self.multiply_single(),
            Opcode::MF => self.multiply_fractional(),
            Opcode::DI => self.divide_integer(),
            Opcode::DSF => self.divide_single_fractional(),
            Opcode::DF => self.divide_fractional(),
            Opcode::OR => self.logical(|a, u| a | u),
            Opcode::XOR => self.logical(|a, u| a ^ u),
            Opcode::AND => self.logical(|a, u| a & u),
            Opcode::MLU => self.masked_load_upper(),

            /* shifts */
            Opcode::SSC => self.shift_single(|w, n| w.right_shift_circular(n)),
            Opcode::SSL => self.shift_single(|w, n| w.right_shift_logical(n)),
            Opcode::SSA => self.shift_single(|w, n| w.right_shift_algebraic(n)),
            Opcode::DSC => self.shift_double(|d, n| d.right_shift_circular(n)),
            Opcode::DSL => self.shift_double(|d, n| d.right_shift_logical(n)),
            Opcode::DSA => self.shift_double(|d, n| d.right_shift_algebraic(n)),
            Opcode::LSC => self.load_shift_count(),
            Opcode::DLSC => self.double_load_shift_count(),

            /* tests */
            Opcode::TNOP => self.test_skip(|_| false),
            Opcode::TSKP => self.test_skip(|_| true),
            Opcode::TE => self.test_against_a(|ord, _| ord == std::cmp::Ordering::Equal),
            Opcode::TNE => self.test_against_a(|ord, _| ord != std::cmp::Ordering::Equal),
            Opcode::TLE => self.test_against_a(|ord, _| ord != std::cmp::Ordering::Greater),
            Opcode::TG => self.test_against_a(|ord, _| ord == std::cmp::Ordering::Greater),
            Opcode::TGM => self.test_magnitude(),
            Opcode::TW => self.test_within(false),
            Opcode::TNW => self.test_within(true),
            Opcode::TEP => self.test_parity(true),
            Opcode::TOP => self.test_parity(false),
            Opcode::TLEM => self.test_le_modifier(),
            Opcode::MTE => self.masked_test(|ord| ord == std::cmp::Ordering::Equal),
            Opcode::MTNE => self.masked_test(|ord| ord != std::cmp::Ordering::Equal),
            Opcode::MTLE => self.masked_test(|ord| ord != std::cmp::Ordering::Greater),
            Opcode::MTG => self.masked_test(|ord| ord == std::cmp::Ordering::Greater),
            Opcode::MTW => self.masked_test_within(false),
            Opcode::MTNW => self.masked_test_within(true),

            /* jumps */
            Opcode::J => self.jump_unconditional(),
            Opcode::JK => self.jump_on_key(),
            Opcode::HLTJ => self.halt_jump(),
            Opcode::SLJ => self.store_location_and_jump(),
            Opcode::LMJ => self.load_modifier_and_jump(),
            Opcode::JZ => self.jump_on_a(|a| a.is_zero()),
            Opcode::JNZ => self.jump_on_a(|a| !a.is_zero()),
            Opcode::JP => self.jump_on_a(|a| a.is_positive()),
            Opcode::JN => self.jump_on_a(|a| a.is_negative()),
            Opcode::JPS => self.jump_and_shift(true),
            Opcode::JNS => self.jump_and_shift(false),
            Opcode::JGD => self.jump_greater_decrement(),
            Opcode::JO => self.jump_on_designator(super::DesignatorRegister::DB_OVERFLOW, true),
            Opcode::JNO => self.jump_on_designator(super::DesignatorRegister::DB_OVERFLOW, false),
            Opcode::JC => self.jump_on_designator(super::DesignatorRegister::DB_CARRY, true),
            Opcode::JNC => self.jump_on_designator(super::DesignatorRegister::DB_CARRY, false),
            Opcode::JDF => self.jump_on_designator(super::DesignatorRegister::DB_DIVIDE_CHECK, true),
            Opcode::JNDF => self.jump_on_designator(super::DesignatorRegister::DB_DIVIDE_CHECK, false),
            Opcode::NOP => self.no_operation(),
            Opcode::IAR => self.initiate_auto_recovery(),

            /* stack */
            Opcode::BUY => self.stack_buy(),
            Opcode::SELL => self.stack_sell(),

            /* bank manipulation */
            Opcode::LBU => self.load_base_user(),
            Opcode::LBE => self.load_base_exec(),
            Opcode::LBED => self.load_base_exec_direct(),
            Opcode::SBED => self.store_base_exec_direct(),
            Opcode::SBU => self.store_base_user(),
            Opcode::LBRX => self.load_base_indexed(),
            Opcode::LSBL => self.load_subset_limits(),
            Opcode::CALL => self.call_bank(true),
            Opcode::GOTO => self.call_bank(false),
            Opcode::RTN => self.return_from_call(),
            Opcode::LBJ => self.load_bank_and_jump(),
            Opcode::LIJ => self.load_instruction_bank_and_jump(),
            Opcode::LDJ => self.load_data_bank_and_jump(),

            /* activity control */
            Opcode::KCHG => self.key_change(),
            Opcode::SKQT => self.store_key_and_quantum(),
            Opcode::SPD => self.store_processor_designators(),
            Opcode::LPD => self.load_processor_designators(),
            Opcode::SPID => self.store_processor_id(),
            Opcode::SYSC => self.system_call(),
        }
    }
}
