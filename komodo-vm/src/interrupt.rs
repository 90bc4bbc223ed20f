//! Machine interrupt classes and payloads.
//!
//! Every architectural fault or asynchronous event an instruction processor
//! can observe is one of these classes. The class number is also the
//! priority (lower is more urgent) and the index into the 64-word interrupt
//! vector at the head of the level-0 bank descriptor table bank.

use komodo_types::Word36;

/// Architectural interrupt classes.
///
/// Classes 0..=7 are hardware-fatal: the processor halts rather than
/// dispatching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter, strum::Display)]
#[repr(u8)]
pub enum InterruptClass {
    HardwareCheck = 0o0,
    DiagnosticInterconnect = 0o1,
    ReferenceViolation = 0o10,
    AddressingException = 0o11,
    TerminalAddressingException = 0o12,
    RcsGenericStackUnderflowOverflow = 0o13,
    Signal = 0o14,
    TestAndSet = 0o15,
    InvalidInstruction = 0o16,
    PageException = 0o17,
    ArithmeticException = 0o20,
    DataException = 0o21,
    OperationTrap = 0o22,
    Breakpoint = 0o23,
    QuantumTimer = 0o24,
    SoftwareBreak = 0o25,
    JumpHistoryFull = 0o26,
    Dayclock = 0o30,
    InitialProgramLoad = 0o31,
    UpiInitial = 0o32,
    UpiNormal = 0o33,
}

/// Fault/non-fault categorization of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCategory {
    Fault,
    NonFault,
    Reserved,
}

/// Whether the event is tied to the executing instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSynchrony {
    Synchronous,
    Asynchronous,
}

/// Where the interrupt may be honored relative to the instruction cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptPoint {
    BetweenInstructions,
    MidExecution,
}

impl InterruptClass {
    /// The class number; doubles as priority and vector index.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Classes 0..=7 stop the processor instead of vectoring.
    pub const fn is_hardware_fatal(self) -> bool {
        (self as u8) < 0o10
    }

    pub const fn category(self) -> InterruptCategory {
        match self {
            Self::HardwareCheck | Self::DiagnosticInterconnect => InterruptCategory::Reserved,
            Self::ReferenceViolation
            | Self::AddressingException
            | Self::TerminalAddressingException
            | Self::RcsGenericStackUnderflowOverflow
            | Self::InvalidInstruction
            | Self::PageException
            | Self::ArithmeticException
            | Self::DataException
            | Self::OperationTrap => InterruptCategory::Fault,
            _ => InterruptCategory::NonFault,
        }
    }

    pub const fn synchrony(self) -> InterruptSynchrony {
        match self {
            Self::Dayclock | Self::QuantumTimer | Self::InitialProgramLoad | Self::UpiInitial | Self::UpiNormal => {
                InterruptSynchrony::Asynchronous
            }
            _ => InterruptSynchrony::Synchronous,
        }
    }

    /// Deferrable classes are held while DR.deferrable-interrupt-enabled is
    /// clear.
    pub const fn is_deferrable(self) -> bool {
        matches!(
            self,
            Self::QuantumTimer | Self::Dayclock | Self::SoftwareBreak | Self::JumpHistoryFull | Self::UpiNormal
        )
    }

    pub const fn point(self) -> InterruptPoint {
        match self {
            Self::HardwareCheck | Self::DiagnosticInterconnect => InterruptPoint::MidExecution,
            _ => InterruptPoint::BetweenInstructions,
        }
    }
}

/// A raised interrupt waiting on an instruction processor's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineInterrupt {
    class: InterruptClass,
    /// Short status qualifying the class, stored into IKR.SSF at entry.
    short_status: u8,
    status_word_0: Word36,
    status_word_1: Word36,
}

impl MachineInterrupt {
    pub const fn new(class: InterruptClass, short_status: u8, status_word_0: Word36, status_word_1: Word36) -> Self {
        MachineInterrupt {
            class,
            short_status,
            status_word_0,
            status_word_1,
        }
    }

    /// An interrupt with no status payload.
    pub const fn of_class(class: InterruptClass) -> Self {
        Self::new(class, 0, Word36::ZERO, Word36::ZERO)
    }

    pub const fn class(&self) -> InterruptClass {
        self.class
    }

    pub const fn short_status(&self) -> u8 {
        self.short_status
    }

    pub const fn status_word_0(&self) -> Word36 {
        self.status_word_0
    }

    pub const fn status_word_1(&self) -> Word36 {
        self.status_word_1
    }
}

impl PartialOrd for MachineInterrupt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MachineInterrupt {
    /// Queue order: lower class number first.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.class
            .code()
            .cmp(&other.class.code())
            .then(self.short_status.cmp(&other.short_status))
            .then(self.status_word_0.bits().cmp(&other.status_word_0.bits()))
            .then(self.status_word_1.bits().cmp(&other.status_word_1.bits()))
    }
}

/// Short-status values for [`InterruptClass::RcsGenericStackUnderflowOverflow`].
pub mod stack_status {
    pub const OVERFLOW: u8 = 0;
    pub const UNDERFLOW: u8 = 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn class_codes_are_unique_and_bounded() {
        let codes: Vec<u8> = InterruptClass::iter().map(InterruptClass::code).collect();
        let mut deduped = codes.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(codes.len(), deduped.len());
        assert!(codes.iter().all(|c| *c <= 0o37));
    }

    #[test]
    fn stack_fault_class_code() {
        assert_eq!(InterruptClass::RcsGenericStackUnderflowOverflow.code(), 0o13);
    }

    #[test]
    fn priority_ordering_is_by_class() {
        let timer = MachineInterrupt::of_class(InterruptClass::QuantumTimer);
        let fault = MachineInterrupt::of_class(InterruptClass::ReferenceViolation);
        assert!(fault < timer);
    }
}
