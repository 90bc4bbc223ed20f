//! Bank descriptors and base registers.

use komodo_types::{AbsoluteAddress, AccessInfo, AccessPermissions, Word36};

use crate::error::MspError;
use crate::slice::ArraySlice;

/// Bank descriptor type codes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum BankType {
    #[default]
    Basic,
    Extended,
    Gate,
    Indirect,
    Queue,
}

impl BankType {
    pub const fn code(self) -> u64 {
        match self {
            Self::Basic => 0,
            Self::Extended => 1,
            Self::Gate => 2,
            Self::Indirect => 3,
            Self::Queue => 4,
        }
    }

    pub const fn from_code(code: u64) -> Self {
        match code {
            1 => Self::Extended,
            2 => Self::Gate,
            3 => Self::Indirect,
            4 => Self::Queue,
            _ => Self::Basic,
        }
    }
}

/// An eight-word bank descriptor as it sits in a bank descriptor table.
///
/// Word 0 carries the type (Q1), general and special permissions (Q2, Q3)
/// and the flag bits (Q4: large, general-fault, upper-limit-suppression,
/// void). Word 1 H2 is the access lock; words 2 and 3 are the normalized
/// limits; words 4 and 5 are the base absolute address.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BankDescriptor {
    pub bank_type: BankType,
    pub general_permissions: AccessPermissions,
    pub special_permissions: AccessPermissions,
    pub large: bool,
    pub general_fault: bool,
    pub upper_limit_suppression: bool,
    pub void: bool,
    pub access_lock: AccessInfo,
    pub lower_limit: u64,
    pub upper_limit: u64,
    pub base: AbsoluteAddress,
}

impl BankDescriptor {
    const FLAG_LARGE: u64 = 0o1;
    const FLAG_GENERAL_FAULT: u64 = 0o2;
    const FLAG_ULS: u64 = 0o4;
    const FLAG_VOID: u64 = 0o10;

    /// True when the descriptor names an addressable storage range.
    pub const fn is_addressable(&self) -> bool {
        !self.void && self.base.upi != 0
    }

    /// Words of storage the bank spans.
    pub const fn extent(&self) -> u64 {
        if self.void || self.upper_limit + 1 < self.lower_limit {
            0
        } else {
            self.upper_limit + 1 - self.lower_limit
        }
    }

    pub fn to_words(&self) -> [Word36; 8] {
        let mut flags = 0;
        if self.large {
            flags |= Self::FLAG_LARGE;
        }
        if self.general_fault {
            flags |= Self::FLAG_GENERAL_FAULT;
        }
        if self.upper_limit_suppression {
            flags |= Self::FLAG_ULS;
        }
        if self.void {
            flags |= Self::FLAG_VOID;
        }

        let base = self.base.to_words();
        [
            Word36::ZERO
                .set_q1(self.bank_type.code())
                .set_q2(self.general_permissions.to_octal())
                .set_q3(self.special_permissions.to_octal())
                .set_q4(flags),
            Word36::ZERO.set_h2(self.access_lock.to_key()),
            Word36::new(self.lower_limit),
            Word36::new(self.upper_limit),
            base[0],
            base[1],
            Word36::ZERO,
            Word36::ZERO,
        ]
    }

    pub fn from_words(words: [Word36; 8]) -> Self {
        let flags = words[0].q4();
        BankDescriptor {
            bank_type: BankType::from_code(words[0].q1()),
            general_permissions: AccessPermissions::from_octal(words[0].q2()),
            special_permissions: AccessPermissions::from_octal(words[0].q3()),
            large: flags & Self::FLAG_LARGE != 0,
            general_fault: flags & Self::FLAG_GENERAL_FAULT != 0,
            upper_limit_suppression: flags & Self::FLAG_ULS != 0,
            void: flags & Self::FLAG_VOID != 0,
            access_lock: AccessInfo::from_key(words[1].h2()),
            lower_limit: words[2].bits(),
            upper_limit: words[3].bits(),
            base: AbsoluteAddress::from_words([words[4], words[5]]),
        }
    }

    /// The permissions `key` earns against this bank.
    pub fn effective_permissions(&self, key: &AccessInfo) -> AccessPermissions {
        if key.master_of(&self.access_lock) {
            self.special_permissions
        } else {
            self.general_permissions
        }
    }
}

/// An in-processor expansion of a bank descriptor plus its storage view.
#[derive(Debug, Default, Clone)]
pub struct BaseRegister {
    pub void: bool,
    pub large: bool,
    pub access_lock: AccessInfo,
    pub general_permissions: AccessPermissions,
    pub special_permissions: AccessPermissions,
    /// Normalized addressing limits; a relative address is legal when
    /// `lower_limit <= ra <= upper_limit`.
    pub lower_limit: u64,
    pub upper_limit: u64,
    pub base: AbsoluteAddress,
    /// Window over exactly the bank's storage range.
    pub storage: Option<ArraySlice>,
}

impl BaseRegister {
    /// A base register describing no storage.
    pub fn voided() -> Self {
        BaseRegister {
            void: true,
            ..Default::default()
        }
    }

    /// Expand a descriptor over its storage view.
    pub fn from_descriptor(descriptor: &BankDescriptor, storage: Option<ArraySlice>) -> Self {
        BaseRegister {
            void: descriptor.void || descriptor.extent() == 0,
            large: descriptor.large,
            access_lock: descriptor.access_lock,
            general_permissions: descriptor.general_permissions,
            special_permissions: descriptor.special_permissions,
            lower_limit: descriptor.lower_limit,
            upper_limit: descriptor.upper_limit,
            base: descriptor.base,
            storage,
        }
    }

    pub fn contains(&self, relative_address: u64) -> bool {
        !self.void && relative_address >= self.lower_limit && relative_address <= self.upper_limit
    }

    /// The permissions `key` earns against this bank.
    pub fn effective_permissions(&self, key: &AccessInfo) -> AccessPermissions {
        if key.master_of(&self.access_lock) {
            self.special_permissions
        } else {
            self.general_permissions
        }
    }

    fn storage_offset(&self, relative_address: u64) -> Result<u64, MspError> {
        relative_address
            .checked_sub(self.lower_limit)
            .ok_or(MspError::BoundsViolation {
                segment: 0,
                offset: relative_address,
                length: 0,
            })
    }

    /// Read the word at a relative address within the bank.
    pub fn read(&self, relative_address: u64) -> Result<Word36, MspError> {
        let offset = self.storage_offset(relative_address)?;
        match &self.storage {
            Some(storage) => storage.get(offset),
            None => Err(MspError::BoundsViolation {
                segment: 0,
                offset: relative_address,
                length: 0,
            }),
        }
    }

    /// Write the word at a relative address within the bank.
    pub fn write(&self, relative_address: u64, value: Word36) -> Result<(), MspError> {
        let offset = self.storage_offset(relative_address)?;
        match &self.storage {
            Some(storage) => storage.set(offset, value),
            None => Err(MspError::BoundsViolation {
                segment: 0,
                offset: relative_address,
                length: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> BankDescriptor {
        BankDescriptor {
            bank_type: BankType::Extended,
            general_permissions: AccessPermissions::from_octal(0o2),
            special_permissions: AccessPermissions::ALL,
            large: false,
            general_fault: false,
            upper_limit_suppression: false,
            void: false,
            access_lock: AccessInfo::new(2, 0o100),
            lower_limit: 0o1000,
            upper_limit: 0o1777,
            base: AbsoluteAddress::new(1, 0, 0o200),
        }
    }

    #[test]
    fn descriptor_words_round_trip() {
        let bd = descriptor();
        assert_eq!(BankDescriptor::from_words(bd.to_words()), bd);
    }

    #[test]
    fn extent_and_void() {
        let mut bd = descriptor();
        assert_eq!(bd.extent(), 0o1000);
        bd.void = true;
        assert_eq!(bd.extent(), 0);

        let empty = BankDescriptor {
            lower_limit: 0o100,
            upper_limit: 0o77,
            void: false,
            ..descriptor()
        };
        assert_eq!(empty.extent(), 0);
    }

    #[test]
    fn ring_selects_permission_set() {
        let bd = descriptor();
        let master = AccessInfo::new(0, 0);
        let outsider = AccessInfo::new(3, 0o200);
        assert_eq!(bd.effective_permissions(&master), AccessPermissions::ALL);
        assert_eq!(bd.effective_permissions(&outsider), AccessPermissions::from_octal(0o2));
    }

    #[test]
    fn base_register_limits() {
        let register = BaseRegister::from_descriptor(&descriptor(), None);
        assert!(register.contains(0o1000));
        assert!(register.contains(0o1777));
        assert!(!register.contains(0o777));
        assert!(!register.contains(0o2000));
        assert!(!BaseRegister::voided().contains(0));
    }
}
