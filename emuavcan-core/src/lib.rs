//! UAVCAN protocol core data types
//!
//! This crate provides basic data type definitions used by other Emuavcan crates.
//! Emuavcan stack users should not depend on this crate directly. Use `emuavcan::core`
//! reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Transfer priority
///
/// Priority is encoded in the most significant bits of the CAN ID, so a lower
/// numerical value wins bus arbitration and is transmitted first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Priority(u8);

impl Priority {
    const MAX_VALUE: u8 = 0x1f;

    pub const MIN: Priority = Priority::HIGHEST;
    pub const MAX: Priority = Priority::LOWEST;

    /// Reserved for messages that preempt everything else, e.g. emergency stop.
    pub const HIGHEST: Priority = Priority(0);
    pub const HIGH: Priority = Priority(8);
    /// Default for most periodic traffic.
    pub const MEDIUM: Priority = Priority(16);
    pub const LOW: Priority = Priority(24);
    /// Diagnostics and other traffic that tolerates unbounded delay.
    pub const LOWEST: Priority = Priority(0x1f);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Node address on the bus
///
/// Zero is the anonymous/broadcast address and is not a valid node id;
/// an unassigned local node is represented as `Option::<NodeId>::None`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeId(u8);

impl NodeId {
    const MIN_VALUE: u8 = 1;
    const MAX_VALUE: u8 = 0x7f;

    pub const MIN: NodeId = NodeId(Self::MIN_VALUE);
    pub const MAX: NodeId = NodeId(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN_VALUE && value <= Self::MAX_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<NodeId> for u8 {
    fn from(value: NodeId) -> Self {
        value.into_u8()
    }
}

impl From<NodeId> for usize {
    fn from(value: NodeId) -> Self {
        u8::from(value).into()
    }
}

impl TryFrom<u8> for NodeId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// Data type id of a message (broadcast) transfer
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MessageTypeId(u16);

impl MessageTypeId {
    /// Anonymous frames have no room for the full id; only the two least
    /// significant bits are carried on the wire.
    pub const ANONYMOUS_MAX: MessageTypeId = MessageTypeId(3);

    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    pub const fn into_u16(self) -> u16 {
        self.0
    }
}

impl From<u16> for MessageTypeId {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

impl From<MessageTypeId> for u16 {
    fn from(value: MessageTypeId) -> Self {
        value.into_u16()
    }
}

/// Data type id of a service (request/response) transfer
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceTypeId(u8);

impl ServiceTypeId {
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }
}

impl From<u8> for ServiceTypeId {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<ServiceTypeId> for u8 {
    fn from(value: ServiceTypeId) -> Self {
        value.into_u8()
    }
}

/// The kind of a service transfer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceKind {
    Request,
    Response,
}

/// Wrapping 5-bit counter distinguishing successive transfers on one descriptor
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferId(u8);

impl TransferId {
    const MAX_VALUE: u8 = 0x1f;
    const MODULO: u8 = Self::MAX_VALUE + 1;

    pub const MAX: TransferId = TransferId(Self::MAX_VALUE);

    pub const fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX_VALUE {
            Some(Self::from_u8_truncating(value))
        } else {
            None
        }
    }

    pub const fn from_u8_truncating(value: u8) -> Self {
        Self(value & Self::MAX_VALUE)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    pub const fn next(self) -> Self {
        Self((self.0 + 1) & Self::MAX_VALUE)
    }

    /// Number of increments needed to get from `self` to `to`, modulo 32.
    ///
    /// A distance of 0 means the ids are equal; a distance of 31 means `to`
    /// is the id immediately preceding `self`.
    pub const fn forward_distance(self, to: TransferId) -> u8 {
        to.0.wrapping_sub(self.0) & Self::MAX_VALUE
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self(0)
    }
}

impl From<TransferId> for u8 {
    fn from(value: TransferId) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for TransferId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

/// 64-bit signature of a data type definition
///
/// Both ends of a transfer must agree on the signature of the data type
/// carried on a descriptor; it seeds the transfer CRC, so a mismatch makes
/// reception fail the integrity check rather than deliver misinterpreted data.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataTypeSignature(u64);

impl DataTypeSignature {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn into_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for DataTypeSignature {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<DataTypeSignature> for u64 {
    fn from(value: DataTypeSignature) -> Self {
        value.into_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_range() {
        assert_eq!(Priority::new(31), Some(Priority::LOWEST));
        assert!(Priority::new(32).is_none());
        assert_eq!(Priority::from_u8_truncating(33).into_u8(), 1);
        assert!(Priority::HIGHEST < Priority::MEDIUM);
    }

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::new(0).is_none());
        assert_eq!(NodeId::new(1), Some(NodeId::MIN));
        assert_eq!(NodeId::new(127), Some(NodeId::MAX));
        assert!(NodeId::new(128).is_none());
    }

    #[test]
    fn test_transfer_id_wrap() {
        let id = TransferId::MAX;
        assert_eq!(id.next().into_u8(), 0);
        assert_eq!(TransferId::default().next().into_u8(), 1);
    }

    #[test]
    fn test_transfer_id_forward_distance() {
        let five = TransferId::new(5).unwrap();
        let six = TransferId::new(6).unwrap();
        assert_eq!(five.forward_distance(five), 0);
        assert_eq!(five.forward_distance(six), 1);
        assert_eq!(six.forward_distance(five), 31);
        assert_eq!(TransferId::MAX.forward_distance(TransferId::default()), 1);
    }
}
