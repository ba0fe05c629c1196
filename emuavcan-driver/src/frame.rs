//! Transport frame object
//!
//! A [`Frame`] is one CAN 2.0B data frame with a 29-bit extended identifier.
//! The identifier carries the transfer routing information ([`Header`]); the
//! data field carries up to 8 payload bytes. Remote and standard-id frames
//! are not part of the protocol and cannot be represented.

use emuavcan_core::{MessageTypeId, NodeId, Priority, ServiceKind, ServiceTypeId};

pub(crate) const PRIORITY_OFFSET: u32 = 24;
pub(crate) const SERVICE_FLAG: u32 = 1 << 7;
pub(crate) const SOURCE_MASK: u32 = 0x7f;

pub(crate) const MSG_TYPE_OFFSET: u32 = 8;
pub(crate) const MSG_TYPE_MASK: u32 = 0xffff;
const ANON_TYPE_MASK: u32 = 0x3;
const ANON_DISCRIMINATOR_OFFSET: u32 = 9;
const ANON_DISCRIMINATOR_MASK: u16 = 0x7ffe;

pub(crate) const SRV_TYPE_OFFSET: u32 = 16;
const SRV_TYPE_MASK: u32 = 0xff;
const SRV_REQUEST_FLAG: u32 = 1 << 15;
pub(crate) const SRV_DESTINATION_OFFSET: u32 = 8;

/// 29-bit extended CAN identifier
///
/// The raw value doubles as the transmit queue sort key: a numerically lower
/// identifier wins bus arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanId(u32);

impl CanId {
    pub const MASK: u32 = 0x1fff_ffff;

    pub const fn new(raw: u32) -> Option<Self> {
        if raw <= Self::MASK {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn from_u32_truncating(raw: u32) -> Self {
        Self(raw & Self::MASK)
    }

    pub const fn into_u32(self) -> u32 {
        self.0
    }

    pub fn message(priority: Priority, message_type: MessageTypeId, source: NodeId) -> Self {
        Self(
            (u32::from(u8::from(priority)) << PRIORITY_OFFSET)
                | (u32::from(u16::from(message_type)) << MSG_TYPE_OFFSET)
                | u32::from(u8::from(source)),
        )
    }

    /// Identifier of an anonymous message frame.
    ///
    /// Only the two least significant bits of the type id fit; the
    /// discriminator fills the freed bits to keep concurrent anonymous
    /// senders from colliding with identical identifiers.
    pub fn anonymous(priority: Priority, message_type: MessageTypeId, discriminator: u16) -> Self {
        Self(
            (u32::from(u8::from(priority)) << PRIORITY_OFFSET)
                | (u32::from(discriminator & ANON_DISCRIMINATOR_MASK) << ANON_DISCRIMINATOR_OFFSET)
                | ((u32::from(u16::from(message_type)) & ANON_TYPE_MASK) << MSG_TYPE_OFFSET),
        )
    }

    pub fn service(
        priority: Priority,
        service_type: ServiceTypeId,
        kind: ServiceKind,
        destination: NodeId,
        source: NodeId,
    ) -> Self {
        let request_flag = match kind {
            ServiceKind::Request => SRV_REQUEST_FLAG,
            ServiceKind::Response => 0,
        };
        Self(
            (u32::from(u8::from(priority)) << PRIORITY_OFFSET)
                | (u32::from(u8::from(service_type)) << SRV_TYPE_OFFSET)
                | request_flag
                | (u32::from(u8::from(destination)) << SRV_DESTINATION_OFFSET)
                | SERVICE_FLAG
                | u32::from(u8::from(source)),
        )
    }

    pub fn priority(self) -> Priority {
        Priority::from_u8_truncating((self.0 >> PRIORITY_OFFSET) as u8)
    }

    /// Decodes the routing header, or `None` for identifiers the protocol
    /// cannot produce (e.g. a service frame from an anonymous source).
    pub fn header(self) -> Option<Header> {
        let priority = self.priority();
        let source = NodeId::new((self.0 & SOURCE_MASK) as u8);

        if self.0 & SERVICE_FLAG == 0 {
            let raw_type = ((self.0 >> MSG_TYPE_OFFSET) & MSG_TYPE_MASK) as u16;
            // Anonymous frames carry a discriminator where the upper type id
            // bits would be; only the low two bits are meaningful.
            let message_type = match source {
                Some(_) => raw_type,
                None => raw_type & ANON_TYPE_MASK as u16,
            };
            Some(Header {
                priority,
                data_spec: DataSpecifier::Message(MessageTypeId::new(message_type)),
                source,
                destination: None,
            })
        } else {
            let source = source?;
            let destination = NodeId::new(((self.0 >> SRV_DESTINATION_OFFSET) & SOURCE_MASK) as u8)?;
            let service_type =
                ServiceTypeId::new(((self.0 >> SRV_TYPE_OFFSET) & SRV_TYPE_MASK) as u8);
            let data_spec = if self.0 & SRV_REQUEST_FLAG != 0 {
                DataSpecifier::Request(service_type)
            } else {
                DataSpecifier::Response(service_type)
            };
            Some(Header {
                priority,
                data_spec,
                source: Some(source),
                destination: Some(destination),
            })
        }
    }
}

impl From<CanId> for u32 {
    fn from(value: CanId) -> Self {
        value.into_u32()
    }
}

impl From<embedded_can::ExtendedId> for CanId {
    fn from(value: embedded_can::ExtendedId) -> Self {
        Self(value.as_raw())
    }
}

impl From<CanId> for embedded_can::ExtendedId {
    fn from(value: CanId) -> Self {
        // A CanId is always within the 29-bit range.
        embedded_can::ExtendedId::new(value.into_u32()).unwrap_or(embedded_can::ExtendedId::ZERO)
    }
}

/// Encodes the semantic properties of the data type carried by a transfer and its kind
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataSpecifier {
    Message(MessageTypeId),
    Request(ServiceTypeId),
    Response(ServiceTypeId),
}

/// Transfer routing data encoded in the CAN frame identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Header {
    pub priority: Priority,
    pub data_spec: DataSpecifier,
    /// `None` for anonymous senders.
    pub source: Option<NodeId>,
    /// `None` for message transfers.
    pub destination: Option<NodeId>,
}

impl Header {
    /// Whether two headers address the same logical conversation.
    ///
    /// Priority is excluded: it selects bus access order, not the session.
    pub fn same_descriptor(&self, other: &Header) -> bool {
        self.data_spec == other.data_spec
            && self.source == other.source
            && self.destination == other.destination
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidLength;

/// Data field of a classic CAN frame, up to 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Data {
    length: u8,
    bytes: [u8; 8],
}

impl Data {
    pub const MAX: usize = 8;

    /// Creates a new vector from a slice of compatible length.
    pub fn new(data: &[u8]) -> Result<Self, InvalidLength> {
        if data.len() > Self::MAX {
            return Err(InvalidLength);
        }
        let mut bytes = [0; Self::MAX];
        bytes[..data.len()].copy_from_slice(data);

        Ok(Self {
            length: data.len() as u8,
            bytes,
        })
    }

    pub fn new_zeros(length: usize) -> Result<Self, InvalidLength> {
        if length > Self::MAX {
            return Err(InvalidLength);
        }
        Ok(Self {
            length: length as u8,
            bytes: [0; Self::MAX],
        })
    }

    pub fn length(&self) -> usize {
        self.length as usize
    }
}

impl core::ops::Deref for Data {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes[..self.length as usize]
    }
}

impl core::ops::DerefMut for Data {
    fn deref_mut(&mut self) -> &mut Self::Target {
        let length = self.length as usize;
        &mut self.bytes[..length]
    }
}

/// One classic CAN data frame with an extended identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Frame {
    pub id: CanId,
    pub data: Data,
}

impl Frame {
    pub fn new(id: CanId, data: Data) -> Self {
        Self { id, data }
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<embedded_can::Id>, data: &[u8]) -> Option<Self> {
        match id.into() {
            embedded_can::Id::Extended(id) => Some(Frame {
                id: id.into(),
                data: Data::new(data).ok()?,
            }),
            // Standard identifiers cannot carry a transfer header.
            embedded_can::Id::Standard(_) => None,
        }
    }

    fn new_remote(_id: impl Into<embedded_can::Id>, _dlc: usize) -> Option<Self> {
        // Remote frames are not used by the protocol.
        None
    }

    fn is_extended(&self) -> bool {
        true
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> embedded_can::Id {
        embedded_can::Id::Extended(self.id.into())
    }

    fn dlc(&self) -> usize {
        self.data.length()
    }

    fn data(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_round_trip() {
        let id = CanId::message(
            Priority::MEDIUM,
            MessageTypeId::new(341),
            NodeId::new(42).unwrap(),
        );
        assert_eq!(id.into_u32(), (16 << 24) | (341 << 8) | 42);

        let header = id.header().unwrap();
        assert_eq!(header.priority, Priority::MEDIUM);
        assert_eq!(header.data_spec, DataSpecifier::Message(MessageTypeId::new(341)));
        assert_eq!(header.source, NodeId::new(42));
        assert_eq!(header.destination, None);
    }

    #[test]
    fn test_service_id_round_trip() {
        let id = CanId::service(
            Priority::LOW,
            ServiceTypeId::new(82),
            ServiceKind::Request,
            NodeId::new(7).unwrap(),
            NodeId::new(42).unwrap(),
        );
        assert_eq!(
            id.into_u32(),
            (24 << 24) | (82 << 16) | (1 << 15) | (7 << 8) | (1 << 7) | 42
        );

        let header = id.header().unwrap();
        assert_eq!(header.data_spec, DataSpecifier::Request(ServiceTypeId::new(82)));
        assert_eq!(header.source, NodeId::new(42));
        assert_eq!(header.destination, NodeId::new(7));
    }

    #[test]
    fn test_anonymous_id_masks_type() {
        let id = CanId::anonymous(Priority::LOWEST, MessageTypeId::new(2), 0x1234);
        let header = id.header().unwrap();
        assert_eq!(header.source, None);
        assert_eq!(header.data_spec, DataSpecifier::Message(MessageTypeId::new(2)));

        // The discriminator must not leak into the decoded type id.
        let noisy = CanId::anonymous(Priority::LOWEST, MessageTypeId::new(2), 0xffff);
        assert_eq!(
            noisy.header().unwrap().data_spec,
            DataSpecifier::Message(MessageTypeId::new(2))
        );
    }

    #[test]
    fn test_service_from_anonymous_is_malformed() {
        let raw = (1 << 7) | (5 << 16) | (7 << 8);
        assert!(CanId::new(raw).unwrap().header().is_none());
    }

    #[test]
    fn test_arbitration_order() {
        let high = CanId::message(
            Priority::HIGHEST,
            MessageTypeId::new(100),
            NodeId::new(1).unwrap(),
        );
        let low = CanId::message(
            Priority::LOWEST,
            MessageTypeId::new(100),
            NodeId::new(1).unwrap(),
        );
        assert!(high < low);
    }

    #[test]
    fn test_data_length() {
        assert!(Data::new(&[0; 9]).is_err());
        let data = Data::new(&[1, 2, 3]).unwrap();
        assert_eq!(&*data, &[1, 2, 3]);
    }
}
