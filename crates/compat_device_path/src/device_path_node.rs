//! Device path node header, the node trait, and the macro used to declare typed nodes.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use alloc::boxed::Box;
use core::fmt::{self, Debug, Display};

use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Endian, Pread, Pwrite, LE,
};

use crate::nodes::{self, node_type, sub_type};

/// The four byte header every node starts with: type, subtype, and a little endian length covering the header.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Header {
    pub r#type: u8,
    pub sub_type: u8,
    /// Whole node length, header included.
    pub length: usize,
}

impl Header {
    /// Encoded size of a header.
    pub const SIZE: usize = 4;

    /// A header for a node of `length` bytes, header included.
    pub const fn new(r#type: u8, sub_type: u8, length: usize) -> Self {
        Self { r#type, sub_type, length }
    }

    /// True for both end node kinds.
    pub fn is_end(&self) -> bool {
        self.r#type == node_type::END
    }

    /// True for the node that terminates the whole path.
    pub fn is_end_entire(&self) -> bool {
        self.is_end() && self.sub_type == sub_type::END_ENTIRE
    }

    /// True for the node separating two instances.
    pub fn is_end_instance(&self) -> bool {
        self.is_end() && self.sub_type == sub_type::END_INSTANCE
    }

    /// Length of the payload following the header.
    pub fn payload_len(&self) -> usize {
        self.length.saturating_sub(Self::SIZE)
    }
}

impl TryIntoCtx<Endian> for Header {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let length = u16::try_from(self.length).map_err(|_| scroll::Error::TooBig { size: self.length, len: 0xFFFF })?;
        let mut offset = 0;
        dest.gwrite_with([self.r#type, self.sub_type].as_slice(), &mut offset, ())?;
        dest.gwrite_with(length, &mut offset, ctx)?;
        Ok(offset)
    }
}

impl TryFromCtx<'_, Endian> for Header {
    type Error = scroll::Error;

    fn try_from_ctx(from: &[u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let r#type = from.gread_with::<u8>(&mut offset, ctx)?;
        let sub_type = from.gread_with::<u8>(&mut offset, ctx)?;
        let length = from.gread_with::<u16>(&mut offset, ctx)?;
        Ok((Self::new(r#type, sub_type, length as usize), offset))
    }
}

/// A node that can be written into a device path.
pub trait DevicePathNode: Debug + Display {
    fn header(&self) -> Header;

    /// Whether a node with this type and subtype decodes as `Self`.
    fn is_type(r#type: u8, sub_type: u8) -> bool
    where
        Self: Sized;

    /// Writes header and payload into `buffer`, returning the bytes written.
    fn write_into(self, buffer: &mut [u8]) -> Result<usize, scroll::Error>;
}

/// Writes `node` as a header followed by its scroll encoded payload.
///
/// Fails with [`scroll::Error::TooBig`] when `buffer` cannot hold the whole node.
pub fn write_node<T>(node: T, buffer: &mut [u8]) -> Result<usize, scroll::Error>
where
    T: DevicePathNode + TryIntoCtx<Endian, Error = scroll::Error>,
{
    let header = node.header();
    if buffer.len() < header.length {
        return Err(scroll::Error::TooBig { size: header.length, len: buffer.len() });
    }
    let mut offset = buffer.pwrite_with(header, 0, LE)?;
    offset += buffer[offset..header.length].pwrite_with(node, 0, LE)?;
    Ok(offset)
}

/// A node that has not been cast to a more specific type, or whose type is not modeled here.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnknownDevicePathNode<'a> {
    pub header: Header,
    /// Payload following the header.
    pub data: &'a [u8],
}

impl<'a> UnknownDevicePathNode<'a> {
    /// The typed node matching the header, or `self` when none matches.
    pub fn cast_to_dyn_device_path_node(self) -> Box<dyn DevicePathNode + 'a> {
        nodes::cast_to_dyn_device_path_node(self)
    }

    /// Parses the payload as the typed node `T`, if the header matches.
    pub fn cast<T>(&self) -> Option<T>
    where
        T: DevicePathNode + TryFromCtx<'a, Endian, Error = scroll::Error>,
    {
        if !T::is_type(self.header.r#type, self.header.sub_type) {
            return None;
        }
        self.data.pread_with::<T>(0, LE).ok()
    }
}

impl DevicePathNode for UnknownDevicePathNode<'_> {
    fn header(&self) -> Header {
        self.header
    }

    fn is_type(_type: u8, _sub_type: u8) -> bool {
        true
    }

    fn write_into(self, buffer: &mut [u8]) -> Result<usize, scroll::Error> {
        buffer.pwrite_with(self, 0, LE)
    }
}

impl TryIntoCtx<Endian> for UnknownDevicePathNode<'_> {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = dest.pwrite_with(self.header, 0, ctx)?;
        dest.gwrite_with(self.data, &mut offset, ())?;
        Ok(offset)
    }
}

impl<'a> TryFromCtx<'a, Endian> for UnknownDevicePathNode<'a> {
    type Error = scroll::Error;

    fn try_from_ctx(from: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let header = from.pread_with::<Header>(0, ctx)?;
        if header.length < Header::SIZE {
            return Err(scroll::Error::BadInput { size: header.length, msg: "device path node shorter than its header" });
        }
        let data = from
            .get(Header::SIZE..header.length)
            .ok_or(scroll::Error::TooBig { size: header.length, len: from.len() })?;
        Ok((Self { header, data }, header.length))
    }
}

impl Display for UnknownDevicePathNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({}, {},", self.header.r#type, self.header.sub_type)?;
        self.data.iter().try_for_each(|byte| write!(f, " {byte:02X}"))?;
        f.write_str(")")
    }
}

/// Declares a fixed size node.
///
/// ```ignore
/// device_path_node! {
///     #[derive(Debug, Clone, Copy, Pread, Pwrite)]
///     pub struct Controller(node_type::HARDWARE, sub_type::HW_CONTROLLER) {
///         pub number: u32,
///     }
/// }
/// ```
///
/// The node length is the header size plus the sum of the field sizes, so every field must encode to exactly
/// `size_of` bytes. Unit structs encode as a bare header. The struct provides its own `Display`.
#[macro_export]
macro_rules! device_path_node {
    (@node $name:ident, $node_type:expr, $sub_type:expr, $payload_size:expr) => {
        impl $crate::device_path_node::DevicePathNode for $name {
            fn header(&self) -> $crate::device_path_node::Header {
                $crate::device_path_node::Header::new(
                    $node_type,
                    $sub_type,
                    $crate::device_path_node::Header::SIZE + ($payload_size),
                )
            }

            fn is_type(r#type: u8, sub_type: u8) -> bool {
                (r#type, sub_type) == ($node_type, $sub_type)
            }

            fn write_into(self, buffer: &mut [u8]) -> Result<usize, $crate::scroll::Error> {
                $crate::device_path_node::write_node(self, buffer)
            }
        }
    };
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident($node_type:expr, $sub_type:expr) {
            $(
                $(#[$field_attr:meta])*
                $field_vis:vis $field:ident: $field_type:ty
            ),* $(,)?
        }
    ) => {
        $(#[$attr])*
        $vis struct $name {
            $(
                $(#[$field_attr])*
                $field_vis $field: $field_type,
            )*
        }

        $crate::device_path_node!(@node $name, $node_type, $sub_type, 0 $(+ core::mem::size_of::<$field_type>())*);
    };
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident($node_type:expr, $sub_type:expr);
    ) => {
        $(#[$attr])*
        $vis struct $name;

        $crate::device_path_node!(@node $name, $node_type, $sub_type, 0);

        impl $crate::scroll::ctx::TryIntoCtx<$crate::scroll::Endian> for $name {
            type Error = $crate::scroll::Error;

            fn try_into_ctx(self, _: &mut [u8], _: $crate::scroll::Endian) -> Result<usize, Self::Error> {
                Ok(0)
            }
        }

        impl $crate::scroll::ctx::TryFromCtx<'_, $crate::scroll::Endian> for $name {
            type Error = $crate::scroll::Error;

            fn try_from_ctx(_: &[u8], _: $crate::scroll::Endian) -> Result<(Self, usize), Self::Error> {
                Ok((Self, 0))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_little_endian() {
        let mut buffer = [0u8; 4];
        buffer.pwrite_with(Header::new(0x04, 0x06, 0x0114), 0, LE).unwrap();
        assert_eq!(buffer, [0x04, 0x06, 0x14, 0x01]);
        assert_eq!(buffer.pread_with::<Header>(0, LE).unwrap(), Header::new(0x04, 0x06, 0x0114));
        assert_eq!(Header::new(0x04, 0x06, 0x0114).payload_len(), 0x0110);
    }

    #[test]
    fn oversized_header_length_is_rejected() {
        let mut buffer = [0u8; 4];
        assert!(buffer.pwrite_with(Header::new(0x04, 0x04, 0x1_0000), 0, LE).is_err());
    }

    #[test]
    fn unknown_node_rejects_bad_lengths() {
        let short = [0x01, 0x01, 0x02, 0x00];
        assert!(short.pread_with::<UnknownDevicePathNode>(0, LE).is_err());

        let overlong = [0x01, 0x01, 0x08, 0x00, 0x00, 0x00];
        assert!(overlong.pread_with::<UnknownDevicePathNode>(0, LE).is_err());

        let exact = [0x01, 0x01, 0x06, 0x00, 0x02, 0x1C, 0xFF];
        let node = exact.pread_with::<UnknownDevicePathNode>(0, LE).unwrap();
        assert_eq!(node.data, &[0x02, 0x1C]);

        let mut copy = [0u8; 6];
        assert_eq!(node.write_into(&mut copy).unwrap(), 6);
        assert_eq!(copy, exact[..6]);
    }

    #[test]
    fn end_headers_are_classified() {
        assert!(Header::new(0x7F, 0xFF, 4).is_end_entire());
        assert!(Header::new(0x7F, 0x01, 4).is_end_instance());
        assert!(!Header::new(0x7F, 0x01, 4).is_end_entire());
        assert!(!Header::new(0x01, 0xFF, 4).is_end());
    }
}
