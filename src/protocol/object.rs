//! Typed binary objects and their type descriptors.
//!
//! Routing and payload objects are binary attachments on a frame, each
//! tagged with an [`ObjectType`]. A type descriptor has an octet form
//! (four dotted bytes), a numeric form, or both:
//!
//! ```text
//! 1.0.1.2:      octet only
//! :64           number only (0-99, reserved short-form range)
//! 0.0.0.64:64   both (big-endian octet value must equal the number)
//! ```
//!
//! # Example
//!
//! ```
//! use bosswave_client::protocol::ObjectType;
//!
//! let ty: ObjectType = "1.0.1.2:".parse().unwrap();
//! assert_eq!(ty.to_string(), "1.0.1.2:");
//! assert_eq!(ty.octet(), Some([1, 0, 1, 2]));
//! ```

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::error::{BosswaveError, Result};

/// Type descriptor for a routing or payload object.
///
/// At least one of the octet and numeric forms is always present. When both
/// are present, the big-endian 32-bit integer formed from the four octet
/// bytes equals the number; this is enforced at construction and never
/// silently corrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectType {
    octet: Option<[u8; 4]>,
    number: Option<u32>,
}

impl ObjectType {
    /// Create a type from its octet form.
    pub fn from_octet(octet: [u8; 4]) -> Self {
        Self {
            octet: Some(octet),
            number: None,
        }
    }

    /// Create a type from its bare numeric form.
    ///
    /// Bare numbers are restricted to the reserved short-form range 0-99.
    pub fn from_number(number: u32) -> Result<Self> {
        if number > 99 {
            return Err(BosswaveError::Format(format!(
                "bare object type number out of range: {}",
                number
            )));
        }
        Ok(Self {
            octet: None,
            number: Some(number),
        })
    }

    /// Create a type carrying both forms.
    ///
    /// Fails if the big-endian integer value of `octet` disagrees with
    /// `number`.
    pub fn new(octet: [u8; 4], number: u32) -> Result<Self> {
        if u32::from_be_bytes(octet) != number {
            return Err(BosswaveError::Format(format!(
                "object type octet {}.{}.{}.{} disagrees with number {}",
                octet[0], octet[1], octet[2], octet[3], number
            )));
        }
        Ok(Self {
            octet: Some(octet),
            number: Some(number),
        })
    }

    /// The octet form, if present.
    pub fn octet(&self) -> Option<[u8; 4]> {
        self.octet
    }

    /// The numeric form, if present.
    pub fn number(&self) -> Option<u32> {
        self.number
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.octet, self.number) {
            (Some(o), Some(n)) => write!(f, "{}.{}.{}.{}:{}", o[0], o[1], o[2], o[3], n),
            (Some(o), None) => write!(f, "{}.{}.{}.{}:", o[0], o[1], o[2], o[3]),
            (None, Some(n)) => write!(f, ":{}", n),
            // Constructors guarantee at least one form.
            (None, None) => unreachable!("object type with neither form"),
        }
    }
}

fn parse_octet(s: &str) -> Result<[u8; 4]> {
    let tokens: Vec<&str> = s.split('.').collect();
    if tokens.len() != 4 {
        return Err(BosswaveError::Format(format!(
            "object type octet must have four components: {:?}",
            s
        )));
    }
    let mut octet = [0u8; 4];
    for (i, token) in tokens.iter().enumerate() {
        octet[i] = token.parse::<u8>().map_err(|_| {
            BosswaveError::Format(format!("invalid octet component: {:?}", token))
        })?;
    }
    Ok(octet)
}

impl FromStr for ObjectType {
    type Err = BosswaveError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(num) = s.strip_prefix(':') {
            let number = num.parse::<u32>().map_err(|_| {
                BosswaveError::Format(format!("invalid object type number: {:?}", num))
            })?;
            Self::from_number(number)
        } else if let Some(oct) = s.strip_suffix(':') {
            Ok(Self::from_octet(parse_octet(oct)?))
        } else {
            let (oct, num) = s.split_once(':').ok_or_else(|| {
                BosswaveError::Format(format!("malformed object type: {:?}", s))
            })?;
            let octet = parse_octet(oct)?;
            let number = num.parse::<u32>().map_err(|_| {
                BosswaveError::Format(format!("invalid object type number: {:?}", num))
            })?;
            Self::new(octet, number)
        }
    }
}

/// Protocol-level routing/authorization attachment on a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingObject {
    object_type: ObjectType,
    content: Bytes,
}

impl RoutingObject {
    /// Create a routing object from a type and content bytes.
    pub fn new(object_type: ObjectType, content: impl Into<Bytes>) -> Self {
        Self {
            object_type,
            content: content.into(),
        }
    }

    /// The type descriptor.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// The content bytes.
    pub fn content(&self) -> &Bytes {
        &self.content
    }
}

/// Application content attachment on a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadObject {
    object_type: ObjectType,
    content: Bytes,
}

impl PayloadObject {
    /// Create a payload object from a type and content bytes.
    pub fn new(object_type: ObjectType, content: impl Into<Bytes>) -> Self {
        Self {
            object_type,
            content: content.into(),
        }
    }

    /// The type descriptor.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// The content bytes.
    pub fn content(&self) -> &Bytes {
        &self.content
    }
}
