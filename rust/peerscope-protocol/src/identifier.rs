//! Context handles and the domain identifiers carried by RPC arguments.
//!
//! [`PeerId`], [`Multiaddr`] and [`Cid`] serialize as their canonical text
//! form inside structured payloads, and as tagged binary extensions when they
//! travel as standalone RPC values (see [`ValueCodec`]). Deserialization
//! accepts both shapes.

use std::{fmt, marker::PhantomData, str::FromStr};

use base58::{FromBase58, ToBase58};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

use crate::{CodecError, ValueCodec};

/// Opaque handle naming one inspected page instance ("tab").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(u32);

impl ContextId {
    /// Wrap a host-provided context number.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw host-provided number.
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ContextId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

const IDENTITY: u8 = 0x00;
const SHA2_256: u8 = 0x12;
const SHA2_256_LENGTH: usize = 32;

/// A libp2p peer identifier: a multihash of the peer's public key.
///
/// Only identity (inline public key) and sha2-256 multihashes are accepted;
/// those are the only two forms libp2p produces.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    /// Validate raw multihash bytes as a peer id.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let invalid = |reason: &str| CodecError::InvalidIdentifier {
            kind: "PeerId",
            reason: reason.to_string(),
        };

        let [code, length, digest @ ..] = bytes else {
            return Err(invalid("multihash is truncated"));
        };

        // Lengths above 127 would need a multi-byte varint; no key is that long.
        if *length as usize != digest.len() || digest.is_empty() || *length >= 0x80 {
            return Err(invalid("multihash length does not match digest"));
        }

        match *code {
            IDENTITY => Ok(Self(bytes.to_vec())),
            SHA2_256 if digest.len() == SHA2_256_LENGTH => Ok(Self(bytes.to_vec())),
            SHA2_256 => Err(invalid("sha2-256 digest must be 32 bytes")),
            other => Err(invalid(&format!("unsupported multihash code 0x{other:02x}"))),
        }
    }

    /// The raw multihash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for PeerId {
    type Err = CodecError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CodecError::Empty("PeerId"));
        }
        let bytes = text
            .from_base58()
            .map_err(|error| CodecError::InvalidIdentifier {
                kind: "PeerId",
                reason: format!("{error:?}"),
            })?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl ValueCodec for PeerId {
    const TAG: &'static str = "PeerId";

    fn encode(&self) -> Vec<u8> {
        self.0.clone()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_bytes(bytes)
    }
}

/// A self-describing network address such as `/ip4/127.0.0.1/tcp/4001`.
///
/// Kept in its text form; the inspector never interprets transports beyond
/// extracting the trailing `/p2p/` peer id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multiaddr(String);

impl Multiaddr {
    /// The canonical text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Protocol / value components, in order.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').skip(1)
    }

    /// The peer id named by a `/p2p/` (or legacy `/ipfs/`) component, if any.
    pub fn peer_id(&self) -> Option<PeerId> {
        let mut components = self.components();
        while let Some(protocol) = components.next() {
            if protocol == "p2p" || protocol == "ipfs" {
                return components.next().and_then(|id| id.parse().ok());
            }
        }
        None
    }
}

impl FromStr for Multiaddr {
    type Err = CodecError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CodecError::Empty("Multiaddr"));
        }
        let invalid = |reason: &str| CodecError::InvalidIdentifier {
            kind: "Multiaddr",
            reason: reason.to_string(),
        };
        let Some(rest) = text.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };
        if rest.split('/').any(str::is_empty) {
            return Err(invalid("contains an empty component"));
        }
        Ok(Self(text.to_string()))
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueCodec for Multiaddr {
    const TAG: &'static str = "Multiaddr";

    fn encode(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        std::str::from_utf8(bytes)
            .map_err(|error| CodecError::InvalidIdentifier {
                kind: "Multiaddr",
                reason: error.to_string(),
            })?
            .parse()
    }
}

/// Multibase prefixes a CIDv1 may start with.
const MULTIBASE_PREFIXES: &[char] = &['b', 'B', 'c', 'C', 'f', 'F', 'k', 'K', 'm', 'M', 'u', 'U', 'z'];

/// A content identifier in its text form (CIDv0 `Qm...` or multibase CIDv1).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(String);

impl Cid {
    /// The canonical text form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Cid {
    type Err = CodecError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CodecError::Empty("CID"));
        }
        let invalid = |reason: String| CodecError::InvalidIdentifier { kind: "CID", reason };

        if text.starts_with("Qm") {
            let bytes = text
                .from_base58()
                .map_err(|error| invalid(format!("{error:?}")))?;
            return match bytes.as_slice() {
                [SHA2_256, 0x20, digest @ ..] if digest.len() == SHA2_256_LENGTH => {
                    Ok(Self(text.to_string()))
                }
                _ => Err(invalid("CIDv0 must be a sha2-256 multihash".into())),
            };
        }

        let mut chars = text.chars();
        match chars.next() {
            Some(prefix) if MULTIBASE_PREFIXES.contains(&prefix) && text.len() > 8 => {
                if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+' | '/' | '=')) {
                    Ok(Self(text.to_string()))
                } else {
                    Err(invalid("contains characters outside its multibase alphabet".into()))
                }
            }
            _ => Err(invalid("unknown multibase prefix".into())),
        }
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueCodec for Cid {
    const TAG: &'static str = "CID";

    fn encode(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        std::str::from_utf8(bytes)
            .map_err(|error| CodecError::InvalidIdentifier {
                kind: "CID",
                reason: error.to_string(),
            })?
            .parse()
    }
}

/// Something the page can be asked to dial: a bare peer or a full address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialTarget {
    /// Dial a peer by id, letting the node pick addresses
    Peer(PeerId),
    /// Dial a specific address
    Address(Multiaddr),
}

impl FromStr for DialTarget {
    type Err = CodecError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CodecError::Empty("PeerId or Multiaddr"));
        }
        if let Ok(peer) = text.parse::<PeerId>() {
            return Ok(Self::Peer(peer));
        }
        text.parse::<Multiaddr>()
            .map(Self::Address)
            .map_err(|_| CodecError::InvalidIdentifier {
                kind: "PeerId/Multiaddr",
                reason: format!("'{text}' is neither"),
            })
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Peer(peer) => peer.fmt(f),
            Self::Address(address) => address.fmt(f),
        }
    }
}

macro_rules! text_serde {
    ($($ty:ty),*) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(self)
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    deserializer.deserialize_any(TextOrBytes::<$ty>(PhantomData))
                }
            }
        )*
    };
}

text_serde!(PeerId, Multiaddr, Cid);

struct TextOrBytes<T>(PhantomData<T>);

impl<T> Visitor<'_> for TextOrBytes<T>
where
    T: FromStr<Err = CodecError> + ValueCodec,
{
    type Value = T;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a {} as text or bytes", T::TAG)
    }

    fn visit_str<E: de::Error>(self, text: &str) -> Result<T, E> {
        text.parse().map_err(E::custom)
    }

    fn visit_bytes<E: de::Error>(self, bytes: &[u8]) -> Result<T, E> {
        T::decode(bytes).map_err(E::custom)
    }
}
