//! The blake3 hash used throughout logbook.

use std::fmt;
use std::str::FromStr;

use serde::{
    de::{self, SeqAccess},
    ser::SerializeTuple,
    Deserialize, Deserializer, Serialize, Serializer,
};

/// Hash type used throughout.
#[derive(PartialEq, Eq, Copy, Clone, Hash)]
pub struct Hash(blake3::Hash);

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&DD(self.to_hex())).finish()
    }
}

struct DD<T: fmt::Display>(T);

impl<T: fmt::Display> fmt::Debug for DD<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Hash {
    /// Calculate the hash of the provided bytes.
    pub fn new(buf: impl AsRef<[u8]>) -> Self {
        let val = blake3::hash(buf.as_ref());
        Hash(val)
    }

    /// Bytes of the hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Create a `Hash` from its raw bytes representation.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(blake3::Hash::from_bytes(bytes))
    }

    /// Convert the hash to a hex string.
    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<Hash> for blake3::Hash {
    fn from(value: Hash) -> Self {
        value.0
    }
}

impl From<blake3::Hash> for Hash {
    fn from(value: blake3::Hash) -> Self {
        Hash(value)
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Hash(blake3::Hash::from(value))
    }
}

impl From<Hash> for [u8; 32] {
    fn from(value: Hash) -> Self {
        *value.as_bytes()
    }
}

impl From<&[u8; 32]> for Hash {
    fn from(value: &[u8; 32]) -> Self {
        Hash(blake3::Hash::from(*value))
    }
}

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hash {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // result will be 52 bytes
        let mut res = [b'b'; 52];
        // write the encoded bytes
        data_encoding::BASE32_NOPAD.encode_mut(self.as_bytes(), &mut res);
        // convert to string, this is guaranteed to succeed
        let t = std::str::from_utf8_mut(res.as_mut()).unwrap();
        // hack since data_encoding doesn't have BASE32LOWER_NOPAD as a const
        t.make_ascii_lowercase();
        // write the str, no allocations
        f.write_str(t)
    }
}

/// Error when parsing a [`Hash`] from its string form.
#[derive(thiserror::Error, Debug)]
pub enum HashParsingError {
    /// The input had a length matching neither hex nor base32 form.
    #[error("invalid length: {0}")]
    Length(usize),
    /// The input was not valid hex or base32.
    #[error("invalid encoding")]
    Encoding,
}

impl FromStr for Hash {
    type Err = HashParsingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sb = s.as_bytes();
        if sb.len() == 64 {
            // this is most likely a hex encoded hash
            // try to decode it as hex
            let mut bytes = [0u8; 32];
            if hex::decode_to_slice(sb, &mut bytes).is_ok() {
                return Ok(Self::from(bytes));
            }
        }
        if sb.len() != 52 {
            return Err(HashParsingError::Length(sb.len()));
        }
        // this is a base32 encoded hash, we can decode it directly
        let mut t = [0u8; 52];
        t.copy_from_slice(sb);
        std::str::from_utf8_mut(t.as_mut())
            .map_err(|_| HashParsingError::Encoding)?
            .make_ascii_uppercase();
        let mut res = [0u8; 32];
        data_encoding::BASE32_NOPAD
            .decode_mut(&t, &mut res)
            .map_err(|_| HashParsingError::Encoding)?;
        Ok(Self::from(res))
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.to_string().as_str())
        } else {
            // Fixed-length structures, including arrays, are supported in Serde as tuples
            // See: https://serde.rs/impl-serialize.html#serializing-a-tuple
            let mut s = serializer.serialize_tuple(32)?;
            for item in self.0.as_bytes() {
                s.serialize_element(item)?;
            }
            s.end()
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(de::Error::custom)
        } else {
            deserializer.deserialize_tuple(32, HashVisitor)
        }
    }
}

struct HashVisitor;

impl<'de> de::Visitor<'de> for HashVisitor {
    type Value = Hash;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "an array of 32 bytes containing hash data")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut arr = [0u8; 32];
        let mut i = 0;
        while let Some(val) = seq.next_element()? {
            arr[i] = val;
            i += 1;
            if i > 32 {
                return Err(de::Error::invalid_length(i, &self));
            }
        }

        Ok(Hash::from(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parse_roundtrip() {
        for i in 0..100u8 {
            let hash = Hash::new([i]);
            let text = hash.to_string();
            assert_eq!(text.len(), 52);
            assert_eq!(text.parse::<Hash>().unwrap(), hash);
            let hex = hash.to_hex();
            assert_eq!(hex.parse::<Hash>().unwrap(), hash);
        }
    }

    #[test]
    fn test_serde_roundtrip() -> anyhow::Result<()> {
        let hash = Hash::new(b"hello");
        let ser = postcard::to_stdvec(&hash)?;
        // non human readable serialization is the raw 32 bytes
        assert_eq!(ser.len(), 32);
        let de: Hash = postcard::from_bytes(&ser)?;
        assert_eq!(de, hash);

        let json = serde_json::to_string(&hash)?;
        let de: Hash = serde_json::from_str(&json)?;
        assert_eq!(de, hash);
        Ok(())
    }
}
