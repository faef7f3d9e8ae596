//! Identifier codec: upstream fully-qualified names <-> opaque facade ids.
//!
//! An id has the shape `<kind>-<payload>.<checksum>`:
//!
//! - `kind` names the entity level, derived from the segment count of the name
//!   (`ds`, `db`, `dset`, `tbl`, `col`, `ent`).
//! - `payload` is the URL-safe, unpadded base64 of the fully-qualified name.
//! - `checksum` is the first four bytes of SHA-256 over `kind` and `payload`, in hex.
//!
//! The codec is a pure function pair. It never memoizes, never calls upstream, and
//! two processes encoding the same name always produce the same id.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CodecError;
use crate::fqn;

const CHECKSUM_BYTES: usize = 4;

/// Entity level encoded in an identifier's prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// `service` (1 segment)
    Datasource,
    /// `service.database` (2 segments)
    Database,
    /// `service.database.schema` (3 segments)
    Dataset,
    /// `service.database.schema.table` (4 segments)
    Table,
    /// `service.database.schema.table.column` (5 segments)
    Column,
    /// Anything deeper, e.g. nested struct fields.
    Entity,
}

impl EntityKind {
    /// Kind implied by a fully-qualified name's segment count.
    pub fn for_depth(depth: usize) -> Self {
        match depth {
            0 | 1 => Self::Datasource,
            2 => Self::Database,
            3 => Self::Dataset,
            4 => Self::Table,
            5 => Self::Column,
            _ => Self::Entity,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Datasource => "ds",
            Self::Database => "db",
            Self::Dataset => "dset",
            Self::Table => "tbl",
            Self::Column => "col",
            Self::Entity => "ent",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "ds" => Some(Self::Datasource),
            "db" => Some(Self::Database),
            "dset" => Some(Self::Dataset),
            "tbl" => Some(Self::Table),
            "col" => Some(Self::Column),
            "ent" => Some(Self::Entity),
            _ => None,
        }
    }
}

/// Stateless encoder/decoder for facade identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdCodec;

impl IdCodec {
    /// Encodes a fully-qualified name. Deterministic and total.
    pub fn encode(fqn: &str) -> String {
        let kind = EntityKind::for_depth(fqn::segment_count(fqn));
        let payload = URL_SAFE_NO_PAD.encode(fqn.as_bytes());
        let checksum = checksum(kind.prefix(), &payload);
        format!("{}-{payload}.{checksum}", kind.prefix())
    }

    /// Decodes an id produced by [`IdCodec::encode`] back to its fully-qualified name.
    pub fn decode(id: &str) -> Result<String, CodecError> {
        Self::decode_with_kind(id).map(|(_, name)| name)
    }

    /// Decodes an id and additionally requires it to name an entity of `expected` kind.
    pub fn decode_kind(id: &str, expected: EntityKind) -> Result<String, CodecError> {
        let (kind, name) = Self::decode_with_kind(id)?;
        if kind != expected {
            return Err(invalid(id, "identifier names a different kind of entity"));
        }
        Ok(name)
    }

    /// Decodes an id, returning the entity kind alongside the name.
    pub fn decode_with_kind(id: &str) -> Result<(EntityKind, String), CodecError> {
        let (prefix, rest) = id
            .split_once('-')
            .ok_or_else(|| invalid(id, "missing kind prefix"))?;
        let kind = EntityKind::from_prefix(prefix).ok_or_else(|| invalid(id, "unknown kind"))?;
        let (payload, sum) = rest
            .rsplit_once('.')
            .ok_or_else(|| invalid(id, "missing checksum"))?;

        if sum.len() != CHECKSUM_BYTES * 2 || sum != checksum(prefix, payload) {
            return Err(invalid(id, "checksum mismatch"));
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| invalid(id, "payload is not base64"))?;
        let name = String::from_utf8(bytes).map_err(|_| invalid(id, "payload is not UTF-8"))?;

        if EntityKind::for_depth(fqn::segment_count(&name)) != kind {
            return Err(invalid(id, "kind does not match name depth"));
        }
        Ok((kind, name))
    }
}

fn checksum(prefix: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(b":");
    hasher.update(payload.as_bytes());
    hex::encode(&hasher.finalize()[..CHECKSUM_BYTES])
}

fn invalid(id: &str, reason: &'static str) -> CodecError {
    CodecError::InvalidIdentifier {
        id: id.to_string(),
        reason,
    }
}
