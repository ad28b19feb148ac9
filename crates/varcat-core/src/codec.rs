//! rkyv record encoding and revision-checked writes.

use crate::error::Error;

/// Encode a record with rkyv.
pub(crate) fn encode<T>(value: &T) -> Result<Vec<u8>, Error>
where
    T: for<'a> rkyv::Serialize<
        rkyv::api::high::HighSerializer<
            rkyv::util::AlignedVec,
            rkyv::ser::allocator::ArenaHandle<'a>,
            rkyv::rancor::Error,
        >,
    >,
{
    rkyv::to_bytes::<rkyv::rancor::Error>(value)
        .map(|v| v.to_vec())
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a record previously written with [`encode`].
///
/// sled hands back buffers without alignment guarantees, so the bytes are
/// copied into an aligned buffer before validation.
pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T, Error>
where
    T: rkyv::Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>>
        + rkyv::Deserialize<T, rkyv::api::high::HighDeserializer<rkyv::rancor::Error>>,
{
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, rkyv::rancor::Error>(&aligned)
        .map_err(|e| Error::Deserialization(e.to_string()))
}

/// Record carrying an optimistic concurrency counter.
pub(crate) trait Revisioned {
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);
}

/// Write `record` under `key` if the stored revision still equals
/// `record.revision()`. An absent key counts as revision 0.
///
/// Returns the record as stored, with its revision bumped.
pub(crate) fn put_checked<T>(tree: &sled::Tree, key: &[u8], record: &T) -> Result<T, Error>
where
    T: Revisioned + Clone + rkyv::Archive,
    T: for<'a> rkyv::Serialize<
        rkyv::api::high::HighSerializer<
            rkyv::util::AlignedVec,
            rkyv::ser::allocator::ArenaHandle<'a>,
            rkyv::rancor::Error,
        >,
    >,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>>
        + rkyv::Deserialize<T, rkyv::api::high::HighDeserializer<rkyv::rancor::Error>>,
{
    let conflict = |found: u64| Error::Conflict {
        key: String::from_utf8_lossy(key).into_owned(),
        expected: record.revision(),
        found,
    };

    let current = tree.get(key)?;
    let found = match &current {
        Some(bytes) => decode::<T>(bytes)?.revision(),
        None => 0,
    };
    if found != record.revision() {
        return Err(conflict(found));
    }

    let mut next = record.clone();
    next.set_revision(found + 1);
    match tree.compare_and_swap(key, current, Some(encode(&next)?))? {
        Ok(()) => Ok(next),
        Err(cas) => {
            let found = match cas.current {
                Some(bytes) => decode::<T>(&bytes)?.revision(),
                None => 0,
            };
            Err(conflict(found))
        }
    }
}
