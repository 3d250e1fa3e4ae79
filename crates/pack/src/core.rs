//! # The Pack Container
//!
//! A [`Pack`] owns a random-access binary stream holding a ZIP archive and
//! keeps its in-memory [`Manifest`] consistent with the payload entries in
//! the container. Payloads are content-addressed: an entry is named after
//! the SHA-256 of its encoded bytes, identical payloads are stored once, and
//! every read verifies the checksum before decoding.
//!
//! ZIP offers no in-place deletion, so the container is mutated append-only.
//! Several entries may share a name; only the last one counts, and a name
//! whose last entry is zero-length is considered dead. Removal appends
//! zero-length shadow entries over payloads that no slot references any
//! more.
//!
//! The container is single-threaded and synchronous. Operations run to
//! completion in call order; callers wanting to share a pack must serialize
//! access themselves.


use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Seek, SeekFrom, Write};

use tempfile::SpooledTempFile;
use thiserror::Error;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::codecs::{self, CodecError};
use crate::hash;
use crate::manifest::{MANIFEST_FILENAME, Manifest, ManifestError, ManifestSlot};

/// Encoded payloads are staged in memory up to this size before spilling to
/// a temporary file.
pub const DEFAULT_SPOOL_THRESHOLD: usize = 8 * 1024 * 1024;

/// Errors raised by pack operations.
#[derive(Error, Debug)]
pub enum PackError {
    /// The manifest rejected the operation or could not be reconstructed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    /// Codec lookup, encoding, or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A slot cannot be loaded because context dependencies are unsatisfied.
    #[error("cannot load slot `{slot}`, unsatisfied dependencies: {}", .ids.join(", "))]
    DependenciesNotSatisfied {
        /// The slot that was asked for.
        slot: String,
        /// Ids of every dependency that evaluated unsatisfied.
        ids: Vec<String>,
    },
    /// The payload bytes do not hash to the checksum the manifest recorded.
    #[error("slot `{slot}` payload does not match its recorded checksum")]
    ChecksumMismatch {
        /// The slot whose payload is corrupt.
        slot: String,
        /// The checksum recorded in the manifest.
        expected: String,
        /// The checksum computed from the stored bytes.
        computed: String,
    },
    /// A typed load asked for a different type than the slot holds.
    #[error("slot `{slot}` does not hold a value of the requested type")]
    WrongType {
        /// The slot that was asked for.
        slot: String,
    },
    /// The underlying container is not a readable ZIP archive.
    #[error("archive error: {0}")]
    Zip(#[from] ZipError),
    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A multi-slot, content-addressed archive over a binary stream.
///
/// Opening a stream that holds an archive loads its manifest; opening an
/// empty stream writes a fresh one. [`close`](Pack::close) gives the stream
/// back — the pack never closes what it does not own.
#[derive(Debug)]
pub struct Pack<S> {
    stream: S,
    manifest: Manifest,
    spool_threshold: usize,
}

impl<S: Read + Write + Seek> Pack<S> {
    /// Open a pack over `stream` with the default spool threshold.
    ///
    /// # Errors
    ///
    /// Fails when the stream is non-empty but not a ZIP archive, or when its
    /// manifest entry does not parse under protocol version 2.
    pub fn new(stream: S) -> Result<Self, PackError> {
        Self::with_spool_threshold(stream, DEFAULT_SPOOL_THRESHOLD)
    }

    /// Open a pack, staging encoded payloads in memory up to
    /// `spool_threshold` bytes before spilling to a temporary file.
    ///
    /// # Errors
    ///
    /// As for [`new`](Pack::new).
    pub fn with_spool_threshold(
        mut stream: S,
        spool_threshold: usize,
    ) -> Result<Self, PackError> {
        let end = stream.seek(SeekFrom::End(0))?;
        if end == 0 {
            let mut pack = Pack {
                stream,
                manifest: Manifest::new(),
                spool_threshold,
            };
            pack.write_manifest()?;
            tracing::debug!("initialized a fresh pack");
            return Ok(pack);
        }

        let manifest = {
            let mut archive = ZipArchive::new(&mut stream)?;
            match archive.by_name(MANIFEST_FILENAME) {
                Ok(mut entry) => {
                    let mut raw = String::new();
                    entry.read_to_string(&mut raw)?;
                    let value = serde_json::from_str(&raw).map_err(ManifestError::from)?;
                    Some(Manifest::from_value(&value)?)
                }
                Err(ZipError::FileNotFound) => None,
                Err(error) => return Err(error.into()),
            }
        };

        match manifest {
            Some(manifest) => Ok(Pack {
                stream,
                manifest,
                spool_threshold,
            }),
            None => {
                // An archive without a manifest entry gets one on open.
                let mut pack = Pack {
                    stream,
                    manifest: Manifest::new(),
                    spool_threshold,
                };
                pack.write_manifest()?;
                Ok(pack)
            }
        }
    }

    /// Release the container and hand the underlying stream back.
    pub fn close(self) -> S {
        self.stream
    }

    /// Whether the manifest holds a slot under `slot_key`.
    pub fn has_slot(&self, slot_key: &str) -> bool {
        self.manifest.has_slot(slot_key)
    }

    /// Read-only view of the slot table.
    pub fn slots_info(&self) -> &BTreeMap<String, ManifestSlot> {
        self.manifest.slots()
    }

    /// Read-only view of the manifest.
    pub fn manifest_info(&self) -> &Manifest {
        &self.manifest
    }

    /// Encode `value` into a new slot under `slot_key`.
    ///
    /// The value is encoded by the highest-priority codec claiming it,
    /// staged, hashed, and stored content-addressed: a payload already live
    /// under the same hash is not written twice. The manifest is only
    /// mutated once the payload append has succeeded.
    ///
    /// # Errors
    ///
    /// [`ManifestError::SlotExists`] when the key is taken (remove first;
    /// overwriting is not supported), [`CodecError::Unsupported`] when no
    /// codec accepts the value, or any container failure.
    pub fn dump(&mut self, slot_key: &str, value: &dyn Any) -> Result<(), PackError> {
        if self.manifest.has_slot(slot_key) {
            return Err(ManifestError::SlotExists(slot_key.to_owned()).into());
        }

        let mut codec = codecs::find_for(value)?;

        let mut staged = SpooledTempFile::new(self.spool_threshold);
        codec.encode(value, &mut staged)?;

        staged.seek(SeekFrom::Start(0))?;
        let sha256 = hash::sha256_hex(&mut staged)?;

        let slot = ManifestSlot::new(
            slot_key,
            codec.tag(),
            sha256,
            codec.context_dependencies(),
        );
        let payload_name = slot.payload_name();

        if self.live_payloads()?.contains(&payload_name) {
            tracing::trace!(slot = slot_key, entry = %payload_name, "payload already live, deduplicating");
        } else {
            staged.seek(SeekFrom::Start(0))?;
            let mut writer = self.writer()?;
            writer.start_file(payload_name.as_str(), entry_options())?;
            io::copy(&mut staged, &mut writer)?;
            writer.finish()?;
        }

        self.manifest.insert_slot(slot)?;
        self.write_manifest()?;
        tracing::debug!(slot = slot_key, codec = codec.tag(), "stored slot");
        Ok(())
    }

    /// Decode the value stored under `slot_key`.
    ///
    /// Dependencies are evaluated first, then the payload is stream-hashed
    /// and compared against the manifest before a second pass hands a fresh
    /// entry stream to the codec. Entry streams are not rewindable, hence
    /// the two passes.
    ///
    /// # Errors
    ///
    /// [`ManifestError::NoSuchSlot`], [`PackError::DependenciesNotSatisfied`],
    /// [`PackError::ChecksumMismatch`], [`CodecError::UnknownTag`] when the
    /// codec is not registered, or any container failure.
    pub fn load(&mut self, slot_key: &str) -> Result<Box<dyn Any>, PackError> {
        let slot = self
            .manifest
            .slot(slot_key)
            .ok_or_else(|| ManifestError::NoSuchSlot(slot_key.to_owned()))?;

        let unsatisfied = slot.unsatisfied_dependencies();
        if !unsatisfied.is_empty() {
            return Err(PackError::DependenciesNotSatisfied {
                slot: slot_key.to_owned(),
                ids: unsatisfied,
            });
        }

        let payload_name = slot.payload_name();
        let expected = slot.sha256().to_owned();
        let codec_tag = slot.codec_tag().to_owned();

        {
            let mut archive = ZipArchive::new(&mut self.stream)?;
            let mut entry = archive.by_name(&payload_name)?;
            let computed = hash::sha256_hex(&mut entry)?;
            if computed != expected {
                return Err(PackError::ChecksumMismatch {
                    slot: slot_key.to_owned(),
                    expected,
                    computed,
                });
            }
        }

        let mut codec = codecs::by_tag(&codec_tag)?;
        let mut archive = ZipArchive::new(&mut self.stream)?;
        let mut entry = archive.by_name(&payload_name)?;
        let value = codec.decode(&mut entry)?;
        tracing::debug!(slot = slot_key, codec = %codec_tag, "loaded slot");
        Ok(value)
    }

    /// Like [`load`](Pack::load), downcast to a concrete type.
    ///
    /// # Errors
    ///
    /// As for [`load`](Pack::load), plus [`PackError::WrongType`] when the
    /// slot holds a value of a different type.
    pub fn load_as<T: Any>(&mut self, slot_key: &str) -> Result<T, PackError> {
        match self.load(slot_key)?.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(_) => Err(PackError::WrongType {
                slot: slot_key.to_owned(),
            }),
        }
    }

    /// Remove the slot under `slot_key`, pruning dependencies no other slot
    /// references and deadening payload entries no slot references.
    ///
    /// # Errors
    ///
    /// [`ManifestError::NoSuchSlot`] when the key is unknown, or any
    /// container failure.
    pub fn remove(&mut self, slot_key: &str) -> Result<(), PackError> {
        self.manifest.remove_slot(slot_key)?;
        self.write_manifest()?;
        let cleared = self.clear_dangling_payloads()?;
        tracing::debug!(slot = slot_key, cleared = cleared.len(), "removed slot");
        Ok(())
    }

    /// Names of payload entries that are live under the shadowing rule: per
    /// name, the last entry wins, and zero size means dead.
    fn live_payloads(&mut self) -> Result<BTreeSet<String>, PackError> {
        let mut sizes: BTreeMap<String, u64> = BTreeMap::new();
        let mut archive = ZipArchive::new(&mut self.stream)?;
        for index in 0..archive.len() {
            let entry = archive.by_index(index)?;
            if entry.name() == MANIFEST_FILENAME {
                continue;
            }
            // Entries come in archive order; a later duplicate overwrites.
            sizes.insert(entry.name().to_owned(), entry.size());
        }
        Ok(sizes
            .into_iter()
            .filter(|(_, size)| *size > 0)
            .map(|(name, _)| name)
            .collect())
    }

    /// Overwrite every live payload entry no slot references with a
    /// zero-length entry of the same name.
    fn clear_dangling_payloads(&mut self) -> Result<Vec<String>, PackError> {
        let referenced: BTreeSet<String> = self
            .manifest
            .slots()
            .values()
            .map(ManifestSlot::payload_name)
            .collect();
        let live = self.live_payloads()?;
        let dangling: Vec<String> = live.difference(&referenced).cloned().collect();

        if !dangling.is_empty() {
            let mut writer = self.writer()?;
            for name in &dangling {
                writer.start_file(name.as_str(), entry_options())?;
            }
            writer.finish()?;
        }
        Ok(dangling)
    }

    /// Append a fresh `manifest.json` entry, shadowing any previous one, and
    /// stamp `updated_at`.
    fn write_manifest(&mut self) -> Result<(), PackError> {
        self.manifest.touch();
        let value = self.manifest.to_value()?;
        let encoded = serde_json::to_vec(&value).map_err(ManifestError::from)?;

        let mut writer = self.writer()?;
        writer.start_file(MANIFEST_FILENAME, entry_options())?;
        writer.write_all(&encoded)?;
        writer.finish()?;
        Ok(())
    }

    fn writer(&mut self) -> Result<ZipWriter<&mut S>, PackError> {
        let end = self.stream.seek(SeekFrom::End(0))?;
        if end == 0 {
            Ok(ZipWriter::new(&mut self.stream))
        } else {
            Ok(ZipWriter::new_append(&mut self.stream)?)
        }
    }
}

fn entry_options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}
