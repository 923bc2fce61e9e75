//! Audio file tag reading and writing.
//!
//! Uses the lofty crate for format-independent metadata access.
//! [`TagIo`] is the capability the split resolver works against;
//! [`LoftyTags`] implements it for real files.
//!
//! Every container keeps its grouping fields under different native keys.
//! [`TagFormat`] picks the right one per container family:
//!
//! | Format | Release date | Recording date | Release id |
//! |---|---|---|---|
//! | ID3v2 (mp3) | `TDRL` | `TDRC` | `TXXX:MusicBrainz Album Id` |
//! | MP4 (m4a) | `©day` | `©day` | `----:com.apple.iTunes:MusicBrainz Album Id` |
//! | Vorbis (flac, ogg, opus) | `DATE` | `DATE` | `MUSICBRAINZ_ALBUMID` |
//! | APE (ape, wv, mpc) | `Year` | `Year` | `MUSICBRAINZ_ALBUMID` |
//!
//! Only ID3v2 has a release-date frame distinct from the recording date,
//! and the server's album grouping reads `TDRL` there, so writing `TDRC`
//! would change nothing.

use lofty::config::WriteOptions;
use lofty::file::{FileType, TaggedFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt, TagType};
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};

/// Grouping-relevant tag values of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSnapshot {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub album_artist: Option<String>,
    /// Field the server groups albums by
    pub release_date: Option<String>,
    /// Read for reporting only; never written
    pub recording_date: Option<String>,
    /// MusicBrainz album (release) id
    pub stable_id: Option<String>,
}

/// Uniform tag access across container formats.
///
/// `None` values clear the field.
pub trait TagIo {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> Result<TagSnapshot>;

    fn set_release_date(&self, path: &Path, value: Option<&str>) -> Result<()>;

    fn set_stable_id(&self, path: &Path, value: Option<&str>) -> Result<()>;
}

/// Tag scheme family of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFormat {
    Id3v2,
    Mp4,
    Vorbis,
    Ape,
}

impl TagFormat {
    /// Format from the sniffed container type.
    pub fn from_file_type(file_type: FileType) -> Option<Self> {
        match file_type {
            FileType::Mpeg => Some(TagFormat::Id3v2),
            FileType::Mp4 => Some(TagFormat::Mp4),
            FileType::Flac | FileType::Vorbis | FileType::Opus | FileType::Speex => {
                Some(TagFormat::Vorbis)
            }
            FileType::Ape | FileType::WavPack | FileType::Mpc => Some(TagFormat::Ape),
            _ => None,
        }
    }

    /// Format from the file extension, used when sniffing fails.
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        match ext.as_deref() {
            Some("mp3") => Some(TagFormat::Id3v2),
            Some("m4a" | "mp4" | "aac" | "alac") => Some(TagFormat::Mp4),
            Some("flac" | "ogg" | "oga" | "opus" | "spx") => Some(TagFormat::Vorbis),
            Some("ape" | "wv" | "mpc") => Some(TagFormat::Ape),
            _ => None,
        }
    }

    pub fn tag_type(&self) -> TagType {
        match self {
            TagFormat::Id3v2 => TagType::Id3v2,
            TagFormat::Mp4 => TagType::Mp4Ilst,
            TagFormat::Vorbis => TagType::VorbisComments,
            TagFormat::Ape => TagType::Ape,
        }
    }

    /// Key written when a release date is requested.
    pub fn release_date_key(&self) -> ItemKey {
        match self {
            // TDRL; TDRC is the recording date and not used for grouping
            TagFormat::Id3v2 => ItemKey::ReleaseDate,
            // ©day / DATE / Year are the only date fields these schemes have
            TagFormat::Mp4 | TagFormat::Vorbis | TagFormat::Ape => ItemKey::RecordingDate,
        }
    }

    /// Native field name behind [`release_date_key`](Self::release_date_key).
    pub fn release_date_field(&self) -> &'static str {
        match self {
            TagFormat::Id3v2 => "TDRL",
            TagFormat::Mp4 => "©day",
            TagFormat::Vorbis => "DATE",
            TagFormat::Ape => "Year",
        }
    }
}

/// [`TagIo`] backed by lofty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTags;

impl LoftyTags {
    fn open(path: &Path) -> Result<(TaggedFile, TagFormat)> {
        let tagged_file = Probe::open(path)
            .map_err(|e| Error::metadata(path, format!("failed to open: {e}")))?
            .guess_file_type()
            .map_err(|e| Error::metadata(path, format!("failed to detect file type: {e}")))?
            .read()
            .map_err(|e| Error::metadata(path, format!("failed to read tags: {e}")))?;

        let format = TagFormat::from_file_type(tagged_file.file_type())
            .or_else(|| TagFormat::from_extension(path))
            .ok_or_else(|| Error::UnsupportedFormat(path.to_path_buf()))?;
        Ok((tagged_file, format))
    }

    fn write_key(
        path: &Path,
        key_for: impl Fn(TagFormat) -> ItemKey,
        value: Option<&str>,
    ) -> Result<()> {
        let (mut tagged_file, format) = Self::open(path)?;
        let key = key_for(format);
        let tag_type = format.tag_type();

        if tagged_file.tag(tag_type).is_none() {
            if value.is_none() {
                // Nothing to clear
                return Ok(());
            }
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .tag_mut(tag_type)
            .ok_or_else(|| Error::metadata(path, "no writable tag"))?;

        match value {
            Some(v) => {
                if !tag.insert_text(key.clone(), v.to_string()) {
                    return Err(Error::metadata(
                        path,
                        format!("{key:?} not supported by {tag_type:?}"),
                    ));
                }
            }
            None => tag.remove_key(&key),
        }

        tag.save_to_path(path, WriteOptions::default())
            .map_err(|e| Error::metadata(path, format!("failed to write tags: {e}")))?;
        debug!(target: "tags", path = %path.display(), ?key, ?value, "Tag written");
        Ok(())
    }
}

impl TagIo for LoftyTags {
    fn read(&self, path: &Path) -> Result<TagSnapshot> {
        let (tagged_file, format) = Self::open(path)?;

        let Some(tag) = tagged_file
            .tag(format.tag_type())
            .or_else(|| tagged_file.primary_tag())
        else {
            return Ok(TagSnapshot::default());
        };

        let get = |key: &ItemKey| {
            tag.get_string(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Ok(TagSnapshot {
            title: tag.title().map(|s| s.into_owned()),
            artist: tag.artist().map(|s| s.into_owned()),
            album: tag.album().map(|s| s.into_owned()),
            album_artist: get(&ItemKey::AlbumArtist),
            release_date: get(&format.release_date_key()),
            recording_date: get(&ItemKey::RecordingDate),
            stable_id: get(&ItemKey::MusicBrainzReleaseId),
        })
    }

    fn set_release_date(&self, path: &Path, value: Option<&str>) -> Result<()> {
        Self::write_key(path, |format| format.release_date_key(), value)
    }

    fn set_stable_id(&self, path: &Path, value: Option<&str>) -> Result<()> {
        Self::write_key(path, |_| ItemKey::MusicBrainzReleaseId, value)
    }
}
