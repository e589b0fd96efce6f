//! Atari ST floppy disk image formats.
//!
//! Two on-disk formats are supported:
//!
//! - **`.ST`** — a raw sector dump, sides x tracks x sectors x 512 bytes.
//!   The geometry is not stored in the file; it is deduced from the file
//!   size by probing the plausible ST geometries.
//! - **`.MSA`** — Magic Shadow Archiver, a track-granular RLE compression
//!   of the same sector data with a 10-byte big-endian header.
//!
//! Both decode into a [`FloppyDisk`]: a flat sector-ordered byte payload
//! plus geometry, addressed by linear block address
//! `(track * sides + side) * sectors_per_track + (sector - 1)`.

use std::fmt;

use thiserror::Error;

pub const SECTOR_SIZE: usize = 512;

/// MSA magic word (big-endian 0x0E0F).
const MSA_MAGIC: u16 = 0x0E0F;

/// MSA RLE run marker byte.
const MSA_RLE_MARKER: u8 = 0xE5;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not a recognised .ST image size: {0} bytes")]
    UnrecognisedStSize(usize),
    #[error("not an MSA image (bad magic word {0:#06X})")]
    BadMsaMagic(u16),
    #[error("MSA header describes an unusable geometry ({sides} sides, {sectors_per_track} sectors/track)")]
    BadMsaGeometry { sides: u16, sectors_per_track: u16 },
    #[error("MSA image truncated at track {track} side {side}")]
    TruncatedMsaTrack { track: u16, side: u16 },
    #[error("MSA track {track} side {side} decodes to {got} bytes, expected {expected}")]
    BadMsaTrackLength {
        track: u16,
        side: u16,
        got: usize,
        expected: usize,
    },
}

/// Disk geometry. All ST-era formats use 512-byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub sides: u32,
    pub tracks: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
}

impl DiskGeometry {
    pub fn total_bytes(&self) -> usize {
        (self.sides * self.tracks * self.sectors_per_track * self.bytes_per_sector) as usize
    }

    pub fn total_sectors(&self) -> u32 {
        self.sides * self.tracks * self.sectors_per_track
    }

    /// Deduce a geometry from a raw image size. Probes sides {1,2},
    /// tracks {79..82}, sectors/track {8..12}; the first match wins.
    pub fn from_image_size(len: usize) -> Option<Self> {
        for sides in 1..=2u32 {
            for tracks in 79..=82u32 {
                for sectors_per_track in 8..=12u32 {
                    let geometry = Self {
                        sides,
                        tracks,
                        sectors_per_track,
                        bytes_per_sector: SECTOR_SIZE as u32,
                    };
                    if geometry.total_bytes() == len {
                        return Some(geometry);
                    }
                }
            }
        }
        None
    }
}

impl fmt::Display for DiskGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} side(s), {} tracks, {} sectors/track",
            self.sides, self.tracks, self.sectors_per_track
        )
    }
}

/// An in-memory floppy disk image.
pub struct FloppyDisk {
    data: Vec<u8>,
    geometry: DiskGeometry,
    write_protected: bool,
    dirty: bool,
}

impl FloppyDisk {
    /// Parse a raw `.ST` sector dump.
    pub fn from_st_bytes(data: Vec<u8>) -> Result<Self, FormatError> {
        let geometry = DiskGeometry::from_image_size(data.len())
            .ok_or(FormatError::UnrecognisedStSize(data.len()))?;
        Ok(Self {
            data,
            geometry,
            write_protected: false,
            dirty: false,
        })
    }

    /// Parse an `.MSA` archive.
    ///
    /// Header: `{magic, sectors_per_track, sides, start_track, end_track}`,
    /// all big-endian words. Tracks follow in `(track, side)` order, each
    /// prefixed with a big-endian byte count: a count equal to the raw track
    /// size means an uncompressed track, anything else is RLE data in which
    /// `0xE5 value count16` expands to `count` copies of `value`.
    pub fn from_msa_bytes(data: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = Cursor::new(data);

        let magic = cursor.word(0, 0)?;
        if magic != MSA_MAGIC {
            return Err(FormatError::BadMsaMagic(magic));
        }
        let sectors_per_track = cursor.word(0, 0)?;
        // A zero side word shows up in some single-sided archives; treat it
        // as one side.
        let sides = cursor.word(0, 0)?.max(1);
        let start_track = cursor.word(0, 0)?;
        let end_track = cursor.word(0, 0)?;

        if sides > 2 || !(8..=12).contains(&sectors_per_track) || end_track < start_track {
            return Err(FormatError::BadMsaGeometry {
                sides,
                sectors_per_track,
            });
        }

        let geometry = DiskGeometry {
            sides: u32::from(sides),
            tracks: u32::from(end_track - start_track + 1),
            sectors_per_track: u32::from(sectors_per_track),
            bytes_per_sector: SECTOR_SIZE as u32,
        };
        let track_len = geometry.sectors_per_track as usize * SECTOR_SIZE;
        let mut payload = vec![0u8; geometry.total_bytes()];

        for track in start_track..=end_track {
            for side in 0..sides {
                let stored_len = cursor.word(track, side)? as usize;
                let stored = cursor.take(stored_len, track, side)?;
                let offset =
                    (u32::from(track - start_track) * geometry.sides + u32::from(side)) as usize
                        * track_len;
                let out = &mut payload[offset..offset + track_len];
                if stored_len == track_len {
                    out.copy_from_slice(stored);
                } else {
                    decode_rle_track(stored, out, track, side)?;
                }
            }
        }

        Ok(Self {
            data: payload,
            geometry,
            write_protected: false,
            dirty: false,
        })
    }

    /// Parse either format, keyed on the file extension with a fallback to
    /// `.ST` size probing.
    pub fn from_named_bytes(name: &str, data: Vec<u8>) -> Result<Self, FormatError> {
        let is_msa = name
            .rsplit('.')
            .next()
            .map(|ext| ext.eq_ignore_ascii_case("msa"))
            .unwrap_or(false);
        if is_msa {
            Self::from_msa_bytes(&data)
        } else {
            Self::from_st_bytes(data)
        }
    }

    /// Serialise as a raw `.ST` dump.
    pub fn to_st_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Serialise as an `.MSA` archive. Tracks are stored raw; the format
    /// permits this and it keeps write-back loss-free.
    pub fn to_msa_bytes(&self) -> Vec<u8> {
        let track_len = self.geometry.sectors_per_track as usize * SECTOR_SIZE;
        let mut out = Vec::with_capacity(10 + self.data.len() + 2 * self.data.len() / track_len);
        let word = |out: &mut Vec<u8>, v: u16| out.extend_from_slice(&v.to_be_bytes());
        word(&mut out, MSA_MAGIC);
        word(&mut out, self.geometry.sectors_per_track as u16);
        word(&mut out, self.geometry.sides as u16);
        word(&mut out, 0);
        word(&mut out, self.geometry.tracks as u16 - 1);
        for chunk in self.data.chunks(track_len) {
            word(&mut out, chunk.len() as u16);
            out.extend_from_slice(chunk);
        }
        out
    }

    pub fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    pub fn write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    /// True once any sector has been written since load (or the last
    /// [`Self::mark_clean`]).
    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Borrow one 512-byte sector by linear block address. `None` past the
    /// end of the image.
    pub fn sector(&self, lba: u32) -> Option<&[u8]> {
        if lba >= self.geometry.total_sectors() {
            return None;
        }
        let start = lba as usize * SECTOR_SIZE;
        Some(&self.data[start..start + SECTOR_SIZE])
    }

    /// Mutably borrow one sector and mark the image dirty. Does not check
    /// write protection; the controller does that before calling.
    pub fn sector_mut(&mut self, lba: u32) -> Option<&mut [u8]> {
        if lba >= self.geometry.total_sectors() {
            return None;
        }
        self.dirty = true;
        let start = lba as usize * SECTOR_SIZE;
        Some(&mut self.data[start..start + SECTOR_SIZE])
    }
}

/// Byte cursor over the MSA payload with positioned error reporting.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn word(&mut self, track: u16, side: u16) -> Result<u16, FormatError> {
        let bytes = self.take(2, track, side)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn take(&mut self, len: usize, track: u16, side: u16) -> Result<&'a [u8], FormatError> {
        if self.pos + len > self.data.len() {
            return Err(FormatError::TruncatedMsaTrack { track, side });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

fn decode_rle_track(
    stored: &[u8],
    out: &mut [u8],
    track: u16,
    side: u16,
) -> Result<(), FormatError> {
    let mut rd = 0;
    let mut wr = 0;
    while rd < stored.len() && wr < out.len() {
        let byte = stored[rd];
        rd += 1;
        if byte == MSA_RLE_MARKER {
            if rd + 3 > stored.len() {
                return Err(FormatError::TruncatedMsaTrack { track, side });
            }
            let value = stored[rd];
            let count = u16::from_be_bytes([stored[rd + 1], stored[rd + 2]]) as usize;
            rd += 3;
            let end = (wr + count).min(out.len());
            out[wr..end].fill(value);
            wr = end;
        } else {
            out[wr] = byte;
            wr += 1;
        }
    }
    if wr != out.len() {
        return Err(FormatError::BadMsaTrackLength {
            track,
            side,
            got: wr,
            expected: out.len(),
        });
    }
    Ok(())
}
