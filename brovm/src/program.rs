use bincode::{Decode, Encode};
use log::debug;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::isa::Instruction;

pub const IMAGE_MAGIC: [u8; 4] = *b"BRX\0";
pub const IMAGE_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ImageError {
  #[error("bad magic in program image")]
  BadMagic,
  #[error("unsupported program image version {0}")]
  UnsupportedVersion(u16),
  #[error("program image checksum mismatch (header {header:#010x}, computed {computed:#010x})")]
  ChecksumMismatch { header: u32, computed: u32 },
  #[error("malformed program image")]
  Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ImageHeader {
  pub magic: [u8; 4],
  pub version: u16,
  pub reserved: u16,
  /// CRC32 over the image encoded with this field zeroed.
  pub checksum: u32,
}

/// On-disk form of a compiled program: a checked header plus the
/// instruction list the VM loads at address 0.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ProgramImage {
  pub header: ImageHeader,
  pub program: Vec<Instruction>,
}

impl ProgramImage {
  pub fn new(program: Vec<Instruction>) -> Self {
    ProgramImage {
      header: ImageHeader {
        magic: IMAGE_MAGIC,
        version: IMAGE_VERSION,
        reserved: 0,
        checksum: 0, // filled in during write_to
      },
      program,
    }
  }

  fn checksum(&self) -> Result<u32, std::io::Error> {
    let mut zeroed = self.clone();
    zeroed.header.checksum = 0;
    let encoded = bincode::encode_to_vec(&zeroed, bincode::config::standard())
      .map_err(std::io::Error::other)?;
    Ok(crc32fast::hash(&encoded))
  }

  pub fn write_to(&self, writer: &mut dyn Write) -> std::io::Result<()> {
    let mut stamped = self.clone();
    stamped.header.magic = IMAGE_MAGIC;
    stamped.header.version = IMAGE_VERSION;
    stamped.header.checksum = self.checksum()?;
    debug!("writing program image, checksum {:#010x}", stamped.header.checksum);

    let encoded = bincode::encode_to_vec(&stamped, bincode::config::standard())
      .map_err(std::io::Error::other)?;
    writer.write_all(&encoded)
  }

  pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    self.write_to(&mut file)
  }

  /// Reads and verifies an image. Header failures come back as
  /// [`ImageError`] wrapped in `io::ErrorKind::InvalidData`.
  pub fn read_from(reader: &mut dyn Read) -> std::io::Result<Self> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    let (image, _): (ProgramImage, usize) =
      bincode::decode_from_slice(&buffer, bincode::config::standard())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, ImageError::Malformed))?;

    image.verify().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(image)
  }

  pub fn read_from_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
    let mut file = std::fs::File::open(path)?;
    Self::read_from(&mut file)
  }

  fn verify(&self) -> Result<(), ImageError> {
    if self.header.magic != IMAGE_MAGIC {
      return Err(ImageError::BadMagic);
    }
    if self.header.version != IMAGE_VERSION {
      return Err(ImageError::UnsupportedVersion(self.header.version));
    }
    let computed = self.checksum().map_err(|_| ImageError::Malformed)?;
    if computed != self.header.checksum {
      return Err(ImageError::ChecksumMismatch { header: self.header.checksum, computed });
    }
    Ok(())
  }
}
