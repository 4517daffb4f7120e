//! Raw image loading into guest memory.

use std::io;
use std::path::Path;

use log::{debug, info};
use thiserror::Error;

use crate::bus::Bus;

/// How many leading bytes of a loaded image are read back and compared.
const VERIFY_LEN: usize = 16;

/// Copy `image` into guest memory starting at `base`, going through the bus
/// byte by byte, then read back the first [`VERIFY_LEN`] bytes to check the
/// copy landed.
pub fn load_image(bus: &mut Bus, base: u32, image: &[u8]) -> Result<(), LoadError> {
    for (i, &byte) in image.iter().enumerate() {
        let address = base
            .checked_add(i as u32)
            .ok_or(LoadError::OutOfRange { base, address: base })?;
        bus.write8(address, byte)
            .map_err(|_| LoadError::OutOfRange { base, address })?;
    }
    for (i, &byte) in image.iter().take(VERIFY_LEN).enumerate() {
        let address = base + i as u32;
        let read = bus
            .read8(address)
            .map_err(|_| LoadError::OutOfRange { base, address })?;
        if read != byte {
            return Err(LoadError::VerificationFailed { address });
        }
    }
    debug!("loaded {} bytes at {base:#010x}", image.len());
    Ok(())
}

/// Read an entire image file and load it at `base`. Returns the image size.
pub fn load_file(bus: &mut Bus, base: u32, path: &Path) -> Result<usize, LoadError> {
    let image = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_image(bus, base, &image)?;
    info!(
        "loaded image {} ({} bytes) at {base:#010x}",
        path.display(),
        image.len()
    );
    Ok(image.len())
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read image {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    /// The image does not fit in the memory mapped at `base`.
    #[error("image at {base:#010x} does not fit in guest memory (failed at {address:#010x})")]
    OutOfRange { base: u32, address: u32 },
    /// A read-back of the copied image returned different bytes.
    #[error("image read-back mismatch at {address:#010x}")]
    VerificationFailed { address: u32 },
}
