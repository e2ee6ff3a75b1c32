// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for encoding the per-device sections of the migration stream.
//!
//! Each section is delimited by a reserved 64-bit marker, chosen so that a
//! collision with legacy stream content is vanishingly unlikely:
//! the high 32 bits are all ones, the next 16 are a magic id, and the low 16
//! identify the section.  All multi-byte integers on the wire, markers and
//! data-block lengths alike, are big-endian and 8 bytes wide.
//!
//! The framing invariants: a `ConfigState` or `SetupState` section is
//! immediately followed by an `EndOfState` marker, and a run of zero or more
//! length-prefixed `DataState` sections is terminated by a single
//! `EndOfState`.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::MigrateError;
use crate::device::DeviceConfig;

/// Section delimiters for one device's slice of the migration stream.  The
/// values are wire ABI; they must never change.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u64)]
pub enum Section {
    EndOfState = 0xffff_ffff_ef10_0001,
    ConfigState = 0xffff_ffff_ef10_0002,
    SetupState = 0xffff_ffff_ef10_0003,
    DataState = 0xffff_ffff_ef10_0004,
}

pub fn put_marker(
    w: &mut dyn Write,
    section: Section,
) -> Result<(), MigrateError> {
    w.write_u64::<BigEndian>(section.into())?;
    Ok(())
}

/// Read the next section marker, failing on values outside the reserved set.
pub fn get_marker(r: &mut dyn Read) -> Result<Section, MigrateError> {
    let tag = r.read_u64::<BigEndian>()?;
    Section::try_from(tag).map_err(|_| MigrateError::UnknownStreamTag(tag))
}

fn expect_end_of_state(r: &mut dyn Read) -> Result<(), MigrateError> {
    let tag = r.read_u64::<BigEndian>()?;
    if tag != u64::from(Section::EndOfState) {
        return Err(MigrateError::MalformedStream(format!(
            "expected end-of-state marker, found {:#018x}",
            tag
        )));
    }
    Ok(())
}

pub fn write_end_of_state(w: &mut dyn Write) -> Result<(), MigrateError> {
    put_marker(w, Section::EndOfState)
}

/// Emit the device config section.  A device without the config capability
/// contributes an empty payload; the framing is emitted either way.
pub fn write_config_state(
    w: &mut dyn Write,
    config: Option<&dyn DeviceConfig>,
) -> Result<(), MigrateError> {
    put_marker(w, Section::ConfigState)?;
    if let Some(config) = config {
        config.save(w)?;
    }
    put_marker(w, Section::EndOfState)
}

/// Counterpart of [`write_config_state`], to be called with the
/// `ConfigState` marker already consumed.  The config deserializer (if any)
/// must consume exactly the payload its serializer produced.
pub fn read_config_state(
    r: &mut dyn Read,
    config: Option<&dyn DeviceConfig>,
) -> Result<(), MigrateError> {
    if let Some(config) = config {
        config.load(r)?;
    }
    expect_end_of_state(r)
}

/// Emit the (payload-free) setup section.  The framing must stay stable even
/// though it currently carries nothing.
pub fn write_setup_state(w: &mut dyn Write) -> Result<(), MigrateError> {
    put_marker(w, Section::SetupState)?;
    put_marker(w, Section::EndOfState)
}

pub fn read_setup_state(r: &mut dyn Read) -> Result<(), MigrateError> {
    let section = get_marker(r)?;
    if section != Section::SetupState {
        return Err(MigrateError::MalformedStream(format!(
            "expected setup-state marker, found {:#018x}",
            u64::from(section)
        )));
    }
    expect_end_of_state(r)
}

/// Emit one data block: marker, 8-byte big-endian length, raw bytes.
pub fn write_data_block(
    w: &mut dyn Write,
    bytes: &[u8],
) -> Result<(), MigrateError> {
    put_marker(w, Section::DataState)?;
    w.write_u64::<BigEndian>(bytes.len() as u64)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Consume one device stream: sections are processed until a terminal one.
///
/// `DataState` payloads are delivered to `data_sink` chunked through `buf`
/// (so an arbitrarily large declared length never costs more than the
/// bounded buffer); zero-length blocks are skipped.  A `ConfigState` section
/// is always terminal for the device stream, as is the bare `EndOfState`
/// closing a data run and the `SetupState`/`EndOfState` pair.
pub fn read_stream(
    r: &mut dyn Read,
    config: Option<&dyn DeviceConfig>,
    buf: &mut [u8],
    data_sink: &mut dyn FnMut(&[u8]) -> Result<(), MigrateError>,
) -> Result<(), MigrateError> {
    loop {
        match get_marker(r)? {
            Section::EndOfState => return Ok(()),
            Section::ConfigState => return read_config_state(r, config),
            Section::SetupState => return expect_end_of_state(r),
            Section::DataState => {
                let mut remaining = r.read_u64::<BigEndian>()?;
                while remaining > 0 {
                    let take = remaining.min(buf.len() as u64) as usize;
                    r.read_exact(&mut buf[..take])?;
                    data_sink(&buf[..take])?;
                    remaining -= take as u64;
                }
            }
        }
    }
}
