use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::MEMORY_SIZE;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Line {line}: '{text}' is not a binary number")]
    InvalidLine { line: usize, text: String },
    #[error("Line {line}: {value:#b} does not fit in 8 bits")]
    ValueOutOfRange { line: usize, value: u32 },
    #[error("Program has {0} bytes, memory holds {max}", max = MEMORY_SIZE)]
    ProgramTooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
}

/// Parses an `.ls8` listing: one base-2 byte per line, `#` starts a comment,
/// blank lines are skipped.
pub fn parse_listing(source: &str) -> Result<Vec<u8>, LoadError> {
    let mut program = Vec::new();

    for (index, line) in source.lines().enumerate() {
        let text = line.split('#').next().unwrap_or_default().trim();
        if text.is_empty() {
            continue;
        }

        let line = index + 1;
        let value = u32::from_str_radix(text, 2).map_err(|_| LoadError::InvalidLine {
            line,
            text: text.to_string(),
        })?;
        let byte = u8::try_from(value).map_err(|_| LoadError::ValueOutOfRange { line, value })?;
        program.push(byte);
    }

    if program.len() > MEMORY_SIZE {
        return Err(LoadError::ProgramTooLarge(program.len()));
    }

    Ok(program)
}

#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProgramImageHeader {
    pub labels: IndexMap<String, u8>,
    pub entrypoint: u8,
}

/// A program together with its entrypoint and symbol table.
#[derive(Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProgramImage {
    pub header: ProgramImageHeader,
    pub data: Vec<u8>,
}

impl ProgramImage {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn from_listing(source: &str) -> Result<Self, LoadError> {
        Ok(Self::new(parse_listing(source)?))
    }

    pub fn from_listing_file<P: AsRef<Path>>(p: P) -> Result<Self, LoadError> {
        Self::from_listing(&std::fs::read_to_string(p.as_ref())?)
    }

    pub fn load<P: AsRef<Path>>(p: P) -> Result<Self, LoadError> {
        let reader = BufReader::new(File::open(p.as_ref())?);
        let image: Self = bincode::deserialize_from(reader)?;
        if image.data.len() > MEMORY_SIZE {
            return Err(LoadError::ProgramTooLarge(image.data.len()));
        }
        Ok(image)
    }

    pub fn save<P: AsRef<Path>>(&self, p: P) -> Result<(), LoadError> {
        let writer = BufWriter::new(File::create(p.as_ref())?);
        Ok(bincode::serialize_into(writer, self)?)
    }
}
