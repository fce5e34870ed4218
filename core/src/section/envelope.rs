//! Subsection plaintext envelope
//!
//! ```text
//! varuint(pad_len) ‖ padding ‖ varuint(data_len) ‖ data ‖ flag ‖ pepper?
//! ```
//!
//! `flag` is 1 when a 32-byte pepper follows, 0 otherwise.

use rand::{Rng, RngCore};

use crate::config::EnvelopeConfig;
use crate::crypto::Hash;
use crate::error::{SectionError, StreamError};
use crate::stream::{ReadStream, WriteStream};

/// Encoded fields of one subsection with the pepper of its Merkle salts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Record bytes of the subsection
    pub data: Vec<u8>,
    /// Salt pepper, present for provable subsections
    pub pepper: Option<Hash>,
}

impl Envelope {
    /// Wrap record bytes
    pub fn new(data: Vec<u8>, pepper: Option<Hash>) -> Self {
        Envelope { data, pepper }
    }

    /// Serialize with `padding` random bytes in front
    pub fn seal(&self, padding: usize) -> Vec<u8> {
        let mut pad = vec![0u8; padding];
        rand::thread_rng().fill_bytes(&mut pad);

        let mut out = WriteStream::new();
        out.write_varuint(padding as u64);
        out.write_bytes(&pad);
        out.write_varuint(self.data.len() as u64);
        out.write_bytes(&self.data);
        match &self.pepper {
            Some(pepper) => {
                out.write_byte(1);
                out.write_bytes(pepper);
            }
            None => out.write_byte(0),
        }
        out.into_bytes()
    }

    /// Parse the envelope of subsection `id`
    pub fn open(bytes: &[u8], id: u32) -> Result<Self, SectionError> {
        Self::read(bytes).map_err(|_| SectionError::MalformedEnvelope(id))
    }

    fn read(bytes: &[u8]) -> Result<Self, StreamError> {
        let mut input = ReadStream::new(bytes);

        let padding = length(input.read_varuint()?)?;
        input.read_bytes(padding)?;
        let size = length(input.read_varuint()?)?;
        let data = input.read_bytes(size)?.to_vec();

        let pepper = match input.read_byte()? {
            0 => None,
            1 => {
                let mut pepper = [0u8; 32];
                pepper.copy_from_slice(input.read_bytes(32)?);
                Some(pepper)
            }
            tag => return Err(StreamError::UnknownTag(tag)),
        };
        input.finish()?;

        Ok(Envelope { data, pepper })
    }
}

fn length(value: u64) -> Result<usize, StreamError> {
    usize::try_from(value).map_err(|_| StreamError::Overflow)
}

/// Draw a padding length within the configured range
pub(crate) fn padding_length(config: &EnvelopeConfig) -> usize {
    if config.max_padding <= config.min_padding {
        return config.min_padding;
    }
    rand::thread_rng().gen_range(config.min_padding..=config.max_padding)
}
