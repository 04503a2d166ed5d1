//! 16-bit PCM RIFF/WAVE encoding for recorded audio segments.

use std::fs;
use std::path::Path;

use rodio::Source;

use crate::error::{SuiteError, SuiteResult};

const HEADER_LEN: usize = 44;
const BITS_PER_SAMPLE: u16 = 16;

/// Encode a finite source as a canonical 44-byte-header WAV file.
pub fn encode_wav<S>(source: S) -> Vec<u8>
where
    S: Source<Item = f32>,
{
    let channels = source.channels();
    let sample_rate = source.sample_rate();
    let samples: Vec<i16> = source.map(to_pcm16).collect();

    let block_align = channels * (BITS_PER_SAMPLE / 8);
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = (samples.len() * 2) as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

pub fn write_wav<S>(path: &Path, source: S) -> SuiteResult<()>
where
    S: Source<Item = f32>,
{
    fs::write(path, encode_wav(source)).map_err(|err| SuiteError::io(path, err))
}

fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
