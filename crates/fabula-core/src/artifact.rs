//! Audio artifact encoding. WAV wrapping and placeholder audio.
//!
//! Pure functions, no I/O.

use crate::types::AudioFormat;

/// Sample rate of PCM returned for [`AudioFormat::Wav`] requests.
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// One MPEG-1 Layer III frame header: 128 kbps, 44.1 kHz, no padding.
const MP3_FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
/// Frame length in bytes at 128 kbps / 44.1 kHz.
const MP3_FRAME_LEN: usize = 417;
/// Roughly one second of silence.
const PLACEHOLDER_FRAMES: usize = 39;

/// Write a minimal WAV file (16-bit mono PCM) from raw samples.
pub fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    buf.extend_from_slice(&2u16.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Little-endian 16-bit PCM bytes to samples. A trailing odd byte is dropped.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Wrap a raw PCM response body as a WAV file.
pub fn pcm_to_wav(pcm: &[u8]) -> Vec<u8> {
    write_wav(&bytes_to_i16(pcm), PCM_SAMPLE_RATE)
}

fn silent_mp3() -> Vec<u8> {
    let mut buf = Vec::with_capacity(MP3_FRAME_LEN * PLACEHOLDER_FRAMES);
    for _ in 0..PLACEHOLDER_FRAMES {
        buf.extend_from_slice(&MP3_FRAME_HEADER);
        buf.resize(buf.len() + MP3_FRAME_LEN - MP3_FRAME_HEADER.len(), 0);
    }
    buf
}

/// Deterministic placeholder audio: about a second of silence.
pub fn placeholder(format: AudioFormat) -> Vec<u8> {
    match format {
        AudioFormat::Mp3 => silent_mp3(),
        AudioFormat::Wav => write_wav(&vec![0i16; PCM_SAMPLE_RATE as usize], PCM_SAMPLE_RATE),
    }
}
