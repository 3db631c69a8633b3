//! Codec configuration decoders for audio sample descriptions.
//!
//! - esds: MPEG-4 elementary stream descriptor (ES_Descriptor ->
//!   DecoderConfigDescriptor -> DecoderSpecificInfo / AudioSpecificConfig)
//! - alac: Apple Lossless magic cookie

use crate::bits::read_descriptor_length;
use crate::{Error, Result};
use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{Buf, Bytes};

/// AAC sampling frequencies by index. Indexes 13-15 are reserved.
pub static AAC_SAMPLE_RATES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0,
    0, 0,
];

const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_TAG: u8 = 0x04;
const DECODER_SPECIFIC_TAG: u8 = 0x05;

/// Fields recovered from an esds box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsdsConfig {
    pub object_type_indication: u8,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub audio_object_type: Option<u8>,
    pub sample_rate: Option<u32>,
    pub channel_config: Option<u8>,
}

/// Fields recovered from an ALAC magic cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlacConfig {
    pub frame_length: u32,
    pub bit_depth: u8,
    pub channels: u8,
    pub max_frame_bytes: u32,
    pub avg_bitrate: u32,
    pub sample_rate: u32,
}

fn short(what: &str) -> Error {
    Error::malformed(format!("esds: {} truncated", what))
}

/// Parse an esds payload (including its version/flags word).
pub fn parse_esds(mut data: Bytes) -> Result<EsdsConfig> {
    if data.remaining() < 5 {
        return Err(short("header"));
    }
    data.advance(4); // version/flags

    let mut config = EsdsConfig::default();

    if data.get_u8() != ES_DESCRIPTOR_TAG {
        return Err(Error::malformed("esds: missing ES descriptor"));
    }
    read_descriptor_length(&mut data).ok_or_else(|| short("ES descriptor length"))?;
    if data.remaining() < 3 {
        return Err(short("ES descriptor"));
    }
    data.advance(2); // ES_ID
    let flags = data.get_u8();
    if flags & 0x80 != 0 {
        skip(&mut data, 2, "dependsOn_ES_ID")?;
    }
    if flags & 0x40 != 0 {
        if !data.has_remaining() {
            return Err(short("URL"));
        }
        let url_len = data.get_u8() as usize;
        skip(&mut data, url_len, "URL")?;
    }
    if flags & 0x20 != 0 {
        skip(&mut data, 2, "OCR_ES_ID")?;
    }

    if !data.has_remaining() || data.get_u8() != DECODER_CONFIG_TAG {
        return Ok(config);
    }
    read_descriptor_length(&mut data).ok_or_else(|| short("decoder config length"))?;
    if data.remaining() < 13 {
        return Err(short("decoder config"));
    }
    config.object_type_indication = data.get_u8();
    data.advance(4); // streamType, upStream, bufferSizeDB
    config.max_bitrate = data.get_u32();
    config.avg_bitrate = data.get_u32();

    if !data.has_remaining() || data.get_u8() != DECODER_SPECIFIC_TAG {
        return Ok(config);
    }
    let len = read_descriptor_length(&mut data).ok_or_else(|| short("specific info length"))?;
    let len = (len as usize).min(data.remaining());
    let specific = data.split_to(len);
    if let Some((aot, rate, channels)) = parse_audio_specific_config(&specific) {
        config.audio_object_type = Some(aot);
        config.sample_rate = (rate != 0).then_some(rate);
        config.channel_config = Some(channels);
    }

    Ok(config)
}

fn skip(data: &mut Bytes, n: usize, what: &str) -> Result<()> {
    if data.remaining() < n {
        return Err(short(what));
    }
    data.advance(n);
    Ok(())
}

/// Decode (audio object type, sample rate, channel configuration).
fn parse_audio_specific_config(raw: &[u8]) -> Option<(u8, u32, u8)> {
    let mut reader = BitReader::endian(raw, BigEndian);

    let mut aot: u8 = reader.read(5).ok()?;
    if aot == 31 {
        aot = 32 + reader.read::<u8>(6).ok()?;
    }

    let index: u8 = reader.read(4).ok()?;
    let rate = if index == 0x0F {
        reader.read::<u32>(24).ok()?
    } else {
        AAC_SAMPLE_RATES[index as usize]
    };

    let channels: u8 = reader.read(4).ok()?;
    Some((aot, rate, channels))
}

/// Parse an alac configuration box payload (including its version/flags word).
pub fn parse_alac(mut data: Bytes) -> Result<AlacConfig> {
    if data.remaining() < 28 {
        return Err(Error::malformed("alac: configuration truncated"));
    }
    data.advance(4); // version/flags

    let frame_length = data.get_u32();
    data.advance(1); // compatible version
    let bit_depth = data.get_u8();
    data.advance(3); // rice parameters pb, mb, kb
    let channels = data.get_u8();
    data.advance(2); // max run
    let max_frame_bytes = data.get_u32();
    let avg_bitrate = data.get_u32();
    let sample_rate = data.get_u32();

    Ok(AlacConfig {
        frame_length,
        bit_depth,
        channels,
        max_frame_bytes,
        avg_bitrate,
        sample_rate,
    })
}
