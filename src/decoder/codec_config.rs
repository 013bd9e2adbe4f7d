//! AAC codec configuration bytes
//!
//! Decoders that need explicit codec config receive an AudioSpecificConfig
//! synthesized from profile, sample rate and channel count. Bit offsets are
//! a wire-compatibility requirement.

/// AAC profiles understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    Main,
    Lc,
    Ssr,
    Ltp,
    /// HE-AAC (SBR)
    He,
    /// HE-AAC v2 (SBR + parametric stereo)
    HePs,
}

impl AacProfile {
    /// Map the engine's profile number; unknown values fall back to LC
    pub fn from_raw(value: i32) -> Self {
        match value {
            1 => AacProfile::Main,
            3 => AacProfile::Ssr,
            4 => AacProfile::Ltp,
            5 => AacProfile::He,
            29 => AacProfile::HePs,
            _ => AacProfile::Lc,
        }
    }
}

/// Explicit SBR signalling for HE profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbrExtension {
    /// Output sample rate after SBR
    pub sample_rate: u32,
    /// Underlying core object type (2 for LC)
    pub object_type: u8,
}

/// Sampling frequency index; unknown rates map to 4 (44100 Hz)
pub fn sampling_frequency_index(sample_rate: u32) -> u8 {
    match sample_rate {
        96000 => 0,
        88200 => 1,
        64000 => 2,
        48000 => 3,
        44100 => 4,
        32000 => 5,
        24000 => 6,
        22050 => 7,
        16000 => 8,
        12000 => 9,
        11025 => 10,
        8000 => 11,
        7350 => 12,
        _ => 4,
    }
}

/// Audio object type written into the config; only LC, HE and HE-PS are
/// signalled, everything else is sent as LC
pub fn profile_to_object_type(profile: AacProfile) -> u8 {
    match profile {
        AacProfile::Lc => 2,
        AacProfile::He => 5,
        AacProfile::HePs => 29,
        _ => 2,
    }
}

/// Build the AudioSpecificConfig bytes
///
/// Without an extension the layout is two bytes:
/// `aot(5) | sfi(4) | channels(4) | 000`.
/// With an extension it is three bytes:
/// `aot(5) | sfi(4) | channels(4) | ext_sfi(4) | ext_aot(5) | 00`.
pub fn audio_specific_config(
    profile: AacProfile,
    sample_rate: u32,
    channels: u16,
    extension: Option<SbrExtension>,
) -> Vec<u8> {
    let aot = profile_to_object_type(profile);
    let sfi = sampling_frequency_index(sample_rate);
    let ch = (channels & 0x0F) as u8;

    let byte0 = (aot << 3) | (sfi >> 1);
    let byte1 = ((sfi & 0x01) << 7) | (ch << 3);

    match extension {
        None => vec![byte0, byte1],
        Some(ext) => {
            let esfi = sampling_frequency_index(ext.sample_rate);
            let ext_aot = ext.object_type & 0x1F;
            vec![
                byte0,
                byte1 | (esfi >> 1),
                ((esfi & 0x01) << 7) | (ext_aot << 2),
            ]
        }
    }
}
