//! Audio targets the encoder knows how to produce.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShrinkrayError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Flac,
    PcmS16le,
    Opus,
    FdkAac,
    Mp3,
    Mp2,
}

impl AudioCodec {
    /// Encoder name as ffmpeg expects it after `-c:a`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            AudioCodec::Flac => "flac",
            AudioCodec::PcmS16le => "pcm_s16le",
            AudioCodec::Opus => "libopus",
            AudioCodec::FdkAac => "libfdk_aac",
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Mp2 => "mp2",
        }
    }

    pub fn is_lossless(self) -> bool {
        matches!(self, AudioCodec::Flac | AudioCodec::PcmS16le)
    }

    /// ffmpeg audio arguments for this codec, excluding input and output.
    pub fn encode_args(self, bitrate_kbps: u32, use_vbr: bool) -> Vec<String> {
        let mut args = vec!["-c:a".to_string(), self.ffmpeg_name().to_string()];
        match self {
            AudioCodec::Flac | AudioCodec::PcmS16le => return args,
            AudioCodec::Opus if use_vbr => args.extend(["-vbr".to_string(), "on".to_string()]),
            AudioCodec::FdkAac => args.extend(["-profile:a".to_string(), "aac_he_v2".to_string()]),
            _ => {}
        }
        args.extend(["-b:a".to_string(), format!("{bitrate_kbps}k")]);
        args
    }
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// One supported output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub extension: &'static str,
    pub codec: AudioCodec,
    pub description: &'static str,
}

impl AudioFormat {
    pub fn is_lossless(&self) -> bool {
        self.codec.is_lossless()
    }
}

pub const SUPPORTED_AUDIO_FORMATS: &[AudioFormat] = &[
    AudioFormat {
        extension: "flac",
        codec: AudioCodec::Flac,
        description: "FLAC (lossless, larger size, no quality loss)",
    },
    AudioFormat {
        extension: "m4a",
        codec: AudioCodec::FdkAac,
        description: "M4A (HE-AAC). Good quality, smaller than MP3",
    },
    AudioFormat {
        extension: "mp3",
        codec: AudioCodec::Mp3,
        description: "MP3 (older standard, decent quality, bigger than AAC/Opus)",
    },
    AudioFormat {
        extension: "mp4",
        codec: AudioCodec::FdkAac,
        description: "MP4 container with AAC audio, similar to M4A",
    },
    AudioFormat {
        extension: "mpeg",
        codec: AudioCodec::Mp2,
        description: "MPEG container with MP2 audio, usually bigger",
    },
    AudioFormat {
        extension: "mpga",
        codec: AudioCodec::Mp3,
        description: "MPEG-1/2 audio, similar to MP3",
    },
    AudioFormat {
        extension: "oga",
        codec: AudioCodec::Opus,
        description: "Ogg audio with Opus, small files",
    },
    AudioFormat {
        extension: "ogg",
        codec: AudioCodec::Opus,
        description: "Ogg container with Opus, very good for minimal size",
    },
    AudioFormat {
        extension: "wav",
        codec: AudioCodec::PcmS16le,
        description: "WAV (uncompressed PCM), huge size, no quality loss",
    },
    AudioFormat {
        extension: "webm",
        codec: AudioCodec::Opus,
        description: "WebM with Opus, very good for minimal size",
    },
];

/// Looks up a format by extension, case-insensitively.
pub fn audio_format(extension: &str) -> Result<AudioFormat> {
    let wanted = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    SUPPORTED_AUDIO_FORMATS
        .iter()
        .find(|f| f.extension == wanted)
        .copied()
        .ok_or_else(|| {
            ShrinkrayError::InvalidRequest(format!("unsupported audio format: {extension}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_formats_are_supported() {
        assert_eq!(SUPPORTED_AUDIO_FORMATS.len(), 10);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let fmt = audio_format(".OGG").unwrap();
        assert_eq!(fmt.codec, AudioCodec::Opus);
        assert!(!fmt.is_lossless());
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = audio_format("aiff").unwrap_err();
        assert!(matches!(err, ShrinkrayError::InvalidRequest(_)));
    }

    #[test]
    fn lossless_codecs_take_no_bitrate() {
        assert!(audio_format("wav").unwrap().is_lossless());
        assert_eq!(AudioCodec::Flac.encode_args(96, true), vec!["-c:a", "flac"]);
    }

    #[test]
    fn opus_args_with_vbr() {
        assert_eq!(
            AudioCodec::Opus.encode_args(64, true),
            vec!["-c:a", "libopus", "-vbr", "on", "-b:a", "64k"]
        );
        assert_eq!(
            AudioCodec::Opus.encode_args(64, false),
            vec!["-c:a", "libopus", "-b:a", "64k"]
        );
    }

    #[test]
    fn fdk_aac_uses_he_v2_profile() {
        assert_eq!(
            AudioCodec::FdkAac.encode_args(48, false),
            vec!["-c:a", "libfdk_aac", "-profile:a", "aac_he_v2", "-b:a", "48k"]
        );
    }
}
