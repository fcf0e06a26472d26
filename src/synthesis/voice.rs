//! Voice, format and request body types for the synthesis backend.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::VoiceSettingsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    #[default]
    Mp3,
    Pcm,
}

impl AudioFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Pcm => "audio/pcm",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Pcm => "pcm",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            "pcm" => Ok(AudioFormat::Pcm),
            other => Err(format!("unsupported audio format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub pitch_shift: f32,
    pub pitch_variance: f32,
    pub speed: f32,
}

impl From<&VoiceSettingsConfig> for VoiceSettings {
    fn from(config: &VoiceSettingsConfig) -> Self {
        Self {
            pitch_shift: config.pitch_shift,
            pitch_variance: config.pitch_variance,
            speed: config.speed,
        }
    }
}

/// JSON body of one streaming synthesis call.
#[derive(Debug, Serialize)]
pub struct SynthesisRequest<'a> {
    pub text: &'a str,
    pub language: &'a str,
    pub style: &'a str,
    pub output_format: AudioFormat,
    pub voice_settings: VoiceSettings,
    pub include_phonemes: bool,
}
