//! Detection of HEIF decoding support in the installed ffmpeg

use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, info};

const NOT_INSTALLED: &str = "ffmpeg is not installed. HEIF/HEIC files cannot be displayed. \
Install ffmpeg (https://ffmpeg.org) to enable HEIF support.";

const LIST_UNCHECKED: &str = "ffmpeg is installed but its decoder list could not be checked. \
HEIF/HEIC files may not display correctly.";

const NO_HEVC: &str = "ffmpeg is installed but lacks HEVC/HEIF decoder support. \
HEIF/HEIC files cannot be displayed. Reinstall ffmpeg with HEIF support \
(e.g. 'brew install ffmpeg' on macOS or install libheif/libde265).";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderCapability {
    pub available: bool,
    pub full_support: bool,
    /// User-facing explanation whenever support is not complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DecoderCapability {
    pub fn is_fully_supported(&self) -> bool {
        self.available && self.full_support
    }

    fn unavailable() -> Self {
        Self {
            available: false,
            full_support: false,
            message: Some(NOT_INSTALLED.to_string()),
        }
    }

    fn partial(message: &str) -> Self {
        Self {
            available: true,
            full_support: false,
            message: Some(message.to_string()),
        }
    }

    fn full() -> Self {
        Self {
            available: true,
            full_support: true,
            message: None,
        }
    }
}

/// Computes the decoder capability once and hands out the cached answer
#[derive(Debug)]
pub struct DecoderProbe {
    ffmpeg: String,
    capability: OnceLock<DecoderCapability>,
}

impl DecoderProbe {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            capability: OnceLock::new(),
        }
    }

    /// A probe with a predetermined answer; nothing is spawned
    pub fn with_capability(capability: DecoderCapability) -> Self {
        let probe = Self::new(String::new());
        let _ = probe.capability.set(capability);
        probe
    }

    pub fn capability(&self) -> &DecoderCapability {
        self.capability.get_or_init(|| {
            let capability = probe_ffmpeg(&self.ffmpeg);
            info!(
                available = capability.available,
                full_support = capability.full_support,
                "probed HEIF decoder support"
            );
            capability
        })
    }
}

/// Run `<ffmpeg> -decoders` and classify the result
pub fn probe_ffmpeg(ffmpeg: &str) -> DecoderCapability {
    match Command::new(ffmpeg).arg("-decoders").output() {
        Err(e) => {
            debug!(program = ffmpeg, error = %e, "failed to spawn ffmpeg");
            DecoderCapability::unavailable()
        }
        Ok(output) if !output.status.success() => {
            debug!(program = ffmpeg, status = %output.status, "ffmpeg -decoders exited with failure");
            DecoderCapability::partial(LIST_UNCHECKED)
        }
        Ok(output) => classify_decoder_list(&String::from_utf8_lossy(&output.stdout)),
    }
}

/// Full support requires an HEVC decoder in ffmpeg's decoder list
pub fn classify_decoder_list(list: &str) -> DecoderCapability {
    if list.contains("hevc") {
        DecoderCapability::full()
    } else {
        DecoderCapability::partial(NO_HEVC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_unavailable() {
        let probe = DecoderProbe::new("unterlumen-test-no-such-ffmpeg");
        let capability = probe.capability();
        assert!(!capability.available);
        assert!(!capability.is_fully_supported());
        assert!(capability.message.as_deref().unwrap().contains("not installed"));
        // Memoized
        assert!(std::ptr::eq(capability, probe.capability()));
    }

    #[test]
    fn test_decoder_list_classification() {
        let listing = " V....D hevc                 HEVC (High Efficiency Video Coding)\n";
        assert!(classify_decoder_list(listing).is_fully_supported());

        let partial = classify_decoder_list(" V....D mjpeg  Motion JPEG\n");
        assert!(partial.available);
        assert!(!partial.full_support);
        assert!(partial.message.unwrap().contains("HEVC"));
    }

    #[test]
    fn test_injected_capability() {
        let probe = DecoderProbe::with_capability(DecoderCapability::full());
        assert!(probe.capability().is_fully_supported());
        assert!(probe.capability().message.is_none());
    }
}
