use std::fmt;

/// Payload formats known to this stack, with their fixed or conventional
/// dynamic payload type numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// G.711 µ-law
    Pcmu,
    /// G.711 A-law
    Pcma,
    G722,
    /// Uncompressed 16 bit audio, stereo
    L16Stereo,
    /// Uncompressed 16 bit audio, mono
    L16Mono,
    Opus,
    H264,
    H265,
    Vp8,
    Vp9,
}

impl Codec {
    pub fn pt(self) -> u8 {
        match self {
            Codec::Pcmu => 0,
            Codec::Pcma => 8,
            Codec::G722 => 9,
            Codec::L16Stereo => 10,
            Codec::L16Mono => 11,
            Codec::Opus => 96,
            Codec::H264 => 97,
            Codec::H265 => 98,
            Codec::Vp8 => 99,
            Codec::Vp9 => 100,
        }
    }

    pub fn from_pt(pt: u8) -> Option<Codec> {
        match pt {
            0 => Some(Codec::Pcmu),
            8 => Some(Codec::Pcma),
            9 => Some(Codec::G722),
            10 => Some(Codec::L16Stereo),
            11 => Some(Codec::L16Mono),
            96 => Some(Codec::Opus),
            97 => Some(Codec::H264),
            98 => Some(Codec::H265),
            99 => Some(Codec::Vp8),
            100 => Some(Codec::Vp9),
            _ => None,
        }
    }

    /// Encoding name as used in `a=rtpmap`
    pub fn encoding_name(self) -> &'static str {
        match self {
            Codec::Pcmu => "PCMU",
            Codec::Pcma => "PCMA",
            Codec::G722 => "G722",
            Codec::L16Stereo | Codec::L16Mono => "L16",
            Codec::Opus => "opus",
            Codec::H264 => "H264",
            Codec::H265 => "H265",
            Codec::Vp8 => "VP8",
            Codec::Vp9 => "VP9",
        }
    }

    /// RTP timestamp clock rate.
    ///
    /// Note that G.722's RTP clock is 8000 Hz for historical reasons, even
    /// though it samples at 16 kHz.
    pub fn clock_rate(self) -> u32 {
        match self {
            Codec::Pcmu | Codec::Pcma | Codec::G722 => 8000,
            Codec::L16Stereo | Codec::L16Mono => 44100,
            Codec::Opus => 48000,
            Codec::H264 | Codec::H265 | Codec::Vp8 | Codec::Vp9 => 90000,
        }
    }

    pub fn channels(self) -> Option<u32> {
        match self {
            Codec::Pcmu | Codec::Pcma | Codec::G722 | Codec::L16Mono => Some(1),
            Codec::L16Stereo | Codec::Opus => Some(2),
            _ => None,
        }
    }

    pub fn is_audio(self) -> bool {
        !self.is_video()
    }

    pub fn is_video(self) -> bool {
        matches!(self, Codec::H264 | Codec::H265 | Codec::Vp8 | Codec::Vp9)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding_name())
    }
}

#[cfg(test)]
mod test {
    use super::Codec;

    #[test]
    fn pt_round_trip() {
        for codec in [
            Codec::Pcmu,
            Codec::Pcma,
            Codec::G722,
            Codec::L16Stereo,
            Codec::L16Mono,
            Codec::Opus,
            Codec::H264,
            Codec::H265,
            Codec::Vp8,
            Codec::Vp9,
        ] {
            assert_eq!(Codec::from_pt(codec.pt()), Some(codec));
        }
    }
}
