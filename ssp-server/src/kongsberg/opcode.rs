use serde::{Deserialize, Serialize};

/// Kongsberg EM datagram type, byte 1 of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum KmOpcode {
    PuId = 0x30,
    PuStatus = 0x31,
    Attitude = 0x41,
    Bist = 0x42,
    Clock = 0x43,
    Depth = 0x44,
    SurfaceSoundSpeed = 0x47,
    Heading = 0x48,
    InstallationStart = 0x49,
    RawRangeAngle78 = 0x4E,
    Position = 0x50,
    Runtime = 0x52,
    SeabedImage = 0x53,
    SoundSpeedProfile = 0x55,
    SvpInput = 0x57,
    Xyz88 = 0x58,
    SeabedImage89 = 0x59,
    RawBeamAngle = 0x66,
    InstallationStop = 0x69,
    WaterColumn = 0x6B,
    NetworkAttitude = 0x6E,
}

impl KmOpcode {
    pub const ALL: [KmOpcode; 21] = [
        Self::PuId,
        Self::PuStatus,
        Self::Attitude,
        Self::Bist,
        Self::Clock,
        Self::Depth,
        Self::SurfaceSoundSpeed,
        Self::Heading,
        Self::InstallationStart,
        Self::RawRangeAngle78,
        Self::Position,
        Self::Runtime,
        Self::SeabedImage,
        Self::SoundSpeedProfile,
        Self::SvpInput,
        Self::Xyz88,
        Self::SeabedImage89,
        Self::RawBeamAngle,
        Self::InstallationStop,
        Self::WaterColumn,
        Self::NetworkAttitude,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == v)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PuId => "PU Id output",
            Self::PuStatus => "PU Status",
            Self::Attitude => "Attitude",
            Self::Bist => "BIST Output",
            Self::Clock => "Clock",
            Self::Depth => "Depth",
            Self::SurfaceSoundSpeed => "Surface Sound Speed",
            Self::Heading => "Heading",
            Self::InstallationStart => "Installation Parameters (start)",
            Self::RawRangeAngle78 => "Raw Range and Angle (78)",
            Self::Position => "Position",
            Self::Runtime => "Runtime Parameters",
            Self::SeabedImage => "Seabed Image",
            Self::SoundSpeedProfile => "Sound Speed Profile (new)",
            Self::SvpInput => "SVP Input",
            Self::Xyz88 => "XYZ (88)",
            Self::SeabedImage89 => "Seabed Imagery (89)",
            Self::RawBeamAngle => "Raw Beam and Angle (new)",
            Self::InstallationStop => "Installation Parameters (stop)",
            Self::WaterColumn => "Watercolumn",
            Self::NetworkAttitude => "Network Attitude Velocity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_back_to_opcodes() {
        for op in KmOpcode::ALL {
            assert_eq!(KmOpcode::from_u8(op.code()), Some(op));
        }
        assert_eq!(KmOpcode::from_u8(b'P'), Some(KmOpcode::Position));
        assert_eq!(KmOpcode::from_u8(b'U'), Some(KmOpcode::SoundSpeedProfile));
        assert_eq!(KmOpcode::from_u8(0xFF), None);
    }
}
