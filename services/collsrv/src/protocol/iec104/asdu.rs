//! ASDU codec: type identifiers, cause of transmission, information objects
//!
//! Every supported type identifier gets its own [`ObjectData`] variant with
//! the fixed field list IEC 60870-5-101 gives it, so a decoded frame is
//! fully typed and an encoded frame is byte-exact. A frame either decodes
//! completely or fails with `BadFormat`/`BadValue`; there is no partial
//! success.

use chrono::NaiveDateTime;

use super::time::{decode_cp24, decode_cp56, encode_cp24, encode_cp56, CP24_LEN, CP56_LEN};
use crate::error::{CollSrvError, Result};

/// ASDU type identifiers (monitor, control and system directions)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TypeId {
    /// M_SP_NA_1: single-point information
    SinglePoint = 1,
    /// M_SP_TA_1: single-point with CP24 time tag
    SinglePointTime24 = 2,
    /// M_DP_NA_1: double-point information
    DoublePoint = 3,
    /// M_DP_TA_1: double-point with CP24 time tag
    DoublePointTime24 = 4,
    /// M_ST_NA_1: step position
    StepPosition = 5,
    /// M_ST_TA_1: step position with CP24 time tag
    StepPositionTime24 = 6,
    /// M_BO_NA_1: 32-bit bitstring
    Bitstring32 = 7,
    /// M_BO_TA_1: 32-bit bitstring with CP24 time tag
    Bitstring32Time24 = 8,
    /// M_ME_NA_1: measured value, normalized
    MeasNormalized = 9,
    /// M_ME_TA_1: normalized with CP24 time tag
    MeasNormalizedTime24 = 10,
    /// M_ME_NB_1: measured value, scaled
    MeasScaled = 11,
    /// M_ME_TB_1: scaled with CP24 time tag
    MeasScaledTime24 = 12,
    /// M_ME_NC_1: measured value, short float
    MeasFloat = 13,
    /// M_ME_TC_1: short float with CP24 time tag
    MeasFloatTime24 = 14,
    /// M_IT_NA_1: integrated totals
    IntegratedTotals = 15,
    /// M_IT_TA_1: integrated totals with CP24 time tag
    IntegratedTotalsTime24 = 16,
    /// M_PS_NA_1: packed single-point with change detection
    PackedSinglePoint = 20,
    /// M_ME_ND_1: normalized without quality descriptor
    MeasNormalizedNoQuality = 21,
    /// M_SP_TB_1: single-point with CP56 time tag
    SinglePointTime56 = 30,
    /// M_DP_TB_1: double-point with CP56 time tag
    DoublePointTime56 = 31,
    /// M_ST_TB_1: step position with CP56 time tag
    StepPositionTime56 = 32,
    /// M_BO_TB_1: 32-bit bitstring with CP56 time tag
    Bitstring32Time56 = 33,
    /// M_ME_TD_1: normalized with CP56 time tag
    MeasNormalizedTime56 = 34,
    /// M_ME_TE_1: scaled with CP56 time tag
    MeasScaledTime56 = 35,
    /// M_ME_TF_1: short float with CP56 time tag
    MeasFloatTime56 = 36,
    /// M_IT_TB_1: integrated totals with CP56 time tag
    IntegratedTotalsTime56 = 37,
    /// M_EP_TD_1: protection equipment event with CP56 time tag
    ProtectionEventTime56 = 38,
    /// C_SC_NA_1: single command
    SingleCommand = 45,
    /// C_DC_NA_1: double command
    DoubleCommand = 46,
    /// C_RC_NA_1: regulating step command
    RegulatingCommand = 47,
    /// C_SE_NA_1: set-point command, normalized
    SetpointNormalized = 48,
    /// C_SE_NB_1: set-point command, scaled
    SetpointScaled = 49,
    /// C_SE_NC_1: set-point command, short float
    SetpointFloat = 50,
    /// C_BO_NA_1: 32-bit bitstring command
    Bitstring32Command = 51,
    /// C_SC_TA_1: single command with CP56 time tag
    SingleCommandTime56 = 58,
    /// C_DC_TA_1: double command with CP56 time tag
    DoubleCommandTime56 = 59,
    /// C_RC_TA_1: regulating step with CP56 time tag
    RegulatingCommandTime56 = 60,
    /// C_SE_TA_1: set-point normalized with CP56 time tag
    SetpointNormalizedTime56 = 61,
    /// C_SE_TB_1: set-point scaled with CP56 time tag
    SetpointScaledTime56 = 62,
    /// C_SE_TC_1: set-point float with CP56 time tag
    SetpointFloatTime56 = 63,
    /// C_BO_TA_1: 32-bit bitstring command with CP56 time tag
    Bitstring32CommandTime56 = 64,
    /// C_IC_NA_1: general interrogation command
    InterrogationCommand = 100,
    /// C_CI_NA_1: counter interrogation command
    CounterInterrogationCommand = 101,
    /// C_RD_NA_1: read command
    ReadCommand = 102,
    /// C_CS_NA_1: clock synchronization command
    ClockSyncCommand = 103,
}

impl TypeId {
    pub fn from_byte(value: u8) -> Option<Self> {
        use TypeId::*;
        Some(match value {
            1 => SinglePoint,
            2 => SinglePointTime24,
            3 => DoublePoint,
            4 => DoublePointTime24,
            5 => StepPosition,
            6 => StepPositionTime24,
            7 => Bitstring32,
            8 => Bitstring32Time24,
            9 => MeasNormalized,
            10 => MeasNormalizedTime24,
            11 => MeasScaled,
            12 => MeasScaledTime24,
            13 => MeasFloat,
            14 => MeasFloatTime24,
            15 => IntegratedTotals,
            16 => IntegratedTotalsTime24,
            20 => PackedSinglePoint,
            21 => MeasNormalizedNoQuality,
            30 => SinglePointTime56,
            31 => DoublePointTime56,
            32 => StepPositionTime56,
            33 => Bitstring32Time56,
            34 => MeasNormalizedTime56,
            35 => MeasScaledTime56,
            36 => MeasFloatTime56,
            37 => IntegratedTotalsTime56,
            38 => ProtectionEventTime56,
            45 => SingleCommand,
            46 => DoubleCommand,
            47 => RegulatingCommand,
            48 => SetpointNormalized,
            49 => SetpointScaled,
            50 => SetpointFloat,
            51 => Bitstring32Command,
            58 => SingleCommandTime56,
            59 => DoubleCommandTime56,
            60 => RegulatingCommandTime56,
            61 => SetpointNormalizedTime56,
            62 => SetpointScaledTime56,
            63 => SetpointFloatTime56,
            64 => Bitstring32CommandTime56,
            100 => InterrogationCommand,
            101 => CounterInterrogationCommand,
            102 => ReadCommand,
            103 => ClockSyncCommand,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Monitor-direction process information (1..=38)
    pub fn is_monitor(self) -> bool {
        (1..=38).contains(&(self as u8))
    }

    /// Control-direction process information (45..=64)
    pub fn is_command(self) -> bool {
        (45..=64).contains(&(self as u8))
    }

    /// Commands carrying a select/execute flag (45..=50 and 58..=63)
    pub fn has_select(self) -> bool {
        matches!(self as u8, 45..=50 | 58..=63)
    }
}

/// Cause of transmission (COT), 6-bit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Periodic,
    Background,
    Spontaneous,
    Initialized,
    Request,
    Activation,
    ActivationConfirmation,
    Deactivation,
    DeactivationConfirmation,
    ActivationTermination,
    RemoteCommand,
    LocalCommand,
    FileTransfer,
    /// Interrogated by station interrogation
    StationInterrogation,
    /// Interrogated by group 1..16 interrogation
    GroupInterrogation(u8),
    /// Requested by general counter request
    GeneralCounterRequest,
    /// Requested by group 1..4 counter request
    GroupCounterRequest(u8),
    UnknownTypeIdentification,
    UnknownCauseOfTransmission,
    UnknownCommonAddress,
    UnknownInfoObjAddress,
}

impl Cause {
    pub fn from_byte(value: u8) -> Option<Self> {
        Some(match value {
            1 => Cause::Periodic,
            2 => Cause::Background,
            3 => Cause::Spontaneous,
            4 => Cause::Initialized,
            5 => Cause::Request,
            6 => Cause::Activation,
            7 => Cause::ActivationConfirmation,
            8 => Cause::Deactivation,
            9 => Cause::DeactivationConfirmation,
            10 => Cause::ActivationTermination,
            11 => Cause::RemoteCommand,
            12 => Cause::LocalCommand,
            13 => Cause::FileTransfer,
            20 => Cause::StationInterrogation,
            21..=36 => Cause::GroupInterrogation(value - 20),
            37 => Cause::GeneralCounterRequest,
            38..=41 => Cause::GroupCounterRequest(value - 37),
            44 => Cause::UnknownTypeIdentification,
            45 => Cause::UnknownCauseOfTransmission,
            46 => Cause::UnknownCommonAddress,
            47 => Cause::UnknownInfoObjAddress,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Cause::Periodic => 1,
            Cause::Background => 2,
            Cause::Spontaneous => 3,
            Cause::Initialized => 4,
            Cause::Request => 5,
            Cause::Activation => 6,
            Cause::ActivationConfirmation => 7,
            Cause::Deactivation => 8,
            Cause::DeactivationConfirmation => 9,
            Cause::ActivationTermination => 10,
            Cause::RemoteCommand => 11,
            Cause::LocalCommand => 12,
            Cause::FileTransfer => 13,
            Cause::StationInterrogation => 20,
            Cause::GroupInterrogation(group) => 20 + group,
            Cause::GeneralCounterRequest => 37,
            Cause::GroupCounterRequest(group) => 37 + group,
            Cause::UnknownTypeIdentification => 44,
            Cause::UnknownCauseOfTransmission => 45,
            Cause::UnknownCommonAddress => 46,
            Cause::UnknownInfoObjAddress => 47,
        }
    }

    /// Causes whose data objects feed the measurement pipeline
    pub fn carries_data(self) -> bool {
        matches!(
            self,
            Cause::Spontaneous
                | Cause::StationInterrogation
                | Cause::GroupInterrogation(_)
                | Cause::GeneralCounterRequest
                | Cause::GroupCounterRequest(_)
        )
    }
}

/// Quality descriptor bits shared by the monitor-direction layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quality {
    /// IV: the value is invalid
    pub invalid: bool,
    /// NT: the value is not topical (outdated)
    pub not_topical: bool,
    /// SB: the value was substituted by an operator
    pub substituted: bool,
    /// BL: the value is blocked for transmission
    pub blocked: bool,
    /// OV: overflow (QDS layouts only)
    pub overflow: bool,
}

impl Quality {
    const IV: u8 = 0x80;
    const NT: u8 = 0x40;
    const SB: u8 = 0x20;
    const BL: u8 = 0x10;
    const OV: u8 = 0x01;

    /// Parse a QDS octet (low bit is OV)
    pub fn from_qds(byte: u8) -> Self {
        Self {
            invalid: byte & Self::IV != 0,
            not_topical: byte & Self::NT != 0,
            substituted: byte & Self::SB != 0,
            blocked: byte & Self::BL != 0,
            overflow: byte & Self::OV != 0,
        }
    }

    pub fn to_qds(self) -> u8 {
        let mut byte = 0;
        if self.invalid {
            byte |= Self::IV;
        }
        if self.not_topical {
            byte |= Self::NT;
        }
        if self.substituted {
            byte |= Self::SB;
        }
        if self.blocked {
            byte |= Self::BL;
        }
        if self.overflow {
            byte |= Self::OV;
        }
        byte
    }

    /// Parse the high nibble of a SIQ/DIQ octet (no overflow bit)
    pub fn from_flags(byte: u8) -> Self {
        Self {
            overflow: false,
            ..Self::from_qds(byte & 0xF0)
        }
    }

    pub fn to_flags(self) -> u8 {
        self.to_qds() & 0xF0
    }
}

/// Binary counter reading (BCR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterReading {
    pub value: u32,
    /// 5-bit sequence number
    pub sequence: u8,
    /// CY: counter overflow since last reading
    pub carry: bool,
    /// CA: counter was adjusted since last reading
    pub adjusted: bool,
    /// IV: the reading is invalid
    pub invalid: bool,
}

impl CounterReading {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let value = r.u32_le()?;
        let status = r.u8()?;
        Ok(Self {
            value,
            sequence: status & 0x1F,
            carry: status & 0x20 != 0,
            adjusted: status & 0x40 != 0,
            invalid: status & 0x80 != 0,
        })
    }

    fn encode(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        let mut status = self.sequence & 0x1F;
        if self.carry {
            status |= 0x20;
        }
        if self.adjusted {
            status |= 0x40;
        }
        if self.invalid {
            status |= 0x80;
        }
        out.push(status);
    }
}

/// Information element payload, one variant per type identifier
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectData {
    SinglePoint { value: bool, quality: Quality },
    SinglePointTime24 { value: bool, quality: Quality, time: NaiveDateTime },
    DoublePoint { value: u8, quality: Quality },
    DoublePointTime24 { value: u8, quality: Quality, time: NaiveDateTime },
    StepPosition { value: i8, transient: bool, quality: Quality },
    StepPositionTime24 { value: i8, transient: bool, quality: Quality, time: NaiveDateTime },
    Bitstring32 { value: u32, quality: Quality },
    Bitstring32Time24 { value: u32, quality: Quality, time: NaiveDateTime },
    MeasNormalized { value: u16, quality: Quality },
    MeasNormalizedTime24 { value: u16, quality: Quality, time: NaiveDateTime },
    MeasScaled { value: u16, quality: Quality },
    MeasScaledTime24 { value: u16, quality: Quality, time: NaiveDateTime },
    MeasFloat { value: f32, quality: Quality },
    MeasFloatTime24 { value: f32, quality: Quality, time: NaiveDateTime },
    IntegratedTotals { counter: CounterReading },
    IntegratedTotalsTime24 { counter: CounterReading, time: NaiveDateTime },
    PackedSinglePoint { status: u16, changed: u16, quality: Quality },
    MeasNormalizedNoQuality { value: u16 },
    SinglePointTime56 { value: bool, quality: Quality, time: NaiveDateTime },
    DoublePointTime56 { value: u8, quality: Quality, time: NaiveDateTime },
    StepPositionTime56 { value: i8, transient: bool, quality: Quality, time: NaiveDateTime },
    Bitstring32Time56 { value: u32, quality: Quality, time: NaiveDateTime },
    MeasNormalizedTime56 { value: u16, quality: Quality, time: NaiveDateTime },
    MeasScaledTime56 { value: u16, quality: Quality, time: NaiveDateTime },
    MeasFloatTime56 { value: f32, quality: Quality, time: NaiveDateTime },
    IntegratedTotalsTime56 { counter: CounterReading, time: NaiveDateTime },
    ProtectionEventTime56 {
        event: u8,
        quality: Quality,
        /// EI: elapsed time invalid
        elapsed_invalid: bool,
        elapsed_ms: u16,
        time: NaiveDateTime,
    },
    SingleCommand { value: bool, select: bool, qualifier: u8 },
    DoubleCommand { value: u8, select: bool, qualifier: u8 },
    RegulatingCommand { value: u8, select: bool, qualifier: u8 },
    SetpointNormalized { value: u16, select: bool, qualifier: u8 },
    SetpointScaled { value: u16, select: bool, qualifier: u8 },
    SetpointFloat { value: f32, select: bool, qualifier: u8 },
    Bitstring32Command { value: u32 },
    SingleCommandTime56 { value: bool, select: bool, qualifier: u8, time: NaiveDateTime },
    DoubleCommandTime56 { value: u8, select: bool, qualifier: u8, time: NaiveDateTime },
    RegulatingCommandTime56 { value: u8, select: bool, qualifier: u8, time: NaiveDateTime },
    SetpointNormalizedTime56 { value: u16, select: bool, qualifier: u8, time: NaiveDateTime },
    SetpointScaledTime56 { value: u16, select: bool, qualifier: u8, time: NaiveDateTime },
    SetpointFloatTime56 { value: f32, select: bool, qualifier: u8, time: NaiveDateTime },
    Bitstring32CommandTime56 { value: u32, time: NaiveDateTime },
    InterrogationCommand { qualifier: u8 },
    CounterInterrogationCommand { freeze: u8, request: u8 },
    ReadCommand,
    ClockSyncCommand { time: NaiveDateTime },
}

impl ObjectData {
    pub fn type_id(&self) -> TypeId {
        use ObjectData::*;
        match self {
            SinglePoint { .. } => TypeId::SinglePoint,
            SinglePointTime24 { .. } => TypeId::SinglePointTime24,
            DoublePoint { .. } => TypeId::DoublePoint,
            DoublePointTime24 { .. } => TypeId::DoublePointTime24,
            StepPosition { .. } => TypeId::StepPosition,
            StepPositionTime24 { .. } => TypeId::StepPositionTime24,
            Bitstring32 { .. } => TypeId::Bitstring32,
            Bitstring32Time24 { .. } => TypeId::Bitstring32Time24,
            MeasNormalized { .. } => TypeId::MeasNormalized,
            MeasNormalizedTime24 { .. } => TypeId::MeasNormalizedTime24,
            MeasScaled { .. } => TypeId::MeasScaled,
            MeasScaledTime24 { .. } => TypeId::MeasScaledTime24,
            MeasFloat { .. } => TypeId::MeasFloat,
            MeasFloatTime24 { .. } => TypeId::MeasFloatTime24,
            IntegratedTotals { .. } => TypeId::IntegratedTotals,
            IntegratedTotalsTime24 { .. } => TypeId::IntegratedTotalsTime24,
            PackedSinglePoint { .. } => TypeId::PackedSinglePoint,
            MeasNormalizedNoQuality { .. } => TypeId::MeasNormalizedNoQuality,
            SinglePointTime56 { .. } => TypeId::SinglePointTime56,
            DoublePointTime56 { .. } => TypeId::DoublePointTime56,
            StepPositionTime56 { .. } => TypeId::StepPositionTime56,
            Bitstring32Time56 { .. } => TypeId::Bitstring32Time56,
            MeasNormalizedTime56 { .. } => TypeId::MeasNormalizedTime56,
            MeasScaledTime56 { .. } => TypeId::MeasScaledTime56,
            MeasFloatTime56 { .. } => TypeId::MeasFloatTime56,
            IntegratedTotalsTime56 { .. } => TypeId::IntegratedTotalsTime56,
            ProtectionEventTime56 { .. } => TypeId::ProtectionEventTime56,
            SingleCommand { .. } => TypeId::SingleCommand,
            DoubleCommand { .. } => TypeId::DoubleCommand,
            RegulatingCommand { .. } => TypeId::RegulatingCommand,
            SetpointNormalized { .. } => TypeId::SetpointNormalized,
            SetpointScaled { .. } => TypeId::SetpointScaled,
            SetpointFloat { .. } => TypeId::SetpointFloat,
            Bitstring32Command { .. } => TypeId::Bitstring32Command,
            SingleCommandTime56 { .. } => TypeId::SingleCommandTime56,
            DoubleCommandTime56 { .. } => TypeId::DoubleCommandTime56,
            RegulatingCommandTime56 { .. } => TypeId::RegulatingCommandTime56,
            SetpointNormalizedTime56 { .. } => TypeId::SetpointNormalizedTime56,
            SetpointScaledTime56 { .. } => TypeId::SetpointScaledTime56,
            SetpointFloatTime56 { .. } => TypeId::SetpointFloatTime56,
            Bitstring32CommandTime56 { .. } => TypeId::Bitstring32CommandTime56,
            InterrogationCommand { .. } => TypeId::InterrogationCommand,
            CounterInterrogationCommand { .. } => TypeId::CounterInterrogationCommand,
            ReadCommand => TypeId::ReadCommand,
            ClockSyncCommand { .. } => TypeId::ClockSyncCommand,
        }
    }

    fn decode(type_id: TypeId, r: &mut Reader<'_>) -> Result<Self> {
        use ObjectData::*;
        Ok(match type_id {
            TypeId::SinglePoint => {
                let siq = r.u8()?;
                SinglePoint {
                    value: siq & 0x01 != 0,
                    quality: Quality::from_flags(siq),
                }
            },
            TypeId::SinglePointTime24 => {
                let siq = r.u8()?;
                SinglePointTime24 {
                    value: siq & 0x01 != 0,
                    quality: Quality::from_flags(siq),
                    time: r.cp24()?,
                }
            },
            TypeId::DoublePoint => {
                let diq = r.u8()?;
                DoublePoint {
                    value: diq & 0x03,
                    quality: Quality::from_flags(diq),
                }
            },
            TypeId::DoublePointTime24 => {
                let diq = r.u8()?;
                DoublePointTime24 {
                    value: diq & 0x03,
                    quality: Quality::from_flags(diq),
                    time: r.cp24()?,
                }
            },
            TypeId::StepPosition => {
                let vti = r.u8()?;
                StepPosition {
                    value: sign_extend_7(vti),
                    transient: vti & 0x80 != 0,
                    quality: Quality::from_qds(r.u8()?),
                }
            },
            TypeId::StepPositionTime24 => {
                let vti = r.u8()?;
                StepPositionTime24 {
                    value: sign_extend_7(vti),
                    transient: vti & 0x80 != 0,
                    quality: Quality::from_qds(r.u8()?),
                    time: r.cp24()?,
                }
            },
            TypeId::Bitstring32 => Bitstring32 {
                value: r.u32_le()?,
                quality: Quality::from_qds(r.u8()?),
            },
            TypeId::Bitstring32Time24 => Bitstring32Time24 {
                value: r.u32_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp24()?,
            },
            TypeId::MeasNormalized => MeasNormalized {
                value: r.u16_le()?,
                quality: Quality::from_qds(r.u8()?),
            },
            TypeId::MeasNormalizedTime24 => MeasNormalizedTime24 {
                value: r.u16_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp24()?,
            },
            TypeId::MeasScaled => MeasScaled {
                value: r.u16_le()?,
                quality: Quality::from_qds(r.u8()?),
            },
            TypeId::MeasScaledTime24 => MeasScaledTime24 {
                value: r.u16_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp24()?,
            },
            TypeId::MeasFloat => MeasFloat {
                value: r.f32_le()?,
                quality: Quality::from_qds(r.u8()?),
            },
            TypeId::MeasFloatTime24 => MeasFloatTime24 {
                value: r.f32_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp24()?,
            },
            TypeId::IntegratedTotals => IntegratedTotals {
                counter: CounterReading::decode(r)?,
            },
            TypeId::IntegratedTotalsTime24 => IntegratedTotalsTime24 {
                counter: CounterReading::decode(r)?,
                time: r.cp24()?,
            },
            TypeId::PackedSinglePoint => PackedSinglePoint {
                status: r.u16_le()?,
                changed: r.u16_le()?,
                quality: Quality::from_qds(r.u8()?),
            },
            TypeId::MeasNormalizedNoQuality => MeasNormalizedNoQuality { value: r.u16_le()? },
            TypeId::SinglePointTime56 => {
                let siq = r.u8()?;
                SinglePointTime56 {
                    value: siq & 0x01 != 0,
                    quality: Quality::from_flags(siq),
                    time: r.cp56()?,
                }
            },
            TypeId::DoublePointTime56 => {
                let diq = r.u8()?;
                DoublePointTime56 {
                    value: diq & 0x03,
                    quality: Quality::from_flags(diq),
                    time: r.cp56()?,
                }
            },
            TypeId::StepPositionTime56 => {
                let vti = r.u8()?;
                StepPositionTime56 {
                    value: sign_extend_7(vti),
                    transient: vti & 0x80 != 0,
                    quality: Quality::from_qds(r.u8()?),
                    time: r.cp56()?,
                }
            },
            TypeId::Bitstring32Time56 => Bitstring32Time56 {
                value: r.u32_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp56()?,
            },
            TypeId::MeasNormalizedTime56 => MeasNormalizedTime56 {
                value: r.u16_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp56()?,
            },
            TypeId::MeasScaledTime56 => MeasScaledTime56 {
                value: r.u16_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp56()?,
            },
            TypeId::MeasFloatTime56 => MeasFloatTime56 {
                value: r.f32_le()?,
                quality: Quality::from_qds(r.u8()?),
                time: r.cp56()?,
            },
            TypeId::IntegratedTotalsTime56 => IntegratedTotalsTime56 {
                counter: CounterReading::decode(r)?,
                time: r.cp56()?,
            },
            TypeId::ProtectionEventTime56 => {
                let sep = r.u8()?;
                ProtectionEventTime56 {
                    event: sep & 0x03,
                    quality: Quality::from_flags(sep),
                    elapsed_invalid: sep & 0x08 != 0,
                    elapsed_ms: r.u16_le()?,
                    time: r.cp56()?,
                }
            },
            TypeId::SingleCommand => {
                let sco = r.u8()?;
                SingleCommand {
                    value: sco & 0x01 != 0,
                    select: sco & 0x80 != 0,
                    qualifier: (sco >> 2) & 0x1F,
                }
            },
            TypeId::DoubleCommand => {
                let dco = r.u8()?;
                DoubleCommand {
                    value: dco & 0x03,
                    select: dco & 0x80 != 0,
                    qualifier: (dco >> 2) & 0x1F,
                }
            },
            TypeId::RegulatingCommand => {
                let rco = r.u8()?;
                RegulatingCommand {
                    value: rco & 0x03,
                    select: rco & 0x80 != 0,
                    qualifier: (rco >> 2) & 0x1F,
                }
            },
            TypeId::SetpointNormalized => {
                let value = r.u16_le()?;
                let qos = r.u8()?;
                SetpointNormalized {
                    value,
                    select: qos & 0x80 != 0,
                    qualifier: qos & 0x7F,
                }
            },
            TypeId::SetpointScaled => {
                let value = r.u16_le()?;
                let qos = r.u8()?;
                SetpointScaled {
                    value,
                    select: qos & 0x80 != 0,
                    qualifier: qos & 0x7F,
                }
            },
            TypeId::SetpointFloat => {
                let value = r.f32_le()?;
                let qos = r.u8()?;
                SetpointFloat {
                    value,
                    select: qos & 0x80 != 0,
                    qualifier: qos & 0x7F,
                }
            },
            TypeId::Bitstring32Command => Bitstring32Command { value: r.u32_le()? },
            TypeId::SingleCommandTime56 => {
                let sco = r.u8()?;
                SingleCommandTime56 {
                    value: sco & 0x01 != 0,
                    select: sco & 0x80 != 0,
                    qualifier: (sco >> 2) & 0x1F,
                    time: r.cp56()?,
                }
            },
            TypeId::DoubleCommandTime56 => {
                let dco = r.u8()?;
                DoubleCommandTime56 {
                    value: dco & 0x03,
                    select: dco & 0x80 != 0,
                    qualifier: (dco >> 2) & 0x1F,
                    time: r.cp56()?,
                }
            },
            TypeId::RegulatingCommandTime56 => {
                let rco = r.u8()?;
                RegulatingCommandTime56 {
                    value: rco & 0x03,
                    select: rco & 0x80 != 0,
                    qualifier: (rco >> 2) & 0x1F,
                    time: r.cp56()?,
                }
            },
            TypeId::SetpointNormalizedTime56 => {
                let value = r.u16_le()?;
                let qos = r.u8()?;
                SetpointNormalizedTime56 {
                    value,
                    select: qos & 0x80 != 0,
                    qualifier: qos & 0x7F,
                    time: r.cp56()?,
                }
            },
            TypeId::SetpointScaledTime56 => {
                let value = r.u16_le()?;
                let qos = r.u8()?;
                SetpointScaledTime56 {
                    value,
                    select: qos & 0x80 != 0,
                    qualifier: qos & 0x7F,
                    time: r.cp56()?,
                }
            },
            TypeId::SetpointFloatTime56 => {
                let value = r.f32_le()?;
                let qos = r.u8()?;
                SetpointFloatTime56 {
                    value,
                    select: qos & 0x80 != 0,
                    qualifier: qos & 0x7F,
                    time: r.cp56()?,
                }
            },
            TypeId::Bitstring32CommandTime56 => Bitstring32CommandTime56 {
                value: r.u32_le()?,
                time: r.cp56()?,
            },
            TypeId::InterrogationCommand => InterrogationCommand { qualifier: r.u8()? },
            TypeId::CounterInterrogationCommand => {
                let qcc = r.u8()?;
                CounterInterrogationCommand {
                    freeze: (qcc >> 6) & 0x03,
                    request: qcc & 0x3F,
                }
            },
            TypeId::ReadCommand => ReadCommand,
            TypeId::ClockSyncCommand => ClockSyncCommand { time: r.cp56()? },
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        use ObjectData::*;
        match self {
            SinglePoint { value, quality } => {
                out.push(quality.to_flags() | u8::from(*value));
            },
            SinglePointTime24 { value, quality, time } => {
                out.push(quality.to_flags() | u8::from(*value));
                encode_cp24(*time, out);
            },
            DoublePoint { value, quality } => {
                out.push(quality.to_flags() | (value & 0x03));
            },
            DoublePointTime24 { value, quality, time } => {
                out.push(quality.to_flags() | (value & 0x03));
                encode_cp24(*time, out);
            },
            StepPosition { value, transient, quality } => {
                out.push(vti_byte(*value, *transient));
                out.push(quality.to_qds());
            },
            StepPositionTime24 { value, transient, quality, time } => {
                out.push(vti_byte(*value, *transient));
                out.push(quality.to_qds());
                encode_cp24(*time, out);
            },
            Bitstring32 { value, quality } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
            },
            Bitstring32Time24 { value, quality, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
                encode_cp24(*time, out);
            },
            MeasNormalized { value, quality } | MeasScaled { value, quality } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
            },
            MeasNormalizedTime24 { value, quality, time }
            | MeasScaledTime24 { value, quality, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
                encode_cp24(*time, out);
            },
            MeasFloat { value, quality } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
            },
            MeasFloatTime24 { value, quality, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
                encode_cp24(*time, out);
            },
            IntegratedTotals { counter } => counter.encode(out),
            IntegratedTotalsTime24 { counter, time } => {
                counter.encode(out);
                encode_cp24(*time, out);
            },
            PackedSinglePoint { status, changed, quality } => {
                out.extend_from_slice(&status.to_le_bytes());
                out.extend_from_slice(&changed.to_le_bytes());
                out.push(quality.to_qds());
            },
            MeasNormalizedNoQuality { value } => {
                out.extend_from_slice(&value.to_le_bytes());
            },
            SinglePointTime56 { value, quality, time } => {
                out.push(quality.to_flags() | u8::from(*value));
                encode_cp56(*time, out);
            },
            DoublePointTime56 { value, quality, time } => {
                out.push(quality.to_flags() | (value & 0x03));
                encode_cp56(*time, out);
            },
            StepPositionTime56 { value, transient, quality, time } => {
                out.push(vti_byte(*value, *transient));
                out.push(quality.to_qds());
                encode_cp56(*time, out);
            },
            Bitstring32Time56 { value, quality, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
                encode_cp56(*time, out);
            },
            MeasNormalizedTime56 { value, quality, time }
            | MeasScaledTime56 { value, quality, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
                encode_cp56(*time, out);
            },
            MeasFloatTime56 { value, quality, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(quality.to_qds());
                encode_cp56(*time, out);
            },
            IntegratedTotalsTime56 { counter, time } => {
                counter.encode(out);
                encode_cp56(*time, out);
            },
            ProtectionEventTime56 { event, quality, elapsed_invalid, elapsed_ms, time } => {
                let mut sep = quality.to_flags() | (event & 0x03);
                if *elapsed_invalid {
                    sep |= 0x08;
                }
                out.push(sep);
                out.extend_from_slice(&elapsed_ms.to_le_bytes());
                encode_cp56(*time, out);
            },
            SingleCommand { value, select, qualifier } => {
                out.push(sco_byte(u8::from(*value), *select, *qualifier));
            },
            DoubleCommand { value, select, qualifier }
            | RegulatingCommand { value, select, qualifier } => {
                out.push(sco_byte(value & 0x03, *select, *qualifier));
            },
            SetpointNormalized { value, select, qualifier }
            | SetpointScaled { value, select, qualifier } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(qos_byte(*select, *qualifier));
            },
            SetpointFloat { value, select, qualifier } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(qos_byte(*select, *qualifier));
            },
            Bitstring32Command { value } => {
                out.extend_from_slice(&value.to_le_bytes());
            },
            SingleCommandTime56 { value, select, qualifier, time } => {
                out.push(sco_byte(u8::from(*value), *select, *qualifier));
                encode_cp56(*time, out);
            },
            DoubleCommandTime56 { value, select, qualifier, time }
            | RegulatingCommandTime56 { value, select, qualifier, time } => {
                out.push(sco_byte(value & 0x03, *select, *qualifier));
                encode_cp56(*time, out);
            },
            SetpointNormalizedTime56 { value, select, qualifier, time }
            | SetpointScaledTime56 { value, select, qualifier, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(qos_byte(*select, *qualifier));
                encode_cp56(*time, out);
            },
            SetpointFloatTime56 { value, select, qualifier, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                out.push(qos_byte(*select, *qualifier));
                encode_cp56(*time, out);
            },
            Bitstring32CommandTime56 { value, time } => {
                out.extend_from_slice(&value.to_le_bytes());
                encode_cp56(*time, out);
            },
            InterrogationCommand { qualifier } => out.push(*qualifier),
            CounterInterrogationCommand { freeze, request } => {
                out.push(((freeze & 0x03) << 6) | (request & 0x3F));
            },
            ReadCommand => {},
            ClockSyncCommand { time } => encode_cp56(*time, out),
        }
    }

    /// Numeric rendition used by the measurement pipeline
    pub fn raw_value(&self) -> f64 {
        use ObjectData::*;
        match self {
            SinglePoint { value, .. }
            | SinglePointTime24 { value, .. }
            | SinglePointTime56 { value, .. }
            | SingleCommand { value, .. }
            | SingleCommandTime56 { value, .. } => f64::from(u8::from(*value)),
            DoublePoint { value, .. }
            | DoublePointTime24 { value, .. }
            | DoublePointTime56 { value, .. }
            | DoubleCommand { value, .. }
            | DoubleCommandTime56 { value, .. }
            | RegulatingCommand { value, .. }
            | RegulatingCommandTime56 { value, .. }
            | ProtectionEventTime56 { event: value, .. } => f64::from(*value),
            StepPosition { value, .. }
            | StepPositionTime24 { value, .. }
            | StepPositionTime56 { value, .. } => f64::from(*value),
            Bitstring32 { value, .. }
            | Bitstring32Time24 { value, .. }
            | Bitstring32Time56 { value, .. }
            | Bitstring32Command { value }
            | Bitstring32CommandTime56 { value, .. } => f64::from(*value),
            MeasNormalized { value, .. }
            | MeasNormalizedTime24 { value, .. }
            | MeasNormalizedTime56 { value, .. }
            | MeasScaled { value, .. }
            | MeasScaledTime24 { value, .. }
            | MeasScaledTime56 { value, .. }
            | MeasNormalizedNoQuality { value }
            | SetpointNormalized { value, .. }
            | SetpointNormalizedTime56 { value, .. }
            | SetpointScaled { value, .. }
            | SetpointScaledTime56 { value, .. }
            | PackedSinglePoint { status: value, .. } => f64::from(*value),
            MeasFloat { value, .. }
            | MeasFloatTime24 { value, .. }
            | MeasFloatTime56 { value, .. }
            | SetpointFloat { value, .. }
            | SetpointFloatTime56 { value, .. } => f64::from(*value),
            IntegratedTotals { counter }
            | IntegratedTotalsTime24 { counter, .. }
            | IntegratedTotalsTime56 { counter, .. } => f64::from(counter.value),
            InterrogationCommand { qualifier } => f64::from(*qualifier),
            CounterInterrogationCommand { request, .. } => f64::from(*request),
            ReadCommand | ClockSyncCommand { .. } => 0.0,
        }
    }

    /// Time tag carried by the element, when present
    pub fn time(&self) -> Option<NaiveDateTime> {
        use ObjectData::*;
        match self {
            SinglePointTime24 { time, .. }
            | DoublePointTime24 { time, .. }
            | StepPositionTime24 { time, .. }
            | Bitstring32Time24 { time, .. }
            | MeasNormalizedTime24 { time, .. }
            | MeasScaledTime24 { time, .. }
            | MeasFloatTime24 { time, .. }
            | IntegratedTotalsTime24 { time, .. }
            | SinglePointTime56 { time, .. }
            | DoublePointTime56 { time, .. }
            | StepPositionTime56 { time, .. }
            | Bitstring32Time56 { time, .. }
            | MeasNormalizedTime56 { time, .. }
            | MeasScaledTime56 { time, .. }
            | MeasFloatTime56 { time, .. }
            | IntegratedTotalsTime56 { time, .. }
            | ProtectionEventTime56 { time, .. }
            | SingleCommandTime56 { time, .. }
            | DoubleCommandTime56 { time, .. }
            | RegulatingCommandTime56 { time, .. }
            | SetpointNormalizedTime56 { time, .. }
            | SetpointScaledTime56 { time, .. }
            | SetpointFloatTime56 { time, .. }
            | Bitstring32CommandTime56 { time, .. }
            | ClockSyncCommand { time } => Some(*time),
            _ => None,
        }
    }

    /// Quality descriptor, for layouts that carry one
    pub fn quality(&self) -> Option<Quality> {
        use ObjectData::*;
        match self {
            SinglePoint { quality, .. }
            | SinglePointTime24 { quality, .. }
            | SinglePointTime56 { quality, .. }
            | DoublePoint { quality, .. }
            | DoublePointTime24 { quality, .. }
            | DoublePointTime56 { quality, .. }
            | StepPosition { quality, .. }
            | StepPositionTime24 { quality, .. }
            | StepPositionTime56 { quality, .. }
            | Bitstring32 { quality, .. }
            | Bitstring32Time24 { quality, .. }
            | Bitstring32Time56 { quality, .. }
            | MeasNormalized { quality, .. }
            | MeasNormalizedTime24 { quality, .. }
            | MeasNormalizedTime56 { quality, .. }
            | MeasScaled { quality, .. }
            | MeasScaledTime24 { quality, .. }
            | MeasScaledTime56 { quality, .. }
            | MeasFloat { quality, .. }
            | MeasFloatTime24 { quality, .. }
            | MeasFloatTime56 { quality, .. }
            | PackedSinglePoint { quality, .. }
            | ProtectionEventTime56 { quality, .. } => Some(*quality),
            IntegratedTotals { counter }
            | IntegratedTotalsTime24 { counter, .. }
            | IntegratedTotalsTime56 { counter, .. } => Some(Quality {
                invalid: counter.invalid,
                ..Quality::default()
            }),
            _ => None,
        }
    }

    /// IV bit; quality-invalid objects are discarded by the pipeline
    pub fn is_invalid(&self) -> bool {
        self.quality().map(|q| q.invalid).unwrap_or(false)
    }

    /// Select/execute flag for command layouts that carry one
    pub fn select(&self) -> Option<bool> {
        use ObjectData::*;
        match self {
            SingleCommand { select, .. }
            | DoubleCommand { select, .. }
            | RegulatingCommand { select, .. }
            | SetpointNormalized { select, .. }
            | SetpointScaled { select, .. }
            | SetpointFloat { select, .. }
            | SingleCommandTime56 { select, .. }
            | DoubleCommandTime56 { select, .. }
            | RegulatingCommandTime56 { select, .. }
            | SetpointNormalizedTime56 { select, .. }
            | SetpointScaledTime56 { select, .. }
            | SetpointFloatTime56 { select, .. } => Some(*select),
            _ => None,
        }
    }

    /// Flip the select/execute flag in place (no-op for other layouts)
    pub fn set_select(&mut self, selected: bool) {
        use ObjectData::*;
        match self {
            SingleCommand { select, .. }
            | DoubleCommand { select, .. }
            | RegulatingCommand { select, .. }
            | SetpointNormalized { select, .. }
            | SetpointScaled { select, .. }
            | SetpointFloat { select, .. }
            | SingleCommandTime56 { select, .. }
            | DoubleCommandTime56 { select, .. }
            | RegulatingCommandTime56 { select, .. }
            | SetpointNormalizedTime56 { select, .. }
            | SetpointScaledTime56 { select, .. }
            | SetpointFloatTime56 { select, .. } => *select = selected,
            _ => {},
        }
    }

    /// Build a control element of the binding's type carrying `value`
    ///
    /// Used for select-and-execute: the first transmission goes out with
    /// `select = true`, the execute repetition with `select = false`.
    pub fn command(type_id: TypeId, value: f64, select: bool, now: NaiveDateTime) -> Result<Self> {
        use ObjectData::*;
        let qualifier = 0;
        Ok(match type_id {
            TypeId::SingleCommand => SingleCommand {
                value: value != 0.0,
                select,
                qualifier,
            },
            TypeId::DoubleCommand => DoubleCommand {
                value: value as u8 & 0x03,
                select,
                qualifier,
            },
            TypeId::RegulatingCommand => RegulatingCommand {
                value: value as u8 & 0x03,
                select,
                qualifier,
            },
            TypeId::SetpointNormalized => SetpointNormalized {
                value: value as u16,
                select,
                qualifier,
            },
            TypeId::SetpointScaled => SetpointScaled {
                value: value as u16,
                select,
                qualifier,
            },
            TypeId::SetpointFloat => SetpointFloat {
                value: value as f32,
                select,
                qualifier,
            },
            TypeId::Bitstring32Command => Bitstring32Command { value: value as u32 },
            TypeId::SingleCommandTime56 => SingleCommandTime56 {
                value: value != 0.0,
                select,
                qualifier,
                time: now,
            },
            TypeId::DoubleCommandTime56 => DoubleCommandTime56 {
                value: value as u8 & 0x03,
                select,
                qualifier,
                time: now,
            },
            TypeId::RegulatingCommandTime56 => RegulatingCommandTime56 {
                value: value as u8 & 0x03,
                select,
                qualifier,
                time: now,
            },
            TypeId::SetpointNormalizedTime56 => SetpointNormalizedTime56 {
                value: value as u16,
                select,
                qualifier,
                time: now,
            },
            TypeId::SetpointScaledTime56 => SetpointScaledTime56 {
                value: value as u16,
                select,
                qualifier,
                time: now,
            },
            TypeId::SetpointFloatTime56 => SetpointFloatTime56 {
                value: value as f32,
                select,
                qualifier,
                time: now,
            },
            TypeId::Bitstring32CommandTime56 => Bitstring32CommandTime56 {
                value: value as u32,
                time: now,
            },
            other => {
                return Err(CollSrvError::Validation(format!(
                    "type {} is not a control type",
                    other.to_byte()
                )))
            },
        })
    }
}

/// One information object: a 24-bit address plus its typed element
#[derive(Debug, Clone, PartialEq)]
pub struct InfoObject {
    pub address: u32,
    pub data: ObjectData,
}

impl InfoObject {
    pub fn new(address: u32, data: ObjectData) -> Self {
        Self { address, data }
    }
}

/// Application service data unit
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    pub type_id: TypeId,
    /// SQ flag: objects occupy consecutive addresses from `start_address`
    pub sequential: bool,
    pub cause: Cause,
    /// T flag: test transmission
    pub test: bool,
    /// P/N flag: negative confirmation
    pub negative: bool,
    pub originator: u8,
    pub common_addr: u16,
    /// Meaningful only when `sequential`
    pub start_address: u32,
    pub objects: Vec<InfoObject>,
}

impl Asdu {
    /// Single-object ASDU, the common case for commands
    pub fn single(type_id: TypeId, cause: Cause, common_addr: u16, object: InfoObject) -> Self {
        Self {
            type_id,
            sequential: false,
            cause,
            test: false,
            negative: false,
            originator: 0,
            common_addr,
            start_address: 0,
            objects: vec![object],
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.objects.len() > 0x7F {
            return Err(CollSrvError::bad_value(format!(
                "too many information objects: {}",
                self.objects.len()
            )));
        }
        out.push(self.type_id.to_byte());
        out.push((u8::from(self.sequential) << 7) | self.objects.len() as u8);
        let mut cot = self.cause.to_byte() & 0x3F;
        if self.negative {
            cot |= 0x40;
        }
        if self.test {
            cot |= 0x80;
        }
        out.push(cot);
        out.push(self.originator);
        out.extend_from_slice(&self.common_addr.to_le_bytes());
        if self.sequential {
            push_addr(out, self.start_address);
            for object in &self.objects {
                object.data.encode(out);
            }
        } else {
            for object in &self.objects {
                push_addr(out, object.address);
                object.data.encode(out);
            }
        }
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = Reader::new(buf);
        let type_byte = r.u8()?;
        let type_id = TypeId::from_byte(type_byte)
            .ok_or_else(|| CollSrvError::bad_format(format!("unknown type id {type_byte}")))?;
        let vsq = r.u8()?;
        let sequential = vsq & 0x80 != 0;
        let count = (vsq & 0x7F) as usize;
        let cot = r.u8()?;
        let cause = Cause::from_byte(cot & 0x3F)
            .ok_or_else(|| CollSrvError::bad_format(format!("unknown cause {}", cot & 0x3F)))?;
        let originator = r.u8()?;
        let common_addr = r.u16_le()?;
        let start_address = if sequential { r.addr()? } else { 0 };

        let mut objects = Vec::with_capacity(count);
        for idx in 0..count {
            let address = if sequential {
                start_address + idx as u32
            } else {
                r.addr()?
            };
            let data = ObjectData::decode(type_id, &mut r)?;
            objects.push(InfoObject { address, data });
        }
        if !r.is_empty() {
            return Err(CollSrvError::bad_format(format!(
                "{} trailing bytes after last information object",
                r.remaining()
            )));
        }
        Ok(Self {
            type_id,
            sequential,
            cause,
            test: cot & 0x80 != 0,
            negative: cot & 0x40 != 0,
            originator,
            common_addr,
            start_address,
            objects,
        })
    }
}

fn sign_extend_7(vti: u8) -> i8 {
    let raw = vti & 0x7F;
    if raw & 0x40 != 0 {
        (raw | 0x80) as i8
    } else {
        raw as i8
    }
}

fn vti_byte(value: i8, transient: bool) -> u8 {
    (value as u8 & 0x7F) | (u8::from(transient) << 7)
}

fn sco_byte(value: u8, select: bool, qualifier: u8) -> u8 {
    value | ((qualifier & 0x1F) << 2) | (u8::from(select) << 7)
}

fn qos_byte(select: bool, qualifier: u8) -> u8 {
    (qualifier & 0x7F) | (u8::from(select) << 7)
}

fn push_addr(out: &mut Vec<u8>, address: u32) {
    out.push(address as u8);
    out.push((address >> 8) as u8);
    out.push((address >> 16) as u8);
}

/// Bounds-checked byte reader; truncation is always `BadFormat`
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CollSrvError::bad_format(format!(
                "truncated ASDU: wanted {n} bytes, {} left",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32_le(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// 24-bit little-endian information object address
    fn addr(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16))
    }

    fn cp24(&mut self) -> Result<NaiveDateTime> {
        let b = self.take(CP24_LEN)?;
        decode_cp24(b)
    }

    fn cp56(&mut self) -> Result<NaiveDateTime> {
        let b = self.take(CP56_LEN)?;
        decode_cp56(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2005, 11, 26)
            .unwrap()
            .and_hms_milli_opt(16, 28, 14, 765)
            .unwrap()
    }

    fn round_trip(asdu: &Asdu) -> Asdu {
        let mut buf = Vec::new();
        asdu.encode(&mut buf).unwrap();
        let decoded = Asdu::decode(&buf).unwrap();
        let mut rebuilt = Vec::new();
        decoded.encode(&mut rebuilt).unwrap();
        assert_eq!(buf, rebuilt);
        decoded
    }

    #[test]
    fn single_point_round_trip() {
        let asdu = Asdu::single(
            TypeId::SinglePoint,
            Cause::Spontaneous,
            1,
            InfoObject::new(
                5,
                ObjectData::SinglePoint {
                    value: true,
                    quality: Quality::default(),
                },
            ),
        );
        assert_eq!(round_trip(&asdu), asdu);
    }

    #[test]
    fn float_measurement_with_cp56_round_trip() {
        let asdu = Asdu::single(
            TypeId::MeasFloatTime56,
            Cause::Spontaneous,
            1,
            InfoObject::new(
                0x64,
                ObjectData::MeasFloatTime56 {
                    value: 102.5,
                    quality: Quality {
                        not_topical: true,
                        ..Quality::default()
                    },
                    time: ts(),
                },
            ),
        );
        let decoded = round_trip(&asdu);
        assert_eq!(decoded.objects[0].data.time(), Some(ts()));
        assert_eq!(decoded.objects[0].data.raw_value(), 102.5);
    }

    #[test]
    fn sequential_addressing_assigns_consecutive_addresses() {
        let asdu = Asdu {
            type_id: TypeId::MeasScaled,
            sequential: true,
            cause: Cause::StationInterrogation,
            test: false,
            negative: false,
            originator: 0,
            common_addr: 1,
            start_address: 100,
            objects: (0..3)
                .map(|n| {
                    InfoObject::new(
                        100 + n,
                        ObjectData::MeasScaled {
                            value: n as u16 * 7,
                            quality: Quality::default(),
                        },
                    )
                })
                .collect(),
        };
        let decoded = round_trip(&asdu);
        let addrs: Vec<u32> = decoded.objects.iter().map(|o| o.address).collect();
        assert_eq!(addrs, vec![100, 101, 102]);
    }

    #[test]
    fn counter_reading_flags_round_trip() {
        let asdu = Asdu::single(
            TypeId::IntegratedTotals,
            Cause::GeneralCounterRequest,
            1,
            InfoObject::new(
                25811,
                ObjectData::IntegratedTotals {
                    counter: CounterReading {
                        value: 30,
                        sequence: 3,
                        carry: true,
                        adjusted: false,
                        invalid: false,
                    },
                },
            ),
        );
        assert_eq!(round_trip(&asdu), asdu);
    }

    #[test]
    fn select_flag_flips() {
        let mut data =
            ObjectData::command(TypeId::SetpointFloat, 123.4, true, ts()).unwrap();
        assert_eq!(data.select(), Some(true));
        data.set_select(false);
        assert_eq!(data.select(), Some(false));
        assert!((data.raw_value() - 123.4).abs() < 1e-4);
    }

    #[test]
    fn command_builder_rejects_monitor_types() {
        assert!(matches!(
            ObjectData::command(TypeId::MeasFloat, 1.0, true, ts()),
            Err(CollSrvError::Validation(_))
        ));
    }

    #[test]
    fn invalid_quality_detected() {
        let data = ObjectData::MeasScaled {
            value: 7,
            quality: Quality {
                invalid: true,
                ..Quality::default()
            },
        };
        assert!(data.is_invalid());
        let counter = ObjectData::IntegratedTotals {
            counter: CounterReading {
                invalid: true,
                ..CounterReading::default()
            },
        };
        assert!(counter.is_invalid());
    }

    #[test]
    fn unknown_type_id_is_bad_format() {
        // type 70 (end of initialization) is not in the supported table
        let buf = [70u8, 0x01, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            Asdu::decode(&buf),
            Err(CollSrvError::BadFormat(_))
        ));
    }

    #[test]
    fn truncated_object_is_bad_format() {
        let asdu = Asdu::single(
            TypeId::MeasFloat,
            Cause::Spontaneous,
            1,
            InfoObject::new(
                100,
                ObjectData::MeasFloat {
                    value: 1.5,
                    quality: Quality::default(),
                },
            ),
        );
        let mut buf = Vec::new();
        asdu.encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            Asdu::decode(&buf),
            Err(CollSrvError::BadFormat(_))
        ));
    }

    #[test]
    fn trailing_garbage_is_bad_format() {
        let asdu = Asdu::single(
            TypeId::ReadCommand,
            Cause::Activation,
            1,
            InfoObject::new(400, ObjectData::ReadCommand),
        );
        let mut buf = Vec::new();
        asdu.encode(&mut buf).unwrap();
        buf.push(0xFF);
        assert!(matches!(
            Asdu::decode(&buf),
            Err(CollSrvError::BadFormat(_))
        ));
    }

    #[test]
    fn step_position_sign_extension() {
        let asdu = Asdu::single(
            TypeId::StepPosition,
            Cause::Spontaneous,
            1,
            InfoObject::new(
                9,
                ObjectData::StepPosition {
                    value: -5,
                    transient: true,
                    quality: Quality::default(),
                },
            ),
        );
        let decoded = round_trip(&asdu);
        assert_eq!(
            decoded.objects[0].data,
            ObjectData::StepPosition {
                value: -5,
                transient: true,
                quality: Quality::default(),
            }
        );
    }

    #[test]
    fn negative_confirmation_flag_round_trips() {
        let mut asdu = Asdu::single(
            TypeId::InterrogationCommand,
            Cause::ActivationConfirmation,
            1,
            InfoObject::new(0, ObjectData::InterrogationCommand { qualifier: 20 }),
        );
        asdu.negative = true;
        let decoded = round_trip(&asdu);
        assert!(decoded.negative);
        assert!(!decoded.test);
    }
}
