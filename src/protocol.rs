use bytes::Buf;
use tracing::debug;

use crate::{
    types::{SampleFields, SampleSource, TrainerSample},
    FTMS_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    INDOOR_BIKE_DATA_UUID,
};

/// Minimum Indoor Bike Data frame: flags (2) + instantaneous speed (2)
pub const INDOOR_BIKE_DATA_MIN_LEN: usize = 4;

/// Minimum Heart Rate Measurement frame: flags (1) + 8-bit value (1)
pub const HEART_RATE_MIN_LEN: usize = 2;

/// Indoor Bike Data flags from the first 16 bits of a frame
///
/// Bit layout defined by the Bluetooth SIG for Indoor Bike Data. Each set bit
/// announces an optional field; fields follow in bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFlags(u16);

impl FrameFlags {
    /// More data follows in another frame
    pub const MORE_DATA: u16 = 0x0001;
    /// Average speed present (2 bytes)
    pub const AVERAGE_SPEED: u16 = 0x0002;
    /// Instantaneous cadence present (2 bytes, 0.5 RPM)
    pub const INSTANTANEOUS_CADENCE: u16 = 0x0004;
    /// Average cadence present (2 bytes)
    pub const AVERAGE_CADENCE: u16 = 0x0008;
    /// Total distance present (3 bytes, meters)
    pub const TOTAL_DISTANCE: u16 = 0x0010;
    /// Resistance level present (sint16)
    pub const RESISTANCE_LEVEL: u16 = 0x0020;
    /// Instantaneous power present (sint16, watts)
    pub const INSTANTANEOUS_POWER: u16 = 0x0040;
    /// Average power present (2 bytes)
    pub const AVERAGE_POWER: u16 = 0x0080;
    /// Expended energy present (total uint16 + per-hour uint16)
    pub const EXPENDED_ENERGY: u16 = 0x0100;
    /// Heart rate present (1 byte)
    pub const HEART_RATE: u16 = 0x0200;
    /// Metabolic equivalent present (1 byte)
    pub const METABOLIC_EQUIVALENT: u16 = 0x0400;
    /// Elapsed time present (uint16, seconds)
    pub const ELAPSED_TIME: u16 = 0x0800;
    /// Remaining time present (uint16, seconds)
    pub const REMAINING_TIME: u16 = 0x1000;

    /// Wrap raw flag bits
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw flag bits
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether the given flag bit is set
    #[must_use]
    pub const fn has(self, flag: u16) -> bool {
        self.0 & flag != 0
    }
}

/// Heart Rate Measurement flags from the first byte of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateFlags(u8);

impl HeartRateFlags {
    /// Heart rate value is uint16 rather than uint8
    pub const VALUE_U16: u8 = 0x01;
    /// Sensor contact status bits
    pub const SENSOR_CONTACT: u8 = 0x06;
    /// Energy expended field present (uint16)
    pub const ENERGY_EXPENDED: u8 = 0x08;
    /// One or more RR-interval fields present
    pub const RR_INTERVAL: u8 = 0x10;

    /// Wrap raw flag bits
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Whether the given flag bit is set
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

/// Kind of characteristic a notification arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicKind {
    /// FTMS Indoor Bike Data
    IndoorBikeData,
    /// HRS Heart Rate Measurement
    HeartRateMeasurement,
}

impl CharacteristicKind {
    /// Classify a characteristic identifier, case-insensitively
    #[must_use]
    pub fn classify(uuid: &str) -> Option<Self> {
        if uuid.eq_ignore_ascii_case(INDOOR_BIKE_DATA_UUID) {
            Some(Self::IndoorBikeData)
        } else if uuid.eq_ignore_ascii_case(HEART_RATE_MEASUREMENT_UUID) {
            Some(Self::HeartRateMeasurement)
        } else {
            None
        }
    }

    /// Decode a frame received on this characteristic
    #[must_use]
    pub fn decode(self, data: &[u8]) -> TrainerSample {
        match self {
            Self::IndoorBikeData => decode_indoor_bike_data(data),
            Self::HeartRateMeasurement => decode_heart_rate_data(data),
        }
    }
}

/// Whether the identifier is the FTMS service (case-insensitive)
#[must_use]
pub fn is_valid_ftms_service(uuid: &str) -> bool {
    uuid.eq_ignore_ascii_case(FTMS_SERVICE_UUID)
}

/// Whether the identifier is the Heart Rate service (case-insensitive)
#[must_use]
pub fn is_valid_heart_rate_service(uuid: &str) -> bool {
    uuid.eq_ignore_ascii_case(HEART_RATE_SERVICE_UUID)
}

/// Read a field of `width` bytes only when the buffer still holds it
fn take<T>(buf: &mut &[u8], width: usize, read: impl FnOnce(&mut &[u8]) -> T) -> Option<T> {
    if buf.remaining() >= width {
        Some(read(buf))
    } else {
        None
    }
}

/// Skip a field of `width` bytes when the buffer still holds it
fn skip(buf: &mut &[u8], width: usize) {
    if buf.remaining() >= width {
        buf.advance(width);
    }
}

/// Decode an Indoor Bike Data notification
///
/// Frame layout (all little-endian):
/// - Bytes 0-1: [`FrameFlags`]
/// - Bytes 2-3: instantaneous speed (uint16, 0.01 km/h), always present
/// - Then, in flag-bit order, each optional field whose bit is set:
///   average speed (2, skipped), instantaneous cadence (uint16, 0.5 RPM),
///   average cadence (2, skipped), total distance (uint24, m),
///   resistance level (sint16), instantaneous power (sint16, W),
///   average power (2, skipped), expended energy (total uint16 kcal +
///   per-hour uint16 discarded), heart rate (uint8, BPM),
///   metabolic equivalent (1, skipped), elapsed time (uint16, s),
///   remaining time (2, skipped)
///
/// A field whose bytes are not all present keeps its default. Frames shorter
/// than [`INDOOR_BIKE_DATA_MIN_LEN`] decode to an invalid default sample.
#[must_use]
pub fn decode_indoor_bike_data(data: &[u8]) -> TrainerSample {
    let mut sample = TrainerSample {
        source: SampleSource::IndoorBikeData,
        ..TrainerSample::default()
    };

    if data.len() < INDOOR_BIKE_DATA_MIN_LEN {
        debug!("Invalid indoor bike data size: {}", data.len());
        return sample;
    }

    let mut buf = data;
    let flags = FrameFlags::from_bits(buf.get_u16_le());

    sample.speed_kmh = f64::from(buf.get_u16_le()) / 100.0;
    sample.present.insert(SampleFields::SPEED);

    if flags.has(FrameFlags::AVERAGE_SPEED) {
        skip(&mut buf, 2);
    }

    if flags.has(FrameFlags::INSTANTANEOUS_CADENCE) {
        if let Some(raw) = take(&mut buf, 2, |b| b.get_u16_le()) {
            sample.cadence_rpm = raw / 2;
            sample.present.insert(SampleFields::CADENCE);
        }
    }

    if flags.has(FrameFlags::AVERAGE_CADENCE) {
        skip(&mut buf, 2);
    }

    if flags.has(FrameFlags::TOTAL_DISTANCE) {
        if let Some(raw) = take(&mut buf, 3, |b| b.get_uint_le(3)) {
            // uint24 always fits in u32
            sample.distance_m = u32::try_from(raw).unwrap_or(u32::MAX);
            sample.present.insert(SampleFields::DISTANCE);
        }
    }

    if flags.has(FrameFlags::RESISTANCE_LEVEL) {
        if let Some(raw) = take(&mut buf, 2, |b| b.get_i16_le()) {
            sample.resistance_level = raw;
            sample.present.insert(SampleFields::RESISTANCE);
        }
    }

    if flags.has(FrameFlags::INSTANTANEOUS_POWER) {
        if let Some(raw) = take(&mut buf, 2, |b| b.get_i16_le()) {
            sample.power_watts = raw;
            sample.present.insert(SampleFields::POWER);
        }
    }

    if flags.has(FrameFlags::AVERAGE_POWER) {
        skip(&mut buf, 2);
    }

    if flags.has(FrameFlags::EXPENDED_ENERGY) {
        if let Some((total, _per_hour)) = take(&mut buf, 4, |b| (b.get_u16_le(), b.get_u16_le())) {
            sample.energy_kcal = total;
            sample.present.insert(SampleFields::ENERGY);
        }
    }

    if flags.has(FrameFlags::HEART_RATE) {
        if let Some(raw) = take(&mut buf, 1, |b| b.get_u8()) {
            sample.heart_rate_bpm = u16::from(raw);
            sample.present.insert(SampleFields::HEART_RATE);
        }
    }

    if flags.has(FrameFlags::METABOLIC_EQUIVALENT) {
        skip(&mut buf, 1);
    }

    if flags.has(FrameFlags::ELAPSED_TIME) {
        if let Some(raw) = take(&mut buf, 2, |b| b.get_u16_le()) {
            sample.elapsed_time_s = raw;
            sample.present.insert(SampleFields::ELAPSED_TIME);
        }
    }

    if flags.has(FrameFlags::REMAINING_TIME) {
        skip(&mut buf, 2);
    }

    sample.valid = true;
    sample
}

/// Decode a Heart Rate Measurement notification
///
/// Byte 0 holds [`HeartRateFlags`]; bit 0 selects a uint8 or uint16 heart
/// rate value. Energy-expended and RR-interval fields are recognized by their
/// flags but not extracted. Frames shorter than [`HEART_RATE_MIN_LEN`] decode to
/// an invalid default sample.
#[must_use]
pub fn decode_heart_rate_data(data: &[u8]) -> TrainerSample {
    let mut sample = TrainerSample {
        source: SampleSource::HeartRate,
        ..TrainerSample::default()
    };

    if data.len() < HEART_RATE_MIN_LEN {
        debug!("Invalid heart rate data size: {}", data.len());
        return sample;
    }

    let mut buf = data;
    let flags = HeartRateFlags::from_bits(buf.get_u8());

    let heart_rate = if flags.has(HeartRateFlags::VALUE_U16) {
        take(&mut buf, 2, |b| b.get_u16_le())
    } else {
        take(&mut buf, 1, |b| u16::from(b.get_u8()))
    };

    if let Some(bpm) = heart_rate {
        sample.heart_rate_bpm = bpm;
        sample.present.insert(SampleFields::HEART_RATE);
    }

    if flags.has(HeartRateFlags::RR_INTERVAL) {
        debug!(
            "Heart rate frame carries RR intervals ({} trailing bytes), not extracted",
            buf.remaining()
        );
    }

    sample.valid = true;
    sample
}
