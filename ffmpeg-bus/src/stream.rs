use std::time::Duration;

use ffmpeg_next::{Rational, codec::Parameters, format::stream};

unsafe impl Send for AvStream {}
unsafe impl Sync for AvStream {}

/// Orientation matrix stored with a video stream (`tkhd` matrix in MOV/MP4),
/// converted from 16.16 fixed point. Row-vector convention:
/// `[x' y' 1] = [x y 1] * [[a b 0] [c d 0] [tx ty 1]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMatrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl DisplayMatrix {
    pub const IDENTITY: DisplayMatrix = DisplayMatrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Parses the 9 native-endian `int32` values FFmpeg keeps in
    /// `AV_PKT_DATA_DISPLAYMATRIX` side data.
    pub fn from_side_data(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 36 {
            return None;
        }
        let mut m = [0i32; 9];
        for (slot, chunk) in m.iter_mut().zip(bytes.chunks_exact(4)) {
            *slot = i32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let fixed = |v: i32| v as f64 / 65536.0;
        Some(Self {
            a: fixed(m[0]),
            b: fixed(m[1]),
            c: fixed(m[3]),
            d: fixed(m[4]),
            tx: fixed(m[6]),
            ty: fixed(m[7]),
        })
    }
}

pub struct AvStream {
    index: usize,
    parameters: Parameters,
    time_base: Rational,
    rate: Rational,
    duration_ts: Option<i64>,
}

impl AvStream {
    pub fn index(&self) -> usize {
        self.index
    }
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }
    pub fn time_base(&self) -> Rational {
        self.time_base
    }
    pub fn rate(&self) -> Rational {
        self.rate
    }

    pub fn is_video(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Video
    }

    pub fn is_audio(&self) -> bool {
        self.parameters.medium() == ffmpeg_next::media::Type::Audio
    }

    fn raw(&self) -> &ffmpeg_next::ffi::AVCodecParameters {
        // Parameters owns a valid AVCodecParameters for its whole lifetime
        unsafe { &*(self.parameters.as_ptr() as *const ffmpeg_next::ffi::AVCodecParameters) }
    }

    pub fn width(&self) -> u32 {
        self.raw().width.max(0) as u32
    }

    pub fn height(&self) -> u32 {
        self.raw().height.max(0) as u32
    }

    pub fn sample_rate(&self) -> u32 {
        self.raw().sample_rate.max(0) as u32
    }

    pub fn channels(&self) -> u32 {
        self.raw().ch_layout.nb_channels.max(0) as u32
    }

    /// Stream duration, if the container reports one.
    pub fn duration(&self) -> Option<Duration> {
        self.duration_ts.map(|ts| ts_to_duration(ts, self.time_base))
    }

    /// Display matrix from the codec parameters' coded side data; identity when absent.
    pub fn display_matrix(&self) -> DisplayMatrix {
        let raw = self.raw();
        if raw.coded_side_data.is_null() {
            return DisplayMatrix::IDENTITY;
        }
        let entries = unsafe {
            std::slice::from_raw_parts(raw.coded_side_data, raw.nb_coded_side_data.max(0) as usize)
        };
        entries
            .iter()
            .filter(|e| {
                e.type_ == ffmpeg_next::ffi::AVPacketSideDataType::AV_PKT_DATA_DISPLAYMATRIX
                    && !e.data.is_null()
            })
            .find_map(|e| {
                let bytes = unsafe { std::slice::from_raw_parts(e.data as *const u8, e.size) };
                DisplayMatrix::from_side_data(bytes)
            })
            .unwrap_or(DisplayMatrix::IDENTITY)
    }
}

impl From<stream::Stream<'_>> for AvStream {
    fn from(stream: stream::Stream<'_>) -> Self {
        let duration = stream.duration();
        Self {
            index: stream.index(),
            parameters: stream.parameters(),
            time_base: stream.time_base(),
            rate: stream.avg_frame_rate(),
            duration_ts: if duration == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || duration < 0 {
                None
            } else {
                Some(duration)
            },
        }
    }
}

impl Clone for AvStream {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            parameters: self.parameters.clone(),
            time_base: self.time_base,
            rate: self.rate,
            duration_ts: self.duration_ts,
        }
    }
}

/// Converts a timestamp in `time_base` units to a `Duration`; negative values clamp to zero.
pub fn ts_to_duration(ts: i64, time_base: Rational) -> Duration {
    let num = time_base.numerator() as i128;
    let den = time_base.denominator() as i128;
    if ts <= 0 || num <= 0 || den <= 0 {
        return Duration::ZERO;
    }
    let nanos = ts as i128 * num * 1_000_000_000 / den;
    Duration::from_nanos(nanos.min(u64::MAX as i128) as u64)
}

/// Converts a `Duration` to a timestamp in `time_base` units, rounding down.
pub fn duration_to_ts(duration: Duration, time_base: Rational) -> i64 {
    let num = time_base.numerator() as i128;
    let den = time_base.denominator() as i128;
    if num <= 0 || den <= 0 {
        return 0;
    }
    (duration.as_nanos() as i128 * den / (num * 1_000_000_000)) as i64
}
