//! Views over GCN hardware status registers captured by instrumented kernels.
//!
//! Bit ranges follow the GCN3/CDNA ISA documentation for `HW_ID`.

use pastey::paste;
use std::fmt;

/// Frequency of the `s_memrealtime` counter, in Hz.
pub const MEMREALTIME_FREQ: u64 = 25_000_000;

const NS_PER_S: i128 = 1_000_000_000;

/// Extract bits `low..=high` of `reg`, shifted down to bit 0.
///
/// `high` is clamped to 63. An empty range (`low > high`) yields 0.
pub fn extract_bits(reg: u64, low: u32, high: u32) -> u64 {
    let high = high.min(63);
    if low > high {
        return 0;
    }
    let width = high - low + 1;
    let mask = u64::MAX.checked_shr(64 - width).unwrap_or(0);
    reg.checked_shr(low).unwrap_or(0) & mask
}

/// Generates a named accessor for a bit range of the register.
macro_rules! bit_field {
    ($name: ident, $low: literal, $high: literal) => {
        paste! {
            #[doc = "Bits " $low " to " $high " (inclusive)."]
            pub fn [<$name>](&self) -> u64 {
                extract_bits(u64::from(self.0), $low, $high)
            }
        }
    };
}

/// The `HW_ID` register: identifies where on the GPU a wave is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde_derive::Serialize)]
#[serde(transparent)]
pub struct HardwareIdRegister(pub u32);

impl HardwareIdRegister {
    bit_field!(wave_id, 0, 3);

    bit_field!(simd_id, 4, 5);

    bit_field!(pipe_id, 6, 7);

    bit_field!(cu_id, 8, 11);

    bit_field!(sh_id, 12, 12);

    bit_field!(se_id, 13, 14);

    bit_field!(tg_id, 16, 19);

    bit_field!(vm_id, 20, 23);

    bit_field!(queue_id, 24, 26);

    bit_field!(state_id, 27, 29);

    bit_field!(me_id, 30, 31);

    /// Flat compute unit index, combining the CU, shader array and shader
    /// engine ids.
    pub fn compute_unit(&self) -> u64 {
        self.cu_id() + (self.sh_id() << 3) + (self.se_id() << 4)
    }

    /// All named fields, in bit order.
    pub fn fields(&self) -> [(&'static str, u64); 11] {
        [
            ("wave_id", self.wave_id()),
            ("simd_id", self.simd_id()),
            ("pipe_id", self.pipe_id()),
            ("cu_id", self.cu_id()),
            ("sh_id", self.sh_id()),
            ("se_id", self.se_id()),
            ("tg_id", self.tg_id()),
            ("vm_id", self.vm_id()),
            ("queue_id", self.queue_id()),
            ("state_id", self.state_id()),
            ("me_id", self.me_id()),
        ]
    }
}

impl From<u64> for HardwareIdRegister {
    fn from(value: u64) -> Self {
        // HW_ID is 32 bits wide, anything above is not part of the register.
        Self(value as u32)
    }
}

/// The `EXEC` register: one bit per active lane of the wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde_derive::Serialize)]
#[serde(transparent)]
pub struct ExecRegister(pub u64);

impl ExecRegister {
    pub fn active_thread_count(&self) -> u32 {
        self.0.count_ones()
    }
}

impl fmt::Display for ExecRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} active threads>", self.active_thread_count())
    }
}

/// Convert an `s_memrealtime` value to nanoseconds on the host clock.
///
/// `first_stamp` is the device clock value matching `base_ns` on the host.
pub fn memrealtime_to_nanos(stamp: u64, first_stamp: u64, base_ns: u64) -> u64 {
    let diff_ticks = i128::from(stamp) - i128::from(first_stamp);
    let diff_ns = diff_ticks * NS_PER_S / i128::from(MEMREALTIME_FREQ);
    (i128::from(base_ns) + diff_ns).clamp(0, i128::from(u64::MAX)) as u64
}
