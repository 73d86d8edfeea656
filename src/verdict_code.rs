use std::fmt;
use std::str::FromStr;

use crate::error::VerdictError;

// ==========================================
// Kernel dispositions (linux/netfilter.h NF_*)
// ==========================================
/// A netfilter disposition returned to the kernel for a queued packet.
///
/// The discriminants are the kernel's own `NF_*` values and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum VerdictCode {
    Drop = 0,
    Accept = 1,
    Stolen = 2,
    Queue = 3,
    Repeat = 4,
    Stop = 5,
}

impl VerdictCode {
    pub const ALL: [VerdictCode; 6] = [
        VerdictCode::Drop,
        VerdictCode::Accept,
        VerdictCode::Stolen,
        VerdictCode::Queue,
        VerdictCode::Repeat,
        VerdictCode::Stop,
    ];

    pub fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            VerdictCode::Drop => "NF_DROP",
            VerdictCode::Accept => "NF_ACCEPT",
            VerdictCode::Stolen => "NF_STOLEN",
            VerdictCode::Queue => "NF_QUEUE",
            VerdictCode::Repeat => "NF_REPEAT",
            VerdictCode::Stop => "NF_STOP",
        }
    }
}

impl TryFrom<u32> for VerdictCode {
    type Error = VerdictError;

    fn try_from(ordinal: u32) -> Result<Self, Self::Error> {
        VerdictCode::ALL
            .get(ordinal as usize)
            .copied()
            .ok_or(VerdictError::InvalidVerdict(ordinal))
    }
}

impl From<VerdictCode> for u32 {
    fn from(code: VerdictCode) -> Self {
        code.ordinal()
    }
}

impl fmt::Display for VerdictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VerdictCode {
    type Err = String;

    /// Accepts both `accept` and `NF_ACCEPT` spellings, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("NF_").unwrap_or(&upper);
        VerdictCode::ALL
            .iter()
            .copied()
            .find(|code| &code.name()[3..] == bare)
            .ok_or_else(|| format!("unknown verdict '{}'", s))
    }
}
