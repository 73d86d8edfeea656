use crate::verdict_code::VerdictCode;

/// A verdict decision as handed to [`InterceptedPacket::set_verdict`].
///
/// `mark` and `payload` are optional. `None` means "leave the kernel's value
/// alone", which is different from `Some(0)` for the mark.
///
/// [`InterceptedPacket::set_verdict`]: crate::InterceptedPacket::set_verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub code: VerdictCode,
    pub mark: Option<u32>,
    pub payload: Option<Vec<u8>>,
}

impl Verdict {
    pub fn new(code: VerdictCode) -> Self {
        Self {
            code,
            mark: None,
            payload: None,
        }
    }

    pub fn accept() -> Self {
        Self::new(VerdictCode::Accept)
    }

    pub fn drop() -> Self {
        Self::new(VerdictCode::Drop)
    }

    /// Writes `mark` to the packet's conntrack entry along with the verdict.
    pub fn with_mark(mut self, mark: u32) -> Self {
        self.mark = Some(mark);
        self
    }

    /// Replaces the packet's payload before the kernel re-injects it.
    /// Only meaningful for verdicts that let the packet continue.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

impl From<VerdictCode> for Verdict {
    fn from(code: VerdictCode) -> Self {
        Verdict::new(code)
    }
}

impl From<(VerdictCode, u32)> for Verdict {
    fn from((code, mark): (VerdictCode, u32)) -> Self {
        Verdict::new(code).with_mark(mark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_code_carries_no_mark() {
        let verdict = Verdict::from(VerdictCode::Drop);
        assert_eq!(verdict.mark, None);
        assert_eq!(verdict.payload, None);
    }

    #[test]
    fn test_zero_mark_is_present() {
        let verdict = Verdict::from((VerdictCode::Drop, 0));
        assert_eq!(verdict.mark, Some(0));
    }

    #[test]
    fn test_builder() {
        let verdict = Verdict::accept().with_mark(7).with_payload(vec![1, 2, 3]);
        assert_eq!(verdict.code, VerdictCode::Accept);
        assert_eq!(verdict.mark, Some(7));
        assert_eq!(verdict.payload.as_deref(), Some(&[1u8, 2, 3][..]));
    }
}
