use std::time::Duration;

use crate::target::Addr;

/// Target addresses print as fixed-width 32-bit hex.
pub(crate) fn fmt_addr(addr: Addr) -> String {
    format!("0x{addr:08x}")
}

/// `h:mm:ss.mmm` elapsed-time stamp for report headers.
pub(crate) fn fmt_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    let (s, ms) = (ms / 1000, ms % 1000);
    let (m, s) = (s / 60, s % 60);
    let (h, m) = (m / 60, m % 60);
    format!("{h}:{m:02}:{s:02}.{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats() {
        assert_eq!("0x00001000", fmt_addr(0x1000));
        assert_eq!("0:00:01.234", fmt_elapsed(Duration::from_millis(1234)));
        assert_eq!("1:01:00.000", fmt_elapsed(Duration::from_secs(3660)));
    }
}
