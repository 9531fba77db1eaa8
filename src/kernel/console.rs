// Console output. The driver (uart, polling vs. interrupt) belongs to the
// platform; the process core only emits bytes through it.

#[cfg(target_os = "none")]
extern "C" {
    // provided by the platform's console driver
    fn consputc(c: u8);
}

#[cfg(target_os = "none")]
pub fn putc(c: u8) {
    unsafe { consputc(c) }
}

#[cfg(not(target_os = "none"))]
pub fn putc(c: u8) {
    use std::io::Write;
    let _ = std::io::stdout().write_all(&[c]);
}
