//! Panic logging

use std::panic;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

static PANIC_HOOK_ONCE: Once = Once::new();
static INSTALLS: AtomicUsize = AtomicUsize::new(0);

/// Route panics through `tracing` before the default hook runs
///
/// Safe to call any number of times; the hook is registered once per process.
pub fn install_panic_hook() {
    PANIC_HOOK_ONCE.call_once(|| {
        INSTALLS.fetch_add(1, Ordering::SeqCst);
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_default();
            let message = info
                .payload()
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| info.payload().downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "<non-string panic payload>".to_string());
            tracing::error!(panic.message = %message, panic.location = %location, "Panic");
            default_hook(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn hook_installs() -> usize {
        INSTALLS.load(Ordering::SeqCst)
    }

    #[test]
    #[serial]
    fn test_repeated_install_registers_once() {
        install_panic_hook();
        install_panic_hook();
        install_panic_hook();
        assert_eq!(hook_installs(), 1);
    }

    #[test]
    #[serial]
    fn test_panics_still_unwind_through_hook() {
        install_panic_hook();
        let result = std::panic::catch_unwind(|| panic!("boom"));
        assert!(result.is_err());
        assert_eq!(hook_installs(), 1);
    }
}
