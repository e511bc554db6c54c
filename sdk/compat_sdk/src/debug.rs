//! Assertion reporting.
//!
//! Contract violations that firmware would route to a platform `DebugAssert` handler are reported through
//! [`report_assert`]. The message is always logged at error level; the installed hook then decides whether execution
//! continues. The default hook panics.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use spin::RwLock;

/// Signature of an assertion hook: file, line, description.
pub type AssertHook = fn(&str, u32, &str);

fn panic_hook(file: &str, line: u32, description: &str) {
    panic!("ASSERT [{file}:{line}] {description}");
}

static ASSERT_HOOK: RwLock<AssertHook> = RwLock::new(panic_hook);

/// Replaces the assertion hook and returns the previous one.
pub fn set_assert_hook(hook: AssertHook) -> AssertHook {
    core::mem::replace(&mut *ASSERT_HOOK.write(), hook)
}

/// Logs and dispatches an assertion failure.
pub fn report_assert(file: &str, line: u32, description: &str) {
    log::error!("ASSERT [{file}:{line}] {description}");
    let hook = *ASSERT_HOOK.read();
    hook(file, line, description);
}

/// Reports an assertion failure at the call site.
#[macro_export]
macro_rules! compat_assert {
    ($cond:expr, $description:expr) => {
        if !$cond {
            $crate::debug::report_assert(file!(), line!(), $description);
        }
    };
}

#[cfg(test)]
mod tests {
    extern crate std;
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    static REPORTED_LINE: AtomicU32 = AtomicU32::new(0);

    fn recording_hook(_file: &str, line: u32, _description: &str) {
        REPORTED_LINE.store(line, Ordering::SeqCst);
    }

    #[test]
    fn hooks_can_be_swapped_and_restored() {
        let previous = set_assert_hook(recording_hook);
        report_assert("lib.rs", 42, "recorded");
        crate::compat_assert!(true, "never reported");
        let restored = set_assert_hook(previous);

        assert_eq!(REPORTED_LINE.load(Ordering::SeqCst), 42);
        assert_eq!(restored as usize, recording_hook as AssertHook as usize);
    }

    #[test]
    fn default_hook_panics() {
        let result = std::panic::catch_unwind(|| panic_hook("lib.rs", 1, "boom"));
        assert!(result.is_err());
    }
}
