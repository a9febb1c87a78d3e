// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The operator-facing `enable` attribute.
//!
//! The host exposes this through whatever control transport it has (a sysfs
//! file, a management RPC); the attribute itself only parses the text and
//! forwards to the controller.

use crate::ctl::CpuReserveCtl;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;

/// An error completing a control surface operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// The written value did not parse as a boolean.
    #[error("invalid boolean value")]
    InvalidArgument,
    /// The attribute is not yet bound to a controller.
    #[error("reservation controller not available")]
    Unavailable,
}

/// The read/write "enabled" attribute.
///
/// May be constructed before the controller exists; operations fail with
/// [`ControlError::Unavailable`] until [`EnableAttr::bind`] is called.
#[derive(Default)]
pub struct EnableAttr {
    ctl: RwLock<Option<Arc<CpuReserveCtl>>>,
}

impl EnableAttr {
    /// Returns a new, unbound attribute.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds the attribute to a running controller.
    pub fn bind(&self, ctl: Arc<CpuReserveCtl>) {
        *self.ctl.write() = Some(ctl);
    }

    /// Handles a write of `text` to the attribute.
    ///
    /// Invalid input leaves the reservation state unchanged.
    pub fn store(&self, text: &str) -> Result<(), ControlError> {
        let enable = parse_bool(text).ok_or(ControlError::InvalidArgument)?;
        let ctl = self.ctl.read();
        let ctl = ctl.as_ref().ok_or(ControlError::Unavailable)?;
        ctl.set_enabled(enable);
        Ok(())
    }

    /// Handles a read of the attribute, returning `"1\n"` or `"0\n"`.
    pub fn show(&self) -> Result<String, ControlError> {
        let ctl = self.ctl.read();
        let ctl = ctl.as_ref().ok_or(ControlError::Unavailable)?;
        Ok(if ctl.enabled() { "1\n" } else { "0\n" }.to_owned())
    }
}

/// Boolean parsing with sysfs toggle semantics: the leading character decides
/// for `1`/`0`/`y`/`n`, and `on`/`off` are matched on their second character.
/// A trailing newline is tolerated.
fn parse_bool(text: &str) -> Option<bool> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    let mut chars = text.chars();
    match chars.next()? {
        '1' | 'y' | 'Y' => Some(true),
        '0' | 'n' | 'N' => Some(false),
        'o' | 'O' => match chars.next()? {
            'n' | 'N' => Some(true),
            'f' | 'F' => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpuset::CpuId;
    use crate::cpuset::CpuSet;
    use crate::host::CpuHost;

    struct NullHost;

    impl CpuHost for NullHost {
        fn isolate(&self, _cpu: CpuId) -> anyhow::Result<()> {
            Ok(())
        }

        fn unisolate(&self, _cpu: CpuId) -> anyhow::Result<()> {
            Ok(())
        }

        fn is_online(&self, _cpu: CpuId) -> bool {
            true
        }

        fn online_cpus(&self) -> CpuSet {
            CpuSet::new()
        }

        fn isolated_cpus(&self) -> CpuSet {
            CpuSet::new()
        }
    }

    fn bound_attr() -> (EnableAttr, Arc<CpuReserveCtl>) {
        let ctl = Arc::new(CpuReserveCtl::new(CpuSet::new(), Arc::new(NullHost)));
        let attr = EnableAttr::new();
        attr.bind(ctl.clone());
        (attr, ctl)
    }

    #[test]
    fn parse_bool_accepts_toggle_spellings() {
        for text in ["1", "y", "Y", "yes", "on", "ON", "1\n"] {
            assert_eq!(parse_bool(text), Some(true), "{text:?}");
        }
        for text in ["0", "n", "N", "no", "off", "Off", "0\n"] {
            assert_eq!(parse_bool(text), Some(false), "{text:?}");
        }
        for text in ["", "\n", "2", "true", "o", "ox", "enable"] {
            assert_eq!(parse_bool(text), None, "{text:?}");
        }
    }

    #[test]
    fn unbound_attr_is_unavailable() {
        let attr = EnableAttr::new();
        assert_eq!(attr.show(), Err(ControlError::Unavailable));
        assert_eq!(attr.store("1"), Err(ControlError::Unavailable));
    }

    #[test]
    fn store_toggles_controller() {
        let (attr, ctl) = bound_attr();
        assert_eq!(attr.show().unwrap(), "0\n");
        attr.store("1\n").unwrap();
        assert!(ctl.enabled());
        assert_eq!(attr.show().unwrap(), "1\n");
        attr.store("off").unwrap();
        assert!(!ctl.enabled());
    }

    #[test]
    fn invalid_store_leaves_state_unchanged() {
        let (attr, ctl) = bound_attr();
        attr.store("1").unwrap();
        assert_eq!(attr.store("bogus"), Err(ControlError::InvalidArgument));
        assert!(ctl.enabled());
    }
}
