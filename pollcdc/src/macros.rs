//! Macros for building and returning [`crate::error::CdcError`]s.

/// Creates a [`crate::error::CdcError`] from a kind, a static description and an optional
/// detail.
#[macro_export]
macro_rules! cdc_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::CdcError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::CdcError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::CdcError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::cdc_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::cdc_error!($kind, $desc, $detail))
    };
}
