//! Logging macros that dispatch to `log` or `defmt` depending on enabled
//! features, or compile to nothing when neither is selected.

#![allow(unused_macros)]

#[cfg(all(feature = "log", feature = "defmt"))]
compile_error!("the `log` and `defmt` features are mutually exclusive");

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::trace!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::trace!($s $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::debug!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::debug!($s $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::info!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::info!($s $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! warn_ {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::warn!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::warn!($s $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($( & $x ),*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            ::log::error!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            ::defmt::error!($s $(, $x)*);
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            let _ = ($( & $x ),*);
        }
    };
}

/// Unwrap a `Result` that is known to be infallible at this point, logging
/// loudly if the assumption turns out to be wrong.
macro_rules! unwrap {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => {
                crate::fmt::error!("unwrap failed: {:?}", e);

                panic!("unwrap failed");
            }
        }
    };
    ($expr:expr, $s:literal) => {
        match $expr {
            Ok(value) => value,
            Err(e) => {
                crate::fmt::error!(concat!($s, ": {:?}"), e);

                panic!($s);
            }
        }
    };
}

/// Unwrap an `Option` that is known to be `Some` at this point.
macro_rules! unwrap_opt {
    ($expr:expr) => {
        match $expr {
            Some(value) => value,
            None => {
                crate::fmt::error!("unwrap on None");

                panic!("unwrap on None");
            }
        }
    };
    ($expr:expr, $s:literal) => {
        match $expr {
            Some(value) => value,
            None => {
                crate::fmt::error!($s);

                panic!($s);
            }
        }
    };
}

pub(crate) use warn_ as warn;
pub(crate) use {debug, error, info, trace, unwrap, unwrap_opt};
