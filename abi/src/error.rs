//! Error types for the memory-manager boundary

use core::ffi::c_int;

/// Implement common methods for boundary error enums.
///
/// Generates `as_c_int()` and `from_c_int()` for `#[repr(i32)]` error enums
/// that follow the kernel's negative-errno convention.
macro_rules! impl_boundary_error {
    ($ty:ty, fallback: $fallback:ident, variants: { $($val:literal => $variant:ident),* $(,)? }) => {
        impl $ty {
            /// Convert to a C-style integer for boundary returns.
            #[inline]
            pub fn as_c_int(self) -> c_int {
                self as c_int
            }

            /// Convert from a C-style integer.
            #[inline]
            pub fn from_c_int(val: c_int) -> Self {
                match val {
                    $($val => Self::$variant,)*
                    _ => Self::$fallback,
                }
            }
        }
    };
}

/// Memory-manager operation result type.
pub type MemResult<T> = Result<T, MemError>;

/// Errors returned by memory-manager operations.
///
/// Every validation failure is detected before any mutation; the only
/// compensated failure is the bind copy-back path, which still surfaces
/// as [`MemError::Fault`] to the caller.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// Boundary copy failed; caller memory inaccessible.
    Fault = -1,
    /// Size, offset, zero-length or overflowing range.
    InvalidArgument = -2,
    /// Unknown handle or no heap of the requested kind.
    NotFound = -3,
    /// Rights check failed.
    PermissionDenied = -4,
    /// Heap backend exhausted.
    OutOfMemory = -5,
    /// Operation not compiled in.
    Unsupported = -6,
}

impl_boundary_error!(MemError, fallback: InvalidArgument, variants: {
    -1 => Fault,
    -2 => InvalidArgument,
    -3 => NotFound,
    -4 => PermissionDenied,
    -5 => OutOfMemory,
    -6 => Unsupported,
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_int_round_trip() {
        for err in [
            MemError::Fault,
            MemError::InvalidArgument,
            MemError::NotFound,
            MemError::PermissionDenied,
            MemError::OutOfMemory,
            MemError::Unsupported,
        ] {
            assert_eq!(MemError::from_c_int(err.as_c_int()), err);
        }
    }

    #[test]
    fn unknown_code_falls_back() {
        assert_eq!(MemError::from_c_int(-99), MemError::InvalidArgument);
        assert_eq!(MemError::from_c_int(1), MemError::InvalidArgument);
    }
}
