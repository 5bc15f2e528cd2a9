//! POSIX-style error codes returned by the storage stack.
//!
//! Kept as a closed enum rather than a flat list of `pub const: i32`
//! values, since the filesystem layer only ever produces this fixed
//! set, never an arbitrary syscall errno.

/// An error surfaced by a SUFS operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    /// Operation not permitted.
    Eperm = 1,
    /// No such file or directory.
    Enoent = 2,
    /// I/O error.
    Eio = 5,
    /// Bad file descriptor.
    Ebadf = 9,
    /// Out of memory.
    Enomem = 12,
    /// Device or resource busy.
    Ebusy = 16,
    /// File exists.
    Eexist = 17,
    /// Not a directory.
    Enotdir = 20,
    /// Is a directory.
    Eisdir = 21,
    /// Invalid argument.
    Einval = 22,
    /// File too large.
    Efbig = 27,
    /// No space left on device.
    Enospc = 28,
    /// File name too long.
    Enametoolong = 36,
    /// Directory not empty.
    Enotempty = 39,
    /// Value too large to be stored in the given type.
    Eoverflow = 75,
}

impl Errno {
    /// The raw numeric value, matching standard POSIX errno values.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Errno::Eperm => "EPERM",
            Errno::Enoent => "ENOENT",
            Errno::Eio => "EIO",
            Errno::Ebadf => "EBADF",
            Errno::Enomem => "ENOMEM",
            Errno::Ebusy => "EBUSY",
            Errno::Eexist => "EEXIST",
            Errno::Enotdir => "ENOTDIR",
            Errno::Eisdir => "EISDIR",
            Errno::Einval => "EINVAL",
            Errno::Efbig => "EFBIG",
            Errno::Enospc => "ENOSPC",
            Errno::Enametoolong => "ENAMETOOLONG",
            Errno::Enotempty => "ENOTEMPTY",
            Errno::Eoverflow => "EOVERFLOW",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Convenience alias used throughout the storage stack.
pub type SufsResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_posix_values() {
        assert_eq!(Errno::Enoent.code(), 2);
        assert_eq!(Errno::Eio.code(), 5);
        assert_eq!(Errno::Enospc.code(), 28);
        assert_eq!(Errno::Enametoolong.code(), 36);
        assert_eq!(Errno::Enotempty.code(), 39);
        assert_eq!(Errno::Eoverflow.code(), 75);
    }
}
