//! Path normalization and filename validation.

use alloc::string::String;
use alloc::vec::Vec;

/// Maximum length of one path component (a directory-entry name).
pub const MAX_FILENAME_LEN: usize = 28;

/// Normalize `src` (absolute or relative to `cwd`) into an absolute,
/// canonical path written into `dst`.
///
/// An absolute `src` (leading `/`) ignores `cwd`; otherwise `src` is
/// concatenated onto `cwd`, which must itself be absolute. `.`
/// components are elided, `..` pops one component (stopping at the
/// root), and runs of separators collapse to one. Returns the output
/// length, or `0` if it would not fit in `dst` (without touching
/// `dst`'s contents beyond what already fit).
pub fn format_path(src: &str, cwd: &str, dst: &mut [u8]) -> usize {
    let combined = if src.starts_with('/') {
        String::from(src)
    } else {
        let mut s = String::from(cwd);
        if !s.ends_with('/') {
            s.push('/');
        }
        s.push_str(src);
        s
    };

    let mut stack: Vec<&str> = Vec::new();
    for comp in combined.split('/') {
        match comp {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            _ => stack.push(comp),
        }
    }

    let mut out = String::from("/");
    for (i, comp) in stack.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(comp);
    }

    let bytes = out.as_bytes();
    if bytes.len() > dst.len() {
        return 0;
    }
    dst[..bytes.len()].copy_from_slice(bytes);
    bytes.len()
}

/// Like [`format_path`] but returns an owned, heap-allocated path
/// instead of writing into a caller buffer — convenient wherever the
/// fixed-size contract above isn't needed.
pub fn format_path_owned(src: &str, cwd: &str) -> String {
    let mut buf = alloc::vec![0u8; src.len() + cwd.len() + 2];
    let len = format_path(src, cwd, &mut buf);
    buf.truncate(len);
    String::from_utf8(buf).expect("format_path only emits ASCII path components")
}

/// Is `name` usable as a single path component: non-empty, at most
/// `max` bytes, not `.` or `..`, and free of any byte in `forbidden`?
pub fn is_valid_filename(name: &str, forbidden: &[u8], max: usize) -> bool {
    if name.is_empty() || name.len() > max {
        return false;
    }
    if name == "." || name == ".." {
        return false;
    }
    !name.bytes().any(|b| forbidden.contains(&b))
}

/// Is every component of `path` a valid filename? The separator
/// itself is always allowed, even if present in `forbidden`.
pub fn is_valid_path(path: &str, forbidden: &[u8], max_name: usize) -> bool {
    if path.is_empty() {
        return false;
    }
    path.split('/').filter(|c| !c.is_empty()).all(|c| is_valid_filename(c, forbidden, max_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_and_dotdot_are_resolved() {
        let mut dst = [0u8; 64];
        let len = format_path("a/./b/../c", "/", &mut dst);
        assert_eq!(&dst[..len], b"/a/c");
    }

    #[test]
    fn relative_path_walks_up_past_cwd() {
        let mut dst = [0u8; 64];
        let len = format_path("../../etc/./passwd", "/usr/local", &mut dst);
        assert_eq!(len, 11);
        assert_eq!(&dst[..len], b"/etc/passwd");
    }

    #[test]
    fn dotdot_from_root_stays_at_root() {
        let mut dst = [0u8; 16];
        let len = format_path("..", "/", &mut dst);
        assert_eq!(&dst[..len], b"/");
    }

    #[test]
    fn absolute_src_ignores_cwd() {
        let mut dst = [0u8; 64];
        let len = format_path("/a/b", "/somewhere/else", &mut dst);
        assert_eq!(&dst[..len], b"/a/b");
    }

    #[test]
    fn overflowing_buffer_returns_zero() {
        let mut dst = [0u8; 2];
        assert_eq!(format_path("/abcdef", "/", &mut dst), 0);
    }

    #[test]
    fn repeated_separators_collapse() {
        let mut dst = [0u8; 64];
        let len = format_path("a//b///c", "/", &mut dst);
        assert_eq!(&dst[..len], b"/a/b/c");
    }

    #[test]
    fn format_path_is_idempotent() {
        let mut dst = [0u8; 64];
        let once = format_path("../../etc/./passwd", "/usr/local", &mut dst);
        let normalized = String::from_utf8(dst[..once].to_vec()).unwrap();
        let mut dst2 = [0u8; 64];
        let twice = format_path(&normalized, "/", &mut dst2);
        assert_eq!(&dst[..once], &dst2[..twice]);
    }

    #[test]
    fn filenames_reject_dot_and_dotdot_and_oversize() {
        assert!(!is_valid_filename(".", &[], 28));
        assert!(!is_valid_filename("..", &[], 28));
        assert!(!is_valid_filename("", &[], 28));
        assert!(!is_valid_filename("this_name_is_far_too_long_for_the_limit", &[], 28));
        assert!(is_valid_filename("hello", &[], 28));
    }

    #[test]
    fn filenames_reject_forbidden_bytes() {
        assert!(!is_valid_filename("a:b", b":", 28));
        assert!(is_valid_filename("a:b", &[], 28));
    }

    #[test]
    fn valid_path_checks_every_component() {
        assert!(is_valid_path("/a/b/c", &[], MAX_FILENAME_LEN));
        assert!(!is_valid_path("/a/../c", &[], MAX_FILENAME_LEN));
        assert!(!is_valid_path("", &[], MAX_FILENAME_LEN));
    }
}
