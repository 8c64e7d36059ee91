use crate::error::LayoutError;
use std::mem::{align_of, size_of};
use std::ptr;

/// Host string: `{ len, data }`, data not NUL-terminated.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NgxStr {
    pub len: usize,
    pub data: *const u8,
}

impl NgxStr {
    pub const EMPTY: NgxStr = NgxStr {
        len: 0,
        data: ptr::null(),
    };
}

/// Field offsets as reported by the host at module init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadersOutOffsets {
    /// Total size of the `headers_out` struct.
    pub size: usize,
    pub status: usize,
    pub content_type: usize,
    pub content_type_len: usize,
    /// Start of the generic header table.
    pub headers: usize,
    /// Size of the generic header table descriptor.
    pub headers_size: usize,
}

/// Validated offset table for the host's `headers_out` struct.
///
/// Every field is in bounds, aligned for its type and disjoint from the
/// others, so writes through it cannot clobber neighbouring host data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadersOutLayout {
    offsets: HeadersOutOffsets,
}

struct Field {
    name: &'static str,
    offset: usize,
    width: usize,
    align: usize,
}

impl HeadersOutLayout {
    pub fn new(offsets: HeadersOutOffsets) -> Result<Self, LayoutError> {
        let fields = [
            Field {
                name: "status",
                offset: offsets.status,
                width: size_of::<i32>(),
                align: align_of::<i32>(),
            },
            Field {
                name: "content_type",
                offset: offsets.content_type,
                width: size_of::<NgxStr>(),
                align: align_of::<NgxStr>(),
            },
            Field {
                name: "content_type_len",
                offset: offsets.content_type_len,
                width: size_of::<usize>(),
                align: align_of::<usize>(),
            },
            Field {
                name: "headers",
                offset: offsets.headers,
                width: offsets.headers_size,
                align: align_of::<usize>(),
            },
        ];

        for field in &fields {
            let end = field.offset.checked_add(field.width);
            if end.is_none_or(|end| end > offsets.size) {
                return Err(LayoutError::OutOfBounds {
                    field: field.name,
                    offset: field.offset,
                    width: field.width,
                    size: offsets.size,
                });
            }
            if field.offset % field.align != 0 {
                return Err(LayoutError::Misaligned {
                    field: field.name,
                    offset: field.offset,
                    align: field.align,
                });
            }
        }

        for (i, a) in fields.iter().enumerate() {
            for b in &fields[i + 1..] {
                if a.offset < b.offset + b.width && b.offset < a.offset + a.width {
                    return Err(LayoutError::Overlap {
                        first: a.name,
                        second: b.name,
                    });
                }
            }
        }

        Ok(Self { offsets })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.offsets.size
    }

    #[must_use]
    pub fn status(&self) -> usize {
        self.offsets.status
    }

    #[must_use]
    pub fn content_type(&self) -> usize {
        self.offsets.content_type
    }

    #[must_use]
    pub fn content_type_len(&self) -> usize {
        self.offsets.content_type_len
    }

    #[must_use]
    pub fn headers(&self) -> usize {
        self.offsets.headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HeadersOutOffsets {
        HeadersOutOffsets {
            size: 96,
            headers: 0,
            headers_size: 56,
            status: 56,
            content_type: 64,
            content_type_len: 80,
        }
    }

    #[test]
    fn test_valid_layout() {
        let layout = HeadersOutLayout::new(sample()).unwrap();
        assert_eq!(layout.status(), 56);
        assert_eq!(layout.content_type(), 64);
    }

    #[test]
    fn test_out_of_bounds() {
        let err = HeadersOutLayout::new(HeadersOutOffsets {
            content_type_len: 92,
            ..sample()
        })
        .unwrap_err();
        assert!(matches!(
            err,
            LayoutError::OutOfBounds {
                field: "content_type_len",
                ..
            }
        ));
    }

    #[test]
    fn test_misaligned() {
        let err = HeadersOutLayout::new(HeadersOutOffsets {
            status: 58,
            ..sample()
        })
        .unwrap_err();
        assert!(matches!(err, LayoutError::Misaligned { field: "status", .. }));
    }

    #[test]
    fn test_overlap() {
        let err = HeadersOutLayout::new(HeadersOutOffsets {
            content_type_len: 72,
            ..sample()
        })
        .unwrap_err();
        assert_eq!(
            err,
            LayoutError::Overlap {
                first: "content_type",
                second: "content_type_len"
            }
        );
    }
}
