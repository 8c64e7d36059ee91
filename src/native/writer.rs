use super::layout::{HeadersOutLayout, NgxStr};
use super::NativeResponseWriter;
use crate::error::HostError;
use crate::headers::KnownHeader;
use std::ptr::NonNull;

/// Request memory pool of the host.
pub trait NativePool {
    /// Copy `bytes` into pool memory that lives as long as the request.
    fn alloc_copy(&self, bytes: &[u8]) -> Option<NonNull<u8>>;
}

/// Host functions for the parts of `headers_out` that are not plain slots.
pub trait HeaderTableOps {
    /// Create a table entry for `header` and point its dedicated slot at it.
    fn push_known(
        &mut self,
        headers_out: NonNull<u8>,
        header: KnownHeader,
        value: NgxStr,
    ) -> Result<(), HostError>;

    /// Append a generic entry to the header table at `table`.
    fn push_entry(&mut self, table: NonNull<u8>, name: NgxStr, value: NgxStr)
        -> Result<(), HostError>;

    /// The host's own content type assignment.
    fn set_default_content_type(&mut self);
}

/// [`NativeResponseWriter`] over raw host memory.
pub struct RawResponseWriter<'a> {
    base: NonNull<u8>,
    layout: &'a HeadersOutLayout,
    pool: &'a dyn NativePool,
    ops: &'a mut dyn HeaderTableOps,
}

impl<'a> RawResponseWriter<'a> {
    /// # Safety
    ///
    /// `base` must point to a live, writable `headers_out` struct of at least
    /// `layout.size()` bytes that nothing else accesses while the writer
    /// exists. Call only on the host thread.
    pub unsafe fn new(
        base: NonNull<u8>,
        layout: &'a HeadersOutLayout,
        pool: &'a dyn NativePool,
        ops: &'a mut dyn HeaderTableOps,
    ) -> Self {
        Self {
            base,
            layout,
            pool,
            ops,
        }
    }

    fn write_field<T>(&mut self, offset: usize, value: T) {
        // SAFETY: the layout guarantees offset + size_of::<T>() lies inside
        // the struct, and `new`'s contract guarantees exclusive access to it.
        unsafe {
            self.base
                .as_ptr()
                .add(offset)
                .cast::<T>()
                .write_unaligned(value);
        }
    }

    fn copy_to_pool(&self, bytes: &[u8]) -> Result<NgxStr, HostError> {
        if bytes.is_empty() {
            return Ok(NgxStr::EMPTY);
        }
        let data = self
            .pool
            .alloc_copy(bytes)
            .ok_or(HostError::PoolExhausted {
                requested: bytes.len(),
            })?;
        Ok(NgxStr {
            len: bytes.len(),
            data: data.as_ptr(),
        })
    }

    fn table(&self) -> NonNull<u8> {
        // SAFETY: the headers offset is validated to lie inside the struct.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.layout.headers())) }
    }
}

impl NativeResponseWriter for RawResponseWriter<'_> {
    fn write_status(&mut self, status: u16) {
        self.write_field(self.layout.status(), i32::from(status));
    }

    fn write_content_type(&mut self, value: &[u8]) -> Result<usize, HostError> {
        let s = self.copy_to_pool(value)?;
        self.write_field(self.layout.content_type(), s);
        Ok(s.len)
    }

    fn write_content_type_len(&mut self, len: usize) {
        self.write_field(self.layout.content_type_len(), len);
    }

    fn write_known(&mut self, header: KnownHeader, value: &[u8]) -> Result<(), HostError> {
        let value = self.copy_to_pool(value)?;
        self.ops.push_known(self.base, header, value)
    }

    fn insert_header(&mut self, name: &[u8], value: &[u8]) -> Result<(), HostError> {
        let name = self.copy_to_pool(name)?;
        let value = self.copy_to_pool(value)?;
        let table = self.table();
        self.ops.push_entry(table, name, value)
    }

    fn set_default_content_type(&mut self) {
        self.ops.set_default_content_type();
    }
}
