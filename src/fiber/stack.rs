use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::ptr::NonNull;

const STACK_ALIGN: usize = 16;

/// Smallest stack a fiber may run on; anything below is rounded up.
pub(crate) const MIN_STACK_SIZE: usize = 16 * 1024;

/// Heap allocated execution stack owned by a single fiber.
///
/// Allocated once when the fiber is created, reused across
/// [`Fiber::reset`](super::Fiber::reset) and freed when the fiber is dropped.
pub(crate) struct Stack {
    base: NonNull<u8>,
    layout: Layout,
}

// The stack is plain memory; only the fiber that owns it ever runs on it.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    pub(crate) fn new(size: usize) -> Self {
        let size = size.max(MIN_STACK_SIZE);
        let layout = match Layout::from_size_align(size, STACK_ALIGN) {
            Ok(layout) => layout,
            Err(_) => crate::utils::fatal(format_args!("invalid fiber stack size {size}")),
        };

        let base = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(base) else {
            handle_alloc_error(layout);
        };

        Self { base, layout }
    }

    pub(crate) fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}
