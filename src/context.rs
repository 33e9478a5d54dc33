// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! `make_fcontext` / `jump_fcontext` / `ontop_fcontext`, via the `context`
//! crate rather than a hand-written per-architecture trampoline.
//!
//! This crate's own earlier lineage (see the pack's older revisions of this
//! library) wrote `rust_swap_registers` by hand and linked it in through a
//! `build.rs` that shelled out to a C compiler. Later revisions moved the
//! same fcontext ABI into its own crate so that downstream crates don't
//! need a C toolchain just to switch stacks. We use that crate directly.

use context::Transfer;

use crate::stack::Stack;

/// The function a freshly made context starts running in. Receives the
/// [`Transfer`] describing who jumped into it and why; must never return.
pub type EntryFn = extern "C" fn(Transfer) -> !;

/// One end of an asymmetric switch: an opaque saved-register frame. `None`
/// means "nothing saved here yet" (the scheduler's own calling frame before
/// it has resumed anything, or a coroutine that has run to completion).
pub struct Context(Option<context::Context>);

impl Context {
    /// A context with nothing saved in it.
    pub fn empty() -> Context {
        Context(None)
    }

    /// Build a context that starts running `entry` on `stack` the first
    /// time it is jumped into.
    pub fn new(stack: &Stack, entry: EntryFn) -> Context {
        let raw = unsafe { context::Context::new(stack, entry) };
        Context(Some(raw))
    }

    /// Wrap a raw continuation handed back inside a [`Transfer`]. Used by
    /// the coroutine trampoline to capture the context it should jump back
    /// into, and nowhere else.
    pub(crate) fn from_raw(raw: context::Context) -> Context {
        Context(Some(raw))
    }

    /// True once this context has either never been jumped into, or has
    /// run to completion and jumped back for the last time.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Jump into this context, handing it `data`. Does not return until
    /// whatever now holds the predecessor's continuation jumps back into
    /// it; at that point `self` is left holding that continuation (the
    /// asymmetric switch always returns to the jumper's own frame, never to
    /// an arbitrary sibling), and the data word the jumper-back passed is
    /// returned.
    pub fn resume(&mut self, data: usize) -> usize {
        let raw = self.0.take().expect("jumping into an empty context");
        let transfer = unsafe { raw.resume(data) };
        self.0 = Some(transfer.context);
        transfer.data
    }
}
