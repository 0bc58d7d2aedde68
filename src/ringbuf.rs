// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-size event trace for the engines.
//!
//! Each engine owns a `Ringbuf` of its own `Trace` type and records into it
//! with [`ringbuf_entry!`](crate::ringbuf_entry). Nothing here formats text;
//! the buffers are meant to be read with a debugger (or from tests) after the
//! fact, so recording costs a handful of stores even inside a timed section.
//!
//! An entry that repeats the previous one (same source line, same payload)
//! bumps that entry's `count` instead of taking a new slot.

/// One recorded event.
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Makes an empty buffer with every slot holding `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // None is treated as out of range, which makes the first entry land
        // in slot 0 below.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// The most recent payload, if anything has been recorded.
    pub fn latest(&self) -> Option<T> {
        self.last
            .and_then(|i| self.buffer.get(i))
            .map(|ent| ent.payload)
    }

    /// Iterates over recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> {
        let start = self.last.map_or(0, |l| l + 1);
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.count != 0)
    }
}

/// Records `$payload` into `$buf`, tagged with the current source line.
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let p = $payload;
        $crate::ringbuf::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}
