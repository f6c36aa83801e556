//! Boundary between the interpreter and whatever renders its side effects.

use serde::Serialize;

/// One observable side effect, emitted synchronously in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PeripheralEvent {
    ClearScreen,
    /// `ch` is drawn at the cursor, or is `b'\n'` for a line break. The
    /// position is the cursor before it advances.
    DrawGlyphOrNewline { ch: u8, x: u16, y: u16 },
    DrawPixel { x: u8, y: u8 },
    SerialByte { byte: u8 },
    SpiByte { byte: u8 },
    CursorMoved { x: u16, y: u16 },
}

pub trait PeripheralSink {
    fn emit(&mut self, event: PeripheralEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PeripheralSink for NullSink {
    fn emit(&mut self, _event: PeripheralEvent) {}
}

impl PeripheralSink for Vec<PeripheralEvent> {
    fn emit(&mut self, event: PeripheralEvent) {
        self.push(event);
    }
}

impl<S: PeripheralSink + ?Sized> PeripheralSink for &mut S {
    fn emit(&mut self, event: PeripheralEvent) {
        (**self).emit(event);
    }
}

impl<F: FnMut(PeripheralEvent)> PeripheralSink for Forward<F> {
    fn emit(&mut self, event: PeripheralEvent) {
        (self.0)(event);
    }
}

/// Adapts a closure into a sink.
pub struct Forward<F>(pub F);
