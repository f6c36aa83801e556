use serde::Serialize;

use crate::config::ScreenGeometry;
use crate::peripherals::{PeripheralEvent, PeripheralSink};

/// Text cursor of the 320x240 panel. Pixels themselves live in the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Screen {
    pub x: u16,
    pub y: u16,
    #[serde(skip)]
    geometry: ScreenGeometry,
}

impl Screen {
    pub fn new(geometry: ScreenGeometry) -> Self {
        Self {
            x: 0,
            y: geometry.top_line,
            geometry,
        }
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.geometry
    }

    pub fn reset_cursor(&mut self) {
        self.x = 0;
        self.y = self.geometry.top_line;
    }

    pub fn cursor(&self) -> (u16, u16) {
        (self.x, self.y)
    }

    /// Draw `ch` (or break the line on `\n`) and advance, wrapping at the
    /// right edge and clearing the panel once the bottom is reached.
    pub fn print<S: PeripheralSink>(&mut self, ch: u8, sink: &mut S) {
        let g = self.geometry;
        sink.emit(PeripheralEvent::DrawGlyphOrNewline {
            ch,
            x: self.x,
            y: self.y,
        });
        if ch == b'\n' {
            self.x = 0;
            self.y = self.y.saturating_add(g.line_height);
        } else {
            self.x = self.x.saturating_add(g.glyph_advance);
        }
        if self.x >= g.width {
            self.x = 0;
            self.y = self.y.saturating_add(g.line_height);
        }
        if self.y >= g.height {
            sink.emit(PeripheralEvent::ClearScreen);
            self.y = g.top_line;
        }
    }

    pub fn clear<S: PeripheralSink>(&mut self, sink: &mut S) {
        sink.emit(PeripheralEvent::ClearScreen);
        self.reset_cursor();
    }

    pub fn move_x<S: PeripheralSink>(&mut self, x: u8, sink: &mut S) {
        self.x = x as u16;
        sink.emit(PeripheralEvent::CursorMoved {
            x: self.x,
            y: self.y,
        });
    }

    pub fn move_y<S: PeripheralSink>(&mut self, y: u8, sink: &mut S) {
        self.y = y as u16;
        sink.emit(PeripheralEvent::CursorMoved {
            x: self.x,
            y: self.y,
        });
    }
}
