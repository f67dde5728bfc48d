use crate::cursor::ByteSink;
use crate::error::Result;
use crate::game::Game;
use crate::ids::EidWidth;

/// Width of a Papyrus string-table index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexWidth {
    U16,
    /// Tables that overflowed the 16-bit count use 32-bit indices.
    U32,
}

impl IndexWidth {
    pub fn bytes(self) -> usize {
        match self {
            IndexWidth::U16 => 2,
            IndexWidth::U32 => 4,
        }
    }
}

/// Everything a value needs to know to encode itself or compute its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub game: Game,
    pub eid_width: EidWidth,
    pub index_width: IndexWidth,
}

impl Layout {
    pub fn new(game: Game) -> Self {
        Self {
            game,
            eid_width: game.eid_width(),
            index_width: IndexWidth::U16,
        }
    }

    pub fn with_index_width(self, index_width: IndexWidth) -> Self {
        Self {
            index_width,
            ..self
        }
    }

    #[inline]
    pub fn eid_bytes(&self) -> usize {
        self.eid_width.bytes()
    }

    #[inline]
    pub fn index_bytes(&self) -> usize {
        self.index_width.bytes()
    }
}

/// A decoded piece of the save that can write itself back.
///
/// `byte_size` is computed from the value alone and must equal the number of
/// bytes `write` produces; the writer checkpoints against it.
pub trait Element {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()>;

    fn byte_size(&self, layout: &Layout) -> usize;
}

impl<T: Element> Element for Vec<T> {
    fn write(&self, out: &mut ByteSink, layout: &Layout) -> Result<()> {
        for e in self {
            e.write(out, layout)?;
        }
        Ok(())
    }

    fn byte_size(&self, layout: &Layout) -> usize {
        self.iter().map(|e| e.byte_size(layout)).sum()
    }
}
