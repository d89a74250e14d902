use crate::error::{Error, Result};

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Names of the 128 MIDI notes, middle C (60) being "C4".
#[derive(Debug, Clone)]
pub struct NoteNames {
    names: Vec<String>,
}

impl NoteNames {
    pub fn new() -> Self {
        let names = (0..128usize)
            .map(|note| format!("{}{}", PITCH_CLASSES[note % 12], note as i32 / 12 - 1))
            .collect();
        Self { names }
    }

    pub fn name_of(&self, note: i32) -> Result<&str> {
        usize::try_from(note)
            .ok()
            .and_then(|index| self.names.get(index))
            .map(String::as_str)
            .ok_or(Error::OutOfRange(note))
    }
}

impl Default for NoteNames {
    fn default() -> Self {
        Self::new()
    }
}
