use super::Backend;

/// Package image held in an owned buffer, as produced by a save or read from a stream.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Takes ownership of `data`.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn bytes(&self) -> &[u8] {
        &self.data
    }
}
